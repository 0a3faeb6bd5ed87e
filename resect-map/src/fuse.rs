//! 两个二值掩膜融合为分类标签体.

use ndarray::Zip;

use crate::consts::label;
use crate::error::{EstimateError, EstimateResult};
use crate::{MaskVolume, VolumeGeometry};

/// 标签融合器.
///
/// 输出取值为 `step(a) + 2 * step(b)`. 流水线中 `a` 为切除区掩膜, `b` 为电极掩膜,
/// 因此 [`label::RESECTION`] = 1, [`label::ELECTRODE`] = 2, [`label::BOTH`] = 3.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct LabelFuser;

impl LabelFuser {
    /// 融合 `a` 与 `b`. 输出沿用 `a` 的 header.
    ///
    /// # 错误
    ///
    /// 两者网格 (形状与仿射矩阵) 不一致时返回 `GridMismatch`.
    pub fn fuse(&self, a: &MaskVolume, b: &MaskVolume) -> EstimateResult<MaskVolume> {
        let (ga, gb) = (a.grid(), b.grid());
        if !ga.same_as(&gb) {
            return Err(EstimateError::GridMismatch {
                left: ga.to_string(),
                right: gb.to_string(),
            });
        }

        let mut out = MaskVolume::empty_like(a);
        Zip::from(out.data_mut())
            .and(a.data())
            .and(b.data())
            .for_each(|o, &pa, &pb| *o = code(pa, pb));
        Ok(out)
    }
}

#[inline]
fn code(a: u8, b: u8) -> u8 {
    let step = |p: u8| u8::from(label::is_foreground(p));
    step(a) + 2 * step(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phantom;
    use ndarray::Array3;

    fn masks() -> (MaskVolume, MaskVolume) {
        let affine = phantom::shifted_affine(1.0, [0.0; 3]);
        let a = MaskVolume::from_array(phantom::cube((6, 6, 6), (0, 0, 0), 3), &affine);
        let b = MaskVolume::from_array(phantom::cube((6, 6, 6), (2, 2, 2), 3), &affine);
        (a, b)
    }

    #[test]
    fn test_fuse_codes() {
        let (a, b) = masks();
        let fused = LabelFuser.fuse(&a, &b).unwrap();
        // 两个立方体只在 (2, 2, 2) 处重叠.
        assert_eq!(fused.label_statistics(), [216 - 27 - 27 + 1, 26, 26, 1]);
        assert_eq!(fused[(2, 2, 2)], label::BOTH);
        assert_eq!(fused[(0, 0, 0)], label::RESECTION);
        assert_eq!(fused[(4, 4, 4)], label::ELECTRODE);
    }

    /// 交换参数时 1 与 2 互换, 0 与 3 不变.
    #[test]
    fn test_fuse_swap() {
        let (a, b) = masks();
        let ab = LabelFuser.fuse(&a, &b).unwrap();
        let ba = LabelFuser.fuse(&b, &a).unwrap();
        Zip::from(ab.data()).and(ba.data()).for_each(|&x, &y| {
            let expected = match x {
                label::RESECTION => label::ELECTRODE,
                label::ELECTRODE => label::RESECTION,
                other => other,
            };
            assert_eq!(y, expected);
        });
    }

    /// 非零值一律视为前景.
    #[test]
    fn test_fuse_step() {
        let affine = phantom::shifted_affine(1.0, [0.0; 3]);
        let a = MaskVolume::from_array(Array3::from_elem((1, 1, 2), 7), &affine);
        let b = MaskVolume::from_array(Array3::from_shape_vec((1, 1, 2), vec![0, 255]).unwrap(), &affine);
        let fused = LabelFuser.fuse(&a, &b).unwrap();
        assert_eq!(fused.data().iter().copied().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_grid_mismatch() {
        let (a, _) = masks();
        let shifted = MaskVolume::from_array(
            Array3::zeros((6, 6, 6)),
            &phantom::shifted_affine(1.0, [0.5, 0.0, 0.0]),
        );
        let err = LabelFuser.fuse(&a, &shifted).unwrap_err();
        assert!(matches!(err, EstimateError::GridMismatch { .. }));

        let other_shape = MaskVolume::from_array(Array3::zeros((6, 6, 5)), &phantom::shifted_affine(1.0, [0.0; 3]));
        assert!(LabelFuser.fuse(&a, &other_shape).is_err());
    }
}
