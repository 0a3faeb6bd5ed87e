//! 左右 (矢状) 镜像校正.
//!
//! 电极坐标采集时使用的左右约定与参考解剖体网格相反,
//! 因此栅格化得到的电极掩膜必须沿左右轴翻转一次才能与解剖体对齐.
//! 这是数据来源的约定问题而不是普遍的几何规律, 所以保留为一个独立的,
//! 可关闭的步骤.

use ndarray::Axis;

use super::{MaskVolume, VolumeGeometry};

/// 电极掩膜的左右镜像校正.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MirrorCorrection {
    /// 沿左右轴翻转体素.
    #[default]
    LeftRight,

    /// 不做任何翻转. 仅在确认坐标来源与参考体同手性时使用.
    Disabled,
}

impl MirrorCorrection {
    /// 对 `mask` 原地施加校正. 仿射矩阵保持不变, 只翻转体素数据.
    pub fn apply(&self, mask: &mut MaskVolume) {
        match self {
            MirrorCorrection::LeftRight => {
                let axis = left_right_axis(&*mask);
                mask.data.invert_axis(axis);
                // invert_axis 只改变步长, 重新整理为标准布局.
                if !mask.data.is_standard_layout() {
                    mask.data = mask.data.as_standard_layout().into_owned();
                }
            }
            MirrorCorrection::Disabled => {}
        }
    }
}

/// 找到左右方向的数组轴: 仿射矩阵中 x 分量绝对值最大的体素方向.
///
/// 返回值是 `(z, h, w)` 布局下的 `Axis`.
pub fn left_right_axis<G: VolumeGeometry>(volume: &G) -> Axis {
    let affine = volume.affine();
    // 体素方向 i, j, k 分别对应数组轴 2, 1, 0.
    let i = (0..3)
        .max_by(|a, b| affine[(0, *a)].abs().total_cmp(&affine[(0, *b)].abs()))
        .unwrap_or(0);
    Axis(2 - i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::label;
    use crate::phantom;
    use nalgebra::Matrix4;
    use ndarray::Array3;

    #[test]
    fn test_left_right_flip() {
        let mut data = Array3::<u8>::zeros((3, 4, 5));
        data[(1, 2, 0)] = label::FOREGROUND;
        data[(2, 3, 1)] = label::FOREGROUND;
        let mut mask = MaskVolume::from_array(data, &phantom::shifted_affine(1.0, [0.0; 3]));

        MirrorCorrection::LeftRight.apply(&mut mask);
        assert_eq!(mask.positions_of(label::FOREGROUND), vec![(1, 2, 4), (2, 3, 3)]);
        assert!(mask.data().is_standard_layout());

        // 翻转两次复原.
        MirrorCorrection::LeftRight.apply(&mut mask);
        assert_eq!(mask.positions_of(label::FOREGROUND), vec![(1, 2, 0), (2, 3, 1)]);

        MirrorCorrection::Disabled.apply(&mut mask);
        assert_eq!(mask.positions_of(label::FOREGROUND), vec![(1, 2, 0), (2, 3, 1)]);
    }

    /// 当 x 方向落在体素 k 方向上时, 翻转的是 z 轴.
    #[test]
    fn test_left_right_axis_permuted() {
        #[rustfmt::skip]
        let affine = Matrix4::new(
            0.0, 0.0, 1.0, 0.0,
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );
        let mask = MaskVolume::from_array(Array3::zeros((2, 2, 2)), &affine);
        assert_eq!(left_right_axis(&mask), Axis(0));
        let mask = MaskVolume::from_array(Array3::zeros((2, 2, 2)), &Matrix4::identity());
        assert_eq!(left_right_axis(&mask), Axis(2));
    }
}
