//! 重采样后切除区掩膜的清理: 阈值化与三维填洞.

use log::debug;

use crate::consts::DEFAULT_THRESHOLD_EPSILON;
use crate::{MaskVolume, ScanVolume};

/// 表明一个可以将标量体二值化的对象.
pub trait Thresholder {
    /// 将 `volume` 二值化. 值严格大于阈值的体素为前景, 其余为背景.
    fn threshold(&self, volume: &ScanVolume) -> MaskVolume;
}

/// 表明一个可以填充二值掩膜中拓扑空洞的对象.
pub trait HoleFiller {
    /// 原地填洞, 返回被填充的体素个数.
    fn fill_holes(&self, mask: &mut MaskVolume) -> usize;
}

/// 默认的掩膜清理器.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MaskCleaner {
    /// 阈值. 体素值严格大于它才被视为前景.
    pub epsilon: f32,
}

impl Default for MaskCleaner {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_EPSILON)
    }
}

impl MaskCleaner {
    /// 以阈值 `epsilon` 创建.
    #[inline]
    pub const fn new(epsilon: f32) -> Self {
        Self { epsilon }
    }

    /// 依次阈值化与填洞. 重采样输出在融合之前必须经过这两步.
    pub fn clean(&self, volume: &ScanVolume) -> MaskVolume {
        let mut mask = Thresholder::threshold(self, volume);
        let filled = HoleFiller::fill_holes(self, &mut mask);
        debug!(
            "mask cleaned: {} foreground voxels, {filled} filled",
            mask.foreground_count()
        );
        mask
    }
}

impl Thresholder for MaskCleaner {
    #[inline]
    fn threshold(&self, volume: &ScanVolume) -> MaskVolume {
        threshold_volume(volume, self.epsilon)
    }
}

#[cfg(feature = "rayon")]
#[inline]
fn threshold_volume(volume: &ScanVolume, epsilon: f32) -> MaskVolume {
    volume.par_threshold(epsilon)
}

#[cfg(not(feature = "rayon"))]
#[inline]
fn threshold_volume(volume: &ScanVolume, epsilon: f32) -> MaskVolume {
    volume.threshold(epsilon)
}

impl HoleFiller for MaskCleaner {
    #[inline]
    fn fill_holes(&self, mask: &mut MaskVolume) -> usize {
        mask.fill_holes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::label;
    use crate::phantom;
    use crate::VolumeGeometry;
    use ndarray::Array3;

    /// 插值得到的空心壳: 壳体值高于阈值, 内部接近 0, 清理后应为实心.
    #[test]
    fn test_clean_hollow_shell() {
        let shell = phantom::cube((8, 8, 8), (1, 1, 1), 6);
        let mut data = shell.mapv(|p| if p == label::FOREGROUND { 0.8f32 } else { 0.0 });
        data.slice_mut(ndarray::s![2..6, 2..6, 2..6]).fill(0.05);
        // 壳外的插值拖尾不应被计入.
        data[(0, 0, 0)] = 0.1;

        let scan = ScanVolume::from_array(data, &phantom::shifted_affine(1.0, [0.0; 3]));
        let mask = MaskCleaner::default().clean(&scan);
        assert_eq!(mask.foreground_count(), 6 * 6 * 6);
        assert!(mask.grid().same_as(&scan.grid()));
        assert_eq!(mask.count(label::FOREGROUND) + mask.count(label::BACKGROUND), 512);
    }

    #[test]
    fn test_threshold_custom_epsilon() {
        let data = Array3::from_shape_vec((1, 2, 2), vec![0.2f32, 0.5, 0.7, 1.0]).unwrap();
        let scan = ScanVolume::from_array(data, &phantom::shifted_affine(1.0, [0.0; 3]));
        let mask = Thresholder::threshold(&MaskCleaner::new(0.5), &scan);
        assert_eq!(mask.positions_of(label::FOREGROUND), vec![(0, 1, 0), (0, 1, 1)]);
    }
}
