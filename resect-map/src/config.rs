//! 流水线参数.

use crate::consts::{DEFAULT_SPHERE_RADIUS_MM, DEFAULT_THRESHOLD_EPSILON};
use crate::register::RegistrationConfig;
use crate::{MaskCleaner, MirrorCorrection, PointRasterizer};

/// 一次估计运行的全部参数. 缺省值即临床流程使用的取值.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineConfig {
    /// 电极球半径 (毫米). 默认 2.
    pub sphere_radius_mm: f64,

    /// 重采样后切除区掩膜的阈值. 默认 0.1.
    pub threshold_epsilon: f32,

    /// 电极掩膜的镜像校正. 默认左右翻转.
    pub mirror: MirrorCorrection,

    /// 阶段完成后是否删除中间文件. 默认删除.
    pub purge_intermediates: bool,

    /// 纯 Rust 配准后端的参数.
    pub registration: RegistrationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sphere_radius_mm: DEFAULT_SPHERE_RADIUS_MM,
            threshold_epsilon: DEFAULT_THRESHOLD_EPSILON,
            mirror: MirrorCorrection::default(),
            purge_intermediates: true,
            registration: RegistrationConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// 由参数构造栅格化器.
    #[inline]
    pub fn rasterizer(&self) -> PointRasterizer {
        PointRasterizer::new(self.sphere_radius_mm, self.mirror)
    }

    /// 由参数构造掩膜清理器.
    #[inline]
    pub fn cleaner(&self) -> MaskCleaner {
        MaskCleaner::new(self.threshold_epsilon)
    }
}
