//! 仿射配准: 计算 moving -> fixed 的仿射变换, 并将其施加到与 moving 同空间的体数据上.
//!
//! 配准能力由 [`Registrar`] 抽象. 目前提供两个后端:
//!
//! 1. [`NativeRegistrar`]: 纯 Rust 实现, 质心初始化加模式搜索.
//! 2. [`AllineateRegistrar`]: 调用 AFNI `3dAllineate`.

use crate::error::EstimateResult;
use crate::{AffineTransform, ScanVolume, VolumeGeometry};

mod afni;
mod native;
mod resample;

pub use afni::AllineateRegistrar;
pub use native::{Dof, NativeRegistrar, RegistrationConfig};
pub use resample::{resample, Interpolation};

/// 表明一个可以做三维仿射配准的对象.
pub trait Registrar {
    /// 将 `moving` 配准到 `fixed`, 返回 moving -> fixed 物理坐标变换.
    ///
    /// # 错误
    ///
    /// 优化不收敛或输入几何不兼容时返回 `RegistrationFailure`. 实现不得用恒等变换代替失败.
    fn compute_transform(
        &self,
        fixed: &ScanVolume,
        moving: &ScanVolume,
    ) -> EstimateResult<AffineTransform>;

    /// 将与 moving 同空间的 `volume` 重采样到 `fixed` 的网格上.
    /// 掩膜必须使用 [`Interpolation::NearestNeighbour`].
    fn apply_transform<G: VolumeGeometry>(
        &self,
        transform: &AffineTransform,
        volume: &ScanVolume,
        fixed: &G,
        interp: Interpolation,
    ) -> EstimateResult<ScanVolume> {
        resample(transform, volume, fixed, interp)
    }
}

impl<R: Registrar + ?Sized> Registrar for &R {
    #[inline]
    fn compute_transform(
        &self,
        fixed: &ScanVolume,
        moving: &ScanVolume,
    ) -> EstimateResult<AffineTransform> {
        (**self).compute_transform(fixed, moving)
    }
}
