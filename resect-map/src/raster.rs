//! 坐标栅格化: 将物理坐标点集转为参考网格上的球形二值掩膜.

use itertools::iproduct;
use log::{debug, warn};
use nalgebra::Point3;

use crate::consts::{label, DEFAULT_SPHERE_RADIUS_MM};
use crate::data::affine::transform_point;
use crate::error::{EstimateError, EstimateResult};
use crate::{Idx3d, MaskVolume, MirrorCorrection, PointSet, VolumeGeometry};

/// 判定体素在球内时使用的距离容差 (毫米).
const SPHERE_EPS: f64 = 1e-6;

/// 点集栅格化器.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PointRasterizer {
    /// 每个点的球半径 (毫米).
    pub radius_mm: f64,

    /// 栅格化之后施加的镜像校正.
    pub mirror: MirrorCorrection,
}

impl Default for PointRasterizer {
    fn default() -> Self {
        Self {
            radius_mm: DEFAULT_SPHERE_RADIUS_MM,
            mirror: MirrorCorrection::default(),
        }
    }
}

impl PointRasterizer {
    /// 以给定半径和镜像校正创建.
    #[inline]
    pub const fn new(radius_mm: f64, mirror: MirrorCorrection) -> Self {
        Self { radius_mm, mirror }
    }

    /// 在 `reference` 的网格上栅格化 `points`, 然后施加镜像校正.
    ///
    /// 每个点先取最近体素, 再以该体素中心为球心盖一个半径 `radius_mm` 的实心球,
    /// 多个球取并集. 最近体素落在网格外的点会被跳过.
    ///
    /// # 错误
    ///
    /// - 点集为空时返回 `EmptyInput`.
    /// - 参考体仿射矩阵不可逆时返回 `Geometry`.
    pub fn rasterize<G: VolumeGeometry>(
        &self,
        points: &PointSet,
        reference: &G,
    ) -> EstimateResult<MaskVolume> {
        if points.is_empty() {
            return Err(EstimateError::EmptyInput);
        }
        let mut mask = MaskVolume::empty_like(reference);
        let mut stamped = 0usize;
        for p in points {
            let [z, h, w] = reference.physical_to_voxel(p).ok_or_else(|| {
                EstimateError::Geometry("reference affine is singular".to_owned())
            })?;
            match nearest_voxel([z, h, w], reference.shape()) {
                Some(center) => {
                    self.stamp_sphere(&mut mask, center);
                    stamped += 1;
                }
                None => warn!(
                    "electrode at ({}, {}, {}) lies outside the reference grid, skipped",
                    p.x, p.y, p.z
                ),
            }
        }
        debug!(
            "rasterized {stamped}/{} points, {} foreground voxels",
            points.len(),
            mask.foreground_count()
        );

        self.mirror.apply(&mut mask);
        Ok(mask)
    }

    /// 以体素 `center` 为球心盖一个球.
    fn stamp_sphere(&self, mask: &mut MaskVolume, center: Idx3d) {
        let [di, dj, dk] = mask.pix_dim();
        let r = self.radius_mm;
        // 各轴方向上的体素半径.
        let reach = |d: f64| (r / d).floor() as usize;
        let (rz, rh, rw) = (reach(dk), reach(dj), reach(di));
        let (z, h, w) = mask.shape();
        let (cz, ch, cw) = center;

        let affine = mask.affine();
        let physical = |(z, h, w): Idx3d| {
            transform_point(&affine, &Point3::new(w as f64, h as f64, z as f64))
        };
        let origin = physical(center);
        let within = iproduct!(
            cz.saturating_sub(rz)..(cz + rz + 1).min(z),
            ch.saturating_sub(rh)..(ch + rh + 1).min(h),
            cw.saturating_sub(rw)..(cw + rw + 1).min(w)
        )
        .filter(|pos| (physical(*pos) - origin).norm() <= r + SPHERE_EPS)
        .collect::<Vec<Idx3d>>();

        for pos in within {
            mask[pos] = label::FOREGROUND;
        }
    }
}

/// 连续体素坐标 `[z, h, w]` 的最近体素, 越界时返回 `None`.
fn nearest_voxel(v: [f64; 3], (z, h, w): Idx3d) -> Option<Idx3d> {
    let round = |x: f64, n: usize| {
        let r = x.round();
        (r >= 0.0 && r < n as f64).then_some(r as usize)
    };
    Some((round(v[0], z)?, round(v[1], h)?, round(v[2], w)?))
}
