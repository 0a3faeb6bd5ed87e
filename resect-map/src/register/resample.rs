//! 重采样.

use nalgebra::{Matrix4, Point3};
use ndarray::{Array3, ArrayView3, Zip};

use crate::error::{EstimateError, EstimateResult};
use crate::{AffineTransform, Idx3d, ScanVolume, VolumeGeometry};

/// 允许采样点越出网格边界的距离 (体素), 用于吸收浮点误差.
const EDGE_EPS: f64 = 1e-6;

/// 插值方式.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Interpolation {
    /// 最近邻. 不会产生新的取值, 二值掩膜必须使用它.
    NearestNeighbour,

    /// 三线性.
    #[default]
    Trilinear,
}

impl Interpolation {
    /// 在连续体素坐标 `[z, h, w]` 处采样. 坐标落在网格外时返回 `None`.
    pub fn sample(&self, data: &ArrayView3<f32>, p: [f64; 3]) -> Option<f32> {
        match self {
            Interpolation::NearestNeighbour => nearest(data, p),
            Interpolation::Trilinear => trilinear(data, p),
        }
    }
}

fn nearest(data: &ArrayView3<f32>, [z, h, w]: [f64; 3]) -> Option<f32> {
    let (nz, nh, nw) = data.dim();
    let round = |x: f64, n: usize| {
        let r = x.round();
        (r >= 0.0 && r < n as f64).then_some(r as usize)
    };
    Some(data[(round(z, nz)?, round(h, nh)?, round(w, nw)?)])
}

/// 单轴上的插值端点与权重.
#[inline]
fn axis_cell(x: f64, n: usize) -> Option<(usize, usize, f64)> {
    let last = n.checked_sub(1)? as f64;
    if !(x >= -EDGE_EPS && x <= last + EDGE_EPS) {
        return None;
    }
    let x = x.clamp(0.0, last);
    let i0 = x.floor() as usize;
    let i1 = (i0 + 1).min(n - 1);
    Some((i0, i1, x - i0 as f64))
}

fn trilinear(data: &ArrayView3<f32>, [z, h, w]: [f64; 3]) -> Option<f32> {
    let (nz, nh, nw) = data.dim();
    let (z0, z1, fz) = axis_cell(z, nz)?;
    let (h0, h1, fh) = axis_cell(h, nh)?;
    let (w0, w1, fw) = axis_cell(w, nw)?;

    let at = |z, h, w| data[(z, h, w)] as f64;
    let lerp = |a: f64, b: f64, t: f64| a + (b - a) * t;
    let c00 = lerp(at(z0, h0, w0), at(z0, h0, w1), fw);
    let c01 = lerp(at(z0, h1, w0), at(z0, h1, w1), fw);
    let c10 = lerp(at(z1, h0, w0), at(z1, h0, w1), fw);
    let c11 = lerp(at(z1, h1, w0), at(z1, h1, w1), fw);
    let c0 = lerp(c00, c01, fh);
    let c1 = lerp(c10, c11, fh);
    Some(lerp(c0, c1, fz) as f32)
}

/// 目标体素索引 `(i, j, k)` 到源体素连续坐标的复合仿射矩阵.
///
/// `u = A_src^{-1} · T^{-1} · A_dst · v`.
pub(crate) fn voxel_map(
    transform: &AffineTransform,
    src: &Matrix4<f64>,
    dst: &Matrix4<f64>,
) -> EstimateResult<Matrix4<f64>> {
    let src_inv = src
        .try_inverse()
        .ok_or_else(|| EstimateError::Geometry("source affine is singular".into()))?;
    let t_inv = transform.inverse()?;
    Ok(src_inv * t_inv.matrix() * dst)
}

/// 将 moving 空间的 `volume` 按 `transform` 重采样到 `target` 的网格上.
///
/// 输出沿用 `target` 的 header. 对应位置落在 `volume` 网格外的体素取 0.
pub fn resample<G: VolumeGeometry>(
    transform: &AffineTransform,
    volume: &ScanVolume,
    target: &G,
    interp: Interpolation,
) -> EstimateResult<ScanVolume> {
    let map = voxel_map(transform, &volume.affine(), &target.affine())?;
    let src = volume.data();
    let sample = |(z, h, w): Idx3d| {
        let u = map.transform_point(&Point3::new(w as f64, h as f64, z as f64));
        interp.sample(&src, [u.z, u.y, u.x]).unwrap_or(0.0)
    };

    let mut out = Array3::<f32>::zeros(target.shape());
    fill_indexed(&mut out, sample);
    Ok(ScanVolume::with_geometry_of(target, out))
}

/// 按索引逐体素计算 `out`.
#[cfg(feature = "rayon")]
fn fill_indexed<F>(out: &mut Array3<f32>, f: F)
where
    F: Fn(Idx3d) -> f32 + Sync + Send,
{
    Zip::indexed(out).par_for_each(|pos, v| *v = f(pos));
}

/// 按索引逐体素计算 `out`.
#[cfg(not(feature = "rayon"))]
fn fill_indexed<F>(out: &mut Array3<f32>, f: F)
where
    F: Fn(Idx3d) -> f32,
{
    Zip::indexed(out).for_each(|pos, v| *v = f(pos));
}
