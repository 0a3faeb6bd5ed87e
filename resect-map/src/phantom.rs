//! 测试用合成体数据.

use nalgebra::{Matrix4, Vector3};
use ndarray::Array3;

use crate::consts::label;
use crate::Idx3d;

/// 各向同性间距 `spacing`, 原点平移 `[tx, ty, tz]` 的仿射矩阵.
pub fn shifted_affine(spacing: f64, [tx, ty, tz]: [f64; 3]) -> Matrix4<f64> {
    let mut m = Matrix4::new_scaling(spacing);
    m[(3, 3)] = 1.0;
    m.append_translation_mut(&Vector3::new(tx, ty, tz));
    m
}

/// 在形状为 `shape` 的空网格中放置一个边长为 `side`, 起点为 `origin` 的前景立方体.
pub fn cube(shape: Idx3d, (z0, h0, w0): Idx3d, side: usize) -> Array3<u8> {
    let mut data = Array3::<u8>::zeros(shape);
    data.slice_mut(ndarray::s![z0..z0 + side, h0..h0 + side, w0..w0 + side])
        .fill(label::FOREGROUND);
    data
}

/// 两个大小, 亮度都不同的高斯团块. 没有任何对称性, 适合检验配准.
pub fn two_blobs(shape: Idx3d) -> Array3<f32> {
    let (z, h, w) = shape;
    let (z, h, w) = (z as f64, h as f64, w as f64);
    let c1 = [0.4 * z, 0.35 * h, 0.4 * w];
    let c2 = [0.6 * z, 0.65 * h, 0.7 * w];
    let s1 = [0.14 * z, 0.2 * h, 0.12 * w];
    let s2 = [0.1 * z, 0.08 * h, 0.1 * w];

    let gauss = |p: [f64; 3], c: [f64; 3], s: [f64; 3]| -> f64 {
        let d: f64 = (0..3).map(|i| ((p[i] - c[i]) / s[i]).powi(2)).sum();
        (-0.5 * d).exp()
    };

    Array3::from_shape_fn(shape, |(zi, hi, wi)| {
        let p = [zi as f64, hi as f64, wi as f64];
        (100.0 * gauss(p, c1, s1) + 60.0 * gauss(p, c2, s2)) as f32
    })
}
