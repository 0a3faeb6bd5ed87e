//! 体素 -> 物理坐标仿射矩阵, 以及 moving -> fixed 仿射变换的持久化.

use std::fs;
use std::path::Path;

use nalgebra::{Matrix3, Matrix4, Point3, Vector3};
use nifti::NiftiHeader;

use crate::error::{EstimateError, EstimateResult};

/// 从 header 中获取体素索引 `(i, j, k)` 到物理坐标 (毫米) 的仿射矩阵.
///
/// 优先使用 sform (`sform_code > 0`), 其次 qform (`qform_code > 0`),
/// 都不存在时退化为仅由 `pixdim` 决定的对角矩阵.
pub fn affine_from_header(h: &NiftiHeader) -> Matrix4<f64> {
    if h.sform_code > 0 {
        let (x, y, z) = (&h.srow_x, &h.srow_y, &h.srow_z);
        #[rustfmt::skip]
        let m = Matrix4::new(
            x[0] as f64, x[1] as f64, x[2] as f64, x[3] as f64,
            y[0] as f64, y[1] as f64, y[2] as f64, y[3] as f64,
            z[0] as f64, z[1] as f64, z[2] as f64, z[3] as f64,
            0.0, 0.0, 0.0, 1.0,
        );
        m
    } else if h.qform_code > 0 {
        qform_affine(h)
    } else {
        let [_, dx, dy, dz, ..] = h.pixdim;
        Matrix4::new_nonuniform_scaling(&Vector3::new(
            positive_or_one(dx),
            positive_or_one(dy),
            positive_or_one(dz),
        ))
    }
}

#[inline]
fn positive_or_one(v: f32) -> f64 {
    if v > 0.0 {
        v as f64
    } else {
        1.0
    }
}

/// 按 NIfTI-1 标准由四元数计算 qform 仿射矩阵.
fn qform_affine(h: &NiftiHeader) -> Matrix4<f64> {
    let (mut b, mut c, mut d) = (h.quatern_b as f64, h.quatern_c as f64, h.quatern_d as f64);
    let mut a = 1.0 - (b * b + c * c + d * d);
    if a < 1e-7 {
        // 非单位四元数, 归一化后视为 180 度旋转.
        let n = 1.0 / (b * b + c * c + d * d).sqrt();
        (b, c, d) = (b * n, c * n, d * n);
        a = 0.0;
    } else {
        a = a.sqrt();
    }

    let [qfac, dx, dy, dz, ..] = h.pixdim;
    let (dx, dy) = (positive_or_one(dx), positive_or_one(dy));
    let dz = positive_or_one(dz) * if qfac < 0.0 { -1.0 } else { 1.0 };

    #[rustfmt::skip]
    let r = Matrix3::new(
        a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c),
        2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b),
        2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - c * c - b * b,
    );
    let linear = r * Matrix3::from_diagonal(&Vector3::new(dx, dy, dz));

    let mut m = linear.to_homogeneous();
    // nifti crate 将 qoffset_{x,y,z} 命名为 quatern_{x,y,z}.
    m[(0, 3)] = h.quatern_x as f64;
    m[(1, 3)] = h.quatern_y as f64;
    m[(2, 3)] = h.quatern_z as f64;
    m
}

/// 将仿射矩阵写入 header 的 sform 与 `pixdim`, 并设置 `sform_code = 1` (scanner anat).
pub fn set_header_affine(h: &mut NiftiHeader, affine: &Matrix4<f64>) {
    for c in 0..4 {
        h.srow_x[c] = affine[(0, c)] as f32;
        h.srow_y[c] = affine[(1, c)] as f32;
        h.srow_z[c] = affine[(2, c)] as f32;
    }
    let spacing = voxel_spacing(affine);
    for (axis, s) in spacing.iter().enumerate() {
        h.pixdim[axis + 1] = *s as f32;
    }
    h.sform_code = 1;
}

/// 体素在 `(i, j, k)` 三个索引方向上的物理间距 (仿射矩阵线性部分的列范数).
pub fn voxel_spacing(affine: &Matrix4<f64>) -> [f64; 3] {
    let linear = affine.fixed_view::<3, 3>(0, 0);
    [
        linear.column(0).norm(),
        linear.column(1).norm(),
        linear.column(2).norm(),
    ]
}

/// 将物理坐标 `p` 通过仿射矩阵 `m` 变换.
#[inline]
pub fn transform_point(m: &Matrix4<f64>, p: &Point3<f64>) -> Point3<f64> {
    m.transform_point(p)
}

/// moving 空间物理坐标到 fixed 空间物理坐标的仿射变换 (RAS, 毫米).
///
/// 每个受试者只计算一次, 并持久化为文本文件以供复用.
/// 文本格式为一行 `#` 注释加 12 个数 (3x4 矩阵按行展开), 与 AFNI 的
/// `aff12.1D` 布局相同, 但方向与坐标系约定以本结构为准.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AffineTransform {
    matrix: Matrix4<f64>,
}

impl AffineTransform {
    /// 恒等变换. 仅用于构造测试数据与优化初值, 从不用来替代失败的配准.
    #[inline]
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    /// 由 4x4 齐次矩阵构造. 最后一行必须为 `[0, 0, 0, 1]`, 线性部分必须可逆.
    pub fn from_matrix(matrix: Matrix4<f64>) -> EstimateResult<Self> {
        let last = matrix.row(3);
        if last[0] != 0.0 || last[1] != 0.0 || last[2] != 0.0 || last[3] != 1.0 {
            return Err(EstimateError::Geometry(format!(
                "affine transform has a non-homogeneous last row: {last}"
            )));
        }
        if !matrix.iter().all(|v| v.is_finite()) {
            return Err(EstimateError::Geometry(
                "affine transform contains non-finite values".into(),
            ));
        }
        if matrix.fixed_view::<3, 3>(0, 0).determinant().abs() < 1e-12 {
            return Err(EstimateError::Geometry(
                "affine transform is singular".into(),
            ));
        }
        Ok(Self { matrix })
    }

    /// 由按行展开的 3x4 矩阵构造.
    pub fn from_rows(v: &[f64; 12]) -> EstimateResult<Self> {
        #[rustfmt::skip]
        let m = Matrix4::new(
            v[0], v[1], v[2], v[3],
            v[4], v[5], v[6], v[7],
            v[8], v[9], v[10], v[11],
            0.0, 0.0, 0.0, 1.0,
        );
        Self::from_matrix(m)
    }

    /// 按行展开的 3x4 矩阵.
    pub fn rows(&self) -> [f64; 12] {
        let mut ans = [0.0; 12];
        for r in 0..3 {
            for c in 0..4 {
                ans[r * 4 + c] = self.matrix[(r, c)];
            }
        }
        ans
    }

    /// 4x4 齐次矩阵.
    #[inline]
    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.matrix
    }

    /// 逆变换 (fixed -> moving).
    pub fn inverse(&self) -> EstimateResult<Self> {
        let inv = self
            .matrix
            .try_inverse()
            .ok_or_else(|| EstimateError::Geometry("affine transform is singular".into()))?;
        Ok(Self { matrix: inv })
    }

    /// 将 moving 空间物理坐标映射到 fixed 空间.
    #[inline]
    pub fn apply(&self, p: &Point3<f64>) -> Point3<f64> {
        transform_point(&self.matrix, p)
    }

    /// 与恒等变换逐元素比较的最大绝对差.
    pub fn distance_to_identity(&self) -> f64 {
        (self.matrix - Matrix4::identity()).amax()
    }

    /// 解析 `aff12.1D` 风格文本: 忽略 `#` 开头的行, 读取前 12 个数.
    pub fn parse(text: &str) -> Option<Self> {
        let values: Vec<f64> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.starts_with('#'))
            .flat_map(str::split_whitespace)
            .map(str::parse::<f64>)
            .take(12)
            .collect::<Result<_, _>>()
            .ok()?;
        let rows: [f64; 12] = values.try_into().ok()?;
        Self::from_rows(&rows).ok()
    }

    /// 从文件读取. 文件不存在时返回 `MissingData`, 内容残缺时返回 `PartialArtifact`.
    pub fn load<P: AsRef<Path>>(path: P) -> EstimateResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(EstimateError::MissingData(path.to_owned()));
        }
        let text = fs::read_to_string(path)?;
        Self::parse(&text).ok_or_else(|| EstimateError::PartialArtifact(path.to_owned()))
    }

    /// 序列化为文本.
    pub fn to_text(&self) -> String {
        let numbers: Vec<String> = self.rows().iter().map(f64::to_string).collect();
        format!(
            "# 3x4 affine, moving -> fixed physical coordinates (RAS, mm)\n{}\n",
            numbers.join(" ")
        )
    }

    /// 写入文件.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> EstimateResult<()> {
        fs::write(path, self.to_text())?;
        Ok(())
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}
