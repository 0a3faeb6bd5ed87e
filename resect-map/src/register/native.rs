//! 纯 Rust 仿射配准.
//!
//! 参数化方式为 `p_f = c_f + t + R · Sh · S · (p_m - c_m)`, 其中 `c_f`, `c_m`
//! 分别为 fixed 与 moving 的强度质心, `R` 为欧拉角旋转, `Sh` 为上三角剪切,
//! `S` 为对数尺度缩放. 刚体配准只优化 `t` 与 `R`.
//!
//! 优化器是模式搜索 (compass search): 每轮依次尝试每个参数的 `±step`,
//! 接受任何使代价下降的移动; 一整轮都没有下降时所有步长减半,
//! 直到步长相对初值小于容差. 代价为负的归一化互相关 (NCC),
//! 在 fixed 网格的等间隔子集上以三线性插值采样 moving.

use itertools::iproduct;
use log::{debug, info};
use nalgebra::{Matrix3, Matrix4, Point3, Rotation3, Translation3, Vector3};

use super::resample::{voxel_map, Interpolation};
use super::Registrar;
use crate::error::{EstimateError, EstimateResult};
use crate::{AffineTransform, ScanVolume, VolumeGeometry};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::prelude::*;
    }
}

/// 一次移动被接受所需的最小代价下降.
const MIN_IMPROVEMENT: f64 = 1e-12;

/// 各参数的初始步长: 平移 (毫米), 旋转 (弧度), 对数缩放, 剪切.
const INITIAL_STEPS: [f64; 12] = [
    4.0, 4.0, 4.0, 0.1, 0.1, 0.1, 0.05, 0.05, 0.05, 0.05, 0.05, 0.05,
];

/// 自由度.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Dof {
    /// 平移 + 旋转, 6 个参数.
    Rigid,

    /// 平移 + 旋转 + 缩放 + 剪切, 12 个参数.
    #[default]
    Affine,
}

impl Dof {
    /// 参与优化的参数个数.
    #[inline]
    pub const fn count(&self) -> usize {
        match self {
            Dof::Rigid => 6,
            Dof::Affine => 12,
        }
    }
}

/// 配准参数.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegistrationConfig {
    /// 自由度.
    pub dof: Dof,

    /// 在 fixed 网格上每隔多少个体素取一个样本.
    pub sample_stride: usize,

    /// 最多进行多少轮搜索.
    pub max_iterations: usize,

    /// 所有步长都缩小到初值的该比例以下时视为收敛.
    pub tolerance: f64,

    /// 样本中落在 moving 网格内的比例下限. 低于它的位姿视为无效.
    pub min_overlap: f64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            dof: Dof::default(),
            sample_stride: 2,
            max_iterations: 500,
            tolerance: 1e-3,
            min_overlap: 0.1,
        }
    }
}

/// 纯 Rust 配准后端.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NativeRegistrar {
    /// 配准参数.
    pub config: RegistrationConfig,
}

impl NativeRegistrar {
    /// 以给定参数创建.
    #[inline]
    pub const fn new(config: RegistrationConfig) -> Self {
        Self { config }
    }
}

impl Registrar for NativeRegistrar {
    fn compute_transform(
        &self,
        fixed: &ScanVolume,
        moving: &ScanVolume,
    ) -> EstimateResult<AffineTransform> {
        let problem = Problem::new(fixed, moving, &self.config)?;
        let params = problem.optimize()?;
        problem.transform(&params)
    }
}

/// 强度加权质心 (物理坐标). 只统计正值体素.
fn center_of_mass(volume: &ScanVolume) -> Option<Point3<f64>> {
    let affine = volume.affine();
    let (mut mass, mut sum) = (0.0f64, Vector3::zeros());
    for ((z, h, w), v) in volume.data().indexed_iter() {
        let v = *v as f64;
        if v > 0.0 && v.is_finite() {
            mass += v;
            sum += Vector3::new(w as f64, h as f64, z as f64) * v;
        }
    }
    (mass > 0.0).then(|| affine.transform_point(&Point3::from(sum / mass)))
}

/// NCC 所需的一阶与二阶矩.
#[derive(Copy, Clone, Debug, Default)]
struct Moments {
    n: usize,
    f: f64,
    m: f64,
    ff: f64,
    mm: f64,
    fm: f64,
}

impl Moments {
    #[inline]
    fn push(mut self, (f, m): (f64, f64)) -> Self {
        self.n += 1;
        self.f += f;
        self.m += m;
        self.ff += f * f;
        self.mm += m * m;
        self.fm += f * m;
        self
    }

    #[inline]
    fn merge(self, o: Self) -> Self {
        Self {
            n: self.n + o.n,
            f: self.f + o.f,
            m: self.m + o.m,
            ff: self.ff + o.ff,
            mm: self.mm + o.mm,
            fm: self.fm + o.fm,
        }
    }

    /// 归一化互相关. 任一方方差为 0 时无定义.
    fn ncc(&self) -> Option<f64> {
        if self.n < 2 {
            return None;
        }
        let n = self.n as f64;
        let cov = self.fm - self.f * self.m / n;
        let var_f = self.ff - self.f * self.f / n;
        let var_m = self.mm - self.m * self.m / n;
        let denom = (var_f * var_m).sqrt();
        (denom > f64::EPSILON && denom.is_finite()).then(|| cov / denom)
    }
}

/// 汇总所有落在 moving 网格内的样本对.
#[cfg(feature = "rayon")]
fn accumulate<F>(samples: &[(Point3<f64>, f64)], pair: F) -> Moments
where
    F: Fn(&(Point3<f64>, f64)) -> Option<(f64, f64)> + Sync + Send,
{
    samples
        .par_iter()
        .filter_map(pair)
        .fold(Moments::default, Moments::push)
        .reduce(Moments::default, Moments::merge)
}

/// 汇总所有落在 moving 网格内的样本对.
#[cfg(not(feature = "rayon"))]
fn accumulate<F>(samples: &[(Point3<f64>, f64)], pair: F) -> Moments
where
    F: Fn(&(Point3<f64>, f64)) -> Option<(f64, f64)>,
{
    samples
        .iter()
        .filter_map(pair)
        .fold(Moments::default(), Moments::push)
}

/// 一次配准的全部不变量.
struct Problem<'a> {
    moving: &'a ScanVolume,
    config: &'a RegistrationConfig,
    fixed_affine: Matrix4<f64>,
    /// fixed 上的样本: 体素索引 `(i, j, k)` 与强度.
    samples: Vec<(Point3<f64>, f64)>,
    c_fixed: Point3<f64>,
    c_moving: Point3<f64>,
}

impl<'a> Problem<'a> {
    fn new(
        fixed: &ScanVolume,
        moving: &'a ScanVolume,
        config: &'a RegistrationConfig,
    ) -> EstimateResult<Self> {
        let fail = |msg: &str| EstimateError::RegistrationFailure(msg.to_owned());
        if fixed.size() == 0 || moving.size() == 0 {
            return Err(fail("empty volume"));
        }
        let c_fixed = center_of_mass(fixed).ok_or_else(|| fail("fixed volume has no signal"))?;
        let c_moving = center_of_mass(moving).ok_or_else(|| fail("moving volume has no signal"))?;

        let stride = config.sample_stride.max(1);
        let (z, h, w) = fixed.shape();
        let data = fixed.data();
        let samples = iproduct!((0..z).step_by(stride), (0..h).step_by(stride), (0..w).step_by(stride))
            .map(|(zi, hi, wi)| {
                let v = Point3::new(wi as f64, hi as f64, zi as f64);
                (v, data[(zi, hi, wi)] as f64)
            })
            .collect();

        Ok(Self {
            moving,
            config,
            fixed_affine: fixed.affine(),
            samples,
            c_fixed,
            c_moving,
        })
    }

    /// 参数 -> moving -> fixed 变换矩阵.
    fn matrix(&self, p: &[f64; 12]) -> Matrix4<f64> {
        let rotation = Rotation3::from_euler_angles(p[3], p[4], p[5]);
        let scale = Matrix3::from_diagonal(&Vector3::new(p[6].exp(), p[7].exp(), p[8].exp()));
        #[rustfmt::skip]
        let shear = Matrix3::new(
            1.0, p[9], p[10],
            0.0, 1.0, p[11],
            0.0, 0.0, 1.0,
        );
        let linear = rotation.matrix() * shear * scale;

        let to_origin = Translation3::from(-self.c_moving.coords).to_homogeneous();
        let back = Translation3::from(self.c_fixed.coords + Vector3::new(p[0], p[1], p[2]))
            .to_homogeneous();
        back * linear.to_homogeneous() * to_origin
    }

    fn transform(&self, p: &[f64; 12]) -> EstimateResult<AffineTransform> {
        AffineTransform::from_matrix(self.matrix(p))
            .map_err(|e| EstimateError::RegistrationFailure(e.to_string()))
    }

    /// 代价 (负 NCC). 位姿无效 (重叠不足, NCC 无定义, 变换奇异) 时返回 `None`.
    fn cost(&self, p: &[f64; 12]) -> Option<f64> {
        let t = self.transform(p).ok()?;
        let map = voxel_map(&t, &self.moving.affine(), &self.fixed_affine).ok()?;
        let src = self.moving.data();
        let pair = |(v, f): &(Point3<f64>, f64)| {
            let u = map.transform_point(v);
            Interpolation::Trilinear
                .sample(&src, [u.z, u.y, u.x])
                .map(|m| (*f, m as f64))
        };

        let moments = accumulate(&self.samples, pair);

        let overlap = moments.n as f64 / self.samples.len() as f64;
        if overlap < self.config.min_overlap {
            return None;
        }
        moments.ncc().map(|ncc| -ncc)
    }

    /// 模式搜索. 返回最优参数.
    fn optimize(&self) -> EstimateResult<[f64; 12]> {
        let dof = self.config.dof.count();
        let mut params = [0.0f64; 12];
        let mut steps = INITIAL_STEPS;
        let mut best = self.cost(&params).ok_or_else(|| {
            EstimateError::RegistrationFailure(
                "initial similarity is undefined (insufficient overlap or flat volume)".into(),
            )
        })?;
        debug!("initial NCC {:.6}", -best);

        for iteration in 0..self.config.max_iterations {
            let mut improved = false;
            for i in 0..dof {
                for sign in [1.0, -1.0] {
                    let mut trial = params;
                    trial[i] += sign * steps[i];
                    if let Some(c) = self.cost(&trial) {
                        if c < best - MIN_IMPROVEMENT {
                            (params, best) = (trial, c);
                            improved = true;
                            break;
                        }
                    }
                }
            }

            if !improved {
                steps.iter_mut().for_each(|s| *s *= 0.5);
                let ratio = steps[0] / INITIAL_STEPS[0];
                debug!("iteration {iteration}: NCC {:.6}, step ratio {ratio:.2e}", -best);
                if ratio < self.config.tolerance {
                    info!(
                        "registration converged after {} iterations, NCC {:.6}",
                        iteration + 1,
                        -best
                    );
                    return Ok(params);
                }
            }
        }
        Err(EstimateError::RegistrationFailure(format!(
            "no convergence within {} iterations",
            self.config.max_iterations
        )))
    }
}
