#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 将切除区掩膜, 术前参考解剖体与颅内电极坐标带到同一个体素网格,
//! 并融合为一个分类标签体, 用于判断哪些电极触点位于手术切除区内.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 所有体数据均为 NIfTI-1 格式, 内部统一以 `(z, h, w)` 组织 (即体素索引 `(k, j, i)`).
//! 2. 流水线中每个阶段的产物都落盘在受试者工作目录中, 产物存在且完整即视为阶段已完成.
//!   因此重复运行是幂等的, 被中断的运行可以直接继续.
//! 3. 输入数据不合法时返回 [`EstimateError`], 不会用默认值替代.
//!
//! # 开发计划
//!
//! ### NIfTI 读写与体素几何 ✅
//!
//! 仿射矩阵依次取自 sform, qform, pixdim.
//!
//! 实现位于 `resect-map/src/data`.
//!
//! ### 电极坐标筛选 ✅
//!
//! 从通道坐标表和导线切除注释表中筛选被切除触点的物理坐标.
//!
//! 实现位于 `resect-map/src/electrode`.
//!
//! ### 坐标栅格化与左右镜像校正 ✅
//!
//! 每个点在参考网格上盖一个球, 之后沿左右轴翻转.
//!
//! 实现位于 `resect-map/src/raster.rs` 和 `resect-map/src/data/mirror.rs`.
//!
//! ### 仿射配准 ✅
//!
//! 1. 纯 Rust 实现: 质心初始化 + 模式搜索, 以归一化互相关为相似度. ✅
//! 2. 调用 AFNI `3dAllineate` 的后端. ✅
//! 3. 最近邻 / 三线性重采样. ✅
//!
//! 实现位于 `resect-map/src/register`.
//!
//! ### 掩膜清理 ✅
//!
//! 阈值化与三维填洞.
//!
//! 实现位于 `resect-map/src/clean.rs` 和 `resect-map/src/data/morph_3d.rs`.
//!
//! ### 标签融合 ✅
//!
//! `切除区 + 2 * 电极`, 取值 `{0, 1, 2, 3}`.
//!
//! 实现位于 `resect-map/src/fuse.rs`.
//!
//! ### 产物缓存与流水线 ✅
//!
//! 原子写入 (先写 `.partial.*` 再重命名), 完整性检查, 中间文件清理.
//!
//! 实现位于 `resect-map/src/cache.rs` 和 `resect-map/src/pipeline.rs`.
//!
//! ### 非刚性配准 ⌛️
//!
//! 切除后脑组织移位较大时仿射模型不够用.

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

pub mod cache;
pub mod clean;
pub mod config;
pub mod consts;
pub mod data;
pub mod electrode;
pub mod error;
pub mod fuse;
pub mod pipeline;
pub mod prelude;
pub mod raster;
pub mod register;

#[cfg(test)]
mod phantom;

pub use cache::{Artifact, ArtifactCache, ArtifactKind, CacheOutcome};
pub use clean::{HoleFiller, MaskCleaner, Thresholder};
pub use config::PipelineConfig;
pub use data::{AffineTransform, Grid, MaskVolume, MirrorCorrection, ScanVolume, VolumeGeometry};
pub use electrode::{ElectrodeRecord, PointSet};
pub use error::{EstimateError, EstimateResult, Stage};
pub use fuse::LabelFuser;
pub use pipeline::{Pipeline, SubjectPaths};
pub use raster::PointRasterizer;
pub use register::{AllineateRegistrar, Interpolation, NativeRegistrar, Registrar};
