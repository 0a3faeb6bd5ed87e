//! 产物缓存: 流水线可重入的基础.
//!
//! 每个阶段声明它的输出产物. 输出都已存在且完整时跳过该阶段; 否则在同目录下的
//! `.partial.<name>` 暂存路径上计算, 校验后原子地重命名为最终文件名,
//! 最后删除该阶段声明的中间文件. 半写的文件永远不会被当作完整产物.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use nifti::NiftiHeader;

use crate::error::{EstimateError, EstimateResult, Stage};
use crate::AffineTransform;

/// 暂存文件名前缀.
const STAGING_PREFIX: &str = ".partial.";

/// 产物类型. 决定完整性检查的方式.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ArtifactKind {
    /// NIfTI 体数据: header 可解析, 且 (非压缩时) 文件长度足以容纳所有体素.
    Volume,

    /// 仿射变换文本: 必须能解析出 12 个数.
    Transform,

    /// 普通文本: 存在即可.
    Text,
}

/// 工作目录中的一个产物.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Artifact {
    /// 文件名.
    pub name: &'static str,

    /// 产物类型.
    pub kind: ArtifactKind,
}

impl Artifact {
    /// 体数据产物.
    #[inline]
    pub const fn volume(name: &'static str) -> Self {
        Self {
            name,
            kind: ArtifactKind::Volume,
        }
    }

    /// 变换产物.
    #[inline]
    pub const fn transform(name: &'static str) -> Self {
        Self {
            name,
            kind: ArtifactKind::Transform,
        }
    }

    /// 文本产物.
    #[inline]
    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            kind: ArtifactKind::Text,
        }
    }

    /// `path` 处的文件是否是一个完整的该类产物?
    pub fn is_complete_at(&self, path: &Path) -> bool {
        if !path.is_file() {
            return false;
        }
        match self.kind {
            ArtifactKind::Volume => volume_complete(path),
            ArtifactKind::Transform => AffineTransform::load(path).is_ok(),
            ArtifactKind::Text => true,
        }
    }
}

/// 体数据完整性检查.
fn volume_complete(path: &Path) -> bool {
    let Ok(header) = NiftiHeader::from_file(path) else {
        return false;
    };
    let gz = path
        .extension()
        .map_or(false, |e| e.eq_ignore_ascii_case("gz"));
    if gz {
        // 压缩文件的长度无法直接对应体素数, 能解析 header 即可.
        return true;
    }
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    meta.len() >= expected_len(&header)
}

/// 单文件 NIfTI 的最小字节数.
fn expected_len(h: &NiftiHeader) -> u64 {
    let ndim = (h.dim[0] as usize).clamp(1, 7);
    let voxels: u64 = h.dim[1..=ndim].iter().map(|d| u64::from(*d)).product();
    let bytes_per_voxel = (h.bitpix.max(8) as u64) / 8;
    h.vox_offset.max(0.0) as u64 + voxels * bytes_per_voxel
}

/// [`ArtifactCache::ensure`] 的结果.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CacheOutcome {
    /// 输出已存在且完整, 未计算.
    Reused,

    /// 重新计算并写入了输出.
    Computed,
}

/// 计算闭包看到的暂存区. 所有输出必须写入 [`Staging::path`] 给出的路径.
#[derive(Debug)]
pub struct Staging<'a> {
    cache: &'a ArtifactCache,
}

impl Staging<'_> {
    /// 文件名 `name` 的暂存路径.
    #[inline]
    pub fn path(&self, name: &str) -> PathBuf {
        self.cache.staging_path(name)
    }

    /// 工作目录中已完成的文件 `name` 的路径 (用于读取依赖).
    #[inline]
    pub fn input(&self, name: &str) -> PathBuf {
        self.cache.path(name)
    }
}

/// 一个受试者工作目录上的产物缓存.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    /// 以工作目录 `root` 创建. 目录不存在时会被创建.
    pub fn new<P: Into<PathBuf>>(root: P) -> EstimateResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// 工作目录.
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 文件名 `name` 的最终路径.
    #[inline]
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// 文件名 `name` 的暂存路径.
    #[inline]
    pub fn staging_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{STAGING_PREFIX}{name}"))
    }

    /// 检查产物状态.
    ///
    /// 不存在时返回 `Ok(false)`, 完整时返回 `Ok(true)`, 存在但不完整时返回 `PartialArtifact`.
    pub fn check(&self, artifact: &Artifact) -> EstimateResult<bool> {
        let path = self.path(artifact.name);
        if !path.exists() {
            Ok(false)
        } else if artifact.is_complete_at(&path) {
            Ok(true)
        } else {
            Err(EstimateError::PartialArtifact(path))
        }
    }

    /// 确保阶段 `stage` 的所有 `outputs` 存在且完整.
    ///
    /// 1. 所有输出都完整时不调用 `compute`.
    /// 2. 否则删除不完整的输出与残留的暂存文件, 调用 `compute` 写入暂存路径,
    ///   逐个校验后重命名为最终文件名.
    /// 3. 输出就位后删除 `intermediates` 中列出的文件.
    ///
    /// `compute` 的错误以及暂存输出校验失败都会被包装为 `Stage` 错误 (只包装一次).
    pub fn ensure<F>(
        &self,
        stage: Stage,
        outputs: &[Artifact],
        intermediates: &[&str],
        compute: F,
    ) -> EstimateResult<CacheOutcome>
    where
        F: FnOnce(&Staging<'_>) -> EstimateResult<()>,
    {
        let mut complete = true;
        for artifact in outputs {
            match self.check(artifact) {
                Ok(true) => {}
                Ok(false) => complete = false,
                Err(e) => {
                    warn!("stage {stage}: {e}, recomputing");
                    fs::remove_file(self.path(artifact.name))?;
                    complete = false;
                }
            }
        }

        if complete {
            info!("stage {stage}: outputs present, skipped");
            self.purge(stage, intermediates)?;
            return Ok(CacheOutcome::Reused);
        }

        info!("stage {stage}: computing");
        self.discard_staged(outputs)?;
        let staging = Staging { cache: self };
        if let Err(e) = compute(&staging) {
            self.discard_staged(outputs)?;
            return Err(e.in_stage(stage));
        }

        for artifact in outputs {
            let staged = self.staging_path(artifact.name);
            if !artifact.is_complete_at(&staged) {
                self.discard_staged(outputs)?;
                return Err(EstimateError::PartialArtifact(staged).in_stage(stage));
            }
        }
        for artifact in outputs {
            fs::rename(self.staging_path(artifact.name), self.path(artifact.name))?;
            debug!("stage {stage}: wrote {}", artifact.name);
        }

        self.purge(stage, intermediates)?;
        Ok(CacheOutcome::Computed)
    }

    /// 删除残留的暂存文件.
    fn discard_staged(&self, outputs: &[Artifact]) -> EstimateResult<()> {
        for artifact in outputs {
            let staged = self.staging_path(artifact.name);
            if staged.exists() {
                fs::remove_file(staged)?;
            }
        }
        Ok(())
    }

    /// 删除中间文件.
    fn purge(&self, stage: Stage, intermediates: &[&str]) -> EstimateResult<()> {
        for name in intermediates {
            let path = self.path(name);
            if path.exists() {
                fs::remove_file(&path)?;
                info!("stage {stage}: removed intermediate {name}");
            }
        }
        Ok(())
    }
}
