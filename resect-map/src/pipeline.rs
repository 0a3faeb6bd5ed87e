//! 单个受试者的估计流水线.
//!
//! 流水线是需求驱动的: 每个阶段在计算前才确保自己的依赖就绪, 因此最终产物存在时
//! 整条流水线不会做任何计算 (包括配准). 阶段与产物的对应关系为:
//!
//! | 阶段 | 输入 | 输出 |
//! |---|---|---|
//! | coordinates | `leads.csv`, `element_info.csv` | `resected_coords.txt` |
//! | electrode-mask | 坐标, 参考体 | `resected_elec.nii` |
//! | registration | 参考体, 切除扫描解剖体 | `resection_to_reference.aff12.1D` |
//! | resection-mask | 变换, 原始切除区掩膜, 参考体 | `rsxn_al.nii` |
//! | fusion | 两个掩膜 | `combined_estimates.nii` |

use std::path::{Path, PathBuf};

use log::info;

use crate::cache::{Artifact, ArtifactCache, CacheOutcome};
use crate::clean::{HoleFiller, MaskCleaner, Thresholder};
use crate::config::PipelineConfig;
use crate::consts::files;
use crate::electrode::{self, PointSet};
use crate::error::{EstimateResult, Stage};
use crate::fuse::LabelFuser;
use crate::register::{Interpolation, Registrar};
use crate::{AffineTransform, MaskVolume, ScanVolume};

/// 受试者目录.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubjectPaths {
    /// 存放电极表格的数据目录 (只读).
    pub data_dir: PathBuf,

    /// 工作目录. 输入体数据被放置于此, 所有产物也写在这里.
    pub model_dir: PathBuf,
}

impl SubjectPaths {
    /// 由两个目录创建.
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(data_dir: P, model_dir: Q) -> Self {
        Self {
            data_dir: data_dir.into(),
            model_dir: model_dir.into(),
        }
    }
}

/// 单个受试者的流水线. `R` 为配准后端, `C` 为掩膜清理器.
#[derive(Debug)]
pub struct Pipeline<R: Registrar, C: Thresholder + HoleFiller = MaskCleaner> {
    paths: SubjectPaths,
    cache: ArtifactCache,
    config: PipelineConfig,
    registrar: R,
    cleaner: C,
}

impl<R: Registrar> Pipeline<R> {
    /// 使用由 `config` 决定的默认清理器创建. 工作目录不存在时会被创建.
    pub fn new(paths: SubjectPaths, config: PipelineConfig, registrar: R) -> EstimateResult<Self> {
        let cleaner = config.cleaner();
        Self::with_cleaner(paths, config, registrar, cleaner)
    }
}

impl<R: Registrar, C: Thresholder + HoleFiller> Pipeline<R, C> {
    /// 使用自定义清理器创建.
    pub fn with_cleaner(
        paths: SubjectPaths,
        config: PipelineConfig,
        registrar: R,
        cleaner: C,
    ) -> EstimateResult<Self> {
        let cache = ArtifactCache::new(&paths.model_dir)?;
        Ok(Self {
            paths,
            cache,
            config,
            registrar,
            cleaner,
        })
    }

    /// 受试者目录.
    #[inline]
    pub fn paths(&self) -> &SubjectPaths {
        &self.paths
    }

    /// 参数.
    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 配准后端.
    #[inline]
    pub fn registrar(&self) -> &R {
        &self.registrar
    }

    /// 产物缓存.
    #[inline]
    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// 运行整条流水线, 返回融合标签体路径.
    pub fn run(&self) -> EstimateResult<PathBuf> {
        self.ensure_fused()?;
        let fused = self.cache.path(files::FUSED_LABELS);
        info!(
            "done. Launch a viewer from {} and open {} over {} to inspect the estimates",
            self.paths.model_dir.display(),
            files::FUSED_LABELS,
            files::REFERENCE_ANAT,
        );
        Ok(fused)
    }

    /// 被切除电极坐标文件.
    pub fn ensure_coordinates(&self) -> EstimateResult<CacheOutcome> {
        let data_dir: &Path = &self.paths.data_dir;
        self.cache.ensure(
            Stage::Coordinates,
            &[Artifact::text(files::COORDS)],
            &[],
            |s| {
                electrode::write_coord_file(data_dir, s.path(files::COORDS))?;
                Ok(())
            },
        )
    }

    /// 电极球形掩膜 (已镜像校正).
    pub fn ensure_electrode_mask(&self) -> EstimateResult<CacheOutcome> {
        self.cache.ensure(
            Stage::ElectrodeMask,
            &[Artifact::volume(files::ELECTRODE_MASK)],
            &[],
            |s| {
                self.ensure_coordinates()?;
                let points = PointSet::load(s.input(files::COORDS))?;
                let reference = ScanVolume::open(s.input(files::REFERENCE_ANAT))?;
                let mask = self.config.rasterizer().rasterize(&points, &reference)?;
                info!(
                    "{} electrode voxels from {} points",
                    mask.foreground_count(),
                    points.len()
                );
                mask.save(s.path(files::ELECTRODE_MASK))
            },
        )
    }

    /// moving -> fixed 变换. 每个受试者只计算一次.
    pub fn ensure_transform(&self) -> EstimateResult<CacheOutcome> {
        self.cache.ensure(
            Stage::Registration,
            &[Artifact::transform(files::TRANSFORM)],
            &[],
            |s| {
                let fixed = ScanVolume::open(s.input(files::REFERENCE_ANAT))?;
                let moving = ScanVolume::open(s.input(files::RESECTION_ANAT))?;
                let transform = self.registrar.compute_transform(&fixed, &moving)?;
                info!(
                    "registration finished, max deviation from identity {:.4}",
                    transform.distance_to_identity()
                );
                transform.save(s.path(files::TRANSFORM))
            },
        )
    }

    /// 对齐并清理后的切除区掩膜. 完成后删除 moving 空间中的输入.
    pub fn ensure_resection_mask(&self) -> EstimateResult<CacheOutcome> {
        let intermediates: &[&str] = if self.config.purge_intermediates {
            &[files::RESECTION_ANAT, files::RAW_RESECTION_MASK]
        } else {
            &[]
        };
        self.cache.ensure(
            Stage::ResectionMask,
            &[Artifact::volume(files::ALIGNED_RESECTION_MASK)],
            intermediates,
            |s| {
                self.ensure_transform()?;
                let transform = AffineTransform::load(s.input(files::TRANSFORM))?;
                let reference = ScanVolume::open(s.input(files::REFERENCE_ANAT))?;
                let raw = ScanVolume::open(s.input(files::RAW_RESECTION_MASK))?;

                let moved = self.registrar.apply_transform(
                    &transform,
                    &raw,
                    &reference,
                    Interpolation::NearestNeighbour,
                )?;
                let mut mask = self.cleaner.threshold(&moved);
                let filled = self.cleaner.fill_holes(&mut mask);
                info!(
                    "aligned resection mask: {} voxels ({filled} hole voxels filled)",
                    mask.foreground_count()
                );
                mask.save(s.path(files::ALIGNED_RESECTION_MASK))
            },
        )
    }

    /// 最终融合标签体.
    pub fn ensure_fused(&self) -> EstimateResult<CacheOutcome> {
        self.cache.ensure(
            Stage::Fusion,
            &[Artifact::volume(files::FUSED_LABELS)],
            &[],
            |s| {
                self.ensure_resection_mask()?;
                self.ensure_electrode_mask()?;
                let resection = MaskVolume::open(s.input(files::ALIGNED_RESECTION_MASK))?;
                let electrodes = MaskVolume::open(s.input(files::ELECTRODE_MASK))?;
                let fused = LabelFuser.fuse(&resection, &electrodes)?;
                let [_, only_resection, only_electrode, both] = fused.label_statistics();
                info!(
                    "fused labels: {only_resection} resection-only, \
                     {only_electrode} electrode-only, {both} both"
                );
                fused.save(s.path(files::FUSED_LABELS))
            },
        )
    }
}
