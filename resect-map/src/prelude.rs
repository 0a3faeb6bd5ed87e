//! 🧠欢迎光临⚡
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx3d;

pub use crate::data::{AffineTransform, Grid, MaskVolume, MirrorCorrection, ScanVolume, VolumeGeometry};

pub use crate::consts::label::{BACKGROUND, BOTH, ELECTRODE, FOREGROUND, RESECTION};
pub use crate::consts::{files, DEFAULT_SPHERE_RADIUS_MM, DEFAULT_THRESHOLD_EPSILON};

pub use crate::error::{EstimateError, EstimateResult, Stage};

pub use crate::electrode::{ElectrodeRecord, PointSet};
pub use crate::raster::PointRasterizer;
pub use crate::register::{AllineateRegistrar, Dof, Interpolation, NativeRegistrar, Registrar, RegistrationConfig};
pub use crate::clean::{HoleFiller, MaskCleaner, Thresholder};
pub use crate::fuse::LabelFuser;

pub use crate::cache::{Artifact, ArtifactCache, CacheOutcome};
pub use crate::config::PipelineConfig;
pub use crate::pipeline::{Pipeline, SubjectPaths};
