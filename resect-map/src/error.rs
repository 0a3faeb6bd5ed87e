//! 运行时错误.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// 流水线阶段. 用于在错误信息和日志中标明出错位置.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Stage {
    /// 从两张表中筛选被切除电极的坐标.
    Coordinates,

    /// 电极坐标栅格化为球形掩膜.
    ElectrodeMask,

    /// 计算 moving -> fixed 仿射变换.
    Registration,

    /// 变换, 阈值化并填洞得到对齐的切除区掩膜.
    ResectionMask,

    /// 融合为最终标签体.
    Fusion,
}

impl Stage {
    /// 阶段名称.
    pub const fn name(&self) -> &'static str {
        match self {
            Stage::Coordinates => "coordinates",
            Stage::ElectrodeMask => "electrode-mask",
            Stage::Registration => "registration",
            Stage::ResectionMask => "resection-mask",
            Stage::Fusion => "fusion",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 估计流水线的全部错误类型.
///
/// 前五种对应流水线的错误分类, 任何一种都会中止当前受试者的处理.
#[derive(Debug, Error)]
pub enum EstimateError {
    /// 必需的输入表或体数据不存在.
    #[error("missing input data: {}", .0.display())]
    MissingData(PathBuf),

    /// 筛选后的电极点集为空, 融合没有意义.
    #[error("no resected electrode coordinates to rasterize")]
    EmptyInput,

    /// 配准优化未收敛, 或输入几何不兼容.
    #[error("registration failed: {0}")]
    RegistrationFailure(String),

    /// 融合前两个掩膜不在同一网格上.
    #[error("grid mismatch: {left} vs {right}")]
    GridMismatch {
        /// 左操作数网格描述.
        left: String,
        /// 右操作数网格描述.
        right: String,
    },

    /// 缓存识别到的产物存在但不完整.
    #[error("incomplete artifact: {}", .0.display())]
    PartialArtifact(PathBuf),

    /// 表格内容无法解析.
    #[error("malformed table {}: {reason}", .path.display())]
    MalformedTable {
        /// 表格路径.
        path: PathBuf,
        /// 具体原因.
        reason: String,
    },

    /// 体数据几何信息非法 (维度, 仿射矩阵不可逆等).
    #[error("invalid geometry: {0}")]
    Geometry(String),

    /// 底层 I/O 错误.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// nifti 读写错误.
    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::NiftiError),

    /// csv 解析错误.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// 某个阶段失败.
    #[error("stage `{stage}` failed: {source}")]
    Stage {
        /// 出错阶段.
        stage: Stage,
        /// 原始错误.
        #[source]
        source: Box<EstimateError>,
    },
}

impl EstimateError {
    /// 将错误标记为发生在 `stage`. 已经带有阶段信息的错误保持不变,
    /// 所以嵌套阶段只会报告最内层的出错阶段.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            e @ EstimateError::Stage { .. } => e,
            e => EstimateError::Stage {
                stage,
                source: Box::new(e),
            },
        }
    }

    /// 去掉阶段包装, 返回原始错误.
    pub fn root(&self) -> &EstimateError {
        match self {
            EstimateError::Stage { source, .. } => source.root(),
            e => e,
        }
    }

    /// 出错阶段. 未标记时返回 `None`.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            EstimateError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// 流水线运行时结果.
pub type EstimateResult<T> = Result<T, EstimateError>;

#[cfg(test)]
mod tests {
    use super::{EstimateError, Stage};

    #[test]
    fn test_stage_wraps_once() {
        let e = EstimateError::EmptyInput
            .in_stage(Stage::ElectrodeMask)
            .in_stage(Stage::Fusion);
        assert_eq!(e.stage(), Some(Stage::ElectrodeMask));
        assert!(matches!(e.root(), EstimateError::EmptyInput));
        assert_eq!(
            e.to_string(),
            "stage `electrode-mask` failed: no resected electrode coordinates to rasterize"
        );
    }
}
