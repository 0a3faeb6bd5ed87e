//! 命令行工具的错误.

use resect_map::EstimateError;
use thiserror::Error;

/// 命令行工具的全部错误类型.
#[derive(Debug, Error)]
pub enum ToolError {
    /// 参数错误.
    #[error("usage: estimate <subject>")]
    Usage,

    /// 环境变量取值非法.
    #[error("invalid value `{value}` for ${name}: {reason}")]
    Env {
        /// 变量名.
        name: &'static str,
        /// 取值.
        value: String,
        /// 原因.
        reason: String,
    },

    /// 无法确定 `$HOME`.
    #[error("cannot locate the home directory; set ${0} explicitly")]
    NoHome(&'static str),

    /// 流水线错误.
    #[error(transparent)]
    Estimate(#[from] EstimateError),
}
