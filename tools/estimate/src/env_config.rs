//! 从环境变量构造流水线参数.
//!
//! | 变量 | 含义 | 取值 |
//! |---|---|---|
//! | `RSXN_SPHERE_RADIUS` | 电极球半径 (毫米) | 正数 |
//! | `RSXN_THRESHOLD` | 切除区掩膜阈值 | 有限数 |
//! | `RSXN_MIRROR` | 电极掩膜左右镜像校正 | `on` / `off` |
//! | `RSXN_KEEP_INTERMEDIATES` | 保留中间文件 | `1` / `0` |
//! | `RSXN_REGISTRAR` | 配准后端 | `native` / `afni` |

use std::env;
use std::str::FromStr;

use resect_map::{MirrorCorrection, PipelineConfig};

use crate::error::ToolError;

/// 配准后端.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Backend {
    /// 纯 Rust 实现.
    #[default]
    Native,

    /// AFNI `3dAllineate`.
    Allineate,
}

/// 从进程环境变量读取.
pub fn from_env() -> Result<(PipelineConfig, Backend), ToolError> {
    from_lookup(|name| env::var(name).ok())
}

/// 从任意键值来源读取. 未设置或为空的变量取默认值.
pub fn from_lookup<F>(lookup: F) -> Result<(PipelineConfig, Backend), ToolError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    let mut config = PipelineConfig::default();

    if let Some(v) = get("RSXN_SPHERE_RADIUS") {
        let r: f64 = parse("RSXN_SPHERE_RADIUS", &v)?;
        if !(r.is_finite() && r > 0.0) {
            return Err(invalid("RSXN_SPHERE_RADIUS", &v, "radius must be positive"));
        }
        config.sphere_radius_mm = r;
    }
    if let Some(v) = get("RSXN_THRESHOLD") {
        let eps: f32 = parse("RSXN_THRESHOLD", &v)?;
        if !eps.is_finite() {
            return Err(invalid("RSXN_THRESHOLD", &v, "threshold must be finite"));
        }
        config.threshold_epsilon = eps;
    }
    if let Some(v) = get("RSXN_MIRROR") {
        config.mirror = if flag("RSXN_MIRROR", &v)? {
            MirrorCorrection::LeftRight
        } else {
            MirrorCorrection::Disabled
        };
    }
    if let Some(v) = get("RSXN_KEEP_INTERMEDIATES") {
        config.purge_intermediates = !flag("RSXN_KEEP_INTERMEDIATES", &v)?;
    }

    let backend = match get("RSXN_REGISTRAR") {
        None => Backend::default(),
        Some(v) => match v.trim().to_ascii_lowercase().as_str() {
            "native" => Backend::Native,
            "afni" | "3dallineate" => Backend::Allineate,
            _ => return Err(invalid("RSXN_REGISTRAR", &v, "expected `native` or `afni`")),
        },
    };
    Ok((config, backend))
}

fn invalid(name: &'static str, value: &str, reason: &str) -> ToolError {
    ToolError::Env {
        name,
        value: value.to_owned(),
        reason: reason.to_owned(),
    }
}

fn parse<T: FromStr>(name: &'static str, value: &str) -> Result<T, ToolError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(name, value, &e.to_string()))
}

fn flag(name: &'static str, value: &str) -> Result<bool, ToolError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" | "lr" => Ok(true),
        "0" | "off" | "false" | "no" | "none" => Ok(false),
        _ => Err(invalid(name, value, "expected on/off")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let (config, backend) = from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(backend, Backend::Native);
    }

    #[test]
    fn test_overrides() {
        let (config, backend) = from_lookup(lookup(&[
            ("RSXN_SPHERE_RADIUS", "3.5"),
            ("RSXN_THRESHOLD", " 0.25 "),
            ("RSXN_MIRROR", "off"),
            ("RSXN_KEEP_INTERMEDIATES", "yes"),
            ("RSXN_REGISTRAR", "AFNI"),
        ]))
        .unwrap();
        assert_eq!(config.sphere_radius_mm, 3.5);
        assert_eq!(config.threshold_epsilon, 0.25);
        assert_eq!(config.mirror, MirrorCorrection::Disabled);
        assert!(!config.purge_intermediates);
        assert_eq!(backend, Backend::Allineate);
    }

    #[test]
    fn test_invalid_values() {
        for pair in [
            ("RSXN_SPHERE_RADIUS", "-1"),
            ("RSXN_SPHERE_RADIUS", "two"),
            ("RSXN_THRESHOLD", "nan"),
            ("RSXN_MIRROR", "sideways"),
            ("RSXN_REGISTRAR", "ants"),
        ] {
            let err = from_lookup(lookup(&[pair])).unwrap_err();
            assert!(matches!(err, ToolError::Env { name, .. } if name == pair.0), "{pair:?}");
        }
    }
}
