//! 数据根目录的定位.

use std::env;
use std::path::PathBuf;

/// `$HOME/dataset/<it...>`.
pub fn home_dataset_dir_with<I: IntoIterator<Item = &'static str>>(it: I) -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    ans.extend(it);
    Some(ans)
}

/// 若环境变量 `var` 非空则返回其值, 否则返回 `$HOME/dataset/<fallback...>`.
fn dir_from_env_or_home<const N: usize>(var: &str, fallback: [&'static str; N]) -> Option<PathBuf> {
    match env::var(var) {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => home_dataset_dir_with(fallback),
    }
}

/// 获取项目根目录, 每个受试者在其下有 `<subject>/data` 与 `<subject>/model`.
///
/// 1. 若环境变量 `$RSXN_PROJECT_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/projects`.
pub fn project_dir_from_env_or_home() -> Option<PathBuf> {
    dir_from_env_or_home("RSXN_PROJECT_DIR", ["projects"])
}

/// 获取参考解剖体 (FreeSurfer 派生数据) 根目录.
///
/// 1. 若环境变量 `$RSXN_ANAT_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/freesurfer`.
pub fn anat_dir_from_env_or_home() -> Option<PathBuf> {
    dir_from_env_or_home("RSXN_ANAT_DIR", ["freesurfer"])
}

/// 获取切除区掩膜根目录.
///
/// 1. 若环境变量 `$RSXN_RESECTION_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/resection_mask`.
pub fn resection_dir_from_env_or_home() -> Option<PathBuf> {
    dir_from_env_or_home("RSXN_RESECTION_DIR", ["resection_mask"])
}
