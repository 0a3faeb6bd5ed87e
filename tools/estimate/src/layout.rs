//! 受试者目录的发现与输入文件的放置.
//!
//! 目录约定:
//!
//! ```text
//! <project>/<subject>/data/{leads.csv, element_info.csv}
//! <project>/<subject>/model/                      (工作目录)
//! <anat>/sub-<subject>_ses-<session>/SUMA/sub-<subject>_ses-<session>_SurfVol.nii
//! <resection>/<subject>/rsxn_msk/{rsxn.msk.nii, prep/t1.nii}
//! <resection>/__alternateMRIs/<subject>/rsxn_msk/...  (备选)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use resect_map::consts::files;
use resect_map::{ArtifactCache, EstimateError, EstimateResult, SubjectPaths};

use crate::error::ToolError;
use crate::loader;

/// 按优先级尝试的扫描会话名.
pub const SESSIONS: [&str; 2] = ["clinical", "altclinical"];

/// 切除区数据的备选子目录.
const ALTERNATE_DIR: &str = "__alternateMRIs";

/// 切除扫描解剖体在 `rsxn_msk` 下的候选位置.
const RESECTION_ANAT_CANDIDATES: [&str; 2] = ["prep/t1.nii", "prep/preop_t1.nii"];

/// 三个数据根目录.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Roots {
    /// 项目目录.
    pub project: PathBuf,
    /// 参考解剖体目录.
    pub anat: PathBuf,
    /// 切除区掩膜目录.
    pub resection: PathBuf,
}

impl Roots {
    /// 由环境变量或 `$HOME/dataset` 确定.
    pub fn from_env_or_home() -> Result<Self, ToolError> {
        Ok(Self {
            project: loader::project_dir_from_env_or_home().ok_or(ToolError::NoHome("RSXN_PROJECT_DIR"))?,
            anat: loader::anat_dir_from_env_or_home().ok_or(ToolError::NoHome("RSXN_ANAT_DIR"))?,
            resection: loader::resection_dir_from_env_or_home()
                .ok_or(ToolError::NoHome("RSXN_RESECTION_DIR"))?,
        })
    }
}

/// 切除扫描的两个输入.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResectionInputs {
    /// moving 空间的切除区掩膜.
    pub mask: PathBuf,
    /// moving 空间的解剖体.
    pub anat: PathBuf,
}

/// 发现得到的受试者布局.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubjectLayout {
    /// 受试者编号.
    pub subject: String,
    /// 命中的扫描会话.
    pub session: &'static str,
    /// 交给流水线的目录.
    pub paths: SubjectPaths,
    /// 参考解剖体源文件.
    pub reference: PathBuf,
    /// 切除扫描源文件. 找不到时为 `None`.
    pub resection: Option<ResectionInputs>,
}

/// 在 `roots` 下发现 `subject` 的全部输入.
///
/// 数据目录及两张表格, 以及参考解剖体必须存在; 切除扫描可以缺失
/// (已对齐的切除区掩膜存在时并不需要它).
pub fn discover(roots: &Roots, subject: &str) -> EstimateResult<SubjectLayout> {
    let base = roots.project.join(subject);
    let data_dir = base.join("data");
    for table in [files::ELECTRODE_TABLE, files::RESECTION_TABLE] {
        let p = data_dir.join(table);
        if !p.is_file() {
            return Err(EstimateError::MissingData(p));
        }
    }

    let (session, reference) = find_reference(&roots.anat, subject)?;
    let resection = find_resection(&roots.resection, subject);
    debug!("subject {subject}: session `{session}`, resection scan {resection:?}");

    Ok(SubjectLayout {
        subject: subject.to_owned(),
        session,
        paths: SubjectPaths::new(data_dir, base.join("model")),
        reference,
        resection,
    })
}

/// 按 [`SESSIONS`] 的顺序寻找 SurfVol.
fn find_reference(anat_root: &Path, subject: &str) -> EstimateResult<(&'static str, PathBuf)> {
    for session in SESSIONS {
        let tag = format!("sub-{subject}_ses-{session}");
        let p = anat_root.join(&tag).join("SUMA").join(format!("{tag}_SurfVol.nii"));
        if p.is_file() {
            return Ok((session, p));
        }
    }
    let tag = format!("sub-{subject}_ses-{}", SESSIONS[0]);
    Err(EstimateError::MissingData(anat_root.join(tag)))
}

/// 先找主目录, 再找备选目录. 掩膜与解剖体需同时存在.
fn find_resection(resection_root: &Path, subject: &str) -> Option<ResectionInputs> {
    [
        resection_root.join(subject),
        resection_root.join(ALTERNATE_DIR).join(subject),
    ]
    .into_iter()
    .map(|d| d.join("rsxn_msk"))
    .find_map(|dir| {
        let mask = dir.join(files::RAW_RESECTION_MASK);
        if !mask.is_file() {
            return None;
        }
        let anat = RESECTION_ANAT_CANDIDATES
            .iter()
            .map(|c| dir.join(c))
            .find(|p| p.is_file())?;
        Some(ResectionInputs { mask, anat })
    })
}

/// 将输入体数据放入工作目录. 已存在的文件不会被覆盖.
///
/// 已对齐的切除区掩膜存在时不再需要切除扫描; 否则切除扫描缺失是错误.
/// 返回实际复制的文件数.
pub fn stage_inputs(layout: &SubjectLayout) -> EstimateResult<usize> {
    let cache = ArtifactCache::new(&layout.paths.model_dir)?;
    let mut copied = 0;

    copied += copy_if_absent(&cache, &layout.reference, files::REFERENCE_ANAT)?;

    if !cache.path(files::ALIGNED_RESECTION_MASK).exists() {
        let inputs = layout.resection.as_ref().ok_or_else(|| {
            EstimateError::MissingData(cache.path(files::RAW_RESECTION_MASK))
        })?;
        copied += copy_if_absent(&cache, &inputs.mask, files::RAW_RESECTION_MASK)?;
        copied += copy_if_absent(&cache, &inputs.anat, files::RESECTION_ANAT)?;
    }

    if copied > 0 {
        info!(
            "subject {}: staged {copied} input file(s) into {}",
            layout.subject,
            cache.root().display()
        );
    } else {
        debug!("subject {}: all inputs already staged", layout.subject);
    }
    Ok(copied)
}

/// 经由暂存路径复制, 保证工作目录中不出现半截文件.
fn copy_if_absent(cache: &ArtifactCache, src: &Path, name: &str) -> EstimateResult<usize> {
    let dst = cache.path(name);
    if dst.exists() {
        return Ok(0);
    }
    let staging = cache.staging_path(name);
    fs::copy(src, &staging)?;
    fs::rename(&staging, &dst)?;
    debug!("{} -> {}", src.display(), dst.display());
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(p: &Path, content: &str) {
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, content).unwrap();
    }

    fn roots(tmp: &TempDir) -> Roots {
        Roots {
            project: tmp.path().join("projects"),
            anat: tmp.path().join("freesurfer"),
            resection: tmp.path().join("resection_mask"),
        }
    }

    fn seed_tables(r: &Roots, subject: &str) {
        let data = r.project.join(subject).join("data");
        touch(&data.join(files::ELECTRODE_TABLE), "chanName,x,y,z\n");
        touch(&data.join(files::RESECTION_TABLE), "tagName,isResected\n");
    }

    fn surf_vol(r: &Roots, subject: &str, session: &str) -> PathBuf {
        let tag = format!("sub-{subject}_ses-{session}");
        r.anat.join(&tag).join("SUMA").join(format!("{tag}_SurfVol.nii"))
    }

    #[test]
    fn test_discover_prefers_primary_locations() {
        let tmp = TempDir::new().unwrap();
        let r = roots(&tmp);
        seed_tables(&r, "NY1");
        touch(&surf_vol(&r, "NY1", "clinical"), "ref");
        touch(&surf_vol(&r, "NY1", "altclinical"), "alt");
        let primary = r.resection.join("NY1/rsxn_msk");
        touch(&primary.join(files::RAW_RESECTION_MASK), "mask");
        touch(&primary.join("prep/preop_t1.nii"), "t1");
        let alt = r.resection.join(ALTERNATE_DIR).join("NY1/rsxn_msk");
        touch(&alt.join(files::RAW_RESECTION_MASK), "mask2");
        touch(&alt.join("prep/t1.nii"), "t1b");

        let layout = discover(&r, "NY1").unwrap();
        assert_eq!(layout.session, "clinical");
        assert_eq!(layout.reference, surf_vol(&r, "NY1", "clinical"));
        assert_eq!(layout.paths.model_dir, r.project.join("NY1/model"));
        let inputs = layout.resection.unwrap();
        assert_eq!(inputs.mask, primary.join(files::RAW_RESECTION_MASK));
        assert_eq!(inputs.anat, primary.join("prep/preop_t1.nii"));
    }

    #[test]
    fn test_discover_falls_back() {
        let tmp = TempDir::new().unwrap();
        let r = roots(&tmp);
        seed_tables(&r, "NY2");
        touch(&surf_vol(&r, "NY2", "altclinical"), "alt");
        // 主目录缺少解剖体, 不算命中.
        touch(&r.resection.join("NY2/rsxn_msk").join(files::RAW_RESECTION_MASK), "m");
        let alt = r.resection.join(ALTERNATE_DIR).join("NY2/rsxn_msk");
        touch(&alt.join(files::RAW_RESECTION_MASK), "m2");
        touch(&alt.join("prep/t1.nii"), "t1");

        let layout = discover(&r, "NY2").unwrap();
        assert_eq!(layout.session, "altclinical");
        assert_eq!(layout.resection.unwrap().anat, alt.join("prep/t1.nii"));
    }

    #[test]
    fn test_discover_missing_inputs() {
        let tmp = TempDir::new().unwrap();
        let r = roots(&tmp);
        let err = discover(&r, "NY3").unwrap_err();
        assert!(matches!(err, EstimateError::MissingData(ref p) if p.ends_with(files::ELECTRODE_TABLE)));

        seed_tables(&r, "NY3");
        let err = discover(&r, "NY3").unwrap_err();
        assert!(matches!(err, EstimateError::MissingData(ref p) if p.ends_with("sub-NY3_ses-clinical")));

        touch(&surf_vol(&r, "NY3", "clinical"), "ref");
        assert_eq!(discover(&r, "NY3").unwrap().resection, None);
    }

    #[test]
    fn test_stage_inputs() {
        let tmp = TempDir::new().unwrap();
        let r = roots(&tmp);
        seed_tables(&r, "NY4");
        touch(&surf_vol(&r, "NY4", "clinical"), "ref");
        let dir = r.resection.join("NY4/rsxn_msk");
        touch(&dir.join(files::RAW_RESECTION_MASK), "mask");
        touch(&dir.join("prep/t1.nii"), "t1");
        let layout = discover(&r, "NY4").unwrap();

        assert_eq!(stage_inputs(&layout).unwrap(), 3);
        let model = &layout.paths.model_dir;
        assert_eq!(fs::read_to_string(model.join(files::REFERENCE_ANAT)).unwrap(), "ref");
        assert_eq!(fs::read_to_string(model.join(files::RESECTION_ANAT)).unwrap(), "t1");
        assert_eq!(stage_inputs(&layout).unwrap(), 0);
    }

    #[test]
    fn test_stage_skips_resection_scan_when_aligned() {
        let tmp = TempDir::new().unwrap();
        let r = roots(&tmp);
        seed_tables(&r, "NY5");
        touch(&surf_vol(&r, "NY5", "clinical"), "ref");
        let layout = discover(&r, "NY5").unwrap();

        let err = stage_inputs(&layout).unwrap_err();
        assert!(matches!(err, EstimateError::MissingData(_)));

        touch(&layout.paths.model_dir.join(files::ALIGNED_RESECTION_MASK), "aligned");
        assert_eq!(stage_inputs(&layout).unwrap(), 0);
        assert!(!layout.paths.model_dir.join(files::RAW_RESECTION_MASK).exists());
    }
}
