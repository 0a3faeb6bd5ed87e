//! 调用 AFNI `3dAllineate` 的配准后端.
//!
//! `3dAllineate -1Dmatrix_save` 写出的 `aff12.1D` 矩阵把 base 的坐标映射到 source 的坐标,
//! 且使用 DICOM (RAI) 约定, 即 x, y 与 RAS 反号. 记 `F = diag(-1, -1, 1, 1)`,
//! 则 moving (source) -> fixed (base) 的 RAS 变换为 `(F · M · F)^{-1}`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info};
use nalgebra::{Matrix4, Vector4};

use super::Registrar;
use crate::error::{EstimateError, EstimateResult};
use crate::{AffineTransform, ScanVolume};

/// 外部程序名.
const PROGRAM: &str = "3dAllineate";

/// AFNI `3dAllineate` 后端.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AllineateRegistrar {
    /// 存放临时输入和输出的目录. 必须已存在.
    pub scratch_dir: PathBuf,

    /// 程序路径. 默认在 `PATH` 中查找 `3dAllineate`.
    pub program: PathBuf,

    /// 附加参数, 例如 `["-cost", "lpa"]`.
    pub extra_args: Vec<String>,
}

impl AllineateRegistrar {
    /// 以临时目录 `scratch_dir` 创建.
    pub fn new<P: Into<PathBuf>>(scratch_dir: P) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            program: PathBuf::from(PROGRAM),
            extra_args: Vec::new(),
        }
    }
}

/// DICOM 与 RAS 之间的坐标翻转.
fn lps_flip() -> Matrix4<f64> {
    Matrix4::from_diagonal(&Vector4::new(-1.0, -1.0, 1.0, 1.0))
}

/// 将 `3dAllineate` 的 base -> source (DICOM) 矩阵转换为 moving -> fixed (RAS) 变换.
pub(crate) fn from_afni_matrix(base_to_source: &AffineTransform) -> EstimateResult<AffineTransform> {
    let f = lps_flip();
    let ras = f * base_to_source.matrix() * f;
    AffineTransform::from_matrix(ras)?.inverse()
}

/// `3dAllineate` 在临时目录中的输入与输出.
struct ScratchFiles {
    base: PathBuf,
    source: PathBuf,
    aligned: PathBuf,
    /// AFNI 会自动补上 `.aff12.1D` 后缀.
    matrix_prefix: PathBuf,
    matrix: PathBuf,
}

impl ScratchFiles {
    fn new(dir: &Path) -> Self {
        Self {
            base: dir.join("allineate_base.nii"),
            source: dir.join("allineate_source.nii"),
            aligned: dir.join("allineate_aligned.nii"),
            matrix_prefix: dir.join("allineate_matrix"),
            matrix: dir.join("allineate_matrix.aff12.1D"),
        }
    }

    /// 删除所有存在的临时文件.
    fn remove_all(&self) -> EstimateResult<()> {
        for tmp in [&self.base, &self.source, &self.aligned, &self.matrix] {
            if tmp.exists() {
                fs::remove_file(tmp)?;
            }
        }
        Ok(())
    }
}

impl AllineateRegistrar {
    fn run(
        &self,
        fixed: &ScanVolume,
        moving: &ScanVolume,
        files: &ScratchFiles,
    ) -> EstimateResult<AffineTransform> {
        let fail = |msg: String| EstimateError::RegistrationFailure(msg);
        fixed.save(&files.base)?;
        moving.save(&files.source)?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("-base")
            .arg(&files.base)
            .arg("-source")
            .arg(&files.source)
            .arg("-prefix")
            .arg(&files.aligned)
            .arg("-1Dmatrix_save")
            .arg(&files.matrix_prefix)
            .arg("-overwrite")
            .args(&self.extra_args);
        info!("running {:?}", cmd);

        let output = cmd
            .output()
            .map_err(|e| fail(format!("cannot run {}: {e}", self.program.display())))?;
        if !output.status.success() {
            return Err(fail(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        debug!("{}", String::from_utf8_lossy(&output.stdout));

        let base_to_source = AffineTransform::load(&files.matrix)
            .map_err(|e| fail(format!("no usable matrix from {}: {e}", self.program.display())))?;
        from_afni_matrix(&base_to_source).map_err(|e| fail(e.to_string()))
    }
}

impl Registrar for AllineateRegistrar {
    fn compute_transform(
        &self,
        fixed: &ScanVolume,
        moving: &ScanVolume,
    ) -> EstimateResult<AffineTransform> {
        let files = ScratchFiles::new(&self.scratch_dir);
        // 上次运行残留的矩阵不能被当作本次的结果.
        files.remove_all()?;
        let result = self.run(fixed, moving, &files);
        // 无论成败都清理临时文件, 配准错误优先报告.
        let cleaned = files.remove_all();
        let transform = result?;
        cleaned?;
        Ok(transform)
    }
}
