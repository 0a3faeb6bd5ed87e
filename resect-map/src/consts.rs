//! 通用常量.

/// 融合标签体的体素取值.
///
/// 取值约定为 `step(切除区) + 2 * step(电极)`, 下游查看器依赖 "二者皆有" == 3.
pub mod label {
    /// 背景.
    pub const BACKGROUND: u8 = 0;

    /// 仅属于切除区.
    pub const RESECTION: u8 = 1;

    /// 仅属于被切除电极的球形邻域.
    pub const ELECTRODE: u8 = 2;

    /// 同时属于切除区和电极邻域.
    pub const BOTH: u8 = 3;

    /// 二值掩膜中的前景值.
    pub const FOREGROUND: u8 = 1;

    /// 体素是否是前景 (任意非零值)?
    #[inline]
    pub const fn is_foreground(p: u8) -> bool {
        p != BACKGROUND
    }

    /// 体素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        matches!(p, BACKGROUND)
    }
}

/// 受试者工作目录及数据目录下的文件名.
pub mod files {
    /// 电极通道坐标表 (`chanName,x,y,z`).
    pub const ELECTRODE_TABLE: &str = "leads.csv";

    /// 电极导线切除注释表 (`tagName,isResected`).
    pub const RESECTION_TABLE: &str = "element_info.csv";

    /// 参考解剖体 (配准目标, 即 fixed 空间).
    pub const REFERENCE_ANAT: &str = "reference.nii";

    /// 切除扫描解剖体 (配准源, 即 moving 空间).
    pub const RESECTION_ANAT: &str = "resection_t1.nii";

    /// moving 空间中的原始切除区掩膜.
    pub const RAW_RESECTION_MASK: &str = "rsxn.msk.nii";

    /// 被切除电极坐标文本.
    pub const COORDS: &str = "resected_coords.txt";

    /// 电极球形掩膜 (已做左右镜像校正).
    pub const ELECTRODE_MASK: &str = "resected_elec.nii";

    /// moving -> fixed 仿射变换.
    pub const TRANSFORM: &str = "resection_to_reference.aff12.1D";

    /// 对齐并清理后的切除区掩膜.
    pub const ALIGNED_RESECTION_MASK: &str = "rsxn_al.nii";

    /// 最终融合标签体.
    pub const FUSED_LABELS: &str = "combined_estimates.nii";
}

/// 电极球默认半径, 以毫米为单位.
pub const DEFAULT_SPHERE_RADIUS_MM: f64 = 2.0;

/// 重采样后掩膜的默认阈值. 严格大于该值的体素视为前景.
pub const DEFAULT_THRESHOLD_EPSILON: f32 = 0.1;

/// 判定两个网格仿射矩阵相同的容差, 以毫米为单位.
///
/// nifti header 以 `f32` 存储 sform, 因此不能要求逐位相等.
pub const GRID_AFFINE_TOLERANCE: f64 = 1e-4;
