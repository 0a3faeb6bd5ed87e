use std::fmt;
use std::fs;
use std::io;
use std::ops::{Index, IndexMut};
use std::path::{Path, PathBuf};

use nalgebra::{Matrix4, Point3};
use ndarray::{Array3, ArrayD, ArrayView, ArrayViewMut, Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::consts::{label, GRID_AFFINE_TOLERANCE};
use crate::error::{EstimateError, EstimateResult};
use crate::Idx3d;

pub mod affine;
pub mod mirror;
pub mod morph_3d;

pub use affine::AffineTransform;
pub use mirror::MirrorCorrection;

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 体素网格: 形状 `(z, h, w)` 加体素索引 `(i, j, k) = (w, h, z)` 到物理坐标的仿射矩阵.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    /// 形状, 按 `(z, h, w)` 组织.
    pub shape: Idx3d,

    /// 体素 -> 物理坐标 (毫米) 仿射矩阵.
    pub affine: Matrix4<f64>,
}

impl Grid {
    /// 两个网格是否相同: 形状一致, 且仿射矩阵在 [`GRID_AFFINE_TOLERANCE`] 内一致.
    pub fn same_as(&self, other: &Grid) -> bool {
        self.shape == other.shape
            && (self.affine - other.affine).amax() <= GRID_AFFINE_TOLERANCE
    }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (z, h, w) = self.shape;
        let m = &self.affine;
        write!(
            f,
            "{w}x{h}x{z} [{:.3} {:.3} {:.3} {:.3} | {:.3} {:.3} {:.3} {:.3} | {:.3} {:.3} {:.3} {:.3}]",
            m[(0, 0)], m[(0, 1)], m[(0, 2)], m[(0, 3)],
            m[(1, 0)], m[(1, 1)], m[(1, 2)], m[(1, 3)],
            m[(2, 0)], m[(2, 1)], m[(2, 2)], m[(2, 3)],
        )
    }
}

/// 带 nifti header 的 3D 体数据的共用几何属性.
pub trait VolumeGeometry {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取数据形状大小, 按 `(z, h, w)` 组织.
    fn shape(&self) -> Idx3d;

    /// 体素索引 `(i, j, k)` 到物理坐标的仿射矩阵.
    #[inline]
    fn affine(&self) -> Matrix4<f64> {
        affine::affine_from_header(self.header())
    }

    /// 网格几何.
    #[inline]
    fn grid(&self) -> Grid {
        Grid {
            shape: self.shape(),
            affine: self.affine(),
        }
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 单个体素在 `(i, j, k)` 方向上的物理间距, 以毫米为单位.
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        affine::voxel_spacing(&self.affine())
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.pix_dim().iter().product()
    }

    /// 体素中心的物理坐标.
    #[inline]
    fn voxel_to_physical(&self, (z, h, w): Idx3d) -> Point3<f64> {
        self.affine()
            .transform_point(&Point3::new(w as f64, h as f64, z as f64))
    }

    /// 将物理坐标映射为连续体素坐标, 按 `[z, h, w]` 组织.
    /// 仿射矩阵不可逆时返回 `None`.
    fn physical_to_voxel(&self, p: &Point3<f64>) -> Option<[f64; 3]> {
        let inv = self.affine().try_inverse()?;
        let v = inv.transform_point(p);
        Some([v.z, v.y, v.x])
    }
}

/// 生成 nifti 读写函数. `$read` 读取 3D 体数据并转换为 `(z, h, w)` 标准布局
/// (允许末维为 1 的 4D 数据), `$write` 以 header 为参考写出 `(z, h, w)` 组织的数据.
macro_rules! impl_nifti_io {
    ($read: ident, $write: ident, $elem: ty) => {
        fn $read(path: &Path) -> EstimateResult<(BoxedHeader, Array3<$elem>)> {
            if !path.is_file() {
                return Err(EstimateError::MissingData(path.to_owned()));
            }
            let obj = ReaderOptions::new().read_file(path)?;
            let header = Box::new(obj.header().clone());

            let data: ArrayD<$elem> = obj.into_volume().into_ndarray::<$elem>()?;
            let data = match data.ndim() {
                4 if data.shape()[3] == 1 => data.index_axis_move(Axis(3), 0),
                _ => data,
            };
            let data = data.into_dimensionality::<Ix3>().map_err(|_| {
                EstimateError::Geometry(format!("{} is not a 3D volume", path.display()))
            })?;

            // [W, H, z] -> [z, H, W].
            // hint: 原第一维向下增长, 原第二维向右增长.
            let data = data.permuted_axes([2, 1, 0]);
            let data = if data.is_standard_layout() {
                data
            } else {
                data.as_standard_layout().to_owned()
            };
            Ok((header, data))
        }

        fn $write(path: &Path, header: &NiftiHeader, data: &Array3<$elem>) -> EstimateResult<()> {
            let mut header = header.clone();
            // 写出的是未缩放的原始值.
            header.scl_slope = 1.0;
            header.scl_inter = 0.0;

            // [z, H, W] -> [W, H, z]
            let view = data.view().permuted_axes([2, 1, 0]);
            let tmp = writer_path(path)?;
            let written = WriterOptions::new(&tmp)
                .reference_header(&header)
                .write_nifti(&view);
            if let Err(e) = written {
                let _ = fs::remove_file(&tmp);
                return Err(e.into());
            }
            fs::rename(&tmp, path)?;
            Ok(())
        }
    };
}

/// nifti 的 writer 会把文件名最后两段 `.` 分隔的部分当作扩展名替换为 `.nii`,
/// 所以 `rsxn.msk.nii` 会被写成 `rsxn.nii`. 先写到一个只有单一后缀的同目录文件,
/// 再重命名为目标路径.
fn writer_path(path: &Path) -> EstimateResult<PathBuf> {
    let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a valid file name", path.display()),
        )
    })?;
    let (stem, suffix) = match name.strip_suffix(".nii.gz") {
        Some(stem) => (stem, ".nii.gz"),
        None => (name.strip_suffix(".nii").unwrap_or(name), ".nii"),
    };
    let stem = stem.replace('.', "_");
    Ok(path.with_file_name(format!("nifti_write_{stem}{suffix}")))
}

impl_nifti_io!(read_scan, write_scan, f32);
impl_nifti_io!(read_mask, write_mask, u8);

/// 以给定仿射矩阵构造一个新的 header.
fn header_from_affine(affine: &Matrix4<f64>, (z, h, w): Idx3d) -> BoxedHeader {
    let mut header = Box::<NiftiHeader>::default();
    header.dim = [3, w as _, h as _, z as _, 1, 1, 1, 1];
    header.pixdim[0] = 1.0;
    header.qform_code = 0;
    affine::set_header_affine(&mut header, affine);
    header
}

/// nii 格式 3D 标量体 (解剖扫描, 或尚未阈值化的重采样掩膜). 体素值以 `f32` 保存.
#[derive(Debug, Clone)]
pub struct ScanVolume {
    header: BoxedHeader,
    data: Array3<f32>,
}

impl VolumeGeometry for ScanVolume {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }

    #[inline]
    fn shape(&self) -> Idx3d {
        self.data.dim()
    }
}

impl Index<Idx3d> for ScanVolume {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for ScanVolume {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl ScanVolume {
    /// 打开 nii 文件格式的 3D 标量体. `path` 为 nii 文件的本地路径.
    /// 文件不存在时返回 `MissingData`.
    pub fn open<P: AsRef<Path>>(path: P) -> EstimateResult<Self> {
        let (header, data) = read_scan(path.as_ref())?;
        Ok(Self { header, data })
    }

    /// 根据 `(z, h, w)` 组织的数据和体素 -> 物理坐标仿射矩阵直接创建.
    pub fn from_array(data: Array3<f32>, affine: &Matrix4<f64>) -> Self {
        let header = header_from_affine(affine, data.dim());
        Self { header, data }
    }

    /// 沿用 `reference` 的 header (几何) 创建新体. `data` 形状必须与其一致, 否则 panic.
    pub fn with_geometry_of<G: VolumeGeometry>(reference: &G, data: Array3<f32>) -> Self {
        assert_eq!(reference.shape(), data.dim(), "数据与参考体形状不一致");
        Self {
            header: Box::new(reference.header().clone()),
            data,
        }
    }

    /// 保存为 nii 文件.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> EstimateResult<()> {
        write_scan(path.as_ref(), &self.header, &self.data)
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, f32, Ix3> {
        self.data.view_mut()
    }

    /// 阈值化: 值严格大于 `epsilon` 的体素为前景, 其余 (包括 NaN) 为背景.
    pub fn threshold(&self, epsilon: f32) -> MaskVolume {
        let data = self.data.mapv(|v| threshold_voxel(v, epsilon));
        MaskVolume::with_geometry_of(self, data)
    }
}

#[inline]
fn threshold_voxel(v: f32, epsilon: f32) -> u8 {
    if v > epsilon {
        label::FOREGROUND
    } else {
        label::BACKGROUND
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use ndarray::Zip;
    }
}

/// 并发操作部分
#[cfg(feature = "rayon")]
impl ScanVolume {
    /// 借助 `rayon`, 并行地运行 [`Self::threshold`].
    pub fn par_threshold(&self, epsilon: f32) -> MaskVolume {
        let mut data = Array3::<u8>::zeros(self.data.dim());
        Zip::from(&mut data)
            .and(&self.data)
            .par_for_each(|m, &v| *m = threshold_voxel(v, epsilon));
        MaskVolume::with_geometry_of(self, data)
    }
}

/// nii 格式 3D 标签体: 二值掩膜 (`{0, 1}`) 或融合标签 (`{0, 1, 2, 3}`).
/// 体素值以 `u8` 保存.
#[derive(Debug, Clone)]
pub struct MaskVolume {
    header: BoxedHeader,
    data: Array3<u8>,
}

impl VolumeGeometry for MaskVolume {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }

    #[inline]
    fn shape(&self) -> Idx3d {
        self.data.dim()
    }
}

impl Index<Idx3d> for MaskVolume {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for MaskVolume {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl MaskVolume {
    /// 打开 nii 文件格式的 3D 标签体. 非整数体素值会被截断.
    /// 文件不存在时返回 `MissingData`.
    pub fn open<P: AsRef<Path>>(path: P) -> EstimateResult<Self> {
        let (header, data) = read_mask(path.as_ref())?;
        Ok(Self { header, data })
    }

    /// 在 `reference` 的网格上创建一个全背景标签体.
    pub fn empty_like<G: VolumeGeometry>(reference: &G) -> Self {
        Self {
            header: Box::new(reference.header().clone()),
            data: Array3::zeros(reference.shape()),
        }
    }

    /// 根据 `(z, h, w)` 组织的数据和体素 -> 物理坐标仿射矩阵直接创建.
    pub fn from_array(data: Array3<u8>, affine: &Matrix4<f64>) -> Self {
        let header = header_from_affine(affine, data.dim());
        Self { header, data }
    }

    /// 沿用 `reference` 的 header (几何) 创建新体. `data` 形状必须与其一致, 否则 panic.
    pub fn with_geometry_of<G: VolumeGeometry>(reference: &G, data: Array3<u8>) -> Self {
        assert_eq!(reference.shape(), data.dim(), "数据与参考体形状不一致");
        Self {
            header: Box::new(reference.header().clone()),
            data,
        }
    }

    /// 保存为 nii 文件.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> EstimateResult<()> {
        write_mask(path.as_ref(), &self.header, &self.data)
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, u8, Ix3> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, u8, Ix3> {
        self.data.view_mut()
    }

    /// 获取值为 `value` 的体素个数.
    #[inline]
    pub fn count(&self, value: u8) -> usize {
        self.data.iter().filter(|p| **p == value).count()
    }

    /// 获取前景 (非零) 体素个数.
    #[inline]
    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|p| label::is_foreground(**p)).count()
    }

    /// 收集值为 `value` 的所有体素下标, 结果按行优先存储.
    pub fn positions_of(&self, value: u8) -> Vec<Idx3d> {
        self.data
            .indexed_iter()
            .filter_map(|(pos, p)| (*p == value).then_some(pos))
            .collect()
    }

    /// 获取融合标签的基本统计信息.
    ///
    /// 统计信息格式为: \[背景, 仅切除区, 仅电极, 二者皆有\] 的体素数.
    /// 该操作不会统计任何其他取值.
    pub fn label_statistics(&self) -> [usize; 4] {
        let mut ans = [0; 4];
        for p in self.data.iter().filter(|p| **p <= label::BOTH) {
            ans[*p as usize] += 1;
        }
        ans
    }

    /// 获取 `pos` 前后上下左右六个点的坐标.
    ///
    /// 在数据范围外的坐标会被过滤掉, 不会包含在返回值中.
    pub(crate) fn diamond_neighbours(&self, (z, h, w): Idx3d) -> Vec<Idx3d> {
        self.check_collect([
            (z.wrapping_sub(1), h, w),
            (z.saturating_add(1), h, w),
            (z, h.wrapping_sub(1), w),
            (z, h.saturating_add(1), w),
            (z, h, w.wrapping_sub(1)),
            (z, h, w.saturating_add(1)),
        ])
    }

    /// 收集 `data` 中不越界的索引.
    #[inline]
    fn check_collect<B: FromIterator<Idx3d>, const N: usize>(&self, data: [Idx3d; N]) -> B {
        data.into_iter().filter(|p| self.check(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phantom;
    use tempfile::tempdir;

    #[test]
    fn test_mask_save_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cube.nii");

        let affine = phantom::shifted_affine(2.0, [-10.0, 4.0, 7.5]);
        let mask = MaskVolume::from_array(phantom::cube((6, 7, 8), (1, 2, 3), 2), &affine);
        mask.save(&path).unwrap();

        let back = MaskVolume::open(&path).unwrap();
        assert_eq!(back.shape(), (6, 7, 8));
        assert_eq!(back.data(), mask.data());
        assert!(back.grid().same_as(&mask.grid()));
        assert_eq!(back.count(label::FOREGROUND), 8);
        assert_eq!(back.pix_dim(), [2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_scan_save_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("anat.nii");

        let affine = phantom::shifted_affine(1.0, [0.0, 0.0, 0.0]);
        let scan = ScanVolume::from_array(phantom::two_blobs((9, 10, 11)), &affine);
        scan.save(&path).unwrap();

        let back = ScanVolume::open(&path).unwrap();
        assert_eq!(back.shape(), (9, 10, 11));
        assert_eq!(back.data(), scan.data());
    }

    #[test]
    fn test_threshold_strict() {
        let affine = phantom::shifted_affine(1.0, [0.0; 3]);
        let data = Array3::from_shape_vec((1, 1, 5), vec![-1.0, 0.0, 0.1, 0.1001, f32::NAN]).unwrap();
        let scan = ScanVolume::from_array(data, &affine);
        let mask = scan.threshold(0.1);
        assert_eq!(mask.data().iter().copied().collect::<Vec<_>>(), vec![0, 0, 0, 1, 0]);
        assert!(mask.grid().same_as(&scan.grid()));

        #[cfg(feature = "rayon")]
        assert_eq!(scan.par_threshold(0.1).data(), mask.data());
    }

    /// 文件名中有多个 `.` 时也必须原样落盘, 且不留下临时文件.
    #[test]
    fn test_save_multi_dot_names() {
        let dir = tempdir().unwrap();
        let cache = crate::ArtifactCache::new(dir.path()).unwrap();
        let mask = MaskVolume::from_array(
            phantom::cube((5, 5, 5), (1, 1, 1), 2),
            &phantom::shifted_affine(1.0, [0.0; 3]),
        );

        let raw = cache.path(crate::consts::files::RAW_RESECTION_MASK);
        let staged = cache.staging_path(crate::consts::files::ELECTRODE_MASK);
        mask.save(&raw).unwrap();
        mask.save(&staged).unwrap();

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![".partial.resected_elec.nii", "rsxn.msk.nii"]);
        assert_eq!(MaskVolume::open(&raw).unwrap().data(), mask.data());
        assert_eq!(MaskVolume::open(&staged).unwrap().data(), mask.data());
    }

    #[test]
    fn test_open_missing() {
        let dir = tempdir().unwrap();
        let err = ScanVolume::open(dir.path().join("nope.nii")).unwrap_err();
        assert!(matches!(err, EstimateError::MissingData(_)));
    }

    /// 体素坐标与物理坐标的互相转换以 `(z, h, w)` <-> `(x, y, z)` 为约定.
    #[test]
    fn test_voxel_physical() {
        let affine = phantom::shifted_affine(2.0, [-10.0, 4.0, 7.5]);
        let mask = MaskVolume::from_array(Array3::zeros((4, 5, 6)), &affine);
        let p = mask.voxel_to_physical((1, 2, 3));
        assert_eq!((p.x, p.y, p.z), (-4.0, 8.0, 9.5));
        let [z, h, w] = mask.physical_to_voxel(&p).unwrap();
        assert!((z - 1.0).abs() < 1e-9 && (h - 2.0).abs() < 1e-9 && (w - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_grid_same_as() {
        let a = phantom::shifted_affine(1.0, [0.0, 0.0, 0.0]);
        let mut b = a;
        b[(0, 3)] += 1e-6;
        let ga = Grid { shape: (2, 2, 2), affine: a };
        let gb = Grid { shape: (2, 2, 2), affine: b };
        assert!(ga.same_as(&gb));

        b[(0, 3)] += 0.5;
        let gb = Grid { shape: (2, 2, 2), affine: b };
        assert!(!ga.same_as(&gb));
        let gc = Grid { shape: (2, 2, 3), affine: a };
        assert!(!ga.same_as(&gc));
    }
}
