//! 体数据读写.
//!
//! 读取时按 dtype 查表, 把体素值归一化到 `[0, 1]`. 查表使用的
//! [`ScaleTable`] 由调用方显式传入, 不存在任何进程级全局状态.

use std::fmt;
use std::path::{Path, PathBuf};

use log::warn;
use ndarray::{Array4, ArrayBase, ArrayD, Axis, Data, Dimension, Ix4};
use ndarray_npy::{read_npy, write_npy, ReadNpyError, WritableElement, WriteNpyError};
use nifti::{IntoNdArray, NiftiObject, NiftiType, ReaderOptions};
use num::ToPrimitive;
use ordered_float::OrderedFloat;

use crate::config::ConfigError;

/// 体素数据类型.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dtype {
    /// 8-bit 无符号整数.
    U8,
    /// 12-bit 无符号整数, 通常以 16-bit 容器存储, 只能由调用方声明.
    U12,
    /// 16-bit 无符号整数.
    U16,
    /// 32-bit 无符号整数.
    U32,
    /// 8-bit 有符号整数.
    I8,
    /// 16-bit 有符号整数.
    I16,
    /// 32-bit 有符号整数.
    I32,
    /// 64-bit 无符号整数.
    U64,
    /// 64-bit 有符号整数.
    I64,
    /// 单精度浮点.
    F32,
    /// 双精度浮点.
    F64,
    /// 其它无法查表的存储类型, 例如 nifti 的复数与 RGB 类型. 总是按最大值推断除数.
    Other(&'static str),
}

impl Dtype {
    /// 类型名.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::U8 => "uint8",
            Self::U12 => "uint12",
            Self::U16 => "uint16",
            Self::U32 => "uint32",
            Self::I8 => "int8",
            Self::I16 => "int16",
            Self::I32 => "int32",
            Self::U64 => "uint64",
            Self::I64 => "int64",
            Self::F32 => "float32",
            Self::F64 => "float64",
            Self::Other(name) => *name,
        }
    }
}

impl fmt::Display for Dtype {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// dtype -> 归一化除数 查找表.
///
/// 该表是只读的. 若要修改, 请通过 [`Self::with`] 构造新表.
#[derive(Clone, Debug, PartialEq)]
pub struct ScaleTable {
    entries: Vec<(Dtype, f64)>,
}

impl Default for ScaleTable {
    /// `{uint8: 256, uint16: 65536, uint12: 4096, float64: 1}`.
    fn default() -> Self {
        Self {
            entries: vec![
                (Dtype::U8, 256.0),
                (Dtype::U16, 65536.0),
                (Dtype::U12, 4096.0),
                (Dtype::F64, 1.0),
            ],
        }
    }
}

impl ScaleTable {
    /// 空表. 所有 dtype 都会退化为按最大值推断.
    #[inline]
    pub fn empty() -> Self {
        Self { entries: vec![] }
    }

    /// 返回一张把 `dtype` 的除数设为 `divisor` 的新表.
    ///
    /// `divisor` 不是正的有限数, 或 `dtype` 为 [`Dtype::Other`] 时返回 `Err`.
    pub fn with(mut self, dtype: Dtype, divisor: f64) -> Result<Self, ConfigError> {
        if !(divisor.is_finite() && divisor > 0.0) || matches!(dtype, Dtype::Other(_)) {
            return Err(ConfigError::InvalidScale {
                dtype: dtype.name(),
                divisor,
            });
        }
        match self.entries.iter_mut().find(|(d, _)| *d == dtype) {
            Some(entry) => entry.1 = divisor,
            None => self.entries.push((dtype, divisor)),
        }
        Ok(self)
    }

    /// 查找 `dtype` 的除数. 不支持的类型返回 `None`.
    #[inline]
    pub fn get(&self, dtype: Dtype) -> Option<f64> {
        self.entries
            .iter()
            .find_map(|&(d, s)| (d == dtype).then_some(s))
    }
}

/// 根据图像最大值推断归一化除数.
///
/// 最大值不超过 1 时视为已归一化, 不超过 256 时视为 8-bit, 否则直接使用最大值.
pub fn infer_scale(image_max: f64) -> f64 {
    if image_max <= 1.0 {
        1.0
    } else if image_max <= 256.0 {
        256.0
    } else {
        image_max
    }
}

/// 体数据读写错误.
#[derive(Debug)]
pub enum VolumeIoError {
    /// 读取 npy 文件错误.
    ReadNpy(ReadNpyError),

    /// 写入 npy 文件错误.
    WriteNpy(WriteNpyError),

    /// 读取 nifti 文件错误.
    Nifti(nifti::NiftiError),

    /// npy 文件的元素类型不受支持.
    UnknownNpyDtype(PathBuf),

    /// 无法从扩展名识别的文件格式.
    UnsupportedFormat(PathBuf),

    /// 维数既不是 3 (`[X, Y, Z]`) 也不是 4 (`[C, X, Y, Z]`).
    UnsupportedRank(usize),
}

impl fmt::Display for VolumeIoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadNpy(e) => write!(f, "cannot read npy: {e}"),
            Self::WriteNpy(e) => write!(f, "cannot write npy: {e}"),
            Self::Nifti(e) => write!(f, "cannot read nifti: {e}"),
            Self::UnknownNpyDtype(p) => write!(f, "unsupported npy element type in {}", p.display()),
            Self::UnsupportedFormat(p) => write!(f, "unsupported volume format: {}", p.display()),
            Self::UnsupportedRank(n) => write!(f, "volume must have 3 or 4 axes, got {n}"),
        }
    }
}

impl std::error::Error for VolumeIoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadNpy(e) => Some(e),
            Self::WriteNpy(e) => Some(e),
            Self::Nifti(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ReadNpyError> for VolumeIoError {
    #[inline]
    fn from(e: ReadNpyError) -> Self {
        Self::ReadNpy(e)
    }
}

impl From<WriteNpyError> for VolumeIoError {
    #[inline]
    fn from(e: WriteNpyError) -> Self {
        Self::WriteNpy(e)
    }
}

impl From<nifti::NiftiError> for VolumeIoError {
    #[inline]
    fn from(e: nifti::NiftiError) -> Self {
        Self::Nifti(e)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Format {
    Npy,
    Nifti,
}

fn format_of(path: &Path) -> Result<Format, VolumeIoError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if name.ends_with(".npy") {
        Ok(Format::Npy)
    } else if name.ends_with(".nii") || name.ends_with(".nii.gz") {
        Ok(Format::Nifti)
    } else {
        Err(VolumeIoError::UnsupportedFormat(path.to_owned()))
    }
}

/// 读取体数据, 并按存储的 dtype 归一化到 `[0, 1]`.
///
/// 支持 `.npy` 与 `.nii` / `.nii.gz`. 3 维数据被视为单通道 `[X, Y, Z]`,
/// 返回值的形状总是 `[C, X, Y, Z]`. 4 维 nifti 数据按其惯例 `[X, Y, Z, C]`
/// 存储, 会被转置为 `[C, X, Y, Z]`.
///
/// 若 dtype 不在 `table` 中, 则记录警告并根据图像最大值推断除数
/// (见 [`infer_scale`]).
pub fn load_volume<P: AsRef<Path>>(path: P, table: &ScaleTable) -> Result<Array4<f32>, VolumeIoError> {
    load_impl(path.as_ref(), None, table)
}

/// 与 [`load_volume`] 相同, 但以调用方声明的 `dtype` 查表, 忽略存储的类型.
///
/// 用于诸如 "12-bit 数据存放在 16-bit 容器中" 的情况.
pub fn load_volume_declared<P: AsRef<Path>>(
    path: P,
    dtype: Dtype,
    table: &ScaleTable,
) -> Result<Array4<f32>, VolumeIoError> {
    load_impl(path.as_ref(), Some(dtype), table)
}

/// 将 `data` 以 `.npy` 格式写入 `path`. 扩展名不是 `.npy` 时返回 `Err`.
pub fn save_volume<A, S, D, P>(path: P, data: &ArrayBase<S, D>) -> Result<(), VolumeIoError>
where
    A: WritableElement,
    S: Data<Elem = A>,
    D: Dimension,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    match format_of(path)? {
        Format::Npy => Ok(write_npy(path, data)?),
        Format::Nifti => Err(VolumeIoError::UnsupportedFormat(path.to_owned())),
    }
}

fn load_impl(path: &Path, declared: Option<Dtype>, table: &ScaleTable) -> Result<Array4<f32>, VolumeIoError> {
    match format_of(path)? {
        Format::Npy => read_npy_normalized(path, declared, table),
        Format::Nifti => read_nifti_normalized(path, declared, table),
    }
}

fn read_npy_normalized(
    path: &Path,
    declared: Option<Dtype>,
    table: &ScaleTable,
) -> Result<Array4<f32>, VolumeIoError> {
    // 依次尝试各元素类型, 描述符不匹配时换下一个.
    macro_rules! try_elem {
        ($($t:ty => $dtype:expr),+ $(,)?) => {
            $(
                match read_npy::<_, ArrayD<$t>>(path) {
                    Ok(data) => return normalize(data, declared.unwrap_or($dtype), table),
                    Err(ReadNpyError::WrongDescriptor(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            )+
        };
    }
    try_elem!(
        u8 => Dtype::U8,
        u16 => Dtype::U16,
        f32 => Dtype::F32,
        f64 => Dtype::F64,
        i16 => Dtype::I16,
        u32 => Dtype::U32,
        i32 => Dtype::I32,
        i8 => Dtype::I8,
        i64 => Dtype::I64,
        u64 => Dtype::U64,
    );
    Err(VolumeIoError::UnknownNpyDtype(path.to_owned()))
}

fn read_nifti_normalized(
    path: &Path,
    declared: Option<Dtype>,
    table: &ScaleTable,
) -> Result<Array4<f32>, VolumeIoError> {
    let obj = ReaderOptions::new().read_file(path)?;
    let stored = match obj.header().data_type()? {
        NiftiType::Uint8 => Dtype::U8,
        NiftiType::Uint16 => Dtype::U16,
        NiftiType::Uint32 => Dtype::U32,
        NiftiType::Int8 => Dtype::I8,
        NiftiType::Int16 => Dtype::I16,
        NiftiType::Int32 => Dtype::I32,
        NiftiType::Int64 => Dtype::I64,
        NiftiType::Uint64 => Dtype::U64,
        NiftiType::Float32 => Dtype::F32,
        NiftiType::Float64 => Dtype::F64,
        NiftiType::Float128 => Dtype::Other("float128"),
        NiftiType::Complex64 => Dtype::Other("complex64"),
        NiftiType::Complex128 => Dtype::Other("complex128"),
        NiftiType::Complex256 => Dtype::Other("complex256"),
        NiftiType::Rgb24 => Dtype::Other("rgb24"),
        NiftiType::Rgba32 => Dtype::Other("rgba32"),
    };
    let data = obj.into_volume().into_ndarray::<f64>()?;

    // [X, Y, Z, C] -> [C, X, Y, Z]
    let data = if data.ndim() == 4 {
        data.permuted_axes([3, 0, 1, 2].as_slice())
    } else {
        data
    };
    normalize(data, declared.unwrap_or(stored), table)
}

/// 按 `dtype` 查表 (或推断) 归一化, 并整理成 `[C, X, Y, Z]`.
fn normalize<T: ToPrimitive + Copy>(
    data: ArrayD<T>,
    dtype: Dtype,
    table: &ScaleTable,
) -> Result<Array4<f32>, VolumeIoError> {
    let scale = match table.get(dtype) {
        Some(s) => s,
        None => {
            let max = data
                .iter()
                .filter_map(|v| v.to_f64())
                .map(OrderedFloat)
                .max()
                .map_or(0.0, |m| m.0);
            let s = infer_scale(max);
            warn!("Unsupported dtype `{dtype}`, scale factor {s} inferred from image maximum {max}");
            s
        }
    };
    let data = data.mapv(|v| (v.to_f64().unwrap_or(0.0) / scale) as f32);

    let ndim = data.ndim();
    let data = match ndim {
        3 => data.insert_axis(Axis(0)),
        4 => data,
        _ => return Err(VolumeIoError::UnsupportedRank(ndim)),
    };
    data.into_dimensionality::<Ix4>()
        .map_err(|_| VolumeIoError::UnsupportedRank(ndim))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("skel-berry-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_scale_table() {
        let t = ScaleTable::default();
        assert_eq!(t.get(Dtype::U8), Some(256.0));
        assert_eq!(t.get(Dtype::U16), Some(65536.0));
        assert_eq!(t.get(Dtype::U12), Some(4096.0));
        assert_eq!(t.get(Dtype::F64), Some(1.0));
        assert_eq!(t.get(Dtype::F32), None);

        let t = t.with(Dtype::F32, 1.0).unwrap().with(Dtype::U8, 255.0).unwrap();
        assert_eq!(t.get(Dtype::F32), Some(1.0));
        assert_eq!(t.get(Dtype::U8), Some(255.0));
        assert_eq!(ScaleTable::empty().get(Dtype::U8), None);
    }

    #[test]
    fn test_scale_table_rejects_bad_divisor() {
        let t = ScaleTable::default();
        assert_eq!(
            t.clone().with(Dtype::U8, 0.0),
            Err(ConfigError::InvalidScale {
                dtype: "uint8",
                divisor: 0.0
            })
        );
        assert!(t.clone().with(Dtype::F32, f64::INFINITY).is_err());
        assert!(t.clone().with(Dtype::Other("rgb24"), 255.0).is_err());
        assert_eq!(t.get(Dtype::Other("rgb24")), None);
    }

    #[test]
    fn test_infer_scale() {
        assert_eq!(infer_scale(0.0), 1.0);
        assert_eq!(infer_scale(0.7), 1.0);
        assert_eq!(infer_scale(1.0), 1.0);
        assert_eq!(infer_scale(200.0), 256.0);
        assert_eq!(infer_scale(256.0), 256.0);
        assert_eq!(infer_scale(1000.0), 1000.0);
    }

    #[test]
    fn test_load_u8_volume() {
        let p = temp_path("u8.npy");
        let raw = Array3::from_shape_fn((4, 3, 2), |(x, y, z)| (x * 60 + y * 10 + z) as u8);
        write_npy(&p, &raw).unwrap();

        let v = load_volume(&p, &ScaleTable::default()).unwrap();
        assert_eq!(v.shape(), &[1, 4, 3, 2]);
        assert_eq!(v[[0, 3, 2, 1]], (3 * 60 + 2 * 10 + 1) as f32 / 256.0);
        std::fs::remove_file(&p).unwrap();
    }

    #[test]
    fn test_load_u16_four_channels() {
        let p = temp_path("u16.npy");
        let raw = Array4::from_elem((2, 3, 3, 3), 32768u16);
        write_npy(&p, &raw).unwrap();

        let v = load_volume(&p, &ScaleTable::default()).unwrap();
        assert_eq!(v.shape(), &[2, 3, 3, 3]);
        assert!(v.iter().all(|&p| p == 0.5));

        // 12-bit 数据放在 16-bit 容器中.
        let raw = Array3::from_elem((2, 2, 2), 2048u16);
        write_npy(&p, &raw).unwrap();
        let v = load_volume_declared(&p, Dtype::U12, &ScaleTable::default()).unwrap();
        assert!(v.iter().all(|&p| p == 0.5));
        std::fs::remove_file(&p).unwrap();
    }

    #[test]
    fn test_load_unsupported_dtype_falls_back() {
        let _ = simple_logger::init_with_level(log::Level::Warn);

        let p = temp_path("f32.npy");
        let raw = Array3::from_shape_fn((3, 3, 3), |(x, _, _)| x as f32 * 0.25);
        write_npy(&p, &raw).unwrap();
        let v = load_volume(&p, &ScaleTable::default()).unwrap();
        assert_eq!(v.index_axis(Axis(0), 0), raw.view());

        let p2 = temp_path("i16.npy");
        let raw = Array3::from_shape_fn((2, 2, 2), |(x, y, z)| if x + y + z == 3 { 1000i16 } else { 500 });
        write_npy(&p2, &raw).unwrap();
        let v = load_volume(&p2, &ScaleTable::default()).unwrap();
        assert_eq!(v[[0, 1, 1, 1]], 1.0);
        assert_eq!(v[[0, 0, 0, 0]], 0.5);

        std::fs::remove_file(&p).unwrap();
        std::fs::remove_file(&p2).unwrap();
    }

    #[test]
    fn test_load_64bit_npy_falls_back() {
        let _ = simple_logger::init_with_level(log::Level::Warn);

        let p = temp_path("i64.npy");
        let raw = Array3::from_shape_fn((2, 2, 2), |(x, _, _)| if x == 0 { 1000i64 } else { 250 });
        write_npy(&p, &raw).unwrap();
        let v = load_volume(&p, &ScaleTable::default()).unwrap();
        assert_eq!(v.shape(), &[1, 2, 2, 2]);
        assert_eq!(v[[0, 0, 1, 1]], 1.0);
        assert_eq!(v[[0, 1, 0, 0]], 0.25);

        let raw = Array3::from_elem((2, 2, 2), 128u64);
        write_npy(&p, &raw).unwrap();
        let v = load_volume(&p, &ScaleTable::default()).unwrap();
        assert!(v.iter().all(|&p| p == 0.5));
        std::fs::remove_file(&p).unwrap();
    }

    #[test]
    fn test_load_nifti_normalized() {
        use nifti::writer::WriterOptions;

        let _ = simple_logger::init_with_level(log::Level::Warn);

        // 表中的类型按表归一化.
        let p = temp_path("u8.nii");
        let raw = Array3::from_elem((3, 2, 2), 64u8);
        WriterOptions::new(&p).write_nifti(&raw).unwrap();
        let v = load_volume(&p, &ScaleTable::default()).unwrap();
        assert_eq!(v.shape(), &[1, 3, 2, 2]);
        assert!(v.iter().all(|&p| p == 0.25));
        std::fs::remove_file(&p).unwrap();

        // 表外的 64-bit 整数按最大值推断.
        let p = temp_path("i64.nii");
        let raw = Array3::from_shape_fn((2, 2, 2), |(x, _, _)| if x == 0 { 1000i64 } else { 500 });
        WriterOptions::new(&p).write_nifti(&raw).unwrap();
        let v = load_volume(&p, &ScaleTable::default()).unwrap();
        assert_eq!(v[[0, 0, 1, 1]], 1.0);
        assert_eq!(v[[0, 1, 1, 1]], 0.5);
        assert!(v.iter().all(|&p| (0.0..=1.0).contains(&p)));
        std::fs::remove_file(&p).unwrap();
    }

    #[test]
    fn test_save_labels() {
        let p = temp_path("labels.npy");
        let labels = Array3::from_shape_fn((5, 4, 3), |(x, _, _)| x as u32);
        save_volume(&p, &labels).unwrap();
        let back: Array3<u32> = read_npy(&p).unwrap();
        assert_eq!(back, labels);
        std::fs::remove_file(&p).unwrap();
    }

    #[test]
    fn test_unsupported_format() {
        let t = ScaleTable::default();
        assert!(matches!(
            load_volume("volume.tif", &t),
            Err(VolumeIoError::UnsupportedFormat(_))
        ));
        assert_eq!(format_of(Path::new("a/b.NII.GZ")).unwrap(), Format::Nifti);
        let labels = Array3::<u32>::zeros((1, 1, 1));
        assert!(matches!(
            save_volume("labels.nii", &labels),
            Err(VolumeIoError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_unsupported_rank() {
        let p = temp_path("rank2.npy");
        write_npy(&p, &ndarray::Array2::<u8>::zeros((3, 3))).unwrap();
        assert!(matches!(
            load_volume(&p, &ScaleTable::default()),
            Err(VolumeIoError::UnsupportedRank(2))
        ));
        std::fs::remove_file(&p).unwrap();
    }
}
