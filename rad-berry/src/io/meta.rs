//! MetaImage (`.mhd` + `.raw`) 读写.
//!
//! 支持 `ElementDataFile` 为独立数据文件或 `LOCAL`, 支持 zlib 压缩
//! (`CompressedData = True`) 与两种字节序. 写出时总是未压缩、小端序,
//! 数据文件与头部同名, 扩展名为 `.raw`.

use std::fmt::Write as _;
use std::fs;
use std::io::Read;
use std::path::Path;

use flate2::read::ZlibDecoder;
use ndarray::{Array3, ArrayView3};
use num::{NumCast, ToPrimitive};

use super::{ImageIoError, Result};
use crate::Geometry;

/// MetaImage 体素类型.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ElementType {
    Char,
    Uchar,
    Short,
    Ushort,
    Int,
    Uint,
    Float,
    Double,
}

impl ElementType {
    fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "MET_CHAR" => Self::Char,
            "MET_UCHAR" => Self::Uchar,
            "MET_SHORT" => Self::Short,
            "MET_USHORT" => Self::Ushort,
            "MET_INT" | "MET_LONG" => Self::Int,
            "MET_UINT" | "MET_ULONG" => Self::Uint,
            "MET_FLOAT" => Self::Float,
            "MET_DOUBLE" => Self::Double,
            other => return Err(ImageIoError::UnsupportedElement(other.to_string())),
        })
    }

    const fn name(&self) -> &'static str {
        match self {
            Self::Char => "MET_CHAR",
            Self::Uchar => "MET_UCHAR",
            Self::Short => "MET_SHORT",
            Self::Ushort => "MET_USHORT",
            Self::Int => "MET_INT",
            Self::Uint => "MET_UINT",
            Self::Float => "MET_FLOAT",
            Self::Double => "MET_DOUBLE",
        }
    }

    /// 单个体素的字节数.
    const fn size(&self) -> usize {
        match self {
            Self::Char | Self::Uchar => 1,
            Self::Short | Self::Ushort => 2,
            Self::Int | Self::Uint | Self::Float => 4,
            Self::Double => 8,
        }
    }

    /// 将一个体素的字节解码为 `f64`. `bytes.len()` 必须等于 `self.size()`.
    fn decode(&self, bytes: &[u8], msb: bool) -> f64 {
        macro_rules! decode_as {
            ($t: ty, $n: expr) => {{
                let mut buf = [0u8; $n];
                buf.copy_from_slice(bytes);
                if msb {
                    <$t>::from_be_bytes(buf) as f64
                } else {
                    <$t>::from_le_bytes(buf) as f64
                }
            }};
        }
        match self {
            Self::Char => bytes[0] as i8 as f64,
            Self::Uchar => bytes[0] as f64,
            Self::Short => decode_as!(i16, 2),
            Self::Ushort => decode_as!(u16, 2),
            Self::Int => decode_as!(i32, 4),
            Self::Uint => decode_as!(u32, 4),
            Self::Float => decode_as!(f32, 4),
            Self::Double => decode_as!(f64, 8),
        }
    }
}

/// 可按 MetaImage 落盘的体素类型.
pub(crate) trait MetaVoxel: Copy + NumCast + ToPrimitive {
    /// 写出时使用的体素类型.
    const ELEMENT: ElementType;

    /// 以小端序追加到 `out`.
    fn put_le(self, out: &mut Vec<u8>);
}

impl MetaVoxel for f32 {
    const ELEMENT: ElementType = ElementType::Float;

    #[inline]
    fn put_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl MetaVoxel for u8 {
    const ELEMENT: ElementType = ElementType::Uchar;

    #[inline]
    fn put_le(self, out: &mut Vec<u8>) {
        out.push(self);
    }
}

/// 已解析的 MetaImage 头部.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaHeader {
    /// 体素个数, `(x, y, z)`.
    pub dim_size: [usize; 3],

    /// 体素分辨率, `(x, y, z)`.
    pub spacing: [f64; 3],

    /// 原点.
    pub offset: [f64; 3],

    /// 方向矩阵, 按 MetaImage 惯例逐列存储.
    pub transform: [f64; 9],

    /// 数据是否为大端序.
    pub msb: bool,

    /// 数据是否经 zlib 压缩.
    pub compressed: bool,

    /// 数据文件名; `LOCAL` 代表数据紧跟头部.
    pub data_file: String,

    element: ElementType,
}

/// 解析 `n` 个以空白分隔的数.
fn parse_numbers<T: std::str::FromStr, const N: usize>(key: &str, value: &str) -> Result<[T; N]> {
    let parsed: Vec<T> = value
        .split_whitespace()
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| ImageIoError::MalformedHeader(format!("`{key}` is not numeric: {value}")))?;
    parsed
        .try_into()
        .map_err(|_| ImageIoError::MalformedHeader(format!("`{key}` must have {N} values")))
}

#[inline]
fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

impl MetaHeader {
    /// 由几何元信息与形状生成写出用头部.
    fn for_writing(geometry: &Geometry, (z, y, x): (usize, usize, usize), element: ElementType, data_file: String) -> Self {
        let mut transform = [0.0; 9];
        for row in 0..3 {
            for col in 0..3 {
                transform[col * 3 + row] = geometry.direction_at(row, col);
            }
        }
        Self {
            dim_size: [x, y, z],
            spacing: geometry.spacing,
            offset: geometry.origin,
            transform,
            msb: false,
            compressed: false,
            data_file,
            element,
        }
    }

    /// 解析头部文本. 返回头部和数据在 `bytes` 中的起始偏移
    /// (即 `ElementDataFile` 一行之后).
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize)> {
        let mut dims = None;
        let mut ndims = None;
        let mut spacing = None;
        let mut offset = [0.0; 3];
        let mut transform = Geometry::IDENTITY;
        let mut msb = false;
        let mut compressed = false;
        let mut element = None;
        let mut channels = 1usize;
        let mut data_file = None;

        let mut pos = 0;
        while pos < bytes.len() && data_file.is_none() {
            let end = bytes[pos..]
                .iter()
                .position(|&b| b == b'\n')
                .map_or(bytes.len(), |i| pos + i);
            let line = String::from_utf8_lossy(&bytes[pos..end]);
            pos = (end + 1).min(bytes.len());

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            match key.to_ascii_lowercase().as_str() {
                "ndims" => ndims = Some(parse_numbers::<usize, 1>(key, value)?[0]),
                "dimsize" => dims = Some(parse_numbers::<usize, 3>(key, value)?),
                "elementspacing" => spacing = Some(parse_numbers::<f64, 3>(key, value)?),
                "elementsize" if spacing.is_none() => {
                    spacing = Some(parse_numbers::<f64, 3>(key, value)?)
                }
                "offset" | "position" | "origin" => offset = parse_numbers(key, value)?,
                "transformmatrix" | "rotation" | "orientation" => {
                    transform = parse_numbers(key, value)?
                }
                "binarydatabyteordermsb" | "elementbyteordermsb" => msb = parse_bool(value),
                "compresseddata" => compressed = parse_bool(value),
                "elementnumberofchannels" => channels = parse_numbers::<usize, 1>(key, value)?[0],
                "elementtype" => element = Some(ElementType::parse(value)?),
                "elementdatafile" => data_file = Some(value.to_string()),
                _ => {}
            }
        }

        match ndims {
            Some(3) => {}
            Some(n) => return Err(ImageIoError::NotVolumetric(n)),
            None => return Err(ImageIoError::MalformedHeader("missing `NDims`".into())),
        }
        if channels != 1 {
            return Err(ImageIoError::MalformedHeader(format!(
                "expected a single channel, found {channels}"
            )));
        }
        let missing = |k: &str| ImageIoError::MalformedHeader(format!("missing `{k}`"));
        let header = Self {
            dim_size: dims.ok_or_else(|| missing("DimSize"))?,
            spacing: spacing.unwrap_or([1.0; 3]),
            offset,
            transform,
            msb,
            compressed,
            data_file: data_file.ok_or_else(|| missing("ElementDataFile"))?,
            element: element.ok_or_else(|| missing("ElementType"))?,
        };
        Ok((header, pos))
    }

    /// 生成头部文本.
    pub fn to_text(&self) -> String {
        fn join(v: &[impl ToString]) -> String {
            v.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
        }
        let title = |b: bool| if b { "True" } else { "False" };

        let mut s = String::with_capacity(512);
        // `write!` 到 `String` 不会失败.
        let _ = writeln!(s, "ObjectType = Image");
        let _ = writeln!(s, "NDims = 3");
        let _ = writeln!(s, "BinaryData = True");
        let _ = writeln!(s, "BinaryDataByteOrderMSB = {}", title(self.msb));
        let _ = writeln!(s, "CompressedData = {}", title(self.compressed));
        let _ = writeln!(s, "TransformMatrix = {}", join(&self.transform));
        let _ = writeln!(s, "Offset = {}", join(&self.offset));
        let _ = writeln!(s, "CenterOfRotation = 0 0 0");
        let _ = writeln!(s, "ElementSpacing = {}", join(&self.spacing));
        let _ = writeln!(s, "DimSize = {}", join(&self.dim_size));
        let _ = writeln!(s, "ElementType = {}", self.element.name());
        let _ = writeln!(s, "ElementDataFile = {}", self.data_file);
        s
    }

    /// 转换为几何元信息.
    pub fn geometry(&self) -> Geometry {
        let mut direction = [0.0; 9];
        for row in 0..3 {
            for col in 0..3 {
                direction[row * 3 + col] = self.transform[col * 3 + row];
            }
        }
        Geometry {
            spacing: self.spacing,
            origin: self.offset,
            direction,
        }
    }

    /// 体素总数.
    #[inline]
    fn len(&self) -> usize {
        self.dim_size.iter().product()
    }
}

/// 读取 `.mhd` 文件及其数据, 返回 `(z, H, W)` 格式的数组和几何元信息.
pub(crate) fn read<T: MetaVoxel>(path: &Path) -> Result<(Array3<T>, Geometry)> {
    let bytes = fs::read(path)?;
    let (header, data_start) = MetaHeader::parse(&bytes)?;

    let stored = if header.data_file.eq_ignore_ascii_case("LOCAL") {
        bytes[data_start..].to_vec()
    } else if header.data_file.contains(' ') || header.data_file.eq_ignore_ascii_case("LIST") {
        return Err(ImageIoError::MalformedHeader(format!(
            "unsupported `ElementDataFile`: {}",
            header.data_file
        )));
    } else {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::read(dir.join(&header.data_file))?
    };

    let raw = if header.compressed {
        let mut buf = Vec::with_capacity(header.len() * header.element.size());
        ZlibDecoder::new(stored.as_slice()).read_to_end(&mut buf)?;
        buf
    } else {
        stored
    };

    let elem = header.element;
    let expected = header.len() * elem.size();
    // LOCAL 数据之后可能还有多余字节 (例如换行), 只要求不短于期望长度.
    if raw.len() < expected {
        return Err(ImageIoError::DataLength {
            expected,
            actual: raw.len(),
        });
    }

    let voxels = raw[..expected]
        .chunks_exact(elem.size())
        .map(|b| {
            let v = elem.decode(b, header.msb);
            num::cast::<f64, T>(v).ok_or(ImageIoError::ValueOutOfRange(v))
        })
        .collect::<Result<Vec<T>>>()?;

    let [x, y, z] = header.dim_size;
    let data = Array3::from_shape_vec((z, y, x), voxels).map_err(|_| ImageIoError::DataLength {
        expected,
        actual: raw.len(),
    })?;
    Ok((data, header.geometry()))
}

/// 写出 `.mhd` 头部与同名 `.raw` 数据文件.
pub(crate) fn write<T: MetaVoxel>(data: ArrayView3<'_, T>, geometry: &Geometry, path: &Path) -> Result<()> {
    let raw_path = path.with_extension("raw");
    let raw_name = raw_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ImageIoError::UnsupportedFormat(path.to_owned()))?
        .to_string();

    let header = MetaHeader::for_writing(geometry, data.dim(), T::ELEMENT, raw_name);
    let mut buf = Vec::with_capacity(data.len() * T::ELEMENT.size());
    // (z, H, W) 的行优先遍历即 MetaImage 的 x 最快顺序.
    for &v in data.iter() {
        v.put_le(&mut buf);
    }
    fs::write(&raw_path, buf)?;
    fs::write(path, header.to_text())?;
    Ok(())
}
