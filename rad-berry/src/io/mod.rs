//! 影像读写. 支持 `.nii`, `.nii.gz` 和 `.mhd` 格式.
//!
//! 所有读写均保留 spacing/origin/direction. 格式由文件扩展名决定.

use std::path::Path;

use crate::{Mask, SpatialAttr, Volume};

mod error;
mod meta;
mod nii;

pub use error::ImageIoError;
pub use meta::MetaHeader;

/// 影像读写结果.
pub type Result<T> = std::result::Result<T, ImageIoError>;

/// 体数据文件格式.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ImageFormat {
    /// 未压缩 nifti, `.nii`.
    Nifti,

    /// gzip 压缩 nifti, `.nii.gz`.
    NiftiGz,

    /// MetaImage 头部 + 数据文件, `.mhd`.
    MetaImage,
}

impl ImageFormat {
    /// 由扩展名判断格式 (不区分大小写).
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if name.ends_with(".nii.gz") {
            Ok(Self::NiftiGz)
        } else if name.ends_with(".nii") {
            Ok(Self::Nifti)
        } else if name.ends_with(".mhd") {
            Ok(Self::MetaImage)
        } else {
            Err(ImageIoError::UnsupportedFormat(path.to_owned()))
        }
    }

    /// 文件名去掉该格式扩展名后剩余的部分.
    pub fn strip<'a>(&self, file_name: &'a str) -> &'a str {
        let ext_len = match self {
            Self::Nifti => ".nii".len(),
            Self::NiftiGz => ".nii.gz".len(),
            Self::MetaImage => ".mhd".len(),
        };
        &file_name[..file_name.len().saturating_sub(ext_len)]
    }
}

/// 读取 3D 影像. 体素值转换为 `f32`.
pub fn read_volume<P: AsRef<Path>>(path: P) -> Result<Volume> {
    let path = path.as_ref();
    let (data, geometry) = match ImageFormat::from_path(path)? {
        ImageFormat::Nifti | ImageFormat::NiftiGz => nii::read_f32(path)?,
        ImageFormat::MetaImage => meta::read(path)?,
    };
    Ok(Volume::new(data, geometry))
}

/// 读取 3D 掩膜. 体素值转换为 `u8`.
pub fn read_mask<P: AsRef<Path>>(path: P) -> Result<Mask> {
    let path = path.as_ref();
    let (data, geometry) = match ImageFormat::from_path(path)? {
        ImageFormat::Nifti | ImageFormat::NiftiGz => nii::read_u8(path)?,
        ImageFormat::MetaImage => meta::read(path)?,
    };
    Ok(Mask::new(data, geometry))
}

/// 写出 3D 影像. MetaImage 格式会在同一目录下额外写出 `.raw` 数据文件.
pub fn write_volume<P: AsRef<Path>>(volume: &Volume, path: P) -> Result<()> {
    let path = path.as_ref();
    match ImageFormat::from_path(path)? {
        ImageFormat::Nifti | ImageFormat::NiftiGz => {
            nii::write_f32(volume.data(), volume.geometry(), path)
        }
        ImageFormat::MetaImage => meta::write(volume.data(), volume.geometry(), path),
    }
}

/// 写出 3D 掩膜. MetaImage 格式会在同一目录下额外写出 `.raw` 数据文件.
pub fn write_mask<P: AsRef<Path>>(mask: &Mask, path: P) -> Result<()> {
    let path = path.as_ref();
    match ImageFormat::from_path(path)? {
        ImageFormat::Nifti | ImageFormat::NiftiGz => nii::write_u8(mask.data(), mask.geometry(), path),
        ImageFormat::MetaImage => meta::write(mask.data(), mask.geometry(), path),
    }
}

/// 将掩膜文件从一种格式转换为另一种格式, 例如 `.nii.gz` 转为 `.mhd`.
#[inline]
pub fn convert_mask<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output: Q) -> Result<()> {
    write_mask(&read_mask(input)?, output)
}
