//! 影像读写错误.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// 影像读写错误.
#[derive(Error, Debug)]
pub enum ImageIoError {
    /// nifti 文件解析错误.
    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::NiftiError),

    /// 底层 I/O 错误.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// 无法由扩展名判断文件格式.
    #[error("unsupported image format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    /// MetaImage 头部缺少字段或字段非法.
    #[error("malformed MetaImage header: {0}")]
    MalformedHeader(String),

    /// 不支持的 MetaImage 体素类型.
    #[error("unsupported element type `{0}`")]
    UnsupportedElement(String),

    /// 不是三维单通道数据.
    #[error("expected a 3D single-channel image, found {0} dimensions")]
    NotVolumetric(usize),

    /// 体素数据长度与形状不符.
    #[error("voxel data length mismatch: expected {expected} bytes, found {actual}")]
    DataLength {
        /// 由形状与体素类型推得的期望长度.
        expected: usize,
        /// 实际长度.
        actual: usize,
    },

    /// 体素值无法转换为目标类型.
    #[error("voxel value {0} does not fit the target type")]
    ValueOutOfRange(f64),
}
