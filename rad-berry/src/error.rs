//! 运行时错误.
//!
//! 组合级错误 ([`ExtractError::EmptyRegion`], [`ExtractError::EngineComputation`],
//! [`ExtractError::Persistence`]) 不会越过提取矩阵向上传播;
//! 受试者级错误 ([`ExtractError::GeometryMismatch`],
//! [`ExtractError::EngineGeometryMismatch`], [`ExtractError::Input`])
//! 不会越过批处理驱动.

use std::io;

use thiserror::Error;

use crate::engine::EngineError;
use crate::feature::FeatureClass;
use crate::io::ImageIoError;
use crate::region::Region;
use crate::Idx3d;

/// 提取流水线错误.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// 影像与掩膜网格不兼容且无法校正. 受试者级, 28 个组合全部跳过.
    #[error("volume grid {volume:?} and mask grid {mask:?} are incompatible")]
    GeometryMismatch {
        /// 影像形状, `(z, H, W)`.
        volume: Idx3d,
        /// 掩膜形状, `(z, H, W)`.
        mask: Idx3d,
    },

    /// 外部引擎报告影像与掩膜几何不兼容且无法校正. 受试者级, 剩余组合全部跳过.
    #[error("engine rejected the volume/mask geometry on `{region}_{class}`: {reason}")]
    EngineGeometryMismatch {
        /// 报告该错误的分区.
        region: Region,
        /// 报告该错误的特征族.
        class: FeatureClass,
        /// 引擎给出的原因.
        reason: String,
    },

    /// 分区掩膜不含前景体素. 只跳过该分区的提取.
    #[error("region `{region}` has no foreground voxels")]
    EmptyRegion {
        /// 空分区.
        region: Region,
    },

    /// 外部引擎在某个 (分区, 特征族) 组合上失败. 只跳过该组合.
    #[error("engine failed on `{region}_{class}`: {source}")]
    EngineComputation {
        /// 分区.
        region: Region,
        /// 特征族.
        class: FeatureClass,
        /// 引擎报告的底层错误.
        #[source]
        source: EngineError,
    },

    /// 结果文件写入失败 (已重试).
    #[error("cannot persist artifact `{key}`: {source}")]
    Persistence {
        /// 结果文件键, 形如 `{subject}_{region}_{class}`.
        key: String,
        /// 底层 I/O 错误.
        #[source]
        source: io::Error,
    },

    /// 受试者输入无法读取.
    #[error("unreadable input: {0}")]
    Input(#[from] ImageIoError),
}

impl ExtractError {
    /// 是否是受试者级 (致命) 错误?
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::GeometryMismatch { .. } | Self::EngineGeometryMismatch { .. } | Self::Input(_)
        )
    }

    /// 是否是因为分区为空而跳过?
    #[inline]
    pub fn is_empty_region(&self) -> bool {
        matches!(self, Self::EmptyRegion { .. })
    }
}
