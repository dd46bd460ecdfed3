//! 外部特征计算引擎的接入点.
//!
//! 引擎是黑盒: 给定影像、二值掩膜、提取参数和要计算的特征族,
//! 返回 `特征名 -> 数值` 的映射.

use std::io;

use thiserror::Error;

use crate::feature::{FeatureClass, RawFeatures};
use crate::settings::ExtractionSettings;
use crate::{Mask, Volume};

mod command;

pub use command::CommandEngine;

/// 引擎运行时错误.
#[derive(Error, Debug)]
pub enum EngineError {
    /// 影像与掩膜几何不兼容, 且无法校正.
    #[error("volume and mask geometries are incompatible: {0}")]
    GeometryMismatch(String),

    /// 掩膜中没有前景.
    #[error("mask has no foreground")]
    EmptyMask,

    /// 计算过程失败.
    #[error("computation failed: {0}")]
    Computation(String),

    /// 引擎输出无法解析.
    #[error("malformed engine output: {0}")]
    Protocol(String),

    /// 与引擎交互时的底层 I/O 错误.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// 特征计算引擎.
///
/// 每次调用只计算 `class` 一个特征族. 实现必须是无状态的 (或内部同步的),
/// 以便提取矩阵并行调用.
pub trait FeatureEngine {
    /// 在 `mask` 覆盖的 `volume` 区域上计算 `class` 族特征.
    fn compute(
        &self,
        volume: &Volume,
        mask: &Mask,
        settings: &ExtractionSettings,
        class: FeatureClass,
    ) -> Result<RawFeatures, EngineError>;
}

impl<E: FeatureEngine + ?Sized> FeatureEngine for &E {
    #[inline]
    fn compute(
        &self,
        volume: &Volume,
        mask: &Mask,
        settings: &ExtractionSettings,
        class: FeatureClass,
    ) -> Result<RawFeatures, EngineError> {
        (**self).compute(volume, mask, settings, class)
    }
}
