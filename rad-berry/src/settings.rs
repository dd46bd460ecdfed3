//! 特征引擎的量化参数推导.

use itertools::{Itertools, MinMaxResult};
use ndarray::{ArrayView3, Zip};
use serde::Serialize;
use thiserror::Error;

use crate::consts::label::is_foreground;
use crate::consts::BIN_COUNT;
use crate::{Mask, Volume};

/// 掩膜中没有前景体素, 无法统计强度范围.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("mask contains no foreground voxels")]
pub struct EmptyRegionError;

/// 传给特征引擎的提取参数.
///
/// 字段名按 pyradiomics 的命名序列化.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionSettings {
    /// 强度量化步长.
    pub bin_width: f64,

    /// 让引擎在几何不一致时校正掩膜而不是直接失败. 固定为 `true`.
    pub correct_mask: bool,
}

impl ExtractionSettings {
    /// 由强度范围计算, 把范围均分为 [`BIN_COUNT`] 份.
    #[inline]
    pub fn from_range(intensity_range: f64) -> Self {
        Self {
            bin_width: intensity_range / BIN_COUNT as f64,
            correct_mask: true,
        }
    }

    /// 为 `mask` 覆盖的 `volume` 体素推导参数.
    #[inline]
    pub fn derive(volume: &Volume, mask: &Mask) -> Result<Self, EmptyRegionError> {
        derive_settings(volume.data(), mask.data())
    }
}

/// 计算 `mask == 1` 处 `volume` 体素的 `max - min`, 得到 `bin_width = range / 64`.
///
/// 每个分区都应使用各自的掩膜独立调用, 不要跨分区复用结果.
/// 掩膜没有前景时返回 [`EmptyRegionError`].
///
/// 两者形状不一致时程序 panic.
pub fn derive_settings(
    volume: ArrayView3<'_, f32>,
    mask: ArrayView3<'_, u8>,
) -> Result<ExtractionSettings, EmptyRegionError> {
    let mut masked = Vec::new();
    Zip::from(&volume).and(&mask).for_each(|&v, &m| {
        if is_foreground(m) {
            masked.push(v);
        }
    });

    let range = match masked.into_iter().minmax_by(f32::total_cmp) {
        MinMaxResult::NoElements => return Err(EmptyRegionError),
        MinMaxResult::OneElement(_) => 0.0,
        MinMaxResult::MinMax(lo, hi) => hi as f64 - lo as f64,
    };
    Ok(ExtractionSettings::from_range(range))
}
