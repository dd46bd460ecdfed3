//! 解剖分区: 全腺体, 尖部, 中部, 底部.
//!
//! 在掩膜所有含前景的切片索引 `S` (升序, `n = |S|`, `t = ⌊n / 3⌋`) 上:
//!
//! - 尖部 = `S[0..t]`
//! - 中部 = `S[t..n - t]`
//! - 底部 = `S[n - t..n]`
//!
//! 中部吸收余数, 所以尖部和底部总是恰好 `t` 层. `n < 3` 时尖部和底部为空.
//! 划分只看切片索引的先后, 不看方向元数据.

use std::fmt;

use itertools::Itertools;
use crate::consts::label::is_nonzero;
use crate::Mask;

/// 提取分区.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Region {
    /// 完整掩膜, 不做划分.
    Whole,

    /// 索引最小的三分之一.
    Apex,

    /// 中间部分, 吸收余数.
    Middle,

    /// 索引最大的三分之一.
    Base,
}

impl Region {
    /// 提取矩阵的固定分区顺序.
    pub const ALL: [Region; 4] = [Self::Whole, Self::Apex, Self::Middle, Self::Base];

    /// 结果文件名中使用的名称.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Whole => "whole",
            Self::Apex => "apex",
            Self::Middle => "middle",
            Self::Base => "base",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 收集所有含前景 (任一体素非零) 的切片索引, 升序.
pub fn foreground_slices(mask: &Mask) -> Vec<usize> {
    mask.slice_iter()
        .positions(|s| s.iter().copied().any(is_nonzero))
        .collect()
}

/// 含前景切片的三段划分结果. 三段互不相交, 并集为全部含前景切片, 各自升序.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionPartition {
    /// 尖部切片索引.
    pub apex: Vec<usize>,

    /// 中部切片索引.
    pub middle: Vec<usize>,

    /// 底部切片索引.
    pub base: Vec<usize>,
}

impl RegionPartition {
    /// 将升序的含前景切片索引划分为三段.
    pub fn from_slices(slices: &[usize]) -> Self {
        let n = slices.len();
        let t = n / 3;
        Self {
            apex: slices[..t].to_vec(),
            middle: slices[t..n - t].to_vec(),
            base: slices[n - t..].to_vec(),
        }
    }

    /// 划分 `mask` 的含前景切片.
    #[inline]
    pub fn of(mask: &Mask) -> Self {
        Self::from_slices(&foreground_slices(mask))
    }

    /// 含前景切片总数.
    #[inline]
    pub fn len(&self) -> usize {
        self.apex.len() + self.middle.len() + self.base.len()
    }

    /// 是否没有任何含前景切片?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 由 `mask` 构造三个分区掩膜.
///
/// 分区掩膜与 `mask` 同网格、同元信息, 只保留本分区的切片.
/// 空分区仍然得到结构合法的全背景掩膜, 以便后续统一报告为空分区.
#[derive(Debug, Clone)]
pub struct RegionMasks {
    /// 尖部掩膜.
    pub apex: Mask,

    /// 中部掩膜.
    pub middle: Mask,

    /// 底部掩膜.
    pub base: Mask,
}

impl RegionMasks {
    /// 按 `partition` 从 `mask` 构造分区掩膜.
    pub fn build(mask: &Mask, partition: &RegionPartition) -> Self {
        Self {
            apex: mask.retain_slices(&partition.apex),
            middle: mask.retain_slices(&partition.middle),
            base: mask.retain_slices(&partition.base),
        }
    }

    /// 获取 `region` 对应的分区掩膜; `Whole` 返回 `None`.
    #[inline]
    pub fn get(&self, region: Region) -> Option<&Mask> {
        match region {
            Region::Whole => None,
            Region::Apex => Some(&self.apex),
            Region::Middle => Some(&self.middle),
            Region::Base => Some(&self.base),
        }
    }
}
