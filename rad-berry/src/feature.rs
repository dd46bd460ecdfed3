//! 特征族, 引擎原始输出的规范化, 以及单组特征结果.

use std::fmt;

use log::warn;
use serde::ser::{Serialize, Serializer};

use crate::region::Region;

/// 特征族. 各族的具体特征与公式由外部引擎定义.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureClass {
    /// 一阶强度统计.
    FirstOrder,

    /// 三维形状.
    Shape,

    /// 灰度共生矩阵.
    Glcm,

    /// 灰度游程矩阵.
    Glrlm,

    /// 灰度区域大小矩阵.
    Glszm,

    /// 邻域灰度差矩阵.
    Ngtdm,

    /// 灰度依赖矩阵.
    Gldm,
}

impl FeatureClass {
    /// 提取矩阵的固定特征族顺序.
    pub const ALL: [FeatureClass; 7] = [
        Self::FirstOrder,
        Self::Shape,
        Self::Glcm,
        Self::Glrlm,
        Self::Glszm,
        Self::Ngtdm,
        Self::Gldm,
    ];

    /// 引擎和结果文件名使用的名称.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FirstOrder => "firstorder",
            Self::Shape => "shape",
            Self::Glcm => "glcm",
            Self::Glrlm => "glrlm",
            Self::Glszm => "glszm",
            Self::Ngtdm => "ngtdm",
            Self::Gldm => "gldm",
        }
    }
}

impl fmt::Display for FeatureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 引擎返回的单个原始值.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineValue {
    /// 普通标量.
    Scalar(f64),

    /// 数组形式的值. 零维或单元素数组会被规范化为标量.
    Array(Vec<f64>),

    /// 引擎无法为该分区/特征族计算此值.
    Missing,
}

/// 引擎的原始输出, 保持引擎给出的顺序.
pub type RawFeatures = Vec<(String, EngineValue)>;

/// 将原始值规范化为可无损序列化的 `f64`. 无法计算的值以 `NaN` 表示,
/// 落盘时写作 `null`, 而不是被丢弃.
///
/// 多元素数组不是标量, 同样记为 `NaN`.
pub fn normalize_value(name: &str, value: EngineValue) -> f64 {
    match value {
        EngineValue::Scalar(v) => v,
        EngineValue::Array(v) => match v.as_slice() {
            [x] => *x,
            _ => {
                warn!(
                    "feature `{name}` is an array of {} elements, stored as null",
                    v.len()
                );
                f64::NAN
            }
        },
        EngineValue::Missing => f64::NAN,
    }
}

/// 结果文件键: (受试者, 分区, 特征族).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactKey {
    /// 受试者标识.
    pub subject: String,

    /// 分区.
    pub region: Region,

    /// 特征族.
    pub class: FeatureClass,
}

impl ArtifactKey {
    /// 构造键.
    #[inline]
    pub fn new(subject: impl Into<String>, region: Region, class: FeatureClass) -> Self {
        Self {
            subject: subject.into(),
            region,
            class,
        }
    }
}

impl fmt::Display for ArtifactKey {
    /// `{subject}_{region}_{class}`, 也就是结果文件名主干.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.subject, self.region, self.class)
    }
}

/// 单个 (分区, 特征族) 组合的特征结果.
///
/// 序列化时只输出 `特征名 -> 数值` 的有序映射, 顺序与引擎输出一致.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureResult {
    key: ArtifactKey,
    features: Vec<(String, f64)>,
}

impl FeatureResult {
    /// 规范化引擎原始输出并附上键.
    pub fn from_raw(key: ArtifactKey, raw: RawFeatures) -> Self {
        let features = raw
            .into_iter()
            .map(|(name, value)| {
                let v = normalize_value(&name, value);
                (name, v)
            })
            .collect();
        Self { key, features }
    }

    /// 获取键.
    #[inline]
    pub fn key(&self) -> &ArtifactKey {
        &self.key
    }

    /// 获取特征, 按引擎顺序.
    #[inline]
    pub fn features(&self) -> &[(String, f64)] {
        &self.features
    }

    /// 按名称查找特征值.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.features
            .iter()
            .find_map(|(n, v)| (n == name).then_some(*v))
    }

    /// 特征个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// 是否没有任何特征?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl Serialize for FeatureResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.features.iter().map(|(k, v)| (k, v)))
    }
}
