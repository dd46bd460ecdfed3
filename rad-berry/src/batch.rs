//! 批处理驱动.
//!
//! 按命名规则在掩膜目录中发现受试者, 逐个执行提取矩阵.
//! 受试者之间失败隔离: 一个受试者无法读取或几何不兼容, 不影响其余受试者.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{error, info};

use crate::engine::FeatureEngine;
use crate::error::ExtractError;
use crate::runner::{ExtractionMatrix, SubjectReport};
use crate::sink::ResultSink;
use crate::SubjectData;

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_dataset_dir()?;
    ans.extend(it);
    Some(ans)
}

/// 受试者文件命名规则.
///
/// 掩膜文件名为 `<id><mask_suffix>`, 对应的影像文件名为 `<id><image_suffix>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingScheme {
    /// 掩膜文件名后缀, 默认 `_segmentation.mhd`.
    pub mask_suffix: String,

    /// 影像文件名后缀, 默认 `_normalized.mhd`.
    pub image_suffix: String,
}

impl Default for NamingScheme {
    fn default() -> Self {
        Self {
            mask_suffix: "_segmentation.mhd".into(),
            image_suffix: "_normalized.mhd".into(),
        }
    }
}

impl NamingScheme {
    /// 从掩膜文件名解析受试者标识. 不符合规则时返回 `None`.
    pub fn subject_of<'a>(&self, mask_name: &'a str) -> Option<&'a str> {
        mask_name
            .strip_suffix(self.mask_suffix.as_str())
            .filter(|id| !id.is_empty())
    }

    /// 受试者 `id` 的掩膜文件名.
    #[inline]
    pub fn mask_name(&self, id: &str) -> String {
        format!("{id}{}", self.mask_suffix)
    }

    /// 受试者 `id` 的影像文件名.
    #[inline]
    pub fn image_name(&self, id: &str) -> String {
        format!("{id}{}", self.image_suffix)
    }
}

/// 单个受试者的输入文件.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPaths {
    /// 受试者标识, 也是结果文件名的前缀.
    pub id: String,

    /// 影像文件.
    pub image: PathBuf,

    /// 掩膜文件.
    pub mask: PathBuf,
}

impl SubjectPaths {
    /// 创建.
    pub fn new(id: impl Into<String>, image: impl Into<PathBuf>, mask: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            image: image.into(),
            mask: mask.into(),
        }
    }

    /// 读取影像与掩膜, 并校正几何.
    #[inline]
    pub fn open(&self) -> Result<SubjectData, ExtractError> {
        SubjectData::open(&self.image, &self.mask)
    }
}

/// 在 `mask_dir` 中按 `scheme` 发现全部受试者, 按标识排序.
///
/// # 注意
///
/// 只检查掩膜文件; 影像文件缺失会在读取该受试者时以
/// [`ExtractError::Input`] 报告.
pub fn discover<P: AsRef<Path>, Q: AsRef<Path>>(
    image_dir: P,
    mask_dir: Q,
    scheme: &NamingScheme,
) -> io::Result<Vec<SubjectPaths>> {
    let image_dir = image_dir.as_ref();
    let mut ans = Vec::new();
    for entry in fs::read_dir(mask_dir)? {
        let entry = entry?;
        if !entry.path().is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(id) = name.to_str().and_then(|n| scheme.subject_of(n)) else {
            continue;
        };
        ans.push(SubjectPaths::new(
            id,
            image_dir.join(scheme.image_name(id)),
            entry.path(),
        ));
    }
    ans.sort_unstable_by(|a, b| a.id.cmp(&b.id));
    Ok(ans)
}

/// 批处理汇总, 按受试者顺序排列.
#[derive(Debug, Default)]
pub struct BatchSummary {
    subjects: Vec<(String, Result<SubjectReport, ExtractError>)>,
}

impl BatchSummary {
    /// 每个受试者的结果.
    #[inline]
    pub fn subjects(&self) -> &[(String, Result<SubjectReport, ExtractError>)] {
        &self.subjects
    }

    /// 获取受试者 `id` 的结果.
    pub fn get(&self, id: &str) -> Option<&Result<SubjectReport, ExtractError>> {
        self.subjects.iter().find(|(s, _)| s == id).map(|(_, r)| r)
    }

    /// 完成提取矩阵 (不论其中组合是否成功) 的受试者个数.
    pub fn completed(&self) -> usize {
        self.subjects.iter().filter(|(_, r)| r.is_ok()).count()
    }

    /// 受试者级失败的个数.
    pub fn failed(&self) -> usize {
        self.subjects.len() - self.completed()
    }

    /// 写出的结果文件总数.
    pub fn artifacts(&self) -> usize {
        self.subjects
            .iter()
            .filter_map(|(_, r)| r.as_ref().ok())
            .map(SubjectReport::succeeded)
            .sum()
    }

    /// 是否所有受试者的所有组合都成功?
    pub fn is_clean(&self) -> bool {
        self.subjects
            .iter()
            .all(|(_, r)| r.as_ref().is_ok_and(|rep| rep.failed() == 0))
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} subjects: {} completed, {} failed, {} artifacts written",
            self.subjects.len(),
            self.completed(),
            self.failed(),
            self.artifacts()
        )
    }
}

fn run_one<E, S>(
    matrix: &ExtractionMatrix<E, S>,
    paths: &SubjectPaths,
) -> (String, Result<SubjectReport, ExtractError>)
where
    E: FeatureEngine,
    S: ResultSink,
{
    let result = paths.open().and_then(|data| matrix.run(&paths.id, &data));
    if let Err(e) = &result {
        error!("subject `{}` skipped: {e}", paths.id);
    }
    (paths.id.clone(), result)
}

/// 依次处理全部受试者.
pub fn run_batch<E, S>(subjects: &[SubjectPaths], matrix: &ExtractionMatrix<E, S>) -> BatchSummary
where
    E: FeatureEngine,
    S: ResultSink,
{
    info!("processing {} subjects", subjects.len());
    let summary = BatchSummary {
        subjects: subjects.iter().map(|p| run_one(matrix, p)).collect(),
    };
    info!("{summary}");
    summary
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::prelude::*;

        /// 借助 `rayon`, 并行处理全部受试者. 汇总顺序与 `subjects` 相同.
        pub fn par_run_batch<E, S>(
            subjects: &[SubjectPaths],
            matrix: &ExtractionMatrix<E, S>,
        ) -> BatchSummary
        where
            E: FeatureEngine + Sync,
            S: ResultSink + Sync,
        {
            info!("processing {} subjects in parallel", subjects.len());
            let summary = BatchSummary {
                subjects: subjects.par_iter().map(|p| run_one(matrix, p)).collect(),
            };
            info!("{summary}");
            summary
        }
    }
}
