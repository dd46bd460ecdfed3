//! 特征结果的持久化.
//!
//! 每个 (受试者, 分区, 特征族) 组合对应一个独立文件
//! `<subject>_<region>_<feature_class>.json`, 内容为按引擎顺序排列的
//! `特征名 -> 数值` JSON 对象. 同名文件会被覆盖, 因此重复运行是幂等的.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::consts::ARTIFACT_EXT;
use crate::feature::{ArtifactKey, FeatureResult};

/// 结果接收端.
///
/// 不同键的写入互不冲突, 实现应允许并发调用.
pub trait ResultSink {
    /// 持久化一组特征结果.
    fn persist(&self, result: &FeatureResult) -> io::Result<()>;
}

impl<S: ResultSink + ?Sized> ResultSink for &S {
    #[inline]
    fn persist(&self, result: &FeatureResult) -> io::Result<()> {
        (**self).persist(result)
    }
}

/// 将结果写为 JSON 文件的接收端.
#[derive(Debug, Clone)]
pub struct JsonSink {
    dir: PathBuf,
}

impl JsonSink {
    /// 以 `dir` 为输出目录. 目录不存在时会在首次写入前创建.
    #[inline]
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// 输出目录.
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `key` 对应的结果文件路径.
    #[inline]
    pub fn path_of(&self, key: &ArtifactKey) -> PathBuf {
        self.dir.join(format!("{key}.{ARTIFACT_EXT}"))
    }
}

impl ResultSink for JsonSink {
    /// 先写入同目录下的临时文件再重命名, 读者不会看到写了一半的文件.
    fn persist(&self, result: &FeatureResult) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut tmp, result)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path_of(result.key()))
            .map_err(|e| e.error)?;
        Ok(())
    }
}
