//! 清单文件 (`paths.txt`) 与运行计划.
//!
//! 清单文件由 3 或 4 个非空行组成:
//!
//! 1. 影像路径;
//! 2. 掩膜路径;
//! 3. 结果目录;
//! 4. 受试者标识 (仅单受试者模式需要).
//!
//! 若影像路径与掩膜路径都是目录, 则为批处理模式, 否则为单受试者模式.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rad_berry::batch::{self, NamingScheme, SubjectPaths};
use thiserror::Error;

/// 配置错误.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 清单文件无法读取.
    #[error("cannot read manifest `{path}`: {source}")]
    Read {
        /// 清单路径.
        path: PathBuf,
        /// 底层 I/O 错误.
        #[source]
        source: io::Error,
    },

    /// 清单行数不足.
    #[error("manifest needs image, mask and results lines, found {0} line(s)")]
    TooShort(usize),

    /// 单受试者模式缺少受试者标识.
    #[error("single-subject manifest needs a subject id on line 4")]
    MissingSubject,

    /// 影像与掩膜一个是目录, 另一个不是.
    #[error("`{image}` and `{mask}` must both be files or both be directories")]
    MixedInputs {
        /// 影像路径.
        image: PathBuf,
        /// 掩膜路径.
        mask: PathBuf,
    },

    /// 必需的环境变量未设置.
    #[error("environment variable `{0}` is not set")]
    MissingEnv(&'static str),

    /// 无法确定用户主目录.
    #[error("cannot locate the home directory")]
    NoHome,
}

/// 清单文件内容.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// 影像文件或目录.
    pub image: PathBuf,

    /// 掩膜文件或目录.
    pub mask: PathBuf,

    /// 结果目录.
    pub results: PathBuf,

    /// 受试者标识.
    pub subject: Option<String>,
}

impl FromStr for Manifest {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lines: Vec<&str> = s.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        let [image, mask, results, rest @ ..] = lines.as_slice() else {
            return Err(ConfigError::TooShort(lines.len()));
        };
        Ok(Self {
            image: PathBuf::from(*image),
            mask: PathBuf::from(*mask),
            results: PathBuf::from(*results),
            subject: rest.first().map(|s| s.to_string()),
        })
    }
}

impl Manifest {
    /// 读取清单文件.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        fs::read_to_string(path)
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?
            .parse()
    }

    /// 转换为运行计划.
    pub fn plan(&self) -> Result<Plan, ConfigError> {
        match (self.image.is_dir(), self.mask.is_dir()) {
            (true, true) => Ok(Plan::Batch {
                image_dir: self.image.clone(),
                mask_dir: self.mask.clone(),
                results: self.results.clone(),
            }),
            (false, false) => {
                let id = self.subject.as_deref().ok_or(ConfigError::MissingSubject)?;
                Ok(Plan::Single {
                    subject: SubjectPaths::new(id, &self.image, &self.mask),
                    results: self.results.clone(),
                })
            }
            _ => Err(ConfigError::MixedInputs {
                image: self.image.clone(),
                mask: self.mask.clone(),
            }),
        }
    }
}

/// 运行计划.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// 单个受试者.
    Single {
        /// 受试者输入.
        subject: SubjectPaths,
        /// 结果目录.
        results: PathBuf,
    },

    /// 在目录中发现的全部受试者.
    Batch {
        /// 影像目录.
        image_dir: PathBuf,
        /// 掩膜目录.
        mask_dir: PathBuf,
        /// 结果目录.
        results: PathBuf,
    },
}

impl Plan {
    /// 结果目录.
    pub fn results(&self) -> &Path {
        match self {
            Self::Single { results, .. } | Self::Batch { results, .. } => results,
        }
    }

    /// 列出要处理的受试者.
    pub fn subjects(&self, scheme: &NamingScheme) -> io::Result<Vec<SubjectPaths>> {
        match self {
            Self::Single { subject, .. } => Ok(vec![subject.clone()]),
            Self::Batch {
                image_dir,
                mask_dir,
                ..
            } => batch::discover(image_dir, mask_dir, scheme),
        }
    }
}
