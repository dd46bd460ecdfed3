//! 对 `rad-berry::batch` 的更一层封装. 从环境变量或默认目录获取运行配置.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use rad_berry::batch::home_dataset_dir_with;
use rad_berry::engine::CommandEngine;

use crate::manifest::{ConfigError, Manifest, Plan};

/// 清单文件路径.
pub const MANIFEST_VAR: &str = "RAD_MANIFEST";

/// 影像目录.
pub const IMAGE_DIR_VAR: &str = "RAD_IMAGE_DIR";

/// 掩膜目录.
pub const MASK_DIR_VAR: &str = "RAD_MASK_DIR";

/// 结果目录.
pub const RESULTS_DIR_VAR: &str = "RAD_RESULTS_DIR";

/// 特征引擎可执行文件.
pub const ENGINE_VAR: &str = "RAD_ENGINE";

/// 特征引擎的前置参数, 以空白分隔.
pub const ENGINE_ARGS_VAR: &str = "RAD_ENGINE_ARGS";

/// 当前目录下的默认清单文件名.
pub const DEFAULT_MANIFEST: &str = "paths.txt";

#[inline]
fn non_empty_var(key: &str) -> Option<OsString> {
    env::var_os(key).filter(|v| !v.is_empty())
}

fn dir_from_env_or_home(key: &str, sub: &str) -> Result<PathBuf, ConfigError> {
    match non_empty_var(key) {
        Some(d) => Ok(PathBuf::from(d)),
        None => home_dataset_dir_with([sub]).ok_or(ConfigError::NoHome),
    }
}

/// 获取影像目录.
///
/// 1. 若环境变量 `$RAD_IMAGE_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/image`.
pub fn image_dir_from_env_or_home() -> Result<PathBuf, ConfigError> {
    dir_from_env_or_home(IMAGE_DIR_VAR, "image")
}

/// 获取掩膜目录.
///
/// 1. 若环境变量 `$RAD_MASK_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/mask`.
pub fn mask_dir_from_env_or_home() -> Result<PathBuf, ConfigError> {
    dir_from_env_or_home(MASK_DIR_VAR, "mask")
}

/// 获取结果目录.
///
/// 1. 若环境变量 `$RAD_RESULTS_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/results`.
pub fn results_dir_from_env_or_home() -> Result<PathBuf, ConfigError> {
    dir_from_env_or_home(RESULTS_DIR_VAR, "results")
}

/// 查找清单文件: `$RAD_MANIFEST`, 其次是当前目录下的 `paths.txt`.
/// 都不存在时返回 `None`.
pub fn manifest_from_env_or_cwd() -> Option<PathBuf> {
    non_empty_var(MANIFEST_VAR)
        .map(PathBuf::from)
        .or_else(|| Some(PathBuf::from(DEFAULT_MANIFEST)).filter(|p| p.is_file()))
}

/// 由环境变量或默认目录组成的批处理计划.
pub fn batch_plan_from_env_or_home() -> Result<Plan, ConfigError> {
    Ok(Plan::Batch {
        image_dir: image_dir_from_env_or_home()?,
        mask_dir: mask_dir_from_env_or_home()?,
        results: results_dir_from_env_or_home()?,
    })
}

/// 确定运行计划.
///
/// 1. 若给出了 `manifest`, 则读取它;
/// 2. 否则若能找到清单文件 (见 [`manifest_from_env_or_cwd`]), 则读取它;
/// 3. 否则使用 [`batch_plan_from_env_or_home`].
pub fn plan<P: AsRef<Path>>(manifest: Option<P>) -> Result<Plan, ConfigError> {
    let path = manifest
        .map(|p| p.as_ref().to_path_buf())
        .or_else(manifest_from_env_or_cwd);
    match path {
        Some(p) => Manifest::read(p)?.plan(),
        None => batch_plan_from_env_or_home(),
    }
}

/// 由 `$RAD_ENGINE` 与 `$RAD_ENGINE_ARGS` 创建外部命令引擎.
pub fn engine_from_env() -> Result<CommandEngine, ConfigError> {
    let program = non_empty_var(ENGINE_VAR).ok_or(ConfigError::MissingEnv(ENGINE_VAR))?;
    let args = env::var(ENGINE_ARGS_VAR).unwrap_or_default();
    Ok(CommandEngine::new(program).args(args.split_whitespace()))
}

/// 并行提取的线程数.
pub const JOBS_VAR: &str = "RAD_JOBS";

/// 获取线程数.
///
/// 1. 若环境变量 `$RAD_JOBS` 是正整数, 则返回其值;
/// 2. 否则, 返回可用核心数.
pub fn jobs_from_env_or_cpus() -> usize {
    env::var(JOBS_VAR)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .filter(|&n: &usize| n > 0)
        .unwrap_or_else(crate::cpus)
}
