//! 将目录中的 `*.nii.gz` 分割结果转换为 MetaImage 掩膜.
//!
//! 用法: `nii2mhd [input_dir] [output_dir]`.
//!
//! `<stem>.nii.gz` 被写为 `<output_dir>/<stem>_segmentation.mhd` (及 `.raw`).
//! 未给出目录时使用 `$HOME/dataset/prediction` 与掩膜目录
//! (见 [`utils::loader::mask_dir_from_env_or_home`]).

use std::env;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use log::{error, info};
use rad_berry::batch::{home_dataset_dir_with, NamingScheme};
use rad_berry::io::{self, ImageFormat};
use utils::loader;
use utils::manifest::ConfigError;

/// 列出 `dir` 下所有 `.nii.gz` 文件及其转换目标, 按文件名排序.
fn conversions(
    dir: &Path,
    out_dir: &Path,
    scheme: &NamingScheme,
) -> std::io::Result<Vec<(PathBuf, PathBuf)>> {
    let mut ans = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || !matches!(ImageFormat::from_path(&path), Ok(ImageFormat::NiftiGz)) {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let stem = ImageFormat::NiftiGz.strip(name);
        let target = out_dir.join(scheme.mask_name(stem));
        ans.push((path, target));
    }
    ans.sort_unstable();
    Ok(ans)
}

/// 转换全部文件, 返回失败个数.
fn convert_all(jobs: &[(PathBuf, PathBuf)]) -> usize {
    jobs.iter()
        .filter(|(src, dst)| match io::convert_mask(src, dst) {
            Ok(()) => {
                info!("{} -> {}", src.display(), dst.display());
                false
            }
            Err(e) => {
                error!("cannot convert {}: {e}", src.display());
                true
            }
        })
        .count()
}

fn run() -> Result<usize, Box<dyn Error>> {
    let mut args = env::args_os().skip(1).map(PathBuf::from);
    let input = match args.next() {
        Some(p) => p,
        None => home_dataset_dir_with(["prediction"]).ok_or(ConfigError::NoHome)?,
    };
    let output = match args.next() {
        Some(p) => p,
        None => loader::mask_dir_from_env_or_home()?,
    };

    fs::create_dir_all(&output)?;
    let jobs = conversions(&input, &output, &NamingScheme::default())?;
    info!("converting {} file(s) from `{}`", jobs.len(), input.display());
    Ok(convert_all(&jobs))
}

fn main() -> ExitCode {
    utils::init_logger();
    match run() {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            error!("{failed} file(s) failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
