//! 对清单 (或环境变量) 指定的受试者执行区域分层的 radiomics 特征提取.
//!
//! 用法: `extract [paths.txt]`. 特征引擎由 `$RAD_ENGINE` 与 `$RAD_ENGINE_ARGS` 指定.
//!
//! 所有受试者都完成提取矩阵时退出码为 0, 否则为 1.

use std::env;
use std::error::Error;
use std::process::ExitCode;

use log::{error, info};
use rad_berry::batch::{self, BatchSummary};
use rad_berry::prelude::*;
use utils::loader;

fn run() -> Result<BatchSummary, Box<dyn Error>> {
    let plan = loader::plan(env::args_os().nth(1))?;
    let engine = loader::engine_from_env()?;
    let subjects = plan.subjects(&NamingScheme::default())?;
    let jobs = loader::jobs_from_env_or_cpus();

    info!(
        "engine `{}`, {} subject(s), {jobs} worker(s), results in `{}`",
        engine.program().display(),
        subjects.len(),
        plan.results().display()
    );
    rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build_global()?;

    let matrix = ExtractionMatrix::new(engine, JsonSink::new(plan.results()));
    Ok(batch::par_run_batch(&subjects, &matrix))
}

fn main() -> ExitCode {
    utils::init_logger();
    match run() {
        Ok(summary) => {
            utils::sep();
            for (id, result) in summary.subjects() {
                match result {
                    Ok(report) => println!("{report}"),
                    Err(e) => println!("`{id}`: {e}"),
                }
            }
            utils::sep();
            println!("{summary}");
            if summary.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
