//! 对单个受试者运行切除区估计流水线.
//!
//! ```text
//! estimate <subject>
//! ```
//!
//! 数据根目录与参数见 [`loader`] 与 [`env_config`].

mod env_config;
mod error;
mod layout;
mod loader;

use std::env;
use std::error::Error as _;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use log::{info, LevelFilter};
use resect_map::{AllineateRegistrar, EstimateError, NativeRegistrar, Pipeline, PipelineConfig, SubjectPaths};
use simple_logger::SimpleLogger;

use crate::env_config::Backend;
use crate::error::ToolError;

fn main() -> ExitCode {
    // `RUST_LOG` 可覆盖默认级别.
    let _ = SimpleLogger::new().with_level(LevelFilter::Info).env().init();

    match run() {
        Ok(fused) => {
            println!("{}", fused.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            let mut source = e.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<PathBuf, ToolError> {
    let mut args = env::args().skip(1);
    let subject = match (args.next(), args.next()) {
        (Some(s), None) if !s.is_empty() => s,
        _ => return Err(ToolError::Usage),
    };

    let (config, backend) = env_config::from_env()?;
    let roots = layout::Roots::from_env_or_home()?;
    let layout = layout::discover(&roots, &subject)?;
    info!(
        "subject {}: reference anatomy from session `{}`",
        layout.subject, layout.session
    );
    layout::stage_inputs(&layout)?;

    Ok(estimate(layout.paths, config, backend)?)
}

fn estimate(paths: SubjectPaths, config: PipelineConfig, backend: Backend) -> Result<PathBuf, EstimateError> {
    match backend {
        Backend::Native => Pipeline::new(paths, config, NativeRegistrar::new(config.registration))?.run(),
        Backend::Allineate => {
            let scratch = paths.model_dir.join(".allineate");
            fs::create_dir_all(&scratch)?;
            Pipeline::new(paths, config, AllineateRegistrar::new(scratch))?.run()
        }
    }
}
