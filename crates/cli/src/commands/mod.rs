//! CLI Commands

pub mod list_steps;
pub mod run;
pub mod validate;

use std::path::{Path, PathBuf};

use clap::Args;
use sar_engine::RunnerConfig;

use crate::exit::ExitCode;
use crate::output::print_error;

/// Arguments shared by every command
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Runner config file (.yaml, .yml or .json)
    #[arg(short, long)]
    pub config: PathBuf,
}

/// Load `path` and reject it when validation finds any issue.
///
/// Problems are reported on stderr; the caller only needs the exit code.
pub fn load_validated(path: &Path) -> Result<RunnerConfig, ExitCode> {
    let config = match RunnerConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            print_error(&format!("Config is invalid: {}", e));
            return Err(ExitCode::InvalidConfig);
        }
    };

    let issues = config.validate();
    if issues.is_empty() {
        return Ok(config);
    }

    print_error("Config is invalid:");
    for issue in &issues {
        eprintln!("  - {}", issue);
    }
    Err(ExitCode::InvalidConfig)
}
