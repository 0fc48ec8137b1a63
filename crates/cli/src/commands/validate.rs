//! Validate Command

use crate::commands::{load_validated, ConfigArgs};
use crate::exit::ExitCode;
use crate::output::print_success;

pub fn execute(args: ConfigArgs) -> ExitCode {
    match load_validated(&args.config) {
        Ok(config) => {
            print_success(&format!(
                "Config is valid: {} step(s) in scenario '{}'",
                config.scenario.steps.len(),
                config.scenario.name
            ));
            ExitCode::Success
        }
        Err(code) => code,
    }
}
