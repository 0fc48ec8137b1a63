//! List Steps Command

use clap::Args;
use serde::Serialize;

use sar_engine::config::{ConditionExpr, WaitCondition};
use sar_engine::{Step, StepAction};

use crate::commands::{load_validated, ConfigArgs};
use crate::exit::ExitCode;
use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct ListStepsArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Step display wrapper for serialization
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRow {
    pub index: usize,
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

impl StepRow {
    pub fn new(index: usize, step: &Step) -> Self {
        let target = match &step.action {
            StepAction::Wait { until } => describe_wait(until),
            StepAction::Click { selector, .. } | StepAction::Input { selector, .. } => {
                selector.clone()
            }
            StepAction::Key { keys } => keys.join("+"),
            StepAction::Screenshot { name, .. } => name.clone(),
        };

        Self {
            index,
            id: step.id.clone(),
            step_type: step.kind().to_string(),
            target,
            when: step.when.as_ref().map(describe_condition),
        }
    }
}

impl TableDisplay for StepRow {
    fn headers() -> Vec<&'static str> {
        vec!["#", "ID", "Type", "Target", "When"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            format!("{:02}", self.index),
            self.id.clone(),
            self.step_type.clone(),
            self.target.clone(),
            self.when.clone().unwrap_or_else(|| "-".to_string()),
        ]
    }

    fn line(&self) -> String {
        let suffix = if self.step_type == "screenshot" {
            format!(" ({})", self.target)
        } else {
            String::new()
        };
        format!("{:02}. {} [{}]{}", self.index, self.id, self.step_type, suffix)
    }
}

fn describe_wait(condition: &WaitCondition) -> String {
    match condition {
        WaitCondition::WindowTitle { contains } => format!("title~{}", contains),
        WaitCondition::Text {
            contains,
            selector: Some(selector),
        } => format!("{} ~{}", selector, contains),
        WaitCondition::Text {
            contains,
            selector: None,
        } => format!("text~{}", contains),
        WaitCondition::Selector { selector, state } => {
            format!("{} ({})", selector, state.unwrap_or_default().as_str())
        }
        WaitCondition::Timeout { ms } => format!("{}ms", ms),
    }
}

fn describe_condition(expr: &ConditionExpr) -> String {
    match expr {
        ConditionExpr::Exists { selector } => format!("exists {}", selector),
        ConditionExpr::TextContains {
            text,
            selector: Some(selector),
        } => format!("{} contains {:?}", selector, text),
        ConditionExpr::TextContains {
            text,
            selector: None,
        } => format!("contains {:?}", text),
        ConditionExpr::Not { expr } => format!("not ({})", describe_condition(expr)),
    }
}

pub fn execute(args: ListStepsArgs) -> ExitCode {
    let config = match load_validated(&args.config.config) {
        Ok(config) => config,
        Err(code) => return code,
    };

    let rows: Vec<StepRow> = config
        .scenario
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| StepRow::new(i + 1, step))
        .collect();
    print_list(&rows, args.format);
    ExitCode::Success
}
