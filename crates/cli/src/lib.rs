//! SAR CLI
//!
//! Command-line front end for the screenshot automation runner:
//! validate a config, list its steps, or run the scenario.

pub mod commands;
pub mod exit;
pub mod output;
