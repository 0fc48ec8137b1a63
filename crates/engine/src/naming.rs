//! Screenshot file name templates

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static PADDED_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{index:(\d+)\}").expect("valid index pattern"));

static UNSAFE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9._-]+").expect("valid sanitize pattern"));

/// Render a file name template.
///
/// `{index:NN}` is zero-padded to `NN` digits, `{index}` is the bare number
/// and `{name}` is the sanitized step name.
pub fn resolve_template(template: &str, index: u32, name: &str) -> String {
    let padded = PADDED_INDEX.replace_all(template, |caps: &Captures<'_>| {
        let width: usize = caps[1].parse().unwrap_or(0);
        format!("{:0width$}", index, width = width)
    });

    padded
        .replace("{index}", &index.to_string())
        .replace("{name}", &sanitize_name(name))
}

/// Lower-case `input` and collapse every run of characters outside
/// `[a-z0-9._-]` into a single hyphen.
pub fn sanitize_name(input: &str) -> String {
    UNSAFE_RUN
        .replace_all(&input.to_lowercase(), "-")
        .into_owned()
}
