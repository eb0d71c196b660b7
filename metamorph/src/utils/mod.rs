//! Small shared helpers.

mod duration;

pub use duration::{parse_duration, parse_optional_duration, DurationParseError};

/// Splits a command string on whitespace into an argument vector.
///
/// No quoting or escaping is recognised.
#[must_use]
pub fn split_fields(command: &str) -> Vec<String> {
    command.split_whitespace().map(String::from).collect()
}
