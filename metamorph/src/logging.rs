//! Subscriber setup for binaries.

use crate::config::LogSettings;
use tracing_subscriber::EnvFilter;

/// Set to a truthy value to include source locations in log lines.
pub const ENV_DEBUG: &str = "METAMORPH_DEBUG";

/// Installs a global `fmt` subscriber writing to stderr.
///
/// `RUST_LOG` overrides `settings.level`. Returns false if a subscriber
/// was already installed, which is not an error.
pub fn init(settings: &LogSettings) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));
    let debug = debug_flag(std::env::var(ENV_DEBUG).ok().as_deref());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(settings.color && !settings.json)
        .with_file(debug)
        .with_line_number(debug);

    let installed = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.is_ok()
}

fn debug_flag(value: Option<&str>) -> bool {
    value.is_some_and(|v| {
        let v = v.trim();
        !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_flag() {
        assert!(debug_flag(Some("1")));
        assert!(debug_flag(Some("true")));
        assert!(!debug_flag(Some("0")));
        assert!(!debug_flag(Some("FALSE")));
        assert!(!debug_flag(Some("")));
        assert!(!debug_flag(None));
    }

    #[test]
    fn test_init_is_idempotent() {
        let settings = LogSettings::default().with_level("debug");
        let first = init(&settings);
        assert!(!init(&settings) || !first);
    }
}
