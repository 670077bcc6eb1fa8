//! tracing subscriber setup
//!
//! Text mode writes to the log file and to stdout; JSON mode writes flattened
//! events to the file only, for log shippers.

use crate::config::AppConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Noisy dependencies capped below the application level
const QUIET_TARGETS: &[&str] = &["sqlx=warn", "hyper=info", "redis=info"];

fn rotation(name: &str) -> Rotation {
    match name {
        "minutely" => Rotation::MINUTELY,
        "hourly" => Rotation::HOURLY,
        "daily" => Rotation::DAILY,
        _ => Rotation::NEVER,
    }
}

fn default_directives(level: &str) -> String {
    std::iter::once(level)
        .chain(QUIET_TARGETS.iter().copied())
        .collect::<Vec<_>>()
        .join(",")
}

/// `RUST_LOG` wins when set
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Install the global subscriber. Keep the guard alive for the whole process;
/// dropping it flushes and stops the file writer.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let appender =
        RollingFileAppender::new(rotation(&config.rotation), &config.log_dir, &config.log_file);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let registry = tracing_subscriber::registry().with(env_filter(&config.log_level));

    let installed = if config.use_json {
        let file_layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_target(true)
            .with_writer(writer)
            .with_ansi(false);
        registry.with(file_layer).try_init()
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(writer)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file_layer).with(stdout_layer).try_init()
    };
    if let Err(e) = installed {
        eprintln!("logging already initialised: {}", e);
    }

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_names() {
        assert_eq!(rotation("hourly"), Rotation::HOURLY);
        assert_eq!(rotation("daily"), Rotation::DAILY);
        assert_eq!(rotation("weekly"), Rotation::NEVER);
    }

    #[test]
    fn test_default_directives() {
        assert_eq!(default_directives("debug"), "debug,sqlx=warn,hyper=info,redis=info");
    }
}
