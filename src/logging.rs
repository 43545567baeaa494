use crate::config::AppConfig;
use crate::orchestration::RunId;
use tracing::Span;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global subscriber; keep the guard alive until exit
///
/// The file sink always receives events. `log_stdout` adds a console echo,
/// plain text with colours or JSON lines to match `use_json`.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender(config));

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config)));

    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        // run_id, token and state fields stay queryable in JSON output
        let file_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(non_blocking)
            .with_ansi(false);
        let stdout_layer = config
            .log_stdout
            .then(|| fmt::layer().json().with_target(true).with_ansi(false));
        registry.with(file_layer).with(stdout_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(false);
        let stdout_layer = config
            .log_stdout
            .then(|| fmt::layer().with_target(false).with_ansi(true));
        registry.with(file_layer).with(stdout_layer).init();
    }

    guard
}

/// Span that tags every event of one orchestration run with its id
pub fn run_span(run_id: RunId) -> Span {
    tracing::info_span!("run", run_id = %run_id)
}

fn file_appender(config: &AppConfig) -> RollingFileAppender {
    match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&config.log_dir, &config.log_file),
        "daily" => tracing_appender::rolling::daily(&config.log_dir, &config.log_file),
        _ => tracing_appender::rolling::never(&config.log_dir, &config.log_file),
    }
}

/// Filter used when `RUST_LOG` is unset; HTTP client internals stay at warn
fn default_directives(config: &AppConfig) -> String {
    format!("{},hyper=warn,reqwest=warn", config.log_level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_quiet_http_client() {
        let config = AppConfig::from_yaml_str(
            "log_level: debug\nlog_dir: logs\nlog_file: x.log\nuse_json: false\nrotation: never\n",
        )
        .unwrap();
        let directives = default_directives(&config);
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("reqwest=warn"));
        assert!(EnvFilter::try_new(directives).is_ok());
    }
}
