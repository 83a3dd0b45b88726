use crate::conf::{ExecutionEnvironment, Tracing, ENVIRONMENT};
use anyhow::Context;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling::never};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::{layer, Layer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, Layer as _};

/// Keeps the file writer of the tracing subscriber alive. Logs still buffered are
/// flushed when this is dropped.
#[must_use]
pub struct TracingGuard {
    _file: Option<WorkerGuard>,
}

/// Build the filter from `RUST_LOG`, falling back to the configured directives.
pub fn env_filter(settings: &Tracing) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let mut filter = EnvFilter::try_new(settings.filter())
        .with_context(|| format!("Invalid log filter {:?}", settings.filter()))?;
    if matches!(
        *ENVIRONMENT,
        ExecutionEnvironment::Local | ExecutionEnvironment::Integration
    ) {
        for directive in ["hyper=warn", "reqwest=warn", "h2=info", "rustls=warn"] {
            filter = filter.add_directive(directive.parse()?);
        }
    }
    Ok(filter)
}

/// Install the global tracing subscriber: console output, plain or json, plus an
/// optional json log file.
pub fn init_tracing(settings: &Tracing) -> anyhow::Result<TracingGuard> {
    settings.validate()?;
    let filter = env_filter(settings)?;

    let console = if settings.json_logs() {
        fmt_layer().json().with_current_span(true).boxed()
    } else {
        fmt_layer().boxed()
    };

    let (file, guard) = match settings.log_file() {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create log directory {}", parent.display())
                    })?;
                }
            }
            let file_appender = never("", path);
            let (writer, guard) = non_blocking(file_appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .json()
                .with_current_span(true)
                .with_span_list(true);
            (Some(file_layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing")?;

    info!(
        "Tracing initialized for {} ({} environment)",
        settings.service_name(),
        *ENVIRONMENT
    );
    Ok(TracingGuard { _file: guard })
}

fn fmt_layer<S>() -> Layer<S> {
    layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NONE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_env_filter_falls_back_to_settings() {
        std::env::remove_var("RUST_LOG");
        let settings = Tracing::builder()
            .service_name("session")
            .filter("fhevm_session=debug")
            .build();
        let filter = env_filter(&settings).unwrap();
        assert!(filter.to_string().contains("fhevm_session=debug"));
    }

    #[test]
    #[serial]
    fn test_env_filter_prefers_rust_log() {
        std::env::set_var("RUST_LOG", "warn");
        let settings = Tracing::builder()
            .service_name("session")
            .filter("fhevm_session=debug")
            .build();
        let filter = env_filter(&settings);
        std::env::remove_var("RUST_LOG");
        assert!(!filter.unwrap().to_string().contains("fhevm_session"));
    }

    #[test]
    #[serial]
    fn test_init_tracing_writes_log_file() {
        std::env::remove_var("RUST_LOG");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("session.log");
        let settings = Tracing::builder()
            .service_name("session")
            .log_file(path.clone())
            .build();
        let guard = init_tracing(&settings).unwrap();
        tracing::info!("file logging works");
        drop(guard);
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("file logging works"));

        // the global subscriber can only be installed once
        assert!(init_tracing(&settings).is_err());
    }

    #[test]
    fn test_init_tracing_rejects_invalid_settings() {
        let settings = Tracing::builder().service_name("Not Valid").build();
        assert!(init_tracing(&settings).is_err());
    }
}
