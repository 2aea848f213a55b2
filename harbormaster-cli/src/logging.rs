//! Subscriber installation for the CLI

use harbormaster::config::{LogSink, LoggingConfig};
use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber described by `config`
///
/// `RUST_LOG` takes precedence over `logging.level`. A log file that cannot
/// be opened degrades to JSON on stdout with a warning; it never aborts the
/// command. Returns false when another subscriber was already installed.
pub fn init(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = match config.sink {
        LogSink::Stdout => tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stdout))
            .try_init(),
        LogSink::Json => tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stdout).json())
            .try_init(),
        LogSink::File => match OpenOptions::new().create(true).append(true).open(&config.file) {
            Ok(file) => tracing_subscriber::registry()
                .with(filter)
                .with(Layer::new().with_writer(io::stdout).json())
                .with(Layer::new().with_writer(Mutex::new(file)).json().with_ansi(false))
                .try_init(),
            Err(e) => {
                let installed = tracing_subscriber::registry()
                    .with(filter)
                    .with(Layer::new().with_writer(io::stdout).json())
                    .try_init();
                tracing::warn!(
                    file = %config.file.display(),
                    error = %e,
                    "cannot open log file, logging to stdout only"
                );
                installed
            }
        },
    };

    // An earlier subscriber keeps receiving events
    match installed {
        Ok(()) => true,
        Err(e) => {
            eprintln!("logging not reconfigured: {e}");
            tracing::debug!(error = %e, "global subscriber already installed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_reported_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let unopenable = LoggingConfig {
            sink: LogSink::File,
            file: tmp.path().join("missing-dir").join("harbormaster.log"),
            ..LoggingConfig::default()
        };

        assert!(init(&unopenable));
        assert!(!init(&LoggingConfig::default()));
    }
}
