
use crate::config::{Config, LogFormat, LoggingConfig};
use crate::errors::*;

use slog::{Drain, Logger};

pub fn load_config_from_file(path: &str) -> Result<Config> {
    use std::fs::File;
    use std::io::Read;

    let mut file = File::open(path)
        .chain_err(|| ErrorKind::Config(format!("failed to open config file {}", path)))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .chain_err(|| ErrorKind::Config(format!("failed to read config file {}", path)))?;

    Config::from_toml(&contents)
}

/// Root logger writing to stderr. Keep the guard alive until exit so queued
/// records get flushed.
pub fn build_logger(config: &LoggingConfig) -> (Logger, slog_async::AsyncGuard) {
    let (drain, guard) = match config.format {
        LogFormat::Term => {
            let decorator = slog_term::TermDecorator::new().stderr().build();
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            slog_async::Async::new(drain).build_with_guard()
        }
        LogFormat::Json => {
            let drain = slog_json::Json::default(std::io::stderr()).fuse();
            slog_async::Async::new(drain).build_with_guard()
        }
    };
    let drain = drain.filter_level(config.level.into()).fuse();
    let log = Logger::root(drain, o!("version" => env!("CARGO_PKG_VERSION")));
    (log, guard)
}

pub fn get_error_trace(e: &Error) -> String {
    let mut error_trace = String::new();
    error_trace.push_str("Error: ");
    error_trace.push_str(&e.to_string());
    for e in e.iter().skip(1) {
        error_trace.push_str("\nCause: ");
        error_trace.push_str(&e.to_string());
    }
    error_trace
}
