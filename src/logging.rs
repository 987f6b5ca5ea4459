//! Log setup
//!
//! stdout carries the wire protocol, so log output goes to stderr by
//! default, or to a file when the client owns stderr too (editors often
//! do). Level directives come from `--log-level`, falling back to
//! `RUST_LOG`, then to `info`.

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_DIRECTIVES: &str = "info";

/// Level directives: CLI override first, then `RUST_LOG`.
fn directives(cli: Option<String>, env: Option<String>) -> String {
    cli.or(env)
        .unwrap_or_else(|| DEFAULT_DIRECTIVES.to_string())
}

/// Log sink: CLI override first, then `CMETAD_LOG_FILE`.
fn sink_path(cli: Option<PathBuf>, env: Option<String>) -> Option<PathBuf> {
    cli.or(env.map(PathBuf::from))
}

/// Install the global subscriber.
pub fn init(
    level: Option<String>,
    file: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let directives = directives(level, std::env::var("RUST_LOG").ok());
    let filter =
        EnvFilter::try_new(&directives).or_else(|_| EnvFilter::try_new(DEFAULT_DIRECTIVES))?;
    let registry = tracing_subscriber::registry().with(filter);

    match sink_path(file, std::env::var("CMETAD_LOG_FILE").ok()) {
        Some(path) => {
            let sink = OpenOptions::new().create(true).append(true).open(path)?;
            let layer = fmt::layer()
                .with_writer(Arc::new(sink))
                .with_ansi(false)
                .with_target(true);
            registry.with(layer).init();
        }
        None => {
            let layer = fmt::layer().with_writer(io::stderr).with_target(true);
            registry.with(layer).init();
        }
    }
    Ok(())
}
