//! Tracing setup.
//!
//! The service keeps a daily-rotated JSON log file alongside its console
//! output so turn-level events (classification verdicts, session resets,
//! dropped notifications) survive restarts. One-shot subcommands such as
//! `ingest` skip the file layer. Verbosity comes from `RUST_LOG`
//! (default `info`).

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Keeps the rotated-file writer alive.
///
/// Dropping the guard flushes buffered events and closes the file, so the
/// caller holds it until shutdown. Console-only mode carries no writer.
pub struct LogGuard {
    _file_writer: Option<WorkerGuard>,
}

/// Install the global subscriber.
///
/// With `file_dir` set, events go to stderr and to
/// `{file_dir}/sabai.log.YYYY-MM-DD` as JSON lines; without it, stderr only.
///
/// # Errors
///
/// Fails when the log directory cannot be created.
pub fn init(file_dir: Option<&Path>) -> anyhow::Result<LogGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let base = tracing_subscriber::registry().with(filter).with(console);

    let Some(dir) = file_dir else {
        base.init();
        return Ok(LogGuard { _file_writer: None });
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create log directory {}", dir.display()))?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "sabai.log"));
    base.with(tracing_subscriber::fmt::layer().json().with_writer(writer))
        .init();

    Ok(LogGuard {
        _file_writer: Some(guard),
    })
}
