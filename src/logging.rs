//! Tracing setup for the server binary.
//!
//! Console output goes to stderr and follows `RUST_LOG`. When a log
//! directory is configured, events are additionally written as JSON
//! lines with daily rotation; pipeline transitions all carry a `lab_id`
//! field, so a lab's run can be reconstructed from the file after the
//! fact with nothing but `grep`.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset: the runtime at `info`,
/// axum/hyper request plumbing quieted to `warn` so per-poll status
/// requests don't drown the pipeline transitions.
const DEFAULT_FILTER: &str = "info,tower_http=warn,hyper=warn";

/// Keeps the non-blocking run-log writer alive for the process
/// lifetime. Dropping it flushes and closes the file.
pub struct LoggingGuard {
    _worker: WorkerGuard,
}

/// Install the global subscriber.
///
/// Always logs human-readable output to stderr. With `log_dir` set, a
/// `labforge.jsonl.YYYY-MM-DD` run log is written there too; the
/// returned guard must then be held until shutdown.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created.
pub fn init(log_dir: Option<&Path>) -> anyhow::Result<Option<LoggingGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let console = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let Some(dir) = log_dir else {
        tracing_subscriber::registry().with(filter).with(console).init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .map_err(|e| anyhow::anyhow!("failed to create log directory {}: {e}", dir.display()))?;
    let (writer, worker) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "labforge.jsonl"));
    let run_log = tracing_subscriber::fmt::layer().json().with_writer(writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(run_log)
        .init();
    Ok(Some(LoggingGuard { _worker: worker }))
}
