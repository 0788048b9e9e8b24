//! Logging and observability
//!
//! Structured logging for the orchestrator: every dispatch decision
//! (URI resolution, `build` vs `buildBatch`, pipeline step boundaries,
//! stage create/run/delete) is logged through `tracing` rather than
//! printed directly, so the CLI binary's own output stays limited to the
//! result the user asked for.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the global `tracing` subscriber.
///
/// Idempotent: a second call after a subscriber has already been installed
/// (e.g. by a test harness) is a no-op rather than a panic.
pub fn init() -> anyhow::Result<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer().with_target(false).with_file(true).with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_error::ErrorLayer::default())
        .with(fmt_layer)
        .init();

    Ok(())
}
