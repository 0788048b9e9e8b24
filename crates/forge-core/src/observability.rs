//! Observability utilities for standardized tracing spans and structured fields
//!
//! This module provides helper functions and constants for consistent tracing
//! across engine dispatch, the build planner, and the test-stage coordinator,
//! implementing the canonical span taxonomy for this orchestrator.

use std::time::Instant;
use tracing::{span, Span};

/// Canonical span names for core workflows.
pub mod spans {
    pub const MANIFEST_LOAD: &str = "manifest.load";
    pub const ENGINE_RESOLVE: &str = "engine.resolve";
    pub const ENGINE_SPAWN: &str = "engine.spawn";
    pub const BUILD_DISPATCH: &str = "build.dispatch";
    pub const TEST_CREATE: &str = "test.create";
    pub const TEST_RUN: &str = "test.run";
    pub const TEST_DELETE: &str = "test.delete";
    pub const TEST_ALL: &str = "test.all";
}

/// Common field names for structured logging.
pub mod fields {
    pub const ARTIFACT_NAME: &str = "artifact_name";
    pub const ENGINE_URI: &str = "engine_uri";
    pub const STAGE: &str = "stage";
    pub const DURATION_MS: &str = "duration_ms";
}

/// Start a span for manifest discovery and parsing.
pub fn manifest_load_span(path: &str) -> Span {
    span!(
        target: "forge_core::observability",
        tracing::Level::INFO,
        spans::MANIFEST_LOAD,
        duration_ms = tracing::field::Empty,
        path = %path
    )
}

/// Start a span for engine URI resolution.
pub fn engine_resolve_span(engine_uri: &str) -> Span {
    span!(
        target: "forge_core::observability",
        tracing::Level::INFO,
        spans::ENGINE_RESOLVE,
        duration_ms = tracing::field::Empty,
        engine_uri = %engine_uri
    )
}

/// Start a span for spawning an engine subprocess.
pub fn engine_spawn_span(engine_uri: &str, command: &str) -> Span {
    span!(
        target: "forge_core::observability",
        tracing::Level::INFO,
        spans::ENGINE_SPAWN,
        duration_ms = tracing::field::Empty,
        engine_uri = %engine_uri,
        command = %command
    )
}

/// Start a span for dispatching a build artifact.
pub fn build_dispatch_span(artifact_name: &str, engine_uri: &str) -> Span {
    span!(
        target: "forge_core::observability",
        tracing::Level::INFO,
        spans::BUILD_DISPATCH,
        duration_ms = tracing::field::Empty,
        artifact_name = %artifact_name,
        engine_uri = %engine_uri
    )
}

/// Start a span for creating a test environment.
pub fn test_create_span(stage: &str) -> Span {
    span!(
        target: "forge_core::observability",
        tracing::Level::INFO,
        spans::TEST_CREATE,
        duration_ms = tracing::field::Empty,
        stage = %stage
    )
}

/// Start a span for running a test stage.
pub fn test_run_span(stage: &str) -> Span {
    span!(
        target: "forge_core::observability",
        tracing::Level::INFO,
        spans::TEST_RUN,
        duration_ms = tracing::field::Empty,
        stage = %stage
    )
}

/// Start a span for deleting a test environment or report.
pub fn test_delete_span(id: &str) -> Span {
    span!(
        target: "forge_core::observability",
        tracing::Level::INFO,
        spans::TEST_DELETE,
        duration_ms = tracing::field::Empty,
        id = %id
    )
}

/// Start a span for a `test-all` run across every declared stage.
pub fn test_all_span(stage_count: usize) -> Span {
    span!(
        target: "forge_core::observability",
        tracing::Level::INFO,
        spans::TEST_ALL,
        duration_ms = tracing::field::Empty,
        stage_count = %stage_count
    )
}

/// Helper for recording duration on span completion.
pub struct TimedSpan {
    span: Span,
    start_time: Instant,
    // Keep the span entered for the lifetime of TimedSpan
    _entered: tracing::span::EnteredSpan,
}

impl TimedSpan {
    /// Create a new timed span from an existing span.
    pub fn new(span: Span) -> Self {
        let entered = span.clone().entered();
        Self {
            span,
            start_time: Instant::now(),
            _entered: entered,
        }
    }

    /// Complete the span and record duration.
    pub fn complete(self) {
        let duration_ms = self.start_time.elapsed().as_millis() as u64;
        self.span.record(fields::DURATION_MS, duration_ms);
    }

    /// Get the underlying span for recording additional fields.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

/// Macro to create and enter a standardized span with automatic timing.
#[macro_export]
macro_rules! timed_span {
    ($span_fn:expr) => {{
        let span = $span_fn;
        $crate::observability::TimedSpan::new(span)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_creation() {
        let _span = manifest_load_span("forge.yaml");
        let _span = engine_resolve_span("go://build-go");
        let _span = build_dispatch_span("app", "go://build-go");
    }

    #[test]
    fn test_timed_span() {
        let timed_span = TimedSpan::new(test_run_span("unit"));
        std::thread::sleep(std::time::Duration::from_millis(5));
        timed_span.complete();
    }
}
