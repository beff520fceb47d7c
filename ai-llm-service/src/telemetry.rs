//! Library-scoped `tracing` layer with RFC3339 UTC timestamps.
//!
//! The binary composes [`layer`] with its global subscriber so events from the
//! engine crates render with file/line and span durations while third-party
//! crates stay on the plain global formatter.

use std::io::{self, IsTerminal};

use tracing::Level;
use tracing_subscriber::filter::{Directive, ParseError};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, filter, fmt};

/// Crate target prefix used to filter only library-originated logs.
pub const TARGET_PREFIX: &str = "ai_llm_service";

/// Targets of every crate in the engine workspace.
pub const ENGINE_TARGETS: &[&str] = &[TARGET_PREFIX, "rag_store", "contextor", "calibration_loop"];

/// RFC3339 UTC timer implemented via `chrono`.
/// Example output: `2025-09-12T10:20:30Z`
#[derive(Clone, Debug, Default)]
struct ChronoRfc3339Utc;

impl FormatTime for ChronoRfc3339Utc {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = chrono::Utc::now();
        let s = now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        w.write_str(&s)
    }
}

/// Formatting layer that renders only events whose target starts with one of `targets`.
///
/// - RFC3339 UTC timestamps
/// - Compact single-line format with `file:line`
/// - Span close events (duration of instrumented calls)
/// - ANSI colors only when stdout is a terminal
pub fn layer<S>(targets: &'static [&'static str]) -> impl Layer<S> + Send + Sync
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let use_ansi = io::stdout().is_terminal();

    let only_engine = filter::filter_fn(move |meta| {
        targets.iter().any(|prefix| meta.target().starts_with(prefix))
    });

    fmt::layer()
        .with_timer(ChronoRfc3339Utc)
        .with_level(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(use_ansi)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .event_format(fmt::format().compact().with_source_location(true))
        .with_filter(only_engine)
}

/// Level directive for one target, e.g. `contextor=debug`.
pub fn level_directive(target: &str, level: Level) -> Result<Directive, ParseError> {
    format!("{target}={}", level.as_str().to_lowercase()).parse()
}

/// `RUST_LOG` (or `default`) plus `level` applied to every engine crate.
pub fn env_filter_with_level(default: &str, level: Level) -> EnvFilter {
    let mut base = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    for target in ENGINE_TARGETS {
        if let Ok(d) = level_directive(target, level) {
            base = base.add_directive(d);
        }
    }
    base
}
