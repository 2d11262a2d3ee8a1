//! Observation sinks: where the loop reports what it is doing

use std::io::{stdout, Write};

// ANSI colors
const CYAN: &str = "\x1b[96m";
const GREEN: &str = "\x1b[92m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Longest status line shown to the user
const MAX_STATUS_CHARS: usize = 250;

/// Receives status lines for each step and a final report when the run stops.
///
/// A step may be reported more than once when the guard rewrites it; `step`
/// is the 1-based iteration number. Implementations must return quickly; the
/// loop waits on them.
pub trait ObservationSink: Send + Sync {
    fn report(&self, step: usize, status: &str);

    fn stopped(&self, summary: &str);
}

/// Prints status lines to the terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObservationSink for ConsoleSink {
    fn report(&self, step: usize, status: &str) {
        println!("{}", status_line(step, status));
        let _ = stdout().flush();
    }

    fn stopped(&self, summary: &str) {
        println!("{}Stopped.{} {}", GREEN, RESET, shorten(summary, MAX_STATUS_CHARS));
        let _ = stdout().flush();
    }
}

/// Sink for callers that only want the returned state
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSink;

impl ObservationSink for SilentSink {
    fn report(&self, step: usize, status: &str) {
        tracing::debug!(step, status, "Step");
    }

    fn stopped(&self, summary: &str) {
        tracing::debug!(summary, "Stopped");
    }
}

fn status_line(step: usize, status: &str) -> String {
    format!("{}[Step {}]{} {}", CYAN, step, RESET, shorten(status, MAX_STATUS_CHARS))
}

fn shorten(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}{}…{}", &text[..idx], DIM, RESET),
        None => text.to_string(),
    }
}
