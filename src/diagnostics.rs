//! Diagnostic sink (§6) and `tracing` integration (§10).
//!
//! `.out`/`.warning`/`.error`/`.assert` all need to hand a message to the
//! host without necessarily aborting assembly (only `.error`/failed
//! `.assert` abort, by producing an [`crate::error::AssembleError`]); `.out`
//! and `.warning` instead go through this sink. Grounded in §6's
//! diagnostic-callback description; `tracing` span/event placement follows
//! §10 (one span per source line, events at chunk creation, scope
//! enter/exit, symbol promotion, and directive-driven diagnostics).

use crate::token::Pos;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Severity {
    Info,
    Warning,
}

/// Receives non-fatal diagnostics emitted during assembly (§4.F `.out`,
/// `.warning`). A host may log them, collect them, or ignore them.
pub trait DiagnosticSink {
    fn emit(&mut self, severity: Severity, message: &str, pos: Option<Pos>);
}

/// A sink that forwards every diagnostic to `tracing`, matching the level
/// conventions the rest of this crate's instrumentation uses (§10).
#[derive(Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&mut self, severity: Severity, message: &str, pos: Option<Pos>) {
        match severity {
            Severity::Info => tracing::info!(pos = ?pos, "{message}"),
            Severity::Warning => tracing::warn!(pos = ?pos, "{message}"),
        }
    }
}

/// A sink that just collects diagnostics, for tests and hosts that want to
/// inspect them after the fact rather than stream them live.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub messages: Vec<(Severity, String, Option<Pos>)>,
}

impl DiagnosticSink for CollectingSink {
    fn emit(&mut self, severity: Severity, message: &str, pos: Option<Pos>) {
        self.messages.push((severity, message.to_string(), pos));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_sink_records_in_order() {
        let mut sink = CollectingSink::default();
        sink.emit(Severity::Info, "hello", None);
        sink.emit(Severity::Warning, "careful", Some(Pos::new(1, 2)));
        assert_eq!(sink.messages.len(), 2);
        assert_eq!(sink.messages[0].0, Severity::Info);
        assert_eq!(sink.messages[1].1, "careful");
    }
}
