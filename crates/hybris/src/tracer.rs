//! Pluggable execution tracing (ambient component I).
//!
//! Grounded on `ouros::tracer::VmTracer`: rather than reach for the `log`
//! or `tracing` crates, this defines its own narrow trait so tracing can
//! be toggled per-VM-instance without a process-global subscriber —
//! appropriate here too, since an embedder may run many independent
//! `Vm`s (e.g. one per incoming request) that should never share one
//! global log sink.

use crate::ast::SourcePos;

/// Receives structured notifications as the evaluator runs. The `-s`/
/// `--trace` CLI flag (§6) wires a [`StderrTracer`] in; embedders that
/// don't care can use [`NoopTracer`], the default.
pub trait Tracer {
    fn on_call(&self, _name: &str, _pos: SourcePos) {}
    fn on_return(&self, _name: &str) {}
    fn on_gc_collect(&self, _freed: usize, _live: usize) {}
    fn on_exception(&self, _message: &str, _pos: SourcePos) {}
}

/// Discards every notification.
#[derive(Debug, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {}

/// Writes one line per notification to stderr, matching the CLI's
/// `--trace` flag (§6).
#[derive(Debug, Default)]
pub struct StderrTracer;

impl Tracer for StderrTracer {
    fn on_call(&self, name: &str, pos: SourcePos) {
        eprintln!("[trace] call {name} at {pos}");
    }

    fn on_return(&self, name: &str) {
        eprintln!("[trace] return from {name}");
    }

    fn on_gc_collect(&self, freed: usize, live: usize) {
        eprintln!("[trace] gc: freed {freed}, {live} live");
    }

    fn on_exception(&self, message: &str, pos: SourcePos) {
        eprintln!("[trace] exception at {pos}: {message}");
    }
}
