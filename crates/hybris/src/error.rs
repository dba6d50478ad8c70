//! Typed interpreter errors and the call trace (§4.H, §7).
//!
//! Grounded on `ouros::exception_private::{ExcType, RunError}`: a strum
//! `Display`/`EnumString` kind enum plus a message, with helper
//! constructors for the common cases. Hybris itself only distinguishes three
//! broad error kinds at the Rust API boundary (§7): a script-level
//! exception is carried through [`crate::frame::FrameState`], not through
//! this type — `HybrisError` is reserved for failures the core itself
//! cannot recover from (a malformed AST, a VM invariant violated, an
//! argument-count contract broken by a native function).

use std::fmt;

use crate::ast::SourcePos;

/// Broad category of an internal failure (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum ErrorKind {
    /// The AST handed to the evaluator is shaped in a way the grammar
    /// should never produce (wrong child count, wrong node kind where a
    /// specific one is required).
    Syntax,
    /// Any other internal failure: a native function contract violation, a
    /// VM invariant broken, a resource limit hit.
    Generic,
    /// Non-fatal: surfaced to the embedder but does not abort evaluation
    /// (§7 "Warnings").
    Warning,
}

/// An internal interpreter error, as opposed to a script-level exception.
/// Carries an optional call-trace snapshot captured at the point of origin
/// (§4.H "the trace is frozen onto the error when it first crosses a frame
/// boundary").
#[derive(Debug, Clone)]
pub struct HybrisError {
    pub kind: ErrorKind,
    pub message: String,
    pub pos: Option<SourcePos>,
    pub trace: Vec<TraceEntry>,
}

impl HybrisError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), pos: None, trace: Vec::new() }
    }

    #[must_use]
    pub fn at(mut self, pos: SourcePos) -> Self {
        self.pos = Some(pos);
        self
    }

    #[must_use]
    pub fn with_trace(mut self, trace: Vec<TraceEntry>) -> Self {
        self.trace = trace;
        self
    }

    #[must_use]
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    #[must_use]
    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Generic, message)
    }

    #[must_use]
    pub fn arity_mismatch(name: &str, expected: usize, got: usize) -> Self {
        Self::generic(format!("'{name}' expects {expected} argument(s), got {got}"))
    }

    #[must_use]
    pub fn no_such_method(class_name: &str, method_name: &str, arity: usize) -> Self {
        Self::new(
            ErrorKind::Syntax,
            format!("class '{class_name}' has no overload of method '{method_name}' accepting {arity} argument(s)"),
        )
    }

    #[must_use]
    pub fn unknown_identifier(name: &str) -> Self {
        Self::new(ErrorKind::Syntax, format!("'{name}' undeclared"))
    }
}

impl fmt::Display for HybrisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(pos) = self.pos {
            write!(f, "{pos}: ")?;
        }
        write!(f, "{}: {}", self.kind, self.message)?;
        for entry in &self.trace {
            write!(f, "\n    at {entry}")?;
        }
        Ok(())
    }
}

impl std::error::Error for HybrisError {}

/// One call-stack frame captured for a trace (§4.H).
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub function_name: String,
    pub pos: SourcePos,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.function_name, self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_trace() {
        let err = HybrisError::generic("boom")
            .at(SourcePos { line: 3, column: 1 })
            .with_trace(vec![TraceEntry { function_name: "f".into(), pos: SourcePos { line: 1, column: 1 } }]);
        let rendered = err.to_string();
        assert!(rendered.contains("Generic"));
        assert!(rendered.contains("boom"));
        assert!(rendered.contains("at f"));
    }
}
