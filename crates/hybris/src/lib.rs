//! Execution core of the Hybris scripting language.
//!
//! This crate owns everything downstream of "I already have an AST":
//! the tagged value system and garbage collector (§4.A-B), frames and
//! control flow (§4.D-E), class dispatch with operator overloading and
//! descriptors (§4.F), the extension ABI (§4.G), and typed errors with a
//! call trace (§4.H). Lexing and parsing source text into that AST lives in
//! the separate `hybris-syntax` crate; this crate never reads source text.

pub mod ast;
pub mod class;
pub mod dump;
pub mod error;
pub mod eval;
pub mod extern_abi;
pub mod frame;
pub mod heap;
pub mod io;
pub mod ops;
pub mod tracer;
pub mod vm;

pub use ast::Node;
pub use error::{ErrorKind, HybrisError};
pub use heap::{GcLimits, Handle};
pub use vm::Vm;

/// Convenience entry point: builds a fresh [`Vm`] with the standard library
/// installed and runs `program` to completion, returning the value of its
/// last top-level statement.
///
/// Any uncaught script-level exception (the global frame's `FrameState`
/// still `throwing` once `program` finishes) is converted into a
/// [`HybrisError`] so callers that don't want to inspect `Vm` state
/// directly get a single `Result` to match on (§7 "Error Handling Design").
pub fn run(program: &Node, limits: GcLimits) -> Result<Handle, HybrisError> {
    let mut vm = Vm::new(limits);
    extern_abi::install_stdlib(&mut vm);
    let result = eval::run_program(&mut vm, program)?;
    if vm.globals.state.throwing {
        let thrown = vm.globals.state.thrown_value.unwrap_or(result);
        return Err(HybrisError::generic(ops::to_display_string(&vm.heap, thrown)).at(program.pos));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Literal, NodeKind, SourcePos};

    fn pos() -> SourcePos {
        SourcePos::default()
    }

    fn int(n: i64) -> Node {
        Node::leaf(NodeKind::IntegerLiteral, pos(), Literal::Integer(n))
    }

    #[test]
    fn runs_an_arithmetic_expression_statement() {
        let add = Node::new(NodeKind::BinaryOp(ast::OperatorKind::Add), pos()).with_children(vec![int(2), int(3)]);
        let program = Node::new(NodeKind::Block, pos())
            .with_children(vec![Node::new(NodeKind::ExpressionStatement, pos()).with_children(vec![add])]);

        let mut vm = Vm::new(GcLimits::default());
        extern_abi::install_stdlib(&mut vm);
        let value = eval::run_program(&mut vm, &program).unwrap();
        assert!(matches!(vm.heap.get(value), heap::HeapData::Integer(5)));
    }
}
