//! Compiled-dump (de)serialization: a binary encoding of an already-parsed
//! program, so repeated runs of the same script can skip the lexer/parser
//! entirely.
//!
//! Grounded on `ouros::namespace::Namespaces::deep_clone`, which round-trips
//! through `postcard` to get a structural deep copy "for free"; this module
//! uses the same crate for the same reason — a dense, self-describing
//! binary encoding of a tree that would otherwise have to be re-derived by
//! re-running the frontend.

use serde::{Deserialize, Serialize};

use crate::ast::Node;

/// A versioned wrapper around the serialized AST. The version field lets a
/// future incompatible change to `Node`'s shape fail with a clear error
/// instead of silently misinterpreting bytes produced by an older build.
#[derive(Debug, Serialize, Deserialize)]
pub struct CompiledDump {
    version: u32,
    program: Node,
}

const DUMP_FORMAT_VERSION: u32 = 1;

/// Serializes a parsed program to its compiled-dump byte representation.
pub fn encode(program: &Node) -> Result<Vec<u8>, postcard::Error> {
    postcard::to_allocvec(&CompiledDump { version: DUMP_FORMAT_VERSION, program: program.clone() })
}

/// Decodes a compiled-dump byte blob back into the program it was made
/// from. Returns an error if the blob is malformed or was produced by an
/// incompatible dump-format version.
pub fn decode(bytes: &[u8]) -> Result<Node, DumpError> {
    let dump: CompiledDump = postcard::from_bytes(bytes).map_err(DumpError::Decode)?;
    if dump.version != DUMP_FORMAT_VERSION {
        return Err(DumpError::VersionMismatch { found: dump.version, expected: DUMP_FORMAT_VERSION });
    }
    Ok(dump.program)
}

#[derive(Debug)]
pub enum DumpError {
    Decode(postcard::Error),
    VersionMismatch { found: u32, expected: u32 },
}

impl std::fmt::Display for DumpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode(err) => write!(f, "malformed compiled dump: {err}"),
            Self::VersionMismatch { found, expected } => {
                write!(f, "compiled dump format {found} is incompatible with this build (expects {expected})")
            }
        }
    }
}

impl std::error::Error for DumpError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{NodeKind, SourcePos};

    #[test]
    fn round_trips_a_simple_program() {
        let program = Node::new(NodeKind::Block, SourcePos::default())
            .with_children(vec![Node::new(NodeKind::Break, SourcePos { line: 2, column: 1 })]);
        let bytes = encode(&program).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.children.len(), 1);
        assert_eq!(decoded.children[0].pos.line, 2);
    }

    #[test]
    fn rejects_a_foreign_version_tag() {
        let program = Node::new(NodeKind::Block, SourcePos::default());
        let mut bytes = encode(&program).unwrap();
        bytes[0] = 0xFF;
        assert!(matches!(decode(&bytes), Err(DumpError::VersionMismatch { .. }) | Err(DumpError::Decode(_))));
    }
}
