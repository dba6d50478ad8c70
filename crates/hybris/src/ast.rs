//! The abstract syntax tree handed to the evaluator.
//!
//! Nodes are produced by an external lexer/grammar (`hybris-syntax` in this
//! workspace, or any other producer implementing the same shape) — the
//! core only ever consumes [`Node`], never a parser. `Node` is an
//! arena-free, owned tree: every non-leaf node carries an ordered child list
//! it exclusively owns; leaves carry a [`Literal`]. Method and function
//! bodies are the one exception: they are wrapped in `Rc` so that cloning a
//! class (`new Cls()`, descriptor dispatch) shares the body AST instead of
//! deep-copying it, since method bodies are immutable once declared.

use std::rc::Rc;

/// Byte or line/column position in the original source, for error reporting
/// and call traces (§4.H). The exact encoding is an external-collaborator
/// concern (the lexer decides); the core only ever prints it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SourcePos {
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for SourcePos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Every binary operator symbol the value vtable (§4.A) must be able to
/// dispatch, plus the symbols a class can overload via `__op@<sym>` (§4.F).
/// Grounded on the operator surface of `examples/original_source/include/object.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, serde::Serialize, serde::Deserialize)]
pub enum OperatorKind {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "+=")]
    AddAssign,
    #[strum(serialize = "-=")]
    SubAssign,
    #[strum(serialize = "*=")]
    MulAssign,
    #[strum(serialize = "/=")]
    DivAssign,
    #[strum(serialize = "%=")]
    ModAssign,
    #[strum(serialize = "&")]
    BitAnd,
    #[strum(serialize = "|")]
    BitOr,
    #[strum(serialize = "^")]
    BitXor,
    #[strum(serialize = "<<")]
    Shl,
    #[strum(serialize = ">>")]
    Shr,
    #[strum(serialize = "&=")]
    BitAndAssign,
    #[strum(serialize = "|=")]
    BitOrAssign,
    #[strum(serialize = "^=")]
    BitXorAssign,
    #[strum(serialize = "<<=")]
    ShlAssign,
    #[strum(serialize = ">>=")]
    ShrAssign,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "&&")]
    And,
    #[strum(serialize = "||")]
    Or,
    #[strum(serialize = "..")]
    Range,
    #[strum(serialize = "~=")]
    RegexMatch,
    #[strum(serialize = "[]")]
    Index,
    #[strum(serialize = "[]=")]
    IndexPush,
    #[strum(serialize = "[]<")]
    IndexSet,
}

/// Unary operator symbols (`-x`, `!x`, `~x`, `++x`, `--x`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, serde::Serialize, serde::Deserialize)]
pub enum UnaryOperatorKind {
    #[strum(serialize = "-")]
    Neg,
    #[strum(serialize = "!")]
    Not,
    #[strum(serialize = "~")]
    BitNot,
    #[strum(serialize = "++")]
    PreIncrement,
    #[strum(serialize = "--")]
    PreDecrement,
}

/// Class attribute visibility (§3 "Class instance").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum Access {
    #[default]
    Public,
    Private,
    Protected,
}

/// Leaf payload for literal/identifier nodes.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Char(char),
    /// String literal text *before* escape/interpolation processing — the
    /// evaluator performs `\n`/`\t`/`\\`/`\"` unescaping and `$name`
    /// interpolation at evaluation time (§3 "String").
    String(String),
    Identifier(String),
}

/// One AST node. Statement, expression, and declaration forms share this
/// single representation: every node is tagged by an operator code drawn
/// from a closed set ([`NodeKind`]).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub pos: SourcePos,
    pub literal: Option<Literal>,
    pub children: Vec<Node>,
    /// Visibility for `Attribute`/`Method` declarations; meaningless (and
    /// left at its `Public` default) on every other node kind.
    pub access: Access,
}

impl Node {
    #[must_use]
    pub fn new(kind: NodeKind, pos: SourcePos) -> Self {
        Self { kind, pos, literal: None, children: Vec::new(), access: Access::default() }
    }

    #[must_use]
    pub fn leaf(kind: NodeKind, pos: SourcePos, literal: Literal) -> Self {
        Self { kind, pos, literal: Some(literal), children: Vec::new(), access: Access::default() }
    }

    #[must_use]
    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    #[must_use]
    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    /// Panics if this node is not an identifier/constant leaf.
    #[must_use]
    pub fn identifier_name(&self) -> &str {
        match &self.literal {
            Some(Literal::Identifier(name)) => name,
            _ => panic!("node {:?} is not an identifier leaf", self.kind),
        }
    }
}

/// The closed operator-code set: expression operators, statements, and
/// declarations all live in one tag space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NodeKind {
    // --- leaves ---
    IntegerLiteral,
    FloatLiteral,
    CharLiteral,
    StringLiteral,
    BooleanLiteral,
    NilLiteral,
    Identifier,

    // --- expression operators ---
    BinaryOp(OperatorKind),
    UnaryOp(UnaryOperatorKind),
    /// `a ? b : c`
    Ternary,
    /// `a.b` — string concatenation of both operands' string values, *not*
    /// attribute access (§4.E "Dot").
    Dot,
    /// `$expr` dynamic identifier dispatch (§4.E).
    Dollar,
    /// `a = b`, including identifier-chain targets.
    Assign,
    /// `name(args...)` or `expr(args...)`.
    Call,
    /// `new Cls(args...)`.
    New,
    /// A chain of `.attr` accesses rooted at an identifier, e.g. `me->x->y`.
    IdentifierChain,
    /// Vector/map literal constructor, e.g. `{1, 2, 3}`.
    VectorLiteral,
    MapLiteral,
    /// One `key: value` pair inside a `MapLiteral`.
    MapPair,

    // --- statements ---
    Block,
    While,
    DoWhile,
    For,
    Foreach,
    ForeachMap,
    If,
    Switch,
    Case,
    Default,
    Break,
    Next,
    Return,
    Throw,
    Try,
    Catch,
    Finally,
    ExpressionStatement,

    // --- declarations ---
    /// *n-1* children are parameter identifiers, the last child is the body block.
    Function,
    /// Same convention as [`NodeKind::Function`]; the declaring class supplies context.
    Method,
    Structure,
    Class,
    Attribute,
    ConstantDecl,
}

/// A method or function body shared by reference once compiled (§4.C:
/// "Clones ... are shallow in the AST"; §4.A: "method bodies are immutable").
pub type SharedBody = Rc<Node>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_kind_round_trips_through_mangled_name() {
        assert_eq!(OperatorKind::Add.to_string(), "+");
        assert_eq!("+".parse::<OperatorKind>().unwrap(), OperatorKind::Add);
        assert_eq!(OperatorKind::IndexSet.to_string(), "[]<");
    }

    #[test]
    fn function_node_convention_is_params_then_body() {
        let pos = SourcePos::default();
        let param = Node::leaf(NodeKind::Identifier, pos, Literal::Identifier("a".into()));
        let body = Node::new(NodeKind::Block, pos);
        let func = Node::new(NodeKind::Function, pos).with_children(vec![param, body]);
        assert_eq!(func.children.len(), 2);
        assert_eq!(func.children[0].identifier_name(), "a");
    }
}
