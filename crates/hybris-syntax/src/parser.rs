//! Recursive-descent parser turning a [`crate::lexer`] token stream into a
//! [`hybris::ast::Node`] tree following the shape conventions documented at
//! the top of `hybris::eval`.
//!
//! Grounded on the statement/expression grammar of
//! `examples/original_source/src/parser.y.cpp` (its `MK_*_NODE` macros name
//! the same statement set this parser recognizes: `while`/`for`/`foreach`/
//! `foreachm`/`switch`/`try`/`catch`/`finally`/...), re-expressed as a
//! hand-written recursive-descent parser instead of a bison grammar, since
//! no off-the-shelf parser crate exists for Hybris's surface syntax the way
//! `ruff_python_parser` exists for Python (the grammar `ouros` leans on).

use hybris::ast::{Access, Literal, Node, NodeKind, OperatorKind, SourcePos, UnaryOperatorKind};

use crate::lexer::{lex, LexError, Token, TokenKind};

#[derive(Debug)]
pub struct ParseError {
    pub message: String,
    pub pos: SourcePos,
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        Self { message: err.message, pos: err.pos }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.pos, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parses a full Hybris source file into a `Block` [`Node`] of top-level
/// statements, the shape [`hybris::eval::run_program`] expects.
pub fn parse(source: &str) -> Result<Node, ParseError> {
    let tokens = lex(source)?;
    let mut parser = Parser { tokens, index: 0 };
    let mut statements = Vec::new();
    while !parser.at(TokenKind::Eof) {
        statements.push(parser.statement()?);
    }
    Ok(Node::new(NodeKind::Block, SourcePos::default()).with_children(statements))
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.index]
    }

    fn pos(&self) -> SourcePos {
        self.peek().pos
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.index].clone();
        if self.index + 1 < self.tokens.len() {
            self.index += 1;
        }
        token
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.peek().kind == kind {
            Ok(self.advance())
        } else {
            Err(self.err(format!("expected {kind:?}, found {:?}", self.peek().kind)))
        }
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn err(&self, message: String) -> ParseError {
        ParseError { message, pos: self.pos() }
    }

    fn expect_identifier(&mut self) -> Result<(String, SourcePos), ParseError> {
        let pos = self.pos();
        match self.advance().kind {
            TokenKind::Identifier(name) => Ok((name, pos)),
            other => Err(ParseError { message: format!("expected identifier, found {other:?}"), pos }),
        }
    }

    // ---- statements ----

    fn statement(&mut self) -> Result<Node, ParseError> {
        match &self.peek().kind {
            TokenKind::LBrace => self.block(),
            TokenKind::KwFunction => self.function_decl(),
            TokenKind::KwClass => self.class_decl(),
            TokenKind::KwStructure => self.structure_decl(),
            TokenKind::KwConst => self.const_decl(),
            TokenKind::KwIf => self.if_stmt(),
            TokenKind::KwWhile => self.while_stmt(),
            TokenKind::KwDo => self.do_while_stmt(),
            TokenKind::KwFor => self.for_stmt(),
            TokenKind::KwForeach => self.foreach_stmt(),
            TokenKind::KwSwitch => self.switch_stmt(),
            TokenKind::KwBreak => {
                let pos = self.pos();
                self.advance();
                self.expect(TokenKind::Semicolon)?;
                Ok(Node::new(NodeKind::Break, pos))
            }
            TokenKind::KwNext => {
                let pos = self.pos();
                self.advance();
                self.expect(TokenKind::Semicolon)?;
                Ok(Node::new(NodeKind::Next, pos))
            }
            TokenKind::KwReturn => {
                let pos = self.pos();
                self.advance();
                let mut node = Node::new(NodeKind::Return, pos);
                if !self.at(TokenKind::Semicolon) {
                    node.children.push(self.expr()?);
                }
                self.expect(TokenKind::Semicolon)?;
                Ok(node)
            }
            TokenKind::KwThrow => {
                let pos = self.pos();
                self.advance();
                let value = self.expr()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Node::new(NodeKind::Throw, pos).with_children(vec![value]))
            }
            TokenKind::KwTry => self.try_stmt(),
            _ => {
                let pos = self.pos();
                let expr = self.expr()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Node::new(NodeKind::ExpressionStatement, pos).with_children(vec![expr]))
            }
        }
    }

    fn block(&mut self) -> Result<Node, ParseError> {
        let pos = self.pos();
        self.expect(TokenKind::LBrace)?;
        let mut statements = Vec::new();
        while !self.at(TokenKind::RBrace) {
            statements.push(self.statement()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Node::new(NodeKind::Block, pos).with_children(statements))
    }

    fn param_list(&mut self) -> Result<Vec<Node>, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.at(TokenKind::RParen) {
            let (name, pos) = self.expect_identifier()?;
            params.push(Node::leaf(NodeKind::Identifier, pos, Literal::Identifier(name)));
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(params)
    }

    fn function_decl(&mut self) -> Result<Node, ParseError> {
        let pos = self.pos();
        self.advance();
        let (name, _) = self.expect_identifier()?;
        let mut children = self.param_list()?;
        children.push(self.block()?);
        Ok(Node::leaf(NodeKind::Function, pos, Literal::Identifier(name)).with_children(children))
    }

    fn access_modifier(&mut self) -> Access {
        if self.eat(TokenKind::KwPublic) {
            Access::Public
        } else if self.eat(TokenKind::KwPrivate) {
            Access::Private
        } else if self.eat(TokenKind::KwProtected) {
            Access::Protected
        } else {
            Access::Public
        }
    }

    /// A method name is an ordinary identifier, except for the reserved
    /// `__op` prefix, which spells an operator overload: `__op@<sym>`
    /// (§4.F "Operator overloading"). The `@` and the operator symbol are
    /// lexed as separate tokens, so this re-assembles them into the single
    /// mangled name `crate::class::mangle_operator` produces at class-decl
    /// evaluation time, e.g. `__op@+`, `__op@[]=`, `__op@~=`.
    fn method_name(&mut self) -> Result<String, ParseError> {
        let (name, pos) = self.expect_identifier()?;
        if name != "__op" {
            return Ok(name);
        }
        self.expect(TokenKind::At)?;
        let symbol = match self.peek().kind {
            TokenKind::LBracket => {
                self.advance();
                self.expect(TokenKind::RBracket)?;
                if self.eat(TokenKind::Eq) {
                    "[]="
                } else if self.eat(TokenKind::Lt) {
                    "[]<"
                } else {
                    "[]"
                }
            }
            TokenKind::DotDot => {
                self.advance();
                ".."
            }
            TokenKind::TildeEq => {
                self.advance();
                "~="
            }
            TokenKind::EqEq => {
                self.advance();
                "=="
            }
            TokenKind::NotEq => {
                self.advance();
                "!="
            }
            TokenKind::LtEq => {
                self.advance();
                "<="
            }
            TokenKind::GtEq => {
                self.advance();
                ">="
            }
            TokenKind::Lt => {
                self.advance();
                "<"
            }
            TokenKind::Gt => {
                self.advance();
                ">"
            }
            TokenKind::Plus => {
                self.advance();
                "+"
            }
            TokenKind::Minus => {
                self.advance();
                "-"
            }
            TokenKind::Star => {
                self.advance();
                "*"
            }
            TokenKind::Slash => {
                self.advance();
                "/"
            }
            TokenKind::Percent => {
                self.advance();
                "%"
            }
            TokenKind::Amp => {
                self.advance();
                "&"
            }
            TokenKind::Pipe => {
                self.advance();
                "|"
            }
            TokenKind::Caret => {
                self.advance();
                "^"
            }
            TokenKind::Shl => {
                self.advance();
                "<<"
            }
            TokenKind::Shr => {
                self.advance();
                ">>"
            }
            ref other => return Err(ParseError { message: format!("expected an operator symbol after '__op@', found {other:?}"), pos }),
        };
        Ok(format!("__op@{symbol}"))
    }

    fn class_decl(&mut self) -> Result<Node, ParseError> {
        let pos = self.pos();
        self.advance();
        let (name, _) = self.expect_identifier()?;

        let mut children = Vec::new();
        if self.eat(TokenKind::KwExtends) {
            loop {
                let (parent, parent_pos) = self.expect_identifier()?;
                children.push(Node::leaf(NodeKind::Identifier, parent_pos, Literal::Identifier(parent)));
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }

        self.expect(TokenKind::LBrace)?;
        while !self.at(TokenKind::RBrace) {
            let access = self.access_modifier();
            if self.at(TokenKind::KwMethod) {
                let member_pos = self.pos();
                self.advance();
                let name = self.method_name()?;
                let mut method_children = self.param_list()?;
                method_children.push(self.block()?);
                children.push(
                    Node::leaf(NodeKind::Method, member_pos, Literal::Identifier(name))
                        .with_access(access)
                        .with_children(method_children),
                );
            } else {
                let (name, member_pos) = self.expect_identifier()?;
                let mut attr = Node::leaf(NodeKind::Attribute, member_pos, Literal::Identifier(name)).with_access(access);
                if self.eat(TokenKind::Eq) {
                    attr.children.push(self.expr()?);
                }
                self.expect(TokenKind::Semicolon)?;
                children.push(attr);
            }
        }
        self.expect(TokenKind::RBrace)?;

        Ok(Node::leaf(NodeKind::Class, pos, Literal::Identifier(name)).with_children(children))
    }

    fn structure_decl(&mut self) -> Result<Node, ParseError> {
        let pos = self.pos();
        self.advance();
        let (name, _) = self.expect_identifier()?;
        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.at(TokenKind::RBrace) {
            let (field, field_pos) = self.expect_identifier()?;
            fields.push(Node::leaf(NodeKind::Identifier, field_pos, Literal::Identifier(field)));
            self.expect(TokenKind::Semicolon)?;
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Node::leaf(NodeKind::Structure, pos, Literal::Identifier(name)).with_children(fields))
    }

    fn const_decl(&mut self) -> Result<Node, ParseError> {
        let pos = self.pos();
        self.advance();
        let (name, _) = self.expect_identifier()?;
        self.expect(TokenKind::Eq)?;
        let value = self.expr()?;
        self.expect(TokenKind::Semicolon)?;
        Ok(Node::leaf(NodeKind::ConstantDecl, pos, Literal::Identifier(name)).with_children(vec![value]))
    }

    fn if_stmt(&mut self) -> Result<Node, ParseError> {
        let pos = self.pos();
        self.advance();
        self.expect(TokenKind::LParen)?;
        let cond = self.expr()?;
        self.expect(TokenKind::RParen)?;
        let then_block = self.block()?;
        let mut children = vec![cond, then_block];
        if self.eat(TokenKind::KwElse) {
            let else_branch = if self.at(TokenKind::KwIf) { self.if_stmt()? } else { self.block()? };
            children.push(else_branch);
        }
        Ok(Node::new(NodeKind::If, pos).with_children(children))
    }

    fn while_stmt(&mut self) -> Result<Node, ParseError> {
        let pos = self.pos();
        self.advance();
        self.expect(TokenKind::LParen)?;
        let cond = self.expr()?;
        self.expect(TokenKind::RParen)?;
        let body = self.block()?;
        Ok(Node::new(NodeKind::While, pos).with_children(vec![cond, body]))
    }

    fn do_while_stmt(&mut self) -> Result<Node, ParseError> {
        let pos = self.pos();
        self.advance();
        let body = self.block()?;
        self.expect(TokenKind::KwWhile)?;
        self.expect(TokenKind::LParen)?;
        let cond = self.expr()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Semicolon)?;
        Ok(Node::new(NodeKind::DoWhile, pos).with_children(vec![body, cond]))
    }

    fn for_stmt(&mut self) -> Result<Node, ParseError> {
        let pos = self.pos();
        self.advance();
        self.expect(TokenKind::LParen)?;
        let init = if self.at(TokenKind::Semicolon) {
            Node::new(NodeKind::Block, self.pos())
        } else {
            self.expr()?
        };
        self.expect(TokenKind::Semicolon)?;
        let cond = self.expr()?;
        self.expect(TokenKind::Semicolon)?;
        let step = if self.at(TokenKind::RParen) { Node::new(NodeKind::Block, self.pos()) } else { self.expr()? };
        self.expect(TokenKind::RParen)?;
        let body = self.block()?;
        Ok(Node::new(NodeKind::For, pos).with_children(vec![init, cond, step, body]))
    }

    fn foreach_stmt(&mut self) -> Result<Node, ParseError> {
        let pos = self.pos();
        self.advance();
        self.expect(TokenKind::LParen)?;
        let (first, first_pos) = self.expect_identifier()?;
        if self.eat(TokenKind::Colon) {
            let (second, second_pos) = self.expect_identifier()?;
            self.expect(TokenKind::KwOf)?;
            let map_expr = self.expr()?;
            self.expect(TokenKind::RParen)?;
            let body = self.block()?;
            let key = Node::leaf(NodeKind::Identifier, first_pos, Literal::Identifier(first));
            let value = Node::leaf(NodeKind::Identifier, second_pos, Literal::Identifier(second));
            Ok(Node::new(NodeKind::ForeachMap, pos).with_children(vec![key, value, map_expr, body]))
        } else {
            self.expect(TokenKind::KwOf)?;
            let iterable = self.expr()?;
            self.expect(TokenKind::RParen)?;
            let body = self.block()?;
            let item = Node::leaf(NodeKind::Identifier, first_pos, Literal::Identifier(first));
            Ok(Node::new(NodeKind::Foreach, pos).with_children(vec![item, iterable, body]))
        }
    }

    fn switch_stmt(&mut self) -> Result<Node, ParseError> {
        let pos = self.pos();
        self.advance();
        self.expect(TokenKind::LParen)?;
        let subject = self.expr()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::LBrace)?;

        let mut children = vec![subject];
        while !self.at(TokenKind::RBrace) {
            if self.eat(TokenKind::KwCase) {
                let case_pos = self.pos();
                let value = self.expr()?;
                self.expect(TokenKind::Colon)?;
                let mut stmts = vec![value];
                while !matches!(self.peek().kind, TokenKind::KwCase | TokenKind::KwDefault | TokenKind::RBrace) {
                    stmts.push(self.statement()?);
                }
                children.push(Node::new(NodeKind::Case, case_pos).with_children(stmts));
            } else {
                let default_pos = self.pos();
                self.expect(TokenKind::KwDefault)?;
                self.expect(TokenKind::Colon)?;
                let mut stmts = Vec::new();
                while !matches!(self.peek().kind, TokenKind::KwCase | TokenKind::KwDefault | TokenKind::RBrace) {
                    stmts.push(self.statement()?);
                }
                children.push(Node::new(NodeKind::Default, default_pos).with_children(stmts));
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Node::new(NodeKind::Switch, pos).with_children(children))
    }

    fn try_stmt(&mut self) -> Result<Node, ParseError> {
        let pos = self.pos();
        self.advance();
        let try_block = self.block()?;
        let mut children = vec![try_block];

        if self.eat(TokenKind::KwCatch) {
            let catch_pos = self.pos();
            self.expect(TokenKind::LParen)?;
            let (name, _) = self.expect_identifier()?;
            self.expect(TokenKind::RParen)?;
            let catch_block = self.block()?;
            children.push(Node::leaf(NodeKind::Catch, catch_pos, Literal::Identifier(name)).with_children(vec![catch_block]));
        }
        if self.eat(TokenKind::KwFinally) {
            let finally_pos = self.pos();
            let finally_block = self.block()?;
            children.push(Node::new(NodeKind::Finally, finally_pos).with_children(vec![finally_block]));
        }

        Ok(Node::new(NodeKind::Try, pos).with_children(children))
    }

    // ---- expressions ----

    fn expr(&mut self) -> Result<Node, ParseError> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Node, ParseError> {
        let target = self.ternary()?;

        let compound = match self.peek().kind {
            TokenKind::PlusEq => Some(OperatorKind::Add),
            TokenKind::MinusEq => Some(OperatorKind::Sub),
            TokenKind::StarEq => Some(OperatorKind::Mul),
            TokenKind::SlashEq => Some(OperatorKind::Div),
            TokenKind::PercentEq => Some(OperatorKind::Mod),
            TokenKind::AmpEq => Some(OperatorKind::BitAnd),
            TokenKind::PipeEq => Some(OperatorKind::BitOr),
            TokenKind::CaretEq => Some(OperatorKind::BitXor),
            TokenKind::ShlEq => Some(OperatorKind::Shl),
            TokenKind::ShrEq => Some(OperatorKind::Shr),
            _ => None,
        };
        if let Some(op) = compound {
            let pos = self.pos();
            self.advance();
            let rhs = self.assignment()?;
            let combined = Node::new(NodeKind::BinaryOp(op), pos).with_children(vec![target.clone(), rhs]);
            return Ok(Node::new(NodeKind::Assign, pos).with_children(vec![target, combined]));
        }

        if self.at(TokenKind::Eq) {
            let pos = self.pos();
            self.advance();
            let value = self.assignment()?;
            return Ok(Node::new(NodeKind::Assign, pos).with_children(vec![target, value]));
        }

        Ok(target)
    }

    fn ternary(&mut self) -> Result<Node, ParseError> {
        let cond = self.logical_or()?;
        if self.eat(TokenKind::Question) {
            let pos = self.pos();
            let then_expr = self.expr()?;
            self.expect(TokenKind::Colon)?;
            let else_expr = self.ternary()?;
            return Ok(Node::new(NodeKind::Ternary, pos).with_children(vec![cond, then_expr, else_expr]));
        }
        Ok(cond)
    }

    fn binary_left_assoc(
        &mut self,
        next: fn(&mut Self) -> Result<Node, ParseError>,
        ops: &[(TokenKind, OperatorKind)],
    ) -> Result<Node, ParseError> {
        let mut node = next(self)?;
        'outer: loop {
            for (token, op) in ops {
                if self.peek().kind == *token {
                    let pos = self.pos();
                    self.advance();
                    let rhs = next(self)?;
                    node = Node::new(NodeKind::BinaryOp(*op), pos).with_children(vec![node, rhs]);
                    continue 'outer;
                }
            }
            break;
        }
        Ok(node)
    }

    fn logical_or(&mut self) -> Result<Node, ParseError> {
        self.binary_left_assoc(Self::logical_and, &[(TokenKind::PipePipe, OperatorKind::Or)])
    }

    fn logical_and(&mut self) -> Result<Node, ParseError> {
        self.binary_left_assoc(Self::bit_or, &[(TokenKind::AmpAmp, OperatorKind::And)])
    }

    fn bit_or(&mut self) -> Result<Node, ParseError> {
        self.binary_left_assoc(Self::bit_xor, &[(TokenKind::Pipe, OperatorKind::BitOr)])
    }

    fn bit_xor(&mut self) -> Result<Node, ParseError> {
        self.binary_left_assoc(Self::bit_and, &[(TokenKind::Caret, OperatorKind::BitXor)])
    }

    fn bit_and(&mut self) -> Result<Node, ParseError> {
        self.binary_left_assoc(Self::equality, &[(TokenKind::Amp, OperatorKind::BitAnd)])
    }

    fn equality(&mut self) -> Result<Node, ParseError> {
        self.binary_left_assoc(
            Self::relational,
            &[(TokenKind::EqEq, OperatorKind::Eq), (TokenKind::NotEq, OperatorKind::Ne)],
        )
    }

    fn relational(&mut self) -> Result<Node, ParseError> {
        self.binary_left_assoc(
            Self::range_expr,
            &[
                (TokenKind::Lt, OperatorKind::Lt),
                (TokenKind::Gt, OperatorKind::Gt),
                (TokenKind::LtEq, OperatorKind::Le),
                (TokenKind::GtEq, OperatorKind::Ge),
            ],
        )
    }

    fn range_expr(&mut self) -> Result<Node, ParseError> {
        let lhs = self.shift()?;
        if self.at(TokenKind::DotDot) {
            let pos = self.pos();
            self.advance();
            let rhs = self.shift()?;
            return Ok(Node::new(NodeKind::BinaryOp(OperatorKind::Range), pos).with_children(vec![lhs, rhs]));
        }
        Ok(lhs)
    }

    fn shift(&mut self) -> Result<Node, ParseError> {
        self.binary_left_assoc(
            Self::additive,
            &[(TokenKind::Shl, OperatorKind::Shl), (TokenKind::Shr, OperatorKind::Shr)],
        )
    }

    fn additive(&mut self) -> Result<Node, ParseError> {
        self.binary_left_assoc(
            Self::multiplicative,
            &[(TokenKind::Plus, OperatorKind::Add), (TokenKind::Minus, OperatorKind::Sub)],
        )
    }

    fn multiplicative(&mut self) -> Result<Node, ParseError> {
        self.binary_left_assoc(
            Self::regex_match,
            &[
                (TokenKind::Star, OperatorKind::Mul),
                (TokenKind::Slash, OperatorKind::Div),
                (TokenKind::Percent, OperatorKind::Mod),
            ],
        )
    }

    fn regex_match(&mut self) -> Result<Node, ParseError> {
        self.binary_left_assoc(Self::dot_concat, &[(TokenKind::TildeEq, OperatorKind::RegexMatch)])
    }

    fn dot_concat(&mut self) -> Result<Node, ParseError> {
        let mut node = self.unary()?;
        while self.at(TokenKind::Dot) {
            let pos = self.pos();
            self.advance();
            let rhs = self.unary()?;
            node = Node::new(NodeKind::Dot, pos).with_children(vec![node, rhs]);
        }
        Ok(node)
    }

    fn unary(&mut self) -> Result<Node, ParseError> {
        let op = match self.peek().kind {
            TokenKind::Minus => Some(UnaryOperatorKind::Neg),
            TokenKind::Not => Some(UnaryOperatorKind::Not),
            TokenKind::Tilde => Some(UnaryOperatorKind::BitNot),
            TokenKind::PlusPlus => Some(UnaryOperatorKind::PreIncrement),
            TokenKind::MinusMinus => Some(UnaryOperatorKind::PreDecrement),
            _ => None,
        };
        if let Some(op) = op {
            let pos = self.pos();
            self.advance();
            let operand = self.unary()?;
            return Ok(Node::new(NodeKind::UnaryOp(op), pos).with_children(vec![operand]));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Node, ParseError> {
        let mut node = self.primary()?;
        loop {
            match self.peek().kind {
                TokenKind::LParen => {
                    let pos = self.pos();
                    self.advance();
                    let mut children = vec![node];
                    while !self.at(TokenKind::RParen) {
                        children.push(self.expr()?);
                        if !self.eat(TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(TokenKind::RParen)?;
                    node = Node::new(NodeKind::Call, pos).with_children(children);
                }
                TokenKind::LBracket => {
                    let pos = self.pos();
                    self.advance();
                    let index = self.expr()?;
                    self.expect(TokenKind::RBracket)?;
                    node = Node::new(NodeKind::BinaryOp(OperatorKind::Index), pos).with_children(vec![node, index]);
                }
                TokenKind::Arrow => {
                    self.advance();
                    let (name, attr_pos) = self.expect_identifier()?;
                    let attr = Node::leaf(NodeKind::Identifier, attr_pos, Literal::Identifier(name));
                    node = match node.kind {
                        NodeKind::IdentifierChain => node.with_children({
                            let mut children = node.children;
                            children.push(attr);
                            children
                        }),
                        _ => {
                            let pos = node.pos;
                            Node::new(NodeKind::IdentifierChain, pos).with_children(vec![node, attr])
                        }
                    };
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn primary(&mut self) -> Result<Node, ParseError> {
        let pos = self.pos();
        match self.advance().kind {
            TokenKind::Integer(n) => Ok(Node::leaf(NodeKind::IntegerLiteral, pos, Literal::Integer(n))),
            TokenKind::Float(f) => Ok(Node::leaf(NodeKind::FloatLiteral, pos, Literal::Float(f))),
            TokenKind::Char(c) => Ok(Node::leaf(NodeKind::CharLiteral, pos, Literal::Char(c))),
            TokenKind::String(s) => Ok(Node::leaf(NodeKind::StringLiteral, pos, Literal::String(s))),
            TokenKind::Identifier(name) => Ok(Node::leaf(NodeKind::Identifier, pos, Literal::Identifier(name))),
            TokenKind::KwTrue => Ok(Node::leaf(NodeKind::BooleanLiteral, pos, Literal::Boolean(true))),
            TokenKind::KwFalse => Ok(Node::leaf(NodeKind::BooleanLiteral, pos, Literal::Boolean(false))),
            TokenKind::KwNil => Ok(Node::new(NodeKind::NilLiteral, pos)),
            TokenKind::Dollar => {
                let inner = self.unary()?;
                Ok(Node::new(NodeKind::Dollar, pos).with_children(vec![inner]))
            }
            TokenKind::LParen => {
                let inner = self.expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::KwNew => {
                let (class_name, class_pos) = self.expect_identifier()?;
                self.expect(TokenKind::LParen)?;
                let mut children = vec![Node::leaf(NodeKind::Identifier, class_pos, Literal::Identifier(class_name))];
                while !self.at(TokenKind::RParen) {
                    children.push(self.expr()?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RParen)?;
                Ok(Node::new(NodeKind::New, pos).with_children(children))
            }
            TokenKind::LBrace => self.collection_literal(pos),
            other => Err(ParseError { message: format!("unexpected token {other:?}"), pos }),
        }
    }

    /// `{1, 2, 3}` is a vector; `{a: 1, b: 2}` is a map. Both share `{...}`
    /// syntax, disambiguated by whether the first entry contains a `:`.
    fn collection_literal(&mut self, pos: SourcePos) -> Result<Node, ParseError> {
        if self.eat(TokenKind::RBrace) {
            return Ok(Node::new(NodeKind::VectorLiteral, pos));
        }

        let first_key = self.expr()?;
        if self.eat(TokenKind::Colon) {
            let first_value = self.expr()?;
            let mut pairs = vec![Node::new(NodeKind::MapPair, pos).with_children(vec![first_key, first_value])];
            while self.eat(TokenKind::Comma) {
                let pair_pos = self.pos();
                let key = self.expr()?;
                self.expect(TokenKind::Colon)?;
                let value = self.expr()?;
                pairs.push(Node::new(NodeKind::MapPair, pair_pos).with_children(vec![key, value]));
            }
            self.expect(TokenKind::RBrace)?;
            Ok(Node::new(NodeKind::MapLiteral, pos).with_children(pairs))
        } else {
            let mut items = vec![first_key];
            while self.eat(TokenKind::Comma) {
                items.push(self.expr()?);
            }
            self.expect(TokenKind::RBrace)?;
            Ok(Node::new(NodeKind::VectorLiteral, pos).with_children(items))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arithmetic_with_expected_precedence() {
        let program = parse("1 + 2 * 3;").unwrap();
        let stmt = &program.children[0];
        let expr = &stmt.children[0];
        assert_eq!(expr.kind, NodeKind::BinaryOp(OperatorKind::Add));
        assert_eq!(expr.children[1].kind, NodeKind::BinaryOp(OperatorKind::Mul));
    }

    #[test]
    fn parses_attribute_chain_and_method_call() {
        let program = parse("me->x->foo(1);").unwrap();
        let call = &program.children[0].children[0];
        assert_eq!(call.kind, NodeKind::Call);
        assert_eq!(call.children[0].kind, NodeKind::IdentifierChain);
        assert_eq!(call.children[0].children.len(), 3);
    }

    #[test]
    fn parses_class_with_attributes_and_methods() {
        let program = parse(
            r#"
            class Counter {
                private n = 0;
                method increment() {
                    me->n = me->n + 1;
                }
            }
            "#,
        )
        .unwrap();
        let class = &program.children[0];
        assert_eq!(class.kind, NodeKind::Class);
        assert_eq!(class.children[0].kind, NodeKind::Attribute);
        assert_eq!(class.children[0].access, Access::Private);
        assert_eq!(class.children[1].kind, NodeKind::Method);
    }

    #[test]
    fn parses_compound_assignment_as_sugar() {
        let program = parse("x += 1;").unwrap();
        let assign = &program.children[0].children[0];
        assert_eq!(assign.kind, NodeKind::Assign);
        assert_eq!(assign.children[1].kind, NodeKind::BinaryOp(OperatorKind::Add));
    }

    #[test]
    fn parses_operator_overload_method_name() {
        let program = parse(
            r#"
            class V {
                public x;
                method __op@+(o) { return me->x; }
                method __op@[]=(i, v) { return v; }
            }
            "#,
        )
        .unwrap();
        let class = &program.children[0];
        assert_eq!(class.children[1].identifier_name(), "__op@+");
        assert_eq!(class.children[2].identifier_name(), "__op@[]=");
    }

    #[test]
    fn parses_foreach_over_map() {
        let program = parse("foreach (k : v of m) { println(k); }").unwrap();
        let stmt = &program.children[0];
        assert_eq!(stmt.kind, NodeKind::ForeachMap);
    }
}
