//! Hand-written lexer producing a flat token stream for [`crate::parser`].
//!
//! Grounded on the token set implied by
//! `examples/original_source/src/parser.y.cpp`'s `%token` declarations
//! (`T_WHILE`, `T_FOR`, `T_FOREACH`, `T_DOLLAR_ID`, operator tokens for
//! every symbol in `hybris::ast::OperatorKind`, ...), re-expressed as a
//! conventional lex-then-parse pipeline instead of a bison scanner.

use hybris::ast::SourcePos;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Integer(i64),
    Float(f64),
    Char(char),
    String(String),
    Identifier(String),

    // keywords
    KwFunction,
    KwMethod,
    KwClass,
    KwStructure,
    KwExtends,
    KwPublic,
    KwPrivate,
    KwProtected,
    KwConst,
    KwNew,
    KwIf,
    KwElse,
    KwWhile,
    KwDo,
    KwFor,
    KwForeach,
    KwOf,
    KwSwitch,
    KwCase,
    KwDefault,
    KwBreak,
    KwNext,
    KwReturn,
    KwThrow,
    KwTry,
    KwCatch,
    KwFinally,
    KwTrue,
    KwFalse,
    KwNil,

    // punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semicolon,
    Comma,
    Colon,
    Question,
    Arrow,
    Dollar,
    /// `@`, used only inside a class body to spell an operator-overload
    /// method name: `method __op@+(o) { ... }` (§4.F "Operator overloading").
    At,

    // operators (mirrors `hybris::ast::OperatorKind`/`UnaryOperatorKind`)
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    Amp,
    Pipe,
    Caret,
    Shl,
    Shr,
    AmpEq,
    PipeEq,
    CaretEq,
    ShlEq,
    ShrEq,
    EqEq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    AmpAmp,
    PipePipe,
    DotDot,
    TildeEq,
    Not,
    Tilde,
    PlusPlus,
    MinusMinus,
    Eq,
    Dot,

    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: SourcePos,
}

#[derive(Debug)]
pub struct LexError {
    pub message: String,
    pub pos: SourcePos,
}

pub fn lex(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self { chars: source.chars().peekable(), line: 1, column: 1 }
    }

    fn pos(&self) -> SourcePos {
        SourcePos { line: self.line, column: self.column }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn run(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let pos = self.pos();
            let Some(c) = self.peek() else {
                tokens.push(Token { kind: TokenKind::Eof, pos });
                break;
            };

            let kind = match c {
                '0'..='9' => self.lex_number()?,
                '"' => self.lex_string()?,
                '\'' => self.lex_char()?,
                c if c.is_alphabetic() || c == '_' => self.lex_word(),
                _ => self.lex_operator()?,
            };
            tokens.push(Token { kind, pos });
        }
        Ok(tokens)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.bump();
                    }
                }
                Some('/') => {
                    let mut clone = self.chars.clone();
                    if clone.next() == Some('/') {
                        while self.peek().is_some_and(|c| c != '\n') {
                            self.bump();
                        }
                        continue;
                    }
                    break;
                }
                _ => break,
            }
        }
    }

    fn lex_number(&mut self) -> Result<TokenKind, LexError> {
        let mut text = String::new();
        let mut is_float = false;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            text.push(self.bump().unwrap());
        }
        if self.peek() == Some('.') {
            let mut lookahead = self.chars.clone();
            lookahead.next();
            if lookahead.next().is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                text.push(self.bump().unwrap());
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    text.push(self.bump().unwrap());
                }
            }
        }
        if is_float {
            text.parse().map(TokenKind::Float).map_err(|_| self.err(format!("invalid float literal '{text}'")))
        } else {
            text.parse().map(TokenKind::Integer).map_err(|_| self.err(format!("invalid integer literal '{text}'")))
        }
    }

    fn lex_string(&mut self) -> Result<TokenKind, LexError> {
        self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('"') => break,
                Some('\\') => {
                    text.push('\\');
                    if let Some(escaped) = self.bump() {
                        text.push(escaped);
                    }
                }
                Some(c) => text.push(c),
                None => return Err(self.err("unterminated string literal".to_string())),
            }
        }
        Ok(TokenKind::String(text))
    }

    fn lex_char(&mut self) -> Result<TokenKind, LexError> {
        self.bump();
        let c = self.bump().ok_or_else(|| self.err("unterminated char literal".to_string()))?;
        if self.bump() != Some('\'') {
            return Err(self.err("char literal must contain exactly one character".to_string()));
        }
        Ok(TokenKind::Char(c))
    }

    fn lex_word(&mut self) -> TokenKind {
        let mut text = String::new();
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            text.push(self.bump().unwrap());
        }
        match text.as_str() {
            "function" => TokenKind::KwFunction,
            "method" => TokenKind::KwMethod,
            "class" => TokenKind::KwClass,
            "structure" => TokenKind::KwStructure,
            "extends" => TokenKind::KwExtends,
            "public" => TokenKind::KwPublic,
            "private" => TokenKind::KwPrivate,
            "protected" => TokenKind::KwProtected,
            "const" => TokenKind::KwConst,
            "new" => TokenKind::KwNew,
            "if" => TokenKind::KwIf,
            "else" => TokenKind::KwElse,
            "while" => TokenKind::KwWhile,
            "do" => TokenKind::KwDo,
            "for" => TokenKind::KwFor,
            "foreach" => TokenKind::KwForeach,
            "of" => TokenKind::KwOf,
            "switch" => TokenKind::KwSwitch,
            "case" => TokenKind::KwCase,
            "default" => TokenKind::KwDefault,
            "break" => TokenKind::KwBreak,
            "next" => TokenKind::KwNext,
            "return" => TokenKind::KwReturn,
            "throw" => TokenKind::KwThrow,
            "try" => TokenKind::KwTry,
            "catch" => TokenKind::KwCatch,
            "finally" => TokenKind::KwFinally,
            "true" => TokenKind::KwTrue,
            "false" => TokenKind::KwFalse,
            "nil" => TokenKind::KwNil,
            _ => TokenKind::Identifier(text),
        }
    }

    fn lex_operator(&mut self) -> Result<TokenKind, LexError> {
        let c = self.bump().unwrap();
        let two = |lexer: &mut Self, expected: char| -> bool {
            if lexer.peek() == Some(expected) {
                lexer.bump();
                true
            } else {
                false
            }
        };
        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ';' => TokenKind::Semicolon,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            '?' => TokenKind::Question,
            '$' => TokenKind::Dollar,
            '@' => TokenKind::At,
            '~' => {
                if two(self, '=') {
                    TokenKind::TildeEq
                } else {
                    TokenKind::Tilde
                }
            }
            '+' => {
                if two(self, '+') {
                    TokenKind::PlusPlus
                } else if two(self, '=') {
                    TokenKind::PlusEq
                } else {
                    TokenKind::Plus
                }
            }
            '-' => {
                if two(self, '-') {
                    TokenKind::MinusMinus
                } else if two(self, '=') {
                    TokenKind::MinusEq
                } else if two(self, '>') {
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            '*' => {
                if two(self, '=') {
                    TokenKind::StarEq
                } else {
                    TokenKind::Star
                }
            }
            '/' => {
                if two(self, '=') {
                    TokenKind::SlashEq
                } else {
                    TokenKind::Slash
                }
            }
            '%' => {
                if two(self, '=') {
                    TokenKind::PercentEq
                } else {
                    TokenKind::Percent
                }
            }
            '&' => {
                if two(self, '&') {
                    TokenKind::AmpAmp
                } else if two(self, '=') {
                    TokenKind::AmpEq
                } else {
                    TokenKind::Amp
                }
            }
            '|' => {
                if two(self, '|') {
                    TokenKind::PipePipe
                } else if two(self, '=') {
                    TokenKind::PipeEq
                } else {
                    TokenKind::Pipe
                }
            }
            '^' => {
                if two(self, '=') {
                    TokenKind::CaretEq
                } else {
                    TokenKind::Caret
                }
            }
            '=' => {
                if two(self, '=') {
                    TokenKind::EqEq
                } else {
                    TokenKind::Eq
                }
            }
            '!' => {
                if two(self, '=') {
                    TokenKind::NotEq
                } else {
                    TokenKind::Not
                }
            }
            '<' => {
                if two(self, '<') {
                    if two(self, '=') {
                        TokenKind::ShlEq
                    } else {
                        TokenKind::Shl
                    }
                } else if two(self, '=') {
                    TokenKind::LtEq
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if two(self, '>') {
                    if two(self, '=') {
                        TokenKind::ShrEq
                    } else {
                        TokenKind::Shr
                    }
                } else if two(self, '=') {
                    TokenKind::GtEq
                } else {
                    TokenKind::Gt
                }
            }
            '.' => {
                if two(self, '.') {
                    TokenKind::DotDot
                } else {
                    TokenKind::Dot
                }
            }
            other => return Err(self.err(format!("unexpected character '{other}'"))),
        };
        Ok(kind)
    }

    fn err(&self, message: String) -> LexError {
        LexError { message, pos: self.pos() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_a_simple_assignment() {
        let tokens = lex("x = 1 + 2;").unwrap();
        let kinds: Vec<TokenKind> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Identifier("x".into()),
                TokenKind::Eq,
                TokenKind::Integer(1),
                TokenKind::Plus,
                TokenKind::Integer(2),
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn distinguishes_arrow_from_minus_minus() {
        let tokens = lex("me->x--").unwrap();
        let kinds: Vec<TokenKind> = tokens.into_iter().map(|t| t.kind).collect();
        assert!(kinds.contains(&TokenKind::Arrow));
        assert!(kinds.contains(&TokenKind::MinusMinus));
    }
}
