//! Recursive-descent expression parser
//!
//! Understands the subset of expressions that appear in model declarations:
//! names and dotted names, calls with positional and keyword arguments,
//! subscripts, `|` unions, and literals. Anything else is captured as opaque
//! source text so a single unusual argument never loses the whole statement.

use super::lexer::{Token, TokenKind};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// Plain or dotted name (`Integer`, `sa.Column`)
    Name(String),
    Str(String),
    Number(String),
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<Keyword>,
    },
    Subscript {
        value: Box<Expr>,
        index: Vec<Expr>,
    },
    Union(Vec<Expr>),
    Opaque(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyword {
    pub name: String,
    pub value: Expr,
}

impl Expr {
    /// Last segment of a (dotted) name, or of a call's callee
    pub fn simple_name(&self) -> Option<&str> {
        match self {
            Expr::Name(name) => name.rsplit('.').next(),
            Expr::Call { func, .. } => func.simple_name(),
            _ => None,
        }
    }

    pub fn is_call_to(&self, name: &str) -> bool {
        matches!(self, Expr::Call { func, .. } if func.simple_name() == Some(name))
    }

    pub fn kwarg(&self, name: &str) -> Option<&Expr> {
        match self {
            Expr::Call { kwargs, .. } => kwargs.iter().find(|k| k.name == name).map(|k| &k.value),
            _ => None,
        }
    }

    pub fn args(&self) -> &[Expr] {
        match self {
            Expr::Call { args, .. } => args,
            _ => &[],
        }
    }

    /// `True` / `False` literal
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Expr::Name(n) if n == "True" => Some(true),
            Expr::Name(n) if n == "False" => Some(false),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Expr::Name(n) if n == "None")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Name(name) | Expr::Number(name) | Expr::Opaque(name) => f.write_str(name),
            Expr::Str(value) => write!(f, "\"{}\"", value),
            Expr::Call { func, args, kwargs } => {
                write!(f, "{}(", func)?;
                let mut first = true;
                for arg in args {
                    if !first {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                    first = false;
                }
                for kw in kwargs {
                    if !first {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}={}", kw.name, kw.value)?;
                    first = false;
                }
                f.write_str(")")
            }
            Expr::Subscript { value, index } => {
                let parts: Vec<String> = index.iter().map(ToString::to_string).collect();
                write!(f, "{}[{}]", value, parts.join(", "))
            }
            Expr::Union(parts) => {
                let parts: Vec<String> = parts.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(" | "))
            }
        }
    }
}

/// Cursor over the tokens of one statement
pub struct ExprParser<'a> {
    tokens: &'a [Token],
    source: &'a str,
    pos: usize,
}

impl<'a> ExprParser<'a> {
    pub fn new(tokens: &'a [Token], source: &'a str) -> Self {
        Self {
            tokens,
            source,
            pos: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    pub fn peek_op(&self, op: &str) -> bool {
        self.peek().is_some_and(|t| t.is_op(op))
    }

    pub fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }

    /// Parse one expression ending at any of `terminators` (or the end)
    pub fn parse_expr(&mut self, terminators: &[&str]) -> Expr {
        let start = self.pos;
        if let Some(expr) = self.parse_union() {
            if self.at_end() || terminators.iter().any(|t| self.peek_op(t)) {
                return expr;
            }
        }
        self.pos = start;
        self.opaque(terminators)
    }

    /// Parse call arguments; the cursor sits just after the opening bracket
    pub fn parse_arguments(&mut self, close: &str) -> Option<(Vec<Expr>, Vec<Keyword>)> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        let terminators = [",", close];

        loop {
            if self.peek_op(close) {
                self.advance();
                return Some((args, kwargs));
            }
            if self.at_end() {
                return None;
            }

            let before = self.pos;
            let is_keyword = matches!(
                (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)),
                (Some(name), Some(eq)) if name.kind == TokenKind::Name && eq.is_op("=")
            );
            if is_keyword {
                let name = self.advance()?.text.clone();
                self.advance();
                let value = self.parse_expr(&terminators);
                kwargs.push(Keyword { name, value });
            } else {
                args.push(self.parse_expr(&terminators));
            }

            if self.pos == before {
                return None;
            }
            if self.peek_op(",") {
                self.advance();
            } else if !self.peek_op(close) {
                return None;
            }
        }
    }

    fn parse_union(&mut self) -> Option<Expr> {
        let first = self.parse_postfix()?;
        if !self.peek_op("|") {
            return Some(first);
        }

        let mut parts = vec![first];
        while self.peek_op("|") {
            self.advance();
            parts.push(self.parse_postfix()?);
        }
        Some(Expr::Union(parts))
    }

    fn parse_postfix(&mut self) -> Option<Expr> {
        let mut expr = self.parse_atom()?;

        loop {
            if self.peek_op(".") {
                self.advance();
                let attr = self.advance()?;
                match (&expr, attr.kind) {
                    (Expr::Name(base), TokenKind::Name) => {
                        expr = Expr::Name(format!("{}.{}", base, attr.text));
                    }
                    _ => return None,
                }
            } else if self.peek_op("(") {
                self.advance();
                let (args, kwargs) = self.parse_arguments(")")?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.peek_op("[") {
                self.advance();
                let (index, kwargs) = self.parse_arguments("]")?;
                if !kwargs.is_empty() {
                    return None;
                }
                expr = Expr::Subscript {
                    value: Box::new(expr),
                    index,
                };
            } else {
                return Some(expr);
            }
        }
    }

    fn parse_atom(&mut self) -> Option<Expr> {
        let token = self.peek()?;
        match token.kind {
            TokenKind::Name => {
                self.advance();
                Some(Expr::Name(token.text.clone()))
            }
            TokenKind::Number => {
                self.advance();
                Some(Expr::Number(token.text.clone()))
            }
            TokenKind::Str => {
                // Adjacent literals concatenate
                let mut value = String::new();
                while let Some(t) = self.peek().filter(|t| t.kind == TokenKind::Str) {
                    value.push_str(&t.text);
                    self.advance();
                }
                Some(Expr::Str(value))
            }
            TokenKind::Op if token.text == "-" => {
                let number = self.tokens.get(self.pos + 1)?;
                if number.kind != TokenKind::Number {
                    return None;
                }
                self.pos += 2;
                Some(Expr::Number(format!("-{}", number.text)))
            }
            TokenKind::Op => None,
        }
    }

    /// Consume balanced tokens up to a top-level terminator and keep the source text
    fn opaque(&mut self, terminators: &[&str]) -> Expr {
        let start = self.pos;
        let mut depth = 0usize;

        while let Some(token) = self.peek() {
            if token.kind == TokenKind::Op {
                let text = token.text.as_str();
                if depth == 0 && terminators.contains(&text) {
                    break;
                }
                match text {
                    "(" | "[" | "{" => depth += 1,
                    ")" | "]" | "}" => {
                        if depth == 0 {
                            break;
                        }
                        depth -= 1;
                    }
                    _ => {}
                }
            }
            self.pos += 1;
        }

        if self.pos == start {
            return Expr::Opaque(String::new());
        }
        let span = &self.source[self.tokens[start].start..self.tokens[self.pos - 1].end];
        Expr::Opaque(span.split_whitespace().collect::<Vec<_>>().join(" "))
    }
}
