//! Tokenizer for model source files
//!
//! Produces bracket-aware logical lines: a newline inside `()`, `[]` or `{}`
//! does not end a statement, a trailing backslash joins physical lines, and
//! comments and blank lines vanish. Each line records its indentation so the
//! block structure can be recovered without an INDENT/DEDENT stream.

use crate::error::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Name,
    Number,
    /// String literal; `text` holds the decoded body without quotes or prefix
    Str,
    Op,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Byte span in the original source
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn is_op(&self, op: &str) -> bool {
        self.kind == TokenKind::Op && self.text == op
    }

    pub fn is_name(&self, name: &str) -> bool {
        self.kind == TokenKind::Name && self.text == name
    }
}

/// One complete statement line (possibly spanning several physical lines)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    pub indent: usize,
    /// 1-based physical line where the statement starts
    pub line: usize,
    pub tokens: Vec<Token>,
}

const THREE_CHAR_OPS: &[&str] = &["**=", "//=", ">>=", "<<=", "..."];
const TWO_CHAR_OPS: &[&str] = &[
    "==", "!=", "<=", ">=", "->", "**", "//", ":=", "+=", "-=", "*=", "/=", "%=", "&=", "|=",
    "^=", "<<", ">>", "@=",
];
const STRING_PREFIXES: &[&str] = &["r", "u", "b", "f", "br", "rb", "fr", "rf"];
const TAB_WIDTH: usize = 8;

/// Split source text into logical lines of tokens
pub fn tokenize(source: &str) -> Result<Vec<LogicalLine>, ParseError> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    /// Open brackets with the line they were opened on
    brackets: Vec<(char, usize)>,
    at_line_start: bool,
    current: Option<LogicalLine>,
    lines: Vec<LogicalLine>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            brackets: Vec::new(),
            at_line_start: true,
            current: None,
            lines: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(offset)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn run(mut self) -> Result<Vec<LogicalLine>, ParseError> {
        while let Some(c) = self.peek() {
            if self.at_line_start && self.brackets.is_empty() {
                self.start_line();
                continue;
            }

            match c {
                ' ' | '\t' | '\r' | '\x0c' => {
                    self.bump();
                }
                '#' => self.skip_comment(),
                '\\' if matches!(self.peek_at(1), Some('\n') | Some('\r')) => {
                    self.bump();
                    if self.peek() == Some('\r') {
                        self.bump();
                    }
                    if self.peek() == Some('\n') {
                        self.bump();
                    }
                }
                '\n' => {
                    self.bump();
                    if self.brackets.is_empty() {
                        self.flush();
                        self.at_line_start = true;
                    }
                }
                '"' | '\'' => self.string(self.pos)?,
                c if c.is_alphabetic() || c == '_' => self.name()?,
                c if c.is_ascii_digit() => self.number(),
                '.' if self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) => self.number(),
                _ => self.operator()?,
            }
        }

        if let Some(&(open, line)) = self.brackets.last() {
            return Err(ParseError::new(line, format!("'{}' was never closed", open)));
        }
        self.flush();
        Ok(self.lines)
    }

    /// Measure indentation and skip blank or comment-only lines
    fn start_line(&mut self) {
        let mut indent = 0;
        while let Some(c) = self.peek() {
            match c {
                ' ' => indent += 1,
                '\t' => indent = (indent / TAB_WIDTH + 1) * TAB_WIDTH,
                '\x0c' | '\r' => {}
                _ => break,
            }
            self.bump();
        }

        match self.peek() {
            Some('#') => self.skip_comment(),
            Some('\n') => {
                self.bump();
            }
            None => {}
            Some(_) => {
                self.at_line_start = false;
                self.current = Some(LogicalLine {
                    indent,
                    line: self.line,
                    tokens: Vec::new(),
                });
            }
        }
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn flush(&mut self) {
        if let Some(line) = self.current.take() {
            if !line.tokens.is_empty() {
                self.lines.push(line);
            }
        }
    }

    fn push(&mut self, kind: TokenKind, text: String, start: usize) {
        let token = Token {
            kind,
            text,
            start,
            end: self.pos,
        };
        let line = self.line;
        self.current
            .get_or_insert_with(|| LogicalLine {
                indent: 0,
                line,
                tokens: Vec::new(),
            })
            .tokens
            .push(token);
    }

    fn name(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.bump();
            } else {
                break;
            }
        }

        let word = &self.src[start..self.pos];
        if matches!(self.peek(), Some('"') | Some('\''))
            && STRING_PREFIXES.contains(&word.to_ascii_lowercase().as_str())
        {
            return self.string(start);
        }

        self.push(TokenKind::Name, word.to_string(), start);
        Ok(())
    }

    fn number(&mut self) {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                let exponent = matches!(c, 'e' | 'E')
                    && !self.src[start..self.pos].starts_with("0x")
                    && matches!(self.peek_at(1), Some('+') | Some('-'));
                self.bump();
                if exponent {
                    self.bump();
                }
            } else {
                break;
            }
        }
        self.push(TokenKind::Number, self.src[start..self.pos].to_string(), start);
    }

    /// Lex a string literal; `start` points at the prefix (if any)
    fn string(&mut self, start: usize) -> Result<(), ParseError> {
        let prefix = self.src[start..self.pos].to_ascii_lowercase();
        let raw = prefix.contains('r');
        let open_line = self.line;

        let quote = self.bump().unwrap_or('"');
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut body = String::new();
        loop {
            let c = match self.bump() {
                Some(c) => c,
                None => {
                    return Err(ParseError::new(open_line, "unterminated string literal"));
                }
            };

            if c == quote {
                if !triple {
                    break;
                }
                if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
                    self.bump();
                    self.bump();
                    break;
                }
                body.push(c);
                continue;
            }

            match c {
                '\n' if !triple => {
                    return Err(ParseError::new(open_line, "unterminated string literal"));
                }
                '\\' => {
                    let escaped = self
                        .bump()
                        .ok_or_else(|| ParseError::new(open_line, "unterminated string literal"))?;
                    if raw {
                        body.push('\\');
                        body.push(escaped);
                    } else {
                        match escaped {
                            'n' => body.push('\n'),
                            't' => body.push('\t'),
                            'r' => body.push('\r'),
                            '0' => body.push('\0'),
                            '\n' => {}
                            '\\' | '\'' | '"' => body.push(escaped),
                            other => {
                                body.push('\\');
                                body.push(other);
                            }
                        }
                    }
                }
                _ => body.push(c),
            }
        }

        self.push(TokenKind::Str, body, start);
        Ok(())
    }

    fn operator(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let rest = &self.src[self.pos..];

        let op = THREE_CHAR_OPS
            .iter()
            .chain(TWO_CHAR_OPS.iter())
            .find(|op| rest.starts_with(**op))
            .map(|op| op.to_string());

        let text = match op {
            Some(op) => {
                for _ in 0..op.len() {
                    self.bump();
                }
                op
            }
            None => {
                let c = self.bump().unwrap_or_default();
                match c {
                    '(' | '[' | '{' => self.brackets.push((c, self.line)),
                    ')' | ']' | '}' => {
                        let expected = match c {
                            ')' => '(',
                            ']' => '[',
                            _ => '{',
                        };
                        match self.brackets.pop() {
                            Some((open, _)) if open == expected => {}
                            _ => {
                                return Err(ParseError::new(
                                    self.line,
                                    format!("unmatched '{}'", c),
                                ));
                            }
                        }
                    }
                    _ => {}
                }
                c.to_string()
            }
        };

        self.push(TokenKind::Op, text, start);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(line: &LogicalLine) -> Vec<&str> {
        line.tokens.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn test_bracket_continuation_joins_lines() {
        let src = "email = Column(\n    String(255),\n    nullable=False,  # required\n)\nx = 1\n";
        let lines = tokenize(src).unwrap();

        assert_eq!(lines.len(), 2);
        assert_eq!(
            texts(&lines[0]),
            vec!["email", "=", "Column", "(", "String", "(", "255", ")", ",", "nullable", "=", "False", ",", ")"]
        );
        assert_eq!(lines[1].line, 5);
    }

    #[test]
    fn test_indentation_and_blank_lines() {
        let src = "class User(Base):\n\n    # comment only\n    id = 1\n\tname = 2\n";
        let lines = tokenize(src).unwrap();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].indent, 0);
        assert_eq!(lines[1].indent, 4);
        assert_eq!(lines[1].line, 4);
        assert_eq!(lines[2].indent, 8);
    }

    #[test]
    fn test_string_prefixes_and_triple_quotes() {
        let src = "a = r'\\d+'\nb = \"\"\"multi\nline\"\"\"\nc = b\"x\"\n";
        let lines = tokenize(src).unwrap();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].tokens[2].kind, TokenKind::Str);
        assert_eq!(lines[0].tokens[2].text, "\\d+");
        assert_eq!(lines[1].tokens[2].text, "multi\nline");
        assert_eq!(lines[2].line, 4);
        assert_eq!(lines[2].tokens[2].text, "x");
    }

    #[test]
    fn test_backslash_continuation() {
        let lines = tokenize("x = 1 + \\\n    2\n").unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(texts(&lines[0]), vec!["x", "=", "1", "+", "2"]);
    }

    #[test]
    fn test_multi_char_operators() {
        let lines = tokenize("a: int | None = b == c\n").unwrap();
        assert_eq!(texts(&lines[0]), vec!["a", ":", "int", "|", "None", "=", "b", "==", "c"]);
    }

    #[test]
    fn test_unterminated_string_reports_line() {
        let err = tokenize("x = 1\ny = 'oops\n").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_unclosed_bracket() {
        let err = tokenize("x = Column(\n  String\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("never closed"));
    }

    #[test]
    fn test_unmatched_closing_bracket() {
        assert!(tokenize("x = 1)\n").is_err());
    }
}
