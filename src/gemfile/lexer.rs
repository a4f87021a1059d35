//! Gemfile tokenizer.
//!
//! Produces the token stream the evaluator and grammar consume: identifiers
//! and keywords, string literals (with interpolation metadata), symbols,
//! trailing-colon keys, numbers, operators, structure characters, and
//! `%w[...]`/`%i[...]` arrays. Every token carries its line number, and the
//! lexer backtracks through a save/restore marker.

use super::GemfileError;

/// Operator tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `&&`
    AndAnd,
    /// `||`
    OrOr,
    /// `!`
    Not,
    /// `=`
    Assign,
    /// `.`
    Dot,
    /// `::`
    Scope,
    /// `|`
    Pipe,
    /// `?`
    Question,
    /// `=>`
    HashRocket,
    /// `->`
    Lambda,
}

/// Token kinds
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str { value: String, interpolated: bool },
    Symbol(String),
    /// `name:` keyword-argument key
    Key(String),
    Int(i64),
    Float(f64),
    True,
    False,
    Nil,
    Op(Op),
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    /// `%w[...]`
    Words(Vec<String>),
    /// `%i[...]`
    Symbols(Vec<String>),
    Newline,
    Eof,
}

/// One token with its source line
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
}

/// Position marker for backtracking
#[derive(Debug, Clone, Copy)]
pub struct Marker {
    pos: usize,
    line: u32,
}

/// Hand-rolled tokenizer over one source buffer
#[derive(Debug)]
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
}

impl Lexer {
    #[must_use]
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
        }
    }

    /// Save the current position
    #[must_use]
    pub fn mark(&self) -> Marker {
        Marker {
            pos: self.pos,
            line: self.line,
        }
    }

    /// Restore a saved position
    pub fn reset(&mut self, marker: Marker) {
        self.pos = marker.pos;
        self.line = marker.line;
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn error(&self, message: impl Into<String>) -> GemfileError {
        GemfileError::Lex {
            line: self.line,
            message: message.into(),
        }
    }

    fn token(&self, kind: TokenKind) -> Token {
        Token {
            kind,
            line: self.line,
        }
    }

    /// Produce the next token.
    ///
    /// # Errors
    ///
    /// Returns a line-numbered error on unterminated literals or characters
    /// outside the supported subset.
    pub fn next_token(&mut self) -> Result<Token, GemfileError> {
        loop {
            match self.peek() {
                None => return Ok(self.token(TokenKind::Eof)),
                Some(' ' | '\t' | '\r') => {
                    self.pos += 1;
                }
                // Line continuation
                Some('\\') if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                Some('#') => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }

        let Some(ch) = self.peek() else {
            return Ok(self.token(TokenKind::Eof));
        };

        match ch {
            '\n' | ';' => {
                let token = self.token(TokenKind::Newline);
                self.pos += 1;
                if ch == '\n' {
                    self.line += 1;
                }
                Ok(token)
            }
            '"' | '\'' => self.lex_string(ch),
            '%' if matches!(self.peek_at(1), Some('w' | 'i')) => self.lex_percent_array(),
            ':' => {
                if self.peek_at(1) == Some(':') {
                    self.pos += 2;
                    Ok(self.token(TokenKind::Op(Op::Scope)))
                } else if self.peek_at(1).is_some_and(is_ident_start) {
                    self.pos += 1;
                    let name = self.lex_ident_text();
                    Ok(self.token(TokenKind::Symbol(name)))
                } else {
                    Err(self.error("stray ':'"))
                }
            }
            '0'..='9' => self.lex_number(),
            c if is_ident_start(c) => Ok(self.lex_ident_or_key()),
            _ => self.lex_operator(),
        }
    }

    fn lex_string(&mut self, quote: char) -> Result<Token, GemfileError> {
        self.pos += 1;
        let mut value = String::new();

        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string literal")),
                Some(c) if c == quote => break,
                Some('\\') => match self.bump() {
                    None => return Err(self.error("unterminated string literal")),
                    Some('n') if quote == '"' => value.push('\n'),
                    Some('t') if quote == '"' => value.push('\t'),
                    Some(escaped) => value.push(escaped),
                },
                Some('\n') => return Err(self.error("unterminated string literal")),
                Some(c) => value.push(c),
            }
        }

        let interpolated = quote == '"' && value.contains("#{");
        Ok(self.token(TokenKind::Str {
            value,
            interpolated,
        }))
    }

    fn lex_percent_array(&mut self) -> Result<Token, GemfileError> {
        let style = self.peek_at(1).unwrap_or('w');
        let Some(open) = self.peek_at(2) else {
            return Err(self.error("unterminated percent array"));
        };
        let close = match open {
            '[' => ']',
            '(' => ')',
            '{' => '}',
            '<' => '>',
            _ => return Err(self.error(format!("unsupported percent delimiter {open:?}"))),
        };
        self.pos += 3;

        let mut content = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated percent array")),
                Some(c) if c == close => break,
                Some('\n') => {
                    self.line += 1;
                    content.push(' ');
                }
                Some(c) => content.push(c),
            }
        }

        let words: Vec<String> = content
            .split_whitespace()
            .map(str::to_string)
            .collect();

        Ok(self.token(match style {
            'i' => TokenKind::Symbols(words),
            _ => TokenKind::Words(words),
        }))
    }

    fn lex_number(&mut self) -> Result<Token, GemfileError> {
        let mut text = String::new();
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            if let Some(c) = self.bump()
                && c != '_'
            {
                text.push(c);
            }
        }

        // A dot starts the fractional part only when a digit follows;
        // otherwise it is a method-call dot.
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                if let Some(c) = self.bump() {
                    text.push(c);
                }
            }
            let value = text
                .parse::<f64>()
                .map_err(|_| self.error(format!("invalid float literal {text:?}")))?;
            return Ok(self.token(TokenKind::Float(value)));
        }

        let value = text
            .parse::<i64>()
            .map_err(|_| self.error(format!("invalid integer literal {text:?}")))?;
        Ok(self.token(TokenKind::Int(value)))
    }

    fn lex_ident_text(&mut self) -> String {
        let mut name = String::new();
        while self.peek().is_some_and(is_ident_continue) {
            if let Some(c) = self.bump() {
                name.push(c);
            }
        }
        // Ruby method names may end in ? or !
        if matches!(self.peek(), Some('?' | '!'))
            && let Some(c) = self.bump()
        {
            name.push(c);
        }
        name
    }

    fn lex_ident_or_key(&mut self) -> Token {
        let name = self.lex_ident_text();

        // `name:` immediately followed by a colon (but not `::`) is a
        // keyword-argument key
        if self.peek() == Some(':') && self.peek_at(1) != Some(':') && !name.ends_with(['?', '!']) {
            self.pos += 1;
            return self.token(TokenKind::Key(name));
        }

        match name.as_str() {
            "true" => self.token(TokenKind::True),
            "false" => self.token(TokenKind::False),
            "nil" => self.token(TokenKind::Nil),
            _ => self.token(TokenKind::Ident(name)),
        }
    }

    fn lex_operator(&mut self) -> Result<Token, GemfileError> {
        let ch = self.bump().unwrap_or('\0');
        let two = self.peek();

        let kind = match (ch, two) {
            ('=', Some('=')) => {
                self.pos += 1;
                TokenKind::Op(Op::Eq)
            }
            ('=', Some('>')) => {
                self.pos += 1;
                TokenKind::Op(Op::HashRocket)
            }
            ('=', _) => TokenKind::Op(Op::Assign),
            ('!', Some('=')) => {
                self.pos += 1;
                TokenKind::Op(Op::NotEq)
            }
            ('!', _) => TokenKind::Op(Op::Not),
            ('>', Some('=')) => {
                self.pos += 1;
                TokenKind::Op(Op::Ge)
            }
            ('>', _) => TokenKind::Op(Op::Gt),
            ('<', Some('=')) => {
                self.pos += 1;
                TokenKind::Op(Op::Le)
            }
            ('<', _) => TokenKind::Op(Op::Lt),
            ('&', Some('&')) => {
                self.pos += 1;
                TokenKind::Op(Op::AndAnd)
            }
            ('|', Some('|')) => {
                self.pos += 1;
                TokenKind::Op(Op::OrOr)
            }
            ('|', _) => TokenKind::Op(Op::Pipe),
            ('-', Some('>')) => {
                self.pos += 1;
                TokenKind::Op(Op::Lambda)
            }
            ('.', _) => TokenKind::Op(Op::Dot),
            ('?', _) => TokenKind::Op(Op::Question),
            ('{', _) => TokenKind::LBrace,
            ('}', _) => TokenKind::RBrace,
            ('[', _) => TokenKind::LBracket,
            (']', _) => TokenKind::RBracket,
            ('(', _) => TokenKind::LParen,
            (')', _) => TokenKind::RParen,
            (',', _) => TokenKind::Comma,
            _ => return Err(self.error(format!("unexpected character {ch:?}"))),
        };

        Ok(self.token(kind))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(source);
        let mut kinds = Vec::new();
        loop {
            let token = lexer.next_token().unwrap();
            let done = token.kind == TokenKind::Eof;
            kinds.push(token.kind);
            if done {
                break;
            }
        }
        kinds
    }

    #[test]
    fn gem_line() {
        let kinds = lex(r#"gem "rails", "~> 7.0", require: false"#);
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident("gem".to_string()),
                TokenKind::Str {
                    value: "rails".to_string(),
                    interpolated: false
                },
                TokenKind::Comma,
                TokenKind::Str {
                    value: "~> 7.0".to_string(),
                    interpolated: false
                },
                TokenKind::Comma,
                TokenKind::Key("require".to_string()),
                TokenKind::False,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn symbols_and_hashrocket() {
        let kinds = lex(":development => true");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Symbol("development".to_string()),
                TokenKind::Op(Op::HashRocket),
                TokenKind::True,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn percent_arrays() {
        let kinds = lex("%w[a b c] %i[x y]");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Words(vec!["a".to_string(), "b".to_string(), "c".to_string()]),
                TokenKind::Symbols(vec!["x".to_string(), "y".to_string()]),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn interpolation_is_flagged() {
        let kinds = lex(r#""plain" "with #{var}" 'single #{not}'"#);
        assert_eq!(
            kinds,
            vec![
                TokenKind::Str {
                    value: "plain".to_string(),
                    interpolated: false
                },
                TokenKind::Str {
                    value: "with #{var}".to_string(),
                    interpolated: true
                },
                TokenKind::Str {
                    value: "single #{not}".to_string(),
                    interpolated: false
                },
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_and_lines() {
        let kinds = lex("a # comment\nb");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Newline,
                TokenKind::Ident("b".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn line_numbers_advance() {
        let mut lexer = Lexer::new("a\nb\nc");
        assert_eq!(lexer.next_token().unwrap().line, 1);
        assert_eq!(lexer.next_token().unwrap().line, 1); // newline itself
        assert_eq!(lexer.next_token().unwrap().line, 2);
        assert_eq!(lexer.next_token().unwrap().line, 2);
        assert_eq!(lexer.next_token().unwrap().line, 3);
    }

    #[test]
    fn env_lookup_tokens() {
        let kinds = lex(r#"ENV.key?("CI")"#);
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident("ENV".to_string()),
                TokenKind::Op(Op::Dot),
                TokenKind::Ident("key?".to_string()),
                TokenKind::LParen,
                TokenKind::Str {
                    value: "CI".to_string(),
                    interpolated: false
                },
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comparison_operators() {
        let kinds = lex(">= <= == != && || ::");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Op(Op::Ge),
                TokenKind::Op(Op::Le),
                TokenKind::Op(Op::Eq),
                TokenKind::Op(Op::NotEq),
                TokenKind::Op(Op::AndAnd),
                TokenKind::Op(Op::OrOr),
                TokenKind::Op(Op::Scope),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn marker_backtracks() {
        let mut lexer = Lexer::new("gem \"x\"");
        let marker = lexer.mark();
        let first = lexer.next_token().unwrap();
        lexer.next_token().unwrap();
        lexer.reset(marker);
        assert_eq!(lexer.next_token().unwrap(), first);
    }

    #[test]
    fn rejects_unknown_characters() {
        let mut lexer = Lexer::new("gem @foo");
        lexer.next_token().unwrap();
        assert!(lexer.next_token().is_err());
    }
}
