//! Line-buffered Gemfile evaluator.
//!
//! Sits between the lexer and the grammar and evaluates the restricted Ruby
//! subset real Gemfiles use, so the grammar only ever sees static
//! declarations: `if`/`unless`/`elsif`/`else` blocks and trailing
//! conditionals, variable assignment with string interpolation, `ENV`
//! lookups, the `RUBY_VERSION`/`RUBY_ENGINE`/`RUBY_PLATFORM` constants,
//! version-aware comparison, and `eval_gemfile` includes. Everything else is
//! forwarded untouched; constructs outside the subset abort with a
//! line-numbered diagnostic.

use super::GemfileError;
use super::lexer::{Lexer, Op, Token, TokenKind};
use crate::version::Version;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Logical-line token buffer cap
const MAX_LINE_TOKENS: usize = 128;

/// `if`/`do` nesting cap
const MAX_BLOCK_DEPTH: usize = 16;

/// Variable store cap
const MAX_VARIABLES: usize = 64;

/// `eval_gemfile` recursion cap
const MAX_INCLUDE_DEPTH: u32 = 8;

/// Constants describing the runtime the Gemfile is evaluated against
#[derive(Debug, Clone)]
pub struct EnvConstants {
    pub ruby_version: String,
    pub ruby_engine: String,
    pub ruby_platform: String,
}

impl Default for EnvConstants {
    fn default() -> Self {
        Self {
            ruby_version: "3.3.0".to_string(),
            ruby_engine: "ruby".to_string(),
            ruby_platform: "x86_64-linux".to_string(),
        }
    }
}

/// An evaluated value
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str {
        text: String,
        /// Set when the value descends from `RUBY_VERSION`; comparisons on
        /// flagged values go through the version comparator
        version: bool,
    },
    Bool(bool),
    Int(i64),
    Float(f64),
    Nil,
}

impl Value {
    fn truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Bool(false))
    }

    fn display(&self) -> String {
        match self {
            Self::Str { text, .. } => text.clone(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Nil => String::new(),
        }
    }

    fn is_version(&self) -> bool {
        matches!(self, Self::Str { version: true, .. })
    }
}

/// Variable store with a fixed cap
#[derive(Debug, Default)]
struct VarStore {
    entries: Vec<(String, Value)>,
}

impl VarStore {
    fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    fn set(&mut self, name: &str, value: Value, line: u32) -> Result<(), GemfileError> {
        if let Some(entry) = self.entries.iter_mut().find(|(key, _)| key == name) {
            entry.1 = value;
            return Ok(());
        }
        if self.entries.len() >= MAX_VARIABLES {
            return Err(GemfileError::Eval {
                line,
                message: format!("too many variables (limit {MAX_VARIABLES})"),
            });
        }
        self.entries.push((name.to_string(), value));
        Ok(())
    }
}

/// One open block frame
#[derive(Debug)]
enum Block {
    If {
        active: bool,
        taken: bool,
        parent_active: bool,
    },
    Do {
        /// Whether the opening line was forwarded, and so the closing `end`
        /// must be too
        emitted: bool,
    },
}

/// The evaluator: pull one token at a time with [`Evaluator::next_token`].
///
/// The output queue exists to splice multi-token results (processed lines,
/// included files) into the stream.
#[derive(Debug)]
pub struct Evaluator {
    lexer: Lexer,
    env: EnvConstants,
    vars: VarStore,
    blocks: Vec<Block>,
    queue: VecDeque<Token>,
    include_depth: u32,
    base_dir: PathBuf,
    finished: bool,
    last_line: u32,
}

impl Evaluator {
    #[must_use]
    pub fn new(source: &str, env: EnvConstants, base_dir: &Path) -> Self {
        Self::with_depth(source, env, base_dir, 0)
    }

    fn with_depth(source: &str, env: EnvConstants, base_dir: &Path, include_depth: u32) -> Self {
        Self {
            lexer: Lexer::new(source),
            env,
            vars: VarStore::default(),
            blocks: Vec::new(),
            queue: VecDeque::new(),
            include_depth,
            base_dir: base_dir.to_path_buf(),
            finished: false,
            last_line: 1,
        }
    }

    /// The next filtered token.
    ///
    /// # Errors
    ///
    /// Propagates lexer errors and reports unsupported constructs with their
    /// line number.
    pub fn next_token(&mut self) -> Result<Token, GemfileError> {
        loop {
            if let Some(token) = self.queue.pop_front() {
                return Ok(token);
            }
            if self.finished {
                return Ok(Token {
                    kind: TokenKind::Eof,
                    line: self.last_line,
                });
            }
            self.refill()?;
        }
    }

    /// Accumulate one logical line and process it
    fn refill(&mut self) -> Result<(), GemfileError> {
        let mut tokens: Vec<Token> = Vec::new();

        loop {
            let token = self.lexer.next_token()?;
            self.last_line = token.line;
            match token.kind {
                TokenKind::Newline => {
                    if tokens.is_empty() {
                        continue;
                    }
                    // A trailing comma or operator continues the line
                    let continues = tokens
                        .last()
                        .is_some_and(|t| matches!(t.kind, TokenKind::Comma | TokenKind::Op(_)));
                    if continues {
                        continue;
                    }
                    break;
                }
                TokenKind::Eof => {
                    self.finished = true;
                    break;
                }
                _ => {
                    if tokens.len() >= MAX_LINE_TOKENS {
                        return Err(GemfileError::Eval {
                            line: token.line,
                            message: format!("line exceeds {MAX_LINE_TOKENS} tokens"),
                        });
                    }
                    tokens.push(token);
                }
            }
        }

        if tokens.is_empty() {
            return Ok(());
        }
        self.process_line(tokens)
    }

    fn active(&self) -> bool {
        self.blocks.iter().all(|block| match block {
            Block::If { active, .. } => *active,
            Block::Do { .. } => true,
        })
    }

    fn process_line(&mut self, tokens: Vec<Token>) -> Result<(), GemfileError> {
        let line = tokens.first().map_or(self.last_line, |t| t.line);
        let Some(first) = tokens.first() else {
            return Ok(());
        };

        if let TokenKind::Ident(name) = &first.kind {
            match name.as_str() {
                "if" | "unless" => {
                    return self.open_conditional(&tokens[1..], name == "unless", line);
                }
                "elsif" => return self.reopen_conditional(&tokens[1..], line),
                "else" if tokens.len() == 1 => return self.switch_to_else(line),
                "end" if tokens.len() == 1 => return self.close_block(line),
                "eval_gemfile" => {
                    if self.active() {
                        return self.splice_include(&tokens[1..], line);
                    }
                    return Ok(());
                }
                "def" | "class" | "module" | "while" | "until" | "case" | "begin" | "for"
                | "loop" | "return" | "yield" | "lambda" | "proc" => {
                    return Err(GemfileError::Eval {
                        line,
                        message: format!("unsupported construct `{name}`"),
                    });
                }
                _ => {}
            }

            // Assignment: `var = expr`
            if tokens.get(1).is_some_and(|t| t.kind == TokenKind::Op(Op::Assign)) {
                if self.active() {
                    let value = self.eval_expr(&tokens[2..], line)?;
                    let name = name.clone();
                    return self.vars.set(&name, value, line);
                }
                return Ok(());
            }
        }

        // Trailing `if`/`unless` on an otherwise plain line
        if self.active()
            && let Some(split) = trailing_conditional(&tokens)
        {
            let (position, negate) = split;
            let value = self.eval_expr(&tokens[position + 1..], line)?;
            if value.truthy() != negate {
                let head: Vec<Token> = tokens[..position].to_vec();
                return self.process_line(head);
            }
            return Ok(());
        }

        self.forward_declaration(tokens)
    }

    fn open_conditional(
        &mut self,
        condition: &[Token],
        negate: bool,
        line: u32,
    ) -> Result<(), GemfileError> {
        if self.blocks.len() >= MAX_BLOCK_DEPTH {
            return Err(GemfileError::Eval {
                line,
                message: format!("blocks nested deeper than {MAX_BLOCK_DEPTH}"),
            });
        }

        let parent_active = self.active();
        let taken = if parent_active {
            self.eval_expr(condition, line)?.truthy() != negate
        } else {
            false
        };

        self.blocks.push(Block::If {
            active: parent_active && taken,
            taken,
            parent_active,
        });
        Ok(())
    }

    fn reopen_conditional(&mut self, condition: &[Token], line: u32) -> Result<(), GemfileError> {
        let Some(Block::If {
            taken,
            parent_active,
            ..
        }) = self.blocks.pop()
        else {
            return Err(GemfileError::Eval {
                line,
                message: "`elsif` without an open `if`".to_string(),
            });
        };

        let branch = if parent_active && !taken {
            self.eval_expr(condition, line)?.truthy()
        } else {
            false
        };

        self.blocks.push(Block::If {
            active: parent_active && branch,
            taken: taken || branch,
            parent_active,
        });
        Ok(())
    }

    fn switch_to_else(&mut self, line: u32) -> Result<(), GemfileError> {
        let Some(Block::If {
            taken,
            parent_active,
            ..
        }) = self.blocks.pop()
        else {
            return Err(GemfileError::Eval {
                line,
                message: "`else` without an open `if`".to_string(),
            });
        };

        self.blocks.push(Block::If {
            active: parent_active && !taken,
            taken: true,
            parent_active,
        });
        Ok(())
    }

    fn close_block(&mut self, line: u32) -> Result<(), GemfileError> {
        match self.blocks.pop() {
            Some(Block::If { .. } | Block::Do { emitted: false }) => Ok(()),
            Some(Block::Do { emitted: true }) => {
                self.queue.push_back(Token {
                    kind: TokenKind::Ident("end".to_string()),
                    line,
                });
                self.queue.push_back(Token {
                    kind: TokenKind::Newline,
                    line,
                });
                Ok(())
            }
            None => Err(GemfileError::Eval {
                line,
                message: "`end` without an open block".to_string(),
            }),
        }
    }

    fn splice_include(&mut self, argument: &[Token], line: u32) -> Result<(), GemfileError> {
        if self.include_depth + 1 > MAX_INCLUDE_DEPTH {
            return Err(GemfileError::Eval {
                line,
                message: format!("eval_gemfile nested deeper than {MAX_INCLUDE_DEPTH}"),
            });
        }

        let value = self.eval_expr(argument, line)?;
        let Value::Str { text, .. } = value else {
            return Err(GemfileError::Eval {
                line,
                message: "eval_gemfile expects a path string".to_string(),
            });
        };

        let path = self.base_dir.join(&text);
        let source = std::fs::read_to_string(&path).map_err(|source| GemfileError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let nested_dir = path
            .parent()
            .map_or_else(|| self.base_dir.clone(), Path::to_path_buf);

        // The include shares this file's variable store
        let mut nested = Self::with_depth(
            &source,
            self.env.clone(),
            &nested_dir,
            self.include_depth + 1,
        );
        nested.vars = std::mem::take(&mut self.vars);

        let result = loop {
            match nested.next_token() {
                Ok(token) => {
                    if token.kind == TokenKind::Eof {
                        break Ok(());
                    }
                    self.queue.push_back(token);
                }
                Err(error) => break Err(error),
            }
        };

        self.vars = std::mem::take(&mut nested.vars);
        result
    }

    /// Forward a plain declaration line, substituting variables and
    /// interpolations, and tracking `do` blocks so their `end` lines route
    /// correctly.
    fn forward_declaration(&mut self, tokens: Vec<Token>) -> Result<(), GemfileError> {
        let ends_with_do = tokens
            .last()
            .is_some_and(|t| matches!(&t.kind, TokenKind::Ident(name) if name == "do"));

        if !self.active() {
            if ends_with_do {
                if self.blocks.len() >= MAX_BLOCK_DEPTH {
                    return Err(GemfileError::Eval {
                        line: self.last_line,
                        message: format!("blocks nested deeper than {MAX_BLOCK_DEPTH}"),
                    });
                }
                self.blocks.push(Block::Do { emitted: false });
            }
            return Ok(());
        }

        if ends_with_do {
            if self.blocks.len() >= MAX_BLOCK_DEPTH {
                return Err(GemfileError::Eval {
                    line: self.last_line,
                    message: format!("blocks nested deeper than {MAX_BLOCK_DEPTH}"),
                });
            }
            self.blocks.push(Block::Do { emitted: true });
        }

        let line = tokens.last().map_or(self.last_line, |t| t.line);
        for token in tokens {
            let replacement = match &token.kind {
                TokenKind::Str {
                    value,
                    interpolated: true,
                } => Some(Token {
                    kind: TokenKind::Str {
                        value: self.interpolate(value, token.line, false)?,
                        interpolated: false,
                    },
                    line: token.line,
                }),
                TokenKind::Ident(name) => self
                    .constant_or_variable(name)
                    .map(|value| value_to_token(&value, token.line)),
                _ => None,
            };
            self.queue.push_back(replacement.unwrap_or(token));
        }
        self.queue.push_back(Token {
            kind: TokenKind::Newline,
            line,
        });
        Ok(())
    }

    fn constant_or_variable(&self, name: &str) -> Option<Value> {
        match name {
            "RUBY_VERSION" => Some(Value::Str {
                text: self.env.ruby_version.clone(),
                version: true,
            }),
            "RUBY_ENGINE" => Some(Value::Str {
                text: self.env.ruby_engine.clone(),
                version: false,
            }),
            "RUBY_PLATFORM" => Some(Value::Str {
                text: self.env.ruby_platform.clone(),
                version: false,
            }),
            _ => self.vars.get(name).cloned(),
        }
    }

    /// Expand `#{...}` references to variables and environment constants.
    ///
    /// In strict mode (conditions, assignments) an unknown reference is an
    /// error; in lenient mode (forwarded declarations) the original text is
    /// kept so lines the grammar ignores cannot fail the parse.
    fn interpolate(&self, text: &str, line: u32, strict: bool) -> Result<String, GemfileError> {
        let mut output = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find("#{") {
            output.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                if strict {
                    return Err(GemfileError::Eval {
                        line,
                        message: "unterminated interpolation".to_string(),
                    });
                }
                output.push_str(&rest[start..]);
                return Ok(output);
            };

            let reference = after[..end].trim();
            match self.constant_or_variable(reference) {
                Some(value) => output.push_str(&value.display()),
                None => {
                    if strict {
                        return Err(GemfileError::Eval {
                            line,
                            message: format!("unknown interpolation reference `{reference}`"),
                        });
                    }
                    output.push_str(&rest[start..start + 2 + end + 1]);
                }
            }
            rest = &after[end + 1..];
        }

        output.push_str(rest);
        Ok(output)
    }

    // --- expression evaluation -------------------------------------------

    fn eval_expr(&self, tokens: &[Token], line: u32) -> Result<Value, GemfileError> {
        if tokens.is_empty() {
            return Err(GemfileError::Eval {
                line,
                message: "expected an expression".to_string(),
            });
        }

        let mut pos = 0;
        let value = self.parse_or(tokens, &mut pos, line)?;
        if pos != tokens.len() {
            return Err(GemfileError::Eval {
                line,
                message: "unsupported expression".to_string(),
            });
        }
        Ok(value)
    }

    fn parse_or(&self, tokens: &[Token], pos: &mut usize, line: u32) -> Result<Value, GemfileError> {
        let mut left = self.parse_and(tokens, pos, line)?;
        while tokens.get(*pos).is_some_and(|t| t.kind == TokenKind::Op(Op::OrOr)) {
            *pos += 1;
            let right = self.parse_and(tokens, pos, line)?;
            if !left.truthy() {
                left = right;
            }
        }
        Ok(left)
    }

    fn parse_and(&self, tokens: &[Token], pos: &mut usize, line: u32) -> Result<Value, GemfileError> {
        let mut left = self.parse_comparison(tokens, pos, line)?;
        while tokens.get(*pos).is_some_and(|t| t.kind == TokenKind::Op(Op::AndAnd)) {
            *pos += 1;
            let right = self.parse_comparison(tokens, pos, line)?;
            if left.truthy() {
                left = right;
            }
        }
        Ok(left)
    }

    fn parse_comparison(
        &self,
        tokens: &[Token],
        pos: &mut usize,
        line: u32,
    ) -> Result<Value, GemfileError> {
        let left = self.parse_unary(tokens, pos, line)?;

        let operator = match tokens.get(*pos).map(|t| &t.kind) {
            Some(TokenKind::Op(op @ (Op::Eq | Op::NotEq | Op::Gt | Op::Ge | Op::Lt | Op::Le))) => {
                *op
            }
            _ => return Ok(left),
        };
        *pos += 1;
        let right = self.parse_unary(tokens, pos, line)?;

        let result = match operator {
            Op::Eq => values_equal(&left, &right),
            Op::NotEq => !values_equal(&left, &right),
            Op::Gt | Op::Ge | Op::Lt | Op::Le => {
                let ordering = order_values(&left, &right).ok_or_else(|| GemfileError::Eval {
                    line,
                    message: "cannot compare these values".to_string(),
                })?;
                match operator {
                    Op::Gt => ordering == Ordering::Greater,
                    Op::Ge => ordering != Ordering::Less,
                    Op::Lt => ordering == Ordering::Less,
                    Op::Le => ordering != Ordering::Greater,
                    _ => unreachable!(),
                }
            }
            _ => unreachable!(),
        };

        Ok(Value::Bool(result))
    }

    fn parse_unary(&self, tokens: &[Token], pos: &mut usize, line: u32) -> Result<Value, GemfileError> {
        if tokens.get(*pos).is_some_and(|t| t.kind == TokenKind::Op(Op::Not)) {
            *pos += 1;
            let value = self.parse_unary(tokens, pos, line)?;
            return Ok(Value::Bool(!value.truthy()));
        }
        self.parse_primary(tokens, pos, line)
    }

    fn parse_primary(
        &self,
        tokens: &[Token],
        pos: &mut usize,
        line: u32,
    ) -> Result<Value, GemfileError> {
        let Some(token) = tokens.get(*pos) else {
            return Err(GemfileError::Eval {
                line,
                message: "expected an expression".to_string(),
            });
        };
        *pos += 1;

        match &token.kind {
            TokenKind::LParen => {
                let value = self.parse_or(tokens, pos, line)?;
                if tokens.get(*pos).map(|t| &t.kind) != Some(&TokenKind::RParen) {
                    return Err(GemfileError::Eval {
                        line,
                        message: "expected `)`".to_string(),
                    });
                }
                *pos += 1;
                Ok(value)
            }
            TokenKind::Str {
                value,
                interpolated,
            } => {
                let text = if *interpolated {
                    self.interpolate(value, token.line, true)?
                } else {
                    value.clone()
                };
                Ok(Value::Str {
                    text,
                    version: false,
                })
            }
            TokenKind::Symbol(name) => Ok(Value::Str {
                text: name.clone(),
                version: false,
            }),
            TokenKind::Int(value) => Ok(Value::Int(*value)),
            TokenKind::Float(value) => Ok(Value::Float(*value)),
            TokenKind::True => Ok(Value::Bool(true)),
            TokenKind::False => Ok(Value::Bool(false)),
            TokenKind::Nil => Ok(Value::Nil),
            TokenKind::Ident(name) if name == "ENV" => self.parse_env(tokens, pos, line),
            TokenKind::Ident(name) => {
                self.constant_or_variable(name)
                    .ok_or_else(|| GemfileError::Eval {
                        line,
                        message: format!("undefined variable `{name}`"),
                    })
            }
            other => Err(GemfileError::Eval {
                line,
                message: format!("unsupported expression near {other:?}"),
            }),
        }
    }

    /// `ENV["K"]`, `ENV.fetch("K")`, `ENV.fetch("K", default)`, `ENV.key?("K")`
    fn parse_env(&self, tokens: &[Token], pos: &mut usize, line: u32) -> Result<Value, GemfileError> {
        match tokens.get(*pos).map(|t| &t.kind) {
            Some(TokenKind::LBracket) => {
                *pos += 1;
                let key = self.expect_string(tokens, pos, line)?;
                if tokens.get(*pos).map(|t| &t.kind) != Some(&TokenKind::RBracket) {
                    return Err(GemfileError::Eval {
                        line,
                        message: "expected `]`".to_string(),
                    });
                }
                *pos += 1;
                Ok(env_var(&key))
            }
            Some(TokenKind::Op(Op::Dot)) => {
                *pos += 1;
                let Some(TokenKind::Ident(method)) = tokens.get(*pos).map(|t| &t.kind) else {
                    return Err(GemfileError::Eval {
                        line,
                        message: "expected a method after `ENV.`".to_string(),
                    });
                };
                let method = method.clone();
                *pos += 1;

                if tokens.get(*pos).map(|t| &t.kind) != Some(&TokenKind::LParen) {
                    return Err(GemfileError::Eval {
                        line,
                        message: format!("expected `(` after `ENV.{method}`"),
                    });
                }
                *pos += 1;

                let key = self.expect_string(tokens, pos, line)?;
                let mut default = None;
                if tokens.get(*pos).map(|t| &t.kind) == Some(&TokenKind::Comma) {
                    *pos += 1;
                    default = Some(self.parse_or(tokens, pos, line)?);
                }
                if tokens.get(*pos).map(|t| &t.kind) != Some(&TokenKind::RParen) {
                    return Err(GemfileError::Eval {
                        line,
                        message: "expected `)`".to_string(),
                    });
                }
                *pos += 1;

                match method.as_str() {
                    "fetch" => Ok(match env_var(&key) {
                        Value::Nil => default.unwrap_or(Value::Nil),
                        value => value,
                    }),
                    "key?" | "has_key?" | "include?" | "member?" => {
                        Ok(Value::Bool(!matches!(env_var(&key), Value::Nil)))
                    }
                    other => Err(GemfileError::Eval {
                        line,
                        message: format!("unsupported ENV method `{other}`"),
                    }),
                }
            }
            _ => Err(GemfileError::Eval {
                line,
                message: "unsupported use of ENV".to_string(),
            }),
        }
    }

    fn expect_string(
        &self,
        tokens: &[Token],
        pos: &mut usize,
        line: u32,
    ) -> Result<String, GemfileError> {
        match tokens.get(*pos).map(|t| &t.kind) {
            Some(TokenKind::Str { value, interpolated }) => {
                let text = if *interpolated {
                    self.interpolate(value, line, true)?
                } else {
                    value.clone()
                };
                *pos += 1;
                Ok(text)
            }
            _ => Err(GemfileError::Eval {
                line,
                message: "expected a string literal".to_string(),
            }),
        }
    }
}

/// Find a trailing `if`/`unless` that is not the line's first token
fn trailing_conditional(tokens: &[Token]) -> Option<(usize, bool)> {
    let position = tokens.iter().rposition(|token| {
        matches!(&token.kind, TokenKind::Ident(name) if name == "if" || name == "unless")
    })?;
    if position == 0 {
        return None;
    }
    let negate = matches!(&tokens[position].kind, TokenKind::Ident(name) if name == "unless");
    Some((position, negate))
}

fn value_to_token(value: &Value, line: u32) -> Token {
    let kind = match value {
        Value::Str { text, .. } => TokenKind::Str {
            value: text.clone(),
            interpolated: false,
        },
        Value::Bool(true) => TokenKind::True,
        Value::Bool(false) => TokenKind::False,
        Value::Int(i) => TokenKind::Int(*i),
        Value::Float(f) => TokenKind::Float(*f),
        Value::Nil => TokenKind::Nil,
    };
    Token { kind, line }
}

fn env_var(key: &str) -> Value {
    match std::env::var(key) {
        Ok(text) => Value::Str {
            text,
            version: false,
        },
        Err(_) => Value::Nil,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if let Some(ordering) = numeric_order(a, b) {
        return ordering == Ordering::Equal;
    }
    if a.is_version() || b.is_version() {
        if let Some(ordering) = version_order(a, b) {
            return ordering == Ordering::Equal;
        }
    }
    match (a, b) {
        (Value::Str { text: x, .. }, Value::Str { text: y, .. }) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Nil, Value::Nil) => true,
        _ => false,
    }
}

fn order_values(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_version() || b.is_version() {
        if let Some(ordering) = version_order(a, b) {
            return Some(ordering);
        }
    }
    if let Some(ordering) = numeric_order(a, b) {
        return Some(ordering);
    }
    match (a, b) {
        (Value::Str { text: x, .. }, Value::Str { text: y, .. }) => Some(x.cmp(y)),
        _ => None,
    }
}

fn numeric_order(a: &Value, b: &Value) -> Option<Ordering> {
    let as_float = |value: &Value| match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    };
    as_float(a)?.partial_cmp(&as_float(b)?)
}

fn version_order(a: &Value, b: &Value) -> Option<Ordering> {
    let left = Version::parse(&a.display()).ok()?;
    let right = Version::parse(&b.display()).ok()?;
    Some(left.cmp(&right))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(source: &str) -> Result<Vec<TokenKind>, GemfileError> {
        let mut evaluator = Evaluator::new(source, EnvConstants::default(), Path::new("."));
        let mut kinds = Vec::new();
        loop {
            let token = evaluator.next_token()?;
            if token.kind == TokenKind::Eof {
                break;
            }
            kinds.push(token.kind);
        }
        Ok(kinds)
    }

    fn idents(kinds: &[TokenKind]) -> Vec<String> {
        kinds
            .iter()
            .filter_map(|kind| match kind {
                TokenKind::Str { value, .. } => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    mod conditionals {
        use super::*;

        #[test]
        fn false_branch_is_dropped() {
            let kinds = collect("if false\ngem \"a\"\nend\ngem \"b\"\n").unwrap();
            assert_eq!(idents(&kinds), vec!["b"]);
        }

        #[test]
        fn true_branch_is_kept() {
            let kinds = collect("if true\ngem \"a\"\nend\n").unwrap();
            assert_eq!(idents(&kinds), vec!["a"]);
        }

        #[test]
        fn else_activates_when_no_branch_taken() {
            let kinds = collect("if false\ngem \"a\"\nelse\ngem \"b\"\nend\n").unwrap();
            assert_eq!(idents(&kinds), vec!["b"]);
        }

        #[test]
        fn elsif_chains() {
            let source = "if false\ngem \"a\"\nelsif true\ngem \"b\"\nelse\ngem \"c\"\nend\n";
            let kinds = collect(source).unwrap();
            assert_eq!(idents(&kinds), vec!["b"]);
        }

        #[test]
        fn unless_inverts() {
            let kinds = collect("unless false\ngem \"a\"\nend\n").unwrap();
            assert_eq!(idents(&kinds), vec!["a"]);
        }

        #[test]
        fn nested_suppression() {
            let source = "if false\nif true\ngem \"a\"\nend\nend\ngem \"b\"\n";
            let kinds = collect(source).unwrap();
            assert_eq!(idents(&kinds), vec!["b"]);
        }

        #[test]
        #[allow(unsafe_code)]
        fn trailing_if_with_env() {
            unsafe { std::env::set_var("SEAM_EVAL_TEST_USE", "1") };
            let kinds = collect("gem \"a\" if ENV[\"SEAM_EVAL_TEST_USE\"]\n").unwrap();
            assert_eq!(idents(&kinds), vec!["a"]);

            let kinds = collect("gem \"a\" if ENV[\"SEAM_EVAL_TEST_UNSET\"]\n").unwrap();
            assert!(idents(&kinds).is_empty());
        }

        #[test]
        fn trailing_unless() {
            let kinds = collect("gem \"a\" unless true\ngem \"b\" unless false\n").unwrap();
            assert_eq!(idents(&kinds), vec!["b"]);
        }

        #[test]
        fn unexpected_end_errors() {
            assert!(collect("end\n").is_err());
        }
    }

    mod do_blocks {
        use super::*;

        #[test]
        fn active_do_blocks_are_forwarded_with_end() {
            let kinds = collect("group :test do\ngem \"rspec\"\nend\n").unwrap();
            let names: Vec<&str> = kinds
                .iter()
                .filter_map(|k| match k {
                    TokenKind::Ident(name) => Some(name.as_str()),
                    _ => None,
                })
                .collect();
            assert_eq!(names, vec!["group", "do", "gem", "end"]);
        }

        #[test]
        fn suppressed_do_blocks_swallow_their_end() {
            let source = "if false\ngroup :test do\ngem \"a\"\nend\nend\ngem \"b\"\n";
            let kinds = collect(source).unwrap();
            assert_eq!(idents(&kinds), vec!["b"]);
        }
    }

    mod variables {
        use super::*;

        #[test]
        fn assignment_and_substitution() {
            let kinds = collect("version = \"1.2.3\"\ngem \"x\", version\n").unwrap();
            assert_eq!(idents(&kinds), vec!["x", "1.2.3"]);
        }

        #[test]
        fn interpolation_in_forwarded_strings() {
            let kinds = collect("name = \"rails\"\ngem \"#{name}-html\"\n").unwrap();
            assert_eq!(idents(&kinds), vec!["rails-html"]);
        }

        #[test]
        fn ruby_version_constant_substitutes() {
            let kinds = collect("ruby RUBY_VERSION\n").unwrap();
            assert_eq!(idents(&kinds), vec!["3.3.0"]);
        }

        #[test]
        fn version_flag_propagates_through_assignment() {
            let source = "a = RUBY_VERSION\nif a >= \"3.0\"\ngem \"modern\"\nend\n";
            let kinds = collect(source).unwrap();
            assert_eq!(idents(&kinds), vec!["modern"]);
        }

        #[test]
        fn version_comparison_is_segment_aware() {
            // String comparison would put "3.10" below "3.9"
            let source = "a = RUBY_VERSION\ngem \"x\" if \"3.10\" > \"3.9\"\n";
            let kinds = collect(source).unwrap();
            assert!(idents(&kinds).is_empty());

            let source = "gem \"x\" if RUBY_VERSION > \"3.0.9\"\n";
            let kinds = collect(source).unwrap();
            assert_eq!(idents(&kinds), vec!["x"]);
        }

        #[test]
        fn or_default_idiom() {
            let source = "tier = ENV[\"SEAM_EVAL_TEST_TIER\"] || \"basic\"\ngem \"x\" if tier == \"basic\"\n";
            let kinds = collect(source).unwrap();
            assert_eq!(idents(&kinds), vec!["x"]);
        }

        #[test]
        fn undefined_variable_errors_with_line() {
            let error = collect("gem \"a\"\ngem \"b\" if missing\n").unwrap_err();
            let GemfileError::Eval { line, .. } = error else {
                panic!("expected eval error, got {error:?}");
            };
            assert_eq!(line, 2);
        }
    }

    mod env_constants {
        use super::*;

        #[test]
        fn engine_comparison() {
            let kinds = collect("gem \"x\" if RUBY_ENGINE == \"ruby\"\n").unwrap();
            assert_eq!(idents(&kinds), vec!["x"]);
        }

        #[test]
        fn env_fetch_default() {
            let source = "gem \"x\" if ENV.fetch(\"SEAM_EVAL_TEST_NOPE\", \"yes\") == \"yes\"\n";
            let kinds = collect(source).unwrap();
            assert_eq!(idents(&kinds), vec!["x"]);
        }

        #[test]
        fn env_key_predicate() {
            let kinds = collect("gem \"x\" if ENV.key?(\"SEAM_EVAL_TEST_NOPE2\")\n").unwrap();
            assert!(idents(&kinds).is_empty());
        }
    }

    mod diagnostics {
        use super::*;

        #[test]
        fn unsupported_constructs_abort() {
            let error = collect("def helper\nend\n").unwrap_err();
            assert!(matches!(error, GemfileError::Eval { line: 1, .. }));
        }

        #[test]
        fn class_is_rejected() {
            assert!(collect("class Foo\nend\n").is_err());
        }
    }

    mod includes {
        use super::*;
        use std::io::Write;

        #[test]
        fn eval_gemfile_splices_tokens() {
            let dir = tempfile::tempdir().unwrap();
            let mut file = std::fs::File::create(dir.path().join("extra.gemfile")).unwrap();
            writeln!(file, "gem \"extra\"").unwrap();

            let mut evaluator = Evaluator::new(
                "gem \"main\"\neval_gemfile \"extra.gemfile\"\n",
                EnvConstants::default(),
                dir.path(),
            );
            let mut names = Vec::new();
            loop {
                let token = evaluator.next_token().unwrap();
                match token.kind {
                    TokenKind::Eof => break,
                    TokenKind::Str { value, .. } => names.push(value),
                    _ => {}
                }
            }
            assert_eq!(names, vec!["main", "extra"]);
        }

        #[test]
        fn missing_include_errors() {
            let mut evaluator = Evaluator::new(
                "eval_gemfile \"nope.gemfile\"\n",
                EnvConstants::default(),
                Path::new("/nonexistent"),
            );
            let mut result = Ok(());
            loop {
                match evaluator.next_token() {
                    Ok(token) if token.kind == TokenKind::Eof => break,
                    Ok(_) => {}
                    Err(error) => {
                        result = Err(error);
                        break;
                    }
                }
            }
            assert!(matches!(result, Err(GemfileError::Read { .. })));
        }
    }
}
