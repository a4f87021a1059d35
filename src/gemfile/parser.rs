//! Gemfile grammar: reductions from the filtered token stream to the
//! declaration structure.
//!
//! By the time tokens arrive here the evaluator has already resolved
//! conditionals, variables, and interpolation, so the grammar only handles
//! static declarations: `source`, `gem`, `group`/`platforms` blocks, `ruby`,
//! `gemspec`, and the accepted-but-unstored keywords (`path`, `git`,
//! `github`, `plugin`, `install_if`, `git_source`).

use super::eval::{EnvConstants, Evaluator};
use super::lexer::{Op, Token, TokenKind};
use super::{AutoRequire, GemDeclaration, Gemfile, GemfileError};
use std::path::Path;

/// Block-scope nesting cap
const MAX_SCOPE_DEPTH: usize = 8;

/// Canonical registry URL for the legacy `:rubygems`/`:gemcutter` symbols
const CANONICAL_SOURCE: &str = "https://rubygems.org";

/// Parse a Gemfile source into the declaration structure.
pub(super) fn parse(
    source: &str,
    env: EnvConstants,
    base_dir: &Path,
) -> Result<Gemfile, GemfileError> {
    Parser::new(Evaluator::new(source, env, base_dir)).run()
}

/// One enclosing block whose context gem declarations inherit
#[derive(Debug)]
enum Scope {
    Group(Vec<String>),
    Platforms(Vec<String>),
    /// `source "..." do`, `install_if ... do`: structure only
    Neutral,
}

/// A parsed gem-option value
#[derive(Debug)]
enum OptValue {
    Bool(bool),
    Str(String),
    List(Vec<String>),
    Nil,
    Other,
}

struct Parser {
    evaluator: Evaluator,
    peeked: Option<Token>,
    scopes: Vec<Scope>,
    gemfile: Gemfile,
}

impl Parser {
    fn new(evaluator: Evaluator) -> Self {
        Self {
            evaluator,
            peeked: None,
            scopes: Vec::new(),
            gemfile: Gemfile::new(),
        }
    }

    fn next(&mut self) -> Result<Token, GemfileError> {
        match self.peeked.take() {
            Some(token) => Ok(token),
            None => self.evaluator.next_token(),
        }
    }

    fn peek(&mut self) -> Result<&Token, GemfileError> {
        if self.peeked.is_none() {
            self.peeked = Some(self.evaluator.next_token()?);
        }
        self.peeked
            .as_ref()
            .ok_or_else(|| unreachable!("peeked was just filled"))
    }

    fn error(&self, line: u32, message: impl Into<String>) -> GemfileError {
        GemfileError::Parse {
            line,
            message: message.into(),
        }
    }

    fn run(mut self) -> Result<Gemfile, GemfileError> {
        loop {
            let token = self.next()?;
            match &token.kind {
                TokenKind::Newline => {}
                TokenKind::Eof => break,
                TokenKind::Ident(name) => match name.as_str() {
                    "source" => self.parse_source(token.line)?,
                    "gem" => self.parse_gem(token.line)?,
                    "group" => self.parse_block(token.line, false)?,
                    "platforms" | "platform" => self.parse_block(token.line, true)?,
                    "ruby" => self.parse_ruby(token.line)?,
                    "gemspec" => {
                        self.gemfile.has_gemspec = true;
                        self.finish_line()?;
                    }
                    "end" => {
                        if self.scopes.pop().is_none() {
                            return Err(self.error(token.line, "unexpected `end`"));
                        }
                    }
                    "path" | "git" | "github" | "plugin" | "install_if" | "git_source" => {
                        self.finish_line()?;
                    }
                    other => {
                        return Err(
                            self.error(token.line, format!("unknown declaration `{other}`"))
                        );
                    }
                },
                other => {
                    return Err(self.error(token.line, format!("unexpected {other:?}")));
                }
            }
        }

        if !self.scopes.is_empty() {
            return Err(self.error(0, "unterminated block at end of file"));
        }

        Ok(self.gemfile)
    }

    /// Consume the rest of the line; a trailing `do` opens a neutral scope
    fn finish_line(&mut self) -> Result<(), GemfileError> {
        let mut last_was_do = false;
        loop {
            let token = self.peek()?;
            match &token.kind {
                TokenKind::Newline | TokenKind::Eof => break,
                TokenKind::Ident(name) => {
                    last_was_do = name == "do";
                    let _ = self.next()?;
                }
                _ => {
                    last_was_do = false;
                    let _ = self.next()?;
                }
            }
        }

        if last_was_do {
            self.push_scope(Scope::Neutral, 0)?;
        }
        Ok(())
    }

    fn push_scope(&mut self, scope: Scope, line: u32) -> Result<(), GemfileError> {
        if self.scopes.len() >= MAX_SCOPE_DEPTH {
            return Err(self.error(line, format!("blocks nested deeper than {MAX_SCOPE_DEPTH}")));
        }
        self.scopes.push(scope);
        Ok(())
    }

    /// `source "URL"`, `source :rubygems`, `source("URL")`, `source "URL" do`
    fn parse_source(&mut self, line: u32) -> Result<(), GemfileError> {
        let mut parenthesised = false;
        if self.peek()?.kind == TokenKind::LParen {
            let _ = self.next()?;
            parenthesised = true;
        }

        let token = self.next()?;
        let url = match &token.kind {
            TokenKind::Str { value, .. } => value.clone(),
            TokenKind::Symbol(name) if name == "rubygems" || name == "gemcutter" => {
                CANONICAL_SOURCE.to_string()
            }
            other => {
                return Err(self.error(token.line, format!("invalid source argument {other:?}")));
            }
        };

        if parenthesised {
            let close = self.next()?;
            if close.kind != TokenKind::RParen {
                return Err(self.error(close.line, "expected `)` after source URL"));
            }
        }

        self.gemfile.source = url;

        if let TokenKind::Ident(name) = &self.peek()?.kind
            && name == "do"
        {
            let _ = self.next()?;
            self.push_scope(Scope::Neutral, line)?;
        }
        self.finish_line_expecting_nothing()
    }

    fn finish_line_expecting_nothing(&mut self) -> Result<(), GemfileError> {
        loop {
            let token = self.peek()?;
            match token.kind {
                TokenKind::Newline | TokenKind::Eof => return Ok(()),
                _ => {
                    let _ = self.next()?;
                }
            }
        }
    }

    /// `gem "name", "c1", "c2", key: value, :key => value, ...`
    fn parse_gem(&mut self, _line: u32) -> Result<(), GemfileError> {
        let name = self.expect_string("gem name")?;
        let mut declaration = GemDeclaration::new(name);

        loop {
            let token = self.peek()?;
            match &token.kind {
                TokenKind::Comma => {
                    let _ = self.next()?;
                    self.parse_gem_argument(&mut declaration)?;
                }
                TokenKind::Newline | TokenKind::Eof => break,
                other => {
                    let message = format!("unexpected {other:?} in gem declaration");
                    let at = token.line;
                    return Err(self.error(at, message));
                }
            }
        }

        // Inherit the enclosing context where the declaration is silent
        if declaration.groups.is_empty() {
            for scope in &self.scopes {
                if let Scope::Group(names) = scope {
                    for name in names {
                        if !declaration.groups.contains(name) {
                            declaration.groups.push(name.clone());
                        }
                    }
                }
            }
        }
        if declaration.groups.is_empty() {
            declaration.groups.push("default".to_string());
        }
        if declaration.platforms.is_empty() {
            for scope in &self.scopes {
                if let Scope::Platforms(names) = scope {
                    for name in names {
                        if !declaration.platforms.contains(name) {
                            declaration.platforms.push(name.clone());
                        }
                    }
                }
            }
        }

        self.gemfile.gems.push(declaration);
        Ok(())
    }

    fn parse_gem_argument(&mut self, declaration: &mut GemDeclaration) -> Result<(), GemfileError> {
        let token = self.next()?;
        match &token.kind {
            // A bare string is a version constraint, stored opaquely
            TokenKind::Str { value, .. } => {
                declaration.constraints.push(value.clone());
                Ok(())
            }
            TokenKind::Key(key) => {
                let key = key.clone();
                let value = self.parse_value()?;
                Self::apply_gem_option(declaration, &key, value);
                Ok(())
            }
            // Hashrocket form: `:require => false`
            TokenKind::Symbol(key) => {
                let key = key.clone();
                let arrow = self.next()?;
                if arrow.kind != TokenKind::Op(Op::HashRocket) {
                    return Err(self.error(arrow.line, "expected `=>` after symbol key"));
                }
                let value = self.parse_value()?;
                Self::apply_gem_option(declaration, &key, value);
                Ok(())
            }
            other => Err(self.error(
                token.line,
                format!("unexpected {other:?} in gem arguments"),
            )),
        }
    }

    fn parse_value(&mut self) -> Result<OptValue, GemfileError> {
        let token = self.next()?;
        Ok(match &token.kind {
            TokenKind::Str { value, .. } => OptValue::Str(value.clone()),
            TokenKind::Symbol(name) => OptValue::Str(name.clone()),
            TokenKind::True => OptValue::Bool(true),
            TokenKind::False => OptValue::Bool(false),
            TokenKind::Nil => OptValue::Nil,
            TokenKind::Int(_) | TokenKind::Float(_) => OptValue::Other,
            TokenKind::Words(words) | TokenKind::Symbols(words) => OptValue::List(words.clone()),
            TokenKind::LBracket => {
                let mut items = Vec::new();
                loop {
                    let token = self.next()?;
                    match &token.kind {
                        TokenKind::RBracket => break,
                        TokenKind::Comma => {}
                        TokenKind::Symbol(name) => items.push(name.clone()),
                        TokenKind::Str { value, .. } => items.push(value.clone()),
                        other => {
                            return Err(self.error(
                                token.line,
                                format!("unexpected {other:?} in array literal"),
                            ));
                        }
                    }
                }
                OptValue::List(items)
            }
            other => {
                return Err(self.error(token.line, format!("unexpected option value {other:?}")));
            }
        })
    }

    fn apply_gem_option(declaration: &mut GemDeclaration, key: &str, value: OptValue) {
        match key {
            "require" => {
                declaration.auto_require = match value {
                    OptValue::Bool(false) | OptValue::Nil => AutoRequire::Disabled,
                    OptValue::Bool(true) => AutoRequire::Default,
                    OptValue::Str(path) => AutoRequire::Paths(vec![path]),
                    OptValue::List(paths) => AutoRequire::Paths(paths),
                    OptValue::Other => AutoRequire::Default,
                };
            }
            "group" | "groups" => match value {
                OptValue::Str(name) => declaration.groups.push(name),
                OptValue::List(names) => declaration.groups.extend(names),
                _ => {}
            },
            "platform" | "platforms" => match value {
                OptValue::Str(name) => declaration.platforms.push(name),
                OptValue::List(names) => declaration.platforms.extend(names),
                _ => {}
            },
            // Source options are accepted but not part of the core structure
            _ => {}
        }
    }

    /// `group :a, :b do` / `platforms :mri do` (parenthesised forms too)
    fn parse_block(&mut self, line: u32, platforms: bool) -> Result<(), GemfileError> {
        let mut names = Vec::new();

        loop {
            let token = self.next()?;
            match &token.kind {
                TokenKind::Symbol(name) => names.push(name.clone()),
                TokenKind::Str { value, .. } => names.push(value.clone()),
                TokenKind::Comma | TokenKind::LParen | TokenKind::RParen => {}
                TokenKind::Key(_) => {
                    // `group :a, optional: true`: option consumed, unstored
                    let _ = self.parse_value()?;
                }
                TokenKind::Ident(name) if name == "do" => break,
                other => {
                    return Err(
                        self.error(token.line, format!("unexpected {other:?} in block header"))
                    );
                }
            }
        }

        let scope = if platforms {
            Scope::Platforms(names)
        } else {
            Scope::Group(names)
        };
        self.push_scope(scope, line)
    }

    /// `ruby "3.3.0", engine: ...` / `ruby file: ".ruby-version"`
    fn parse_ruby(&mut self, _line: u32) -> Result<(), GemfileError> {
        let at = self.peek()?.line;
        let kind = self.peek()?.kind.clone();
        match kind {
            TokenKind::Str { value, .. } => {
                let _ = self.next()?;
                self.gemfile.ruby_version = Some(value);
            }
            // `ruby file: ...` is accepted silently
            TokenKind::Key(_) => {}
            other => {
                return Err(self.error(at, format!("invalid ruby declaration argument {other:?}")));
            }
        }
        self.finish_line_expecting_nothing()
    }

    fn expect_string(&mut self, what: &str) -> Result<String, GemfileError> {
        let token = self.next()?;
        match &token.kind {
            TokenKind::Str { value, .. } => Ok(value.clone()),
            other => Err(self.error(token.line, format!("expected {what}, found {other:?}"))),
        }
    }
}
