//! Lock-file parsing and generation.
//!
//! Four sections, each a header line with indented content: `GEM` (remote
//! and resolved specs with their dependency lines), `PLATFORMS`,
//! `DEPENDENCIES` (the Gemfile's own requirements), and `BUNDLED WITH`.
//! Output is normalised: packages and per-package dependencies are sorted
//! alphabetically and the vacuous `>= 0` requirement is elided, so the same
//! resolution always produces byte-identical text.

use crate::gemfile::GemDeclaration;
use crate::resolver::ResolvedGem;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockfileError {
    #[error("failed to parse lockfile at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("failed to read lockfile at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A gem dependency with its requirement string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    /// Comma-joined constraints; `>= 0` means unconstrained
    pub requirement: String,
}

/// One resolved gem in the lock file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedGem {
    pub name: String,
    pub version: String,
    pub dependencies: Vec<Dependency>,
}

impl LockedGem {
    /// `name-version`, the cache-file stem
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

/// A complete lock file
#[derive(Debug, Clone, Default)]
pub struct Lockfile {
    /// Registry the gems resolve against
    pub remote: String,
    /// Resolved gems
    pub gems: Vec<LockedGem>,
    /// Supported platforms
    pub platforms: Vec<String>,
    /// The Gemfile's direct requirements
    pub dependencies: Vec<Dependency>,
    /// Tool version that produced the file
    pub bundled_with: Option<String>,
}

impl Lockfile {
    /// Build a lock file from a resolution and the declarations it served.
    #[must_use]
    pub fn from_resolution(
        remote: impl Into<String>,
        resolution: &[ResolvedGem],
        declarations: &[GemDeclaration],
    ) -> Self {
        let gems = resolution
            .iter()
            .map(|gem| LockedGem {
                name: gem.name.clone(),
                version: gem.version.to_string(),
                dependencies: gem
                    .dependencies
                    .iter()
                    .map(|(name, constraints)| Dependency {
                        name: name.clone(),
                        requirement: constraints.to_string(),
                    })
                    .collect(),
            })
            .collect();

        let dependencies = declarations
            .iter()
            .map(|declaration| Dependency {
                name: declaration.name.clone(),
                requirement: if declaration.constraints.is_empty() {
                    ">= 0".to_string()
                } else {
                    declaration.requirement()
                },
            })
            .collect();

        Self {
            remote: remote.into(),
            gems,
            platforms: vec!["ruby".to_string()],
            dependencies,
            bundled_with: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }

    /// Parse lock-file text.
    ///
    /// # Errors
    ///
    /// Returns a line-numbered error when a spec line is malformed.
    pub fn parse(content: &str) -> Result<Self, LockfileError> {
        Parser::new(content).parse()
    }

    /// Parse a lock file from disk.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn parse_file(path: impl AsRef<std::path::Path>) -> Result<Self, LockfileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| LockfileError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }
}

/// Line-oriented parser for the lock format
struct Parser<'a> {
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(content: &'a str) -> Self {
        Self {
            lines: content.lines().collect(),
            pos: 0,
        }
    }

    fn current(&self) -> &'a str {
        self.lines.get(self.pos).copied().unwrap_or("")
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.lines.len()
    }

    fn advance(&mut self) {
        if self.pos < self.lines.len() {
            self.pos += 1;
        }
    }

    fn parse(&mut self) -> Result<Lockfile, LockfileError> {
        let mut lockfile = Lockfile::default();

        while !self.is_eof() {
            match self.current().trim_end() {
                "GEM" => {
                    self.advance();
                    self.parse_gem_section(&mut lockfile)?;
                }
                "PLATFORMS" => {
                    self.advance();
                    while !self.is_eof() && self.current().starts_with("  ") {
                        lockfile.platforms.push(self.current().trim().to_string());
                        self.advance();
                    }
                }
                "DEPENDENCIES" => {
                    self.advance();
                    while !self.is_eof() && self.current().starts_with("  ") {
                        lockfile
                            .dependencies
                            .push(parse_dependency(self.current().trim()));
                        self.advance();
                    }
                }
                "BUNDLED WITH" => {
                    self.advance();
                    if !self.is_eof() && self.current().starts_with(' ') {
                        lockfile.bundled_with = Some(self.current().trim().to_string());
                        self.advance();
                    }
                }
                _ => self.advance(),
            }
        }

        Ok(lockfile)
    }

    fn parse_gem_section(&mut self, lockfile: &mut Lockfile) -> Result<(), LockfileError> {
        while !self.is_eof() && self.current().trim_start().starts_with("remote:") {
            let remote = self
                .current()
                .trim()
                .strip_prefix("remote:")
                .unwrap_or("")
                .trim()
                .trim_end_matches('/')
                .to_string();
            lockfile.remote = remote;
            self.advance();
        }

        if self.is_eof() || self.current().trim() != "specs:" {
            return Ok(());
        }
        self.advance();

        while !self.is_eof() {
            let line = self.current();
            if !line.starts_with("    ") && !line.trim().is_empty() {
                break;
            }
            if line.trim().is_empty() {
                self.advance();
                continue;
            }

            if line.starts_with("    ") && !line.starts_with("      ") {
                let (name, version) =
                    parse_spec_line(line.trim()).ok_or_else(|| LockfileError::Parse {
                        line: self.pos + 1,
                        message: format!("expected `name (version)`, got {:?}", line.trim()),
                    })?;
                self.advance();

                let mut dependencies = Vec::new();
                while !self.is_eof()
                    && self.current().starts_with("      ")
                    && !self.current().trim().is_empty()
                {
                    dependencies.push(parse_dependency(self.current().trim()));
                    self.advance();
                }

                lockfile.gems.push(LockedGem {
                    name,
                    version,
                    dependencies,
                });
            } else {
                self.advance();
            }
        }

        Ok(())
    }
}

/// `name (version)` spec line
fn parse_spec_line(line: &str) -> Option<(String, String)> {
    let (name, rest) = line.split_once(" (")?;
    let version = rest.strip_suffix(')')?;
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some((name.to_string(), version.to_string()))
}

/// `name (requirement)` or a bare `name`
fn parse_dependency(line: &str) -> Dependency {
    match line.split_once(" (") {
        Some((name, rest)) => Dependency {
            name: name.to_string(),
            requirement: rest.trim_end_matches(')').to_string(),
        },
        None => Dependency {
            name: line.to_string(),
            requirement: ">= 0".to_string(),
        },
    }
}

fn is_unconstrained(requirement: &str) -> bool {
    requirement.is_empty() || requirement == ">= 0"
}

impl fmt::Display for Lockfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "GEM")?;
        writeln!(f, "  remote: {}/", self.remote.trim_end_matches('/'))?;
        writeln!(f, "  specs:")?;

        let mut gems = self.gems.clone();
        gems.sort_by(|a, b| a.name.cmp(&b.name));
        for gem in &gems {
            writeln!(f, "    {} ({})", gem.name, gem.version)?;

            let mut dependencies = gem.dependencies.clone();
            dependencies.sort_by(|a, b| a.name.cmp(&b.name));
            for dependency in &dependencies {
                if is_unconstrained(&dependency.requirement) {
                    writeln!(f, "      {}", dependency.name)?;
                } else {
                    writeln!(f, "      {} ({})", dependency.name, dependency.requirement)?;
                }
            }
        }
        writeln!(f)?;

        writeln!(f, "PLATFORMS")?;
        for platform in &self.platforms {
            writeln!(f, "  {platform}")?;
        }
        writeln!(f)?;

        writeln!(f, "DEPENDENCIES")?;
        let mut dependencies = self.dependencies.clone();
        dependencies.sort_by(|a, b| a.name.cmp(&b.name));
        for dependency in &dependencies {
            if is_unconstrained(&dependency.requirement) {
                writeln!(f, "  {}", dependency.name)?;
            } else {
                writeln!(f, "  {} ({})", dependency.name, dependency.requirement)?;
            }
        }

        if let Some(bundled_with) = &self.bundled_with {
            writeln!(f)?;
            writeln!(f, "BUNDLED WITH")?;
            writeln!(f, "   {bundled_with}")?;
        }

        Ok(())
    }
}
