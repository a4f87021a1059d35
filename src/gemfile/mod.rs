//! Gemfile parsing: lexer, evaluator, and grammar.
//!
//! The front end is layered: a hand-rolled tokenizer ([`lexer`]), an
//! evaluator for the restricted Ruby subset real Gemfiles use ([`eval`]),
//! and grammar reductions into the declaration structure ([`parser`]). The
//! evaluator filters the token stream so the grammar only ever sees static
//! declarations.

mod eval;
pub mod lexer;
mod parser;

pub use eval::EnvConstants;

use std::path::Path;
use thiserror::Error;

/// Errors that can occur during Gemfile parsing
#[derive(Debug, Error)]
pub enum GemfileError {
    #[error("failed to read Gemfile at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Gemfile line {line}: {message}")]
    Lex { line: u32, message: String },

    #[error("Gemfile line {line}: {message}")]
    Eval { line: u32, message: String },

    #[error("Gemfile line {line}: {message}")]
    Parse { line: u32, message: String },
}

/// Whether a gem is auto-required at `Bundler.require` time
///
/// The three states are distinct: unspecified uses the default path,
/// `require: false` disables requiring entirely, and an explicit string or
/// array lists the paths to require.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AutoRequire {
    /// No `require:` option given
    #[default]
    Default,
    /// `require: false`
    Disabled,
    /// `require: "path"` or `require: ["a", "b"]`
    Paths(Vec<String>),
}

/// One `gem` declaration from a Gemfile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GemDeclaration {
    /// Gem name (e.g., "rails")
    pub name: String,

    /// Version constraints, stored as opaque strings and evaluated later by
    /// the version model (e.g., `["~> 7.0", ">= 7.0.2"]`)
    pub constraints: Vec<String>,

    /// Groups this gem belongs to; `["default"]` when none was declared
    pub groups: Vec<String>,

    /// Platform constraints (e.g., `["mri"]`); empty means all platforms
    pub platforms: Vec<String>,

    /// Auto-require behavior
    pub auto_require: AutoRequire,
}

impl GemDeclaration {
    /// Create a declaration with no constraints or context
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraints: Vec::new(),
            groups: Vec::new(),
            platforms: Vec::new(),
            auto_require: AutoRequire::Default,
        }
    }

    /// The comma-joined requirement string (empty when unconstrained)
    #[must_use]
    pub fn requirement(&self) -> String {
        self.constraints.join(", ")
    }

    /// Whether this gem should be auto-required
    #[must_use]
    pub fn should_require(&self) -> bool {
        self.auto_require != AutoRequire::Disabled
    }
}

/// A parsed Gemfile
///
/// Static evaluation: conditionals and variables are resolved by the
/// evaluator against environment constants, without running Ruby.
#[derive(Debug, Clone)]
pub struct Gemfile {
    /// Registry URL (defaults to the canonical registry)
    pub source: String,

    /// Declared runtime version (e.g., "3.3.0")
    pub ruby_version: Option<String>,

    /// Whether a `gemspec` directive was present
    pub has_gemspec: bool,

    /// All gem declarations, in file order
    pub gems: Vec<GemDeclaration>,
}

impl Default for Gemfile {
    fn default() -> Self {
        Self::new()
    }
}

impl Gemfile {
    /// Create an empty Gemfile
    #[must_use]
    pub fn new() -> Self {
        Self {
            source: crate::DEFAULT_GEM_SOURCE.to_string(),
            ruby_version: None,
            has_gemspec: false,
            gems: Vec::new(),
        }
    }

    /// Parse Gemfile content with default environment constants.
    ///
    /// # Errors
    ///
    /// Returns a line-numbered error for syntax or evaluation failures.
    pub fn parse(content: &str) -> Result<Self, GemfileError> {
        Self::parse_with_env(content, EnvConstants::default(), Path::new("."))
    }

    /// Parse Gemfile content against explicit environment constants.
    ///
    /// `base_dir` anchors `eval_gemfile` includes.
    ///
    /// # Errors
    ///
    /// Returns a line-numbered error for syntax or evaluation failures.
    pub fn parse_with_env(
        content: &str,
        env: EnvConstants,
        base_dir: &Path,
    ) -> Result<Self, GemfileError> {
        parser::parse(content, env, base_dir)
    }

    /// Parse a Gemfile from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn parse_file(path: impl AsRef<Path>) -> Result<Self, GemfileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| GemfileError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse_with_env(&content, EnvConstants::default(), base_dir)
    }

    /// All gems in a specific group
    #[must_use]
    pub fn gems_in_group(&self, group: &str) -> Vec<&GemDeclaration> {
        self.gems
            .iter()
            .filter(|gem| gem.groups.iter().any(|g| g == group))
            .collect()
    }

    /// All gems outside the given groups
    #[must_use]
    pub fn gems_without_groups(&self, excluded: &[String]) -> Vec<&GemDeclaration> {
        self.gems
            .iter()
            .filter(|gem| !gem.groups.iter().any(|g| excluded.contains(g)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod declarations {
        use super::*;

        #[test]
        fn empty_gemfile() {
            let gemfile = Gemfile::parse("").unwrap();
            assert!(gemfile.gems.is_empty());
            assert!(!gemfile.has_gemspec);
        }

        #[test]
        fn source_string() {
            let gemfile = Gemfile::parse("source \"https://gems.example.com\"\n").unwrap();
            assert_eq!(gemfile.source, "https://gems.example.com");
        }

        #[test]
        fn source_legacy_symbol() {
            let gemfile = Gemfile::parse("source :rubygems\n").unwrap();
            assert_eq!(gemfile.source, "https://rubygems.org");
        }

        #[test]
        fn source_parenthesised() {
            let gemfile = Gemfile::parse("source(\"https://gems.example.com\")\n").unwrap();
            assert_eq!(gemfile.source, "https://gems.example.com");
        }

        #[test]
        fn source_scoped_block() {
            let source = "source \"https://gems.example.com\" do\n  gem \"internal\"\nend\n";
            let gemfile = Gemfile::parse(source).unwrap();
            assert_eq!(gemfile.gems.len(), 1);
        }

        #[test]
        fn gem_with_constraints() {
            let gemfile = Gemfile::parse("gem \"rails\", \"~> 7.0\", \">= 7.0.2\"\n").unwrap();
            let gem = &gemfile.gems[0];
            assert_eq!(gem.name, "rails");
            assert_eq!(gem.constraints, vec!["~> 7.0", ">= 7.0.2"]);
            assert_eq!(gem.requirement(), "~> 7.0, >= 7.0.2");
            assert_eq!(gem.groups, vec!["default"]);
        }

        #[test]
        fn ruby_version() {
            let gemfile = Gemfile::parse("ruby \"3.3.0\"\n").unwrap();
            assert_eq!(gemfile.ruby_version, Some("3.3.0".to_string()));
        }

        #[test]
        fn ruby_with_engine_options() {
            let gemfile = Gemfile::parse("ruby \"3.3.0\", engine: \"jruby\"\n").unwrap();
            assert_eq!(gemfile.ruby_version, Some("3.3.0".to_string()));
        }

        #[test]
        fn ruby_file_form_is_silent() {
            let gemfile = Gemfile::parse("ruby file: \".ruby-version\"\n").unwrap();
            assert_eq!(gemfile.ruby_version, None);
        }

        #[test]
        fn gemspec_flag() {
            for source in ["gemspec\n", "gemspec path: \".\"\n", "gemspec :name => \"x\"\n"] {
                let gemfile = Gemfile::parse(source).unwrap();
                assert!(gemfile.has_gemspec, "failed for {source:?}");
            }
        }

        #[test]
        fn structural_keywords_accepted() {
            let source = "\
git_source(:github) { |repo| \"https://github.com/#{repo}.git\" }
gem \"a\"
path \"../local\" do
  gem \"b\"
end
install_if -> { true } do
  gem \"c\"
end
plugin \"my-plugin\"
";
            let gemfile = Gemfile::parse(source).unwrap();
            let names: Vec<&str> = gemfile.gems.iter().map(|g| g.name.as_str()).collect();
            assert_eq!(names, vec!["a", "b", "c"]);
        }

        #[test]
        fn unknown_declaration_errors() {
            let error = Gemfile::parse("gem \"a\"\nfrobnicate \"b\"\n").unwrap_err();
            assert!(matches!(error, GemfileError::Parse { line: 2, .. }));
        }
    }

    mod require_option {
        use super::*;

        #[test]
        fn unspecified_is_default() {
            let gemfile = Gemfile::parse("gem \"a\"\n").unwrap();
            assert_eq!(gemfile.gems[0].auto_require, AutoRequire::Default);
            assert!(gemfile.gems[0].should_require());
        }

        #[test]
        fn require_false_is_disabled() {
            let gemfile = Gemfile::parse("gem \"a\", require: false\n").unwrap();
            assert_eq!(gemfile.gems[0].auto_require, AutoRequire::Disabled);
            assert!(!gemfile.gems[0].should_require());
        }

        #[test]
        fn require_path() {
            let gemfile = Gemfile::parse("gem \"a\", require: \"a/core\"\n").unwrap();
            assert_eq!(
                gemfile.gems[0].auto_require,
                AutoRequire::Paths(vec!["a/core".to_string()])
            );
        }

        #[test]
        fn require_array() {
            let gemfile = Gemfile::parse("gem \"a\", require: [\"a/x\", \"a/y\"]\n").unwrap();
            assert_eq!(
                gemfile.gems[0].auto_require,
                AutoRequire::Paths(vec!["a/x".to_string(), "a/y".to_string()])
            );
        }

        #[test]
        fn hashrocket_require() {
            let gemfile = Gemfile::parse("gem \"a\", :require => false\n").unwrap();
            assert_eq!(gemfile.gems[0].auto_require, AutoRequire::Disabled);
        }
    }

    mod groups_and_platforms {
        use super::*;

        #[test]
        fn inline_group() {
            let gemfile = Gemfile::parse("gem \"rspec\", group: :test\n").unwrap();
            assert_eq!(gemfile.gems[0].groups, vec!["test"]);
        }

        #[test]
        fn inline_groups_array() {
            let gemfile = Gemfile::parse("gem \"pry\", groups: [:development, :test]\n").unwrap();
            assert_eq!(gemfile.gems[0].groups, vec!["development", "test"]);
        }

        #[test]
        fn percent_symbol_array() {
            let gemfile = Gemfile::parse("gem \"pry\", groups: %i[development test]\n").unwrap();
            assert_eq!(gemfile.gems[0].groups, vec!["development", "test"]);
        }

        #[test]
        fn group_block_inherits() {
            let source = "group :test do\n  gem \"rspec\"\nend\ngem \"rails\"\n";
            let gemfile = Gemfile::parse(source).unwrap();
            assert_eq!(gemfile.gems[0].groups, vec!["test"]);
            assert_eq!(gemfile.gems[1].groups, vec!["default"]);
        }

        #[test]
        fn group_block_parenthesised_strings() {
            let source = "group(\"a\", \"b\") do\n  gem \"x\"\nend\n";
            let gemfile = Gemfile::parse(source).unwrap();
            assert_eq!(gemfile.gems[0].groups, vec!["a", "b"]);
        }

        #[test]
        fn nested_groups_accumulate() {
            let source = "group :a do\n  group :b do\n    gem \"x\"\n  end\nend\n";
            let gemfile = Gemfile::parse(source).unwrap();
            assert_eq!(gemfile.gems[0].groups, vec!["a", "b"]);
        }

        #[test]
        fn inline_group_overrides_block() {
            let source = "group :test do\n  gem \"x\", group: :ci\nend\n";
            let gemfile = Gemfile::parse(source).unwrap();
            assert_eq!(gemfile.gems[0].groups, vec!["ci"]);
        }

        #[test]
        fn platforms_block() {
            let source = "platforms :mri do\n  gem \"pg\"\nend\n";
            let gemfile = Gemfile::parse(source).unwrap();
            assert_eq!(gemfile.gems[0].platforms, vec!["mri"]);
        }

        #[test]
        fn platform_singular() {
            let source = "platform :jruby do\n  gem \"jdbc\"\nend\n";
            let gemfile = Gemfile::parse(source).unwrap();
            assert_eq!(gemfile.gems[0].platforms, vec!["jruby"]);
        }

        #[test]
        fn filtering_helpers() {
            let source = "gem \"rails\"\ngem \"rspec\", group: :test\n";
            let gemfile = Gemfile::parse(source).unwrap();

            assert_eq!(gemfile.gems_in_group("test").len(), 1);
            assert_eq!(
                gemfile
                    .gems_without_groups(&["test".to_string()])
                    .iter()
                    .map(|g| g.name.as_str())
                    .collect::<Vec<_>>(),
                vec!["rails"]
            );
        }
    }
}
