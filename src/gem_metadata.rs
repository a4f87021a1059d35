//! Gemspec metadata extraction.
//!
//! A `.gem`'s `metadata.gz` entry holds the YAML gemspec, tagged with ruby
//! object types (`!ruby/object:Gem::Specification`). Only the fields the
//! environment composer consumes are read: `require_paths`, `executables`,
//! and `bindir`. Anything malformed falls back to the defaults.

use serde_yaml::Value;

/// The gemspec fields consumed downstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GemspecInfo {
    /// Load-path entries relative to the gem root
    pub require_paths: Vec<String>,
    /// Names of executables the gem ships
    pub executables: Vec<String>,
    /// Directory the executables live in, relative to the gem root
    pub bindir: String,
}

impl Default for GemspecInfo {
    fn default() -> Self {
        Self {
            require_paths: vec!["lib".to_string()],
            executables: Vec::new(),
            bindir: "bin".to_string(),
        }
    }
}

/// Extract the consumed fields from gemspec YAML.
///
/// Tolerant by design: unknown tags are unwrapped, missing or malformed
/// fields keep their defaults, and a wholly unparseable document yields the
/// default info rather than an error.
#[must_use]
pub fn parse_gemspec(yaml: &str) -> GemspecInfo {
    let mut info = GemspecInfo::default();

    let Ok(value) = serde_yaml::from_str::<Value>(yaml) else {
        return info;
    };
    let Value::Mapping(mapping) = unwrap_tag(&value) else {
        return info;
    };

    if let Some(paths) = lookup(mapping, "require_paths") {
        let paths = extract_string_list(paths);
        if !paths.is_empty() {
            info.require_paths = paths;
        }
    }
    if let Some(executables) = lookup(mapping, "executables") {
        info.executables = extract_string_list(executables);
    }
    if let Some(bindir) = lookup(mapping, "bindir")
        && let Some(text) = extract_string(bindir)
    {
        info.bindir = text;
    }

    info
}

/// Peel ruby object tags off a value
fn unwrap_tag(value: &Value) -> &Value {
    match value {
        Value::Tagged(tagged) => unwrap_tag(&tagged.value),
        other => other,
    }
}

fn lookup<'a>(mapping: &'a serde_yaml::Mapping, key: &str) -> Option<&'a Value> {
    mapping.iter().find_map(|(name, value)| match unwrap_tag(name) {
        Value::String(text) if text == key => Some(value),
        _ => None,
    })
}

fn extract_string(value: &Value) -> Option<String> {
    match unwrap_tag(value) {
        Value::String(text) => Some(text.clone()),
        _ => None,
    }
}

fn extract_string_list(value: &Value) -> Vec<String> {
    match unwrap_tag(value) {
        Value::Sequence(items) => items.iter().filter_map(extract_string).collect(),
        Value::String(text) => vec![text.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEMSPEC: &str = "\
--- !ruby/object:Gem::Specification
name: rake
version: !ruby/object:Gem::Version
  version: 13.0.0
require_paths:
- lib
- ext
executables:
- rake
bindir: exe
";

    #[test]
    fn reads_consumed_fields() {
        let info = parse_gemspec(GEMSPEC);
        assert_eq!(info.require_paths, vec!["lib", "ext"]);
        assert_eq!(info.executables, vec!["rake"]);
        assert_eq!(info.bindir, "exe");
    }

    #[test]
    fn defaults_on_missing_fields() {
        let info = parse_gemspec("--- !ruby/object:Gem::Specification\nname: x\n");
        assert_eq!(info.require_paths, vec!["lib"]);
        assert!(info.executables.is_empty());
        assert_eq!(info.bindir, "bin");
    }

    #[test]
    fn defaults_on_garbage() {
        let info = parse_gemspec(":::: not yaml {{{{");
        assert_eq!(info, GemspecInfo::default());
    }

    #[test]
    fn empty_require_paths_keeps_default() {
        let info = parse_gemspec("---\nrequire_paths: []\n");
        assert_eq!(info.require_paths, vec!["lib"]);
    }
}
