//! Package-name interning for the solver.
//!
//! The solver never stores name strings in its working structures. One
//! interner owns every name for the lifetime of a resolution and everything
//! else refers to packages by `PackageId`, so terms, incompatibilities, and
//! assignments stay `Copy`-cheap and free of ownership entanglements.

use std::collections::HashMap;

/// Index of an interned package name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId(u32);

/// Owns all package-name strings seen during one resolution
#[derive(Debug, Default)]
pub struct NameInterner {
    names: Vec<String>,
    ids: HashMap<String, PackageId>,
}

impl NameInterner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a name, returning the existing id for a name already seen
    pub fn intern(&mut self, name: &str) -> PackageId {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }

        let id = PackageId(u32::try_from(self.names.len()).unwrap_or(u32::MAX));
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }

    /// Look up the name for an id
    #[must_use]
    pub fn resolve(&self, id: PackageId) -> &str {
        self.names.get(id.0 as usize).map_or("", String::as_str)
    }

    /// Number of interned names
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when nothing has been interned
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let mut interner = NameInterner::new();
        let rack = interner.intern("rack");
        let rails = interner.intern("rails");
        assert_ne!(rack, rails);
        assert_eq!(interner.intern("rack"), rack);
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn resolve_round_trips() {
        let mut interner = NameInterner::new();
        let id = interner.intern("nokogiri");
        assert_eq!(interner.resolve(id), "nokogiri");
    }
}
