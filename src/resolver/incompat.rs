//! Terms and incompatibilities: the solver's learned facts.
//!
//! An incompatibility is a set of terms that cannot all hold at once. The
//! solver starts with root requirements and per-version dependency facts and
//! derives new incompatibilities during conflict resolution; the cause keeps
//! enough structure to explain a failed resolution afterwards.

use crate::range::Range;
use crate::resolver::intern::PackageId;
use crate::version::Version;

/// Index of an incompatibility in the solver's grow-only list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncompId(pub(crate) u32);

/// A statement about one package
///
/// Positive polarity means "the chosen version must lie in `range`";
/// negative means "must not".
#[derive(Debug, Clone)]
pub struct Term {
    pub package: PackageId,
    pub range: Range,
    pub positive: bool,
}

impl Term {
    pub(crate) fn positive(package: PackageId, range: Range) -> Self {
        Self {
            package,
            range,
            positive: true,
        }
    }

    pub(crate) fn negative(package: PackageId, range: Range) -> Self {
        Self {
            package,
            range,
            positive: false,
        }
    }
}

/// Why an incompatibility exists
#[derive(Debug, Clone)]
pub enum Cause {
    /// A direct user requirement
    Root,
    /// `package` at `version` depends on the (negative) term's package
    Dependency {
        package: PackageId,
        version: Version,
    },
    /// Derived from two earlier incompatibilities during conflict resolution
    Conflict { left: IncompId, right: IncompId },
    /// No available version of the term's package matches its range.
    /// The culprits snapshot the incompatibilities that were constraining
    /// the package when this was learned, for explanations that survive
    /// backjumping.
    Unavailable { culprits: Vec<IncompId> },
}

/// A set of terms that cannot all be satisfied simultaneously
#[derive(Debug, Clone)]
pub struct Incompatibility {
    pub terms: Vec<Term>,
    pub cause: Cause,
}

impl Incompatibility {
    /// Whether any term mentions `package`
    #[must_use]
    pub fn references(&self, package: PackageId) -> bool {
        self.terms.iter().any(|term| term.package == package)
    }

    /// Merge two parent incompatibilities during conflict resolution.
    ///
    /// The result is the union of both term sets with every term about
    /// `pivot` removed. Terms about the same package with the same polarity
    /// intersect their ranges; differing polarities keep both terms.
    #[must_use]
    pub fn merge_excluding(a: &Self, b: &Self, pivot: PackageId) -> Vec<Term> {
        let mut merged: Vec<Term> = Vec::with_capacity(a.terms.len() + b.terms.len());

        for term in a.terms.iter().chain(&b.terms) {
            if term.package == pivot {
                continue;
            }

            if let Some(existing) = merged
                .iter_mut()
                .find(|t| t.package == term.package && t.positive == term.positive)
            {
                existing.range = existing.range.intersect(&term.range);
            } else {
                merged.push(term.clone());
            }
        }

        merged
    }
}
