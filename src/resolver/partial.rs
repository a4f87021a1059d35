//! The partial solution: the solver's ordered assignment trail.
//!
//! Assignments are either decisions (an exact version was chosen) or
//! derivations (a range constraint propagated from an incompatibility). The
//! trail is append-only between backjumps; a backjump truncates it to a
//! decision level.

use crate::range::Range;
use crate::resolver::incompat::{IncompId, Term};
use crate::resolver::intern::PackageId;
use crate::version::Version;

/// One entry in the partial solution
#[derive(Debug, Clone)]
pub struct Assignment {
    pub package: PackageId,
    pub range: Range,
    pub positive: bool,
    /// True when an exact version was chosen
    pub decision: bool,
    /// The chosen version, for decisions
    pub version: Option<Version>,
    /// Decision level at which this assignment was added
    pub level: u32,
    /// The incompatibility that forced this derivation (`None` for decisions)
    pub cause: Option<IncompId>,
}

/// How a term relates to the current partial solution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Every version the solution still admits satisfies the term
    Satisfied,
    /// No admitted version can satisfy the term
    Contradicted,
    /// Neither is known yet
    Inconclusive,
}

/// The ordered assignment trail
#[derive(Debug, Default)]
pub struct PartialSolution {
    assignments: Vec<Assignment>,
}

impl PartialSolution {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, assignment: Assignment) {
        self.assignments.push(assignment);
    }

    /// Drop every assignment above `level`
    pub fn backtrack_to(&mut self, level: u32) {
        self.assignments.retain(|a| a.level <= level);
    }

    #[must_use]
    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    /// The decision for a package, if one was made
    #[must_use]
    pub fn decision_for(&self, package: PackageId) -> Option<&Assignment> {
        self.assignments
            .iter()
            .find(|a| a.package == package && a.decision)
    }

    /// Intersection of all positive derivations and decisions for a package
    #[must_use]
    pub fn positive_range(&self, package: PackageId) -> Option<Range> {
        let mut combined: Option<Range> = None;
        for assignment in &self.assignments {
            if assignment.package != package || !assignment.positive {
                continue;
            }
            combined = Some(match combined {
                Some(range) => range.intersect(&assignment.range),
                None => assignment.range.clone(),
            });
        }
        combined
    }

    /// All negative (exclusion) ranges for a package
    #[must_use]
    pub fn negative_ranges(&self, package: PackageId) -> Vec<&Range> {
        self.assignments
            .iter()
            .filter(|a| a.package == package && !a.positive)
            .map(|a| &a.range)
            .collect()
    }

    /// Index in the trail of the most recent assignment touching a package
    #[must_use]
    pub fn latest_index_for(&self, package: PackageId) -> Option<usize> {
        self.assignments
            .iter()
            .rposition(|a| a.package == package)
    }

    /// Decision level of the most recent assignment touching a package
    #[must_use]
    pub fn latest_level_for(&self, package: PackageId) -> Option<u32> {
        self.latest_index_for(package)
            .and_then(|index| self.assignments.get(index))
            .map(|a| a.level)
    }

    /// Packages with at least one positive assignment but no decision yet,
    /// in first-assignment order (which keeps runs deterministic).
    #[must_use]
    pub fn undecided_packages(&self) -> Vec<PackageId> {
        let mut seen = Vec::new();
        for assignment in &self.assignments {
            if assignment.positive
                && !seen.contains(&assignment.package)
                && self.decision_for(assignment.package).is_none()
            {
                seen.push(assignment.package);
            }
        }
        seen
    }

    /// Relate a term to the current trail.
    ///
    /// With a decision in place the relation is exact. Otherwise it is judged
    /// from the intersection of positive ranges and the list of negative
    /// exclusion ranges; when neither direction can be proven the term stays
    /// inconclusive, which only delays propagation and never unsoundly
    /// derives.
    #[must_use]
    pub fn relation(&self, term: &Term) -> Relation {
        if let Some(decision) = self.decision_for(term.package) {
            let in_range = decision
                .version
                .as_ref()
                .is_some_and(|version| term.range.contains(version));
            return if in_range == term.positive {
                Relation::Satisfied
            } else {
                Relation::Contradicted
            };
        }

        let positive = self.positive_range(term.package);
        let negatives = self.negative_ranges(term.package);

        if term.positive {
            match positive {
                Some(p) => {
                    let within = p.intersect(&term.range);
                    if within.is_empty() {
                        return Relation::Contradicted;
                    }
                    if negatives.iter().any(|n| n.allows_all(&within)) {
                        return Relation::Contradicted;
                    }
                    if term.range.allows_all(&p) {
                        return Relation::Satisfied;
                    }
                    Relation::Inconclusive
                }
                None => {
                    if negatives.iter().any(|n| n.allows_all(&term.range)) {
                        return Relation::Contradicted;
                    }
                    Relation::Inconclusive
                }
            }
        } else {
            match positive {
                Some(p) => {
                    let within = p.intersect(&term.range);
                    if within.is_empty() {
                        return Relation::Satisfied;
                    }
                    if negatives.iter().any(|n| n.allows_all(&within)) {
                        return Relation::Satisfied;
                    }
                    if term.range.allows_all(&p) {
                        return Relation::Contradicted;
                    }
                    Relation::Inconclusive
                }
                None => {
                    if negatives.iter().any(|n| n.allows_all(&term.range)) {
                        return Relation::Satisfied;
                    }
                    Relation::Inconclusive
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::intern::NameInterner;
    use crate::version::ConstraintSet;

    fn range(text: &str) -> Range {
        Range::from_constraints(&ConstraintSet::parse(text).unwrap())
    }

    fn derivation(package: PackageId, text: &str, positive: bool, level: u32) -> Assignment {
        Assignment {
            package,
            range: range(text),
            positive,
            decision: false,
            version: None,
            level,
            cause: None,
        }
    }

    #[test]
    fn decision_relation_is_exact() {
        let mut interner = NameInterner::new();
        let rack = interner.intern("rack");

        let mut partial = PartialSolution::new();
        partial.push(Assignment {
            package: rack,
            range: Range::exact(&"2.0".parse().unwrap()),
            positive: true,
            decision: true,
            version: Some("2.0".parse().unwrap()),
            level: 1,
            cause: None,
        });

        let inside = Term::positive(rack, range(">= 1.0"));
        let outside = Term::positive(rack, range(">= 3.0"));
        assert_eq!(partial.relation(&inside), Relation::Satisfied);
        assert_eq!(partial.relation(&outside), Relation::Contradicted);
    }

    #[test]
    fn derived_ranges_combine() {
        let mut interner = NameInterner::new();
        let rack = interner.intern("rack");

        let mut partial = PartialSolution::new();
        partial.push(derivation(rack, ">= 1.0", true, 0));
        partial.push(derivation(rack, "< 2.0", true, 1));

        let covering = Term::positive(rack, range(">= 0.5"));
        assert_eq!(partial.relation(&covering), Relation::Satisfied);

        let disjoint = Term::positive(rack, range(">= 3.0"));
        assert_eq!(partial.relation(&disjoint), Relation::Contradicted);

        let partial_overlap = Term::positive(rack, range(">= 1.5"));
        assert_eq!(partial.relation(&partial_overlap), Relation::Inconclusive);
    }

    #[test]
    fn unknown_packages_are_inconclusive() {
        let mut interner = NameInterner::new();
        let rack = interner.intern("rack");

        let partial = PartialSolution::new();
        let term = Term::positive(rack, range(">= 1.0"));
        assert_eq!(partial.relation(&term), Relation::Inconclusive);
    }

    #[test]
    fn backtrack_truncates_by_level() {
        let mut interner = NameInterner::new();
        let rack = interner.intern("rack");
        let rails = interner.intern("rails");

        let mut partial = PartialSolution::new();
        partial.push(derivation(rack, ">= 1.0", true, 0));
        partial.push(derivation(rails, ">= 7.0", true, 1));
        partial.push(derivation(rack, "< 3.0", true, 2));

        partial.backtrack_to(1);
        assert_eq!(partial.assignments().len(), 2);
        assert_eq!(partial.latest_level_for(rack), Some(0));
    }

    #[test]
    fn undecided_listing_preserves_order() {
        let mut interner = NameInterner::new();
        let rack = interner.intern("rack");
        let rails = interner.intern("rails");

        let mut partial = PartialSolution::new();
        partial.push(derivation(rails, ">= 7.0", true, 0));
        partial.push(derivation(rack, ">= 1.0", true, 0));

        assert_eq!(partial.undecided_packages(), vec![rails, rack]);
    }
}
