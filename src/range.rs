//! Interval algebra over gem versions.
//!
//! The solver works on contiguous intervals with per-endpoint inclusivity.
//! `!=` constraints are carried as point exclusions beside the interval so
//! the solver never needs a separate post-filter for them.

use crate::version::{ConstraintSet, Operator, Version};
use std::fmt;

/// One interval endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub version: Version,
    pub inclusive: bool,
}

/// A contiguous version interval with optional bounds and point exclusions
///
/// `min: None` means unbounded below, `max: None` unbounded above. The empty
/// range is representable directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    empty: bool,
    min: Option<Bound>,
    max: Option<Bound>,
    excluded: Vec<Version>,
}

impl Range {
    /// The universal range
    #[must_use]
    pub const fn any() -> Self {
        Self {
            empty: false,
            min: None,
            max: None,
            excluded: Vec::new(),
        }
    }

    /// The empty range
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            empty: true,
            min: None,
            max: None,
            excluded: Vec::new(),
        }
    }

    /// The range containing exactly one version
    #[must_use]
    pub fn exact(version: &Version) -> Self {
        Self {
            empty: false,
            min: Some(Bound {
                version: version.clone(),
                inclusive: true,
            }),
            max: Some(Bound {
                version: version.clone(),
                inclusive: true,
            }),
            excluded: Vec::new(),
        }
    }

    /// Expand a constraint set into a range, applying the pessimistic
    /// operator's bounds (`~> X.Y.Z` becomes `[X.Y.Z, X.(Y+1).0)`).
    #[must_use]
    pub fn from_constraints(set: &ConstraintSet) -> Self {
        let mut range = Self::any();

        for constraint in set.constraints() {
            let version = &constraint.version;
            let piece = match constraint.operator {
                Operator::Equal => Self::exact(version),
                Operator::NotEqual => {
                    range.excluded.push(version.clone());
                    continue;
                }
                Operator::Greater => Self::above(version, false),
                Operator::GreaterOrEqual => Self::above(version, true),
                Operator::Less => Self::below(version, false),
                Operator::LessOrEqual => Self::below(version, true),
                Operator::Pessimistic => Self {
                    empty: false,
                    min: Some(Bound {
                        version: version.clone(),
                        inclusive: true,
                    }),
                    max: Some(Bound {
                        version: version.bump(),
                        inclusive: false,
                    }),
                    excluded: Vec::new(),
                },
            };
            range = range.intersect(&piece);
        }

        range.normalize();
        range
    }

    fn above(version: &Version, inclusive: bool) -> Self {
        Self {
            empty: false,
            min: Some(Bound {
                version: version.clone(),
                inclusive,
            }),
            max: None,
            excluded: Vec::new(),
        }
    }

    fn below(version: &Version, inclusive: bool) -> Self {
        Self {
            empty: false,
            min: None,
            max: Some(Bound {
                version: version.clone(),
                inclusive,
            }),
            excluded: Vec::new(),
        }
    }

    /// True when this range admits no version
    #[must_use]
    pub fn is_empty(&self) -> bool {
        if self.empty {
            return true;
        }
        if let (Some(min), Some(max)) = (&self.min, &self.max) {
            if min.version > max.version {
                return true;
            }
            if min.version == max.version {
                if !(min.inclusive && max.inclusive) {
                    return true;
                }
                // A single admitted point may itself be excluded
                return self.excluded.iter().any(|v| *v == min.version);
            }
        }
        false
    }

    /// True for the universal range
    #[must_use]
    pub fn is_any(&self) -> bool {
        !self.empty && self.min.is_none() && self.max.is_none() && self.excluded.is_empty()
    }

    /// Boundary-aware membership test
    #[must_use]
    pub fn contains(&self, version: &Version) -> bool {
        if self.empty {
            return false;
        }
        if let Some(min) = &self.min {
            let above = if min.inclusive {
                version >= &min.version
            } else {
                version > &min.version
            };
            if !above {
                return false;
            }
        }
        if let Some(max) = &self.max {
            let below = if max.inclusive {
                version <= &max.version
            } else {
                version < &max.version
            };
            if !below {
                return false;
            }
        }
        !self.excluded.iter().any(|excluded| excluded == version)
    }

    /// Element-wise tightening of both bounds; exclusions are merged
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        if self.empty || other.empty {
            return Self::empty();
        }

        let min = match (&self.min, &other.min) {
            (Some(a), Some(b)) => Some(tighter_min(a, b)),
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            (None, None) => None,
        };
        let max = match (&self.max, &other.max) {
            (Some(a), Some(b)) => Some(tighter_max(a, b)),
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            (None, None) => None,
        };

        let mut excluded = self.excluded.clone();
        for version in &other.excluded {
            if !excluded.contains(version) {
                excluded.push(version.clone());
            }
        }

        let mut result = Self {
            empty: false,
            min,
            max,
            excluded,
        };
        result.normalize();
        result
    }

    /// Whole-containment: every version in `other` is in `self`.
    ///
    /// Exclusions make this conservative: an exclusion of `self` that `other`
    /// still admits defeats containment.
    #[must_use]
    pub fn allows_all(&self, other: &Self) -> bool {
        if other.is_empty() {
            return true;
        }
        if self.is_empty() {
            return false;
        }

        match (&self.min, &other.min) {
            (Some(a), Some(b)) => {
                if a.version > b.version || (a.version == b.version && !a.inclusive && b.inclusive)
                {
                    return false;
                }
            }
            (Some(_), None) => return false,
            (None, _) => {}
        }
        match (&self.max, &other.max) {
            (Some(a), Some(b)) => {
                if a.version < b.version || (a.version == b.version && !a.inclusive && b.inclusive)
                {
                    return false;
                }
            }
            (Some(_), None) => return false,
            (None, _) => {}
        }

        self.excluded
            .iter()
            .all(|version| !other.contains(version))
    }

    /// Whether either endpoint names a prerelease version.
    ///
    /// Prerelease versions are only eligible for decisions when the effective
    /// range references one.
    #[must_use]
    pub fn has_prerelease_bound(&self) -> bool {
        self.min
            .as_ref()
            .is_some_and(|bound| bound.version.is_prerelease())
            || self
                .max
                .as_ref()
                .is_some_and(|bound| bound.version.is_prerelease())
    }

    /// Drop the empty-interval representation down to the canonical form
    fn normalize(&mut self) {
        if !self.empty && self.is_empty() {
            *self = Self::empty();
        }
    }
}

fn tighter_min(a: &Bound, b: &Bound) -> Bound {
    if a.version > b.version {
        a.clone()
    } else if b.version > a.version {
        b.clone()
    } else {
        Bound {
            version: a.version.clone(),
            inclusive: a.inclusive && b.inclusive,
        }
    }
}

fn tighter_max(a: &Bound, b: &Bound) -> Bound {
    if a.version < b.version {
        a.clone()
    } else if b.version < a.version {
        b.clone()
    } else {
        Bound {
            version: a.version.clone(),
            inclusive: a.inclusive && b.inclusive,
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "(no version)");
        }
        if self.is_any() {
            return write!(f, ">= 0");
        }

        let mut pieces = Vec::new();
        match (&self.min, &self.max) {
            (Some(min), Some(max)) if min.version == max.version => {
                pieces.push(format!("= {}", min.version));
            }
            (min, max) => {
                if let Some(min) = min {
                    let op = if min.inclusive { ">=" } else { ">" };
                    pieces.push(format!("{op} {}", min.version));
                }
                if let Some(max) = max {
                    let op = if max.inclusive { "<=" } else { "<" };
                    pieces.push(format!("{op} {}", max.version));
                }
            }
        }
        for version in &self.excluded {
            pieces.push(format!("!= {version}"));
        }

        write!(f, "{}", pieces.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(text: &str) -> Version {
        Version::parse(text).unwrap()
    }

    fn set(text: &str) -> ConstraintSet {
        ConstraintSet::parse(text).unwrap()
    }

    mod membership {
        use super::*;

        #[test]
        fn any_contains_everything() {
            assert!(Range::any().contains(&v("0.0.1")));
            assert!(Range::any().contains(&v("999")));
        }

        #[test]
        fn empty_contains_nothing() {
            assert!(!Range::empty().contains(&v("1.0")));
            assert!(Range::empty().is_empty());
        }

        #[test]
        fn exact_is_a_point() {
            let range = Range::exact(&v("1.5.0"));
            assert!(range.contains(&v("1.5")));
            assert!(!range.contains(&v("1.5.1")));
        }

        #[test]
        fn boundaries_respect_inclusivity() {
            let range = Range::from_constraints(&set(">= 1.0, < 2.0"));
            assert!(range.contains(&v("1.0")));
            assert!(range.contains(&v("1.9.9")));
            assert!(!range.contains(&v("2.0")));
        }

        #[test]
        fn exclusions_punch_holes() {
            let range = Range::from_constraints(&set(">= 1.0, != 1.5"));
            assert!(range.contains(&v("1.4")));
            assert!(!range.contains(&v("1.5.0")));
        }
    }

    mod intersection {
        use super::*;

        #[test]
        fn membership_distributes() {
            let a = Range::from_constraints(&set(">= 1.0, < 3.0"));
            let b = Range::from_constraints(&set(">= 2.0, < 4.0"));
            let both = a.intersect(&b);

            for text in ["0.9", "1.0", "1.9", "2.0", "2.5", "3.0", "4.0"] {
                let version = v(text);
                assert_eq!(
                    both.contains(&version),
                    a.contains(&version) && b.contains(&version),
                    "mismatch at {text}"
                );
            }
        }

        #[test]
        fn equal_bounds_and_inclusivity() {
            let a = Range::from_constraints(&set(">= 1.0, <= 2.0"));
            let b = Range::from_constraints(&set("> 1.0, < 2.0"));
            let both = a.intersect(&b);
            assert!(!both.contains(&v("1.0")));
            assert!(!both.contains(&v("2.0")));
            assert!(both.contains(&v("1.5")));
        }

        #[test]
        fn disjoint_is_empty() {
            let a = Range::from_constraints(&set("< 1.0"));
            let b = Range::from_constraints(&set(">= 2.0"));
            assert!(a.intersect(&b).is_empty());
        }

        #[test]
        fn touching_exclusive_is_empty() {
            let a = Range::from_constraints(&set("<= 1.0"));
            let b = Range::from_constraints(&set("> 1.0"));
            assert!(a.intersect(&b).is_empty());
        }
    }

    mod containment {
        use super::*;

        #[test]
        fn wider_allows_narrower() {
            let wide = Range::from_constraints(&set(">= 1.0"));
            let narrow = Range::from_constraints(&set(">= 2.0, < 3.0"));
            assert!(wide.allows_all(&narrow));
            assert!(!narrow.allows_all(&wide));
        }

        #[test]
        fn everything_allows_empty() {
            assert!(Range::empty().allows_all(&Range::empty()));
            assert!(Range::exact(&v("1.0")).allows_all(&Range::empty()));
        }

        #[test]
        fn exclusion_defeats_containment() {
            let holed = Range::from_constraints(&set(">= 1.0, != 1.5"));
            let inner = Range::from_constraints(&set(">= 1.0, < 2.0"));
            assert!(!holed.allows_all(&inner));

            let matching = Range::from_constraints(&set(">= 1.0, < 2.0, != 1.5"));
            assert!(holed.allows_all(&matching));
        }
    }

    mod construction {
        use super::*;

        #[test]
        fn pessimistic_expansion() {
            let range = Range::from_constraints(&set("~> 1.2.3"));
            assert!(range.contains(&v("1.2.3")));
            assert!(range.contains(&v("1.2.99")));
            assert!(!range.contains(&v("1.3.0")));
        }

        #[test]
        fn equality_collapses_to_point() {
            let range = Range::from_constraints(&set("= 1.0"));
            assert!(range.contains(&v("1.0.0")));
            assert!(!range.contains(&v("1.0.1")));
        }

        #[test]
        fn conflicting_constraints_are_empty() {
            let range = Range::from_constraints(&set("= 1.0, = 2.0"));
            assert!(range.is_empty());
        }

        #[test]
        fn prerelease_bound_detection() {
            assert!(Range::from_constraints(&set(">= 1.0.0.rc1")).has_prerelease_bound());
            assert!(!Range::from_constraints(&set(">= 1.0")).has_prerelease_bound());
        }
    }
}
