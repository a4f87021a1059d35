//! Gem version model: segment-based versions and constraint sets.
//!
//! Gem versions are not semver. A version is an ordered sequence of segments,
//! each either a number or a short lowercase string (`1.0.0.rc1` has segments
//! `1`, `0`, `0`, `rc`, `1`). Trailing zeros are insignificant (`4.0` equals
//! `4.0.0`) and any string segment marks the version as a prerelease.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from version and constraint parsing
#[derive(Debug, Error)]
pub enum VersionError {
    #[error("empty version string")]
    Empty,

    #[error("invalid character {ch:?} in version {input:?}")]
    InvalidCharacter { ch: char, input: String },

    #[error("invalid constraint {0:?}")]
    InvalidConstraint(String),

    #[error("numeric segment overflow in version {0:?}")]
    Overflow(String),
}

/// One version segment: a number or a lowercase alphabetic run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Number(u64),
    Text(String),
}

impl Segment {
    /// String segments sort before numbers at the same position; a missing
    /// segment compares as `Number(0)`.
    fn cmp_segments(a: &Self, b: &Self) -> Ordering {
        match (a, b) {
            (Self::Number(x), Self::Number(y)) => x.cmp(y),
            (Self::Text(x), Self::Text(y)) => x.cmp(y),
            (Self::Text(_), Self::Number(_)) => Ordering::Less,
            (Self::Number(_), Self::Text(_)) => Ordering::Greater,
        }
    }
}

/// A parsed gem version
///
/// Comparison follows gem semantics rather than semver: segments are compared
/// pairwise with missing segments reading as zero, and string segments sort
/// below everything numeric. The original text is retained for display.
#[derive(Debug, Clone)]
pub struct Version {
    segments: Vec<Segment>,
    original: String,
}

impl Version {
    /// Parse a version string.
    ///
    /// Segments are separated by `.`; a digit-to-letter boundary (or the
    /// reverse) inside one piece also starts a new segment, so `1.0a2` parses
    /// as `1`, `0`, `a`, `2`. Leading whitespace is tolerated.
    ///
    /// # Errors
    ///
    /// Returns an error for empty input or characters outside `[0-9a-z.]`.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let text = input.trim();
        if text.is_empty() {
            return Err(VersionError::Empty);
        }

        let mut segments = Vec::new();
        let mut digits = String::new();
        let mut letters = String::new();

        let flush_digits = |digits: &mut String, segments: &mut Vec<Segment>| {
            if digits.is_empty() {
                return Ok(());
            }
            let value = digits
                .parse::<u64>()
                .map_err(|_| VersionError::Overflow(text.to_string()))?;
            segments.push(Segment::Number(value));
            digits.clear();
            Ok(())
        };

        for ch in text.chars() {
            match ch {
                '0'..='9' => {
                    if !letters.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut letters)));
                    }
                    digits.push(ch);
                }
                'a'..='z' | 'A'..='Z' => {
                    flush_digits(&mut digits, &mut segments)?;
                    letters.push(ch.to_ascii_lowercase());
                }
                '.' => {
                    flush_digits(&mut digits, &mut segments)?;
                    if !letters.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut letters)));
                    }
                }
                _ => {
                    return Err(VersionError::InvalidCharacter {
                        ch,
                        input: text.to_string(),
                    });
                }
            }
        }
        flush_digits(&mut digits, &mut segments)?;
        if !letters.is_empty() {
            segments.push(Segment::Text(letters));
        }

        if segments.is_empty() {
            return Err(VersionError::Empty);
        }

        Ok(Self {
            segments,
            original: text.to_string(),
        })
    }

    /// The parsed segments
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// A version is a prerelease iff it contains any string segment
    #[must_use]
    pub fn is_prerelease(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Text(_)))
    }

    /// The pessimistic upper bound: drop trailing string segments, drop the
    /// last remaining segment (when more than one remains), and increment.
    ///
    /// `1.2.3` bumps to `1.3`, `1.2` bumps to `2`, `1` bumps to `2`.
    #[must_use]
    pub fn bump(&self) -> Self {
        let mut segments: Vec<Segment> = self.segments.clone();

        while segments
            .last()
            .is_some_and(|segment| matches!(segment, Segment::Text(_)))
        {
            segments.pop();
        }
        if segments.len() > 1 {
            segments.pop();
        }

        match segments.last_mut() {
            Some(Segment::Number(n)) => *n += 1,
            _ => segments.push(Segment::Number(1)),
        }

        let original = segments
            .iter()
            .map(|segment| match segment {
                Segment::Number(n) => n.to_string(),
                Segment::Text(s) => s.clone(),
            })
            .collect::<Vec<_>>()
            .join(".");

        Self { segments, original }
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        const ZERO: Segment = Segment::Number(0);

        for index in 0..len {
            let a = self.segments.get(index).unwrap_or(&ZERO);
            let b = other.segments.get(index).unwrap_or(&ZERO);
            let ordering = Segment::cmp_segments(a, b);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }

        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Constraint operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    /// The pessimistic operator `~>`
    Pessimistic,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Pessimistic => "~>",
        };
        write!(f, "{text}")
    }
}

/// A single version constraint: an operator and a version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub operator: Operator,
    pub version: Version,
}

impl Constraint {
    /// Parse one constraint like `>= 1.0` or `~> 2.1.3`.
    ///
    /// A missing operator defaults to `=`.
    ///
    /// # Errors
    ///
    /// Returns an error if the operator or version cannot be parsed.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let text = input.trim();
        if text.is_empty() {
            return Err(VersionError::InvalidConstraint(input.to_string()));
        }

        let (operator, rest) = if let Some(rest) = text.strip_prefix("~>") {
            (Operator::Pessimistic, rest)
        } else if let Some(rest) = text.strip_prefix(">=") {
            (Operator::GreaterOrEqual, rest)
        } else if let Some(rest) = text.strip_prefix("<=") {
            (Operator::LessOrEqual, rest)
        } else if let Some(rest) = text.strip_prefix("!=") {
            (Operator::NotEqual, rest)
        } else if let Some(rest) = text.strip_prefix(">") {
            (Operator::Greater, rest)
        } else if let Some(rest) = text.strip_prefix("<") {
            (Operator::Less, rest)
        } else if let Some(rest) = text.strip_prefix("=") {
            (Operator::Equal, rest)
        } else {
            (Operator::Equal, text)
        };

        let version = Version::parse(rest)
            .map_err(|_| VersionError::InvalidConstraint(input.to_string()))?;

        Ok(Self { operator, version })
    }

    /// Check whether a version satisfies this constraint, ignoring the
    /// prerelease gate (which is a property of a whole set).
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        match self.operator {
            Operator::Equal => version == &self.version,
            Operator::NotEqual => version != &self.version,
            Operator::Greater => version > &self.version,
            Operator::GreaterOrEqual => version >= &self.version,
            Operator::Less => version < &self.version,
            Operator::LessOrEqual => version <= &self.version,
            Operator::Pessimistic => version >= &self.version && *version < self.version.bump(),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operator, self.version)
    }
}

/// A conjunction of constraints, as written in a Gemfile or the index
///
/// An empty set matches any release version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintSet {
    constraints: Vec<Constraint>,
}

impl ConstraintSet {
    /// The unconstrained set (`>= 0`)
    #[must_use]
    pub const fn any() -> Self {
        Self {
            constraints: Vec::new(),
        }
    }

    /// Parse a comma-joined constraint list like `>= 1.0, < 2.0`.
    ///
    /// # Errors
    ///
    /// Returns an error if any piece fails to parse.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let text = input.trim();
        if text.is_empty() {
            return Ok(Self::any());
        }

        let constraints = text
            .split(',')
            .map(Constraint::parse)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { constraints })
    }

    /// Build a set from already-parsed constraints
    #[must_use]
    pub fn from_constraints(constraints: Vec<Constraint>) -> Self {
        Self { constraints }
    }

    /// The member constraints
    #[must_use]
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Whether some member constraint names a prerelease version.
    ///
    /// This is the anti-surprise gate: prerelease versions only match a set
    /// that itself mentions a prerelease.
    #[must_use]
    pub fn references_prerelease(&self) -> bool {
        self.constraints
            .iter()
            .any(|constraint| constraint.version.is_prerelease())
    }

    /// Check whether a version satisfies every constraint, applying the
    /// prerelease gate.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        if version.is_prerelease() && !self.references_prerelease() {
            return false;
        }

        self.constraints
            .iter()
            .all(|constraint| constraint.matches(version))
    }
}

impl fmt::Display for ConstraintSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.constraints.is_empty() {
            return write!(f, ">= 0");
        }

        for (index, constraint) in self.constraints.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{constraint}")?;
        }
        Ok(())
    }
}
