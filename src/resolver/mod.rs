//! Gem version resolution using the `PubGrub` algorithm.
//!
//! A conflict-driven solver: unit propagation derives range assignments from
//! incompatibilities, conflicts are resolved into learned incompatibilities
//! with backjumping, and decisions pick the newest matching version of the
//! most constrained package. Failures carry a cause chain that explains the
//! conflict in terms of the original requirements.

mod incompat;
mod intern;
mod partial;

pub use incompat::{Cause, IncompId, Incompatibility, Term};
pub use intern::{NameInterner, PackageId};
pub use partial::{Assignment, PartialSolution, Relation};

use crate::range::Range;
use crate::version::{ConstraintSet, Version};
use std::collections::HashMap;
use thiserror::Error;

/// Synthetic package representing the project's own requirements
const ROOT_PACKAGE: &str = "$root";

/// Outer solve-loop iteration cap; exceeding it is a bug, not a hard input
const MAX_ITERATIONS: usize = 10_000;

/// Depth cap for the explanation walk
const MAX_EXPLANATION_FRAMES: usize = 32;

/// Errors from a dependency provider
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to fetch index data for {package}")]
    Fetch {
        package: String,
        #[source]
        source: crate::net::NetError,
    },
}

/// Errors that can occur during dependency resolution
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("failed to resolve dependencies:\n{explanation}")]
    NoSolution { explanation: String },

    #[error("resolution did not converge within {MAX_ITERATIONS} iterations")]
    IterationLimit,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Source of package versions and per-version dependency vectors
///
/// The compact-index client implements this against the network; the
/// [`StaticProvider`] backs tests and offline resolution.
pub trait DependencyProvider {
    /// All known versions of a package, newest first. Unknown packages
    /// return an empty list; transport failures surface as errors.
    fn versions(&mut self, package: &str) -> Result<Vec<Version>, ProviderError>;

    /// The dependency vector of one exact version. An unknown version
    /// returns an empty list.
    fn dependencies(
        &mut self,
        package: &str,
        version: &Version,
    ) -> Result<Vec<(String, ConstraintSet)>, ProviderError>;
}

/// A gem chosen by the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedGem {
    /// Gem name
    pub name: String,

    /// Resolved version
    pub version: Version,

    /// Runtime dependencies of this resolved version
    pub dependencies: Vec<(String, ConstraintSet)>,
}

/// Dependency resolver over a [`DependencyProvider`]
#[derive(Debug)]
pub struct Resolver<P> {
    provider: P,
}

impl<P: DependencyProvider> Resolver<P> {
    #[must_use]
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Consume the resolver, returning its provider
    pub fn into_provider(self) -> P {
        self.provider
    }

    /// Resolve a set of root requirements to exact versions.
    ///
    /// # Errors
    ///
    /// Returns [`ResolverError::NoSolution`] with a cause-chain explanation
    /// when the requirements conflict, or a provider error when the index
    /// cannot be fetched.
    pub fn resolve(
        &mut self,
        roots: &[(String, ConstraintSet)],
    ) -> Result<Vec<ResolvedGem>, ResolverError> {
        let mut solve = Solve::new(&mut self.provider);
        solve.install_roots(roots);

        let mut seeds = vec![solve.root];
        let mut iterations = 0usize;
        loop {
            iterations += 1;
            if iterations > MAX_ITERATIONS {
                return Err(ResolverError::IterationLimit);
            }

            match solve.propagate(&seeds) {
                Ok(()) => match solve.make_decision()? {
                    Some(package) => seeds = vec![package],
                    None => return solve.extract_solution(),
                },
                Err(conflict) => {
                    seeds = solve.resolve_conflict(conflict)?;
                }
            }
        }
    }
}

/// State for one resolution run; dropped wholesale at the end
struct Solve<'a, P> {
    provider: &'a mut P,
    interner: NameInterner,
    incompats: Vec<Incompatibility>,
    partial: PartialSolution,
    level: u32,
    root: PackageId,
    /// Per-package version lists, newest first, fetched once
    versions: HashMap<PackageId, Vec<Version>>,
}

enum Classified {
    Conflict,
    AlmostSatisfied(usize),
    Inert,
}

impl<'a, P: DependencyProvider> Solve<'a, P> {
    fn new(provider: &'a mut P) -> Self {
        let mut interner = NameInterner::new();
        let root = interner.intern(ROOT_PACKAGE);

        Self {
            provider,
            interner,
            incompats: Vec::new(),
            partial: PartialSolution::new(),
            level: 0,
            root,
            versions: HashMap::new(),
        }
    }

    /// Record the `$root` decision and one incompatibility per requirement
    fn install_roots(&mut self, roots: &[(String, ConstraintSet)]) {
        let root_version: Version = Version::parse("1.0.0").unwrap_or_else(|_| unreachable!());
        self.partial.push(Assignment {
            package: self.root,
            range: Range::exact(&root_version),
            positive: true,
            decision: true,
            version: Some(root_version.clone()),
            level: 0,
            cause: None,
        });

        for (name, constraints) in roots {
            let package = self.interner.intern(name);
            let range = Range::from_constraints(constraints);
            self.add_incompat(Incompatibility {
                terms: vec![
                    Term::positive(self.root, Range::exact(&root_version)),
                    Term::negative(package, range),
                ],
                cause: Cause::Root,
            });
        }
    }

    fn add_incompat(&mut self, incompat: Incompatibility) -> IncompId {
        let id = IncompId(u32::try_from(self.incompats.len()).unwrap_or(u32::MAX));
        self.incompats.push(incompat);
        id
    }

    fn incompat(&self, id: IncompId) -> &Incompatibility {
        self.incompats
            .get(id.0 as usize)
            .unwrap_or_else(|| unreachable!("incompatibility ids are never removed"))
    }

    /// Unit propagation to a fixed point, filtered by changed packages.
    ///
    /// Returns the conflicting incompatibility when every term of one is
    /// satisfied at once.
    fn propagate(&mut self, seeds: &[PackageId]) -> Result<(), IncompId> {
        let mut changed: Vec<PackageId> = seeds.to_vec();

        while let Some(package) = changed.pop() {
            for index in 0..self.incompats.len() {
                let id = IncompId(u32::try_from(index).unwrap_or(u32::MAX));
                if !self.incompat(id).references(package) {
                    continue;
                }

                match self.classify(id) {
                    Classified::Conflict => return Err(id),
                    Classified::AlmostSatisfied(term_index) => {
                        let Some(term) = self.incompat(id).terms.get(term_index).cloned() else {
                            continue;
                        };
                        self.partial.push(Assignment {
                            package: term.package,
                            range: term.range,
                            positive: !term.positive,
                            decision: false,
                            version: None,
                            level: self.level,
                            cause: Some(id),
                        });
                        if !changed.contains(&term.package) {
                            changed.push(term.package);
                        }
                    }
                    Classified::Inert => {}
                }
            }
        }

        Ok(())
    }

    fn classify(&self, id: IncompId) -> Classified {
        let mut inconclusive: Option<usize> = None;

        for (index, term) in self.incompat(id).terms.iter().enumerate() {
            match self.partial.relation(term) {
                Relation::Satisfied => {}
                Relation::Contradicted => return Classified::Inert,
                Relation::Inconclusive => {
                    if inconclusive.is_some() {
                        return Classified::Inert;
                    }
                    inconclusive = Some(index);
                }
            }
        }

        match inconclusive {
            None => Classified::Conflict,
            Some(index) => Classified::AlmostSatisfied(index),
        }
    }

    /// Resolve a conflict into a learned incompatibility and backjump.
    ///
    /// Returns the packages of the learned incompatibility as the next
    /// propagation seeds, or the failure explanation when the conflict is
    /// unresolvable at level 0.
    fn resolve_conflict(&mut self, mut conflict: IncompId) -> Result<Vec<PackageId>, ResolverError> {
        loop {
            if self.level == 0 {
                return Err(ResolverError::NoSolution {
                    explanation: self.explain(conflict),
                });
            }

            // Terms whose package was last assigned at the current level,
            // tracking the most recently assigned one as the pivot.
            let mut at_current = 0usize;
            let mut pivot: Option<(usize, PackageId)> = None;
            for term in &self.incompat(conflict).terms {
                let Some(trail_index) = self.partial.latest_index_for(term.package) else {
                    continue;
                };
                let Some(assignment) = self.partial.assignments().get(trail_index) else {
                    continue;
                };
                if assignment.level == self.level {
                    at_current += 1;
                    if pivot.is_none_or(|(index, _)| trail_index > index) {
                        pivot = Some((trail_index, term.package));
                    }
                }
            }

            if at_current <= 1 {
                break;
            }

            let Some((trail_index, pivot_package)) = pivot else {
                break;
            };
            let Some(cause) = self
                .partial
                .assignments()
                .get(trail_index)
                .and_then(|a| a.cause)
            else {
                // The pivot is a decision; nothing further to resolve against
                break;
            };

            let merged = Incompatibility::merge_excluding(
                self.incompat(conflict),
                self.incompat(cause),
                pivot_package,
            );
            conflict = self.add_incompat(Incompatibility {
                terms: merged,
                cause: Cause::Conflict {
                    left: conflict,
                    right: cause,
                },
            });
        }

        let learned = self.incompat(conflict);
        if learned.terms.is_empty()
            || learned.terms.iter().all(|term| term.package == self.root)
        {
            return Err(ResolverError::NoSolution {
                explanation: self.explain(conflict),
            });
        }

        // Backjump to the highest level strictly below the current one at
        // which any learned term's package was already assigned.
        let mut backjump = 0;
        for term in &learned.terms {
            if let Some(level) = self.partial.latest_level_for(term.package)
                && level < self.level
            {
                backjump = backjump.max(level);
            }
        }

        let seeds: Vec<PackageId> = learned.terms.iter().map(|term| term.package).collect();
        self.partial.backtrack_to(backjump);
        self.level = backjump;
        Ok(seeds)
    }

    fn ensure_versions(&mut self, package: PackageId) -> Result<(), ProviderError> {
        if self.versions.contains_key(&package) {
            return Ok(());
        }
        let name = self.interner.resolve(package).to_string();
        let versions = self.provider.versions(&name)?;
        self.versions.insert(package, versions);
        Ok(())
    }

    /// Versions of `package` admitted by the current partial solution
    fn matching_versions(&self, package: PackageId, positive: &Range) -> Vec<&Version> {
        let negatives = self.partial.negative_ranges(package);
        let allow_prerelease = positive.has_prerelease_bound();

        self.versions
            .get(&package)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter(|version| {
                if version.is_prerelease() && !allow_prerelease {
                    return false;
                }
                positive.contains(version) && !negatives.iter().any(|n| n.contains(version))
            })
            .collect()
    }

    /// Pick the most constrained undecided package and decide its newest
    /// matching version; returns `None` when nothing is left to decide.
    fn make_decision(&mut self) -> Result<Option<PackageId>, ResolverError> {
        let candidates = self.partial.undecided_packages();
        for &package in &candidates {
            self.ensure_versions(package)?;
        }

        let mut best: Option<(PackageId, Range, usize)> = None;
        for &package in &candidates {
            let Some(positive) = self.partial.positive_range(package) else {
                continue;
            };
            let count = self.matching_versions(package, &positive).len();
            if best
                .as_ref()
                .is_none_or(|(_, _, best_count)| count < *best_count)
            {
                best = Some((package, positive, count));
            }
        }

        let Some((package, positive, count)) = best else {
            return Ok(None);
        };

        if count == 0 {
            // No matching version: forbid the effective positive range.
            // The culprits snapshot the causes currently constraining the
            // package (and, transitively, their packages) so the failure
            // explanation survives backjumping.
            let culprits = self.support_closure(package);
            self.add_incompat(Incompatibility {
                terms: vec![Term::positive(package, positive)],
                cause: Cause::Unavailable { culprits },
            });
            return Ok(Some(package));
        }

        let version = self
            .matching_versions(package, &positive)
            .first()
            .map(|v| (*v).clone())
            .unwrap_or_else(|| unreachable!("count was checked above"));

        self.level += 1;
        self.partial.push(Assignment {
            package,
            range: Range::exact(&version),
            positive: true,
            decision: true,
            version: Some(version.clone()),
            level: self.level,
            cause: None,
        });

        let name = self.interner.resolve(package).to_string();
        let dependencies = self.provider.dependencies(&name, &version)?;
        for (dep_name, constraints) in dependencies {
            let dep_package = self.interner.intern(&dep_name);
            if dep_package == package {
                continue;
            }
            let dep_range = Range::from_constraints(&constraints);
            self.add_incompat(Incompatibility {
                terms: vec![
                    Term::positive(package, Range::exact(&version)),
                    Term::negative(dep_package, dep_range),
                ],
                cause: Cause::Dependency {
                    package,
                    version: version.clone(),
                },
            });
        }

        Ok(Some(package))
    }

    /// Causes supporting the current assignments of `package`, transitively
    /// through the packages those causes mention. Computed while the
    /// assignments are still live; bounded by the incompatibility count.
    fn support_closure(&self, package: PackageId) -> Vec<IncompId> {
        let mut packages = vec![package];
        let mut causes: Vec<IncompId> = Vec::new();
        let mut cursor = 0;

        while let Some(&current) = packages.get(cursor) {
            cursor += 1;
            for assignment in self.partial.assignments() {
                if assignment.package != current {
                    continue;
                }
                let Some(cause) = assignment.cause else {
                    continue;
                };
                if causes.contains(&cause) {
                    continue;
                }
                causes.push(cause);
                for term in &self.incompat(cause).terms {
                    if !packages.contains(&term.package) {
                        packages.push(term.package);
                    }
                }
            }
        }

        causes
    }

    /// Walk the cause chain with an explicit stack and render one line per
    /// originating fact, joined with "and".
    fn explain(&self, failing: IncompId) -> String {
        let mut lines: Vec<String> = Vec::new();
        let mut visited: Vec<IncompId> = Vec::new();
        let mut stack = vec![failing];

        while let Some(id) = stack.pop() {
            if visited.contains(&id) || visited.len() >= MAX_EXPLANATION_FRAMES {
                continue;
            }
            visited.push(id);

            let incompat = self.incompat(id);
            match &incompat.cause {
                Cause::Root => {
                    if let Some(term) = incompat.terms.iter().find(|t| !t.positive) {
                        lines.push(format!(
                            "your project requires {} {}",
                            self.interner.resolve(term.package),
                            term.range
                        ));
                    }
                }
                Cause::Dependency { package, version } => {
                    if let Some(term) = incompat.terms.iter().find(|t| !t.positive) {
                        lines.push(format!(
                            "{} {} depends on {} {}",
                            self.interner.resolve(*package),
                            version,
                            self.interner.resolve(term.package),
                            term.range
                        ));
                    }
                }
                Cause::Conflict { left, right } => {
                    stack.push(*right);
                    stack.push(*left);
                }
                Cause::Unavailable { culprits } => {
                    if let Some(term) = incompat.terms.first() {
                        lines.push(format!(
                            "no version of {} satisfies {}",
                            self.interner.resolve(term.package),
                            term.range
                        ));
                    }
                    for culprit in culprits.iter().rev() {
                        stack.push(*culprit);
                    }
                }
            }
        }

        lines.join("\nand ")
    }

    fn extract_solution(&mut self) -> Result<Vec<ResolvedGem>, ResolverError> {
        let mut solution = Vec::new();

        for assignment in self.partial.assignments() {
            if !assignment.decision || assignment.package == self.root {
                continue;
            }
            let Some(version) = assignment.version.clone() else {
                continue;
            };
            let name = self.interner.resolve(assignment.package).to_string();
            solution.push((name, version));
        }

        let mut gems = Vec::with_capacity(solution.len());
        for (name, version) in solution {
            let dependencies = self.provider.dependencies(&name, &version)?;
            gems.push(ResolvedGem {
                name,
                version,
                dependencies,
            });
        }

        gems.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(gems)
    }
}

/// An in-memory dependency universe.
///
/// Backs the solver's tests and `--local` resolution, where everything is
/// already known. Versions are kept newest first, mirroring the index.
#[derive(Debug, Default)]
pub struct StaticProvider {
    packages: HashMap<String, Vec<(Version, Vec<(String, ConstraintSet)>)>>,
}

impl StaticProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one version of a package with its dependency vector.
    ///
    /// Dependencies are `(name, comma-joined constraints)` pairs; invalid
    /// pieces are skipped like the index provider skips them.
    pub fn add(&mut self, name: &str, version: &str, deps: &[(&str, &str)]) {
        let Ok(version) = Version::parse(version) else {
            return;
        };
        let deps: Vec<(String, ConstraintSet)> = deps
            .iter()
            .filter_map(|(dep_name, constraints)| {
                ConstraintSet::parse(constraints)
                    .ok()
                    .map(|set| ((*dep_name).to_string(), set))
            })
            .collect();

        let releases = self.packages.entry(name.to_string()).or_default();
        releases.push((version, deps));
        releases.sort_by(|a, b| b.0.cmp(&a.0));
    }
}

impl DependencyProvider for StaticProvider {
    fn versions(&mut self, package: &str) -> Result<Vec<Version>, ProviderError> {
        Ok(self
            .packages
            .get(package)
            .map(|releases| releases.iter().map(|(v, _)| v.clone()).collect())
            .unwrap_or_default())
    }

    fn dependencies(
        &mut self,
        package: &str,
        version: &Version,
    ) -> Result<Vec<(String, ConstraintSet)>, ProviderError> {
        Ok(self
            .packages
            .get(package)
            .and_then(|releases| releases.iter().find(|(v, _)| v == version))
            .map(|(_, deps)| deps.clone())
            .unwrap_or_default())
    }
}
