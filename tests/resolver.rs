//! End-to-end resolver scenarios against an in-memory universe.

use seam::resolver::{ResolvedGem, Resolver, ResolverError, StaticProvider};
use seam::version::ConstraintSet;

fn resolve(
    provider: StaticProvider,
    roots: &[(&str, &str)],
) -> Result<Vec<ResolvedGem>, ResolverError> {
    let roots: Vec<(String, ConstraintSet)> = roots
        .iter()
        .map(|(name, constraints)| {
            (
                (*name).to_string(),
                ConstraintSet::parse(constraints).expect("test constraint should parse"),
            )
        })
        .collect();
    Resolver::new(provider).resolve(&roots)
}

fn pairs(solution: &[ResolvedGem]) -> Vec<(String, String)> {
    solution
        .iter()
        .map(|gem| (gem.name.clone(), gem.version.to_string()))
        .collect()
}

#[test]
fn happy_path_chain() {
    // A -> B >= 1.0, B -> C ~> 2.0
    let mut provider = StaticProvider::new();
    provider.add("a", "1.0.0", &[("b", ">= 1.0")]);
    provider.add("b", "1.1.0", &[("c", "~> 2.0")]);
    provider.add("c", "2.3.0", &[]);

    let solution = resolve(provider, &[("a", ">= 0")]).unwrap();
    assert_eq!(
        pairs(&solution),
        vec![
            ("a".to_string(), "1.0.0".to_string()),
            ("b".to_string(), "1.1.0".to_string()),
            ("c".to_string(), "2.3.0".to_string()),
        ]
    );
}

#[test]
fn unsolvable_conflict_names_the_chain() {
    let mut provider = StaticProvider::new();
    provider.add("x", "1.0.0", &[("y", ">= 2.0"), ("z", ">= 1.0")]);
    provider.add("y", "2.0.0", &[]);
    provider.add("y", "1.0.0", &[]);
    provider.add("z", "1.0.0", &[("y", "< 2.0")]);

    let error = resolve(provider, &[("x", ">= 0")]).unwrap_err();
    let ResolverError::NoSolution { explanation } = error else {
        panic!("expected NoSolution, got {error:?}");
    };

    for needle in ["x", "y", "z", ">= 2.0", "< 2.0"] {
        assert!(
            explanation.contains(needle),
            "explanation missing {needle:?}:\n{explanation}"
        );
    }
}

#[test]
fn backtracking_abandons_newest() {
    // Q 2.0.0 needs an R that does not exist; the solver must fall back to
    // Q 1.0.0
    let mut provider = StaticProvider::new();
    provider.add("p", "1.0.0", &[("q", ">= 1.0")]);
    provider.add("q", "2.0.0", &[("r", ">= 2.0")]);
    provider.add("q", "1.0.0", &[("r", ">= 1.0")]);
    provider.add("r", "1.5.0", &[]);

    let solution = resolve(provider, &[("p", ">= 0")]).unwrap();
    assert_eq!(
        pairs(&solution),
        vec![
            ("p".to_string(), "1.0.0".to_string()),
            ("q".to_string(), "1.0.0".to_string()),
            ("r".to_string(), "1.5.0".to_string()),
        ]
    );
}

#[test]
fn multiple_roots_resolve_together() {
    let mut provider = StaticProvider::new();
    provider.add("web", "3.0.0", &[]);
    provider.add("web", "2.0.0", &[]);
    provider.add("db", "1.2.0", &[]);

    let solution = resolve(provider, &[("web", "~> 2.0"), ("db", ">= 1.0")]).unwrap();
    assert_eq!(
        pairs(&solution),
        vec![
            ("db".to_string(), "1.2.0".to_string()),
            ("web".to_string(), "2.0.0".to_string()),
        ]
    );
}

#[test]
fn pessimistic_constraint_bounds() {
    let mut provider = StaticProvider::new();
    provider.add("gemx", "4.2.0", &[]);
    provider.add("gemx", "4.1.9", &[]);
    provider.add("gemx", "4.1.1", &[]);
    provider.add("gemx", "4.1.0", &[]);

    let solution = resolve(provider, &[("gemx", "~> 4.1.1")]).unwrap();
    assert_eq!(
        pairs(&solution),
        vec![("gemx".to_string(), "4.1.9".to_string())]
    );
}

#[test]
fn diamond_dependencies_intersect() {
    let mut provider = StaticProvider::new();
    provider.add("left", "1.0.0", &[("base", ">= 1.0, < 3.0")]);
    provider.add("right", "1.0.0", &[("base", ">= 2.0")]);
    provider.add("base", "3.1.0", &[]);
    provider.add("base", "2.2.0", &[]);
    provider.add("base", "1.0.0", &[]);

    let solution = resolve(provider, &[("left", ">= 0"), ("right", ">= 0")]).unwrap();
    assert!(pairs(&solution).contains(&("base".to_string(), "2.2.0".to_string())));
}

#[test]
fn repeated_runs_are_deterministic() {
    let build = || {
        let mut provider = StaticProvider::new();
        provider.add("a", "1.1.0", &[("b", ">= 1.0"), ("c", ">= 1.0")]);
        provider.add("a", "1.0.0", &[("b", ">= 1.0")]);
        provider.add("b", "1.2.0", &[("c", ">= 1.1")]);
        provider.add("b", "1.0.0", &[]);
        provider.add("c", "1.5.0", &[]);
        provider.add("c", "1.0.0", &[]);
        provider
    };

    let first = resolve(build(), &[("a", ">= 1.0")]).unwrap();
    for _ in 0..5 {
        assert_eq!(resolve(build(), &[("a", ">= 1.0")]).unwrap(), first);
    }
}

#[test]
fn solution_satisfies_every_constraint() {
    let mut provider = StaticProvider::new();
    provider.add("app", "1.0.0", &[("json", ">= 2.0"), ("rack", "~> 3.0")]);
    provider.add("json", "2.7.0", &[]);
    provider.add("json", "1.8.0", &[]);
    provider.add("rack", "3.0.8", &[("json", ">= 2.3")]);
    provider.add("rack", "2.2.0", &[]);

    let solution = resolve(provider, &[("app", ">= 0")]).unwrap();
    let lookup = |name: &str| {
        solution
            .iter()
            .find(|gem| gem.name == name)
            .unwrap_or_else(|| panic!("{name} missing from solution"))
    };

    // Every chosen version satisfies every constraint entailed by the
    // roots and the chosen dependencies
    for gem in &solution {
        for (dep_name, constraints) in &gem.dependencies {
            let chosen = lookup(dep_name);
            assert!(
                constraints.matches(&chosen.version),
                "{} {} does not satisfy {} from {}",
                dep_name,
                chosen.version,
                constraints,
                gem.name
            );
        }
    }
}
