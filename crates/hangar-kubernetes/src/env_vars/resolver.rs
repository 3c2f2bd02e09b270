// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ordering of environment variables that reference each other.
//!
//! Container runtimes expand `$(NAME)` in a variable's value only if `NAME`
//! was defined earlier in the container's env list. `$$` renders a literal
//! `$`, so `$$(NAME)` is never a reference. [`sort`] orders a set of
//! variables so that every variable comes after the variables it references.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use hangar_core::{InfraError, Result};

use crate::model::EnvVar;

fn is_identifier_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Names referenced by `value`.
pub fn references_in(value: &str) -> BTreeSet<String> {
    let bytes = value.as_bytes();
    let mut references = BTreeSet::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        match bytes.get(i + 1) {
            Some(b'$') => i += 2,
            Some(b'(') => {
                let start = i + 2;
                let mut end = start;
                while end < bytes.len() && is_identifier_byte(bytes[end]) {
                    end += 1;
                }
                if end > start && bytes.get(end) == Some(&b')') {
                    references.insert(value[start..end].to_string());
                    i = end + 1;
                } else {
                    i = start;
                }
            }
            _ => i += 1,
        }
    }

    references
}

/// Names referenced by the value of `var`. Variables sourced from secrets or
/// config maps reference nothing.
pub fn find_references(var: &EnvVar) -> BTreeSet<String> {
    var.value.as_deref().map(references_in).unwrap_or_default()
}

/// Order `vars` so that every variable comes after the variables it references.
///
/// References to names not in `vars` are ignored. Variables are emitted in
/// rounds: each round holds every variable whose references were all emitted
/// in earlier rounds, ordered by name. Any cycle, including a variable
/// referencing itself, fails the whole call with
/// [`InfraError::CyclicReferences`].
pub fn sort(vars: BTreeMap<String, EnvVar>) -> Result<Vec<EnvVar>> {
    // name -> declared names it references
    let dependencies: BTreeMap<&str, BTreeSet<String>> = vars
        .iter()
        .map(|(name, var)| {
            let mut references = find_references(var);
            references.retain(|r| vars.contains_key(r));
            (name.as_str(), references)
        })
        .collect();

    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
    for (name, references) in &dependencies {
        pending.insert(*name, references.len());
        for reference in references {
            dependents.entry(reference.as_str()).or_default().push(*name);
        }
    }

    let mut order: Vec<&str> = Vec::with_capacity(vars.len());
    let mut ready: BTreeSet<&str> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| *name)
        .collect();

    while !ready.is_empty() {
        let mut next = BTreeSet::new();
        for name in ready {
            order.push(name);
            for dependent in dependents.get(name).into_iter().flatten() {
                if let Some(count) = pending.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        next.insert(*dependent);
                    }
                }
            }
        }
        ready = next;
    }

    if order.len() < vars.len() {
        let emitted: HashSet<&str> = order.iter().copied().collect();
        let unresolved: Vec<&str> = dependencies
            .keys()
            .copied()
            .filter(|name| !emitted.contains(name))
            .collect();
        return Err(InfraError::CyclicReferences {
            cycle: find_cycle(&dependencies, &unresolved),
        });
    }

    let order: Vec<String> = order.into_iter().map(str::to_string).collect();
    let mut vars = vars;
    Ok(order
        .iter()
        .filter_map(|name| vars.remove(name))
        .collect())
}

/// Cycle path among `unresolved`, first name repeated at the end.
///
/// Every unresolved variable references another unresolved one, so a
/// depth-first walk from any of them runs into a cycle.
fn find_cycle(dependencies: &BTreeMap<&str, BTreeSet<String>>, unresolved: &[&str]) -> Vec<String> {
    let mut visited = HashSet::new();
    let mut path = Vec::new();

    for start in unresolved.iter().copied() {
        if let Err(cycle) = dfs(start, dependencies, &mut visited, &mut path) {
            return cycle;
        }
    }

    unresolved.iter().map(|name| name.to_string()).collect()
}

fn dfs<'a>(
    node: &'a str,
    dependencies: &'a BTreeMap<&str, BTreeSet<String>>,
    visited: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> std::result::Result<(), Vec<String>> {
    if let Some(position) = path.iter().position(|n| *n == node) {
        let mut cycle: Vec<String> = path[position..].iter().map(|n| n.to_string()).collect();
        cycle.push(node.to_string());
        return Err(cycle);
    }

    if visited.contains(node) {
        return Ok(());
    }

    path.push(node);
    if let Some(references) = dependencies.get(node) {
        for reference in references {
            dfs(reference, dependencies, visited, path)?;
        }
    }
    path.pop();
    visited.insert(node);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hangar_core::ErrorKind;

    fn vars(entries: &[(&str, &str)]) -> BTreeMap<String, EnvVar> {
        entries
            .iter()
            .map(|(name, value)| (name.to_string(), EnvVar::new(*name, *value)))
            .collect()
    }

    fn names(sorted: &[EnvVar]) -> Vec<&str> {
        sorted.iter().map(|var| var.name.as_str()).collect()
    }

    fn refs(value: &str) -> Vec<String> {
        references_in(value).into_iter().collect()
    }

    #[test]
    fn test_find_references() {
        assert!(refs("value").is_empty());
        assert!(refs("$(NO_REF").is_empty());
        assert!(refs("$$(NO_REF)").is_empty());
        assert_eq!(refs("$(REF)"), vec!["REF"]);
        assert_eq!(refs("$(b) $(c) $$(d)"), vec!["b", "c"]);
    }

    #[test]
    fn test_find_references_malformed_tokens() {
        assert!(refs("$(WITH SPACE)").is_empty());
        assert!(refs("$()").is_empty());
        assert!(refs("$(a-b)").is_empty());
        assert!(refs("$ (A)").is_empty());
        assert!(refs("$").is_empty());
        // Escaped dollar followed by a real reference.
        assert_eq!(refs("$$$(A)"), vec!["A"]);
        // An unclosed token does not swallow a later reference.
        assert_eq!(refs("$(A $(B)"), vec!["B"]);
        assert_eq!(refs("$(A)$(A)/$(B)"), vec!["A", "B"]);
    }

    #[test]
    fn test_find_references_ignores_sourced_vars() {
        let var = EnvVar::from_source(
            "TOKEN",
            crate::model::EnvVarSource::SecretKeyRef {
                name: "$(A)".into(),
                key: "token".into(),
            },
        );
        assert!(find_references(&var).is_empty());
    }

    #[test]
    fn test_sort_dependency_first_then_by_name() {
        let sorted = sort(vars(&[("b", "b"), ("c", "c"), ("a", "$(b)")])).unwrap();
        assert_eq!(names(&sorted), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_sort_chain_and_diamond() {
        let sorted = sort(vars(&[
            ("URL", "$(SCHEME)://$(HOST):$(PORT)"),
            ("HOST", "$(POD)"),
            ("POD", "ws"),
            ("SCHEME", "http"),
            ("PORT", "8080"),
        ]))
        .unwrap();
        assert_eq!(names(&sorted), vec!["POD", "PORT", "SCHEME", "HOST", "URL"]);
    }

    #[test]
    fn test_sort_ignores_undeclared_and_escaped_references() {
        let sorted = sort(vars(&[
            ("A", "$(HOSTNAME)"),
            ("B", "$$(A)"),
            ("C", "$(B)"),
        ]))
        .unwrap();
        assert_eq!(names(&sorted), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_sort_self_reference_fails() {
        let err = sort(vars(&[("a", "$(a)")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cycle);
        assert!(matches!(
            err,
            InfraError::CyclicReferences { ref cycle } if cycle == &["a", "a"]
        ));
    }

    #[test]
    fn test_sort_two_node_cycle_fails() {
        let err = sort(vars(&[("a", "$(b)"), ("b", "$(a)")])).unwrap_err();
        match err {
            InfraError::CyclicReferences { cycle } => assert_eq!(cycle, vec!["a", "b", "a"]),
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_sort_indirect_cycle_reports_only_cycle_members() {
        let err = sort(vars(&[
            ("a", "$(b)"),
            ("b", "$(c)"),
            ("c", "$(a)"),
            ("d", "$(a)"),
            ("e", "plain"),
        ]))
        .unwrap_err();
        match err {
            InfraError::CyclicReferences { cycle } => {
                assert_eq!(cycle, vec!["a", "b", "c", "a"]);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_sort_empty() {
        assert!(sort(BTreeMap::new()).unwrap().is_empty());
    }
}
