//! Safety-property checkers.
//!
//! Properties are invariants that must hold at every observable point of
//! a scenario, not just at its end.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use quill_core::EditId;

/// A violation of a consensus safety property.
#[derive(Debug, Clone)]
pub enum PropertyViolation {
    /// Two nodes led in the same term.
    MultipleLeadersInTerm {
        /// The term with multiple leaders.
        term: u64,
        /// The offending leaders.
        leaders: Vec<String>,
    },
    /// Entries at the same index carry different content despite a
    /// matching suffix entry.
    LogMismatch {
        /// The index of the mismatch.
        index: u64,
        /// First node.
        node_a: String,
        /// Second node.
        node_b: String,
    },
    /// A node's term decreased.
    TermRegression {
        /// The node whose term went backward.
        node: String,
        /// Term before.
        before: u64,
        /// Term after.
        after: u64,
    },
}

impl std::fmt::Display for PropertyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MultipleLeadersInTerm { term, leaders } => {
                write!(f, "multiple leaders in term {term}: {leaders:?}")
            }
            Self::LogMismatch {
                index,
                node_a,
                node_b,
            } => write!(f, "log mismatch at index {index}: {node_a} vs {node_b}"),
            Self::TermRegression {
                node,
                before,
                after,
            } => write!(f, "term of {node} regressed from {before} to {after}"),
        }
    }
}

/// Accumulates observations across a scenario.
#[derive(Debug, Default)]
pub struct PropertyChecker {
    leaders_by_term: BTreeMap<u64, BTreeSet<String>>,
    last_term: BTreeMap<String, u64>,
    violations: Vec<PropertyViolation>,
}

impl PropertyChecker {
    /// Creates an empty checker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one node's role and term at an observation point.
    pub fn record(&mut self, node: &str, is_leader: bool, term: u64) {
        if let Some(&before) = self.last_term.get(node) {
            if term < before {
                self.violations.push(PropertyViolation::TermRegression {
                    node: node.to_string(),
                    before,
                    after: term,
                });
            }
        }
        self.last_term.insert(node.to_string(), term);

        if is_leader {
            let leaders = self.leaders_by_term.entry(term).or_default();
            leaders.insert(node.to_string());
            if leaders.len() > 1 {
                self.violations.push(PropertyViolation::MultipleLeadersInTerm {
                    term,
                    leaders: leaders.iter().cloned().collect(),
                });
            }
        }
    }

    /// All violations observed so far.
    #[must_use]
    pub fn violations(&self) -> &[PropertyViolation] {
        &self.violations
    }

    /// Panics if any violation was observed.
    ///
    /// # Panics
    /// On the first recorded violation.
    pub fn assert_holds(&self) {
        if let Some(violation) = self.violations.first() {
            panic!("safety violation: {violation}");
        }
    }
}

/// Checks the log-matching property over full logs.
///
/// If two logs contain an entry with the same index and term, every
/// preceding entry in both logs must be identical.
///
/// # Errors
/// Returns the first violation found.
pub fn check_log_matching(
    logs: &[(String, Vec<(EditId, Bytes)>)],
) -> Result<(), PropertyViolation> {
    for (i, (name_a, log_a)) in logs.iter().enumerate() {
        for (name_b, log_b) in &logs[i + 1..] {
            let index_a: BTreeMap<u64, &(EditId, Bytes)> =
                log_a.iter().map(|e| (e.0.index, e)).collect();
            let index_b: BTreeMap<u64, &(EditId, Bytes)> =
                log_b.iter().map(|e| (e.0.index, e)).collect();

            // Highest index where both logs agree on the term.
            let anchor = index_a
                .iter()
                .rev()
                .find(|(index, entry)| {
                    index_b
                        .get(*index)
                        .is_some_and(|other| other.0.term == entry.0.term)
                })
                .map(|(index, _)| *index);

            let Some(anchor) = anchor else { continue };
            for index in 1..=anchor {
                let a = index_a.get(&index);
                let b = index_b.get(&index);
                if a.is_none() || b.is_none() || a != b {
                    return Err(PropertyViolation::LogMismatch {
                        index,
                        node_a: name_a.clone(),
                        node_b: name_b.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::Term;

    fn entry(term: u64, index: u64, data: &str) -> (EditId, Bytes) {
        (EditId::new(Term::new(term), index), Bytes::from(data.to_string()))
    }

    #[test]
    fn test_single_leader_violation_detected() {
        let mut checker = PropertyChecker::new();
        checker.record("a", true, 3);
        checker.record("b", true, 3);

        assert_eq!(checker.violations().len(), 1);
    }

    #[test]
    fn test_term_regression_detected() {
        let mut checker = PropertyChecker::new();
        checker.record("a", false, 5);
        checker.record("a", false, 4);

        assert!(matches!(
            checker.violations()[0],
            PropertyViolation::TermRegression { .. }
        ));
    }

    #[test]
    fn test_log_matching_holds_for_identical_prefix() {
        let logs = vec![
            (
                "a".to_string(),
                vec![entry(1, 1, "x"), entry(1, 2, "y"), entry(2, 3, "z")],
            ),
            ("b".to_string(), vec![entry(1, 1, "x"), entry(1, 2, "y")]),
        ];
        assert!(check_log_matching(&logs).is_ok());
    }

    #[test]
    fn test_log_matching_catches_divergent_prefix() {
        let logs = vec![
            (
                "a".to_string(),
                vec![entry(1, 1, "x"), entry(2, 2, "y"), entry(3, 3, "z")],
            ),
            (
                "b".to_string(),
                vec![entry(1, 1, "x"), entry(1, 2, "other"), entry(3, 3, "z")],
            ),
        ];
        assert!(check_log_matching(&logs).is_err());
    }

    #[test]
    fn test_log_matching_ignores_unanchored_divergence() {
        // No common (index, term) anchor: nothing to compare.
        let logs = vec![
            ("a".to_string(), vec![entry(1, 1, "x")]),
            ("b".to_string(), vec![entry(2, 1, "y")]),
        ];
        assert!(check_log_matching(&logs).is_ok());
    }
}
