//! Agreement checker
//!
//! Inspects a finished [`Cluster`] and reports every way it broke the
//! replicated log's guarantees: two nodes deciding differently, a decision
//! nobody proposed, a node learning the same instance twice, or two stores
//! applying different prefixes.

use crate::cluster::Cluster;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use synod_core::Instance;
use thiserror::Error;

/// A broken guarantee
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyViolation {
    #[error("instance {instance} decided differently: {values:?}")]
    Disagreement {
        instance: Instance,
        values: Vec<String>,
    },

    #[error("instance {instance} decided {value}, which was never submitted")]
    Unsubmitted { instance: Instance, value: String },

    #[error("{node} learned instance {instance} {count} times")]
    RepeatedLearn {
        node: String,
        instance: Instance,
        count: usize,
    },

    #[error("{node} applied instance {instance} as {found}, {reference} applied {expected}")]
    StoreDivergence {
        node: String,
        reference: String,
        instance: Instance,
        found: String,
        expected: String,
    },
}

/// Checker verdict
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    /// Instances decided on at least one node
    pub decided: usize,
    /// Instances up to the log tip not yet decided on every node
    pub undecided: Vec<Instance>,
    pub violations: Vec<SafetyViolation>,
}

impl CheckReport {
    /// No guarantee was broken
    pub fn is_safe(&self) -> bool {
        self.violations.is_empty()
    }

    /// Safe, and every node holds the full log
    pub fn is_complete(&self) -> bool {
        self.is_safe() && self.undecided.is_empty()
    }
}

/// Check agreement, validity, single learning and store prefixes
pub fn check(cluster: &Cluster) -> CheckReport {
    let mut report = CheckReport {
        undecided: cluster.undecided().into_iter().collect(),
        ..Default::default()
    };

    // Agreement and validity
    if let Some(highest) = cluster.highest_instance() {
        for instance in 0..=highest {
            let values: BTreeSet<_> = cluster
                .nodes
                .iter()
                .filter_map(|n| n.replica.learned(instance))
                .collect();
            if values.is_empty() {
                continue;
            }
            report.decided += 1;

            if values.len() > 1 {
                report.violations.push(SafetyViolation::Disagreement {
                    instance,
                    values: values.iter().map(|v| v.to_string()).collect(),
                });
            }
            for value in values {
                if !value.is_noop() && !cluster.submitted.contains_key(value) {
                    report.violations.push(SafetyViolation::Unsubmitted {
                        instance,
                        value: value.to_string(),
                    });
                }
            }
        }
    }

    // on_learned fires once per node and instance
    for node in &cluster.nodes {
        let mut counts: BTreeMap<Instance, usize> = BTreeMap::new();
        for (instance, _) in &node.learn_log {
            *counts.entry(*instance).or_insert(0) += 1;
        }
        for (instance, count) in counts {
            if count > 1 {
                report.violations.push(SafetyViolation::RepeatedLearn {
                    node: node.id.clone(),
                    instance,
                    count,
                });
            }
        }
    }

    // Applied sequences agree on their common prefix
    if let Some(reference) = cluster.nodes.iter().max_by_key(|n| n.applied.len()) {
        for node in &cluster.nodes {
            let diverged = node
                .applied
                .iter()
                .zip(&reference.applied)
                .find(|(a, b)| a.command != b.command || a.reply != b.reply);

            if let Some((found, expected)) = diverged {
                report.violations.push(SafetyViolation::StoreDivergence {
                    node: node.id.clone(),
                    reference: reference.id.clone(),
                    instance: found.instance,
                    found: format!("{} -> {:?}", found.command, found.reply),
                    expected: format!("{} -> {:?}", expected.command, expected.reply),
                });
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault_injection::{FaultConfig, FaultInjector};
    use synod_core::{AmoCommand, Envelope, Learn};

    #[test]
    fn test_clean_run_is_complete() {
        let mut cluster = Cluster::new(3, 0);
        let mut injector = FaultInjector::new(FaultConfig::none(), 0);
        for node in 0..3 {
            cluster
                .submit(node, AmoCommand::put(node as i64 + 1, "k", "v"))
                .unwrap();
        }
        cluster.run_until_quiet(&mut injector, 10_000);

        let report = check(&cluster);
        assert_eq!(report.decided, 3);
        assert!(report.is_complete(), "{:?}", report);
    }

    #[test]
    fn test_detects_disagreement() {
        let mut cluster = Cluster::new(3, 0);
        let mut injector = FaultInjector::new(FaultConfig::none(), 0);
        cluster.submit(0, AmoCommand::put(1, "k", "v")).unwrap();
        cluster.run_until_quiet(&mut injector, 10_000);

        // Forge a conflicting decision straight into one node's round
        let forged = AmoCommand::put(2, "k", "forged");
        let node = &mut cluster.nodes[2];
        let mut outbox = synod_core::Outbox::new(node.id.clone(), node.replica.membership().clone());
        let mut fresh = synod_core::Replica::new(node.id.clone(), node.replica.membership().clone());
        fresh.dispatch(&mut outbox, &Envelope::new("node_00", Learn { instance: 0, value: forged }));
        node.replica = fresh;

        let report = check(&cluster);
        assert!(!report.is_safe());
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, SafetyViolation::Disagreement { instance: 0, .. })));
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, SafetyViolation::Unsubmitted { instance: 0, .. })));
    }

    #[test]
    fn test_open_instances_are_reported() {
        let mut cluster = Cluster::new(3, 0);
        let mut injector = FaultInjector::new(FaultConfig::none(), 0);
        cluster.submit(1, AmoCommand::put(1, "k", "v")).unwrap();
        cluster.run_until_quiet(&mut injector, 10_000);

        let report = check(&cluster);
        assert!(report.is_safe());
        assert!(!report.is_complete());
        assert_eq!(report.undecided, vec![0]);
    }
}
