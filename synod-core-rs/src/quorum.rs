//! Quorum arithmetic and ballot ownership

use crate::types::{Ballot, Instance, NodeId};

/// Strict majority of `num_servers`: `ceil((n + 1) / 2)`.
///
/// Used identically for the promise and the accept phase.
pub fn quorum_size(num_servers: usize) -> usize {
    num_servers / 2 + 1
}

/// Agreed, ordered set of cluster members.
///
/// Every node builds the same `Membership` from the same member list, so
/// ballot ownership and instance coordination are computed without any
/// coordination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    members: Vec<NodeId>,
}

impl Membership {
    /// Members are sorted and deduplicated so that input order never matters
    pub fn new<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        let mut members: Vec<NodeId> = members.into_iter().map(Into::into).collect();
        members.sort();
        members.dedup();
        Self { members }
    }

    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.members.iter().any(|m| m == node_id)
    }

    /// Position of `node_id` in the agreed ordering
    pub fn index_of(&self, node_id: &str) -> Option<usize> {
        self.members.iter().position(|m| m == node_id)
    }

    pub fn quorum_size(&self) -> usize {
        quorum_size(self.members.len())
    }

    /// Owner of `ballot`: `members[ballot mod n]`.
    ///
    /// Returns `None` only for an empty membership.
    pub fn owner(&self, ballot: Ballot) -> Option<&NodeId> {
        if self.members.is_empty() {
            return None;
        }
        let idx = ballot.rem_euclid(self.members.len() as i64) as usize;
        self.members.get(idx)
    }

    /// Node that drives `instance` through the ballot-0 fast path
    pub fn coordinator(&self, instance: Instance) -> Option<&NodeId> {
        if self.members.is_empty() {
            return None;
        }
        let idx = (instance % self.members.len() as u64) as usize;
        self.members.get(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quorum_size() {
        assert_eq!(quorum_size(1), 1);
        assert_eq!(quorum_size(2), 2);
        assert_eq!(quorum_size(3), 2);
        assert_eq!(quorum_size(4), 3);
        assert_eq!(quorum_size(5), 3);
        assert_eq!(quorum_size(7), 4);
    }

    #[test]
    fn test_membership_is_order_independent() {
        let a = Membership::new(["c", "a", "b"]);
        let b = Membership::new(["b", "c", "a", "a"]);
        assert_eq!(a, b);
        assert_eq!(a.members(), &["a", "b", "c"]);
        assert_eq!(a.len(), 3);
        assert_eq!(a.quorum_size(), 2);
    }

    #[test]
    fn test_owner_partitions_ballots() {
        let m = Membership::new(["a", "b", "c"]);
        let owned_by_b: Vec<Ballot> = (0..10).filter(|&bal| m.owner(bal).map(String::as_str) == Some("b")).collect();
        assert_eq!(owned_by_b, vec![1, 4, 7]);
        assert_eq!(m.owner(-1).map(String::as_str), Some("c"));
    }

    #[test]
    fn test_coordinator_round_robin() {
        let m = Membership::new(["a", "b", "c"]);
        assert_eq!(m.coordinator(0).map(String::as_str), Some("a"));
        assert_eq!(m.coordinator(4).map(String::as_str), Some("b"));
        assert_eq!(m.coordinator(8).map(String::as_str), Some("c"));
    }

    #[test]
    fn test_empty_membership() {
        let m = Membership::new(Vec::<String>::new());
        assert!(m.is_empty());
        assert!(m.owner(3).is_none());
        assert!(m.coordinator(3).is_none());
    }
}
