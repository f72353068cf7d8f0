//! Core types for the Synod protocol

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Unique identifier for a Synod node
pub type NodeId = String;

/// Index of a slot in the replicated decision log
pub type Instance = u64;

/// Ballot (round) number. Higher ballots take precedence at every acceptor.
pub type Ballot = i64;

/// Accepted ballot of a round that has not accepted anything yet
pub const NO_BALLOT: Ballot = -1;

/// Ballot reserved for the contention-free fast path (`suggest`/`skip`)
pub const FAST_BALLOT: Ballot = 0;

/// Operation carried by a client command
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Get,
    Put,
    Delete,
    /// Fills a log slot with no observable effect
    #[default]
    NoOp,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Get => write!(f, "get"),
            Action::Put => write!(f, "put"),
            Action::Delete => write!(f, "delete"),
            Action::NoOp => write!(f, "noop"),
        }
    }
}

/// At-most-once tagged client command: the unit of agreement.
///
/// `seq_num` is the client's monotonic sequence number. Duplicate suppression
/// is left to the apply layer ([`crate::store::KvStore`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AmoCommand {
    seq_num: i64,
    key: String,
    value: String,
    action: Action,
}

impl AmoCommand {
    pub fn new(seq_num: i64, key: impl Into<String>, value: impl Into<String>, action: Action) -> Self {
        Self {
            seq_num,
            key: key.into(),
            value: value.into(),
            action,
        }
    }

    /// The NoOp sentinel `{0, "", "", NoOp}`
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn put(seq_num: i64, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(seq_num, key, value, Action::Put)
    }

    pub fn get(seq_num: i64, key: impl Into<String>) -> Self {
        Self::new(seq_num, key, "", Action::Get)
    }

    pub fn delete(seq_num: i64, key: impl Into<String>) -> Self {
        Self::new(seq_num, key, "", Action::Delete)
    }

    pub fn seq_num(&self) -> i64 {
        self.seq_num
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn is_noop(&self) -> bool {
        self.action == Action::NoOp
    }
}

impl PartialOrd for AmoCommand {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordered by `seq_num` first; the remaining fields only break ties so the
/// order stays consistent with `Eq`.
impl Ord for AmoCommand {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seq_num
            .cmp(&other.seq_num)
            .then_with(|| self.key.cmp(&other.key))
            .then_with(|| self.value.cmp(&other.value))
            .then_with(|| self.action.cmp(&other.action))
    }
}

impl std::fmt::Display for AmoCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.action {
            Action::NoOp => write!(f, "#{} noop", self.seq_num),
            Action::Put => write!(f, "#{} put {}={}", self.seq_num, self.key, self.value),
            Action::Get | Action::Delete => write!(f, "#{} {} {}", self.seq_num, self.action, self.key),
        }
    }
}
