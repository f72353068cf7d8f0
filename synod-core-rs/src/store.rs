//! Key-value apply layer fed by learned log entries.
//!
//! Learned values arrive in any instance order; the store buffers them and
//! applies the contiguous prefix in order, so every node that learned the
//! same prefix holds the same data. A command identical to one already
//! applied (a client retry that landed in a second slot) is not applied
//! again.

use crate::types::{Action, AmoCommand, Instance};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Result of applying one command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    /// Put or Delete took effect
    Ok,
    /// Get result
    Value(Option<String>),
    /// NoOp slot
    Skipped,
    /// Retried command that was already applied in an earlier slot
    Duplicate,
}

/// A log entry that was applied to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub instance: Instance,
    pub command: AmoCommand,
    pub reply: Reply,
}

#[derive(Debug, Clone, Default)]
pub struct KvStore {
    data: BTreeMap<String, String>,
    /// Learned entries waiting for a gap below them to fill
    pending: BTreeMap<Instance, AmoCommand>,
    /// Next instance to apply
    next: Instance,
    /// Commands already applied, for at-most-once execution
    executed: BTreeSet<AmoCommand>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a learned value and apply whatever prefix became contiguous
    pub fn learn(&mut self, instance: Instance, command: AmoCommand) -> Vec<Applied> {
        if instance >= self.next {
            self.pending.entry(instance).or_insert(command);
        }

        let mut applied = Vec::new();
        while let Some(command) = self.pending.remove(&self.next) {
            let reply = self.apply(&command);
            debug!("Store: applied instance {} {} -> {:?}", self.next, command, reply);
            applied.push(Applied {
                instance: self.next,
                command,
                reply,
            });
            self.next += 1;
        }
        applied
    }

    fn apply(&mut self, command: &AmoCommand) -> Reply {
        if command.is_noop() {
            return Reply::Skipped;
        }
        if !self.executed.insert(command.clone()) {
            return Reply::Duplicate;
        }

        match command.action() {
            Action::Put => {
                self.data
                    .insert(command.key().to_string(), command.value().to_string());
                Reply::Ok
            }
            Action::Delete => {
                self.data.remove(command.key());
                Reply::Ok
            }
            Action::Get => Reply::Value(self.data.get(command.key()).cloned()),
            Action::NoOp => Reply::Skipped,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn data(&self) -> &BTreeMap<String, String> {
        &self.data
    }

    /// Number of log entries applied so far
    pub fn applied_len(&self) -> Instance {
        self.next
    }

    /// Learned entries still waiting on a gap
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applies_in_instance_order() {
        let mut store = KvStore::new();
        assert!(store.learn(1, AmoCommand::put(2, "k", "second")).is_empty());
        assert_eq!(store.pending_len(), 1);

        let applied = store.learn(0, AmoCommand::put(1, "k", "first"));
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].instance, 0);
        assert_eq!(applied[1].instance, 1);
        assert_eq!(store.get("k"), Some("second"));
        assert_eq!(store.applied_len(), 2);
    }

    #[test]
    fn test_get_delete_and_noop() {
        let mut store = KvStore::new();
        store.learn(0, AmoCommand::put(1, "k", "v"));
        let applied = store.learn(1, AmoCommand::get(2, "k"));
        assert_eq!(applied[0].reply, Reply::Value(Some("v".to_string())));

        assert_eq!(store.learn(2, AmoCommand::noop())[0].reply, Reply::Skipped);
        assert_eq!(store.learn(3, AmoCommand::noop())[0].reply, Reply::Skipped);

        assert_eq!(store.learn(4, AmoCommand::delete(3, "k"))[0].reply, Reply::Ok);
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn test_retried_command_applies_once() {
        let mut store = KvStore::new();
        store.learn(0, AmoCommand::put(1, "k", "v1"));
        store.learn(1, AmoCommand::put(2, "k", "v2"));
        let applied = store.learn(2, AmoCommand::put(1, "k", "v1"));

        assert_eq!(applied[0].reply, Reply::Duplicate);
        assert_eq!(store.get("k"), Some("v2"));
    }

    #[test]
    fn test_relearning_is_ignored() {
        let mut store = KvStore::new();
        store.learn(0, AmoCommand::put(1, "k", "v"));
        assert!(store.learn(0, AmoCommand::put(9, "k", "other")).is_empty());
        assert_eq!(store.get("k"), Some("v"));
        assert_eq!(store.pending_len(), 0);
    }
}
