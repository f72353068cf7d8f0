//! Node state driven by the event loop in `main`
//!
//! Wraps a [`Replica`], its [`Outbox`] and the [`KvStore`], turns operator
//! commands into proposals and revokes instances that stay undecided for
//! too long.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use synod_core::{
    Action, AmoCommand, Applied, Ballot, ClusterConfig, Envelope, Event, Instance, KvStore,
    Outbound, Outbox, Replica, DEFAULT_GAP_WINDOW,
};
use tracing::{debug, info};

/// Node timing configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// How long an instance may stay undecided before this node revokes it
    pub stall_timeout: Duration,
    /// Period of the stall/gap check
    pub tick_interval: Duration,
    /// Upper bound of the random delay added to each stall timeout, so that
    /// nodes do not revoke the same instance in lockstep
    pub jitter: Duration,
    /// Instances above the decided prefix covered by gap filling and stall
    /// checks
    pub max_gap: Instance,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            stall_timeout: Duration::from_millis(500),
            tick_interval: Duration::from_millis(100),
            jitter: Duration::from_millis(250),
            max_gap: DEFAULT_GAP_WINDOW,
        }
    }
}

impl NodeConfig {
    /// Tight timings for local experiments
    pub fn fast() -> Self {
        Self {
            stall_timeout: Duration::from_millis(100),
            tick_interval: Duration::from_millis(20),
            jitter: Duration::from_millis(50),
            ..Default::default()
        }
    }
}

/// Operator command read from stdin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Put { key: String, value: String },
    Get { key: String },
    Delete { key: String },
    Skip,
    Revoke(Instance),
    State,
    Quit,
}

impl Command {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Command>, String> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(&verb) = parts.first() else {
            return Ok(None);
        };

        let command = match (verb, &parts[1..]) {
            ("put", [key, value]) => Command::Put {
                key: key.to_string(),
                value: value.to_string(),
            },
            ("get", [key]) => Command::Get { key: key.to_string() },
            ("del" | "delete", [key]) => Command::Delete { key: key.to_string() },
            ("skip", []) => Command::Skip,
            ("revoke", [instance]) => Command::Revoke(
                instance
                    .parse()
                    .map_err(|_| format!("invalid instance: {}", instance))?,
            ),
            ("state", []) => Command::State,
            ("quit" | "exit", []) => Command::Quit,
            _ => return Err(format!("unknown command: {}", line.trim())),
        };
        Ok(Some(command))
    }
}

pub struct Node {
    replica: Replica,
    outbox: Outbox,
    store: KvStore,
    config: NodeConfig,
    /// Next client sequence number for commands issued here
    seq: i64,
    /// When each undecided instance was first seen (or last revoked)
    stalled_since: BTreeMap<Instance, Instant>,
    rng: StdRng,
}

impl Node {
    pub fn new(cluster: &ClusterConfig, config: NodeConfig) -> Self {
        Self::with_rng(cluster, config, StdRng::from_entropy())
    }

    pub fn with_rng(cluster: &ClusterConfig, config: NodeConfig, mut rng: StdRng) -> Self {
        let membership = cluster.membership();
        // Random base keeps commands from different nodes distinct
        let seq = rng.gen_range(1..i64::MAX / 2);
        Self {
            replica: Replica::new(cluster.node_id.clone(), membership.clone())
                .with_gap_window(config.max_gap),
            outbox: Outbox::new(cluster.node_id.clone(), membership),
            store: KvStore::new(),
            config,
            seq,
            stalled_since: BTreeMap::new(),
            rng,
        }
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub fn store(&self) -> &KvStore {
        &self.store
    }

    /// Handle one inbound envelope; returns what got applied as a result
    pub fn handle_envelope(&mut self, envelope: &Envelope) -> Vec<Applied> {
        self.replica.dispatch(&mut self.outbox, envelope);
        self.drain_events()
    }

    /// Propose a client command in this node's next free instance
    pub fn submit(&mut self, action: Action, key: &str, value: &str) -> synod_core::error::Result<Instance> {
        self.seq += 1;
        let command = AmoCommand::new(self.seq, key, value, action);
        let instance = self.replica.propose(&mut self.outbox, command)?;
        info!("{}: submitted #{} in instance {}", self.replica.node_id(), self.seq, instance);
        Ok(instance)
    }

    /// Give up this node's next free instance
    pub fn skip(&mut self) -> synod_core::error::Result<Instance> {
        self.replica.propose(&mut self.outbox, AmoCommand::noop())
    }

    pub fn revoke(&mut self, instance: Instance) -> Option<Ballot> {
        self.stalled_since.insert(instance, Instant::now());
        self.replica.revoke(&mut self.outbox, instance)
    }

    /// Periodic maintenance: skip own unused instances below the log tip and
    /// revoke instances that stayed undecided past the stall timeout.
    /// Returns the revoked instances.
    pub fn tick(&mut self, now: Instant) -> Vec<Instance> {
        let skipped = self.replica.fill_gaps(&mut self.outbox);
        if !skipped.is_empty() {
            debug!("{}: skipped {:?}", self.replica.node_id(), skipped);
        }

        let undecided = self.replica.undecided();
        self.stalled_since.retain(|i, _| undecided.contains(i));

        let mut revoked = Vec::new();
        for instance in undecided {
            let since = *self.stalled_since.entry(instance).or_insert(now);
            let jitter_ms = self.config.jitter.as_millis() as u64;
            let jitter = Duration::from_millis(self.rng.gen_range(0..=jitter_ms));

            if now.saturating_duration_since(since) >= self.config.stall_timeout + jitter {
                if self.replica.revoke(&mut self.outbox, instance).is_some() {
                    revoked.push(instance);
                }
                self.stalled_since.insert(instance, now);
            }
        }
        revoked
    }

    pub fn take_outbound(&mut self) -> Vec<Outbound> {
        self.outbox.take_outbound()
    }

    /// Feed learned values into the store
    pub fn drain_events(&mut self) -> Vec<Applied> {
        let mut applied = Vec::new();
        for event in self.outbox.take_events() {
            if let Event::Learned { instance, value } = event {
                applied.extend(self.store.learn(instance, value));
            }
        }
        applied
    }
}
