//! In-process multi-node cluster for testing
//!
//! Every node runs the real [`Replica`] against an [`Outbox`]; the cluster
//! moves recorded sends through a simulated network one message per step,
//! letting a [`FaultInjector`] drop, duplicate or reorder them. Runs are
//! fully deterministic for a given seed.

use crate::fault_injection::FaultInjector;
use crate::metrics::Metrics;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use synod_core::{
    AmoCommand, Applied, Envelope, Event, Instance, KvStore, Membership, NodeId, Outbound, Outbox,
    Replica,
};
use tracing::{debug, info};

/// A message on the simulated wire
#[derive(Debug, Clone)]
pub struct InFlight {
    pub from: usize,
    pub to: usize,
    pub envelope: Envelope,
}

/// State for a single node in the cluster
pub struct ClusterNode {
    pub id: NodeId,
    pub replica: Replica,
    outbox: Outbox,
    pub store: KvStore,
    /// Crashed nodes neither send nor receive; their state survives
    pub crashed: bool,
    /// Every `on_learned` callback, in order
    pub learn_log: Vec<(Instance, AmoCommand)>,
    /// Everything applied to the store, in order
    pub applied: Vec<Applied>,
    /// Step at which each undecided instance was first seen
    stalled_since: BTreeMap<Instance, u64>,
}

impl ClusterNode {
    fn new(id: NodeId, membership: Membership) -> Self {
        Self {
            replica: Replica::new(id.clone(), membership.clone()),
            outbox: Outbox::new(id.clone(), membership),
            id,
            store: KvStore::new(),
            crashed: false,
            learn_log: Vec::new(),
            applied: Vec::new(),
            stalled_since: BTreeMap::new(),
        }
    }
}

/// Multi-node test cluster
pub struct Cluster {
    pub nodes: Vec<ClusterNode>,
    /// Partition matrix: partitions[i][j] = true means i cannot reach j
    pub partitions: Vec<Vec<bool>>,
    pub network: Vec<InFlight>,
    pub metrics: Metrics,
    /// Simulation clock, one tick per step
    pub clock: u64,
    /// Steps an instance may stay undecided before a node revokes it
    pub stall_steps: u64,
    /// Every command handed to `submit`, with its submit step
    pub submitted: BTreeMap<AmoCommand, u64>,
    /// Step at which each instance was first learned anywhere
    pub decided_at: BTreeMap<Instance, u64>,
    rng: StdRng,
}

impl Cluster {
    /// Create a new cluster with the given number of nodes
    pub fn new(num_nodes: usize, seed: u64) -> Self {
        // Zero-padded ids keep the agreed ordering equal to the node index
        let ids: Vec<NodeId> = (0..num_nodes).map(|i| format!("node_{:02}", i)).collect();
        let membership = Membership::new(ids.iter().cloned());
        let nodes = ids
            .into_iter()
            .map(|id| ClusterNode::new(id, membership.clone()))
            .collect();

        Self {
            nodes,
            partitions: vec![vec![false; num_nodes]; num_nodes],
            network: Vec::new(),
            metrics: Metrics::new(),
            clock: 0,
            stall_steps: 20 * num_nodes as u64,
            submitted: BTreeMap::new(),
            decided_at: BTreeMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check if node i can reach node j
    pub fn can_reach(&self, from: usize, to: usize) -> bool {
        from == to || !self.partitions[from][to]
    }

    /// Create a network partition between two groups
    pub fn partition(&mut self, group_a: &[usize], group_b: &[usize]) {
        for &a in group_a {
            for &b in group_b {
                self.partitions[a][b] = true;
                self.partitions[b][a] = true;
            }
        }
        info!("Network partition created: {:?} <-> {:?}", group_a, group_b);
    }

    /// Heal all partitions
    pub fn heal_partitions(&mut self) {
        for row in &mut self.partitions {
            for cell in row {
                *cell = false;
            }
        }
        info!("All partitions healed");
    }

    /// Crash a node
    pub fn crash_node(&mut self, node_idx: usize) {
        self.nodes[node_idx].crashed = true;
        info!("Node {} crashed", self.nodes[node_idx].id);
    }

    /// Recover a crashed node
    pub fn recover_node(&mut self, node_idx: usize) {
        self.nodes[node_idx].crashed = false;
        info!("Node {} recovered", self.nodes[node_idx].id);
    }

    pub fn live_nodes(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&i| !self.nodes[i].crashed)
            .collect()
    }

    /// Propose `command` in `node_idx`'s next free instance
    pub fn submit(&mut self, node_idx: usize, command: AmoCommand) -> synod_core::error::Result<Instance> {
        let node = &mut self.nodes[node_idx];
        let instance = node.replica.propose(&mut node.outbox, command.clone())?;
        debug!("{} submitted {} in instance {}", node.id, command, instance);
        self.submitted.insert(command, self.clock);
        self.flush(node_idx);
        Ok(instance)
    }

    /// Revoke `instance` from `node_idx`
    pub fn revoke(&mut self, node_idx: usize, instance: Instance) {
        let node = &mut self.nodes[node_idx];
        if node.replica.revoke(&mut node.outbox, instance).is_some() {
            self.metrics.revokes += 1;
        }
        node.stalled_since.insert(instance, self.clock);
        self.flush(node_idx);
    }

    /// Periodic work on every live node: skip own gaps below the log tip and
    /// revoke instances stalled past `stall_steps` (plus random jitter)
    pub fn tick(&mut self) {
        for idx in self.live_nodes() {
            let skipped = {
                let node = &mut self.nodes[idx];
                node.replica.fill_gaps(&mut node.outbox).len()
            };
            self.metrics.skips += skipped as u64;

            let undecided = self.nodes[idx].replica.undecided();
            self.nodes[idx]
                .stalled_since
                .retain(|i, _| undecided.contains(i));

            for instance in undecided {
                let clock = self.clock;
                let since = *self.nodes[idx]
                    .stalled_since
                    .entry(instance)
                    .or_insert(clock);
                let jitter = self.rng.gen_range(0..=self.stall_steps / 2);

                if clock.saturating_sub(since) >= self.stall_steps + jitter {
                    debug!("{} revoking stalled instance {}", self.nodes[idx].id, instance);
                    self.revoke(idx, instance);
                }
            }
            self.flush(idx);
        }
    }

    /// Move one message across the network. Returns false when nothing is in
    /// flight.
    pub fn step(&mut self, injector: &mut FaultInjector) -> bool {
        if self.network.is_empty() {
            return false;
        }
        self.clock += 1;

        let idx = injector.pick_delivery(self.network.len());
        let msg = self.network.remove(idx);

        if self.nodes[msg.to].crashed || !self.can_reach(msg.from, msg.to) || injector.should_drop_message() {
            self.metrics.dropped += 1;
            return true;
        }
        if injector.should_duplicate_message() {
            self.metrics.duplicated += 1;
            self.network.push(msg.clone());
        }

        self.metrics.delivered += 1;
        let node = &mut self.nodes[msg.to];
        node.replica.dispatch(&mut node.outbox, &msg.envelope);
        self.flush(msg.to);
        true
    }

    /// Step until the network is empty or `max_steps` ran out. Returns the
    /// number of steps taken.
    pub fn run_until_quiet(&mut self, injector: &mut FaultInjector, max_steps: usize) -> usize {
        let mut steps = 0;
        while steps < max_steps && self.step(injector) {
            steps += 1;
        }
        steps
    }

    /// Drain a node's outbox onto the network and its events into its store
    fn flush(&mut self, node_idx: usize) {
        let node = &mut self.nodes[node_idx];
        let outbound = node.outbox.take_outbound();
        let events = node.outbox.take_events();

        for event in events {
            if let Event::Learned { instance, value } = event {
                node.learn_log.push((instance, value.clone()));
                let applied = node.store.learn(instance, value.clone());
                node.applied.extend(applied);

                if !self.decided_at.contains_key(&instance) {
                    self.decided_at.insert(instance, self.clock);
                    if let Some(&submitted_at) = self.submitted.get(&value) {
                        self.metrics.record_latency(submitted_at, self.clock);
                    }
                }
            }
        }

        if self.nodes[node_idx].crashed {
            return;
        }
        let from_id = self.nodes[node_idx].id.clone();
        for out in outbound {
            self.metrics.count_message(out.message().kind());
            match out {
                Outbound::Broadcast(message) => {
                    for to in 0..self.nodes.len() {
                        self.network.push(InFlight {
                            from: node_idx,
                            to,
                            envelope: Envelope::new(from_id.clone(), message.clone()),
                        });
                    }
                }
                Outbound::Unicast { to, message } => {
                    if let Some(to) = self.nodes.iter().position(|n| n.id == to) {
                        self.network.push(InFlight {
                            from: node_idx,
                            to,
                            envelope: Envelope::new(from_id.clone(), message),
                        });
                    }
                }
            }
        }
    }

    /// Highest instance referenced on any node
    pub fn highest_instance(&self) -> Option<Instance> {
        self.nodes
            .iter()
            .filter_map(|n| n.replica.highest_instance())
            .max()
    }

    /// Instances up to the global tip that some node has not learned
    pub fn undecided(&self) -> BTreeSet<Instance> {
        let Some(highest) = self.highest_instance() else {
            return BTreeSet::new();
        };
        (0..=highest)
            .filter(|&i| self.nodes.iter().any(|n| n.replica.learned(i).is_none()))
            .collect()
    }

    /// Bring every node up to date: heal the network, then have each node
    /// revoke whatever it is missing and deliver until quiet, repeating for
    /// at most `max_rounds`. Returns whether every instance is decided
    /// everywhere.
    pub fn converge(&mut self, injector: &mut FaultInjector, max_rounds: usize) -> bool {
        injector.quiesce();
        self.heal_partitions();
        for idx in 0..self.nodes.len() {
            if self.nodes[idx].crashed {
                self.recover_node(idx);
            }
        }

        for round in 0..max_rounds {
            self.tick();
            self.run_until_quiet(injector, 1_000_000);

            let Some(highest) = self.highest_instance() else {
                return true;
            };
            let mut missing = false;
            for idx in 0..self.nodes.len() {
                for instance in 0..=highest {
                    if self.nodes[idx].replica.learned(instance).is_none() {
                        missing = true;
                        self.revoke(idx, instance);
                    }
                }
            }
            if !missing {
                debug!("Converged after {} rounds", round);
                return true;
            }
            self.run_until_quiet(injector, 1_000_000);
        }
        self.undecided().is_empty()
    }
}
