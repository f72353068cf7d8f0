//! Fault injection for agreement testing
//!
//! Provides mechanisms to inject various faults into the cluster:
//! - Message loss
//! - Message duplication
//! - Message reordering
//! - Network partitions
//! - Node crashes
//!
//! All randomness comes from one seeded RNG so a failing run can be replayed.

use crate::cluster::Cluster;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

/// Fault injection configuration
#[derive(Debug, Clone, PartialEq)]
pub struct FaultConfig {
    /// Probability of message loss (0.0-1.0)
    pub message_loss_rate: f64,
    /// Probability that a delivered message is also re-queued
    pub duplicate_rate: f64,
    /// Probability that the next delivery is picked at random instead of
    /// the oldest message in flight
    pub reorder_rate: f64,
    /// Whether to inject network partitions
    pub enable_partitions: bool,
    /// Whether to inject node crashes
    pub enable_crashes: bool,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            message_loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            enable_partitions: false,
            enable_crashes: false,
        }
    }
}

impl FaultConfig {
    /// No faults (happy path)
    pub fn none() -> Self {
        Self::default()
    }

    /// Light faults (5% message loss, some reordering)
    pub fn light() -> Self {
        Self {
            message_loss_rate: 0.05,
            reorder_rate: 0.2,
            ..Default::default()
        }
    }

    /// Heavy faults (20% loss, duplicates, reordering, partitions, crashes)
    pub fn heavy() -> Self {
        Self {
            message_loss_rate: 0.20,
            duplicate_rate: 0.10,
            reorder_rate: 0.8,
            enable_partitions: true,
            enable_crashes: true,
        }
    }

    /// Everything at once, at rates no real network should see
    pub fn chaos() -> Self {
        Self {
            message_loss_rate: 0.35,
            duplicate_rate: 0.25,
            reorder_rate: 1.0,
            enable_partitions: true,
            enable_crashes: true,
        }
    }
}

/// Fault injector for a cluster
pub struct FaultInjector {
    config: FaultConfig,
    rng: StdRng,
}

impl FaultInjector {
    /// Create a new fault injector
    pub fn new(config: FaultConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    /// Check if a message should be dropped
    pub fn should_drop_message(&mut self) -> bool {
        self.config.message_loss_rate > 0.0 && self.rng.gen::<f64>() < self.config.message_loss_rate
    }

    /// Check if a delivered message should also be delivered again later
    pub fn should_duplicate_message(&mut self) -> bool {
        self.config.duplicate_rate > 0.0 && self.rng.gen::<f64>() < self.config.duplicate_rate
    }

    /// Index of the in-flight message to deliver next
    pub fn pick_delivery(&mut self, in_flight: usize) -> usize {
        if in_flight > 1 && self.config.reorder_rate > 0.0 && self.rng.gen::<f64>() < self.config.reorder_rate {
            self.rng.gen_range(0..in_flight)
        } else {
            0
        }
    }

    /// Stop injecting message faults; the network becomes reliable and FIFO
    pub fn quiesce(&mut self) {
        self.config = FaultConfig {
            enable_partitions: self.config.enable_partitions,
            enable_crashes: self.config.enable_crashes,
            ..FaultConfig::none()
        };
        info!("Message faults disabled");
    }

    /// Inject a random partition into the cluster
    pub fn inject_partition(&mut self, cluster: &mut Cluster) {
        if !self.config.enable_partitions {
            return;
        }

        let num_nodes = cluster.len();
        if num_nodes < 3 {
            return;
        }

        // Create a random partition
        let split_point = self.rng.gen_range(1..num_nodes);
        let group_a: Vec<usize> = (0..split_point).collect();
        let group_b: Vec<usize> = (split_point..num_nodes).collect();

        cluster.partition(&group_a, &group_b);
        info!("Injected partition: {:?} | {:?}", group_a, group_b);
    }

    /// Crash a random live node, never leaving fewer than a quorum alive
    pub fn inject_random_crash(&mut self, cluster: &mut Cluster) {
        if !self.config.enable_crashes {
            return;
        }

        let live = cluster.live_nodes();
        if live.len() <= cluster.len() / 2 + 1 {
            return;
        }

        let node_idx = live[self.rng.gen_range(0..live.len())];
        cluster.crash_node(node_idx);
        info!("Injected random crash (node {})", node_idx);
    }

    /// Heal all faults
    pub fn heal_all(&mut self, cluster: &mut Cluster) {
        cluster.heal_partitions();
        for i in 0..cluster.len() {
            if cluster.nodes[i].crashed {
                cluster.recover_node(i);
            }
        }
        info!("Healed all faults");
    }
}

/// Predefined fault scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultScenario {
    /// No faults
    None,
    /// Random message loss and reordering
    Lossy,
    /// Heavy duplication
    Duplicates,
    /// Network partition mid-run
    Partition,
    /// Node crash mid-run
    Crash,
    /// Loss, duplication, partitions and crashes at moderate rates
    Heavy,
    /// Everything at once
    Chaos,
}

impl FaultScenario {
    /// Get fault config for this scenario
    pub fn config(&self) -> FaultConfig {
        match self {
            FaultScenario::None => FaultConfig::none(),
            FaultScenario::Lossy => FaultConfig {
                message_loss_rate: 0.15,
                reorder_rate: 0.5,
                ..FaultConfig::default()
            },
            FaultScenario::Duplicates => FaultConfig {
                duplicate_rate: 0.4,
                reorder_rate: 0.5,
                ..FaultConfig::default()
            },
            FaultScenario::Partition => FaultConfig {
                enable_partitions: true,
                ..FaultConfig::light()
            },
            FaultScenario::Crash => FaultConfig {
                enable_crashes: true,
                ..FaultConfig::light()
            },
            FaultScenario::Heavy => FaultConfig::heavy(),
            FaultScenario::Chaos => FaultConfig::chaos(),
        }
    }
}

impl std::str::FromStr for FaultScenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "happy" => Ok(FaultScenario::None),
            "lossy" | "message-loss" | "message_loss" => Ok(FaultScenario::Lossy),
            "duplicates" => Ok(FaultScenario::Duplicates),
            "partition" => Ok(FaultScenario::Partition),
            "crash" => Ok(FaultScenario::Crash),
            "heavy" => Ok(FaultScenario::Heavy),
            "chaos" => Ok(FaultScenario::Chaos),
            _ => Err(format!("Unknown fault scenario: {}", s)),
        }
    }
}
