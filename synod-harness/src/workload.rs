//! Workload generation for agreement testing
//!
//! Generates key-value commands for the replicated store. Sequence numbers
//! are unique across the whole run so every submitted command is distinct.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use synod_core::AmoCommand;

/// Workload configuration
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Number of distinct keys
    pub num_keys: usize,
    /// Ratio of put operations (0.0-1.0)
    pub put_ratio: f64,
    /// Ratio of delete operations; the remainder are gets
    pub delete_ratio: f64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            num_keys: 5,
            put_ratio: 0.7,
            delete_ratio: 0.1,
        }
    }
}

/// Workload generator
pub struct WorkloadGenerator {
    config: WorkloadConfig,
    rng: StdRng,
    next_seq: i64,
}

impl WorkloadGenerator {
    /// Create a new workload generator
    pub fn new(config: WorkloadConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            next_seq: 1,
        }
    }

    /// Generate the next command
    pub fn next_command(&mut self) -> AmoCommand {
        let seq = self.next_seq;
        self.next_seq += 1;

        let key = format!("key_{}", self.rng.gen_range(0..self.config.num_keys.max(1)));
        let roll = self.rng.gen::<f64>();

        if roll < self.config.put_ratio {
            AmoCommand::put(seq, key, format!("v{}", seq))
        } else if roll < self.config.put_ratio + self.config.delete_ratio {
            AmoCommand::delete(seq, key)
        } else {
            AmoCommand::get(seq, key)
        }
    }
}

/// Predefined workload patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadPattern {
    /// All puts
    WriteHeavy,
    /// 70% puts, 10% deletes, 20% gets
    Mixed,
    /// 20% puts, 80% gets
    ReadHeavy,
    /// All operations on a single key
    SingleKey,
}

impl WorkloadPattern {
    /// Get workload config for this pattern
    pub fn config(&self) -> WorkloadConfig {
        match self {
            WorkloadPattern::WriteHeavy => WorkloadConfig {
                put_ratio: 1.0,
                delete_ratio: 0.0,
                ..Default::default()
            },
            WorkloadPattern::Mixed => WorkloadConfig::default(),
            WorkloadPattern::ReadHeavy => WorkloadConfig {
                put_ratio: 0.2,
                delete_ratio: 0.0,
                ..Default::default()
            },
            WorkloadPattern::SingleKey => WorkloadConfig {
                num_keys: 1,
                ..Default::default()
            },
        }
    }
}

impl std::str::FromStr for WorkloadPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "write-heavy" | "write_heavy" => Ok(WorkloadPattern::WriteHeavy),
            "mixed" => Ok(WorkloadPattern::Mixed),
            "read-heavy" | "read_heavy" => Ok(WorkloadPattern::ReadHeavy),
            "single-key" | "single_key" => Ok(WorkloadPattern::SingleKey),
            _ => Err(format!("Unknown workload pattern: {}", s)),
        }
    }
}
