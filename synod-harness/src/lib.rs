//! Synod Harness - agreement testing for the Synod replicated log
//!
//! Runs real replicas over a simulated, seeded network with message loss,
//! duplication, reordering, partitions and crashes, then checks that every
//! node decided the same commands.

pub mod checker;
pub mod cluster;
pub mod fault_injection;
pub mod metrics;
pub mod scenarios;
pub mod workload;
