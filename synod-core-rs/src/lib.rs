//! Synod Core Library
//!
//! Per-instance Paxos (Synod) consensus for a replicated key-value store.
//! Each log instance runs its own [`Round`]; a [`Replica`] dispatches
//! messages to rounds and the [`KvStore`] applies what they learn.

pub mod types;
pub mod message;
pub mod quorum;
pub mod server;
pub mod round;
pub mod replica;
pub mod store;
pub mod config;
pub mod error;
pub mod transport;

pub use types::*;
pub use message::{Accept, Envelope, Learn, Message, Prepare, PrepareAck, Propose};
pub use quorum::{quorum_size, Membership};
pub use server::{Event, Outbound, Outbox, Server};
pub use round::{Phase, Round};
pub use replica::{Replica, DEFAULT_GAP_WINDOW};
pub use store::{Applied, KvStore, Reply};
pub use config::{ClusterConfig, MemberConfig};
pub use error::{ConfigError, Error};
pub use transport::Transport;
