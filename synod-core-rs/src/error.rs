//! Error types for the Synod core.
//!
//! Rounds themselves never fail; these cover the edges around them:
//! encoding, configuration, and proposer-side misuse of the fast ballot.

use crate::types::{Instance, NodeId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{node} does not coordinate instance {instance} (coordinator: {coordinator})")]
    NotCoordinator {
        node: NodeId,
        instance: Instance,
        coordinator: NodeId,
    },

    #[error("Instance {0} already used its fast ballot")]
    FastBallotUsed(Instance),

    #[error("Instance {0} is already decided")]
    AlreadyDecided(Instance),

    #[error("Unknown peer: {0}")]
    UnknownPeer(NodeId),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cluster has no members")]
    EmptyMembership,

    #[error("member {0} is listed more than once")]
    DuplicateMember(NodeId),

    #[error("local node {0} is not a cluster member")]
    UnknownNode(NodeId),
}

pub type Result<T> = std::result::Result<T, Error>;
