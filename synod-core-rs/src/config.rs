//! Static cluster configuration
//!
//! Every node loads the same member list (ids and UDP addresses) plus its
//! own id. The member list is the agreed ordering ballot ownership and
//! instance coordination are computed from.

use crate::error::{ConfigError, Error};
use crate::quorum::Membership;
use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

/// One cluster member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberConfig {
    pub id: NodeId,
    pub addr: SocketAddr,
}

/// Complete cluster configuration as seen by one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Local node id; must appear in `members`
    pub node_id: NodeId,
    pub members: Vec<MemberConfig>,
}

impl ClusterConfig {
    /// Load and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let bytes = std::fs::read(path)?;
        let config: ClusterConfig = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.members.is_empty() {
            return Err(ConfigError::EmptyMembership);
        }

        let mut seen = HashSet::new();
        for member in &self.members {
            if !seen.insert(member.id.as_str()) {
                return Err(ConfigError::DuplicateMember(member.id.clone()));
            }
        }

        if !seen.contains(self.node_id.as_str()) {
            return Err(ConfigError::UnknownNode(self.node_id.clone()));
        }
        Ok(())
    }

    pub fn membership(&self) -> Membership {
        Membership::new(self.members.iter().map(|m| m.id.clone()))
    }

    pub fn addr_of(&self, node_id: &str) -> Option<SocketAddr> {
        self.members
            .iter()
            .find(|m| m.id == node_id)
            .map(|m| m.addr)
    }

    /// Address the local node listens on
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addr_of(&self.node_id)
    }
}
