//! Synod protocol messages and their wire envelope

use crate::types::{AmoCommand, Ballot, Instance, NodeId};
use serde::{Deserialize, Serialize};

/// Phase 1a: a proposer asks acceptors to promise `ballot`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prepare {
    pub instance: Instance,
    pub ballot: Ballot,
}

/// Phase 1b: an acceptor's promise, carrying whatever it already accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareAck {
    pub instance: Instance,
    pub ballot: Ballot,
    pub accepted_ballot: Ballot,
    pub accepted_value: AmoCommand,
}

/// Phase 2a: a proposer asks acceptors to accept `value` at `ballot`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Propose {
    pub instance: Instance,
    pub ballot: Ballot,
    pub value: AmoCommand,
}

/// Phase 2b: an acceptor reports what it accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accept {
    pub instance: Instance,
    pub ballot: Ballot,
    pub accepted_value: AmoCommand,
}

/// A value has been chosen for `instance`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Learn {
    pub instance: Instance,
    pub value: AmoCommand,
}

/// Synod protocol messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "PREPARE")]
    Prepare(Prepare),

    #[serde(rename = "PREPARE_ACK")]
    PrepareAck(PrepareAck),

    #[serde(rename = "PROPOSE")]
    Propose(Propose),

    #[serde(rename = "ACCEPT")]
    Accept(Accept),

    #[serde(rename = "LEARN")]
    Learn(Learn),
}

impl Message {
    /// Instance this message belongs to
    pub fn instance(&self) -> Instance {
        match self {
            Message::Prepare(m) => m.instance,
            Message::PrepareAck(m) => m.instance,
            Message::Propose(m) => m.instance,
            Message::Accept(m) => m.instance,
            Message::Learn(m) => m.instance,
        }
    }

    /// Short uppercase name, used for logging and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Prepare(_) => "PREPARE",
            Message::PrepareAck(_) => "PREPARE_ACK",
            Message::Propose(_) => "PROPOSE",
            Message::Accept(_) => "ACCEPT",
            Message::Learn(_) => "LEARN",
        }
    }
}

impl From<Prepare> for Message {
    fn from(m: Prepare) -> Self {
        Message::Prepare(m)
    }
}

impl From<PrepareAck> for Message {
    fn from(m: PrepareAck) -> Self {
        Message::PrepareAck(m)
    }
}

impl From<Propose> for Message {
    fn from(m: Propose) -> Self {
        Message::Propose(m)
    }
}

impl From<Accept> for Message {
    fn from(m: Accept) -> Self {
        Message::Accept(m)
    }
}

impl From<Learn> for Message {
    fn from(m: Learn) -> Self {
        Message::Learn(m)
    }
}

/// A message as it travels between nodes, stamped with its sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: NodeId,
    pub message: Message,
}

impl Envelope {
    pub fn new(from: impl Into<NodeId>, message: impl Into<Message>) -> Self {
        Self {
            from: from.into(),
            message: message.into(),
        }
    }

    /// Serialize envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
