//! The collaborator surface a [`Round`](crate::round::Round) talks to, and a
//! buffered implementation of it.

use crate::message::Message;
use crate::quorum::Membership;
use crate::types::{AmoCommand, Ballot, Instance, NodeId};
use tracing::debug;

/// Transport, identity and callbacks supplied to every round.
///
/// Sends are best effort and fire-and-forget. Encoding is the transport's
/// job; rounds only ever hand over structured messages.
pub trait Server {
    /// Send to every member, the local node included
    fn broadcast(&mut self, message: Message);

    /// Send to a single member
    fn deliver(&mut self, message: Message, recipient: &NodeId);

    /// Cluster size, static for the lifetime of a round
    fn num_servers(&self) -> usize;

    /// Local identity
    fn server_name(&self) -> &NodeId;

    /// Deterministic owner of `ballot`. `None` when nobody owns it.
    fn owner(&self, ballot: Ballot) -> Option<NodeId>;

    /// A round went from undecided to decided
    fn on_learned(&mut self, instance: Instance, value: &AmoCommand);

    /// The local acceptor accepted a ballot-0 suggestion
    fn on_suggestion(&mut self, _instance: Instance) {}

    /// The local learner saw an acceptance of a ballot-0 suggestion
    fn on_accept_suggestion(&mut self, _instance: Instance) {}
}

/// An outbound send recorded by [`Outbox`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Broadcast(Message),
    Unicast { to: NodeId, message: Message },
}

impl Outbound {
    pub fn message(&self) -> &Message {
        match self {
            Outbound::Broadcast(message) => message,
            Outbound::Unicast { message, .. } => message,
        }
    }
}

/// A callback invocation recorded by [`Outbox`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Learned { instance: Instance, value: AmoCommand },
    Suggested { instance: Instance },
    AcceptSuggested { instance: Instance },
}

/// [`Server`] that buffers everything a round does for the caller to drain.
///
/// The node and the harness run every handler against an `Outbox`, then move
/// the recorded sends onto their real (or simulated) network.
#[derive(Debug, Clone)]
pub struct Outbox {
    node_id: NodeId,
    membership: Membership,
    outbound: Vec<Outbound>,
    events: Vec<Event>,
}

impl Outbox {
    pub fn new(node_id: impl Into<NodeId>, membership: Membership) -> Self {
        Self {
            node_id: node_id.into(),
            membership,
            outbound: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Sends recorded so far, without draining them
    pub fn outbound(&self) -> &[Outbound] {
        &self.outbound
    }

    /// Events recorded so far, without draining them
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn take_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbound)
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Values learned since the last drain, in learn order
    pub fn learned(&self) -> impl Iterator<Item = (Instance, &AmoCommand)> {
        self.events.iter().filter_map(|e| match e {
            Event::Learned { instance, value } => Some((*instance, value)),
            _ => None,
        })
    }
}

impl Server for Outbox {
    fn broadcast(&mut self, message: Message) {
        debug!("{}: broadcast {}", self.node_id, message.kind());
        self.outbound.push(Outbound::Broadcast(message));
    }

    fn deliver(&mut self, message: Message, recipient: &NodeId) {
        debug!("{}: unicast {} to {}", self.node_id, message.kind(), recipient);
        self.outbound.push(Outbound::Unicast {
            to: recipient.clone(),
            message,
        });
    }

    fn num_servers(&self) -> usize {
        self.membership.len()
    }

    fn server_name(&self) -> &NodeId {
        &self.node_id
    }

    fn owner(&self, ballot: Ballot) -> Option<NodeId> {
        self.membership.owner(ballot).cloned()
    }

    fn on_learned(&mut self, instance: Instance, value: &AmoCommand) {
        self.events.push(Event::Learned {
            instance,
            value: value.clone(),
        });
    }

    fn on_suggestion(&mut self, instance: Instance) {
        self.events.push(Event::Suggested { instance });
    }

    fn on_accept_suggestion(&mut self, instance: Instance) {
        self.events.push(Event::AcceptSuggested { instance });
    }
}
