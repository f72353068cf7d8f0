//! Per-node dispatch over all rounds.
//!
//! A [`Replica`] owns every [`Round`] of one node, creates them lazily on
//! first reference, and routes each incoming envelope to the round of its
//! instance. It also decides which instances this node may drive through
//! the ballot-0 fast path: instance `i` is coordinated by
//! `members[i mod n]`, and a coordinator uses the fast ballot at most once
//! per instance. Every other node recovers an instance through `revoke`.

use crate::error::{Error, Result};
use crate::message::Envelope;
use crate::quorum::Membership;
use crate::round::Round;
use crate::server::Server;
use crate::types::{AmoCommand, Ballot, Instance, NodeId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Default width of the window above the decided prefix that gap filling
/// and stall scans cover
pub const DEFAULT_GAP_WINDOW: Instance = 1024;

pub struct Replica {
    node_id: NodeId,
    membership: Membership,
    rounds: BTreeMap<Instance, Round>,
    /// Instances this node already proposed at the fast ballot
    fast_proposed: BTreeSet<Instance>,
    gap_window: Instance,
}

impl Replica {
    pub fn new(node_id: impl Into<NodeId>, membership: Membership) -> Self {
        Self {
            node_id: node_id.into(),
            membership,
            rounds: BTreeMap::new(),
            fast_proposed: BTreeSet::new(),
            gap_window: DEFAULT_GAP_WINDOW,
        }
    }

    /// Limit `fill_gaps` and `undecided` to `window` instances above the
    /// decided prefix
    pub fn with_gap_window(mut self, window: Instance) -> Self {
        self.gap_window = window.max(1);
        self
    }

    pub fn gap_window(&self) -> Instance {
        self.gap_window
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    pub fn round(&self, instance: Instance) -> Option<&Round> {
        self.rounds.get(&instance)
    }

    /// Round for `instance`, created on first reference
    pub fn round_mut(&mut self, instance: Instance) -> &mut Round {
        self.rounds
            .entry(instance)
            .or_insert_with(|| Round::new(instance))
    }

    pub fn rounds(&self) -> impl Iterator<Item = &Round> {
        self.rounds.values()
    }

    pub fn learned(&self, instance: Instance) -> Option<&AmoCommand> {
        self.rounds.get(&instance).and_then(Round::learned)
    }

    /// Highest instance any message or local action has referenced
    pub fn highest_instance(&self) -> Option<Instance> {
        self.rounds.keys().next_back().copied()
    }

    /// Coordinator of `instance` in the agreed member ordering
    pub fn coordinator(&self, instance: Instance) -> Option<&NodeId> {
        self.membership.coordinator(instance)
    }

    pub fn is_coordinator(&self, instance: Instance) -> bool {
        self.coordinator(instance) == Some(&self.node_id)
    }

    /// Route an incoming envelope to its round.
    ///
    /// Envelopes from nodes outside the membership are dropped.
    pub fn dispatch<S: Server + ?Sized>(&mut self, server: &mut S, envelope: &Envelope) {
        if !self.membership.contains(&envelope.from) {
            warn!(
                "{}: dropping {} from non-member {}",
                self.node_id,
                envelope.message.kind(),
                envelope.from
            );
            return;
        }

        let instance = envelope.message.instance();
        self.round_mut(instance)
            .handle(server, &envelope.message, &envelope.from);
    }

    /// Propose `value` for `instance` at the fast ballot
    pub fn suggest<S: Server + ?Sized>(
        &mut self,
        server: &mut S,
        instance: Instance,
        value: AmoCommand,
    ) -> Result<()> {
        self.claim_fast_ballot(instance)?;
        self.round_mut(instance).suggest(server, value);
        Ok(())
    }

    /// Fill `instance` with NoOp at the fast ballot
    pub fn skip<S: Server + ?Sized>(&mut self, server: &mut S, instance: Instance) -> Result<()> {
        self.claim_fast_ballot(instance)?;
        self.round_mut(instance).skip(server);
        Ok(())
    }

    /// Restart `instance` at a higher ballot owned by this node
    pub fn revoke<S: Server + ?Sized>(&mut self, server: &mut S, instance: Instance) -> Option<Ballot> {
        self.round_mut(instance).revoke(server)
    }

    /// Suggest `value` in the lowest instance this node still coordinates
    /// and has not used. Returns the chosen instance.
    pub fn propose<S: Server + ?Sized>(&mut self, server: &mut S, value: AmoCommand) -> Result<Instance> {
        let instance = self.next_free_instance()?;
        self.suggest(server, instance, value)?;
        Ok(instance)
    }

    /// Skip every unused instance this node coordinates below the highest
    /// instance seen, keeping the log dense. Only the gap window above the
    /// decided prefix is scanned. Returns the skipped instances.
    pub fn fill_gaps<S: Server + ?Sized>(&mut self, server: &mut S) -> Vec<Instance> {
        let Some(highest) = self.highest_instance() else {
            return Vec::new();
        };
        let start = self.decided_prefix();
        let end = highest.min(start.saturating_add(self.gap_window));

        let gaps: Vec<Instance> = (start..end)
            .filter(|&i| self.is_coordinator(i) && self.fast_ballot_free(i))
            .collect();

        for &instance in &gaps {
            debug!("{}: skipping own instance {}", self.node_id, instance);
            self.fast_proposed.insert(instance);
            self.round_mut(instance).skip(server);
        }
        gaps
    }

    /// Undecided instances from the decided prefix up to the highest one
    /// seen, in order, at most one gap window of them. These are the
    /// candidates for `revoke` once they have been stuck long enough.
    pub fn undecided(&self) -> Vec<Instance> {
        let Some(highest) = self.highest_instance() else {
            return Vec::new();
        };
        let start = self.decided_prefix();
        let end = highest.min(start.saturating_add(self.gap_window - 1));
        if start > end {
            return Vec::new();
        }

        (start..=end)
            .filter(|&i| self.learned(i).is_none())
            .collect()
    }

    /// Length of the decided log prefix
    pub fn decided_prefix(&self) -> Instance {
        let mut next = 0;
        for (&instance, round) in &self.rounds {
            if instance != next || !round.is_learned() {
                break;
            }
            next += 1;
        }
        next
    }

    fn fast_ballot_free(&self, instance: Instance) -> bool {
        !self.fast_proposed.contains(&instance)
            && self.rounds.get(&instance).map_or(true, |r| !r.is_learned())
    }

    fn next_free_instance(&self) -> Result<Instance> {
        let n = self.membership.len() as u64;
        let own = self
            .membership
            .index_of(&self.node_id)
            .ok_or_else(|| Error::UnknownPeer(self.node_id.clone()))? as u64;

        let mut instance = own;
        while !self.fast_ballot_free(instance) {
            instance += n;
        }
        Ok(instance)
    }

    fn claim_fast_ballot(&mut self, instance: Instance) -> Result<()> {
        match self.coordinator(instance) {
            Some(coordinator) if *coordinator == self.node_id => {}
            coordinator => {
                return Err(Error::NotCoordinator {
                    node: self.node_id.clone(),
                    instance,
                    coordinator: coordinator.cloned().unwrap_or_default(),
                });
            }
        }
        if self.learned(instance).is_some() {
            return Err(Error::AlreadyDecided(instance));
        }
        if !self.fast_proposed.insert(instance) {
            return Err(Error::FastBallotUsed(instance));
        }
        Ok(())
    }
}
