//! Single-instance Paxos (Synod) state machine.
//!
//! One [`Round`] exists per log instance. Every node plays proposer,
//! acceptor and learner for every round at once:
//!
//! - `suggest`/`skip` propose directly at ballot 0 (fast path, no Prepare)
//! - `revoke` starts a Prepare epoch at the smallest self-owned ballot above
//!   everything seen so far
//! - `handle_*` react to the five protocol messages
//!
//! Handlers run to completion against a [`Server`] and never fail: stale or
//! duplicated input is ignored or answered with a corrective resend.

use crate::message::{Accept, Learn, Message, Prepare, PrepareAck, Propose};
use crate::quorum::quorum_size;
use crate::server::Server;
use crate::types::{AmoCommand, Ballot, Instance, NodeId, FAST_BALLOT, NO_BALLOT};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// Lifecycle stage of a round, derived from its fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing promised, accepted or started locally
    Idle,
    /// Local `revoke` broadcast a Prepare and awaits promises
    Preparing,
    /// A promise quorum was reached and a Propose was broadcast
    Proposing,
    /// The local acceptor has accepted some ballot
    Accepting,
    /// A value was learned; terminal
    Learned,
}

/// Paxos state for one log instance
#[derive(Debug, Clone)]
pub struct Round {
    instance: Instance,
    /// Highest ballot promised by the local acceptor
    prepared_ballot: Ballot,
    /// Highest ballot accepted by the local acceptor
    accepted_ballot: Ballot,
    accepted_value: AmoCommand,
    learned: Option<AmoCommand>,
    /// Ballot of the Prepare epoch started by the last local `revoke`
    epoch: Option<Ballot>,
    /// Ballot of the last Propose broadcast after a promise quorum
    proposed: Option<Ballot>,
    /// Last promise received from each peer
    prepared_history: BTreeMap<NodeId, PrepareAck>,
    /// Last acceptance received from each peer
    learner_history: BTreeMap<NodeId, Accept>,
}

impl Round {
    pub fn new(instance: Instance) -> Self {
        Self {
            instance,
            prepared_ballot: 0,
            accepted_ballot: NO_BALLOT,
            accepted_value: AmoCommand::noop(),
            learned: None,
            epoch: None,
            proposed: None,
            prepared_history: BTreeMap::new(),
            learner_history: BTreeMap::new(),
        }
    }

    pub fn instance(&self) -> Instance {
        self.instance
    }

    pub fn prepared_ballot(&self) -> Ballot {
        self.prepared_ballot
    }

    pub fn accepted_ballot(&self) -> Ballot {
        self.accepted_ballot
    }

    pub fn accepted_value(&self) -> &AmoCommand {
        &self.accepted_value
    }

    pub fn learned(&self) -> Option<&AmoCommand> {
        self.learned.as_ref()
    }

    pub fn is_learned(&self) -> bool {
        self.learned.is_some()
    }

    pub fn phase(&self) -> Phase {
        if self.learned.is_some() {
            Phase::Learned
        } else if self.accepted_ballot > NO_BALLOT {
            Phase::Accepting
        } else if self.proposed.is_some() {
            Phase::Proposing
        } else if self.epoch.is_some() {
            Phase::Preparing
        } else {
            Phase::Idle
        }
    }

    /// Propose `value` at the fast ballot, skipping the Prepare phase
    pub fn suggest<S: Server + ?Sized>(&mut self, server: &mut S, value: AmoCommand) {
        info!(
            "Round {}: {} suggesting {}",
            self.instance,
            server.server_name(),
            value
        );
        server.broadcast(
            Propose {
                instance: self.instance,
                ballot: FAST_BALLOT,
                value,
            }
            .into(),
        );
    }

    /// Fill the slot with the NoOp sentinel
    pub fn skip<S: Server + ?Sized>(&mut self, server: &mut S) {
        debug!("Round {}: {} skipping", self.instance, server.server_name());
        self.suggest(server, AmoCommand::noop());
    }

    /// Start a new Prepare epoch at the smallest ballot owned by this node
    /// that is above every ballot seen for this instance.
    ///
    /// Returns the chosen ballot, or `None` if this node owns no ballot in
    /// the next ownership period (it is not a cluster member).
    pub fn revoke<S: Server + ?Sized>(&mut self, server: &mut S) -> Option<Ballot> {
        let floor = self
            .prepared_ballot
            .max(self.accepted_ballot)
            .max(self.epoch.unwrap_or(NO_BALLOT));
        let period = server.num_servers().max(1) as i64;

        let Some(low) = floor.checked_add(1) else {
            warn!(
                "Round {}: ballot space exhausted at {}, not revoking",
                self.instance, floor
            );
            return None;
        };
        let high = floor.saturating_add(period);

        let ballot = (low..=high)
            .find(|&b| server.owner(b).as_ref() == Some(server.server_name()));

        let Some(ballot) = ballot else {
            warn!(
                "Round {}: {} owns no ballot above {}, not revoking",
                self.instance,
                server.server_name(),
                floor
            );
            return None;
        };

        info!("Round {}: revoking with ballot {}", self.instance, ballot);
        self.epoch = Some(ballot);
        self.proposed = None;
        self.prepared_history.clear();
        self.learner_history.clear();

        server.broadcast(
            Prepare {
                instance: self.instance,
                ballot,
            }
            .into(),
        );
        Some(ballot)
    }

    /// Route any protocol message to its handler
    pub fn handle<S: Server + ?Sized>(&mut self, server: &mut S, message: &Message, sender: &NodeId) {
        match message {
            Message::Prepare(m) => self.handle_prepare(server, m, sender),
            Message::PrepareAck(m) => self.handle_prepare_ack(server, m, sender),
            Message::Propose(m) => self.handle_propose(server, m, sender),
            Message::Accept(m) => self.handle_accept(server, m, sender),
            Message::Learn(m) => self.handle_learn(server, m, sender),
        }
    }

    /// Acceptor: promise `m.ballot` if it beats every earlier promise
    pub fn handle_prepare<S: Server + ?Sized>(&mut self, server: &mut S, m: &Prepare, sender: &NodeId) {
        debug!(
            "Round {}: PREPARE ballot {} from {}",
            self.instance, m.ballot, sender
        );

        if self.already_learned(server, sender) {
            return;
        }

        if m.ballot <= self.prepared_ballot {
            debug!(
                "Round {}: ignoring stale PREPARE {} (promised {})",
                self.instance, m.ballot, self.prepared_ballot
            );
            return;
        }

        self.prepared_ballot = m.ballot;
        server.deliver(
            PrepareAck {
                instance: self.instance,
                ballot: m.ballot,
                accepted_ballot: self.accepted_ballot,
                accepted_value: self.accepted_value.clone(),
            }
            .into(),
            sender,
        );
    }

    /// Acceptor: accept `m` unless a higher ballot was promised or accepted
    pub fn handle_propose<S: Server + ?Sized>(&mut self, server: &mut S, m: &Propose, sender: &NodeId) {
        debug!(
            "Round {}: PROPOSE ballot {} value {} from {}",
            self.instance, m.ballot, m.value, sender
        );

        if self.already_learned(server, sender) {
            return;
        }

        if m.ballot == FAST_BALLOT && m.value.is_noop() {
            // Skip fast path: learned without an accept quorum.
            self.learn(server, AmoCommand::noop());
        } else if self.prepared_ballot <= m.ballot && self.accepted_ballot < m.ballot {
            if m.ballot == FAST_BALLOT {
                server.on_suggestion(self.instance);
            }

            self.accepted_ballot = m.ballot;
            self.accepted_value = m.value.clone();

            server.deliver(
                Accept {
                    instance: self.instance,
                    ballot: m.ballot,
                    accepted_value: m.value.clone(),
                }
                .into(),
                sender,
            );
        } else {
            debug!(
                "Round {}: stale PROPOSE {} (promised {}, accepted {}), resending own accept",
                self.instance, m.ballot, self.prepared_ballot, self.accepted_ballot
            );
            server.deliver(
                Accept {
                    instance: self.instance,
                    ballot: self.accepted_ballot,
                    accepted_value: self.accepted_value.clone(),
                }
                .into(),
                sender,
            );
        }
    }

    /// Proposer: once a quorum promised `m.ballot`, propose the value of the
    /// highest ballot any of them accepted (NoOp if none did)
    pub fn handle_prepare_ack<S: Server + ?Sized>(&mut self, server: &mut S, m: &PrepareAck, sender: &NodeId) {
        debug!(
            "Round {}: PREPARE_ACK ballot {} (accepted {}) from {}",
            self.instance, m.ballot, m.accepted_ballot, sender
        );

        if self.already_learned(server, sender) {
            return;
        }

        // Only promises for the live epoch count, and each epoch proposes once.
        if self.epoch != Some(m.ballot) || self.proposed == Some(m.ballot) {
            debug!(
                "Round {}: ignoring PREPARE_ACK for ballot {} (epoch {:?})",
                self.instance, m.ballot, self.epoch
            );
            return;
        }

        self.prepared_history.insert(sender.clone(), m.clone());

        let promises: Vec<(&NodeId, &PrepareAck)> = self
            .prepared_history
            .iter()
            .filter(|(_, ack)| ack.ballot == m.ballot)
            .collect();

        if promises.len() != quorum_size(server.num_servers()) {
            return;
        }

        // Strictly-greater comparison over the sender-ordered map: on equal
        // accepted ballots the lowest sender id wins.
        let mut highest_accepted = NO_BALLOT;
        let mut value = AmoCommand::noop();
        for (_, ack) in &promises {
            if ack.accepted_ballot > highest_accepted {
                highest_accepted = ack.accepted_ballot;
                value = ack.accepted_value.clone();
            }
        }

        info!(
            "Round {}: promise quorum for ballot {}, proposing {} (from ballot {})",
            self.instance, m.ballot, value, highest_accepted
        );
        self.proposed = Some(m.ballot);

        server.broadcast(
            Propose {
                instance: self.instance,
                ballot: m.ballot,
                value,
            }
            .into(),
        );
    }

    /// Learner: once a quorum accepted the same ballot, the value is chosen
    pub fn handle_accept<S: Server + ?Sized>(&mut self, server: &mut S, m: &Accept, sender: &NodeId) {
        debug!(
            "Round {}: ACCEPT ballot {} from {}",
            self.instance, m.ballot, sender
        );

        if self.already_learned(server, sender) {
            return;
        }

        if m.ballot == FAST_BALLOT {
            server.on_accept_suggestion(self.instance);
        }

        self.learner_history.insert(sender.clone(), m.clone());

        // A resend from an acceptor that never accepted anything is no vote.
        if m.ballot == NO_BALLOT {
            return;
        }

        let votes = self
            .learner_history
            .values()
            .filter(|accept| accept.ballot == m.ballot)
            .count();

        if votes == quorum_size(server.num_servers()) {
            info!(
                "Round {}: accept quorum for ballot {}, value {} chosen",
                self.instance, m.ballot, m.accepted_value
            );
            server.broadcast(
                Learn {
                    instance: self.instance,
                    value: m.accepted_value.clone(),
                }
                .into(),
            );
        }
    }

    /// Learner: record the chosen value
    pub fn handle_learn<S: Server + ?Sized>(&mut self, server: &mut S, m: &Learn, sender: &NodeId) {
        debug!(
            "Round {}: LEARN {} from {}",
            self.instance, m.value, sender
        );
        self.learn(server, m.value.clone());
    }

    /// Set `learned` on the first decision only
    fn learn<S: Server + ?Sized>(&mut self, server: &mut S, value: AmoCommand) {
        match &self.learned {
            None => {
                info!(
                    "Round {}: {} learned {}",
                    self.instance,
                    server.server_name(),
                    value
                );
                server.on_learned(self.instance, &value);
                self.learned = Some(value);
            }
            Some(existing) if *existing == value => {}
            Some(existing) => {
                error!(
                    "Round {}: SAFETY VIOLATION, learned {} but told {}",
                    self.instance, existing, value
                );
            }
        }
    }

    /// Answer a straggler with the decided value. Returns whether the round
    /// is decided, in which case the caller must stop.
    fn already_learned<S: Server + ?Sized>(&self, server: &mut S, sender: &NodeId) -> bool {
        let Some(value) = &self.learned else {
            return false;
        };

        debug!(
            "Round {}: already learned, sending {} to {}",
            self.instance, value, sender
        );
        server.deliver(
            Learn {
                instance: self.instance,
                value: value.clone(),
            }
            .into(),
            sender,
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quorum::Membership;
    use crate::server::{Event, Outbound, Outbox};

    fn outbox(node: &str) -> Outbox {
        Outbox::new(node, Membership::new(["a", "b", "c"]))
    }

    fn id(s: &str) -> NodeId {
        s.to_string()
    }

    fn put(seq: i64) -> AmoCommand {
        AmoCommand::put(seq, "k", "v")
    }

    fn ack(ballot: Ballot, accepted_ballot: Ballot, value: AmoCommand) -> PrepareAck {
        PrepareAck {
            instance: 1,
            ballot,
            accepted_ballot,
            accepted_value: value,
        }
    }

    #[test]
    fn test_new_round_is_idle() {
        let round = Round::new(1);
        assert_eq!(round.prepared_ballot(), 0);
        assert_eq!(round.accepted_ballot(), NO_BALLOT);
        assert!(round.accepted_value().is_noop());
        assert!(round.learned().is_none());
        assert_eq!(round.phase(), Phase::Idle);
    }

    #[test]
    fn test_suggest_broadcasts_fast_ballot() {
        let mut server = outbox("a");
        let mut round = Round::new(7);
        round.suggest(&mut server, put(1));

        assert_eq!(
            server.outbound(),
            &[Outbound::Broadcast(
                Propose { instance: 7, ballot: 0, value: put(1) }.into()
            )]
        );
    }

    #[test]
    fn test_skip_suggests_noop() {
        let mut server = outbox("a");
        let mut round = Round::new(3);
        round.skip(&mut server);

        assert_eq!(
            server.outbound(),
            &[Outbound::Broadcast(
                Propose { instance: 3, ballot: 0, value: AmoCommand::noop() }.into()
            )]
        );
    }

    #[test]
    fn test_revoke_picks_smallest_owned_ballot() {
        // Sorted members a, b, c: b owns 1, 4, 7, ...
        let mut server = outbox("b");
        let mut round = Round::new(1);

        assert_eq!(round.revoke(&mut server), Some(1));
        assert_eq!(round.phase(), Phase::Preparing);
        assert_eq!(
            server.take_outbound(),
            vec![Outbound::Broadcast(Prepare { instance: 1, ballot: 1 }.into())]
        );

        // A second revoke never reuses the epoch's ballot
        assert_eq!(round.revoke(&mut server), Some(4));
    }

    #[test]
    fn test_revoke_exceeds_promised_and_accepted() {
        let mut server = outbox("b");
        let mut round = Round::new(1);
        round.handle_prepare(&mut server, &Prepare { instance: 1, ballot: 5 }, &id("c"));
        assert_eq!(round.revoke(&mut server), Some(7));

        let mut round = Round::new(1);
        round.handle_propose(&mut server, &Propose { instance: 1, ballot: 9, value: put(1) }, &id("a"));
        assert_eq!(round.revoke(&mut server), Some(10));
    }

    #[test]
    fn test_revoke_by_non_member_sends_nothing() {
        let mut server = outbox("zed");
        let mut round = Round::new(1);
        assert_eq!(round.revoke(&mut server), None);
        assert!(server.outbound().is_empty());
        assert_eq!(round.phase(), Phase::Idle);
    }

    #[test]
    fn test_revoke_at_top_of_ballot_space_gives_up() {
        let mut server = outbox("a");
        let mut round = Round::new(1);
        round.handle_prepare(&mut server, &Prepare { instance: 1, ballot: i64::MAX }, &id("b"));
        server.take_outbound();

        assert_eq!(round.revoke(&mut server), None);
        assert!(server.outbound().is_empty());
        assert_eq!(round.prepared_ballot(), i64::MAX);
    }

    #[test]
    fn test_revoke_near_top_of_ballot_space_stays_above_promise() {
        // i64::MAX mod 3 == 1, so b owns it and a owns nothing above MAX - 1
        let mut a = outbox("a");
        let mut round_a = Round::new(1);
        round_a.handle_prepare(&mut a, &Prepare { instance: 1, ballot: i64::MAX - 1 }, &id("c"));
        assert_eq!(round_a.revoke(&mut a), None);

        let mut b = outbox("b");
        let mut round_b = Round::new(1);
        round_b.handle_prepare(&mut b, &Prepare { instance: 1, ballot: i64::MAX - 1 }, &id("c"));
        assert_eq!(round_b.revoke(&mut b), Some(i64::MAX));
    }

    #[test]
    fn test_prepare_promises_higher_ballot() {
        let mut server = outbox("a");
        let mut round = Round::new(1);
        round.handle_propose(&mut server, &Propose { instance: 1, ballot: 0, value: put(1) }, &id("c"));
        server.take_outbound();

        round.handle_prepare(&mut server, &Prepare { instance: 1, ballot: 2 }, &id("c"));
        assert_eq!(round.prepared_ballot(), 2);
        assert_eq!(
            server.take_outbound(),
            vec![Outbound::Unicast {
                to: id("c"),
                message: ack(2, 0, put(1)).into(),
            }]
        );
    }

    #[test]
    fn test_stale_prepare_is_ignored() {
        let mut server = outbox("a");
        let mut round = Round::new(1);
        round.handle_prepare(&mut server, &Prepare { instance: 1, ballot: 4 }, &id("b"));
        server.take_outbound();

        round.handle_prepare(&mut server, &Prepare { instance: 1, ballot: 4 }, &id("c"));
        round.handle_prepare(&mut server, &Prepare { instance: 1, ballot: 2 }, &id("c"));
        assert_eq!(round.prepared_ballot(), 4);
        assert!(server.outbound().is_empty());
    }

    #[test]
    fn test_propose_accepts_and_fires_suggestion_hook() {
        let mut server = outbox("b");
        let mut round = Round::new(7);
        round.handle_propose(&mut server, &Propose { instance: 7, ballot: 0, value: put(1) }, &id("a"));

        assert_eq!(round.accepted_ballot(), 0);
        assert_eq!(round.accepted_value(), &put(1));
        assert_eq!(round.phase(), Phase::Accepting);
        assert_eq!(server.events(), &[Event::Suggested { instance: 7 }]);
        assert_eq!(
            server.outbound(),
            &[Outbound::Unicast {
                to: id("a"),
                message: Accept { instance: 7, ballot: 0, accepted_value: put(1) }.into(),
            }]
        );
    }

    #[test]
    fn test_stale_propose_resends_own_accept() {
        let mut server = outbox("b");
        let mut round = Round::new(1);
        round.handle_propose(&mut server, &Propose { instance: 1, ballot: 3, value: put(1) }, &id("a"));
        server.take_outbound();

        round.handle_propose(&mut server, &Propose { instance: 1, ballot: 2, value: put(2) }, &id("c"));
        assert_eq!(round.accepted_ballot(), 3);
        assert_eq!(round.accepted_value(), &put(1));
        assert_eq!(
            server.outbound(),
            &[Outbound::Unicast {
                to: id("c"),
                message: Accept { instance: 1, ballot: 3, accepted_value: put(1) }.into(),
            }]
        );
    }

    #[test]
    fn test_propose_below_promise_is_rejected() {
        let mut server = outbox("b");
        let mut round = Round::new(1);
        round.handle_prepare(&mut server, &Prepare { instance: 1, ballot: 5 }, &id("c"));
        server.take_outbound();

        round.handle_propose(&mut server, &Propose { instance: 1, ballot: 0, value: put(1) }, &id("a"));
        assert_eq!(round.accepted_ballot(), NO_BALLOT);
        assert_eq!(
            server.outbound(),
            &[Outbound::Unicast {
                to: id("a"),
                message: Accept { instance: 1, ballot: NO_BALLOT, accepted_value: AmoCommand::noop() }.into(),
            }]
        );
    }

    #[test]
    fn test_skip_fast_path_learns_without_accepts() {
        let mut server = outbox("b");
        let mut round = Round::new(4);
        round.handle_propose(
            &mut server,
            &Propose { instance: 4, ballot: 0, value: AmoCommand::noop() },
            &id("a"),
        );

        assert_eq!(round.learned(), Some(&AmoCommand::noop()));
        assert!(server.outbound().is_empty());
        assert_eq!(
            server.events(),
            &[Event::Learned { instance: 4, value: AmoCommand::noop() }]
        );
    }

    #[test]
    fn test_prepare_ack_quorum_preserves_accepted_value() {
        // A and B accepted (0, X); C never accepted. Promises from {A, C}.
        let x = put(42);
        let mut server = outbox("b");
        let mut round = Round::new(1);
        round.revoke(&mut server);
        server.take_outbound();

        round.handle_prepare_ack(&mut server, &ack(1, 0, x.clone()), &id("a"));
        assert!(server.outbound().is_empty());
        round.handle_prepare_ack(&mut server, &ack(1, NO_BALLOT, AmoCommand::noop()), &id("c"));

        assert_eq!(
            server.take_outbound(),
            vec![Outbound::Broadcast(Propose { instance: 1, ballot: 1, value: x }.into())]
        );
        assert_eq!(round.phase(), Phase::Proposing);
    }

    #[test]
    fn test_prepare_ack_quorum_without_acceptances_proposes_noop() {
        let mut server = outbox("b");
        let mut round = Round::new(1);
        round.revoke(&mut server);
        server.take_outbound();
        round.handle_prepare_ack(&mut server, &ack(1, NO_BALLOT, AmoCommand::noop()), &id("a"));
        round.handle_prepare_ack(&mut server, &ack(1, NO_BALLOT, AmoCommand::noop()), &id("b"));

        assert_eq!(
            server.outbound(),
            &[Outbound::Broadcast(
                Propose { instance: 1, ballot: 1, value: AmoCommand::noop() }.into()
            )]
        );
    }

    #[test]
    fn test_prepare_ack_picks_highest_ballot() {
        // a owns 0, 5, 10, ...
        let mut server = Outbox::new("a", Membership::new(["a", "b", "c", "d", "e"]));
        let mut round = Round::new(1);
        round.handle_prepare(&mut server, &Prepare { instance: 1, ballot: 9 }, &id("e"));
        assert_eq!(round.revoke(&mut server), Some(10));
        server.take_outbound();

        round.handle_prepare_ack(&mut server, &ack(10, 3, put(3)), &id("c"));
        round.handle_prepare_ack(&mut server, &ack(10, 7, put(7)), &id("d"));
        round.handle_prepare_ack(&mut server, &ack(10, 5, put(5)), &id("b"));

        assert_eq!(
            server.outbound(),
            &[Outbound::Broadcast(Propose { instance: 1, ballot: 10, value: put(7) }.into())]
        );
    }

    #[test]
    fn test_prepare_ack_tie_breaks_on_lowest_sender() {
        let mut server = outbox("a");
        let mut round = Round::new(1);
        assert_eq!(round.revoke(&mut server), Some(3));
        server.take_outbound();
        round.handle_prepare_ack(&mut server, &ack(3, 2, put(2)), &id("c"));
        round.handle_prepare_ack(&mut server, &ack(3, 2, put(9)), &id("b"));

        assert_eq!(
            server.outbound(),
            &[Outbound::Broadcast(Propose { instance: 1, ballot: 3, value: put(9) }.into())]
        );
    }

    #[test]
    fn test_duplicate_prepare_ack_does_not_inflate_quorum() {
        let mut server = outbox("b");
        let mut round = Round::new(1);
        round.revoke(&mut server);
        server.take_outbound();
        round.handle_prepare_ack(&mut server, &ack(1, NO_BALLOT, AmoCommand::noop()), &id("a"));
        round.handle_prepare_ack(&mut server, &ack(1, NO_BALLOT, AmoCommand::noop()), &id("a"));
        assert!(server.outbound().is_empty());
    }

    #[test]
    fn test_prepare_acks_for_other_ballots_do_not_count() {
        let mut server = outbox("b");
        let mut round = Round::new(1);
        round.revoke(&mut server);
        server.take_outbound();
        round.handle_prepare_ack(&mut server, &ack(1, NO_BALLOT, AmoCommand::noop()), &id("a"));
        round.handle_prepare_ack(&mut server, &ack(4, NO_BALLOT, AmoCommand::noop()), &id("c"));
        assert!(server.outbound().is_empty());
    }

    #[test]
    fn test_prepare_acks_from_superseded_epoch_are_ignored() {
        // Late promises for ballot 1 must not form a quorum after revoking to 4
        let mut server = outbox("b");
        let mut round = Round::new(1);
        assert_eq!(round.revoke(&mut server), Some(1));
        assert_eq!(round.revoke(&mut server), Some(4));
        server.take_outbound();

        round.handle_prepare_ack(&mut server, &ack(1, NO_BALLOT, AmoCommand::noop()), &id("a"));
        round.handle_prepare_ack(&mut server, &ack(1, NO_BALLOT, AmoCommand::noop()), &id("c"));
        assert!(server.outbound().is_empty());
    }

    #[test]
    fn test_epoch_proposes_only_once() {
        let mut server = outbox("b");
        let mut round = Round::new(1);
        round.revoke(&mut server);
        server.take_outbound();

        round.handle_prepare_ack(&mut server, &ack(1, 0, put(1)), &id("a"));
        round.handle_prepare_ack(&mut server, &ack(1, NO_BALLOT, AmoCommand::noop()), &id("c"));
        assert_eq!(server.take_outbound().len(), 1);

        round.handle_prepare_ack(&mut server, &ack(1, NO_BALLOT, AmoCommand::noop()), &id("c"));
        round.handle_prepare_ack(&mut server, &ack(1, NO_BALLOT, AmoCommand::noop()), &id("b"));
        assert!(server.outbound().is_empty());
    }

    #[test]
    fn test_accept_quorum_broadcasts_learn_once() {
        let mut server = outbox("a");
        let mut round = Round::new(7);
        let accept = Accept { instance: 7, ballot: 0, accepted_value: put(1) };

        round.handle_accept(&mut server, &accept, &id("b"));
        assert!(server.outbound().is_empty());
        round.handle_accept(&mut server, &accept, &id("c"));
        round.handle_accept(&mut server, &accept, &id("a"));

        assert_eq!(
            server.outbound(),
            &[Outbound::Broadcast(Learn { instance: 7, value: put(1) }.into())]
        );
        assert_eq!(
            server.events().iter().filter(|e| matches!(e, Event::AcceptSuggested { .. })).count(),
            3
        );
    }

    #[test]
    fn test_duplicate_accept_does_not_inflate_quorum() {
        let mut server = outbox("a");
        let mut round = Round::new(1);
        let accept = Accept { instance: 1, ballot: 2, accepted_value: put(1) };
        round.handle_accept(&mut server, &accept, &id("b"));
        round.handle_accept(&mut server, &accept, &id("b"));
        assert!(server.outbound().is_empty());
    }

    #[test]
    fn test_accepts_of_mixed_ballots_are_not_a_quorum() {
        let mut server = outbox("a");
        let mut round = Round::new(1);
        round.handle_accept(&mut server, &Accept { instance: 1, ballot: 0, accepted_value: put(1) }, &id("b"));
        round.handle_accept(&mut server, &Accept { instance: 1, ballot: 4, accepted_value: put(2) }, &id("c"));
        round.handle_accept(
            &mut server,
            &Accept { instance: 1, ballot: NO_BALLOT, accepted_value: AmoCommand::noop() },
            &id("a"),
        );
        assert!(server.outbound().is_empty());
    }

    #[test]
    fn test_learn_fires_callback_once() {
        let mut server = outbox("a");
        let mut round = Round::new(2);
        let learn = Learn { instance: 2, value: put(1) };
        round.handle_learn(&mut server, &learn, &id("b"));
        round.handle_learn(&mut server, &learn, &id("c"));

        assert_eq!(round.learned(), Some(&put(1)));
        assert_eq!(round.phase(), Phase::Learned);
        assert_eq!(server.learned().count(), 1);
    }

    #[test]
    fn test_conflicting_learn_never_overwrites() {
        let mut server = outbox("a");
        let mut round = Round::new(2);
        round.handle_learn(&mut server, &Learn { instance: 2, value: put(1) }, &id("b"));
        round.handle_learn(&mut server, &Learn { instance: 2, value: put(2) }, &id("c"));

        assert_eq!(round.learned(), Some(&put(1)));
        assert_eq!(server.learned().count(), 1);
    }

    #[test]
    fn test_learned_round_answers_stragglers_only() {
        let mut server = outbox("a");
        let mut round = Round::new(5);
        round.handle_learn(&mut server, &Learn { instance: 5, value: put(1) }, &id("b"));
        server.take_events();

        let messages: Vec<Message> = vec![
            Prepare { instance: 5, ballot: 9 }.into(),
            Propose { instance: 5, ballot: 9, value: put(2) }.into(),
            PrepareAck {
                instance: 5,
                ballot: 9,
                accepted_ballot: NO_BALLOT,
                accepted_value: AmoCommand::noop(),
            }
            .into(),
            Accept { instance: 5, ballot: 9, accepted_value: put(2) }.into(),
        ];

        for message in &messages {
            let before = (round.prepared_ballot(), round.accepted_ballot(), round.accepted_value().clone());
            round.handle(&mut server, message, &id("c"));

            assert_eq!(
                server.take_outbound(),
                vec![Outbound::Unicast {
                    to: id("c"),
                    message: Learn { instance: 5, value: put(1) }.into(),
                }]
            );
            assert_eq!(
                (round.prepared_ballot(), round.accepted_ballot(), round.accepted_value().clone()),
                before
            );
            assert!(server.events().is_empty());
        }
    }
}
