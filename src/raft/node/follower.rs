use super::super::{Envelope, Index, LogEntry, Message, BROADCAST};
use super::{rand_election_timeout, Candidate, Node, NodeID, RawNode, Role, Term, Ticks};
use crate::error::Result;

use ::log::{debug, info};

/// A follower replicates state from a leader, and redirects or defers client
/// requests.
#[derive(Clone, Debug, PartialEq)]
pub struct Follower {
    /// The leader, or None if just initialized.
    pub(super) leader: Option<NodeID>,
    /// The node we voted for in the current term, if any.
    pub(super) voted_for: Option<NodeID>,
    /// Ticks since the last leader contact or granted vote.
    pub(super) leader_seen: Ticks,
    /// The randomized timeout before triggering an election.
    pub(super) election_timeout: Ticks,
}

impl Follower {
    /// Creates a new follower role.
    pub fn new(leader: Option<NodeID>, voted_for: Option<NodeID>, election_timeout: Ticks) -> Self {
        Self { leader, voted_for, leader_seen: 0, election_timeout }
    }
}

impl Role for Follower {
    fn leader_hint(&self, _id: &NodeID) -> Option<NodeID> {
        self.leader.clone()
    }
}

impl RawNode<Follower> {
    /// Transitions the follower into a candidate and starts an election. Any
    /// deferred requests are dropped; their clients retry.
    fn into_candidate(mut self) -> Result<RawNode<Candidate>> {
        self.queue.clear();
        let mut node = self.into_role(Candidate::new());
        node.campaign()?;
        Ok(node)
    }

    /// Steps into a higher term observed in a peer message. The vote resets,
    /// and any previously assumed leader is stale.
    fn observe_term(&mut self, term: Term) {
        debug_assert!(term > self.term, "term regression {} -> {}", self.term, term);
        info!("Discovered new term {}", term);
        self.term = term;
        self.role = Follower::new(None, None, rand_election_timeout());
    }

    /// Processes a message.
    pub fn step(mut self, msg: Envelope) -> Result<Node> {
        let Envelope { src, message, .. } = msg;
        match message {
            Message::Append { term, prev_log_index, prev_log_term, entries, leader_commit } => {
                self.append_entries(&src, term, prev_log_index, prev_log_term, entries, leader_commit)?;
            }

            Message::Vote { term, candidate_id, last_log_index, last_log_term } => {
                self.solicit_vote(&src, term, &candidate_id, last_log_index, last_log_term)?;
            }

            message @ (Message::Get { .. } | Message::Put { .. }) => {
                self.client_request(src, message)?;
            }

            Message::VoteAck { term, .. } | Message::Ack { term, .. } if term > self.term => {
                self.observe_term(term);
            }

            message => debug!("Dropping {:?} from {}", message, src),
        }
        Ok(self.into())
    }

    /// Processes an append from a leader: adopts the sender, reconciles any
    /// entries into the log, commits what the leader says is safe, and acks.
    /// Empty-entry heartbeats advance the commit index but are not acked.
    fn append_entries(
        &mut self,
        src: &NodeID,
        term: Term,
        prev_log_index: Index,
        prev_log_term: Term,
        entries: Vec<LogEntry>,
        leader_commit: Index,
    ) -> Result<()> {
        // Any leader contact counts as activity, even from a stale term.
        self.role.leader_seen = 0;

        if term >= self.term {
            if self.role.leader.as_ref() != Some(src) {
                info!("Following leader {} in term {}", src, term);
            }
            self.term = term;
            self.role.leader = Some(src.clone());
            self.role.voted_for = None;
            self.flush_queue()?;
        }

        let heartbeat = entries.is_empty();
        let consistent = prev_log_index == -1 || self.log.has(prev_log_index, prev_log_term);
        let success = term >= self.term && consistent;

        if success {
            // The log matches the leader through prev and, once spliced,
            // through the last sent entry. Only that verified prefix may
            // commit: any tail beyond it could still diverge.
            let verified = prev_log_index + entries.len() as Index;
            if !heartbeat {
                self.log.splice(prev_log_index + 1, entries);
            }
            for (index, entry) in self.log.commit(leader_commit.min(verified)) {
                self.state.apply(index, &entry);
            }
        } else {
            debug!("Rejecting append at {} from {}", prev_log_index, src);
        }

        if heartbeat {
            return Ok(());
        }
        self.send(
            src,
            Message::Ack { term: self.term, success, confirmed_index: self.log.last_index() },
        )
    }

    /// Processes a vote request. Grants at most one vote per term, to a
    /// candidate whose log is at least as up-to-date as ours.
    fn solicit_vote(
        &mut self,
        src: &NodeID,
        term: Term,
        candidate: &NodeID,
        last_log_index: Index,
        last_log_term: Term,
    ) -> Result<()> {
        if term > self.term {
            self.observe_term(term);
        }
        let can_vote =
            self.role.voted_for.is_none() || self.role.voted_for.as_ref() == Some(candidate);
        let granted =
            can_vote && term >= self.term && self.log.up_to_date(last_log_index, last_log_term);
        if granted {
            info!("Voting for {} in term {} election", candidate, self.term);
            self.role.voted_for = Some(candidate.clone());
            self.role.leader_seen = 0;
        }
        self.send(src, Message::VoteAck { term: self.term, granted })
    }

    /// Routes a client request: redirect to a known leader, otherwise defer
    /// until one emerges.
    fn client_request(&mut self, src: NodeID, message: Message) -> Result<()> {
        if self.role.leader.is_some() {
            let mid = match &message {
                Message::Get { mid, .. } | Message::Put { mid, .. } => mid.clone(),
                _ => return Ok(()),
            };
            self.send(&src, Message::Redirect { mid })
        } else {
            self.defer(Envelope {
                src,
                dst: self.id.clone(),
                leader: BROADCAST.to_owned(),
                message,
            });
            Ok(())
        }
    }

    /// Re-dispatches deferred client requests now that a leader is known.
    fn flush_queue(&mut self) -> Result<()> {
        for msg in self.take_queue() {
            self.client_request(msg.src, msg.message)?;
        }
        Ok(())
    }

    /// Processes a logical clock tick.
    pub fn tick(mut self) -> Result<Node> {
        self.role.leader_seen += 1;
        if self.role.leader_seen >= self.role.election_timeout {
            return Ok(self.into_candidate()?.into());
        }
        Ok(self.into())
    }
}
