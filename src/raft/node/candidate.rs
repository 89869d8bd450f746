use super::super::{Envelope, Message, BROADCAST, ELECTION_TIMEOUT_CANDIDATE};
use super::{rand_election_timeout, Follower, Leader, Node, NodeID, RawNode, Role, Term, Ticks};
use crate::error::Result;

use ::log::{debug, info};
use std::collections::HashSet;

/// A candidate is campaigning to become leader.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    /// Votes received in our favor, by voter, including ourself. Keyed by
    /// voter so that a duplicated grant counts once.
    pub(super) votes: HashSet<NodeID>,
    /// Ticks elapsed since the election started.
    pub(super) election_duration: Ticks,
}

impl Candidate {
    /// Creates a new candidate role.
    pub fn new() -> Self {
        Self { votes: HashSet::new(), election_duration: 0 }
    }
}

impl Default for Candidate {
    fn default() -> Self {
        Self::new()
    }
}

impl Role for Candidate {
    fn leader_hint(&self, _id: &NodeID) -> Option<NodeID> {
        None
    }
}

impl RawNode<Candidate> {
    /// Transitions the candidate into a follower. Either we lost the election
    /// to the given leader, or we discovered a higher term and step into it
    /// leaderless.
    fn into_follower(mut self, term: Term, leader: Option<NodeID>) -> Result<RawNode<Follower>> {
        debug_assert!(term >= self.term, "term regression {} -> {}", self.term, term);
        match &leader {
            Some(leader) => info!("Lost election, following leader {} in term {}", leader, term),
            None => info!("Discovered new term {}", term),
        }
        self.term = term;
        let role = Follower::new(leader, None, rand_election_timeout());
        Ok(self.into_role(role))
    }

    /// Transitions the candidate into a leader after winning the election.
    /// Serves any deferred requests, then asserts leadership with an initial
    /// empty append.
    fn into_leader(self) -> Result<RawNode<Leader>> {
        info!("Won election for term {}, becoming leader", self.term);
        let peers = self.peers.clone();
        let commit_index = self.log.commit_index();
        let mut node = self.into_role(Leader::new(peers, commit_index));
        node.flush_queue()?;
        node.heartbeat()?;
        Ok(node)
    }

    /// Processes a message.
    pub fn step(mut self, msg: Envelope) -> Result<Node> {
        // An append at our term or above means we lost the election; follow
        // the sender and let the follower process the append.
        if let Message::Append { term, .. } = msg.message {
            if term >= self.term {
                return self.into_follower(term, Some(msg.src.clone()))?.step(msg);
            }
        }
        // A vote request from a higher term is evaluated in that term, as a
        // leaderless follower.
        if let Message::Vote { term, .. } = msg.message {
            if term > self.term {
                return self.into_follower(term, None)?.step(msg);
            }
        }

        let Envelope { src, message, .. } = msg;
        match message {
            Message::VoteAck { term, granted } => {
                if term > self.term {
                    return Ok(self.into_follower(term, None)?.into());
                }
                // A grant from a previous election says nothing about this
                // term.
                if term < self.term {
                    debug!("Dropping stale vote ack from {}", src);
                } else if granted {
                    self.role.votes.insert(src.clone());
                    debug!(
                        "Vote tally in term {}: {} of {}",
                        self.term,
                        self.role.votes.len(),
                        self.cluster_size()
                    );
                    if self.is_majority(self.role.votes.len()) {
                        return Ok(self.into_leader()?.into());
                    }
                }
            }

            // A candidate in our own term; we already voted for ourself.
            Message::Vote { .. } => {
                self.send(&src, Message::VoteAck { term: self.term, granted: false })?;
            }

            Message::Ack { term, .. } if term > self.term => {
                return Ok(self.into_follower(term, None)?.into());
            }

            // No leader known while campaigning; hold the request.
            message @ (Message::Get { .. } | Message::Put { .. }) => {
                self.defer(Envelope {
                    src,
                    dst: self.id.clone(),
                    leader: BROADCAST.to_owned(),
                    message,
                });
            }

            message => debug!("Dropping {:?} from {}", message, src),
        }
        Ok(self.into())
    }

    /// Processes a logical clock tick.
    pub fn tick(mut self) -> Result<Node> {
        self.role.election_duration += 1;
        if self.role.election_duration >= ELECTION_TIMEOUT_CANDIDATE {
            self.campaign()?;
        }
        Ok(self.into())
    }

    /// Campaigns for leadership: increments the term, votes for ourself, and
    /// solicits votes from all peers.
    pub(super) fn campaign(&mut self) -> Result<()> {
        self.term += 1;
        self.role = Candidate::new();
        self.role.votes.insert(self.id.clone()); // vote for ourself
        info!("Starting election for term {}", self.term);
        let (last_log_index, last_log_term) = self.last_log_position();
        self.broadcast(Message::Vote {
            term: self.term,
            candidate_id: self.id.clone(),
            last_log_index,
            last_log_term,
        })
    }
}
