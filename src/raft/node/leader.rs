use super::super::{Envelope, Index, LogEntry, Message, HEARTBEAT_INTERVAL};
use super::{rand_election_timeout, Follower, Node, NodeID, RawNode, Role, Term, Ticks};
use crate::error::Result;

use ::log::{debug, info};
use itertools::Itertools as _;
use std::collections::{HashMap, HashSet};

/// A leader serves client requests and replicates the log to followers.
#[derive(Clone, Debug, PartialEq)]
pub struct Leader {
    /// The highest log index known to be replicated on each peer. Appends to
    /// a peer target the suffix above this index; it regresses one step per
    /// rejected append until the peer's log matches.
    pub(super) match_index: HashMap<NodeID, Index>,
    /// Request ids of client puts awaiting commit, answered exactly once.
    pub(super) pending_puts: HashSet<String>,
    /// Ticks since the last heartbeat.
    pub(super) heartbeat_ticks: Ticks,
}

impl Leader {
    /// Creates a new leader role. Replication for every peer starts at our
    /// commit index.
    pub fn new(peers: Vec<NodeID>, commit_index: Index) -> Self {
        let match_index = peers.into_iter().map(|peer| (peer, commit_index)).collect();
        Self { match_index, pending_puts: HashSet::new(), heartbeat_ticks: 0 }
    }
}

impl Role for Leader {
    fn leader_hint(&self, id: &NodeID) -> Option<NodeID> {
        Some(id.clone())
    }
}

impl RawNode<Leader> {
    /// Steps down into a leaderless follower at the given term.
    fn into_follower(mut self, term: Term) -> Result<RawNode<Follower>> {
        debug_assert!(term >= self.term, "term regression {} -> {}", self.term, term);
        if term > self.term {
            info!("Discovered new term {}, stepping down", term);
        } else {
            info!("Stepping down in term {}", term);
        }
        self.term = term;
        let role = Follower::new(None, None, rand_election_timeout());
        Ok(self.into_role(role))
    }

    /// Processes a message.
    pub fn step(mut self, msg: Envelope) -> Result<Node> {
        // Any higher term demotes us. Vote requests and appends are then
        // processed by the follower.
        match msg.message {
            Message::Vote { term, .. } | Message::Append { term, .. } if term > self.term => {
                return self.into_follower(term)?.step(msg);
            }
            Message::VoteAck { term, .. } | Message::Ack { term, .. } if term > self.term => {
                return Ok(self.into_follower(term)?.into());
            }
            _ => {}
        }

        let Envelope { src, message, .. } = msg;
        match message {
            message @ (Message::Get { .. } | Message::Put { .. }) => {
                self.client_request(src, message)?;
            }

            Message::Ack { term: _, success, confirmed_index } => {
                // An ack past our log confirms appends from a newer leader.
                if confirmed_index > self.log.last_index() {
                    let term = self.term;
                    return Ok(self.into_follower(term)?.into());
                }
                if success {
                    self.role.match_index.insert(src, confirmed_index);
                    self.maybe_commit(confirmed_index)?;
                } else {
                    // The peer's log diverges; probe one entry deeper.
                    let match_index = self.role.match_index.entry(src.clone()).or_insert(-1);
                    *match_index = (*match_index - 1).max(-1);
                    self.replicate(&src)?;
                }
            }

            // A candidate in our own term; deny.
            Message::Vote { .. } => {
                self.send(&src, Message::VoteAck { term: self.term, granted: false })?;
            }

            message => debug!("Dropping {:?} from {}", message, src),
        }
        Ok(self.into())
    }

    /// Serves a client request: gets answer immediately from committed state,
    /// puts append to the log and are answered when they commit.
    fn client_request(&mut self, src: NodeID, message: Message) -> Result<()> {
        match message {
            Message::Get { key, mid } => {
                let value = self.state.get(&key).cloned().unwrap_or_default();
                self.send(&src, Message::Ok { mid, value: Some(value) })
            }
            Message::Put { key, value, mid } => {
                debug!("Appending {}={} for {} in term {}", key, value, src, self.term);
                let index = self.log.append(LogEntry {
                    term: self.term,
                    key,
                    value,
                    mid: mid.clone(),
                    putter: src,
                });
                self.role.pending_puts.insert(mid);
                for peer in self.peers.iter().sorted() {
                    self.replicate(peer)?;
                }
                if self.peers.is_empty() {
                    self.maybe_commit(index)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Serves client requests deferred before we were elected.
    pub(super) fn flush_queue(&mut self) -> Result<()> {
        for msg in self.take_queue() {
            self.client_request(msg.src, msg.message)?;
        }
        Ok(())
    }

    /// Sends a peer the log suffix above its match index.
    fn replicate(&self, peer: &NodeID) -> Result<()> {
        let prev_log_index = self.role.match_index.get(peer).copied().unwrap_or(-1);
        let prev_log_term = self.log.term_at(prev_log_index).unwrap_or(self.term);
        let entries = self.log.suffix(prev_log_index + 1);
        debug!("Replicating {} entries above {} to {}", entries.len(), prev_log_index, peer);
        self.send(
            peer,
            Message::Append {
                term: self.term,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit: self.log.commit_index(),
            },
        )
    }

    /// Sends an empty append to every peer, asserting leadership and
    /// propagating the commit index.
    pub(super) fn heartbeat(&self) -> Result<()> {
        for peer in self.peers.iter().sorted() {
            let prev_log_index = self.role.match_index.get(peer).copied().unwrap_or(-1);
            let prev_log_term = self.log.term_at(prev_log_index).unwrap_or(self.term);
            self.send(
                peer,
                Message::Append {
                    term: self.term,
                    prev_log_index,
                    prev_log_term,
                    entries: Vec::new(),
                    leader_commit: self.log.commit_index(),
                },
            )?;
        }
        Ok(())
    }

    /// Advances the commit index to the given index if a strict majority of
    /// the cluster holds the entry, applies the newly committed entries, and
    /// answers their pending puts. Entries from prior terms never commit by
    /// replica count alone (see figure 8 in the Raft paper); they commit
    /// implicitly once an entry of the current term does.
    fn maybe_commit(&mut self, index: Index) -> Result<()> {
        if index <= self.log.commit_index() {
            return Ok(());
        }
        let replicas = 1 + self.role.match_index.values().filter(|&&m| m >= index).count();
        if !self.is_majority(replicas) {
            return Ok(());
        }
        if self.log.term_at(index) != Some(self.term) {
            debug!("Delaying commit of prior-term entry {}", index);
            return Ok(());
        }
        info!("Committing up to {} in term {}", index, self.term);
        for (applied, entry) in self.log.commit(index) {
            self.state.apply(applied, &entry);
            if self.role.pending_puts.remove(&entry.mid) {
                self.send(&entry.putter, Message::Ok { mid: entry.mid.clone(), value: None })?;
            }
        }
        // Heartbeat immediately so followers observe the new commit index.
        self.heartbeat()
    }

    /// Processes a logical clock tick.
    pub fn tick(mut self) -> Result<Node> {
        self.role.heartbeat_ticks += 1;
        if self.role.heartbeat_ticks >= HEARTBEAT_INTERVAL {
            self.role.heartbeat_ticks = 0;
            self.heartbeat()?;
        }
        Ok(self.into())
    }
}
