mod candidate;
mod follower;
mod leader;

use super::{Envelope, Index, KvStore, Log, Message, ELECTION_TIMEOUT_RANGE, REQUEST_QUEUE_CAPACITY};
use crate::error::Result;
use candidate::Candidate;
use follower::Follower;
use leader::Leader;

use ::log::{debug, warn};
use rand::Rng as _;
use std::collections::VecDeque;

/// A replica ID.
pub type NodeID = String;

/// A leader term.
pub type Term = u64;

/// A logical clock interval as a number of ticks.
pub type Ticks = u8;

/// Generates a randomized election timeout.
fn rand_election_timeout() -> Ticks {
    rand::thread_rng().gen_range(ELECTION_TIMEOUT_RANGE)
}

/// A replica, with a dynamic role. The node is driven synchronously by
/// processing inbound messages via step() or by advancing time via tick().
/// These methods consume the current node and return a new one with a
/// possibly different role. Outbound messages are sent via the given node_tx
/// channel, and must be delivered by the caller.
///
/// This enum wraps the RawNode<Role> types, which implement the actual node
/// logic. It exists for ergonomic use across role transitions, i.e.
/// node = node.step()?.
pub enum Node {
    Candidate(RawNode<Candidate>),
    Follower(RawNode<Follower>),
    Leader(RawNode<Leader>),
}

impl Node {
    /// Creates a new replica, starting as a leaderless follower at term 0
    /// with an empty log.
    pub fn new(id: NodeID, peers: Vec<NodeID>, node_tx: crossbeam::channel::Sender<Envelope>) -> Self {
        RawNode {
            id,
            peers,
            term: 0,
            log: Log::new(),
            state: KvStore::new(),
            queue: VecDeque::new(),
            node_tx,
            role: Follower::new(None, None, rand_election_timeout()),
        }
        .into()
    }

    /// Returns the node ID.
    pub fn id(&self) -> &NodeID {
        match self {
            Node::Candidate(n) => &n.id,
            Node::Follower(n) => &n.id,
            Node::Leader(n) => &n.id,
        }
    }

    /// Returns the node term.
    pub fn term(&self) -> Term {
        match self {
            Node::Candidate(n) => n.term,
            Node::Follower(n) => n.term,
            Node::Leader(n) => n.term,
        }
    }

    /// Returns the node's log, for inspection.
    pub fn log(&self) -> &Log {
        match self {
            Node::Candidate(n) => &n.log,
            Node::Follower(n) => &n.log,
            Node::Leader(n) => &n.log,
        }
    }

    /// Returns the node's key-value state machine, for inspection.
    pub fn state(&self) -> &KvStore {
        match self {
            Node::Candidate(n) => &n.state,
            Node::Follower(n) => &n.state,
            Node::Leader(n) => &n.state,
        }
    }

    /// Processes an inbound message.
    pub fn step(self, msg: Envelope) -> Result<Self> {
        debug!("Stepping {:?}", msg);
        match self {
            Node::Candidate(n) => n.step(msg),
            Node::Follower(n) => n.step(msg),
            Node::Leader(n) => n.step(msg),
        }
    }

    /// Moves time forward by a tick.
    pub fn tick(self) -> Result<Self> {
        match self {
            Node::Candidate(n) => n.tick(),
            Node::Follower(n) => n.tick(),
            Node::Leader(n) => n.tick(),
        }
    }
}

impl From<RawNode<Candidate>> for Node {
    fn from(n: RawNode<Candidate>) -> Self {
        Node::Candidate(n)
    }
}

impl From<RawNode<Follower>> for Node {
    fn from(n: RawNode<Follower>) -> Self {
        Node::Follower(n)
    }
}

impl From<RawNode<Leader>> for Node {
    fn from(n: RawNode<Leader>) -> Self {
        Node::Leader(n)
    }
}

/// A role: leader, follower, or candidate.
pub trait Role: Clone + std::fmt::Debug + PartialEq {
    /// The leader this role advertises in outbound messages, if known.
    fn leader_hint(&self, id: &NodeID) -> Option<NodeID>;
}

/// A replica with the concrete role R.
///
/// This implements the typestate pattern, where individual node states
/// (roles) are encoded as RawNode<Role>.
pub struct RawNode<R: Role = Follower> {
    id: NodeID,
    peers: Vec<NodeID>,
    term: Term,
    log: Log,
    state: KvStore,
    /// Client requests deferred while no leader is known, in arrival order.
    queue: VecDeque<Envelope>,
    node_tx: crossbeam::channel::Sender<Envelope>,
    role: R,
}

impl<R: Role> RawNode<R> {
    /// Helper for role transitions.
    fn into_role<T: Role>(self, role: T) -> RawNode<T> {
        RawNode {
            id: self.id,
            peers: self.peers,
            term: self.term,
            log: self.log,
            state: self.state,
            queue: self.queue,
            node_tx: self.node_tx,
            role,
        }
    }

    /// Returns the size of the cluster.
    fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    /// Whether the given count is a strict majority of the cluster.
    fn is_majority(&self, count: usize) -> bool {
        count > self.cluster_size() / 2
    }

    /// Sends a message to the given recipient.
    fn send(&self, to: &NodeID, message: Message) -> Result<()> {
        let msg = Envelope {
            src: self.id.clone(),
            dst: to.clone(),
            leader: self.role.leader_hint(&self.id).unwrap_or_else(|| super::BROADCAST.to_owned()),
            message,
        };
        debug!("Sending {:?}", msg);
        Ok(self.node_tx.send(msg)?)
    }

    /// Sends a message to the broadcast address.
    fn broadcast(&self, message: Message) -> Result<()> {
        self.send(&super::BROADCAST.to_owned(), message)
    }

    /// Defers a client request until a leader is known. The queue is bounded;
    /// overflow is dropped and left to client retries.
    fn defer(&mut self, msg: Envelope) {
        if self.queue.len() >= REQUEST_QUEUE_CAPACITY {
            warn!("Request queue full, dropping request from {}", msg.src);
            return;
        }
        self.queue.push_back(msg);
    }

    /// Drains the deferred request queue for re-dispatch.
    fn take_queue(&mut self) -> Vec<Envelope> {
        self.queue.drain(..).collect()
    }

    /// The (last_log_index, last_log_term) pair advertised in vote requests:
    /// the last entry's position, or the current term at index -1 if the log
    /// is empty.
    fn last_log_position(&self) -> (Index, Term) {
        match self.log.entries().last() {
            Some(entry) => (self.log.last_index(), entry.term),
            None => (-1, self.term),
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::super::{LogEntry, BROADCAST};
    use super::*;
    use crossbeam::channel::Receiver;
    use pretty_assertions::assert_eq;

    /// Asserts that the given messages were sent, in order.
    #[track_caller]
    pub fn assert_messages(rx: &Receiver<Envelope>, msgs: Vec<Envelope>) {
        let mut actual = Vec::new();
        while let Ok(message) = rx.try_recv() {
            actual.push(message)
        }
        assert_eq!(msgs, actual);
    }

    /// Builds an envelope from a replica, for test expectations.
    pub fn envelope(src: &str, dst: &str, leader: &str, message: Message) -> Envelope {
        Envelope { src: src.into(), dst: dst.into(), leader: leader.into(), message }
    }

    /// Builds a log entry with derived bookkeeping fields.
    pub fn entry(term: Term, key: &str, value: &str) -> LogEntry {
        LogEntry {
            term,
            key: key.into(),
            value: value.into(),
            mid: format!("M-{}-{}", key, value),
            putter: "C1".into(),
        }
    }

    pub struct NodeAsserter<'a> {
        node: &'a Node,
    }

    impl<'a> NodeAsserter<'a> {
        pub fn new(node: &'a Node) -> Self {
            Self { node }
        }

        #[track_caller]
        pub fn term(self, term: Term) -> Self {
            assert_eq!(term, self.node.term(), "unexpected term");
            self
        }

        #[track_caller]
        pub fn committed(self, index: Index) -> Self {
            assert_eq!(index, self.node.log().commit_index(), "unexpected commit index");
            self
        }

        #[track_caller]
        pub fn applied(self, index: Index) -> Self {
            assert_eq!(index, self.node.state().applied_index(), "unexpected applied index");
            self
        }

        #[track_caller]
        pub fn last(self, index: Index) -> Self {
            assert_eq!(index, self.node.log().last_index(), "unexpected last index");
            self
        }

        #[track_caller]
        pub fn entries(self, entries: Vec<LogEntry>) -> Self {
            assert_eq!(entries, self.node.log().entries().to_vec());
            self
        }

        #[allow(clippy::wrong_self_convention)]
        #[track_caller]
        pub fn is_follower(self) -> Self {
            match self.node {
                Node::Follower(_) => self,
                Node::Candidate(_) => panic!("expected follower, got candidate"),
                Node::Leader(_) => panic!("expected follower, got leader"),
            }
        }

        #[allow(clippy::wrong_self_convention)]
        #[track_caller]
        pub fn is_candidate(self) -> Self {
            match self.node {
                Node::Candidate(_) => self,
                Node::Follower(_) => panic!("expected candidate, got follower"),
                Node::Leader(_) => panic!("expected candidate, got leader"),
            }
        }

        #[allow(clippy::wrong_self_convention)]
        #[track_caller]
        pub fn is_leader(self) -> Self {
            match self.node {
                Node::Leader(_) => self,
                Node::Follower(_) => panic!("expected leader, got follower"),
                Node::Candidate(_) => panic!("expected leader, got candidate"),
            }
        }

        #[track_caller]
        pub fn leader(self, leader: Option<&str>) -> Self {
            assert_eq!(
                leader.map(String::from),
                match self.node {
                    Node::Follower(n) => n.role.leader.clone(),
                    Node::Candidate(_) => None,
                    Node::Leader(n) => Some(n.id.clone()),
                },
                "unexpected leader",
            );
            self
        }

        #[track_caller]
        pub fn voted_for(self, voted_for: Option<&str>) -> Self {
            assert_eq!(
                voted_for.map(String::from),
                match self.node {
                    Node::Follower(n) => n.role.voted_for.clone(),
                    Node::Candidate(n) => Some(n.id.clone()),
                    Node::Leader(n) => Some(n.id.clone()),
                },
                "unexpected voted_for",
            );
            self
        }

        #[track_caller]
        pub fn deferred(self, count: usize) -> Self {
            let actual = match self.node {
                Node::Follower(n) => n.queue.len(),
                Node::Candidate(n) => n.queue.len(),
                Node::Leader(n) => n.queue.len(),
            };
            assert_eq!(count, actual, "unexpected deferred request count");
            self
        }
    }

    pub fn assert_node(node: &Node) -> NodeAsserter {
        NodeAsserter::new(node)
    }

    #[test]
    fn new_node_is_leaderless_follower() {
        let (node_tx, rx) = crossbeam::channel::unbounded();
        let node = Node::new("1".into(), vec!["2".into(), "3".into()], node_tx);
        assert_node(&node).is_follower().term(0).leader(None).voted_for(None).last(-1).committed(-1);
        assert_messages(&rx, vec![]);
    }

    #[test]
    fn majority_thresholds() {
        let (node_tx, _rx) = crossbeam::channel::unbounded();
        let three = Node::new("1".into(), vec!["2".into(), "3".into()], node_tx.clone());
        let Node::Follower(three) = three else { panic!("expected follower") };
        assert!(!three.is_majority(1));
        assert!(three.is_majority(2));

        let five =
            Node::new("1".into(), vec!["2".into(), "3".into(), "4".into(), "5".into()], node_tx);
        let Node::Follower(five) = five else { panic!("expected follower") };
        assert!(!five.is_majority(2));
        assert!(five.is_majority(3));
    }

    #[test]
    fn send_stamps_addressing_fields() {
        let (node_tx, rx) = crossbeam::channel::unbounded();
        let node = Node::new("1".into(), vec!["2".into(), "3".into()], node_tx);
        let Node::Follower(node) = node else { panic!("expected follower") };
        node.send(&"2".to_owned(), Message::Hello).unwrap();
        node.broadcast(Message::Hello).unwrap();
        assert_messages(
            &rx,
            vec![
                envelope("1", "2", BROADCAST, Message::Hello),
                envelope("1", BROADCAST, BROADCAST, Message::Hello),
            ],
        );
    }

    #[test]
    fn defer_is_bounded() {
        let (node_tx, _rx) = crossbeam::channel::unbounded();
        let node = Node::new("1".into(), vec!["2".into()], node_tx);
        let Node::Follower(mut node) = node else { panic!("expected follower") };
        for i in 0..REQUEST_QUEUE_CAPACITY + 10 {
            node.defer(envelope(
                "C1",
                "1",
                BROADCAST,
                Message::Get { key: "x".into(), mid: format!("M{}", i) },
            ));
        }
        assert_eq!(node.queue.len(), REQUEST_QUEUE_CAPACITY);
    }

    #[test]
    fn last_log_position_empty_log_uses_current_term() {
        let (node_tx, _rx) = crossbeam::channel::unbounded();
        let node = Node::new("1".into(), vec!["2".into()], node_tx);
        let Node::Follower(mut node) = node else { panic!("expected follower") };
        node.term = 4;
        assert_eq!(node.last_log_position(), (-1, 4));
        node.log.append(entry(2, "x", "1"));
        assert_eq!(node.last_log_position(), (0, 2));
    }
}
