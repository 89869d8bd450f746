mod log;
mod message;
mod node;
mod server;
mod state;

pub use self::log::{Index, Log};
pub use message::{Envelope, LogEntry, Message, BROADCAST};
pub use node::{Node, NodeID, Term, Ticks};
pub use server::Server;
pub use state::KvStore;

use std::time::Duration;

/// The real-time duration of a logical clock tick, the unit of time for
/// heartbeats and elections.
pub const TICK_INTERVAL: Duration = Duration::from_millis(50);

/// The interval between leader heartbeats, in ticks.
pub const HEARTBEAT_INTERVAL: Ticks = 5;

/// The range of randomized election timeouts for followers, in ticks.
/// Randomized timeouts reduce the chance of simultaneous elections and thus
/// split votes.
pub const ELECTION_TIMEOUT_RANGE: std::ops::Range<Ticks> = 10..20;

/// The timeout after which a candidate abandons an election and starts a new
/// one, in ticks.
pub const ELECTION_TIMEOUT_CANDIDATE: Ticks = 20;

/// The maximum number of client requests deferred while no leader is known.
/// Requests beyond this are dropped and left to client retries.
pub const REQUEST_QUEUE_CAPACITY: usize = 256;
