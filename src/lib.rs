#![warn(clippy::all)]

pub mod error;
pub mod raft;

pub use error::{Error, Result};
pub use raft::Server;
