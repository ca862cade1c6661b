//! Replicated consensus core implementing the Raft algorithm: per-peer role
//! transitions, leader election, log replication, commit advancement, and the
//! crash-safe persistence of `(current_term, voted_for, log)`.
//!
//! Transport, stable storage and the application state machine stay behind
//! trait seams; [`LocalMesh`] wires a whole cluster inside one process.

pub mod config;
pub mod error;
pub mod log;
pub mod message;
pub mod node;
pub mod persist;
pub mod transport;

pub use config::RaftConfig;
pub use error::RaftError;
pub use log::{LogEntry, RaftLog};
pub use message::{
    AppendEntriesArgs, AppendEntriesReply, ApplyMsg, RaftEvent, RequestVoteArgs, RequestVoteReply,
};
pub use node::{RaftNode, Role};
pub use persist::{FilePersister, HardState, MemoryPersister, Persister};
pub use transport::{LocalMesh, RaftService, RaftTransport, RpcError};
