use thiserror::Error;

/// Errors surfaced by the public API of a Raft peer.
#[derive(Debug, Error)]
pub enum RaftError {
    /// The local peer is not the leader; resubmit to the current leader.
    #[error("not the leader")]
    NotLeader,

    /// The peer has been shut down and no longer accepts commands.
    #[error("peer is shut down")]
    Shutdown,

    /// The persisted state blob could not be encoded or decoded.
    #[error("persisted state is unreadable: {0}")]
    Persist(#[from] bincode::Error),
}
