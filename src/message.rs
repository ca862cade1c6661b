use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::log::LogEntry;

/// Arguments of the RequestVote RPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    pub term: u64,
    pub candidate_id: usize,
    pub last_log_index: usize,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestVoteReply {
    pub term: u64,
    pub vote_granted: bool,
}

/// Arguments of the AppendEntries RPC. An empty `entries` vector is a
/// heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    pub term: u64,
    pub leader_id: usize,
    pub prev_log_index: usize,
    pub prev_log_term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit: usize,
}

/// On rejection the conflict hint lets the leader skip an entire
/// conflicting term instead of rewinding one entry per round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    pub term: u64,
    pub success: bool,
    pub conflict_index: Option<usize>,
    pub conflict_term: Option<u64>,
}

/// One committed entry handed to the apply sink. Delivery is contiguous,
/// in increasing index order starting at 1, exactly once per peer.
///
/// `valid` is true for command entries; other message kinds (not produced
/// today) carry false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyMsg {
    pub valid: bool,
    pub command: Bytes,
    pub index: usize,
}

/// Advisory role-change notifications, published on a broadcast channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RaftEvent {
    LeaderElected { id: usize, term: u64 },
    SteppedDown { id: usize, term: u64 },
}
