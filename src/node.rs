use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, Notify};
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

use crate::config::RaftConfig;
use crate::error::RaftError;
use crate::log::{LogEntry, RaftLog};
use crate::message::{
    AppendEntriesArgs, AppendEntriesReply, ApplyMsg, RaftEvent, RequestVoteArgs, RequestVoteReply,
};
use crate::persist::{HardState, Persister};
use crate::transport::{RaftService, RaftTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// Everything behind the peer lock. Term, vote, log, indices and role always
/// mutate together, so one mutex guards them all.
struct PeerState {
    role: Role,
    current_term: u64,
    voted_for: Option<usize>,
    log: RaftLog,
    commit_index: usize,
    last_applied: usize,
    next_index: Vec<usize>,
    match_index: Vec<usize>,
    election_deadline: Instant,
}

impl PeerState {
    fn hard_state(&self) -> HardState {
        HardState {
            current_term: self.current_term,
            voted_for: self.voted_for,
            entries: self.log.entries().to_vec(),
        }
    }
}

/// A single Raft peer: role transitions, election, log replication, commit
/// advancement, and the persistence discipline that makes them crash-safe.
///
/// Construction restores durable state and spawns the election ticker, the
/// heartbeat ticker and the apply pump; `shutdown` stops all three.
pub struct RaftNode {
    me: usize,
    peers: Vec<Arc<dyn RaftTransport>>,
    state: Mutex<PeerState>,
    persister: Arc<dyn Persister>,
    apply_tx: mpsc::UnboundedSender<ApplyMsg>,
    apply_notify: Notify,
    event_tx: broadcast::Sender<RaftEvent>,
    dead: AtomicBool,
    config: RaftConfig,
}

impl RaftNode {
    /// Create a peer and launch its background tasks. `peers` is the ordered
    /// transport table shared by every cluster member; `peers[me]` denotes
    /// the local peer and is never called. Must run inside a Tokio runtime.
    pub async fn new(
        peers: Vec<Arc<dyn RaftTransport>>,
        me: usize,
        persister: Arc<dyn Persister>,
        apply_tx: mpsc::UnboundedSender<ApplyMsg>,
        config: RaftConfig,
    ) -> Arc<Self> {
        let n = peers.len();
        let mut state = PeerState {
            role: Role::Follower,
            current_term: 0,
            voted_for: None,
            log: RaftLog::new(),
            commit_index: 0,
            last_applied: 0,
            next_index: vec![0; n],
            match_index: vec![0; n],
            election_deadline: Instant::now() + config.random_election_timeout(),
        };

        let raw = persister.read_state().await;
        if !raw.is_empty() {
            match HardState::decode(&raw) {
                Ok(hs) => {
                    state.current_term = hs.current_term;
                    state.voted_for = hs.voted_for;
                    state.log = RaftLog::from_entries(hs.entries);
                    info!(
                        "peer {} restored term {} and {} log entries",
                        me,
                        state.current_term,
                        state.log.last_index()
                    );
                }
                Err(err) => {
                    warn!("peer {} discarding unreadable persisted state: {}", me, err);
                }
            }
        }

        let (event_tx, _) = broadcast::channel(64);
        let node = Arc::new(RaftNode {
            me,
            peers,
            state: Mutex::new(state),
            persister,
            apply_tx,
            apply_notify: Notify::new(),
            event_tx,
            dead: AtomicBool::new(false),
            config,
        });

        tokio::spawn(Self::run_election_ticker(node.clone()));
        tokio::spawn(Self::run_heartbeat_ticker(node.clone()));
        tokio::spawn(Self::run_apply_pump(node.clone()));
        node
    }

    pub fn me(&self) -> usize {
        self.me
    }

    /// Current term and whether this peer believes it is the leader.
    /// Advisory: stale by the time the caller acts on it.
    pub async fn get_state(&self) -> (u64, bool) {
        let st = self.state.lock().await;
        (st.current_term, st.role == Role::Leader)
    }

    /// Start agreement on a new command. Returns the prospective log index
    /// and the term it was appended in; commitment is reported through the
    /// apply sink, not here.
    pub async fn propose(&self, command: Bytes) -> Result<(usize, u64), RaftError> {
        if self.killed() {
            return Err(RaftError::Shutdown);
        }
        let mut st = self.state.lock().await;
        if st.role != Role::Leader {
            return Err(RaftError::NotLeader);
        }
        let term = st.current_term;
        st.log.append(LogEntry::new(term, command));
        let index = st.log.last_index();
        st.match_index[self.me] = index;
        self.persist(&st).await;
        debug!("peer {} accepted command at index {} term {}", self.me, index, term);
        Ok((index, term))
    }

    /// Role-change notifications. Advisory; a lagging receiver misses events.
    pub fn subscribe(&self) -> broadcast::Receiver<RaftEvent> {
        self.event_tx.subscribe()
    }

    /// Stop all background tasks. Pending RPCs may still deliver replies,
    /// which are ignored.
    pub fn shutdown(&self) {
        if self.dead.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("peer {} shutting down", self.me);
        self.apply_notify.notify_one();
    }

    pub fn killed(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    // ---- role transitions (caller holds the peer lock) ----

    async fn become_follower(&self, st: &mut PeerState, term: u64) {
        // the vote is cleared only when the term actually advances;
        // clearing it at an unchanged term could grant two votes in one term
        if term > st.current_term {
            st.current_term = term;
            st.voted_for = None;
        }
        if st.role != Role::Follower {
            info!("peer {} stepping down to follower in term {}", self.me, term);
            let _ = self.event_tx.send(RaftEvent::SteppedDown {
                id: self.me,
                term: st.current_term,
            });
        }
        st.role = Role::Follower;
        st.election_deadline = Instant::now() + self.config.random_election_timeout();
        self.persist(st).await;
    }

    async fn become_candidate(&self, st: &mut PeerState) {
        st.current_term += 1;
        st.voted_for = Some(self.me);
        st.role = Role::Candidate;
        st.election_deadline = Instant::now() + self.config.random_election_timeout();
        self.persist(st).await;
        info!(
            "peer {} election timeout, campaigning in term {}",
            self.me, st.current_term
        );
    }

    async fn become_leader(&self, st: &mut PeerState) {
        info!("peer {} won election in term {}", self.me, st.current_term);
        st.role = Role::Leader;
        let next = st.log.len();
        for p in 0..self.peers.len() {
            st.next_index[p] = next;
            st.match_index[p] = 0;
        }
        st.match_index[self.me] = st.log.last_index();
        self.persist(st).await;
        let _ = self.event_tx.send(RaftEvent::LeaderElected {
            id: self.me,
            term: st.current_term,
        });
    }

    // ---- election driver ----

    async fn run_election_ticker(self: Arc<Self>) {
        let mut ticker = interval(self.config.tick_interval());
        loop {
            ticker.tick().await;
            if self.killed() {
                return;
            }
            let mut st = self.state.lock().await;
            if st.role == Role::Leader || Instant::now() < st.election_deadline {
                continue;
            }
            self.become_candidate(&mut st).await;
            let args = RequestVoteArgs {
                term: st.current_term,
                candidate_id: self.me,
                last_log_index: st.log.last_index(),
                last_log_term: st.log.last_term(),
            };
            drop(st);
            self.solicit_votes(args);
        }
    }

    /// Fan RequestVote out to every other peer. Each reply is handled under
    /// the peer lock; the election is abandoned the moment a higher term or
    /// a role change is observed.
    fn solicit_votes(self: &Arc<Self>, args: RequestVoteArgs) {
        let votes = Arc::new(AtomicUsize::new(1));
        for p in 0..self.peers.len() {
            if p == self.me {
                continue;
            }
            let node = self.clone();
            let votes = votes.clone();
            let args = args.clone();
            tokio::spawn(async move {
                let reply = match node.peers[p].request_vote(args.clone()).await {
                    Ok(reply) => reply,
                    Err(err) => {
                        debug!("peer {} got no vote reply from {}: {}", node.me, p, err);
                        return;
                    }
                };
                let mut st = node.state.lock().await;
                if reply.term > st.current_term {
                    node.become_follower(&mut st, reply.term).await;
                    return;
                }
                if st.role != Role::Candidate || st.current_term != args.term {
                    return;
                }
                if !reply.vote_granted {
                    return;
                }
                let tally = votes.fetch_add(1, Ordering::SeqCst) + 1;
                debug!("peer {} has {} votes in term {}", node.me, tally, args.term);
                if tally > node.peers.len() / 2 {
                    node.become_leader(&mut st).await;
                    let burst = node.prepare_appends(&st);
                    drop(st);
                    node.dispatch_appends(burst);
                }
            });
        }
    }

    // ---- replication driver ----

    async fn run_heartbeat_ticker(self: Arc<Self>) {
        let mut ticker = interval(self.config.heartbeat_interval());
        loop {
            ticker.tick().await;
            if self.killed() {
                return;
            }
            let st = self.state.lock().await;
            if st.role != Role::Leader {
                continue;
            }
            let round = self.prepare_appends(&st);
            drop(st);
            self.dispatch_appends(round);
        }
    }

    fn prepare_appends(&self, st: &PeerState) -> Vec<(usize, AppendEntriesArgs)> {
        let mut round = Vec::with_capacity(self.peers.len().saturating_sub(1));
        for p in 0..self.peers.len() {
            if p == self.me {
                continue;
            }
            let prev_log_index = st.next_index[p] - 1;
            round.push((
                p,
                AppendEntriesArgs {
                    term: st.current_term,
                    leader_id: self.me,
                    prev_log_index,
                    prev_log_term: st.log.term_at(prev_log_index),
                    entries: st.log.entries_from(st.next_index[p]).to_vec(),
                    leader_commit: st.commit_index,
                },
            ));
        }
        round
    }

    fn dispatch_appends(self: &Arc<Self>, round: Vec<(usize, AppendEntriesArgs)>) {
        for (p, args) in round {
            let node = self.clone();
            tokio::spawn(async move {
                let reply = match node.peers[p].append_entries(args.clone()).await {
                    Ok(reply) => reply,
                    Err(err) => {
                        debug!("peer {} got no append reply from {}: {}", node.me, p, err);
                        return;
                    }
                };
                node.handle_append_reply(p, args, reply).await;
            });
        }
    }

    async fn handle_append_reply(&self, peer: usize, args: AppendEntriesArgs, reply: AppendEntriesReply) {
        let mut st = self.state.lock().await;
        if st.role != Role::Leader || st.current_term != args.term {
            return;
        }
        if reply.term > st.current_term {
            self.become_follower(&mut st, reply.term).await;
            return;
        }
        if reply.success {
            let matched = args.prev_log_index + args.entries.len();
            if matched > st.match_index[peer] {
                st.match_index[peer] = matched;
            }
            st.next_index[peer] = st.match_index[peer] + 1;
            let candidate = st.match_index[peer];
            self.advance_commit(&mut st, candidate);
        } else {
            // rewind past the follower's whole conflicting term if we have
            // it, else to the follower's first conflicting index
            let fallback = st.next_index[peer].saturating_sub(1);
            let mut next = reply.conflict_index.unwrap_or(fallback);
            if let Some(term) = reply.conflict_term {
                if let Some(i) = st.log.last_index_of_term(term) {
                    next = i + 1;
                }
            }
            st.next_index[peer] = next.clamp(1, st.log.len());
            debug!(
                "peer {} rewound next_index[{}] to {}",
                self.me, peer, st.next_index[peer]
            );
        }
    }

    /// Leader-only commit advancement. An index commits once a strict
    /// majority matches it and its entry carries the current term; counting
    /// replicas alone for an older-term entry would break leader
    /// completeness.
    fn advance_commit(&self, st: &mut PeerState, candidate: usize) {
        if candidate <= st.commit_index || st.log.term_at(candidate) != st.current_term {
            return;
        }
        let replicas = st.match_index.iter().filter(|&&m| m >= candidate).count();
        if replicas > self.peers.len() / 2 {
            debug!(
                "peer {} commit index {} -> {}",
                self.me, st.commit_index, candidate
            );
            st.commit_index = candidate;
            self.apply_notify.notify_one();
        }
    }

    // ---- RPC handlers ----

    pub async fn handle_request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply {
        let mut st = self.state.lock().await;
        if args.term < st.current_term {
            debug!(
                "peer {} rejecting vote for {}: stale term {}",
                self.me, args.candidate_id, args.term
            );
            return RequestVoteReply {
                term: st.current_term,
                vote_granted: false,
            };
        }
        if args.term > st.current_term {
            self.become_follower(&mut st, args.term).await;
        }

        let up_to_date = args.last_log_term > st.log.last_term()
            || (args.last_log_term == st.log.last_term()
                && args.last_log_index >= st.log.last_index());
        if !up_to_date {
            debug!(
                "peer {} rejecting vote for {}: log not up to date",
                self.me, args.candidate_id
            );
            return RequestVoteReply {
                term: st.current_term,
                vote_granted: false,
            };
        }

        if st.voted_for.is_none() || st.voted_for == Some(args.candidate_id) {
            st.voted_for = Some(args.candidate_id);
            st.election_deadline = Instant::now() + self.config.random_election_timeout();
            self.persist(&st).await;
            debug!(
                "peer {} granting vote to {} in term {}",
                self.me, args.candidate_id, st.current_term
            );
            RequestVoteReply {
                term: st.current_term,
                vote_granted: true,
            }
        } else {
            debug!(
                "peer {} rejecting vote for {}: already voted for {:?}",
                self.me, args.candidate_id, st.voted_for
            );
            RequestVoteReply {
                term: st.current_term,
                vote_granted: false,
            }
        }
    }

    pub async fn handle_append_entries(&self, args: AppendEntriesArgs) -> AppendEntriesReply {
        let mut st = self.state.lock().await;
        let mut reply = AppendEntriesReply {
            term: st.current_term,
            success: false,
            conflict_index: None,
            conflict_term: None,
        };
        if args.term < st.current_term {
            debug!(
                "peer {} rejecting append from {}: stale term {}",
                self.me, args.leader_id, args.term
            );
            return reply;
        }
        if args.term > st.current_term || st.role == Role::Candidate {
            self.become_follower(&mut st, args.term).await;
            reply.term = st.current_term;
        }

        // consistency check at prev_log_index
        if st.log.last_index() < args.prev_log_index {
            reply.conflict_index = Some(st.log.len());
            debug!(
                "peer {} missing entry at {} (log ends at {})",
                self.me,
                args.prev_log_index,
                st.log.last_index()
            );
            return reply;
        }
        let prev_term = st.log.term_at(args.prev_log_index);
        if prev_term != args.prev_log_term {
            reply.conflict_term = Some(prev_term);
            reply.conflict_index = st.log.first_index_of_term(prev_term);
            st.log.truncate_from(args.prev_log_index);
            self.persist(&st).await;
            debug!(
                "peer {} conflict at {}: term {} != {}",
                self.me, args.prev_log_index, prev_term, args.prev_log_term
            );
            return reply;
        }

        // merge: walk both logs in parallel and truncate only at the first
        // real disagreement, so a reordered or duplicated RPC can never
        // drop entries that already agree
        let mut changed = false;
        for (k, entry) in args.entries.iter().enumerate() {
            let index = args.prev_log_index + 1 + k;
            if index > st.log.last_index() {
                st.log.extend_from(&args.entries[k..]);
                changed = true;
                break;
            }
            if st.log.term_at(index) != entry.term {
                st.log.truncate_from(index);
                st.log.extend_from(&args.entries[k..]);
                changed = true;
                break;
            }
        }
        if changed {
            self.persist(&st).await;
        }

        st.election_deadline = Instant::now() + self.config.random_election_timeout();

        if args.leader_commit > st.commit_index {
            let last_new = args.prev_log_index + args.entries.len();
            let new_commit = args.leader_commit.min(last_new);
            if new_commit > st.commit_index {
                st.commit_index = new_commit;
                self.apply_notify.notify_one();
            }
        }

        reply.success = true;
        reply
    }

    // ---- persistence ----

    /// Rewrite the durable tuple. Called before any reply or outgoing
    /// message that depends on a mutation of term, vote or log; the write is
    /// awaited so the mutation stays invisible until it is durable, without
    /// tying up an executor thread.
    async fn persist(&self, st: &PeerState) {
        match st.hard_state().encode() {
            Ok(blob) => self.persister.save_state(blob).await,
            Err(err) => error!("peer {} failed to encode durable state: {}", self.me, err),
        }
    }

    // ---- apply pump ----

    /// Deliver committed entries to the sink in log order, exactly once.
    /// Entries are drained under the lock but sent with it released, so a
    /// slow sink cannot stall the consensus core.
    async fn run_apply_pump(self: Arc<Self>) {
        loop {
            self.apply_notify.notified().await;
            if self.killed() {
                return;
            }
            let batch = {
                let mut st = self.state.lock().await;
                let mut batch = Vec::with_capacity(st.commit_index - st.last_applied);
                while st.last_applied < st.commit_index {
                    st.last_applied += 1;
                    let index = st.last_applied;
                    batch.push(ApplyMsg {
                        valid: true,
                        command: st.log.command_at(index),
                        index,
                    });
                }
                batch
            };
            for msg in batch {
                if self.apply_tx.send(msg).is_err() {
                    // sink dropped; nothing left to deliver to
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl RaftService for RaftNode {
    async fn request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply {
        self.handle_request_vote(args).await
    }

    async fn append_entries(&self, args: AppendEntriesArgs) -> AppendEntriesReply {
        self.handle_append_entries(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryPersister;
    use crate::transport::LocalMesh;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Election timeouts far beyond test duration keep the node a follower,
    /// so handler behavior can be probed deterministically.
    fn quiet_config() -> RaftConfig {
        RaftConfig {
            election_timeout_min_ms: 60_000,
            election_timeout_max_ms: 120_000,
            heartbeat_interval_ms: 50,
            tick_interval_ms: 10,
        }
    }

    async fn make_node(
        persister: Arc<MemoryPersister>,
    ) -> (Arc<RaftNode>, mpsc::UnboundedReceiver<ApplyMsg>) {
        let mesh = LocalMesh::new(3);
        let (tx, rx) = mpsc::unbounded_channel();
        let node = RaftNode::new(mesh.endpoints(0), 0, persister, tx, quiet_config()).await;
        mesh.register(0, node.clone()).await;
        (node, rx)
    }

    fn entry(term: u64, cmd: &str) -> LogEntry {
        LogEntry::new(term, Bytes::from(cmd.to_owned()))
    }

    fn vote_args(term: u64, candidate: usize, last_index: usize, last_term: u64) -> RequestVoteArgs {
        RequestVoteArgs {
            term,
            candidate_id: candidate,
            last_log_index: last_index,
            last_log_term: last_term,
        }
    }

    fn append_args(
        term: u64,
        prev_index: usize,
        prev_term: u64,
        entries: Vec<LogEntry>,
        commit: usize,
    ) -> AppendEntriesArgs {
        AppendEntriesArgs {
            term,
            leader_id: 1,
            prev_log_index: prev_index,
            prev_log_term: prev_term,
            entries,
            leader_commit: commit,
        }
    }

    async fn next_apply(rx: &mut mpsc::UnboundedReceiver<ApplyMsg>) -> ApplyMsg {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for apply")
            .expect("apply channel closed")
    }

    #[tokio::test]
    async fn grants_one_vote_per_term() {
        let (node, _rx) = make_node(Arc::new(MemoryPersister::new())).await;
        let first = node.handle_request_vote(vote_args(1, 1, 0, 0)).await;
        assert!(first.vote_granted);
        let rival = node.handle_request_vote(vote_args(1, 2, 0, 0)).await;
        assert!(!rival.vote_granted);
        // the same candidate may ask again
        let retry = node.handle_request_vote(vote_args(1, 1, 0, 0)).await;
        assert!(retry.vote_granted);
    }

    #[tokio::test]
    async fn rejects_vote_for_stale_term() {
        let (node, _rx) = make_node(Arc::new(MemoryPersister::new())).await;
        let reply = node.handle_request_vote(vote_args(3, 1, 0, 0)).await;
        assert!(reply.vote_granted);
        let stale = node.handle_request_vote(vote_args(1, 2, 0, 0)).await;
        assert!(!stale.vote_granted);
        assert_eq!(stale.term, 3);
    }

    #[tokio::test]
    async fn rejects_vote_for_outdated_log() {
        let (node, _rx) = make_node(Arc::new(MemoryPersister::new())).await;
        let seeded = node
            .handle_append_entries(append_args(2, 0, 0, vec![entry(2, "a"), entry(2, "b")], 0))
            .await;
        assert!(seeded.success);

        // shorter log at the same last term loses
        let shorter = node.handle_request_vote(vote_args(3, 2, 1, 2)).await;
        assert!(!shorter.vote_granted);
        // older last term loses even if longer
        let older = node.handle_request_vote(vote_args(3, 2, 9, 1)).await;
        assert!(!older.vote_granted);
        // equal term, equal length wins the comparison
        let equal = node.handle_request_vote(vote_args(3, 2, 2, 2)).await;
        assert!(equal.vote_granted);
    }

    #[tokio::test]
    async fn rejects_append_from_stale_leader() {
        let (node, _rx) = make_node(Arc::new(MemoryPersister::new())).await;
        node.handle_request_vote(vote_args(5, 1, 0, 0)).await;
        let reply = node.handle_append_entries(append_args(3, 0, 0, vec![], 0)).await;
        assert!(!reply.success);
        assert_eq!(reply.term, 5);
    }

    #[tokio::test]
    async fn reports_missing_suffix_with_log_length() {
        let (node, _rx) = make_node(Arc::new(MemoryPersister::new())).await;
        let reply = node.handle_append_entries(append_args(1, 5, 1, vec![], 0)).await;
        assert!(!reply.success);
        assert_eq!(reply.conflict_index, Some(1));
        assert_eq!(reply.conflict_term, None);
    }

    #[tokio::test]
    async fn conflict_hint_names_first_index_of_term() {
        let (node, _rx) = make_node(Arc::new(MemoryPersister::new())).await;
        let seeded = node
            .handle_append_entries(append_args(1, 0, 0, vec![entry(1, "a"), entry(1, "b")], 0))
            .await;
        assert!(seeded.success);

        // leader claims term 3 at index 2 where we hold term 1
        let reply = node.handle_append_entries(append_args(3, 2, 3, vec![], 0)).await;
        assert!(!reply.success);
        assert_eq!(reply.conflict_term, Some(1));
        assert_eq!(reply.conflict_index, Some(1));

        // the conflicting entry was truncated, so index 2 is now missing
        let after = node.handle_append_entries(append_args(3, 2, 3, vec![], 0)).await;
        assert!(!after.success);
        assert_eq!(after.conflict_index, Some(2));
        assert_eq!(after.conflict_term, None);
    }

    #[tokio::test]
    async fn duplicate_append_applies_each_entry_once() {
        let (node, mut rx) = make_node(Arc::new(MemoryPersister::new())).await;
        let entries = vec![entry(1, "a"), entry(1, "b")];
        assert!(
            node.handle_append_entries(append_args(1, 0, 0, entries.clone(), 0))
                .await
                .success
        );
        // retransmission of the same entries must not truncate or duplicate
        assert!(
            node.handle_append_entries(append_args(1, 0, 0, entries, 2))
                .await
                .success
        );

        let first = next_apply(&mut rx).await;
        assert_eq!((first.index, first.command.as_ref()), (1, &b"a"[..]));
        let second = next_apply(&mut rx).await;
        assert_eq!((second.index, second.command.as_ref()), (2, &b"b"[..]));
        assert!(
            timeout(Duration::from_millis(300), rx.recv()).await.is_err(),
            "no third apply expected"
        );
    }

    #[tokio::test]
    async fn conflicting_suffix_is_replaced() {
        let (node, mut rx) = make_node(Arc::new(MemoryPersister::new())).await;
        assert!(
            node.handle_append_entries(append_args(1, 0, 0, vec![entry(1, "a"), entry(1, "b")], 0))
                .await
                .success
        );
        // a newer leader overwrites the uncommitted suffix from index 1
        assert!(
            node.handle_append_entries(append_args(2, 0, 0, vec![entry(2, "c")], 1))
                .await
                .success
        );
        let applied = next_apply(&mut rx).await;
        assert_eq!((applied.index, applied.command.as_ref()), (1, &b"c"[..]));
    }

    #[tokio::test]
    async fn commit_is_capped_by_last_new_entry() {
        let (node, mut rx) = make_node(Arc::new(MemoryPersister::new())).await;
        assert!(
            node.handle_append_entries(append_args(1, 0, 0, vec![entry(1, "a"), entry(1, "b")], 0))
                .await
                .success
        );
        // heartbeat matching only index 1 may commit no further than 1
        assert!(
            node.handle_append_entries(append_args(1, 1, 1, vec![], 9))
                .await
                .success
        );
        let applied = next_apply(&mut rx).await;
        assert_eq!(applied.index, 1);
        assert!(
            timeout(Duration::from_millis(300), rx.recv()).await.is_err(),
            "index 2 must not commit yet"
        );
    }

    #[tokio::test]
    async fn propose_rejected_when_not_leader() {
        let (node, _rx) = make_node(Arc::new(MemoryPersister::new())).await;
        let result = node.propose(Bytes::from_static(b"x")).await;
        assert!(matches!(result, Err(RaftError::NotLeader)));
    }

    #[tokio::test]
    async fn restart_restores_term_vote_and_log() {
        let persister = Arc::new(MemoryPersister::new());
        let (node, _rx) = make_node(persister.clone()).await;
        assert!(node.handle_request_vote(vote_args(3, 1, 9, 9)).await.vote_granted);
        assert!(
            node.handle_append_entries(append_args(3, 0, 0, vec![entry(3, "a"), entry(3, "b")], 0))
                .await
                .success
        );
        node.shutdown();

        let (revived, mut rx) = make_node(persister).await;
        let (term, is_leader) = revived.get_state().await;
        assert_eq!(term, 3);
        assert!(!is_leader);

        // the pre-crash vote binds: a rival candidate in the same term is
        // refused even with a fresher log
        let rival = revived.handle_request_vote(vote_args(3, 2, 10, 4)).await;
        assert!(!rival.vote_granted);

        // the log survived: the old leader can commit on top of it
        assert!(
            revived
                .handle_append_entries(append_args(3, 2, 3, vec![], 2))
                .await
                .success
        );
        let first = next_apply(&mut rx).await;
        assert_eq!((first.index, first.command.as_ref()), (1, &b"a"[..]));
        let second = next_apply(&mut rx).await;
        assert_eq!((second.index, second.command.as_ref()), (2, &b"b"[..]));
    }
}
