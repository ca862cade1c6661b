use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One replicated log slot: the election term it was appended in and the
/// opaque client command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub command: Bytes,
}

impl LogEntry {
    pub fn new(term: u64, command: Bytes) -> Self {
        LogEntry { term, command }
    }
}

/// The replicated log of a single peer.
///
/// Index 0 always holds a term-0 sentinel, so the first real entry sits at
/// index 1 and `prev_log_index = 0` is a legitimate address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaftLog {
    entries: Vec<LogEntry>,
}

impl Default for RaftLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RaftLog {
    pub fn new() -> Self {
        RaftLog {
            entries: vec![LogEntry::new(0, Bytes::new())],
        }
    }

    /// Rebuild from a persisted entry vector. An empty vector (a fresh or
    /// corrupt blob) falls back to the sentinel-only log.
    pub fn from_entries(entries: Vec<LogEntry>) -> Self {
        if entries.is_empty() {
            return Self::new();
        }
        RaftLog { entries }
    }

    /// Total slot count including the sentinel.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() == 1
    }

    pub fn last_index(&self) -> usize {
        self.entries.len() - 1
    }

    pub fn last_term(&self) -> u64 {
        self.entries[self.last_index()].term
    }

    /// Term of the entry at `index`. `index` must be <= `last_index()`.
    pub fn term_at(&self, index: usize) -> u64 {
        self.entries[index].term
    }

    pub fn command_at(&self, index: usize) -> Bytes {
        self.entries[index].command.clone()
    }

    pub fn append(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn extend_from(&mut self, entries: &[LogEntry]) {
        self.entries.extend_from_slice(entries);
    }

    /// Drop the entry at `index` and everything after it. The sentinel is
    /// never removed.
    pub fn truncate_from(&mut self, index: usize) {
        self.entries.truncate(index.max(1));
    }

    /// The suffix starting at `index`, empty when `index` is past the end.
    pub fn entries_from(&self, index: usize) -> &[LogEntry] {
        &self.entries[index.min(self.entries.len())..]
    }

    /// First index carrying `term`, scanning from the front.
    pub fn first_index_of_term(&self, term: u64) -> Option<usize> {
        self.entries.iter().position(|e| e.term == term)
    }

    /// Last index carrying `term`, scanning from the back.
    pub fn last_index_of_term(&self, term: u64) -> Option<usize> {
        self.entries.iter().rposition(|e| e.term == term)
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(term: u64, cmd: &str) -> LogEntry {
        LogEntry::new(term, Bytes::from(cmd.to_owned()))
    }

    #[test]
    fn fresh_log_has_sentinel() {
        let log = RaftLog::new();
        assert_eq!(log.len(), 1);
        assert_eq!(log.last_index(), 0);
        assert_eq!(log.last_term(), 0);
        assert!(log.is_empty());
    }

    #[test]
    fn append_advances_last_index() {
        let mut log = RaftLog::new();
        log.append(entry(1, "a"));
        log.append(entry(2, "b"));
        assert_eq!(log.last_index(), 2);
        assert_eq!(log.last_term(), 2);
        assert_eq!(log.term_at(1), 1);
        assert_eq!(log.command_at(2), Bytes::from_static(b"b"));
    }

    #[test]
    fn truncate_never_removes_sentinel() {
        let mut log = RaftLog::new();
        log.append(entry(1, "a"));
        log.truncate_from(0);
        assert_eq!(log.len(), 1);
        assert_eq!(log.term_at(0), 0);
    }

    #[test]
    fn truncate_drops_suffix_inclusive() {
        let mut log = RaftLog::new();
        log.append(entry(1, "a"));
        log.append(entry(1, "b"));
        log.append(entry(2, "c"));
        log.truncate_from(2);
        assert_eq!(log.last_index(), 1);
        assert_eq!(log.last_term(), 1);
    }

    #[test]
    fn suffix_is_empty_past_the_end() {
        let mut log = RaftLog::new();
        log.append(entry(1, "a"));
        assert_eq!(log.entries_from(2).len(), 0);
        assert_eq!(log.entries_from(100).len(), 0);
        assert_eq!(log.entries_from(1), &[entry(1, "a")][..]);
    }

    #[test]
    fn term_scans_find_boundaries() {
        let mut log = RaftLog::new();
        log.append(entry(1, "a"));
        log.append(entry(2, "b"));
        log.append(entry(2, "c"));
        log.append(entry(3, "d"));
        assert_eq!(log.first_index_of_term(2), Some(2));
        assert_eq!(log.last_index_of_term(2), Some(3));
        assert_eq!(log.first_index_of_term(7), None);
    }

    #[test]
    fn empty_persisted_state_bootstraps() {
        let log = RaftLog::from_entries(Vec::new());
        assert_eq!(log.len(), 1);
        assert_eq!(log.last_term(), 0);
    }
}
