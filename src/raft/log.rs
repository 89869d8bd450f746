use super::{LogEntry, Term};

/// A log index. The log is zero-indexed; -1 indicates no entry.
pub type Index = i64;

/// The replicated log: an ordered sequence of client writes that is
/// replicated across replicas and applied in order to the local key-value
/// state. Each entry carries the term of the leader that accepted it.
///
/// In the steady state the log is append-only: the leader appends an entry
/// for each client put and replicates it to followers, who splice it into
/// their own logs. Once an index is replicated on a majority it is committed
/// and becomes immutable. Uncommitted entries on a follower may be replaced
/// when a new leader replicates different entries over the same indexes.
///
/// The log maintains the following invariants:
///
/// * A leader never removes or overwrites entries in its own log.
/// * Entries below the commit index are never changed or removed.
/// * The commit index never decreases.
/// * If two logs hold an entry with the same index and term, the logs are
///   identical up to and including that index.
///
/// State is held in volatile memory only, matching the rest of the replica:
/// a restarted replica rejoins with an empty log and recovers from its peers.
pub struct Log {
    /// The log entries.
    entries: Vec<LogEntry>,
    /// The index of the last committed entry, or -1 if none.
    commit_index: Index,
}

impl Log {
    /// Creates a new, empty log.
    pub fn new() -> Self {
        Self { entries: Vec::new(), commit_index: -1 }
    }

    /// Returns the index of the last entry, or -1 if the log is empty.
    pub fn last_index(&self) -> Index {
        self.entries.len() as Index - 1
    }

    /// Returns the index of the last committed entry, or -1 if none.
    pub fn commit_index(&self) -> Index {
        self.commit_index
    }

    /// Fetches the entry at an index, if it exists.
    pub fn get(&self, index: Index) -> Option<&LogEntry> {
        usize::try_from(index).ok().and_then(|i| self.entries.get(i))
    }

    /// Returns the term of the entry at an index, if it exists.
    pub fn term_at(&self, index: Index) -> Option<Term> {
        self.get(index).map(|e| e.term)
    }

    /// Checks whether the log contains an entry with the given index and term.
    pub fn has(&self, index: Index, term: Term) -> bool {
        self.term_at(index) == Some(term)
    }

    /// Returns all entries, for inspection.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Returns a copy of the entries from the given index (clamped to 0) to
    /// the end of the log, for replication.
    pub fn suffix(&self, from: Index) -> Vec<LogEntry> {
        self.entries[from.max(0) as usize..].to_vec()
    }

    /// Appends an entry, returning its index.
    pub fn append(&mut self, entry: LogEntry) -> Index {
        self.entries.push(entry);
        self.last_index()
    }

    /// Reconciles replicated entries into the log starting at the given index
    /// (clamped to 0). Entries already present are left untouched, so
    /// replayed appends are no-ops. At the first index where the log is
    /// shorter or the existing entry differs, the tail is truncated and the
    /// remaining entries take its place. Returns the new last index.
    pub fn splice(&mut self, at: Index, entries: Vec<LogEntry>) -> Index {
        let mut index = at.max(0) as usize;
        for entry in entries {
            match self.entries.get(index) {
                Some(existing) if existing.matches(&entry) => {}
                Some(_) => {
                    assert!(
                        index as Index > self.commit_index,
                        "divergence below commit index {}",
                        self.commit_index
                    );
                    self.entries.truncate(index);
                    self.entries.push(entry);
                }
                None => self.entries.push(entry),
            }
            index += 1;
        }
        self.last_index()
    }

    /// Advances the commit index to the given index, clamped to the last
    /// entry, and returns the newly committed entries with their indexes for
    /// application. The commit index never regresses; a stale index commits
    /// nothing.
    pub fn commit(&mut self, index: Index) -> Vec<(Index, LogEntry)> {
        let target = index.min(self.last_index());
        if target <= self.commit_index {
            return Vec::new();
        }
        let from = self.commit_index + 1;
        let committed = self.entries[from as usize..=target as usize]
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, entry)| (from + i as Index, entry))
            .collect();
        self.commit_index = target;
        committed
    }

    /// Checks whether a candidate's log, described by its last entry, is at
    /// least as up-to-date as this one. Compared by (term, index); an empty
    /// log, signalled by a negative index, ranks below any entry regardless
    /// of the advertised term.
    pub fn up_to_date(&self, last_index: Index, last_term: Term) -> bool {
        let own = match self.entries.last() {
            Some(entry) => (entry.term as i64, self.last_index()),
            None => (-1, -1),
        };
        let candidate = if last_index < 0 { (-1, -1) } else { (last_term as i64, last_index) };
        candidate >= own
    }
}

impl Default for Log {
    fn default() -> Self {
        Self::new()
    }
}
