// This module provides the arena-based session that one function's trip through the bridge
// runs inside. BridgeSession owns a reference to a bumpalo arena and hands out arena
// allocations for the scratch structures of the out-of-SSA passes (elimination graph
// buffers, coalesce candidate lists, forwarder analysis), so per-edge and per-block work does
// not churn the global allocator. It also keeps SessionStats: counters for the structural
// edits the passes perform, which the drivers log at debug level once a pass finishes. A
// session is scoped to a single function; nothing is shared across functions, so independent
// functions can use independent sessions on separate threads.

//! Arena-based per-function session.
//!
//! All scratch data of a pass is tied to the session lifetime, so a whole
//! function's work can be released by dropping one `Bump`.

use bumpalo::Bump;
use std::cell::RefCell;
use std::fmt;

/// Arena-backed session for processing one function.
pub struct BridgeSession<'arena> {
    /// Arena allocator for scratch objects.
    arena: &'arena Bump,

    /// Counters for structural edits.
    stats: RefCell<SessionStats>,
}

impl<'arena> BridgeSession<'arena> {
    /// Create a new session over the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
        }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Apply `f` to the statistics counters.
    pub fn record(&self, f: impl FnOnce(&mut SessionStats)) {
        f(&mut self.stats.borrow_mut());
    }

    /// Snapshot of the statistics counters.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Counters of the structural edits performed during a session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStats {
    pub blocks_created: usize,
    pub blocks_removed: usize,
    pub blocks_merged: usize,
    pub labels_merged: usize,
    pub labels_removed: usize,
    pub edges_split: usize,
    pub partitions_coalesced: usize,
    /// Merges between partitions of different temporaries.
    pub temporaries_combined: usize,
    pub expressions_replaced: usize,
    pub copies_inserted: usize,
    pub temporaries_created: usize,
    pub forwarders_created: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Session statistics:")?;
        writeln!(f, "  Blocks created: {}", self.blocks_created)?;
        writeln!(f, "  Blocks removed: {}", self.blocks_removed)?;
        writeln!(f, "  Blocks merged: {}", self.blocks_merged)?;
        writeln!(f, "  Labels merged: {}", self.labels_merged)?;
        writeln!(f, "  Labels removed: {}", self.labels_removed)?;
        writeln!(f, "  Edges split: {}", self.edges_split)?;
        writeln!(f, "  Partitions coalesced: {}", self.partitions_coalesced)?;
        writeln!(f, "  Temporaries combined: {}", self.temporaries_combined)?;
        writeln!(f, "  Expressions replaced: {}", self.expressions_replaced)?;
        writeln!(f, "  Copies inserted: {}", self.copies_inserted)?;
        writeln!(f, "  Temporaries created: {}", self.temporaries_created)?;
        writeln!(f, "  Forwarder blocks: {}", self.forwarders_created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_is_shared() {
        let arena = Bump::new();
        let session = BridgeSession::new(&arena);
        let mut scratch = bumpalo::collections::Vec::new_in(session.arena());
        scratch.extend([1, 2, 3]);
        assert_eq!(scratch.as_slice(), &[1, 2, 3]);
        assert!(arena.allocated_bytes() > 0);
    }

    #[test]
    fn test_statistics_display() {
        let arena = Bump::new();
        let session = BridgeSession::new(&arena);

        session.record(|s| s.blocks_merged += 2);
        session.record(|s| s.temporaries_created += 1);

        let stats = session.stats();
        assert_eq!(stats.blocks_merged, 2);
        let output = format!("{stats}");
        assert!(output.contains("Blocks merged: 2"));
        assert!(output.contains("Temporaries created: 1"));
    }
}
