// This module tears SSA form down. var_map groups SSA names into partitions and later freezes
// them into variables; live computes where each partition is live; conflict turns that into
// an interference graph; coalesce merges partitions that may share storage, mandatory across
// abnormal edges and greedily elsewhere, and can afterwards combine partitions of different
// temporaries; ter folds single-use definitions into their one use once storage is fixed;
// elim sequences the parallel copies a PHI node implies on one edge; rewrite drives the
// whole conversion and hands the staged copies to the edge-insertion committer in cfg.

//! Out-of-SSA conversion.

pub mod coalesce;
pub mod conflict;
pub mod elim;
pub mod live;
pub mod rewrite;
pub mod ter;
pub mod var_map;

pub use coalesce::{coalesce_ssa_names, CoalesceList};
pub use conflict::ConflictGraph;
pub use elim::{ElimCopy, ElimGraph, ElimValue};
pub use live::LiveRangeInfo;
pub use rewrite::{eliminate_phis, remove_ssa_form, rewrite_trees};
pub use ter::replace_temporary_exprs;
pub use var_map::{PartitionId, StorageMap, VarMap};

/// Knobs for out-of-SSA conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfSsaOptions {
    /// Coalesce along the affinity list, heaviest pairs first.
    pub use_coalesce_list: bool,
    /// Afterwards try every remaining pair of partitions of one variable.
    pub coalesce_partitions: bool,
    /// Let partitions of different artificial variables share storage when
    /// they do not interfere.
    pub combine_temps: bool,
    /// Fold a single-use definition into its use in the same block.
    pub replace_exprs: bool,
    /// Check the graph before and after conversion.
    pub verify: bool,
}

impl Default for OutOfSsaOptions {
    fn default() -> Self {
        Self {
            use_coalesce_list: true,
            coalesce_partitions: true,
            combine_temps: false,
            replace_exprs: true,
            verify: true,
        }
    }
}
