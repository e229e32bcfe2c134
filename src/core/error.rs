// This module defines the error taxonomy for the bridge using the thiserror crate. Every
// variant here is fatal for the function being processed: structural corruption of the
// statement stream or graph (dangling labels, conditionals without two targets, PHI argument
// counts that disagree with the predecessor count, unbalanced lowering scopes), unsatisfiable
// mandatory coalescing across abnormal edges, and code staged where it can never be placed.
// Missed optimization opportunities are never reported through this type; the passes log
// them and carry on. BridgeResult<T> is the convenience alias used throughout the crate.

//! Error types for the CFG / out-of-SSA bridge.
//!
//! All variants describe internal-compiler-error class failures: the upstream
//! producer broke its contract, or a pass in this crate left the graph in a
//! state later passes cannot work with.

use thiserror::Error;

use crate::ir::{BlockId, EdgeId, LabelId};
use crate::ssa::PartitionId;

/// Main error type for CFG construction and out-of-SSA conversion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Structural corruption: {reason}")]
    StructuralCorruption {
        reason: String,
    },

    #[error("Reference to label {label} which is not defined in this function")]
    MissingLabel {
        label: LabelId,
    },

    #[error("Conditional branch `{stmt}` lacks two resolvable targets")]
    MissingTarget {
        stmt: String,
    },

    #[error("PHI {phi} in {block} has {found} arguments but the block has {expected} predecessors")]
    PhiArgumentMismatch {
        block: BlockId,
        phi: String,
        expected: usize,
        found: usize,
    },

    #[error("SSA corruption: abnormal edge {edge} ({src} -> {dest}) needs partitions {result_partition} and {arg_partition} coalesced, but they conflict")]
    AbnormalConflict {
        edge: EdgeId,
        src: BlockId,
        dest: BlockId,
        result_partition: PartitionId,
        arg_partition: PartitionId,
    },

    #[error("SSA corruption: cannot coalesce across abnormal edge {edge}: {reason}")]
    AbnormalCoalesce {
        edge: EdgeId,
        reason: String,
    },

    #[error("Statements staged on abnormal edge {edge}")]
    PendingOnAbnormalEdge {
        edge: EdgeId,
    },

    #[error("{count} statements were left uncommitted on edges")]
    UncommittedInsertions {
        count: usize,
    },

    #[error("Unbalanced lowering scope {scope}")]
    UnbalancedScope {
        scope: u32,
    },
}

impl BridgeError {
    /// Shorthand for [`BridgeError::StructuralCorruption`].
    pub fn corrupt(reason: impl Into<String>) -> Self {
        BridgeError::StructuralCorruption {
            reason: reason.into(),
        }
    }
}

/// Result type alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
