// This module holds everything that creates or edits the control-flow graph. The Graph Model
// (graph) is the arena of blocks and edges every other part mutates; builder turns a flat
// statement stream into a graph; eh and loops are the read-only collaborator data for
// exception edges and merge decisions; cleanup removes dead labels and unreachable blocks,
// merges straight-line pairs and splits critical edges; verify checks the structural
// invariants; edge_insert commits statements staged on edges during out-of-SSA conversion.

//! Control-flow graph construction and editing.

pub mod builder;
pub mod cleanup;
pub mod edge_insert;
pub mod eh;
pub mod graph;
pub mod loops;
pub mod verify;

pub use builder::{build_cfg, stmt_ends_block, CfgOptions};
pub use edge_insert::{
    commit_edge_inserts_for_block, commit_one_edge_insert, insert_on_edge, perform_edge_inserts,
    Placement,
};
pub use eh::{Region, RegionTable};
pub use graph::{BasicBlock, BlockFlags, Cfg, Edge, EdgeFlags, PROB_BASE};
pub use loops::LoopStructure;
pub use verify::verify_flow;
