//! The per-function context every pass receives.
//!
//! Owns the graph, the symbol tables and the read-only collaborator data
//! (exception regions, loop structure) for exactly one function.

use crate::cfg::{Cfg, LoopStructure, RegionTable};
use crate::ir::{Symbols, VarId};

#[derive(Debug, Clone, Default)]
pub struct FunctionContext {
    pub name: String,
    /// Parameters, in declaration order.
    pub params: Vec<VarId>,
    pub symbols: Symbols,
    pub cfg: Cfg,
    pub regions: RegionTable,
    /// Current loop structure, if a loop analysis has run.
    pub loops: Option<LoopStructure>,
}

impl FunctionContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Number of PHI nodes left in the function.
    pub fn num_phis(&self) -> usize {
        self.cfg
            .block_ids()
            .map(|b| self.cfg.block(b).phis.len())
            .sum()
    }
}
