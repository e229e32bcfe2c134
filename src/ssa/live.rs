// This module implements the Live-Range Analyzer over the partitions of an open VarMap. Local
// use and def sets are collected per block, PHI arguments are seeded as live out of the
// block they flow from, and live-in/live-out sets are iterated to a fixed point in reverse
// postorder. Coalescing folds merged partitions into the result instead of recomputing it.

//! Live-Range Analyzer.
//!
//! Backward dataflow over partitions. A PHI result is defined at the top of
//! its own block, so it is never live on entry to that block; a PHI argument
//! is a use at the end of the predecessor the argument flows from.

use crate::cfg::Cfg;
use crate::core::BitSet;
use crate::ir::{BlockId, Operand};

use super::var_map::{PartitionId, VarMap};

#[derive(Debug, Clone)]
pub struct LiveRangeInfo {
    /// Per partition: blocks it is live on entry to.
    live_on_entry: Vec<BitSet>,
    /// Per block: partitions live on exit from it.
    live_on_exit: Vec<BitSet>,
}

/// Upward-exposed uses and definitions of one block.
struct BlockSets {
    uses: BitSet,
    defs: BitSet,
}

fn local_sets(cfg: &Cfg, map: &VarMap, bb: BlockId) -> BlockSets {
    let mut sets = BlockSets {
        uses: BitSet::new(),
        defs: BitSet::new(),
    };
    let block = cfg.block(bb);
    for phi in &block.phis {
        if let Some(p) = map.partition_of(phi.result) {
            sets.defs.insert(p.index());
        }
    }
    for stmt in &block.stmts {
        stmt.for_each_use(|op| {
            if let Some(p) = op.as_ssa().and_then(|n| map.partition_of(n)) {
                if !sets.defs.contains(p.index()) {
                    sets.uses.insert(p.index());
                }
            }
        });
        if let Some(Operand::Ssa(name)) = stmt.def() {
            if let Some(p) = map.partition_of(*name) {
                sets.defs.insert(p.index());
            }
        }
    }
    sets
}

impl LiveRangeInfo {
    /// Solve liveness for every partition of `map` over `cfg`.
    pub fn compute(cfg: &Cfg, map: &VarMap) -> Self {
        let capacity = cfg.block_capacity();
        let mut live_in = vec![BitSet::new(); capacity];
        let mut live_out = vec![BitSet::new(); capacity];

        let mut locals: Vec<Option<BlockSets>> = (0..capacity).map(|_| None).collect();
        for bb in cfg.block_ids() {
            locals[bb.index()] = Some(local_sets(cfg, map, bb));
            // PHI arguments are live out of the block they flow from.
            for phi in &cfg.block(bb).phis {
                for arg in &phi.args {
                    if let Some(p) = arg.value.as_ssa().and_then(|n| map.partition_of(n)) {
                        live_out[cfg.edge(arg.edge).src.index()].insert(p.index());
                    }
                }
            }
        }

        let order = cfg.reverse_postorder();
        let mut iterations = 0;
        let mut changed = true;
        while changed {
            changed = false;
            iterations += 1;
            for &bb in order.iter().rev() {
                let mut out = live_out[bb.index()].clone();
                for &e in &cfg.block(bb).succs {
                    out.union_with(&live_in[cfg.edge(e).dest.index()]);
                }
                let Some(sets) = &locals[bb.index()] else {
                    continue;
                };
                let mut inn = out.clone();
                inn.subtract(&sets.defs);
                inn.union_with(&sets.uses);

                if inn != live_in[bb.index()] {
                    live_in[bb.index()] = inn;
                    changed = true;
                }
                if out != live_out[bb.index()] {
                    live_out[bb.index()] = out;
                    changed = true;
                }
            }
        }
        log::trace!("liveness converged after {iterations} iterations");

        let mut live_on_entry = vec![BitSet::new(); map.num_partitions()];
        for bb in cfg.block_ids() {
            for p in live_in[bb.index()].iter() {
                live_on_entry[p].insert(bb.index());
            }
        }
        LiveRangeInfo {
            live_on_entry,
            live_on_exit: live_out,
        }
    }

    pub fn live_on_entry(&self, p: PartitionId) -> &BitSet {
        &self.live_on_entry[p.index()]
    }

    pub fn live_on_exit(&self, bb: BlockId) -> &BitSet {
        &self.live_on_exit[bb.index()]
    }

    pub fn is_live_on_entry(&self, p: PartitionId, bb: BlockId) -> bool {
        self.live_on_entry[p.index()].contains(bb.index())
    }

    /// Partitions live when the function starts.
    pub fn function_entry_live(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.live_on_exit[BlockId::ENTRY.index()]
            .iter()
            .map(PartitionId::from_index)
    }

    /// Fold the ranges of `gone` into `keep` after the two were merged.
    pub fn merge_partitions(&mut self, keep: PartitionId, gone: PartitionId) {
        if keep == gone {
            return;
        }
        let blocks = std::mem::take(&mut self.live_on_entry[gone.index()]);
        self.live_on_entry[keep.index()].union_with(&blocks);
        for out in &mut self.live_on_exit {
            if out.remove(gone.index()) {
                out.insert(keep.index());
            }
        }
    }
}
