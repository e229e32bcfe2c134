// This module builds the interference graph the coalescer consults. Every block is walked
// backwards from its live-out set; a definition interferes with everything live across it
// except the source of the copy that defines it, and PHI results interfere with whatever is
// live at the top of their block. Merging two partitions merges their adjacency.

//! Interference between partitions.

use hashbrown::HashSet;

use crate::cfg::Cfg;
use crate::ir::{Operand, SsaName};

use super::live::LiveRangeInfo;
use super::var_map::{PartitionId, VarMap};

/// Undirected interference graph over partition ids.
#[derive(Debug, Clone, Default)]
pub struct ConflictGraph {
    adjacent: Vec<HashSet<u32>>,
}

impl ConflictGraph {
    pub fn new(num_partitions: usize) -> Self {
        Self {
            adjacent: vec![HashSet::new(); num_partitions],
        }
    }

    pub fn add(&mut self, a: PartitionId, b: PartitionId) {
        if a == b {
            return;
        }
        self.adjacent[a.index()].insert(b.0);
        self.adjacent[b.index()].insert(a.0);
    }

    pub fn conflicts(&self, a: PartitionId, b: PartitionId) -> bool {
        self.adjacent[a.index()].contains(&b.0)
    }

    pub fn degree(&self, p: PartitionId) -> usize {
        self.adjacent[p.index()].len()
    }

    /// After `gone` was merged into `keep`, everything that conflicted with
    /// either conflicts with the merged partition.
    pub fn merge(&mut self, keep: PartitionId, gone: PartitionId) {
        if keep == gone {
            return;
        }
        let neighbours = std::mem::take(&mut self.adjacent[gone.index()]);
        for n in neighbours {
            self.adjacent[n as usize].remove(&gone.0);
            if n != keep.0 {
                self.add(keep, PartitionId(n));
            }
        }
    }

    /// Walk every block backwards from its live-on-exit set. A definition
    /// conflicts with everything live across it, except the source of a
    /// copy it is defined by. PHI results conflict with what is live at the
    /// top of their block.
    pub fn build(cfg: &Cfg, map: &VarMap, live: &LiveRangeInfo) -> Self {
        let mut graph = Self::new(map.num_partitions());
        let partition = |name: SsaName| map.partition_of(name);

        for bb in cfg.block_ids() {
            let block = cfg.block(bb);
            let mut live_now = live.live_on_exit(bb).clone();

            for stmt in block.stmts.iter().rev() {
                if let Some(Operand::Ssa(name)) = stmt.def() {
                    if let Some(def) = partition(*name) {
                        let copy_src = stmt
                            .as_copy()
                            .and_then(|(_, src)| src.as_ssa())
                            .and_then(partition);
                        for other in live_now.iter().map(PartitionId::from_index) {
                            if Some(other) != copy_src {
                                graph.add(def, other);
                            }
                        }
                        live_now.remove(def.index());
                    }
                }
                stmt.for_each_use(|op| {
                    if let Some(p) = op.as_ssa().and_then(partition) {
                        live_now.insert(p.index());
                    }
                });
            }

            for phi in &block.phis {
                if let Some(result) = partition(phi.result) {
                    for other in live_now.iter().map(PartitionId::from_index) {
                        graph.add(result, other);
                    }
                }
            }
        }
        graph
    }
}
