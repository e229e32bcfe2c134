// This module implements the Graph Model: basic blocks and directed edges stored in two
// index-addressed arenas. Blocks own their statements and PHI nodes plus the ordered lists of
// incoming and outgoing edge ids; edges carry their endpoints, a flag set, an execution
// probability and the pending list of statements staged "on" the edge. Nothing holds a
// reference into another node, so loops in the graph never become ownership cycles. Removed
// blocks and edges stay behind as tombstones so ids remain stable for the lifetime of the
// function. The primitive edits every later pass is written in terms of live here: edge
// creation and removal, redirection (including retargeting the branch statement of the
// source), edge splitting, block removal, the label-to-block table and reverse postorder.

//! Basic blocks, edges and the primitive graph edits.

use bitflags::bitflags;
use hashbrown::HashMap;

use crate::core::{BitSet, BridgeError, BridgeResult};
use crate::ir::{BlockId, EdgeId, LabelId, LabelTable, Phi, Stmt, StmtKind};

use super::builder::group_case_ranges;

/// Probabilities are fixed point with this base.
pub const PROB_BASE: u32 = 10_000;

bitflags! {
    /// Kind and properties of a control-flow edge.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EdgeFlags: u16 {
        /// Control reaches the destination without an explicit jump.
        const FALLTHROUGH = 0x01;
        /// Taken when a conditional branch's condition holds.
        const TRUE_BRANCH = 0x02;
        /// Taken when a conditional branch's condition fails.
        const FALSE_BRANCH = 0x04;
        /// Transfer no code can be placed on (computed goto, non-local goto, exception).
        const ABNORMAL = 0x08;
        /// Exception propagation to a handler.
        const EXCEPTION = 0x10;
        /// Not a real transfer; keeps noreturn blocks connected to EXIT.
        const FAKE = 0x20;
        /// Source has several successors and destination several predecessors.
        const CRITICAL = 0x40;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BlockFlags: u8 {
        const ENTRY = 0x1;
        const EXIT = 0x2;
        /// Created after the initial build (split or forwarder block).
        const NEW = 0x4;
        /// Tombstone left by block removal.
        const REMOVED = 0x8;
    }
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub index: BlockId,
    pub flags: BlockFlags,
    pub stmts: Vec<Stmt>,
    pub phis: Vec<Phi>,
    pub preds: Vec<EdgeId>,
    pub succs: Vec<EdgeId>,
}

impl BasicBlock {
    fn new(index: BlockId, flags: BlockFlags) -> Self {
        Self {
            index,
            flags,
            stmts: Vec::new(),
            phis: Vec::new(),
            preds: Vec::new(),
            succs: Vec::new(),
        }
    }

    pub fn is_removed(&self) -> bool {
        self.flags.contains(BlockFlags::REMOVED)
    }

    /// Whether this is ENTRY or EXIT.
    pub fn is_fixed(&self) -> bool {
        self.flags.intersects(BlockFlags::ENTRY | BlockFlags::EXIT)
    }

    /// Labels at the start of the block.
    pub fn labels(&self) -> impl Iterator<Item = LabelId> + '_ {
        self.stmts.iter().map_while(Stmt::as_label)
    }

    /// Index of the first statement after the leading labels.
    pub fn first_real_index(&self) -> usize {
        self.stmts.iter().take_while(|s| s.is_label()).count()
    }

    pub fn last_stmt(&self) -> Option<&Stmt> {
        self.stmts.last()
    }
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub src: BlockId,
    pub dest: BlockId,
    pub flags: EdgeFlags,
    pub probability: u32,
    /// Statements staged to run when the edge is traversed.
    pub pending: Vec<Stmt>,
    removed: bool,
}

impl Edge {
    pub fn is_abnormal(&self) -> bool {
        self.flags.contains(EdgeFlags::ABNORMAL)
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }
}

/// The control-flow graph of one function.
#[derive(Debug, Clone)]
pub struct Cfg {
    blocks: Vec<BasicBlock>,
    edges: Vec<Edge>,
    label_map: HashMap<LabelId, BlockId>,
}

impl Default for Cfg {
    fn default() -> Self {
        Self::new()
    }
}

impl Cfg {
    /// Create a graph holding only ENTRY and EXIT.
    pub fn new() -> Self {
        Self {
            blocks: vec![
                BasicBlock::new(BlockId::ENTRY, BlockFlags::ENTRY),
                BasicBlock::new(BlockId::EXIT, BlockFlags::EXIT),
            ],
            edges: Vec::new(),
            label_map: HashMap::new(),
        }
    }

    pub fn new_block(&mut self, flags: BlockFlags) -> BlockId {
        let id = BlockId::from_index(self.blocks.len());
        self.blocks.push(BasicBlock::new(id, flags));
        id
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.index()]
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> &mut Edge {
        &mut self.edges[id.index()]
    }

    /// Ids of all live blocks, ENTRY and EXIT included, in creation order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks
            .iter()
            .filter(|b| !b.is_removed())
            .map(|b| b.index)
    }

    /// Ids of live blocks other than ENTRY and EXIT.
    pub fn ordinary_block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks
            .iter()
            .filter(|b| !b.is_removed() && !b.is_fixed())
            .map(|b| b.index)
    }

    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.removed)
            .map(|(i, _)| EdgeId::from_index(i))
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut BasicBlock> {
        self.blocks.iter_mut().filter(|b| !b.is_removed())
    }

    pub fn edges_mut(&mut self) -> impl Iterator<Item = &mut Edge> {
        self.edges.iter_mut().filter(|e| !e.removed)
    }

    /// Number of live blocks, ENTRY and EXIT included.
    pub fn num_blocks(&self) -> usize {
        self.blocks.iter().filter(|b| !b.is_removed()).count()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.iter().filter(|e| !e.removed).count()
    }

    /// Upper bound on block indices, for sizing per-block tables.
    pub fn block_capacity(&self) -> usize {
        self.blocks.len()
    }

    pub fn find_edge(&self, src: BlockId, dest: BlockId) -> Option<EdgeId> {
        self.block(src)
            .succs
            .iter()
            .copied()
            .find(|&e| self.edge(e).dest == dest)
    }

    /// Create an edge, or OR `flags` into the existing `src -> dest` edge.
    pub fn make_edge(&mut self, src: BlockId, dest: BlockId, flags: EdgeFlags) -> EdgeId {
        if let Some(existing) = self.find_edge(src, dest) {
            self.edge_mut(existing).flags |= flags;
            return existing;
        }
        let id = EdgeId::from_index(self.edges.len());
        self.edges.push(Edge {
            src,
            dest,
            flags,
            probability: 0,
            pending: Vec::new(),
            removed: false,
        });
        self.block_mut(src).succs.push(id);
        self.block_mut(dest).preds.push(id);
        id
    }

    /// Remove an edge together with the PHI arguments flowing along it.
    pub fn remove_edge(&mut self, id: EdgeId) {
        let (src, dest) = {
            let edge = self.edge(id);
            (edge.src, edge.dest)
        };
        self.block_mut(src).succs.retain(|&e| e != id);
        let dest_block = self.block_mut(dest);
        dest_block.preds.retain(|&e| e != id);
        for phi in &mut dest_block.phis {
            phi.remove_arg(id);
        }
        let edge = self.edge_mut(id);
        edge.pending.clear();
        edge.removed = true;
    }

    /// Point `id` at `new_dest` without touching the source's statements.
    /// PHI arguments keyed by `id` at the old destination are dropped.
    pub fn redirect_edge_succ(&mut self, id: EdgeId, new_dest: BlockId) {
        let old_dest = self.edge(id).dest;
        if old_dest == new_dest {
            return;
        }
        let old = self.block_mut(old_dest);
        old.preds.retain(|&e| e != id);
        for phi in &mut old.phis {
            phi.remove_arg(id);
        }
        self.block_mut(new_dest).preds.push(id);
        self.edge_mut(id).dest = new_dest;
    }

    /// Redirect `id` to `new_dest`, rewriting a conditional or multi-way
    /// branch at the end of the source so that it jumps to the new block.
    /// Case ranges of a rewritten switch are regrouped afterwards.
    pub fn redirect_edge_and_branch(
        &mut self,
        id: EdgeId,
        new_dest: BlockId,
        labels: &mut LabelTable,
    ) -> BridgeResult<()> {
        let (src, old_dest) = {
            let edge = self.edge(id);
            (edge.src, edge.dest)
        };
        let needs_label = matches!(
            self.block(src).last_stmt().map(|s| &s.kind),
            Some(StmtKind::CondBranch { .. } | StmtKind::Switch { .. })
        );
        if needs_label {
            let new_label = self.block_label(new_dest, labels);
            let label_map = &self.label_map;
            let last = self.blocks[src.index()]
                .stmts
                .last_mut()
                .ok_or_else(|| BridgeError::corrupt(format!("{src} lost its branch")))?;
            last.for_each_target_mut(|l| {
                if label_map.get(l) == Some(&old_dest) {
                    *l = new_label;
                }
            });
            if let StmtKind::Switch { cases, default, .. } = &mut last.kind {
                group_case_ranges(cases, *default);
            }
        }
        self.redirect_edge_succ(id, new_dest);
        Ok(())
    }

    /// Split `id` by inserting a new empty block on it. The original edge
    /// now ends at the new block; a fresh fallthrough edge continues to the
    /// old destination and inherits the PHI arguments.
    pub fn split_edge(&mut self, id: EdgeId, labels: &mut LabelTable) -> BridgeResult<BlockId> {
        let dest = self.edge(id).dest;
        let new_block = self.new_block(BlockFlags::NEW);

        let continuation = self.make_edge(new_block, dest, EdgeFlags::FALLTHROUGH);
        self.edge_mut(continuation).probability = PROB_BASE;
        for phi in &mut self.block_mut(dest).phis {
            phi.rekey(id, continuation);
        }

        self.redirect_edge_and_branch(id, new_block, labels)?;
        self.edge_mut(id).flags.remove(EdgeFlags::CRITICAL);
        log::trace!("split {id} with new block {new_block}");
        Ok(new_block)
    }

    /// Make every outgoing edge of `from` leave from `to` instead.
    pub fn transfer_succs(&mut self, from: BlockId, to: BlockId) {
        let succs = std::mem::take(&mut self.block_mut(from).succs);
        for &e in &succs {
            self.edge_mut(e).src = to;
        }
        self.block_mut(to).succs.extend(succs);
    }

    /// Remove a block. Its PHI nodes and outgoing edges must already be gone;
    /// incoming edges are removed here.
    pub fn remove_block(&mut self, id: BlockId) -> BridgeResult<()> {
        let block = self.block(id);
        if block.is_fixed() {
            return Err(BridgeError::corrupt(format!("attempt to remove fixed block {id}")));
        }
        if !block.phis.is_empty() || !block.succs.is_empty() {
            return Err(BridgeError::corrupt(format!(
                "{id} removed while it still has PHI nodes or successors"
            )));
        }
        for e in block.preds.clone() {
            self.remove_edge(e);
        }
        let labels: Vec<LabelId> = self.block(id).labels().collect();
        for label in labels {
            self.label_map.remove(&label);
        }
        let block = self.block_mut(id);
        block.stmts.clear();
        block.flags.insert(BlockFlags::REMOVED);
        Ok(())
    }

    /// Single outgoing edge of `id`, if it has exactly one.
    pub fn single_succ(&self, id: BlockId) -> Option<EdgeId> {
        match self.block(id).succs.as_slice() {
            [e] => Some(*e),
            _ => None,
        }
    }

    pub fn single_pred(&self, id: BlockId) -> Option<EdgeId> {
        match self.block(id).preds.as_slice() {
            [e] => Some(*e),
            _ => None,
        }
    }

    pub fn is_critical(&self, id: EdgeId) -> bool {
        let edge = self.edge(id);
        self.block(edge.src).succs.len() > 1 && self.block(edge.dest).preds.len() > 1
    }

    /// Recompute the CRITICAL flag on every edge.
    pub fn mark_critical_edges(&mut self) {
        for i in 0..self.edges.len() {
            let id = EdgeId::from_index(i);
            if self.edges[i].removed {
                continue;
            }
            let critical = self.is_critical(id);
            self.edges[i].flags.set(EdgeFlags::CRITICAL, critical);
        }
    }

    pub fn label_block(&self, label: LabelId) -> Option<BlockId> {
        self.label_map.get(&label).copied()
    }

    pub fn set_label_block(&mut self, label: LabelId, block: BlockId) {
        self.label_map.insert(label, block);
    }

    pub fn forget_label(&mut self, label: LabelId) {
        self.label_map.remove(&label);
    }

    /// Rebuild the label table from the leading labels of every block.
    pub fn rebuild_label_map(&mut self) {
        self.label_map.clear();
        for block in self.blocks.iter().filter(|b| !b.is_removed()) {
            for label in block.labels() {
                self.label_map.insert(label, block.index);
            }
        }
    }

    /// First leading label of `id`, creating a synthetic one if it has none.
    pub fn block_label(&mut self, id: BlockId, labels: &mut LabelTable) -> LabelId {
        if let Some(label) = self.block(id).labels().next() {
            return label;
        }
        let label = labels.create_artificial();
        let mut stmt = Stmt::label(label);
        stmt.bb = Some(id);
        self.block_mut(id).stmts.insert(0, stmt);
        self.label_map.insert(label, id);
        label
    }

    /// Insert statements right after the leading labels of `id`.
    pub fn insert_at_top(&mut self, id: BlockId, stmts: impl IntoIterator<Item = Stmt>) {
        let block = self.block_mut(id);
        let at = block.first_real_index();
        let stmts: Vec<Stmt> = stmts
            .into_iter()
            .map(|mut s| {
                s.bb = Some(id);
                s
            })
            .collect();
        block.stmts.splice(at..at, stmts).for_each(drop);
    }

    /// Append statements at the end of `id`.
    pub fn append(&mut self, id: BlockId, stmts: impl IntoIterator<Item = Stmt>) {
        let block = self.block_mut(id);
        block.stmts.extend(stmts.into_iter().map(|mut s| {
            s.bb = Some(id);
            s
        }));
    }

    /// Blocks reachable from ENTRY in reverse postorder.
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut post = Vec::new();
        let mut visited = BitSet::with_capacity(self.blocks.len());
        let mut stack = vec![(BlockId::ENTRY, false)];
        while let Some((block, processed)) = stack.pop() {
            if processed {
                post.push(block);
                continue;
            }
            if !visited.insert(block.index()) {
                continue;
            }
            stack.push((block, true));
            // Reversed so the first successor is explored first.
            for &e in self.block(block).succs.iter().rev() {
                let dest = self.edge(e).dest;
                if !visited.contains(dest.index()) {
                    stack.push((dest, false));
                }
            }
        }
        post.reverse();
        post
    }

    /// Blocks reachable from ENTRY along any edge.
    pub fn reachable(&self) -> BitSet {
        let mut seen = BitSet::with_capacity(self.blocks.len());
        let mut worklist = vec![BlockId::ENTRY];
        seen.insert(BlockId::ENTRY.index());
        while let Some(block) = worklist.pop() {
            for &e in &self.block(block).succs {
                let dest = self.edge(e).dest;
                if seen.insert(dest.index()) {
                    worklist.push(dest);
                }
            }
        }
        seen
    }

    /// Total number of statements in live blocks.
    pub fn num_stmts(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| !b.is_removed())
            .map(|b| b.stmts.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Operand, PhiArg, SsaName};

    fn diamond() -> (Cfg, [BlockId; 4]) {
        let mut cfg = Cfg::new();
        let a = cfg.new_block(BlockFlags::empty());
        let b = cfg.new_block(BlockFlags::empty());
        let c = cfg.new_block(BlockFlags::empty());
        let d = cfg.new_block(BlockFlags::empty());
        cfg.make_edge(BlockId::ENTRY, a, EdgeFlags::FALLTHROUGH);
        cfg.make_edge(a, b, EdgeFlags::TRUE_BRANCH);
        cfg.make_edge(a, c, EdgeFlags::FALSE_BRANCH);
        cfg.make_edge(b, d, EdgeFlags::FALLTHROUGH);
        cfg.make_edge(c, d, EdgeFlags::FALLTHROUGH);
        cfg.make_edge(d, BlockId::EXIT, EdgeFlags::empty());
        (cfg, [a, b, c, d])
    }

    #[test]
    fn test_make_edge_dedups() {
        let (mut cfg, [a, b, ..]) = diamond();
        let before = cfg.num_edges();
        let e = cfg.make_edge(a, b, EdgeFlags::FALSE_BRANCH);
        assert_eq!(cfg.num_edges(), before);
        assert!(cfg
            .edge(e)
            .flags
            .contains(EdgeFlags::TRUE_BRANCH | EdgeFlags::FALSE_BRANCH));
    }

    #[test]
    fn test_reverse_postorder() {
        let (cfg, [a, b, c, d]) = diamond();
        let rpo = cfg.reverse_postorder();
        assert_eq!(rpo[0], BlockId::ENTRY);
        assert_eq!(rpo[1], a);
        assert_eq!(*rpo.last().unwrap(), BlockId::EXIT);
        let pos = |x: BlockId| rpo.iter().position(|&y| y == x).unwrap();
        assert!(pos(b) < pos(d));
        assert!(pos(c) < pos(d));
    }

    #[test]
    fn test_split_edge_rekeys_phi_args() {
        let (mut cfg, [a, b, c, _]) = diamond();
        let mut labels = LabelTable::new();
        // Make a -> b critical by adding a second predecessor to b.
        cfg.make_edge(c, b, EdgeFlags::empty());
        let e = cfg.find_edge(a, b).unwrap();
        let e_cb = cfg.find_edge(c, b).unwrap();
        cfg.block_mut(b).phis.push(Phi {
            result: SsaName(0),
            args: vec![
                PhiArg {
                    edge: e,
                    value: Operand::Const(1),
                },
                PhiArg {
                    edge: e_cb,
                    value: Operand::Const(2),
                },
            ],
        });
        cfg.mark_critical_edges();
        assert!(cfg.edge(e).flags.contains(EdgeFlags::CRITICAL));

        let n = cfg.split_edge(e, &mut labels).unwrap();
        assert_eq!(cfg.edge(e).dest, n);
        assert!(!cfg.edge(e).flags.contains(EdgeFlags::CRITICAL));
        let cont = cfg.single_succ(n).unwrap();
        assert_eq!(cfg.edge(cont).dest, b);
        assert_eq!(cfg.block(b).phis[0].arg_for(cont), Some(Operand::Const(1)));
        assert_eq!(cfg.block(b).phis[0].arg_for(e), None);
        assert_eq!(cfg.block(b).preds.len(), 2);
    }

    #[test]
    fn test_remove_block_requires_no_successors() {
        let (mut cfg, [_, b, _, d]) = diamond();
        assert!(cfg.remove_block(b).is_err());
        let out = cfg.single_succ(b).unwrap();
        cfg.remove_edge(out);
        cfg.remove_block(b).unwrap();
        assert!(cfg.block(b).is_removed());
        assert_eq!(cfg.block(d).preds.len(), 1);
        assert!(cfg.remove_block(BlockId::EXIT).is_err());
    }
}
