// This module discovers the loop structure the cleanup passes consult. A depth-first walk
// from ENTRY finds back edges; their targets are headers and their sources latches, and the
// loop depth of a block counts the loops it sits in.

//! Loop structure consulted when deciding whether blocks may be merged.
//!
//! A loop is identified by a back edge `latch -> header` found by a
//! depth-first walk from ENTRY.

use crate::core::BitSet;
use crate::ir::BlockId;

use super::graph::Cfg;

#[derive(Debug, Clone, Default)]
pub struct LoopStructure {
    headers: BitSet,
    latches: BitSet,
    depth: Vec<u32>,
}

impl LoopStructure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a loop given by its header and latch.
    pub fn add_loop(&mut self, header: BlockId, latch: BlockId) {
        self.headers.insert(header.index());
        self.latches.insert(latch.index());
    }

    pub fn is_header(&self, block: BlockId) -> bool {
        self.headers.contains(block.index())
    }

    pub fn is_latch(&self, block: BlockId) -> bool {
        self.latches.contains(block.index())
    }

    /// Loop nesting depth of `block`; zero outside any loop.
    pub fn depth(&self, block: BlockId) -> u32 {
        self.depth.get(block.index()).copied().unwrap_or(0)
    }

    pub fn num_headers(&self) -> usize {
        self.headers.count()
    }

    /// Find loops from the DFS back edges of `cfg`.
    pub fn discover(cfg: &Cfg) -> Self {
        let mut loops = LoopStructure::new();
        loops.depth = vec![0; cfg.block_capacity()];

        let mut visited = BitSet::with_capacity(cfg.block_capacity());
        let mut on_stack = BitSet::with_capacity(cfg.block_capacity());
        let mut back_edges = Vec::new();

        // Frames are (block, index of the next successor to look at).
        let mut stack = vec![(BlockId::ENTRY, 0usize)];
        visited.insert(BlockId::ENTRY.index());
        on_stack.insert(BlockId::ENTRY.index());
        while let Some(frame) = stack.last_mut() {
            let (block, next) = *frame;
            let succs = &cfg.block(block).succs;
            if next < succs.len() {
                frame.1 += 1;
                let succ = cfg.edge(succs[next]).dest;
                if visited.insert(succ.index()) {
                    on_stack.insert(succ.index());
                    stack.push((succ, 0));
                } else if on_stack.contains(succ.index()) {
                    back_edges.push((block, succ));
                }
            } else {
                on_stack.remove(block.index());
                stack.pop();
            }
        }

        for (latch, header) in back_edges {
            loops.add_loop(header, latch);
            for member in natural_loop(cfg, header, latch).iter() {
                loops.depth[member] += 1;
            }
        }
        log::trace!("discovered {} loop headers", loops.num_headers());
        loops
    }
}

/// Blocks of the natural loop of the back edge `latch -> header`.
fn natural_loop(cfg: &Cfg, header: BlockId, latch: BlockId) -> BitSet {
    let mut body = BitSet::new();
    body.insert(header.index());
    let mut worklist = Vec::new();
    if body.insert(latch.index()) {
        worklist.push(latch);
    }
    while let Some(block) = worklist.pop() {
        for &e in &cfg.block(block).preds {
            let pred = cfg.edge(e).src;
            if body.insert(pred.index()) {
                worklist.push(pred);
            }
        }
    }
    body
}
