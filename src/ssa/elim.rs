// This module implements the Elimination-Graph Engine, which turns the PHI nodes of one block
// into an ordered copy sequence for one incoming edge. Nodes are partitions; an arc T -> S
// says "T must receive the value S holds on entry to the edge". Each PHI result is written
// once, so every node has at most one outgoing arc and the graph splits into disjoint chains
// and simple cycles. A forward depth-first pass orders nodes so that a value is read before
// its storage is overwritten; the creation pass then emits copies in that order, and when a
// node still has unprocessed readers it is on a cycle: its old value is saved in a temporary
// first and the readers are fed from the temporary. Arguments that are not partitioned
// (constants and plain variables) cannot take part in cycles and are copied last. Both
// traversals use explicit frame stacks and arena scratch buffers reused across edges.

//! Parallel-copy sequencing for PHI elimination.

use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;

use crate::core::{BitSet, BridgeError, BridgeResult};
use crate::ir::{EdgeId, Operand, Phi};

use super::var_map::{PartitionId, StorageMap};

/// One side of an emitted copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElimValue {
    Partition(PartitionId),
    /// The n-th temporary of this edge.
    Temp(usize),
    /// A value outside any partition.
    Operand(Operand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElimCopy {
    pub dest: ElimValue,
    pub src: ElimValue,
}

/// Scratch state of the engine, reused for every edge.
pub struct ElimGraph<'arena> {
    nodes: BumpVec<'arena, PartitionId>,
    in_graph: BitSet,
    /// `(dest, src)`: `dest` must receive the value of `src`.
    arcs: BumpVec<'arena, (PartitionId, PartitionId)>,
    const_copies: BumpVec<'arena, (PartitionId, Operand)>,
    visited: BitSet,
    stack: BumpVec<'arena, PartitionId>,
    frames: BumpVec<'arena, (PartitionId, usize)>,
    copies: BumpVec<'arena, ElimCopy>,
    /// Partition whose value each temporary saves.
    temps: BumpVec<'arena, PartitionId>,
}

impl<'arena> ElimGraph<'arena> {
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            nodes: BumpVec::new_in(arena),
            in_graph: BitSet::new(),
            arcs: BumpVec::new_in(arena),
            const_copies: BumpVec::new_in(arena),
            visited: BitSet::new(),
            stack: BumpVec::new_in(arena),
            frames: BumpVec::new_in(arena),
            copies: BumpVec::new_in(arena),
            temps: BumpVec::new_in(arena),
        }
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.in_graph.clear();
        self.arcs.clear();
        self.const_copies.clear();
        self.visited.clear();
        self.stack.clear();
        self.frames.clear();
        self.copies.clear();
        self.temps.clear();
    }

    fn add_node(&mut self, p: PartitionId) {
        if self.in_graph.insert(p.index()) {
            self.nodes.push(p);
        }
    }

    /// Load the copy obligations the PHI nodes `phis` impose on `edge`.
    pub fn build(&mut self, phis: &[Phi], edge: EdgeId, storage: &StorageMap) -> BridgeResult<()> {
        self.clear();
        for phi in phis {
            let result = storage.partition_of(phi.result).ok_or_else(|| {
                BridgeError::corrupt(format!("PHI result {} has no partition", phi.result))
            })?;
            let arg = phi.arg_for(edge).ok_or_else(|| {
                BridgeError::corrupt(format!("PHI for {} has no argument on {edge}", phi.result))
            })?;
            match arg {
                Operand::Ssa(name) => {
                    let src = storage.partition_of(name).ok_or_else(|| {
                        BridgeError::corrupt(format!("PHI argument {name} has no partition"))
                    })?;
                    if src != result {
                        self.add_node(result);
                        self.add_node(src);
                        self.arcs.push((result, src));
                    }
                }
                other => self.const_copies.push((result, other)),
            }
        }
        Ok(())
    }

    /// Whether the edge needs any copy at all.
    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty() && self.const_copies.is_empty()
    }

    pub fn num_temps(&self) -> usize {
        self.temps.len()
    }

    /// Copies produced by the last [`ElimGraph::eliminate`].
    pub fn copies(&self) -> &[ElimCopy] {
        &self.copies
    }

    /// Partition saved by temporary `n`.
    pub fn temp_source(&self, n: usize) -> PartitionId {
        self.temps[n]
    }

    fn emit(&mut self, dest: ElimValue, src: ElimValue) {
        log::trace!("  {dest:?} := {src:?}");
        self.copies.push(ElimCopy { dest, src });
    }

    /// Depth-first over copy sources; a node is pushed after everything it
    /// reads from.
    fn forward(&mut self, start: PartitionId) {
        let Self {
            arcs,
            visited,
            stack,
            frames,
            ..
        } = self;
        visited.insert(start.index());
        frames.clear();
        frames.push((start, 0));
        while let Some(frame) = frames.last_mut() {
            let node = frame.0;
            let mut next = None;
            while frame.1 < arcs.len() {
                let (dest, src) = arcs[frame.1];
                frame.1 += 1;
                if dest == node && !visited.contains(src.index()) {
                    next = Some(src);
                    break;
                }
            }
            match next {
                Some(src) => {
                    visited.insert(src.index());
                    frames.push((src, 0));
                }
                None => {
                    stack.push(node);
                    frames.pop();
                }
            }
        }
    }

    /// Visit the unvisited readers of `start` transitively, emitting
    /// `reader := node` as each reader's own readers are done.
    fn backward(&mut self, start: PartitionId) {
        self.visited.insert(start.index());
        self.frames.clear();
        self.frames.push((start, 0));
        loop {
            let Some(frame) = self.frames.last_mut() else {
                break;
            };
            let node = frame.0;
            let mut next = None;
            while frame.1 < self.arcs.len() {
                let (dest, src) = self.arcs[frame.1];
                frame.1 += 1;
                if src == node && !self.visited.contains(dest.index()) {
                    next = Some(dest);
                    break;
                }
            }
            match next {
                Some(reader) => {
                    self.visited.insert(reader.index());
                    self.frames.push((reader, 0));
                }
                None => {
                    self.frames.pop();
                    if let Some(&(parent, _)) = self.frames.last() {
                        self.emit(ElimValue::Partition(node), ElimValue::Partition(parent));
                    }
                }
            }
        }
    }

    fn unvisited_reader(&self, node: PartitionId) -> Option<PartitionId> {
        self.arcs
            .iter()
            .find(|&&(dest, src)| src == node && !self.visited.contains(dest.index()))
            .map(|&(dest, _)| dest)
    }

    fn create(&mut self, node: PartitionId) {
        if self.unvisited_reader(node).is_some() {
            // `node` sits on a cycle: save its value before anything overwrites it.
            let temp = ElimValue::Temp(self.temps.len());
            self.temps.push(node);
            self.emit(temp, ElimValue::Partition(node));
            let mut i = 0;
            while i < self.arcs.len() {
                let (dest, src) = self.arcs[i];
                i += 1;
                if src == node && !self.visited.contains(dest.index()) {
                    self.backward(dest);
                    self.emit(ElimValue::Partition(dest), temp);
                }
            }
        } else if let Some(pos) = self.arcs.iter().position(|&(dest, _)| dest == node) {
            let (_, src) = self.arcs.remove(pos);
            self.visited.insert(node.index());
            self.emit(ElimValue::Partition(node), ElimValue::Partition(src));
        }
    }

    /// Sequence the loaded obligations. Register copies come first, then
    /// the copies of unpartitioned values.
    pub fn eliminate(&mut self) -> &[ElimCopy] {
        self.visited.clear();
        self.stack.clear();
        for i in 0..self.nodes.len() {
            let node = self.nodes[i];
            if !self.visited.contains(node.index()) {
                self.forward(node);
            }
        }

        self.visited.clear();
        while let Some(node) = self.stack.pop() {
            if !self.visited.contains(node.index()) {
                self.create(node);
            }
        }

        for i in 0..self.const_copies.len() {
            let (dest, value) = self.const_copies[i];
            self.emit(ElimValue::Partition(dest), ElimValue::Operand(value));
        }
        &self.copies
    }
}
