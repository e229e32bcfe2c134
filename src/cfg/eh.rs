// This module holds the exception-region table handed over by the lowering of structured
// exception blocks. Each region names an optional handler label and an optional outer region;
// a catch-all region stops the walk outwards. The builder asks it whether a statement can
// raise into a handler of this function and wires the EXCEPTION|ABNORMAL edges it implies.

//! Exception regions and exception-edge wiring.
//!
//! Regions are produced by the lowering of structured exception blocks and
//! are consulted read-only here. A statement that may raise inside a region
//! gets an EXCEPTION|ABNORMAL edge to every handler on the region chain up to
//! and including the first catch-all region.

use crate::core::{BridgeError, BridgeResult};
use crate::ir::{BlockId, LabelId, RegionId, Stmt};

use super::graph::{Cfg, EdgeFlags};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// Label of the handler block, if the region has one.
    pub handler: Option<LabelId>,
    /// Enclosing region.
    pub outer: Option<RegionId>,
    /// Handles every exception; propagation stops here.
    pub catch_all: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RegionTable {
    regions: Vec<Region>,
}

impl RegionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, region: Region) -> RegionId {
        let id = RegionId::from_index(self.regions.len());
        self.regions.push(region);
        id
    }

    pub fn get(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Handler labels an exception raised in `region` may reach, innermost
    /// first.
    pub fn handlers_for(&self, region: Option<RegionId>) -> Vec<LabelId> {
        let mut handlers = Vec::new();
        let mut current = region;
        // Bounded by the table size so a cyclic `outer` chain cannot hang us.
        for _ in 0..=self.regions.len() {
            let Some(region) = current.and_then(|r| self.get(r)) else {
                break;
            };
            if let Some(handler) = region.handler {
                if !handlers.contains(&handler) {
                    handlers.push(handler);
                }
            }
            if region.catch_all {
                break;
            }
            current = region.outer;
        }
        handlers
    }

    /// Whether `stmt` may raise into a handler of this function.
    pub fn can_throw_internal(&self, stmt: &Stmt) -> bool {
        stmt.could_throw() && !self.handlers_for(stmt.region).is_empty()
    }
}

/// Wire exception edges for the statement ending `block`. Returns whether
/// any edge was created.
pub fn make_eh_edges(cfg: &mut Cfg, regions: &RegionTable, block: BlockId) -> BridgeResult<bool> {
    let Some(last) = cfg.block(block).last_stmt() else {
        return Ok(false);
    };
    if !last.could_throw() {
        return Ok(false);
    }
    let handlers = regions.handlers_for(last.region);
    for &handler in &handlers {
        let dest = cfg
            .label_block(handler)
            .ok_or(BridgeError::MissingLabel { label: handler })?;
        cfg.make_edge(block, dest, EdgeFlags::EXCEPTION | EdgeFlags::ABNORMAL);
    }
    Ok(!handlers.is_empty())
}
