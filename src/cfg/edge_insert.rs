// This module implements the Edge-Insertion / Code-Motion Committer. Out-of-SSA conversion
// stages copies "on" edges; here they become real statements. For one edge the placement is,
// in order of preference: the top of the destination (after its labels) when the edge is the
// destination's only way in and the destination has no PHI nodes; the bottom of the source
// when the edge is the source's only non-abnormal way out and the source does not end in a
// statement that must stay last; otherwise a new block split onto the edge. Per destination
// block, incoming edges whose staged lists are structurally equal are redirected through one
// shared forwarder block so the sequence exists once. Abnormal edges can never carry code;
// staging on them is an error, and a block with an abnormal predecessor is committed edge by
// edge without forwarders.

//! Committing statements staged on edges.

use bumpalo::collections::Vec as BumpVec;

use crate::core::{BitSet, BridgeError, BridgeResult, BridgeSession};
use crate::function::FunctionContext;
use crate::ir::{BlockId, EdgeId, Stmt};

use super::builder::stmt_ends_block;
use super::graph::{BlockFlags, Cfg, EdgeFlags, PROB_BASE};

/// Where the staged statements of an edge go when committed alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// After the leading labels of the destination.
    DestTop(BlockId),
    /// At the end of the source.
    SrcEnd(BlockId),
    /// In a new block split onto the edge.
    Split,
}

/// Stage `stmt` to run whenever `edge` is traversed.
pub fn insert_on_edge(cfg: &mut Cfg, edge: EdgeId, stmt: Stmt) -> BridgeResult<()> {
    if cfg.edge(edge).is_abnormal() {
        return Err(BridgeError::PendingOnAbnormalEdge { edge });
    }
    cfg.edge_mut(edge).pending.push(stmt);
    Ok(())
}

pub fn choose_placement(ctx: &FunctionContext, edge: EdgeId) -> Placement {
    let cfg = &ctx.cfg;
    let e = cfg.edge(edge);
    if e.dest != BlockId::EXIT
        && cfg.single_pred(e.dest) == Some(edge)
        && cfg.block(e.dest).phis.is_empty()
    {
        return Placement::DestTop(e.dest);
    }
    if e.src != BlockId::ENTRY
        && cfg.single_succ(e.src) == Some(edge)
        && !e.is_abnormal()
        && !cfg
            .block(e.src)
            .last_stmt()
            .is_some_and(|last| stmt_ends_block(last, &ctx.regions))
    {
        return Placement::SrcEnd(e.src);
    }
    Placement::Split
}

/// Commit the staged statements of one edge. Returns the block that
/// received them, or `None` if nothing was staged.
pub fn commit_one_edge_insert(
    session: &BridgeSession<'_>,
    ctx: &mut FunctionContext,
    edge: EdgeId,
) -> BridgeResult<Option<BlockId>> {
    if ctx.cfg.edge(edge).pending.is_empty() {
        return Ok(None);
    }
    if ctx.cfg.edge(edge).is_abnormal() {
        return Err(BridgeError::PendingOnAbnormalEdge { edge });
    }

    let placement = choose_placement(ctx, edge);
    let stmts = std::mem::take(&mut ctx.cfg.edge_mut(edge).pending);
    let count = stmts.len();
    let target = match placement {
        Placement::DestTop(bb) => {
            ctx.cfg.insert_at_top(bb, stmts);
            bb
        }
        Placement::SrcEnd(bb) => {
            ctx.cfg.append(bb, stmts);
            bb
        }
        Placement::Split => {
            let bb = ctx.cfg.split_edge(edge, &mut ctx.symbols.labels)?;
            session.record(|s| {
                s.edges_split += 1;
                s.blocks_created += 1;
            });
            ctx.cfg.append(bb, stmts);
            bb
        }
    };
    log::trace!("committed {count} statements of {edge} as {placement:?}");
    Ok(Some(target))
}

fn same_pending(cfg: &Cfg, a: EdgeId, b: EdgeId) -> bool {
    let (a, b) = (&cfg.edge(a).pending, &cfg.edge(b).pending);
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_as(y))
}

/// Route every edge of `group` into `dest` through a new block holding
/// their shared staged sequence.
fn make_forwarder(
    session: &BridgeSession<'_>,
    ctx: &mut FunctionContext,
    dest: BlockId,
    group: &[EdgeId],
) -> BridgeResult<BlockId> {
    let Some((&leader, rest)) = group.split_first() else {
        return Err(BridgeError::corrupt("empty forwarder group"));
    };
    let stmts = std::mem::take(&mut ctx.cfg.edge_mut(leader).pending);
    for &e in rest {
        ctx.cfg.edge_mut(e).pending.clear();
    }

    let forwarder = ctx.cfg.new_block(BlockFlags::NEW);
    for &e in group {
        ctx.cfg
            .redirect_edge_and_branch(e, forwarder, &mut ctx.symbols.labels)?;
    }
    let out = ctx.cfg.make_edge(forwarder, dest, EdgeFlags::FALLTHROUGH);
    ctx.cfg.edge_mut(out).probability = PROB_BASE;
    ctx.cfg.append(forwarder, stmts);

    session.record(|s| {
        s.forwarders_created += 1;
        s.blocks_created += 1;
    });
    log::trace!("forwarder {forwarder} serves {} edges into {dest}", group.len());
    Ok(forwarder)
}

/// Commit the staged statements of every incoming edge of `bb`, sharing
/// one forwarder block between edges that staged the same sequence.
pub fn commit_edge_inserts_for_block(
    session: &BridgeSession<'_>,
    ctx: &mut FunctionContext,
    bb: BlockId,
) -> BridgeResult<()> {
    let arena = session.arena();
    let mut candidates = BumpVec::new_in(arena);
    let mut any_abnormal = false;
    for &e in &ctx.cfg.block(bb).preds {
        let edge = ctx.cfg.edge(e);
        any_abnormal |= edge.is_abnormal();
        if !edge.pending.is_empty() {
            candidates.push(e);
        }
    }
    if candidates.is_empty() {
        return Ok(());
    }

    let shareable = !any_abnormal
        && bb != BlockId::EXIT
        && ctx.cfg.block(bb).phis.is_empty()
        && candidates.len() > 1;
    if !shareable {
        for &e in &candidates {
            commit_one_edge_insert(session, ctx, e)?;
        }
        return Ok(());
    }

    let mut grouped = BitSet::with_capacity(candidates.len());
    let mut group = BumpVec::new_in(arena);
    for i in 0..candidates.len() {
        if !grouped.insert(i) {
            continue;
        }
        group.clear();
        group.push(candidates[i]);
        for (j, &other) in candidates.iter().enumerate().skip(i + 1) {
            if !grouped.contains(j) && same_pending(&ctx.cfg, candidates[i], other) {
                grouped.insert(j);
                group.push(other);
            }
        }
        if group.len() > 1 {
            make_forwarder(session, ctx, bb, &group)?;
        } else {
            commit_one_edge_insert(session, ctx, candidates[i])?;
        }
    }
    Ok(())
}

/// Commit every staged statement in the function.
pub fn perform_edge_inserts(
    session: &BridgeSession<'_>,
    ctx: &mut FunctionContext,
) -> BridgeResult<()> {
    let before = session.stats();
    let blocks: Vec<BlockId> = ctx.cfg.block_ids().collect();
    for bb in blocks {
        commit_edge_inserts_for_block(session, ctx, bb)?;
    }

    let count: usize = ctx
        .cfg
        .edge_ids()
        .map(|e| ctx.cfg.edge(e).pending.len())
        .sum();
    if count > 0 {
        return Err(BridgeError::UncommittedInsertions { count });
    }

    let after = session.stats();
    log::debug!(
        "{}: edge inserts split {} edges, created {} forwarders",
        ctx.name,
        after.edges_split - before.edges_split,
        after.forwarders_created - before.forwarders_created
    );
    Ok(())
}
