// This module holds the cleanup passes that run once the raw graph exists. Dead-label cleanup
// picks one canonical label per block, preferring a user label, points every branch at it and
// deletes the synthetic labels nobody can reference any more; labels that non-local or
// computed jumps may reach are never touched. Unreachable-block removal deletes whatever
// ENTRY cannot reach, tearing down PHI nodes and outgoing edges first. Block merging folds a
// block into its single predecessor when the pair is a plain fallthrough that no abnormal
// edge, user label, loop header or latch depends on; single-argument PHI nodes of the merged
// block are propagated into their uses, or kept as copies when the names involved take part
// in abnormal PHIs. Critical-edge splitting gives every critical non-abnormal edge its own
// block so code can later be placed on it.

//! Graph cleanup: labels, unreachable blocks, block merging, edge splitting.

use hashbrown::HashMap;

use crate::core::{BitSet, BridgeError, BridgeResult, BridgeSession};
use crate::function::FunctionContext;
use crate::ir::{BlockId, EdgeId, LabelId, Operand, SsaName, Stmt};

use super::builder::{group_case_labels, stmt_ends_block, CfgOptions};
use super::graph::{Cfg, EdgeFlags};
use super::loops::LoopStructure;

/// Run the cleanup passes selected by `options`.
pub fn cleanup_cfg(
    session: &BridgeSession<'_>,
    ctx: &mut FunctionContext,
    options: &CfgOptions,
) -> BridgeResult<()> {
    cleanup_dead_labels(session, ctx);
    if options.remove_unreachable {
        remove_unreachable_blocks(session, ctx)?;
    }
    if options.merge_blocks {
        merge_blocks(session, ctx)?;
    }
    if options.split_critical_edges {
        split_critical_edges(session, ctx)?;
    }
    log::debug!(
        "{}: cfg cleanup left {} blocks, {} edges",
        ctx.name,
        ctx.cfg.num_blocks(),
        ctx.cfg.num_edges()
    );
    Ok(())
}

/// Choose a canonical label per block, redirect branches to it and delete
/// the synthetic labels that became unreferenced.
pub fn cleanup_dead_labels(session: &BridgeSession<'_>, ctx: &mut FunctionContext) {
    let labels = &ctx.symbols.labels;
    let blocks: Vec<BlockId> = ctx.cfg.ordinary_block_ids().collect();

    let mut canonical: HashMap<BlockId, LabelId> = HashMap::new();
    let mut remap: HashMap<LabelId, LabelId> = HashMap::new();
    for &bb in &blocks {
        let block_labels: Vec<LabelId> = ctx.cfg.block(bb).labels().collect();
        let chosen = block_labels
            .iter()
            .copied()
            .find(|&l| !labels.get(l).artificial)
            .or_else(|| block_labels.first().copied());
        if let Some(chosen) = chosen {
            canonical.insert(bb, chosen);
            for l in block_labels.into_iter().filter(|&l| l != chosen) {
                remap.insert(l, chosen);
            }
        }
    }

    for &bb in &blocks {
        if let Some(last) = ctx.cfg.block_mut(bb).stmts.last_mut() {
            last.for_each_target_mut(|l| {
                if let Some(&c) = remap.get(l) {
                    *l = c;
                }
            });
        }
    }

    let mut removed = Vec::new();
    for &bb in &blocks {
        let keep = canonical.get(&bb).copied();
        ctx.cfg.block_mut(bb).stmts.retain(|s| match s.as_label() {
            Some(l) => {
                let info = labels.get(l);
                let dead = Some(l) != keep && info.artificial && !info.is_forced();
                if dead {
                    removed.push(l);
                }
                !dead
            }
            None => true,
        });
    }
    for &l in &removed {
        ctx.cfg.forget_label(l);
    }
    session.record(|s| s.labels_removed += removed.len());

    // Distinct labels may now coincide, so case ranges can merge further.
    group_case_labels(&mut ctx.cfg);
    log::debug!("{}: removed {} dead labels", ctx.name, removed.len());
}

/// Delete every block ENTRY cannot reach. Returns the number removed.
pub fn remove_unreachable_blocks(
    session: &BridgeSession<'_>,
    ctx: &mut FunctionContext,
) -> BridgeResult<usize> {
    let reachable = ctx.cfg.reachable();
    let dead: Vec<BlockId> = ctx
        .cfg
        .ordinary_block_ids()
        .filter(|b| !reachable.contains(b.index()))
        .collect();

    for &bb in &dead {
        let user_labels: Vec<&str> = ctx
            .cfg
            .block(bb)
            .labels()
            .filter(|&l| !ctx.symbols.labels.get(l).artificial)
            .map(|l| ctx.symbols.label_name(l))
            .collect();
        if !user_labels.is_empty() {
            log::warn!("{}: removing unreachable {bb} labelled {:?}", ctx.name, user_labels);
        }
        ctx.cfg.block_mut(bb).phis.clear();
        for e in ctx.cfg.block(bb).succs.clone() {
            ctx.cfg.remove_edge(e);
        }
    }
    for &bb in &dead {
        ctx.cfg.remove_block(bb)?;
    }

    session.record(|s| s.blocks_removed += dead.len());
    if !dead.is_empty() {
        log::debug!("{}: removed {} unreachable blocks", ctx.name, dead.len());
    }
    Ok(dead.len())
}

/// SSA names that appear in a PHI node with an abnormal incoming edge,
/// either as its result or as the argument on that edge.
pub fn names_in_abnormal_phis(cfg: &Cfg) -> BitSet {
    let mut names = BitSet::new();
    for bb in cfg.block_ids() {
        for phi in &cfg.block(bb).phis {
            for arg in &phi.args {
                if cfg.edge(arg.edge).is_abnormal() {
                    names.insert(phi.result.index());
                    if let Some(name) = arg.value.as_ssa() {
                        names.insert(name.index());
                    }
                }
            }
        }
    }
    names
}

/// Replace every use of `from` in the function by `to`.
pub fn replace_uses(cfg: &mut Cfg, from: SsaName, to: Operand) {
    let replace = |op: &mut Operand| {
        if *op == Operand::Ssa(from) {
            *op = to;
        }
    };
    for block in cfg.blocks_mut() {
        for stmt in &mut block.stmts {
            stmt.for_each_use_mut(replace);
        }
        for phi in &mut block.phis {
            for arg in &mut phi.args {
                replace(&mut arg.value);
            }
        }
    }
    for edge in cfg.edges_mut() {
        for stmt in &mut edge.pending {
            stmt.for_each_use_mut(replace);
        }
    }
}

/// If `a` can absorb its single successor, return the connecting edge and
/// the successor.
pub fn can_merge_with_succ(
    ctx: &FunctionContext,
    loops: &LoopStructure,
    a: BlockId,
) -> Option<(EdgeId, BlockId)> {
    let cfg = &ctx.cfg;
    let block = cfg.block(a);
    if block.is_removed() || block.is_fixed() {
        return None;
    }
    let e = cfg.single_succ(a)?;
    let edge = cfg.edge(e);
    if edge
        .flags
        .intersects(EdgeFlags::ABNORMAL | EdgeFlags::EXCEPTION | EdgeFlags::FAKE)
        || !edge.pending.is_empty()
    {
        return None;
    }
    let b = edge.dest;
    if b == a || cfg.block(b).is_fixed() || cfg.single_pred(b) != Some(e) {
        return None;
    }
    if block
        .last_stmt()
        .is_some_and(|last| stmt_ends_block(last, &ctx.regions))
    {
        return None;
    }
    let has_protected_label = cfg.block(b).labels().any(|l| {
        let info = ctx.symbols.labels.get(l);
        !info.artificial || info.is_forced()
    });
    if has_protected_label || loops.is_header(b) || loops.is_latch(b) {
        return None;
    }
    Some((e, b))
}

fn merge_pair(
    session: &BridgeSession<'_>,
    ctx: &mut FunctionContext,
    a: BlockId,
    e: EdgeId,
    b: BlockId,
    abnormal_names: &BitSet,
) -> BridgeResult<()> {
    log::trace!("merging {b} into {a}");

    let phis = std::mem::take(&mut ctx.cfg.block_mut(b).phis);
    let mut copies = Vec::new();
    for phi in phis {
        let Some(value) = phi.arg_for(e) else {
            return Err(BridgeError::PhiArgumentMismatch {
                block: b,
                phi: ctx.symbols.show(&phi).to_string(),
                expected: 1,
                found: phi.args.len(),
            });
        };
        let pinned = abnormal_names.contains(phi.result.index())
            || value
                .as_ssa()
                .is_some_and(|n| abnormal_names.contains(n.index()));
        if pinned {
            copies.push(Stmt::copy(Operand::Ssa(phi.result), value));
        } else {
            replace_uses(&mut ctx.cfg, phi.result, value);
        }
    }

    let stmts = std::mem::take(&mut ctx.cfg.block_mut(b).stmts);
    let mut moved = Vec::with_capacity(stmts.len() + copies.len());
    moved.extend(copies);
    let mut labels_removed = 0;
    for stmt in stmts {
        match stmt.as_label() {
            Some(l) => {
                ctx.cfg.forget_label(l);
                labels_removed += 1;
            }
            None => moved.push(stmt),
        }
    }
    ctx.cfg.append(a, moved);

    ctx.cfg.remove_edge(e);
    ctx.cfg.transfer_succs(b, a);
    ctx.cfg.remove_block(b)?;

    session.record(|s| {
        s.blocks_merged += 1;
        s.blocks_removed += 1;
        s.labels_removed += labels_removed;
    });
    Ok(())
}

/// Merge every mergeable block pair. Returns the number of merges.
pub fn merge_blocks(session: &BridgeSession<'_>, ctx: &mut FunctionContext) -> BridgeResult<usize> {
    let loops = match &ctx.loops {
        Some(loops) => loops.clone(),
        None => LoopStructure::discover(&ctx.cfg),
    };
    let abnormal_names = names_in_abnormal_phis(&ctx.cfg);

    let mut merged = 0;
    let blocks: Vec<BlockId> = ctx.cfg.ordinary_block_ids().collect();
    for a in blocks {
        // Absorbing a successor can make the next one mergeable, so keep going.
        while let Some((e, b)) = can_merge_with_succ(ctx, &loops, a) {
            merge_pair(session, ctx, a, e, b, &abnormal_names)?;
            merged += 1;
        }
    }
    if merged > 0 {
        log::debug!("{}: merged {merged} blocks", ctx.name);
    }
    Ok(merged)
}

/// Split every critical, non-abnormal edge. Returns the number split.
pub fn split_critical_edges(
    session: &BridgeSession<'_>,
    ctx: &mut FunctionContext,
) -> BridgeResult<usize> {
    ctx.cfg.mark_critical_edges();
    let critical: Vec<EdgeId> = ctx
        .cfg
        .edge_ids()
        .filter(|&e| {
            let flags = ctx.cfg.edge(e).flags;
            flags.contains(EdgeFlags::CRITICAL) && !flags.contains(EdgeFlags::ABNORMAL)
        })
        .collect();
    for &e in &critical {
        ctx.cfg.split_edge(e, &mut ctx.symbols.labels)?;
    }
    session.record(|s| {
        s.edges_split += critical.len();
        s.blocks_created += critical.len();
    });
    if !critical.is_empty() {
        log::debug!("{}: split {} critical edges", ctx.name, critical.len());
    }
    Ok(critical.len())
}
