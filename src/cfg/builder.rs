// This module implements the CFG Builder: it takes the flat statement stream handed over by
// the lowering pass and partitions it into basic blocks, then creates the outgoing edges of
// every block from the kind of statement that ends it. A block starts at the first statement,
// after any statement that ends a block, and at a label unless that label directly follows
// another ordinary label (non-local and address-taken labels always open their own block).
// Edges: conditionals get TRUE_BRANCH/FALSE_BRANCH edges, multi-way branches one edge per
// distinct target after their case ranges are grouped, local gotos become a FALLTHROUGH edge
// and are deleted, computed gotos and non-local-goto calls get ABNORMAL edges to every block
// they could reach, returns go to EXIT, statements that can raise get exception edges to
// their handlers, and everything else falls through to the lexically next block. Malformed
// streams (dangling labels, conditionals without targets, unbalanced lowering scopes,
// duplicate label definitions) are reported as fatal errors.

//! Statement stream to control-flow graph.

use crate::core::{BridgeError, BridgeResult, BridgeSession};
use crate::function::FunctionContext;
use crate::ir::{
    BlockId, CallFlags, CaseRange, GotoTarget, LabelId, LabelTable, Stmt, StmtKind,
};

use super::cleanup;
use super::eh::{make_eh_edges, RegionTable};
use super::graph::{BlockFlags, Cfg, EdgeFlags, PROB_BASE};

/// Knobs for the cleanup that follows graph construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfgOptions {
    /// Merge single-successor / single-predecessor block pairs.
    pub merge_blocks: bool,
    /// Delete blocks not reachable from ENTRY.
    pub remove_unreachable: bool,
    /// Split every critical edge eagerly.
    pub split_critical_edges: bool,
}

impl Default for CfgOptions {
    fn default() -> Self {
        Self {
            merge_blocks: true,
            remove_unreachable: true,
            split_critical_edges: false,
        }
    }
}

/// Build the graph of `ctx` from `stmts` and clean it up.
pub fn build_cfg(
    session: &BridgeSession<'_>,
    ctx: &mut FunctionContext,
    stmts: Vec<Stmt>,
    options: &CfgOptions,
) -> BridgeResult<()> {
    make_blocks(session, ctx, stmts)?;
    make_edges(ctx)?;
    cleanup::cleanup_cfg(session, ctx, options)
}

/// Whether `stmt` must be the last statement of its block.
pub fn stmt_ends_block(stmt: &Stmt, regions: &RegionTable) -> bool {
    if stmt.is_control() {
        return true;
    }
    if let Some(flags) = stmt.call_flags() {
        if flags.intersects(CallFlags::NORETURN | CallFlags::NONLOCAL_GOTO) {
            return true;
        }
    }
    regions.can_throw_internal(stmt)
}

/// Whether `stmt` must open a new block, given the previous statement if
/// that one was a label.
fn stmt_starts_block(labels: &LabelTable, stmt: &Stmt, prev_label: Option<LabelId>) -> bool {
    let Some(label) = stmt.as_label() else {
        return false;
    };
    if labels.get(label).is_forced() {
        return true;
    }
    match prev_label {
        Some(prev) => labels.get(prev).non_local,
        None => true,
    }
}

fn check_scopes(stmts: &[Stmt]) -> BridgeResult<()> {
    let mut open = Vec::new();
    for stmt in stmts {
        match stmt.kind {
            StmtKind::ScopeOpen { scope } => open.push(scope),
            StmtKind::ScopeClose { scope } => {
                if open.pop() != Some(scope) {
                    return Err(BridgeError::UnbalancedScope { scope });
                }
            }
            _ => {}
        }
    }
    match open.pop() {
        Some(scope) => Err(BridgeError::UnbalancedScope { scope }),
        None => Ok(()),
    }
}

/// Partition `stmts` into basic blocks of a fresh graph.
pub fn make_blocks(
    session: &BridgeSession<'_>,
    ctx: &mut FunctionContext,
    stmts: Vec<Stmt>,
) -> BridgeResult<()> {
    check_scopes(&stmts)?;

    ctx.cfg = Cfg::new();
    let mut current: Option<BlockId> = None;
    let mut start_new = true;
    let mut prev_label: Option<LabelId> = None;

    for mut stmt in stmts {
        if matches!(stmt.kind, StmtKind::ScopeOpen { .. } | StmtKind::ScopeClose { .. }) {
            continue;
        }
        let reuse = match current {
            Some(bb) if !start_new && !stmt_starts_block(&ctx.symbols.labels, &stmt, prev_label) => {
                Some(bb)
            }
            _ => None,
        };
        let bb = match reuse {
            Some(bb) => bb,
            None => {
                let bb = ctx.cfg.new_block(BlockFlags::empty());
                session.record(|s| s.blocks_created += 1);
                current = Some(bb);
                bb
            }
        };

        if let Some(label) = stmt.as_label() {
            if !ctx.symbols.labels.contains(label) {
                return Err(BridgeError::MissingLabel { label });
            }
            if ctx.cfg.label_block(label).is_some() {
                return Err(BridgeError::corrupt(format!(
                    "label {} defined twice",
                    ctx.symbols.label_name(label)
                )));
            }
            if reuse.is_some() && prev_label.is_some() {
                session.record(|s| s.labels_merged += 1);
            }
            ctx.cfg.set_label_block(label, bb);
        }

        start_new = stmt_ends_block(&stmt, &ctx.regions);
        prev_label = stmt.as_label();
        stmt.bb = Some(bb);
        ctx.cfg.block_mut(bb).stmts.push(stmt);
    }

    if current.is_none() {
        ctx.cfg.new_block(BlockFlags::empty());
        session.record(|s| s.blocks_created += 1);
    }

    log::debug!(
        "{}: partitioned stream into {} blocks",
        ctx.name,
        ctx.cfg.num_blocks() - BlockId::NUM_FIXED
    );
    Ok(())
}

/// Sort `cases`, drop those that go to `default` and merge contiguous
/// ranges with the same target.
pub fn group_case_ranges(cases: &mut Vec<CaseRange>, default: LabelId) {
    cases.retain(|c| c.label != default);
    cases.sort_by_key(|c| (c.low, c.high));

    let mut grouped: Vec<CaseRange> = Vec::with_capacity(cases.len());
    for case in cases.drain(..) {
        if let Some(last) = grouped.last_mut() {
            if last.label == case.label && last.high.checked_add(1) == Some(case.low) {
                last.high = case.high;
                continue;
            }
        }
        grouped.push(case);
    }
    *cases = grouped;
}

/// Regroup the case ranges of every multi-way branch in the function.
pub fn group_case_labels(cfg: &mut Cfg) {
    let blocks: Vec<BlockId> = cfg.ordinary_block_ids().collect();
    for bb in blocks {
        if let Some(Stmt {
            kind: StmtKind::Switch { cases, default, .. },
            ..
        }) = cfg.block_mut(bb).stmts.last_mut()
        {
            group_case_ranges(cases, *default);
        }
    }
}

fn resolve(cfg: &Cfg, label: LabelId) -> BridgeResult<BlockId> {
    cfg.label_block(label)
        .ok_or(BridgeError::MissingLabel { label })
}

/// Create the outgoing edges of every block of a freshly partitioned graph.
pub fn make_edges(ctx: &mut FunctionContext) -> BridgeResult<()> {
    group_case_labels(&mut ctx.cfg);

    let order: Vec<BlockId> = ctx.cfg.ordinary_block_ids().collect();

    let mut computed_targets = Vec::new();
    let mut non_local_targets = Vec::new();
    for &bb in &order {
        let infos: Vec<_> = ctx
            .cfg
            .block(bb)
            .labels()
            .map(|l| ctx.symbols.labels.get(l))
            .collect();
        if infos.iter().any(|i| i.address_taken) {
            computed_targets.push(bb);
        }
        if infos.iter().any(|i| i.non_local) {
            non_local_targets.push(bb);
        }
    }

    if let Some(&first) = order.first() {
        ctx.cfg
            .make_edge(BlockId::ENTRY, first, EdgeFlags::FALLTHROUGH);
    }

    for (i, &bb) in order.iter().enumerate() {
        let next = order.get(i + 1).copied().unwrap_or(BlockId::EXIT);
        let cfg = &mut ctx.cfg;
        let Some(last) = cfg.block(bb).last_stmt().cloned() else {
            cfg.make_edge(bb, next, EdgeFlags::FALLTHROUGH);
            continue;
        };

        match &last.kind {
            StmtKind::CondBranch {
                then_label,
                else_label,
                ..
            } => {
                let (Some(t), Some(f)) = (*then_label, *else_label) else {
                    return Err(BridgeError::MissingTarget {
                        stmt: ctx.symbols.show(&last).to_string(),
                    });
                };
                let then_bb = resolve(cfg, t)?;
                let else_bb = resolve(cfg, f)?;
                cfg.make_edge(bb, then_bb, EdgeFlags::TRUE_BRANCH);
                cfg.make_edge(bb, else_bb, EdgeFlags::FALSE_BRANCH);
            }
            StmtKind::Switch { cases, default, .. } => {
                for label in cases.iter().map(|c| c.label).chain([*default]) {
                    let target = resolve(cfg, label)?;
                    cfg.make_edge(bb, target, EdgeFlags::empty());
                }
            }
            StmtKind::Goto {
                target: GotoTarget::Label(label),
            } => {
                let target = resolve(cfg, *label)?;
                cfg.make_edge(bb, target, EdgeFlags::FALLTHROUGH);
                cfg.block_mut(bb).stmts.pop();
            }
            StmtKind::Goto {
                target: GotoTarget::Computed(_),
            } => {
                if computed_targets.is_empty() {
                    return Err(BridgeError::corrupt(format!(
                        "computed goto in {bb} but no label has its address taken"
                    )));
                }
                for &target in &computed_targets {
                    cfg.make_edge(bb, target, EdgeFlags::ABNORMAL);
                }
            }
            StmtKind::Return { .. } => {
                cfg.make_edge(bb, BlockId::EXIT, EdgeFlags::empty());
            }
            StmtKind::Raise { .. } | StmtKind::Resume => {
                if !make_eh_edges(cfg, &ctx.regions, bb)? {
                    cfg.make_edge(bb, BlockId::EXIT, EdgeFlags::EXCEPTION | EdgeFlags::ABNORMAL);
                }
            }
            StmtKind::Call { flags, .. } => {
                if flags.contains(CallFlags::NONLOCAL_GOTO) {
                    for &target in &non_local_targets {
                        cfg.make_edge(bb, target, EdgeFlags::ABNORMAL);
                    }
                }
                make_eh_edges(cfg, &ctx.regions, bb)?;
                if flags.contains(CallFlags::NORETURN) {
                    cfg.make_edge(bb, BlockId::EXIT, EdgeFlags::FAKE);
                } else {
                    cfg.make_edge(bb, next, EdgeFlags::FALLTHROUGH);
                }
            }
            _ => {
                cfg.make_edge(bb, next, EdgeFlags::FALLTHROUGH);
            }
        }
    }

    set_edge_probabilities(&mut ctx.cfg);
    log::debug!("{}: created {} edges", ctx.name, ctx.cfg.num_edges());
    Ok(())
}

/// Split the probability base evenly over the normal successors of each
/// block; abnormal, exception and fake edges are never taken normally.
pub fn set_edge_probabilities(cfg: &mut Cfg) {
    let blocks: Vec<BlockId> = cfg.block_ids().collect();
    for bb in blocks {
        let succs = cfg.block(bb).succs.clone();
        let (normal, other): (Vec<_>, Vec<_>) = succs.into_iter().partition(|&e| {
            !cfg.edge(e)
                .flags
                .intersects(EdgeFlags::ABNORMAL | EdgeFlags::EXCEPTION | EdgeFlags::FAKE)
        });
        for e in other {
            cfg.edge_mut(e).probability = 0;
        }
        if normal.is_empty() {
            continue;
        }
        let share = PROB_BASE / normal.len() as u32;
        let remainder = PROB_BASE - share * normal.len() as u32;
        for (i, e) in normal.into_iter().enumerate() {
            cfg.edge_mut(e).probability = share + if i == 0 { remainder } else { 0 };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_ir::parse_function;
    use bumpalo::Bump;

    fn raw(text: &str) -> FunctionContext {
        let _ = env_logger::builder().is_test(true).try_init();
        let arena = Bump::new();
        let session = BridgeSession::new(&arena);
        parse_function(text)
            .unwrap()
            .build_raw(&session)
            .unwrap()
    }

    fn block_of(ctx: &FunctionContext, name: &str) -> BlockId {
        let label = ctx.symbols.labels.lookup(name).unwrap();
        ctx.cfg.label_block(label).unwrap()
    }

    #[test]
    fn test_consecutive_ordinary_labels_share_a_block() {
        let ctx = raw("fn f() { A: B: x_1 = 1; nonlocal C: D: return x_1; }");
        assert_eq!(block_of(&ctx, "A"), block_of(&ctx, "B"));
        assert_ne!(block_of(&ctx, "B"), block_of(&ctx, "C"));
        assert_ne!(block_of(&ctx, "C"), block_of(&ctx, "D"));
    }

    #[test]
    fn test_only_block_enders_open_a_new_block() {
        let ctx = raw(
            "fn f() {
                x_1 = 1;
                y_1 = 2;
                call g() noreturn;
                z_1 = 3;
                return z_1;
             }",
        );
        let sizes: Vec<usize> = ctx
            .cfg
            .ordinary_block_ids()
            .map(|bb| ctx.cfg.block(bb).stmts.len())
            .collect();
        assert_eq!(sizes, vec![3, 2]);
    }

    #[test]
    fn test_conditional_gets_true_and_false_edges() {
        let ctx = raw(
            "fn f(c) {
                if (c_0(D)) goto L1; else goto L2;
             L1: return 1;
             L2: return 2;
             }",
        );
        let bb = ctx.cfg.single_succ(BlockId::ENTRY).map(|e| ctx.cfg.edge(e).dest).unwrap();
        let succs = &ctx.cfg.block(bb).succs;
        assert_eq!(succs.len(), 2);
        let t = ctx.cfg.edge(succs[0]);
        let f = ctx.cfg.edge(succs[1]);
        assert!(t.flags.contains(EdgeFlags::TRUE_BRANCH));
        assert!(f.flags.contains(EdgeFlags::FALSE_BRANCH));
        assert_eq!(t.dest, block_of(&ctx, "L1"));
        assert_eq!(f.dest, block_of(&ctx, "L2"));
        assert!(matches!(
            ctx.cfg.block(bb).last_stmt().unwrap().kind,
            StmtKind::CondBranch { .. }
        ));
        assert_eq!(t.probability + f.probability, PROB_BASE);
    }

    #[test]
    fn test_goto_becomes_fallthrough_edge() {
        let ctx = raw("fn f() { x_1 = 1; goto L; y_1 = 2; L: return x_1; }");
        let first = ctx.cfg.single_succ(BlockId::ENTRY).map(|e| ctx.cfg.edge(e).dest).unwrap();
        let e = ctx.cfg.single_succ(first).unwrap();
        assert_eq!(ctx.cfg.edge(e).dest, block_of(&ctx, "L"));
        assert!(ctx.cfg.edge(e).flags.contains(EdgeFlags::FALLTHROUGH));
        assert_eq!(ctx.cfg.block(first).stmts.len(), 1);
    }

    #[test]
    fn test_case_ranges_group_before_edges() {
        let mut cases = vec![
            CaseRange { low: 3, high: 3, label: LabelId(1) },
            CaseRange { low: 1, high: 1, label: LabelId(0) },
            CaseRange { low: 2, high: 2, label: LabelId(0) },
            CaseRange { low: 7, high: 9, label: LabelId(2) },
        ];
        group_case_ranges(&mut cases, LabelId(2));
        assert_eq!(
            cases,
            vec![
                CaseRange { low: 1, high: 2, label: LabelId(0) },
                CaseRange { low: 3, high: 3, label: LabelId(1) },
            ]
        );
    }

    #[test]
    fn test_computed_goto_reaches_address_taken_labels() {
        let ctx = raw(
            "fn f() {
                p_1 = &&A;
                goto *p_1;
             A: x_1 = 1;
             B: return x_1;
             }",
        );
        let a = block_of(&ctx, "A");
        let jump = ctx.cfg.single_succ(BlockId::ENTRY).map(|e| ctx.cfg.edge(e).dest).unwrap();
        let e = ctx.cfg.single_succ(jump).unwrap();
        assert_eq!(ctx.cfg.edge(e).dest, a);
        assert!(ctx.cfg.edge(e).is_abnormal());
        assert_eq!(ctx.cfg.edge(e).probability, 0);
    }

    #[test]
    fn test_unbalanced_scope_is_fatal() {
        let arena = Bump::new();
        let session = BridgeSession::new(&arena);
        let err = parse_function("fn f() { scope_open 1; scope_close 1; scope_close 1; return; }")
            .unwrap()
            .build_raw(&session)
            .unwrap_err();
        assert_eq!(err, BridgeError::UnbalancedScope { scope: 1 });
    }

    #[test]
    fn test_empty_stream_yields_one_block() {
        let ctx = raw("fn f() { }");
        assert_eq!(ctx.cfg.num_blocks(), 3);
        let first = ctx.cfg.single_succ(BlockId::ENTRY).map(|e| ctx.cfg.edge(e).dest).unwrap();
        let out = ctx.cfg.single_succ(first).unwrap();
        assert_eq!(ctx.cfg.edge(out).dest, BlockId::EXIT);
    }
}
