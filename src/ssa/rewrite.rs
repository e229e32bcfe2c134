// This module drives out-of-SSA conversion for one function. After an optional structural
// check it builds and compacts the partition map, coalesces, compacts again and freezes the
// map into storage assignments. Single-use definitions are then folded into their uses, and
// statements are rewritten in place so every SSA name becomes its partition's variable;
// copies that became self-assignments are dropped. Each incoming edge of every block with
// PHI nodes gets its copy sequence from the elimination engine, staged on the edge; the PHI
// nodes are deleted and the staged copies are committed into blocks, with forwarders shared
// between edges that need the same sequence. A final check confirms the graph is still well
// formed.

//! Out-of-SSA driver.

use crate::cfg::{insert_on_edge, perform_edge_inserts, verify_flow};
use crate::core::{BitSet, BridgeError, BridgeResult, BridgeSession};
use crate::function::FunctionContext;
use crate::ir::{BlockId, Operand, SsaName, Stmt, VarId};

use super::coalesce::coalesce_ssa_names;
use super::elim::{ElimGraph, ElimValue};
use super::ter::replace_temporary_exprs;
use super::var_map::{StorageMap, VarMap};
use super::OutOfSsaOptions;

/// Convert the function in `ctx` out of SSA form. Returns the storage
/// each partition received.
pub fn remove_ssa_form(
    session: &BridgeSession<'_>,
    ctx: &mut FunctionContext,
    options: &OutOfSsaOptions,
) -> BridgeResult<StorageMap> {
    if options.verify {
        verify_flow(ctx)?;
    }

    let (reserved, written) = referenced_vars(ctx);
    check_default_defs(ctx, &written)?;

    let mut map = VarMap::from_function(&ctx.symbols.ssa, &ctx.cfg);
    if options.combine_temps {
        map.compact();
    } else {
        map.compact_without_single_defs();
    }
    coalesce_ssa_names(session, ctx, &mut map, options)?;
    map.compact();

    let storage = map.finalize(&mut ctx.symbols.vars, &reserved, session)?;

    if options.replace_exprs {
        let replaced = replace_temporary_exprs(ctx, &storage);
        session.record(|s| s.expressions_replaced += replaced);
    }
    let removed = rewrite_trees(ctx, &storage)?;
    eliminate_phis(session, ctx, &storage)?;
    perform_edge_inserts(session, ctx)?;

    if options.verify {
        verify_flow(ctx)?;
    }
    let stats = session.stats();
    log::debug!(
        "{}: out of SSA with {} partitions, {} expressions replaced, {removed} copies folded, {} copies inserted, {} temporaries",
        ctx.name,
        storage.num_partitions(),
        stats.expressions_replaced,
        stats.copies_inserted,
        stats.temporaries_created
    );
    Ok(storage)
}

/// Variables the function already uses directly, which partitions must
/// not be given, and the subset of them it assigns.
fn referenced_vars(ctx: &FunctionContext) -> (BitSet, BitSet) {
    let mut vars = BitSet::new();
    let mut written = BitSet::new();
    let mut note = |op: &Operand| {
        if let Operand::Var(v) = op {
            vars.insert(v.index());
        }
    };
    for bb in ctx.cfg.block_ids() {
        let block = ctx.cfg.block(bb);
        for stmt in &block.stmts {
            if let Some(def) = stmt.def() {
                if let Operand::Var(v) = def {
                    written.insert(v.index());
                }
                note(def);
            }
            stmt.for_each_use(&mut note);
        }
        for phi in &block.phis {
            for arg in &phi.args {
                note(&arg.value);
            }
        }
    }
    (vars, written)
}

/// A default definition lives in its variable, so the variable must not
/// also be assigned directly.
fn check_default_defs(ctx: &FunctionContext, written: &BitSet) -> BridgeResult<()> {
    if written.is_empty() {
        return Ok(());
    }
    let mut clash: Option<VarId> = None;
    let mut note = |op: &Operand| {
        if let Some(name) = op.as_ssa() {
            let info = ctx.symbols.ssa.get(name);
            if info.default_def && written.contains(info.var.index()) {
                clash = Some(info.var);
            }
        }
    };
    for bb in ctx.cfg.block_ids() {
        let block = ctx.cfg.block(bb);
        for stmt in &block.stmts {
            stmt.for_each_use(&mut note);
        }
        for phi in &block.phis {
            for arg in &phi.args {
                note(&arg.value);
            }
        }
    }
    match clash {
        Some(var) => Err(BridgeError::corrupt(format!(
            "variable {} is assigned directly but its default definition is also read",
            ctx.symbols.vars.get(var).name
        ))),
        None => Ok(()),
    }
}

fn is_self_copy(stmt: &Stmt) -> bool {
    matches!(stmt.as_copy(), Some((Operand::Var(a), Operand::Var(b))) if a == b)
}

/// Replace every SSA name in the statements by its variable and delete the
/// copies that became `v = v`. Returns the number deleted.
pub fn rewrite_trees(ctx: &mut FunctionContext, storage: &StorageMap) -> BridgeResult<usize> {
    let mut missing: Option<SsaName> = None;
    let mut removed = 0;
    for block in ctx.cfg.blocks_mut() {
        for stmt in &mut block.stmts {
            let mut to_var = |op: &mut Operand| {
                if let Operand::Ssa(name) = *op {
                    match storage.var_of(name) {
                        Some(var) => *op = Operand::Var(var),
                        None => missing = Some(name),
                    }
                }
            };
            stmt.for_each_use_mut(&mut to_var);
            if let Some(def) = stmt.def_mut() {
                to_var(def);
            }
        }
        let before = block.stmts.len();
        block.stmts.retain(|s| !is_self_copy(s));
        removed += before - block.stmts.len();
    }
    match missing {
        Some(name) => Err(BridgeError::corrupt(format!(
            "{} has no storage",
            ctx.symbols.show(&Operand::Ssa(name))
        ))),
        None => Ok(removed),
    }
}

/// Stage the copies every PHI node implies on its incoming edges, then
/// delete all PHI nodes.
pub fn eliminate_phis(
    session: &BridgeSession<'_>,
    ctx: &mut FunctionContext,
    storage: &StorageMap,
) -> BridgeResult<()> {
    let mut elim = ElimGraph::new(session.arena());
    let blocks: Vec<BlockId> = ctx
        .cfg
        .block_ids()
        .filter(|&bb| !ctx.cfg.block(bb).phis.is_empty())
        .collect();

    for bb in blocks {
        for e in ctx.cfg.block(bb).preds.clone() {
            elim.build(&ctx.cfg.block(bb).phis, e, storage)?;
            if elim.is_empty() {
                continue;
            }
            elim.eliminate();

            let temps: Vec<VarId> = (0..elim.num_temps())
                .map(|n| {
                    let base = storage.var_of_partition(elim.temp_source(n));
                    ctx.symbols.vars.create_temp(base)
                })
                .collect();
            let operand = |value: ElimValue| match value {
                ElimValue::Partition(p) => Operand::Var(storage.var_of_partition(p)),
                ElimValue::Temp(n) => Operand::Var(temps[n]),
                ElimValue::Operand(op) => op,
            };
            for copy in elim.copies() {
                let stmt = Stmt::copy(operand(copy.dest), operand(copy.src));
                insert_on_edge(&mut ctx.cfg, e, stmt)?;
            }

            let copies = elim.copies().len();
            session.record(|s| {
                s.copies_inserted += copies;
                s.temporaries_created += temps.len();
            });
            log::trace!("{e} into {bb}: {copies} copies, {} temporaries", temps.len());
        }
    }

    for block in ctx.cfg.blocks_mut() {
        block.phis.clear();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::CfgOptions;
    use crate::test_ir::{parse_function, print_function, run};
    use bumpalo::Bump;

    fn build(session: &BridgeSession<'_>, text: &str) -> FunctionContext {
        let _ = env_logger::builder().is_test(true).try_init();
        parse_function(text)
            .unwrap()
            .build(session, &CfgOptions::default())
            .unwrap()
    }

    #[test]
    fn test_same_partition_phi_needs_no_copies() {
        let arena = Bump::new();
        let session = BridgeSession::new(&arena);
        let mut ctx = build(
            &session,
            "fn f(c) {
                if (c_0(D)) goto L1; else goto L2;
             L1: x_1 = 1;
                goto L3;
             L2: x_2 = 2;
             L3: x_3 = phi <x_1(L1), x_2(L2)>;
                return x_3;
             }",
        );
        let storage = remove_ssa_form(&session, &mut ctx, &OutOfSsaOptions::default()).unwrap();
        assert_eq!(session.stats().copies_inserted, 0);
        assert_eq!(ctx.num_phis(), 0);
        let x = ctx.symbols.vars.lookup("x").unwrap();
        let x3 = ctx.symbols.ssa.lookup(x, 3).unwrap();
        assert_eq!(storage.var_of(x3), Some(x));
        let text = print_function(&ctx);
        assert!(text.contains("x = 1;"), "{text}");
        assert!(text.contains("x = 2;"), "{text}");
        assert!(text.contains("return x;"), "{text}");
    }

    #[test]
    fn test_swap_on_latch_uses_one_temporary() {
        let arena = Bump::new();
        let session = BridgeSession::new(&arena);
        let mut ctx = build(
            &session,
            "fn swap(n) {
             P: a_1 = 1;
                b_1 = 2;
                i_1 = 0;
             L: a_2 = phi <a_1(P), b_2(B)>;
                b_2 = phi <b_1(P), a_2(B)>;
                i_2 = phi <i_1(P), i_3(B)>;
                c_1 = i_2 < n_0(D);
                if (c_1) goto B; else goto X;
             B: i_3 = i_2 + 1;
                goto L;
             X: r_1 = a_2 - b_2;
                return r_1;
             }",
        );
        let b = ctx.cfg.label_block(ctx.symbols.labels.lookup("B").unwrap()).unwrap();
        let before = ctx.cfg.block(b).stmts.len();

        remove_ssa_form(&session, &mut ctx, &OutOfSsaOptions::default()).unwrap();
        let stats = session.stats();
        assert_eq!(stats.copies_inserted, 3);
        assert_eq!(stats.temporaries_created, 1);
        // The latch has a single successor, so the copies land at its end.
        assert_eq!(ctx.cfg.block(b).stmts.len(), before + 3);
    }

    #[test]
    fn test_constant_arguments_become_copies() {
        let arena = Bump::new();
        let session = BridgeSession::new(&arena);
        let mut ctx = build(
            &session,
            "fn f(c) {
                if (c_0(D)) goto L1; else goto L2;
             L1: y_1 = 5;
                goto L3;
             L2: y_2 = 6;
             L3: x_1 = phi <3(L1), 4(L2)>;
                return x_1;
             }",
        );
        let stmts = ctx.cfg.num_stmts();
        remove_ssa_form(&session, &mut ctx, &OutOfSsaOptions::default()).unwrap();
        assert_eq!(session.stats().copies_inserted, 2);
        assert_eq!(ctx.cfg.num_stmts(), stmts + 2);
        let text = print_function(&ctx);
        assert!(text.contains("x = 3;"), "{text}");
        assert!(text.contains("x = 4;"), "{text}");
    }

    #[test]
    fn test_parameter_read_directly_and_as_default_definition() {
        let arena = Bump::new();
        let session = BridgeSession::new(&arena);
        let mut ctx = build(&session, "fn f(a) { b_1 = a_0(D) + a; return b_1; }");
        let before = run(&ctx, &[4]).unwrap();

        let storage = remove_ssa_form(&session, &mut ctx, &OutOfSsaOptions::default()).unwrap();
        let a = ctx.symbols.vars.lookup("a").unwrap();
        let a0 = ctx.symbols.ssa.lookup(a, 0).unwrap();
        assert_eq!(storage.var_of(a0), Some(a));
        let text = print_function(&ctx);
        assert!(text.contains("b = a + a;"), "{text}");
        assert_eq!(run(&ctx, &[4]).unwrap().outcome, before.outcome);
    }

    #[test]
    fn test_direct_write_of_defaulted_variable_is_rejected() {
        let arena = Bump::new();
        let session = BridgeSession::new(&arena);
        let mut ctx = build(&session, "fn f(a) { a = 3; b_1 = a_0(D) + a; return b_1; }");
        let err = remove_ssa_form(&session, &mut ctx, &OutOfSsaOptions::default()).unwrap_err();
        assert!(matches!(err, BridgeError::StructuralCorruption { .. }), "{err}");
        assert!(err.to_string().contains("assigned directly"), "{err}");
    }
}
