// This module checks a built graph for structural soundness: the shape of ENTRY and EXIT,
// agreement between edge endpoints and adjacency lists, control statements only at block
// ends, labels only at block starts and mapped to their block, and one PHI argument per
// incoming edge. It runs after construction and on both sides of out-of-SSA conversion.

//! Structural checks over a built graph.
//!
//! Run after construction and around out-of-SSA conversion. Any violation
//! means an earlier stage broke an invariant, so it is reported as fatal.

use crate::core::{BridgeError, BridgeResult};
use crate::function::FunctionContext;
use crate::ir::BlockId;

use super::builder::stmt_ends_block;

/// Check the shape of the graph, its adjacency lists, statement placement,
/// the label table and PHI argument counts.
pub fn verify_flow(ctx: &FunctionContext) -> BridgeResult<()> {
    let cfg = &ctx.cfg;

    let entry = cfg.block(BlockId::ENTRY);
    if !entry.preds.is_empty() || entry.succs.len() != 1 {
        return Err(BridgeError::corrupt(format!(
            "ENTRY has {} predecessors and {} successors",
            entry.preds.len(),
            entry.succs.len()
        )));
    }
    if !cfg.block(BlockId::EXIT).succs.is_empty() {
        return Err(BridgeError::corrupt("EXIT has successors"));
    }

    for e in cfg.edge_ids() {
        let edge = cfg.edge(e);
        if cfg.block(edge.src).is_removed() || cfg.block(edge.dest).is_removed() {
            return Err(BridgeError::corrupt(format!("{e} touches a removed block")));
        }
        if !cfg.block(edge.src).succs.contains(&e) || !cfg.block(edge.dest).preds.contains(&e) {
            return Err(BridgeError::corrupt(format!(
                "{e} ({} -> {}) missing from adjacency lists",
                edge.src, edge.dest
            )));
        }
    }

    for bb in cfg.block_ids() {
        let block = cfg.block(bb);
        for &e in &block.succs {
            if cfg.edge(e).is_removed() || cfg.edge(e).src != bb {
                return Err(BridgeError::corrupt(format!("{bb} lists stale successor {e}")));
            }
        }
        for &e in &block.preds {
            if cfg.edge(e).is_removed() || cfg.edge(e).dest != bb {
                return Err(BridgeError::corrupt(format!("{bb} lists stale predecessor {e}")));
            }
        }
        if block.is_fixed() {
            if !block.stmts.is_empty() || !block.phis.is_empty() {
                return Err(BridgeError::corrupt(format!("{bb} holds statements")));
            }
            continue;
        }
        if block.succs.is_empty() {
            return Err(BridgeError::corrupt(format!("{bb} has no successors")));
        }

        let leading = block.first_real_index();
        for (i, stmt) in block.stmts.iter().enumerate() {
            if stmt.bb != Some(bb) {
                return Err(BridgeError::corrupt(format!(
                    "statement `{}` in {bb} records block {:?}",
                    ctx.symbols.show(stmt),
                    stmt.bb
                )));
            }
            if let Some(label) = stmt.as_label() {
                if i >= leading {
                    return Err(BridgeError::corrupt(format!(
                        "label {} in the middle of {bb}",
                        ctx.symbols.label_name(label)
                    )));
                }
                if cfg.label_block(label) != Some(bb) {
                    return Err(BridgeError::corrupt(format!(
                        "label {} is not mapped to {bb}",
                        ctx.symbols.label_name(label)
                    )));
                }
            }
            if i + 1 < block.stmts.len() && stmt_ends_block(stmt, &ctx.regions) {
                return Err(BridgeError::corrupt(format!(
                    "`{}` is not the last statement of {bb}",
                    ctx.symbols.show(stmt)
                )));
            }
        }

        for phi in &block.phis {
            let matched = block.preds.iter().all(|&e| phi.arg_for(e).is_some());
            if !matched || phi.args.len() != block.preds.len() {
                return Err(BridgeError::PhiArgumentMismatch {
                    block: bb,
                    phi: ctx.symbols.show(phi).to_string(),
                    expected: block.preds.len(),
                    found: phi.args.len(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::CfgOptions;
    use crate::core::BridgeSession;
    use crate::ir::{Operand, Stmt};
    use crate::test_ir::parse_function;
    use bumpalo::Bump;

    fn build(text: &str) -> FunctionContext {
        let arena = Bump::new();
        let session = BridgeSession::new(&arena);
        parse_function(text)
            .unwrap()
            .build(&session, &CfgOptions::default())
            .unwrap()
    }

    #[test]
    fn test_built_graph_verifies() {
        let ctx = build(
            "fn f(c) {
                if (c_0(D)) goto L1; else goto L2;
             L1: x_1 = 1;
                goto L3;
             L2: x_2 = 2;
             L3: x_3 = phi <x_1(L1), x_2(L2)>;
                return x_3;
             }",
        );
        verify_flow(&ctx).unwrap();
    }

    #[test]
    fn test_missing_phi_argument_is_reported() {
        let mut ctx = build(
            "fn f(c) {
                if (c_0(D)) goto L1; else goto L2;
             L1: x_1 = 1;
                goto L3;
             L2: x_2 = 2;
             L3: x_3 = phi <x_1(L1), x_2(L2)>;
                return x_3;
             }",
        );
        let l3 = ctx.cfg.label_block(ctx.symbols.labels.lookup("L3").unwrap()).unwrap();
        ctx.cfg.block_mut(l3).phis[0].args.pop();
        let err = verify_flow(&ctx).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::PhiArgumentMismatch { expected: 2, found: 1, .. }
        ));
    }

    #[test]
    fn test_statement_after_return_is_reported() {
        let mut ctx = build("fn f() { x_1 = 1; return x_1; }");
        let bb = ctx.cfg.ordinary_block_ids().next().unwrap();
        ctx.cfg.append(bb, [Stmt::copy(Operand::Const(0), Operand::Const(0))]);
        assert!(matches!(
            verify_flow(&ctx),
            Err(BridgeError::StructuralCorruption { .. })
        ));
    }
}
