// This module implements temporary expression replacement. Once every partition has its
// storage, an SSA name that is defined by an assignment and read exactly once, later in the
// same block, does not need to be stored at all: its defining expression can be evaluated at
// the use instead. A definition stays pending while the block is scanned; writing any
// variable its expression reads kills it, and reaching the end of the block forgets it.
// Expressions are at most one operator deep, so a copy or constant-free operand folds into
// any operand position, while an operator expression only folds into a plain copy.

//! Temporary expression replacement.

use hashbrown::HashMap;

use crate::core::BitSet;
use crate::function::FunctionContext;
use crate::ir::{BinOp, BlockId, Expr, Operand, SsaName, Stmt, StmtKind, VarId};

use super::var_map::StorageMap;

/// A definition waiting for its use.
struct Pending {
    /// Index of the defining statement in its block.
    index: usize,
    /// Variables the defining expression reads.
    deps: Vec<VarId>,
}

fn count_uses(ctx: &FunctionContext) -> Vec<u32> {
    let mut uses = vec![0u32; ctx.symbols.ssa.len()];
    let mut note = |op: &Operand| {
        if let Some(name) = op.as_ssa() {
            uses[name.index()] += 1;
        }
    };
    for bb in ctx.cfg.block_ids() {
        let block = ctx.cfg.block(bb);
        for phi in &block.phis {
            for arg in &phi.args {
                note(&arg.value);
            }
        }
        for stmt in &block.stmts {
            stmt.for_each_use(&mut note);
        }
    }
    uses
}

fn storage_var(op: &Operand, storage: &StorageMap) -> Option<VarId> {
    match *op {
        Operand::Ssa(name) => storage.var_of(name),
        Operand::Var(var) => Some(var),
        _ => None,
    }
}

/// Whether `stmt` defines a name that may be folded into its use, and if so
/// the variables its expression depends on.
fn replaceable(stmt: &Stmt, uses: &[u32], storage: &StorageMap) -> Option<(SsaName, Vec<VarId>)> {
    let StmtKind::Assign {
        dest: Operand::Ssa(name),
        ref value,
    } = stmt.kind
    else {
        return None;
    };
    if uses[name.index()] != 1 || may_trap(value) {
        return None;
    }
    let mut deps = Vec::new();
    let mut complete = true;
    stmt.for_each_use(|op| match storage_var(op, storage) {
        Some(var) => deps.push(var),
        None if op.is_storage() => complete = false,
        None => {}
    });
    // An expression that reads nothing is left where it is.
    if !complete || deps.is_empty() {
        return None;
    }
    Some((name, deps))
}

/// A division that may fault must not move past the calls around it.
fn may_trap(value: &Expr) -> bool {
    match value {
        Expr::Binary(BinOp::Div | BinOp::Rem, _, Operand::Const(d)) => *d == 0,
        Expr::Binary(BinOp::Div | BinOp::Rem, _, _) => true,
        _ => false,
    }
}

/// Put the right-hand side of `def` where `use_stmt` reads `name`.
/// Returns false when the flat statement form cannot hold the result.
fn substitute(use_stmt: &mut Stmt, name: SsaName, def: &Stmt) -> bool {
    let StmtKind::Assign { value, .. } = &def.kind else {
        return false;
    };
    match value {
        Expr::Use(op) => {
            let op = *op;
            use_stmt.for_each_use_mut(|slot| {
                if *slot == Operand::Ssa(name) {
                    *slot = op;
                }
            });
            true
        }
        folded => match &mut use_stmt.kind {
            StmtKind::Assign { value, .. } if *value == Expr::Use(Operand::Ssa(name)) => {
                *value = folded.clone();
                true
            }
            _ => false,
        },
    }
}

fn replace_in_block(
    ctx: &mut FunctionContext,
    bb: BlockId,
    uses: &[u32],
    storage: &StorageMap,
) -> usize {
    let stmts = &mut ctx.cfg.block_mut(bb).stmts;
    let mut pending: HashMap<SsaName, Pending> = HashMap::new();
    let mut dead = BitSet::new();

    for i in 0..stmts.len() {
        let mut finished = Vec::new();
        stmts[i].for_each_use(|op| {
            if let Some(name) = op.as_ssa() {
                if pending.contains_key(&name) {
                    finished.push(name);
                }
            }
        });
        for name in finished {
            let Some(entry) = pending.remove(&name) else {
                continue;
            };
            let def = stmts[entry.index].clone();
            if substitute(&mut stmts[i], name, &def) {
                dead.insert(entry.index);
                log::trace!("{bb}: folded the definition of {name} into statement {i}");
            }
        }

        if let Some(var) = stmts[i].def().and_then(|op| storage_var(op, storage)) {
            pending.retain(|_, p| !p.deps.contains(&var));
        }

        if let Some((name, deps)) = replaceable(&stmts[i], uses, storage) {
            pending.insert(name, Pending { index: i, deps });
        }
    }

    let mut index = 0;
    stmts.retain(|_| {
        let keep = !dead.contains(index);
        index += 1;
        keep
    });
    dead.count()
}

/// Fold every single-use definition into its use where no write in
/// between changes what it reads. Runs on SSA names, after storage has
/// been assigned and before statements are rewritten to variables.
/// Returns the number of definitions folded.
pub fn replace_temporary_exprs(ctx: &mut FunctionContext, storage: &StorageMap) -> usize {
    let uses = count_uses(ctx);
    let blocks: Vec<BlockId> = ctx.cfg.block_ids().collect();
    let replaced: usize = blocks
        .into_iter()
        .map(|bb| replace_in_block(ctx, bb, &uses, storage))
        .sum();
    log::debug!("{}: replaced {replaced} single-use definitions", ctx.name);
    replaced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::CfgOptions;
    use crate::core::BridgeSession;
    use crate::ssa::var_map::VarMap;
    use crate::test_ir::{parse_function, print_function};
    use bumpalo::Bump;

    /// Build `text` and give every SSA name its own storage.
    fn prepare(text: &str) -> (FunctionContext, StorageMap) {
        let _ = env_logger::builder().is_test(true).try_init();
        let arena = Bump::new();
        let session = BridgeSession::new(&arena);
        let mut ctx = parse_function(text)
            .unwrap()
            .build(&session, &CfgOptions::default())
            .unwrap();
        let map = VarMap::from_function(&ctx.symbols.ssa, &ctx.cfg);
        let storage = map
            .finalize(&mut ctx.symbols.vars, &BitSet::new(), &session)
            .unwrap();
        (ctx, storage)
    }

    #[test]
    fn test_operator_folds_into_copy() {
        let (mut ctx, storage) = prepare(
            "fn f(a) {
                t_1 = a_0(D) + 1;
                y_1 = t_1;
                return y_1;
             }",
        );
        assert_eq!(replace_temporary_exprs(&mut ctx, &storage), 1);
        let text = print_function(&ctx);
        assert!(text.contains("y_1 = a_0(D) + 1;"), "{text}");
        assert!(text.contains("return y_1;"), "{text}");
    }

    #[test]
    fn test_copy_folds_into_operator() {
        let (mut ctx, storage) = prepare(
            "fn f(a) {
                t_1 = a_0(D);
                y_1 = t_1 * 3;
                z_1 = y_1 + y_1;
                return z_1;
             }",
        );
        assert_eq!(replace_temporary_exprs(&mut ctx, &storage), 1);
        let text = print_function(&ctx);
        assert!(text.contains("y_1 = a_0(D) * 3;"), "{text}");
        assert!(!text.contains("t_1"), "{text}");
    }

    #[test]
    fn test_intervening_write_blocks_folding() {
        let (mut ctx, storage) = prepare(
            "fn f(a) {
                t_1 = a + 1;
                a = 7;
                y_1 = t_1;
                return y_1;
             }",
        );
        // `a` changes between the definition and the use; only `y_1` folds
        // into the return.
        let before = ctx.cfg.num_stmts();
        let folded = replace_temporary_exprs(&mut ctx, &storage);
        let text = print_function(&ctx);
        assert!(text.contains("t_1 = a + 1;"), "{text}");
        assert_eq!(ctx.cfg.num_stmts(), before - folded);
    }

    #[test]
    fn test_operator_does_not_fold_into_operator() {
        let (mut ctx, storage) = prepare(
            "fn f(a) {
                t_1 = a_0(D) + 1;
                y_1 = t_1 * 2;
                return y_1;
             }",
        );
        assert_eq!(replace_temporary_exprs(&mut ctx, &storage), 0);
    }

    #[test]
    fn test_division_stays_put() {
        let (mut ctx, storage) = prepare(
            "fn f(a, b) {
                t_1 = a_0(D) / b_0(D);
                call g();
                y_1 = t_1;
                return y_1;
             }",
        );
        // Only the copy folds into the return.
        assert_eq!(replace_temporary_exprs(&mut ctx, &storage), 1);
        let text = print_function(&ctx);
        assert!(text.contains("t_1 = a_0(D) / b_0(D);"), "{text}");
    }

    #[test]
    fn test_multiple_uses_and_other_blocks_are_left_alone() {
        let (mut ctx, storage) = prepare(
            "fn f(a, c) {
                t_1 = a_0(D) + 1;
                u_1 = t_1 + t_1;
                v_1 = a_0(D) - 1;
                if (c_0(D)) goto L; else goto M;
             L: w_1 = v_1;
                return w_1;
             M: return u_1;
             }",
        );
        let folded = replace_temporary_exprs(&mut ctx, &storage);
        let text = print_function(&ctx);
        assert!(text.contains("t_1 = a_0(D) + 1;"), "{text}");
        assert!(text.contains("v_1 = a_0(D) - 1;"), "{text}");
        // Only `w_1` folds, into the return in its own block.
        assert_eq!(folded, 1);
    }
}
