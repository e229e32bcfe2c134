//! Integration tests for graph construction and cleanup.
//!
//! Functions are written in the test IR, built with the default cleanup and
//! checked both structurally and by running them through the interpreter.

use bumpalo::Bump;
use ssa_bridge::cfg::{verify_flow, CfgOptions, EdgeFlags};
use ssa_bridge::ir::{BlockId, StmtKind};
use ssa_bridge::test_ir::{parse_function, print_function, run, Outcome};
use ssa_bridge::{BridgeError, BridgeSession, FunctionContext};

fn build_with(text: &str, options: CfgOptions) -> FunctionContext {
    let _ = env_logger::builder().is_test(true).try_init();
    let arena = Bump::new();
    let session = BridgeSession::new(&arena);
    parse_function(text)
        .unwrap_or_else(|e| panic!("Failed to parse: {e}"))
        .build(&session, &options)
        .unwrap_or_else(|e| panic!("Failed to build: {e}"))
}

fn build(text: &str) -> FunctionContext {
    build_with(text, CfgOptions::default())
}

fn build_err(text: &str) -> BridgeError {
    let arena = Bump::new();
    let session = BridgeSession::new(&arena);
    parse_function(text)
        .unwrap()
        .build(&session, &CfgOptions::default())
        .unwrap_err()
}

fn block_of(ctx: &FunctionContext, name: &str) -> BlockId {
    ctx.cfg
        .label_block(ctx.symbols.labels.lookup(name).unwrap())
        .unwrap()
}

fn returned(ctx: &FunctionContext, args: &[i64]) -> Option<i64> {
    match run(ctx, args).unwrap().outcome {
        Outcome::Returned(v) => v,
        other => panic!("unexpected outcome {other:?}"),
    }
}

/// Helper to check if output contains expected patterns
fn check_output_contains(output: &str, patterns: &[&str]) {
    for pattern in patterns {
        assert!(
            output.contains(pattern),
            "Output missing expected pattern: '{pattern}'\nFull output:\n{output}"
        );
    }
}

/// ENTRY has exactly one successor and no predecessors, EXIT has no
/// successors, and every block is reachable from ENTRY.
fn check_entry_exit(ctx: &FunctionContext) {
    let cfg = &ctx.cfg;
    assert!(cfg.block(BlockId::ENTRY).preds.is_empty());
    assert!(cfg.single_succ(BlockId::ENTRY).is_some());
    assert!(cfg.block(BlockId::EXIT).succs.is_empty());
    let reachable = cfg.reachable();
    for bb in cfg.block_ids() {
        assert!(reachable.contains(bb.index()), "{bb} is unreachable");
    }
    verify_flow(ctx).unwrap();
}

#[test]
fn test_switch_with_shared_targets_gets_one_edge_per_block() {
    let ctx = build(
        "fn f(s) {
            switch (s_0(D)) { case 1: L; case 2: L; case 3: M; default: M; }
         L: return 1;
         M: return 2;
         }",
    );
    check_entry_exit(&ctx);
    let sw = ctx.cfg.edge(ctx.cfg.single_succ(BlockId::ENTRY).unwrap()).dest;
    let succs = &ctx.cfg.block(sw).succs;
    assert_eq!(succs.len(), 2);
    let dests: Vec<BlockId> = succs.iter().map(|&e| ctx.cfg.edge(e).dest).collect();
    assert!(dests.contains(&block_of(&ctx, "L")));
    assert!(dests.contains(&block_of(&ctx, "M")));

    match &ctx.cfg.block(sw).last_stmt().unwrap().kind {
        StmtKind::Switch { cases, .. } => {
            assert_eq!(cases.len(), 1);
            assert_eq!((cases[0].low, cases[0].high), (1, 2));
        }
        other => panic!("unexpected terminator {other:?}"),
    }

    assert_eq!(returned(&ctx, &[1]), Some(1));
    assert_eq!(returned(&ctx, &[2]), Some(1));
    assert_eq!(returned(&ctx, &[3]), Some(2));
    assert_eq!(returned(&ctx, &[-4]), Some(2));
}

#[test]
fn test_statement_accounting() {
    // Six statements go in; the goto becomes an edge and the unreferenced
    // synthetic label is deleted.
    let ctx = build(
        "fn f() {
            x_1 = 1;
            goto L;
         <D1>:
         L: y_1 = x_1 + 2;
            return y_1;
         }",
    );
    check_entry_exit(&ctx);
    assert_eq!(ctx.cfg.num_stmts(), 4);
    assert!(ctx.symbols.labels.lookup("D1").is_some());
    assert!(ctx
        .cfg
        .label_block(ctx.symbols.labels.lookup("D1").unwrap())
        .is_none());
    assert_eq!(returned(&ctx, &[]), Some(3));
}

#[test]
fn test_straight_line_blocks_merge() {
    let text = "fn f(a) {
            x_1 = a_0(D) + 1;
         <D1>:
            y_1 = x_1 * 2;
         <D2>:
            return y_1;
         }";
    let merged = build(text);
    check_entry_exit(&merged);
    assert_eq!(merged.cfg.num_blocks(), 3);

    let unmerged = build_with(
        text,
        CfgOptions {
            merge_blocks: false,
            ..CfgOptions::default()
        },
    );
    check_entry_exit(&unmerged);
    assert_eq!(unmerged.cfg.num_blocks(), 5);
    assert_eq!(returned(&merged, &[4]), returned(&unmerged, &[4]));
}

#[test]
fn test_loop_header_is_not_merged_away() {
    let ctx = build(
        "fn f(n) {
         P: i_1 = 0;
         L: i_2 = phi <i_1(P), i_3(B)>;
            c_1 = i_2 < n_0(D);
            if (c_1) goto B; else goto X;
         B: i_3 = i_2 + 1;
            goto L;
         X: return i_2;
         }",
    );
    check_entry_exit(&ctx);
    let l = block_of(&ctx, "L");
    assert_eq!(ctx.cfg.block(l).preds.len(), 2);
    assert_eq!(ctx.cfg.block(l).phis.len(), 1);
    assert_eq!(returned(&ctx, &[7]), Some(7));
}

#[test]
fn test_exception_and_nonlocal_edges() {
    let ctx = build(
        "fn f(v) {
            region r0 handler H;
            x_1 = call g(v_0(D)); @r0
            call h() nonlocal_goto nothrow;
            return x_1;
         H: raise 1;
         nonlocal N: return 0;
         }",
    );
    check_entry_exit(&ctx);
    let h = block_of(&ctx, "H");
    let n = block_of(&ctx, "N");

    let eh = ctx.cfg.single_pred(h).unwrap();
    let eh = ctx.cfg.edge(eh);
    assert!(eh.flags.contains(EdgeFlags::EXCEPTION | EdgeFlags::ABNORMAL));
    assert_eq!(eh.probability, 0);

    let into_n = ctx.cfg.single_pred(n).unwrap();
    assert!(ctx.cfg.edge(into_n).flags.contains(EdgeFlags::ABNORMAL));

    // The raise has no handler of its own and leaves the function.
    let out_of_h = ctx.cfg.single_succ(h).unwrap();
    assert_eq!(ctx.cfg.edge(out_of_h).dest, BlockId::EXIT);
    assert!(ctx.cfg.edge(out_of_h).flags.contains(EdgeFlags::EXCEPTION));

    let result = run(&ctx, &[5]).unwrap();
    assert_eq!(result.outcome, Outcome::Returned(Some(5)));
    assert_eq!(result.calls.len(), 2);
}

#[test]
fn test_noreturn_call_gets_fake_exit_edge() {
    let ctx = build(
        "fn f(c) {
            if (c_0(D)) goto A; else goto B;
         A: call abort() noreturn;
         B: return 0;
         }",
    );
    check_entry_exit(&ctx);
    let a = block_of(&ctx, "A");
    let e = ctx.cfg.single_succ(a).unwrap();
    assert_eq!(ctx.cfg.edge(e).dest, BlockId::EXIT);
    assert!(ctx.cfg.edge(e).flags.contains(EdgeFlags::FAKE));
    assert_eq!(ctx.cfg.block(block_of(&ctx, "B")).preds.len(), 1);
    assert_eq!(
        run(&ctx, &[1]).unwrap().outcome,
        Outcome::NoReturn("abort".to_string())
    );
}

#[test]
fn test_printed_function() {
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
    let output = print_function(&ctx);
    check_output_contains(
        &output,
        &[
            "Function f(c)",
            "if (c_0(D)) goto L1; else goto L2;",
            "L1:",
            "x_1 = 1;",
            "x_3 = phi <x_1(",
            "return x_3;",
            "Succ bb 1",
        ],
    );
}

#[test]
fn test_malformed_streams_are_rejected() {
    assert!(matches!(
        build_err("fn f() { goto Z; }"),
        BridgeError::MissingLabel { .. }
    ));
    assert!(matches!(
        build_err("fn f(c) { if (c_0(D)) goto A; A: return 0; }"),
        BridgeError::MissingTarget { .. }
    ));
    assert!(matches!(
        build_err("fn f() { A: x_1 = 1; A: return x_1; }"),
        BridgeError::StructuralCorruption { .. }
    ));
    assert!(matches!(
        build_err("fn f() { scope_open 1; return 0; }"),
        BridgeError::UnbalancedScope { scope: 1 }
    ));
}
