//! Integration tests for out-of-SSA conversion.
//!
//! Every function is interpreted before and after conversion; the outcome
//! and the sequence of external calls must not change.

use std::fs;
use std::path::Path;

use bumpalo::Bump;
use ssa_bridge::cfg::{verify_flow, CfgOptions};
use ssa_bridge::ir::Operand;
use ssa_bridge::ssa::{remove_ssa_form, OutOfSsaOptions};
use ssa_bridge::test_ir::{parse_function, print_function, run, Outcome};
use ssa_bridge::{BridgeError, BridgeSession, FunctionContext, SessionStats};

/// Helper to load a test IR file from the test data directory
fn load_bir_file(filename: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(filename);
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e))
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

fn build(session: &BridgeSession<'_>, text: &str) -> FunctionContext {
    let _ = env_logger::builder().is_test(true).try_init();
    parse_function(text)
        .unwrap_or_else(|e| panic!("Failed to parse: {e}"))
        .build(session, &CfgOptions::default())
        .unwrap_or_else(|e| panic!("Failed to build: {e}"))
}

/// Convert `text` out of SSA and check behaviour on every argument list.
/// Returns the converted function and the session statistics.
fn convert_and_compare(text: &str, inputs: &[&[i64]]) -> (FunctionContext, SessionStats) {
    convert_with(text, inputs, &OutOfSsaOptions::default())
}

fn convert_with(
    text: &str,
    inputs: &[&[i64]],
    options: &OutOfSsaOptions,
) -> (FunctionContext, SessionStats) {
    let arena = Bump::new();
    let session = BridgeSession::new(&arena);
    let mut ctx = build(&session, text);
    let before: Vec<_> = inputs.iter().map(|args| run(&ctx, args).unwrap()).collect();

    remove_ssa_form(&session, &mut ctx, options)
        .unwrap_or_else(|e| panic!("Conversion failed: {e}\n{}", print_function(&ctx)));
    assert_eq!(ctx.num_phis(), 0);
    verify_flow(&ctx).unwrap();
    assert_no_ssa_names(&ctx);

    for (args, expected) in inputs.iter().zip(&before) {
        let after = run(&ctx, args)
            .unwrap_or_else(|e| panic!("Run on {args:?} failed: {e}\n{}", print_function(&ctx)));
        assert_eq!(
            (&after.outcome, &after.calls),
            (&expected.outcome, &expected.calls),
            "behaviour changed on {args:?}\n{}",
            print_function(&ctx)
        );
    }
    (ctx, session.stats())
}

fn assert_no_ssa_names(ctx: &FunctionContext) {
    for bb in ctx.cfg.block_ids() {
        for stmt in &ctx.cfg.block(bb).stmts {
            stmt.for_each_use(|op| assert!(!matches!(op, Operand::Ssa(_)), "{op:?} survived"));
            assert!(!matches!(stmt.def(), Some(Operand::Ssa(_))));
        }
    }
}

fn returned(ctx: &FunctionContext, args: &[i64]) -> Option<i64> {
    match run(ctx, args).unwrap().outcome {
        Outcome::Returned(v) => v,
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn test_swap_loop() {
    let text = load_bir_file("swap.bir");
    let (ctx, stats) = convert_and_compare(&text, &[&[0], &[1], &[2], &[3], &[6]]);
    assert_eq!(returned(&ctx, &[3]), Some(12));
    assert_eq!(returned(&ctx, &[2]), Some(21));
    // One cycle of two values on the back edge.
    assert_eq!(stats.copies_inserted, 3);
    assert_eq!(stats.temporaries_created, 1);
    // The back edge is critical and had to get its own block.
    let latch = ctx.cfg.label_block(ctx.symbols.labels.lookup("L").unwrap()).unwrap();
    let preds = &ctx.cfg.block(latch).preds;
    assert_eq!(preds.len(), 2);
    assert!(preds.iter().all(|&e| ctx.cfg.edge(e).src != latch));
}

#[test]
fn test_lost_copy() {
    let text = load_bir_file("lost_copy.bir");
    let (ctx, stats) = convert_and_compare(&text, &[&[0], &[1], &[5], &[9]]);
    assert_eq!(returned(&ctx, &[5]), Some(4));
    // x_2 and x_3 interfere, so one of them lives in a fresh variable.
    assert_eq!(stats.temporaries_created, 1);
    assert_eq!(stats.copies_inserted, 1);
    assert!(ctx.symbols.vars.lookup("x.1").is_some());
}

#[test]
fn test_sum_loop_needs_no_copies() {
    let text = load_bir_file("sum.bir");
    let (ctx, stats) = convert_and_compare(&text, &[&[0], &[1], &[4], &[10]]);
    assert_eq!(returned(&ctx, &[4]), Some(6));
    assert_eq!(stats.copies_inserted, 0);
    assert_eq!(stats.temporaries_created, 0);
    check_output_contains(&print_function(&ctx), &["s = s + i;", "i = i + 1;", "return s;"]);
}

#[test]
fn test_dispatch_with_handler_region() {
    let text = load_bir_file("dispatch.bir");
    let (ctx, _) = convert_and_compare(
        &text,
        &[&[1, 6], &[2, 6], &[4, 6], &[7, 6], &[9, 6], &[-1, 6]],
    );
    assert_eq!(returned(&ctx, &[1, 6]), Some(106));
    assert_eq!(returned(&ctx, &[4, 6]), Some(6));
    assert_eq!(returned(&ctx, &[7, 6]), Some(-6));
}

#[test]
fn test_parameter_redefined_while_live() {
    let (ctx, stats) = convert_and_compare(
        "fn g(x) {
            x_1 = x_0(D) * 2;
            r_1 = x_1 + x_0(D);
            return r_1;
         }",
        &[&[5], &[-3]],
    );
    assert_eq!(returned(&ctx, &[5]), Some(15));
    assert_eq!(stats.temporaries_created, 1);
    check_output_contains(&print_function(&ctx), &["x.1 = x * 2;", "r = x.1 + x;"]);
}

#[test]
fn test_constant_and_default_arguments() {
    let (ctx, stats) = convert_and_compare(
        "fn f(x, c) {
            if (c_0(D)) goto A; else goto B;
         A: x_1 = x_0(D) + 1;
            goto J;
         B: y_1 = 0;
         J: x_2 = phi <x_1(A), x_0(D)(B)>;
            y_2 = phi <7(A), y_1(B)>;
            r_1 = x_2 + y_2;
            return r_1;
         }",
        &[&[10, 0], &[10, 1]],
    );
    assert_eq!(returned(&ctx, &[10, 1]), Some(18));
    assert_eq!(returned(&ctx, &[10, 0]), Some(10));
    // Only the constant needs a copy; everything else shares storage.
    assert_eq!(stats.copies_inserted, 1);
    assert_eq!(stats.temporaries_created, 0);
}

#[test]
fn test_coalescing_across_abnormal_edge() {
    let (_, stats) = convert_and_compare(
        "fn h() {
         P: x_1 = 1;
            call g() nonlocal_goto;
         Q: x_2 = x_1 + 1;
         nonlocal R:
            x_3 = phi <x_1(P), x_2(Q)>;
            return x_3;
         }",
        &[&[]],
    );
    assert_eq!(stats.copies_inserted, 0);
    assert!(stats.partitions_coalesced >= 2);
}

#[test]
fn test_abnormal_edge_between_different_variables_is_fatal() {
    let arena = Bump::new();
    let session = BridgeSession::new(&arena);
    let mut ctx = build(
        &session,
        "fn h() {
         P: y_1 = 1;
            call g() nonlocal_goto;
         Q: x_2 = y_1 + 1;
         nonlocal R:
            x_3 = phi <y_1(P), x_2(Q)>;
            return x_3;
         }",
    );
    let err = remove_ssa_form(&session, &mut ctx, &OutOfSsaOptions::default()).unwrap_err();
    assert!(matches!(err, BridgeError::AbnormalCoalesce { .. }), "{err}");
}

#[test]
fn test_without_coalescing_copies_appear() {
    let text = load_bir_file("sum.bir");
    let arena = Bump::new();
    let session = BridgeSession::new(&arena);
    let mut ctx = build(&session, &text);
    let expected = run(&ctx, &[6]).unwrap();

    let options = OutOfSsaOptions {
        use_coalesce_list: false,
        coalesce_partitions: false,
        replace_exprs: false,
        ..OutOfSsaOptions::default()
    };
    remove_ssa_form(&session, &mut ctx, &options).unwrap();
    let stats = session.stats();
    assert!(stats.copies_inserted >= 4, "{stats}");
    assert!(stats.temporaries_created >= 4, "{stats}");
    assert_eq!(run(&ctx, &[6]).unwrap().outcome, expected.outcome);
}

const DISJOINT_TEMPS: &str = "fn f(a) {
    temp t, u;
    t_1 = a_0(D) + 1;
    x_1 = t_1 * 2;
    u_1 = x_1 - 3;
    r_1 = u_1 * u_1;
    return r_1;
 }";

#[test]
fn test_combined_temporaries_share_one_variable() {
    let options = OutOfSsaOptions {
        combine_temps: true,
        ..OutOfSsaOptions::default()
    };
    let (ctx, stats) = convert_with(DISJOINT_TEMPS, &[&[0], &[2], &[-7]], &options);
    assert_eq!(returned(&ctx, &[2]), Some(9));
    assert_eq!(stats.temporaries_combined, 1);
    let text = print_function(&ctx);
    assert!(
        !(text.contains("t = ") && text.contains("u = ")),
        "t and u should share storage\n{text}"
    );
}

#[test]
fn test_temporaries_keep_their_own_variables_by_default() {
    let (ctx, stats) = convert_and_compare(DISJOINT_TEMPS, &[&[0], &[2]]);
    assert_eq!(stats.temporaries_combined, 0);
    check_output_contains(&print_function(&ctx), &["t = a + 1;", "u = x - 3;"]);
}

const FOLDABLE: &str = "fn f(a, b) {
    t_1 = a_0(D) * b_0(D);
    x_1 = t_1;
    c_1 = b_0(D);
    call show(c_1) nothrow;
    m = 4;
    u_1 = m + 1;
    m = 9;
    v_1 = u_1;
    call show(v_1) nothrow;
    r_1 = x_1 + m;
    return r_1;
 }";

#[test]
fn test_single_use_definitions_are_folded() {
    let inputs: &[&[i64]] = &[&[3, 4], &[0, -2]];
    let (folded, stats) = convert_and_compare(FOLDABLE, inputs);
    assert_eq!(returned(&folded, &[3, 4]), Some(21));
    // `m` is rewritten between `u_1` and its use, so `u_1` stays.
    assert_eq!(stats.expressions_replaced, 3);
    check_output_contains(
        &print_function(&folded),
        &["x = a * b;", "call show(b)", "u = m + 1;", "call show(u)"],
    );

    let options = OutOfSsaOptions {
        replace_exprs: false,
        ..OutOfSsaOptions::default()
    };
    let (plain, stats) = convert_with(FOLDABLE, inputs, &options);
    assert_eq!(stats.expressions_replaced, 0);
    assert_eq!(plain.cfg.num_stmts(), folded.cfg.num_stmts() + 3);
}

