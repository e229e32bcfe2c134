//! Developer driver: runs the bridge over a test IR file and prints the
//! function after each stage.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use bumpalo::Bump;
use clap::{ArgAction, Parser};

use ssa_bridge::cfg::CfgOptions;
use ssa_bridge::ssa::{remove_ssa_form, OutOfSsaOptions};
use ssa_bridge::test_ir::{parse_function, print_function, run};
use ssa_bridge::BridgeSession;

/// Build the CFG of a test IR function and take it out of SSA form.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Arguments {
    /// Do not merge straight-line block pairs.
    #[arg(long, action = ArgAction::SetTrue)]
    no_merge: bool,

    /// Keep blocks ENTRY cannot reach.
    #[arg(long, action = ArgAction::SetTrue)]
    keep_unreachable: bool,

    /// Split every critical edge after cleanup.
    #[arg(long, action = ArgAction::SetTrue)]
    split_critical: bool,

    /// Skip coalescing along PHI and copy affinities.
    #[arg(long, action = ArgAction::SetTrue)]
    no_coalesce_list: bool,

    /// Skip the final sweep over partitions of one variable.
    #[arg(long, action = ArgAction::SetTrue)]
    no_coalesce_partitions: bool,

    /// Let non-interfering temporaries of different names share storage.
    #[arg(long, action = ArgAction::SetTrue)]
    combine_temps: bool,

    /// Keep single-use definitions instead of folding them into their use.
    #[arg(long, action = ArgAction::SetTrue)]
    no_ter: bool,

    /// Skip the structural checks around out-of-SSA.
    #[arg(long, action = ArgAction::SetTrue)]
    no_verify: bool,

    /// Stop after building the graph.
    #[arg(long, action = ArgAction::SetTrue)]
    cfg_only: bool,

    /// Interpret the function on these arguments before and after conversion.
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    run: Option<Vec<i64>>,

    /// Input file, or `-` for stdin.
    #[arg(required = true)]
    path: PathBuf,
}

fn read_input(path: &Path) -> io::Result<String> {
    if path.as_os_str() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        fs::read_to_string(path)
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Arguments::parse();

    let text = match read_input(&args.path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error: cannot read {}: {e}", args.path.display());
            return ExitCode::FAILURE;
        }
    };
    let function = match parse_function(&text) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Parse error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let cfg_options = CfgOptions {
        merge_blocks: !args.no_merge,
        remove_unreachable: !args.keep_unreachable,
        split_critical_edges: args.split_critical,
    };
    let ssa_options = OutOfSsaOptions {
        use_coalesce_list: !args.no_coalesce_list,
        coalesce_partitions: !args.no_coalesce_partitions,
        combine_temps: args.combine_temps,
        replace_exprs: !args.no_ter,
        verify: !args.no_verify,
    };

    let arena = Bump::new();
    let session = BridgeSession::new(&arena);
    let mut ctx = match function.build(&session, &cfg_options) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    println!("{}", print_function(&ctx));

    let before = args.run.as_ref().map(|values| run(&ctx, values));
    if args.cfg_only {
        if let Some(result) = before {
            println!("Run: {result:?}");
        }
        print!("{}", session.stats());
        return ExitCode::SUCCESS;
    }

    if let Err(e) = remove_ssa_form(&session, &mut ctx, &ssa_options) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }
    println!("{}", print_function(&ctx));

    if let (Some(values), Some(before)) = (args.run.as_ref(), before) {
        let after = run(&ctx, values);
        println!("Run before: {before:?}");
        println!("Run after:  {after:?}");
        let same = match (&before, &after) {
            (Ok(b), Ok(a)) => b.outcome == a.outcome && b.calls == a.calls,
            _ => false,
        };
        if !same {
            eprintln!("Error: conversion changed behaviour");
            return ExitCode::FAILURE;
        }
    }
    print!("{}", session.stats());
    ExitCode::SUCCESS
}
