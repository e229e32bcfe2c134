// This module provides the textual test IR used by the unit tests, the integration tests and
// the developer binary. A test function is written as a GIMPLE-like statement stream with
// explicit SSA names, labels and PHI nodes; the parser turns it into a FunctionContext
// holding the symbol tables and exception regions plus the flat statement list, and keeps
// PHI nodes aside until the graph exists because their arguments are keyed by edges. The
// printer renders a built function block by block, and the interpreter executes one so tests
// can check that a transformation preserved behaviour.

//! Test IR parser, printer and interpreter.
//!
//! # Format
//!
//! ```text
//! // Comments run to the end of the line
//! fn f(c, n) {
//!     region r0 handler H catch_all;
//!     if (c_0(D)) goto L1; else goto L2;
//!  L1: x_1 = n_0(D) + 1;
//!     goto L3;
//!  L2: x_2 = call g(n_0(D)); @r0
//!  L3: x_3 = phi <x_1(L1), x_2(L2)>;
//!     return x_3;
//!  H: resume;
//! }
//! ```
//!
//! `name_N` is version `N` of variable `name`, `(D)` marks the default
//! definition. A bare identifier is the variable itself. `temp t, u;` declares
//! `t` and `u` as artificial temporaries. `<D1>:` declares an
//! artificial label and `nonlocal L:` a non-local one. A PHI argument is
//! keyed by the label of its predecessor block, or by `entry` for the edge
//! from ENTRY; a PHI belongs to the block of the closest preceding label, or
//! to the first block when none precedes it.

use std::fmt;

use crate::cfg::cleanup::cleanup_cfg;
use crate::cfg::builder::{make_blocks, make_edges};
use crate::cfg::CfgOptions;
use crate::core::{BridgeError, BridgeResult, BridgeSession};
use crate::function::FunctionContext;
use crate::ir::{BlockId, LabelId, Operand, Phi, SsaName, Stmt};

pub mod interp;
pub mod parser;

pub use interp::{run, Outcome, Run, Value};

/// Predecessor a PHI argument flows from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhiKey {
    Entry,
    Label(LabelId),
}

/// A PHI node as written, before the edges it is keyed by exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPhi {
    pub result: SsaName,
    pub args: Vec<(PhiKey, Operand)>,
    /// Closest label preceding the PHI in the stream.
    pub anchor: Option<LabelId>,
}

/// A parsed test function.
#[derive(Debug, Clone)]
pub struct TestFunction {
    pub ctx: FunctionContext,
    pub stmts: Vec<Stmt>,
    pub phis: Vec<PendingPhi>,
}

/// Parse one test function.
pub fn parse_function(text: &str) -> Result<TestFunction, String> {
    parser::parse_function(text)
}

impl TestFunction {
    /// Partition the stream, create edges and attach PHI nodes, without any
    /// cleanup.
    pub fn build_raw(self, session: &BridgeSession<'_>) -> BridgeResult<FunctionContext> {
        let TestFunction {
            mut ctx,
            stmts,
            phis,
        } = self;
        make_blocks(session, &mut ctx, stmts)?;
        make_edges(&mut ctx)?;
        attach_phis(&mut ctx, phis)?;
        Ok(ctx)
    }

    /// [`TestFunction::build_raw`] followed by the cleanup passes.
    pub fn build(
        self,
        session: &BridgeSession<'_>,
        options: &CfgOptions,
    ) -> BridgeResult<FunctionContext> {
        let mut ctx = self.build_raw(session)?;
        cleanup_cfg(session, &mut ctx, options)?;
        Ok(ctx)
    }
}

fn label_block(ctx: &FunctionContext, label: LabelId) -> BridgeResult<BlockId> {
    ctx.cfg
        .label_block(label)
        .ok_or(BridgeError::MissingLabel { label })
}

fn attach_phis(ctx: &mut FunctionContext, phis: Vec<PendingPhi>) -> BridgeResult<()> {
    if phis.is_empty() {
        return Ok(());
    }
    let first = ctx
        .cfg
        .ordinary_block_ids()
        .next()
        .ok_or_else(|| BridgeError::corrupt("PHI node in a function without blocks"))?;

    for pending in phis {
        let bb = match pending.anchor {
            Some(label) => label_block(ctx, label)?,
            None => first,
        };
        let mut phi = Phi::new(pending.result);
        for (key, value) in pending.args {
            let src = match key {
                PhiKey::Entry => BlockId::ENTRY,
                PhiKey::Label(label) => label_block(ctx, label)?,
            };
            let edge = ctx.cfg.find_edge(src, bb).ok_or_else(|| {
                BridgeError::corrupt(format!("PHI argument keyed by {src}, which is no predecessor of {bb}"))
            })?;
            phi.set_arg(edge, value);
        }
        ctx.cfg.block_mut(bb).phis.push(phi);
    }
    Ok(())
}

/// Block-by-block listing of a built function.
pub struct FunctionPrinter<'a> {
    ctx: &'a FunctionContext,
}

impl<'a> FunctionPrinter<'a> {
    pub fn new(ctx: &'a FunctionContext) -> Self {
        Self { ctx }
    }
}

impl fmt::Display for FunctionPrinter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ctx = self.ctx;
        let s = &ctx.symbols;
        write!(f, "Function {}(", ctx.name)?;
        for (i, &param) in ctx.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", s.vars.get(param).name)?;
        }
        writeln!(f, ")")?;

        for bb in ctx.cfg.ordinary_block_ids() {
            let block = &ctx.cfg.block(bb);
            writeln!(f, "{bb}:")?;
            for phi in &block.phis {
                writeln!(f, "  {}", s.show(phi))?;
            }
            for stmt in &block.stmts {
                writeln!(f, "  {}", s.show(stmt))?;
            }
            for &e in &block.succs {
                let edge = ctx.cfg.edge(e);
                writeln!(f, "  Succ {} ({e}, {:?})", edge.dest, edge.flags)?;
            }
        }
        Ok(())
    }
}

/// Render `ctx` as text.
pub fn print_function(ctx: &FunctionContext) -> String {
    FunctionPrinter::new(ctx).to_string()
}
