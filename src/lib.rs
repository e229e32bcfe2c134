//! ssa-bridge: control-flow graph construction and out-of-SSA conversion.
//!
//! The bridge sits between a lowering pass that produces a flat statement
//! stream and a backend that wants plain variable-based code. It builds an
//! explicit control-flow graph from the stream, cleans it up, and later
//! converts SSA form back into variables, placing the copies PHI nodes imply
//! on the incoming edges.
//!
//! # Primary Usage
//!
//! ```ignore
//! use ssa_bridge::{build_cfg, remove_ssa_form, BridgeSession, CfgOptions, OutOfSsaOptions};
//! use bumpalo::Bump;
//!
//! let arena = Bump::new();
//! let session = BridgeSession::new(&arena);
//! build_cfg(&session, &mut ctx, stmts, &CfgOptions::default())?;
//! // ... SSA construction and optimization happen elsewhere ...
//! let storage = remove_ssa_form(&session, &mut ctx, &OutOfSsaOptions::default())?;
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Shared infrastructure (errors, bit sets, session)
//! - [`ir`] - Statements, operands, PHI nodes and symbol tables
//! - [`cfg`] - Graph model, builder, cleanup, verifier, edge insertion
//! - [`ssa`] - Partitions, liveness, coalescing, PHI elimination
//! - [`test_ir`] - Textual test format, printer and interpreter

pub mod cfg;
pub mod core;
pub mod function;
pub mod ir;
pub mod ssa;
pub mod test_ir;

pub use crate::cfg::{build_cfg, perform_edge_inserts, verify_flow, Cfg, CfgOptions};
pub use crate::core::{BitSet, BridgeError, BridgeResult, BridgeSession, SessionStats};
pub use crate::function::FunctionContext;
pub use crate::ssa::{remove_ssa_form, OutOfSsaOptions, StorageMap, VarMap};
