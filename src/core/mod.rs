// This module gathers the infrastructure shared by every pass of the bridge: the error
// taxonomy (thiserror-based BridgeError with its BridgeResult alias), the dense bit set that
// liveness and reachability computations are written against, and the per-function arena
// session that owns scratch allocations and edit statistics. None of these types know about
// statements or blocks; they sit underneath the ir, cfg and ssa modules.

//! Core infrastructure for the bridge.
//!
//! # Key Components
//!
//! ## Session Management (`session`)
//! - Arena-based scratch allocation using `bumpalo`
//! - Counters for structural edits
//!
//! ## Bit Sets (`bitset`)
//! - Growable dense bit sets with union/subtract and ordered iteration
//!
//! ## Errors (`error`)
//! - Fatal error taxonomy for corrupt input and unsatisfiable coalescing

pub mod bitset;
pub mod error;
pub mod session;

pub use bitset::BitSet;
pub use error::{BridgeError, BridgeResult};
pub use session::{BridgeSession, SessionStats};
