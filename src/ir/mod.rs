// This module defines the statement-level intermediate representation the bridge consumes and
// produces. A function arrives as a flat stream of statements (assignments, calls,
// conditional and multi-way branches, local and computed jumps, returns, labels and
// raise/resume) that refer to variables, SSA-versioned names, constants and label addresses.
// All cross references are small integer ids into per-function tables (VarTable,
// SsaNameTable, LabelTable, grouped as Symbols) or into the graph arenas (BlockId, EdgeId),
// never pointers, so the graph can contain cycles without ownership cycles. The same
// statement type is used before and after out-of-SSA: the only difference is whether
// operands are Operand::Ssa or Operand::Var.

//! Statement IR, identifiers and symbol tables.

use std::fmt;

pub mod names;
pub mod stmt;

pub use names::{LabelInfo, LabelTable, SsaNameInfo, SsaNameTable, Symbols, VarDecl, VarTable};
pub use stmt::{
    BinOp, CallFlags, CaseRange, Expr, GotoTarget, Locus, Operand, Phi, PhiArg, Show, Stmt,
    StmtKind, UnOp,
};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl $name {
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }

            #[inline]
            pub fn from_index(index: usize) -> Self {
                Self(index as u32)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

define_id!(
    /// Index of a basic block in the graph arena.
    BlockId, "bb "
);
define_id!(
    /// Index of an edge in the graph arena.
    EdgeId, "e"
);
define_id!(
    /// Source-level (or compiler temporary) variable.
    VarId, "var#"
);
define_id!(
    /// SSA-versioned name.
    SsaName, "ssa#"
);
define_id!(
    /// Label declared in the function.
    LabelId, "label#"
);
define_id!(
    /// Opaque exception region handle.
    RegionId, "region#"
);

impl BlockId {
    /// The unique entry block of every function.
    pub const ENTRY: BlockId = BlockId(0);
    /// The unique exit block of every function.
    pub const EXIT: BlockId = BlockId(1);
    /// Number of fixed blocks preceding the ordinary ones.
    pub const NUM_FIXED: usize = 2;
}
