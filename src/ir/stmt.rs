// This module defines the statement language the bridge works on. Operands are SSA names,
// plain variables, constants or label addresses; expressions are at most one operator deep.
// Statement kinds cover assignments, calls with control-flow flags, the branch forms, returns,
// raises, labels and the lowering-scope markers. PHI nodes keep one argument per incoming
// edge, keyed by edge id so edge surgery can move or drop arguments without searching.

//! Statements, operands and PHI nodes.
//!
//! Statements are plain owned values; a block holds them in a `Vec`. The
//! operand visitors here are what liveness, rewriting and the interpreter
//! are written against, so every operand position of every statement kind
//! must be reachable through them.

use std::fmt;

use bitflags::bitflags;

use super::{BlockId, EdgeId, LabelId, RegionId, SsaName, Symbols, VarId};

/// A value read or written by a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Ssa(SsaName),
    Var(VarId),
    Const(i64),
    /// Address of a label, the operand of a computed jump.
    LabelAddr(LabelId),
}

impl Operand {
    pub fn as_ssa(&self) -> Option<SsaName> {
        match *self {
            Operand::Ssa(name) => Some(name),
            _ => None,
        }
    }

    /// Whether the operand names storage (as opposed to a constant).
    pub fn is_storage(&self) -> bool {
        matches!(self, Operand::Ssa(_) | Operand::Var(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::Xor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }
}

/// Right-hand side of an assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Use(Operand),
    Unary(UnOp, Operand),
    Binary(BinOp, Operand, Operand),
}

bitflags! {
    /// Properties of a call that matter for control flow.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CallFlags: u8 {
        /// The call never returns normally.
        const NORETURN = 0x1;
        /// The call cannot raise.
        const NOTHROW = 0x2;
        /// The callee may jump to a non-local label of this function.
        const NONLOCAL_GOTO = 0x4;
    }
}

/// One arm of a multi-way branch: `low ..= high` jumps to `label`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaseRange {
    pub low: i64,
    pub high: i64,
    pub label: LabelId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GotoTarget {
    Label(LabelId),
    /// Jump through a label address held in an operand.
    Computed(Operand),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StmtKind {
    Assign {
        dest: Operand,
        value: Expr,
    },
    Call {
        dest: Option<Operand>,
        callee: String,
        args: Vec<Operand>,
        flags: CallFlags,
    },
    CondBranch {
        cond: Operand,
        then_label: Option<LabelId>,
        else_label: Option<LabelId>,
    },
    Switch {
        selector: Operand,
        cases: Vec<CaseRange>,
        default: LabelId,
    },
    Goto {
        target: GotoTarget,
    },
    Return {
        value: Option<Operand>,
    },
    Label {
        label: LabelId,
    },
    Raise {
        value: Operand,
    },
    Resume,
    /// Lowering-scope markers left by the stream producer.
    ScopeOpen {
        scope: u32,
    },
    ScopeClose {
        scope: u32,
    },
}

/// Source position and lexical scope of a statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Locus {
    pub line: u32,
    pub scope: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub locus: Locus,
    /// Exception region the statement belongs to.
    pub region: Option<RegionId>,
    /// Block currently holding the statement.
    pub bb: Option<BlockId>,
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Self {
            kind,
            locus: Locus::default(),
            region: None,
            bb: None,
        }
    }

    pub fn with_locus(mut self, locus: Locus) -> Self {
        self.locus = locus;
        self
    }

    pub fn with_region(mut self, region: Option<RegionId>) -> Self {
        self.region = region;
        self
    }

    /// `dest = src`
    pub fn copy(dest: Operand, src: Operand) -> Self {
        Self::new(StmtKind::Assign {
            dest,
            value: Expr::Use(src),
        })
    }

    pub fn label(label: LabelId) -> Self {
        Self::new(StmtKind::Label { label })
    }

    pub fn as_label(&self) -> Option<LabelId> {
        match self.kind {
            StmtKind::Label { label } => Some(label),
            _ => None,
        }
    }

    pub fn is_label(&self) -> bool {
        self.as_label().is_some()
    }

    /// Statements that always transfer control and so end their block
    /// regardless of context.
    pub fn is_control(&self) -> bool {
        matches!(
            self.kind,
            StmtKind::CondBranch { .. }
                | StmtKind::Switch { .. }
                | StmtKind::Goto { .. }
                | StmtKind::Return { .. }
                | StmtKind::Raise { .. }
                | StmtKind::Resume
        )
    }

    pub fn call_flags(&self) -> Option<CallFlags> {
        match &self.kind {
            StmtKind::Call { flags, .. } => Some(*flags),
            _ => None,
        }
    }

    /// Whether executing the statement may raise an exception.
    pub fn could_throw(&self) -> bool {
        match &self.kind {
            StmtKind::Call { flags, .. } => !flags.contains(CallFlags::NOTHROW),
            StmtKind::Raise { .. } | StmtKind::Resume => true,
            _ => false,
        }
    }

    /// `(dest, src)` if this is a plain copy between two storage operands.
    pub fn as_copy(&self) -> Option<(Operand, Operand)> {
        match &self.kind {
            StmtKind::Assign {
                dest,
                value: Expr::Use(src),
            } if src.is_storage() => Some((*dest, *src)),
            _ => None,
        }
    }

    pub fn def(&self) -> Option<&Operand> {
        match &self.kind {
            StmtKind::Assign { dest, .. } => Some(dest),
            StmtKind::Call { dest, .. } => dest.as_ref(),
            _ => None,
        }
    }

    pub fn def_mut(&mut self) -> Option<&mut Operand> {
        match &mut self.kind {
            StmtKind::Assign { dest, .. } => Some(dest),
            StmtKind::Call { dest, .. } => dest.as_mut(),
            _ => None,
        }
    }

    /// Visit every operand the statement reads, in evaluation order.
    pub fn for_each_use(&self, mut f: impl FnMut(&Operand)) {
        match &self.kind {
            StmtKind::Assign { value, .. } => match value {
                Expr::Use(op) | Expr::Unary(_, op) => f(op),
                Expr::Binary(_, lhs, rhs) => {
                    f(lhs);
                    f(rhs);
                }
            },
            StmtKind::Call { args, .. } => args.iter().for_each(f),
            StmtKind::CondBranch { cond, .. } => f(cond),
            StmtKind::Switch { selector, .. } => f(selector),
            StmtKind::Goto {
                target: GotoTarget::Computed(op),
            } => f(op),
            StmtKind::Return { value: Some(op) } | StmtKind::Raise { value: op } => f(op),
            _ => {}
        }
    }

    pub fn for_each_use_mut(&mut self, mut f: impl FnMut(&mut Operand)) {
        match &mut self.kind {
            StmtKind::Assign { value, .. } => match value {
                Expr::Use(op) | Expr::Unary(_, op) => f(op),
                Expr::Binary(_, lhs, rhs) => {
                    f(lhs);
                    f(rhs);
                }
            },
            StmtKind::Call { args, .. } => args.iter_mut().for_each(f),
            StmtKind::CondBranch { cond, .. } => f(cond),
            StmtKind::Switch { selector, .. } => f(selector),
            StmtKind::Goto {
                target: GotoTarget::Computed(op),
            } => f(op),
            StmtKind::Return { value: Some(op) } | StmtKind::Raise { value: op } => f(op),
            _ => {}
        }
    }

    /// Visit every label the statement jumps to directly.
    pub fn for_each_target_mut(&mut self, mut f: impl FnMut(&mut LabelId)) {
        match &mut self.kind {
            StmtKind::CondBranch {
                then_label,
                else_label,
                ..
            } => {
                if let Some(l) = then_label {
                    f(l);
                }
                if let Some(l) = else_label {
                    f(l);
                }
            }
            StmtKind::Switch { cases, default, .. } => {
                for case in cases.iter_mut() {
                    f(&mut case.label);
                }
                f(default);
            }
            StmtKind::Goto {
                target: GotoTarget::Label(l),
            } => f(l),
            _ => {}
        }
    }

    /// Structural equality used when comparing staged copy sequences; the
    /// position metadata does not take part.
    pub fn same_as(&self, other: &Stmt) -> bool {
        self.kind == other.kind
    }
}

/// One PHI argument, keyed by the incoming edge it flows along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhiArg {
    pub edge: EdgeId,
    pub value: Operand,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phi {
    pub result: SsaName,
    pub args: Vec<PhiArg>,
}

impl Phi {
    pub fn new(result: SsaName) -> Self {
        Self {
            result,
            args: Vec::new(),
        }
    }

    pub fn arg_for(&self, edge: EdgeId) -> Option<Operand> {
        self.args.iter().find(|a| a.edge == edge).map(|a| a.value)
    }

    pub fn set_arg(&mut self, edge: EdgeId, value: Operand) {
        match self.args.iter_mut().find(|a| a.edge == edge) {
            Some(arg) => arg.value = value,
            None => self.args.push(PhiArg { edge, value }),
        }
    }

    pub fn remove_arg(&mut self, edge: EdgeId) -> Option<Operand> {
        let pos = self.args.iter().position(|a| a.edge == edge)?;
        Some(self.args.remove(pos).value)
    }

    /// Move the argument flowing along `old` to `new`.
    pub fn rekey(&mut self, old: EdgeId, new: EdgeId) {
        for arg in self.args.iter_mut().filter(|a| a.edge == old) {
            arg.edge = new;
        }
    }
}

/// Pairs an IR item with the symbol tables needed to print it.
pub struct Show<'a, T: ?Sized> {
    symbols: &'a Symbols,
    item: &'a T,
}

impl Symbols {
    pub fn show<'a, T: ?Sized>(&'a self, item: &'a T) -> Show<'a, T> {
        Show {
            symbols: self,
            item,
        }
    }
}

impl fmt::Display for Show<'_, Operand> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self.item {
            Operand::Ssa(name) => {
                let info = self.symbols.ssa.get(name);
                write!(f, "{}_{}", self.symbols.vars.get(info.var).name, info.version)?;
                if info.default_def {
                    write!(f, "(D)")?;
                }
                Ok(())
            }
            Operand::Var(var) => write!(f, "{}", self.symbols.vars.get(var).name),
            Operand::Const(c) => write!(f, "{c}"),
            Operand::LabelAddr(label) => write!(f, "&&{}", self.symbols.label_name(label)),
        }
    }
}

impl fmt::Display for Show<'_, Expr> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.symbols;
        match self.item {
            Expr::Use(op) => write!(f, "{}", s.show(op)),
            Expr::Unary(UnOp::Neg, op) => write!(f, "-{}", s.show(op)),
            Expr::Unary(UnOp::Not, op) => write!(f, "!{}", s.show(op)),
            Expr::Binary(op, lhs, rhs) => {
                write!(f, "{} {} {}", s.show(lhs), op.symbol(), s.show(rhs))
            }
        }
    }
}

impl fmt::Display for Show<'_, Stmt> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.symbols;
        let label = |l: &Option<LabelId>| match l {
            Some(l) => s.label_name(*l).to_string(),
            None => "<missing>".to_string(),
        };
        match &self.item.kind {
            StmtKind::Assign { dest, value } => {
                write!(f, "{} = {};", s.show(dest), s.show(value))
            }
            StmtKind::Call {
                dest,
                callee,
                args,
                flags,
            } => {
                if let Some(dest) = dest {
                    write!(f, "{} = ", s.show(dest))?;
                }
                write!(f, "call {callee}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", s.show(arg))?;
                }
                write!(f, ")")?;
                if flags.contains(CallFlags::NORETURN) {
                    write!(f, " noreturn")?;
                }
                if flags.contains(CallFlags::NOTHROW) {
                    write!(f, " nothrow")?;
                }
                if flags.contains(CallFlags::NONLOCAL_GOTO) {
                    write!(f, " nonlocal_goto")?;
                }
                write!(f, ";")
            }
            StmtKind::CondBranch {
                cond,
                then_label,
                else_label,
            } => write!(
                f,
                "if ({}) goto {}; else goto {};",
                s.show(cond),
                label(then_label),
                label(else_label)
            ),
            StmtKind::Switch {
                selector,
                cases,
                default,
            } => {
                write!(f, "switch ({}) {{", s.show(selector))?;
                for case in cases {
                    if case.low == case.high {
                        write!(f, " case {}: {};", case.low, s.label_name(case.label))?;
                    } else {
                        write!(
                            f,
                            " case {} ... {}: {};",
                            case.low,
                            case.high,
                            s.label_name(case.label)
                        )?;
                    }
                }
                write!(f, " default: {}; }}", s.label_name(*default))
            }
            StmtKind::Goto {
                target: GotoTarget::Label(l),
            } => write!(f, "goto {};", s.label_name(*l)),
            StmtKind::Goto {
                target: GotoTarget::Computed(op),
            } => write!(f, "goto *{};", s.show(op)),
            StmtKind::Return { value: Some(v) } => write!(f, "return {};", s.show(v)),
            StmtKind::Return { value: None } => write!(f, "return;"),
            StmtKind::Label { label } => {
                let info = s.labels.get(*label);
                if info.non_local {
                    write!(f, "nonlocal ")?;
                }
                if info.artificial {
                    write!(f, "<{}>:", info.name)
                } else {
                    write!(f, "{}:", info.name)
                }
            }
            StmtKind::Raise { value } => write!(f, "raise {};", s.show(value)),
            StmtKind::Resume => write!(f, "resume;"),
            StmtKind::ScopeOpen { scope } => write!(f, "scope_open {scope};"),
            StmtKind::ScopeClose { scope } => write!(f, "scope_close {scope};"),
        }?;
        if let Some(region) = self.item.region {
            // Printed after the statement so the text form round-trips.
            write!(f, " @r{}", region.0)?;
        }
        Ok(())
    }
}

impl fmt::Display for Show<'_, Phi> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.symbols;
        write!(f, "{} = phi <", s.show(&Operand::Ssa(self.item.result)))?;
        for (i, arg) in self.item.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}({})", s.show(&arg.value), arg.edge)?;
        }
        write!(f, ">;")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols() -> (Symbols, SsaName, SsaName) {
        let mut sym = Symbols::new();
        let x = sym.vars.add("x");
        let x0 = sym.ssa.add(x, 0, true);
        let x1 = sym.ssa.add(x, 1, false);
        (sym, x0, x1)
    }

    #[test]
    fn test_operand_visitors_cover_binary_exprs() {
        let (_, x0, x1) = symbols();
        let mut stmt = Stmt::new(StmtKind::Assign {
            dest: Operand::Ssa(x1),
            value: Expr::Binary(BinOp::Add, Operand::Ssa(x0), Operand::Const(1)),
        });

        let mut seen = Vec::new();
        stmt.for_each_use(|op| seen.push(*op));
        assert_eq!(seen, vec![Operand::Ssa(x0), Operand::Const(1)]);

        stmt.for_each_use_mut(|op| {
            if *op == Operand::Ssa(x0) {
                *op = Operand::Var(VarId(0));
            }
        });
        seen.clear();
        stmt.for_each_use(|op| seen.push(*op));
        assert_eq!(seen[0], Operand::Var(VarId(0)));
        assert_eq!(stmt.def(), Some(&Operand::Ssa(x1)));
    }

    #[test]
    fn test_display() {
        let (sym, x0, x1) = symbols();
        let stmt = Stmt::copy(Operand::Ssa(x1), Operand::Ssa(x0));
        assert_eq!(sym.show(&stmt).to_string(), "x_1 = x_0(D);");
        assert!(stmt.as_copy().is_some());

        let mut phi = Phi::new(x1);
        phi.set_arg(EdgeId(3), Operand::Ssa(x0));
        phi.set_arg(EdgeId(4), Operand::Const(7));
        assert_eq!(sym.show(&phi).to_string(), "x_1 = phi <x_0(D)(e3), 7(e4)>;");
    }

    #[test]
    fn test_phi_rekey_and_remove() {
        let (_, x0, x1) = symbols();
        let mut phi = Phi::new(x1);
        phi.set_arg(EdgeId(2), Operand::Ssa(x0));
        phi.rekey(EdgeId(2), EdgeId(9));
        assert_eq!(phi.arg_for(EdgeId(2)), None);
        assert_eq!(phi.arg_for(EdgeId(9)), Some(Operand::Ssa(x0)));
        assert_eq!(phi.remove_arg(EdgeId(9)), Some(Operand::Ssa(x0)));
        assert!(phi.args.is_empty());
    }
}
