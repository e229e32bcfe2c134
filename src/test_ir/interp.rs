// This module interprets a built function so tests can compare behaviour before and after a
// transformation. It walks blocks along edges, evaluates PHI nodes for the edge it arrived
// on, and records every external call; a step limit turns runaway loops into an error.

//! Reference interpreter over a built function.
//!
//! Works both in and out of SSA form: PHI nodes of a block are evaluated in
//! parallel for the edge control arrived on, and plain variables are just
//! more storage. Calls are external and deterministic: they record their
//! arguments and return the wrapping sum of them.

use hashbrown::HashMap;

use crate::cfg::EdgeFlags;
use crate::function::FunctionContext;
use crate::ir::{
    BinOp, BlockId, CallFlags, EdgeId, Expr, GotoTarget, LabelId, Operand, StmtKind, UnOp, VarId,
};

/// Statements executed before a run is considered divergent.
const STEP_LIMIT: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Label(LabelId),
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Returned(Option<i64>),
    /// An exception escaped the function.
    Raised(i64),
    Resumed,
    /// A call that never returns, by callee.
    NoReturn(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub outcome: Outcome,
    /// External calls in execution order.
    pub calls: Vec<(String, Vec<i64>)>,
    pub steps: usize,
}

struct Machine<'a> {
    ctx: &'a FunctionContext,
    args: &'a [i64],
    state: HashMap<Operand, Value>,
    calls: Vec<(String, Vec<i64>)>,
    steps: usize,
}

impl Machine<'_> {
    /// Initial value of `var`: its argument for a parameter, zero otherwise.
    fn initial(&self, var: VarId) -> Value {
        let arg = self
            .ctx
            .params
            .iter()
            .position(|&p| p == var)
            .map_or(0, |i| self.args[i]);
        Value::Int(arg)
    }

    fn read(&self, op: &Operand) -> Result<Value, String> {
        match *op {
            Operand::Const(c) => Ok(Value::Int(c)),
            Operand::LabelAddr(label) => Ok(Value::Label(label)),
            Operand::Var(var) => Ok(self.state.get(op).copied().unwrap_or_else(|| self.initial(var))),
            Operand::Ssa(name) => {
                if let Some(&value) = self.state.get(op) {
                    return Ok(value);
                }
                let info = self.ctx.symbols.ssa.get(name);
                if info.default_def {
                    Ok(self.initial(info.var))
                } else {
                    Err(format!(
                        "read of {} before its definition",
                        self.ctx.symbols.show(op)
                    ))
                }
            }
        }
    }

    fn int(&self, op: &Operand) -> Result<i64, String> {
        match self.read(op)? {
            Value::Int(v) => Ok(v),
            Value::Label(_) => Err(format!("{} holds a label address", self.ctx.symbols.show(op))),
        }
    }

    fn eval(&self, expr: &Expr) -> Result<Value, String> {
        let value = match expr {
            Expr::Use(op) => return self.read(op),
            Expr::Unary(UnOp::Neg, op) => self.int(op)?.wrapping_neg(),
            Expr::Unary(UnOp::Not, op) => i64::from(self.int(op)? == 0),
            Expr::Binary(op, lhs, rhs) => {
                let (a, b) = (self.int(lhs)?, self.int(rhs)?);
                match op {
                    BinOp::Add => a.wrapping_add(b),
                    BinOp::Sub => a.wrapping_sub(b),
                    BinOp::Mul => a.wrapping_mul(b),
                    BinOp::Div | BinOp::Rem if b == 0 => return Err("division by zero".to_string()),
                    BinOp::Div => a.wrapping_div(b),
                    BinOp::Rem => a.wrapping_rem(b),
                    BinOp::And => a & b,
                    BinOp::Or => a | b,
                    BinOp::Xor => a ^ b,
                    BinOp::Shl => a.wrapping_shl(b as u32),
                    BinOp::Shr => a.wrapping_shr(b as u32),
                    BinOp::Eq => i64::from(a == b),
                    BinOp::Ne => i64::from(a != b),
                    BinOp::Lt => i64::from(a < b),
                    BinOp::Le => i64::from(a <= b),
                    BinOp::Gt => i64::from(a > b),
                    BinOp::Ge => i64::from(a >= b),
                }
            }
        };
        Ok(Value::Int(value))
    }

    fn write(&mut self, dest: &Operand, value: Value) -> Result<(), String> {
        if !dest.is_storage() {
            return Err(format!("assignment to {}", self.ctx.symbols.show(dest)));
        }
        self.state.insert(*dest, value);
        Ok(())
    }

    fn succ_where(&self, bb: BlockId, pred: impl Fn(EdgeId) -> bool) -> Result<EdgeId, String> {
        self.ctx
            .cfg
            .block(bb)
            .succs
            .iter()
            .copied()
            .find(|&e| pred(e))
            .ok_or_else(|| format!("{bb} has no matching successor edge"))
    }

    fn edge_to_label(&self, bb: BlockId, label: LabelId) -> Result<EdgeId, String> {
        let target = self
            .ctx
            .cfg
            .label_block(label)
            .ok_or_else(|| format!("label {} has no block", self.ctx.symbols.label_name(label)))?;
        self.succ_where(bb, |e| self.ctx.cfg.edge(e).dest == target)
    }

    fn fallthrough(&self, bb: BlockId) -> Result<EdgeId, String> {
        let cfg = &self.ctx.cfg;
        self.succ_where(bb, |e| {
            !cfg.edge(e)
                .flags
                .intersects(EdgeFlags::ABNORMAL | EdgeFlags::EXCEPTION | EdgeFlags::FAKE)
        })
    }

    /// Enter the destination of `edge`, assigning its PHI results in
    /// parallel.
    fn enter(&mut self, edge: EdgeId) -> Result<BlockId, String> {
        let bb = self.ctx.cfg.edge(edge).dest;
        let incoming = self
            .ctx
            .cfg
            .block(bb)
            .phis
            .iter()
            .map(|phi| {
                let arg = phi
                    .arg_for(edge)
                    .ok_or_else(|| format!("PHI in {bb} has no argument for {edge}"))?;
                Ok((phi.result, self.read(&arg)?))
            })
            .collect::<Result<Vec<_>, String>>()?;
        for (result, value) in incoming {
            self.state.insert(Operand::Ssa(result), value);
        }
        Ok(bb)
    }

    /// Execute `bb`; returns the edge to leave by, or how the run ended.
    fn step_block(&mut self, bb: BlockId) -> Result<Result<EdgeId, Outcome>, String> {
        let ctx = self.ctx;
        for stmt in &ctx.cfg.block(bb).stmts {
            self.steps += 1;
            if self.steps > STEP_LIMIT {
                return Err(format!("no result after {STEP_LIMIT} steps"));
            }
            let next = match &stmt.kind {
                StmtKind::Assign { dest, value } => {
                    let value = self.eval(value)?;
                    self.write(dest, value)?;
                    continue;
                }
                StmtKind::Call {
                    dest,
                    callee,
                    args,
                    flags,
                } => {
                    let values = args
                        .iter()
                        .map(|a| self.int(a))
                        .collect::<Result<Vec<_>, String>>()?;
                    let result = values.iter().fold(0i64, |acc, v| acc.wrapping_add(*v));
                    self.calls.push((callee.clone(), values));
                    if flags.contains(CallFlags::NORETURN) {
                        return Ok(Err(Outcome::NoReturn(callee.clone())));
                    }
                    if let Some(dest) = dest {
                        self.write(dest, Value::Int(result))?;
                    }
                    continue;
                }
                StmtKind::CondBranch { cond, .. } => {
                    let flag = if self.int(cond)? != 0 {
                        EdgeFlags::TRUE_BRANCH
                    } else {
                        EdgeFlags::FALSE_BRANCH
                    };
                    self.succ_where(bb, |e| ctx.cfg.edge(e).flags.contains(flag))?
                }
                StmtKind::Switch {
                    selector,
                    cases,
                    default,
                } => {
                    let v = self.int(selector)?;
                    let label = cases
                        .iter()
                        .find(|c| c.low <= v && v <= c.high)
                        .map_or(*default, |c| c.label);
                    self.edge_to_label(bb, label)?
                }
                StmtKind::Goto {
                    target: GotoTarget::Label(label),
                } => self.edge_to_label(bb, *label)?,
                StmtKind::Goto {
                    target: GotoTarget::Computed(op),
                } => match self.read(op)? {
                    Value::Label(label) => self.edge_to_label(bb, label)?,
                    Value::Int(v) => return Err(format!("computed goto to integer {v}")),
                },
                StmtKind::Return { value } => {
                    let value = value.as_ref().map(|v| self.int(v)).transpose()?;
                    return Ok(Err(Outcome::Returned(value)));
                }
                StmtKind::Raise { value } => {
                    let v = self.int(value)?;
                    match self.succ_where(bb, |e| {
                        let edge = ctx.cfg.edge(e);
                        edge.flags.contains(EdgeFlags::EXCEPTION) && edge.dest != BlockId::EXIT
                    }) {
                        Ok(e) => e,
                        Err(_) => return Ok(Err(Outcome::Raised(v))),
                    }
                }
                StmtKind::Resume => return Ok(Err(Outcome::Resumed)),
                StmtKind::Label { .. } | StmtKind::ScopeOpen { .. } | StmtKind::ScopeClose { .. } => {
                    continue;
                }
            };
            return Ok(Ok(next));
        }
        self.fallthrough(bb).map(Ok)
    }
}

/// Execute the function in `ctx` on `args`.
pub fn run(ctx: &FunctionContext, args: &[i64]) -> Result<Run, String> {
    if args.len() != ctx.params.len() {
        return Err(format!(
            "{} takes {} arguments, got {}",
            ctx.name,
            ctx.params.len(),
            args.len()
        ));
    }
    let mut machine = Machine {
        ctx,
        args,
        state: HashMap::new(),
        calls: Vec::new(),
        steps: 0,
    };
    let mut edge = ctx
        .cfg
        .single_succ(BlockId::ENTRY)
        .ok_or("ENTRY must have exactly one successor")?;
    let outcome = loop {
        let bb = machine.enter(edge)?;
        if bb == BlockId::EXIT {
            break Outcome::Returned(None);
        }
        match machine.step_block(bb)? {
            Ok(next) => edge = next,
            Err(outcome) => break outcome,
        }
    };
    Ok(Run {
        outcome,
        calls: machine.calls,
        steps: machine.steps,
    })
}
