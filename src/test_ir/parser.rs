//! Test IR parser implementation.

use hashbrown::HashMap;

use crate::cfg::Region;
use crate::function::FunctionContext;
use crate::ir::{
    BinOp, CallFlags, CaseRange, Expr, GotoTarget, LabelId, LabelInfo, Locus, Operand, RegionId,
    SsaName, Stmt, StmtKind, UnOp, VarId,
};

use super::{PendingPhi, PhiKey, TestFunction};

pub fn parse_function(text: &str) -> Result<TestFunction, String> {
    let mut parser = Parser::new(text);
    match parser.parse() {
        Ok(()) => Ok(parser.finish()),
        Err(e) => Err(format!("line {}: {e}", parser.line())),
    }
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    ctx: FunctionContext,
    stmts: Vec<Stmt>,
    phis: Vec<PendingPhi>,
    ssa_names: HashMap<(VarId, u32), SsaName>,
    last_label: Option<LabelId>,
}

/// Split `x_3` into `("x", 3)`.
fn split_ssa(ident: &str) -> Option<(&str, u32)> {
    let (base, version) = ident.rsplit_once('_')?;
    if base.is_empty() || version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    version.parse().ok().map(|v| (base, v))
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            ctx: FunctionContext::default(),
            stmts: Vec::new(),
            phis: Vec::new(),
            ssa_names: HashMap::new(),
            last_label: None,
        }
    }

    fn finish(self) -> TestFunction {
        TestFunction {
            ctx: self.ctx,
            stmts: self.stmts,
            phis: self.phis,
        }
    }

    fn line(&self) -> u32 {
        self.text[..self.pos.min(self.text.len())]
            .bytes()
            .filter(|&b| b == b'\n')
            .count() as u32
            + 1
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn current_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current_char() {
            self.pos += ch.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            if self.rest().starts_with("//") {
                while let Some(ch) = self.current_char() {
                    self.advance();
                    if ch == '\n' {
                        break;
                    }
                }
            } else if self.current_char().is_some_and(char::is_whitespace) {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.current_char()
    }

    fn try_read(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn try_read_str(&mut self, s: &str) -> bool {
        self.skip_whitespace();
        if self.rest().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> Result<(), String> {
        if !self.try_read(ch) {
            return Err(format!(
                "Expected '{}' but found {:?}",
                ch,
                self.current_char()
            ));
        }
        Ok(())
    }

    fn read_identifier(&mut self) -> Result<&'a str, String> {
        self.skip_whitespace();
        let start = self.pos;
        match self.current_char() {
            Some(ch) if ch.is_alphabetic() || ch == '_' => {}
            Some(ch) => return Err(format!("Expected identifier but found '{ch}'")),
            None => return Err("Expected identifier but found EOF".to_string()),
        }
        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || ch == '_' || ch == '.' {
                self.advance();
            } else {
                break;
            }
        }
        Ok(&self.text[start..self.pos])
    }

    /// Consume `kw` if the next identifier is exactly `kw`.
    fn try_keyword(&mut self, kw: &str) -> bool {
        let saved = self.pos;
        match self.read_identifier() {
            Ok(ident) if ident == kw => true,
            _ => {
                self.pos = saved;
                false
            }
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), String> {
        if !self.try_keyword(kw) {
            return Err(format!("Expected '{kw}'"));
        }
        Ok(())
    }

    fn read_number(&mut self) -> Result<i64, String> {
        self.skip_whitespace();
        let start = self.pos;
        if self.current_char() == Some('-') {
            self.advance();
        }
        while self.current_char().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        self.text[start..self.pos]
            .parse()
            .map_err(|e| format!("Failed to parse number: {e}"))
    }

    fn var(&mut self, name: &str) -> VarId {
        match self.ctx.symbols.vars.lookup(name) {
            Some(var) => var,
            None => self.ctx.symbols.vars.add(name),
        }
    }

    fn ssa_name(&mut self, var: VarId, version: u32, default_def: bool) -> Result<SsaName, String> {
        if let Some(&name) = self.ssa_names.get(&(var, version)) {
            if self.ctx.symbols.ssa.get(name).default_def != default_def {
                return Err(format!(
                    "{}_{version} used both with and without (D)",
                    self.ctx.symbols.vars.get(var).name
                ));
            }
            return Ok(name);
        }
        let name = self.ctx.symbols.ssa.add(var, version, default_def);
        self.ssa_names.insert((var, version), name);
        Ok(name)
    }

    fn label_named(&mut self, name: &str, artificial: bool) -> LabelId {
        match self.ctx.symbols.labels.lookup(name) {
            Some(label) => label,
            None => self.ctx.symbols.labels.add(LabelInfo {
                name: name.to_string(),
                artificial,
                non_local: false,
                address_taken: false,
            }),
        }
    }

    /// `L` or `<D1>`.
    fn label_ref(&mut self) -> Result<LabelId, String> {
        if self.try_read('<') {
            let name = self.read_identifier()?;
            self.expect('>')?;
            Ok(self.label_named(name, true))
        } else {
            let name = self.read_identifier()?;
            Ok(self.label_named(name, false))
        }
    }

    fn define_label(&mut self, label: LabelId, non_local: bool) {
        if non_local {
            self.ctx.symbols.labels.get_mut(label).non_local = true;
        }
        let locus = self.locus();
        self.stmts.push(Stmt::label(label).with_locus(locus));
        self.last_label = Some(label);
    }

    fn locus(&self) -> Locus {
        Locus {
            line: self.line(),
            scope: None,
        }
    }

    /// Whether a `(D)` marker follows. Inside a PHI argument list `(D)` may
    /// also be the predecessor key, so it only counts as a marker when
    /// another parenthesis follows it.
    fn default_marker(&mut self, in_phi: bool) -> bool {
        let saved = self.pos;
        if !self.try_read_str("(D)") {
            return false;
        }
        if in_phi && self.peek() != Some('(') {
            self.pos = saved;
            return false;
        }
        true
    }

    fn operand_from_ident(&mut self, ident: &str, in_phi: bool) -> Result<Operand, String> {
        match split_ssa(ident) {
            Some((base, version)) => {
                let var = self.var(base);
                let default_def = self.default_marker(in_phi);
                Ok(Operand::Ssa(self.ssa_name(var, version, default_def)?))
            }
            None => Ok(Operand::Var(self.var(ident))),
        }
    }

    fn operand(&mut self, in_phi: bool) -> Result<Operand, String> {
        match self.peek() {
            Some('&') => {
                self.advance();
                self.expect('&')?;
                let label = self.label_ref()?;
                self.ctx.symbols.labels.get_mut(label).address_taken = true;
                Ok(Operand::LabelAddr(label))
            }
            Some(c) if c == '-' || c.is_ascii_digit() => Ok(Operand::Const(self.read_number()?)),
            _ => {
                let ident = self.read_identifier()?;
                self.operand_from_ident(ident, in_phi)
            }
        }
    }

    fn binop(&mut self) -> Option<BinOp> {
        const OPS: [(&str, BinOp); 16] = [
            ("<<", BinOp::Shl),
            (">>", BinOp::Shr),
            ("==", BinOp::Eq),
            ("!=", BinOp::Ne),
            ("<=", BinOp::Le),
            (">=", BinOp::Ge),
            ("+", BinOp::Add),
            ("-", BinOp::Sub),
            ("*", BinOp::Mul),
            ("/", BinOp::Div),
            ("%", BinOp::Rem),
            ("&", BinOp::And),
            ("|", BinOp::Or),
            ("^", BinOp::Xor),
            ("<", BinOp::Lt),
            (">", BinOp::Gt),
        ];
        OPS.iter()
            .find(|(text, _)| self.try_read_str(text))
            .map(|&(_, op)| op)
    }

    fn expr(&mut self) -> Result<Expr, String> {
        if self.try_read('!') {
            return Ok(Expr::Unary(UnOp::Not, self.operand(false)?));
        }
        if self.peek() == Some('-') && !self.rest()[1..].starts_with(|c: char| c.is_ascii_digit()) {
            self.advance();
            return Ok(Expr::Unary(UnOp::Neg, self.operand(false)?));
        }
        let lhs = self.operand(false)?;
        match self.binop() {
            Some(op) => Ok(Expr::Binary(op, lhs, self.operand(false)?)),
            None => Ok(Expr::Use(lhs)),
        }
    }

    /// `@rN` after a statement.
    fn region_suffix(&mut self) -> Result<Option<RegionId>, String> {
        if !self.try_read('@') {
            return Ok(None);
        }
        let region = self.region_name()?;
        if self.ctx.regions.get(region).is_none() {
            return Err(format!("Region r{} is not declared", region.0));
        }
        Ok(Some(region))
    }

    fn region_name(&mut self) -> Result<RegionId, String> {
        let ident = self.read_identifier()?;
        ident
            .strip_prefix('r')
            .and_then(|n| n.parse().ok())
            .map(RegionId)
            .ok_or_else(|| format!("Expected region name rN but found '{ident}'"))
    }

    /// `region rN [handler L] [outer rM] [catch_all];`
    fn region_decl(&mut self) -> Result<(), String> {
        let id = self.region_name()?;
        if id.index() != self.ctx.regions.len() {
            return Err(format!("Regions must be declared in order, expected r{}", self.ctx.regions.len()));
        }
        let mut region = Region {
            handler: None,
            outer: None,
            catch_all: false,
        };
        loop {
            if self.try_keyword("handler") {
                region.handler = Some(self.label_ref()?);
            } else if self.try_keyword("outer") {
                let outer = self.region_name()?;
                if self.ctx.regions.get(outer).is_none() {
                    return Err(format!("Outer region r{} is not declared", outer.0));
                }
                region.outer = Some(outer);
            } else if self.try_keyword("catch_all") {
                region.catch_all = true;
            } else {
                break;
            }
        }
        self.expect(';')?;
        self.ctx.regions.add(region);
        Ok(())
    }

    /// `temp t, u;` declares artificial variables. They must not have been
    /// mentioned before.
    fn temp_decl(&mut self) -> Result<(), String> {
        loop {
            let name = self.read_identifier()?;
            if split_ssa(name).is_some() {
                return Err(format!("Temporary '{name}' looks like an SSA name"));
            }
            if self.ctx.symbols.vars.lookup(name).is_some() {
                return Err(format!("Temporary '{name}' declared after its first use"));
            }
            self.ctx.symbols.vars.add_artificial(name);
            if self.try_read(';') {
                return Ok(());
            }
            self.expect(',')?;
        }
    }

    /// `call f(args) [noreturn] [nothrow] [nonlocal_goto];`
    fn call(&mut self, dest: Option<Operand>) -> Result<StmtKind, String> {
        let callee = self.read_identifier()?.to_string();
        self.expect('(')?;
        let mut args = Vec::new();
        if !self.try_read(')') {
            loop {
                args.push(self.operand(false)?);
                if self.try_read(')') {
                    break;
                }
                self.expect(',')?;
            }
        }
        let mut flags = CallFlags::empty();
        loop {
            if self.try_keyword("noreturn") {
                flags |= CallFlags::NORETURN;
            } else if self.try_keyword("nothrow") {
                flags |= CallFlags::NOTHROW;
            } else if self.try_keyword("nonlocal_goto") {
                flags |= CallFlags::NONLOCAL_GOTO;
            } else {
                break;
            }
        }
        self.expect(';')?;
        Ok(StmtKind::Call {
            dest,
            callee,
            args,
            flags,
        })
    }

    /// `phi <value(key), ...>;`
    fn phi(&mut self, dest: Operand) -> Result<(), String> {
        let Operand::Ssa(result) = dest else {
            return Err("PHI result must be an SSA name".to_string());
        };
        self.expect('<')?;
        let mut args = Vec::new();
        if !self.try_read('>') {
            loop {
                let value = self.operand(true)?;
                self.expect('(')?;
                let key = if self.try_keyword("entry") {
                    PhiKey::Entry
                } else {
                    PhiKey::Label(self.label_ref()?)
                };
                self.expect(')')?;
                args.push((key, value));
                if self.try_read('>') {
                    break;
                }
                self.expect(',')?;
            }
        }
        self.expect(';')?;
        self.phis.push(PendingPhi {
            result,
            args,
            anchor: self.last_label,
        });
        Ok(())
    }

    fn switch(&mut self) -> Result<StmtKind, String> {
        self.expect('(')?;
        let selector = self.operand(false)?;
        self.expect(')')?;
        self.expect('{')?;
        let mut cases = Vec::new();
        let mut default = None;
        while !self.try_read('}') {
            if self.try_keyword("default") {
                self.expect(':')?;
                default = Some(self.label_ref()?);
            } else {
                self.expect_keyword("case")?;
                let low = self.read_number()?;
                let high = if self.try_read_str("...") {
                    self.read_number()?
                } else {
                    low
                };
                self.expect(':')?;
                let label = self.label_ref()?;
                cases.push(CaseRange { low, high, label });
            }
            self.expect(';')?;
        }
        self.try_read(';');
        let default = default.ok_or("switch without default")?;
        Ok(StmtKind::Switch {
            selector,
            cases,
            default,
        })
    }

    /// Parse one statement or declaration.
    fn statement(&mut self) -> Result<(), String> {
        let locus = self.locus();
        if self.try_read('<') {
            let name = self.read_identifier()?;
            self.expect('>')?;
            self.expect(':')?;
            let label = self.label_named(name, true);
            self.define_label(label, false);
            return Ok(());
        }

        let ident = self.read_identifier()?;
        let kind = match ident {
            "region" => return self.region_decl(),
            "temp" => return self.temp_decl(),
            "nonlocal" => {
                let label = self.label_ref()?;
                self.expect(':')?;
                self.define_label(label, true);
                return Ok(());
            }
            "if" => {
                self.expect('(')?;
                let cond = self.operand(false)?;
                self.expect(')')?;
                self.expect_keyword("goto")?;
                let then_label = Some(self.label_ref()?);
                self.expect(';')?;
                let else_label = if self.try_keyword("else") {
                    self.expect_keyword("goto")?;
                    let label = self.label_ref()?;
                    self.expect(';')?;
                    Some(label)
                } else {
                    None
                };
                StmtKind::CondBranch {
                    cond,
                    then_label,
                    else_label,
                }
            }
            "switch" => self.switch()?,
            "goto" => {
                let target = if self.try_read('*') {
                    GotoTarget::Computed(self.operand(false)?)
                } else {
                    GotoTarget::Label(self.label_ref()?)
                };
                self.expect(';')?;
                StmtKind::Goto { target }
            }
            "return" => {
                let value = if self.try_read(';') {
                    None
                } else {
                    let value = self.operand(false)?;
                    self.expect(';')?;
                    Some(value)
                };
                StmtKind::Return { value }
            }
            "raise" => {
                let value = self.operand(false)?;
                self.expect(';')?;
                StmtKind::Raise { value }
            }
            "resume" => {
                self.expect(';')?;
                StmtKind::Resume
            }
            "scope_open" | "scope_close" => {
                let scope = self.read_number()?;
                let scope = u32::try_from(scope).map_err(|_| format!("Bad scope number {scope}"))?;
                self.expect(';')?;
                if ident == "scope_open" {
                    StmtKind::ScopeOpen { scope }
                } else {
                    StmtKind::ScopeClose { scope }
                }
            }
            "call" => self.call(None)?,
            _ => {
                if self.peek() == Some(':') {
                    self.advance();
                    let label = self.label_named(ident, false);
                    self.define_label(label, false);
                    return Ok(());
                }
                let dest = self.operand_from_ident(ident, false)?;
                self.expect('=')?;
                if self.try_keyword("phi") {
                    return self.phi(dest);
                }
                if self.try_keyword("call") {
                    self.call(Some(dest))?
                } else {
                    let value = self.expr()?;
                    self.expect(';')?;
                    StmtKind::Assign { dest, value }
                }
            }
        };

        let region = self.region_suffix()?;
        self.stmts
            .push(Stmt::new(kind).with_locus(locus).with_region(region));
        Ok(())
    }

    fn parse(&mut self) -> Result<(), String> {
        self.expect_keyword("fn")?;
        let name = self.read_identifier()?;
        self.ctx.name = name.to_string();

        self.expect('(')?;
        if !self.try_read(')') {
            loop {
                let param = self.read_identifier()?;
                let var = self.var(param);
                self.ctx.params.push(var);
                if self.try_read(')') {
                    break;
                }
                self.expect(',')?;
            }
        }

        self.expect('{')?;
        while !self.try_read('}') {
            if self.is_eof() {
                return Err("Unexpected EOF in function body".to_string());
            }
            self.statement()?;
        }
        self.skip_whitespace();
        if !self.is_eof() {
            return Err(format!("Trailing text after function: {:?}", self.current_char()));
        }
        Ok(())
    }
}
