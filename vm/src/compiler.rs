//! Lowering of the parsed program to register bytecode.
//!
//! Each code unit (the program, a method, a class body or a block literal)
//! gets one register file: parameters first, then the locals the parser
//! recorded for the scope, then temporaries. A block reads and writes the
//! locals of enclosing units through upvalues, resolved here into
//! [`Capture`] descriptors.
//!
//! The output is a tree of [`CodeDesc`]s that [`crate::materialize`] turns
//! into runtime blocks.

use bytecode::{rk_from_constant, throw, BytecodeBuilder, Label, LineMapBuilder, RK_MAX_CONSTANT};
use object::Capture;
use parser::{Arg, BlockLit, Body, Expr, ExprKind, MethodDef, ParseError, Params, Program, Span, Target};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{message} at line {line}")]
    Invalid { message: String, line: usize },
}

impl CompileError {
    fn invalid(message: impl Into<String>, span: Span) -> Self {
        CompileError::Invalid {
            message: message.into(),
            line: span.line(),
        }
    }

    pub fn line(&self) -> usize {
        match self {
            CompileError::Parse(err) => err.span.line(),
            CompileError::Invalid { line, .. } => *line,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CompileError::Parse(err) => &err.message,
            CompileError::Invalid { message, .. } => message,
        }
    }
}

type CompileResult<T> = Result<T, CompileError>;

/// A constant pool entry. Symbols are interned when the unit is
/// materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstEntry {
    Fixnum(i64),
    Symbol(String),
}

/// A compiled code unit, not yet bound to a VM.
#[derive(Debug, Clone)]
pub struct CodeDesc {
    pub name: String,
    pub line: u32,
    pub bytecode: Vec<u8>,
    pub line_map: Vec<u8>,
    pub constants: Vec<ConstEntry>,
    pub strings: Vec<String>,
    pub blocks: Vec<CodeDesc>,
    pub argc: u16,
    pub defaults: Vec<usize>,
    pub arg_splat: bool,
    pub locals: Vec<String>,
    pub register_count: u16,
    pub captures: Vec<Capture>,
    pub cache_count: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitKind {
    Top,
    Method,
    ClassBody,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Var {
    Register(u16),
    Upvalue(u16),
}

/// An enclosing `while` of the current unit.
struct Loop {
    /// Register receiving the loop's value, and `break`'s.
    dst: u16,
    top: usize,
    exits: Vec<Label>,
}

struct Unit {
    kind: UnitKind,
    name: String,
    line: u32,
    code: BytecodeBuilder,
    lines: LineMapBuilder,
    constants: Vec<ConstEntry>,
    strings: Vec<String>,
    blocks: Vec<CodeDesc>,
    vars: Vec<String>,
    next_reg: u16,
    max_reg: u16,
    captures: Vec<Capture>,
    upvalue_names: Vec<String>,
    cache_count: u16,
    loops: Vec<Loop>,
    argc: u16,
    defaults: Vec<usize>,
    arg_splat: bool,
}

impl Unit {
    fn new(kind: UnitKind, name: String, line: usize, vars: Vec<String>) -> Self {
        let count = vars.len() as u16;
        Self {
            kind,
            name,
            line: line as u32,
            code: BytecodeBuilder::new(),
            lines: LineMapBuilder::new(),
            constants: Vec::new(),
            strings: Vec::new(),
            blocks: Vec::new(),
            vars,
            next_reg: count,
            max_reg: count,
            captures: Vec::new(),
            upvalue_names: Vec::new(),
            cache_count: 0,
            loops: Vec::new(),
            argc: 0,
            defaults: Vec::new(),
            arg_splat: false,
        }
    }

    fn register(&self, name: &str) -> Option<u16> {
        self.vars.iter().position(|v| v == name).map(|i| i as u16)
    }

    fn finish(self) -> CodeDesc {
        CodeDesc {
            name: self.name,
            line: self.line,
            bytecode: self.code.into_bytes(),
            line_map: self.lines.finish(),
            constants: self.constants,
            strings: self.strings,
            blocks: self.blocks,
            argc: self.argc,
            defaults: self.defaults,
            arg_splat: self.arg_splat,
            register_count: self.max_reg,
            locals: self.vars,
            captures: self.captures,
            cache_count: self.cache_count,
        }
    }
}

/// Compile a whole program into its top-level unit.
pub fn compile_program(program: &Program) -> CompileResult<CodeDesc> {
    let mut compiler = Compiler { units: Vec::new() };
    compiler.units.push(Unit::new(
        UnitKind::Top,
        "<main>".to_string(),
        1,
        program.locals.clone(),
    ));
    let origin = program.body.first().map_or(1, |e| e.span.line());
    let result = compiler.temp(origin)?;
    compiler.sequence(&program.body, result)?;
    compiler.unit().code.return_(result);
    compiler.pop_unit()
}

struct Compiler {
    units: Vec<Unit>,
}

impl Compiler {
    fn unit(&mut self) -> &mut Unit {
        let last = self.units.len() - 1;
        &mut self.units[last]
    }

    fn pop_unit(&mut self) -> CompileResult<CodeDesc> {
        self.units
            .pop()
            .map(Unit::finish)
            .ok_or_else(|| CompileError::invalid("no unit to finish", Span::point(parser::Pos::origin())))
    }

    // ── allocation ─────────────────────────────────────────────────

    fn temps(&mut self, count: usize, line: usize) -> CompileResult<u16> {
        let unit = self.unit();
        let base = unit.next_reg;
        let next = base as usize + count;
        if next > u16::MAX as usize {
            return Err(CompileError::Invalid {
                message: format!("too many registers in {}", unit.name),
                line,
            });
        }
        unit.next_reg = next as u16;
        unit.max_reg = unit.max_reg.max(unit.next_reg);
        Ok(base)
    }

    fn temp(&mut self, line: usize) -> CompileResult<u16> {
        self.temps(1, line)
    }

    fn mark(&mut self) -> u16 {
        self.unit().next_reg
    }

    fn release(&mut self, mark: u16) {
        self.unit().next_reg = mark;
    }

    fn constant(&mut self, entry: ConstEntry, span: Span) -> CompileResult<u16> {
        let unit = self.unit();
        if let Some(idx) = unit.constants.iter().position(|c| *c == entry) {
            return Ok(idx as u16);
        }
        if unit.constants.len() > RK_MAX_CONSTANT as usize {
            return Err(CompileError::invalid("too many constants", span));
        }
        unit.constants.push(entry);
        Ok((unit.constants.len() - 1) as u16)
    }

    fn symbol(&mut self, name: &str, span: Span) -> CompileResult<u16> {
        self.constant(ConstEntry::Symbol(name.to_string()), span)
    }

    fn next_cache(&mut self, span: Span) -> CompileResult<u16> {
        let unit = self.unit();
        let slot = unit.cache_count;
        unit.cache_count = slot
            .checked_add(1)
            .ok_or_else(|| CompileError::invalid("too many call sites", span))?;
        Ok(slot)
    }

    fn push_block(&mut self, desc: CodeDesc, span: Span) -> CompileResult<u16> {
        let unit = self.unit();
        if unit.blocks.len() >= u16::MAX as usize - 1 {
            return Err(CompileError::invalid("too many nested blocks", span));
        }
        unit.blocks.push(desc);
        Ok((unit.blocks.len() - 1) as u16)
    }

    fn mark_line(&mut self, span: Span) {
        let unit = self.unit();
        let pc = unit.code.current_offset() as u32;
        unit.lines.add(pc, span.line() as u32);
    }

    fn bind(&mut self, label: Label, line: usize) -> CompileResult<()> {
        self.unit().code.bind(label).map_err(|err| CompileError::Invalid {
            message: err.to_string(),
            line,
        })
    }

    fn jump_back(&mut self, top: usize, line: usize) -> CompileResult<()> {
        self.unit().code.jump_back(top).map_err(|err| CompileError::Invalid {
            message: err.to_string(),
            line,
        })
    }

    fn mov(&mut self, dst: u16, src: u16) {
        if dst != src {
            self.unit().code.mov(dst, src);
        }
    }

    // ── variables ──────────────────────────────────────────────────

    /// Find `name` from the unit at `level` outward. Blocks capture what
    /// they find in enclosing units; other units see only their own
    /// registers.
    fn resolve(&mut self, level: usize, name: &str) -> Option<Var> {
        let unit = &self.units[level];
        if let Some(reg) = unit.register(name) {
            return Some(Var::Register(reg));
        }
        if let Some(idx) = unit.upvalue_names.iter().position(|n| n == name) {
            return Some(Var::Upvalue(idx as u16));
        }
        if unit.kind != UnitKind::Block || level == 0 {
            return None;
        }
        let capture = match self.resolve(level - 1, name)? {
            Var::Register(reg) => Capture::Local(reg),
            Var::Upvalue(idx) => Capture::Upvalue(idx),
        };
        let unit = &mut self.units[level];
        unit.captures.push(capture);
        unit.upvalue_names.push(name.to_string());
        Some(Var::Upvalue((unit.captures.len() - 1) as u16))
    }

    fn variable(&mut self, name: &str, span: Span) -> CompileResult<Var> {
        let level = self.units.len() - 1;
        self.resolve(level, name)
            .ok_or_else(|| CompileError::invalid(format!("undefined local variable `{name}'"), span))
    }

    // ── expressions ────────────────────────────────────────────────

    fn sequence(&mut self, body: &[Expr], dst: u16) -> CompileResult<()> {
        if body.is_empty() {
            self.unit().code.nil(dst);
        }
        for expr in body {
            let mark = self.mark();
            self.expr(expr, dst)?;
            self.release(mark);
        }
        Ok(())
    }

    /// Compile `e`, leaving its value in `dst`.
    fn expr(&mut self, e: &Expr, dst: u16) -> CompileResult<()> {
        self.mark_line(e.span);
        let line = e.span.line();
        match &e.kind {
            ExprKind::Nil => self.unit().code.nil(dst),
            ExprKind::True => self.unit().code.bool(dst, true),
            ExprKind::False => self.unit().code.bool(dst, false),
            ExprKind::SelfRef => self.unit().code.load_self(dst),
            ExprKind::Integer(n) => {
                let k = self.constant(ConstEntry::Fixnum(*n), e.span)?;
                self.unit().code.load_constant(dst, k);
            }
            ExprKind::String(text) => {
                let unit = self.unit();
                let idx = unit.strings.len() as u16;
                unit.strings.push(text.clone());
                unit.code.string(dst, idx);
            }
            ExprKind::Symbol(name) => {
                let k = self.symbol(name, e.span)?;
                self.unit().code.load_constant(dst, k);
            }
            ExprKind::Array(items) => self.array(items, dst, e.span)?,
            ExprKind::Hash(pairs) => {
                let count = u8::try_from(pairs.len())
                    .map_err(|_| CompileError::invalid("hash literal too large", e.span))?;
                let base = self.temps(1 + 2 * pairs.len(), line)?;
                for (i, (key, value)) in pairs.iter().enumerate() {
                    self.expr(key, base + 1 + 2 * i as u16)?;
                    self.expr(value, base + 2 + 2 * i as u16)?;
                }
                self.unit().code.new_hash(base, count);
                self.mov(dst, base);
            }
            ExprKind::Range {
                first,
                last,
                exclusive,
            } => {
                let base = self.temps(2, line)?;
                self.expr(first, base)?;
                self.expr(last, base + 1)?;
                self.unit().code.new_range(base, base + 1, *exclusive);
                self.mov(dst, base);
            }
            ExprKind::Local(name) => match self.variable(name, e.span)? {
                Var::Register(reg) => self.mov(dst, reg),
                Var::Upvalue(idx) => self.unit().code.get_upval(dst, idx),
            },
            ExprKind::Ivar(name) => {
                let k = self.symbol(name, e.span)?;
                self.unit().code.get_ivar(dst, k);
            }
            ExprKind::Cvar(name) => {
                let k = self.symbol(name, e.span)?;
                self.unit().code.get_cvar(dst, k);
            }
            ExprKind::Global(name) => {
                let k = self.symbol(name, e.span)?;
                self.unit().code.get_global(dst, k);
            }
            ExprKind::Const(name) => {
                let k = self.symbol(name, e.span)?;
                self.unit().code.get_const(dst, k);
            }
            ExprKind::Assign { target, value } => self.assign(target, value, dst, e.span)?,
            ExprKind::Call {
                receiver,
                name,
                args,
                block,
            } => self.call(
                receiver.as_deref(),
                name,
                args,
                block.as_deref(),
                dst,
                e.span,
            )?,
            ExprKind::Not(operand) => {
                let operand = self.operand(operand)?;
                self.unit().code.not(dst, operand);
            }
            ExprKind::And(lhs, rhs) => {
                self.expr(lhs, dst)?;
                let skip = self.unit().code.jump_unless(dst);
                self.expr(rhs, dst)?;
                self.bind(skip, line)?;
            }
            ExprKind::Or(lhs, rhs) => {
                self.expr(lhs, dst)?;
                let skip = self.unit().code.jump_if(dst);
                self.expr(rhs, dst)?;
                self.bind(skip, line)?;
            }
            ExprKind::If {
                cond,
                then,
                otherwise,
            } => {
                self.expr(cond, dst)?;
                let else_branch = self.unit().code.jump_unless(dst);
                self.expr(then, dst)?;
                let end = self.unit().code.jump();
                self.bind(else_branch, line)?;
                match otherwise {
                    Some(otherwise) => self.expr(otherwise, dst)?,
                    None => self.unit().code.nil(dst),
                }
                self.bind(end, line)?;
            }
            ExprKind::While { cond, body, until } => self.while_loop(cond, body, *until, dst)?,
            ExprKind::Return(value) => {
                let src = self.jump_value(value.as_deref(), line)?;
                if self.unit().kind == UnitKind::Block {
                    self.unit().code.throw(throw::RETURN, src);
                } else {
                    self.unit().code.return_(src);
                }
            }
            ExprKind::Break(value) => {
                if let Some(target) = self.unit().loops.last().map(|l| l.dst) {
                    match value {
                        Some(value) => self.expr(value, target)?,
                        None => self.unit().code.nil(target),
                    }
                    let exit = self.unit().code.jump();
                    if let Some(current) = self.unit().loops.last_mut() {
                        current.exits.push(exit);
                    }
                } else if self.unit().kind == UnitKind::Block {
                    let src = self.jump_value(value.as_deref(), line)?;
                    self.unit().code.throw(throw::BREAK, src);
                } else {
                    return Err(CompileError::invalid("Invalid break", e.span));
                }
            }
            ExprKind::Next(value) => {
                if let Some(top) = self.unit().loops.last().map(|l| l.top) {
                    if let Some(value) = value {
                        let t = self.temp(line)?;
                        self.expr(value, t)?;
                    }
                    self.jump_back(top, line)?;
                } else if self.unit().kind == UnitKind::Block {
                    let src = self.jump_value(value.as_deref(), line)?;
                    self.unit().code.return_(src);
                } else {
                    return Err(CompileError::invalid("Invalid next", e.span));
                }
            }
            ExprKind::Yield(args) => {
                if args.iter().any(|a| matches!(a, Arg::Splat(_))) {
                    return Err(CompileError::invalid("splat in yield is not supported", e.span));
                }
                let argc = u8::try_from(args.len())
                    .map_err(|_| CompileError::invalid("too many yield arguments", e.span))?;
                let base = self.temps(1 + args.len(), line)?;
                for (i, arg) in args.iter().enumerate() {
                    self.expr(arg.expr(), base + 1 + i as u16)?;
                }
                self.mark_line(e.span);
                self.unit().code.yield_(base, argc);
                self.mov(dst, base);
            }
            ExprKind::Def(def) => self.def(def, dst, e.span)?,
            ExprKind::Class {
                name,
                superclass,
                body,
            } => {
                let superclass_reg = self.temp(line)?;
                match superclass {
                    Some(superclass) => self.expr(superclass, superclass_reg)?,
                    None => self.unit().code.nil(superclass_reg),
                }
                let idx = self.scoped_body(UnitKind::ClassBody, name, body, e.span)?;
                let k = self.symbol(name, e.span)?;
                self.mark_line(e.span);
                self.unit().code.class(idx, k, superclass_reg);
                self.unit().code.get_const(dst, k);
            }
            ExprKind::Module { name, body } => {
                let idx = self.scoped_body(UnitKind::ClassBody, name, body, e.span)?;
                let k = self.symbol(name, e.span)?;
                self.mark_line(e.span);
                self.unit().code.module(idx, k);
                self.unit().code.get_const(dst, k);
            }
            ExprKind::Begin(items) => self.sequence(items, dst)?,
        }
        Ok(())
    }

    /// An RK operand: small integer literals come from the constant pool,
    /// locals are read in place, anything else goes through a temporary.
    fn operand(&mut self, e: &Expr) -> CompileResult<u16> {
        match &e.kind {
            ExprKind::Integer(n) => {
                let k = self.constant(ConstEntry::Fixnum(*n), e.span)?;
                Ok(rk_from_constant(k))
            }
            ExprKind::Local(name) => match self.variable(name, e.span)? {
                Var::Register(reg) => Ok(reg),
                Var::Upvalue(idx) => {
                    let t = self.temp(e.span.line())?;
                    self.unit().code.get_upval(t, idx);
                    Ok(t)
                }
            },
            _ => {
                let t = self.temp(e.span.line())?;
                self.expr(e, t)?;
                Ok(t)
            }
        }
    }

    fn jump_value(&mut self, value: Option<&Expr>, line: usize) -> CompileResult<u16> {
        let t = self.temp(line)?;
        match value {
            Some(value) => self.expr(value, t)?,
            None => self.unit().code.nil(t),
        }
        Ok(t)
    }

    fn assign(&mut self, target: &Target, value: &Expr, dst: u16, span: Span) -> CompileResult<()> {
        self.expr(value, dst)?;
        match target {
            Target::Local(name) => match self.variable(name, span)? {
                Var::Register(reg) => self.mov(reg, dst),
                Var::Upvalue(idx) => self.unit().code.set_upval(dst, idx),
            },
            Target::Ivar(name) => {
                let k = self.symbol(name, span)?;
                self.unit().code.set_ivar(dst, k);
            }
            Target::Cvar(name) => {
                let k = self.symbol(name, span)?;
                self.unit().code.set_cvar(dst, k);
            }
            Target::Global(name) => {
                let k = self.symbol(name, span)?;
                self.unit().code.set_global(dst, k);
            }
            Target::Const(name) => {
                let k = self.symbol(name, span)?;
                self.unit().code.set_const(dst, k);
            }
        }
        Ok(())
    }

    fn while_loop(&mut self, cond: &Expr, body: &Expr, until: bool, dst: u16) -> CompileResult<()> {
        let top = self.unit().code.current_offset();
        self.expr(cond, dst)?;
        let exit = if until {
            self.unit().code.jump_if(dst)
        } else {
            self.unit().code.jump_unless(dst)
        };
        self.unit().loops.push(Loop {
            dst,
            top,
            exits: Vec::new(),
        });
        let mark = self.mark();
        let scratch = self.temp(body.span.line())?;
        let compiled = self.expr(body, scratch);
        self.release(mark);
        let current = self.unit().loops.pop();
        compiled?;
        let line = cond.span.line();
        self.jump_back(top, line)?;
        self.bind(exit, line)?;
        self.unit().code.nil(dst);
        for label in current.into_iter().flat_map(|l| l.exits) {
            self.bind(label, line)?;
        }
        Ok(())
    }

    /// A message send. `+`, `-` and `<` with one argument and unary minus
    /// use the arithmetic instructions, which fall back to a send when an
    /// operand is not a fixnum.
    fn call(
        &mut self,
        receiver: Option<&Expr>,
        name: &str,
        args: &[Arg],
        block: Option<&BlockLit>,
        dst: u16,
        span: Span,
    ) -> CompileResult<()> {
        if let (Some(recv), None) = (receiver, block) {
            match (name, args) {
                ("+" | "-" | "<", [Arg::Plain(rhs)]) => {
                    let lhs = self.operand(recv)?;
                    let rhs = self.operand(rhs)?;
                    let code = &mut self.unit().code;
                    match name {
                        "+" => code.add(dst, lhs, rhs),
                        "-" => code.sub(dst, lhs, rhs),
                        _ => code.lt(dst, lhs, rhs),
                    }
                    return Ok(());
                }
                ("-@", []) => {
                    let operand = self.operand(recv)?;
                    self.unit().code.neg(dst, operand);
                    return Ok(());
                }
                _ => {}
            }
        }

        if let Some(pos) = args.iter().position(|a| matches!(a, Arg::Splat(_))) {
            if pos + 1 != args.len() {
                return Err(CompileError::invalid("splat argument must come last", span));
            }
        }
        let argc = u16::try_from(args.len())
            .ok()
            .filter(|n| *n <= u16::MAX >> 1)
            .ok_or_else(|| CompileError::invalid("too many arguments", span))?;
        let splat = matches!(args.last(), Some(Arg::Splat(_)));

        let base = self.temps(1 + args.len(), span.line())?;
        match receiver {
            Some(recv) => self.expr(recv, base)?,
            None => self.unit().code.load_self(base),
        }
        for (i, arg) in args.iter().enumerate() {
            self.expr(arg.expr(), base + 1 + i as u16)?;
        }
        let literal = match block {
            Some(block) => Some(self.block_literal(block)?),
            None => None,
        };
        let message = self.symbol(name, span)?;
        let cache = self.next_cache(span)?;
        self.mark_line(span);
        let code = &mut self.unit().code;
        code.cached_lookup(base, message, cache);
        code.call(base, argc, splat, literal);
        self.mov(dst, base);
        Ok(())
    }

    /// Send `name` to the value in `recv` with one argument, in place.
    fn send_one(&mut self, recv: u16, name: &str, arg: &Expr, splat: bool) -> CompileResult<()> {
        let base = self.temps(2, arg.span.line())?;
        self.mov(base, recv);
        self.expr(arg, base + 1)?;
        let message = self.symbol(name, arg.span)?;
        let cache = self.next_cache(arg.span)?;
        let code = &mut self.unit().code;
        code.cached_lookup(base, message, cache);
        code.call(base, 1, splat, None);
        Ok(())
    }

    /// Array literals build the plain prefix in one instruction and append
    /// the rest, spreading splats with `push`.
    fn array(&mut self, items: &[Arg], dst: u16, span: Span) -> CompileResult<()> {
        let prefix = items
            .iter()
            .take_while(|a| matches!(a, Arg::Plain(_)))
            .count();
        let count = u8::try_from(prefix)
            .map_err(|_| CompileError::invalid("array literal too large", span))?;
        let base = self.temps(1 + prefix, span.line())?;
        for (i, item) in items[..prefix].iter().enumerate() {
            self.expr(item.expr(), base + 1 + i as u16)?;
        }
        self.unit().code.new_array(base, count);
        for item in &items[prefix..] {
            let mark = self.mark();
            match item {
                Arg::Plain(e) => self.send_one(base, "<<", e, false)?,
                Arg::Splat(e) => self.send_one(base, "push", e, true)?,
            }
            self.release(mark);
        }
        self.mov(dst, base);
        Ok(())
    }

    // ── nested units ───────────────────────────────────────────────

    fn open_unit(&mut self, kind: UnitKind, name: String, span: Span, params: &Params, body: &Body) {
        let vars = params
            .names()
            .map(str::to_string)
            .chain(body.locals.iter().cloned())
            .collect();
        self.units.push(Unit::new(kind, name, span.line(), vars));
    }

    /// Parameter bookkeeping and default-value initializers. Each optional
    /// parameter records the offset just past its initializer, where a call
    /// that supplied it starts.
    fn params(&mut self, params: &Params, span: Span) -> CompileResult<()> {
        if !params.optional.is_empty() && params.splat.is_some() {
            return Err(CompileError::invalid(
                "optional parameters cannot be combined with a splat",
                span,
            ));
        }
        let unit = self.unit();
        unit.argc = params.len() as u16;
        unit.arg_splat = params.splat.is_some();
        let first_optional = params.required.len() as u16;
        for (i, (_, default)) in params.optional.iter().enumerate() {
            self.expr(default, first_optional + i as u16)?;
            let unit = self.unit();
            let offset = unit.code.current_offset();
            unit.defaults.push(offset);
        }
        Ok(())
    }

    /// Compile a body ending in an implicit `return` of its value.
    fn finish_body(&mut self, body: &Expr) -> CompileResult<CodeDesc> {
        let result = self.temp(body.span.line())?;
        self.expr(body, result)?;
        self.unit().code.return_(result);
        self.pop_unit()
    }

    fn block_literal(&mut self, block: &BlockLit) -> CompileResult<u16> {
        let name = format!("block in {}", self.unit().name);
        self.open_unit(UnitKind::Block, name, block.span, &block.params, &block.body);
        let desc = self
            .params(&block.params, block.span)
            .and_then(|()| self.finish_body(&block.body.body));
        let desc = match desc {
            Ok(desc) => desc,
            Err(err) => {
                self.units.pop();
                return Err(err);
            }
        };
        self.push_block(desc, block.span)
    }

    fn def(&mut self, def: &MethodDef, dst: u16, span: Span) -> CompileResult<()> {
        let receiver = match &def.singleton {
            Some(singleton) => {
                let t = self.temp(span.line())?;
                self.expr(singleton, t)?;
                Some(t)
            }
            None => None,
        };
        self.open_unit(UnitKind::Method, def.name.clone(), span, &def.params, &def.body);
        let desc = self
            .params(&def.params, span)
            .and_then(|()| self.finish_body(&def.body.body));
        let desc = match desc {
            Ok(desc) => desc,
            Err(err) => {
                self.units.pop();
                return Err(err);
            }
        };
        let idx = self.push_block(desc, span)?;
        let name = self.symbol(&def.name, span)?;
        self.mark_line(span);
        match receiver {
            Some(receiver) => self.unit().code.meta_def(idx, name, receiver),
            None => self.unit().code.def(idx, name),
        }
        self.unit().code.load_constant(dst, name);
        Ok(())
    }

    fn scoped_body(&mut self, kind: UnitKind, name: &str, body: &Body, span: Span) -> CompileResult<u16> {
        self.open_unit(kind, name.to_string(), span, &Params::default(), body);
        let desc = match self.finish_body(&body.body) {
            Ok(desc) => desc,
            Err(err) => {
                self.units.pop();
                return Err(err);
            }
        };
        self.push_block(desc, span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytecode::{BytecodeDecoder, Instruction};

    fn compile(source: &str) -> CodeDesc {
        let program = parser::parse(source).expect("parse");
        compile_program(&program).expect("compile")
    }

    fn instructions(desc: &CodeDesc) -> Vec<Instruction> {
        BytecodeDecoder::new(&desc.bytecode)
            .map(|r| r.expect("decode").1)
            .collect()
    }

    #[test]
    fn arithmetic_uses_fast_instructions() {
        let desc = compile("x = 1\nx + 2");
        let code = instructions(&desc);
        assert!(code.iter().any(|i| matches!(i, Instruction::Add { .. })));
        assert!(!code.iter().any(|i| matches!(i, Instruction::Call { .. })));
        assert_eq!(desc.cache_count, 0);
    }

    #[test]
    fn oversized_branches_are_rejected() {
        let mut source = String::from("x = 0\nif x\n");
        for _ in 0..6000 {
            source.push_str("  x = x + 1\n");
        }
        source.push_str("end\n");
        let program = parser::parse(&source).expect("parse");
        let err = compile_program(&program).expect_err("jump out of range");
        assert!(err.message().starts_with("jump too far"), "{err}");
    }

    #[test]
    fn every_call_is_preceded_by_a_cached_lookup() {
        let desc = compile("puts 1\n[1].size");
        let code = instructions(&desc);
        let calls: Vec<usize> = code
            .iter()
            .enumerate()
            .filter(|(_, i)| matches!(i, Instruction::Call { .. }))
            .map(|(n, _)| n)
            .collect();
        assert_eq!(calls.len(), 2);
        for n in calls {
            assert!(matches!(code[n - 2], Instruction::Cache { .. }));
            assert!(matches!(code[n - 1], Instruction::Lookup { .. }));
        }
        assert_eq!(desc.cache_count, 2);
    }

    #[test]
    fn defaults_record_start_offsets() {
        let desc = compile("def f(a, b = 1, c = 2)\n  a\nend");
        let method = &desc.blocks[0];
        assert_eq!(method.argc, 3);
        assert_eq!(method.defaults.len(), 2);
        assert!(method.defaults[0] < method.defaults[1]);
        assert!(!method.arg_splat);
    }

    #[test]
    fn defaults_with_splat_are_rejected() {
        let program = parser::parse("def f(a = 1, *b)\nend").expect("parse");
        let err = compile_program(&program).unwrap_err();
        assert!(err.message().contains("splat"), "{err}");
        assert_eq!(err.line(), 1);
    }

    #[test]
    fn blocks_capture_outer_locals() {
        let desc = compile("x = 1\n[1].each { |y| x = y }");
        let block = &desc.blocks[0];
        assert_eq!(block.argc, 1);
        assert_eq!(block.captures, vec![Capture::Local(0)]);
        assert!(instructions(block)
            .iter()
            .any(|i| matches!(i, Instruction::SetUpval { idx: 0, .. })));
    }

    #[test]
    fn nested_blocks_chain_upvalues() {
        let desc = compile("x = 1\n[1].each { [2].each { x } }");
        let outer = &desc.blocks[0];
        let inner = &outer.blocks[0];
        assert_eq!(outer.captures, vec![Capture::Local(0)]);
        assert_eq!(inner.captures, vec![Capture::Upvalue(0)]);
    }

    #[test]
    fn return_in_a_block_throws() {
        let desc = compile("def f\n  [1].each { return 2 }\nend");
        let block = &desc.blocks[0].blocks[0];
        assert!(instructions(block)
            .iter()
            .any(|i| matches!(i, Instruction::Throw { reason: throw::RETURN, .. })));
    }

    #[test]
    fn break_in_while_is_a_jump() {
        let desc = compile("while true\n  break\nend");
        assert!(!instructions(&desc)
            .iter()
            .any(|i| matches!(i, Instruction::Throw { .. })));
        let program = parser::parse("break").expect("parse");
        assert!(compile_program(&program).is_err());
    }

    #[test]
    fn line_map_tracks_statements() {
        let desc = compile("a = 1\n\nputs a");
        let last_call = BytecodeDecoder::new(&desc.bytecode)
            .map(|r| r.expect("decode"))
            .filter(|(_, i)| matches!(i, Instruction::Call { .. }))
            .map(|(pc, _)| pc)
            .last()
            .expect("call");
        assert_eq!(bytecode::line_map_lookup(&desc.line_map, last_call as u32), Some(3));
    }
}
