use thiserror::Error;

use crate::op::Op;

/// A jump whose distance does not fit the signed 16-bit offset field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("jump too far: {from} -> {to}")]
pub struct JumpTooFar {
    pub from: usize,
    pub to: usize,
}

fn jump_offset(base: usize, target: usize) -> Result<i16, JumpTooFar> {
    i16::try_from(target as isize - base as isize).map_err(|_| JumpTooFar {
        from: base,
        to: target,
    })
}

/// A forward jump whose offset has not yet been resolved.
///
/// Created by [`BytecodeBuilder::jump`], [`BytecodeBuilder::jump_if`],
/// and [`BytecodeBuilder::jump_unless`]. Resolve it with
/// [`BytecodeBuilder::bind`].
#[derive(Debug)]
#[must_use = "a label must be bound"]
pub struct Label {
    /// Position of the i16 offset bytes in the buffer.
    offset_pos: usize,
    /// Position right after the jump instruction (base for relative offset).
    base: usize,
}

/// Builds a bytecode byte sequence.
///
/// The builder automatically emits the [`Op::Wide`] prefix when a register
/// operand exceeds `u8::MAX`.
pub struct BytecodeBuilder {
    buf: Vec<u8>,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Current byte offset in the bytecode stream.
    pub fn current_offset(&self) -> usize {
        self.buf.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    // ── emit helpers ───────────────────────────────────────────────

    fn emit_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn emit_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_op(&mut self, op: Op) {
        self.buf.push(op as u8);
    }

    fn needs_wide(reg: u16) -> bool {
        reg > u8::MAX as u16
    }

    /// Emit `op`, preceded by a `Wide` prefix if any of `regs` needs it.
    /// Returns whether the wide encoding was selected.
    fn emit_op_for(&mut self, op: Op, regs: &[u16]) -> bool {
        let wide = regs.iter().copied().any(Self::needs_wide);
        if wide {
            self.emit_op(Op::Wide);
        }
        self.emit_op(op);
        wide
    }

    fn emit_reg(&mut self, reg: u16, wide: bool) {
        if wide {
            self.emit_u16(reg);
        } else {
            self.emit_u8(reg as u8);
        }
    }

    fn reg_u16(&mut self, op: Op, reg: u16, operand: u16) {
        let wide = self.emit_op_for(op, &[reg]);
        self.emit_reg(reg, wide);
        self.emit_u16(operand);
    }

    fn reg_u8(&mut self, op: Op, reg: u16, operand: u8) {
        let wide = self.emit_op_for(op, &[reg]);
        self.emit_reg(reg, wide);
        self.emit_u8(operand);
    }

    // ── register loads ─────────────────────────────────────────────

    /// `Move <dst> <src>`
    pub fn mov(&mut self, dst: u16, src: u16) {
        let wide = self.emit_op_for(Op::Move, &[dst, src]);
        self.emit_reg(dst, wide);
        self.emit_reg(src, wide);
    }

    /// `LoadK <dst> <idx:u16>`
    pub fn load_constant(&mut self, dst: u16, idx: u16) {
        self.reg_u16(Op::LoadK, dst, idx);
    }

    /// `String <dst> <idx:u16>`: a fresh string per execution.
    pub fn string(&mut self, dst: u16, idx: u16) {
        self.reg_u16(Op::String, dst, idx);
    }

    pub fn load_self(&mut self, dst: u16) {
        let wide = self.emit_op_for(Op::LoadSelf, &[dst]);
        self.emit_reg(dst, wide);
    }

    pub fn nil(&mut self, dst: u16) {
        let wide = self.emit_op_for(Op::Nil, &[dst]);
        self.emit_reg(dst, wide);
    }

    pub fn bool(&mut self, dst: u16, value: bool) {
        self.reg_u8(Op::Bool, dst, value as u8);
    }

    /// `NewArray <dst> <count:u8>`: elements in `dst+1 ..= dst+count`.
    pub fn new_array(&mut self, dst: u16, count: u8) {
        self.reg_u8(Op::NewArray, dst, count);
    }

    /// `NewHash <dst> <pairs:u8>`: key/value pairs from `dst+1`.
    pub fn new_hash(&mut self, dst: u16, pairs: u8) {
        self.reg_u8(Op::NewHash, dst, pairs);
    }

    /// `NewRange <dst> <end> <exclusive:u8>`: first element read from `dst`.
    pub fn new_range(&mut self, dst: u16, end: u16, exclusive: bool) {
        let wide = self.emit_op_for(Op::NewRange, &[dst, end]);
        self.emit_reg(dst, wide);
        self.emit_reg(end, wide);
        self.emit_u8(exclusive as u8);
    }

    // ── return / signal ────────────────────────────────────────────

    pub fn return_(&mut self, src: u16) {
        let wide = self.emit_op_for(Op::Return, &[src]);
        self.emit_reg(src, wide);
    }

    /// `Throw <reason:u8> <src>`
    pub fn throw(&mut self, reason: u8, src: u16) {
        let wide = self.emit_op_for(Op::Throw, &[src]);
        self.emit_u8(reason);
        self.emit_reg(src, wide);
    }

    /// `Yield <dst> <argc:u8>`: arguments in `dst+1 ..= dst+argc`.
    pub fn yield_(&mut self, dst: u16, argc: u8) {
        self.reg_u8(Op::Yield, dst, argc);
    }

    // ── variables ──────────────────────────────────────────────────

    pub fn get_upval(&mut self, dst: u16, idx: u16) {
        self.reg_u16(Op::GetUpval, dst, idx);
    }

    pub fn set_upval(&mut self, src: u16, idx: u16) {
        self.reg_u16(Op::SetUpval, src, idx);
    }

    pub fn get_ivar(&mut self, dst: u16, name: u16) {
        self.reg_u16(Op::GetIvar, dst, name);
    }

    pub fn set_ivar(&mut self, src: u16, name: u16) {
        self.reg_u16(Op::SetIvar, src, name);
    }

    pub fn get_cvar(&mut self, dst: u16, name: u16) {
        self.reg_u16(Op::GetCvar, dst, name);
    }

    pub fn set_cvar(&mut self, src: u16, name: u16) {
        self.reg_u16(Op::SetCvar, src, name);
    }

    pub fn get_const(&mut self, dst: u16, name: u16) {
        self.reg_u16(Op::GetConst, dst, name);
    }

    pub fn set_const(&mut self, src: u16, name: u16) {
        self.reg_u16(Op::SetConst, src, name);
    }

    pub fn get_global(&mut self, dst: u16, name: u16) {
        self.reg_u16(Op::GetGlobal, dst, name);
    }

    pub fn set_global(&mut self, src: u16, name: u16) {
        self.reg_u16(Op::SetGlobal, src, name);
    }

    // ── dispatch ───────────────────────────────────────────────────

    /// Encoded length of a `Lookup` whose receiver is `recv`.
    pub fn lookup_len(recv: u16) -> u8 {
        if Self::needs_wide(recv) { 1 + 1 + 2 + 2 + 2 } else { 1 + 1 + 2 + 2 }
    }

    /// `Lookup <recv> <message:u16> <cache:u16>`
    pub fn lookup(&mut self, recv: u16, message: u16, cache: u16) {
        let wide = self.emit_op_for(Op::Lookup, &[recv]);
        self.emit_reg(recv, wide);
        self.emit_u16(message);
        self.emit_u16(cache);
    }

    /// `Cache <recv> <skip:u8> <cache:u16>`
    pub fn cache(&mut self, recv: u16, skip: u8, cache: u16) {
        let wide = self.emit_op_for(Op::Cache, &[recv]);
        self.emit_reg(recv, wide);
        self.emit_u8(skip);
        self.emit_u16(cache);
    }

    /// Emit the `Cache` + `Lookup` pair that precedes every `Call`. A cache
    /// hit skips exactly the `Lookup`.
    pub fn cached_lookup(&mut self, recv: u16, message: u16, cache: u16) {
        self.cache(recv, Self::lookup_len(recv), cache);
        self.lookup(recv, message, cache);
    }

    /// `Call <recv> <argc<<1|splat:u16> <block:u16>`
    ///
    /// `block` is a nested block index, encoded as `index + 1`.
    pub fn call(
        &mut self,
        recv: u16,
        argc: u16,
        splat: bool,
        block: Option<u16>,
    ) {
        let wide = self.emit_op_for(Op::Call, &[recv]);
        self.emit_reg(recv, wide);
        self.emit_u16((argc << 1) | splat as u16);
        self.emit_u16(block.map_or(0, |b| b + 1));
    }

    // ── definitions ────────────────────────────────────────────────

    pub fn def(&mut self, block: u16, name: u16) {
        self.emit_op(Op::Def);
        self.emit_u16(block);
        self.emit_u16(name);
    }

    pub fn meta_def(&mut self, block: u16, name: u16, receiver: u16) {
        let wide = self.emit_op_for(Op::MetaDef, &[receiver]);
        self.emit_u16(block);
        self.emit_u16(name);
        self.emit_reg(receiver, wide);
    }

    pub fn class(&mut self, block: u16, name: u16, superclass: u16) {
        let wide = self.emit_op_for(Op::Class, &[superclass]);
        self.emit_u16(block);
        self.emit_u16(name);
        self.emit_reg(superclass, wide);
    }

    pub fn module(&mut self, block: u16, name: u16) {
        self.emit_op(Op::Module);
        self.emit_u16(block);
        self.emit_u16(name);
    }

    // ── arithmetic ─────────────────────────────────────────────────

    fn binary(&mut self, op: Op, dst: u16, lhs: u16, rhs: u16) {
        let wide = self.emit_op_for(op, &[dst]);
        self.emit_reg(dst, wide);
        self.emit_u16(lhs);
        self.emit_u16(rhs);
    }

    fn unary(&mut self, op: Op, dst: u16, operand: u16) {
        let wide = self.emit_op_for(op, &[dst]);
        self.emit_reg(dst, wide);
        self.emit_u16(operand);
    }

    pub fn add(&mut self, dst: u16, lhs: u16, rhs: u16) {
        self.binary(Op::Add, dst, lhs, rhs);
    }

    pub fn sub(&mut self, dst: u16, lhs: u16, rhs: u16) {
        self.binary(Op::Sub, dst, lhs, rhs);
    }

    pub fn lt(&mut self, dst: u16, lhs: u16, rhs: u16) {
        self.binary(Op::Lt, dst, lhs, rhs);
    }

    pub fn neg(&mut self, dst: u16, operand: u16) {
        self.unary(Op::Neg, dst, operand);
    }

    pub fn not(&mut self, dst: u16, operand: u16) {
        self.unary(Op::Not, dst, operand);
    }

    // ── jumps ──────────────────────────────────────────────────────

    /// Emit an unconditional forward jump. Returns a [`Label`] that must be
    /// resolved later with [`bind`](Self::bind).
    pub fn jump(&mut self) -> Label {
        self.emit_op(Op::Jump);
        self.jump_placeholder()
    }

    /// Emit a forward jump taken when `src` is truthy.
    pub fn jump_if(&mut self, src: u16) -> Label {
        let wide = self.emit_op_for(Op::JumpIf, &[src]);
        self.emit_reg(src, wide);
        self.jump_placeholder()
    }

    /// Emit a forward jump taken when `src` is `nil` or `false`.
    pub fn jump_unless(&mut self, src: u16) -> Label {
        let wide = self.emit_op_for(Op::JumpUnless, &[src]);
        self.emit_reg(src, wide);
        self.jump_placeholder()
    }

    /// Bind a forward jump label to the current position.
    pub fn bind(&mut self, label: Label) -> Result<(), JumpTooFar> {
        let offset = jump_offset(label.base, self.buf.len())?;
        self.buf[label.offset_pos..label.offset_pos + 2]
            .copy_from_slice(&offset.to_le_bytes());
        Ok(())
    }

    /// Emit an unconditional backward jump to `target` (a byte offset obtained
    /// from [`current_offset`](Self::current_offset)).
    pub fn jump_back(&mut self, target: usize) -> Result<(), JumpTooFar> {
        let offset = jump_offset(self.buf.len() + 3, target)?;
        self.emit_op(Op::Jump);
        self.emit_i16(offset);
        Ok(())
    }

    fn jump_placeholder(&mut self) -> Label {
        let offset_pos = self.buf.len();
        self.emit_i16(0); // placeholder
        let base = self.buf.len();
        Label { offset_pos, base }
    }
}

impl Default for BytecodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
