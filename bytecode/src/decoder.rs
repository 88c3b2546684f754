use thiserror::Error;

use crate::instruction::Instruction;
use crate::op::Op;

/// A malformed byte stream. The only validation performed is that every
/// opcode byte names a real [`Op`] and that its operands are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown opcode 0x{byte:02x} at offset {offset}")]
    UnknownOpcode { byte: u8, offset: usize },
    #[error("truncated instruction at offset {offset}")]
    Truncated { offset: usize },
}

/// Decode the instruction starting at `pc`. Returns it together with the
/// offset of the next instruction.
#[inline]
pub fn decode_at(
    bytes: &[u8],
    pc: usize,
) -> Result<(Instruction, usize), DecodeError> {
    let mut reader = Reader { bytes, pos: pc, start: pc };
    let instr = reader.decode()?;
    Ok((instr, reader.pos))
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    start: usize,
}

impl Reader<'_> {
    fn op(&mut self) -> Result<Op, DecodeError> {
        let offset = self.pos;
        let byte = self.u8()?;
        Op::try_from(byte)
            .map_err(|byte| DecodeError::UnknownOpcode { byte, offset })
    }

    fn decode(&mut self) -> Result<Instruction, DecodeError> {
        let op = self.op()?;
        if op == Op::Wide {
            let next = self.op()?;
            self.decode_op(next, true)
        } else {
            self.decode_op(op, false)
        }
    }

    fn decode_op(&mut self, op: Op, wide: bool) -> Result<Instruction, DecodeError> {
        let instr = match op {
            // A doubled prefix is not something the builder emits.
            Op::Wide => {
                return Err(DecodeError::UnknownOpcode {
                    byte: Op::Wide as u8,
                    offset: self.pos - 1,
                });
            }
            Op::Move => Instruction::Move {
                dst: self.reg(wide)?,
                src: self.reg(wide)?,
            },
            Op::LoadK => Instruction::LoadK {
                dst: self.reg(wide)?,
                idx: self.u16()?,
            },
            Op::String => Instruction::String {
                dst: self.reg(wide)?,
                idx: self.u16()?,
            },
            Op::LoadSelf => Instruction::LoadSelf { dst: self.reg(wide)? },
            Op::Nil => Instruction::Nil { dst: self.reg(wide)? },
            Op::Bool => Instruction::Bool {
                dst: self.reg(wide)?,
                value: self.u8()? != 0,
            },
            Op::NewArray => Instruction::NewArray {
                dst: self.reg(wide)?,
                count: self.u8()?,
            },
            Op::NewHash => Instruction::NewHash {
                dst: self.reg(wide)?,
                pairs: self.u8()?,
            },
            Op::NewRange => Instruction::NewRange {
                dst: self.reg(wide)?,
                end: self.reg(wide)?,
                exclusive: self.u8()? != 0,
            },
            Op::Return => Instruction::Return { src: self.reg(wide)? },
            Op::Throw => Instruction::Throw {
                reason: self.u8()?,
                src: self.reg(wide)?,
            },
            Op::Yield => Instruction::Yield {
                dst: self.reg(wide)?,
                argc: self.u8()?,
            },
            Op::GetUpval => Instruction::GetUpval {
                dst: self.reg(wide)?,
                idx: self.u16()?,
            },
            Op::SetUpval => Instruction::SetUpval {
                src: self.reg(wide)?,
                idx: self.u16()?,
            },
            Op::GetIvar => Instruction::GetIvar {
                dst: self.reg(wide)?,
                name: self.u16()?,
            },
            Op::SetIvar => Instruction::SetIvar {
                src: self.reg(wide)?,
                name: self.u16()?,
            },
            Op::GetCvar => Instruction::GetCvar {
                dst: self.reg(wide)?,
                name: self.u16()?,
            },
            Op::SetCvar => Instruction::SetCvar {
                src: self.reg(wide)?,
                name: self.u16()?,
            },
            Op::GetConst => Instruction::GetConst {
                dst: self.reg(wide)?,
                name: self.u16()?,
            },
            Op::SetConst => Instruction::SetConst {
                src: self.reg(wide)?,
                name: self.u16()?,
            },
            Op::GetGlobal => Instruction::GetGlobal {
                dst: self.reg(wide)?,
                name: self.u16()?,
            },
            Op::SetGlobal => Instruction::SetGlobal {
                src: self.reg(wide)?,
                name: self.u16()?,
            },
            Op::Lookup => Instruction::Lookup {
                recv: self.reg(wide)?,
                message: self.u16()?,
                cache: self.u16()?,
            },
            Op::Cache => Instruction::Cache {
                recv: self.reg(wide)?,
                skip: self.u8()?,
                cache: self.u16()?,
            },
            Op::Call => {
                let recv = self.reg(wide)?;
                let packed = self.u16()?;
                let block = self.u16()?;
                Instruction::Call {
                    recv,
                    argc: packed >> 1,
                    splat: packed & 1 == 1,
                    block,
                }
            }
            Op::Def => Instruction::Def {
                block: self.u16()?,
                name: self.u16()?,
            },
            Op::MetaDef => Instruction::MetaDef {
                block: self.u16()?,
                name: self.u16()?,
                receiver: self.reg(wide)?,
            },
            Op::Class => Instruction::Class {
                block: self.u16()?,
                name: self.u16()?,
                superclass: self.reg(wide)?,
            },
            Op::Module => Instruction::Module {
                block: self.u16()?,
                name: self.u16()?,
            },
            Op::Jump => Instruction::Jump { offset: self.i16()? },
            Op::JumpIf => Instruction::JumpIf {
                src: self.reg(wide)?,
                offset: self.i16()?,
            },
            Op::JumpUnless => Instruction::JumpUnless {
                src: self.reg(wide)?,
                offset: self.i16()?,
            },
            Op::Add => Instruction::Add {
                dst: self.reg(wide)?,
                lhs: self.u16()?,
                rhs: self.u16()?,
            },
            Op::Sub => Instruction::Sub {
                dst: self.reg(wide)?,
                lhs: self.u16()?,
                rhs: self.u16()?,
            },
            Op::Lt => Instruction::Lt {
                dst: self.reg(wide)?,
                lhs: self.u16()?,
                rhs: self.u16()?,
            },
            Op::Neg => Instruction::Neg {
                dst: self.reg(wide)?,
                operand: self.u16()?,
            },
            Op::Not => Instruction::Not {
                dst: self.reg(wide)?,
                operand: self.u16()?,
            },
        };
        Ok(instr)
    }

    #[inline(always)]
    fn u8(&mut self) -> Result<u8, DecodeError> {
        let v = *self
            .bytes
            .get(self.pos)
            .ok_or(DecodeError::Truncated { offset: self.start })?;
        self.pos += 1;
        Ok(v)
    }

    #[inline(always)]
    fn u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self
            .bytes
            .get(self.pos..self.pos + 2)
            .ok_or(DecodeError::Truncated { offset: self.start })?;
        self.pos += 2;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    #[inline(always)]
    fn i16(&mut self) -> Result<i16, DecodeError> {
        self.u16().map(|v| v as i16)
    }

    #[inline(always)]
    fn reg(&mut self, wide: bool) -> Result<u16, DecodeError> {
        if wide {
            self.u16()
        } else {
            self.u8().map(u16::from)
        }
    }
}

/// Decodes a byte stream into `(offset, Instruction)` pairs.
///
/// Iteration stops after the first [`DecodeError`].
pub struct BytecodeDecoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> BytecodeDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            failed: false,
        }
    }

    /// Current byte offset in the stream.
    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}

impl Iterator for BytecodeDecoder<'_> {
    type Item = Result<(usize, Instruction), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.is_at_end() {
            return None;
        }
        let offset = self.pos;
        match decode_at(self.bytes, offset) {
            Ok((instr, next)) => {
                self.pos = next;
                Some(Ok((offset, instr)))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}
