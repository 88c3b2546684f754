/// Bytecode opcodes.
///
/// Register operands are 8-bit by default. The [`Wide`](Op::Wide) prefix
/// promotes every register operand of the next instruction to 16-bit.
/// Constant pool, string table, nested block and inline-cache indices are
/// always 16-bit. Jump offsets are signed 16-bit, relative to the end of the
/// jump instruction.
///
/// Arithmetic operands are 16-bit "RK" operands: when the high bit
/// ([`RK_CONSTANT`](crate::RK_CONSTANT)) is set the low 15 bits index the
/// constant pool, otherwise they name a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    /// Prefix: the next instruction uses 16-bit register operands.
    Wide = 0x00,

    /// Copy a register.
    /// Operands: `dst:u8`, `src:u8`
    Move,

    /// Load a constant pool entry.
    /// Operands: `dst:u8`, `idx:u16`
    LoadK,

    /// Allocate a fresh string from the string table.
    /// Operands: `dst:u8`, `idx:u16`
    String,

    /// Load the frame's `self`.
    /// Operands: `dst:u8`
    LoadSelf,

    /// Operands: `dst:u8`
    Nil,

    /// Operands: `dst:u8`, `value:u8` (0 or 1)
    Bool,

    /// Build an array from `dst+1 ..= dst+count`.
    /// Operands: `dst:u8`, `count:u8`
    NewArray,

    /// Build a hash from `pairs` key/value register pairs starting at `dst+1`.
    /// Operands: `dst:u8`, `pairs:u8`
    NewHash,

    /// Build a range from `dst` to `end`.
    /// Operands: `dst:u8`, `end:u8`, `exclusive:u8`
    NewRange,

    /// Leave the current activation with a register's value.
    /// Operands: `src:u8`
    Return,

    /// Raise a control-flow signal (1 = exception, 2 = return, 3 = break).
    /// Operands: `reason:u8`, `src:u8`
    Throw,

    /// Invoke the frame's block with `dst+1 ..= dst+argc`, result in `dst`.
    /// Operands: `dst:u8`, `argc:u8`
    Yield,

    /// Operands: `dst:u8`, `idx:u16`
    GetUpval,
    /// Operands: `src:u8`, `idx:u16`
    SetUpval,
    /// Operands: `dst:u8`, `name:u16`
    GetIvar,
    /// Operands: `src:u8`, `name:u16`
    SetIvar,
    /// Operands: `dst:u8`, `name:u16`
    GetCvar,
    /// Operands: `src:u8`, `name:u16`
    SetCvar,
    /// Operands: `dst:u8`, `name:u16`
    GetConst,
    /// Operands: `src:u8`, `name:u16`
    SetConst,
    /// Operands: `dst:u8`, `name:u16`
    GetGlobal,
    /// Operands: `src:u8`, `name:u16`
    SetGlobal,

    /// Full method resolution for the receiver in `recv`.
    /// Operands: `recv:u8`, `message:u16`, `cache:u16`
    Lookup,

    /// Consult an inline cache slot; on a hit skip `skip` bytes (the
    /// following `Lookup`).
    /// Operands: `recv:u8`, `skip:u8`, `cache:u16`
    Cache,

    /// Invoke the method resolved by the preceding `Cache`/`Lookup`.
    /// Arguments live in `recv+1 ..= recv+argc`; the result replaces `recv`.
    /// Operands: `recv:u8`, `packed:u16` (`argc << 1 | splat`), `block:u16`
    /// (nested block index + 1, or 0 for none)
    Call,

    /// Operands: `block:u16`, `name:u16`
    Def,
    /// Operands: `block:u16`, `name:u16`, `receiver:u8`
    MetaDef,
    /// Operands: `block:u16`, `name:u16`, `superclass:u8`
    Class,
    /// Operands: `block:u16`, `name:u16`
    Module,

    /// Operands: `offset:i16`
    Jump,
    /// Jump when the register is truthy.
    /// Operands: `src:u8`, `offset:i16`
    JumpIf,
    /// Jump when the register is `nil` or `false`.
    /// Operands: `src:u8`, `offset:i16`
    JumpUnless,

    /// Operands: `dst:u8`, `lhs:rk16`, `rhs:rk16`
    Add,
    /// Operands: `dst:u8`, `lhs:rk16`, `rhs:rk16`
    Sub,
    /// Operands: `dst:u8`, `lhs:rk16`, `rhs:rk16`
    Lt,
    /// Operands: `dst:u8`, `operand:rk16`
    Neg,
    /// Operands: `dst:u8`, `operand:rk16`
    Not,
}

impl Op {
    pub const COUNT: usize = Op::Not as usize + 1;

    /// Whether this opcode has register operands affected by the `Wide`
    /// prefix.
    pub const fn has_scalable_operands(self) -> bool {
        !matches!(
            self,
            Op::Wide | Op::Def | Op::Module | Op::Jump
        )
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        if byte < Self::COUNT as u8 {
            // SAFETY: Op is repr(u8) with contiguous variants starting at 0.
            Ok(unsafe { core::mem::transmute::<u8, Op>(byte) })
        } else {
            Err(byte)
        }
    }
}
