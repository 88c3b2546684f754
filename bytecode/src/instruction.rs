use core::fmt;

use crate::{rk_constant, rk_index};

/// A decoded instruction with all operands resolved to their widest types.
///
/// Register operands are always `u16` regardless of whether the instruction
/// was encoded in narrow or wide form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Move {
        dst: u16,
        src: u16,
    },
    LoadK {
        dst: u16,
        idx: u16,
    },
    String {
        dst: u16,
        idx: u16,
    },
    LoadSelf {
        dst: u16,
    },
    Nil {
        dst: u16,
    },
    Bool {
        dst: u16,
        value: bool,
    },
    NewArray {
        dst: u16,
        count: u8,
    },
    NewHash {
        dst: u16,
        pairs: u8,
    },
    NewRange {
        dst: u16,
        end: u16,
        exclusive: bool,
    },
    Return {
        src: u16,
    },
    Throw {
        reason: u8,
        src: u16,
    },
    Yield {
        dst: u16,
        argc: u8,
    },
    GetUpval {
        dst: u16,
        idx: u16,
    },
    SetUpval {
        src: u16,
        idx: u16,
    },
    GetIvar {
        dst: u16,
        name: u16,
    },
    SetIvar {
        src: u16,
        name: u16,
    },
    GetCvar {
        dst: u16,
        name: u16,
    },
    SetCvar {
        src: u16,
        name: u16,
    },
    GetConst {
        dst: u16,
        name: u16,
    },
    SetConst {
        src: u16,
        name: u16,
    },
    GetGlobal {
        dst: u16,
        name: u16,
    },
    SetGlobal {
        src: u16,
        name: u16,
    },
    Lookup {
        recv: u16,
        message: u16,
        cache: u16,
    },
    Cache {
        recv: u16,
        skip: u8,
        cache: u16,
    },
    Call {
        recv: u16,
        argc: u16,
        splat: bool,
        block: u16,
    },
    Def {
        block: u16,
        name: u16,
    },
    MetaDef {
        block: u16,
        name: u16,
        receiver: u16,
    },
    Class {
        block: u16,
        name: u16,
        superclass: u16,
    },
    Module {
        block: u16,
        name: u16,
    },
    Jump {
        offset: i16,
    },
    JumpIf {
        src: u16,
        offset: i16,
    },
    JumpUnless {
        src: u16,
        offset: i16,
    },
    Add {
        dst: u16,
        lhs: u16,
        rhs: u16,
    },
    Sub {
        dst: u16,
        lhs: u16,
        rhs: u16,
    },
    Lt {
        dst: u16,
        lhs: u16,
        rhs: u16,
    },
    Neg {
        dst: u16,
        operand: u16,
    },
    Not {
        dst: u16,
        operand: u16,
    },
}

/// Formats an RK operand as `k3` (constant) or `r3` (register).
struct Rk(u16);

impl fmt::Display for Rk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if rk_constant(self.0) {
            write!(f, "k{}", rk_index(self.0))
        } else {
            write!(f, "r{}", self.0)
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Move { dst, src } => write!(f, "Move r{dst}, r{src}"),
            Self::LoadK { dst, idx } => write!(f, "LoadK r{dst}, #{idx}"),
            Self::String { dst, idx } => write!(f, "String r{dst}, \"{idx}\""),
            Self::LoadSelf { dst } => write!(f, "LoadSelf r{dst}"),
            Self::Nil { dst } => write!(f, "Nil r{dst}"),
            Self::Bool { dst, value } => write!(f, "Bool r{dst}, {value}"),
            Self::NewArray { dst, count } => {
                write!(f, "NewArray r{dst}, {count}")
            }
            Self::NewHash { dst, pairs } => {
                write!(f, "NewHash r{dst}, {pairs}")
            }
            Self::NewRange {
                dst,
                end,
                exclusive,
            } => {
                let dots = if exclusive { "..." } else { ".." };
                write!(f, "NewRange r{dst}, r{dst}{dots}r{end}")
            }
            Self::Return { src } => write!(f, "Return r{src}"),
            Self::Throw { reason, src } => write!(f, "Throw {reason}, r{src}"),
            Self::Yield { dst, argc } => write!(f, "Yield r{dst}, {argc}"),
            Self::GetUpval { dst, idx } => write!(f, "GetUpval r{dst}, ^{idx}"),
            Self::SetUpval { src, idx } => write!(f, "SetUpval ^{idx}, r{src}"),
            Self::GetIvar { dst, name } => write!(f, "GetIvar r{dst}, #{name}"),
            Self::SetIvar { src, name } => write!(f, "SetIvar #{name}, r{src}"),
            Self::GetCvar { dst, name } => write!(f, "GetCvar r{dst}, #{name}"),
            Self::SetCvar { src, name } => write!(f, "SetCvar #{name}, r{src}"),
            Self::GetConst { dst, name } => {
                write!(f, "GetConst r{dst}, #{name}")
            }
            Self::SetConst { src, name } => {
                write!(f, "SetConst #{name}, r{src}")
            }
            Self::GetGlobal { dst, name } => {
                write!(f, "GetGlobal r{dst}, #{name}")
            }
            Self::SetGlobal { src, name } => {
                write!(f, "SetGlobal #{name}, r{src}")
            }
            Self::Lookup {
                recv,
                message,
                cache,
            } => write!(f, "Lookup r{recv}, #{message} ~{cache}"),
            Self::Cache { recv, skip, cache } => {
                write!(f, "Cache r{recv}, +{skip} ~{cache}")
            }
            Self::Call {
                recv,
                argc,
                splat,
                block,
            } => {
                write!(f, "Call r{recv}, {argc}")?;
                if splat {
                    write!(f, "*")?;
                }
                if block > 0 {
                    write!(f, " &{}", block - 1)?;
                }
                Ok(())
            }
            Self::Def { block, name } => write!(f, "Def #{name}, &{block}"),
            Self::MetaDef {
                block,
                name,
                receiver,
            } => write!(f, "MetaDef r{receiver}.#{name}, &{block}"),
            Self::Class {
                block,
                name,
                superclass,
            } => write!(f, "Class #{name} < r{superclass}, &{block}"),
            Self::Module { block, name } => {
                write!(f, "Module #{name}, &{block}")
            }
            Self::Jump { offset } => write!(f, "Jump {offset:+}"),
            Self::JumpIf { src, offset } => {
                write!(f, "JumpIf r{src}, {offset:+}")
            }
            Self::JumpUnless { src, offset } => {
                write!(f, "JumpUnless r{src}, {offset:+}")
            }
            Self::Add { dst, lhs, rhs } => {
                write!(f, "Add r{dst}, {}, {}", Rk(lhs), Rk(rhs))
            }
            Self::Sub { dst, lhs, rhs } => {
                write!(f, "Sub r{dst}, {}, {}", Rk(lhs), Rk(rhs))
            }
            Self::Lt { dst, lhs, rhs } => {
                write!(f, "Lt r{dst}, {}, {}", Rk(lhs), Rk(rhs))
            }
            Self::Neg { dst, operand } => {
                write!(f, "Neg r{dst}, {}", Rk(operand))
            }
            Self::Not { dst, operand } => {
                write!(f, "Not r{dst}, {}", Rk(operand))
            }
        }
    }
}
