//! The abnormal-exit channel.
//!
//! Every interpret, call and yield returns an [`Outcome`]. `Err` carries
//! either a [`Throw`] (exceptions, non-local `return`, `break`) that callers
//! inspect and propagate, or a [`Fault`], which is never caught.

use bytecode::{throw, DecodeError};
use object::Value;
use thiserror::Error;

use crate::frame::FrameId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrowReason {
    Exception,
    Return,
    Break,
}

impl ThrowReason {
    /// Map a `Throw` operand to its reason.
    pub fn from_operand(operand: u8) -> Option<Self> {
        match operand {
            throw::EXCEPTION => Some(Self::Exception),
            throw::RETURN => Some(Self::Return),
            throw::BREAK => Some(Self::Break),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Throw {
    pub reason: ThrowReason,
    pub value: Value,
    /// For `Return`: the method frame the return unwinds to.
    pub home: Option<FrameId>,
}

/// Unrecoverable interpreter defects. These indicate malformed bytecode or
/// a broken VM invariant, never a user-level error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Fault {
    #[error("unknown opcode {byte:#04x} at offset {offset}")]
    UnknownOpcode { byte: u8, offset: usize },
    #[error("truncated instruction at offset {offset}")]
    Truncated { offset: usize },
    #[error("invalid throw reason {0}")]
    InvalidThrowReason(u8),
    #[error("break from a block across a method call is not supported")]
    UnsupportedBreak,
    #[error("upvalue refers to a frame that is no longer live (depth {depth}, slot {slot})")]
    StaleUpvalue { depth: usize, slot: usize },
    #[error("jump to {target} outside code of length {len}")]
    BadJump { target: isize, len: usize },
    #[error("call at offset {pc} without a resolved method")]
    CallWithoutLookup { pc: usize },
    #[error("{what} index {index} out of range")]
    BadOperand { what: &'static str, index: usize },
    #[error("no active frame")]
    NoFrame,
}

impl From<DecodeError> for Fault {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::UnknownOpcode { byte, offset } => {
                Fault::UnknownOpcode { byte, offset }
            }
            DecodeError::Truncated { offset } => Fault::Truncated { offset },
        }
    }
}

#[derive(Debug, Clone)]
pub enum Unwind {
    Throw(Throw),
    Fault(Fault),
}

impl Unwind {
    pub fn exception(value: Value) -> Self {
        Unwind::Throw(Throw {
            reason: ThrowReason::Exception,
            value,
            home: None,
        })
    }

    /// The exception object, if this is an exception unwind.
    pub fn as_exception(&self) -> Option<&Value> {
        match self {
            Unwind::Throw(Throw {
                reason: ThrowReason::Exception,
                value,
                ..
            }) => Some(value),
            _ => None,
        }
    }
}

impl From<Fault> for Unwind {
    fn from(fault: Fault) -> Self {
        Unwind::Fault(fault)
    }
}

pub type Outcome<T> = Result<T, Unwind>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throw_operands_map_to_reasons() {
        assert_eq!(ThrowReason::from_operand(1), Some(ThrowReason::Exception));
        assert_eq!(ThrowReason::from_operand(2), Some(ThrowReason::Return));
        assert_eq!(ThrowReason::from_operand(3), Some(ThrowReason::Break));
        assert_eq!(ThrowReason::from_operand(0), None);
        assert_eq!(ThrowReason::from_operand(4), None);
    }

    #[test]
    fn decode_errors_become_faults() {
        let fault: Fault = DecodeError::UnknownOpcode { byte: 0xfe, offset: 3 }.into();
        assert_eq!(fault, Fault::UnknownOpcode { byte: 0xfe, offset: 3 });
        assert_eq!(fault.to_string(), "unknown opcode 0xfe at offset 3");
    }
}
