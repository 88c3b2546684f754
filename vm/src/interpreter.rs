use std::rc::Rc;

use bytecode::{decode_at, rk_constant, rk_index, Instruction};
use log::trace;
use object::{Block, CallSite, Symbol, Value};

use crate::closure::Closure;
use crate::control::{Fault, Outcome, Throw, ThrowReason, Unwind};
use crate::dispatch::{settle, Settled};
use crate::exception::ErrorClass;
use crate::frame::FrameId;
use crate::Vm;

/// Install `block` in the frame at `depth` and run it from `start`.
///
/// `args` become the first registers; the rest of the register file is
/// `nil`.
pub fn activate(
    vm: &mut Vm,
    depth: usize,
    block: &Rc<Block>,
    start: usize,
    args: Vec<Value>,
) -> Outcome<Value> {
    let frame = vm.frame_at_mut(depth)?;
    let mut registers = args;
    let size = (block.register_count as usize).max(registers.len());
    registers.resize(size, Value::Nil);
    frame.registers = registers;
    frame.block = Some(block.clone());
    frame.filename = Some(block.filename.clone());
    frame.pc = start;
    interpret(vm, depth, block, start)
}

/// The dispatch loop. Runs `block` in the frame at `depth` until a
/// `RETURN`, a throw, or the end of the code stream (which yields `nil`).
pub fn interpret(
    vm: &mut Vm,
    depth: usize,
    block: &Rc<Block>,
    start: usize,
) -> Outcome<Value> {
    let code = &block.code[..];
    let frame_id = vm.frame_at(depth)?.id;
    let mut pc = start;
    // Site chosen by the last CACHE hit or LOOKUP, consumed by CALL.
    let mut active: Option<CallSite> = None;

    while pc < code.len() {
        let (instr, next_pc) = decode_at(code, pc).map_err(Fault::from)?;
        trace!("{}:{:04} {}", block.name, pc, instr);
        vm.frame_at_mut(depth)?.pc = pc;
        let current = pc;
        pc = next_pc;

        match instr {
            Instruction::Move { dst, src } => {
                let value = get_register(vm, depth, src)?;
                set_register(vm, depth, dst, value)?;
            }
            Instruction::LoadK { dst, idx } => {
                let value = constant(block, idx)?;
                set_register(vm, depth, dst, value)?;
            }
            Instruction::String { dst, idx } => {
                let text = block.strings.get(idx as usize).ok_or(Fault::BadOperand {
                    what: "string",
                    index: idx as usize,
                })?;
                let value = vm.core.string(text.as_str());
                set_register(vm, depth, dst, value)?;
            }
            Instruction::LoadSelf { dst } => {
                let value = vm.frame_at(depth)?.self_value.clone();
                set_register(vm, depth, dst, value)?;
            }
            Instruction::Nil { dst } => set_register(vm, depth, dst, Value::Nil)?,
            Instruction::Bool { dst, value } => {
                set_register(vm, depth, dst, Value::bool(value))?;
            }
            Instruction::NewArray { dst, count } => {
                let items = register_run(vm, depth, dst, count as usize)?;
                let value = vm.core.array(items);
                set_register(vm, depth, dst, value)?;
            }
            Instruction::NewHash { dst, pairs } => {
                let flat = register_run(vm, depth, dst, pairs as usize * 2)?;
                let mut entries = Vec::with_capacity(pairs as usize);
                let mut iter = flat.into_iter();
                while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
                    entries.push((key, value));
                }
                let value = vm.core.hash(entries);
                set_register(vm, depth, dst, value)?;
            }
            Instruction::NewRange {
                dst,
                end,
                exclusive,
            } => {
                let first = get_register(vm, depth, dst)?;
                let last = get_register(vm, depth, end)?;
                let value = vm.core.range(first, last, exclusive);
                set_register(vm, depth, dst, value)?;
            }

            Instruction::Return { src } => return Ok(get_register(vm, depth, src)?),
            Instruction::Throw { reason, src } => {
                let reason = ThrowReason::from_operand(reason)
                    .ok_or(Fault::InvalidThrowReason(reason))?;
                let value = get_register(vm, depth, src)?;
                let home = match reason {
                    ThrowReason::Return => Some(vm.frame_at(depth)?.return_home()),
                    _ => None,
                };
                return Err(Unwind::Throw(Throw {
                    reason,
                    value,
                    home,
                }));
            }
            Instruction::Yield { dst, argc } => {
                let value = yield_run(vm, depth, dst, argc)?;
                set_register(vm, depth, dst, value)?;
            }

            Instruction::GetUpval { dst, idx } => {
                let upvalue = upvalue_at(vm, depth, idx)?;
                let value = vm.get_upvalue(upvalue)?;
                set_register(vm, depth, dst, value)?;
            }
            Instruction::SetUpval { src, idx } => {
                let upvalue = upvalue_at(vm, depth, idx)?;
                let value = get_register(vm, depth, src)?;
                vm.set_upvalue(upvalue, value)?;
            }
            Instruction::GetIvar { dst, name } => {
                let name = symbol(block, name)?;
                let value = vm
                    .frame_at(depth)?
                    .self_value
                    .as_object()
                    .and_then(|obj| obj.ivar(name))
                    .unwrap_or(Value::Nil);
                set_register(vm, depth, dst, value)?;
            }
            Instruction::SetIvar { src, name } => {
                let name = symbol(block, name)?;
                let value = get_register(vm, depth, src)?;
                let receiver = vm.frame_at(depth)?.self_value.clone();
                match receiver.as_object() {
                    Some(obj) => obj.set_ivar(name, value),
                    None => {
                        return Err(vm.raise(
                            ErrorClass::RuntimeError,
                            format!("can't modify frozen {}", vm.describe(&receiver)),
                        ));
                    }
                }
            }
            Instruction::GetCvar { dst, name } => {
                let name = symbol(block, name)?;
                let class = vm.frame_at(depth)?.class.clone();
                let value = vm.cvar_get(&class, name).unwrap_or(Value::Nil);
                set_register(vm, depth, dst, value)?;
            }
            Instruction::SetCvar { src, name } => {
                let name = symbol(block, name)?;
                let value = get_register(vm, depth, src)?;
                let class = vm.frame_at(depth)?.class.clone();
                vm.cvar_set(&class, name, value);
            }
            Instruction::GetConst { dst, name } => {
                let name = symbol(block, name)?;
                let class = vm.frame_at(depth)?.class.clone();
                let value = vm.const_get(&class, name)?;
                set_register(vm, depth, dst, value)?;
            }
            Instruction::SetConst { src, name } => {
                let name = symbol(block, name)?;
                let value = get_register(vm, depth, src)?;
                let class = vm.frame_at(depth)?.class.clone();
                vm.const_set(&class, name, value);
            }
            Instruction::GetGlobal { dst, name } => {
                let name = symbol(block, name)?;
                let value = vm.globals.get(&name).cloned().unwrap_or(Value::Nil);
                set_register(vm, depth, dst, value)?;
            }
            Instruction::SetGlobal { src, name } => {
                let name = symbol(block, name)?;
                let value = get_register(vm, depth, src)?;
                vm.globals.insert(name, value);
            }

            Instruction::Cache { recv, skip, cache } => {
                let receiver = get_register(vm, depth, recv)?;
                if let Some(site) = vm.check_cache(block, &receiver, cache as usize) {
                    active = Some(site);
                    pc += skip as usize;
                }
            }
            Instruction::Lookup {
                recv,
                message,
                cache,
            } => {
                let receiver = get_register(vm, depth, recv)?;
                let message = symbol(block, message)?;
                active = Some(vm.lookup(block, &receiver, message, cache as usize)?);
            }
            Instruction::Call {
                recv,
                argc,
                splat,
                block: literal,
            } => {
                let site = active
                    .take()
                    .ok_or(Fault::CallWithoutLookup { pc: current })?;
                let call = CallOperands {
                    recv,
                    argc,
                    splat,
                    literal,
                };
                match call_run(vm, depth, frame_id, block, &site, call)? {
                    Settled::Value(value) => set_register(vm, depth, recv, value)?,
                    Settled::Return(value) => return Ok(value),
                }
            }

            Instruction::Def { block: body, name } => {
                let name = symbol(block, name)?;
                let body = nested_block(block, body)?;
                vm.define_method(depth, name, body, None)?;
            }
            Instruction::MetaDef {
                block: body,
                name,
                receiver,
            } => {
                let name = symbol(block, name)?;
                let body = nested_block(block, body)?;
                let receiver = get_register(vm, depth, receiver)?;
                vm.define_method(depth, name, body, Some(receiver))?;
            }
            Instruction::Class {
                block: body,
                name,
                superclass,
            } => {
                let name = symbol(block, name)?;
                let body = nested_block(block, body)?;
                let superclass = get_register(vm, depth, superclass)?;
                vm.define_class(depth, name, &body, false, superclass)?;
            }
            Instruction::Module { block: body, name } => {
                let name = symbol(block, name)?;
                let body = nested_block(block, body)?;
                vm.define_class(depth, name, &body, true, Value::Nil)?;
            }

            Instruction::Jump { offset } => pc = jump_target(pc, offset, code.len())?,
            Instruction::JumpIf { src, offset } => {
                if get_register(vm, depth, src)?.is_truthy() {
                    pc = jump_target(pc, offset, code.len())?;
                }
            }
            Instruction::JumpUnless { src, offset } => {
                if !get_register(vm, depth, src)?.is_truthy() {
                    pc = jump_target(pc, offset, code.len())?;
                }
            }

            Instruction::Add { dst, lhs, rhs } => {
                match binary(vm, depth, frame_id, block, Arith::Add, lhs, rhs)? {
                    Settled::Value(value) => set_register(vm, depth, dst, value)?,
                    Settled::Return(value) => return Ok(value),
                }
            }
            Instruction::Sub { dst, lhs, rhs } => {
                match binary(vm, depth, frame_id, block, Arith::Sub, lhs, rhs)? {
                    Settled::Value(value) => set_register(vm, depth, dst, value)?,
                    Settled::Return(value) => return Ok(value),
                }
            }
            Instruction::Lt { dst, lhs, rhs } => {
                match binary(vm, depth, frame_id, block, Arith::Lt, lhs, rhs)? {
                    Settled::Value(value) => set_register(vm, depth, dst, value)?,
                    Settled::Return(value) => return Ok(value),
                }
            }
            Instruction::Neg { dst, operand } => {
                match negate(vm, depth, frame_id, block, operand)? {
                    Settled::Value(value) => set_register(vm, depth, dst, value)?,
                    Settled::Return(value) => return Ok(value),
                }
            }
            Instruction::Not { dst, operand } => {
                let operand = rk(vm, depth, block, operand)?;
                set_register(vm, depth, dst, Value::bool(!operand.is_truthy()))?;
            }
        }
    }
    Ok(Value::Nil)
}

// The helpers below hold the locals of the instructions that re-enter the
// interpreter, keeping them out of `interpret`'s own stack frame.

struct CallOperands {
    recv: u16,
    argc: u16,
    splat: bool,
    literal: u16,
}

#[inline(never)]
fn call_run(
    vm: &mut Vm,
    depth: usize,
    frame_id: FrameId,
    block: &Block,
    site: &CallSite,
    call: CallOperands,
) -> Outcome<Settled> {
    let closure = match call.literal {
        0 => None,
        n => {
            let body = nested_block(block, n - 1)?;
            Some(Rc::new(Closure::capture(vm, depth, body)?))
        }
    };
    let receiver = get_register(vm, depth, call.recv)?;
    let args = register_run(vm, depth, call.recv, call.argc as usize)?;
    let result = vm.call_site(site, receiver, args, call.splat, closure);
    settle(frame_id, result)
}

#[inline(never)]
fn yield_run(vm: &mut Vm, depth: usize, base: u16, argc: u8) -> Outcome<Value> {
    let args = register_run(vm, depth, base, argc as usize)?;
    vm.yield_block(depth, args)
}

#[derive(Clone, Copy)]
enum Arith {
    Add,
    Sub,
    Lt,
}

/// `ADD`, `SUB` and `LT`: computed in place for two fixnums, otherwise sent
/// through the cached operator symbol.
#[inline(never)]
fn binary(
    vm: &mut Vm,
    depth: usize,
    frame_id: FrameId,
    block: &Block,
    op: Arith,
    lhs: u16,
    rhs: u16,
) -> Outcome<Settled> {
    let (lhs, rhs) = (rk(vm, depth, block, lhs)?, rk(vm, depth, block, rhs)?);
    if let (Value::Fixnum(a), Value::Fixnum(b)) = (&lhs, &rhs) {
        let value = match op {
            Arith::Add => a.checked_add(*b).map(Value::Fixnum),
            Arith::Sub => a.checked_sub(*b).map(Value::Fixnum),
            Arith::Lt => Some(Value::bool(a < b)),
        };
        return value.map(Settled::Value).ok_or_else(|| overflow(vm));
    }
    let message = match op {
        Arith::Add => vm.names.add,
        Arith::Sub => vm.names.sub,
        Arith::Lt => vm.names.lt,
    };
    settle(frame_id, vm.send(lhs, message, vec![rhs], None))
}

#[inline(never)]
fn negate(
    vm: &mut Vm,
    depth: usize,
    frame_id: FrameId,
    block: &Block,
    operand: u16,
) -> Outcome<Settled> {
    match rk(vm, depth, block, operand)? {
        Value::Fixnum(n) => n
            .checked_neg()
            .map(|neg| Settled::Value(Value::Fixnum(neg)))
            .ok_or_else(|| overflow(vm)),
        other => {
            let op = vm.names.neg;
            settle(frame_id, vm.send(other, op, Vec::new(), None))
        }
    }
}

fn overflow(vm: &Vm) -> Unwind {
    vm.raise(ErrorClass::RangeError, "fixnum overflow")
}

#[inline(always)]
fn get_register(vm: &Vm, depth: usize, reg: u16) -> Result<Value, Fault> {
    vm.frame_at(depth)?
        .registers
        .get(reg as usize)
        .cloned()
        .ok_or(Fault::BadOperand {
            what: "register",
            index: reg as usize,
        })
}

#[inline(always)]
fn set_register(vm: &mut Vm, depth: usize, reg: u16, value: Value) -> Result<(), Fault> {
    let slot = vm
        .frame_at_mut(depth)?
        .registers
        .get_mut(reg as usize)
        .ok_or(Fault::BadOperand {
            what: "register",
            index: reg as usize,
        })?;
    *slot = value;
    Ok(())
}

/// Registers `base+1 ..= base+count`.
fn register_run(vm: &Vm, depth: usize, base: u16, count: usize) -> Result<Vec<Value>, Fault> {
    let start = base as usize + 1;
    vm.frame_at(depth)?
        .registers
        .get(start..start + count)
        .map(<[Value]>::to_vec)
        .ok_or(Fault::BadOperand {
            what: "register",
            index: start + count,
        })
}

fn constant(block: &Block, idx: u16) -> Result<Value, Fault> {
    block
        .constants
        .get(idx as usize)
        .cloned()
        .ok_or(Fault::BadOperand {
            what: "constant",
            index: idx as usize,
        })
}

fn symbol(block: &Block, idx: u16) -> Result<Symbol, Fault> {
    constant(block, idx)?.as_symbol().ok_or(Fault::BadOperand {
        what: "symbol constant",
        index: idx as usize,
    })
}

fn rk(vm: &Vm, depth: usize, block: &Block, operand: u16) -> Result<Value, Fault> {
    if rk_constant(operand) {
        constant(block, rk_index(operand))
    } else {
        get_register(vm, depth, operand)
    }
}

fn nested_block(block: &Block, idx: u16) -> Result<Rc<Block>, Fault> {
    block.blocks.get(idx as usize).cloned().ok_or(Fault::BadOperand {
        what: "block",
        index: idx as usize,
    })
}

fn upvalue_at(vm: &Vm, depth: usize, idx: u16) -> Result<crate::closure::Upvalue, Fault> {
    vm.frame_at(depth)?
        .running
        .as_ref()
        .and_then(|closure| closure.upvalues.get(idx as usize))
        .copied()
        .ok_or(Fault::BadOperand {
            what: "upvalue",
            index: idx as usize,
        })
}

/// Offsets are relative to the end of the jump instruction. Landing exactly
/// on the end of the code is allowed and finishes the block.
#[inline(always)]
fn jump_target(next_pc: usize, offset: i16, len: usize) -> Result<usize, Fault> {
    let target = next_pc as isize + offset as isize;
    if target < 0 || target as usize > len {
        return Err(Fault::BadJump { target, len });
    }
    Ok(target as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jump_targets_are_bounded() {
        assert_eq!(jump_target(10, -4, 20), Ok(6));
        assert_eq!(jump_target(10, 10, 20), Ok(20));
        assert_eq!(
            jump_target(10, 11, 20),
            Err(Fault::BadJump { target: 21, len: 20 })
        );
        assert_eq!(
            jump_target(2, -3, 20),
            Err(Fault::BadJump { target: -1, len: 20 })
        );
    }
}
