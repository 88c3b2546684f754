//! Closures, upvalues and `yield`.
//!
//! A closure is built by `CALL` when the call carries a block literal. Its
//! upvalues alias registers of live frames by `(FrameId, depth, slot)`, so
//! reads and writes go straight to the owning frame's register file and a
//! closure that outlives that frame faults instead of reading garbage.

use std::rc::Rc;

use object::{Block, Capture, Value};

use crate::control::{Fault, Outcome};
use crate::exception::ErrorClass;
use crate::frame::FrameId;
use crate::interpreter::activate;
use crate::Vm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upvalue {
    pub frame: FrameId,
    pub depth: usize,
    pub slot: usize,
}

pub struct Closure {
    pub block: Rc<Block>,
    pub self_value: Value,
    pub class: Value,
    /// Block given to the frame that created this closure; a `yield` in
    /// the closure body invokes it.
    pub parent: Option<Rc<Closure>>,
    pub upvalues: Vec<Upvalue>,
    /// Method frame a `return` in the body unwinds to.
    pub home: FrameId,
}

impl Closure {
    /// Close over `block` from the frame at `depth`.
    pub fn capture(vm: &Vm, depth: usize, block: Rc<Block>) -> Result<Self, Fault> {
        let frame = vm.frame_at(depth)?;
        let mut upvalues = Vec::with_capacity(block.captures.len());
        for capture in &block.captures {
            let upvalue = match *capture {
                Capture::Local(reg) => Upvalue {
                    frame: frame.id,
                    depth,
                    slot: reg as usize,
                },
                Capture::Upvalue(idx) => frame
                    .running
                    .as_ref()
                    .and_then(|running| running.upvalues.get(idx as usize))
                    .copied()
                    .ok_or(Fault::BadOperand {
                        what: "upvalue",
                        index: idx as usize,
                    })?,
            };
            upvalues.push(upvalue);
        }
        Ok(Self {
            block,
            self_value: frame.self_value.clone(),
            class: frame.class.clone(),
            parent: frame.closure.clone(),
            upvalues,
            home: frame.return_home(),
        })
    }
}

impl Vm {
    fn upvalue_slot(&mut self, upvalue: Upvalue) -> Result<&mut Value, Fault> {
        let stale = Fault::StaleUpvalue {
            depth: upvalue.depth,
            slot: upvalue.slot,
        };
        match self.frames.get_mut(upvalue.depth) {
            Some(frame) if frame.id == upvalue.frame => {
                frame.registers.get_mut(upvalue.slot).ok_or(stale)
            }
            _ => Err(stale),
        }
    }

    pub fn get_upvalue(&mut self, upvalue: Upvalue) -> Result<Value, Fault> {
        self.upvalue_slot(upvalue).map(|slot| slot.clone())
    }

    pub fn set_upvalue(&mut self, upvalue: Upvalue, value: Value) -> Result<(), Fault> {
        *self.upvalue_slot(upvalue)? = value;
        Ok(())
    }

    /// Invoke the block given to the frame at `depth`.
    pub fn yield_block(&mut self, depth: usize, args: Vec<Value>) -> Outcome<Value> {
        let Some(closure) = self.frame_at(depth)?.closure.clone() else {
            return Err(self.raise(ErrorClass::LocalJumpError, "no block given"));
        };
        self.call_closure(&closure, args)
    }

    /// Run a closure body in a new frame.
    pub fn call_closure(&mut self, closure: &Rc<Closure>, args: Vec<Value>) -> Outcome<Value> {
        let (args, start) = block_arguments(self, &closure.block, args);
        self.with_frame(
            closure.self_value.clone(),
            closure.class.clone(),
            closure.parent.clone(),
            |vm, depth| {
                vm.frame_at_mut(depth)?.running = Some(closure.clone());
                activate(vm, depth, &closure.block, start, args)
            },
        )
    }
}

/// Fit yielded values to a block's parameters: a lone array is spread over
/// several parameters, missing ones are nil and extras are dropped. Also
/// returns the offset to start at, past the initializers of any optional
/// parameters that were supplied.
fn block_arguments(vm: &Vm, block: &Block, mut args: Vec<Value>) -> (Vec<Value>, usize) {
    let argc = block.argc as usize;
    if args.len() == 1 && argc > 1 {
        let spread = args[0]
            .as_object()
            .and_then(|obj| obj.as_array())
            .map(|items| items.borrow().clone());
        if let Some(items) = spread {
            args = items;
        }
    }
    if block.arg_splat && argc > 0 {
        let fixed = argc - 1;
        let rest = if args.len() > fixed {
            args.split_off(fixed)
        } else {
            Vec::new()
        };
        args.resize(fixed, Value::Nil);
        args.push(vm.core.array(rest));
        return (args, 0);
    }

    let supplied = args.len().min(argc);
    let required = block.required_argc();
    let start = match supplied.checked_sub(required + 1) {
        Some(i) => block.defaults.get(i).copied().unwrap_or(0),
        None => 0,
    };
    args.resize(argc, Value::Nil);
    (args, start)
}
