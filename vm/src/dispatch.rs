//! Method resolution, the inline cache protocol and invocation.
//!
//! Every call compiles to `CACHE`, `LOOKUP`, `CALL`. The first execution of
//! a call finds its slot `Uncached`; `LOOKUP` resolves the method, appends a
//! call site and fills the slot. From then on `CACHE` compares the
//! receiver's class with the cached one and, on a hit, skips the `LOOKUP`.
//! A miss counts against the site and falls through to a full resolution,
//! which appends another site; the slot keeps pointing at the first site
//! it cached.

use std::rc::Rc;

use log::debug;
use object::{
    class_name, find_method, Block, CallConvention, CallSite, InlineCache, Method,
    MethodBody, Symbol, Value,
};

use crate::closure::Closure;
use crate::control::{Fault, Outcome, Throw, ThrowReason, Unwind};
use crate::exception::ErrorClass;
use crate::frame::FrameId;
use crate::interpreter::activate;
use crate::Vm;

/// What a frame does with the result of a call it made.
pub(crate) enum Settled {
    Value(Value),
    /// A `return` from a block reached its home frame.
    Return(Value),
}

impl Vm {
    /// Full resolution for `LOOKUP`: resolve and append a call site. The
    /// inline cache slot is filled only if it is still empty.
    pub(crate) fn lookup(
        &mut self,
        block: &Block,
        receiver: &Value,
        message: Symbol,
        slot: usize,
    ) -> Outcome<CallSite> {
        self.stats.resolutions += 1;
        let class = self.core.class_of(receiver);
        let (method, method_missing) = self.resolve(&class, receiver, message)?;
        let site = CallSite {
            class: class.clone(),
            method,
            message,
            method_missing,
            miss: 0,
        };
        let index = block.sites.push(site.clone());
        // An occupied slot keeps its first site.
        if block.caches.get(slot) == InlineCache::Uncached {
            block.caches.install(slot, class.clone(), index);
            debug!(
                "cache slot {slot} in {}: {}#{} -> site {index}",
                block.name,
                class_name(&class),
                self.symbols.name(message)
            );
        }
        Ok(site)
    }

    /// `CACHE`: the cached site on a hit, `None` when the `LOOKUP` must run.
    pub(crate) fn check_cache(
        &mut self,
        block: &Block,
        receiver: &Value,
        slot: usize,
    ) -> Option<CallSite> {
        let InlineCache::Cached { class, site } = block.caches.get(slot) else {
            return None;
        };
        if self.core.class_of(receiver) == class {
            self.stats.cache_hits += 1;
            return block.sites.get(site);
        }
        self.stats.cache_misses += 1;
        block.sites.record_miss(site);
        debug!("cache miss at slot {slot} in {} (site {site})", block.name);
        None
    }

    fn resolve(
        &self,
        class: &Value,
        receiver: &Value,
        message: Symbol,
    ) -> Outcome<(Rc<Method>, bool)> {
        if let Some(method) = find_method(class, message) {
            return Ok((method, false));
        }
        match find_method(class, self.names.method_missing) {
            Some(method) => Ok((method, true)),
            None => Err(self.no_method_error(receiver, message)),
        }
    }

    pub(crate) fn no_method_error(&self, receiver: &Value, message: Symbol) -> Unwind {
        let text = format!(
            "undefined method `{}' for {}",
            self.symbols.name(message),
            self.describe(receiver)
        );
        self.raise(ErrorClass::NoMethodError, text)
    }

    /// Invoke a resolved call site as `CALL` does.
    pub(crate) fn call_site(
        &mut self,
        site: &CallSite,
        receiver: Value,
        mut args: Vec<Value>,
        splat: bool,
        closure: Option<Rc<Closure>>,
    ) -> Outcome<Value> {
        if splat {
            let spread = args.last().and_then(|last| {
                last.as_object()
                    .and_then(|obj| obj.as_array())
                    .map(|items| items.borrow().clone())
            });
            if let Some(items) = spread {
                args.pop();
                args.extend(items);
            }
        }
        if site.method_missing {
            args.insert(0, Value::Symbol(site.message));
        }
        self.call_method(&site.method, receiver, args, closure)
    }

    /// Send `message` outside the inline cache: resolve, then invoke.
    pub fn send(
        &mut self,
        receiver: Value,
        message: Symbol,
        mut args: Vec<Value>,
        closure: Option<Rc<Closure>>,
    ) -> Outcome<Value> {
        self.stats.resolutions += 1;
        let class = self.core.class_of(&receiver);
        let (method, method_missing) = self.resolve(&class, &receiver, message)?;
        if method_missing {
            args.insert(0, Value::Symbol(message));
        }
        self.call_method(&method, receiver, args, closure)
    }

    /// Push a frame for `method` and run it. The frame is pushed before the
    /// argument count is checked, so an arity error is raised from inside
    /// the callee.
    pub fn call_method(
        &mut self,
        method: &Rc<Method>,
        receiver: Value,
        args: Vec<Value>,
        closure: Option<Rc<Closure>>,
    ) -> Outcome<Value> {
        self.stats.dispatches += 1;
        self.with_frame(receiver.clone(), method.owner.clone(), closure, |vm, depth| {
            vm.frame_at_mut(depth)?.method = Some(method.clone());
            match &method.body {
                MethodBody::Native { index, arity } => {
                    if let Some(arity) = *arity {
                        if args.len() != arity as usize {
                            return Err(vm.arity_error(args.len(), arity as usize));
                        }
                    }
                    let func = vm
                        .primitives
                        .get(*index)
                        .map(|desc| desc.func)
                        .ok_or(Fault::BadOperand {
                            what: "primitive",
                            index: *index,
                        })?;
                    func(vm, receiver, &args)
                }
                MethodBody::Compiled { block, convention } => {
                    let (args, start) = vm.bind_arguments(block, *convention, args)?;
                    activate(vm, depth, block, start, args)
                }
            }
        })
    }

    /// Validate the argument count against a compiled method's convention.
    /// Returns the register contents and the offset to start executing at.
    fn bind_arguments(
        &self,
        block: &Block,
        convention: CallConvention,
        mut args: Vec<Value>,
    ) -> Outcome<(Vec<Value>, usize)> {
        let argc = block.argc as usize;
        let given = args.len();
        match convention {
            CallConvention::Plain => {
                if given != argc {
                    return Err(self.arity_error(given, argc));
                }
                Ok((args, 0))
            }
            CallConvention::WithDefaults => {
                let required = argc.saturating_sub(block.defaults.len());
                if given < required {
                    return Err(self.arity_error(given, required));
                }
                if given > argc {
                    return Err(self.arity_error(given, argc));
                }
                let start = match given.checked_sub(required + 1) {
                    Some(i) => block.defaults.get(i).copied().unwrap_or(0),
                    None => 0,
                };
                args.resize(argc, Value::Nil);
                Ok((args, start))
            }
            CallConvention::WithSplat => {
                let fixed = argc.saturating_sub(1);
                if given < fixed {
                    return Err(self.arity_error(given, fixed));
                }
                let rest = args.split_off(fixed);
                args.push(self.core.array(rest));
                Ok((args, 0))
            }
        }
    }

    pub(crate) fn arity_error(&self, given: usize, expected: usize) -> Unwind {
        self.raise(
            ErrorClass::ArgumentError,
            format!("wrong number of arguments ({given} for {expected})"),
        )
    }
}

/// Decide what `frame` does with the outcome of a call it made: exceptions
/// propagate, a `return` either stops here or keeps unwinding toward its
/// home frame, and `break` across a call is a fault.
pub(crate) fn settle(frame: FrameId, result: Outcome<Value>) -> Outcome<Settled> {
    match result {
        Ok(value) => Ok(Settled::Value(value)),
        Err(Unwind::Throw(Throw {
            reason: ThrowReason::Return,
            value,
            home,
        })) if home == Some(frame) => Ok(Settled::Return(value)),
        Err(Unwind::Throw(Throw {
            reason: ThrowReason::Break,
            ..
        })) => Err(Fault::UnsupportedBreak.into()),
        Err(unwind) => Err(unwind),
    }
}
