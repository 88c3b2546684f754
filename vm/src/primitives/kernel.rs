use object::{str_of, Value};

use crate::control::Outcome;
use crate::exception::ErrorClass;
use crate::primitives::{arg, type_error};
use crate::Vm;

pub fn kernel_puts(vm: &mut Vm, _receiver: Value, args: &[Value]) -> Outcome<Value> {
    if args.is_empty() {
        vm.write_out("\n")?;
    }
    for value in args {
        puts_one(vm, value)?;
    }
    Ok(Value::Nil)
}

fn puts_one(vm: &mut Vm, value: &Value) -> Outcome<()> {
    let items = value
        .as_object()
        .and_then(|obj| obj.as_array())
        .map(|items| items.borrow().clone());
    if let Some(items) = items {
        for item in &items {
            puts_one(vm, item)?;
        }
        return Ok(());
    }
    let mut line = vm.to_s(value)?;
    if !line.ends_with('\n') {
        line.push('\n');
    }
    vm.write_out(&line)
}

pub fn kernel_print(vm: &mut Vm, _receiver: Value, args: &[Value]) -> Outcome<Value> {
    for value in args {
        let text = vm.to_s(value)?;
        vm.write_out(&text)?;
    }
    Ok(Value::Nil)
}

pub fn kernel_p(vm: &mut Vm, _receiver: Value, args: &[Value]) -> Outcome<Value> {
    for value in args {
        let mut line = vm.inspect(value)?;
        line.push('\n');
        vm.write_out(&line)?;
    }
    Ok(match args {
        [] => Value::Nil,
        [one] => one.clone(),
        many => vm.core.array(many.to_vec()),
    })
}

/// `raise`, `raise "message"`, `raise Class`, `raise Class, "message"` or
/// `raise exception`.
pub fn kernel_raise(vm: &mut Vm, _receiver: Value, args: &[Value]) -> Outcome<Value> {
    let exception = match args {
        [] => return Err(vm.raise(ErrorClass::RuntimeError, "unhandled exception")),
        [message] if str_of(message).is_some() => {
            let class = vm.errors[ErrorClass::RuntimeError as usize].clone();
            vm.new_exception(class, message.clone())
        }
        [target, rest @ ..] if object::class_body(target).is_some() => {
            let new = vm.symbols.intern("new");
            vm.send(target.clone(), new, rest.to_vec(), None)?
        }
        [exception] => exception.clone(),
        _ => return Err(vm.arity_error(args.len(), 1)),
    };
    if !vm.is_error(&exception, ErrorClass::Exception) {
        return Err(vm.raise(ErrorClass::TypeError, "exception class/object expected"));
    }
    if let Some(obj) = exception.as_object() {
        if obj.ivar(vm.names.backtrace).is_none() {
            obj.set_ivar(vm.names.backtrace, vm.backtrace());
        }
    }
    Err(crate::control::Unwind::exception(exception))
}

pub fn kernel_class(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    Ok(vm.class_of_real(&receiver))
}

pub fn kernel_inspect(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let text = vm.inspect_default(&receiver);
    Ok(vm.core.string(text))
}

pub fn kernel_to_s(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let text = vm.display(&receiver);
    Ok(vm.core.string(text))
}

pub fn kernel_eq(_vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    Ok(Value::bool(receiver == arg(args, 0)))
}

pub fn kernel_ne(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let eq = vm.names.eq;
    let result = vm.send(receiver, eq, vec![arg(args, 0)], None)?;
    Ok(Value::bool(!result.is_truthy()))
}

pub fn kernel_nil_p(_vm: &mut Vm, _receiver: Value, _args: &[Value]) -> Outcome<Value> {
    Ok(Value::False)
}

pub fn kernel_respond_to(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let name = arg(args, 0);
    let name = match (&name, str_of(&name)) {
        (Value::Symbol(sym), _) => *sym,
        (_, Some(text)) => vm.symbols.intern(&text),
        _ => return Err(type_error(vm, &name, "Symbol")),
    };
    Ok(Value::bool(vm.core.resolve_method(&receiver, name).is_some()))
}

/// Whether the method that called `block_given?` received a block.
pub fn kernel_block_given(vm: &mut Vm, _receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let depth = vm.depth();
    let given = depth
        .checked_sub(2)
        .and_then(|caller| vm.frames.get(caller))
        .is_some_and(|frame| frame.closure.is_some());
    Ok(Value::bool(given))
}

pub fn kernel_initialize(_vm: &mut Vm, _receiver: Value, _args: &[Value]) -> Outcome<Value> {
    Ok(Value::Nil)
}

pub fn kernel_method_missing(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    match args.first() {
        Some(Value::Symbol(name)) => Err(vm.no_method_error(&receiver, *name)),
        _ => Err(vm.raise(ErrorClass::ArgumentError, "no method name given")),
    }
}

// ── nil, true, false ───────────────────────────────────────────────

pub fn nil_to_s(vm: &mut Vm, _receiver: Value, _args: &[Value]) -> Outcome<Value> {
    Ok(vm.core.string(""))
}

pub fn nil_inspect(vm: &mut Vm, _receiver: Value, _args: &[Value]) -> Outcome<Value> {
    Ok(vm.core.string("nil"))
}

pub fn nil_nil_p(_vm: &mut Vm, _receiver: Value, _args: &[Value]) -> Outcome<Value> {
    Ok(Value::True)
}

pub fn bool_to_s(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let text = if receiver.is_truthy() { "true" } else { "false" };
    Ok(vm.core.string(text))
}
