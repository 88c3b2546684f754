use object::{class_name, str_of, Value};

use crate::control::Outcome;
use crate::primitives::arg;
use crate::Vm;

/// `Exception#initialize(message = nil)`.
pub fn exception_initialize(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    if args.len() > 1 {
        return Err(vm.arity_error(args.len(), 1));
    }
    if let Some(obj) = receiver.as_object() {
        obj.set_ivar(vm.names.message, arg(args, 0));
    }
    Ok(Value::Nil)
}

/// The message, or the class name when none was given.
pub fn exception_message(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let message = receiver
        .as_object()
        .and_then(|obj| obj.ivar(vm.names.message))
        .unwrap_or(Value::Nil);
    if str_of(&message).is_some() {
        return Ok(message);
    }
    let text = match message {
        Value::Nil => class_name(&vm.class_of_real(&receiver)),
        other => vm.to_s(&other)?,
    };
    Ok(vm.core.string(text))
}

pub fn exception_backtrace(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    Ok(receiver
        .as_object()
        .and_then(|obj| obj.ivar(vm.names.backtrace))
        .unwrap_or(Value::Nil))
}

pub fn exception_inspect(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let name = class_name(&vm.class_of_real(&receiver));
    let message = exception_message(vm, receiver, &[])?;
    let message = vm.to_s(&message)?;
    let text = if message.is_empty() || message == name {
        name
    } else {
        format!("#<{name}: {message}>")
    };
    Ok(vm.core.string(text))
}
