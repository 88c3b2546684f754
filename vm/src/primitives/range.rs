use object::{RangeBody, Value};

use crate::control::Outcome;
use crate::exception::ErrorClass;
use crate::primitives::type_error;
use crate::Vm;

fn body<'a>(vm: &Vm, receiver: &'a Value) -> Outcome<&'a RangeBody> {
    receiver
        .as_object()
        .and_then(|obj| obj.as_range())
        .ok_or_else(|| type_error(vm, receiver, "Range"))
}

pub fn range_first(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    Ok(body(vm, &receiver)?.first.clone())
}

pub fn range_last(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    Ok(body(vm, &receiver)?.last.clone())
}

pub fn range_exclude_end(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    Ok(Value::bool(body(vm, &receiver)?.exclusive))
}

/// Only ranges of fixnums can be enumerated.
pub fn range_to_a(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let range = body(vm, &receiver)?;
    let (Some(first), Some(last)) = (range.first.as_fixnum(), range.last.as_fixnum()) else {
        return Err(vm.raise(ErrorClass::TypeError, "can't iterate from non-Fixnum range"));
    };
    let items = if range.exclusive {
        (first..last).map(Value::Fixnum).collect()
    } else {
        (first..=last).map(Value::Fixnum).collect()
    };
    Ok(vm.core.array(items))
}

pub fn range_inspect(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let range = body(vm, &receiver)?;
    let (first, last, exclusive) = (range.first.clone(), range.last.clone(), range.exclusive);
    let dots = if exclusive { "..." } else { ".." };
    let text = format!("{}{dots}{}", vm.inspect(&first)?, vm.inspect(&last)?);
    Ok(vm.core.string(text))
}
