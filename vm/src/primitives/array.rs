use object::Value;

use crate::control::Outcome;
use crate::exception::ErrorClass;
use crate::primitives::{arg, expect_array, expect_fixnum, expect_string, normalize_index};
use crate::Vm;

/// Snapshot of the elements, so callbacks into Ruby code can't observe a
/// live borrow.
fn items(vm: &Vm, receiver: &Value) -> Outcome<Vec<Value>> {
    Ok(expect_array(vm, receiver)?.borrow().clone())
}

pub fn array_size(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let len = expect_array(vm, &receiver)?.borrow().len();
    Ok(Value::Fixnum(len as i64))
}

pub fn array_at(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let index = expect_fixnum(vm, &arg(args, 0))?;
    let items = expect_array(vm, &receiver)?.borrow();
    Ok(normalize_index(index, items.len())
        .map(|i| items[i].clone())
        .unwrap_or(Value::Nil))
}

/// `ary[i] = v`. Writing past the end pads with `nil`.
pub fn array_at_put(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let index = expect_fixnum(vm, &arg(args, 0))?;
    let value = arg(args, 1);
    let mut items = expect_array(vm, &receiver)?.borrow_mut();
    let len = items.len();
    let slot = if index < 0 {
        match normalize_index(index, len) {
            Some(i) => i,
            None => {
                let message = format!(
                    "index {index} too small for array; minimum: -{len}"
                );
                drop(items);
                return Err(vm.raise(ErrorClass::IndexError, message));
            }
        }
    } else {
        index as usize
    };
    if slot >= len {
        items.resize(slot + 1, Value::Nil);
    }
    items[slot] = value.clone();
    Ok(value)
}

pub fn array_push(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    expect_array(vm, &receiver)?.borrow_mut().push(arg(args, 0));
    Ok(receiver)
}

pub fn array_push_all(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    expect_array(vm, &receiver)?
        .borrow_mut()
        .extend(args.iter().cloned());
    Ok(receiver)
}

pub fn array_pop(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let popped = expect_array(vm, &receiver)?.borrow_mut().pop();
    Ok(popped.unwrap_or(Value::Nil))
}

pub fn array_first(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let first = expect_array(vm, &receiver)?.borrow().first().cloned();
    Ok(first.unwrap_or(Value::Nil))
}

pub fn array_last(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let last = expect_array(vm, &receiver)?.borrow().last().cloned();
    Ok(last.unwrap_or(Value::Nil))
}

/// Element-wise `==`, dispatched so user-defined equality is honoured.
pub fn array_eq(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let other = arg(args, 0);
    if receiver == other {
        return Ok(Value::True);
    }
    let Some(rhs) = other
        .as_object()
        .and_then(|obj| obj.as_array())
        .map(|items| items.borrow().clone())
    else {
        return Ok(Value::False);
    };
    let lhs = items(vm, &receiver)?;
    if lhs.len() != rhs.len() {
        return Ok(Value::False);
    }
    let eq = vm.names.eq;
    for (a, b) in lhs.into_iter().zip(rhs) {
        if !vm.send(a, eq, vec![b], None)?.is_truthy() {
            return Ok(Value::False);
        }
    }
    Ok(Value::True)
}

pub fn array_inspect(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let mut parts = Vec::new();
    for item in items(vm, &receiver)? {
        parts.push(vm.inspect(&item)?);
    }
    let text = format!("[{}]", parts.join(", "));
    Ok(vm.core.string(text))
}

/// `ary.join(separator = "")`.
pub fn array_join(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let separator = match args {
        [] => String::new(),
        [sep] => expect_string(vm, sep)?,
        _ => return Err(vm.arity_error(args.len(), 1)),
    };
    let mut parts = Vec::new();
    for item in items(vm, &receiver)? {
        parts.push(vm.to_s(&item)?);
    }
    Ok(vm.core.string(parts.join(&separator)))
}
