use object::{hash_position, Value};

use crate::control::Outcome;
use crate::primitives::{arg, expect_hash};
use crate::Vm;

pub fn hash_at(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let key = arg(args, 0);
    let pairs = expect_hash(vm, &receiver)?.borrow();
    Ok(hash_position(&pairs, &key)
        .map(|pos| pairs[pos].1.clone())
        .unwrap_or(Value::Nil))
}

pub fn hash_at_put(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let (key, value) = (arg(args, 0), arg(args, 1));
    let mut pairs = expect_hash(vm, &receiver)?.borrow_mut();
    match hash_position(&pairs, &key) {
        Some(pos) => pairs[pos].1 = value.clone(),
        None => pairs.push((key, value.clone())),
    }
    Ok(value)
}

pub fn hash_keys(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let keys = expect_hash(vm, &receiver)?
        .borrow()
        .iter()
        .map(|(key, _)| key.clone())
        .collect();
    Ok(vm.core.array(keys))
}

pub fn hash_size(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let len = expect_hash(vm, &receiver)?.borrow().len();
    Ok(Value::Fixnum(len as i64))
}

/// Remove `key`, returning its value or `nil`.
pub fn hash_delete(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let key = arg(args, 0);
    let mut pairs = expect_hash(vm, &receiver)?.borrow_mut();
    Ok(match hash_position(&pairs, &key) {
        Some(pos) => pairs.remove(pos).1,
        None => Value::Nil,
    })
}

pub fn hash_has_key(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let key = arg(args, 0);
    let pairs = expect_hash(vm, &receiver)?.borrow();
    Ok(Value::bool(hash_position(&pairs, &key).is_some()))
}

pub fn hash_inspect(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let pairs = expect_hash(vm, &receiver)?.borrow().clone();
    let mut parts = Vec::with_capacity(pairs.len());
    for (key, value) in &pairs {
        parts.push(format!("{}=>{}", vm.inspect(key)?, vm.inspect(value)?));
    }
    let text = format!("{{{}}}", parts.join(", "));
    Ok(vm.core.string(text))
}
