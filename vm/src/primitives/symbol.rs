use object::Value;

use crate::control::Outcome;
use crate::primitives::type_error;
use crate::Vm;

fn name(vm: &Vm, receiver: &Value) -> Outcome<String> {
    match receiver {
        Value::Symbol(sym) => Ok(vm.symbols.name(*sym).to_string()),
        other => Err(type_error(vm, other, "Symbol")),
    }
}

pub fn symbol_to_s(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let text = name(vm, &receiver)?;
    Ok(vm.core.string(text))
}

pub fn symbol_inspect(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let text = format!(":{}", name(vm, &receiver)?);
    Ok(vm.core.string(text))
}
