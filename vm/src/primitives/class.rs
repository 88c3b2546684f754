use std::cell::RefCell;

use object::{class_body, Obj, ObjKind, TypeTag, Value};

use crate::control::Outcome;
use crate::exception::ErrorClass;
use crate::Vm;

/// Allocate an instance of `class`, choosing the payload from the first
/// built-in ancestor so `String.new` and subclasses of `Array` work.
fn allocate(vm: &Vm, class: &Value) -> Outcome<Value> {
    match class_body(class) {
        Some(body) if !body.is_module() => {}
        _ => {
            return Err(vm.raise(
                ErrorClass::TypeError,
                format!("allocator undefined for {}", vm.display(class)),
            ));
        }
    }
    let mut current = class.clone();
    while let Some(body) = class_body(&current) {
        let kind = if current == *vm.core.get(TypeTag::String) {
            Some(ObjKind::String(RefCell::new(String::new())))
        } else if current == *vm.core.get(TypeTag::Array) {
            Some(ObjKind::Array(RefCell::new(Vec::new())))
        } else if current == *vm.core.get(TypeTag::Hash) {
            Some(ObjKind::Hash(RefCell::new(Vec::new())))
        } else {
            None
        };
        if let Some(kind) = kind {
            return Ok(Value::Object(Obj::new(class.clone(), kind)));
        }
        let next = body.superclass();
        current = next;
    }
    Ok(vm.core.object(class.clone()))
}

/// `Class#new`: allocate, then send `initialize` with the arguments and
/// any block given to `new`.
pub fn class_new(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let instance = allocate(vm, &receiver)?;
    let closure = vm.current_frame()?.closure.clone();
    let initialize = vm.names.initialize;
    vm.send(instance.clone(), initialize, args.to_vec(), closure)?;
    Ok(instance)
}

pub fn class_allocate(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    allocate(vm, &receiver)
}

/// The nearest ancestor that is a real class: modules mixed into the
/// chain (such as `Kernel` above `Object`) are skipped.
pub fn class_superclass(_vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let mut current = match class_body(&receiver) {
        Some(body) => body.superclass(),
        None => return Ok(Value::Nil),
    };
    while let Some(body) = class_body(&current) {
        if !body.is_module() {
            return Ok(current);
        }
        let next = body.superclass();
        current = next;
    }
    Ok(Value::Nil)
}

pub fn module_name(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let text = vm.display(&receiver);
    Ok(vm.core.string(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VmSettings;

    #[test]
    fn kernel_is_not_a_superclass() {
        let mut vm = Vm::new(VmSettings {
            load_prelude: false,
            ..VmSettings::default()
        });
        let object = vm.core.get(TypeTag::Object).clone();
        assert_eq!(class_superclass(&mut vm, object, &[]).unwrap(), Value::Nil);

        let string = vm.core.get(TypeTag::String).clone();
        let object = vm.core.get(TypeTag::Object).clone();
        assert_eq!(class_superclass(&mut vm, string, &[]).unwrap(), object);
    }

    #[test]
    fn subclasses_of_builtins_get_their_payload() {
        let vm = Vm::new(VmSettings {
            load_prelude: false,
            ..VmSettings::default()
        });
        let array = vm.core.get(TypeTag::Array).clone();
        let stack = vm.new_class(Some("Stack".into()), array);
        let instance = allocate(&vm, &stack).unwrap();
        assert!(instance.as_object().and_then(|o| o.as_array()).is_some());
        assert_eq!(vm.core.class_of(&instance), stack);
    }
}
