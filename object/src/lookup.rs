use std::cell::RefCell;
use std::rc::Rc;

use crate::method::Method;
use crate::objects::{ClassBody, ClassFlavor, Obj, ObjKind, RangeBody};
use crate::symbol::Symbol;
use crate::value::{TypeTag, Value};

/// Root-class table indexed by [`TypeTag`].
///
/// Immediates carry no class pointer, so their class comes from here.
/// Heap objects of the built-in kinds are allocated with the class found
/// here too.
///
/// Slots start out `nil` and are filled in by the VM's bootstrap.
pub struct CoreClasses {
    classes: [Value; TypeTag::COUNT],
}

impl CoreClasses {
    pub fn new() -> Self {
        Self {
            classes: std::array::from_fn(|_| Value::Nil),
        }
    }

    pub fn get(&self, tag: TypeTag) -> &Value {
        &self.classes[tag as usize]
    }

    pub fn set(&mut self, tag: TypeTag, class: Value) {
        self.classes[tag as usize] = class;
    }

    /// The class a value dispatches through (its singleton class, if any).
    pub fn class_of(&self, value: &Value) -> Value {
        match value {
            Value::Object(obj) => obj.class(),
            other => self.classes[other.type_tag() as usize].clone(),
        }
    }

    /// Resolve `name` for `receiver` through its class chain.
    pub fn resolve_method(&self, receiver: &Value, name: Symbol) -> Option<Rc<Method>> {
        find_method(&self.class_of(receiver), name)
    }

    // ── allocation ─────────────────────────────────────────────────

    pub fn object(&self, class: Value) -> Value {
        Value::Object(Obj::new(class, ObjKind::Plain))
    }

    pub fn string(&self, s: impl Into<String>) -> Value {
        Value::Object(Obj::new(
            self.get(TypeTag::String).clone(),
            ObjKind::String(RefCell::new(s.into())),
        ))
    }

    pub fn array(&self, items: Vec<Value>) -> Value {
        Value::Object(Obj::new(
            self.get(TypeTag::Array).clone(),
            ObjKind::Array(RefCell::new(items)),
        ))
    }

    /// Build a hash; later duplicates of a key overwrite earlier ones.
    pub fn hash(&self, pairs: impl IntoIterator<Item = (Value, Value)>) -> Value {
        let mut table: Vec<(Value, Value)> = Vec::new();
        for (key, value) in pairs {
            match crate::objects::hash_position(&table, &key) {
                Some(pos) => table[pos].1 = value,
                None => table.push((key, value)),
            }
        }
        Value::Object(Obj::new(
            self.get(TypeTag::Hash).clone(),
            ObjKind::Hash(RefCell::new(table)),
        ))
    }

    pub fn range(&self, first: Value, last: Value, exclusive: bool) -> Value {
        Value::Object(Obj::new(
            self.get(TypeTag::Range).clone(),
            ObjKind::Range(RangeBody {
                first,
                last,
                exclusive,
            }),
        ))
    }
}

impl Default for CoreClasses {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocate a class, module or singleton class object.
pub fn new_class(
    name: Option<String>,
    flavor: ClassFlavor,
    superclass: Value,
    class: Value,
) -> Value {
    Value::Object(Obj::new(
        class,
        ObjKind::Class(ClassBody::new(name, flavor, superclass)),
    ))
}

/// Walk `class` and its superclasses for a method named `name`.
pub fn find_method(class: &Value, name: Symbol) -> Option<Rc<Method>> {
    let mut current = class.clone();
    while let Some(body) = current.as_object().and_then(|o| o.as_class()) {
        if let Some(method) = body.method(name) {
            return Some(method);
        }
        let next = body.superclass();
        current = next;
    }
    None
}

/// Walk `class` and its superclasses for a constant named `name`.
pub fn find_constant(class: &Value, name: Symbol) -> Option<Value> {
    let mut current = class.clone();
    while let Some(body) = current.as_object().and_then(|o| o.as_class()) {
        if let Some(value) = body.constant(name) {
            return Some(value);
        }
        let next = body.superclass();
        current = next;
    }
    None
}

pub fn class_body(value: &Value) -> Option<&ClassBody> {
    value.as_object()?.as_class()
}

/// The singleton class of a heap object, created on first use with the
/// object's current class as superclass. Immediates have none.
///
/// A singleton class is never shared, so an object whose class is already
/// a singleton owns it.
pub fn singleton_class(value: &Value, class_class: &Value) -> Option<Value> {
    let obj = value.as_object()?;
    let current = obj.class();
    if class_body(&current).is_some_and(ClassBody::is_singleton) {
        return Some(current);
    }
    let singleton = new_class(
        None,
        ClassFlavor::Singleton,
        current,
        class_class.clone(),
    );
    obj.set_class(singleton.clone());
    Some(singleton)
}

/// Human-readable class name, following singletons to their first named
/// ancestor.
pub fn class_name(class: &Value) -> String {
    let mut current = class.clone();
    while let Some(body) = class_body(&current) {
        if let Some(name) = &body.name {
            return name.clone();
        }
        let next = body.superclass();
        current = next;
    }
    "?".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolTable;

    fn class(name: &str, superclass: Value) -> Value {
        new_class(Some(name.to_string()), ClassFlavor::Class, superclass, Value::Nil)
    }

    #[test]
    fn methods_resolve_through_superclasses() {
        let symbols = SymbolTable::new();
        let greet = symbols.intern("greet");
        let base = class("Base", Value::Nil);
        let derived = class("Derived", base.clone());
        let method = Method::native(greet, base.clone(), 0, Some(0));
        class_body(&base).unwrap().add_method(greet, method.clone());

        let found = find_method(&derived, greet).expect("inherited method");
        assert!(Rc::ptr_eq(&found, &method));
        assert!(find_method(&derived, symbols.intern("missing")).is_none());
    }

    #[test]
    fn immediates_use_the_root_table() {
        let mut core = CoreClasses::new();
        let fixnum = class("Fixnum", Value::Nil);
        core.set(TypeTag::Fixnum, fixnum.clone());
        assert_eq!(core.class_of(&Value::Fixnum(3)), fixnum);
        assert_eq!(core.class_of(&Value::Nil), Value::Nil);
    }

    #[test]
    fn singleton_class_is_created_once() {
        let base = class("Thing", Value::Nil);
        let core = CoreClasses::new();
        let obj = core.object(base.clone());

        let first = singleton_class(&obj, &Value::Nil).expect("heap object");
        let second = singleton_class(&obj, &Value::Nil).expect("heap object");
        assert_eq!(first, second);
        assert_eq!(class_body(&first).unwrap().superclass(), base);
        assert_eq!(class_name(&first), "Thing");
        assert!(singleton_class(&Value::Fixnum(1), &Value::Nil).is_none());
    }

    #[test]
    fn hash_keys_compare_by_content() {
        let mut core = CoreClasses::new();
        core.set(TypeTag::String, class("String", Value::Nil));
        let hash = core.hash([
            (core.string("a"), Value::Fixnum(1)),
            (core.string("a"), Value::Fixnum(2)),
        ]);
        let pairs = hash.as_object().unwrap().as_hash().unwrap().borrow();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].1, Value::Fixnum(2));
    }
}
