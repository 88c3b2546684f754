//! Bootstrap of the object model.
//!
//! The five root classes reference each other through superclass and
//! metaclass pointers, so they are allocated bare first and patched
//! afterwards. Everything after that is ordinary class creation.

use log::{debug, error};
use object::{class_body, new_class, ClassFlavor, Method, TypeTag, Value};

use crate::exception::ErrorClass;
use crate::primitives::{default_primitives, Owner};
use crate::Vm;

const PRELUDE: &str = include_str!("prelude.rb");

/// Root classes in allocation order.
const ROOTS: [(TypeTag, &str); 5] = [
    (TypeTag::Method, "Method"),
    (TypeTag::Symbol, "Symbol"),
    (TypeTag::Module, "Module"),
    (TypeTag::Class, "Class"),
    (TypeTag::Object, "Object"),
];

/// Built-in classes created once the roots exist.
const BUILTINS: [(TypeTag, &str); 8] = [
    (TypeTag::Nil, "NilClass"),
    (TypeTag::True, "TrueClass"),
    (TypeTag::False, "FalseClass"),
    (TypeTag::Fixnum, "Fixnum"),
    (TypeTag::String, "String"),
    (TypeTag::Array, "Array"),
    (TypeTag::Hash, "Hash"),
    (TypeTag::Range, "Range"),
];

impl Vm {
    pub(crate) fn bootstrap(&mut self) {
        self.create_roots();

        let kernel = self.new_module(Some("Kernel".to_string()));
        if let Some(object) = class_body(self.core.get(TypeTag::Object)) {
            object.set_superclass(kernel.clone());
        }
        self.kernel = kernel;

        let object = self.core.get(TypeTag::Object).clone();
        for (tag, name) in BUILTINS {
            let class = self.new_class(Some(name.to_string()), object.clone());
            self.core.set(tag, class);
        }

        for class in ErrorClass::ALL {
            let superclass = match class.parent() {
                Some(parent) => self.errors[parent as usize].clone(),
                None => object.clone(),
            };
            self.errors[class as usize] = self.new_class(Some(class.name().to_string()), superclass);
        }

        self.install_primitives();
        self.main = self.core.object(object.clone());
        self.define_constants();
        debug!(
            "bootstrap: {} primitives, {} symbols",
            self.primitives.len(),
            self.symbols.len()
        );

        if self.settings.load_prelude {
            if let Err(unwind) = self.eval(PRELUDE, "prelude.rb") {
                match unwind.as_exception() {
                    Some(exc) => error!("prelude failed: {}", self.format_exception(exc)),
                    None => error!("prelude failed: {unwind:?}"),
                }
            }
        }
    }

    /// Method, Symbol, Module, Class and Object, with Class < Module < Object
    /// and one metaclass each. Object's metaclass inherits from Class.
    fn create_roots(&mut self) {
        for (tag, name) in ROOTS {
            let class = new_class(Some(name.to_string()), ClassFlavor::Class, Value::Nil, Value::Nil);
            self.core.set(tag, class);
        }
        let object = self.core.get(TypeTag::Object).clone();
        let module = self.core.get(TypeTag::Module).clone();
        for tag in [TypeTag::Method, TypeTag::Symbol, TypeTag::Module] {
            if let Some(body) = class_body(self.core.get(tag)) {
                body.set_superclass(object.clone());
            }
        }
        if let Some(body) = class_body(self.core.get(TypeTag::Class)) {
            body.set_superclass(module);
        }

        let class_class = self.core.get(TypeTag::Class).clone();
        for tag in [
            TypeTag::Object,
            TypeTag::Module,
            TypeTag::Class,
            TypeTag::Method,
            TypeTag::Symbol,
        ] {
            let class = self.core.get(tag).clone();
            let meta_super = match class_body(&class).map(|body| body.superclass()) {
                Some(Value::Object(superclass)) => superclass.class(),
                _ => class_class.clone(),
            };
            let meta = new_class(None, ClassFlavor::Singleton, meta_super, class_class.clone());
            if let Some(obj) = class.as_object() {
                obj.set_class(meta);
            }
        }
    }

    fn install_primitives(&mut self) {
        let descs = default_primitives();
        for (index, desc) in descs.iter().enumerate() {
            let owner = match desc.owner {
                Owner::Core(tag) => self.core.get(tag).clone(),
                Owner::Kernel => self.kernel.clone(),
                Owner::Error(class) => self.errors[class as usize].clone(),
            };
            let name = self.symbols.intern(desc.name);
            if let Some(body) = class_body(&owner) {
                body.add_method(name, Method::native(name, owner.clone(), index, desc.arity));
            }
        }
        self.primitives = descs;
    }

    /// Bind every built-in class by name in Object's constant table.
    fn define_constants(&mut self) {
        let mut named: Vec<Value> = ROOTS
            .iter()
            .chain(BUILTINS.iter())
            .map(|(tag, _)| self.core.get(*tag).clone())
            .collect();
        named.push(self.kernel.clone());
        named.extend(self.errors.iter().cloned());

        let object = self.core.get(TypeTag::Object).clone();
        for class in named {
            let Some(name) = class_body(&class).and_then(|body| body.name.clone()) else {
                continue;
            };
            let sym = self.symbols.intern(&name);
            self.const_set(&object, sym, class);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VmSettings;

    fn bare() -> Vm {
        Vm::new(VmSettings {
            load_prelude: false,
            ..VmSettings::default()
        })
    }

    fn superclass(class: &Value) -> Value {
        class_body(class).map(|b| b.superclass()).unwrap_or(Value::Nil)
    }

    #[test]
    fn root_hierarchy() {
        let vm = bare();
        let object = vm.core.get(TypeTag::Object).clone();
        let module = vm.core.get(TypeTag::Module).clone();
        let class = vm.core.get(TypeTag::Class).clone();
        assert_eq!(superclass(&class), module);
        assert_eq!(superclass(&module), object);
        assert_eq!(superclass(&object), vm.kernel);
        assert_eq!(superclass(vm.core.get(TypeTag::Symbol)), object);
    }

    #[test]
    fn metaclasses_parallel_the_hierarchy() {
        let vm = bare();
        let object = vm.core.get(TypeTag::Object).clone();
        let class = vm.core.get(TypeTag::Class).clone();
        let object_meta = vm.core.class_of(&object);
        let class_meta = vm.core.class_of(&class);
        assert!(class_body(&object_meta).is_some_and(|b| b.is_singleton()));
        assert_eq!(superclass(&object_meta), class);
        assert_eq!(vm.class_of_real(&object), class);
        // Class < Module < Object, so the metaclass chain follows it.
        let module_meta = superclass(&class_meta);
        assert_eq!(superclass(&module_meta), object_meta);
    }

    #[test]
    fn builtins_are_bound_as_constants() {
        let vm = bare();
        let object = vm.core.get(TypeTag::Object).clone();
        for name in ["Object", "Kernel", "String", "Fixnum", "NoMethodError", "Exception"] {
            let sym = vm.symbols.intern(name);
            assert!(vm.const_lookup(&object, sym).is_some(), "{name}");
        }
    }

    #[test]
    fn kernel_methods_reach_every_object() {
        let vm = bare();
        let puts = vm.symbols.intern("puts");
        assert!(vm.core.resolve_method(&Value::Fixnum(1), puts).is_some());
        assert!(vm.core.resolve_method(&vm.kernel, puts).is_some());
        assert!(vm.core.resolve_method(&vm.main, puts).is_some());
    }

    #[test]
    fn prelude_loads_cleanly() {
        let vm = Vm::new(VmSettings::default());
        let each = vm.symbols.intern("each");
        let array = vm.core.array(Vec::new());
        assert!(vm.core.resolve_method(&array, each).is_some());
        assert_eq!(vm.stats, crate::DispatchStats::default());
    }
}
