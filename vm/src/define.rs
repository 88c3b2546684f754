//! Class, module and method definition, plus the lexical namespace
//! operations (constants and class variables) they share.

use std::rc::Rc;

use object::{
    class_body, find_constant, new_class, singleton_class, Block, ClassFlavor, Method,
    Symbol, TypeTag, Value,
};

use crate::control::Outcome;
use crate::exception::ErrorClass;
use crate::interpreter::activate;
use crate::Vm;

impl Vm {
    /// Allocate a class together with its metaclass. The metaclass inherits
    /// from the superclass's metaclass so class methods are inherited too.
    pub fn new_class(&self, name: Option<String>, superclass: Value) -> Value {
        let class_class = self.core.get(TypeTag::Class).clone();
        let meta_super = match superclass.as_object() {
            Some(obj) if obj.as_class().is_some() => obj.class(),
            _ => class_class.clone(),
        };
        let meta = new_class(None, ClassFlavor::Singleton, meta_super, class_class);
        new_class(name, ClassFlavor::Class, superclass, meta)
    }

    pub fn new_module(&self, name: Option<String>) -> Value {
        let module_class = self.core.get(TypeTag::Module).clone();
        new_class(name, ClassFlavor::Module, Value::Nil, module_class)
    }

    /// Evaluate a `class`/`module` body, creating the class or module under
    /// the current lexical class first if the name is not yet bound.
    pub fn define_class(
        &mut self,
        depth: usize,
        name: Symbol,
        body: &Rc<Block>,
        is_module: bool,
        superclass: Value,
    ) -> Outcome<Value> {
        let lexical = self.frame_at(depth)?.class.clone();
        let class = match self.const_lookup(&lexical, name) {
            Some(existing) => {
                if class_body(&existing).is_none() {
                    let kind = if is_module { "module" } else { "class" };
                    return Err(self.raise(
                        ErrorClass::TypeError,
                        format!("{} is not a {kind}", self.symbols.name(name)),
                    ));
                }
                existing
            }
            None => {
                let full_name = self.qualified_name(&lexical, name);
                let class = if is_module {
                    self.new_module(Some(full_name))
                } else {
                    let superclass = match superclass {
                        Value::Nil => self.core.get(TypeTag::Object).clone(),
                        other if class_body(&other).is_some_and(|b| !b.is_module()) => other,
                        other => {
                            return Err(self.raise(
                                ErrorClass::TypeError,
                                format!(
                                    "superclass must be a Class ({} given)",
                                    self.describe(&other)
                                ),
                            ));
                        }
                    };
                    self.new_class(Some(full_name), superclass)
                };
                self.const_set(&lexical, name, class.clone());
                class
            }
        };

        self.with_frame(class.clone(), class.clone(), None, |vm, depth| {
            activate(vm, depth, body, 0, Vec::new())
        })?;
        Ok(class)
    }

    /// Install a compiled method on the current lexical class, or on the
    /// singleton class of `receiver` for `def recv.name`. Either way the
    /// body runs with the lexical class of the definition, so constants
    /// and class variables resolve as they do around the `def`.
    pub fn define_method(
        &mut self,
        depth: usize,
        name: Symbol,
        body: Rc<Block>,
        receiver: Option<Value>,
    ) -> Outcome<()> {
        let lexical = self.frame_at(depth)?.class.clone();
        let target = match receiver {
            Some(receiver) => {
                let class_class = self.core.get(TypeTag::Class).clone();
                match singleton_class(&receiver, &class_class) {
                    Some(singleton) => singleton,
                    None => {
                        return Err(self.raise(
                            ErrorClass::TypeError,
                            format!("can't define singleton method for {}", self.describe(&receiver)),
                        ));
                    }
                }
            }
            None => lexical.clone(),
        };
        let Some(class) = class_body(&target) else {
            return Err(self.raise(
                ErrorClass::TypeError,
                format!("no class to define `{}' in", self.symbols.name(name)),
            ));
        };
        class.add_method(name, Method::compiled(name, lexical, body));
        Ok(())
    }

    /// Constant lookup: the lexical class and its ancestors, then the
    /// top-level table held by `Object`.
    pub fn const_lookup(&self, lexical: &Value, name: Symbol) -> Option<Value> {
        find_constant(lexical, name)
            .or_else(|| find_constant(self.core.get(TypeTag::Object), name))
    }

    pub fn const_get(&self, lexical: &Value, name: Symbol) -> Outcome<Value> {
        self.const_lookup(lexical, name).ok_or_else(|| {
            self.raise(
                ErrorClass::NameError,
                format!("uninitialized constant {}", self.symbols.name(name)),
            )
        })
    }

    pub fn const_set(&self, lexical: &Value, name: Symbol, value: Value) {
        let owner = match class_body(lexical) {
            Some(_) => lexical,
            None => self.core.get(TypeTag::Object),
        };
        if let Some(body) = class_body(owner) {
            body.set_constant(name, value);
        }
    }

    /// Class variables live in the ivar table of the class that first set
    /// them; reads and writes search the superclass chain for it.
    pub fn cvar_get(&self, class: &Value, name: Symbol) -> Option<Value> {
        self.cvar_owner(class, name)
            .and_then(|owner| owner.as_object().and_then(|obj| obj.ivar(name)))
    }

    pub fn cvar_set(&self, class: &Value, name: Symbol, value: Value) {
        let owner = self.cvar_owner(class, name).unwrap_or_else(|| class.clone());
        if let Some(obj) = owner.as_object() {
            obj.set_ivar(name, value);
        }
    }

    fn cvar_owner(&self, class: &Value, name: Symbol) -> Option<Value> {
        let mut current = class.clone();
        while let Some(body) = class_body(&current) {
            if current.as_object().and_then(|obj| obj.ivar(name)).is_some() {
                return Some(current);
            }
            let next = body.superclass();
            current = next;
        }
        None
    }

    fn qualified_name(&self, lexical: &Value, name: Symbol) -> String {
        let base = self.symbols.name(name).to_string();
        let object = self.core.get(TypeTag::Object);
        match class_body(lexical).and_then(|body| body.name.as_deref()) {
            Some(outer) if lexical != object => format!("{outer}::{base}"),
            _ => base,
        }
    }
}
