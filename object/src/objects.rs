use std::cell::{Ref, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::method::Method;
use crate::symbol::Symbol;
use crate::value::Value;

/// A heap object: a mutable class pointer, an instance-variable table and a
/// kind-specific payload.
pub struct Obj {
    class: RefCell<Value>,
    ivars: RefCell<HashMap<Symbol, Value>>,
    pub kind: ObjKind,
}

pub enum ObjKind {
    Plain,
    Class(ClassBody),
    String(RefCell<String>),
    Array(RefCell<Vec<Value>>),
    /// Insertion-ordered key/value pairs.
    Hash(RefCell<Vec<(Value, Value)>>),
    Range(RangeBody),
}

pub struct RangeBody {
    pub first: Value,
    pub last: Value,
    pub exclusive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassFlavor {
    Class,
    Module,
    /// A per-object class holding singleton methods. Metaclasses of
    /// classes are singletons too.
    Singleton,
}

pub struct ClassBody {
    pub name: Option<String>,
    pub flavor: ClassFlavor,
    superclass: RefCell<Value>,
    methods: RefCell<HashMap<Symbol, Rc<Method>>>,
    consts: RefCell<HashMap<Symbol, Value>>,
}

impl Obj {
    pub fn new(class: Value, kind: ObjKind) -> Rc<Self> {
        Rc::new(Self {
            class: RefCell::new(class),
            ivars: RefCell::new(HashMap::new()),
            kind,
        })
    }

    pub fn class(&self) -> Value {
        self.class.borrow().clone()
    }

    pub fn set_class(&self, class: Value) {
        *self.class.borrow_mut() = class;
    }

    pub fn ivar(&self, name: Symbol) -> Option<Value> {
        self.ivars.borrow().get(&name).cloned()
    }

    pub fn set_ivar(&self, name: Symbol, value: Value) {
        self.ivars.borrow_mut().insert(name, value);
    }

    pub fn ivar_count(&self) -> usize {
        self.ivars.borrow().len()
    }

    pub fn as_class(&self) -> Option<&ClassBody> {
        match &self.kind {
            ObjKind::Class(body) => Some(body),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&RefCell<String>> {
        match &self.kind {
            ObjKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&RefCell<Vec<Value>>> {
        match &self.kind {
            ObjKind::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<&RefCell<Vec<(Value, Value)>>> {
        match &self.kind {
            ObjKind::Hash(pairs) => Some(pairs),
            _ => None,
        }
    }

    pub fn as_range(&self) -> Option<&RangeBody> {
        match &self.kind {
            ObjKind::Range(range) => Some(range),
            _ => None,
        }
    }
}

// Class pointers form cycles (metaclasses, owners), so never recurse.
impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ObjKind::Plain => write!(f, "#<object {:p}>", self),
            ObjKind::Class(body) => match &body.name {
                Some(name) => write!(f, "{name}"),
                None => write!(f, "#<{:?} {:p}>", body.flavor, self),
            },
            ObjKind::String(s) => write!(f, "{:?}", s.borrow()),
            ObjKind::Array(items) => {
                write!(f, "#<array len={}>", items.borrow().len())
            }
            ObjKind::Hash(pairs) => {
                write!(f, "#<hash len={}>", pairs.borrow().len())
            }
            ObjKind::Range(range) => write!(
                f,
                "{:?}{}{:?}",
                range.first,
                if range.exclusive { "..." } else { ".." },
                range.last
            ),
        }
    }
}

impl ClassBody {
    pub fn new(name: Option<String>, flavor: ClassFlavor, superclass: Value) -> Self {
        Self {
            name,
            flavor,
            superclass: RefCell::new(superclass),
            methods: RefCell::new(HashMap::new()),
            consts: RefCell::new(HashMap::new()),
        }
    }

    pub fn is_module(&self) -> bool {
        self.flavor == ClassFlavor::Module
    }

    pub fn is_singleton(&self) -> bool {
        self.flavor == ClassFlavor::Singleton
    }

    pub fn superclass(&self) -> Value {
        self.superclass.borrow().clone()
    }

    pub fn set_superclass(&self, superclass: Value) {
        *self.superclass.borrow_mut() = superclass;
    }

    pub fn method(&self, name: Symbol) -> Option<Rc<Method>> {
        self.methods.borrow().get(&name).cloned()
    }

    pub fn add_method(&self, name: Symbol, method: Rc<Method>) {
        self.methods.borrow_mut().insert(name, method);
    }

    pub fn method_count(&self) -> usize {
        self.methods.borrow().len()
    }

    pub fn constant(&self, name: Symbol) -> Option<Value> {
        self.consts.borrow().get(&name).cloned()
    }

    pub fn set_constant(&self, name: Symbol, value: Value) {
        self.consts.borrow_mut().insert(name, value);
    }
}

/// Position of `key` among insertion-ordered hash pairs.
pub fn hash_position(pairs: &[(Value, Value)], key: &Value) -> Option<usize> {
    pairs.iter().position(|(k, _)| k.eql(key))
}

/// Borrow the string payload of `value`, if it is a string.
pub fn str_of(value: &Value) -> Option<Ref<'_, String>> {
    value.as_object()?.as_string().map(|s| s.borrow())
}
