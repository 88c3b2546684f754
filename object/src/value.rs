use std::fmt;
use std::rc::Rc;

use crate::objects::{Obj, ObjKind};
use crate::symbol::Symbol;

/// A runtime value.
///
/// Immediates (`nil`, `true`, `false`, fixnums, symbols) are stored inline.
/// Everything else is a reference-counted heap [`Obj`] carrying a class
/// pointer and an instance-variable table.
#[derive(Clone)]
pub enum Value {
    Nil,
    True,
    False,
    Fixnum(i64),
    Symbol(Symbol),
    Object(Rc<Obj>),
}

/// Primitive type tags, used to index the root-class table for values that
/// carry no class pointer of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeTag {
    Method,
    Symbol,
    Module,
    Class,
    Object,
    Nil,
    True,
    False,
    Fixnum,
    String,
    Array,
    Hash,
    Range,
}

impl TypeTag {
    pub const COUNT: usize = TypeTag::Range as usize + 1;
}

impl Value {
    #[inline(always)]
    pub fn bool(value: bool) -> Self {
        if value { Value::True } else { Value::False }
    }

    /// Everything except `nil` and `false` is truthy, including `0`.
    #[inline(always)]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::False)
    }

    #[inline(always)]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    #[inline(always)]
    pub fn is_immediate(&self) -> bool {
        !matches!(self, Value::Object(_))
    }

    #[inline(always)]
    pub fn as_fixnum(&self) -> Option<i64> {
        match self {
            Value::Fixnum(n) => Some(*n),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_symbol(&self) -> Option<Symbol> {
        match self {
            Value::Symbol(s) => Some(*s),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_object(&self) -> Option<&Rc<Obj>> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Nil => TypeTag::Nil,
            Value::True => TypeTag::True,
            Value::False => TypeTag::False,
            Value::Fixnum(_) => TypeTag::Fixnum,
            Value::Symbol(_) => TypeTag::Symbol,
            Value::Object(obj) => match &obj.kind {
                ObjKind::Plain => TypeTag::Object,
                ObjKind::Class(body) if body.is_module() => TypeTag::Module,
                ObjKind::Class(_) => TypeTag::Class,
                ObjKind::String(_) => TypeTag::String,
                ObjKind::Array(_) => TypeTag::Array,
                ObjKind::Hash(_) => TypeTag::Hash,
                ObjKind::Range(_) => TypeTag::Range,
            },
        }
    }

    /// Content equality used for hash keys: immediates by value, strings by
    /// contents, everything else by identity.
    pub fn eql(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => match (&a.kind, &b.kind) {
                (ObjKind::String(x), ObjKind::String(y)) => {
                    *x.borrow() == *y.borrow()
                }
                _ => Rc::ptr_eq(a, b),
            },
            _ => self == other,
        }
    }
}

/// Identity: immediates compare by value, heap objects by address.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil)
            | (Value::True, Value::True)
            | (Value::False, Value::False) => true,
            (Value::Fixnum(a), Value::Fixnum(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Fixnum(value)
    }
}

impl From<Symbol> for Value {
    fn from(value: Symbol) -> Self {
        Value::Symbol(value)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::True => write!(f, "true"),
            Value::False => write!(f, "false"),
            Value::Fixnum(n) => write!(f, "{n}"),
            Value::Symbol(s) => write!(f, "{s:?}"),
            Value::Object(obj) => write!(f, "{obj:?}"),
        }
    }
}
