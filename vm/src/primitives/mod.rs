use std::cell::RefCell;

use object::{str_of, TypeTag, Value};

use crate::control::Outcome;
use crate::exception::ErrorClass;
use crate::Vm;

pub mod array;
pub mod class;
pub mod exception;
pub mod fixnum;
pub mod hash;
pub mod kernel;
pub mod range;
pub mod string;
pub mod symbol;

pub type PrimitiveFn = fn(&mut Vm, Value, &[Value]) -> Outcome<Value>;

/// Where a primitive gets installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Core(TypeTag),
    Kernel,
    Error(ErrorClass),
}

#[derive(Clone, Copy)]
pub struct PrimitiveDesc {
    pub owner: Owner,
    pub name: &'static str,
    /// `None` for primitives that check their own arguments.
    pub arity: Option<u8>,
    pub func: PrimitiveFn,
}

impl PrimitiveDesc {
    pub const fn new(
        owner: Owner,
        name: &'static str,
        arity: u8,
        func: PrimitiveFn,
    ) -> Self {
        Self {
            owner,
            name,
            arity: Some(arity),
            func,
        }
    }

    pub const fn variadic(
        owner: Owner,
        name: &'static str,
        func: PrimitiveFn,
    ) -> Self {
        Self {
            owner,
            name,
            arity: None,
            func,
        }
    }
}

const KERNEL: Owner = Owner::Kernel;
const MODULE: Owner = Owner::Core(TypeTag::Module);
const CLASS: Owner = Owner::Core(TypeTag::Class);
const SYMBOL: Owner = Owner::Core(TypeTag::Symbol);
const NIL: Owner = Owner::Core(TypeTag::Nil);
const TRUE: Owner = Owner::Core(TypeTag::True);
const FALSE: Owner = Owner::Core(TypeTag::False);
const FIXNUM: Owner = Owner::Core(TypeTag::Fixnum);
const STRING: Owner = Owner::Core(TypeTag::String);
const ARRAY: Owner = Owner::Core(TypeTag::Array);
const HASH: Owner = Owner::Core(TypeTag::Hash);
const RANGE: Owner = Owner::Core(TypeTag::Range);
const EXCEPTION: Owner = Owner::Error(ErrorClass::Exception);

pub fn default_primitives() -> Vec<PrimitiveDesc> {
    vec![
        PrimitiveDesc::variadic(KERNEL, "puts", kernel::kernel_puts),
        PrimitiveDesc::variadic(KERNEL, "print", kernel::kernel_print),
        PrimitiveDesc::variadic(KERNEL, "p", kernel::kernel_p),
        PrimitiveDesc::variadic(KERNEL, "raise", kernel::kernel_raise),
        PrimitiveDesc::new(KERNEL, "class", 0, kernel::kernel_class),
        PrimitiveDesc::new(KERNEL, "inspect", 0, kernel::kernel_inspect),
        PrimitiveDesc::new(KERNEL, "to_s", 0, kernel::kernel_to_s),
        PrimitiveDesc::new(KERNEL, "==", 1, kernel::kernel_eq),
        PrimitiveDesc::new(KERNEL, "!=", 1, kernel::kernel_ne),
        PrimitiveDesc::new(KERNEL, "equal?", 1, kernel::kernel_eq),
        PrimitiveDesc::new(KERNEL, "nil?", 0, kernel::kernel_nil_p),
        PrimitiveDesc::new(KERNEL, "respond_to?", 1, kernel::kernel_respond_to),
        PrimitiveDesc::new(KERNEL, "block_given?", 0, kernel::kernel_block_given),
        PrimitiveDesc::new(KERNEL, "initialize", 0, kernel::kernel_initialize),
        PrimitiveDesc::variadic(
            KERNEL,
            "method_missing",
            kernel::kernel_method_missing,
        ),
        PrimitiveDesc::new(NIL, "to_s", 0, kernel::nil_to_s),
        PrimitiveDesc::new(NIL, "inspect", 0, kernel::nil_inspect),
        PrimitiveDesc::new(NIL, "nil?", 0, kernel::nil_nil_p),
        PrimitiveDesc::new(TRUE, "to_s", 0, kernel::bool_to_s),
        PrimitiveDesc::new(TRUE, "inspect", 0, kernel::bool_to_s),
        PrimitiveDesc::new(FALSE, "to_s", 0, kernel::bool_to_s),
        PrimitiveDesc::new(FALSE, "inspect", 0, kernel::bool_to_s),
        PrimitiveDesc::variadic(CLASS, "new", class::class_new),
        PrimitiveDesc::new(CLASS, "allocate", 0, class::class_allocate),
        PrimitiveDesc::new(CLASS, "superclass", 0, class::class_superclass),
        PrimitiveDesc::new(MODULE, "name", 0, class::module_name),
        PrimitiveDesc::new(MODULE, "to_s", 0, class::module_name),
        PrimitiveDesc::new(MODULE, "inspect", 0, class::module_name),
        PrimitiveDesc::variadic(
            EXCEPTION,
            "initialize",
            exception::exception_initialize,
        ),
        PrimitiveDesc::new(EXCEPTION, "message", 0, exception::exception_message),
        PrimitiveDesc::new(EXCEPTION, "to_s", 0, exception::exception_message),
        PrimitiveDesc::new(
            EXCEPTION,
            "backtrace",
            0,
            exception::exception_backtrace,
        ),
        PrimitiveDesc::new(EXCEPTION, "inspect", 0, exception::exception_inspect),
        PrimitiveDesc::new(FIXNUM, "+", 1, fixnum::fixnum_add),
        PrimitiveDesc::new(FIXNUM, "-", 1, fixnum::fixnum_sub),
        PrimitiveDesc::new(FIXNUM, "*", 1, fixnum::fixnum_mul),
        PrimitiveDesc::new(FIXNUM, "/", 1, fixnum::fixnum_div),
        PrimitiveDesc::new(FIXNUM, "%", 1, fixnum::fixnum_mod),
        PrimitiveDesc::new(FIXNUM, "<", 1, fixnum::fixnum_lt),
        PrimitiveDesc::new(FIXNUM, ">", 1, fixnum::fixnum_gt),
        PrimitiveDesc::new(FIXNUM, "<=", 1, fixnum::fixnum_le),
        PrimitiveDesc::new(FIXNUM, ">=", 1, fixnum::fixnum_ge),
        PrimitiveDesc::new(FIXNUM, "==", 1, fixnum::fixnum_eq),
        PrimitiveDesc::new(FIXNUM, "-@", 0, fixnum::fixnum_neg),
        PrimitiveDesc::new(FIXNUM, "to_s", 0, fixnum::fixnum_to_s),
        PrimitiveDesc::new(FIXNUM, "inspect", 0, fixnum::fixnum_to_s),
        PrimitiveDesc::new(STRING, "+", 1, string::string_concat),
        PrimitiveDesc::new(STRING, "==", 1, string::string_eq),
        PrimitiveDesc::new(STRING, "length", 0, string::string_length),
        PrimitiveDesc::new(STRING, "size", 0, string::string_length),
        PrimitiveDesc::new(STRING, "to_s", 0, string::string_to_s),
        PrimitiveDesc::new(STRING, "inspect", 0, string::string_inspect),
        PrimitiveDesc::new(STRING, "to_sym", 0, string::string_to_sym),
        PrimitiveDesc::variadic(STRING, "[]", string::string_at),
        PrimitiveDesc::new(STRING, "<<", 1, string::string_append),
        PrimitiveDesc::new(SYMBOL, "to_s", 0, symbol::symbol_to_s),
        PrimitiveDesc::new(SYMBOL, "inspect", 0, symbol::symbol_inspect),
        PrimitiveDesc::new(ARRAY, "size", 0, array::array_size),
        PrimitiveDesc::new(ARRAY, "length", 0, array::array_size),
        PrimitiveDesc::new(ARRAY, "[]", 1, array::array_at),
        PrimitiveDesc::new(ARRAY, "[]=", 2, array::array_at_put),
        PrimitiveDesc::new(ARRAY, "<<", 1, array::array_push),
        PrimitiveDesc::variadic(ARRAY, "push", array::array_push_all),
        PrimitiveDesc::new(ARRAY, "pop", 0, array::array_pop),
        PrimitiveDesc::new(ARRAY, "first", 0, array::array_first),
        PrimitiveDesc::new(ARRAY, "last", 0, array::array_last),
        PrimitiveDesc::new(ARRAY, "==", 1, array::array_eq),
        PrimitiveDesc::new(ARRAY, "inspect", 0, array::array_inspect),
        PrimitiveDesc::new(ARRAY, "to_s", 0, array::array_inspect),
        PrimitiveDesc::variadic(ARRAY, "join", array::array_join),
        PrimitiveDesc::new(HASH, "[]", 1, hash::hash_at),
        PrimitiveDesc::new(HASH, "[]=", 2, hash::hash_at_put),
        PrimitiveDesc::new(HASH, "keys", 0, hash::hash_keys),
        PrimitiveDesc::new(HASH, "size", 0, hash::hash_size),
        PrimitiveDesc::new(HASH, "delete", 1, hash::hash_delete),
        PrimitiveDesc::new(HASH, "has_key?", 1, hash::hash_has_key),
        PrimitiveDesc::new(HASH, "inspect", 0, hash::hash_inspect),
        PrimitiveDesc::new(HASH, "to_s", 0, hash::hash_inspect),
        PrimitiveDesc::new(RANGE, "first", 0, range::range_first),
        PrimitiveDesc::new(RANGE, "last", 0, range::range_last),
        PrimitiveDesc::new(RANGE, "exclude_end?", 0, range::range_exclude_end),
        PrimitiveDesc::new(RANGE, "to_a", 0, range::range_to_a),
        PrimitiveDesc::new(RANGE, "inspect", 0, range::range_inspect),
        PrimitiveDesc::new(RANGE, "to_s", 0, range::range_inspect),
    ]
}

// ── argument helpers ───────────────────────────────────────────────

/// The `i`th argument, `nil` if absent.
pub(crate) fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Nil)
}

pub(crate) fn expect_fixnum(vm: &Vm, value: &Value) -> Outcome<i64> {
    value
        .as_fixnum()
        .ok_or_else(|| type_error(vm, value, "Fixnum"))
}

pub(crate) fn expect_string(vm: &Vm, value: &Value) -> Outcome<String> {
    match str_of(value) {
        Some(s) => Ok(s.clone()),
        None => Err(type_error(vm, value, "String")),
    }
}

pub(crate) fn expect_array<'a>(
    vm: &Vm,
    value: &'a Value,
) -> Outcome<&'a RefCell<Vec<Value>>> {
    value
        .as_object()
        .and_then(|obj| obj.as_array())
        .ok_or_else(|| type_error(vm, value, "Array"))
}

pub(crate) fn expect_hash<'a>(
    vm: &Vm,
    value: &'a Value,
) -> Outcome<&'a RefCell<Vec<(Value, Value)>>> {
    value
        .as_object()
        .and_then(|obj| obj.as_hash())
        .ok_or_else(|| type_error(vm, value, "Hash"))
}

pub(crate) fn type_error(
    vm: &Vm,
    got: &Value,
    expected: &str,
) -> crate::control::Unwind {
    let got = match got {
        Value::Nil => "nil".to_string(),
        Value::True => "true".to_string(),
        Value::False => "false".to_string(),
        other => object::class_name(&vm.class_of_real(other)),
    };
    vm.raise(
        ErrorClass::TypeError,
        format!("no implicit conversion of {got} into {expected}"),
    )
}

/// Resolve a possibly negative index against a length.
pub(crate) fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_indices_count_from_the_end() {
        assert_eq!(normalize_index(0, 3), Some(0));
        assert_eq!(normalize_index(-1, 3), Some(2));
        assert_eq!(normalize_index(-3, 3), Some(0));
        assert_eq!(normalize_index(-4, 3), None);
        assert_eq!(normalize_index(3, 3), None);
        assert_eq!(normalize_index(0, 0), None);
    }

    #[test]
    fn primitive_names_are_unique_per_owner() {
        let prims = default_primitives();
        for (i, a) in prims.iter().enumerate() {
            for b in &prims[i + 1..] {
                assert!(
                    !(a.owner == b.owner && a.name == b.name),
                    "duplicate primitive {}",
                    a.name
                );
            }
        }
    }
}
