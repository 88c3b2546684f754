use object::{class_name, Value};

use crate::control::{Outcome, Unwind};
use crate::exception::ErrorClass;
use crate::primitives::{arg, expect_fixnum};
use crate::Vm;

fn operand(vm: &Vm, args: &[Value]) -> Outcome<i64> {
    let rhs = arg(args, 0);
    rhs.as_fixnum().ok_or_else(|| {
        let name = match rhs {
            Value::Nil => "nil".to_string(),
            ref other => class_name(&vm.class_of_real(other)),
        };
        vm.raise(
            ErrorClass::TypeError,
            format!("{name} can't be coerced into Fixnum"),
        )
    })
}

fn overflow(vm: &Vm) -> Unwind {
    vm.raise(ErrorClass::RangeError, "fixnum overflow")
}

fn checked(vm: &Vm, result: Option<i64>) -> Outcome<Value> {
    result.map(Value::Fixnum).ok_or_else(|| overflow(vm))
}

pub fn fixnum_add(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let (a, b) = (expect_fixnum(vm, &receiver)?, operand(vm, args)?);
    checked(vm, a.checked_add(b))
}

pub fn fixnum_sub(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let (a, b) = (expect_fixnum(vm, &receiver)?, operand(vm, args)?);
    checked(vm, a.checked_sub(b))
}

pub fn fixnum_mul(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let (a, b) = (expect_fixnum(vm, &receiver)?, operand(vm, args)?);
    checked(vm, a.checked_mul(b))
}

/// Division rounds toward negative infinity.
pub fn fixnum_div(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let (a, b) = (expect_fixnum(vm, &receiver)?, operand(vm, args)?);
    if b == 0 {
        return Err(vm.raise(ErrorClass::ZeroDivisionError, "divided by 0"));
    }
    checked(vm, floor_div(a, b))
}

/// The result takes the sign of the divisor.
pub fn fixnum_mod(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let (a, b) = (expect_fixnum(vm, &receiver)?, operand(vm, args)?);
    if b == 0 {
        return Err(vm.raise(ErrorClass::ZeroDivisionError, "divided by 0"));
    }
    checked(vm, floor_mod(a, b))
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && (a < 0) != (b < 0) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && (r < 0) != (b < 0) {
        Some(r + b)
    } else {
        Some(r)
    }
}

pub fn fixnum_lt(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let (a, b) = (expect_fixnum(vm, &receiver)?, operand(vm, args)?);
    Ok(Value::bool(a < b))
}

pub fn fixnum_gt(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let (a, b) = (expect_fixnum(vm, &receiver)?, operand(vm, args)?);
    Ok(Value::bool(a > b))
}

pub fn fixnum_le(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let (a, b) = (expect_fixnum(vm, &receiver)?, operand(vm, args)?);
    Ok(Value::bool(a <= b))
}

pub fn fixnum_ge(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let (a, b) = (expect_fixnum(vm, &receiver)?, operand(vm, args)?);
    Ok(Value::bool(a >= b))
}

pub fn fixnum_eq(_vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    Ok(Value::bool(receiver == arg(args, 0)))
}

pub fn fixnum_neg(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let a = expect_fixnum(vm, &receiver)?;
    checked(vm, a.checked_neg())
}

pub fn fixnum_to_s(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let a = expect_fixnum(vm, &receiver)?;
    Ok(vm.core.string(a.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn division_floors() {
        assert_eq!(floor_div(7, 2), Some(3));
        assert_eq!(floor_div(-7, 2), Some(-4));
        assert_eq!(floor_div(7, -2), Some(-4));
        assert_eq!(floor_div(-8, 2), Some(-4));
        assert_eq!(floor_div(i64::MIN, -1), None);
    }

    #[test]
    fn modulo_follows_divisor_sign() {
        assert_eq!(floor_mod(7, 3), Some(1));
        assert_eq!(floor_mod(-7, 3), Some(2));
        assert_eq!(floor_mod(7, -3), Some(-2));
        assert_eq!(floor_mod(6, 3), Some(0));
    }
}
