use object::{str_of, Value};

use crate::control::Outcome;
use crate::exception::ErrorClass;
use crate::primitives::{arg, expect_fixnum, expect_string, normalize_index};
use crate::Vm;

pub fn string_concat(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let mut text = expect_string(vm, &receiver)?;
    text.push_str(&expect_string(vm, &arg(args, 0))?);
    Ok(vm.core.string(text))
}

pub fn string_eq(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let lhs = expect_string(vm, &receiver)?;
    let equal = str_of(&arg(args, 0)).is_some_and(|rhs| *rhs == lhs);
    Ok(Value::bool(equal))
}

pub fn string_length(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let text = expect_string(vm, &receiver)?;
    Ok(Value::Fixnum(text.chars().count() as i64))
}

pub fn string_to_s(_vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    Ok(receiver)
}

pub fn string_inspect(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let text = expect_string(vm, &receiver)?;
    Ok(vm.core.string(quote(&text)))
}

/// Double-quoted source form of `text`.
pub(crate) fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\u{1b}' => out.push_str("\\e"),
            c if c.is_control() => out.push_str(&format!("\\x{:02X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

pub fn string_to_sym(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Outcome<Value> {
    let text = expect_string(vm, &receiver)?;
    Ok(Value::Symbol(vm.symbols.intern(&text)))
}

/// `str[index]`, `str[start, length]` or `str[range]`. Out-of-range
/// starts give `nil`; lengths running past the end are clamped.
pub fn string_at(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let chars: Vec<char> = expect_string(vm, &receiver)?.chars().collect();
    let len = chars.len();
    let slice = match args {
        [index] => match index.as_object().and_then(|obj| obj.as_range()) {
            Some(range) => {
                let first = expect_fixnum(vm, &range.first)?;
                let last = expect_fixnum(vm, &range.last)?;
                let Some(start) = slice_start(first, len) else {
                    return Ok(Value::Nil);
                };
                let mut end = if last < 0 { last + len as i64 } else { last };
                if !range.exclusive {
                    end += 1;
                }
                let count = (end - start as i64).max(0) as usize;
                start..(start + count).min(len)
            }
            None => {
                let index = expect_fixnum(vm, index)?;
                match normalize_index(index, len) {
                    Some(i) => i..i + 1,
                    None => return Ok(Value::Nil),
                }
            }
        },
        [start, count] => {
            let start = expect_fixnum(vm, start)?;
            let count = expect_fixnum(vm, count)?;
            let Some(start) = slice_start(start, len) else {
                return Ok(Value::Nil);
            };
            if count < 0 {
                return Ok(Value::Nil);
            }
            start..start.saturating_add(count as usize).min(len)
        }
        _ => return Err(vm.arity_error(args.len(), 1)),
    };
    let text: String = chars[slice].iter().collect();
    Ok(vm.core.string(text))
}

/// A slice may start exactly at the end and come back empty.
fn slice_start(start: i64, len: usize) -> Option<usize> {
    if start == len as i64 {
        Some(len)
    } else {
        normalize_index(start, len)
    }
}

/// `str << other` appends in place and returns the receiver.
pub fn string_append(vm: &mut Vm, receiver: Value, args: &[Value]) -> Outcome<Value> {
    let suffix = expect_string(vm, &arg(args, 0))?;
    match receiver.as_object().and_then(|obj| obj.as_string()) {
        Some(text) => text.borrow_mut().push_str(&suffix),
        None => {
            return Err(vm.raise(ErrorClass::TypeError, "receiver is not a String"));
        }
    }
    Ok(receiver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_escapes_specials() {
        assert_eq!(quote("ohaie"), "\"ohaie\"");
        assert_eq!(quote("a\"b\\c\n"), "\"a\\\"b\\\\c\\n\"");
    }

    #[test]
    fn slices_may_start_at_the_end() {
        assert_eq!(slice_start(5, 5), Some(5));
        assert_eq!(slice_start(6, 5), None);
        assert_eq!(slice_start(-2, 5), Some(3));
    }
}
