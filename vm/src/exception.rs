//! Exception objects and backtraces.
//!
//! Exceptions are plain objects of one of the bootstrapped error classes
//! carrying `@message` and `@backtrace`. The backtrace is captured when the
//! exception is created, walking from the frame below the raising one down
//! to the top frame.

use object::{class_body, class_name, str_of, Value};

use crate::control::Unwind;
use crate::Vm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Exception,
    ScriptError,
    SyntaxError,
    StandardError,
    ArgumentError,
    RuntimeError,
    TypeError,
    SystemCallError,
    IndexError,
    RangeError,
    ZeroDivisionError,
    LocalJumpError,
    SystemStackError,
    NameError,
    NoMethodError,
}

impl ErrorClass {
    /// Every error class, each listed after its superclass.
    pub const ALL: [ErrorClass; 15] = [
        ErrorClass::Exception,
        ErrorClass::ScriptError,
        ErrorClass::SyntaxError,
        ErrorClass::StandardError,
        ErrorClass::ArgumentError,
        ErrorClass::RuntimeError,
        ErrorClass::TypeError,
        ErrorClass::SystemCallError,
        ErrorClass::IndexError,
        ErrorClass::RangeError,
        ErrorClass::ZeroDivisionError,
        ErrorClass::LocalJumpError,
        ErrorClass::SystemStackError,
        ErrorClass::NameError,
        ErrorClass::NoMethodError,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn name(self) -> &'static str {
        match self {
            ErrorClass::Exception => "Exception",
            ErrorClass::ScriptError => "ScriptError",
            ErrorClass::SyntaxError => "SyntaxError",
            ErrorClass::StandardError => "StandardError",
            ErrorClass::ArgumentError => "ArgumentError",
            ErrorClass::RuntimeError => "RuntimeError",
            ErrorClass::TypeError => "TypeError",
            ErrorClass::SystemCallError => "SystemCallError",
            ErrorClass::IndexError => "IndexError",
            ErrorClass::RangeError => "RangeError",
            ErrorClass::ZeroDivisionError => "ZeroDivisionError",
            ErrorClass::LocalJumpError => "LocalJumpError",
            ErrorClass::SystemStackError => "SystemStackError",
            ErrorClass::NameError => "NameError",
            ErrorClass::NoMethodError => "NoMethodError",
        }
    }

    /// Superclass within the hierarchy; `Exception` derives from `Object`.
    pub fn parent(self) -> Option<ErrorClass> {
        match self {
            ErrorClass::Exception => None,
            ErrorClass::ScriptError
            | ErrorClass::StandardError
            | ErrorClass::SystemStackError => Some(ErrorClass::Exception),
            ErrorClass::SyntaxError => Some(ErrorClass::ScriptError),
            ErrorClass::NoMethodError => Some(ErrorClass::NameError),
            _ => Some(ErrorClass::StandardError),
        }
    }
}

impl Vm {
    /// Create an exception of a built-in class and wrap it for unwinding.
    pub fn raise(&self, class: ErrorClass, message: impl Into<String>) -> Unwind {
        let class = self.errors[class as usize].clone();
        let message = self.core.string(message);
        Unwind::exception(self.new_exception(class, message))
    }

    pub fn new_exception(&self, class: Value, message: Value) -> Value {
        let exception = self.core.object(class);
        if let Some(obj) = exception.as_object() {
            obj.set_ivar(self.names.message, message);
            obj.set_ivar(self.names.backtrace, self.backtrace());
        }
        exception
    }

    /// Describe the live frames, innermost first, skipping the current one.
    pub fn backtrace(&self) -> Value {
        let lines = self
            .frames
            .iter()
            .rev()
            .skip(1)
            .map(|frame| {
                let filename = frame.filename.as_deref().unwrap_or("?");
                let line = frame.current_line();
                let text = match &frame.method {
                    Some(method) => format!(
                        "\tfrom {filename}:{line}:in `{}'",
                        self.symbols.name(method.name)
                    ),
                    None => format!("\tfrom {filename}:{line}"),
                };
                self.core.string(text)
            })
            .collect();
        self.core.array(lines)
    }

    pub fn exception_message(&self, exception: &Value) -> String {
        let message = exception
            .as_object()
            .and_then(|obj| obj.ivar(self.names.message));
        match message {
            Some(message) => match str_of(&message) {
                Some(text) => text.clone(),
                None => self.display(&message),
            },
            None => String::new(),
        }
    }

    pub fn exception_backtrace(&self, exception: &Value) -> Vec<String> {
        let Some(trace) = exception
            .as_object()
            .and_then(|obj| obj.ivar(self.names.backtrace))
        else {
            return Vec::new();
        };
        let Some(items) = trace.as_object().and_then(|obj| obj.as_array()) else {
            return Vec::new();
        };
        items
            .borrow()
            .iter()
            .filter_map(|line| str_of(line).map(|s| s.clone()))
            .collect()
    }

    /// Report an uncaught exception: class and message, then one line per
    /// backtrace entry.
    pub fn format_exception(&self, exception: &Value) -> String {
        let class = self.class_of_real(exception);
        let mut out = format!(
            "{}: {}\n",
            class_name(&class),
            self.exception_message(exception)
        );
        for line in self.exception_backtrace(exception) {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }

    /// Whether `value` is an instance of the built-in `class` or one of its
    /// subclasses.
    pub fn is_error(&self, value: &Value, class: ErrorClass) -> bool {
        let target = &self.errors[class as usize];
        let mut current = self.core.class_of(value);
        while let Some(body) = class_body(&current) {
            if current == *target {
                return true;
            }
            let next = body.superclass();
            current = next;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_lists_parents_first() {
        for (i, class) in ErrorClass::ALL.iter().enumerate() {
            assert_eq!(*class as usize, i);
            if let Some(parent) = class.parent() {
                let parent_pos = ErrorClass::ALL.iter().position(|c| *c == parent);
                assert!(parent_pos.is_some_and(|p| p < i), "{}", class.name());
            }
        }
    }

    #[test]
    fn no_method_error_is_a_name_error() {
        assert_eq!(ErrorClass::NoMethodError.parent(), Some(ErrorClass::NameError));
        assert_eq!(ErrorClass::SyntaxError.parent(), Some(ErrorClass::ScriptError));
        assert_eq!(ErrorClass::Exception.parent(), None);
    }
}
