//! The Garnet virtual machine: a register-based bytecode interpreter for a
//! small Ruby-like language.
//!
//! [`Vm`] owns the frame stack, the global and root-class tables and the
//! primitive table. Source text enters through [`Vm::eval`] or
//! [`Vm::load`], is compiled into a [`Block`] and run by the dispatch loop
//! in [`interpreter`].

pub mod bootstrap;
pub mod closure;
pub mod compiler;
pub mod control;
pub mod define;
pub mod disasm;
pub mod dispatch;
pub mod exception;
pub mod frame;
pub mod interpreter;
pub mod materialize;
pub mod primitives;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::rc::Rc;
use std::{panic, thread};

use log::debug;
use object::{
    class_body, class_name, Block, CoreClasses, ObjKind, Symbol, SymbolTable, TypeTag, Value,
};

pub use closure::{Closure, Upvalue};
pub use compiler::CompileError;
pub use control::{Fault, Outcome, Throw, ThrowReason, Unwind};
pub use exception::ErrorClass;
pub use frame::{Frame, FrameId};

use crate::interpreter::activate;
use crate::primitives::PrimitiveDesc;

/// Knobs fixed when a [`Vm`] is created.
#[derive(Debug, Clone)]
pub struct VmSettings {
    /// Frames allowed on the stack before `SystemStackError` is raised.
    /// Deep recursion needs the host stack sized by [`with_vm_stack`].
    pub max_frames: usize,
    /// Evaluate the embedded Ruby prelude during bootstrap.
    pub load_prelude: bool,
    /// Log a disassembly of every compiled unit at `debug` level.
    pub dump_blocks: bool,
}

impl Default for VmSettings {
    fn default() -> Self {
        Self {
            max_frames: 255,
            load_prelude: true,
            dump_blocks: false,
        }
    }
}

/// Dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Full method resolutions: every `LOOKUP` plus operator fallbacks.
    pub resolutions: u64,
    /// Method invocations, native or compiled.
    pub dispatches: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Symbols the interpreter needs on hot paths, interned once.
pub struct Names {
    pub add: Symbol,
    pub sub: Symbol,
    pub lt: Symbol,
    pub neg: Symbol,
    pub not: Symbol,
    pub eq: Symbol,
    pub method_missing: Symbol,
    pub initialize: Symbol,
    pub to_s: Symbol,
    pub inspect: Symbol,
    pub message: Symbol,
    pub backtrace: Symbol,
}

impl Names {
    fn new(symbols: &SymbolTable) -> Self {
        Self {
            add: symbols.intern("+"),
            sub: symbols.intern("-"),
            lt: symbols.intern("<"),
            neg: symbols.intern("-@"),
            not: symbols.intern("!"),
            eq: symbols.intern("=="),
            method_missing: symbols.intern("method_missing"),
            initialize: symbols.intern("initialize"),
            to_s: symbols.intern("to_s"),
            inspect: symbols.intern("inspect"),
            message: symbols.intern("@message"),
            backtrace: symbols.intern("@backtrace"),
        }
    }
}

pub struct Vm {
    pub symbols: SymbolTable,
    pub globals: HashMap<Symbol, Value>,
    pub core: CoreClasses,
    /// Built-in exception classes, indexed by [`ErrorClass`].
    pub errors: Vec<Value>,
    pub kernel: Value,
    /// The top-level `self`.
    pub main: Value,
    pub frames: Vec<Frame>,
    pub(crate) next_frame_id: u64,
    /// Bottom frame of the current run.
    pub top_frame: Option<FrameId>,
    pub names: Names,
    pub primitives: Vec<PrimitiveDesc>,
    pub settings: VmSettings,
    pub stats: DispatchStats,
    out: Box<dyn Write>,
}

impl Vm {
    /// Bootstrap the object model, install primitives and, unless disabled,
    /// evaluate the prelude. Counters start at zero afterwards.
    pub fn new(settings: VmSettings) -> Self {
        let symbols = SymbolTable::new();
        let names = Names::new(&symbols);
        let mut vm = Self {
            symbols,
            globals: HashMap::new(),
            core: CoreClasses::new(),
            errors: vec![Value::Nil; ErrorClass::COUNT],
            kernel: Value::Nil,
            main: Value::Nil,
            frames: Vec::new(),
            next_frame_id: 0,
            top_frame: None,
            names,
            primitives: Vec::new(),
            settings,
            stats: DispatchStats::default(),
            out: Box::new(io::stdout()),
        };
        vm.bootstrap();
        vm.stats = DispatchStats::default();
        vm
    }

    /// Redirect `puts`, `print` and `p`.
    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.out = out;
    }

    pub(crate) fn write_out(&mut self, text: &str) -> Outcome<()> {
        if let Err(err) = self.out.write_all(text.as_bytes()) {
            return Err(self.raise(ErrorClass::SystemCallError, os_message(&err)));
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    // ── entry points ───────────────────────────────────────────────

    /// Parse and compile `source` into a top-level block.
    pub fn compile(&self, source: &str, filename: &str) -> Result<Rc<Block>, CompileError> {
        let program = parser::parse(source)?;
        let desc = compiler::compile_program(&program)?;
        let block = materialize::materialize(&desc, &Rc::from(filename), &self.symbols);
        if self.settings.dump_blocks {
            debug!("{}", disasm::dump_block(&block, &self.symbols));
        }
        Ok(block)
    }

    /// Compile and run `source` at the top level. Compile errors are raised
    /// as `SyntaxError`.
    pub fn eval(&mut self, source: &str, filename: &str) -> Outcome<Value> {
        let block = match self.compile(source, filename) {
            Ok(block) => block,
            Err(err) => {
                return Err(self.raise(
                    ErrorClass::SyntaxError,
                    format!("{filename}:{}: {}", err.line(), err.message()),
                ));
            }
        };
        let main = self.main.clone();
        let class = self.core.get(TypeTag::Object).clone();
        self.run(&block, main, class, Vec::new())
    }

    /// Read and evaluate a source file. An unreadable file raises
    /// `SystemCallError`.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Outcome<Value> {
        let path = path.as_ref();
        let filename = path.display().to_string();
        match fs::read_to_string(path) {
            Ok(source) => self.eval(&source, &filename),
            Err(err) => Err(self.raise(
                ErrorClass::SystemCallError,
                format!("{}: {filename}", os_message(&err)),
            )),
        }
    }

    /// Run `block` in a fresh frame. A `return` that unwinds this far ends
    /// the run with its value.
    pub fn run(
        &mut self,
        block: &Rc<Block>,
        self_value: Value,
        class: Value,
        args: Vec<Value>,
    ) -> Outcome<Value> {
        let result = self.with_frame(self_value, class, None, |vm, depth| {
            activate(vm, depth, block, 0, args)
        });
        match result {
            Err(Unwind::Throw(Throw {
                reason: ThrowReason::Return,
                value,
                ..
            })) => Ok(value),
            Err(Unwind::Throw(Throw {
                reason: ThrowReason::Break,
                ..
            })) => Err(Fault::UnsupportedBreak.into()),
            other => other,
        }
    }

    // ── value helpers ──────────────────────────────────────────────

    /// The class a value reports from `class`: singleton classes skipped.
    pub fn class_of_real(&self, value: &Value) -> Value {
        let mut class = self.core.class_of(value);
        while let Some(body) = class_body(&class) {
            if !body.is_singleton() {
                break;
            }
            let next = body.superclass();
            class = next;
        }
        class
    }

    /// Receiver description used in error messages.
    pub fn describe(&self, value: &Value) -> String {
        let class = class_name(&self.class_of_real(value));
        match value {
            Value::Nil | Value::True | Value::False => {
                format!("{}:{class}", self.render(value, true))
            }
            _ if *value == self.main => format!("main:{class}"),
            Value::Object(obj) => match &obj.kind {
                ObjKind::Plain => format!("an instance of {class}"),
                ObjKind::Class(_) => format!("{}:{class}", self.display(value)),
                _ => format!("{}:{class}", self.render(value, true)),
            },
            _ => format!("{}:{class}", self.render(value, true)),
        }
    }

    /// Text of a value without dispatching any Ruby code.
    pub fn display(&self, value: &Value) -> String {
        self.render(value, false)
    }

    /// `Kernel#inspect` for objects without a specialized `inspect`.
    pub fn inspect_default(&self, value: &Value) -> String {
        match value {
            Value::Object(obj) if matches!(obj.kind, ObjKind::Plain) && *value != self.main => {
                format!("#<{}>", class_name(&self.class_of_real(value)))
            }
            _ => self.render(value, true),
        }
    }

    fn render(&self, value: &Value, quoted: bool) -> String {
        match value {
            Value::Nil if quoted => "nil".to_string(),
            Value::Nil => String::new(),
            Value::True => "true".to_string(),
            Value::False => "false".to_string(),
            Value::Fixnum(n) => n.to_string(),
            Value::Symbol(sym) if quoted => format!(":{}", self.symbols.name(*sym)),
            Value::Symbol(sym) => self.symbols.name(*sym).to_string(),
            Value::Object(_) if *value == self.main => "main".to_string(),
            Value::Object(obj) => match &obj.kind {
                ObjKind::Plain => format!("#<{}>", class_name(&self.class_of_real(value))),
                ObjKind::Class(body) => match &body.name {
                    Some(name) => name.clone(),
                    None => format!("#<Class:{:p}>", Rc::as_ptr(obj)),
                },
                ObjKind::String(text) if quoted => primitives::string::quote(&text.borrow()),
                ObjKind::String(text) => text.borrow().clone(),
                ObjKind::Array(items) => {
                    let parts: Vec<String> =
                        items.borrow().iter().map(|item| self.render(item, true)).collect();
                    format!("[{}]", parts.join(", "))
                }
                ObjKind::Hash(pairs) => {
                    let parts: Vec<String> = pairs
                        .borrow()
                        .iter()
                        .map(|(k, v)| format!("{}=>{}", self.render(k, true), self.render(v, true)))
                        .collect();
                    format!("{{{}}}", parts.join(", "))
                }
                ObjKind::Range(range) => format!(
                    "{}{}{}",
                    self.render(&range.first, true),
                    if range.exclusive { "..." } else { ".." },
                    self.render(&range.last, true)
                ),
            },
        }
    }

    /// `to_s` as Ruby code sees it. Strings answer directly; anything else
    /// is sent `to_s`.
    pub fn to_s(&mut self, value: &Value) -> Outcome<String> {
        if let Some(text) = object::str_of(value) {
            return Ok(text.clone());
        }
        let to_s = self.names.to_s;
        let result = self.send(value.clone(), to_s, Vec::new(), None)?;
        Ok(match object::str_of(&result) {
            Some(text) => text.clone(),
            None => self.inspect_default(value),
        })
    }

    pub fn inspect(&mut self, value: &Value) -> Outcome<String> {
        let inspect = self.names.inspect;
        let result = self.send(value.clone(), inspect, Vec::new(), None)?;
        Ok(match object::str_of(&result) {
            Some(text) => text.clone(),
            None => self.inspect_default(value),
        })
    }

    pub fn reset_stats(&mut self) {
        self.stats = DispatchStats::default();
    }
}

/// Host stack reserved per VM frame by [`with_vm_stack`]. Sized for
/// unoptimized builds, where the call path between two activations is
/// largest.
pub const HOST_STACK_PER_FRAME: usize = 256 * 1024;

const MIN_VM_STACK: usize = 8 * 1024 * 1024;

/// Run `f` on a thread whose stack holds `max_frames` nested activations.
/// Every re-entry into the interpreter pushes a VM frame, so the frame
/// limit raises `SystemStackError` before the host stack runs out.
///
/// The `Vm` must be created inside `f`.
pub fn with_vm_stack<F, R>(max_frames: usize, f: F) -> io::Result<R>
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    let size = max_frames
        .saturating_mul(HOST_STACK_PER_FRAME)
        .max(MIN_VM_STACK);
    thread::scope(|scope| {
        let handle = thread::Builder::new()
            .name("garnet-vm".to_string())
            .stack_size(size)
            .spawn_scoped(scope, f)?;
        match handle.join() {
            Ok(value) => Ok(value),
            Err(payload) => panic::resume_unwind(payload),
        }
    })
}

/// The OS description of an I/O error, without the `(os error N)` suffix.
pub fn os_message(err: &io::Error) -> String {
    let mut text = err.to_string();
    if let Some(at) = text.find(" (os error") {
        text.truncate(at);
    }
    text
}

/// In-memory output sink. Clones share the buffer.
#[derive(Clone, Default)]
pub struct CapturedOutput(Rc<RefCell<Vec<u8>>>);

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm() -> Vm {
        Vm::new(VmSettings {
            load_prelude: false,
            ..VmSettings::default()
        })
    }

    #[test]
    fn os_messages_drop_the_errno() {
        let err = io::Error::from_raw_os_error(2);
        let text = os_message(&err);
        assert!(!text.contains("os error"), "{text}");
        assert!(!text.is_empty());
    }

    #[test]
    fn describe_names_the_class() {
        let vm = vm();
        assert_eq!(vm.describe(&Value::Nil), "nil:NilClass");
        assert_eq!(vm.describe(&Value::False), "false:FalseClass");
        assert_eq!(vm.describe(&Value::Fixnum(3)), "3:Fixnum");
        assert_eq!(vm.describe(&vm.main), "main:Object");
        let s = vm.core.string("hi");
        assert_eq!(vm.describe(&s), "\"hi\":String");
    }

    #[test]
    fn display_renders_containers() {
        let vm = vm();
        let array = vm.core.array(vec![Value::Fixnum(1), vm.core.string("a"), Value::Nil]);
        assert_eq!(vm.display(&array), "[1, \"a\", nil]");
        let range = vm.core.range(Value::Fixnum(1), Value::Fixnum(3), true);
        assert_eq!(vm.display(&range), "1...3");
    }

    #[test]
    fn missing_file_raises_system_call_error() {
        let mut vm = vm();
        let err = vm.load("/definitely/not/here.rb").unwrap_err();
        let exc = err.as_exception().expect("exception").clone();
        assert!(vm.is_error(&exc, ErrorClass::SystemCallError));
        assert!(vm.exception_message(&exc).ends_with(": /definitely/not/here.rb"));
    }

    #[test]
    fn captured_output_is_shared() {
        let out = CapturedOutput::new();
        let mut writer = out.clone();
        writer.write_all(b"ohaie").unwrap();
        assert_eq!(out.contents(), "ohaie");
    }
}
