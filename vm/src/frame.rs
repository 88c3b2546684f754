use std::rc::Rc;

use log::debug;
use object::{Block, Method, Value};

use crate::closure::Closure;
use crate::control::{Fault, Outcome};
use crate::exception::ErrorClass;
use crate::Vm;

/// Identity of one activation. Never reused, so an upvalue can tell a live
/// frame from a later one pushed at the same depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u64);

/// One activation record.
pub struct Frame {
    pub id: FrameId,
    pub registers: Vec<Value>,
    pub self_value: Value,
    /// Lexical class: target of `def`, constant and class-variable access.
    pub class: Value,
    /// Block passed to this activation, invoked by `yield`.
    pub closure: Option<Rc<Closure>>,
    /// Closure whose body this frame executes. Set for yield frames only.
    pub running: Option<Rc<Closure>>,
    pub method: Option<Rc<Method>>,
    /// Code being executed, if any. Native frames have none.
    pub block: Option<Rc<Block>>,
    pub pc: usize,
    pub filename: Option<Rc<str>>,
    /// Line used when there is no code to map `pc` through.
    pub line: u32,
}

impl Frame {
    pub fn current_line(&self) -> u32 {
        match &self.block {
            Some(block) => block.line_at(self.pc),
            None => self.line,
        }
    }

    /// Method frame a `return` inside this frame unwinds to.
    pub fn return_home(&self) -> FrameId {
        match &self.running {
            Some(closure) => closure.home,
            None => self.id,
        }
    }
}

impl Vm {
    /// Push a new activation.
    ///
    /// The depth limit is checked before anything is allocated; when it is
    /// reached a `SystemStackError` is raised and the stack is unchanged.
    /// Returns the depth of the new frame.
    pub fn push_frame(
        &mut self,
        self_value: Value,
        class: Value,
        closure: Option<Rc<Closure>>,
    ) -> Outcome<usize> {
        if self.frames.len() >= self.settings.max_frames {
            debug!(
                "frame limit of {} reached, refusing push",
                self.settings.max_frames
            );
            return Err(self.raise(ErrorClass::SystemStackError, "Stack overflow"));
        }

        let (filename, line) = match self.frames.last() {
            Some(caller) => (caller.filename.clone(), caller.current_line()),
            None => (None, 0),
        };
        let id = FrameId(self.next_frame_id);
        self.next_frame_id += 1;
        let depth = self.frames.len();
        if depth == 0 {
            self.top_frame = Some(id);
        }
        self.frames.push(Frame {
            id,
            registers: Vec::new(),
            self_value,
            class,
            closure,
            running: None,
            method: None,
            block: None,
            pc: 0,
            filename,
            line,
        });
        Ok(depth)
    }

    pub fn pop_frame(&mut self) {
        self.frames.pop();
    }

    /// Number of live frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn current_frame(&self) -> Result<&Frame, Fault> {
        self.frames.last().ok_or(Fault::NoFrame)
    }

    pub(crate) fn frame_at(&self, depth: usize) -> Result<&Frame, Fault> {
        self.frames.get(depth).ok_or(Fault::NoFrame)
    }

    pub(crate) fn frame_at_mut(&mut self, depth: usize) -> Result<&mut Frame, Fault> {
        self.frames.get_mut(depth).ok_or(Fault::NoFrame)
    }

    /// Run `body` inside a freshly pushed frame, popping it on every path.
    pub(crate) fn with_frame<T>(
        &mut self,
        self_value: Value,
        class: Value,
        closure: Option<Rc<Closure>>,
        body: impl FnOnce(&mut Vm, usize) -> Outcome<T>,
    ) -> Outcome<T> {
        let depth = self.push_frame(self_value, class, closure)?;
        let result = body(self, depth);
        self.frames.truncate(depth);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VmSettings;

    fn bare_vm(max_frames: usize) -> Vm {
        Vm::new(VmSettings {
            max_frames,
            load_prelude: false,
            ..VmSettings::default()
        })
    }

    #[test]
    fn first_frame_is_top_frame() {
        let mut vm = bare_vm(8);
        let depth = vm.push_frame(Value::Nil, Value::Nil, None).unwrap();
        assert_eq!(depth, 0);
        assert_eq!(vm.top_frame, Some(vm.frames[0].id));
        vm.push_frame(Value::Nil, Value::Nil, None).unwrap();
        assert_eq!(vm.top_frame, Some(vm.frames[0].id));
        assert_ne!(vm.frames[0].id, vm.frames[1].id);
    }

    #[test]
    fn depth_is_checked_before_push() {
        let mut vm = bare_vm(2);
        vm.push_frame(Value::Nil, Value::Nil, None).unwrap();
        vm.push_frame(Value::Nil, Value::Nil, None).unwrap();
        let err = vm.push_frame(Value::Nil, Value::Nil, None).unwrap_err();
        assert_eq!(vm.depth(), 2);
        let exc = err.as_exception().expect("exception");
        assert_eq!(vm.exception_message(exc), "Stack overflow");
        vm.pop_frame();
        vm.pop_frame();
        assert_eq!(vm.depth(), 0);
    }

    #[test]
    fn with_frame_pops_on_error() {
        let mut vm = bare_vm(8);
        let result: Outcome<()> = vm.with_frame(Value::Nil, Value::Nil, None, |vm, _| {
            vm.push_frame(Value::Nil, Value::Nil, None)?;
            Err(Fault::NoFrame.into())
        });
        assert!(result.is_err());
        assert_eq!(vm.depth(), 0);
    }

    #[test]
    fn frame_ids_are_never_reused() {
        let mut vm = bare_vm(8);
        vm.push_frame(Value::Nil, Value::Nil, None).unwrap();
        let first = vm.frames[0].id;
        vm.pop_frame();
        vm.push_frame(Value::Nil, Value::Nil, None).unwrap();
        assert_ne!(vm.frames[0].id, first);
    }
}
