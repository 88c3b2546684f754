//! Compiled code units.
//!
//! A [`Block`] is frozen once materialized, with two exceptions: its inline
//! cache slots and its call-site table. Both are only ever appended to or
//! filled in once, from the single thread running the owning VM.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use bytecode::line_map_lookup;

use crate::method::Method;
use crate::symbol::Symbol;
use crate::value::Value;

/// How a nested block obtains one of its upvalues when a closure over it is
/// created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// Alias a register of the frame creating the closure.
    Local(u16),
    /// Reuse an upvalue of the closure the creating frame is running.
    Upvalue(u16),
}

pub struct Block {
    pub name: String,
    pub filename: Rc<str>,
    pub line: u32,
    pub code: Vec<u8>,
    /// Encoded pc → line map.
    pub lines: Vec<u8>,
    pub constants: Vec<Value>,
    pub strings: Vec<String>,
    pub blocks: Vec<Rc<Block>>,
    /// Declared parameters, counting optional and splat parameters.
    pub argc: u16,
    /// Start offsets past each optional argument's initializer.
    pub defaults: Vec<usize>,
    pub arg_splat: bool,
    pub locals: Vec<String>,
    pub register_count: u16,
    /// Upvalue descriptors consumed when a closure over this block is built.
    pub captures: Vec<Capture>,
    pub caches: InlineCaches,
    pub sites: CallSiteTable,
}

impl Block {
    /// Source line of the instruction at `pc`.
    pub fn line_at(&self, pc: usize) -> u32 {
        line_map_lookup(&self.lines, pc as u32).unwrap_or(self.line)
    }

    /// Number of leading parameters that must always be supplied.
    pub fn required_argc(&self) -> usize {
        (self.argc as usize).saturating_sub(self.defaults.len() + self.arg_splat as usize)
    }
}

/// Per-call-instruction cache state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineCache {
    Uncached,
    Cached { class: Value, site: usize },
}

/// The inline cache slots of one block, one per call instruction.
pub struct InlineCaches {
    slots: RefCell<Vec<InlineCache>>,
}

impl InlineCaches {
    pub fn new(count: usize) -> Self {
        Self {
            slots: RefCell::new(vec![InlineCache::Uncached; count]),
        }
    }

    pub fn get(&self, slot: usize) -> InlineCache {
        self.slots
            .borrow()
            .get(slot)
            .cloned()
            .unwrap_or(InlineCache::Uncached)
    }

    /// Fill an empty slot. A slot that already caches a site is never
    /// replaced; returns whether the slot was filled.
    pub fn install(&self, slot: usize, class: Value, site: usize) -> bool {
        let mut slots = self.slots.borrow_mut();
        match slots.get_mut(slot) {
            Some(entry) if *entry == InlineCache::Uncached => {
                *entry = InlineCache::Cached { class, site };
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A resolved dispatch recorded by `Lookup`.
#[derive(Clone)]
pub struct CallSite {
    pub class: Value,
    pub method: Rc<Method>,
    pub message: Symbol,
    /// Resolution fell back to `method_missing`; the message is passed as
    /// an extra leading argument.
    pub method_missing: bool,
    pub miss: u32,
}

/// Append-only table of call sites. Indices stay valid forever.
pub struct CallSiteTable {
    sites: RefCell<Vec<CallSite>>,
    capacity: Cell<usize>,
}

impl CallSiteTable {
    const INITIAL_CAPACITY: usize = 2;

    pub fn new() -> Self {
        Self {
            sites: RefCell::new(Vec::new()),
            capacity: Cell::new(0),
        }
    }

    /// Append a site, doubling the reserved capacity when full.
    pub fn push(&self, site: CallSite) -> usize {
        let mut sites = self.sites.borrow_mut();
        if sites.len() == self.capacity.get() {
            let grown = match self.capacity.get() {
                0 => Self::INITIAL_CAPACITY,
                n => n * 2,
            };
            let len = sites.len();
            sites.reserve_exact(grown - len);
            self.capacity.set(grown);
        }
        sites.push(site);
        sites.len() - 1
    }

    pub fn get(&self, idx: usize) -> Option<CallSite> {
        self.sites.borrow().get(idx).cloned()
    }

    pub fn record_miss(&self, idx: usize) {
        if let Some(site) = self.sites.borrow_mut().get_mut(idx) {
            site.miss += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.sites.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserved slots, grown geometrically from 2.
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }
}

impl Default for CallSiteTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolTable;

    fn site(symbols: &SymbolTable) -> CallSite {
        let name = symbols.intern("f");
        CallSite {
            class: Value::Nil,
            method: Method::native(name, Value::Nil, 0, Some(0)),
            message: name,
            method_missing: false,
            miss: 0,
        }
    }

    #[test]
    fn call_sites_grow_geometrically() {
        let symbols = SymbolTable::new();
        let table = CallSiteTable::new();
        assert_eq!(table.capacity(), 0);

        let mut capacities = Vec::new();
        for expected in 0..5 {
            assert_eq!(table.push(site(&symbols)), expected);
            capacities.push(table.capacity());
        }
        assert_eq!(capacities, vec![2, 2, 4, 4, 8]);
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn misses_are_counted_per_site() {
        let symbols = SymbolTable::new();
        let table = CallSiteTable::new();
        table.push(site(&symbols));
        table.push(site(&symbols));
        table.record_miss(1);
        table.record_miss(1);
        table.record_miss(7);
        assert_eq!(table.get(0).map(|s| s.miss), Some(0));
        assert_eq!(table.get(1).map(|s| s.miss), Some(2));
    }
}
