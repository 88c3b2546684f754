use std::{collections::HashMap, fmt, rc::Rc};

use parking_lot::RwLock;

/// An interned name. Ids are dense and handed out in interning order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
    pub fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

struct SymbolTableImpl {
    names: Vec<Rc<str>>,
    ids: HashMap<Rc<str>, Symbol>,
}

impl SymbolTableImpl {
    fn new() -> Self {
        Self {
            names: Vec::new(),
            ids: HashMap::new(),
        }
    }

    fn get_or_add(&mut self, name: &str) -> Symbol {
        if let Some(&sym) = self.ids.get(name) {
            return sym;
        }
        let sym = Symbol(self.names.len() as u32);
        let interned = Rc::<str>::from(name);
        self.names.push(interned.clone());
        self.ids.insert(interned, sym);
        sym
    }
}

/// Symbol table shared by every handle cloned from it.
#[derive(Clone)]
pub struct SymbolTable(Rc<RwLock<SymbolTableImpl>>);

impl SymbolTable {
    pub fn new() -> Self {
        Self(Rc::new(RwLock::new(SymbolTableImpl::new())))
    }

    pub fn intern(&self, name: &str) -> Symbol {
        if let Some(&sym) = self.0.read().ids.get(name) {
            return sym;
        }
        self.0.write().get_or_add(name)
    }

    /// The interned text. Symbols minted by another table resolve to `"?"`.
    pub fn name(&self, sym: Symbol) -> Rc<str> {
        self.0
            .read()
            .names
            .get(sym.0 as usize)
            .cloned()
            .unwrap_or_else(|| Rc::from("?"))
    }

    pub fn len(&self) -> usize {
        self.0.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let table = SymbolTable::new();
        let a = table.intern("each");
        let b = table.intern("map");
        assert_ne!(a, b);
        assert_eq!(table.intern("each"), a);
        assert_eq!(&*table.name(b), "map");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn clones_share_the_table() {
        let table = SymbolTable::new();
        let other = table.clone();
        let sym = other.intern("+");
        assert_eq!(table.intern("+"), sym);
    }
}
