use std::rc::Rc;

use object::{Block, CallSiteTable, InlineCaches, SymbolTable, Value};

use crate::compiler::{CodeDesc, ConstEntry};

// ── Environment ─────────────────────────────────────────────────────

struct MaterializeEnv<'a> {
    filename: &'a Rc<str>,
    symbols: &'a SymbolTable,
}

impl MaterializeEnv<'_> {
    fn materialize_block(&self, desc: &CodeDesc) -> Rc<Block> {
        let constants = desc
            .constants
            .iter()
            .map(|entry| self.materialize_const(entry))
            .collect();
        let blocks = desc
            .blocks
            .iter()
            .map(|nested| self.materialize_block(nested))
            .collect();

        Rc::new(Block {
            name: desc.name.clone(),
            filename: self.filename.clone(),
            line: desc.line,
            code: desc.bytecode.clone(),
            lines: desc.line_map.clone(),
            constants,
            strings: desc.strings.clone(),
            blocks,
            argc: desc.argc,
            defaults: desc.defaults.clone(),
            arg_splat: desc.arg_splat,
            locals: desc.locals.clone(),
            register_count: desc.register_count,
            captures: desc.captures.clone(),
            caches: InlineCaches::new(desc.cache_count as usize),
            sites: CallSiteTable::new(),
        })
    }

    fn materialize_const(&self, entry: &ConstEntry) -> Value {
        match entry {
            ConstEntry::Fixnum(n) => Value::Fixnum(*n),
            ConstEntry::Symbol(name) => Value::Symbol(self.symbols.intern(name)),
        }
    }
}

// ── Public API ──────────────────────────────────────────────────────

/// Materialize a [`CodeDesc`] tree into runtime blocks, interning symbol
/// constants and giving every block an empty cache vector sized to its
/// call sites.
pub fn materialize(desc: &CodeDesc, filename: &Rc<str>, symbols: &SymbolTable) -> Rc<Block> {
    MaterializeEnv { filename, symbols }.materialize_block(desc)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_program;

    fn build(source: &str) -> (Rc<Block>, SymbolTable) {
        let symbols = SymbolTable::new();
        let desc = compile_program(&parser::parse(source).expect("parse")).expect("compile");
        (materialize(&desc, &Rc::from("test.rb"), &symbols), symbols)
    }

    #[test]
    fn materialize_symbol() {
        let (block, symbols) = build(":abc");
        assert_eq!(block.constants, vec![Value::Symbol(symbols.intern("abc"))]);
    }

    #[test]
    fn materialize_fixnum_dedup() {
        let (block, _) = build("x = 42\ny = 42\nx");
        assert_eq!(block.constants, vec![Value::Fixnum(42)]);
    }

    #[test]
    fn materialize_nested_blocks() {
        let (block, _) = build("def f\n  [1].each { |x| x }\nend");
        assert_eq!(block.blocks.len(), 1);
        let method = &block.blocks[0];
        assert_eq!(method.name, "f");
        assert_eq!(&*method.filename, "test.rb");
        assert_eq!(method.blocks[0].name, "block in f");
        assert_eq!(method.caches.len(), 1);
    }

    #[test]
    fn caches_start_empty() {
        let (block, _) = build("puts 1\nputs 2");
        assert_eq!(block.caches.len(), 2);
        assert_eq!(block.caches.get(0), object::InlineCache::Uncached);
        assert_eq!(block.sites.len(), 0);
    }
}
