//! Human-readable listings of compiled blocks, used by `--dump-bytecode`.

use std::fmt::Write;

use bytecode::BytecodeDecoder;
use object::{Block, Capture, SymbolTable, Value};

/// Render `block` and every block nested in it.
pub fn dump_block(block: &Block, symbols: &SymbolTable) -> String {
    let mut out = String::new();
    dump_block_inner(&mut out, block, symbols, 0);
    out
}

fn dump_block_inner(out: &mut String, block: &Block, symbols: &SymbolTable, indent: usize) {
    let pad = " ".repeat(indent);
    let _ = writeln!(
        out,
        "{pad}== {} ({}:{}) argc={} defaults={} splat={} registers={} caches={}",
        block.name,
        block.filename,
        block.line,
        block.argc,
        block.defaults.len(),
        block.arg_splat,
        block.register_count,
        block.caches.len(),
    );
    if !block.locals.is_empty() {
        let _ = writeln!(out, "{pad}-- locals: {}", block.locals.join(", "));
    }
    if !block.captures.is_empty() {
        let captures: Vec<String> = block
            .captures
            .iter()
            .map(|c| match c {
                Capture::Local(reg) => format!("r{reg}"),
                Capture::Upvalue(idx) => format!("^{idx}"),
            })
            .collect();
        let _ = writeln!(out, "{pad}-- captures: {}", captures.join(", "));
    }
    if !block.constants.is_empty() {
        let _ = writeln!(out, "{pad}-- constants --");
        for (idx, value) in block.constants.iter().enumerate() {
            let _ = writeln!(out, "{pad}[{idx}] {}", format_constant(value, symbols));
        }
    }
    if !block.strings.is_empty() {
        let _ = writeln!(out, "{pad}-- strings --");
        for (idx, text) in block.strings.iter().enumerate() {
            let _ = writeln!(out, "{pad}\"{idx}\" {text:?}");
        }
    }

    let _ = writeln!(out, "{pad}-- code --");
    let mut last_line = None;
    for decoded in BytecodeDecoder::new(&block.code) {
        match decoded {
            Ok((pc, instruction)) => {
                let line = block.line_at(pc);
                let marker = if last_line == Some(line) {
                    "    ".to_string()
                } else {
                    format!("{line:>4}")
                };
                last_line = Some(line);
                let _ = writeln!(out, "{pad}{pc:04} {marker}  {instruction}");
            }
            Err(err) => {
                let _ = writeln!(out, "{pad}!! {err}");
            }
        }
    }

    for nested in &block.blocks {
        dump_block_inner(out, nested, symbols, indent + 4);
    }
}

fn format_constant(value: &Value, symbols: &SymbolTable) -> String {
    match value {
        Value::Symbol(sym) => format!(":{}", symbols.name(*sym)),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::compiler::compile_program;
    use crate::materialize::materialize;

    #[test]
    fn listing_includes_nested_blocks() {
        let symbols = SymbolTable::new();
        let program = parser::parse("def f(a)\n  a + 1\nend\nf 2").expect("parse");
        let desc = compile_program(&program).expect("compile");
        let block = materialize(&desc, &Rc::from("t.rb"), &symbols);
        let listing = dump_block(&block, &symbols);
        assert!(listing.contains("== <main> (t.rb:1)"), "{listing}");
        assert!(listing.contains("    == f (t.rb:1) argc=1"), "{listing}");
        assert!(listing.contains(":f"), "{listing}");
        assert!(listing.contains("Lookup"), "{listing}");
        assert!(listing.contains("Add"), "{listing}");
    }
}
