mod block;
mod lookup;
mod method;
mod objects;
mod symbol;
mod value;

pub use block::{Block, CallSite, CallSiteTable, Capture, InlineCache, InlineCaches};
pub use lookup::{
    CoreClasses, class_body, class_name, find_constant, find_method, new_class,
    singleton_class,
};
pub use method::{CallConvention, Method, MethodBody};
pub use objects::{
    ClassBody, ClassFlavor, Obj, ObjKind, RangeBody, hash_position, str_of,
};
pub use symbol::{Symbol, SymbolTable};
pub use value::{TypeTag, Value};

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;

    fn empty_block(argc: u16, defaults: Vec<usize>, arg_splat: bool) -> Rc<Block> {
        Rc::new(Block {
            name: "test".into(),
            filename: Rc::from("test.rb"),
            line: 1,
            code: Vec::new(),
            lines: Vec::new(),
            constants: Vec::new(),
            strings: Vec::new(),
            blocks: Vec::new(),
            argc,
            defaults,
            arg_splat,
            locals: Vec::new(),
            register_count: argc,
            captures: Vec::new(),
            caches: InlineCaches::new(2),
            sites: CallSiteTable::new(),
        })
    }

    // ── Values ─────────────────────────────────────────────────────

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::False.is_truthy());
        assert!(Value::True.is_truthy());
        assert!(Value::Fixnum(0).is_truthy());
    }

    #[test]
    fn identity_equality() {
        let core = CoreClasses::new();
        let a = core.string("x");
        let b = core.string("x");
        assert_ne!(a, b);
        assert!(a.eql(&b));
        assert_eq!(a, a.clone());
        assert_eq!(Value::Fixnum(7), Value::from(7i64));
    }

    #[test]
    fn type_tags() {
        let core = CoreClasses::new();
        assert_eq!(Value::Nil.type_tag(), TypeTag::Nil);
        assert_eq!(Value::Fixnum(1).type_tag(), TypeTag::Fixnum);
        assert_eq!(core.array(vec![]).type_tag(), TypeTag::Array);
        let module = new_class(Some("M".into()), ClassFlavor::Module, Value::Nil, Value::Nil);
        assert_eq!(module.type_tag(), TypeTag::Module);
    }

    // ── Call conventions ───────────────────────────────────────────

    #[test]
    fn conventions_follow_signature() {
        assert_eq!(
            CallConvention::for_block(&empty_block(2, vec![], false)),
            CallConvention::Plain
        );
        assert_eq!(
            CallConvention::for_block(&empty_block(2, vec![4], false)),
            CallConvention::WithDefaults
        );
        assert_eq!(
            CallConvention::for_block(&empty_block(2, vec![], true)),
            CallConvention::WithSplat
        );
        assert_eq!(empty_block(3, vec![4, 9], false).required_argc(), 1);
        assert_eq!(empty_block(2, vec![], true).required_argc(), 1);
    }

    // ── Inline caches ──────────────────────────────────────────────

    #[test]
    fn cache_slots_fill_once() {
        let block = empty_block(0, vec![], false);
        let a = new_class(Some("A".into()), ClassFlavor::Class, Value::Nil, Value::Nil);
        let b = new_class(Some("B".into()), ClassFlavor::Class, Value::Nil, Value::Nil);

        assert!(block.caches.install(0, a.clone(), 0));
        assert!(!block.caches.install(0, b, 1));
        assert_eq!(
            block.caches.get(0),
            InlineCache::Cached { class: a, site: 0 }
        );
        assert_eq!(block.caches.get(1), InlineCache::Uncached);
        assert!(!block.caches.install(5, Value::Nil, 0));
    }

    #[test]
    fn call_site_table_grows_geometrically() {
        let symbols = SymbolTable::new();
        let name = symbols.intern("go");
        let table = CallSiteTable::new();
        let method = Method::native(name, Value::Nil, 0, Some(0));
        let site = CallSite {
            class: Value::Nil,
            method,
            message: name,
            method_missing: false,
            miss: 0,
        };

        assert_eq!(table.capacity(), 0);
        assert_eq!(table.push(site.clone()), 0);
        assert_eq!(table.capacity(), 2);
        table.push(site.clone());
        assert_eq!(table.push(site), 2);
        assert_eq!(table.capacity(), 4);

        table.record_miss(1);
        assert_eq!(table.get(1).map(|s| s.miss), Some(1));
        assert_eq!(table.get(0).map(|s| s.miss), Some(0));
    }
}
