use object::{InlineCache, MethodBody, Value};
use proptest::prelude::*;
use vm::{DispatchStats, Vm, VmSettings};

const CLASSES: &str = "
class A
  def f
    :a
  end
end

class B
  def f
    :b
  end
end

def call_f(x)
  x.f
end

$a = A.new
$b = B.new
";

fn vm() -> Vm {
    let mut vm = Vm::new(VmSettings::default());
    vm.eval(CLASSES, "classes.rb").expect("setup");
    vm.reset_stats();
    vm
}

/// Stats accumulated by evaluating `source`.
fn measure(vm: &mut Vm, source: &str) -> (Value, DispatchStats) {
    vm.reset_stats();
    let value = vm.eval(source, "t.rb").expect("eval");
    (value, vm.stats)
}

/// The slot, its site's miss count and the number of recorded sites.
fn call_f_cache(vm: &Vm) -> (InlineCache, u32, usize) {
    let name = vm.symbols.intern("call_f");
    let method = vm.core.resolve_method(&vm.main, name).expect("call_f");
    let MethodBody::Compiled { block, .. } = &method.body else {
        panic!("call_f is compiled");
    };
    let miss = block.sites.get(0).map_or(0, |site| site.miss);
    (block.caches.get(0), miss, block.sites.len())
}

fn class_named(vm: &mut Vm, name: &str) -> Value {
    vm.eval(name, "t.rb").expect("constant")
}

#[test]
fn second_call_with_same_class_hits() {
    let mut vm = vm();
    let sym_a = Value::Symbol(vm.symbols.intern("a"));

    // `call_f` itself is resolved once per top-level unit.
    let (value, first) = measure(&mut vm, "call_f($a)");
    assert_eq!(value, sym_a);
    assert_eq!(first.resolutions, 2);
    assert_eq!(first.cache_hits, 0);

    let (value, second) = measure(&mut vm, "call_f($a)");
    assert_eq!(value, sym_a);
    assert_eq!(second.resolutions, 1);
    assert_eq!(second.cache_hits, 1);
    assert_eq!(second.cache_misses, 0);
}

#[test]
fn other_class_misses_without_evicting() {
    let mut vm = vm();
    measure(&mut vm, "call_f($a)");
    let class_a = class_named(&mut vm, "A");

    let (value, stats) = measure(&mut vm, "call_f($b)");
    assert_eq!(value, Value::Symbol(vm.symbols.intern("b")));
    assert_eq!(stats.resolutions, 2);
    assert_eq!(stats.cache_misses, 1);

    let (cache, miss, sites) = call_f_cache(&vm);
    assert_eq!(cache, InlineCache::Cached { class: class_a.clone(), site: 0 });
    assert_eq!(miss, 1);
    // The re-resolution is recorded as its own site.
    assert_eq!(sites, 2);

    // The slot still serves A.
    let (_, stats) = measure(&mut vm, "call_f($a)");
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.resolutions, 1);
    let (cache, _, sites) = call_f_cache(&vm);
    assert_eq!(cache, InlineCache::Cached { class: class_a, site: 0 });
    assert_eq!(sites, 2);
}

#[test]
fn every_resolution_appends_a_site() {
    let mut vm = vm();
    measure(&mut vm, "call_f($a)\ncall_f($b)\ncall_f($b)\ncall_f($a)");
    let (_, miss, sites) = call_f_cache(&vm);
    assert_eq!(sites, 3);
    assert_eq!(miss, 2);
}

#[test]
fn loop_body_resolves_once() {
    let mut vm = vm();
    let (_, stats) = measure(
        &mut vm,
        "i = 0\nwhile i < 10\n  $a.f\n  i += 1\nend",
    );
    assert_eq!(stats.resolutions, 1);
    assert_eq!(stats.cache_hits, 9);
    assert_eq!(stats.dispatches, 10);
}

#[test]
fn subclass_receivers_miss_and_still_resolve() {
    let mut vm = vm();
    vm.eval("class C < A\nend", "t.rb").expect("subclass");
    let source = "r = []\n[$a, C.new, $a].each { |x| r << x.f }\nr";
    let (value, stats) = measure(&mut vm, source);
    assert_eq!(vm.inspect(&value).expect("inspect"), "[:a, :a, :a]");
    assert_eq!(stats.cache_misses, 1);
}

proptest! {
    #[test]
    fn fixnum_fast_path(a in 0i64..1_000_000, b in 0i64..1_000_000) {
        let mut vm = Vm::new(VmSettings { load_prelude: false, ..VmSettings::default() });
        let (sum, stats) = measure(&mut vm, &format!("{a} + {b}"));
        prop_assert_eq!(sum, Value::Fixnum(a + b));
        prop_assert_eq!(stats.dispatches, 0);
        let (diff, _) = measure(&mut vm, &format!("{a} - {b}"));
        prop_assert_eq!(diff, Value::Fixnum(a - b));
        let (less, _) = measure(&mut vm, &format!("{a} < {b}"));
        prop_assert_eq!(less, Value::bool(a < b));
    }

    #[test]
    fn plain_methods_check_arity(declared in 0usize..4, given in 0usize..6) {
        let mut vm = Vm::new(VmSettings { load_prelude: false, ..VmSettings::default() });
        let params: Vec<String> = (0..declared).map(|i| format!("p{i}")).collect();
        let args: Vec<String> = (0..given).map(|i| i.to_string()).collect();
        let source = format!(
            "def m({})\n  nil\nend\nm({})",
            params.join(", "),
            args.join(", ")
        );
        let result = vm.eval(&source, "t.rb");
        prop_assert_eq!(vm.depth(), 0);
        if given == declared {
            prop_assert!(result.is_ok());
        } else {
            let unwind = result.expect_err("arity error");
            let exc = unwind.as_exception().expect("exception");
            prop_assert_eq!(
                vm.exception_message(exc),
                format!("wrong number of arguments ({given} for {declared})")
            );
        }
    }

    #[test]
    fn splat_methods_accept_at_least_fixed(fixed in 0usize..3, given in 0usize..6) {
        let mut vm = Vm::new(VmSettings { load_prelude: false, ..VmSettings::default() });
        let mut params: Vec<String> = (0..fixed).map(|i| format!("p{i}")).collect();
        params.push("*rest".to_string());
        let args: Vec<String> = (0..given).map(|i| i.to_string()).collect();
        let source = format!(
            "def m({})\n  rest\nend\nm({})",
            params.join(", "),
            args.join(", ")
        );
        let result = vm.eval(&source, "t.rb");
        if given >= fixed {
            let rest = result.expect("splat call");
            let len = rest
                .as_object()
                .and_then(|obj| obj.as_array())
                .map(|items| items.borrow().len());
            prop_assert_eq!(len, Some(given - fixed));
        } else {
            prop_assert!(result.is_err());
        }
    }
}
