use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use object::{Block, TypeTag, Value};
use vm::{Vm, VmSettings};

const SETUP: &str = "
class A
  def f
    1
  end
end

class B
  def f
    2
  end
end

def call_f(x)
  x.f
end

$a = A.new
$b = B.new
";

fn build(setup_target: &str, loop_target: &str) -> (Vm, Rc<Block>) {
    let mut vm = Vm::new(VmSettings::default());
    vm.eval(SETUP, "setup.rb").expect("setup");
    // Pin the call site in `call_f` to the first receiver's class.
    vm.eval(&format!("call_f({setup_target})"), "warm.rb")
        .expect("warmup");

    let mut source = String::from("i = 0\nwhile i < 100\n");
    source.push_str(&format!("  call_f({loop_target})\n"));
    source.push_str("  i += 1\nend\n");
    let block = vm.compile(&source, "bench.rb").expect("compile");
    (vm, block)
}

fn run_case(c: &mut Criterion, name: &str, setup_target: &str, loop_target: &str) {
    let (mut vm, block) = build(setup_target, loop_target);
    let main = vm.main.clone();
    let object: Value = vm.core.get(TypeTag::Object).clone();

    c.bench_function(name, |b| {
        b.iter(|| {
            let value = vm
                .run(&block, main.clone(), object.clone(), Vec::new())
                .expect("run");
            black_box(value);
        })
    });
}

fn bench_inline_cache(c: &mut Criterion) {
    // Every call after the first hits the cached site.
    run_case(c, "monomorphic_hits", "$a", "$a");
    // The slot stays on A, so every B receiver misses and re-resolves.
    run_case(c, "pinned_misses", "$a", "$b");
}

criterion_group!(benches, bench_inline_cache);
criterion_main!(benches);
