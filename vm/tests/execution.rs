use std::rc::Rc;

use object::{class_name, str_of, Block, CallSiteTable, InlineCaches, TypeTag, Value};
use vm::{with_vm_stack, CapturedOutput, Fault, Outcome, Unwind, Vm, VmSettings};

fn boot(settings: VmSettings) -> (Vm, CapturedOutput) {
    let mut vm = Vm::new(settings);
    let out = CapturedOutput::new();
    vm.set_output(Box::new(out.clone()));
    (vm, out)
}

fn vm() -> (Vm, CapturedOutput) {
    boot(VmSettings::default())
}

fn eval(vm: &mut Vm, source: &str) -> Value {
    match vm.eval(source, "t.rb") {
        Ok(value) => value,
        Err(Unwind::Fault(fault)) => panic!("fault: {fault}"),
        Err(unwind) => match unwind.as_exception() {
            Some(exc) => panic!("{}", vm.format_exception(exc)),
            None => panic!("unexpected {unwind:?}"),
        },
    }
}

fn inspect(vm: &mut Vm, source: &str) -> String {
    let value = eval(vm, source);
    vm.inspect(&value).expect("inspect")
}

/// Class name and message of the exception `result` unwound with.
fn raised(vm: &Vm, result: Outcome<Value>) -> (String, String) {
    let unwind = result.expect_err("expected an exception");
    let exc = unwind.as_exception().expect("expected an exception");
    (
        class_name(&vm.class_of_real(exc)),
        vm.exception_message(exc),
    )
}

// ── Fast path and dispatch counting ─────────────────────────────────

#[test]
fn fixnum_addition_never_dispatches() {
    let (mut vm, _) = vm();
    assert_eq!(eval(&mut vm, "1 + 2"), Value::Fixnum(3));
    assert_eq!(vm.stats.dispatches, 0);
    assert_eq!(vm.stats.resolutions, 0);
}

#[test]
fn string_concatenation_dispatches_once() {
    let (mut vm, _) = vm();
    let value = eval(&mut vm, "\"a\" + \"b\"");
    assert_eq!(str_of(&value).map(|s| s.clone()), Some("ab".to_string()));
    assert_eq!(vm.stats.dispatches, 1);
    assert_eq!(vm.stats.resolutions, 1);
}

#[test]
fn fixnum_overflow_raises() {
    let (mut vm, _) = vm();
    let result = vm.eval("9223372036854775807 + 1", "t.rb");
    assert_eq!(
        raised(&vm, result),
        ("RangeError".to_string(), "fixnum overflow".to_string())
    );
}

#[test]
fn fixnum_operands_are_checked() {
    let (mut vm, _) = vm();
    let result = vm.eval("1 + \"a\"", "t.rb");
    assert_eq!(
        raised(&vm, result),
        (
            "TypeError".to_string(),
            "String can't be coerced into Fixnum".to_string()
        )
    );
}

// ── Classes and methods ─────────────────────────────────────────────

const GREETER: &str = "
class Greeter
  def initialize(name)
    @name = name
  end

  def greet(punct)
    \"hello \" + @name + punct
  end
end
";

#[test]
fn class_definition_and_call() {
    let (mut vm, _) = vm();
    eval(&mut vm, GREETER);
    assert_eq!(
        inspect(&mut vm, "Greeter.new(\"bob\").greet(\"!\")"),
        "\"hello bob!\""
    );
}

#[test]
fn wrong_argument_count_unwinds_cleanly() {
    let (mut vm, _) = vm();
    eval(&mut vm, GREETER);
    let result = vm.eval("Greeter.new(\"bob\").greet", "t.rb");
    assert_eq!(
        raised(&vm, result),
        (
            "ArgumentError".to_string(),
            "wrong number of arguments (0 for 1)".to_string()
        )
    );
    assert_eq!(vm.depth(), 0);
    assert_eq!(inspect(&mut vm, "Greeter.new(\"x\").greet(\"?\")"), "\"hello x?\"");
}

#[test]
fn default_arguments_fill_from_the_right() {
    let (mut vm, _) = vm();
    eval(&mut vm, "def f(a, b = a + 1, c = 10)\n  [a, b, c]\nend");
    assert_eq!(inspect(&mut vm, "f(1)"), "[1, 2, 10]");
    assert_eq!(inspect(&mut vm, "f(1, 5)"), "[1, 5, 10]");
    assert_eq!(inspect(&mut vm, "f(1, 5, 6)"), "[1, 5, 6]");

    let result = vm.eval("f", "t.rb");
    assert_eq!(raised(&vm, result).1, "wrong number of arguments (0 for 1)");
    let result = vm.eval("f(1, 2, 3, 4)", "t.rb");
    assert_eq!(raised(&vm, result).1, "wrong number of arguments (4 for 3)");
}

#[test]
fn splat_parameters_collect_the_rest() {
    let (mut vm, _) = vm();
    eval(&mut vm, "def g(a, *rest)\n  rest\nend");
    assert_eq!(inspect(&mut vm, "g(1, 2, 3)"), "[2, 3]");
    assert_eq!(inspect(&mut vm, "g(1)"), "[]");
    assert_eq!(inspect(&mut vm, "g(*[4, 5])"), "[5]");
    let result = vm.eval("g", "t.rb");
    assert_eq!(raised(&vm, result).1, "wrong number of arguments (0 for 1)");
}

#[test]
fn reopened_classes_keep_their_methods() {
    let (mut vm, _) = vm();
    let value = eval(
        &mut vm,
        "class A\n  def x\n    1\n  end\nend\nclass A\n  def y\n    2\n  end\nend\nA.new.x + A.new.y",
    );
    assert_eq!(value, Value::Fixnum(3));
}

#[test]
fn inheritance_and_singleton_methods() {
    let (mut vm, _) = vm();
    let source = "
class Animal
  def speak
    \"...\"
  end

  def self.create
    new
  end
end

class Dog < Animal
  def speak
    \"woof\"
  end
end

[Animal.create.speak, Dog.create.speak, Dog.superclass]
";
    assert_eq!(inspect(&mut vm, source), "[\"...\", \"woof\", Animal]");
}

#[test]
fn module_functions_and_constants() {
    let (mut vm, _) = vm();
    let source = "
module Config
  LIMIT = 3

  def self.limit
    LIMIT
  end
end

Config.limit
";
    assert_eq!(eval(&mut vm, source), Value::Fixnum(3));
    let result = vm.eval("Missing", "t.rb");
    assert_eq!(
        raised(&vm, result),
        (
            "NameError".to_string(),
            "uninitialized constant Missing".to_string()
        )
    );
}

#[test]
fn instance_class_and_global_variables() {
    let (mut vm, _) = vm();
    let source = "
class Counter
  @@created = 0

  def initialize
    @@created += 1
    @count = 0
  end

  def bump
    @count += 1
  end

  def self.created
    @@created
  end
end

c = Counter.new
Counter.new
c.bump
c.bump
$total = c.bump
[$total, Counter.created]
";
    assert_eq!(inspect(&mut vm, source), "[3, 2]");
}

// ── Errors ──────────────────────────────────────────────────────────

#[test]
fn undefined_methods_describe_the_receiver() {
    let (mut vm, _) = vm();
    let cases = [
        ("nil.frob", "undefined method `frob' for nil:NilClass"),
        ("true.frob", "undefined method `frob' for true:TrueClass"),
        ("3.frob", "undefined method `frob' for 3:Fixnum"),
        ("frob", "undefined method `frob' for main:Object"),
    ];
    for (source, message) in cases {
        let result = vm.eval(source, "t.rb");
        assert_eq!(
            raised(&vm, result),
            ("NoMethodError".to_string(), message.to_string())
        );
    }
}

#[test]
fn method_missing_receives_the_message() {
    let (mut vm, _) = vm();
    let source = "
class Ghost
  def method_missing(name, *args)
    [name, args]
  end
end

Ghost.new.boo(1, 2)
";
    assert_eq!(inspect(&mut vm, source), "[:boo, [1, 2]]");
}

#[test]
fn yield_without_a_block() {
    let (mut vm, _) = vm();
    let result = vm.eval("def f\n  yield\nend\nf", "t.rb");
    assert_eq!(
        raised(&vm, result),
        ("LocalJumpError".to_string(), "no block given".to_string())
    );
}

#[test]
fn recursion_hits_the_frame_limit() {
    let (mut vm, _) = boot(VmSettings {
        max_frames: 32,
        ..VmSettings::default()
    });
    let result = vm.eval("def down(n)\n  down(n + 1)\nend\ndown(0)", "t.rb");
    assert_eq!(
        raised(&vm, result),
        ("SystemStackError".to_string(), "Stack overflow".to_string())
    );
    assert_eq!(vm.depth(), 0);
    assert_eq!(eval(&mut vm, "1 + 1"), Value::Fixnum(2));
}

/// Recurse without bound under the default settings and report what was
/// raised, the depth afterwards and whether the VM still runs code.
fn overflow_with_defaults(source: &'static str) -> (String, String, usize, bool) {
    let settings = VmSettings::default();
    with_vm_stack(settings.max_frames, move || {
        let (mut vm, _) = boot(settings);
        let result = vm.eval(source, "t.rb");
        let (class, message) = raised(&vm, result);
        let depth = vm.depth();
        let usable = eval(&mut vm, "1 + 1") == Value::Fixnum(2);
        (class, message, depth, usable)
    })
    .expect("vm thread")
}

#[test]
fn default_frame_limit_raises_before_the_host_stack_runs_out() {
    let (class, message, depth, usable) =
        overflow_with_defaults("def down(n)\n  down(n + 1)\nend\ndown(0)");
    assert_eq!(class, "SystemStackError");
    assert_eq!(message, "Stack overflow");
    assert_eq!(depth, 0);
    assert!(usable);
}

#[test]
fn recursion_through_yield_hits_the_frame_limit() {
    let source = "def y\n  yield\nend\n\ndef rec(n)\n  y { rec(n + 1) }\nend\n\nrec(0)";
    let (class, message, depth, usable) = overflow_with_defaults(source);
    assert_eq!(class, "SystemStackError");
    assert_eq!(message, "Stack overflow");
    assert_eq!(depth, 0);
    assert!(usable);
}

#[test]
fn backtraces_list_callers_innermost_first() {
    let (mut vm, _) = vm();
    let source = "def inner\n  raise \"boom\"\nend\n\ndef outer\n  inner\nend\n\nouter\n";
    let unwind = vm.eval(source, "t.rb").expect_err("raise");
    let exc = unwind.as_exception().expect("exception");
    assert_eq!(
        vm.format_exception(exc),
        "RuntimeError: boom\n\tfrom t.rb:2:in `inner'\n\tfrom t.rb:6:in `outer'\n\tfrom t.rb:9\n"
    );
}

#[test]
fn raise_with_a_class_and_message() {
    let (mut vm, _) = vm();
    let result = vm.eval("raise ArgumentError, \"bad\"", "t.rb");
    assert_eq!(
        raised(&vm, result),
        ("ArgumentError".to_string(), "bad".to_string())
    );
    let result = vm.eval("raise 3", "t.rb");
    assert_eq!(raised(&vm, result).0, "TypeError");
}

#[test]
fn syntax_errors_name_file_and_line() {
    let (mut vm, _) = vm();
    let result = vm.eval("x = 1\nx = ", "bad.rb");
    let (class, message) = raised(&vm, result);
    assert_eq!(class, "SyntaxError");
    assert!(message.starts_with("bad.rb:"), "{message}");
}

#[test]
fn division_by_zero() {
    let (mut vm, _) = vm();
    let result = vm.eval("1 / 0", "t.rb");
    assert_eq!(
        raised(&vm, result),
        ("ZeroDivisionError".to_string(), "divided by 0".to_string())
    );
}

// ── Blocks, closures and non-local exits ────────────────────────────

#[test]
fn blocks_write_through_to_outer_locals() {
    let (mut vm, _) = vm();
    assert_eq!(eval(&mut vm, "x = 1\n[1, 2].each { |y| x = x + y }\nx"), Value::Fixnum(4));
}

#[test]
fn blocks_see_later_mutations() {
    let (mut vm, _) = vm();
    let source = "
def twice
  yield
  yield
end

count = 0
seen = []
twice { seen << count; count += 1 }
count += 10
twice { seen << count }
seen
";
    assert_eq!(inspect(&mut vm, source), "[0, 1, 12, 12]");
}

#[test]
fn nested_blocks_share_upvalues() {
    let (mut vm, _) = vm();
    let source = "
total = 0
[1, 2].each { |a| [10, 20].each { |b| total += a * b } }
total
";
    assert_eq!(eval(&mut vm, source), Value::Fixnum(90));
}

#[test]
fn return_from_a_block_leaves_the_method() {
    let (mut vm, _) = vm();
    let source = "
def find_first(items)
  items.each { |x| return x if x > 1 }
  nil
end

[find_first([1, 5, 7]), find_first([0])]
";
    assert_eq!(inspect(&mut vm, source), "[5, nil]");
    assert_eq!(vm.depth(), 0);
}

#[test]
fn next_ends_one_block_call() {
    let (mut vm, _) = vm();
    assert_eq!(
        inspect(&mut vm, "[1, 2, 3].map { |x| next 0 if x == 2\n x }"),
        "[1, 0, 3]"
    );
}

#[test]
fn break_out_of_a_while_loop() {
    let (mut vm, _) = vm();
    let source = "
i = 0
r = while true
  i += 1
  break i * 2 if i == 3
end
[i, r]
";
    assert_eq!(inspect(&mut vm, source), "[3, 6]");
}

#[test]
fn break_from_a_block_is_unsupported() {
    let (mut vm, _) = vm();
    let result = vm.eval("[1, 2].each { break }", "t.rb");
    assert!(matches!(
        result,
        Err(Unwind::Fault(Fault::UnsupportedBreak))
    ));
    assert_eq!(vm.depth(), 0);
}

#[test]
fn block_given_reflects_the_caller() {
    let (mut vm, _) = vm();
    eval(&mut vm, "def given\n  block_given?\nend");
    assert_eq!(inspect(&mut vm, "[given, given { 1 }]"), "[false, true]");
}

// ── Prelude and output ──────────────────────────────────────────────

#[test]
fn prelude_iterators() {
    let (mut vm, _) = vm();
    assert_eq!(inspect(&mut vm, "[1, 2, 3].map { |x| x * 2 }"), "[2, 4, 6]");
    assert_eq!(inspect(&mut vm, "s = 0\n4.times { |i| s += i }\ns"), "6");
    assert_eq!(inspect(&mut vm, "h = {a: 1, b: 2}\nh.values"), "[1, 2]");
    assert_eq!(inspect(&mut vm, "[[].empty?, {}.empty?, [1].empty?]"), "[true, true, false]");
    assert_eq!(inspect(&mut vm, "r = []\n(1..3).each { |i| r << i }\nr"), "[1, 2, 3]");
}

#[test]
fn output_goes_to_the_sink() {
    let (mut vm, out) = vm();
    eval(&mut vm, "puts 1, [2, [3]]\nprint \"a\", \"b\"\np :sym, \"q\"\nputs");
    assert_eq!(out.contents(), "1\n2\n3\nab:sym\n\"q\"\n\n");
}

#[test]
fn string_interpolation() {
    let (mut vm, out) = vm();
    eval(&mut vm, "name = \"world\"\nn = 3\nputs \"hello #{name} x#{n}\"");
    assert_eq!(out.contents(), "hello world x3\n");
}

// ── Faults ──────────────────────────────────────────────────────────

#[test]
fn unknown_opcode_is_a_fault() {
    let (mut vm, _) = vm();
    let block = Rc::new(Block {
        name: "<bad>".into(),
        filename: Rc::from("bad.rb"),
        line: 1,
        code: vec![0xff],
        lines: Vec::new(),
        constants: Vec::new(),
        strings: Vec::new(),
        blocks: Vec::new(),
        argc: 0,
        defaults: Vec::new(),
        arg_splat: false,
        locals: Vec::new(),
        register_count: 1,
        captures: Vec::new(),
        caches: InlineCaches::new(0),
        sites: CallSiteTable::new(),
    });
    let main = vm.main.clone();
    let object = vm.core.get(TypeTag::Object).clone();
    let result = vm.run(&block, main, object, Vec::new());
    assert!(matches!(
        result,
        Err(Unwind::Fault(Fault::UnknownOpcode { byte: 0xff, offset: 0 }))
    ));
    assert_eq!(vm.depth(), 0);
}
