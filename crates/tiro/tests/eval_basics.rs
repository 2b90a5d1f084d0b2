//! End-to-end scenarios: compile, load, invoke, check results.

use pretty_assertions::assert_eq;
use tiro::{compile_module, StringTable, Value, Vm, VmErrorKind, VmResult};

fn run(source: &str, name: &str, args: &[Value]) -> (Vm, VmResult<Value>) {
    let mut strings = StringTable::new();
    let result = compile_module("test", source, &mut strings);
    let module = match result.module {
        Some(module) => module,
        None => panic!("compilation failed:\n{}", result.diagnostics.render(source)),
    };
    let mut vm = Vm::new(strings);
    let loaded = vm.load(&module).expect("module loads");
    let value = vm.invoke(loaded, name, args);
    (vm, value)
}

fn run_int(source: &str, name: &str, args: &[Value]) -> i64 {
    let (vm, value) = run(source, name, args);
    let value = value.expect("invocation succeeds");
    vm.as_int(value).expect("result is an integer")
}

fn run_str(source: &str, name: &str, args: &[Value]) -> String {
    let (vm, value) = run(source, name, args);
    let value = value.expect("invocation succeeds");
    vm.as_str(value).expect("result is a string").to_owned()
}

fn run_rendered(source: &str, name: &str, args: &[Value]) -> String {
    let (vm, value) = run(source, name, args);
    let value = value.expect("invocation succeeds");
    vm.render(value)
}

#[test]
fn factorial() {
    let source = r"
        export func factorial(n) {
            var r = 1;
            for (var i = 2; i <= n; i += 1) {
                r *= i;
            }
            return r;
        }
    ";
    assert_eq!(run_int(source, "factorial", &[Value::SmallInt(7)]), 5040);
    assert_eq!(run_int(source, "factorial", &[Value::SmallInt(1)]), 1);
}

#[test]
fn arithmetic_and_precedence() {
    assert_eq!(run_int("export func f() { return 2 + 3 * 4; }", "f", &[]), 14);
    assert_eq!(run_int("export func f() { return (2 + 3) * 4; }", "f", &[]), 20);
    assert_eq!(run_int("export func f() { return 2 ** 3 ** 2; }", "f", &[]), 512);
    assert_eq!(run_int("export func f() { return 7 % 3 + 10 / 2; }", "f", &[]), 6);
    assert_eq!(run_int("export func f() { return 1 << 5 | 3 & 1; }", "f", &[]), 33);
    assert_eq!(run_int("export func f() { return -3 - -5; }", "f", &[]), 2);
}

#[test]
fn division_by_zero_traps() {
    let (_, value) = run("export func f(d) { return 1 / d; }", "f", &[Value::SmallInt(0)]);
    assert_eq!(value.expect_err("traps").kind, VmErrorKind::DivideByZero);
}

#[test]
fn integer_overflow_traps() {
    let source = "export func f(x) { return x + 1; }";
    let (_, value) = run(source, "f", &[Value::SmallInt(i64::MAX)]);
    assert_eq!(value.expect_err("traps").kind, VmErrorKind::IntegerOverflow);
}

#[test]
fn large_integers_box_transparently() {
    // Values outside the embedded small-int range still behave like ints.
    let source = "export func f(x) { return x - 1; }";
    let (vm, value) = run(source, "f", &[Value::SmallInt(tiro::vm::value::SMALL_INT_MAX)]);
    let value = value.expect("invocation succeeds");
    assert_eq!(vm.as_int(value), Some(tiro::vm::value::SMALL_INT_MAX - 1));

    let big = r"
        export func f() {
            var x = 4611686018427387904;
            return x + 100;
        }
    ";
    assert_eq!(run_int(big, "f", &[]), 4_611_686_018_427_387_904 + 100);
}

#[test]
fn float_arithmetic() {
    assert_eq!(run_rendered("export func f() { return 1.5 + 2.25; }", "f", &[]), "3.75");
    assert_eq!(run_rendered("export func f() { return 7 / 2.0; }", "f", &[]), "3.5");
}

#[test]
fn string_concatenation_and_interpolation() {
    assert_eq!(
        run_str(r#"export func f() { return "foo" + "bar"; }"#, "f", &[]),
        "foobar"
    );
    let source = r#"
        export func greet(name) {
            return "hello $name, ${1 + 1} times";
        }
    "#;
    let mut strings = StringTable::new();
    let result = compile_module("test", source, &mut strings);
    let module = result.module.expect("compiles");
    let mut vm = Vm::new(strings);
    let loaded = vm.load(&module).expect("loads");
    let arg = vm.str_value("world").expect("string allocates");
    let value = vm.invoke(loaded, "greet", &[arg]).expect("runs");
    assert_eq!(vm.as_str(value), Some("hello world, 2 times"));
}

#[test]
fn adjacent_string_literals_group() {
    assert_eq!(
        run_str(r#"export func f() { return "a" "b" "c"; }"#, "f", &[]),
        "abc"
    );
}

#[test]
fn tuples_and_tuple_fields() {
    assert_eq!(
        run_int("export func f() { const t = (10, 20); return t.0 + t.1; }", "f", &[]),
        30
    );
    assert_eq!(
        run_int("export func f() { var t = (1, 2); t.0 = 5; return t.0 + t.1; }", "f", &[]),
        7
    );
    assert_eq!(
        run_int("export func f() { var (a, b) = (3, 4); return a * b; }", "f", &[]),
        12
    );
    assert_eq!(
        run_int("export func f(x, y) { var (a, b) = (x, y); (a, b) = (b, a); return a - b; }",
            "f",
            &[Value::SmallInt(1), Value::SmallInt(10)]),
        9
    );
}

#[test]
fn arrays() {
    let source = r"
        export func f() {
            var items = [1, 2, 3];
            items.push(4);
            items[0] = 10;
            return items[0] + items[3] + items.size();
        }
    ";
    assert_eq!(run_int(source, "f", &[]), 18);
}

#[test]
fn array_out_of_bounds_traps() {
    let (_, value) = run("export func f() { return [1, 2][5]; }", "f", &[]);
    assert_eq!(value.expect_err("traps").kind, VmErrorKind::OutOfBounds);
}

#[test]
fn maps_preserve_insertion_order() {
    let source = r#"
        export func f() {
            const m = map{"b": 1, "a": 2};
            m.set("c", 3);
            return m;
        }
    "#;
    assert_eq!(run_rendered(source, "f", &[]), "map{b: 1, a: 2, c: 3}");
}

#[test]
fn map_access_and_methods() {
    let source = r#"
        export func f() {
            const m = map{"x": 10};
            const missing = m.get("nope") ?? 5;
            return m["x"] + missing + m.size();
        }
    "#;
    assert_eq!(run_int(source, "f", &[]), 16);
}

#[test]
fn map_keys_unify_equal_numbers() {
    // equal(a, b) implies hash(a) == hash(b): 1 and 1.0 are one key.
    let source = r#"
        export func f() {
            const m = map{1: "int"};
            m.set(1.0, "float");
            return (m.size(), m[1]);
        }
    "#;
    assert_eq!(run_rendered(source, "f", &[]), "(1, float)");
}

#[test]
fn sets() {
    let source = r"
        export func f() {
            const s = set{1, 2, 2, 3};
            s.add(4);
            var hits = 0;
            if s.contains(2) { hits += 1; }
            if s.contains(9) { hits += 1; }
            return s.size() * 10 + hits;
        }
    ";
    assert_eq!(run_int(source, "f", &[]), 41);
}

#[test]
fn records() {
    let source = r"
        export func f() {
            var p = (x: 1, y: 2);
            p.x = 40;
            return p.x + p.y;
        }
    ";
    assert_eq!(run_int(source, "f", &[]), 42);
}

#[test]
fn missing_record_member_traps() {
    let (_, value) = run("export func f() { return (x: 1).y; }", "f", &[]);
    assert_eq!(value.expect_err("traps").kind, VmErrorKind::MissingMember);
}

#[test]
fn module_variables() {
    let source = r#"
        var counter = 0;
        export func bump() { counter += 1; return counter; }
        export func get() { return counter; }
    "#;
    let mut strings = StringTable::new();
    let result = compile_module("test", source, &mut strings);
    let module = result.module.expect("compiles");
    let mut vm = Vm::new(strings);
    let loaded = vm.load(&module).expect("loads");
    assert_eq!(vm.invoke(loaded, "bump", &[]).map(|v| vm.as_int(v)), Ok(Some(1)));
    assert_eq!(vm.invoke(loaded, "bump", &[]).map(|v| vm.as_int(v)), Ok(Some(2)));
    assert_eq!(vm.invoke(loaded, "get", &[]).map(|v| vm.as_int(v)), Ok(Some(2)));
}

#[test]
fn assertion_failures_surface_the_message() {
    let (_, value) = run(r#"export func f() { assert(false, "boom!"); }"#, "f", &[]);
    let error = value.expect_err("assert trips");
    assert_eq!(error.kind, VmErrorKind::AssertionFailed);
    assert!(error.message.contains("boom!"), "message: {}", error.message);

    // Interpolated messages are evaluated lazily, on the failure path only.
    let source = r#"
        export func f() {
            const x = "tick";
            assert(false, "${x} boom!");
        }
    "#;
    let (_, value) = run(source, "f", &[]);
    let error = value.expect_err("assert trips");
    assert!(error.message.contains("tick boom!"), "message: {}", error.message);
}

#[test]
fn passing_assertions_are_silent() {
    assert_eq!(
        run_int(r#"export func f(x) { assert(x > 0, "positive"); return x; }"#, "f", &[Value::SmallInt(3)]),
        3
    );
}

#[test]
fn missing_method_traps_before_the_call() {
    let (_, value) = run("export func f() { return [1].frobnicate(); }", "f", &[]);
    assert_eq!(value.expect_err("traps").kind, VmErrorKind::MissingMethod);
}

#[test]
fn runaway_recursion_overflows_the_coroutine_stack() {
    let (_, value) = run("export func f() { return f(); }", "f", &[]);
    assert_eq!(value.expect_err("traps").kind, VmErrorKind::StackOverflow);
}

#[test]
fn wrong_argument_count_traps() {
    let (_, value) = run("export func f(a, b) { return a + b; }", "f", &[Value::SmallInt(1)]);
    assert_eq!(value.expect_err("traps").kind, VmErrorKind::WrongArgumentCount);
}

#[test]
fn results_are_deterministic_across_runs() {
    let source = r#"
        export func f() {
            var log = "";
            const m = map{"a": 1, "b": 2};
            m.set("c", 3);
            return "${m}-${set{1, 2}}";
        }
    "#;
    let first = run_str(source, "f", &[]);
    for _ in 0..5 {
        assert_eq!(run_str(source, "f", &[]), first);
    }
}
