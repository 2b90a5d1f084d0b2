//! Control-flow scenarios: loops, short-circuiting, null-safe chains and
//! the deferred-statement exit protocol.
//!
//! The deferred tests build an observation log out of a captured string
//! variable; each function returns `"RESULT-LOG"` so both the computed value
//! and the full execution order are checked at once.

use pretty_assertions::assert_eq;
use tiro::{compile_module, StringTable, Value, Vm, VmResult};

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

fn run_str(source: &str, name: &str, args: &[Value]) -> String {
    let (vm, value) = run(source, name, args);
    let value = value.expect("invocation succeeds");
    vm.as_str(value).expect("result is a string").to_owned()
}

fn run_int(source: &str, name: &str, args: &[Value]) -> i64 {
    let (vm, value) = run(source, name, args);
    let value = value.expect("invocation succeeds");
    vm.as_int(value).expect("result is an integer")
}

#[test]
fn if_expression_values() {
    let source = "export func f(c) { return if c { 1 } else { 2 }; }";
    assert_eq!(run_int(source, "f", &[Value::Bool(true)]), 1);
    assert_eq!(run_int(source, "f", &[Value::Bool(false)]), 2);
}

#[test]
fn while_loop() {
    let source = r"
        export func f(n) {
            var sum = 0;
            var i = 0;
            while i < n {
                i += 1;
                sum += i;
            }
            return sum;
        }
    ";
    assert_eq!(run_int(source, "f", &[Value::SmallInt(4)]), 10);
    assert_eq!(run_int(source, "f", &[Value::SmallInt(0)]), 0);
}

#[test]
fn for_loop_with_break_and_continue() {
    let source = r"
        export func f(n) {
            var sum = 0;
            for (var i = 0; ; i += 1) {
                if i >= n {
                    break;
                }
                if i % 2 == 1 {
                    continue;
                }
                sum += i;
            }
            return sum;
        }
    ";
    // 0 + 2 + 4 + 6
    assert_eq!(run_int(source, "f", &[Value::SmallInt(8)]), 12);
}

#[test]
fn short_circuit_evaluates_left_to_right_and_stops() {
    let source = r#"
        export func test() {
            var log = "";
            const a = func() { log = log + "a"; return true; };
            const b = func() { log = log + "b"; return true; };
            const c = func() { log = log + "c"; return false; };
            const r = a() && b() && c();
            return log + (if r { "T" } else { "F" });
        }
    "#;
    assert_eq!(run_str(source, "test", &[]), "abcF");
}

#[test]
fn logical_or_short_circuits() {
    let source = r#"
        export func test() {
            var log = "";
            const a = func() { log = log + "a"; return true; };
            const b = func() { log = log + "b"; return true; };
            const r = a() || b();
            return log + (if r { "T" } else { "F" });
        }
    "#;
    assert_eq!(run_str(source, "test", &[]), "aT");
}

#[test]
fn null_coalesce_returns_first_non_null() {
    let source = "export func f(value, alternative) { return value ?? alternative; }";
    assert_eq!(run_int(source, "f", &[Value::Null, Value::SmallInt(3)]), 3);
    assert_eq!(
        run_int(source, "f", &[Value::SmallInt(123), Value::SmallInt(4)]),
        123
    );
}

#[test]
fn null_safe_chain_skips_the_access() {
    // With a null receiver the property access never happens.
    let source = "export func f(x) { return x?.foo ?? 3; }";
    assert_eq!(run_int(source, "f", &[Value::Null]), 3);

    let source = r"
        export func f(x) {
            return x?.foo ?? 3;
        }
        export func with_record() {
            return f((foo: 7));
        }
    ";
    assert_eq!(run_int(source, "with_record", &[]), 7);
}

#[test]
fn optional_index_and_call() {
    let source = "export func f(x) { return x?[0] ?? 9; }";
    assert_eq!(run_int(source, "f", &[Value::Null]), 9);

    let source = "export func f(g) { return g?() ?? 9; }";
    assert_eq!(run_int(source, "f", &[Value::Null]), 9);
}

// --- deferred statements ---

#[test]
fn deferred_simple() {
    // Normal exit: the inner block's defer runs at the inner scope's end,
    // the outer defer after the body produced its value.
    let source = r#"
        export func test() {
            var log = "";
            const add = func(s) { log = log + s; };
            const body = func() {
                defer add("1");
                add("2");
                {
                    defer add("3");
                    add("4");
                }
                log;
            };
            const v = body();
            return v + "-" + log;
        }
    "#;
    assert_eq!(run_str(source, "test", &[]), "243-2431");
}

#[test]
fn deferred_conditional() {
    let source = r#"
        export func test(x) {
            var log = "";
            const add = func(s) { log = log + s; };
            const body = func() {
                defer add("1");
                add("2");
                {
                    defer add("3");
                    if x {
                        defer add("4");
                        add("5");
                    }
                }
                defer add("6");
                add("7");
                log;
            };
            const v = body();
            return v + "-" + log;
        }
    "#;
    assert_eq!(run_str(source, "test", &[Value::Bool(true)]), "25437-2543761");
    assert_eq!(run_str(source, "test", &[Value::Bool(false)]), "237-23761");
}

#[test]
fn deferred_with_early_return() {
    let source = r#"
        export func test(x) {
            var log = "";
            const add = func(s) { log = log + s; };
            const body = func() {
                defer add("1");
                add("2");
                if x {
                    defer add("3");
                    return log;
                }
                add("4");
                log;
            };
            const v = body();
            return v + "-" + log;
        }
    "#;
    assert_eq!(run_str(source, "test", &[Value::Bool(true)]), "2-231");
    assert_eq!(run_str(source, "test", &[Value::Bool(false)]), "24-241");
}

#[test]
fn deferred_in_loops_with_break_and_continue() {
    let source = r#"
        export func test(x) {
            var log = "";
            const add = func(s) { log = log + s; };
            const body = func() {
                defer add("1");
                var stopped = false;
                for (var i = 0; !stopped; i += 1) {
                    defer add("2");
                    add("3");
                    if i == 1 {
                        stopped = true;
                        if x {
                            defer add("4");
                            break;
                        } else {
                            defer add("5");
                            continue;
                        }
                    }
                }
                log;
            };
            const v = body();
            return v + "-" + log;
        }
    "#;
    assert_eq!(run_str(source, "test", &[Value::Bool(true)]), "32342-323421");
    assert_eq!(run_str(source, "test", &[Value::Bool(false)]), "32352-323521");
}

#[test]
fn deferred_returns_overwrite_the_result() {
    // Deferred expressions run in reverse registration order; a return
    // inside one re-enters the exit protocol for the remaining scopes.
    let source = r#"
        export func test() {
            var log = "";
            const add = func(s) { log = log + s; };
            const get = func() { return log; };
            const body = func() {
                defer return get();
                defer add("1");
                defer return "<err2>";
                defer add("2");
                add("3");
                "<err1>";
            };
            const v = body();
            return v + "-" + log;
        }
    "#;
    assert_eq!(run_str(source, "test", &[]), "321-321");
}

#[test]
fn deferred_break_overrides_a_return() {
    let source = r#"
        export func test() {
            var log = "";
            const add = func(s) { log = log + s; };
            const get = func() { return log; };
            const body = func() {
                defer add("1");
                for (var i = 0; i < 1; i += 1) {
                    defer break;
                    add("2");
                    return get();
                }
                add("3");
                log;
            };
            const v = body();
            return v + "-" + log;
        }
    "#;
    assert_eq!(run_str(source, "test", &[]), "23-231");
}

#[test]
fn deferred_continue_overrides_a_return() {
    let source = r#"
        export func test() {
            var log = "";
            const add = func(s) { log = log + s; };
            const get = func() { return log; };
            const body = func() {
                defer add("1");
                for (var i = 0; i < 2; i += 1) {
                    defer continue;
                    add("2");
                    return get();
                }
                add("3");
                log;
            };
            const v = body();
            return v + "-" + log;
        }
    "#;
    assert_eq!(run_str(source, "test", &[]), "223-2231");
}

#[test]
fn nested_defer_inside_a_deferred_block() {
    let source = r#"
        export func test() {
            var log = "";
            const add = func(s) { log = log + s; };
            const get = func() { return log; };
            const body = func() {
                defer add("1");
                defer {
                    add("2");
                    defer add("3");
                    add("4");
                    return get();
                };
                add("5");
                return "<err>";
            };
            const v = body();
            return v + "-" + log;
        }
    "#;
    assert_eq!(run_str(source, "test", &[]), "524-52431");
}

#[test]
fn deferred_valueless_expressions() {
    let source = r#"
        export func test(x) {
            var log = "";
            const add = func(s) { log = log + s; };
            const body = func() {
                defer if x {
                    add("2");
                };
                add("1");
            };
            body();
            return log;
        }
    "#;
    assert_eq!(run_str(source, "test", &[Value::Bool(true)]), "12");
    assert_eq!(run_str(source, "test", &[Value::Bool(false)]), "1");
}

#[test]
fn unreachable_code_after_terminal_expression_is_rejected() {
    let mut strings = StringTable::new();
    let result = compile_module("test", "export func f() { return 1; return 2; }", &mut strings);
    assert!(result.module.is_none());
    assert!(result.diagnostics.has_errors());
}

#[test]
fn short_circuit_in_const_initializer_stays_reachable() {
    // Regression shape: short-circuiting inside an initializer must not
    // produce unreachable-code artifacts.
    let source = r#"
        func f(x) {
            return x;
        }
        export func test() {
            const x = f("World" ?? "no");
            return x;
        }
    "#;
    assert_eq!(run_str(source, "test", &[]), "World");
}
