//! Closures: captured variables, shared environments, per-iteration loop
//! environments.

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

fn run_rendered(source: &str, name: &str, args: &[Value]) -> String {
    let (vm, value) = run(source, name, args);
    let value = value.expect("invocation succeeds");
    vm.render(value)
}

fn run_int(source: &str, name: &str, args: &[Value]) -> i64 {
    let (vm, value) = run(source, name, args);
    let value = value.expect("invocation succeeds");
    vm.as_int(value).expect("result is an integer")
}

#[test]
fn captured_mutation_is_shared_across_calls() {
    let source = r"
        func mk() {
            var x = 0;
            func inc() {
                x += 1;
                return x;
            }
            return inc;
        }

        export func test() {
            const inc = mk();
            return (inc(), inc(), inc());
        }
    ";
    assert_eq!(run_rendered(source, "test", &[]), "(1, 2, 3)");
}

#[test]
fn independent_instances_get_independent_environments() {
    let source = r"
        func mk() {
            var x = 0;
            func inc() {
                x += 1;
                return x;
            }
            return inc;
        }

        export func test() {
            const a = mk();
            const b = mk();
            a();
            a();
            return (a(), b());
        }
    ";
    assert_eq!(run_rendered(source, "test", &[]), "(3, 1)");
}

#[test]
fn two_closures_share_one_environment() {
    let source = r"
        export func test() {
            var total = 0;
            const add = func(n) { total += n; };
            const get = func() { return total; };
            add(5);
            add(7);
            return get();
        }
    ";
    assert_eq!(run_int(source, "test", &[]), 12);
}

#[test]
fn captured_parameters() {
    let source = r"
        func adder(base) {
            return func(n) { return base + n; };
        }

        export func test() {
            const add10 = adder(10);
            return add10(32);
        }
    ";
    assert_eq!(run_int(source, "test", &[]), 42);
}

#[test]
fn nested_capture_walks_multiple_levels() {
    let source = r"
        export func test() {
            var a = 1;
            const outer = func() {
                var b = 10;
                const inner = func() {
                    return a + b;
                };
                return inner();
            };
            return outer();
        }
    ";
    assert_eq!(run_int(source, "test", &[]), 11);
}

#[test]
fn loop_iterations_capture_fresh_environments() {
    // Each loop-body iteration starts a new environment, so every closure
    // sees its own `captured`.
    let source = r"
        export func test() {
            var fns = [];
            for (var i = 0; i < 3; i += 1) {
                var captured = i * 10;
                fns.push(func() { return captured; });
            }
            return (fns[0](), fns[1](), fns[2]());
        }
    ";
    assert_eq!(run_rendered(source, "test", &[]), "(0, 10, 20)");
}

#[test]
fn closures_escape_their_defining_frame() {
    let source = r"
        func mk() {
            var hidden = 41;
            return func() { hidden += 1; return hidden; };
        }

        export func test() {
            const f = mk();
            return f();
        }
    ";
    assert_eq!(run_int(source, "test", &[]), 42);
}

#[test]
fn recursion_through_a_local_function() {
    let source = r"
        export func test(n) {
            func fib(k) {
                if k <= 1 {
                    return k;
                }
                return fib(k - 1) + fib(k - 2);
            }
            return fib(n);
        }
    ";
    assert_eq!(run_int(source, "test", &[Value::SmallInt(10)]), 55);
}
