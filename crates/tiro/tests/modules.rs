//! Module loading: imports, exports, serialization round trips.

use pretty_assertions::assert_eq;
use tiro::{compile_module, BytecodeModule, StringTable, Value, Vm, VmErrorKind};

fn compile(name: &str, source: &str, strings: &mut StringTable) -> BytecodeModule {
    let result = compile_module(name, source, strings);
    match result.module {
        Some(module) => module,
        None => panic!("compilation failed:\n{}", result.diagnostics.render(source)),
    }
}

#[test]
fn cross_module_import() {
    let mut strings = StringTable::new();
    let util = compile("util", "export func double(x) { return x * 2; }", &mut strings);
    let main = compile(
        "main",
        r"
        import util;
        export func test() {
            return util.double(21);
        }
        ",
        &mut strings,
    );

    let mut vm = Vm::new(strings);
    vm.load(&util).expect("util loads");
    let main_id = vm.load(&main).expect("main loads");
    let value = vm.invoke(main_id, "test", &[]).expect("runs");
    assert_eq!(vm.as_int(value), Some(42));
}

#[test]
fn dotted_import_paths_resolve_by_full_path() {
    let mut strings = StringTable::new();
    let io = compile("std.io", "export func answer() { return 42; }", &mut strings);
    let main = compile(
        "main",
        r"
        import std.io;
        export func test() {
            return io.answer();
        }
        ",
        &mut strings,
    );

    let mut vm = Vm::new(strings);
    vm.load(&io).expect("std.io loads");
    let main_id = vm.load(&main).expect("main loads");
    let value = vm.invoke(main_id, "test", &[]).expect("runs");
    assert_eq!(vm.as_int(value), Some(42));
}

#[test]
fn missing_import_fails_to_load() {
    let mut strings = StringTable::new();
    let main = compile("main", "import ghost;\nexport func f() { return 1; }", &mut strings);
    let mut vm = Vm::new(strings);
    let error = vm.load(&main).expect_err("import cannot resolve");
    assert_eq!(error.kind, VmErrorKind::ImportFailed);
}

#[test]
fn imported_module_variables_are_readable() {
    let mut strings = StringTable::new();
    let config = compile("config", "export var retries = 3;", &mut strings);
    let main = compile(
        "main",
        r"
        import config;
        export func test() {
            return config.retries;
        }
        ",
        &mut strings,
    );

    let mut vm = Vm::new(strings);
    vm.load(&config).expect("config loads");
    let main_id = vm.load(&main).expect("main loads");
    let value = vm.invoke(main_id, "test", &[]).expect("runs");
    assert_eq!(vm.as_int(value), Some(3));
}

#[test]
fn only_exports_are_visible() {
    let mut strings = StringTable::new();
    let util = compile(
        "util",
        "func hidden() { return 1; }\nexport func visible() { return 2; }",
        &mut strings,
    );
    let mut vm = Vm::new(strings);
    let util_id = vm.load(&util).expect("loads");
    assert!(vm.export(util_id, "visible").is_ok());
    assert_eq!(
        vm.export(util_id, "hidden").expect_err("not exported").kind,
        VmErrorKind::UnknownExport
    );
}

#[test]
fn serialization_round_trips_through_bytes() {
    let mut strings = StringTable::new();
    let module = compile(
        "demo",
        r#"
        export func greet(name) {
            return "hi $name";
        }
        export func add(a, b) {
            return a + b;
        }
        "#,
        &mut strings,
    );

    let bytes = module.to_bytes().expect("serializes");
    let decoded = BytecodeModule::from_bytes(&bytes).expect("deserializes");
    assert_eq!(module, decoded);

    let mut vm = Vm::new(strings);
    let loaded = vm.load(&decoded).expect("decoded module loads");
    let value = vm
        .invoke(loaded, "add", &[Value::SmallInt(40), Value::SmallInt(2)])
        .expect("runs");
    assert_eq!(vm.as_int(value), Some(42));
    let name = vm.str_value("you").expect("allocates");
    let value = vm.invoke(loaded, "greet", &[name]).expect("runs");
    assert_eq!(vm.as_str(value), Some("hi you"));
}

#[test]
fn invoking_repeatedly_is_stable() {
    let mut strings = StringTable::new();
    let module = compile(
        "demo",
        r"
        export func fib(n) {
            if n <= 1 {
                return n;
            }
            return fib(n - 1) + fib(n - 2);
        }
        ",
        &mut strings,
    );
    let mut vm = Vm::new(strings);
    let loaded = vm.load(&module).expect("loads");
    for _ in 0..10 {
        let value = vm.invoke(loaded, "fib", &[Value::SmallInt(12)]).expect("runs");
        assert_eq!(vm.as_int(value), Some(144));
    }
}

#[test]
fn disassembly_renders_every_function() {
    let mut strings = StringTable::new();
    let module = compile(
        "demo",
        r#"
        export func f() {
            return "text" + "${1 + 2}";
        }
        "#,
        &mut strings,
    );
    let dump = tiro::dump_module(&module, &strings);
    assert!(dump.contains("module demo"));
    assert!(dump.contains("function #0"));
    assert!(dump.contains("Ret"));
}
