//! Evaluation-order guarantees: strictly left to right across all
//! expression forms, with short-circuiting operators evaluating lazily but
//! still in order.

use pretty_assertions::assert_eq;
use tiro::{compile_module, StringTable, Value, Vm};

fn run_str(source: &str, name: &str, args: &[Value]) -> String {
    let mut strings = StringTable::new();
    let result = compile_module("test", source, &mut strings);
    let module = match result.module {
        Some(module) => module,
        None => panic!("compilation failed:\n{}", result.diagnostics.render(source)),
    };
    let mut vm = Vm::new(strings);
    let loaded = vm.load(&module).expect("module loads");
    let value = vm.invoke(loaded, name, args).expect("invocation succeeds");
    vm.as_str(value).expect("result is a string").to_owned()
}

/// Wraps a body in the standard observation harness: `t(tag, value)` logs
/// the tag and passes the value through.
fn harness(body: &str) -> String {
    format!(
        r#"
        export func test() {{
            var log = "";
            const t = func(tag, value) {{ log = log + tag; return value; }};
            {body}
            return log;
        }}
        "#
    )
}

#[test]
fn binary_operands_evaluate_left_to_right() {
    let source = harness("const r = t(\"a\", 1) + t(\"b\", 2) * t(\"c\", 3);");
    assert_eq!(run_str(&source, "test", &[]), "abc");
}

#[test]
fn call_arguments_evaluate_left_to_right_after_the_callee() {
    let source = harness(
        r#"
        const f = func(x, y, z) { return x + y + z; };
        const r = t("f", f)(t("a", 1), t("b", 2), t("c", 3));
        "#,
    );
    assert_eq!(run_str(&source, "test", &[]), "fabc");
}

#[test]
fn container_literals_evaluate_left_to_right() {
    let source = harness("const arr = [t(\"a\", 1), t(\"b\", 2), t(\"c\", 3)];");
    assert_eq!(run_str(&source, "test", &[]), "abc");

    let source = harness("const tup = (t(\"a\", 1), t(\"b\", 2));");
    assert_eq!(run_str(&source, "test", &[]), "ab");

    let source = harness("const m = map{t(\"k1\", 1): t(\"v1\", 2), t(\"k2\", 3): t(\"v2\", 4)};");
    assert_eq!(run_str(&source, "test", &[]), "k1v1k2v2");

    let source = harness("const s = set{t(\"a\", 1), t(\"b\", 2)};");
    assert_eq!(run_str(&source, "test", &[]), "ab");
}

#[test]
fn record_fields_evaluate_in_source_order_despite_key_permutation() {
    // Two literals with permuted keys share one template; evaluation still
    // follows the written order.
    let source = harness(
        r#"
        const p = (x: t("a", 1), y: t("b", 2));
        const q = (y: t("c", 3), x: t("d", 4));
        "#,
    );
    assert_eq!(run_str(&source, "test", &[]), "abcd");
}

#[test]
fn index_assignment_evaluates_target_before_value() {
    let source = harness(
        r#"
        const arr = [0, 0];
        arr[t("i", 0)] = t("v", 7);
        "#,
    );
    assert_eq!(run_str(&source, "test", &[]), "iv");
}

#[test]
fn compound_assignment_reads_the_target_first() {
    let source = harness(
        r#"
        const arr = [10];
        arr[t("i", 0)] += t("v", 5);
        assert(arr[0] == 15, "compound add");
        "#,
    );
    assert_eq!(run_str(&source, "test", &[]), "iv");
}

#[test]
fn interpolation_pieces_evaluate_in_order() {
    let source = harness(r#"const s = "${t("a", 1)} and ${t("b", 2)}";"#);
    assert_eq!(run_str(&source, "test", &[]), "ab");
}

#[test]
fn short_circuiting_still_runs_left_to_right() {
    let source = harness(
        r#"
        const r1 = t("a", false) && t("x", true);
        const r2 = t("b", true) || t("y", true);
        const r3 = t("c", 1) ?? t("z", 2);
        "#,
    );
    assert_eq!(run_str(&source, "test", &[]), "abc");
}

#[test]
fn method_receiver_evaluates_before_arguments() {
    let source = harness(
        r#"
        const arr = [];
        t("r", arr).push(t("a", 1));
        "#,
    );
    assert_eq!(run_str(&source, "test", &[]), "ra");
}

#[test]
fn repeated_runs_observe_the_same_order() {
    let source = harness("const r = t(\"a\", 1) + t(\"b\", 2) + t(\"c\", 3);");
    let first = run_str(&source, "test", &[]);
    for _ in 0..3 {
        assert_eq!(run_str(&source, "test", &[]), first);
    }
}
