use pretty_assertions::assert_eq;

use super::*;

fn parse(source: &str) -> (File, Diagnostics, StringTable) {
    let mut strings = StringTable::new();
    let mut diag = Diagnostics::new();
    let file = parse_file(source, &mut strings, &mut diag);
    (file, diag, strings)
}

fn parse_single_func(source: &str) -> (FuncDecl, Diagnostics, StringTable) {
    let (mut file, diag, strings) = parse(source);
    assert_eq!(file.items.len(), 1, "expected exactly one item");
    match file.items.pop() {
        Some(Item::Func(func)) => (func, diag, strings),
        other => panic!("expected a function, found {other:?}"),
    }
}

/// The body of `func f() = EXPR;` for a source fragment.
fn parse_expr_fragment(expr: &str) -> (Expr, Diagnostics, StringTable) {
    let source = format!("func f() = {expr};");
    let (func, diag, strings) = parse_single_func(&source);
    (func.body, diag, strings)
}

#[test]
fn function_declaration_shape() {
    let (func, diag, strings) = parse_single_func("export func add(a, b) { return a + b; }");
    assert!(!diag.has_errors());
    assert!(func.exported);
    assert_eq!(strings.get(func.name.expect("function is named")), "add");
    assert_eq!(func.params.len(), 2);
    assert!(matches!(func.body.kind, ExprKind::Block(_)));
}

#[test]
fn single_expression_body() {
    let (func, diag, _) = parse_single_func("func two() = 1 + 1;");
    assert!(!diag.has_errors());
    assert!(matches!(func.body.kind, ExprKind::Binary { .. }));
}

#[test]
fn precedence_multiplication_binds_tighter() {
    let (expr, diag, _) = parse_expr_fragment("1 + 2 * 3");
    assert!(!diag.has_errors());
    let ExprKind::Binary { op, right, .. } = &expr.kind else {
        panic!("expected binary expression");
    };
    assert_eq!(*op, BinaryOp::Add);
    assert!(matches!(
        right.kind,
        ExprKind::Binary {
            op: BinaryOp::Multiply,
            ..
        }
    ));
}

#[test]
fn power_is_right_associative() {
    let (expr, diag, _) = parse_expr_fragment("2 ** 3 ** 4");
    assert!(!diag.has_errors());
    let ExprKind::Binary { op, left, right } = &expr.kind else {
        panic!("expected binary expression");
    };
    assert_eq!(*op, BinaryOp::Power);
    assert!(matches!(left.kind, ExprKind::Int(2)));
    assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Power, .. }));
}

#[test]
fn assignment_is_right_associative() {
    let (expr, diag, _) = parse_expr_fragment("a = b = 1");
    assert!(!diag.has_errors());
    let ExprKind::Assign { op: None, value, .. } = &expr.kind else {
        panic!("expected assignment");
    };
    assert!(matches!(value.kind, ExprKind::Assign { .. }));
}

#[test]
fn compound_assignment_carries_its_operator() {
    let (expr, diag, _) = parse_expr_fragment("a += 1");
    assert!(!diag.has_errors());
    assert!(matches!(
        expr.kind,
        ExprKind::Assign {
            op: Some(BinaryOp::Add),
            ..
        }
    ));
}

#[test]
fn null_coalesce_binds_below_logical_or() {
    let (expr, diag, _) = parse_expr_fragment("a || b ?? c");
    assert!(!diag.has_errors());
    // `??` is the weaker operator, so it becomes the root.
    assert!(matches!(
        expr.kind,
        ExprKind::Binary {
            op: BinaryOp::NullCoalesce,
            ..
        }
    ));
}

#[test]
fn optional_postfix_chain() {
    let (expr, diag, strings) = parse_expr_fragment("x?.foo?[0]?(1)");
    assert!(!diag.has_errors());
    let ExprKind::Call { access, func, args } = &expr.kind else {
        panic!("expected call");
    };
    assert_eq!(*access, AccessType::Optional);
    assert_eq!(args.len(), 1);
    let ExprKind::Index { access, object, .. } = &func.kind else {
        panic!("expected index");
    };
    assert_eq!(*access, AccessType::Optional);
    let ExprKind::Field { access, name, .. } = &object.kind else {
        panic!("expected field access");
    };
    assert_eq!(*access, AccessType::Optional);
    assert_eq!(strings.get(*name), "foo");
}

#[test]
fn tuple_field_chain() {
    let (expr, diag, _) = parse_expr_fragment("pair.0.1");
    assert!(!diag.has_errors());
    let ExprKind::TupleField { index, object, .. } = &expr.kind else {
        panic!("expected tuple field");
    };
    assert_eq!(*index, 1);
    assert!(matches!(object.kind, ExprKind::TupleField { index: 0, .. }));
}

#[test]
fn container_literals() {
    let (expr, diag, _) = parse_expr_fragment("[1, 2, 3]");
    assert!(!diag.has_errors());
    assert!(matches!(&expr.kind, ExprKind::Array(items) if items.len() == 3));

    let (expr, diag, _) = parse_expr_fragment("map{1: \"a\", 2: \"b\"}");
    assert!(!diag.has_errors());
    assert!(matches!(&expr.kind, ExprKind::Map(pairs) if pairs.len() == 2));

    let (expr, diag, _) = parse_expr_fragment("set{1, 2}");
    assert!(!diag.has_errors());
    assert!(matches!(&expr.kind, ExprKind::Set(items) if items.len() == 2));

    let (expr, diag, _) = parse_expr_fragment("(1, 2)");
    assert!(!diag.has_errors());
    assert!(matches!(&expr.kind, ExprKind::Tuple(items) if items.len() == 2));

    let (expr, diag, _) = parse_expr_fragment("(a: 1, b: 2)");
    assert!(!diag.has_errors());
    assert!(matches!(&expr.kind, ExprKind::Record(fields) if fields.len() == 2));
}

#[test]
fn grouping_parens_do_not_build_tuples() {
    let (expr, diag, _) = parse_expr_fragment("(1 + 2)");
    assert!(!diag.has_errors());
    assert!(matches!(expr.kind, ExprKind::Binary { .. }));
}

#[test]
fn interpolated_string_alternates_chunks_and_expressions() {
    let (expr, diag, _) = parse_expr_fragment(r#""a ${1 + 2} b $x""#);
    assert!(!diag.has_errors());
    let ExprKind::StringFormat { items } = &expr.kind else {
        panic!("expected string format");
    };
    assert_eq!(items.len(), 4);
    assert!(matches!(items[0], StringItem::Chunk { .. }));
    assert!(matches!(items[1], StringItem::Expr(_)));
    assert!(matches!(items[2], StringItem::Chunk { .. }));
    assert!(matches!(items[3], StringItem::Expr(_)));
}

#[test]
fn adjacent_strings_group() {
    let (expr, diag, _) = parse_expr_fragment(r#""a" "b" "c""#);
    assert!(!diag.has_errors());
    assert!(matches!(&expr.kind, ExprKind::StringGroup { group } if group.len() == 3));
}

#[test]
fn tuple_binding_declaration() {
    let (file, diag, _) = parse("var (a, b) = pair();");
    assert!(!diag.has_errors());
    let Item::Var(decl) = &file.items[0] else {
        panic!("expected var declaration");
    };
    assert!(matches!(&decl.bindings[0].kind, BindingKind::Tuple(names) if names.len() == 2));
}

#[test]
fn import_path() {
    let (file, diag, strings) = parse("import std.io;");
    assert!(!diag.has_errors());
    let Item::Import(import) = &file.items[0] else {
        panic!("expected import");
    };
    assert_eq!(strings.get(import.name), "io");
    assert_eq!(import.path.len(), 2);
}

#[test]
fn defer_and_loops_parse() {
    let source = r"
        func run(h) {
            defer h.done();
            while true {
                break;
            }
            for (var i = 0; i < 10; i += 1) {
                continue;
            }
        }
    ";
    let (func, diag, _) = parse_single_func(source);
    assert!(!diag.has_errors());
    let ExprKind::Block(block) = &func.body.kind else {
        panic!("expected block body");
    };
    assert!(matches!(block.stmts[0], Stmt::Defer(_)));
    assert!(matches!(block.stmts[1], Stmt::While(_)));
    assert!(matches!(block.stmts[2], Stmt::For(_)));
}

#[test]
fn assert_with_message() {
    let (expr, diag, _) = parse_expr_fragment(r#"assert(x > 0, "must be positive")"#);
    assert!(!diag.has_errors());
    assert!(matches!(&expr.kind, ExprKind::Assert { message: Some(_), .. }));
}

#[test]
fn reserved_keywords_are_rejected() {
    let (_, diag, _) = parse("func f() { try { } }");
    assert!(diag.has_errors());
}

#[test]
fn error_recovery_in_argument_list() {
    // The broken second argument must not hide the broken fourth one.
    let (file, diag, _) = parse("func f() { g(1, +, 3, *); }");
    assert!(diag.has_errors());
    assert!(diag.error_count() >= 2);
    // The tree survives with the function and call intact.
    assert_eq!(file.items.len(), 1);
}

#[test]
fn one_synthetic_error_adds_one_diagnostic() {
    let clean = "func f() { var x = 1; g(x); }";
    let broken = "func f() { var x = ; g(x); }";
    let (_, clean_diag, _) = parse(clean);
    let (_, broken_diag, _) = parse(broken);
    assert_eq!(clean_diag.error_count(), 0);
    assert_eq!(broken_diag.error_count(), clean_diag.error_count() + 1);
}

#[test]
fn recovery_keeps_following_statements() {
    let (file, diag, _) = parse("func f() { var = 1; var y = 2; }");
    assert!(diag.has_errors());
    let Item::Func(func) = &file.items[0] else {
        panic!("expected function");
    };
    let ExprKind::Block(block) = &func.body.kind else {
        panic!("expected block");
    };
    // The second declaration survives recovery.
    assert!(block.stmts.iter().any(|s| matches!(s, Stmt::Var(v) if !v.has_error)));
}

#[test]
fn partial_nodes_are_flagged() {
    let (file, diag, _) = parse("func f( { }");
    assert!(diag.has_errors());
    let Item::Func(func) = &file.items[0] else {
        panic!("expected function");
    };
    assert!(func.has_error);
}

#[test]
fn nested_function_statement() {
    let source = "func mk() { var x = 0; func inc() { return x; } return inc; }";
    let (func, diag, _) = parse_single_func(source);
    assert!(!diag.has_errors());
    let ExprKind::Block(block) = &func.body.kind else {
        panic!("expected block");
    };
    assert!(matches!(&block.stmts[1], Stmt::Func(f) if f.name.is_some()));
}

#[test]
fn block_value_is_trailing_expression_statement() {
    let (func, diag, _) = parse_single_func("func f() { 1; 2 }");
    assert!(!diag.has_errors());
    let ExprKind::Block(block) = &func.body.kind else {
        panic!("expected block");
    };
    let value = block.value_stmt().expect("block has a value");
    assert!(matches!(value.expr.kind, ExprKind::Int(2)));
}
