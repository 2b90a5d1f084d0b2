//! Structural validation of the resolved AST.
//!
//! Runs after symbol resolution and checks everything that is about *shape*
//! rather than names: `break`/`continue` placement, `return` placement,
//! assignment targets, `const` rules. Offending nodes are flagged so IR
//! construction skips them.

use crate::{
    ast::{
        AccessType, Binding, Expr, ExprKind, File, FuncDecl, Item, Stmt, StringItem, VarDecl,
    },
    diagnostics::Diagnostics,
    semantics::symbols::{SymbolKind, SymbolTable},
    strings::StringTable,
};

/// Validates the file structure; reports into `diag` and flags broken nodes.
pub fn check_structure(file: &mut File, table: &SymbolTable, strings: &StringTable, diag: &mut Diagnostics) {
    let mut check = StructureCheck {
        table,
        strings,
        diag,
        loop_depth: 0,
        func_depth: 0,
    };
    check.visit_file(file);
}

struct StructureCheck<'a> {
    table: &'a SymbolTable,
    strings: &'a StringTable,
    diag: &'a mut Diagnostics,
    loop_depth: u32,
    func_depth: u32,
}

impl StructureCheck<'_> {
    fn visit_file(&mut self, file: &mut File) {
        for item in &mut file.items {
            match item {
                Item::Import(_) => {}
                Item::Func(func) => self.visit_func_decl(func),
                Item::Var(decl) => {
                    self.visit_var_decl(decl, true);
                }
            }
        }
    }

    fn visit_func_decl(&mut self, func: &mut FuncDecl) {
        if func.has_error {
            return;
        }
        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        self.func_depth += 1;
        self.visit_expr(&mut func.body);
        self.func_depth -= 1;
        self.loop_depth = saved_loops;
    }

    fn visit_var_decl(&mut self, decl: &mut VarDecl, file_scope: bool) {
        if decl.has_error {
            return;
        }
        for binding in &mut decl.bindings {
            self.visit_binding(binding, file_scope);
        }
    }

    fn visit_binding(&mut self, binding: &mut Binding, file_scope: bool) {
        if binding.has_error {
            return;
        }
        if binding.is_const && binding.init.is_none() {
            self.diag
                .error(binding.span, "a constant must be initialized at its declaration");
            binding.has_error = true;
        }
        if file_scope {
            // Module variables become bytecode `Variable` members whose
            // initial value is a module constant, so anything beyond a
            // literal has no place to run. Booleans are excluded because the
            // module member table has no boolean constants.
            if let Some(init) = &binding.init {
                if !matches!(
                    init.kind,
                    ExprKind::Null | ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Str(_) | ExprKind::Symbol(_)
                ) {
                    self.diag.error(
                        init.span,
                        "module level variable initializers must be null, number, string or symbol literals",
                    );
                    binding.has_error = true;
                }
            }
        }
        if let Some(init) = &mut binding.init {
            self.visit_expr(init);
        }
    }

    fn visit_stmt(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::Empty(_) => {}
            Stmt::Var(decl) => self.visit_var_decl(decl, false),
            Stmt::Func(func) => self.visit_func_decl(func),
            Stmt::Defer(defer) => self.visit_expr(&mut defer.expr),
            Stmt::While(stmt) => {
                self.visit_expr(&mut stmt.cond);
                self.loop_depth += 1;
                self.visit_expr(&mut stmt.body);
                self.loop_depth -= 1;
            }
            Stmt::For(stmt) => {
                if let Some(decl) = &mut stmt.decl {
                    self.visit_var_decl(decl, false);
                }
                if let Some(cond) = &mut stmt.cond {
                    self.visit_expr(cond);
                }
                if let Some(step) = &mut stmt.step {
                    self.visit_expr(step);
                }
                self.loop_depth += 1;
                self.visit_expr(&mut stmt.body);
                self.loop_depth -= 1;
            }
            Stmt::Expr(stmt) => self.visit_expr(&mut stmt.expr),
        }
    }

    /// Validates the left-hand side of an assignment. Returns false when the
    /// target is unusable.
    fn check_assign_target(&mut self, target: &mut Expr, allow_tuple: bool) -> bool {
        match &mut target.kind {
            ExprKind::Var(name) => {
                let Some(symbol_id) = self.table.find_ref(target.id) else {
                    return false; // unresolved; already reported
                };
                let symbol = self.table.symbol(symbol_id);
                match symbol.kind {
                    SymbolKind::Variable | SymbolKind::Parameter => {}
                    SymbolKind::Function | SymbolKind::Import { .. } | SymbolKind::TypeSymbol => {
                        self.diag.error(
                            target.span,
                            format!("'{}' cannot be assigned to", self.strings.get(*name)),
                        );
                        return false;
                    }
                }
                if symbol.is_const {
                    self.diag.error(
                        target.span,
                        format!("'{}' is constant and cannot be assigned to", self.strings.get(*name)),
                    );
                    return false;
                }
                true
            }
            ExprKind::Field { access, object, .. }
            | ExprKind::TupleField { access, object, .. } => {
                if *access == AccessType::Optional {
                    self.diag
                        .error(target.span, "optional accesses are not allowed on the left-hand side");
                    return false;
                }
                self.visit_expr(object);
                true
            }
            ExprKind::Index { access, object, index } => {
                if *access == AccessType::Optional {
                    self.diag
                        .error(target.span, "optional accesses are not allowed on the left-hand side");
                    return false;
                }
                self.visit_expr(object);
                self.visit_expr(index);
                true
            }
            ExprKind::Tuple(items) => {
                if !allow_tuple {
                    self.diag
                        .error(target.span, "tuple targets only support plain assignment");
                    return false;
                }
                let mut ok = true;
                for item in items {
                    ok &= self.check_assign_target(item, false);
                }
                ok
            }
            _ => {
                self.diag.error(target.span, "invalid left-hand side of an assignment");
                false
            }
        }
    }

    fn visit_expr(&mut self, expr: &mut Expr) {
        if expr.has_error {
            return;
        }
        match &mut expr.kind {
            ExprKind::Null
            | ExprKind::Bool(_)
            | ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Symbol(_)
            | ExprKind::Var(_)
            | ExprKind::Error => {}
            ExprKind::Break | ExprKind::Continue => {
                if self.loop_depth == 0 {
                    self.diag.error(
                        expr.span,
                        "break and continue are only allowed inside loops",
                    );
                    expr.has_error = true;
                }
            }
            ExprKind::Return { value } => {
                if self.func_depth == 0 {
                    self.diag.error(expr.span, "return is only allowed inside a function");
                    expr.has_error = true;
                }
                if let Some(value) = value {
                    self.visit_expr(value);
                }
            }
            ExprKind::Block(block) => {
                for stmt in &mut block.stmts {
                    self.visit_stmt(stmt);
                }
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.visit_expr(cond);
                self.visit_expr(then_branch);
                if let Some(else_branch) = else_branch {
                    self.visit_expr(else_branch);
                }
            }
            ExprKind::Unary { operand, .. } => self.visit_expr(operand),
            ExprKind::Binary { left, right, .. } => {
                self.visit_expr(left);
                self.visit_expr(right);
            }
            ExprKind::Assign { op, target, value } => {
                if !self.check_assign_target(target, op.is_none()) {
                    expr.has_error = true;
                }
                self.visit_expr(value);
            }
            ExprKind::StringFormat { items } => {
                for item in items {
                    if let StringItem::Expr(expr) = item {
                        self.visit_expr(expr);
                    }
                }
            }
            ExprKind::StringGroup { group } => {
                for expr in group {
                    self.visit_expr(expr);
                }
            }
            ExprKind::Func(func) => self.visit_func_decl(func),
            ExprKind::Call { func, args, .. } => {
                self.visit_expr(func);
                for arg in args {
                    self.visit_expr(arg);
                }
            }
            ExprKind::Field { object, .. } | ExprKind::TupleField { object, .. } => self.visit_expr(object),
            ExprKind::Index { object, index, .. } => {
                self.visit_expr(object);
                self.visit_expr(index);
            }
            ExprKind::Array(items) | ExprKind::Tuple(items) | ExprKind::Set(items) => {
                for item in items {
                    self.visit_expr(item);
                }
            }
            ExprKind::Map(pairs) => {
                for (key, value) in pairs {
                    self.visit_expr(key);
                    self.visit_expr(value);
                }
            }
            ExprKind::Record(fields) => {
                for field in fields {
                    self.visit_expr(&mut field.value);
                }
            }
            ExprKind::Assert { cond, message } => {
                self.visit_expr(cond);
                if let Some(message) = message {
                    self.visit_expr(message);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parser::parse_file, semantics::resolve_symbols};

    fn check(source: &str) -> Diagnostics {
        let mut strings = StringTable::new();
        let mut diag = Diagnostics::new();
        let mut file = parse_file(source, &mut strings, &mut diag);
        let table = resolve_symbols(&mut file, &mut strings, &mut diag);
        check_structure(&mut file, &table, &strings, &mut diag);
        diag
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        assert!(check("func f() { break; }").has_errors());
        assert!(check("func f() { while true { break; } }").error_count() == 0);
    }

    #[test]
    fn continue_outside_loop_is_rejected() {
        assert!(check("func f() { continue; }").has_errors());
    }

    #[test]
    fn closures_do_not_inherit_the_enclosing_loop() {
        let source = "func f() { while true { const g = func() { break; }; g(); } }";
        assert!(check(source).has_errors());
    }

    #[test]
    fn return_outside_function_is_rejected() {
        assert!(check("var x = 1;\nfunc ok() { return 1; }").error_count() == 0);
    }

    #[test]
    fn const_requires_initializer() {
        assert!(check("func f() { const x; }").has_errors());
        assert!(check("func f() { var x; }").error_count() == 0);
    }

    #[test]
    fn assignment_to_const_is_rejected() {
        assert!(check("func f() { const x = 1; x = 2; }").has_errors());
    }

    #[test]
    fn assignment_to_function_is_rejected() {
        assert!(check("func f() { }\nfunc g() { f = 1; }").has_errors());
    }

    #[test]
    fn optional_access_on_lhs_is_rejected() {
        assert!(check("func f(o) { o?.x = 1; }").has_errors());
        assert!(check("func f(o) { o?[0] = 1; }").has_errors());
    }

    #[test]
    fn tuple_target_requires_plain_assignment() {
        assert!(check("func f(a, b) { (a, b) = (b, a); }").error_count() == 0);
        assert!(check("func f(a, b) { (a, b) += 1; }").has_errors());
    }

    #[test]
    fn invalid_assignment_target() {
        assert!(check("func f() { 1 = 2; }").has_errors());
    }

    #[test]
    fn module_variable_initializers_must_be_literals() {
        assert!(check("var x = 1;").error_count() == 0);
        assert!(check("var x = 1 + 2;").has_errors());
    }
}
