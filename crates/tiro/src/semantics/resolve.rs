//! Two-pass symbol resolution.
//!
//! Pass 1 (scope builder) walks declarations, builds the scope tree and
//! registers every declared symbol. References are *not* resolved yet — only
//! their surrounding scope is recorded, because file-scope functions must be
//! visible before their declaration point.
//!
//! Pass 2 (resolver) activates symbols in program order, resolves every name
//! reference by walking the scope chain, and marks symbols as captured when
//! they are referenced from a nested function.

use ahash::AHashMap;

use crate::{
    ast::{
        AstId, Binding, BindingKind, Expr, ExprKind, File, FuncDecl, Item, Stmt, StringItem, VarDecl,
    },
    diagnostics::Diagnostics,
    semantics::symbols::{ScopeId, ScopeKind, Symbol, SymbolId, SymbolKey, SymbolKind, SymbolTable},
    strings::StringTable,
};

/// Runs both passes and returns the completed symbol table.
pub fn resolve_symbols(file: &mut File, strings: &mut StringTable, diag: &mut Diagnostics) -> SymbolTable {
    let mut table = SymbolTable::new();
    let mut surrounding = AHashMap::new();

    {
        let mut builder = ScopeBuilder {
            table: &mut table,
            surrounding: &mut surrounding,
            strings,
            diag,
            current_scope: ScopeId::ROOT,
            current_func: None,
        };
        builder.visit_file(file);
    }
    {
        let mut resolver = Resolver {
            table: &mut table,
            surrounding: &surrounding,
            strings,
            diag,
        };
        resolver.visit_file(file);
    }

    table
}

// --- pass 1 ---

struct ScopeBuilder<'a> {
    table: &'a mut SymbolTable,
    /// `AstId` of a reference -> the scope it appears in.
    surrounding: &'a mut AHashMap<AstId, ScopeId>,
    strings: &'a mut StringTable,
    diag: &'a mut Diagnostics,
    current_scope: ScopeId,
    current_func: Option<AstId>,
}

impl ScopeBuilder<'_> {
    fn visit_file(&mut self, file: &mut File) {
        let scope = self
            .table
            .register_scope(ScopeId::ROOT, None, ScopeKind::File, file.id);
        let saved = std::mem::replace(&mut self.current_scope, scope);
        for item in &mut file.items {
            match item {
                Item::Import(import) => {
                    if import.has_error {
                        continue;
                    }
                    let mut joined = String::new();
                    for element in &import.path {
                        if !joined.is_empty() {
                            joined.push('.');
                        }
                        joined.push_str(self.strings.get(*element));
                    }
                    let path = self.strings.insert(&joined);
                    let key = SymbolKey::node(import.id);
                    if self
                        .register_decl(import.name, import.span, key, SymbolKind::Import { path }, false, false)
                        .is_none()
                    {
                        import.has_error = true;
                    }
                }
                Item::Func(func) => self.visit_func_decl(func),
                Item::Var(decl) => self.visit_var_decl(decl),
            }
        }
        self.current_scope = saved;
    }

    fn visit_func_decl(&mut self, func: &mut FuncDecl) {
        if func.has_error {
            return;
        }
        if let Some(name) = func.name {
            let key = SymbolKey::node(func.id);
            if self
                .register_decl(name, func.span, key, SymbolKind::Function, true, func.exported)
                .is_none()
            {
                func.has_error = true;
                return;
            }
        }

        let scope = self
            .table
            .register_scope(self.current_scope, Some(func.id), ScopeKind::Function, func.id);
        let saved_scope = std::mem::replace(&mut self.current_scope, scope);
        let saved_func = std::mem::replace(&mut self.current_func, Some(func.id));

        for param in &func.params {
            let key = SymbolKey::node(param.id);
            let _ = self.register_decl(param.name, param.span, key, SymbolKind::Parameter, false, false);
        }
        self.visit_block_wrapped(&mut func.body);

        self.current_scope = saved_scope;
        self.current_func = saved_func;
    }

    fn visit_var_decl(&mut self, decl: &mut VarDecl) {
        if decl.has_error {
            return;
        }
        for binding in &mut decl.bindings {
            self.visit_binding(binding, decl.exported);
        }
    }

    fn visit_binding(&mut self, binding: &mut Binding, exported: bool) {
        if binding.has_error {
            return;
        }
        match &binding.kind {
            BindingKind::Name(name) => {
                let key = SymbolKey::node(binding.id);
                if self
                    .register_decl(*name, binding.span, key, SymbolKind::Variable, binding.is_const, exported)
                    .is_none()
                {
                    binding.has_error = true;
                }
            }
            BindingKind::Tuple(names) => {
                for (index, name) in names.iter().enumerate() {
                    let key = SymbolKey::element(binding.id, u32::try_from(index).expect("binding index"));
                    if self
                        .register_decl(*name, binding.span, key, SymbolKind::Variable, binding.is_const, exported)
                        .is_none()
                    {
                        binding.has_error = true;
                    }
                }
            }
        }
        if let Some(init) = &mut binding.init {
            self.visit_expr(init);
        }
    }

    fn register_decl(
        &mut self,
        name: crate::strings::InternedString,
        span: crate::span::Span,
        key: SymbolKey,
        kind: SymbolKind,
        is_const: bool,
        exported: bool,
    ) -> Option<SymbolId> {
        let symbol = Symbol {
            parent_scope: self.current_scope,
            name,
            kind,
            key,
            is_const,
            captured: false,
            active: false,
            exported,
        };
        let registered = self.table.register_decl(self.current_scope, symbol);
        if registered.is_none() {
            self.diag.error(
                span,
                format!(
                    "the name '{}' has already been declared in this scope",
                    self.strings.get(name)
                ),
            );
        }
        registered
    }

    fn visit_stmt(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::Empty(_) => {}
            Stmt::Var(decl) => self.visit_var_decl(decl),
            Stmt::Func(func) => self.visit_func_decl(func),
            Stmt::Defer(defer) => self.visit_expr(&mut defer.expr),
            Stmt::While(stmt) => {
                self.visit_expr(&mut stmt.cond);
                self.visit_loop_body(&mut stmt.body);
            }
            Stmt::For(stmt) => {
                let scope =
                    self.table
                        .register_scope(self.current_scope, self.current_func, ScopeKind::ForStatement, stmt.id);
                let saved = std::mem::replace(&mut self.current_scope, scope);
                if let Some(decl) = &mut stmt.decl {
                    self.visit_var_decl(decl);
                }
                if let Some(cond) = &mut stmt.cond {
                    self.visit_expr(cond);
                }
                if let Some(step) = &mut stmt.step {
                    self.visit_expr(step);
                }
                self.visit_loop_body(&mut stmt.body);
                self.current_scope = saved;
            }
            Stmt::Expr(stmt) => self.visit_expr(&mut stmt.expr),
        }
    }

    /// Ensures the child is wrapped in a fresh block scope even when it is
    /// not itself a block expression (single-expression function bodies).
    fn visit_block_wrapped(&mut self, expr: &mut Expr) {
        if matches!(expr.kind, ExprKind::Block(_)) {
            self.visit_expr(expr);
        } else {
            let scope = self
                .table
                .register_scope(self.current_scope, self.current_func, ScopeKind::Block, expr.id);
            let saved = std::mem::replace(&mut self.current_scope, scope);
            self.visit_expr_children(expr);
            self.current_scope = saved;
        }
    }

    fn visit_loop_body(&mut self, body: &mut Expr) {
        if body.has_error {
            return;
        }
        self.visit_block_wrapped(body);
        if let Some(scope_id) = self.table.find_scope(body.id) {
            self.table.scope_mut(scope_id).is_loop_scope = true;
        }
    }

    fn visit_expr(&mut self, expr: &mut Expr) {
        if expr.has_error {
            return;
        }
        match &expr.kind {
            ExprKind::Var(_) => {
                self.surrounding.insert(expr.id, self.current_scope);
                return;
            }
            ExprKind::Block(_) => {
                let scope = self
                    .table
                    .register_scope(self.current_scope, self.current_func, ScopeKind::Block, expr.id);
                let saved = std::mem::replace(&mut self.current_scope, scope);
                let ExprKind::Block(block) = &mut expr.kind else { unreachable!() };
                for stmt in &mut block.stmts {
                    self.visit_stmt(stmt);
                }
                self.current_scope = saved;
                return;
            }
            _ => {}
        }
        self.visit_expr_children(expr);
    }

    fn visit_expr_children(&mut self, expr: &mut Expr) {
        match &mut expr.kind {
            ExprKind::Null
            | ExprKind::Bool(_)
            | ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Symbol(_)
            | ExprKind::Break
            | ExprKind::Continue
            | ExprKind::Error => {}
            ExprKind::Var(_) | ExprKind::Block(_) => unreachable!("handled by visit_expr"),
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
            ExprKind::Assign { target, value, .. } => {
                self.visit_expr(target);
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
            ExprKind::Return { value } => {
                if let Some(value) = value {
                    self.visit_expr(value);
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

// --- pass 2 ---

struct Resolver<'a> {
    table: &'a mut SymbolTable,
    surrounding: &'a AHashMap<AstId, ScopeId>,
    strings: &'a StringTable,
    diag: &'a mut Diagnostics,
}

impl Resolver<'_> {
    fn visit_file(&mut self, file: &mut File) {
        // Function declarations at file scope are visible everywhere in the
        // file, including before their declaration point.
        if let Some(scope_id) = self.table.find_scope(file.id) {
            let entries: Vec<SymbolId> = self.table.scope(scope_id).entries.clone();
            for symbol_id in entries {
                if self.table.symbol(symbol_id).kind == SymbolKind::Function {
                    self.table.symbol_mut(symbol_id).active = true;
                }
            }
        }

        for item in &mut file.items {
            match item {
                Item::Import(import) => {
                    if import.has_error {
                        continue;
                    }
                    self.activate(SymbolKey::node(import.id));
                }
                Item::Func(func) => self.visit_func_decl(func),
                Item::Var(decl) => self.visit_var_decl(decl),
            }
        }
    }

    fn visit_func_decl(&mut self, func: &mut FuncDecl) {
        if func.has_error {
            return;
        }
        // Function names are visible from their own bodies.
        if func.name.is_some() {
            self.activate(SymbolKey::node(func.id));
        }
        for param in &func.params {
            self.activate(SymbolKey::node(param.id));
        }
        self.visit_expr(&mut func.body);
    }

    fn visit_var_decl(&mut self, decl: &mut VarDecl) {
        if decl.has_error {
            return;
        }
        // A binding is not active inside its own initializer.
        for binding in &mut decl.bindings {
            if binding.has_error {
                continue;
            }
            if let Some(init) = &mut binding.init {
                self.visit_expr(init);
            }
            match &binding.kind {
                BindingKind::Name(_) => self.activate(SymbolKey::node(binding.id)),
                BindingKind::Tuple(names) => {
                    for index in 0..names.len() {
                        self.activate(SymbolKey::element(binding.id, u32::try_from(index).expect("binding index")));
                    }
                }
            }
        }
    }

    fn activate(&mut self, key: SymbolKey) {
        if let Some(symbol_id) = self.table.find_decl(key) {
            self.table.symbol_mut(symbol_id).active = true;
        }
    }

    fn visit_stmt(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::Empty(_) => {}
            Stmt::Var(decl) => self.visit_var_decl(decl),
            Stmt::Func(func) => self.visit_func_decl(func),
            Stmt::Defer(defer) => self.visit_expr(&mut defer.expr),
            Stmt::While(stmt) => {
                self.visit_expr(&mut stmt.cond);
                self.visit_expr(&mut stmt.body);
            }
            Stmt::For(stmt) => {
                if let Some(decl) = &mut stmt.decl {
                    self.visit_var_decl(decl);
                }
                if let Some(cond) = &mut stmt.cond {
                    self.visit_expr(cond);
                }
                if let Some(step) = &mut stmt.step {
                    self.visit_expr(step);
                }
                self.visit_expr(&mut stmt.body);
            }
            Stmt::Expr(stmt) => self.visit_expr(&mut stmt.expr),
        }
    }

    fn visit_var_expr(&mut self, id: AstId, span: crate::span::Span, name: crate::strings::InternedString) -> bool {
        let Some(&expr_scope_id) = self.surrounding.get(&id) else {
            return true; // inside an error subtree that pass 1 skipped
        };
        let Some((decl_scope_id, symbol_id)) = self.table.find_name(expr_scope_id, name) else {
            self.diag
                .error(span, format!("undefined symbol: '{}'", self.strings.get(name)));
            return false;
        };

        // Only symbols that are active by now can be referenced.
        if !self.table.symbol(symbol_id).active {
            self.diag.error(
                span,
                format!(
                    "symbol '{}' referenced before it became active in the current scope",
                    self.strings.get(name)
                ),
            );
            return false;
        }

        // Mark symbols as captured if they are referenced from a nested
        // function. Variables and constants at file scope are not captured.
        if !self.table.symbol(symbol_id).captured {
            let decl_scope = self.table.scope(decl_scope_id);
            let can_capture = decl_scope.kind != ScopeKind::File && decl_scope.kind != ScopeKind::Global;
            let decl_function = decl_scope.function;
            let expr_function = self.table.scope(expr_scope_id).function;
            if can_capture
                && decl_function != expr_function
                && self.table.is_strict_ancestor(decl_scope_id, expr_scope_id)
            {
                self.table.symbol_mut(symbol_id).captured = true;
            }
        }

        self.table.register_ref(id, symbol_id);
        true
    }

    fn visit_expr(&mut self, expr: &mut Expr) {
        if expr.has_error {
            return;
        }
        if let ExprKind::Var(name) = expr.kind {
            if !self.visit_var_expr(expr.id, expr.span, name) {
                expr.has_error = true;
            }
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
            | ExprKind::Break
            | ExprKind::Continue
            | ExprKind::Error => {}
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
            ExprKind::Assign { target, value, .. } => {
                self.visit_expr(target);
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
            ExprKind::Return { value } => {
                if let Some(value) = value {
                    self.visit_expr(value);
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
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parser::parse_file;

    fn resolve(source: &str) -> (File, SymbolTable, Diagnostics, StringTable) {
        let mut strings = StringTable::new();
        let mut diag = Diagnostics::new();
        let mut file = parse_file(source, &mut strings, &mut diag);
        assert!(!diag.has_errors(), "parse failed: {}", diag.render(source));
        let table = resolve_symbols(&mut file, &mut strings, &mut diag);
        (file, table, diag, strings)
    }

    #[test]
    fn forward_reference_to_file_scope_function_is_allowed() {
        let (_, _, diag, _) = resolve("func a() { return b(); } func b() { return 1; }");
        assert!(!diag.has_errors());
    }

    #[test]
    fn forward_reference_to_local_is_an_error() {
        let mut strings = StringTable::new();
        let mut diag = Diagnostics::new();
        let mut file = parse_file("func f() { g(x); var x = 1; } func g(a) { return a; }", &mut strings, &mut diag);
        resolve_symbols(&mut file, &mut strings, &mut diag);
        assert!(diag.has_errors());
    }

    #[test]
    fn binding_is_not_visible_in_its_own_initializer() {
        let mut strings = StringTable::new();
        let mut diag = Diagnostics::new();
        let mut file = parse_file("func f() { var x = x; }", &mut strings, &mut diag);
        resolve_symbols(&mut file, &mut strings, &mut diag);
        assert!(diag.has_errors());
    }

    #[test]
    fn duplicate_declaration_in_same_scope() {
        let mut strings = StringTable::new();
        let mut diag = Diagnostics::new();
        let mut file = parse_file("func f() { var x = 1; var x = 2; }", &mut strings, &mut diag);
        resolve_symbols(&mut file, &mut strings, &mut diag);
        assert!(diag.has_errors());
    }

    #[test]
    fn shadowing_in_nested_scope_is_allowed() {
        let (_, _, diag, _) = resolve("func f() { var x = 1; { var x = 2; } return x; }");
        assert!(!diag.has_errors());
    }

    #[test]
    fn capture_marks_symbol() {
        let (file, table, diag, _) = resolve("func mk() { var x = 0; func inc() { return x; } return inc; }");
        assert!(!diag.has_errors());

        // Find the `x` binding through its declaration node.
        let Item::Func(mk) = &file.items[0] else { panic!() };
        let ExprKind::Block(block) = &mk.body.kind else { panic!() };
        let Stmt::Var(decl) = &block.stmts[0] else { panic!() };
        let symbol_id = table.find_decl(SymbolKey::node(decl.bindings[0].id)).expect("x declared");
        assert!(table.symbol(symbol_id).captured);
    }

    #[test]
    fn file_scope_variables_are_not_captured() {
        let (file, table, diag, _) = resolve("var x = 1;\nfunc get() { return x; }");
        assert!(!diag.has_errors());
        let Item::Var(decl) = &file.items[0] else { panic!() };
        let symbol_id = table.find_decl(SymbolKey::node(decl.bindings[0].id)).expect("x declared");
        assert!(!table.symbol(symbol_id).captured);
    }

    #[test]
    fn tuple_binding_components_activate_together() {
        let (file, table, diag, _) = resolve("func f() { var (a, b) = (1, 2); return a + b; }");
        assert!(!diag.has_errors());
        let Item::Func(func) = &file.items[0] else { panic!() };
        let ExprKind::Block(block) = &func.body.kind else { panic!() };
        let Stmt::Var(decl) = &block.stmts[0] else { panic!() };
        let a = table.find_decl(SymbolKey::element(decl.bindings[0].id, 0)).expect("a");
        let b = table.find_decl(SymbolKey::element(decl.bindings[0].id, 1)).expect("b");
        assert!(table.symbol(a).active);
        assert!(table.symbol(b).active);
        assert_eq!(table.symbol(a).kind, SymbolKind::Variable);
    }
}
