//! Recursive-descent parser with multi-error recovery.
//!
//! Every parsing function takes a *synchronization set*: the token types its
//! caller knows how to continue from. On unexpected input the parser reports
//! a diagnostic, seeks forward to the nearest synchronization point and
//! returns a partial result, so one run can surface many independent errors.
//!
//! Results follow the invariant `ok == true ⇒ node.is_some()`: a partial node
//! with its error flag set may still be produced when `ok == false`, which
//! lets later passes keep working on a best-effort tree.

use crate::{
    ast::{
        AccessType, AstIdGen, BinaryOp, Binding, BindingKind, Block, DeferStmt, Expr, ExprKind, ExprStmt, File,
        ForStmt, FuncDecl, ImportItem, Item, ParamDecl, RecordField, Stmt, StringItem, UnaryOp, VarDecl, WhileStmt,
    },
    diagnostics::Diagnostics,
    lexer::{Lexer, Token, TokenType},
    span::Span,
    strings::StringTable,
};

/// A compact set of token types, used for synchronization points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSet(u128);

impl TokenSet {
    pub const EMPTY: Self = Self(0);

    #[must_use]
    pub const fn of(types: &[TokenType]) -> Self {
        let mut bits = 0u128;
        let mut i = 0;
        while i < types.len() {
            bits |= 1u128 << (types[i] as u8);
            i += 1;
        }
        Self(bits)
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn with(self, ty: TokenType) -> Self {
        Self(self.0 | (1u128 << (ty as u8)))
    }

    #[must_use]
    pub const fn contains(self, ty: TokenType) -> bool {
        self.0 & (1u128 << (ty as u8)) != 0
    }
}

/// Result of one parsing function.
///
/// Invariant: `ok ⇒ node.is_some()`.
#[derive(Debug)]
pub struct Parsed<T> {
    pub node: Option<T>,
    pub ok: bool,
}

impl<T> Parsed<T> {
    fn full(node: T) -> Self {
        Self { node: Some(node), ok: true }
    }

    fn partial(node: T) -> Self {
        Self {
            node: Some(node),
            ok: false,
        }
    }

    fn fail() -> Self {
        Self { node: None, ok: false }
    }

    fn map<U>(self, f: impl FnOnce(T) -> U) -> Parsed<U> {
        Parsed {
            node: self.node.map(f),
            ok: self.ok,
        }
    }
}

const ITEM_FIRST: TokenSet = TokenSet::of(&[
    TokenType::KwImport,
    TokenType::KwExport,
    TokenType::KwFunc,
    TokenType::KwVar,
    TokenType::KwConst,
]);

const STMT_FIRST: TokenSet = TokenSet::of(&[
    TokenType::KwVar,
    TokenType::KwConst,
    TokenType::KwFunc,
    TokenType::KwDefer,
    TokenType::KwWhile,
    TokenType::KwFor,
    TokenType::Semicolon,
]);

const EXPR_FIRST: TokenSet = TokenSet::of(&[
    TokenType::KwNull,
    TokenType::KwTrue,
    TokenType::KwFalse,
    TokenType::KwIf,
    TokenType::KwFunc,
    TokenType::KwBreak,
    TokenType::KwContinue,
    TokenType::KwReturn,
    TokenType::KwAssert,
    TokenType::Identifier,
    TokenType::SymbolLiteral,
    TokenType::IntegerLiteral,
    TokenType::FloatLiteral,
    TokenType::StringStart,
    TokenType::LeftParen,
    TokenType::LeftBracket,
    TokenType::LeftBrace,
    TokenType::MapStart,
    TokenType::SetStart,
    TokenType::Plus,
    TokenType::Minus,
    TokenType::BitwiseNot,
    TokenType::LogicalNot,
]);

/// Parses one source file. Always returns a tree; the accompanying
/// diagnostics decide whether compilation continues.
pub fn parse_file(source: &str, strings: &mut StringTable, diag: &mut Diagnostics) -> File {
    let tokens = Lexer::new(source, strings, diag).tokens();
    let mut parser = Parser {
        tokens,
        pos: 0,
        strings,
        diag,
        ids: AstIdGen::default(),
    };
    parser.parse_file(source)
}

struct Parser<'ctx> {
    tokens: Vec<Token>,
    pos: usize,
    strings: &'ctx mut StringTable,
    diag: &'ctx mut Diagnostics,
    ids: AstIdGen,
}

impl Parser<'_> {
    // --- token access ---

    fn current(&self) -> Token {
        self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn ty(&self) -> TokenType {
        self.current().ty
    }

    fn peek_ty(&self) -> TokenType {
        self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].ty
    }

    fn at(&self, ty: TokenType) -> bool {
        self.ty() == ty
    }

    fn advance(&mut self) -> Token {
        let token = self.current();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn accept(&mut self, ty: TokenType) -> Option<Token> {
        if self.at(ty) {
            Some(self.advance())
        } else {
            None
        }
    }

    fn expect(&mut self, ty: TokenType) -> Option<Token> {
        if self.at(ty) {
            return Some(self.advance());
        }
        let current = self.current();
        self.diag.error(
            current.span,
            format!("expected {}, found {}", ty.describe(), current.ty.describe()),
        );
        None
    }

    /// Seeks forward until the current token is in `sync` (or end of file).
    fn recover_to(&mut self, sync: TokenSet) {
        while !self.at(TokenType::Eof) && !sync.contains(self.ty()) {
            self.advance();
        }
    }

    fn span_here(&self) -> Span {
        self.current().span
    }

    // --- file & items ---

    fn parse_file(&mut self, source: &str) -> File {
        let id = self.ids.next_id();
        let mut items = Vec::new();
        while !self.at(TokenType::Eof) {
            if self.accept(TokenType::Semicolon).is_some() {
                continue;
            }
            let result = self.parse_item();
            if let Some(item) = result.node {
                items.push(item);
            }
            if !result.ok {
                self.recover_to(ITEM_FIRST.with(TokenType::Semicolon));
            }
        }
        let len = u32::try_from(source.len()).expect("source exceeds u32 range");
        File {
            id,
            span: Span::new(0, len),
            items,
        }
    }

    fn parse_item(&mut self) -> Parsed<Item> {
        let exported = self.accept(TokenType::KwExport).is_some();
        match self.ty() {
            TokenType::KwImport => {
                if exported {
                    self.diag.error(self.span_here(), "imports cannot be exported");
                }
                self.parse_import().map(Item::Import)
            }
            TokenType::KwFunc => self.parse_func_decl(exported).map(Item::Func),
            TokenType::KwVar | TokenType::KwConst => {
                let result = self.parse_var_decl(exported);
                if result.ok && self.expect(TokenType::Semicolon).is_none() {
                    return Parsed {
                        node: result.node.map(Item::Var),
                        ok: false,
                    };
                }
                result.map(Item::Var)
            }
            _ => {
                let current = self.current();
                self.diag.error(
                    current.span,
                    format!("{} is not a valid top level construct", current.ty.describe()),
                );
                Parsed::fail()
            }
        }
    }

    fn parse_import(&mut self) -> Parsed<ImportItem> {
        let id = self.ids.next_id();
        let begin = self.span_here();
        self.advance(); // import

        let mut path = Vec::new();
        let mut ok = true;
        loop {
            match self.expect(TokenType::Identifier) {
                Some(token) => path.push(token.str_value()),
                None => {
                    ok = false;
                    break;
                }
            }
            if self.accept(TokenType::Dot).is_none() {
                break;
            }
        }
        if ok && self.expect(TokenType::Semicolon).is_none() {
            ok = false;
        }

        let name = path.last().copied().unwrap_or_default();
        let item = ImportItem {
            id,
            span: begin.merge(self.previous_span()),
            has_error: !ok,
            name,
            path,
        };
        if ok {
            Parsed::full(item)
        } else {
            Parsed::partial(item)
        }
    }

    fn previous_span(&self) -> Span {
        if self.pos == 0 {
            self.span_here()
        } else {
            self.tokens[self.pos - 1].span
        }
    }

    // --- declarations ---

    /// `func NAME? ( PARAMS ) BLOCK` or `func NAME? ( PARAMS ) = EXPR`.
    fn parse_func_decl(&mut self, exported: bool) -> Parsed<FuncDecl> {
        let id = self.ids.next_id();
        let begin = self.span_here();
        self.advance(); // func

        let name = self.accept(TokenType::Identifier).map(|t| t.str_value());

        let mut ok = true;
        let mut params = Vec::new();
        if self.expect(TokenType::LeftParen).is_some() {
            ok &= self.parse_param_list(&mut params);
        } else {
            ok = false;
            self.recover_to(TokenSet::of(&[TokenType::LeftBrace, TokenType::Equals]));
        }

        let body = if self.accept(TokenType::Equals).is_some() {
            let result = self.parse_expr(TokenSet::of(&[TokenType::Semicolon]));
            ok &= result.ok;
            let body = result
                .node
                .unwrap_or_else(|| Expr::error(self.ids.next_id(), self.span_here()));
            if ok && self.expect(TokenType::Semicolon).is_none() {
                ok = false;
            }
            body
        } else if self.at(TokenType::LeftBrace) {
            let result = self.parse_block_expr(TokenSet::EMPTY);
            ok &= result.ok;
            result
                .node
                .unwrap_or_else(|| Expr::error(self.ids.next_id(), self.span_here()))
        } else {
            self.diag.error(self.span_here(), "expected a function body");
            ok = false;
            Expr::error(self.ids.next_id(), self.span_here())
        };

        let decl = FuncDecl {
            id,
            span: begin.merge(body.span),
            has_error: !ok,
            name,
            params,
            body,
            exported,
        };
        if ok {
            Parsed::full(decl)
        } else {
            Parsed::partial(decl)
        }
    }

    fn parse_param_list(&mut self, params: &mut Vec<ParamDecl>) -> bool {
        let mut ok = true;
        if self.accept(TokenType::RightParen).is_some() {
            return ok;
        }
        loop {
            match self.expect(TokenType::Identifier) {
                Some(token) => params.push(ParamDecl {
                    id: self.ids.next_id(),
                    span: token.span,
                    name: token.str_value(),
                }),
                None => {
                    ok = false;
                    self.recover_to(TokenSet::of(&[TokenType::Comma, TokenType::RightParen]));
                }
            }
            if self.accept(TokenType::Comma).is_some() {
                continue;
            }
            if self.expect(TokenType::RightParen).is_none() {
                ok = false;
                self.recover_to(TokenSet::of(&[TokenType::RightParen]));
                self.accept(TokenType::RightParen);
            }
            return ok;
        }
    }

    /// Parses `var`/`const` with one or more comma-separated bindings. Does
    /// not consume the trailing `;` (callers differ).
    fn parse_var_decl(&mut self, exported: bool) -> Parsed<VarDecl> {
        let id = self.ids.next_id();
        let begin = self.span_here();
        let is_const = self.advance().ty == TokenType::KwConst;

        let mut bindings = Vec::new();
        let mut ok = true;
        loop {
            let result = self.parse_binding(is_const);
            ok &= result.ok;
            if let Some(binding) = result.node {
                bindings.push(binding);
            }
            if self.accept(TokenType::Comma).is_none() {
                break;
            }
        }

        let decl = VarDecl {
            id,
            span: begin.merge(self.previous_span()),
            has_error: !ok,
            bindings,
            exported,
        };
        if ok {
            Parsed::full(decl)
        } else {
            Parsed::partial(decl)
        }
    }

    fn parse_binding(&mut self, is_const: bool) -> Parsed<Binding> {
        let id = self.ids.next_id();
        let begin = self.span_here();

        let kind = if self.accept(TokenType::LeftParen).is_some() {
            let mut names = Vec::new();
            let mut ok = true;
            loop {
                match self.expect(TokenType::Identifier) {
                    Some(token) => names.push(token.str_value()),
                    None => {
                        ok = false;
                        self.recover_to(TokenSet::of(&[TokenType::Comma, TokenType::RightParen]));
                    }
                }
                if self.accept(TokenType::Comma).is_none() {
                    break;
                }
            }
            if self.expect(TokenType::RightParen).is_none() {
                ok = false;
            }
            if !ok {
                return Parsed::partial(Binding {
                    id,
                    span: begin.merge(self.previous_span()),
                    has_error: true,
                    is_const,
                    kind: BindingKind::Tuple(names),
                    init: None,
                });
            }
            BindingKind::Tuple(names)
        } else {
            match self.expect(TokenType::Identifier) {
                Some(token) => BindingKind::Name(token.str_value()),
                None => return Parsed::fail(),
            }
        };

        let mut ok = true;
        let init = if self.accept(TokenType::Equals).is_some() {
            let result = self.parse_expr(TokenSet::of(&[TokenType::Semicolon, TokenType::Comma]));
            ok &= result.ok;
            result.node
        } else {
            None
        };

        let binding = Binding {
            id,
            span: begin.merge(self.previous_span()),
            has_error: !ok,
            is_const,
            kind,
            init,
        };
        if ok {
            Parsed::full(binding)
        } else {
            Parsed::partial(binding)
        }
    }

    // --- statements ---

    fn parse_stmt(&mut self, sync: TokenSet) -> Parsed<Stmt> {
        match self.ty() {
            TokenType::Semicolon => {
                let span = self.advance().span;
                Parsed::full(Stmt::Empty(span))
            }
            TokenType::KwVar | TokenType::KwConst => {
                let result = self.parse_var_decl(false);
                let ok = result.ok && self.expect(TokenType::Semicolon).is_some();
                match result.node {
                    Some(decl) => Parsed {
                        node: Some(Stmt::Var(decl)),
                        ok,
                    },
                    None => Parsed::fail(),
                }
            }
            // `func name(...)` at statement position declares a nested
            // function; an anonymous `func(...)` is an expression.
            TokenType::KwFunc if self.peek_ty() == TokenType::Identifier => {
                self.parse_func_decl(false).map(Stmt::Func)
            }
            TokenType::KwDefer => {
                let id = self.ids.next_id();
                let begin = self.advance().span;
                let result = self.parse_expr(sync.with(TokenType::Semicolon));
                let mut ok = result.ok;
                if ok && self.expect(TokenType::Semicolon).is_none() {
                    ok = false;
                }
                match result.node {
                    Some(expr) => Parsed {
                        node: Some(Stmt::Defer(DeferStmt {
                            id,
                            span: begin.merge(expr.span),
                            expr,
                        })),
                        ok,
                    },
                    None => Parsed::fail(),
                }
            }
            TokenType::KwWhile => self.parse_while_stmt(sync),
            TokenType::KwFor => self.parse_for_stmt(sync),
            TokenType::KwSwitch
            | TokenType::KwClass
            | TokenType::KwStruct
            | TokenType::KwProtocol
            | TokenType::KwPackage
            | TokenType::KwYield
            | TokenType::KwAsync
            | TokenType::KwAwait
            | TokenType::KwThrow
            | TokenType::KwTry
            | TokenType::KwCatch => {
                let current = self.current();
                self.diag.error(
                    current.span,
                    format!("{} is reserved but not supported", current.ty.describe()),
                );
                self.advance();
                Parsed::fail()
            }
            _ => self.parse_expr_stmt(sync),
        }
    }

    fn parse_expr_stmt(&mut self, sync: TokenSet) -> Parsed<Stmt> {
        let result = self.parse_expr(sync.with(TokenType::Semicolon));
        let Some(expr) = result.node else {
            return Parsed::fail();
        };
        let mut ok = result.ok;

        let needs_semi = !matches!(
            expr.kind,
            ExprKind::Block(_) | ExprKind::If { .. }
        );
        let semi = self.accept(TokenType::Semicolon).is_some();
        if ok && needs_semi && !semi && !self.at(TokenType::RightBrace) && !self.at(TokenType::Eof) {
            self.diag.error(self.span_here(), "expected \";\" after expression");
            ok = false;
        }
        Parsed {
            node: Some(Stmt::Expr(ExprStmt { expr, semi })),
            ok,
        }
    }

    fn parse_while_stmt(&mut self, sync: TokenSet) -> Parsed<Stmt> {
        let id = self.ids.next_id();
        let begin = self.advance().span; // while

        let cond_result = self.parse_expr(sync.with(TokenType::LeftBrace));
        let mut ok = cond_result.ok;
        let cond = cond_result
            .node
            .unwrap_or_else(|| Expr::error(self.ids.next_id(), self.span_here()));

        if !self.at(TokenType::LeftBrace) {
            self.diag.error(self.span_here(), "expected a block as loop body");
            self.recover_to(sync.with(TokenType::LeftBrace));
        }
        let body = if self.at(TokenType::LeftBrace) {
            let result = self.parse_block_expr(sync);
            ok &= result.ok;
            result
                .node
                .unwrap_or_else(|| Expr::error(self.ids.next_id(), self.span_here()))
        } else {
            ok = false;
            Expr::error(self.ids.next_id(), self.span_here())
        };

        let stmt = Stmt::While(WhileStmt {
            id,
            span: begin.merge(body.span),
            cond,
            body,
        });
        Parsed { node: Some(stmt), ok }
    }

    /// `for (INIT?; COND?; STEP?) BLOCK`
    fn parse_for_stmt(&mut self, sync: TokenSet) -> Parsed<Stmt> {
        let id = self.ids.next_id();
        let begin = self.advance().span; // for
        let mut ok = true;

        if self.expect(TokenType::LeftParen).is_none() {
            ok = false;
            self.recover_to(sync.with(TokenType::LeftBrace));
        }

        let decl = if self.at(TokenType::Semicolon) {
            None
        } else if matches!(self.ty(), TokenType::KwVar | TokenType::KwConst) {
            let result = self.parse_var_decl(false);
            ok &= result.ok;
            result.node
        } else {
            self.diag
                .error(self.span_here(), "expected a variable declaration or \";\"");
            ok = false;
            self.recover_to(TokenSet::of(&[TokenType::Semicolon, TokenType::LeftBrace]));
            None
        };
        ok &= self.expect(TokenType::Semicolon).is_some();

        let cond = if self.at(TokenType::Semicolon) {
            None
        } else {
            let result = self.parse_expr(TokenSet::of(&[TokenType::Semicolon, TokenType::LeftBrace]));
            ok &= result.ok;
            result.node
        };
        ok &= self.expect(TokenType::Semicolon).is_some();

        let step = if self.at(TokenType::RightParen) {
            None
        } else {
            let result = self.parse_expr(TokenSet::of(&[TokenType::RightParen, TokenType::LeftBrace]));
            ok &= result.ok;
            result.node
        };
        ok &= self.expect(TokenType::RightParen).is_some();

        if !self.at(TokenType::LeftBrace) {
            self.diag.error(self.span_here(), "expected a block as loop body");
            self.recover_to(sync.with(TokenType::LeftBrace));
        }
        let body = if self.at(TokenType::LeftBrace) {
            let result = self.parse_block_expr(sync);
            ok &= result.ok;
            result
                .node
                .unwrap_or_else(|| Expr::error(self.ids.next_id(), self.span_here()))
        } else {
            ok = false;
            Expr::error(self.ids.next_id(), self.span_here())
        };

        let stmt = Stmt::For(ForStmt {
            id,
            span: begin.merge(body.span),
            decl,
            cond,
            step,
            body,
        });
        Parsed { node: Some(stmt), ok }
    }

    // --- expressions ---

    pub(crate) fn parse_expr(&mut self, sync: TokenSet) -> Parsed<Expr> {
        self.parse_binary(0, sync)
    }

    /// Precedence climbing over the infix ladder. Assignment (lowest) and
    /// power (highest binary level) are right-associative.
    fn parse_binary(&mut self, min_level: u8, sync: TokenSet) -> Parsed<Expr> {
        let left_result = self.parse_unary(sync);
        let Some(mut left) = left_result.node else {
            return Parsed::fail();
        };
        let mut ok = left_result.ok;

        loop {
            let Some(op) = InfixOp::of(self.ty()) else { break };
            if op.level < min_level {
                break;
            }
            self.advance();
            let next_min = if op.right_assoc { op.level } else { op.level + 1 };
            let right_result = self.parse_binary(next_min, sync);
            ok &= right_result.ok;
            let right = right_result
                .node
                .unwrap_or_else(|| Expr::error(self.ids.next_id(), self.span_here()));

            let id = self.ids.next_id();
            let span = left.span.merge(right.span);
            let kind = match op.kind {
                InfixKind::Binary(binary) => ExprKind::Binary {
                    op: binary,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                InfixKind::Assign(compound) => ExprKind::Assign {
                    op: compound,
                    target: Box::new(left),
                    value: Box::new(right),
                },
            };
            left = Expr::new(id, span, kind);
            if !ok {
                left.has_error = true;
            }
        }

        Parsed { node: Some(left), ok }
    }

    fn parse_unary(&mut self, sync: TokenSet) -> Parsed<Expr> {
        let op = match self.ty() {
            TokenType::Plus => Some(UnaryOp::Plus),
            TokenType::Minus => Some(UnaryOp::Minus),
            TokenType::BitwiseNot => Some(UnaryOp::BitwiseNot),
            TokenType::LogicalNot => Some(UnaryOp::LogicalNot),
            _ => None,
        };
        let Some(op) = op else {
            return self.parse_postfix(sync);
        };

        let begin = self.advance().span;
        let result = self.parse_unary(sync);
        let ok = result.ok;
        let operand = result
            .node
            .unwrap_or_else(|| Expr::error(self.ids.next_id(), self.span_here()));
        let id = self.ids.next_id();
        let span = begin.merge(operand.span);
        let mut expr = Expr::new(
            id,
            span,
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
        );
        expr.has_error = !ok;
        Parsed { node: Some(expr), ok }
    }

    fn parse_postfix(&mut self, sync: TokenSet) -> Parsed<Expr> {
        let result = self.parse_primary(sync);
        let Some(mut expr) = result.node else {
            return Parsed::fail();
        };
        let mut ok = result.ok;

        loop {
            match self.ty() {
                TokenType::Dot | TokenType::QuestionDot => {
                    let access = if self.advance().ty == TokenType::QuestionDot {
                        AccessType::Optional
                    } else {
                        AccessType::Normal
                    };
                    expr = match self.ty() {
                        TokenType::Identifier => {
                            let name = self.advance();
                            let id = self.ids.next_id();
                            Expr::new(
                                id,
                                expr.span.merge(name.span),
                                ExprKind::Field {
                                    access,
                                    object: Box::new(expr),
                                    name: name.str_value(),
                                },
                            )
                        }
                        TokenType::TupleField => {
                            let index_token = self.advance();
                            let index = u32::try_from(index_token.int_value()).unwrap_or_else(|_| {
                                self.diag.error(index_token.span, "tuple field index is too large");
                                0
                            });
                            let id = self.ids.next_id();
                            Expr::new(
                                id,
                                expr.span.merge(index_token.span),
                                ExprKind::TupleField {
                                    access,
                                    object: Box::new(expr),
                                    index,
                                },
                            )
                        }
                        _ => {
                            let current = self.current();
                            self.diag.error(
                                current.span,
                                format!("expected a member name, found {}", current.ty.describe()),
                            );
                            expr.has_error = true;
                            ok = false;
                            self.recover_to(sync);
                            break;
                        }
                    };
                }
                TokenType::LeftParen | TokenType::QuestionParen => {
                    let access = if self.advance().ty == TokenType::QuestionParen {
                        AccessType::Optional
                    } else {
                        AccessType::Normal
                    };
                    let mut args = Vec::new();
                    ok &= self.parse_arg_list(&mut args);
                    let id = self.ids.next_id();
                    let span = expr.span.merge(self.previous_span());
                    expr = Expr::new(
                        id,
                        span,
                        ExprKind::Call {
                            access,
                            func: Box::new(expr),
                            args,
                        },
                    );
                }
                TokenType::LeftBracket | TokenType::QuestionBracket => {
                    let access = if self.advance().ty == TokenType::QuestionBracket {
                        AccessType::Optional
                    } else {
                        AccessType::Normal
                    };
                    let index_result = self.parse_expr(sync.with(TokenType::RightBracket));
                    ok &= index_result.ok;
                    let index = index_result
                        .node
                        .unwrap_or_else(|| Expr::error(self.ids.next_id(), self.span_here()));
                    if self.expect(TokenType::RightBracket).is_none() {
                        ok = false;
                        self.recover_to(sync.with(TokenType::RightBracket));
                        self.accept(TokenType::RightBracket);
                    }
                    let id = self.ids.next_id();
                    let span = expr.span.merge(self.previous_span());
                    expr = Expr::new(
                        id,
                        span,
                        ExprKind::Index {
                            access,
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                    );
                }
                _ => break,
            }
        }

        Parsed { node: Some(expr), ok }
    }

    /// Parses `( ... )` argument lists with per-argument recovery: a broken
    /// argument seeks to the next `,` or `)` instead of abandoning the call.
    fn parse_arg_list(&mut self, args: &mut Vec<Expr>) -> bool {
        let mut ok = true;
        if self.accept(TokenType::RightParen).is_some() {
            return ok;
        }
        loop {
            let result = self.parse_expr(TokenSet::of(&[TokenType::Comma, TokenType::RightParen]));
            ok &= result.ok;
            if let Some(arg) = result.node {
                args.push(arg);
            }
            if !result.ok {
                self.recover_to(TokenSet::of(&[TokenType::Comma, TokenType::RightParen]));
            }
            if self.accept(TokenType::Comma).is_some() {
                continue;
            }
            if self.expect(TokenType::RightParen).is_none() {
                ok = false;
                self.recover_to(TokenSet::of(&[TokenType::RightParen]));
                self.accept(TokenType::RightParen);
            }
            return ok;
        }
    }

    fn parse_primary(&mut self, sync: TokenSet) -> Parsed<Expr> {
        match self.ty() {
            TokenType::KwNull => {
                let span = self.advance().span;
                Parsed::full(Expr::new(self.ids.next_id(), span, ExprKind::Null))
            }
            TokenType::KwTrue => {
                let span = self.advance().span;
                Parsed::full(Expr::new(self.ids.next_id(), span, ExprKind::Bool(true)))
            }
            TokenType::KwFalse => {
                let span = self.advance().span;
                Parsed::full(Expr::new(self.ids.next_id(), span, ExprKind::Bool(false)))
            }
            TokenType::IntegerLiteral => {
                let token = self.advance();
                let mut expr = Expr::new(self.ids.next_id(), token.span, ExprKind::Int(token.int_value()));
                expr.has_error = token.has_error;
                Parsed::full(expr)
            }
            TokenType::FloatLiteral => {
                let token = self.advance();
                let mut expr = Expr::new(self.ids.next_id(), token.span, ExprKind::Float(token.float_value()));
                expr.has_error = token.has_error;
                Parsed::full(expr)
            }
            TokenType::SymbolLiteral => {
                let token = self.advance();
                Parsed::full(Expr::new(
                    self.ids.next_id(),
                    token.span,
                    ExprKind::Symbol(token.str_value()),
                ))
            }
            TokenType::Identifier => {
                let token = self.advance();
                Parsed::full(Expr::new(
                    self.ids.next_id(),
                    token.span,
                    ExprKind::Var(token.str_value()),
                ))
            }
            TokenType::StringStart => self.parse_string_group(sync),
            TokenType::LeftParen => self.parse_paren_expr(sync),
            TokenType::LeftBracket => self.parse_array_literal(sync),
            TokenType::MapStart => self.parse_map_literal(sync),
            TokenType::SetStart => self.parse_set_literal(sync),
            TokenType::LeftBrace => self.parse_block_expr(sync),
            TokenType::KwIf => self.parse_if_expr(sync),
            TokenType::KwFunc => self.parse_func_decl(false).map(|decl| {
                let span = decl.span;
                Expr::new(self.ids.next_id(), span, ExprKind::Func(Box::new(decl)))
            }),
            TokenType::KwBreak => {
                let span = self.advance().span;
                Parsed::full(Expr::new(self.ids.next_id(), span, ExprKind::Break))
            }
            TokenType::KwContinue => {
                let span = self.advance().span;
                Parsed::full(Expr::new(self.ids.next_id(), span, ExprKind::Continue))
            }
            TokenType::KwReturn => {
                let begin = self.advance().span;
                let (value, ok, span) = if EXPR_FIRST.contains(self.ty()) {
                    let result = self.parse_expr(sync);
                    let ok = result.ok;
                    let value = result
                        .node
                        .unwrap_or_else(|| Expr::error(self.ids.next_id(), self.span_here()));
                    let span = begin.merge(value.span);
                    (Some(Box::new(value)), ok, span)
                } else {
                    (None, true, begin)
                };
                let mut expr = Expr::new(self.ids.next_id(), span, ExprKind::Return { value });
                expr.has_error = !ok;
                Parsed { node: Some(expr), ok }
            }
            TokenType::KwAssert => self.parse_assert_expr(sync),
            TokenType::KwSwitch
            | TokenType::KwClass
            | TokenType::KwStruct
            | TokenType::KwProtocol
            | TokenType::KwPackage
            | TokenType::KwYield
            | TokenType::KwAsync
            | TokenType::KwAwait
            | TokenType::KwThrow
            | TokenType::KwTry
            | TokenType::KwCatch => {
                let current = self.current();
                self.diag.error(
                    current.span,
                    format!("{} is reserved but not supported", current.ty.describe()),
                );
                let span = self.advance().span;
                Parsed::partial(Expr::error(self.ids.next_id(), span))
            }
            _ => {
                let current = self.current();
                self.diag.error(
                    current.span,
                    format!("expected an expression, found {}", current.ty.describe()),
                );
                Parsed::fail()
            }
        }
    }

    fn parse_assert_expr(&mut self, sync: TokenSet) -> Parsed<Expr> {
        let begin = self.advance().span; // assert
        let mut ok = true;
        if self.expect(TokenType::LeftParen).is_none() {
            return Parsed::partial(Expr::error(self.ids.next_id(), begin));
        }
        let cond_result = self.parse_expr(TokenSet::of(&[TokenType::Comma, TokenType::RightParen]));
        ok &= cond_result.ok;
        let cond = cond_result
            .node
            .unwrap_or_else(|| Expr::error(self.ids.next_id(), self.span_here()));

        let message = if self.accept(TokenType::Comma).is_some() {
            let result = self.parse_expr(TokenSet::of(&[TokenType::RightParen]));
            ok &= result.ok;
            result.node.map(Box::new)
        } else {
            None
        };

        if self.expect(TokenType::RightParen).is_none() {
            ok = false;
            self.recover_to(sync.with(TokenType::RightParen));
            self.accept(TokenType::RightParen);
        }

        let mut expr = Expr::new(
            self.ids.next_id(),
            begin.merge(self.previous_span()),
            ExprKind::Assert {
                cond: Box::new(cond),
                message,
            },
        );
        expr.has_error = !ok;
        Parsed { node: Some(expr), ok }
    }

    /// `(` starts a grouping, a tuple, a record literal (`(a: 1)`) or the
    /// empty tuple `()`.
    fn parse_paren_expr(&mut self, sync: TokenSet) -> Parsed<Expr> {
        let begin = self.advance().span; // (

        if self.accept(TokenType::RightParen).is_some() {
            let span = begin.merge(self.previous_span());
            return Parsed::full(Expr::new(self.ids.next_id(), span, ExprKind::Tuple(Vec::new())));
        }

        if self.at(TokenType::Identifier) && self.peek_ty() == TokenType::Colon {
            return self.parse_record_literal(begin);
        }

        let first_result = self.parse_expr(TokenSet::of(&[TokenType::Comma, TokenType::RightParen]));
        let mut ok = first_result.ok;
        let first = first_result
            .node
            .unwrap_or_else(|| Expr::error(self.ids.next_id(), self.span_here()));

        if self.accept(TokenType::RightParen).is_some() {
            // Plain grouping; the inner node is the result.
            return Parsed { node: Some(first), ok };
        }

        let mut items = vec![first];
        while self.accept(TokenType::Comma).is_some() {
            if self.at(TokenType::RightParen) {
                break; // trailing comma
            }
            let result = self.parse_expr(TokenSet::of(&[TokenType::Comma, TokenType::RightParen]));
            ok &= result.ok;
            if let Some(item) = result.node {
                items.push(item);
            }
            if !result.ok {
                self.recover_to(TokenSet::of(&[TokenType::Comma, TokenType::RightParen]));
            }
        }
        if self.expect(TokenType::RightParen).is_none() {
            ok = false;
            self.recover_to(sync.with(TokenType::RightParen));
            self.accept(TokenType::RightParen);
        }

        let span = begin.merge(self.previous_span());
        let mut expr = Expr::new(self.ids.next_id(), span, ExprKind::Tuple(items));
        expr.has_error = !ok;
        Parsed { node: Some(expr), ok }
    }

    fn parse_record_literal(&mut self, begin: Span) -> Parsed<Expr> {
        let mut fields = Vec::new();
        let mut ok = true;
        loop {
            let Some(name_token) = self.expect(TokenType::Identifier) else {
                ok = false;
                self.recover_to(TokenSet::of(&[TokenType::Comma, TokenType::RightParen]));
                if self.accept(TokenType::Comma).is_some() {
                    continue;
                }
                break;
            };
            ok &= self.expect(TokenType::Colon).is_some();
            let value_result = self.parse_expr(TokenSet::of(&[TokenType::Comma, TokenType::RightParen]));
            ok &= value_result.ok;
            let value = value_result
                .node
                .unwrap_or_else(|| Expr::error(self.ids.next_id(), self.span_here()));
            fields.push(RecordField {
                span: name_token.span.merge(value.span),
                name: name_token.str_value(),
                value,
            });
            if self.accept(TokenType::Comma).is_none() {
                break;
            }
            if self.at(TokenType::RightParen) {
                break; // trailing comma
            }
        }
        if self.expect(TokenType::RightParen).is_none() {
            ok = false;
            self.recover_to(TokenSet::of(&[TokenType::RightParen]));
            self.accept(TokenType::RightParen);
        }

        let span = begin.merge(self.previous_span());
        let mut expr = Expr::new(self.ids.next_id(), span, ExprKind::Record(fields));
        expr.has_error = !ok;
        Parsed { node: Some(expr), ok }
    }

    fn parse_array_literal(&mut self, sync: TokenSet) -> Parsed<Expr> {
        let begin = self.advance().span; // [
        let mut items = Vec::new();
        let mut ok = true;
        if self.accept(TokenType::RightBracket).is_none() {
            loop {
                let result = self.parse_expr(TokenSet::of(&[TokenType::Comma, TokenType::RightBracket]));
                ok &= result.ok;
                if let Some(item) = result.node {
                    items.push(item);
                }
                if !result.ok {
                    self.recover_to(TokenSet::of(&[TokenType::Comma, TokenType::RightBracket]));
                }
                if self.accept(TokenType::Comma).is_some() {
                    if self.at(TokenType::RightBracket) {
                        break;
                    }
                    continue;
                }
                break;
            }
            if self.expect(TokenType::RightBracket).is_none() {
                ok = false;
                self.recover_to(sync.with(TokenType::RightBracket));
                self.accept(TokenType::RightBracket);
            }
        }

        let span = begin.merge(self.previous_span());
        let mut expr = Expr::new(self.ids.next_id(), span, ExprKind::Array(items));
        expr.has_error = !ok;
        Parsed { node: Some(expr), ok }
    }

    fn parse_map_literal(&mut self, sync: TokenSet) -> Parsed<Expr> {
        let begin = self.advance().span; // map{
        let mut pairs = Vec::new();
        let mut ok = true;
        if self.accept(TokenType::RightBrace).is_none() {
            loop {
                let key_result = self.parse_expr(TokenSet::of(&[TokenType::Colon, TokenType::RightBrace]));
                ok &= key_result.ok;
                let key = key_result
                    .node
                    .unwrap_or_else(|| Expr::error(self.ids.next_id(), self.span_here()));
                ok &= self.expect(TokenType::Colon).is_some();
                let value_result = self.parse_expr(TokenSet::of(&[TokenType::Comma, TokenType::RightBrace]));
                ok &= value_result.ok;
                let value = value_result
                    .node
                    .unwrap_or_else(|| Expr::error(self.ids.next_id(), self.span_here()));
                pairs.push((key, value));
                if self.accept(TokenType::Comma).is_some() {
                    if self.at(TokenType::RightBrace) {
                        break;
                    }
                    continue;
                }
                break;
            }
            if self.expect(TokenType::RightBrace).is_none() {
                ok = false;
                self.recover_to(sync.with(TokenType::RightBrace));
                self.accept(TokenType::RightBrace);
            }
        }

        let span = begin.merge(self.previous_span());
        let mut expr = Expr::new(self.ids.next_id(), span, ExprKind::Map(pairs));
        expr.has_error = !ok;
        Parsed { node: Some(expr), ok }
    }

    fn parse_set_literal(&mut self, sync: TokenSet) -> Parsed<Expr> {
        let begin = self.advance().span; // set{
        let mut items = Vec::new();
        let mut ok = true;
        if self.accept(TokenType::RightBrace).is_none() {
            loop {
                let result = self.parse_expr(TokenSet::of(&[TokenType::Comma, TokenType::RightBrace]));
                ok &= result.ok;
                if let Some(item) = result.node {
                    items.push(item);
                }
                if !result.ok {
                    self.recover_to(TokenSet::of(&[TokenType::Comma, TokenType::RightBrace]));
                }
                if self.accept(TokenType::Comma).is_some() {
                    if self.at(TokenType::RightBrace) {
                        break;
                    }
                    continue;
                }
                break;
            }
            if self.expect(TokenType::RightBrace).is_none() {
                ok = false;
                self.recover_to(sync.with(TokenType::RightBrace));
                self.accept(TokenType::RightBrace);
            }
        }

        let span = begin.merge(self.previous_span());
        let mut expr = Expr::new(self.ids.next_id(), span, ExprKind::Set(items));
        expr.has_error = !ok;
        Parsed { node: Some(expr), ok }
    }

    fn parse_block_expr(&mut self, sync: TokenSet) -> Parsed<Expr> {
        let id = self.ids.next_id();
        let begin = self.span_here();
        if self.expect(TokenType::LeftBrace).is_none() {
            return Parsed::fail();
        }

        let stmt_sync = sync
            .union(STMT_FIRST)
            .union(EXPR_FIRST)
            .with(TokenType::RightBrace)
            .with(TokenType::Semicolon);

        let mut stmts = Vec::new();
        let mut ok = true;
        while !self.at(TokenType::RightBrace) && !self.at(TokenType::Eof) {
            let result = self.parse_stmt(stmt_sync);
            ok &= result.ok;
            if let Some(stmt) = result.node {
                stmts.push(stmt);
            }
            if !result.ok {
                self.recover_to(stmt_sync);
                // A leftover `;` is the end of the broken statement.
                self.accept(TokenType::Semicolon);
            }
        }
        if self.expect(TokenType::RightBrace).is_none() {
            ok = false;
        }

        let span = begin.merge(self.previous_span());
        let mut expr = Expr::new(id, span, ExprKind::Block(Block { stmts }));
        expr.has_error = !ok;
        Parsed { node: Some(expr), ok }
    }

    fn parse_if_expr(&mut self, sync: TokenSet) -> Parsed<Expr> {
        let begin = self.advance().span; // if
        let mut ok = true;

        let cond_result = self.parse_expr(sync.with(TokenType::LeftBrace));
        ok &= cond_result.ok;
        let cond = cond_result
            .node
            .unwrap_or_else(|| Expr::error(self.ids.next_id(), self.span_here()));

        if !self.at(TokenType::LeftBrace) {
            self.diag.error(self.span_here(), "expected a block after the condition");
            self.recover_to(sync.with(TokenType::LeftBrace));
        }
        let then_result = self.parse_block_expr(sync.with(TokenType::KwElse));
        ok &= then_result.ok;
        let then_branch = then_result
            .node
            .unwrap_or_else(|| Expr::error(self.ids.next_id(), self.span_here()));

        let else_branch = if self.accept(TokenType::KwElse).is_some() {
            let result = if self.at(TokenType::KwIf) {
                self.parse_if_expr(sync)
            } else {
                self.parse_block_expr(sync)
            };
            ok &= result.ok;
            result.node.map(Box::new)
        } else {
            None
        };

        let span = begin.merge(self.previous_span());
        let mut expr = Expr::new(
            self.ids.next_id(),
            span,
            ExprKind::If {
                cond: Box::new(cond),
                then_branch: Box::new(then_branch),
                else_branch,
            },
        );
        expr.has_error = !ok;
        Parsed { node: Some(expr), ok }
    }

    // --- strings ---

    /// Parses one string literal; adjacent literals group into a single
    /// `StringGroup` value.
    fn parse_string_group(&mut self, sync: TokenSet) -> Parsed<Expr> {
        let first = self.parse_string(sync);
        let Some(first_expr) = first.node else {
            return Parsed::fail();
        };
        if !self.at(TokenType::StringStart) {
            return Parsed {
                node: Some(first_expr),
                ok: first.ok,
            };
        }

        let mut ok = first.ok;
        let mut group = vec![first_expr];
        while self.at(TokenType::StringStart) {
            let result = self.parse_string(sync);
            ok &= result.ok;
            if let Some(expr) = result.node {
                group.push(expr);
            } else {
                break;
            }
        }
        let span = group
            .iter()
            .map(|e| e.span)
            .reduce(Span::merge)
            .expect("group has at least one element");
        let mut expr = Expr::new(self.ids.next_id(), span, ExprKind::StringGroup { group });
        expr.has_error = !ok;
        Parsed { node: Some(expr), ok }
    }

    fn parse_string(&mut self, sync: TokenSet) -> Parsed<Expr> {
        let begin = self.span_here();
        self.advance(); // StringStart
        let mut items = Vec::new();
        let mut ok = true;

        loop {
            match self.ty() {
                TokenType::StringContent => {
                    let token = self.advance();
                    ok &= !token.has_error;
                    items.push(StringItem::Chunk {
                        span: token.span,
                        value: token.str_value(),
                    });
                }
                TokenType::StringVar => {
                    self.advance();
                    match self.expect(TokenType::Identifier) {
                        Some(token) => {
                            let var = Expr::new(self.ids.next_id(), token.span, ExprKind::Var(token.str_value()));
                            items.push(StringItem::Expr(var));
                        }
                        None => ok = false,
                    }
                }
                TokenType::StringBlockStart => {
                    self.advance();
                    let result = self.parse_expr(sync.with(TokenType::StringBlockEnd));
                    ok &= result.ok;
                    if let Some(expr) = result.node {
                        items.push(StringItem::Expr(expr));
                    }
                    if self.expect(TokenType::StringBlockEnd).is_none() {
                        ok = false;
                        self.recover_to(TokenSet::of(&[TokenType::StringBlockEnd, TokenType::StringEnd]));
                        self.accept(TokenType::StringBlockEnd);
                    }
                }
                TokenType::StringEnd => {
                    let token = self.advance();
                    ok &= !token.has_error;
                    break;
                }
                _ => {
                    self.diag.error(self.span_here(), "unterminated string literal");
                    ok = false;
                    break;
                }
            }
        }

        let span = begin.merge(self.previous_span());
        // A plain literal (single chunk, no interpolation) collapses to Str.
        let kind = if items.is_empty() {
            ExprKind::Str(crate::strings::InternedString::default())
        } else if items.len() == 1 && matches!(items[0], StringItem::Chunk { .. }) {
            match items.pop() {
                Some(StringItem::Chunk { value, .. }) => ExprKind::Str(value),
                _ => unreachable!("single chunk was just matched"),
            }
        } else {
            ExprKind::StringFormat { items }
        };

        let mut expr = Expr::new(self.ids.next_id(), span, kind);
        expr.has_error = !ok;
        Parsed { node: Some(expr), ok }
    }
}

/// One entry of the infix ladder, from weakest to tightest binding.
struct InfixOp {
    level: u8,
    right_assoc: bool,
    kind: InfixKind,
}

enum InfixKind {
    Binary(BinaryOp),
    Assign(Option<BinaryOp>),
}

impl InfixOp {
    fn of(ty: TokenType) -> Option<Self> {
        use TokenType as T;

        let (level, right_assoc, kind) = match ty {
            T::Equals => (0, true, InfixKind::Assign(None)),
            T::PlusEquals => (0, true, InfixKind::Assign(Some(BinaryOp::Add))),
            T::MinusEquals => (0, true, InfixKind::Assign(Some(BinaryOp::Subtract))),
            T::StarEquals => (0, true, InfixKind::Assign(Some(BinaryOp::Multiply))),
            T::StarStarEquals => (0, true, InfixKind::Assign(Some(BinaryOp::Power))),
            T::SlashEquals => (0, true, InfixKind::Assign(Some(BinaryOp::Divide))),
            T::PercentEquals => (0, true, InfixKind::Assign(Some(BinaryOp::Modulus))),
            T::QuestionQuestion => (1, false, InfixKind::Binary(BinaryOp::NullCoalesce)),
            T::LogicalOr => (2, false, InfixKind::Binary(BinaryOp::LogicalOr)),
            T::LogicalAnd => (3, false, InfixKind::Binary(BinaryOp::LogicalAnd)),
            T::EqualsEquals => (4, false, InfixKind::Binary(BinaryOp::Equals)),
            T::NotEquals => (4, false, InfixKind::Binary(BinaryOp::NotEquals)),
            T::Less => (5, false, InfixKind::Binary(BinaryOp::Less)),
            T::LessEquals => (5, false, InfixKind::Binary(BinaryOp::LessEquals)),
            T::Greater => (5, false, InfixKind::Binary(BinaryOp::Greater)),
            T::GreaterEquals => (5, false, InfixKind::Binary(BinaryOp::GreaterEquals)),
            T::BitwiseOr => (6, false, InfixKind::Binary(BinaryOp::BitwiseOr)),
            T::BitwiseXor => (7, false, InfixKind::Binary(BinaryOp::BitwiseXor)),
            T::BitwiseAnd => (8, false, InfixKind::Binary(BinaryOp::BitwiseAnd)),
            T::LeftShift => (9, false, InfixKind::Binary(BinaryOp::LeftShift)),
            T::RightShift => (9, false, InfixKind::Binary(BinaryOp::RightShift)),
            T::Plus => (10, false, InfixKind::Binary(BinaryOp::Add)),
            T::Minus => (10, false, InfixKind::Binary(BinaryOp::Subtract)),
            T::Star => (11, false, InfixKind::Binary(BinaryOp::Multiply)),
            T::Slash => (11, false, InfixKind::Binary(BinaryOp::Divide)),
            T::Percent => (11, false, InfixKind::Binary(BinaryOp::Modulus)),
            T::StarStar => (12, true, InfixKind::Binary(BinaryOp::Power)),
            _ => return None,
        };
        Some(Self {
            level,
            right_assoc,
            kind,
        })
    }
}

#[cfg(test)]
mod tests;
