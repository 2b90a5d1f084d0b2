//! The abstract syntax tree produced by the parser.
//!
//! Nodes are plain owned enums/structs; every node that later passes need to
//! reference carries a stable [`AstId`] (unique per source file) plus its
//! source span and an error flag. Cross-references from later passes (symbol
//! of a reference, scope of a declaration) live in side tables keyed by
//! `AstId` — the tree itself contains no back edges.

use serde::{Deserialize, Serialize};

use crate::{span::Span, strings::InternedString};

/// Stable id of an AST node, unique within one parsed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AstId(u32);

impl AstId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Hands out dense node ids during parsing.
#[derive(Debug, Default)]
pub struct AstIdGen {
    next: u32,
}

impl AstIdGen {
    pub fn next_id(&mut self) -> AstId {
        let id = AstId(self.next);
        self.next += 1;
        id
    }

    /// Number of ids handed out so far.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.next
    }
}

/// A parsed source file: the root of the tree.
#[derive(Debug)]
pub struct File {
    pub id: AstId,
    pub span: Span,
    pub items: Vec<Item>,
}

/// A top-level item.
#[derive(Debug)]
pub enum Item {
    Import(ImportItem),
    Func(FuncDecl),
    Var(VarDecl),
}

/// `import a.b.c;` — binds the last path element as a local name.
#[derive(Debug)]
pub struct ImportItem {
    pub id: AstId,
    pub span: Span,
    pub has_error: bool,
    /// The bound name (`c` for `import a.b.c;`).
    pub name: InternedString,
    /// Full dotted path, in order.
    pub path: Vec<InternedString>,
}

/// A function declaration or function expression.
///
/// `name` is `None` for anonymous function expressions. The body is always an
/// expression: either a block or (for the `func f() = expr;` form) the bare
/// expression.
#[derive(Debug)]
pub struct FuncDecl {
    pub id: AstId,
    pub span: Span,
    pub has_error: bool,
    pub name: Option<InternedString>,
    pub params: Vec<ParamDecl>,
    pub body: Expr,
    pub exported: bool,
}

#[derive(Debug)]
pub struct ParamDecl {
    pub id: AstId,
    pub span: Span,
    pub name: InternedString,
}

/// A `var` / `const` declaration with one or more bindings.
#[derive(Debug)]
pub struct VarDecl {
    pub id: AstId,
    pub span: Span,
    pub has_error: bool,
    pub bindings: Vec<Binding>,
    pub exported: bool,
}

/// A single binding within a `var` / `const` declaration.
#[derive(Debug)]
pub struct Binding {
    pub id: AstId,
    pub span: Span,
    pub has_error: bool,
    pub is_const: bool,
    pub kind: BindingKind,
    pub init: Option<Expr>,
}

#[derive(Debug)]
pub enum BindingKind {
    /// `var x = ...`
    Name(InternedString),
    /// `var (a, b) = ...` — all components are bound together.
    Tuple(Vec<InternedString>),
}

/// A statement inside a block.
#[derive(Debug)]
pub enum Stmt {
    /// A stray `;`.
    Empty(Span),
    Var(VarDecl),
    /// A named nested function declaration.
    Func(FuncDecl),
    Defer(DeferStmt),
    While(WhileStmt),
    For(ForStmt),
    Expr(ExprStmt),
}

impl Stmt {
    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            Self::Empty(span) => *span,
            Self::Var(decl) => decl.span,
            Self::Func(decl) => decl.span,
            Self::Defer(stmt) => stmt.span,
            Self::While(stmt) => stmt.span,
            Self::For(stmt) => stmt.span,
            Self::Expr(stmt) => stmt.expr.span,
        }
    }
}

/// `defer EXPR;` — evaluated on every exit from the enclosing block.
#[derive(Debug)]
pub struct DeferStmt {
    pub id: AstId,
    pub span: Span,
    pub expr: Expr,
}

#[derive(Debug)]
pub struct WhileStmt {
    pub id: AstId,
    pub span: Span,
    pub cond: Expr,
    pub body: Expr,
}

/// `for INIT; COND; STEP BLOCK`. The init declaration and the loop variable
/// live in a dedicated scope around the body.
#[derive(Debug)]
pub struct ForStmt {
    pub id: AstId,
    pub span: Span,
    pub decl: Option<VarDecl>,
    pub cond: Option<Expr>,
    pub step: Option<Expr>,
    pub body: Expr,
}

/// An expression statement; `semi` records a trailing `;`.
#[derive(Debug)]
pub struct ExprStmt {
    pub expr: Expr,
    pub semi: bool,
}

/// Whether a postfix access short-circuits on a null receiver (`?.`, `?(`,
/// `?[`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Normal,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum UnaryOp {
    Plus,
    Minus,
    BitwiseNot,
    LogicalNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
    Power,
    LeftShift,
    RightShift,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    Equals,
    NotEquals,
    LogicalAnd,
    LogicalOr,
    NullCoalesce,
}

/// One piece of an interpolated string.
#[derive(Debug)]
pub enum StringItem {
    /// A literal chunk with escapes already applied.
    Chunk { span: Span, value: InternedString },
    /// An interpolated expression (`$x` or `${...}`).
    Expr(Expr),
}

/// Named field of a record literal `(a: 1, b: 2)`.
#[derive(Debug)]
pub struct RecordField {
    pub span: Span,
    pub name: InternedString,
    pub value: Expr,
}

/// An expression node.
#[derive(Debug)]
pub struct Expr {
    pub id: AstId,
    pub span: Span,
    pub has_error: bool,
    pub kind: ExprKind,
}

impl Expr {
    #[must_use]
    pub fn new(id: AstId, span: Span, kind: ExprKind) -> Self {
        Self {
            id,
            span,
            has_error: false,
            kind,
        }
    }

    /// Placeholder node produced by error recovery.
    #[must_use]
    pub fn error(id: AstId, span: Span) -> Self {
        Self {
            id,
            span,
            has_error: true,
            kind: ExprKind::Error,
        }
    }
}

#[derive(Debug)]
pub enum ExprKind {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(InternedString),
    Symbol(InternedString),
    /// A name reference.
    Var(InternedString),
    Block(Block),
    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Plain or compound assignment; `op` is the arithmetic part of `+=` etc.
    Assign {
        op: Option<BinaryOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    /// An interpolated string literal.
    StringFormat { items: Vec<StringItem> },
    /// Two or more adjacent string literals grouped into one value.
    StringGroup { group: Vec<Expr> },
    /// A function expression (anonymous or named).
    Func(Box<FuncDecl>),
    Call {
        access: AccessType,
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    Field {
        access: AccessType,
        object: Box<Expr>,
        name: InternedString,
    },
    TupleField {
        access: AccessType,
        object: Box<Expr>,
        index: u32,
    },
    Index {
        access: AccessType,
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Array(Vec<Expr>),
    Tuple(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Set(Vec<Expr>),
    Record(Vec<RecordField>),
    Break,
    Continue,
    Return { value: Option<Box<Expr>> },
    Assert {
        cond: Box<Expr>,
        message: Option<Box<Expr>>,
    },
    /// Recovery placeholder; later passes skip subtrees containing it.
    Error,
}

/// `{ stmt* }` — a block expression. The block's value is the value of its
/// final expression statement (null if the block ends with any other kind of
/// statement).
#[derive(Debug)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

impl Block {
    /// The trailing expression statement that produces the block's value.
    #[must_use]
    pub fn value_stmt(&self) -> Option<&ExprStmt> {
        match self.stmts.last() {
            Some(Stmt::Expr(stmt)) => Some(stmt),
            _ => None,
        }
    }
}
