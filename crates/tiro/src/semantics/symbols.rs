//! The symbol table: scopes, symbols and the side tables that connect them
//! to the AST.
//!
//! All cross references are ids. The table owns two arenas (scopes, symbols)
//! plus three indexes: declaration-site lookup (`SymbolKey -> SymbolId`),
//! reference resolution results (`AstId -> SymbolId`) and the scope opened by
//! a node (`AstId -> ScopeId`).

use ahash::AHashMap;

use crate::{ast::AstId, strings::InternedString};

/// Id of a symbol in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u32);

impl SymbolId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Id of a scope in the table. The root (global) scope is always id 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u32);

impl ScopeId {
    pub const ROOT: Self = Self(0);

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifies a declaration site. Tuple bindings declare several symbols from
/// one node, so the key carries an element index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolKey {
    pub node: AstId,
    pub element: u32,
}

impl SymbolKey {
    #[must_use]
    pub fn node(node: AstId) -> Self {
        Self { node, element: 0 }
    }

    #[must_use]
    pub fn element(node: AstId, element: u32) -> Self {
        Self { node, element }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// An imported module; the payload is the interned dotted path.
    Import { path: InternedString },
    /// Reserved for future type declarations.
    TypeSymbol,
    Function,
    Parameter,
    Variable,
}

#[derive(Debug)]
pub struct Symbol {
    pub parent_scope: ScopeId,
    pub name: InternedString,
    pub kind: SymbolKind,
    pub key: SymbolKey,
    /// `const` bindings reject assignment.
    pub is_const: bool,
    /// Set iff the symbol is referenced from a nested function.
    pub captured: bool,
    /// A symbol can only be referenced once its declaration point has been
    /// reached (file-scope functions are activated en masse).
    pub active: bool,
    pub exported: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// The synthetic root scope.
    Global,
    File,
    Function,
    /// The scope holding a `for` statement's loop variable.
    ForStatement,
    Block,
}

#[derive(Debug)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    /// The function declaration node whose body contains this scope (None at
    /// file level). Anonymous function expressions have no symbol, so capture
    /// analysis compares declaration nodes instead.
    pub function: Option<AstId>,
    pub kind: ScopeKind,
    pub nesting_level: u32,
    /// True for the body scope of a loop. Loop scopes start new closure
    /// environments so each iteration captures fresh slots.
    pub is_loop_scope: bool,
    pub children: Vec<ScopeId>,
    /// Declared symbols in declaration order.
    pub entries: Vec<SymbolId>,
    index: AHashMap<InternedString, SymbolId>,
}

#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    symbols: Vec<Symbol>,
    decl_index: AHashMap<SymbolKey, SymbolId>,
    refs: AHashMap<AstId, SymbolId>,
    scope_of_node: AHashMap<AstId, ScopeId>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        let root = Scope {
            parent: None,
            function: None,
            kind: ScopeKind::Global,
            nesting_level: 0,
            is_loop_scope: false,
            children: Vec::new(),
            entries: Vec::new(),
            index: AHashMap::new(),
        };
        Self {
            scopes: vec![root],
            symbols: Vec::new(),
            decl_index: AHashMap::new(),
            refs: AHashMap::new(),
            scope_of_node: AHashMap::new(),
        }
    }

    #[must_use]
    pub fn root(&self) -> ScopeId {
        ScopeId::ROOT
    }

    /// Registers a new scope under `parent` and links it to the opening node.
    pub fn register_scope(
        &mut self,
        parent: ScopeId,
        function: Option<AstId>,
        kind: ScopeKind,
        node: AstId,
    ) -> ScopeId {
        let nesting_level = self.scope(parent).nesting_level + 1;
        let id = ScopeId(u32::try_from(self.scopes.len()).expect("scope count exceeds u32"));
        self.scopes.push(Scope {
            parent: Some(parent),
            function,
            kind,
            nesting_level,
            is_loop_scope: false,
            children: Vec::new(),
            entries: Vec::new(),
            index: AHashMap::new(),
        });
        self.scopes[parent.index()].children.push(id);
        let previous = self.scope_of_node.insert(node, id);
        debug_assert!(previous.is_none(), "node already opened a scope");
        id
    }

    /// Registers a declaration in `scope`. Returns `None` when the name is
    /// already taken in that scope.
    pub fn register_decl(&mut self, scope: ScopeId, symbol: Symbol) -> Option<SymbolId> {
        debug_assert_eq!(symbol.parent_scope, scope);
        if self.scopes[scope.index()].index.contains_key(&symbol.name) {
            return None;
        }
        let id = SymbolId(u32::try_from(self.symbols.len()).expect("symbol count exceeds u32"));
        let name = symbol.name;
        let key = symbol.key;
        self.symbols.push(symbol);
        let scope_data = &mut self.scopes[scope.index()];
        scope_data.entries.push(id);
        scope_data.index.insert(name, id);
        self.decl_index.insert(key, id);
        Some(id)
    }

    /// Records the resolution of a reference node.
    pub fn register_ref(&mut self, node: AstId, symbol: SymbolId) {
        self.refs.insert(node, symbol);
    }

    /// Walks from `scope` towards the root until `name` is found.
    #[must_use]
    pub fn find_name(&self, scope: ScopeId, name: InternedString) -> Option<(ScopeId, SymbolId)> {
        let mut current = Some(scope);
        while let Some(scope_id) = current {
            let scope = self.scope(scope_id);
            if let Some(&symbol) = scope.index.get(&name) {
                return Some((scope_id, symbol));
            }
            current = scope.parent;
        }
        None
    }

    /// True when `ancestor` strictly contains `scope`.
    #[must_use]
    pub fn is_strict_ancestor(&self, ancestor: ScopeId, scope: ScopeId) -> bool {
        let mut current = self.scope(scope).parent;
        while let Some(scope_id) = current {
            if scope_id == ancestor {
                return true;
            }
            current = self.scope(scope_id).parent;
        }
        false
    }

    #[must_use]
    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.index()]
    }

    #[must_use]
    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.index()]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.index()]
    }

    /// The symbol declared by `key`, if registration succeeded.
    #[must_use]
    pub fn find_decl(&self, key: SymbolKey) -> Option<SymbolId> {
        self.decl_index.get(&key).copied()
    }

    /// The resolved symbol of a reference node.
    #[must_use]
    pub fn find_ref(&self, node: AstId) -> Option<SymbolId> {
        self.refs.get(&node).copied()
    }

    /// The scope opened by `node` (blocks, functions, files, for-statements).
    #[must_use]
    pub fn find_scope(&self, node: AstId) -> Option<ScopeId> {
        self.scope_of_node.get(&node).copied()
    }

    #[must_use]
    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }
}
