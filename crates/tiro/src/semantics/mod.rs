//! Semantic analysis: symbol resolution and structural validation.

mod resolve;
mod structure;
mod symbols;

pub use resolve::resolve_symbols;
pub use structure::check_structure;
pub use symbols::{Scope, ScopeId, ScopeKind, Symbol, SymbolId, SymbolKey, SymbolKind, SymbolTable};
