//! String interning shared by the compiler and the modules it produces.
//!
//! The table stores each unique string once and hands out small copyable
//! [`InternedString`] ids. Identifiers, keywords, string literals and symbol
//! names all go through the table; the VM resolves ids back to text when it
//! materializes modules and when it renders error messages.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Index into the string table's storage.
///
/// Uses `u32` to keep the id small; ids are assigned densely in insertion
/// order. The default value is a valid id for the empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InternedString(u32);

impl InternedString {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Reconstructs an id from a raw index, e.g. when decoding a serialized
    /// module. The caller is responsible for pairing it with the right table.
    #[inline]
    #[must_use]
    pub fn from_index(index: u32) -> Self {
        Self(index)
    }
}

/// Process-local interning map producing [`InternedString`] ids.
#[derive(Debug)]
pub struct StringTable {
    storage: Vec<Box<str>>,
    index: AHashMap<Box<str>, InternedString>,
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StringTable {
    /// Creates a table with the empty string pre-interned at id 0.
    #[must_use]
    pub fn new() -> Self {
        let mut table = Self {
            storage: Vec::new(),
            index: AHashMap::new(),
        };
        let empty = table.insert("");
        debug_assert_eq!(empty, InternedString::default());
        table
    }

    /// Interns `value`, returning the existing id if it is already present.
    pub fn insert(&mut self, value: &str) -> InternedString {
        if let Some(&id) = self.index.get(value) {
            return id;
        }
        let id = InternedString(u32::try_from(self.storage.len()).expect("string table exceeds u32 range"));
        let boxed: Box<str> = value.into();
        self.storage.push(boxed.clone());
        self.index.insert(boxed, id);
        id
    }

    /// Returns the text for `id`.
    #[must_use]
    pub fn get(&self, id: InternedString) -> &str {
        &self.storage[id.index()]
    }

    /// Looks up an already-interned string without inserting.
    #[must_use]
    pub fn find(&self, value: &str) -> Option<InternedString> {
        self.index.get(value).copied()
    }

    /// Number of interned strings (including the empty string).
    #[must_use]
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        // The empty string is always present.
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut table = StringTable::new();
        let a = table.insert("factorial");
        let b = table.insert("factorial");
        assert_eq!(a, b);
        assert_eq!(table.get(a), "factorial");
    }

    #[test]
    fn distinct_strings_get_distinct_ids() {
        let mut table = StringTable::new();
        let a = table.insert("x");
        let b = table.insert("y");
        assert_ne!(a, b);
    }

    #[test]
    fn empty_string_is_default_id() {
        let mut table = StringTable::new();
        assert_eq!(table.insert(""), InternedString::default());
    }
}
