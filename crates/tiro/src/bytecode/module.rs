//! The linked bytecode module: the boundary between compiler and VM.
//!
//! Modules serialize with a compact binary encoding
//! ([`BytecodeModule::to_bytes`] / [`BytecodeModule::from_bytes`]) for
//! caching compiled output. String content is not embedded: the ids refer to
//! the string table the module was compiled with, which the consumer must
//! keep alongside.

use serde::{Deserialize, Serialize};

use crate::strings::InternedString;

macro_rules! bytecode_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(u32);

        impl $name {
            #[inline]
            #[must_use]
            pub fn new(index: usize) -> Self {
                Self(u32::try_from(index).expect("bytecode id exceeds u32 range"))
            }

            #[inline]
            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }

            #[inline]
            #[must_use]
            pub fn raw(self) -> u32 {
                self.0
            }
        }
    };
}

bytecode_id!(
    /// Id of a member in a module (or a link object, before linking).
    BytecodeMemberId
);
bytecode_id!(
    /// Id of a compiled function within a module.
    BytecodeFunctionId
);
bytecode_id!(
    /// Id of a record template within a module.
    RecordTemplateId
);

/// One module-level member.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BytecodeMember {
    Integer(i64),
    Float(f64),
    String(InternedString),
    /// A symbol; `name` references a `String` member.
    Symbol { name: BytecodeMemberId },
    /// An import; `path` references a `String` member holding the dotted
    /// module path.
    Import { path: BytecodeMemberId },
    /// A mutable module variable. `name` references a `String` member;
    /// `initial` optionally references the member holding the initial value.
    Variable {
        name: BytecodeMemberId,
        initial: Option<BytecodeMemberId>,
    },
    Function { id: BytecodeFunctionId },
    RecordTemplate { id: RecordTemplateId },
}

/// Whether a compiled function needs a closure context when instantiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum BytecodeFunctionKind {
    Normal,
    Closure,
}

/// An entry of a function's exception handler table.
///
/// Reserved: `try`/`catch` semantics are not defined yet, so compiled
/// functions always carry an empty table, but the format keeps the slot so
/// existing serialized modules stay valid once handlers land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionHandler {
    pub from: u32,
    pub to: u32,
    pub target: u32,
}

/// One compiled function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BytecodeFunction {
    pub name: InternedString,
    pub kind: BytecodeFunctionKind,
    pub params: u32,
    pub locals: u32,
    pub code: Vec<u8>,
    pub handlers: Vec<ExceptionHandler>,
}

/// A record shape: the ordered set of symbol members naming its fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTemplate {
    /// Symbol members, in field order.
    pub keys: Vec<BytecodeMemberId>,
}

/// A fully linked module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BytecodeModule {
    pub name: InternedString,
    pub members: Vec<BytecodeMember>,
    pub functions: Vec<BytecodeFunction>,
    pub records: Vec<RecordTemplate>,
    /// `(name, value)` pairs; the name references a `Symbol` member.
    pub exports: Vec<(BytecodeMemberId, BytecodeMemberId)>,
}

impl BytecodeModule {
    #[must_use]
    pub fn member(&self, id: BytecodeMemberId) -> &BytecodeMember {
        &self.members[id.index()]
    }

    #[must_use]
    pub fn function(&self, id: BytecodeFunctionId) -> &BytecodeFunction {
        &self.functions[id.index()]
    }

    #[must_use]
    pub fn record(&self, id: RecordTemplateId) -> &RecordTemplate {
        &self.records[id.index()]
    }

    /// Serializes the module with the postcard wire format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Deserializes a module produced by [`Self::to_bytes`]. The caller must
    /// pair it with the string table it was compiled against.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn module_serialization_round_trips() {
        let module = BytecodeModule {
            name: InternedString::default(),
            members: vec![
                BytecodeMember::Integer(42),
                BytecodeMember::Float(1.5),
                BytecodeMember::String(InternedString::default()),
                BytecodeMember::Symbol {
                    name: BytecodeMemberId::new(2),
                },
                BytecodeMember::Function {
                    id: BytecodeFunctionId::new(0),
                },
            ],
            functions: vec![BytecodeFunction {
                name: InternedString::default(),
                kind: BytecodeFunctionKind::Normal,
                params: 1,
                locals: 2,
                code: vec![1, 2, 3, 4],
                handlers: Vec::new(),
            }],
            records: vec![RecordTemplate {
                keys: vec![BytecodeMemberId::new(3)],
            }],
            exports: vec![(BytecodeMemberId::new(3), BytecodeMemberId::new(4))],
        };

        let bytes = module.to_bytes().expect("serialization succeeds");
        let decoded = BytecodeModule::from_bytes(&bytes).expect("deserialization succeeds");
        assert_eq!(module, decoded);
    }
}
