//! Link objects and the second-pass linker.
//!
//! Bytecode generation emits one [`LinkObject`] per compilation unit. Each
//! entry is a [`LinkItem`]: either a `Use` referencing an IR module member
//! whose definition may live elsewhere in the object, or a `Definition`
//! carrying an actual member value. Constants (integers, floats, strings,
//! symbols) deduplicate by value; record templates deduplicate by their
//! unordered key set.
//!
//! The linker walks the items in definition order, assigns final module
//! member ids, resolves every `Use` and rewrites each function's embedded
//! references by byte offset.

use ahash::AHashMap;

use crate::{
    bytecode::module::{
        BytecodeFunction, BytecodeFunctionId, BytecodeMember, BytecodeMemberId, BytecodeModule, RecordTemplate,
        RecordTemplateId,
    },
    ir::ModuleMemberId,
    strings::InternedString,
};

/// An unresolved member value inside a link object. Mirrors
/// [`BytecodeMember`] but references other *link object* ids.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LinkMember {
    Integer(i64),
    Float(f64),
    String(InternedString),
    Symbol { name: BytecodeMemberId },
    Import { path: BytecodeMemberId },
    Variable {
        name: BytecodeMemberId,
        initial: Option<BytecodeMemberId>,
    },
    Function { id: BytecodeFunctionId },
    RecordTemplate { id: RecordTemplateId },
}

/// An entry of a link object.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkItem {
    /// References an IR module member, possibly defined elsewhere in the
    /// object. Resolved to the member's final id during linking.
    Use(ModuleMemberId),
    /// A definition made in the current object. `ir_id` is absent for
    /// anonymous entries (deduplicated constants).
    Definition {
        ir_id: Option<ModuleMemberId>,
        value: LinkMember,
    },
}

/// Hashable identity for deduplicating link items.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ItemKey {
    Use(ModuleMemberId),
    Integer(i64),
    Float(u64),
    String(InternedString),
    Symbol(BytecodeMemberId),
    /// Record templates dedup by their *sorted* key set.
    RecordTemplate(Vec<BytecodeMemberId>),
}

/// A compiled function with its unresolved member references.
#[derive(Debug)]
pub struct LinkFunction {
    /// Incomplete function: the code still contains link-object member ids.
    pub func: BytecodeFunction,
    /// Places where members are referenced (byte offset -> item id).
    pub refs: Vec<(u32, BytecodeMemberId)>,
}

/// A compilation-unit-sized bytecode container with unresolved cross
/// references.
#[derive(Debug, Default)]
pub struct LinkObject {
    name: InternedString,
    items: Vec<LinkItem>,
    index: AHashMap<ItemKey, BytecodeMemberId>,
    functions: Vec<LinkFunction>,
    records: Vec<RecordTemplate>,
    exports: Vec<(BytecodeMemberId, BytecodeMemberId)>,
}

impl LinkObject {
    #[must_use]
    pub fn new(name: InternedString) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    /// An integer constant, deduplicated by value.
    pub fn use_integer(&mut self, value: i64) -> BytecodeMemberId {
        self.add_keyed(ItemKey::Integer(value), |_| LinkItem::Definition {
            ir_id: None,
            value: LinkMember::Integer(value),
        })
    }

    /// A float constant, deduplicated by bit pattern.
    pub fn use_float(&mut self, value: f64) -> BytecodeMemberId {
        self.add_keyed(ItemKey::Float(value.to_bits()), |_| LinkItem::Definition {
            ir_id: None,
            value: LinkMember::Float(value),
        })
    }

    /// A string constant, deduplicated by id.
    pub fn use_string(&mut self, value: InternedString) -> BytecodeMemberId {
        self.add_keyed(ItemKey::String(value), |_| LinkItem::Definition {
            ir_id: None,
            value: LinkMember::String(value),
        })
    }

    /// A symbol constant; also interns the underlying string member.
    pub fn use_symbol(&mut self, name: InternedString) -> BytecodeMemberId {
        let name_member = self.use_string(name);
        self.add_keyed(ItemKey::Symbol(name_member), |_| LinkItem::Definition {
            ir_id: None,
            value: LinkMember::Symbol { name: name_member },
        })
    }

    /// A reference to an IR module member, resolved during linking.
    pub fn use_member(&mut self, ir_id: ModuleMemberId) -> BytecodeMemberId {
        self.add_keyed(ItemKey::Use(ir_id), |_| LinkItem::Use(ir_id))
    }

    /// A record template, deduplicated by unordered key set. `keys` are
    /// symbol member ids in field order.
    pub fn use_record_template(&mut self, ir_id: Option<ModuleMemberId>, keys: Vec<BytecodeMemberId>) -> BytecodeMemberId {
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        if let Some(&existing) = self.index.get(&ItemKey::RecordTemplate(sorted.clone())) {
            return existing;
        }
        let record_id = RecordTemplateId::new(self.records.len());
        self.records.push(RecordTemplate { keys });
        self.add_keyed(ItemKey::RecordTemplate(sorted), move |_| LinkItem::Definition {
            ir_id,
            value: LinkMember::RecordTemplate { id: record_id },
        })
    }

    pub fn define_import(&mut self, ir_id: ModuleMemberId, path: BytecodeMemberId) {
        self.items.push(LinkItem::Definition {
            ir_id: Some(ir_id),
            value: LinkMember::Import { path },
        });
    }

    pub fn define_variable(&mut self, ir_id: ModuleMemberId, name: BytecodeMemberId, initial: Option<BytecodeMemberId>) {
        self.items.push(LinkItem::Definition {
            ir_id: Some(ir_id),
            value: LinkMember::Variable { name, initial },
        });
    }

    pub fn define_function(&mut self, ir_id: ModuleMemberId, func: LinkFunction) {
        let function_id = BytecodeFunctionId::new(self.functions.len());
        self.functions.push(func);
        self.items.push(LinkItem::Definition {
            ir_id: Some(ir_id),
            value: LinkMember::Function { id: function_id },
        });
    }

    /// Registers an export: `name` (a plain string) exposed as `value`.
    pub fn export(&mut self, name: InternedString, ir_id: ModuleMemberId) {
        let name_member = self.use_symbol(name);
        let value_member = self.use_member(ir_id);
        self.exports.push((name_member, value_member));
    }

    #[must_use]
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn item(&self, id: BytecodeMemberId) -> &LinkItem {
        &self.items[id.index()]
    }

    fn add_keyed(&mut self, key: ItemKey, make: impl FnOnce(&mut Self) -> LinkItem) -> BytecodeMemberId {
        if let Some(&existing) = self.index.get(&key) {
            return existing;
        }
        let item = make(self);
        let id = BytecodeMemberId::new(self.items.len());
        self.items.push(item);
        self.index.insert(key, id);
        id
    }
}

/// Errors produced while resolving a link object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// A `Use` item references an IR member with no definition.
    UnresolvedUse(ModuleMemberId),
}

impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnresolvedUse(id) => write!(f, "unresolved module member reference: {id:?}"),
        }
    }
}

/// Resolves a link object into a final module.
pub fn link(object: LinkObject) -> Result<BytecodeModule, LinkError> {
    let LinkObject {
        name,
        items,
        index: _,
        functions,
        records,
        exports,
    } = object;

    // First pass: definitions get their final ids in definition order and
    // the ir-id index is built.
    let mut final_ids: Vec<Option<BytecodeMemberId>> = vec![None; items.len()];
    let mut ir_index: AHashMap<ModuleMemberId, BytecodeMemberId> = AHashMap::new();
    let mut members: Vec<&LinkMember> = Vec::new();
    for (position, item) in items.iter().enumerate() {
        if let LinkItem::Definition { ir_id, value } = item {
            let final_id = BytecodeMemberId::new(members.len());
            members.push(value);
            final_ids[position] = Some(final_id);
            if let Some(ir_id) = ir_id {
                ir_index.insert(*ir_id, final_id);
            }
        }
    }

    // Second pass: uses resolve through the ir-id index.
    for (position, item) in items.iter().enumerate() {
        if let LinkItem::Use(ir_id) = item {
            let resolved = ir_index.get(ir_id).copied().ok_or(LinkError::UnresolvedUse(*ir_id))?;
            final_ids[position] = Some(resolved);
        }
    }
    let resolve = |id: BytecodeMemberId| final_ids[id.index()].expect("every item resolved");

    // Materialize members with internal references rewritten to final ids.
    let members: Vec<BytecodeMember> = members
        .into_iter()
        .map(|member| match *member {
            LinkMember::Integer(value) => BytecodeMember::Integer(value),
            LinkMember::Float(value) => BytecodeMember::Float(value),
            LinkMember::String(value) => BytecodeMember::String(value),
            LinkMember::Symbol { name } => BytecodeMember::Symbol { name: resolve(name) },
            LinkMember::Import { path } => BytecodeMember::Import { path: resolve(path) },
            LinkMember::Variable { name, initial } => BytecodeMember::Variable {
                name: resolve(name),
                initial: initial.map(resolve),
            },
            LinkMember::Function { id } => BytecodeMember::Function { id },
            LinkMember::RecordTemplate { id } => BytecodeMember::RecordTemplate { id },
        })
        .collect();

    // Rewrite each function's embedded references by byte offset.
    let functions: Vec<BytecodeFunction> = functions
        .into_iter()
        .map(|link_func| {
            let LinkFunction { mut func, refs } = link_func;
            for (offset, member) in refs {
                let final_id = resolve(member);
                let offset = offset as usize;
                func.code[offset..offset + 4].copy_from_slice(&final_id.raw().to_le_bytes());
            }
            func
        })
        .collect();

    let records = records
        .into_iter()
        .map(|record| RecordTemplate {
            keys: record.keys.into_iter().map(resolve).collect(),
        })
        .collect();

    let exports = exports.into_iter().map(|(name, value)| (resolve(name), resolve(value))).collect();

    Ok(BytecodeModule {
        name,
        members,
        functions,
        records,
        exports,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::bytecode::module::BytecodeFunctionKind;

    #[test]
    fn identical_constants_share_a_member() {
        let mut object = LinkObject::new(InternedString::default());
        let a = object.use_integer(42);
        let b = object.use_integer(42);
        let c = object.use_integer(7);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let f1 = object.use_float(2.5);
        let f2 = object.use_float(2.5);
        assert_eq!(f1, f2);
    }

    #[test]
    fn record_templates_dedup_regardless_of_key_order() {
        let mut object = LinkObject::new(InternedString::default());
        let x = object.use_symbol(InternedString::from_index(1));
        let y = object.use_symbol(InternedString::from_index(2));
        let first = object.use_record_template(None, vec![x, y]);
        let second = object.use_record_template(None, vec![y, x]);
        assert_eq!(first, second);
    }

    #[test]
    fn uses_resolve_to_their_definitions() {
        let mut object = LinkObject::new(InternedString::default());
        let ir_id = ModuleMemberId::new(0);

        // A function that references the variable member before it is
        // defined in the object.
        let use_id = object.use_member(ir_id);
        let mut builder = crate::bytecode::builder::CodeBuilder::new();
        builder.emit_member(crate::bytecode::op::Opcode::LoadModule, use_id);
        builder.emit(crate::bytecode::op::Opcode::Ret);
        let (code, refs) = builder.finish();

        let name = object.use_string(InternedString::default());
        object.define_variable(ir_id, name, None);
        let func_ir_id = ModuleMemberId::new(1);
        object.define_function(
            func_ir_id,
            LinkFunction {
                func: BytecodeFunction {
                    name: InternedString::default(),
                    kind: BytecodeFunctionKind::Normal,
                    params: 0,
                    locals: 0,
                    code,
                    handlers: Vec::new(),
                },
                refs,
            },
        );

        let module = link(object).expect("linking succeeds");
        // The variable definition is member 1 (after the name string).
        let patched = u32::from_le_bytes([
            module.functions[0].code[1],
            module.functions[0].code[2],
            module.functions[0].code[3],
            module.functions[0].code[4],
        ]);
        let variable_member = module
            .members
            .iter()
            .position(|m| matches!(m, BytecodeMember::Variable { .. }))
            .expect("variable member exists");
        assert_eq!(patched as usize, variable_member);
    }

    #[test]
    fn unresolved_use_is_an_error() {
        let mut object = LinkObject::new(InternedString::default());
        let _ = object.use_member(ModuleMemberId::new(9));
        assert_eq!(link(object), Err(LinkError::UnresolvedUse(ModuleMemberId::new(9))));
    }
}
