//! Heap object kinds, their tracing walkers, and value equality/hashing.

use std::rc::Rc;

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    strings::{InternedString, StringTable},
    vm::{
        error::{VmError, VmResult},
        heap::{Heap, HeapId},
        stack::CoroutineStack,
        value::Value,
    },
};

/// State machine of a coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CoroutineState {
    Ready,
    Running,
    Waiting,
    Done,
}

/// An instantiable function: name, owning module, frame shape, code.
#[derive(Debug)]
pub struct FunctionTemplate {
    pub name: InternedString,
    pub module: HeapId,
    pub params: u32,
    pub locals: u32,
    /// A `Code` object.
    pub code: HeapId,
}

/// Captured variable slots, chained to the lexically enclosing context.
#[derive(Debug)]
pub struct ClosureContext {
    /// `Null` for the outermost context, otherwise a `ClosureContext` ref.
    pub parent: Value,
    pub slots: Vec<Value>,
}

/// A callable function: template plus (possibly null) closure context.
#[derive(Debug)]
pub struct FunctionObj {
    pub template: HeapId,
    pub closure: Value,
}

/// A loaded module: resolved members plus the export index.
#[derive(Debug)]
pub struct ModuleObj {
    pub name: InternedString,
    pub members: Vec<Value>,
    /// Export name -> member index.
    pub exports: AHashMap<InternedString, u32>,
}

/// A symbol-keyed property bag (record values and dynamic objects).
#[derive(Debug, Default)]
pub struct RecordObj {
    pub properties: IndexMap<InternedString, Value>,
}

/// A user-level coroutine.
#[derive(Debug)]
pub struct Coroutine {
    pub name: InternedString,
    pub function: Value,
    /// The `CoroutineStack` heap object, if one has been attached.
    pub stack: Option<HeapId>,
    pub result: Value,
    pub state: CoroutineState,
}

/// The closed set of heap-allocated object kinds. Every object knows how to
/// enumerate its outgoing value references for the garbage collector.
#[derive(Debug)]
pub enum HeapData {
    /// A boxed integer outside the embedded small-int range.
    Integer(i64),
    Float(f64),
    Str(Box<str>),
    /// A mutable string accumulator.
    Builder(String),
    Symbol(InternedString),
    /// Immutable bytecode bytes, shared with executing frames.
    Code(Rc<[u8]>),
    FunctionTemplate(FunctionTemplate),
    ClosureContext(ClosureContext),
    Function(FunctionObj),
    Module(ModuleObj),
    Array(Vec<Value>),
    Tuple(Box<[Value]>),
    /// Insertion-ordered; the key is the hashable form, the pair keeps the
    /// original key value for iteration and rendering.
    Map(IndexMap<ValueKey, (Value, Value)>),
    Set(IndexMap<ValueKey, Value>),
    Record(RecordObj),
    Coroutine(Coroutine),
    CoroutineStack(CoroutineStack),
}

impl HeapData {
    /// Static name of the object kind, for diagnostics and heap statistics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "Integer",
            Self::Float(_) => "Float",
            Self::Str(_) => "String",
            Self::Builder(_) => "StringBuilder",
            Self::Symbol(_) => "Symbol",
            Self::Code(_) => "Code",
            Self::FunctionTemplate(_) => "FunctionTemplate",
            Self::ClosureContext(_) => "ClosureContext",
            Self::Function(_) => "Function",
            Self::Module(_) => "Module",
            Self::Array(_) => "Array",
            Self::Tuple(_) => "Tuple",
            Self::Map(_) => "Map",
            Self::Set(_) => "Set",
            Self::Record(_) => "Record",
            Self::Coroutine(_) => "Coroutine",
            Self::CoroutineStack(_) => "CoroutineStack",
        }
    }

    /// Enumerates every outgoing value reference (the object's GC walker).
    pub fn trace(&self, visit: &mut dyn FnMut(Value)) {
        match self {
            Self::Integer(_) | Self::Float(_) | Self::Str(_) | Self::Builder(_) | Self::Symbol(_) | Self::Code(_) => {}
            Self::FunctionTemplate(template) => {
                visit(Value::Ref(template.module));
                visit(Value::Ref(template.code));
            }
            Self::ClosureContext(context) => {
                visit(context.parent);
                for &slot in &context.slots {
                    visit(slot);
                }
            }
            Self::Function(function) => {
                visit(Value::Ref(function.template));
                visit(function.closure);
            }
            Self::Module(module) => {
                for &member in &module.members {
                    visit(member);
                }
            }
            Self::Array(items) => {
                for &item in items {
                    visit(item);
                }
            }
            Self::Tuple(items) => {
                for &item in items.iter() {
                    visit(item);
                }
            }
            Self::Map(entries) => {
                for (key, value) in entries.values() {
                    visit(*key);
                    visit(*value);
                }
            }
            Self::Set(entries) => {
                for &value in entries.values() {
                    visit(value);
                }
            }
            Self::Record(record) => {
                for &value in record.properties.values() {
                    visit(value);
                }
            }
            Self::Coroutine(coroutine) => {
                visit(coroutine.function);
                if let Some(stack) = coroutine.stack {
                    visit(Value::Ref(stack));
                }
                visit(coroutine.result);
            }
            Self::CoroutineStack(stack) => stack.trace(visit),
        }
    }
}

/// The hashable identity of a value, used as map/set key storage.
///
/// Guarantees `equal(a, b) => key(a) == key(b)`: integral floats normalize
/// to integers, strings hash by content, tuples structurally.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Null,
    Bool(bool),
    Int(i64),
    /// Non-integral floats, by bit pattern.
    Float(u64),
    Str(Box<str>),
    Symbol(InternedString),
    Tuple(Vec<ValueKey>),
}

/// Computes the hashable key of a value. Mutable containers and functions
/// are unhashable.
pub fn value_key(heap: &Heap, value: Value) -> VmResult<ValueKey> {
    match value {
        Value::Null => Ok(ValueKey::Null),
        Value::Undefined => Err(VmError::type_error("undefined values cannot be hashed")),
        Value::Bool(value) => Ok(ValueKey::Bool(value)),
        Value::SmallInt(value) => Ok(ValueKey::Int(value)),
        Value::Ref(id) => match heap.get(id) {
            HeapData::Integer(value) => Ok(ValueKey::Int(*value)),
            HeapData::Float(value) => Ok(float_key(*value)),
            HeapData::Str(value) => Ok(ValueKey::Str(value.clone())),
            HeapData::Symbol(name) => Ok(ValueKey::Symbol(*name)),
            HeapData::Tuple(items) => {
                let mut keys = Vec::with_capacity(items.len());
                for &item in items.iter() {
                    keys.push(value_key(heap, item)?);
                }
                Ok(ValueKey::Tuple(keys))
            }
            other => Err(VmError::type_error(format!(
                "values of type {} cannot be hashed",
                other.type_name()
            ))),
        },
    }
}

fn float_key(value: f64) -> ValueKey {
    // Integral floats share their key with the equal integer so that
    // equal(a, b) implies hash(a) == hash(b).
    if value.fract() == 0.0 && value >= i64::MIN as f64 && value <= i64::MAX as f64 {
        ValueKey::Int(value as i64)
    } else {
        ValueKey::Float(value.to_bits())
    }
}

/// Structural equality as exposed by the `==` operator.
///
/// Numbers compare across integer/float, strings by content, tuples
/// element-wise; mutable containers and functions compare by identity.
#[must_use]
pub fn value_equal(heap: &Heap, left: Value, right: Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Undefined, _) | (_, Value::Undefined) => false,
        _ => {
            if let (Some(a), Some(b)) = (as_number(heap, left), as_number(heap, right)) {
                return number_equal(a, b);
            }
            match (left, right) {
                (Value::Ref(a), Value::Ref(b)) => {
                    if a == b {
                        return true;
                    }
                    match (heap.get(a), heap.get(b)) {
                        (HeapData::Str(a), HeapData::Str(b)) => a == b,
                        (HeapData::Symbol(a), HeapData::Symbol(b)) => a == b,
                        (HeapData::Tuple(a), HeapData::Tuple(b)) => {
                            a.len() == b.len()
                                && a.iter().zip(b.iter()).all(|(&x, &y)| value_equal(heap, x, y))
                        }
                        _ => false,
                    }
                }
                _ => false,
            }
        }
    }
}

/// Numeric view of a value, when it has one.
#[derive(Debug, Clone, Copy)]
pub enum Number {
    Int(i64),
    Float(f64),
}

#[must_use]
pub fn as_number(heap: &Heap, value: Value) -> Option<Number> {
    match value {
        Value::SmallInt(value) => Some(Number::Int(value)),
        Value::Ref(id) => match heap.get(id) {
            HeapData::Integer(value) => Some(Number::Int(*value)),
            HeapData::Float(value) => Some(Number::Float(*value)),
            _ => None,
        },
        _ => None,
    }
}

fn number_equal(a: Number, b: Number) -> bool {
    match (a, b) {
        (Number::Int(a), Number::Int(b)) => a == b,
        (Number::Float(a), Number::Float(b)) => a == b,
        (Number::Int(a), Number::Float(b)) | (Number::Float(b), Number::Int(a)) => (a as f64) == b,
    }
}

const MAX_RENDER_DEPTH: u32 = 8;

/// Renders a value for string interpolation and error messages.
#[must_use]
pub fn render_value(heap: &Heap, strings: &StringTable, value: Value) -> String {
    let mut out = String::new();
    render_into(heap, strings, value, &mut out, 0);
    out
}

fn render_into(heap: &Heap, strings: &StringTable, value: Value, out: &mut String, depth: u32) {
    use std::fmt::Write;

    if depth > MAX_RENDER_DEPTH {
        out.push_str("...");
        return;
    }
    match value {
        Value::Null => out.push_str("null"),
        Value::Undefined => out.push_str("undefined"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::SmallInt(v) => {
            let _ = write!(out, "{v}");
        }
        Value::Ref(id) => match heap.get(id) {
            HeapData::Integer(v) => {
                let _ = write!(out, "{v}");
            }
            HeapData::Float(v) => {
                let mut buffer = ryu::Buffer::new();
                out.push_str(buffer.format(*v));
            }
            HeapData::Str(v) => out.push_str(v),
            HeapData::Builder(v) => out.push_str(v),
            HeapData::Symbol(name) => {
                let _ = write!(out, "#{}", strings.get(*name));
            }
            HeapData::Code(_) => out.push_str("<code>"),
            HeapData::FunctionTemplate(t) => {
                let _ = write!(out, "<function template {}>", strings.get(t.name));
            }
            HeapData::ClosureContext(_) => out.push_str("<context>"),
            HeapData::Function(f) => {
                let name = match heap.get(f.template) {
                    HeapData::FunctionTemplate(t) => strings.get(t.name),
                    _ => "?",
                };
                let _ = write!(out, "<function {name}>");
            }
            HeapData::Module(m) => {
                let _ = write!(out, "<module {}>", strings.get(m.name));
            }
            HeapData::Array(items) => {
                out.push('[');
                for (index, &item) in items.iter().enumerate() {
                    if index > 0 {
                        out.push_str(", ");
                    }
                    render_into(heap, strings, item, out, depth + 1);
                }
                out.push(']');
            }
            HeapData::Tuple(items) => {
                out.push('(');
                for (index, &item) in items.iter().enumerate() {
                    if index > 0 {
                        out.push_str(", ");
                    }
                    render_into(heap, strings, item, out, depth + 1);
                }
                out.push(')');
            }
            HeapData::Map(entries) => {
                out.push_str("map{");
                for (index, (key, value)) in entries.values().enumerate() {
                    if index > 0 {
                        out.push_str(", ");
                    }
                    render_into(heap, strings, *key, out, depth + 1);
                    out.push_str(": ");
                    render_into(heap, strings, *value, out, depth + 1);
                }
                out.push('}');
            }
            HeapData::Set(entries) => {
                out.push_str("set{");
                for (index, &value) in entries.values().enumerate() {
                    if index > 0 {
                        out.push_str(", ");
                    }
                    render_into(heap, strings, value, out, depth + 1);
                }
                out.push('}');
            }
            HeapData::Record(record) => {
                out.push('(');
                for (index, (name, value)) in record.properties.iter().enumerate() {
                    if index > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{}: ", strings.get(*name));
                    render_into(heap, strings, *value, out, depth + 1);
                }
                out.push(')');
            }
            HeapData::Coroutine(c) => {
                let _ = write!(out, "<coroutine {} {}>", strings.get(c.name), c.state);
            }
            HeapData::CoroutineStack(_) => out.push_str("<coroutine stack>"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::heap::Heap;

    fn heap_with(values: Vec<HeapData>) -> (Heap, Vec<Value>) {
        let mut heap = Heap::new();
        let refs = values
            .into_iter()
            .map(|data| Value::Ref(heap.allocate_raw(data).expect("allocation succeeds")))
            .collect();
        (heap, refs)
    }

    #[test]
    fn equal_values_share_their_key() {
        let (heap, refs) = heap_with(vec![
            HeapData::Integer(3),
            HeapData::Float(3.0),
            HeapData::Str("abc".into()),
            HeapData::Str("abc".into()),
        ]);
        let small = Value::SmallInt(3);

        // equal(a, b) must imply key(a) == key(b).
        let pairs = [(small, refs[0]), (small, refs[1]), (refs[0], refs[1]), (refs[2], refs[3])];
        for (a, b) in pairs {
            assert!(value_equal(&heap, a, b));
            assert_eq!(
                value_key(&heap, a).expect("hashable"),
                value_key(&heap, b).expect("hashable")
            );
        }
    }

    #[test]
    fn tuples_compare_structurally() {
        let (mut heap, refs) = heap_with(vec![HeapData::Str("x".into()), HeapData::Str("x".into())]);
        let t1 = Value::Ref(
            heap.allocate_raw(HeapData::Tuple(vec![Value::SmallInt(1), refs[0]].into_boxed_slice()))
                .expect("alloc"),
        );
        let t2 = Value::Ref(
            heap.allocate_raw(HeapData::Tuple(vec![Value::SmallInt(1), refs[1]].into_boxed_slice()))
                .expect("alloc"),
        );
        assert!(value_equal(&heap, t1, t2));
        assert_eq!(
            value_key(&heap, t1).expect("hashable"),
            value_key(&heap, t2).expect("hashable")
        );
    }

    #[test]
    fn mutable_containers_are_unhashable_and_compare_by_identity() {
        let (heap, refs) = heap_with(vec![
            HeapData::Array(vec![Value::SmallInt(1)]),
            HeapData::Array(vec![Value::SmallInt(1)]),
        ]);
        assert!(!value_equal(&heap, refs[0], refs[1]));
        assert!(value_equal(&heap, refs[0], refs[0]));
        assert!(value_key(&heap, refs[0]).is_err());
    }

    #[test]
    fn rendering_is_plain_for_strings_and_structured_for_containers() {
        let strings = crate::strings::StringTable::new();
        let (mut heap, refs) = heap_with(vec![HeapData::Str("plain".into())]);
        assert_eq!(render_value(&heap, &strings, refs[0]), "plain");

        let tuple = Value::Ref(
            heap.allocate_raw(HeapData::Tuple(vec![Value::SmallInt(1), Value::Bool(true)].into_boxed_slice()))
                .expect("alloc"),
        );
        assert_eq!(render_value(&heap, &strings, tuple), "(1, true)");
    }
}
