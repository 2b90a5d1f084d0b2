//! Builtin methods on the container and string types.
//!
//! Method names are interned once per VM (see `MethodNames`); lookup happens
//! at `LoadMethod` so a missing method fails before the arguments are
//! evaluated, and dispatch happens at `CallMethod`.

use crate::{
    strings::InternedString,
    vm::{
        error::{VmError, VmResult},
        objects::{render_value, value_equal, value_key, HeapData},
        value::Value,
        Vm,
    },
};

/// True when the builtin type of `data` has a method called `name`.
pub(crate) fn is_builtin_method(vm: &Vm, data: &HeapData, name: InternedString) -> bool {
    let names = &vm.method_names;
    match data {
        HeapData::Array(_) => {
            name == names.push
                || name == names.pop
                || name == names.size
                || name == names.clear
                || name == names.contains
        }
        HeapData::Tuple(_) => name == names.size,
        HeapData::Str(_) => name == names.size || name == names.contains,
        HeapData::Builder(_) => name == names.append || name == names.to_str,
        HeapData::Map(_) => {
            name == names.get
                || name == names.set
                || name == names.contains
                || name == names.remove
                || name == names.size
                || name == names.clear
        }
        HeapData::Set(_) => {
            name == names.add
                || name == names.contains
                || name == names.remove
                || name == names.size
                || name == names.clear
        }
        _ => false,
    }
}

#[derive(Debug, Clone, Copy)]
enum ReceiverKind {
    Array,
    Tuple,
    Str,
    Builder,
    Map,
    Set,
    Other(&'static str),
}

fn expect_args(name: &str, expected: usize, args: &[Value]) -> VmResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(VmError::type_error(format!(
            "{name} expects {expected} arguments, got {}",
            args.len()
        )))
    }
}

/// Dispatches a builtin method call. The receiver and arguments are still
/// rooted on the coroutine stack while this runs, so allocation is safe.
pub(crate) fn call_builtin(vm: &mut Vm, receiver: Value, name: InternedString, args: &[Value]) -> VmResult<Value> {
    let names = vm.method_names;
    let Value::Ref(id) = receiver else {
        return Err(VmError::missing_method("immediate", vm.strings.get(name)));
    };
    let kind = match vm.heap.get(id) {
        HeapData::Array(_) => ReceiverKind::Array,
        HeapData::Tuple(_) => ReceiverKind::Tuple,
        HeapData::Str(_) => ReceiverKind::Str,
        HeapData::Builder(_) => ReceiverKind::Builder,
        HeapData::Map(_) => ReceiverKind::Map,
        HeapData::Set(_) => ReceiverKind::Set,
        other => ReceiverKind::Other(other.type_name()),
    };

    match kind {
        ReceiverKind::Array if name == names.push => {
            expect_args("push", 1, args)?;
            vm.heap.barrier.record(id, args[0]);
            array_mut(vm, id).push(args[0]);
            Ok(Value::Null)
        }
        ReceiverKind::Array if name == names.pop => {
            expect_args("pop", 0, args)?;
            array_mut(vm, id).pop().ok_or_else(|| VmError::out_of_bounds(0, 0))
        }
        ReceiverKind::Array if name == names.size => {
            expect_args("size", 0, args)?;
            let len = array_ref(vm, id).len();
            vm.int_value(i64::try_from(len).expect("length fits i64"))
        }
        ReceiverKind::Array if name == names.clear => {
            expect_args("clear", 0, args)?;
            array_mut(vm, id).clear();
            Ok(Value::Null)
        }
        ReceiverKind::Array if name == names.contains => {
            expect_args("contains", 1, args)?;
            let found = array_ref(vm, id).iter().any(|&item| value_equal(&vm.heap, item, args[0]));
            Ok(Value::Bool(found))
        }
        ReceiverKind::Tuple if name == names.size => {
            expect_args("size", 0, args)?;
            let len = match vm.heap.get(id) {
                HeapData::Tuple(items) => items.len(),
                _ => unreachable!("tuple kind"),
            };
            vm.int_value(i64::try_from(len).expect("length fits i64"))
        }
        ReceiverKind::Str if name == names.size => {
            expect_args("size", 0, args)?;
            let len = match vm.heap.get(id) {
                HeapData::Str(content) => content.chars().count(),
                _ => unreachable!("string kind"),
            };
            vm.int_value(i64::try_from(len).expect("length fits i64"))
        }
        ReceiverKind::Str if name == names.contains => {
            expect_args("contains", 1, args)?;
            let Value::Ref(needle_id) = args[0] else {
                return Err(VmError::type_error("contains expects a string argument"));
            };
            let found = match (vm.heap.get(id), vm.heap.get(needle_id)) {
                (HeapData::Str(content), HeapData::Str(needle)) => content.contains(&**needle),
                _ => return Err(VmError::type_error("contains expects a string argument")),
            };
            Ok(Value::Bool(found))
        }
        ReceiverKind::Builder if name == names.append => {
            expect_args("append", 1, args)?;
            let rendered = render_value(&vm.heap, &vm.strings, args[0]);
            match vm.heap.get_mut(id) {
                HeapData::Builder(content) => content.push_str(&rendered),
                _ => unreachable!("builder kind"),
            }
            Ok(Value::Null)
        }
        ReceiverKind::Builder if name == names.to_str => {
            expect_args("to_str", 0, args)?;
            let content = match vm.heap.get(id) {
                HeapData::Builder(content) => content.clone(),
                _ => unreachable!("builder kind"),
            };
            vm.str_value(&content)
        }
        ReceiverKind::Map if name == names.get => {
            expect_args("get", 1, args)?;
            let key = value_key(&vm.heap, args[0])?;
            Ok(map_ref(vm, id).get(&key).map_or(Value::Null, |(_, value)| *value))
        }
        ReceiverKind::Map if name == names.set => {
            expect_args("set", 2, args)?;
            let key = value_key(&vm.heap, args[0])?;
            vm.heap.barrier.record(id, args[1]);
            map_mut(vm, id).insert(key, (args[0], args[1]));
            Ok(Value::Null)
        }
        ReceiverKind::Map if name == names.contains => {
            expect_args("contains", 1, args)?;
            let key = value_key(&vm.heap, args[0])?;
            Ok(Value::Bool(map_ref(vm, id).contains_key(&key)))
        }
        ReceiverKind::Map if name == names.remove => {
            expect_args("remove", 1, args)?;
            let key = value_key(&vm.heap, args[0])?;
            // Order-preserving removal keeps iteration deterministic.
            Ok(map_mut(vm, id).shift_remove(&key).map_or(Value::Null, |(_, value)| value))
        }
        ReceiverKind::Map if name == names.size => {
            expect_args("size", 0, args)?;
            let len = map_ref(vm, id).len();
            vm.int_value(i64::try_from(len).expect("length fits i64"))
        }
        ReceiverKind::Map if name == names.clear => {
            expect_args("clear", 0, args)?;
            map_mut(vm, id).clear();
            Ok(Value::Null)
        }
        ReceiverKind::Set if name == names.add => {
            expect_args("add", 1, args)?;
            let key = value_key(&vm.heap, args[0])?;
            vm.heap.barrier.record(id, args[0]);
            set_mut(vm, id).entry(key).or_insert(args[0]);
            Ok(Value::Null)
        }
        ReceiverKind::Set if name == names.contains => {
            expect_args("contains", 1, args)?;
            let key = value_key(&vm.heap, args[0])?;
            Ok(Value::Bool(set_ref(vm, id).contains_key(&key)))
        }
        ReceiverKind::Set if name == names.remove => {
            expect_args("remove", 1, args)?;
            let key = value_key(&vm.heap, args[0])?;
            Ok(Value::Bool(set_mut(vm, id).shift_remove(&key).is_some()))
        }
        ReceiverKind::Set if name == names.size => {
            expect_args("size", 0, args)?;
            let len = set_ref(vm, id).len();
            vm.int_value(i64::try_from(len).expect("length fits i64"))
        }
        ReceiverKind::Set if name == names.clear => {
            expect_args("clear", 0, args)?;
            set_mut(vm, id).clear();
            Ok(Value::Null)
        }
        ReceiverKind::Array
        | ReceiverKind::Tuple
        | ReceiverKind::Str
        | ReceiverKind::Builder
        | ReceiverKind::Map
        | ReceiverKind::Set => Err(VmError::missing_method(kind_name(kind), vm.strings.get(name))),
        ReceiverKind::Other(type_name) => Err(VmError::missing_method(type_name, vm.strings.get(name))),
    }
}

fn kind_name(kind: ReceiverKind) -> &'static str {
    match kind {
        ReceiverKind::Array => "Array",
        ReceiverKind::Tuple => "Tuple",
        ReceiverKind::Str => "String",
        ReceiverKind::Builder => "StringBuilder",
        ReceiverKind::Map => "Map",
        ReceiverKind::Set => "Set",
        ReceiverKind::Other(name) => name,
    }
}

fn array_ref(vm: &Vm, id: crate::vm::heap::HeapId) -> &Vec<Value> {
    match vm.heap.get(id) {
        HeapData::Array(items) => items,
        _ => unreachable!("array kind"),
    }
}

fn array_mut(vm: &mut Vm, id: crate::vm::heap::HeapId) -> &mut Vec<Value> {
    match vm.heap.get_mut(id) {
        HeapData::Array(items) => items,
        _ => unreachable!("array kind"),
    }
}

type MapEntries = indexmap::IndexMap<crate::vm::objects::ValueKey, (Value, Value)>;
type SetEntries = indexmap::IndexMap<crate::vm::objects::ValueKey, Value>;

fn map_ref(vm: &Vm, id: crate::vm::heap::HeapId) -> &MapEntries {
    match vm.heap.get(id) {
        HeapData::Map(entries) => entries,
        _ => unreachable!("map kind"),
    }
}

fn map_mut(vm: &mut Vm, id: crate::vm::heap::HeapId) -> &mut MapEntries {
    match vm.heap.get_mut(id) {
        HeapData::Map(entries) => entries,
        _ => unreachable!("map kind"),
    }
}

fn set_ref(vm: &Vm, id: crate::vm::heap::HeapId) -> &SetEntries {
    match vm.heap.get(id) {
        HeapData::Set(entries) => entries,
        _ => unreachable!("set kind"),
    }
}

fn set_mut(vm: &mut Vm, id: crate::vm::heap::HeapId) -> &mut SetEntries {
    match vm.heap.get_mut(id) {
        HeapData::Set(entries) => entries,
        _ => unreachable!("set kind"),
    }
}
