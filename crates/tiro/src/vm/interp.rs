//! The fetch-decode-dispatch loop.
//!
//! One coroutine executes at a time. Its stack object is detached from the
//! heap slot for the duration of the run and lives in `Vm::active_stack`,
//! where the collector traces it directly. The hot loop keeps a cached view
//! of the current frame (code bytes, pc, module); the cache is reloaded
//! whenever the frame stack changes.
//!
//! GC discipline: operands stay on the (traced) coroutine stack while an
//! operation allocates; they are popped only after the allocation
//! succeeded.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::{
    bytecode::{module::BytecodeMemberId, op::Opcode},
    strings::InternedString,
    vm::{
        error::{VmError, VmErrorKind, VmResult},
        heap::HeapId,
        methods,
        objects::{
            as_number, render_value, value_equal, value_key, ClosureContext, CoroutineState, FunctionObj, HeapData,
            Number, RecordObj,
        },
        stack::CoroutineStack,
        value::Value,
        Vm,
    },
};

/// Cached view of the executing frame.
struct Exec {
    code: Rc<[u8]>,
    pc: usize,
    module: HeapId,
    closure: Value,
    frame: crate::vm::stack::Frame,
}

macro_rules! fetch_u32 {
    ($exec:expr) => {{
        let bytes = [
            $exec.code[$exec.pc],
            $exec.code[$exec.pc + 1],
            $exec.code[$exec.pc + 2],
            $exec.code[$exec.pc + 3],
        ];
        $exec.pc += 4;
        u32::from_le_bytes(bytes)
    }};
}

macro_rules! fetch_i64 {
    ($exec:expr) => {{
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&$exec.code[$exec.pc..$exec.pc + 8]);
        $exec.pc += 8;
        i64::from_le_bytes(bytes)
    }};
}

macro_rules! fetch_f64 {
    ($exec:expr) => {{
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&$exec.code[$exec.pc..$exec.pc + 8]);
        $exec.pc += 8;
        f64::from_le_bytes(bytes)
    }};
}

impl Vm {
    pub(crate) fn stack(&mut self) -> &mut CoroutineStack {
        self.active_stack.as_mut().expect("a coroutine is executing")
    }

    pub(crate) fn stack_ref(&self) -> &CoroutineStack {
        self.active_stack.as_ref().expect("a coroutine is executing")
    }

    fn push(&mut self, value: Value) -> VmResult<()> {
        if self.stack().push_value(value) {
            Ok(())
        } else {
            Err(VmError::stack_overflow())
        }
    }
}

fn set_coroutine_state(vm: &mut Vm, coroutine: HeapId, state: CoroutineState) {
    if let HeapData::Coroutine(data) = vm.heap.get_mut(coroutine) {
        data.state = state;
    }
}

/// Runs a coroutine until it returns or traps. The coroutine must be rooted
/// by the caller.
pub(crate) fn run(vm: &mut Vm, coroutine: HeapId) -> VmResult<Value> {
    let HeapData::Coroutine(data) = vm.heap.get(coroutine) else {
        return Err(VmError::type_error("value is not a coroutine"));
    };
    let stack_id = data.stack.expect("coroutine has a stack attached");

    set_coroutine_state(vm, coroutine, CoroutineState::Running);
    let detached = vm.heap.replace(stack_id, HeapData::CoroutineStack(CoroutineStack::detached()));
    let HeapData::CoroutineStack(stack) = detached else {
        unreachable!("coroutine stack slot holds a stack");
    };
    debug_assert!(vm.active_stack.is_none(), "one coroutine executes at a time");
    vm.active_stack = Some(stack);

    let result = dispatch(vm);

    let stack = vm.active_stack.take().expect("stack is still attached");
    let _ = vm.heap.replace(stack_id, HeapData::CoroutineStack(stack));
    set_coroutine_state(vm, coroutine, CoroutineState::Done);
    if let Ok(value) = &result {
        let value = *value;
        if let HeapData::Coroutine(data) = vm.heap.get_mut(coroutine) {
            data.result = value;
        }
    }
    result
}

fn load_exec(vm: &Vm) -> Exec {
    let frame = *vm.stack_ref().top_frame().expect("a frame is active");
    let HeapData::FunctionTemplate(template) = vm.heap.get(frame.template) else {
        unreachable!("frame template is a function template");
    };
    let module = template.module;
    let HeapData::Code(code) = vm.heap.get(template.code) else {
        unreachable!("template code is a code object");
    };
    Exec {
        code: Rc::clone(code),
        pc: frame.pc,
        module,
        closure: frame.closure,
        frame,
    }
}

fn dispatch(vm: &mut Vm) -> VmResult<Value> {
    let mut exec = load_exec(vm);

    loop {
        let op_byte = exec.code[exec.pc];
        let op = Opcode::from_repr(op_byte).unwrap_or_else(|| panic!("invalid opcode byte {op_byte}"));
        vm.tracer.instruction(op, exec.pc);
        exec.pc += 1;

        match op {
            Opcode::LoadNull => vm.push(Value::Null)?,
            Opcode::LoadFalse => vm.push(Value::Bool(false))?,
            Opcode::LoadTrue => vm.push(Value::Bool(true))?,
            Opcode::LoadInt => {
                let value = fetch_i64!(exec);
                let value = vm.int_value(value)?;
                vm.push(value)?;
            }
            Opcode::LoadFloat => {
                let value = fetch_f64!(exec);
                let value = vm.float_value(value)?;
                vm.push(value)?;
            }
            Opcode::LoadParam => {
                let index = fetch_u32!(exec);
                let value = vm.stack_ref().arg(&exec.frame, index);
                vm.push(value)?;
            }
            Opcode::StoreParam => {
                let index = fetch_u32!(exec);
                let value = vm.stack().pop_value();
                let frame = exec.frame;
                vm.stack().set_arg(&frame, index, value);
            }
            Opcode::LoadLocal => {
                let index = fetch_u32!(exec);
                let value = vm.stack_ref().local(&exec.frame, index);
                vm.push(value)?;
            }
            Opcode::StoreLocal => {
                let index = fetch_u32!(exec);
                let value = vm.stack().pop_value();
                let frame = exec.frame;
                vm.stack().set_local(&frame, index, value);
            }
            Opcode::LoadClosure => {
                let closure = exec.closure;
                vm.push(closure)?;
            }
            Opcode::LoadContext => {
                let levels = fetch_u32!(exec);
                let index = fetch_u32!(exec);
                let context = vm.stack().pop_value();
                let context = walk_context(vm, context, levels)?;
                let HeapData::ClosureContext(data) = vm.heap.get(context) else {
                    return Err(VmError::type_error("closure context expected"));
                };
                let value = *data
                    .slots
                    .get(index as usize)
                    .ok_or_else(|| VmError::out_of_bounds(i64::from(index), data.slots.len()))?;
                vm.push(value)?;
            }
            Opcode::StoreContext => {
                let levels = fetch_u32!(exec);
                let index = fetch_u32!(exec);
                let context = vm.stack().pop_value();
                let value = vm.stack().pop_value();
                let context = walk_context(vm, context, levels)?;
                vm.heap.barrier.record(context, value);
                let HeapData::ClosureContext(data) = vm.heap.get_mut(context) else {
                    return Err(VmError::type_error("closure context expected"));
                };
                let len = data.slots.len();
                *data
                    .slots
                    .get_mut(index as usize)
                    .ok_or_else(|| VmError::out_of_bounds(i64::from(index), len))? = value;
            }
            Opcode::LoadMember => {
                let member = BytecodeMemberId::new(fetch_u32!(exec) as usize);
                let name = vm.member_symbol_name(exec.module, member)?;
                let object = vm.stack().pop_value();
                let value = load_member(vm, object, name)?;
                vm.push(value)?;
            }
            Opcode::StoreMember => {
                let member = BytecodeMemberId::new(fetch_u32!(exec) as usize);
                let name = vm.member_symbol_name(exec.module, member)?;
                let object = vm.stack().pop_value();
                let value = vm.stack().pop_value();
                store_member(vm, object, name, value)?;
            }
            Opcode::LoadTupleMember => {
                let index = fetch_u32!(exec);
                let object = vm.stack().pop_value();
                let value = load_tuple_member(vm, object, index)?;
                vm.push(value)?;
            }
            Opcode::StoreTupleMember => {
                let index = fetch_u32!(exec);
                let object = vm.stack().pop_value();
                let value = vm.stack().pop_value();
                store_tuple_member(vm, object, index, value)?;
            }
            Opcode::LoadIndex => {
                let index = vm.stack().pop_value();
                let object = vm.stack().pop_value();
                let value = load_index(vm, object, index)?;
                vm.push(value)?;
            }
            Opcode::StoreIndex => {
                let index = vm.stack().pop_value();
                let object = vm.stack().pop_value();
                let value = vm.stack().pop_value();
                store_index(vm, object, index, value)?;
            }
            Opcode::LoadModule => {
                let member = BytecodeMemberId::new(fetch_u32!(exec) as usize);
                let value = vm.member_value(exec.module, member);
                vm.push(value)?;
            }
            Opcode::StoreModule => {
                let member = BytecodeMemberId::new(fetch_u32!(exec) as usize);
                let value = vm.stack().pop_value();
                let module = exec.module;
                vm.heap.barrier.record(module, value);
                let HeapData::Module(module_obj) = vm.heap.get_mut(module) else {
                    unreachable!("module object kind");
                };
                module_obj.members[member.index()] = value;
            }
            Opcode::Dup => {
                let top = vm.stack_ref().peek(0);
                vm.push(top)?;
            }
            Opcode::Pop => {
                let _ = vm.stack().pop_value();
            }
            Opcode::PopN => {
                let count = fetch_u32!(exec);
                vm.stack().pop_values(count as usize);
            }
            Opcode::Rot2 => {
                let stack = vm.stack();
                let a = stack.peek(0);
                let b = stack.peek(1);
                stack.set_top(0, b);
                stack.set_top(1, a);
            }
            Opcode::Rot3 => {
                let stack = vm.stack();
                let a = stack.peek(0);
                let b = stack.peek(1);
                let c = stack.peek(2);
                stack.set_top(0, b);
                stack.set_top(1, c);
                stack.set_top(2, a);
            }
            Opcode::Rot4 => {
                let stack = vm.stack();
                let a = stack.peek(0);
                let b = stack.peek(1);
                let c = stack.peek(2);
                let d = stack.peek(3);
                stack.set_top(0, b);
                stack.set_top(1, c);
                stack.set_top(2, d);
                stack.set_top(3, a);
            }
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Pow
            | Opcode::LSh
            | Opcode::RSh
            | Opcode::BAnd
            | Opcode::BOr
            | Opcode::BXor => {
                // Operands stay rooted on the stack while the result (a
                // boxed integer, float or string) allocates.
                let right = vm.stack_ref().peek(0);
                let left = vm.stack_ref().peek(1);
                let result = binary_arith(vm, op, left, right)?;
                vm.stack().pop_values(2);
                vm.push(result)?;
            }
            Opcode::Gt | Opcode::Gte | Opcode::Lt | Opcode::Lte => {
                let right = vm.stack_ref().peek(0);
                let left = vm.stack_ref().peek(1);
                let result = compare(vm, op, left, right)?;
                vm.stack().pop_values(2);
                vm.push(Value::Bool(result))?;
            }
            Opcode::Eq => {
                let right = vm.stack_ref().peek(0);
                let left = vm.stack_ref().peek(1);
                let result = value_equal(&vm.heap, left, right);
                vm.stack().pop_values(2);
                vm.push(Value::Bool(result))?;
            }
            Opcode::NEq => {
                let right = vm.stack_ref().peek(0);
                let left = vm.stack_ref().peek(1);
                let result = !value_equal(&vm.heap, left, right);
                vm.stack().pop_values(2);
                vm.push(Value::Bool(result))?;
            }
            Opcode::LNot => {
                let value = vm.stack().pop_value();
                vm.push(Value::Bool(!value.truthy()))?;
            }
            Opcode::BNot => {
                let value = vm.stack_ref().peek(0);
                let result = match as_number(&vm.heap, value) {
                    Some(Number::Int(v)) => vm.int_value(!v)?,
                    _ => return Err(VmError::type_error("bitwise not requires an integer")),
                };
                let _ = vm.stack().pop_value();
                vm.push(result)?;
            }
            Opcode::UPos => {
                let value = vm.stack_ref().peek(0);
                if as_number(&vm.heap, value).is_none() {
                    return Err(VmError::type_error("unary plus requires a number"));
                }
            }
            Opcode::UNeg => {
                let value = vm.stack_ref().peek(0);
                let result = match as_number(&vm.heap, value) {
                    Some(Number::Int(v)) => {
                        let negated = v.checked_neg().ok_or_else(VmError::integer_overflow)?;
                        vm.int_value(negated)?
                    }
                    Some(Number::Float(v)) => vm.float_value(-v)?,
                    None => return Err(VmError::type_error("unary minus requires a number")),
                };
                let _ = vm.stack().pop_value();
                vm.push(result)?;
            }
            Opcode::MkArray => {
                let count = fetch_u32!(exec) as usize;
                let items = vm.stack_ref().top_slice(count).to_vec();
                let array = vm.allocate(HeapData::Array(items))?;
                vm.stack().pop_values(count);
                vm.push(Value::Ref(array))?;
            }
            Opcode::MkTuple => {
                let count = fetch_u32!(exec) as usize;
                let items: Box<[Value]> = vm.stack_ref().top_slice(count).into();
                let tuple = vm.allocate(HeapData::Tuple(items))?;
                vm.stack().pop_values(count);
                vm.push(Value::Ref(tuple))?;
            }
            Opcode::MkSet => {
                let count = fetch_u32!(exec) as usize;
                let mut entries = IndexMap::new();
                for depth in (0..count).rev() {
                    let value = vm.stack_ref().peek(depth);
                    let key = value_key(&vm.heap, value)?;
                    entries.entry(key).or_insert(value);
                }
                let set = vm.allocate(HeapData::Set(entries))?;
                vm.stack().pop_values(count);
                vm.push(Value::Ref(set))?;
            }
            Opcode::MkMap => {
                let pairs = fetch_u32!(exec) as usize;
                let count = pairs * 2;
                let mut entries = IndexMap::new();
                for pair in 0..pairs {
                    let key_depth = count - 1 - pair * 2;
                    let key_value = vm.stack_ref().peek(key_depth);
                    let value = vm.stack_ref().peek(key_depth - 1);
                    let key = value_key(&vm.heap, key_value)?;
                    entries.insert(key, (key_value, value));
                }
                let map = vm.allocate(HeapData::Map(entries))?;
                vm.stack().pop_values(count);
                vm.push(Value::Ref(map))?;
            }
            Opcode::MkRecord => {
                let member = BytecodeMemberId::new(fetch_u32!(exec) as usize);
                let template = vm.member_value(exec.module, member);
                let keys = record_template_keys(vm, template)?;
                let count = keys.len();
                let mut properties = IndexMap::with_capacity(count);
                for (position, name) in keys.into_iter().enumerate() {
                    let value = vm.stack_ref().peek(count - 1 - position);
                    properties.insert(name, value);
                }
                let record = vm.allocate(HeapData::Record(RecordObj { properties }))?;
                vm.stack().pop_values(count);
                vm.push(Value::Ref(record))?;
            }
            Opcode::MkContext => {
                let size = fetch_u32!(exec) as usize;
                let parent = vm.stack_ref().peek(0);
                let context = vm.allocate(HeapData::ClosureContext(ClosureContext {
                    parent,
                    slots: vec![Value::Undefined; size],
                }))?;
                let _ = vm.stack().pop_value();
                vm.push(Value::Ref(context))?;
            }
            Opcode::MkClosure => {
                let context = vm.stack_ref().peek(0);
                let template = vm.stack_ref().peek(1);
                let Value::Ref(template_id) = template else {
                    return Err(VmError::type_error("closure template expected"));
                };
                if !matches!(vm.heap.get(template_id), HeapData::FunctionTemplate(_)) {
                    return Err(VmError::type_error("closure template expected"));
                }
                let function = vm.allocate(HeapData::Function(FunctionObj {
                    template: template_id,
                    closure: context,
                }))?;
                vm.stack().pop_values(2);
                vm.push(Value::Ref(function))?;
            }
            Opcode::MkBuilder => {
                let builder = vm.allocate(HeapData::Builder(String::new()))?;
                vm.push(Value::Ref(builder))?;
            }
            Opcode::BuilderAppend => {
                let value = vm.stack_ref().peek(0);
                let builder = vm.stack_ref().peek(1);
                let rendered = render_value(&vm.heap, &vm.strings, value);
                let Value::Ref(builder_id) = builder else {
                    return Err(VmError::type_error("string builder expected"));
                };
                let HeapData::Builder(content) = vm.heap.get_mut(builder_id) else {
                    return Err(VmError::type_error("string builder expected"));
                };
                content.push_str(&rendered);
                let _ = vm.stack().pop_value();
            }
            Opcode::BuilderString => {
                let builder = vm.stack_ref().peek(0);
                let Value::Ref(builder_id) = builder else {
                    return Err(VmError::type_error("string builder expected"));
                };
                let HeapData::Builder(content) = vm.heap.get(builder_id) else {
                    return Err(VmError::type_error("string builder expected"));
                };
                let content = content.clone();
                let string = vm.str_value(&content)?;
                let _ = vm.stack().pop_value();
                vm.push(string)?;
            }
            Opcode::Jmp => {
                let target = fetch_u32!(exec);
                exec.pc = target as usize;
            }
            Opcode::JmpTrue => {
                let target = fetch_u32!(exec);
                if vm.stack_ref().peek(0).truthy() {
                    exec.pc = target as usize;
                }
            }
            Opcode::JmpTruePop => {
                let target = fetch_u32!(exec);
                if vm.stack().pop_value().truthy() {
                    exec.pc = target as usize;
                }
            }
            Opcode::JmpFalse => {
                let target = fetch_u32!(exec);
                if !vm.stack_ref().peek(0).truthy() {
                    exec.pc = target as usize;
                }
            }
            Opcode::JmpFalsePop => {
                let target = fetch_u32!(exec);
                if !vm.stack().pop_value().truthy() {
                    exec.pc = target as usize;
                }
            }
            Opcode::Call => {
                let argc = fetch_u32!(exec);
                let callee = vm.stack_ref().peek(argc as usize);
                enter_call(vm, &mut exec, callee, argc, CalleeSlots::One)?;
            }
            Opcode::LoadMethod => {
                let member = BytecodeMemberId::new(fetch_u32!(exec) as usize);
                let name = vm.member_symbol_name(exec.module, member)?;
                let method_symbol = vm.member_value(exec.module, member);
                let receiver = vm.stack_ref().peek(0);
                let (instance, method) = load_method(vm, receiver, name, method_symbol)?;
                let _ = vm.stack().pop_value();
                vm.push(instance)?;
                vm.push(method)?;
            }
            Opcode::CallMethod => {
                let argc = fetch_u32!(exec) as usize;
                let method = vm.stack_ref().peek(argc);
                let instance = vm.stack_ref().peek(argc + 1);
                if instance.is_null() {
                    // A plain function value bound without a receiver.
                    let argc = u32::try_from(argc).expect("argc");
                    enter_call(vm, &mut exec, method, argc, CalleeSlots::Two)?;
                } else {
                    // Builtin method dispatch on the receiver type.
                    let Value::Ref(symbol_id) = method else {
                        return Err(VmError::type_error("method slot holds no method"));
                    };
                    let HeapData::Symbol(name) = vm.heap.get(symbol_id) else {
                        return Err(VmError::type_error("method slot holds no method"));
                    };
                    let name = *name;
                    let args = vm.stack_ref().top_slice(argc).to_vec();
                    let result = methods::call_builtin(vm, instance, name, &args)?;
                    vm.stack().pop_values(argc + 2);
                    vm.push(result)?;
                }
            }
            Opcode::Ret => {
                let result = vm.stack().pop_value();
                vm.stack().pop_frame();
                vm.tracer.ret();
                if vm.stack_ref().frame_count() == 0 {
                    return Ok(result);
                }
                vm.push(result)?;
                exec = load_exec(vm);
            }
            Opcode::AssertFail => {
                let message = vm.stack().pop_value();
                let expr = vm.stack().pop_value();
                let expr_text = render_value(&vm.heap, &vm.strings, expr);
                let text = if message.is_null() {
                    format!("assertion `{expr_text}` failed")
                } else {
                    let message = render_value(&vm.heap, &vm.strings, message);
                    format!("assertion `{expr_text}` failed: {message}")
                };
                return Err(VmError::new(VmErrorKind::AssertionFailed, text));
            }
        }
    }
}

/// How many stack slots sit below the arguments for a call (`Call` has the
/// callee, `CallMethod` has the instance/method pair).
#[derive(Debug, Clone, Copy)]
enum CalleeSlots {
    One,
    Two,
}

/// Enters a function frame for `callee` with `argc` arguments on top of the
/// stack. Pops the callee slot(s) from under the arguments first.
fn enter_call(vm: &mut Vm, exec: &mut Exec, callee: Value, argc: u32, slots: CalleeSlots) -> VmResult<()> {
    let Value::Ref(callee_id) = callee else {
        return Err(VmError::not_callable("immediate"));
    };
    let HeapData::Function(FunctionObj { template, closure }) = vm.heap.get(callee_id) else {
        return Err(VmError::not_callable(vm.heap.get(callee_id).type_name()));
    };
    let (template, closure) = (*template, *closure);
    let HeapData::FunctionTemplate(template_data) = vm.heap.get(template) else {
        return Err(VmError::type_error("function template expected"));
    };
    let (params, locals, name) = (template_data.params, template_data.locals, template_data.name);
    if params != argc {
        return Err(VmError::wrong_argument_count(params, argc as usize));
    }

    // Remove the callee slot(s) below the arguments.
    let remove = match slots {
        CalleeSlots::One => 1,
        CalleeSlots::Two => 2,
    };
    for _ in 0..remove {
        let _ = vm.stack().remove_at_depth(argc as usize);
    }

    // Save the return address, then enter the frame.
    vm.stack().top_frame_mut().expect("caller frame").pc = exec.pc;
    if !vm.stack().push_frame(template, closure, params, locals, 0) {
        return Err(VmError::stack_overflow());
    }
    vm.tracer.call(name, argc);
    *exec = load_exec(vm);
    Ok(())
}

fn walk_context(vm: &Vm, context: Value, levels: u32) -> VmResult<HeapId> {
    let mut current = context;
    for _ in 0..levels {
        let Value::Ref(id) = current else {
            return Err(VmError::type_error("closure context chain ended early"));
        };
        let HeapData::ClosureContext(data) = vm.heap.get(id) else {
            return Err(VmError::type_error("closure context expected"));
        };
        current = data.parent;
    }
    match current {
        Value::Ref(id) if matches!(vm.heap.get(id), HeapData::ClosureContext(_)) => Ok(id),
        _ => Err(VmError::type_error("closure context expected")),
    }
}

fn load_member(vm: &Vm, object: Value, name: InternedString) -> VmResult<Value> {
    let Value::Ref(id) = object else {
        return Err(VmError::missing_member("immediate", vm.strings.get(name)));
    };
    match vm.heap.get(id) {
        HeapData::Record(record) => record
            .properties
            .get(&name)
            .copied()
            .ok_or_else(|| VmError::missing_member("Record", vm.strings.get(name))),
        HeapData::Module(module) => match module.exports.get(&name) {
            Some(&member) => Ok(module.members[member as usize]),
            None => Err(VmError::missing_member("Module", vm.strings.get(name))),
        },
        other => Err(VmError::missing_member(other.type_name(), vm.strings.get(name))),
    }
}

fn store_member(vm: &mut Vm, object: Value, name: InternedString, value: Value) -> VmResult<()> {
    let Value::Ref(id) = object else {
        return Err(VmError::missing_member("immediate", vm.strings.get(name)));
    };
    vm.heap.barrier.record(id, value);
    match vm.heap.get_mut(id) {
        HeapData::Record(record) => {
            record.properties.insert(name, value);
            Ok(())
        }
        other => {
            let type_name = other.type_name();
            Err(VmError::missing_member(type_name, vm.strings.get(name)))
        }
    }
}

fn load_tuple_member(vm: &Vm, object: Value, index: u32) -> VmResult<Value> {
    let Value::Ref(id) = object else {
        return Err(VmError::type_error("tuple expected"));
    };
    match vm.heap.get(id) {
        HeapData::Tuple(items) => items
            .get(index as usize)
            .copied()
            .ok_or_else(|| VmError::out_of_bounds(i64::from(index), items.len())),
        other => Err(VmError::type_error(format!("{} is not a tuple", other.type_name()))),
    }
}

fn store_tuple_member(vm: &mut Vm, object: Value, index: u32, value: Value) -> VmResult<()> {
    let Value::Ref(id) = object else {
        return Err(VmError::type_error("tuple expected"));
    };
    vm.heap.barrier.record(id, value);
    match vm.heap.get_mut(id) {
        HeapData::Tuple(items) => {
            let len = items.len();
            match items.get_mut(index as usize) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(VmError::out_of_bounds(i64::from(index), len)),
            }
        }
        other => {
            let type_name = other.type_name();
            Err(VmError::type_error(format!("{type_name} is not a tuple")))
        }
    }
}

fn expect_int(vm: &Vm, value: Value, what: &str) -> VmResult<i64> {
    match as_number(&vm.heap, value) {
        Some(Number::Int(v)) => Ok(v),
        _ => Err(VmError::type_error(format!("{what} must be an integer"))),
    }
}

fn load_index(vm: &Vm, object: Value, index: Value) -> VmResult<Value> {
    let Value::Ref(id) = object else {
        return Err(VmError::type_error("value is not indexable"));
    };
    match vm.heap.get(id) {
        HeapData::Array(items) => {
            let position = expect_int(vm, index, "array index")?;
            let slot = usize::try_from(position).ok().and_then(|p| items.get(p));
            slot.copied().ok_or_else(|| VmError::out_of_bounds(position, items.len()))
        }
        HeapData::Tuple(items) => {
            let position = expect_int(vm, index, "tuple index")?;
            let slot = usize::try_from(position).ok().and_then(|p| items.get(p));
            slot.copied().ok_or_else(|| VmError::out_of_bounds(position, items.len()))
        }
        HeapData::Map(entries) => {
            let key = value_key(&vm.heap, index)?;
            entries
                .get(&key)
                .map(|(_, value)| *value)
                .ok_or_else(|| VmError::new(VmErrorKind::MissingKey, "key not found in map"))
        }
        other => Err(VmError::type_error(format!(
            "{} values are not indexable",
            other.type_name()
        ))),
    }
}

fn store_index(vm: &mut Vm, object: Value, index: Value, value: Value) -> VmResult<()> {
    let Value::Ref(id) = object else {
        return Err(VmError::type_error("value is not indexable"));
    };
    vm.heap.barrier.record(id, value);
    match vm.heap.get(id) {
        HeapData::Array(items) => {
            let position = expect_int(vm, index, "array index")?;
            let len = items.len();
            let valid = usize::try_from(position).ok().filter(|&p| p < len);
            let Some(position) = valid else {
                return Err(VmError::out_of_bounds(position, len));
            };
            let HeapData::Array(items) = vm.heap.get_mut(id) else {
                unreachable!("array kind");
            };
            items[position] = value;
            Ok(())
        }
        HeapData::Map(_) => {
            let key = value_key(&vm.heap, index)?;
            let HeapData::Map(entries) = vm.heap.get_mut(id) else {
                unreachable!("map kind");
            };
            entries.insert(key, (index, value));
            Ok(())
        }
        other => Err(VmError::type_error(format!(
            "{} values are not index-assignable",
            other.type_name()
        ))),
    }
}

/// Resolves a record-template member (a tuple of symbols) into key names.
fn record_template_keys(vm: &Vm, template: Value) -> VmResult<Vec<InternedString>> {
    let Value::Ref(id) = template else {
        return Err(VmError::type_error("record template expected"));
    };
    let HeapData::Tuple(items) = vm.heap.get(id) else {
        return Err(VmError::type_error("record template expected"));
    };
    items
        .iter()
        .map(|&item| match item {
            Value::Ref(symbol) => match vm.heap.get(symbol) {
                HeapData::Symbol(name) => Ok(*name),
                _ => Err(VmError::type_error("record template key is not a symbol")),
            },
            _ => Err(VmError::type_error("record template key is not a symbol")),
        })
        .collect()
}

/// Resolves `LoadMethod`: returns the `(instance, method)` pair.
fn load_method(vm: &Vm, receiver: Value, name: InternedString, method_symbol: Value) -> VmResult<(Value, Value)> {
    if let Value::Ref(id) = receiver {
        match vm.heap.get(id) {
            // Property lookup: plain function values bind without a
            // receiver.
            HeapData::Record(record) => {
                return match record.properties.get(&name) {
                    Some(&value) => Ok((Value::Null, value)),
                    None => Err(VmError::missing_method("Record", vm.strings.get(name))),
                };
            }
            HeapData::Module(module) => {
                return match module.exports.get(&name) {
                    Some(&member) => Ok((Value::Null, module.members[member as usize])),
                    None => Err(VmError::missing_method("Module", vm.strings.get(name))),
                };
            }
            data => {
                if methods::is_builtin_method(vm, data, name) {
                    return Ok((receiver, method_symbol));
                }
                return Err(VmError::missing_method(data.type_name(), vm.strings.get(name)));
            }
        }
    }
    Err(VmError::missing_method("immediate", vm.strings.get(name)))
}

fn binary_arith(vm: &mut Vm, op: Opcode, left: Value, right: Value) -> VmResult<Value> {
    // String concatenation.
    if op == Opcode::Add {
        if let (Value::Ref(a), Value::Ref(b)) = (left, right) {
            if let (HeapData::Str(a), HeapData::Str(b)) = (vm.heap.get(a), vm.heap.get(b)) {
                let joined = format!("{a}{b}");
                return vm.str_value(&joined);
            }
        }
    }

    let (Some(a), Some(b)) = (as_number(&vm.heap, left), as_number(&vm.heap, right)) else {
        return Err(VmError::type_error(format!(
            "operator {op} requires numeric operands"
        )));
    };

    match (a, b) {
        (Number::Int(a), Number::Int(b)) => int_arith(vm, op, a, b),
        (a, b) => {
            let a = to_f64(a);
            let b = to_f64(b);
            let result = match op {
                Opcode::Add => a + b,
                Opcode::Sub => a - b,
                Opcode::Mul => a * b,
                Opcode::Div => {
                    if b == 0.0 {
                        return Err(VmError::divide_by_zero());
                    }
                    a / b
                }
                Opcode::Mod => {
                    if b == 0.0 {
                        return Err(VmError::divide_by_zero());
                    }
                    a % b
                }
                Opcode::Pow => a.powf(b),
                _ => {
                    return Err(VmError::type_error(format!("operator {op} requires integer operands")));
                }
            };
            vm.float_value(result)
        }
    }
}

fn to_f64(value: Number) -> f64 {
    match value {
        Number::Int(v) => v as f64,
        Number::Float(v) => v,
    }
}

fn int_arith(vm: &mut Vm, op: Opcode, a: i64, b: i64) -> VmResult<Value> {
    let result = match op {
        Opcode::Add => a.checked_add(b).ok_or_else(VmError::integer_overflow)?,
        Opcode::Sub => a.checked_sub(b).ok_or_else(VmError::integer_overflow)?,
        Opcode::Mul => a.checked_mul(b).ok_or_else(VmError::integer_overflow)?,
        Opcode::Div => {
            if b == 0 {
                return Err(VmError::divide_by_zero());
            }
            a.checked_div(b).ok_or_else(VmError::integer_overflow)?
        }
        Opcode::Mod => {
            if b == 0 {
                return Err(VmError::divide_by_zero());
            }
            a.checked_rem(b).ok_or_else(VmError::integer_overflow)?
        }
        Opcode::Pow => {
            if b < 0 {
                let result = (a as f64).powf(b as f64);
                return vm.float_value(result);
            }
            let exponent = u32::try_from(b).map_err(|_| VmError::integer_overflow())?;
            a.checked_pow(exponent).ok_or_else(VmError::integer_overflow)?
        }
        Opcode::LSh => {
            let shift = shift_amount(b)?;
            a.checked_shl(shift).ok_or_else(VmError::integer_overflow)?
        }
        Opcode::RSh => {
            let shift = shift_amount(b)?;
            a.checked_shr(shift).ok_or_else(VmError::integer_overflow)?
        }
        Opcode::BAnd => a & b,
        Opcode::BOr => a | b,
        Opcode::BXor => a ^ b,
        _ => unreachable!("not an arithmetic opcode"),
    };
    vm.int_value(result)
}

fn shift_amount(value: i64) -> VmResult<u32> {
    if (0..64).contains(&value) {
        Ok(value as u32)
    } else {
        Err(VmError::type_error("shift amount must be between 0 and 63"))
    }
}

fn compare(vm: &Vm, op: Opcode, left: Value, right: Value) -> VmResult<bool> {
    use std::cmp::Ordering;

    let ordering = if let (Some(a), Some(b)) = (as_number(&vm.heap, left), as_number(&vm.heap, right)) {
        let (a, b) = (to_f64(a), to_f64(b));
        a.partial_cmp(&b)
            .ok_or_else(|| VmError::type_error("values are not comparable"))?
    } else if let (Value::Ref(a), Value::Ref(b)) = (left, right) {
        match (vm.heap.get(a), vm.heap.get(b)) {
            (HeapData::Str(a), HeapData::Str(b)) => a.cmp(b),
            _ => return Err(VmError::type_error("values are not comparable")),
        }
    } else {
        return Err(VmError::type_error("values are not comparable"));
    };

    Ok(match op {
        Opcode::Gt => ordering == Ordering::Greater,
        Opcode::Gte => ordering != Ordering::Less,
        Opcode::Lt => ordering == Ordering::Less,
        Opcode::Lte => ordering != Ordering::Greater,
        _ => unreachable!("not a comparison opcode"),
    })
}
