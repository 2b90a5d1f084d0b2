//! The virtual machine context: heap, roots, module registry, coroutines.
//!
//! One `Vm` owns one heap and runs one coroutine at a time. Heap pointers
//! that must survive a potential collection point live either in a root
//! scope (see [`Vm::scope`]), in the module registry, or on the active
//! coroutine stack — all three are marked as roots. It is a programming
//! error to hold a bare [`HeapId`] across an allocation without rooting it.

pub mod error;
pub mod heap;
mod interp;
mod methods;
pub mod objects;
pub mod stack;
pub mod tracer;
pub mod value;

use std::rc::Rc;

use ahash::AHashMap;

use crate::{
    bytecode::module::{BytecodeMember, BytecodeModule},
    strings::{InternedString, StringTable},
    vm::{
        error::{VmError, VmErrorKind, VmResult},
        heap::{Heap, HeapId},
        objects::{Coroutine, CoroutineState, FunctionObj, FunctionTemplate, HeapData, ModuleObj},
        stack::{CoroutineStack, DEFAULT_STACK_LIMIT},
        tracer::{NoopTracer, VmTracer},
        value::Value,
    },
};

/// Method names the interpreter resolves against builtin types, interned
/// once per VM.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MethodNames {
    pub push: InternedString,
    pub pop: InternedString,
    pub size: InternedString,
    pub clear: InternedString,
    pub get: InternedString,
    pub set: InternedString,
    pub contains: InternedString,
    pub remove: InternedString,
    pub add: InternedString,
    pub append: InternedString,
    pub to_str: InternedString,
}

impl MethodNames {
    fn intern(strings: &mut StringTable) -> Self {
        Self {
            push: strings.insert("push"),
            pop: strings.insert("pop"),
            size: strings.insert("size"),
            clear: strings.insert("clear"),
            get: strings.insert("get"),
            set: strings.insert("set"),
            contains: strings.insert("contains"),
            remove: strings.insert("remove"),
            add: strings.insert("add"),
            append: strings.insert("append"),
            to_str: strings.insert("to_str"),
        }
    }
}

/// A root scope: everything pushed through [`Vm::local`] after [`Vm::scope`]
/// stays rooted until the matching [`Vm::close_scope`].
#[derive(Debug)]
#[must_use = "a scope must be closed again"]
pub struct RootScope {
    base: usize,
}

/// Index of a rooted slot within the VM's root stack.
#[derive(Debug, Clone, Copy)]
pub struct Local(usize);

/// The VM context.
pub struct Vm {
    pub(crate) heap: Heap,
    pub(crate) strings: StringTable,
    modules: AHashMap<InternedString, HeapId>,
    roots: Vec<Value>,
    /// The stack of the currently executing coroutine, detached from its
    /// heap slot for the duration of the run.
    pub(crate) active_stack: Option<CoroutineStack>,
    pub(crate) tracer: Box<dyn VmTracer>,
    pub(crate) method_names: MethodNames,
    stack_limit: usize,
}

impl Vm {
    /// Creates a VM sharing the compiler's string table.
    #[must_use]
    pub fn new(mut strings: StringTable) -> Self {
        let method_names = MethodNames::intern(&mut strings);
        Self {
            heap: Heap::new(),
            strings,
            modules: AHashMap::new(),
            roots: Vec::new(),
            active_stack: None,
            tracer: Box::new(NoopTracer),
            method_names,
            stack_limit: DEFAULT_STACK_LIMIT,
        }
    }

    #[must_use]
    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    pub fn strings_mut(&mut self) -> &mut StringTable {
        &mut self.strings
    }

    /// Forces a collection before every allocation. Scenarios must produce
    /// identical results with and without this.
    pub fn set_gc_stress(&mut self, stress: bool) {
        self.heap.set_stress(stress);
    }

    pub fn set_max_objects(&mut self, max: usize) {
        self.heap.set_max_objects(max);
    }

    pub fn set_stack_limit(&mut self, limit: usize) {
        self.stack_limit = limit;
    }

    pub fn set_tracer(&mut self, tracer: Box<dyn VmTracer>) {
        self.tracer = tracer;
    }

    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.heap.live()
    }

    // --- root discipline ---

    /// Opens a root scope. Values registered with [`Self::local`] while the
    /// scope is open survive collections until [`Self::close_scope`].
    pub fn scope(&mut self) -> RootScope {
        RootScope {
            base: self.roots.len(),
        }
    }

    /// Pops every local registered since `scope` was opened.
    pub fn close_scope(&mut self, scope: RootScope) {
        debug_assert!(scope.base <= self.roots.len(), "scopes close in reverse order");
        self.roots.truncate(scope.base);
    }

    /// Roots a value in the innermost open scope.
    pub fn local(&mut self, value: Value) -> Local {
        self.roots.push(value);
        Local(self.roots.len() - 1)
    }

    #[must_use]
    pub fn local_get(&self, local: Local) -> Value {
        self.roots[local.0]
    }

    pub fn local_set(&mut self, local: Local, value: Value) {
        self.roots[local.0] = value;
    }

    // --- allocation & collection ---

    /// Allocates a heap object. Collects first under memory pressure; an
    /// allocation that still does not fit after that collection fails with
    /// an out-of-memory error.
    pub fn allocate(&mut self, data: HeapData) -> VmResult<HeapId> {
        if self.heap.wants_collection() || self.heap.at_capacity() {
            self.collect();
        }
        self.heap.allocate_raw(data)
    }

    /// Runs a full stop-the-world mark-and-sweep collection.
    pub fn collect(&mut self) {
        let live_before = self.heap.live();

        // Mark phase: root scopes, the module registry, the active
        // coroutine stack.
        for index in 0..self.roots.len() {
            let value = self.roots[index];
            self.heap.mark_value(value);
        }
        for &module in self.modules.values() {
            self.heap.mark_id(module);
        }
        self.heap.trace_marked();
        if let Some(stack) = &self.active_stack {
            let mut pending = Vec::new();
            stack.trace(&mut |value| {
                if let Value::Ref(id) = value {
                    pending.push(id);
                }
            });
            for id in pending {
                self.heap.mark_id(id);
            }
            self.heap.trace_marked();
        }

        self.heap.sweep();
        let live_after = self.heap.live();
        self.tracer.collection(live_before, live_after);
    }

    /// Renders a value for display (string interpolation rules).
    #[must_use]
    pub fn render(&self, value: Value) -> String {
        objects::render_value(&self.heap, &self.strings, value)
    }

    /// The text of a heap string value, if it is one.
    #[must_use]
    pub fn as_str(&self, value: Value) -> Option<&str> {
        match value {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Str(content) => Some(content),
                _ => None,
            },
            _ => None,
        }
    }

    /// The integer behind a value, if it is one (embedded or boxed).
    #[must_use]
    pub fn as_int(&self, value: Value) -> Option<i64> {
        match objects::as_number(&self.heap, value) {
            Some(objects::Number::Int(v)) => Some(v),
            _ => None,
        }
    }

    // --- value constructors ---

    /// An integer value: embedded when it fits, boxed otherwise.
    pub fn int_value(&mut self, value: i64) -> VmResult<Value> {
        if Value::fits_small_int(value) {
            Ok(Value::SmallInt(value))
        } else {
            Ok(Value::Ref(self.allocate(HeapData::Integer(value))?))
        }
    }

    pub fn float_value(&mut self, value: f64) -> VmResult<Value> {
        Ok(Value::Ref(self.allocate(HeapData::Float(value))?))
    }

    pub fn str_value(&mut self, value: &str) -> VmResult<Value> {
        Ok(Value::Ref(self.allocate(HeapData::Str(value.into()))?))
    }

    // --- modules ---

    /// Materializes a compiled module into the heap, resolving imports
    /// through the registry, and registers it under its name.
    pub fn load(&mut self, module: &BytecodeModule) -> VmResult<HeapId> {
        let scope = self.scope();
        let result = self.load_inner(module);
        self.close_scope(scope);
        let module_id = result?;
        self.modules.insert(module.name, module_id);
        Ok(module_id)
    }

    fn load_inner(&mut self, module: &BytecodeModule) -> VmResult<HeapId> {
        // The module shell is allocated first so function templates can
        // reference it; members are filled in below.
        let module_id = self.allocate(HeapData::Module(ModuleObj {
            name: module.name,
            members: vec![Value::Undefined; module.members.len()],
            exports: AHashMap::new(),
        }))?;
        let _module_root = self.local(Value::Ref(module_id));

        for (index, member) in module.members.iter().enumerate() {
            let value = match member {
                BytecodeMember::Integer(value) => self.int_value(*value)?,
                BytecodeMember::Float(value) => self.float_value(*value)?,
                BytecodeMember::String(id) => {
                    let content = self.strings.get(*id).to_owned();
                    self.str_value(&content)?
                }
                BytecodeMember::Symbol { name } => {
                    let name = self.member_string(module, *name)?;
                    Value::Ref(self.allocate(HeapData::Symbol(name))?)
                }
                BytecodeMember::Import { path } => {
                    let path = self.member_string(module, *path)?;
                    match self.modules.get(&path) {
                        Some(&imported) => Value::Ref(imported),
                        None => {
                            return Err(VmError::new(
                                VmErrorKind::ImportFailed,
                                format!("module '{}' is not registered", self.strings.get(path)),
                            ));
                        }
                    }
                }
                BytecodeMember::Variable { initial, .. } => match initial {
                    Some(initial) => self.member_value(module_id, *initial),
                    None => Value::Null,
                },
                BytecodeMember::Function { id } => {
                    let func = module.function(*id);
                    let code = self.allocate(HeapData::Code(Rc::from(func.code.as_slice())))?;
                    let _code_root = self.local(Value::Ref(code));
                    let template = self.allocate(HeapData::FunctionTemplate(FunctionTemplate {
                        name: func.name,
                        module: module_id,
                        params: func.params,
                        locals: func.locals,
                        code,
                    }))?;
                    match func.kind {
                        crate::bytecode::module::BytecodeFunctionKind::Normal => {
                            let _template_root = self.local(Value::Ref(template));
                            Value::Ref(self.allocate(HeapData::Function(FunctionObj {
                                template,
                                closure: Value::Null,
                            }))?)
                        }
                        // Closure templates are instantiated by MkClosure.
                        crate::bytecode::module::BytecodeFunctionKind::Closure => Value::Ref(template),
                    }
                }
                BytecodeMember::RecordTemplate { id } => {
                    // Templates materialize as a tuple of their key symbols.
                    let record = module.record(*id);
                    let keys: Vec<Value> = record
                        .keys
                        .iter()
                        .map(|&key| self.member_value(module_id, key))
                        .collect();
                    Value::Ref(self.allocate(HeapData::Tuple(keys.into_boxed_slice()))?)
                }
            };
            self.set_module_member(module_id, index, value);
        }

        // Export index: symbol member -> exported member slot.
        for &(name_member, value_member) in &module.exports {
            let name = self.member_symbol_name(module_id, name_member)?;
            let HeapData::Module(module_obj) = self.heap.get_mut(module_id) else {
                unreachable!("module object kind");
            };
            module_obj
                .exports
                .insert(name, u32::try_from(value_member.index()).expect("member index"));
        }

        Ok(module_id)
    }

    fn set_module_member(&mut self, module_id: HeapId, index: usize, value: Value) {
        self.heap.barrier.record(module_id, value);
        let HeapData::Module(module_obj) = self.heap.get_mut(module_id) else {
            unreachable!("module object kind");
        };
        module_obj.members[index] = value;
    }

    /// The already-materialized value of a module member.
    pub(crate) fn member_value(&self, module_id: HeapId, member: crate::bytecode::module::BytecodeMemberId) -> Value {
        let HeapData::Module(module_obj) = self.heap.get(module_id) else {
            unreachable!("module object kind");
        };
        module_obj.members[member.index()]
    }

    fn member_string(&self, module: &BytecodeModule, member: crate::bytecode::module::BytecodeMemberId) -> VmResult<InternedString> {
        match module.member(member) {
            BytecodeMember::String(id) => Ok(*id),
            other => Err(VmError::type_error(format!(
                "member {} is not a string",
                other_name(other)
            ))),
        }
    }

    /// The interned name of a materialized `Symbol` member.
    pub(crate) fn member_symbol_name(&self, module_id: HeapId, member: crate::bytecode::module::BytecodeMemberId) -> VmResult<InternedString> {
        match self.member_value(module_id, member) {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Symbol(name) => Ok(*name),
                other => Err(VmError::type_error(format!(
                    "member is a {}, not a symbol",
                    other.type_name()
                ))),
            },
            _ => Err(VmError::type_error("member is not a symbol")),
        }
    }

    /// Looks up an exported member of a loaded module by name.
    pub fn export(&self, module_id: HeapId, name: &str) -> VmResult<Value> {
        let Some(name_id) = self.strings.find(name) else {
            return Err(VmError::new(
                VmErrorKind::UnknownExport,
                format!("module has no export named '{name}'"),
            ));
        };
        let HeapData::Module(module_obj) = self.heap.get(module_id) else {
            return Err(VmError::type_error("value is not a module"));
        };
        match module_obj.exports.get(&name_id) {
            Some(&member) => Ok(module_obj.members[member as usize]),
            None => Err(VmError::new(
                VmErrorKind::UnknownExport,
                format!("module has no export named '{name}'"),
            )),
        }
    }

    // --- invocation ---

    /// Invokes an exported function of a loaded module and runs its
    /// coroutine to completion.
    pub fn invoke(&mut self, module_id: HeapId, name: &str, args: &[Value]) -> VmResult<Value> {
        let function = self.export(module_id, name)?;
        self.run_function(function, args)
    }

    /// Runs a callable value in a fresh coroutine.
    pub fn run_function(&mut self, function: Value, args: &[Value]) -> VmResult<Value> {
        let scope = self.scope();
        let _function_root = self.local(function);
        for &arg in args {
            let _ = self.local(arg);
        }
        let result = self.run_function_inner(function, args);
        self.close_scope(scope);
        result
    }

    fn run_function_inner(&mut self, function: Value, args: &[Value]) -> VmResult<Value> {
        let Value::Ref(function_id) = function else {
            return Err(VmError::not_callable("immediate"));
        };
        let HeapData::Function(FunctionObj { template, closure }) = self.heap.get(function_id) else {
            return Err(VmError::not_callable(self.heap.get(function_id).type_name()));
        };
        let (template, closure) = (*template, *closure);
        let HeapData::FunctionTemplate(template_data) = self.heap.get(template) else {
            return Err(VmError::type_error("function template expected"));
        };
        let (params, locals) = (template_data.params, template_data.locals);
        if params as usize != args.len() {
            return Err(VmError::wrong_argument_count(params, args.len()));
        }

        // Build the coroutine and its stack.
        let mut stack = CoroutineStack::new(self.stack_limit);
        for &arg in args {
            if !stack.push_value(arg) {
                return Err(VmError::stack_overflow());
            }
        }
        if !stack.push_frame(template, closure, params, locals, 0) {
            return Err(VmError::stack_overflow());
        }

        let stack_id = self.allocate(HeapData::CoroutineStack(stack))?;
        let _stack_root = self.local(Value::Ref(stack_id));
        let name = match self.heap.get(template) {
            HeapData::FunctionTemplate(t) => t.name,
            _ => InternedString::default(),
        };
        let coroutine_id = self.allocate(HeapData::Coroutine(Coroutine {
            name,
            function,
            stack: Some(stack_id),
            result: Value::Null,
            state: CoroutineState::Ready,
        }))?;
        let _coroutine_root = self.local(Value::Ref(coroutine_id));

        interp::run(self, coroutine_id)
    }
}

fn other_name(member: &BytecodeMember) -> &'static str {
    match member {
        BytecodeMember::Integer(_) => "integer",
        BytecodeMember::Float(_) => "float",
        BytecodeMember::String(_) => "string",
        BytecodeMember::Symbol { .. } => "symbol",
        BytecodeMember::Import { .. } => "import",
        BytecodeMember::Variable { .. } => "variable",
        BytecodeMember::Function { .. } => "function",
        BytecodeMember::RecordTemplate { .. } => "record template",
    }
}
