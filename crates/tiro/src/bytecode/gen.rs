//! Lowering IR functions into bytecode.
//!
//! Every SSA value is materialized into a frame-local slot. Liveness drives
//! the assignment: values that stay inside their defining block share a
//! recycled temp-slot pool, values live across blocks (and all phis) get
//! dedicated slots. Phis themselves emit no code; each predecessor stores
//! the matching operand into the phi's slot before its terminator (pushes
//! first, stores in reverse, so parallel copies cannot clobber each other).
//!
//! The generator tracks the compile-time stack balance and requires every
//! basic block to start and end balanced; the builder asserts it.

use ahash::AHashSet;

use crate::{
    bytecode::{
        builder::{CodeBuilder, Label},
        link::{LinkFunction, LinkObject},
        module::{BytecodeFunction, BytecodeFunctionKind},
        op::Opcode,
    },
    ir::{
        liveness::Liveness, visit_stmt_operands, Aggregate, BinaryOpKind, BlockId, Constant, ContainerKind, Function,
        FunctionKind, InstId, IrStmt, LValue, ModuleIr, ModuleMemberId, ModuleMemberKind, RValue, Terminator,
        UnaryOpKind,
    },
};

/// Produces the link object for a whole module. Functions must already have
/// gone through the IR passes.
#[must_use]
pub fn generate_object(module: &ModuleIr) -> LinkObject {
    let mut object = LinkObject::new(module.name);

    for (index, member) in module.members.iter().enumerate() {
        let ir_id = ModuleMemberId::new(index);
        match &member.kind {
            ModuleMemberKind::Import { path } => {
                let path_member = object.use_string(*path);
                object.define_import(ir_id, path_member);
            }
            ModuleMemberKind::Variable { initial } => {
                let name_member = object.use_string(member.name);
                let initial_member = initial.as_ref().and_then(|constant| match *constant {
                    Constant::Null => None,
                    Constant::Int(value) => Some(object.use_integer(value)),
                    Constant::Float(value) => Some(object.use_float(value.0)),
                    Constant::Str(value) => Some(object.use_string(value)),
                    Constant::Symbol(value) => Some(object.use_symbol(value)),
                    // Rejected by the structure check.
                    Constant::Bool(_) => None,
                });
                object.define_variable(ir_id, name_member, initial_member);
            }
            ModuleMemberKind::Function { id } => {
                let func = module.function(*id);
                let link_func = FunctionCodeGen::compile(func, module, &mut object);
                object.define_function(ir_id, link_func);
            }
            ModuleMemberKind::RecordTemplate { keys } => {
                let key_members: Vec<_> = keys.iter().map(|&key| object.use_symbol(key)).collect();
                let _ = object.use_record_template(Some(ir_id), key_members);
            }
        }
        if member.exported {
            object.export(member.name, ir_id);
        }
    }

    object
}

/// Slot assignment of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slots {
    /// The value is never read: its computation is popped.
    None,
    Single(u32),
    /// Method bundles occupy an instance slot and a method slot.
    Method { instance: u32, method: u32 },
}

struct Locations {
    slots: Vec<Slots>,
    total: u32,
}

impl Locations {
    /// Assigns frame slots using the liveness information.
    fn assign(func: &Function, liveness: &Liveness) -> Self {
        let mut locations = Self {
            slots: vec![Slots::None; func.inst_count()],
            total: 0,
        };

        // Dedicated slots: phis and everything live outside its defining
        // block.
        for inst in func.inst_ids() {
            let Some(range) = liveness.live_range(func, inst) else { continue };
            if matches!(func.inst(inst).value, RValue::GetAggregateMember { .. }) {
                continue; // shares the aggregate's slots
            }
            let is_phi = matches!(func.inst(inst).value, RValue::Phi(_));
            let escapes = range.live_in_intervals().next().is_some();
            if is_phi || escapes {
                let assigned = locations.allocate_dedicated(func, inst);
                locations.slots[inst.index()] = assigned;
            }
        }

        // Block-local values share a temp pool that resets at block
        // boundaries. A slot is released right at its owner's last use, so
        // the definition at that statement can reuse it.
        let mut all_temps: Vec<u32> = Vec::new();
        for block_id in func.preorder() {
            let mut free = all_temps.clone();
            let block = func.block(block_id);
            for (position, stmt) in block.stmts.iter().enumerate() {
                let position_u32 = u32::try_from(position).expect("position");

                let mut dying: AHashSet<InstId> = AHashSet::new();
                visit_stmt_operands(func, stmt, &mut |operand| {
                    let owner = slot_owner(func, operand);
                    if let Some(range) = liveness.live_range(func, owner) {
                        if range.definition().block == block_id
                            && range.live_in_intervals().next().is_none()
                            && range.last_use(block_id, position_u32)
                        {
                            dying.insert(owner);
                        }
                    }
                });
                for owner in dying {
                    match locations.slots[owner.index()] {
                        Slots::Single(slot) => free.push(slot),
                        Slots::Method { instance, method } => {
                            free.push(method);
                            free.push(instance);
                        }
                        Slots::None => {}
                    }
                }

                let IrStmt::Define(inst) = stmt else { continue };
                let inst = *inst;
                if locations.slots[inst.index()] != Slots::None {
                    continue; // dedicated
                }
                if matches!(
                    func.inst(inst).value,
                    RValue::GetAggregateMember { .. } | RValue::Phi(_) | RValue::Phi0
                ) {
                    continue;
                }
                let Some(range) = liveness.live_range(func, inst) else { continue };
                let unused = range.definition().end == range.definition().start
                    && range.live_in_intervals().next().is_none();
                if unused {
                    continue; // Slots::None -> the result is popped
                }

                let mut take = |locations: &mut Self, free: &mut Vec<u32>| {
                    free.pop().unwrap_or_else(|| {
                        let slot = locations.total;
                        locations.total += 1;
                        all_temps.push(slot);
                        slot
                    })
                };
                let assigned = if matches!(func.inst(inst).value, RValue::Aggregate(_)) {
                    let instance = take(&mut locations, &mut free);
                    let method = take(&mut locations, &mut free);
                    Slots::Method { instance, method }
                } else {
                    Slots::Single(take(&mut locations, &mut free))
                };
                locations.slots[inst.index()] = assigned;
            }
        }

        locations
    }

    fn allocate_dedicated(&mut self, func: &Function, inst: InstId) -> Slots {
        if matches!(func.inst(inst).value, RValue::Aggregate(_)) {
            let instance = self.total;
            let method = self.total + 1;
            self.total += 2;
            Slots::Method { instance, method }
        } else {
            let slot = self.total;
            self.total += 1;
            Slots::Single(slot)
        }
    }
}

/// Slot lookups on aggregate member reads resolve to the aggregate.
fn slot_owner(func: &Function, inst: InstId) -> InstId {
    match func.inst(inst).value {
        RValue::GetAggregateMember { aggregate, .. } => aggregate,
        _ => inst,
    }
}

struct FunctionCodeGen<'f, 'o> {
    func: &'f Function,
    module: &'f ModuleIr,
    liveness: Liveness,
    locations: Locations,
    builder: CodeBuilder,
    object: &'o mut LinkObject,
    labels: Vec<Label>,
}

impl<'f, 'o> FunctionCodeGen<'f, 'o> {
    fn compile(func: &'f Function, module: &'f ModuleIr, object: &'o mut LinkObject) -> LinkFunction {
        let liveness = Liveness::compute(func);
        let locations = Locations::assign(func, &liveness);
        let mut gen = FunctionCodeGen {
            func,
            module,
            liveness,
            locations,
            builder: CodeBuilder::new(),
            object,
            labels: Vec::new(),
        };
        gen.run();

        let kind = match func.kind {
            FunctionKind::Normal => BytecodeFunctionKind::Normal,
            FunctionKind::Closure => BytecodeFunctionKind::Closure,
        };
        let locals = gen.locations.total;
        let (code, refs) = gen.builder.finish();
        LinkFunction {
            func: BytecodeFunction {
                name: func.name,
                kind,
                params: func.param_count,
                locals,
                code,
                handlers: Vec::new(),
            },
            refs,
        }
    }

    fn run(&mut self) {
        let order = self.func.preorder();
        self.labels = (0..self.func.block_count()).map(|_| self.builder.make_label()).collect();

        for &block_id in &order {
            self.builder.define_label(self.labels[block_id.index()]);
            self.builder.set_balance(0);

            let block = self.func.block(block_id);
            for stmt in &block.stmts {
                match stmt {
                    IrStmt::Define(inst) => self.emit_define(*inst),
                    IrStmt::Assign { target, value } => self.emit_assign(*target, *value),
                }
            }
            self.emit_phi_moves(block_id);
            self.emit_terminator(block_id, &block.terminator);
            self.builder.check_balance(0);
        }
    }

    // --- operand & slot plumbing ---

    fn slots_of(&self, inst: InstId) -> Slots {
        self.locations.slots[slot_owner(self.func, inst).index()]
    }

    /// Pushes the value of an already-defined instruction.
    fn push_operand(&mut self, inst: InstId) {
        match self.slots_of(inst) {
            Slots::Single(slot) => self.builder.emit_u32(Opcode::LoadLocal, slot),
            Slots::Method { .. } => unreachable!("method bundles are consumed by CallMethod"),
            Slots::None => unreachable!("operand {inst:?} has no slot"),
        }
    }

    fn store_result(&mut self, inst: InstId) {
        match self.locations.slots[inst.index()] {
            Slots::Single(slot) => self.builder.emit_u32(Opcode::StoreLocal, slot),
            // The value is never read; discard it.
            Slots::None => self.builder.emit(Opcode::Pop),
            Slots::Method { .. } => unreachable!("aggregates store both members explicitly"),
        }
    }

    // --- definitions ---

    fn emit_define(&mut self, inst: InstId) {
        let value = self.func.inst(inst).value;
        match value {
            // Phi slots are written by the predecessors; member reads share
            // the aggregate's slots.
            RValue::Phi(_) | RValue::GetAggregateMember { .. } => {}
            RValue::Phi0 => unreachable!("no incomplete phi survives construction"),
            RValue::Aggregate(Aggregate::Method { instance, function }) => {
                self.push_operand(instance);
                let name_member = self.object.use_symbol(function);
                self.builder.emit_member(Opcode::LoadMethod, name_member);
                match self.locations.slots[inst.index()] {
                    Slots::Method { instance, method } => {
                        self.builder.emit_u32(Opcode::StoreLocal, method);
                        self.builder.emit_u32(Opcode::StoreLocal, instance);
                    }
                    // The bundle is never consumed; discard both halves.
                    Slots::None => {
                        self.builder.emit(Opcode::Pop);
                        self.builder.emit(Opcode::Pop);
                    }
                    Slots::Single(_) => unreachable!("aggregates use method slots"),
                }
            }
            RValue::MethodCall { method, args } => {
                let bundle = slot_owner(self.func, method);
                match self.locations.slots[bundle.index()] {
                    Slots::Method { instance, method } => {
                        self.builder.emit_u32(Opcode::LoadLocal, instance);
                        self.builder.emit_u32(Opcode::LoadLocal, method);
                    }
                    _ => unreachable!("method call target is not a bundle"),
                }
                let arg_list = self.func.list(args);
                for &arg in arg_list {
                    self.push_operand(arg);
                }
                let argc = u32::try_from(arg_list.len()).expect("argument count");
                // Pops argc arguments plus the (instance, method) pair.
                self.builder
                    .emit_counted(Opcode::CallMethod, argc, -i32::try_from(arg_list.len()).expect("argc") - 1);
                self.store_result(inst);
            }
            other => {
                self.emit_rvalue(&other);
                self.store_result(inst);
            }
        }
    }

    /// Emits code leaving exactly one value on the stack.
    fn emit_rvalue(&mut self, value: &RValue) {
        match *value {
            RValue::Phi(_) | RValue::Phi0 | RValue::Aggregate(_) | RValue::GetAggregateMember { .. } | RValue::MethodCall { .. } => {
                unreachable!("handled by emit_define")
            }
            RValue::Read(lvalue) => self.emit_read(lvalue),
            RValue::Alias(source) => self.push_operand(source),
            RValue::Constant(constant) => self.emit_constant(constant),
            RValue::OuterEnvironment => self.builder.emit(Opcode::LoadClosure),
            RValue::UnaryOp { op, operand } => {
                self.push_operand(operand);
                self.builder.emit(match op {
                    UnaryOpKind::Plus => Opcode::UPos,
                    UnaryOpKind::Minus => Opcode::UNeg,
                    UnaryOpKind::BitwiseNot => Opcode::BNot,
                    UnaryOpKind::LogicalNot => Opcode::LNot,
                });
            }
            RValue::BinaryOp { op, left, right } => {
                self.push_operand(left);
                self.push_operand(right);
                self.builder.emit(match op {
                    BinaryOpKind::Add => Opcode::Add,
                    BinaryOpKind::Subtract => Opcode::Sub,
                    BinaryOpKind::Multiply => Opcode::Mul,
                    BinaryOpKind::Divide => Opcode::Div,
                    BinaryOpKind::Modulus => Opcode::Mod,
                    BinaryOpKind::Power => Opcode::Pow,
                    BinaryOpKind::LeftShift => Opcode::LSh,
                    BinaryOpKind::RightShift => Opcode::RSh,
                    BinaryOpKind::BitwiseAnd => Opcode::BAnd,
                    BinaryOpKind::BitwiseOr => Opcode::BOr,
                    BinaryOpKind::BitwiseXor => Opcode::BXor,
                    BinaryOpKind::Less => Opcode::Lt,
                    BinaryOpKind::LessEquals => Opcode::Lte,
                    BinaryOpKind::Greater => Opcode::Gt,
                    BinaryOpKind::GreaterEquals => Opcode::Gte,
                    BinaryOpKind::Equals => Opcode::Eq,
                    BinaryOpKind::NotEquals => Opcode::NEq,
                });
            }
            RValue::Call { func, args } => {
                self.push_operand(func);
                let arg_list = self.func.list(args);
                for &arg in arg_list {
                    self.push_operand(arg);
                }
                let argc = u32::try_from(arg_list.len()).expect("argument count");
                // Pops the callable plus argc arguments, pushes the result.
                self.builder
                    .emit_counted(Opcode::Call, argc, -i32::try_from(arg_list.len()).expect("argc"));
            }
            RValue::MakeEnvironment { parent, size } => {
                self.push_operand(parent);
                self.builder.emit_u32(Opcode::MkContext, size);
            }
            RValue::MakeClosure { env, func } => {
                self.push_operand(func);
                self.push_operand(env);
                self.builder.emit(Opcode::MkClosure);
            }
            RValue::Container { kind, args } => {
                let arg_list = self.func.list(args);
                for &arg in arg_list {
                    self.push_operand(arg);
                }
                let len = i32::try_from(arg_list.len()).expect("container length");
                match kind {
                    ContainerKind::Array => {
                        self.builder.emit_counted(Opcode::MkArray, len.unsigned_abs(), 1 - len);
                    }
                    ContainerKind::Tuple => {
                        self.builder.emit_counted(Opcode::MkTuple, len.unsigned_abs(), 1 - len);
                    }
                    ContainerKind::Set => {
                        self.builder.emit_counted(Opcode::MkSet, len.unsigned_abs(), 1 - len);
                    }
                    ContainerKind::Map => {
                        debug_assert_eq!(len % 2, 0, "map arguments alternate keys and values");
                        let pairs = (len / 2).unsigned_abs();
                        self.builder.emit_counted(Opcode::MkMap, pairs, 1 - len);
                    }
                }
            }
            RValue::Record { template, args } => {
                let arg_list = self.func.list(args);
                for &arg in arg_list {
                    self.push_operand(arg);
                }
                let len = i32::try_from(arg_list.len()).expect("record length");
                let member = self.object.use_member(template);
                self.builder.emit_counted_member(Opcode::MkRecord, member, 1 - len);
            }
            RValue::Format { args } => {
                self.builder.emit(Opcode::MkBuilder);
                let arg_list = self.func.list(args);
                for &arg in arg_list {
                    self.push_operand(arg);
                    self.builder.emit(Opcode::BuilderAppend);
                }
                self.builder.emit(Opcode::BuilderString);
            }
            // Error values only appear in rejected compilations.
            RValue::Error => self.builder.emit(Opcode::LoadNull),
        }
    }

    fn emit_read(&mut self, lvalue: LValue) {
        match lvalue {
            LValue::Param(index) => self.builder.emit_u32(Opcode::LoadParam, index),
            LValue::Closure { env, levels, index } => {
                self.push_operand(env);
                self.builder.emit_u32_u32(Opcode::LoadContext, levels, index);
            }
            LValue::Module(member) => {
                let member = self.object.use_member(member);
                self.builder.emit_member(Opcode::LoadModule, member);
            }
            LValue::Field { object, name } => {
                self.push_operand(object);
                let member = self.object.use_symbol(name);
                self.builder.emit_member(Opcode::LoadMember, member);
            }
            LValue::TupleField { object, index } => {
                self.push_operand(object);
                self.builder.emit_u32(Opcode::LoadTupleMember, index);
            }
            LValue::Index { object, index } => {
                self.push_operand(object);
                self.push_operand(index);
                self.builder.emit(Opcode::LoadIndex);
            }
        }
    }

    fn emit_constant(&mut self, constant: Constant) {
        match constant {
            Constant::Null => self.builder.emit(Opcode::LoadNull),
            Constant::Bool(true) => self.builder.emit(Opcode::LoadTrue),
            Constant::Bool(false) => self.builder.emit(Opcode::LoadFalse),
            Constant::Int(value) => self.builder.emit_int(value),
            Constant::Float(value) => self.builder.emit_float(value.0),
            Constant::Str(value) => {
                let member = self.object.use_string(value);
                self.builder.emit_member(Opcode::LoadModule, member);
            }
            Constant::Symbol(value) => {
                let member = self.object.use_symbol(value);
                self.builder.emit_member(Opcode::LoadModule, member);
            }
        }
    }

    fn emit_assign(&mut self, target: LValue, value: InstId) {
        match target {
            LValue::Param(index) => {
                self.push_operand(value);
                self.builder.emit_u32(Opcode::StoreParam, index);
            }
            LValue::Closure { env, levels, index } => {
                self.push_operand(value);
                self.push_operand(env);
                self.builder.emit_u32_u32(Opcode::StoreContext, levels, index);
            }
            LValue::Module(member) => {
                self.push_operand(value);
                let member = self.object.use_member(member);
                self.builder.emit_member(Opcode::StoreModule, member);
            }
            LValue::Field { object, name } => {
                self.push_operand(value);
                self.push_operand(object);
                let member = self.object.use_symbol(name);
                self.builder.emit_member(Opcode::StoreMember, member);
            }
            LValue::TupleField { object, index } => {
                self.push_operand(value);
                self.push_operand(object);
                self.builder.emit_u32(Opcode::StoreTupleMember, index);
            }
            LValue::Index { object, index } => {
                self.push_operand(value);
                self.push_operand(object);
                self.push_operand(index);
                self.builder.emit(Opcode::StoreIndex);
            }
        }
    }

    // --- control flow ---

    /// Before leaving `pred`, stores the operands of every phi in the
    /// successor blocks. All reads happen before all writes (pushes, then
    /// stores in reverse) so interfering phi copies stay correct.
    fn emit_phi_moves(&mut self, pred: BlockId) {
        let successors = self.func.block(pred).terminator.successors();
        for successor in successors {
            let succ_block = self.func.block(successor);
            let Some(pred_index) = succ_block.predecessors.iter().position(|&p| p == pred) else {
                continue;
            };

            let mut phi_slots: Vec<u32> = Vec::new();
            let phi_count = succ_block.phi_count(self.func);
            for stmt in &succ_block.stmts[..phi_count] {
                let IrStmt::Define(phi_inst) = stmt else { continue };
                let RValue::Phi(phi_id) = self.func.inst(*phi_inst).value else {
                    continue;
                };
                let operand = self.func.phi(phi_id).operands[pred_index];
                self.push_operand(operand);
                match self.locations.slots[phi_inst.index()] {
                    Slots::Single(slot) => phi_slots.push(slot),
                    _ => unreachable!("phis always hold dedicated single slots"),
                }
            }
            for &slot in phi_slots.iter().rev() {
                self.builder.emit_u32(Opcode::StoreLocal, slot);
            }
        }
    }

    fn emit_terminator(&mut self, block: BlockId, terminator: &Terminator) {
        match *terminator {
            Terminator::None => unreachable!("block {block:?} was never terminated"),
            Terminator::Jump(target) => {
                self.builder.emit_jump(Opcode::Jmp, self.labels[target.index()]);
            }
            Terminator::Branch { value, then_, else_ } => {
                self.push_operand(value);
                self.builder.emit_jump(Opcode::JmpFalsePop, self.labels[else_.index()]);
                self.builder.emit_jump(Opcode::Jmp, self.labels[then_.index()]);
            }
            Terminator::Return { value, .. } => {
                self.push_operand(value);
                self.builder.emit(Opcode::Ret);
            }
            // The exit block only exists to collect return edges.
            Terminator::Exit => {}
            Terminator::AssertFail { expr, message } => {
                self.push_operand(expr);
                self.push_operand(message);
                self.builder.emit(Opcode::AssertFail);
            }
            Terminator::Never => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        bytecode::link::link,
        diagnostics::Diagnostics,
        ir::{dce::remove_unused_insts, gen::generate_module},
        parser::parse_file,
        semantics::{check_structure, resolve_symbols},
        strings::StringTable,
    };

    fn compile(source: &str) -> crate::bytecode::module::BytecodeModule {
        let mut strings = StringTable::new();
        let mut diag = Diagnostics::new();
        let mut file = parse_file(source, &mut strings, &mut diag);
        let table = resolve_symbols(&mut file, &mut strings, &mut diag);
        check_structure(&mut file, &table, &strings, &mut diag);
        assert!(!diag.has_errors(), "compilation failed:\n{}", diag.render(source));
        let name = strings.insert("test");
        let mut module = generate_module(&file, name, source, &table, &mut strings, &mut diag);
        for func in &mut module.functions {
            remove_unused_insts(func);
        }
        link(generate_object(&module)).expect("linking succeeds")
    }

    #[test]
    fn simple_function_compiles() {
        let module = compile("export func add(a, b) { return a + b; }");
        assert_eq!(module.functions.len(), 1);
        let func = &module.functions[0];
        assert_eq!(func.params, 2);
        assert!(!func.code.is_empty());
        assert_eq!(func.code.last().copied(), Some(Opcode::Ret as u8));
    }

    #[test]
    fn constants_are_module_members() {
        let module = compile(r#"export func greet() { return "hello"; }"#);
        assert!(module
            .members
            .iter()
            .any(|m| matches!(m, crate::bytecode::module::BytecodeMember::String(_))));
    }

    #[test]
    fn identical_string_constants_share_one_member() {
        let module = compile(r#"export func pair() { return ("dup", "dup"); }"#);
        let strings = module
            .members
            .iter()
            .filter(|m| matches!(m, crate::bytecode::module::BytecodeMember::String(_)))
            .count();
        // "dup" once, plus the export symbol's name string.
        assert_eq!(strings, 2);
    }

    #[test]
    fn exports_are_recorded() {
        let module = compile("export func visible() { return 1; } func hidden() { return 2; }");
        assert_eq!(module.exports.len(), 1);
        assert_eq!(module.functions.len(), 2);
    }

    #[test]
    fn loops_compile_with_backward_jumps() {
        let module = compile(
            r"
            export func factorial(n) {
                var r = 1;
                for (var i = 2; i <= n; i += 1) {
                    r *= i;
                }
                return r;
            }
        ",
        );
        let func = &module.functions[0];
        assert!(func.locals > 0);
        // There is at least one unconditional jump (loop back edge).
        assert!(func.code.contains(&(Opcode::Jmp as u8)));
    }

    #[test]
    fn closures_emit_context_opcodes() {
        let module = compile(
            r"
            export func mk() {
                var x = 0;
                func inc() {
                    x += 1;
                    return x;
                }
                return inc;
            }
        ",
        );
        assert_eq!(module.functions.len(), 2);
        let outer = &module.functions[0];
        assert!(outer.code.contains(&(Opcode::MkContext as u8)));
        assert!(outer.code.contains(&(Opcode::MkClosure as u8)));
        let inner = &module.functions[1];
        assert_eq!(inner.kind, BytecodeFunctionKind::Closure);
        assert!(inner.code.contains(&(Opcode::LoadClosure as u8)));
    }

    #[test]
    fn method_calls_use_load_method_and_call_method() {
        let module = compile("export func go(h) { return h.step(1); }");
        let func = &module.functions[0];
        assert!(func.code.contains(&(Opcode::LoadMethod as u8)));
        assert!(func.code.contains(&(Opcode::CallMethod as u8)));
    }

    #[test]
    fn record_literals_reference_a_template() {
        let module = compile("export func point() { return (x: 1, y: 2); }");
        assert_eq!(module.records.len(), 1);
        assert_eq!(module.records[0].keys.len(), 2);
        let func = &module.functions[0];
        assert!(func.code.contains(&(Opcode::MkRecord as u8)));
    }
}
