//! IR construction: lowering the resolved AST into SSA form.
//!
//! SSA is built on the fly with the algorithm from
//!
//! > Braun M., Buchwald S., Hack S., Leißa R., Mallon C., Zwinkau A. (2013):
//! > Simple and Efficient Construction of Static Single Assignment Form.
//! > Compiler Construction, LNCS 7791.
//!
//! Local variables are numbered per block (`write_variable` /
//! `read_variable`); joins create phi functions, loops create incomplete
//! phis that are resolved when the loop header is sealed. A per-block
//! computed-value table memoizes structural expressions, giving a cheap CSE
//! during construction.

mod lower;

use std::collections::VecDeque;

use ahash::AHashMap;

use crate::{
    ast::{Expr, File, FuncDecl, Item},
    diagnostics::Diagnostics,
    ir::{
        AggregateMember, BinaryOpKind, BlockId, Constant, Function, FunctionKind, Inst, InstId, IrStmt, LValue,
        ModuleFunctionId, ModuleIr, ModuleMember, ModuleMemberId, ModuleMemberKind, Phi, PhiId, RValue, Terminator,
        UnaryOpKind,
    },
    semantics::{ScopeId, ScopeKind, SymbolId, SymbolKey, SymbolKind, SymbolTable},
    span::Span,
    strings::{InternedString, StringTable},
};

/// Generates the IR for a whole file. Must only be called on an error-free,
/// fully resolved tree.
pub fn generate_module(
    file: &File,
    module_name: InternedString,
    source: &str,
    table: &SymbolTable,
    strings: &mut StringTable,
    diag: &mut Diagnostics,
) -> ModuleIr {
    let mut gen = ModuleIrGen {
        source,
        table,
        strings,
        diag,
        envs: ClosureEnvCollection::default(),
        members: Vec::new(),
        member_of_symbol: AHashMap::new(),
        record_templates: AHashMap::new(),
        functions: Vec::new(),
        jobs: VecDeque::new(),
        next_function: 0,
    };
    gen.collect_members(file);

    while let Some(job) = gen.jobs.pop_front() {
        let func = FunctionIrGen::compile(&mut gen, &job);
        gen.functions.push(func);
    }

    ModuleIr {
        name: module_name,
        members: gen.members,
        functions: gen.functions,
    }
}

/// Id of a closure environment within one module compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClosureEnvId(u32);

impl ClosureEnvId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Location of a captured symbol: environment plus slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosureEnvLocation {
    pub env: ClosureEnvId,
    pub index: u32,
}

#[derive(Debug)]
struct ClosureEnv {
    parent: Option<ClosureEnvId>,
    size: u32,
}

/// All closure environments of one module plus the captured-symbol index.
#[derive(Debug, Default)]
pub struct ClosureEnvCollection {
    envs: Vec<ClosureEnv>,
    locations: AHashMap<SymbolId, ClosureEnvLocation>,
}

impl ClosureEnvCollection {
    fn push(&mut self, parent: Option<ClosureEnvId>, size: u32) -> ClosureEnvId {
        let id = ClosureEnvId(u32::try_from(self.envs.len()).expect("env count exceeds u32"));
        self.envs.push(ClosureEnv { parent, size });
        id
    }

    fn parent(&self, env: ClosureEnvId) -> Option<ClosureEnvId> {
        self.envs[env.index()].parent
    }

    fn location(&self, symbol: SymbolId) -> Option<ClosureEnvLocation> {
        self.locations.get(&symbol).copied()
    }
}

/// A queued function compilation.
struct FunctionJob<'a> {
    decl: &'a FuncDecl,
    /// The closure environment active at the declaration site.
    outer_env: Option<ClosureEnvId>,
}

struct ModuleIrGen<'a, 'ctx> {
    source: &'a str,
    table: &'a SymbolTable,
    strings: &'ctx mut StringTable,
    diag: &'ctx mut Diagnostics,
    envs: ClosureEnvCollection,
    members: Vec<ModuleMember>,
    member_of_symbol: AHashMap<SymbolId, ModuleMemberId>,
    /// Record templates deduplicated by their sorted key set.
    record_templates: AHashMap<Vec<InternedString>, ModuleMemberId>,
    functions: Vec<Function>,
    jobs: VecDeque<FunctionJob<'a>>,
    next_function: u32,
}

impl<'a> ModuleIrGen<'a, '_> {
    fn collect_members(&mut self, file: &'a File) {
        for item in &file.items {
            match item {
                Item::Import(import) => {
                    if import.has_error {
                        continue;
                    }
                    let Some(symbol_id) = self.table.find_decl(SymbolKey::node(import.id)) else {
                        continue;
                    };
                    let SymbolKind::Import { path } = self.table.symbol(symbol_id).kind else {
                        continue;
                    };
                    let member = self.add_member(ModuleMember {
                        name: import.name,
                        kind: ModuleMemberKind::Import { path },
                        exported: false,
                    });
                    self.member_of_symbol.insert(symbol_id, member);
                }
                Item::Func(func) => {
                    if func.has_error {
                        continue;
                    }
                    let member = self.add_function_job(func, None);
                    if let Some(symbol_id) = self.table.find_decl(SymbolKey::node(func.id)) {
                        self.member_of_symbol.insert(symbol_id, member);
                    }
                }
                Item::Var(decl) => {
                    if decl.has_error {
                        continue;
                    }
                    for binding in &decl.bindings {
                        if binding.has_error {
                            continue;
                        }
                        let Some(symbol_id) = self.table.find_decl(SymbolKey::node(binding.id)) else {
                            continue;
                        };
                        let symbol = self.table.symbol(symbol_id);
                        let initial = binding.init.as_ref().and_then(literal_constant);
                        let member = self.add_member(ModuleMember {
                            name: symbol.name,
                            kind: ModuleMemberKind::Variable { initial },
                            exported: symbol.exported,
                        });
                        self.member_of_symbol.insert(symbol_id, member);
                    }
                }
            }
        }
    }

    fn add_member(&mut self, member: ModuleMember) -> ModuleMemberId {
        let id = ModuleMemberId::new(self.members.len());
        self.members.push(member);
        id
    }

    /// Registers a function member and queues its body for compilation.
    fn add_function_job(&mut self, decl: &'a FuncDecl, outer_env: Option<ClosureEnvId>) -> ModuleMemberId {
        let function_id = ModuleFunctionId::new(self.next_function as usize);
        self.next_function += 1;
        let name = decl.name.unwrap_or_default();
        let member = self.add_member(ModuleMember {
            name,
            kind: ModuleMemberKind::Function { id: function_id },
            exported: decl.exported,
        });
        self.jobs.push_back(FunctionJob { decl, outer_env });
        member
    }

    /// Returns the module member for a record template with the given keys,
    /// creating it if necessary. Key order does not matter for identity.
    fn record_template(&mut self, keys: &[InternedString]) -> ModuleMemberId {
        let mut sorted: Vec<InternedString> = keys.to_vec();
        sorted.sort_unstable();
        if let Some(&member) = self.record_templates.get(&sorted) {
            return member;
        }
        let member = self.add_member(ModuleMember {
            name: InternedString::default(),
            kind: ModuleMemberKind::RecordTemplate { keys: keys.to_vec() },
            exported: false,
        });
        self.record_templates.insert(sorted, member);
        member
    }
}

fn literal_constant(expr: &Expr) -> Option<Constant> {
    use crate::ast::ExprKind;
    match expr.kind {
        ExprKind::Null => Some(Constant::Null),
        ExprKind::Bool(value) => Some(Constant::Bool(value)),
        ExprKind::Int(value) => Some(Constant::Int(value)),
        ExprKind::Float(value) => Some(Constant::Float(crate::ir::FloatValue(value))),
        ExprKind::Str(value) => Some(Constant::Str(value)),
        ExprKind::Symbol(value) => Some(Constant::Symbol(value)),
        _ => None,
    }
}

/// Marker: control flow terminated while compiling the last statement or
/// expression; anything after it is unreachable.
#[derive(Debug, Clone, Copy)]
pub struct Unreachable;

/// Result of compiling an expression. `Ok(None)` means the expression has no
/// value (block expressions in statement context).
type ExprResult = Result<Option<InstId>, Unreachable>;

/// Result of compiling a statement.
type StmtResult = Result<(), Unreachable>;

/// A structural key for the per-block computed-value table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ComputedValue {
    Constant(Constant),
    /// A read of a constant module member (functions, imports).
    ModuleMember(ModuleMemberId),
    UnaryOp { op: UnaryOpKind, operand: InstId },
    BinaryOp { op: BinaryOpKind, left: InstId, right: InstId },
    AggregateMemberRead { aggregate: InstId, member: AggregateMember },
}

/// An entry of the construction-time region stack.
enum Region<'a> {
    /// An active loop with its jump targets.
    Loop { jump_break: BlockId, jump_continue: BlockId },
    /// A block scope with its deferred expressions (in registration order).
    /// `processed` counts how many tail entries the current exit cascade has
    /// already emitted: a non-local exit inside a deferred expression
    /// re-enters the protocol and continues with the remaining entries.
    Scope { deferred: Vec<&'a Expr>, processed: usize },
}

struct EnvContext {
    env: ClosureEnvId,
    starter: ScopeId,
}

struct FunctionIrGen<'a, 'm, 'ctx> {
    module: &'m mut ModuleIrGen<'a, 'ctx>,
    func: Function,
    outer_env: Option<ClosureEnvId>,
    /// Current SSA value of each source variable per block.
    variables: AHashMap<(SymbolId, BlockId), InstId>,
    /// Per-block value numbering table.
    values: AHashMap<(ComputedValue, BlockId), InstId>,
    /// Pending incomplete phis of unsealed blocks.
    incomplete_phis: AHashMap<BlockId, Vec<(SymbolId, InstId)>>,
    /// For every instruction used as a phi operand: the phis using it.
    /// Needed to rewrite users when a trivial phi is removed.
    phi_users: AHashMap<InstId, Vec<InstId>>,
    regions: Vec<Region<'a>>,
    /// Nesting depth of active exit cascades; the `processed` cursors reset
    /// when the outermost cascade unwinds.
    exit_depth: usize,
    env_stack: Vec<EnvContext>,
    /// Environments allocated in this function, keyed to the local that
    /// holds their runtime representation.
    env_locations: AHashMap<ClosureEnvId, InstId>,
}

impl<'a, 'm, 'ctx> FunctionIrGen<'a, 'm, 'ctx> {
    fn compile(module: &'m mut ModuleIrGen<'a, 'ctx>, job: &FunctionJob<'a>) -> Function {
        let decl = job.decl;
        let name = decl.name.unwrap_or_default();
        let kind = if job.outer_env.is_some() {
            FunctionKind::Closure
        } else {
            FunctionKind::Normal
        };
        let entry_label = module.strings.insert("entry");
        let exit_label = module.strings.insert("exit");
        let param_count = u32::try_from(decl.params.len()).expect("parameter count exceeds u32");
        let func = Function::new(name, kind, param_count, entry_label, exit_label);

        let mut gen = FunctionIrGen {
            module,
            func,
            outer_env: job.outer_env,
            variables: AHashMap::new(),
            values: AHashMap::new(),
            incomplete_phis: AHashMap::new(),
            phi_users: AHashMap::new(),
            regions: Vec::new(),
            exit_depth: 0,
            env_stack: Vec::new(),
            env_locations: AHashMap::new(),
        };
        gen.compile_body(decl);
        gen.func
    }

    fn compile_body(&mut self, decl: &'a FuncDecl) {
        let entry = self.func.entry;
        self.seal(entry);
        let mut bb = entry;

        // Parameters: define reads, then spill captured ones into the
        // function's closure environment (created by enter_env below).
        let func_scope = self
            .module
            .table
            .find_scope(decl.id)
            .expect("function declaration opens a scope");
        self.enter_env(func_scope, &mut bb);

        for (index, param) in decl.params.iter().enumerate() {
            let Some(symbol_id) = self.module.table.find_decl(SymbolKey::node(param.id)) else {
                continue;
            };
            let value = self.define_new_named(
                RValue::Read(LValue::Param(u32::try_from(index).expect("param index"))),
                Some(param.name),
                bb,
            );
            self.compile_symbol_assign(symbol_id, value, bb);
        }

        let result = self.compile_expr(&decl.body, &mut bb);
        if let Ok(value) = result {
            let value = match value {
                Some(value) => value,
                None => self.compile_rvalue(RValue::Constant(Constant::Null), bb),
            };
            self.end(Terminator::Return { value, target: self.func.exit }, bb);
        }

        self.exit_env(func_scope);

        let exit = self.func.exit;
        self.seal(exit);
        self.end_exit_block(exit);

        debug_assert!(self.incomplete_phis.is_empty(), "unresolved incomplete phis remain");
    }

    fn end_exit_block(&mut self, exit: BlockId) {
        let block = self.func.block_mut(exit);
        debug_assert!(matches!(block.terminator, Terminator::None));
        block.terminator = Terminator::Exit;
        block.filled = true;
    }

    // --- shared context accessors ---

    fn strings(&mut self) -> &mut StringTable {
        &mut *self.module.strings
    }

    fn span_text(&self, span: Span) -> &'a str {
        span.text(self.module.source)
    }

    // --- emitting ---

    fn emit(&mut self, stmt: IrStmt, block: BlockId) {
        let block_data = self.func.block_mut(block);
        debug_assert!(!block_data.filled, "cannot emit into a filled block");
        block_data.stmts.push(stmt);
    }

    fn define_new(&mut self, value: RValue, block: BlockId) -> InstId {
        self.define_new_named(value, None, block)
    }

    fn define_new_named(&mut self, value: RValue, name: Option<InternedString>, block: BlockId) -> InstId {
        let inst = self.func.push_inst(Inst { name, value });
        self.emit(IrStmt::Define(inst), block);
        inst
    }

    /// Returns the memoized local for `key` or computes and records it.
    fn memoize_value(&mut self, key: ComputedValue, block: BlockId, compute: impl FnOnce(&mut Self) -> InstId) -> InstId {
        if let Some(&inst) = self.values.get(&(key, block)) {
            return inst;
        }
        let inst = compute(self);
        self.values.insert((key, block), inst);
        inst
    }

    /// Compiles an rvalue, memoizing structural expressions so repeated
    /// subexpressions share a local within a block.
    fn compile_rvalue(&mut self, value: RValue, block: BlockId) -> InstId {
        let key = match value {
            RValue::Constant(constant) => Some(ComputedValue::Constant(constant)),
            RValue::Read(LValue::Module(member)) => {
                // Only constant members (functions, imports) are safe to
                // reuse; module variables are mutable.
                match self.module.members[member.index()].kind {
                    ModuleMemberKind::Import { .. }
                    | ModuleMemberKind::Function { .. }
                    | ModuleMemberKind::RecordTemplate { .. } => Some(ComputedValue::ModuleMember(member)),
                    ModuleMemberKind::Variable { .. } => None,
                }
            }
            RValue::UnaryOp { op, operand } => Some(ComputedValue::UnaryOp { op, operand }),
            RValue::BinaryOp { op, left, right } => Some(ComputedValue::BinaryOp { op, left, right }),
            RValue::GetAggregateMember { aggregate, member } => {
                Some(ComputedValue::AggregateMemberRead { aggregate, member })
            }
            _ => None,
        };
        match key {
            Some(key) => self.memoize_value(key, block, |gen| gen.define_new(value, block)),
            None => self.define_new(value, block),
        }
    }

    // --- SSA machinery (Braun et al. 2013, Algorithm 2) ---

    fn write_variable(&mut self, var: SymbolId, block: BlockId, value: InstId) {
        self.variables.insert((var, block), value);
    }

    fn read_variable(&mut self, var: SymbolId, block: BlockId) -> InstId {
        if let Some(&value) = self.variables.get(&(var, block)) {
            return value;
        }
        self.read_variable_recursive(var, block)
    }

    fn read_variable_recursive(&mut self, var: SymbolId, block: BlockId) -> InstId {
        let value;
        if !self.func.block(block).sealed {
            // Incomplete CFG: insert a placeholder phi, resolved on seal.
            let name = self.symbol_name(var);
            let inst = self.func.push_inst(Inst {
                name,
                value: RValue::Phi0,
            });
            self.insert_phi_define(inst, block);
            self.incomplete_phis.entry(block).or_default().push((var, inst));
            value = inst;
        } else if self.func.block(block).predecessors.len() == 1 {
            let pred = self.func.block(block).predecessors[0];
            value = self.read_variable(var, pred);
        } else if self.func.block(block).predecessors.is_empty() {
            // Reached the entry block without a definition. Resolution
            // guarantees activation order, so this is a compiler bug path;
            // produce an error value to keep going.
            self.undefined_variable(var);
            value = self.define_new(RValue::Error, block);
        } else {
            // Break potential cycles with an operandless phi, then fill in
            // the operands from all predecessors.
            let name = self.symbol_name(var);
            let phi_id = self.func.push_phi(Phi::default());
            let inst = self.func.push_inst(Inst {
                name,
                value: RValue::Phi(phi_id),
            });
            self.insert_phi_define(inst, block);
            self.write_variable(var, block, inst);
            value = self.add_phi_operands(var, inst, block);
        }
        self.write_variable(var, block, value);
        value
    }

    fn add_phi_operands(&mut self, var: SymbolId, phi_inst: InstId, block: BlockId) -> InstId {
        let preds = self.func.block(block).predecessors.clone();
        let phi_id = match self.func.inst(phi_inst).value {
            RValue::Phi(phi_id) => phi_id,
            _ => unreachable!("add_phi_operands called on a non-phi"),
        };
        for pred in preds {
            let operand = self.read_variable(var, pred);
            self.func.phi_mut(phi_id).operands.push(operand);
            self.phi_users.entry(operand).or_default().push(phi_inst);
        }
        self.try_remove_trivial_phi(phi_inst, phi_id)
    }

    /// Detects phis whose operands (ignoring self references) are all the
    /// same value; such phis are replaced by that value and their users are
    /// re-examined.
    fn try_remove_trivial_phi(&mut self, phi_inst: InstId, phi_id: PhiId) -> InstId {
        let mut same: Option<InstId> = None;
        for index in 0..self.func.phi(phi_id).operands.len() {
            let operand = self.func.resolve_alias(self.func.phi(phi_id).operands[index]);
            if operand == phi_inst || Some(operand) == same {
                continue;
            }
            if same.is_some() {
                return phi_inst; // merges at least two values: not trivial
            }
            same = Some(operand);
        }

        // A phi without non-self operands is unreachable or undefined.
        let same = match same {
            Some(same) => same,
            None => {
                let error = self.func.push_inst(Inst {
                    name: None,
                    value: RValue::Error,
                });
                error
            }
        };

        let users = self.phi_users.remove(&phi_inst).unwrap_or_default();
        self.func.inst_mut(phi_inst).value = RValue::Alias(same);
        self.phi_users.entry(same).or_default().extend(users.iter().copied().filter(|&u| u != phi_inst));

        // Users that were phis may have become trivial themselves.
        for user in users {
            if user == phi_inst {
                continue;
            }
            if let RValue::Phi(user_phi) = self.func.inst(user).value {
                self.try_remove_trivial_phi(user, user_phi);
            }
        }
        same
    }

    /// Inserts a phi definition before the first non-phi statement.
    fn insert_phi_define(&mut self, inst: InstId, block: BlockId) {
        let position = self.func.block(block).phi_count(&self.func);
        self.func.block_mut(block).stmts.insert(position, IrStmt::Define(inst));
    }

    /// Seals a block: its predecessor set is final, so pending incomplete
    /// phis can be resolved.
    fn seal(&mut self, block: BlockId) {
        debug_assert!(!self.func.block(block).sealed, "block sealed twice");
        if let Some(pending) = self.incomplete_phis.remove(&block) {
            for (var, inst) in pending {
                let phi_id = self.func.push_phi(Phi::default());
                self.func.inst_mut(inst).value = RValue::Phi(phi_id);
                self.add_phi_operands(var, inst, block);
            }
        }
        self.func.block_mut(block).sealed = true;
    }

    /// Ends a block with a terminator and links it as a predecessor of the
    /// terminator's successors.
    fn end(&mut self, terminator: Terminator, block: BlockId) {
        debug_assert!(
            !self.func.block(block).filled,
            "cannot terminate an already filled block"
        );
        let successors = terminator.successors();
        {
            let block_data = self.func.block_mut(block);
            block_data.terminator = terminator;
            block_data.filled = true;
        }
        for successor in successors {
            debug_assert!(
                !self.func.block(successor).sealed,
                "cannot add predecessors to a sealed block"
            );
            self.func.block_mut(successor).predecessors.push(block);
        }
    }

    fn make_block(&mut self, label: &str) -> BlockId {
        let label = self.strings().insert(label);
        self.func.make_block(label)
    }

    fn symbol_name(&self, var: SymbolId) -> Option<InternedString> {
        Some(self.module.table.symbol(var).name)
    }

    fn undefined_variable(&mut self, var: SymbolId) {
        let name = self.module.table.symbol(var).name;
        let name = self.module.strings.get(name).to_owned();
        self.module
            .diag
            .error(Span::at(0), format!("variable '{name}' may be used before it is defined"));
    }

    // --- regions ---

    fn push_loop_region(&mut self, jump_break: BlockId, jump_continue: BlockId) -> usize {
        self.regions.push(Region::Loop {
            jump_break,
            jump_continue,
        });
        self.regions.len() - 1
    }

    fn push_scope_region(&mut self) -> usize {
        self.regions.push(Region::Scope {
            deferred: Vec::new(),
            processed: 0,
        });
        self.regions.len() - 1
    }

    fn pop_region(&mut self, index: usize) {
        debug_assert_eq!(self.regions.len(), index + 1, "unbalanced region stack");
        self.regions.pop();
    }

    fn defer_expr(&mut self, expr: &'a Expr) {
        for region in self.regions.iter_mut().rev() {
            if let Region::Scope { deferred, .. } = region {
                deferred.push(expr);
                return;
            }
        }
        debug_assert!(false, "defer outside of any scope region");
    }

    /// Index of the innermost loop region, if any.
    fn current_loop(&self) -> Option<usize> {
        self.regions
            .iter()
            .rposition(|region| matches!(region, Region::Loop { .. }))
    }

    /// Emits the deferred expressions of all scope regions with index >=
    /// `until`, innermost first, each scope's list in reverse insertion
    /// order. A deferred expression may itself contain non-local control
    /// flow (break, continue, return); that re-enters this protocol, which
    /// continues with the *remaining* entries — every deferred expression is
    /// emitted at most once per exit cascade. The cursors reset when the
    /// outermost cascade finishes, so sibling control-flow paths see a fresh
    /// state.
    fn compile_exit_regions(&mut self, until: usize, bb: &mut BlockId) -> StmtResult {
        self.exit_depth += 1;
        let result = self.compile_exit_regions_inner(until, bb);
        self.exit_depth -= 1;
        if self.exit_depth == 0 {
            for region in &mut self.regions {
                if let Region::Scope { processed, .. } = region {
                    *processed = 0;
                }
            }
        }
        result
    }

    fn compile_exit_regions_inner(&mut self, until: usize, bb: &mut BlockId) -> StmtResult {
        let mut index = self.regions.len();
        while index > until {
            index -= 1;
            if matches!(self.regions[index], Region::Loop { .. }) {
                continue;
            }
            loop {
                let next = {
                    let Region::Scope { deferred, processed } = &mut self.regions[index] else {
                        unreachable!("loop regions are skipped above")
                    };
                    if *processed >= deferred.len() {
                        break;
                    }
                    *processed += 1;
                    deferred[deferred.len() - *processed]
                };
                self.compile_expr(next, bb).map(|_| ())?;
            }
        }
        Ok(())
    }

    /// Seals and terminates a block that turned out to be unreachable.
    fn abandon_block(&mut self, block: BlockId) {
        if !self.func.block(block).sealed {
            self.seal(block);
        }
        if !self.func.block(block).filled {
            self.end(Terminator::Never, block);
        }
    }

    // --- closure environments ---

    fn current_env(&self) -> Option<ClosureEnvId> {
        self.env_stack.last().map(|ctx| ctx.env).or(self.outer_env)
    }

    /// Collects the captured symbols declared in `scope` and its non-loop,
    /// non-function descendants; allocates one environment for them.
    fn enter_env(&mut self, scope: ScopeId, bb: &mut BlockId) {
        let mut captured: Vec<SymbolId> = Vec::new();
        let mut stack = vec![scope];
        while let Some(current) = stack.pop() {
            let data = self.module.table.scope(current);
            for &entry in &data.entries {
                if self.module.table.symbol(entry).captured {
                    captured.push(entry);
                }
            }
            for &child in &data.children {
                let child_data = self.module.table.scope(child);
                if child_data.kind == ScopeKind::Function || child_data.is_loop_scope {
                    continue;
                }
                stack.push(child);
            }
        }
        if captured.is_empty() {
            return;
        }

        let parent = self.current_env();
        let size = u32::try_from(captured.len()).expect("environment size exceeds u32");
        let env = self.module.envs.push(parent, size);
        for (index, symbol) in captured.into_iter().enumerate() {
            self.module.envs.locations.insert(
                symbol,
                ClosureEnvLocation {
                    env,
                    index: u32::try_from(index).expect("slot index exceeds u32"),
                },
            );
        }

        let parent_inst = match parent {
            Some(parent_env) => self.compile_env(parent_env, *bb),
            None => self.compile_rvalue(RValue::Constant(Constant::Null), *bb),
        };
        let env_inst = self.define_new(RValue::MakeEnvironment { parent: parent_inst, size }, *bb);
        self.env_stack.push(EnvContext { env, starter: scope });
        self.env_locations.insert(env, env_inst);
    }

    fn exit_env(&mut self, scope: ScopeId) {
        if let Some(top) = self.env_stack.last() {
            if top.starter == scope {
                let env = top.env;
                self.env_stack.pop();
                self.env_locations.remove(&env);
            }
        }
    }

    /// The runtime representation of `env`: a local of this function for
    /// environments created here, otherwise a walk starting at the outer
    /// environment.
    fn compile_env(&mut self, env: ClosureEnvId, block: BlockId) -> InstId {
        if let Some(&inst) = self.env_locations.get(&env) {
            return inst;
        }
        debug_assert!(self.outer_env.is_some(), "environment is not reachable");
        self.define_new(RValue::OuterEnvironment, block)
    }

    /// The lvalue for a captured symbol's environment slot.
    fn captured_lvalue(&mut self, location: ClosureEnvLocation, block: BlockId) -> LValue {
        if let Some(&env_inst) = self.env_locations.get(&location.env) {
            return LValue::Closure {
                env: env_inst,
                levels: 0,
                index: location.index,
            };
        }

        // The environment belongs to an enclosing function: count parent
        // links starting from this function's outer environment.
        let mut levels = 0;
        let mut current = self.outer_env;
        while let Some(env) = current {
            if env == location.env {
                let outer = self.define_new(RValue::OuterEnvironment, block);
                return LValue::Closure {
                    env: outer,
                    levels,
                    index: location.index,
                };
            }
            levels += 1;
            current = self.module.envs.parent(env);
        }
        unreachable!("captured symbol's environment is not on the parent chain");
    }

    /// Where a symbol lives if it is not an SSA local: a module member or a
    /// closure slot.
    fn find_lvalue(&mut self, symbol: SymbolId, block: BlockId) -> Option<LValue> {
        if let Some(&member) = self.module.member_of_symbol.get(&symbol) {
            return Some(LValue::Module(member));
        }
        if let Some(location) = self.module.envs.location(symbol) {
            return Some(self.captured_lvalue(location, block));
        }
        None
    }

    /// Compiles a read of `symbol` in `block`.
    fn compile_reference(&mut self, symbol: SymbolId, block: BlockId) -> InstId {
        match self.find_lvalue(symbol, block) {
            Some(lvalue) => self.compile_rvalue(RValue::Read(lvalue), block),
            None => self.read_variable(symbol, block),
        }
    }

    /// Compiles an assignment of `value` to `symbol` in `block`.
    fn compile_symbol_assign(&mut self, symbol: SymbolId, value: InstId, block: BlockId) {
        match self.find_lvalue(symbol, block) {
            Some(lvalue) => self.emit(IrStmt::Assign { target: lvalue, value }, block),
            None => {
                if self.func.inst(value).name.is_none() {
                    self.func.inst_mut(value).name = self.symbol_name(symbol);
                }
                self.write_variable(symbol, block, value);
            }
        }
    }
}
