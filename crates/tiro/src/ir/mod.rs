//! The SSA intermediate representation.
//!
//! A [`Function`] owns four arenas — basic blocks, instructions, phi operand
//! lists and argument lists — and all cross references are ids into those
//! arenas. Blocks go through the lifecycle `open → sealed → filled`: sealing
//! fixes the predecessor set (a precondition for resolving pending phis),
//! filling happens when the terminator is set.

pub mod dce;
pub mod gen;
pub mod liveness;

use smallvec::SmallVec;

use crate::strings::InternedString;

macro_rules! ir_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            #[inline]
            #[must_use]
            pub fn new(index: usize) -> Self {
                Self(u32::try_from(index).expect("ir arena exceeds u32 range"))
            }

            #[inline]
            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

ir_id!(
    /// Id of a basic block within a function.
    BlockId
);
ir_id!(
    /// Id of an SSA instruction (a "local") within a function.
    InstId
);
ir_id!(
    /// Id of a phi node within a function.
    PhiId
);
ir_id!(
    /// Id of an argument list within a function.
    ListId
);
ir_id!(
    /// Id of a module-level member (constant, import, variable, function).
    ModuleMemberId
);
ir_id!(
    /// Id of a function within a module.
    ModuleFunctionId
);

/// A float constant with value-based equality and hashing, so floats can be
/// used as value-numbering and deduplication keys. NaNs compare equal to
/// themselves (bit equality).
#[derive(Debug, Clone, Copy)]
pub struct FloatValue(pub f64);

impl PartialEq for FloatValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for FloatValue {}

impl std::hash::Hash for FloatValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

/// A compile-time constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constant {
    Null,
    Bool(bool),
    Int(i64),
    Float(FloatValue),
    Str(InternedString),
    Symbol(InternedString),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum UnaryOpKind {
    Plus,
    Minus,
    BitwiseNot,
    LogicalNot,
}

/// Binary operators that survive into the IR. Short-circuiting operators
/// (`&&`, `||`, `??`) are lowered to control flow during construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum BinaryOpKind {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
    Power,
    LeftShift,
    RightShift,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    Equals,
    NotEquals,
}

/// An assignable (or readable) storage location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LValue {
    /// The n-th function parameter.
    Param(u32),
    /// A slot of a closure environment. `levels` parent links are walked
    /// starting from `env` before indexing.
    Closure { env: InstId, levels: u32, index: u32 },
    /// A module-level member.
    Module(ModuleMemberId),
    /// An object property, addressed by symbol name.
    Field { object: InstId, name: InternedString },
    /// A numeric tuple element.
    TupleField { object: InstId, index: u32 },
    /// An `object[index]` element.
    Index { object: InstId, index: InstId },
}

impl LValue {
    /// Whether reading or writing this lvalue can raise at runtime (missing
    /// member, out-of-bounds index). Such accesses are never optimized out.
    #[must_use]
    pub fn has_side_effects(self) -> bool {
        match self {
            Self::Param(_) | Self::Closure { .. } | Self::Module(_) => false,
            Self::Field { .. } | Self::TupleField { .. } | Self::Index { .. } => true,
        }
    }
}

/// Aggregate values: compound results that exist only inside the IR and are
/// consumed member-wise (they never materialize at runtime as a whole).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregate {
    /// A bound method bundle: receiver instance plus looked-up method.
    /// Splitting the lookup from the call lets liveness model the bundle's
    /// lifetime across the argument evaluation.
    Method { instance: InstId, function: InternedString },
}

/// A member of an [`Aggregate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateMember {
    MethodInstance,
    MethodFunction,
}

/// Kinds of container literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ContainerKind {
    Array,
    Tuple,
    Set,
    /// Argument list alternates keys and values.
    Map,
}

/// The value computed by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RValue {
    /// Reads the given lvalue.
    Read(LValue),
    /// A copy of another local (introduced by trivial-phi elimination).
    Alias(InstId),
    /// A phi function; operands live in the phi arena.
    Phi(PhiId),
    /// An incomplete phi in an unsealed block. None remain after
    /// construction.
    Phi0,
    Constant(Constant),
    /// The closure environment the current function was instantiated with.
    OuterEnvironment,
    UnaryOp { op: UnaryOpKind, operand: InstId },
    BinaryOp { op: BinaryOpKind, left: InstId, right: InstId },
    Call { func: InstId, args: ListId },
    Aggregate(Aggregate),
    GetAggregateMember { aggregate: InstId, member: AggregateMember },
    /// Calls the method bundle produced by an `Aggregate::Method`.
    MethodCall { method: InstId, args: ListId },
    /// Allocates a closure environment with `size` slots. `parent` is the
    /// enclosing environment (or a null constant).
    MakeEnvironment { parent: InstId, size: u32 },
    /// Pairs a function template (read from a module member) with an
    /// environment.
    MakeClosure { env: InstId, func: InstId },
    Container { kind: ContainerKind, args: ListId },
    /// Builds a record from a module-level record template; `args` holds the
    /// field values in template key order.
    Record { template: ModuleMemberId, args: ListId },
    /// String interpolation: formats and joins all arguments.
    Format { args: ListId },
    /// Produced for error subtrees so construction can continue.
    Error,
}

impl RValue {
    /// True iff evaluating this rvalue may have observable side effects
    /// (exceptions included), making it ineligible for dead-code elimination.
    #[must_use]
    pub fn has_side_effects(self, func: &Function) -> bool {
        match self {
            Self::Read(lvalue) => lvalue.has_side_effects(),
            Self::Alias(_)
            | Self::Phi(_)
            | Self::Phi0
            | Self::Constant(_)
            | Self::OuterEnvironment
            | Self::MakeEnvironment { .. }
            | Self::MakeClosure { .. }
            | Self::Container { .. }
            | Self::Record { .. }
            | Self::Format { .. }
            | Self::Error => false,
            // Conservative: arithmetic on non-constant operands may raise
            // (type mismatch, overflow, division by zero).
            Self::UnaryOp { operand, .. } => {
                !matches!(func.inst(operand).value, Self::Constant(_))
            }
            Self::BinaryOp { left, right, .. } => {
                !matches!(func.inst(left).value, Self::Constant(_))
                    || !matches!(func.inst(right).value, Self::Constant(_))
            }
            Self::Call { .. } | Self::MethodCall { .. } => true,
            // Might throw if the method does not exist.
            Self::Aggregate(Aggregate::Method { .. }) => true,
            Self::GetAggregateMember { .. } => false,
        }
    }
}

/// An SSA instruction: a value definition, optionally carrying the source
/// variable name it originated from (for diagnostics and dumps).
#[derive(Debug, Clone, Copy)]
pub struct Inst {
    pub name: Option<InternedString>,
    pub value: RValue,
}

/// Phi operands, ordered like the owning block's predecessors.
#[derive(Debug, Clone, Default)]
pub struct Phi {
    pub operands: SmallVec<[InstId; 2]>,
}

/// A statement inside a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrStmt {
    /// Defines the instruction's value.
    Define(InstId),
    /// Writes `value` through the lvalue.
    Assign { target: LValue, value: InstId },
}

/// The final instruction of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// Only valid during construction.
    None,
    Jump(BlockId),
    Branch { value: InstId, then_: BlockId, else_: BlockId },
    /// Returns `value`; control flows to the function's exit block.
    Return { value: InstId, target: BlockId },
    /// Terminator of the exit block.
    Exit,
    /// Aborts the coroutine with the rendered expression and message.
    AssertFail { expr: InstId, message: InstId },
    /// Statically unreachable.
    Never,
}

impl Terminator {
    /// Successor blocks, in branch order.
    #[must_use]
    pub fn successors(&self) -> SmallVec<[BlockId; 2]> {
        match *self {
            Self::None | Self::Exit | Self::AssertFail { .. } | Self::Never => SmallVec::new(),
            Self::Jump(target) | Self::Return { target, .. } => {
                let mut out = SmallVec::new();
                out.push(target);
                out
            }
            Self::Branch { then_, else_, .. } => {
                let mut out = SmallVec::new();
                out.push(then_);
                out.push(else_);
                out
            }
        }
    }
}

/// A basic block.
#[derive(Debug)]
pub struct Block {
    pub label: InternedString,
    pub stmts: Vec<IrStmt>,
    pub terminator: Terminator,
    pub predecessors: Vec<BlockId>,
    /// Sealed blocks accept no further predecessors; only then can pending
    /// phis be resolved.
    pub sealed: bool,
    /// Filled blocks have their terminator set and accept no further
    /// statements.
    pub filled: bool,
}

impl Block {
    fn new(label: InternedString) -> Self {
        Self {
            label,
            stmts: Vec::new(),
            terminator: Terminator::None,
            predecessors: Vec::new(),
            sealed: false,
            filled: false,
        }
    }

    /// Number of leading phi-region definitions. Trivial-phi elimination
    /// rewrites head phis into aliases in place, so aliases count as part of
    /// the region to keep the remaining phis grouped.
    #[must_use]
    pub fn phi_count(&self, func: &Function) -> usize {
        self.stmts
            .iter()
            .take_while(|stmt| match stmt {
                IrStmt::Define(inst) => {
                    matches!(
                        func.inst(*inst).value,
                        RValue::Phi(_) | RValue::Phi0 | RValue::Alias(_)
                    )
                }
                IrStmt::Assign { .. } => false,
            })
            .count()
    }
}

/// Whether a function is a plain function or a closure (receives an outer
/// environment when instantiated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum FunctionKind {
    Normal,
    Closure,
}

/// An IR function under construction or analysis.
#[derive(Debug)]
pub struct Function {
    pub name: InternedString,
    pub kind: FunctionKind,
    pub param_count: u32,
    blocks: Vec<Block>,
    insts: Vec<Inst>,
    phis: Vec<Phi>,
    lists: Vec<Vec<InstId>>,
    pub entry: BlockId,
    pub exit: BlockId,
}

impl Function {
    #[must_use]
    pub fn new(name: InternedString, kind: FunctionKind, param_count: u32, entry_label: InternedString, exit_label: InternedString) -> Self {
        let mut func = Self {
            name,
            kind,
            param_count,
            blocks: Vec::new(),
            insts: Vec::new(),
            phis: Vec::new(),
            lists: Vec::new(),
            entry: BlockId::new(0),
            exit: BlockId::new(0),
        };
        func.entry = func.make_block(entry_label);
        func.exit = func.make_block(exit_label);
        func
    }

    pub fn make_block(&mut self, label: InternedString) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(Block::new(label));
        id
    }

    pub fn push_inst(&mut self, inst: Inst) -> InstId {
        let id = InstId::new(self.insts.len());
        self.insts.push(inst);
        id
    }

    pub fn push_phi(&mut self, phi: Phi) -> PhiId {
        let id = PhiId::new(self.phis.len());
        self.phis.push(phi);
        id
    }

    pub fn push_list(&mut self, list: Vec<InstId>) -> ListId {
        let id = ListId::new(self.lists.len());
        self.lists.push(list);
        id
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    #[must_use]
    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id.index()]
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Inst {
        &mut self.insts[id.index()]
    }

    #[must_use]
    pub fn phi(&self, id: PhiId) -> &Phi {
        &self.phis[id.index()]
    }

    pub fn phi_mut(&mut self, id: PhiId) -> &mut Phi {
        &mut self.phis[id.index()]
    }

    #[must_use]
    pub fn list(&self, id: ListId) -> &[InstId] {
        &self.lists[id.index()]
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len()).map(BlockId::new)
    }

    pub fn inst_ids(&self) -> impl Iterator<Item = InstId> {
        (0..self.insts.len()).map(InstId::new)
    }

    /// Resolves aliases introduced by trivial-phi elimination.
    #[must_use]
    pub fn resolve_alias(&self, mut id: InstId) -> InstId {
        while let RValue::Alias(target) = self.inst(id).value {
            id = target;
        }
        id
    }

    /// Blocks in preorder, starting at the entry block. Unreachable blocks
    /// are not visited.
    #[must_use]
    pub fn preorder(&self) -> Vec<BlockId> {
        let mut order = Vec::with_capacity(self.blocks.len());
        let mut visited = vec![false; self.blocks.len()];
        let mut stack = vec![self.entry];
        while let Some(block_id) = stack.pop() {
            if std::mem::replace(&mut visited[block_id.index()], true) {
                continue;
            }
            order.push(block_id);
            let successors = self.block(block_id).terminator.successors();
            for succ in successors.into_iter().rev() {
                if !visited[succ.index()] {
                    stack.push(succ);
                }
            }
        }
        order
    }
}

/// Invokes `cb` for every instruction operand of `rvalue` (not transitively).
pub fn visit_rvalue_operands(func: &Function, rvalue: &RValue, cb: &mut dyn FnMut(InstId)) {
    match *rvalue {
        RValue::Read(lvalue) => visit_lvalue_operands(&lvalue, cb),
        RValue::Alias(target) => cb(target),
        RValue::Phi(phi) => {
            for &operand in &func.phi(phi).operands {
                cb(operand);
            }
        }
        RValue::Phi0 | RValue::Constant(_) | RValue::OuterEnvironment | RValue::Error => {}
        RValue::UnaryOp { operand, .. } => cb(operand),
        RValue::BinaryOp { left, right, .. } => {
            cb(left);
            cb(right);
        }
        RValue::Call { func: callee, args } => {
            cb(callee);
            for &arg in func.list(args) {
                cb(arg);
            }
        }
        RValue::Aggregate(Aggregate::Method { instance, .. }) => cb(instance),
        RValue::GetAggregateMember { aggregate, .. } => cb(aggregate),
        RValue::MethodCall { method, args } => {
            cb(method);
            for &arg in func.list(args) {
                cb(arg);
            }
        }
        RValue::MakeEnvironment { parent, .. } => cb(parent),
        RValue::MakeClosure { env, func: template } => {
            cb(env);
            cb(template);
        }
        RValue::Container { args, .. } | RValue::Record { args, .. } | RValue::Format { args } => {
            for &arg in func.list(args) {
                cb(arg);
            }
        }
    }
}

/// Invokes `cb` for every instruction operand of an lvalue.
pub fn visit_lvalue_operands(lvalue: &LValue, cb: &mut dyn FnMut(InstId)) {
    match *lvalue {
        LValue::Param(_) | LValue::Module(_) => {}
        LValue::Closure { env, .. } => cb(env),
        LValue::Field { object, .. } | LValue::TupleField { object, .. } => cb(object),
        LValue::Index { object, index } => {
            cb(object);
            cb(index);
        }
    }
}

/// Invokes `cb` for every instruction operand of a statement (the defined
/// instruction's operands for defines; target + value for assigns).
pub fn visit_stmt_operands(func: &Function, stmt: &IrStmt, cb: &mut dyn FnMut(InstId)) {
    match stmt {
        IrStmt::Define(inst) => visit_rvalue_operands(func, &func.inst(*inst).value, cb),
        IrStmt::Assign { target, value } => {
            visit_lvalue_operands(target, cb);
            cb(*value);
        }
    }
}

/// Invokes `cb` for every instruction operand of a terminator.
pub fn visit_terminator_operands(term: &Terminator, cb: &mut dyn FnMut(InstId)) {
    match *term {
        Terminator::None | Terminator::Jump(_) | Terminator::Exit | Terminator::Never => {}
        Terminator::Branch { value, .. } => cb(value),
        Terminator::Return { value, .. } => cb(value),
        Terminator::AssertFail { expr, message } => {
            cb(expr);
            cb(message);
        }
    }
}

/// The IR of a whole module: ordered members plus the functions they
/// reference.
#[derive(Debug)]
pub struct ModuleIr {
    pub name: InternedString,
    pub members: Vec<ModuleMember>,
    pub functions: Vec<Function>,
}

impl ModuleIr {
    #[must_use]
    pub fn member(&self, id: ModuleMemberId) -> &ModuleMember {
        &self.members[id.index()]
    }

    #[must_use]
    pub fn function(&self, id: ModuleFunctionId) -> &Function {
        &self.functions[id.index()]
    }

    pub fn member_ids(&self) -> impl Iterator<Item = ModuleMemberId> {
        (0..self.members.len()).map(ModuleMemberId::new)
    }
}

#[derive(Debug)]
pub struct ModuleMember {
    pub name: InternedString,
    pub kind: ModuleMemberKind,
    pub exported: bool,
}

#[derive(Debug)]
pub enum ModuleMemberKind {
    Import { path: InternedString },
    Variable { initial: Option<Constant> },
    Function { id: ModuleFunctionId },
    RecordTemplate { keys: Vec<InternedString> },
}
