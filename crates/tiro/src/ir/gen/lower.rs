//! Lowering of expressions and statements into the SSA IR.
//!
//! Evaluation order is strictly left to right everywhere. Short-circuiting
//! operators and optional accesses lower to explicit control flow; `defer`
//! registers expressions with the current scope region, and `break` /
//! `continue` / `return` run the scope-exit protocol before jumping.

use smallvec::SmallVec;

use super::{ExprResult, FunctionIrGen, Region, StmtResult, Unreachable};
use crate::{
    ast::{
        AccessType, BinaryOp, Binding, BindingKind, Block as AstBlock, Expr, ExprKind, ForStmt, FuncDecl, Stmt,
        StringItem, UnaryOp, VarDecl, WhileStmt,
    },
    ir::{
        Aggregate, BinaryOpKind, BlockId, Constant, FloatValue, Inst, InstId, IrStmt, LValue, Phi, RValue, Terminator,
        UnaryOpKind,
    },
    semantics::SymbolKey,
};

fn unary_op(op: UnaryOp) -> UnaryOpKind {
    match op {
        UnaryOp::Plus => UnaryOpKind::Plus,
        UnaryOp::Minus => UnaryOpKind::Minus,
        UnaryOp::BitwiseNot => UnaryOpKind::BitwiseNot,
        UnaryOp::LogicalNot => UnaryOpKind::LogicalNot,
    }
}

fn binary_op(op: BinaryOp) -> BinaryOpKind {
    match op {
        BinaryOp::Add => BinaryOpKind::Add,
        BinaryOp::Subtract => BinaryOpKind::Subtract,
        BinaryOp::Multiply => BinaryOpKind::Multiply,
        BinaryOp::Divide => BinaryOpKind::Divide,
        BinaryOp::Modulus => BinaryOpKind::Modulus,
        BinaryOp::Power => BinaryOpKind::Power,
        BinaryOp::LeftShift => BinaryOpKind::LeftShift,
        BinaryOp::RightShift => BinaryOpKind::RightShift,
        BinaryOp::BitwiseAnd => BinaryOpKind::BitwiseAnd,
        BinaryOp::BitwiseOr => BinaryOpKind::BitwiseOr,
        BinaryOp::BitwiseXor => BinaryOpKind::BitwiseXor,
        BinaryOp::Less => BinaryOpKind::Less,
        BinaryOp::LessEquals => BinaryOpKind::LessEquals,
        BinaryOp::Greater => BinaryOpKind::Greater,
        BinaryOp::GreaterEquals => BinaryOpKind::GreaterEquals,
        BinaryOp::Equals => BinaryOpKind::Equals,
        BinaryOp::NotEquals => BinaryOpKind::NotEquals,
        BinaryOp::LogicalAnd | BinaryOp::LogicalOr | BinaryOp::NullCoalesce => {
            unreachable!("short-circuiting operators lower to control flow")
        }
    }
}

impl<'a> FunctionIrGen<'a, '_, '_> {
    /// Compiles an expression; `Ok(None)` means the expression produced no
    /// value (valueless block or loop in statement position).
    pub(super) fn compile_expr(&mut self, expr: &'a Expr, bb: &mut BlockId) -> ExprResult {
        if expr.has_error {
            return Ok(Some(self.define_new(RValue::Error, *bb)));
        }
        match &expr.kind {
            ExprKind::Null => Ok(Some(self.compile_rvalue(RValue::Constant(Constant::Null), *bb))),
            ExprKind::Bool(value) => Ok(Some(self.compile_rvalue(RValue::Constant(Constant::Bool(*value)), *bb))),
            ExprKind::Int(value) => Ok(Some(self.compile_rvalue(RValue::Constant(Constant::Int(*value)), *bb))),
            ExprKind::Float(value) => Ok(Some(
                self.compile_rvalue(RValue::Constant(Constant::Float(FloatValue(*value))), *bb),
            )),
            ExprKind::Str(value) => Ok(Some(self.compile_rvalue(RValue::Constant(Constant::Str(*value)), *bb))),
            ExprKind::Symbol(value) => {
                Ok(Some(self.compile_rvalue(RValue::Constant(Constant::Symbol(*value)), *bb)))
            }
            ExprKind::Var(_) => {
                let Some(symbol) = self.module.table.find_ref(expr.id) else {
                    return Ok(Some(self.define_new(RValue::Error, *bb)));
                };
                Ok(Some(self.compile_reference(symbol, *bb)))
            }
            ExprKind::Block(block) => self.compile_block(block, bb),
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => self.compile_if(cond, then_branch, else_branch.as_deref(), bb),
            ExprKind::Unary { op, operand } => {
                let operand = self.compile_expr_value(operand, bb)?;
                Ok(Some(self.compile_rvalue(
                    RValue::UnaryOp {
                        op: unary_op(*op),
                        operand,
                    },
                    *bb,
                )))
            }
            ExprKind::Binary { op, left, right } => match op {
                BinaryOp::LogicalAnd | BinaryOp::LogicalOr | BinaryOp::NullCoalesce => {
                    self.compile_short_circuit(*op, left, right, bb)
                }
                _ => {
                    let left = self.compile_expr_value(left, bb)?;
                    let right = self.compile_expr_value(right, bb)?;
                    Ok(Some(self.compile_rvalue(
                        RValue::BinaryOp {
                            op: binary_op(*op),
                            left,
                            right,
                        },
                        *bb,
                    )))
                }
            },
            ExprKind::Assign { op, target, value } => self.compile_assign(*op, target, value, bb),
            ExprKind::StringFormat { items } => {
                let mut args = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        StringItem::Chunk { value, .. } => {
                            args.push(self.compile_rvalue(RValue::Constant(Constant::Str(*value)), *bb));
                        }
                        StringItem::Expr(expr) => args.push(self.compile_expr_value(expr, bb)?),
                    }
                }
                let args = self.func.push_list(args);
                Ok(Some(self.define_new(RValue::Format { args }, *bb)))
            }
            ExprKind::StringGroup { group } => {
                let mut args = Vec::with_capacity(group.len());
                for part in group {
                    args.push(self.compile_expr_value(part, bb)?);
                }
                let args = self.func.push_list(args);
                Ok(Some(self.define_new(RValue::Format { args }, *bb)))
            }
            ExprKind::Func(decl) => Ok(Some(self.compile_func_value(decl, *bb))),
            ExprKind::Call { access, func, args } => self.compile_call(*access, func, args, bb),
            ExprKind::Field { access, object, name } => {
                let object_value = self.compile_expr_value(object, bb)?;
                let name = *name;
                self.compile_access(*access, object_value, bb, move |gen, bb| {
                    Ok(gen.define_new(
                        RValue::Read(LValue::Field {
                            object: object_value,
                            name,
                        }),
                        *bb,
                    ))
                })
            }
            ExprKind::TupleField { access, object, index } => {
                let object_value = self.compile_expr_value(object, bb)?;
                let index = *index;
                self.compile_access(*access, object_value, bb, move |gen, bb| {
                    Ok(gen.define_new(
                        RValue::Read(LValue::TupleField {
                            object: object_value,
                            index,
                        }),
                        *bb,
                    ))
                })
            }
            ExprKind::Index { access, object, index } => {
                let object_value = self.compile_expr_value(object, bb)?;
                let index_value = self.compile_expr_value(index, bb)?;
                self.compile_access(*access, object_value, bb, move |gen, bb| {
                    Ok(gen.define_new(
                        RValue::Read(LValue::Index {
                            object: object_value,
                            index: index_value,
                        }),
                        *bb,
                    ))
                })
            }
            ExprKind::Array(items) => self.compile_container(crate::ir::ContainerKind::Array, items, bb),
            ExprKind::Tuple(items) => self.compile_container(crate::ir::ContainerKind::Tuple, items, bb),
            ExprKind::Set(items) => self.compile_container(crate::ir::ContainerKind::Set, items, bb),
            ExprKind::Map(pairs) => {
                let mut args = Vec::with_capacity(pairs.len() * 2);
                for (key, value) in pairs {
                    args.push(self.compile_expr_value(key, bb)?);
                    args.push(self.compile_expr_value(value, bb)?);
                }
                let args = self.func.push_list(args);
                Ok(Some(self.define_new(
                    RValue::Container {
                        kind: crate::ir::ContainerKind::Map,
                        args,
                    },
                    *bb,
                )))
            }
            ExprKind::Record(fields) => {
                let keys: Vec<_> = fields.iter().map(|f| f.name).collect();
                let template = self.module.record_template(&keys);
                // Values evaluate in source order, but the argument list
                // follows the template's key order (templates are shared
                // between literals with permuted keys).
                let mut values = Vec::with_capacity(fields.len());
                for field in fields {
                    values.push((field.name, self.compile_expr_value(&field.value, bb)?));
                }
                let template_keys = match &self.module.members[template.index()].kind {
                    crate::ir::ModuleMemberKind::RecordTemplate { keys } => keys.clone(),
                    _ => unreachable!("record template member has template kind"),
                };
                let args: Vec<InstId> = template_keys
                    .iter()
                    .map(|key| {
                        values
                            .iter()
                            .find(|(name, _)| name == key)
                            .expect("record field exists for every template key")
                            .1
                    })
                    .collect();
                let args = self.func.push_list(args);
                Ok(Some(self.define_new(RValue::Record { template, args }, *bb)))
            }
            ExprKind::Break => {
                let target = self.current_loop().expect("structure check admits break only in loops");
                self.compile_exit_regions(target + 1, bb)?;
                let Region::Loop { jump_break, .. } = self.regions[target] else {
                    unreachable!("current_loop returned a non-loop region")
                };
                self.end(Terminator::Jump(jump_break), *bb);
                Err(Unreachable)
            }
            ExprKind::Continue => {
                let target = self.current_loop().expect("structure check admits continue only in loops");
                self.compile_exit_regions(target + 1, bb)?;
                let Region::Loop { jump_continue, .. } = self.regions[target] else {
                    unreachable!("current_loop returned a non-loop region")
                };
                self.end(Terminator::Jump(jump_continue), *bb);
                Err(Unreachable)
            }
            ExprKind::Return { value } => {
                let value = match value {
                    Some(value) => self.compile_expr_value(value, bb)?,
                    None => self.compile_rvalue(RValue::Constant(Constant::Null), *bb),
                };
                self.compile_exit_regions(0, bb)?;
                self.end(
                    Terminator::Return {
                        value,
                        target: self.func.exit,
                    },
                    *bb,
                );
                Err(Unreachable)
            }
            ExprKind::Assert { cond, message } => self.compile_assert(cond, message.as_deref(), bb),
            ExprKind::Error => Ok(Some(self.define_new(RValue::Error, *bb))),
        }
    }

    /// Like [`Self::compile_expr`], but converts "no value" into null.
    pub(super) fn compile_expr_value(&mut self, expr: &'a Expr, bb: &mut BlockId) -> Result<InstId, Unreachable> {
        match self.compile_expr(expr, bb)? {
            Some(value) => Ok(value),
            None => Ok(self.compile_rvalue(RValue::Constant(Constant::Null), *bb)),
        }
    }

    // --- blocks & statements ---

    fn compile_block(&mut self, block: &'a AstBlock, bb: &mut BlockId) -> ExprResult {
        let region = self.push_scope_region();
        let result = self.compile_block_stmts(block, bb);
        let result = match result {
            Ok(value) => self.compile_exit_regions(region, bb).map(|()| value),
            Err(unreachable) => Err(unreachable),
        };
        self.pop_region(region);
        result
    }

    fn compile_block_stmts(&mut self, block: &'a AstBlock, bb: &mut BlockId) -> ExprResult {
        let mut value = None;
        let count = block.stmts.len();
        for (index, stmt) in block.stmts.iter().enumerate() {
            let last = index + 1 == count;
            let result = if last {
                if let Stmt::Expr(expr_stmt) = stmt {
                    match self.compile_expr(&expr_stmt.expr, bb) {
                        Ok(v) => {
                            value = v;
                            Ok(())
                        }
                        Err(unreachable) => Err(unreachable),
                    }
                } else {
                    self.compile_stmt(stmt, bb)
                }
            } else {
                self.compile_stmt(stmt, bb)
            };
            if let Err(unreachable) = result {
                if !last {
                    self.module
                        .diag
                        .error(block.stmts[index + 1].span(), "unreachable statement");
                }
                return Err(unreachable);
            }
        }
        Ok(value)
    }

    fn compile_stmt(&mut self, stmt: &'a Stmt, bb: &mut BlockId) -> StmtResult {
        match stmt {
            Stmt::Empty(_) => Ok(()),
            Stmt::Var(decl) => self.compile_var_decl(decl, bb),
            Stmt::Func(decl) => {
                if decl.has_error {
                    return Ok(());
                }
                let value = self.compile_func_value(decl, *bb);
                if let Some(symbol) = self.module.table.find_decl(SymbolKey::node(decl.id)) {
                    self.compile_symbol_assign(symbol, value, *bb);
                }
                Ok(())
            }
            Stmt::Defer(defer) => {
                self.defer_expr(&defer.expr);
                Ok(())
            }
            Stmt::While(stmt) => self.compile_while(stmt, bb),
            Stmt::For(stmt) => self.compile_for(stmt, bb),
            Stmt::Expr(stmt) => self.compile_expr(&stmt.expr, bb).map(|_| ()),
        }
    }

    fn compile_var_decl(&mut self, decl: &'a VarDecl, bb: &mut BlockId) -> StmtResult {
        if decl.has_error {
            return Ok(());
        }
        for binding in &decl.bindings {
            self.compile_binding(binding, bb)?;
        }
        Ok(())
    }

    fn compile_binding(&mut self, binding: &'a Binding, bb: &mut BlockId) -> StmtResult {
        if binding.has_error {
            return Ok(());
        }
        let value = match &binding.init {
            Some(init) => self.compile_expr_value(init, bb)?,
            None => self.compile_rvalue(RValue::Constant(Constant::Null), *bb),
        };
        match &binding.kind {
            BindingKind::Name(_) => {
                if let Some(symbol) = self.module.table.find_decl(SymbolKey::node(binding.id)) {
                    self.compile_symbol_assign(symbol, value, *bb);
                }
            }
            BindingKind::Tuple(names) => {
                // All components read their element out of the tuple value.
                for index in 0..names.len() {
                    let element = self.define_new(
                        RValue::Read(LValue::TupleField {
                            object: value,
                            index: u32::try_from(index).expect("tuple index"),
                        }),
                        *bb,
                    );
                    let key = SymbolKey::element(binding.id, u32::try_from(index).expect("tuple index"));
                    if let Some(symbol) = self.module.table.find_decl(key) {
                        self.compile_symbol_assign(symbol, element, *bb);
                    }
                }
            }
        }
        Ok(())
    }

    // --- control flow ---

    fn compile_if(
        &mut self,
        cond: &'a Expr,
        then_branch: &'a Expr,
        else_branch: Option<&'a Expr>,
        bb: &mut BlockId,
    ) -> ExprResult {
        let cond_value = self.compile_expr_value(cond, bb)?;

        let Some(else_branch) = else_branch else {
            let then_block = self.make_block("if.then");
            let end_block = self.make_block("if.end");
            self.end(
                Terminator::Branch {
                    value: cond_value,
                    then_: then_block,
                    else_: end_block,
                },
                *bb,
            );
            self.seal(then_block);
            let mut then_bb = then_block;
            if self.compile_expr(then_branch, &mut then_bb).is_ok() {
                self.end(Terminator::Jump(end_block), then_bb);
            }
            self.seal(end_block);
            *bb = end_block;
            return Ok(None);
        };

        let then_block = self.make_block("if.then");
        let else_block = self.make_block("if.else");
        let end_block = self.make_block("if.end");
        self.end(
            Terminator::Branch {
                value: cond_value,
                then_: then_block,
                else_: else_block,
            },
            *bb,
        );
        self.seal(then_block);
        self.seal(else_block);

        let mut then_bb = then_block;
        let then_result = self.compile_expr(then_branch, &mut then_bb);
        if then_result.is_ok() {
            self.end(Terminator::Jump(end_block), then_bb);
        }
        let mut else_bb = else_block;
        let else_result = self.compile_expr(else_branch, &mut else_bb);
        if else_result.is_ok() {
            self.end(Terminator::Jump(end_block), else_bb);
        }

        self.seal(end_block);
        match (then_result, else_result) {
            (Err(_), Err(_)) => {
                // Both branches diverted control; the join is unreachable.
                self.end(Terminator::Never, end_block);
                Err(Unreachable)
            }
            (Ok(then_value), Err(_)) => {
                *bb = end_block;
                Ok(then_value)
            }
            (Err(_), Ok(else_value)) => {
                *bb = end_block;
                Ok(else_value)
            }
            (Ok(then_value), Ok(else_value)) => {
                *bb = end_block;
                match (then_value, else_value) {
                    (Some(then_value), Some(else_value)) => {
                        Ok(Some(self.make_join_phi(&[then_value, else_value], end_block)))
                    }
                    _ => Ok(None),
                }
            }
        }
    }

    fn compile_short_circuit(&mut self, op: BinaryOp, left: &'a Expr, right: &'a Expr, bb: &mut BlockId) -> ExprResult {
        let lhs = self.compile_expr_value(left, bb)?;
        let rhs_block = self.make_block("shortcircuit.rhs");
        let end_block = self.make_block("shortcircuit.end");

        // The branch registers `bb` as the first predecessor of the end
        // block, so the phi's first operand is the short-circuited lhs.
        match op {
            BinaryOp::LogicalAnd => self.end(
                Terminator::Branch {
                    value: lhs,
                    then_: rhs_block,
                    else_: end_block,
                },
                *bb,
            ),
            BinaryOp::LogicalOr => self.end(
                Terminator::Branch {
                    value: lhs,
                    then_: end_block,
                    else_: rhs_block,
                },
                *bb,
            ),
            BinaryOp::NullCoalesce => {
                let null_value = self.compile_rvalue(RValue::Constant(Constant::Null), *bb);
                let is_null = self.compile_rvalue(
                    RValue::BinaryOp {
                        op: BinaryOpKind::Equals,
                        left: lhs,
                        right: null_value,
                    },
                    *bb,
                );
                self.end(
                    Terminator::Branch {
                        value: is_null,
                        then_: rhs_block,
                        else_: end_block,
                    },
                    *bb,
                );
            }
            _ => unreachable!("not a short-circuiting operator"),
        }

        self.seal(rhs_block);
        let mut rhs_bb = rhs_block;
        match self.compile_expr_value(right, &mut rhs_bb) {
            Ok(rhs) => {
                self.end(Terminator::Jump(end_block), rhs_bb);
                self.seal(end_block);
                let value = self.make_join_phi(&[lhs, rhs], end_block);
                *bb = end_block;
                Ok(Some(value))
            }
            Err(_) => {
                // The rhs never falls through; only the short-circuit edge
                // reaches the join.
                self.seal(end_block);
                *bb = end_block;
                Ok(Some(lhs))
            }
        }
    }

    /// Wraps an access in a null check when the access type is optional: a
    /// null receiver short-circuits to null without performing the access.
    fn compile_access(
        &mut self,
        access: AccessType,
        object: InstId,
        bb: &mut BlockId,
        body: impl FnOnce(&mut Self, &mut BlockId) -> Result<InstId, Unreachable>,
    ) -> ExprResult {
        match access {
            AccessType::Normal => Ok(Some(body(self, bb)?)),
            AccessType::Optional => {
                let null_value = self.compile_rvalue(RValue::Constant(Constant::Null), *bb);
                let is_null = self.compile_rvalue(
                    RValue::BinaryOp {
                        op: BinaryOpKind::Equals,
                        left: object,
                        right: null_value,
                    },
                    *bb,
                );
                let access_block = self.make_block("optional.access");
                let end_block = self.make_block("optional.end");
                self.end(
                    Terminator::Branch {
                        value: is_null,
                        then_: end_block,
                        else_: access_block,
                    },
                    *bb,
                );
                self.seal(access_block);
                let mut access_bb = access_block;
                match body(self, &mut access_bb) {
                    Ok(value) => {
                        self.end(Terminator::Jump(end_block), access_bb);
                        self.seal(end_block);
                        let result = self.make_join_phi(&[null_value, value], end_block);
                        *bb = end_block;
                        Ok(Some(result))
                    }
                    Err(_) => {
                        self.seal(end_block);
                        *bb = end_block;
                        Ok(Some(null_value))
                    }
                }
            }
        }
    }

    fn make_join_phi(&mut self, operands: &[InstId], block: BlockId) -> InstId {
        debug_assert_eq!(
            operands.len(),
            self.func.block(block).predecessors.len(),
            "phi operands must match predecessors"
        );
        let phi_id = self.func.push_phi(Phi {
            operands: SmallVec::from_slice(operands),
        });
        let inst = self.func.push_inst(Inst {
            name: None,
            value: RValue::Phi(phi_id),
        });
        self.insert_phi_define(inst, block);
        for &operand in operands {
            self.phi_users.entry(operand).or_default().push(inst);
        }
        inst
    }

    fn compile_while(&mut self, stmt: &'a WhileStmt, bb: &mut BlockId) -> StmtResult {
        let cond_block = self.make_block("while.cond");
        let body_block = self.make_block("while.body");
        let end_block = self.make_block("while.end");
        self.end(Terminator::Jump(cond_block), *bb);

        // The condition block stays unsealed until the back edge is linked.
        let mut cond_bb = cond_block;
        let cond_value = match self.compile_expr_value(&stmt.cond, &mut cond_bb) {
            Ok(value) => value,
            Err(unreachable) => {
                // The condition diverted control; the loop never runs.
                self.seal(cond_block);
                self.abandon_block(body_block);
                self.abandon_block(end_block);
                return Err(unreachable);
            }
        };
        self.end(
            Terminator::Branch {
                value: cond_value,
                then_: body_block,
                else_: end_block,
            },
            cond_bb,
        );

        self.seal(body_block);
        let mut body_bb = body_block;
        let body_result = self.compile_loop_body(&stmt.body, end_block, cond_block, &mut body_bb);
        if body_result.is_ok() {
            self.end(Terminator::Jump(cond_block), body_bb);
        }

        self.seal(cond_block);
        self.seal(end_block);
        *bb = end_block;
        Ok(())
    }

    fn compile_for(&mut self, stmt: &'a ForStmt, bb: &mut BlockId) -> StmtResult {
        if let Some(decl) = &stmt.decl {
            self.compile_var_decl(decl, bb)?;
        }

        let cond_block = stmt.cond.as_ref().map(|_| self.make_block("for.cond"));
        let body_block = self.make_block("for.body");
        let step_block = stmt.step.as_ref().map(|_| self.make_block("for.step"));
        let end_block = self.make_block("for.end");

        let loop_entry = cond_block.unwrap_or(body_block);
        self.end(Terminator::Jump(loop_entry), *bb);

        if let (Some(cond), Some(cond_block_id)) = (&stmt.cond, cond_block) {
            let mut cond_bb = cond_block_id;
            let cond_value = match self.compile_expr_value(cond, &mut cond_bb) {
                Ok(value) => value,
                Err(unreachable) => {
                    self.seal(cond_block_id);
                    self.abandon_block(body_block);
                    if let Some(step_block_id) = step_block {
                        self.abandon_block(step_block_id);
                    }
                    self.abandon_block(end_block);
                    return Err(unreachable);
                }
            };
            self.end(
                Terminator::Branch {
                    value: cond_value,
                    then_: body_block,
                    else_: end_block,
                },
                cond_bb,
            );
            // With a condition, the body's only predecessor is known now.
            self.seal(body_block);
        }

        let continue_target = step_block.or(cond_block).unwrap_or(body_block);
        let mut body_bb = body_block;
        let body_result = self.compile_loop_body(&stmt.body, end_block, continue_target, &mut body_bb);
        if body_result.is_ok() {
            self.end(Terminator::Jump(continue_target), body_bb);
        }

        if let (Some(step), Some(step_block_id)) = (&stmt.step, step_block) {
            self.seal(step_block_id);
            if self.func.block(step_block_id).predecessors.is_empty() {
                // Neither the body end nor any `continue` reaches the step.
                self.abandon_block(step_block_id);
            } else {
                let mut step_bb = step_block_id;
                if self.compile_expr(step, &mut step_bb).is_ok() {
                    self.end(Terminator::Jump(cond_block.unwrap_or(body_block)), step_bb);
                }
            }
        }

        match cond_block {
            Some(cond_block_id) => self.seal(cond_block_id),
            None => self.seal(body_block),
        }
        self.seal(end_block);
        *bb = end_block;
        Ok(())
    }

    /// Compiles a loop body with its loop region and per-iteration closure
    /// environment in place.
    fn compile_loop_body(
        &mut self,
        body: &'a Expr,
        jump_break: BlockId,
        jump_continue: BlockId,
        bb: &mut BlockId,
    ) -> StmtResult {
        let region = self.push_loop_region(jump_break, jump_continue);
        let scope = self
            .module
            .table
            .find_scope(body.id)
            .expect("loop body opens a scope");
        self.enter_env(scope, bb);
        let result = self.compile_expr(body, bb).map(|_| ());
        self.exit_env(scope);
        self.pop_region(region);
        result
    }

    // --- assignment ---

    fn compile_assign(
        &mut self,
        op: Option<BinaryOp>,
        target: &'a Expr,
        value: &'a Expr,
        bb: &mut BlockId,
    ) -> ExprResult {
        match &target.kind {
            ExprKind::Var(_) => {
                let Some(symbol) = self.module.table.find_ref(target.id) else {
                    return Ok(Some(self.define_new(RValue::Error, *bb)));
                };
                let result = match op {
                    Some(op) => {
                        let current = self.compile_reference(symbol, *bb);
                        let rhs = self.compile_expr_value(value, bb)?;
                        self.compile_rvalue(
                            RValue::BinaryOp {
                                op: binary_op(op),
                                left: current,
                                right: rhs,
                            },
                            *bb,
                        )
                    }
                    None => self.compile_expr_value(value, bb)?,
                };
                self.compile_symbol_assign(symbol, result, *bb);
                Ok(Some(result))
            }
            ExprKind::Field { object, name, .. } => {
                let object_value = self.compile_expr_value(object, bb)?;
                let lvalue = LValue::Field {
                    object: object_value,
                    name: *name,
                };
                self.compile_lvalue_assign(op, lvalue, value, bb)
            }
            ExprKind::TupleField { object, index, .. } => {
                let object_value = self.compile_expr_value(object, bb)?;
                let lvalue = LValue::TupleField {
                    object: object_value,
                    index: *index,
                };
                self.compile_lvalue_assign(op, lvalue, value, bb)
            }
            ExprKind::Index { object, index, .. } => {
                let object_value = self.compile_expr_value(object, bb)?;
                let index_value = self.compile_expr_value(index, bb)?;
                let lvalue = LValue::Index {
                    object: object_value,
                    index: index_value,
                };
                self.compile_lvalue_assign(op, lvalue, value, bb)
            }
            ExprKind::Tuple(items) => {
                // Plain tuple assignment `(a, b) = rhs`: evaluate the rhs
                // once, then store its elements left to right.
                let rhs = self.compile_expr_value(value, bb)?;
                for (index, item) in items.iter().enumerate() {
                    let element = self.define_new(
                        RValue::Read(LValue::TupleField {
                            object: rhs,
                            index: u32::try_from(index).expect("tuple index"),
                        }),
                        *bb,
                    );
                    self.compile_target_store(item, element, bb)?;
                }
                Ok(Some(rhs))
            }
            _ => Ok(Some(self.define_new(RValue::Error, *bb))),
        }
    }

    fn compile_lvalue_assign(
        &mut self,
        op: Option<BinaryOp>,
        lvalue: LValue,
        value: &'a Expr,
        bb: &mut BlockId,
    ) -> ExprResult {
        let result = match op {
            Some(op) => {
                let current = self.define_new(RValue::Read(lvalue), *bb);
                let rhs = self.compile_expr_value(value, bb)?;
                self.compile_rvalue(
                    RValue::BinaryOp {
                        op: binary_op(op),
                        left: current,
                        right: rhs,
                    },
                    *bb,
                )
            }
            None => self.compile_expr_value(value, bb)?,
        };
        self.emit(IrStmt::Assign { target: lvalue, value: result }, *bb);
        Ok(Some(result))
    }

    /// Stores `value` into an assignment target (used by tuple targets).
    fn compile_target_store(&mut self, target: &'a Expr, value: InstId, bb: &mut BlockId) -> StmtResult {
        match &target.kind {
            ExprKind::Var(_) => {
                if let Some(symbol) = self.module.table.find_ref(target.id) {
                    self.compile_symbol_assign(symbol, value, *bb);
                }
                Ok(())
            }
            ExprKind::Field { object, name, .. } => {
                let object_value = self.compile_expr_value(object, bb)?;
                self.emit(
                    IrStmt::Assign {
                        target: LValue::Field {
                            object: object_value,
                            name: *name,
                        },
                        value,
                    },
                    *bb,
                );
                Ok(())
            }
            ExprKind::TupleField { object, index, .. } => {
                let object_value = self.compile_expr_value(object, bb)?;
                self.emit(
                    IrStmt::Assign {
                        target: LValue::TupleField {
                            object: object_value,
                            index: *index,
                        },
                        value,
                    },
                    *bb,
                );
                Ok(())
            }
            ExprKind::Index { object, index, .. } => {
                let object_value = self.compile_expr_value(object, bb)?;
                let index_value = self.compile_expr_value(index, bb)?;
                self.emit(
                    IrStmt::Assign {
                        target: LValue::Index {
                            object: object_value,
                            index: index_value,
                        },
                        value,
                    },
                    *bb,
                );
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // --- functions, calls ---

    /// The value of a function expression or nested declaration: a closure
    /// when an environment is active, otherwise the module member itself.
    fn compile_func_value(&mut self, decl: &'a FuncDecl, block: BlockId) -> InstId {
        let outer_env = self.current_env();
        let member = self.module.add_function_job(decl, outer_env);
        let template = self.compile_rvalue(RValue::Read(LValue::Module(member)), block);
        match outer_env {
            Some(env) => {
                let env_inst = self.compile_env(env, block);
                self.define_new(RValue::MakeClosure { env: env_inst, func: template }, block)
            }
            None => template,
        }
    }

    fn compile_call(&mut self, access: AccessType, callee: &'a Expr, args: &'a [Expr], bb: &mut BlockId) -> ExprResult {
        // Calls on a member access dispatch as method calls, keeping the
        // receiver bound.
        if let ExprKind::Field {
            access: field_access,
            object,
            name,
        } = &callee.kind
        {
            let object_value = self.compile_expr_value(object, bb)?;
            let effective = if *field_access == AccessType::Optional || access == AccessType::Optional {
                AccessType::Optional
            } else {
                AccessType::Normal
            };
            let name = *name;
            return self.compile_access(effective, object_value, bb, move |gen, bb| {
                let bundle = gen.define_new(
                    RValue::Aggregate(Aggregate::Method {
                        instance: object_value,
                        function: name,
                    }),
                    *bb,
                );
                // The method member keeps the bundle alive across the
                // argument evaluation.
                let method = gen.compile_rvalue(
                    RValue::GetAggregateMember {
                        aggregate: bundle,
                        member: crate::ir::AggregateMember::MethodFunction,
                    },
                    *bb,
                );
                let args = gen.compile_args(args, bb)?;
                Ok(gen.define_new(RValue::MethodCall { method, args }, *bb))
            });
        }

        let callee_value = self.compile_expr_value(callee, bb)?;
        self.compile_access(access, callee_value, bb, move |gen, bb| {
            let args = gen.compile_args(args, bb)?;
            Ok(gen.define_new(
                RValue::Call {
                    func: callee_value,
                    args,
                },
                *bb,
            ))
        })
    }

    fn compile_args(&mut self, args: &'a [Expr], bb: &mut BlockId) -> Result<crate::ir::ListId, Unreachable> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.compile_expr_value(arg, bb)?);
        }
        Ok(self.func.push_list(values))
    }

    fn compile_container(
        &mut self,
        kind: crate::ir::ContainerKind,
        items: &'a [Expr],
        bb: &mut BlockId,
    ) -> ExprResult {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            values.push(self.compile_expr_value(item, bb)?);
        }
        let args = self.func.push_list(values);
        Ok(Some(self.define_new(RValue::Container { kind, args }, *bb)))
    }

    fn compile_assert(&mut self, cond: &'a Expr, message: Option<&'a Expr>, bb: &mut BlockId) -> ExprResult {
        let cond_value = self.compile_expr_value(cond, bb)?;
        let ok_block = self.make_block("assert.ok");
        let fail_block = self.make_block("assert.fail");
        self.end(
            Terminator::Branch {
                value: cond_value,
                then_: ok_block,
                else_: fail_block,
            },
            *bb,
        );
        self.seal(ok_block);
        self.seal(fail_block);

        // The failure path renders the asserted expression's source text and
        // evaluates the message lazily.
        let expr_text = self.span_text(cond.span).to_owned();
        let expr_id = self.strings().insert(&expr_text);
        let mut fail_bb = fail_block;
        let expr_value = self.compile_rvalue(RValue::Constant(Constant::Str(expr_id)), fail_bb);
        let message_value = match message {
            Some(message) => self.compile_expr_value(message, &mut fail_bb),
            None => Ok(self.compile_rvalue(RValue::Constant(Constant::Null), fail_bb)),
        };
        if let Ok(message_value) = message_value {
            self.end(
                Terminator::AssertFail {
                    expr: expr_value,
                    message: message_value,
                },
                fail_bb,
            );
        }

        *bb = ok_block;
        Ok(None)
    }
}
