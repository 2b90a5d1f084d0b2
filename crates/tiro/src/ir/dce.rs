//! Dead-code elimination: removal of unused instruction definitions.
//!
//! Side-effecting operations (calls, throwing member accesses, writes) are
//! observable and act as roots, together with all terminator operands.
//! Everything transitively reachable from a root stays; the remaining
//! `Define` statements are dropped.

use crate::ir::{visit_rvalue_operands, visit_stmt_operands, visit_terminator_operands, Function, InstId, IrStmt};

/// Removes `Define` statements whose instruction is not transitively used by
/// any observable operation. Running the pass twice yields the same IR as
/// running it once.
pub fn remove_unused_insts(func: &mut Function) {
    let mut used = vec![false; func.inst_count()];
    let mut stack: Vec<InstId> = Vec::new();

    {
        let mut mark = |inst: InstId| {
            if !used[inst.index()] {
                used[inst.index()] = true;
                stack.push(inst);
            }
        };

        // Find all instructions that must not be eliminated.
        for block_id in func.preorder() {
            let block = func.block(block_id);
            for stmt in &block.stmts {
                match stmt {
                    // Assignments are side effects; everything they touch
                    // must be preserved.
                    IrStmt::Assign { .. } => visit_stmt_operands(func, stmt, &mut mark),
                    IrStmt::Define(inst) => {
                        if func.inst(*inst).value.has_side_effects(func) {
                            mark(*inst);
                        }
                    }
                }
            }
            visit_terminator_operands(&block.terminator, &mut mark);
        }
    }

    // Everything reachable through needed instructions is used as well.
    while let Some(inst) = stack.pop() {
        let value = func.inst(inst).value;
        visit_rvalue_operands(func, &value, &mut |operand| {
            if !used[operand.index()] {
                used[operand.index()] = true;
                stack.push(operand);
            }
        });
    }

    // Drop everything that was not marked.
    for block_id in func.block_ids() {
        let keep: Vec<IrStmt> = func
            .block(block_id)
            .stmts
            .iter()
            .filter(|stmt| match stmt {
                IrStmt::Define(inst) => used[inst.index()],
                IrStmt::Assign { .. } => true,
            })
            .copied()
            .collect();
        func.block_mut(block_id).stmts = keep;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        diagnostics::Diagnostics,
        ir::{gen::generate_module, ModuleIr, RValue},
        parser::parse_file,
        semantics::{check_structure, resolve_symbols},
        strings::StringTable,
    };

    fn compile(source: &str) -> ModuleIr {
        let mut strings = StringTable::new();
        let mut diag = Diagnostics::new();
        let mut file = parse_file(source, &mut strings, &mut diag);
        let table = resolve_symbols(&mut file, &mut strings, &mut diag);
        check_structure(&mut file, &table, &strings, &mut diag);
        assert!(!diag.has_errors(), "compilation failed:\n{}", diag.render(source));
        let name = strings.insert("test");
        generate_module(&file, name, source, &table, &mut strings, &mut diag)
    }

    fn stmt_counts(func: &crate::ir::Function) -> Vec<usize> {
        func.block_ids().map(|id| func.block(id).stmts.len()).collect()
    }

    #[test]
    fn unused_pure_values_are_removed() {
        let module = compile("export func f(a, b) { var unused = a + b; return a; }");
        let mut func = module.functions.into_iter().next().expect("one function");
        let before: usize = stmt_counts(&func).iter().sum();
        remove_unused_insts(&mut func);
        let after: usize = stmt_counts(&func).iter().sum();
        assert!(after < before, "the dead add must be removed");
        assert!(
            !func.block_ids().any(|b| {
                func.block(b).stmts.iter().any(|s| {
                    matches!(s, IrStmt::Define(i)
                        if matches!(func.inst(*i).value, RValue::BinaryOp { op: crate::ir::BinaryOpKind::Add, .. }))
                })
            }),
            "dead arithmetic survived"
        );
    }

    #[test]
    fn calls_are_never_removed() {
        let module = compile("export func f(g) { g(); return 1; }");
        let mut func = module.functions.into_iter().next().expect("one function");
        remove_unused_insts(&mut func);
        assert!(
            func.block_ids().any(|b| {
                func.block(b)
                    .stmts
                    .iter()
                    .any(|s| matches!(s, IrStmt::Define(i) if matches!(func.inst(*i).value, RValue::Call { .. })))
            }),
            "a call with a discarded result must survive"
        );
    }

    #[test]
    fn throwing_member_reads_are_kept() {
        // The field access may throw on a missing member, so it is
        // observable even though the value is unused.
        let module = compile("export func f(o) { o.field; return 1; }");
        let mut func = module.functions.into_iter().next().expect("one function");
        remove_unused_insts(&mut func);
        assert!(
            func.block_ids().any(|b| {
                func.block(b).stmts.iter().any(|s| {
                    matches!(s, IrStmt::Define(i)
                        if matches!(func.inst(*i).value, RValue::Read(crate::ir::LValue::Field { .. })))
                })
            }),
            "a possibly-throwing read must survive"
        );
    }

    #[test]
    fn operands_of_live_values_stay() {
        let module = compile("export func f(a) { var t = a + 1; return t * 2; }");
        let mut func = module.functions.into_iter().next().expect("one function");
        remove_unused_insts(&mut func);
        assert!(
            func.block_ids().any(|b| {
                func.block(b).stmts.iter().any(|s| {
                    matches!(s, IrStmt::Define(i)
                        if matches!(func.inst(*i).value, RValue::BinaryOp { op: crate::ir::BinaryOpKind::Add, .. }))
                })
            }),
            "transitive operands of the return value must stay"
        );
    }

    #[test]
    fn pass_is_idempotent() {
        let module = compile(
            r"
            export func f(a, b, g) {
                var unused = a + b;
                var kept = g(a);
                if kept {
                    return a;
                }
                return b;
            }
        ",
        );
        let mut func = module.functions.into_iter().next().expect("one function");
        remove_unused_insts(&mut func);
        let once = stmt_counts(&func);
        remove_unused_insts(&mut func);
        let twice = stmt_counts(&func);
        assert_eq!(once, twice, "running the pass twice must change nothing");
    }
}
