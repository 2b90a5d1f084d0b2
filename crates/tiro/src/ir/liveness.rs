//! Liveness analysis over the SSA IR.
//!
//! For every value the analysis computes its *live range*: the defining
//! block with the definition/last-use positions, plus a sorted list of
//! live-in intervals for every other block the value lives in. Positions are
//! statement indices within a block; the position one past the last
//! statement stands for "through the terminator".
//!
//! Phi operands do **not** make a value live-in at the phi's own block, but
//! they do make it live-out of the corresponding predecessor.

use ahash::AHashMap;

use crate::ir::{visit_stmt_operands, visit_terminator_operands, BlockId, Function, InstId, IrStmt, RValue};

/// A `[start, end]` interval of statement positions within one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveInterval {
    pub block: BlockId,
    pub start: u32,
    pub end: u32,
}

/// The complete live range of one SSA value.
#[derive(Debug, Clone)]
pub struct LiveRange {
    def: LiveInterval,
    /// Live-in intervals, sorted by block id. The start is always 0 (the
    /// value enters at the block head); only the end varies.
    live_in: Vec<(BlockId, u32)>,
}

impl LiveRange {
    fn new(def: LiveInterval) -> Self {
        Self {
            def,
            live_in: Vec::new(),
        }
    }

    /// The definition interval (block plus `[def_pos, last_use_in_def_block]`).
    #[must_use]
    pub fn definition(&self) -> LiveInterval {
        self.def
    }

    /// Extends the range to cover a use at `stmt` in `block`. Returns true
    /// when this created a new live-in interval for `block` (the signal to
    /// propagate liveness to the predecessors).
    fn extend(&mut self, block: BlockId, stmt: u32) -> bool {
        if block == self.def.block {
            self.def.end = self.def.end.max(stmt);
            return false;
        }
        match self.live_in.binary_search_by_key(&block, |&(b, _)| b) {
            Ok(position) => {
                let entry = &mut self.live_in[position];
                entry.1 = entry.1.max(stmt);
                false
            }
            Err(position) => {
                self.live_in.insert(position, (block, stmt));
                true
            }
        }
    }

    /// True when the value is live-in at `block`.
    #[must_use]
    pub fn live_in(&self, block: BlockId) -> bool {
        self.live_in.binary_search_by_key(&block, |&(b, _)| b).is_ok()
    }

    /// True when `stmt` is the last use of the value within `block`.
    #[must_use]
    pub fn last_use(&self, block: BlockId, stmt: u32) -> bool {
        if block == self.def.block {
            return self.def.end == stmt;
        }
        match self.live_in.binary_search_by_key(&block, |&(b, _)| b) {
            Ok(position) => self.live_in[position].1 == stmt,
            Err(_) => false,
        }
    }

    /// All live-in intervals, sorted by block.
    pub fn live_in_intervals(&self) -> impl Iterator<Item = LiveInterval> + '_ {
        self.live_in.iter().map(|&(block, end)| LiveInterval { block, start: 0, end })
    }
}

/// Liveness information for one function.
#[derive(Debug)]
pub struct Liveness {
    ranges: AHashMap<InstId, LiveRange>,
    work: Vec<BlockId>,
}

impl Liveness {
    /// Computes liveness for `func`.
    #[must_use]
    pub fn compute(func: &Function) -> Self {
        let mut liveness = Self {
            ranges: AHashMap::new(),
            work: Vec::new(),
        };
        liveness.run(func);
        liveness
    }

    /// The live range of `value`, normalized through aggregate member reads.
    #[must_use]
    pub fn live_range(&self, func: &Function, value: InstId) -> Option<&LiveRange> {
        self.ranges.get(&normalize(func, value))
    }

    #[must_use]
    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    fn run(&mut self, func: &Function) {
        // Define pass: record every definition with a zero-width interval.
        // Two passes keep the algorithm indifferent to block visit order.
        for block_id in func.preorder() {
            let block = func.block(block_id);
            for (position, stmt) in block.stmts.iter().enumerate() {
                if let IrStmt::Define(inst) = stmt {
                    self.insert_definition(func, *inst, block_id, position_u32(position));
                }
            }
        }

        // Use pass: extend ranges at every operand use, propagating live-in
        // information to the predecessors.
        for block_id in func.preorder() {
            let block = func.block(block_id);
            let stmt_count = block.stmts.len();
            let phi_count = block.phi_count(func);

            // Values used as phi operands must be live-out of the matching
            // predecessor; they do not become live-in here through the phi.
            // Aliases in the phi region (rewritten trivial phis) use their
            // source like any ordinary statement.
            for (position, stmt) in block.stmts[..phi_count].iter().enumerate() {
                let IrStmt::Define(inst) = stmt else { continue };
                match func.inst(*inst).value {
                    RValue::Phi(phi_id) => {
                        let phi = func.phi(phi_id);
                        debug_assert_eq!(
                            phi.operands.len(),
                            block.predecessors.len(),
                            "phi operand count must match predecessor count"
                        );
                        for (operand, &pred) in phi.operands.iter().zip(&block.predecessors) {
                            self.extend_live_out(func, *operand, pred);
                        }
                    }
                    RValue::Alias(_) => {
                        visit_stmt_operands(func, stmt, &mut |operand| {
                            self.extend_statement(func, operand, block_id, position_u32(position));
                        });
                    }
                    _ => {}
                }
            }

            for (position, stmt) in block.stmts.iter().enumerate().skip(phi_count) {
                visit_stmt_operands(func, stmt, &mut |operand| {
                    self.extend_statement(func, operand, block_id, position_u32(position));
                });
            }
            visit_terminator_operands(&block.terminator, &mut |operand| {
                self.extend_statement(func, operand, block_id, position_u32(stmt_count));
            });
        }
    }

    fn insert_definition(&mut self, func: &Function, inst: InstId, block: BlockId, start: u32) {
        // Aggregate member reads are co-located with their aggregate: the
        // aggregate's lifetime covers all member extractions.
        if is_aggregate_reference(func, inst) {
            return;
        }
        let previous = self.ranges.insert(
            inst,
            LiveRange::new(LiveInterval {
                block,
                start,
                end: start,
            }),
        );
        debug_assert!(previous.is_none(), "value {inst:?} defined twice");
    }

    fn extend_live_out(&mut self, func: &Function, value: InstId, pred: BlockId) {
        let end = position_u32(func.block(pred).stmts.len()) + 1; // past the terminator
        self.extend_statement(func, value, pred, end);
    }

    fn extend_statement(&mut self, func: &Function, value: InstId, block: BlockId, use_pos: u32) {
        debug_assert!(self.work.is_empty(), "worklist is drained between uses");
        let value = normalize(func, value);
        let range = self
            .ranges
            .get_mut(&value)
            .unwrap_or_else(|| panic!("no live range for {value:?}"));
        if range.extend(block, use_pos) {
            self.work.push(block);
        }

        // Propagate live-in information to all predecessors, stopping at the
        // defining block.
        while let Some(current) = self.work.pop() {
            let preds = func.block(current).predecessors.clone();
            for pred in preds {
                let end = position_u32(func.block(pred).stmts.len()) + 1;
                let range = self.ranges.get_mut(&value).expect("range exists during propagation");
                if range.extend(pred, end) {
                    self.work.push(pred);
                }
            }
        }
    }
}

fn position_u32(position: usize) -> u32 {
    u32::try_from(position).expect("statement position exceeds u32")
}

/// Member reads live as long as their parent aggregate.
fn normalize(func: &Function, value: InstId) -> InstId {
    match func.inst(value).value {
        RValue::GetAggregateMember { aggregate, .. } => aggregate,
        _ => value,
    }
}

fn is_aggregate_reference(func: &Function, value: InstId) -> bool {
    matches!(func.inst(value).value, RValue::GetAggregateMember { .. })
}

/// Convenience for tests and the bytecode generator: whether `value` is ever
/// live outside its defining block.
#[must_use]
pub fn escapes_block(liveness: &Liveness, func: &Function, value: InstId) -> bool {
    liveness
        .live_range(func, value)
        .is_some_and(|range| range.live_in_intervals().next().is_some())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        diagnostics::Diagnostics,
        ir::{gen::generate_module, ModuleIr},
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

    /// Every use must be covered by the definition interval or a live-in
    /// interval of its block, and `last_use >= def`.
    fn check_consistency(func: &Function, liveness: &Liveness) {
        for block_id in func.preorder() {
            let block = func.block(block_id);
            let phi_count = block.phi_count(func);
            for (position, stmt) in block.stmts.iter().enumerate().skip(phi_count) {
                visit_stmt_operands(func, stmt, &mut |operand| {
                    let range = liveness
                        .live_range(func, operand)
                        .unwrap_or_else(|| panic!("no range for used value {operand:?}"));
                    let position = u32::try_from(position).expect("position");
                    let def = range.definition();
                    if def.block == block_id {
                        assert!(def.end >= position, "definition interval misses a use");
                        assert!(def.end >= def.start, "last_use must not precede the definition");
                    } else {
                        assert!(range.live_in(block_id), "use outside any live interval");
                    }
                });
            }
        }
    }

    #[test]
    fn straight_line_values_do_not_escape_their_block() {
        let module = compile("export func add(a, b) { return a + b; }");
        let func = &module.functions[0];
        let liveness = Liveness::compute(func);
        check_consistency(func, &liveness);
        for inst in func.inst_ids() {
            if liveness.live_range(func, inst).is_some() {
                assert!(!escapes_block(&liveness, func, inst));
            }
        }
    }

    #[test]
    fn definition_interval_extends_to_last_use() {
        let module = compile("export func mix(a, b) { var t = a + b; return t * t; }");
        let func = &module.functions[0];
        let liveness = Liveness::compute(func);
        check_consistency(func, &liveness);

        // The add is used by the multiply later in the same block.
        let add = func
            .inst_ids()
            .find(|&id| matches!(func.inst(id).value, RValue::BinaryOp { op: crate::ir::BinaryOpKind::Add, .. }))
            .expect("add instruction");
        let range = liveness.live_range(func, add).expect("range for add");
        let def = range.definition();
        assert!(def.end > def.start, "the add must stay live until the multiply");
    }

    #[test]
    fn values_used_across_branches_are_live_in_at_both_arms() {
        let source = "export func fanout(c, x) { var t = x + 1; if c { return t; } else { return t + 1; } }";
        let module = compile(source);
        let func = &module.functions[0];
        let liveness = Liveness::compute(func);
        check_consistency(func, &liveness);

        let add_one = func
            .inst_ids()
            .find(|&id| func.inst(id).name.is_some() && liveness.live_range(func, id).is_some())
            .expect("named local");
        assert!(escapes_block(&liveness, func, add_one));
        let range = liveness.live_range(func, add_one).expect("range");
        assert!(range.live_in_intervals().count() >= 2, "t is live in both branch arms");
    }

    #[test]
    fn loop_carried_values_are_live_through_the_back_edge() {
        let source = r"
            export func count(n) {
                var i = 0;
                while i < n {
                    i += 1;
                }
                return i;
            }
        ";
        let module = compile(source);
        let func = &module.functions[0];
        let liveness = Liveness::compute(func);
        check_consistency(func, &liveness);

        // `n` is defined in the entry block and used by the loop condition on
        // every iteration, so it is live-in at the condition block and
        // live-out of the loop body.
        let n_param = func
            .inst_ids()
            .find(|&id| matches!(func.inst(id).value, RValue::Read(crate::ir::LValue::Param(0))))
            .expect("parameter read");
        let range = liveness.live_range(func, n_param).expect("range for n");
        assert!(range.live_in_intervals().count() >= 2, "n must be live through the loop");
    }

    #[test]
    fn phi_operands_are_live_out_of_predecessors_not_live_in_at_the_phi() {
        let source = "export func pick(c) { var x = 0; if c { x = 1; } else { x = 2; } return x; }";
        let module = compile(source);
        let func = &module.functions[0];
        let liveness = Liveness::compute(func);
        check_consistency(func, &liveness);

        // Find the join phi and its block.
        let (phi_inst, phi_id) = func
            .inst_ids()
            .find_map(|id| match func.inst(id).value {
                RValue::Phi(phi) => Some((id, phi)),
                _ => None,
            })
            .expect("join phi");
        let phi_block = func
            .preorder()
            .into_iter()
            .find(|&b| {
                func.block(b)
                    .stmts
                    .iter()
                    .any(|s| matches!(s, IrStmt::Define(i) if *i == phi_inst))
            })
            .expect("phi block");

        for (operand, &pred) in func.phi(phi_id).operands.iter().zip(&func.block(phi_block).predecessors) {
            let range = liveness.live_range(func, *operand).expect("operand range");
            // Live-out of the predecessor: the interval end is past the
            // terminator position.
            let pred_end = u32::try_from(func.block(pred).stmts.len()).expect("len") + 1;
            let live_out = if range.definition().block == pred {
                range.definition().end == pred_end
            } else {
                range.live_in_intervals().any(|i| i.block == pred && i.end == pred_end)
            };
            assert!(live_out, "phi operand must be live-out of its predecessor");
            // The phi itself does not make its operand live-in at the join.
            // (The operand may still be live-in for unrelated uses, but not
            // in this function.)
            assert!(!range.live_in(phi_block));
        }
    }

    #[test]
    fn method_bundle_lifetime_covers_argument_evaluation() {
        let source = "export func call(h, a, b) { return h.combine(a + 1, b + 2); }";
        let module = compile(source);
        let func = &module.functions[0];
        let liveness = Liveness::compute(func);
        check_consistency(func, &liveness);

        let bundle = func
            .inst_ids()
            .find(|&id| matches!(func.inst(id).value, RValue::Aggregate(_)))
            .expect("method bundle");
        // Member reads share the bundle's range.
        for inst in func.inst_ids() {
            if let RValue::GetAggregateMember { aggregate, .. } = func.inst(inst).value {
                assert_eq!(aggregate, bundle);
                assert!(liveness.live_range(func, inst).is_some(), "member read normalizes to bundle");
            }
        }
        let range = liveness.live_range(func, bundle).expect("bundle range");
        let def = range.definition();
        assert!(def.end > def.start, "bundle lives until the method call consumes it");
    }
}
