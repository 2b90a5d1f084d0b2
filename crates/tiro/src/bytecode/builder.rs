//! Builder for emitting function bytecode.
//!
//! `CodeBuilder` encodes opcodes and operands, manages forward jumps through
//! labels (emit writes a placeholder, `define_label` records the location,
//! `finish` back-patches every pending reference), tracks unresolved module
//! member references for the linker, and maintains the compile-time stack
//! balance.

use crate::bytecode::{module::BytecodeMemberId, op::Opcode};

/// A branch target within one function. Created before the target location
/// is known; resolved by [`CodeBuilder::finish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Builder for the bytecode of a single function.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    code: Vec<u8>,

    /// Label definitions (absolute byte offsets), indexed by label id.
    labels: Vec<Option<u32>>,

    /// Placeholder positions awaiting label resolution.
    patches: Vec<(usize, Label)>,

    /// Module member references by byte offset, resolved by the linker.
    member_refs: Vec<(u32, BytecodeMemberId)>,

    /// Current compile-time stack balance.
    balance: i32,

    /// Highest balance seen, for frame sizing.
    max_balance: i32,
}

impl CodeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an undefined label.
    #[must_use]
    pub fn make_label(&mut self) -> Label {
        let label = Label(self.labels.len());
        self.labels.push(None);
        label
    }

    /// Defines `label` at the current position.
    pub fn define_label(&mut self, label: Label) {
        debug_assert!(self.labels[label.0].is_none(), "label defined twice");
        self.labels[label.0] = Some(self.offset());
    }

    /// Current byte offset into the function's code.
    #[must_use]
    pub fn offset(&self) -> u32 {
        u32::try_from(self.code.len()).expect("bytecode exceeds u32 range")
    }

    /// Current compile-time stack balance.
    #[must_use]
    pub fn balance(&self) -> i32 {
        self.balance
    }

    /// Maximum stack balance seen so far.
    #[must_use]
    pub fn max_balance(&self) -> i32 {
        self.max_balance
    }

    /// Emits a no-operand instruction.
    pub fn emit(&mut self, op: Opcode) {
        self.code.push(op as u8);
        self.apply_fixed_effect(op);
    }

    /// Emits an instruction with a u32 operand.
    pub fn emit_u32(&mut self, op: Opcode, operand: u32) {
        self.code.push(op as u8);
        self.code.extend_from_slice(&operand.to_le_bytes());
        self.apply_fixed_effect(op);
    }

    /// Emits an instruction with two u32 operands (`LoadContext`,
    /// `StoreContext`).
    pub fn emit_u32_u32(&mut self, op: Opcode, first: u32, second: u32) {
        self.code.push(op as u8);
        self.code.extend_from_slice(&first.to_le_bytes());
        self.code.extend_from_slice(&second.to_le_bytes());
        self.apply_fixed_effect(op);
    }

    /// Emits `LoadInt` with its i64 payload.
    pub fn emit_int(&mut self, value: i64) {
        self.code.push(Opcode::LoadInt as u8);
        self.code.extend_from_slice(&value.to_le_bytes());
        self.adjust(1);
    }

    /// Emits `LoadFloat` with its f64 payload.
    pub fn emit_float(&mut self, value: f64) {
        self.code.push(Opcode::LoadFloat as u8);
        self.code.extend_from_slice(&value.to_le_bytes());
        self.adjust(1);
    }

    /// Emits an instruction whose operand is an unresolved module member
    /// reference; the linker patches the final id by byte offset.
    pub fn emit_member(&mut self, op: Opcode, member: BytecodeMemberId) {
        self.code.push(op as u8);
        let offset = self.offset();
        self.member_refs.push((offset, member));
        self.code.extend_from_slice(&member.raw().to_le_bytes());
        self.apply_fixed_effect(op);
    }

    /// Emits a branch to `label`, writing a placeholder target.
    pub fn emit_jump(&mut self, op: Opcode, label: Label) {
        debug_assert!(matches!(
            op,
            Opcode::Jmp | Opcode::JmpTrue | Opcode::JmpTruePop | Opcode::JmpFalse | Opcode::JmpFalsePop
        ));
        self.code.push(op as u8);
        self.patches.push((self.code.len(), label));
        self.code.extend_from_slice(&0u32.to_le_bytes());
        self.apply_fixed_effect(op);
    }

    /// Emits an operand-dependent instruction (`Call`, `MkArray`, ...) with
    /// the explicit stack effect.
    pub fn emit_counted(&mut self, op: Opcode, operand: u32, effect: i32) {
        debug_assert!(op.stack_effect().is_none(), "use emit_u32 for fixed-effect opcodes");
        self.code.push(op as u8);
        self.code.extend_from_slice(&operand.to_le_bytes());
        self.adjust(effect);
    }

    /// Like [`Self::emit_counted`] but the operand is a member reference
    /// (`MkRecord`).
    pub fn emit_counted_member(&mut self, op: Opcode, member: BytecodeMemberId, effect: i32) {
        self.code.push(op as u8);
        let offset = self.offset();
        self.member_refs.push((offset, member));
        self.code.extend_from_slice(&member.raw().to_le_bytes());
        self.adjust(effect);
    }

    /// Asserts the balance expected at a block boundary. Every block must
    /// reach its end with the same balance on all paths.
    pub fn check_balance(&self, expected: i32) {
        assert_eq!(
            self.balance, expected,
            "stack balance mismatch at block boundary: {} != {expected}",
            self.balance
        );
    }

    /// Overrides the balance at the start of a new block (after an
    /// unconditional transfer, the emitted balance is whatever the new
    /// block's predecessors established).
    pub fn set_balance(&mut self, balance: i32) {
        self.balance = balance;
        self.max_balance = self.max_balance.max(balance);
    }

    /// Finalizes the code, back-patching all label references. Returns the
    /// encoded bytes plus the member references for the linker.
    #[must_use]
    pub fn finish(mut self) -> (Vec<u8>, Vec<(u32, BytecodeMemberId)>) {
        for (position, label) in self.patches.drain(..) {
            let target = self.labels[label.0].expect("all referenced labels are defined");
            self.code[position..position + 4].copy_from_slice(&target.to_le_bytes());
        }
        (self.code, self.member_refs)
    }

    fn apply_fixed_effect(&mut self, op: Opcode) {
        let effect = op
            .stack_effect()
            .expect("operand-dependent opcodes use emit_counted");
        self.adjust(effect);
    }

    fn adjust(&mut self, effect: i32) {
        self.balance += effect;
        debug_assert!(self.balance >= 0, "stack balance went negative");
        self.max_balance = self.max_balance.max(self.balance);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn emit_encodes_opcode_and_operands() {
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::LoadNull);
        builder.emit_u32(Opcode::StoreLocal, 3);
        let (code, refs) = builder.finish();
        assert_eq!(code, vec![Opcode::LoadNull as u8, Opcode::StoreLocal as u8, 3, 0, 0, 0]);
        assert!(refs.is_empty());
    }

    #[test]
    fn forward_jump_is_back_patched() {
        let mut builder = CodeBuilder::new();
        let label = builder.make_label();
        builder.emit(Opcode::LoadTrue);
        builder.emit_jump(Opcode::JmpFalsePop, label);
        builder.emit(Opcode::LoadNull);
        builder.emit(Opcode::Pop);
        builder.define_label(label);
        builder.emit(Opcode::LoadNull);
        builder.emit(Opcode::Ret);

        let (code, _) = builder.finish();
        // The branch target is the absolute offset of the labeled LoadNull.
        let target = u32::from_le_bytes([code[2], code[3], code[4], code[5]]);
        assert_eq!(target, 8);
        assert_eq!(code[8], Opcode::LoadNull as u8);
    }

    #[test]
    fn backward_jump_targets_defined_label() {
        let mut builder = CodeBuilder::new();
        let top = builder.make_label();
        builder.define_label(top);
        builder.emit(Opcode::LoadTrue);
        builder.emit_jump(Opcode::JmpTruePop, top);
        let (code, _) = builder.finish();
        let target = u32::from_le_bytes([code[2], code[3], code[4], code[5]]);
        assert_eq!(target, 0);
    }

    #[test]
    fn balance_tracking() {
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::LoadTrue);
        builder.emit(Opcode::LoadTrue);
        assert_eq!(builder.balance(), 2);
        builder.emit(Opcode::Eq);
        assert_eq!(builder.balance(), 1);
        builder.emit_counted(Opcode::Call, 1, -1); // pops callable + 1 arg, pushes result
        assert_eq!(builder.balance(), 0);
        assert_eq!(builder.max_balance(), 2);
    }

    #[test]
    fn member_references_are_recorded_by_offset() {
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::LoadNull);
        builder.emit_member(Opcode::LoadModule, BytecodeMemberId::new(7));
        let (_, refs) = builder.finish();
        assert_eq!(refs, vec![(2, BytecodeMemberId::new(7))]);
    }
}
