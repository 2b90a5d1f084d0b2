//! The instruction set of the virtual machine.
//!
//! Instructions operate on the current frame's operand stack plus its
//! parameter and local slots. Operands are little-endian and follow the
//! opcode byte directly; branch targets are absolute byte offsets into the
//! function's code.

use strum::{Display, FromRepr, IntoStaticStr};

/// One opcode. The discriminant is the encoded byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr, IntoStaticStr)]
pub enum Opcode {
    /// Pushes null.
    LoadNull,
    /// Pushes false.
    LoadFalse,
    /// Pushes true.
    LoadTrue,
    /// Pushes an i64 operand.
    LoadInt,
    /// Pushes an f64 operand.
    LoadFloat,

    /// `u32 index`: pushes the parameter.
    LoadParam,
    /// `u32 index`: pops into the parameter.
    StoreParam,
    /// `u32 index`: pushes the local slot.
    LoadLocal,
    /// `u32 index`: pops into the local slot.
    StoreLocal,
    /// Pushes the current function's closure context (null for plain
    /// functions).
    LoadClosure,
    /// `u32 levels, u32 index`: pops a context, walks `levels` parents,
    /// pushes the slot.
    LoadContext,
    /// `u32 levels, u32 index`: pops a context, then pops a value into the
    /// addressed slot.
    StoreContext,
    /// `u32 member`: pops an object, pushes the property named by the symbol
    /// member.
    LoadMember,
    /// `u32 member`: pops an object, then pops a value into the property.
    StoreMember,
    /// `u32 index`: pops a tuple, pushes its element.
    LoadTupleMember,
    /// `u32 index`: pops a tuple, then pops a value into its element.
    StoreTupleMember,
    /// Pops index then object, pushes `object[index]`.
    LoadIndex,
    /// Pops index, object, value; stores `object[index] = value`.
    StoreIndex,
    /// `u32 member`: pushes the module member.
    LoadModule,
    /// `u32 member`: pops into the module member.
    StoreModule,

    /// Duplicates the top of stack.
    Dup,
    /// Pops the top of stack.
    Pop,
    /// `u32 n`: pops n values.
    PopN,
    /// Swaps the two topmost values.
    Rot2,
    /// Rotates the three topmost values (top goes two down).
    Rot3,
    /// Rotates the four topmost values (top goes three down).
    Rot4,

    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    /// Logical not.
    LNot,
    /// Bitwise not.
    BNot,
    /// Unary plus.
    UPos,
    /// Unary minus.
    UNeg,
    LSh,
    RSh,
    BAnd,
    BOr,
    BXor,
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    NEq,

    /// `u32 n`: pops n values into a new array.
    MkArray,
    /// `u32 n`: pops n values into a new tuple.
    MkTuple,
    /// `u32 n`: pops n values into a new set.
    MkSet,
    /// `u32 n`: pops 2n values (alternating keys and values) into a new map.
    MkMap,
    /// `u32 member`: pops one value per key of the record template member,
    /// building a record object.
    MkRecord,
    /// `u32 n`: pops nothing; pushes a fresh closure context with n slots
    /// whose parent is the popped context. (Pops the parent context.)
    MkContext,
    /// Pops a context and a function template, pushes a closure function.
    MkClosure,
    /// Pushes a fresh string builder.
    MkBuilder,
    /// Pops a value and appends its string form to the builder below it.
    BuilderAppend,
    /// Pops a builder, pushes the built string.
    BuilderString,

    /// `u32 target`: jumps unconditionally.
    Jmp,
    /// `u32 target`: jumps when the top of stack is truthy (kept on the
    /// stack).
    JmpTrue,
    /// `u32 target`: pops the top of stack, jumps when it was truthy.
    JmpTruePop,
    /// `u32 target`: jumps when the top of stack is falsy (kept).
    JmpFalse,
    /// `u32 target`: pops the top of stack, jumps when it was falsy.
    JmpFalsePop,

    /// `u32 argc`: pops argc arguments and a callable, pushes the result
    /// (or enters a frame).
    Call,
    /// `u32 member`: pops a receiver, pushes `(instance, method)` for the
    /// symbol member.
    LoadMethod,
    /// `u32 argc`: pops argc arguments, a method and an instance; performs
    /// the bound call.
    CallMethod,
    /// Pops the return value and leaves the current frame.
    Ret,
    /// Pops a message and a rendered expression string, aborting the
    /// coroutine with an assertion error.
    AssertFail,
}

impl Opcode {
    /// Total encoded size (opcode byte plus operands).
    #[must_use]
    pub fn encoded_len(self) -> usize {
        1 + match self {
            Self::LoadInt | Self::LoadFloat => 8,
            Self::LoadContext | Self::StoreContext => 8,
            Self::LoadParam
            | Self::StoreParam
            | Self::LoadLocal
            | Self::StoreLocal
            | Self::LoadMember
            | Self::StoreMember
            | Self::LoadTupleMember
            | Self::StoreTupleMember
            | Self::LoadModule
            | Self::StoreModule
            | Self::PopN
            | Self::MkArray
            | Self::MkTuple
            | Self::MkSet
            | Self::MkMap
            | Self::MkRecord
            | Self::MkContext
            | Self::Jmp
            | Self::JmpTrue
            | Self::JmpTruePop
            | Self::JmpFalse
            | Self::JmpFalsePop
            | Self::Call
            | Self::LoadMethod
            | Self::CallMethod => 4,
            _ => 0,
        }
    }

    /// Net stack effect for opcodes whose effect does not depend on an
    /// operand. Returns `None` for the operand-dependent ones (`PopN`,
    /// `MkArray`, `Call`, ...).
    #[must_use]
    pub fn stack_effect(self) -> Option<i32> {
        let effect = match self {
            Self::LoadNull
            | Self::LoadFalse
            | Self::LoadTrue
            | Self::LoadInt
            | Self::LoadFloat
            | Self::LoadParam
            | Self::LoadLocal
            | Self::LoadClosure
            | Self::LoadModule
            | Self::Dup
            | Self::MkBuilder => 1,
            Self::StoreParam | Self::StoreLocal | Self::StoreModule | Self::Pop => -1,
            Self::LoadContext => 0, // pops context, pushes slot
            Self::StoreContext => -2,
            Self::LoadMember => 0,
            Self::StoreMember => -2,
            Self::LoadTupleMember => 0,
            Self::StoreTupleMember => -2,
            Self::LoadIndex => -1,
            Self::StoreIndex => -3,
            Self::Rot2 | Self::Rot3 | Self::Rot4 => 0,
            Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::Mod
            | Self::Pow
            | Self::LSh
            | Self::RSh
            | Self::BAnd
            | Self::BOr
            | Self::BXor
            | Self::Gt
            | Self::Gte
            | Self::Lt
            | Self::Lte
            | Self::Eq
            | Self::NEq => -1,
            Self::LNot | Self::BNot | Self::UPos | Self::UNeg => 0,
            Self::MkContext => 0,
            Self::MkClosure => -1,
            Self::BuilderAppend => -1,
            Self::BuilderString => 0,
            Self::Jmp => 0,
            Self::JmpTrue | Self::JmpFalse => 0,
            Self::JmpTruePop | Self::JmpFalsePop => -1,
            Self::LoadMethod => 1, // receiver becomes (instance, method)
            Self::Ret => -1,
            Self::AssertFail => -2,
            // MkRecord's pop count depends on the record template.
            Self::PopN
            | Self::MkArray
            | Self::MkTuple
            | Self::MkSet
            | Self::MkMap
            | Self::MkRecord
            | Self::Call
            | Self::CallMethod => {
                return None;
            }
        };
        Some(effect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_bytes_round_trip() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Opcode::from_repr(byte) {
                assert_eq!(op as u8, byte);
            }
        }
        // A few fixed points that the encoder relies on.
        assert_eq!(Opcode::from_repr(Opcode::Ret as u8), Some(Opcode::Ret));
        assert_eq!(Opcode::from_repr(Opcode::Call as u8), Some(Opcode::Call));
    }

    #[test]
    fn encoded_lengths() {
        assert_eq!(Opcode::LoadNull.encoded_len(), 1);
        assert_eq!(Opcode::LoadLocal.encoded_len(), 5);
        assert_eq!(Opcode::LoadInt.encoded_len(), 9);
        assert_eq!(Opcode::LoadContext.encoded_len(), 9);
    }
}
