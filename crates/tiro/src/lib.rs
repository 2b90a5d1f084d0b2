#![doc = include_str!("../../../README.md")]

pub mod ast;
pub mod bytecode;
pub mod compile;
pub mod diagnostics;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod semantics;
pub mod span;
pub mod strings;
pub mod vm;

pub use crate::{
    bytecode::{dump::dump_module, module::BytecodeModule},
    compile::{compile_module, Compilation},
    diagnostics::{Diagnostic, Diagnostics, Severity},
    span::{LineCol, LineIndex, Span},
    strings::{InternedString, StringTable},
    vm::{
        error::{VmError, VmErrorKind, VmResult},
        tracer::{CountingTracer, NoopTracer, StderrTracer, VmTracer},
        value::Value,
        Vm,
    },
};
