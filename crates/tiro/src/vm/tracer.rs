//! Execution tracing hooks.
//!
//! The interpreter and the collector report events through a [`VmTracer`].
//! The default tracer does nothing; the counting and stderr tracers exist
//! for tests and ad-hoc debugging.

use crate::{bytecode::op::Opcode, strings::InternedString};

/// Observer for VM events. All hooks default to no-ops.
pub trait VmTracer {
    /// Called before every dispatched instruction.
    fn instruction(&mut self, _op: Opcode, _pc: usize) {}

    /// Called when a frame is pushed for a function call.
    fn call(&mut self, _function: InternedString, _argc: u32) {}

    /// Called when a frame returns.
    fn ret(&mut self) {}

    /// Called after every collection with the live counts around it.
    fn collection(&mut self, _live_before: usize, _live_after: usize) {}
}

/// The default tracer: ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Counts events; useful for asserting behavior in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct CountingTracer {
    pub instructions: u64,
    pub calls: u64,
    pub returns: u64,
    pub collections: u64,
}

impl VmTracer for CountingTracer {
    fn instruction(&mut self, _op: Opcode, _pc: usize) {
        self.instructions += 1;
    }

    fn call(&mut self, _function: InternedString, _argc: u32) {
        self.calls += 1;
    }

    fn ret(&mut self) {
        self.returns += 1;
    }

    fn collection(&mut self, _live_before: usize, _live_after: usize) {
        self.collections += 1;
    }
}

/// Writes events to stderr. Very verbose; debugging only.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrTracer;

impl VmTracer for StderrTracer {
    fn instruction(&mut self, op: Opcode, pc: usize) {
        eprintln!("[vm] {pc:6}: {op}");
    }

    fn call(&mut self, _function: InternedString, argc: u32) {
        eprintln!("[vm] call with {argc} arguments");
    }

    fn ret(&mut self) {
        eprintln!("[vm] return");
    }

    fn collection(&mut self, live_before: usize, live_after: usize) {
        eprintln!("[vm] gc: {live_before} -> {live_after} objects");
    }
}
