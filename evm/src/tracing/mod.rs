//! Execution observer contract. The interpreter drives every attached tracer
//! through the callbacks below; tracers record and never fail.

use ethnum::U256;

use crate::revision::Revision;
use crate::state::StateView;
use crate::types::Address;

pub mod call_tree;
pub mod debug;
pub mod state_diff;
pub mod vm;

pub use call_tree::TraceTracer;
pub use debug::DebugTracer;
pub use state_diff::StateDiffTracer;
pub use vm::VmTraceTracer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Call,
    CallCode,
    DelegateCall,
    Create,
    Create2,
}

/// Inputs of one call frame, fixed for the frame's lifetime.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: CallKind,
    pub is_static: bool,
    pub depth: i32,
    pub gas: i64,
    pub recipient: Address,
    pub sender: Address,
    pub code_address: Address,
    pub input: Vec<u8>,
    pub value: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    Revert,
    OutOfGas,
    StackOverflow,
    StackUnderflow,
    InvalidInstruction,
    UndefinedInstruction,
    BadJumpDestination,
    PrecompileFailure,
    OtherFailure,
}

impl StatusCode {
    #[must_use]
    pub fn is_success(&self) -> bool {
        *self == StatusCode::Success
    }
}

/// Produced on frame exit; also handed to `on_reward_granted` with the
/// final post-refund gas at transaction end.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: StatusCode,
    pub gas_left: i64,
    pub output: Vec<u8>,
}

/// Interpreter state visible at an instruction boundary.
pub struct ExecutionContext<'a> {
    pub code: &'a [u8],
    pub gas_left: i64,
    pub memory: &'a [u8],
    pub message: &'a Message,
}

/// Bottom-to-top view of the operand stack.
#[derive(Clone, Copy)]
pub struct StackView<'a>(pub &'a [U256]);

impl StackView<'_> {
    #[must_use]
    pub fn height(&self) -> usize {
        self.0.len()
    }

    /// Element `depth` positions below the top; zero for out-of-range reads.
    #[must_use]
    pub fn peek(&self, depth: usize) -> U256 {
        if depth < self.0.len() {
            self.0[self.0.len() - 1 - depth]
        } else {
            U256::ZERO
        }
    }
}

#[allow(unused_variables)]
pub trait EvmTracer {
    fn on_execution_start(&mut self, revision: Revision, message: &Message, code: &[u8]) {}

    fn on_instruction_start(
        &mut self,
        pc: usize,
        stack: StackView<'_>,
        context: &ExecutionContext<'_>,
        ibs: &dyn StateView,
    ) {
    }

    fn on_execution_end(&mut self, result: &ExecutionResult, ibs: &dyn StateView) {}

    fn on_precompiled_run(&mut self, result: &ExecutionResult, gas: i64, ibs: &dyn StateView) {}

    fn on_reward_granted(&mut self, result: &ExecutionResult, ibs: &dyn StateView) {}
}

/// Tracer that observes nothing; used when replaying transactions only to
/// advance the state.
#[derive(Debug, Default)]
pub struct NullTracer;

impl EvmTracer for NullTracer {}

pub enum Tracer {
    Null(NullTracer),
    Debug(DebugTracer),
    Vm(VmTraceTracer),
    CallTree(TraceTracer),
    StateDiff(StateDiffTracer),
}

impl EvmTracer for Tracer {
    fn on_execution_start(&mut self, revision: Revision, message: &Message, code: &[u8]) {
        match self {
            Tracer::Null(tracer) => tracer.on_execution_start(revision, message, code),
            Tracer::Debug(tracer) => tracer.on_execution_start(revision, message, code),
            Tracer::Vm(tracer) => tracer.on_execution_start(revision, message, code),
            Tracer::CallTree(tracer) => tracer.on_execution_start(revision, message, code),
            Tracer::StateDiff(tracer) => tracer.on_execution_start(revision, message, code),
        }
    }

    fn on_instruction_start(
        &mut self,
        pc: usize,
        stack: StackView<'_>,
        context: &ExecutionContext<'_>,
        ibs: &dyn StateView,
    ) {
        match self {
            Tracer::Null(tracer) => tracer.on_instruction_start(pc, stack, context, ibs),
            Tracer::Debug(tracer) => tracer.on_instruction_start(pc, stack, context, ibs),
            Tracer::Vm(tracer) => tracer.on_instruction_start(pc, stack, context, ibs),
            Tracer::CallTree(tracer) => tracer.on_instruction_start(pc, stack, context, ibs),
            Tracer::StateDiff(tracer) => tracer.on_instruction_start(pc, stack, context, ibs),
        }
    }

    fn on_execution_end(&mut self, result: &ExecutionResult, ibs: &dyn StateView) {
        match self {
            Tracer::Null(tracer) => tracer.on_execution_end(result, ibs),
            Tracer::Debug(tracer) => tracer.on_execution_end(result, ibs),
            Tracer::Vm(tracer) => tracer.on_execution_end(result, ibs),
            Tracer::CallTree(tracer) => tracer.on_execution_end(result, ibs),
            Tracer::StateDiff(tracer) => tracer.on_execution_end(result, ibs),
        }
    }

    fn on_precompiled_run(&mut self, result: &ExecutionResult, gas: i64, ibs: &dyn StateView) {
        match self {
            Tracer::Null(tracer) => tracer.on_precompiled_run(result, gas, ibs),
            Tracer::Debug(tracer) => tracer.on_precompiled_run(result, gas, ibs),
            Tracer::Vm(tracer) => tracer.on_precompiled_run(result, gas, ibs),
            Tracer::CallTree(tracer) => tracer.on_precompiled_run(result, gas, ibs),
            Tracer::StateDiff(tracer) => tracer.on_precompiled_run(result, gas, ibs),
        }
    }

    fn on_reward_granted(&mut self, result: &ExecutionResult, ibs: &dyn StateView) {
        match self {
            Tracer::Null(tracer) => tracer.on_reward_granted(result, ibs),
            Tracer::Debug(tracer) => tracer.on_reward_granted(result, ibs),
            Tracer::Vm(tracer) => tracer.on_reward_granted(result, ibs),
            Tracer::CallTree(tracer) => tracer.on_reward_granted(result, ibs),
            Tracer::StateDiff(tracer) => tracer.on_reward_granted(result, ibs),
        }
    }
}

/// Ordered tracer collection; each callback fans out in attachment order.
#[derive(Default)]
pub struct TracerSet {
    tracers: Vec<Tracer>,
}

impl TracerSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tracer: Tracer) {
        self.tracers.push(tracer);
    }

    pub fn is_empty(&self) -> bool {
        self.tracers.is_empty()
    }

    pub fn into_inner(self) -> Vec<Tracer> {
        self.tracers
    }
}

impl EvmTracer for TracerSet {
    fn on_execution_start(&mut self, revision: Revision, message: &Message, code: &[u8]) {
        for tracer in &mut self.tracers {
            tracer.on_execution_start(revision, message, code);
        }
    }

    fn on_instruction_start(
        &mut self,
        pc: usize,
        stack: StackView<'_>,
        context: &ExecutionContext<'_>,
        ibs: &dyn StateView,
    ) {
        for tracer in &mut self.tracers {
            tracer.on_instruction_start(pc, stack, context, ibs);
        }
    }

    fn on_execution_end(&mut self, result: &ExecutionResult, ibs: &dyn StateView) {
        for tracer in &mut self.tracers {
            tracer.on_execution_end(result, ibs);
        }
    }

    fn on_precompiled_run(&mut self, result: &ExecutionResult, gas: i64, ibs: &dyn StateView) {
        for tracer in &mut self.tracers {
            tracer.on_precompiled_run(result, gas, ibs);
        }
    }

    fn on_reward_granted(&mut self, result: &ExecutionResult, ibs: &dyn StateView) {
        for tracer in &mut self.tracers {
            tracer.on_reward_granted(result, ibs);
        }
    }
}

/// Number of top-of-stack values an instruction leaves for the trace: the
/// value it pushes, or the slice it rearranges for DUP/SWAP.
#[must_use]
pub fn stack_returns(op: u8) -> usize {
    use crate::opcode_table::opcode::*;

    match op {
        PUSH1..=PUSH32 => 1,
        SWAP1..=SWAP16 => (op - SWAP1) as usize + 2,
        DUP1..=DUP16 => (op - DUP1) as usize + 2,
        CALLDATALOAD | SLOAD | MLOAD | CALLDATASIZE | LT | GT | DIV | SDIV | SAR | AND | EQ
        | CALLVALUE | ISZERO | ADD | EXP | CALLER | KECCAK256 | SUB | ADDRESS | GAS | MUL
        | RETURNDATASIZE | NOT | SHR | SHL | EXTCODESIZE | SLT | OR | NUMBER | PC | TIMESTAMP
        | BALANCE | SELFBALANCE | MULMOD | ADDMOD | BASEFEE | BLOCKHASH | BYTE | XOR | ORIGIN
        | CODESIZE | MOD | SIGNEXTEND | GASLIMIT | DIFFICULTY | SGT | GASPRICE | MSIZE
        | EXTCODEHASH | STATICCALL | DELEGATECALL | CALL | CALLCODE | CREATE | CREATE2 => 1,
        _ => 0,
    }
}

/// Copy the trace window of the operand stack, deepest first, as
/// "0x"-prefixed shortest hex.
#[must_use]
pub fn copy_stack(op: u8, stack: StackView<'_>) -> Vec<String> {
    let count = stack_returns(op).min(stack.height());
    (0..count)
        .rev()
        .map(|depth| crate::types::quantity::from_u256(stack.peek(depth)))
        .collect()
}

/// Memory region an instruction writes, taken from its operands.
#[must_use]
pub fn memory_offset_len(op: u8, stack: StackView<'_>) -> Option<(u64, u64)> {
    use crate::opcode_table::opcode::*;

    match op {
        MSTORE | MLOAD => Some((stack.peek(0).as_u64(), 32)),
        MSTORE8 => Some((stack.peek(0).as_u64(), 1)),
        RETURNDATACOPY | CALLDATACOPY | CODECOPY => {
            Some((stack.peek(0).as_u64(), stack.peek(2).as_u64()))
        }
        STATICCALL | DELEGATECALL => Some((stack.peek(4).as_u64(), stack.peek(5).as_u64())),
        CALL | CALLCODE => Some((stack.peek(5).as_u64(), stack.peek(6).as_u64())),
        CREATE | CREATE2 => Some((0, 0)),
        _ => None,
    }
}
