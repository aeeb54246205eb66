//! Bytecode replay machine. It implements the interpreter side of the tracer
//! contract: frames report `on_execution_start`/`on_execution_end`,
//! instructions report `on_instruction_start` before they execute,
//! precompiles report `on_precompiled_run`, and the final post-refund result
//! is delivered through `on_reward_granted`.
//!
//! The machine exists so the daemon has a concrete interpreter behind the
//! tracer seam; the executors only depend on the callbacks and the state
//! overlay, never on the dispatch below.

pub mod gas;
mod memory;
mod opcodes;
pub mod precompile;
mod stack;

pub use memory::Memory;
pub use stack::{Stack, STACK_LIMIT};

use ethnum::U256;

use crate::opcode_table;
use crate::revision::Revision;
use crate::state::{IntraBlockState, StateError};
use crate::tracing::{
    CallKind, ExecutionContext, ExecutionResult, EvmTracer, Message, StackView, StatusCode,
};
use crate::types::Address;

/// Header-derived execution environment.
#[derive(Debug, Clone)]
pub struct BlockEnv {
    pub number: u64,
    pub coinbase: Address,
    pub timestamp: u64,
    pub gas_limit: u64,
    pub difficulty: U256,
    pub base_fee: Option<U256>,
    pub chain_id: u64,
}

/// Transaction inputs. `nonce` is absent for synthetic calls, which skips
/// the nonce pre-check.
#[derive(Debug, Clone)]
pub struct TxEnv {
    pub from: Address,
    pub to: Option<Address>,
    pub gas_limit: u64,
    pub gas_price: U256,
    pub value: U256,
    pub data: Vec<u8>,
    pub nonce: Option<u64>,
}

/// Transaction-level outcome. Pre-check failures short-circuit execution and
/// carry no trace.
#[derive(Debug, Clone)]
pub struct TxOutcome {
    pub status: StatusCode,
    pub gas_left: i64,
    pub gas_used: u64,
    pub output: Vec<u8>,
    pub pre_check_error: Option<String>,
}

impl TxOutcome {
    fn pre_check(message: String) -> Self {
        Self {
            status: StatusCode::OtherFailure,
            gas_left: 0,
            gas_used: 0,
            output: Vec::new(),
            pre_check_error: Some(message),
        }
    }
}

pub(crate) enum Action {
    Continue,
    Advance(usize),
    Jump(usize),
    Stop,
    Return(Vec<u8>),
    Revert(Vec<u8>),
    SelfDestruct,
    Fail(StatusCode),
}

pub(crate) struct Frame {
    pub stack: Stack,
    pub memory: Memory,
    pub pc: usize,
    pub gas: i64,
    pub return_data: Vec<u8>,
    jumpdests: Vec<bool>,
}

impl Frame {
    fn new(gas: i64, code: &[u8]) -> Self {
        Self {
            stack: Stack::new(),
            memory: Memory::new(),
            pc: 0,
            gas,
            return_data: Vec::new(),
            jumpdests: analyze_jumpdests(code),
        }
    }

    pub fn use_gas(&mut self, cost: i64) -> bool {
        if cost > self.gas {
            self.gas = 0;
            return false;
        }
        self.gas -= cost;
        true
    }

    /// Charge expansion and grow memory to cover the region. False means the
    /// frame ran out of gas.
    pub fn charge_memory(&mut self, offset: usize, len: usize) -> bool {
        if len == 0 {
            return true;
        }
        let Some(end) = offset.checked_add(len) else {
            return false;
        };
        if end as u64 > (1u64 << 32) {
            return false;
        }
        let new_words = gas::to_words(end as u64);
        let current_words = self.memory.words();
        if new_words > current_words {
            let delta = gas::memory_cost(new_words) - gas::memory_cost(current_words);
            if !self.use_gas(delta) {
                return false;
            }
        }
        self.memory.grow(offset, len);
        true
    }

    pub fn is_valid_jumpdest(&self, target: usize) -> bool {
        self.jumpdests.get(target).copied().unwrap_or(false)
    }
}

fn analyze_jumpdests(code: &[u8]) -> Vec<bool> {
    let mut valid = vec![false; code.len()];
    let mut i = 0;
    while i < code.len() {
        let op = code[i];
        if op == opcode_table::opcode::JUMPDEST {
            valid[i] = true;
        }
        if (opcode_table::opcode::PUSH1..=opcode_table::opcode::PUSH32).contains(&op) {
            i += (op - opcode_table::opcode::PUSH1) as usize + 1;
        }
        i += 1;
    }
    valid
}

pub struct Machine<'a> {
    env: &'a BlockEnv,
    revision: Revision,
    state: &'a mut IntraBlockState,
    tracers: &'a mut dyn EvmTracer,
    origin: Address,
    gas_price: U256,
    refund: i64,
}

impl<'a> Machine<'a> {
    /// Execute one transaction against `state` with the attached tracers.
    /// `refund_enabled` applies the gas refund counter at the end;
    /// `gas_bailout` lets a sender without funds for gas run anyway, which
    /// replay needs for synthetic calls.
    pub fn execute_transaction(
        env: &BlockEnv,
        revision: Revision,
        state: &mut IntraBlockState,
        tracers: &mut dyn EvmTracer,
        tx: &TxEnv,
        refund_enabled: bool,
        gas_bailout: bool,
    ) -> Result<TxOutcome, StateError> {
        let create = tx.to.is_none();

        let mut intrinsic = if create { gas::TX_CREATE_GAS } else { gas::TX_GAS };
        for byte in &tx.data {
            intrinsic += gas::data_gas(*byte, revision);
        }
        if tx.gas_limit < intrinsic {
            return Ok(TxOutcome::pre_check(format!(
                "intrinsic gas too low: have {}, want {}",
                tx.gas_limit, intrinsic
            )));
        }

        if let Some(nonce) = tx.nonce {
            let have = state.nonce(&tx.from)?;
            if have != nonce {
                return Ok(TxOutcome::pre_check(format!(
                    "invalid nonce: got {nonce}, expected {have}"
                )));
            }
        }

        let gas_fee = tx.gas_price.wrapping_mul(U256::from(tx.gas_limit));
        let wanted = gas_fee.wrapping_add(tx.value);
        let balance = state.balance(&tx.from)?;
        let charge_fees = if balance < wanted {
            if balance < tx.value || !gas_bailout {
                return Ok(TxOutcome::pre_check(format!(
                    "insufficient funds for gas * price + value: address {} have {} want {}",
                    tx.from, balance, wanted
                )));
            }
            false
        } else {
            true
        };

        if charge_fees {
            state.sub_balance(&tx.from, gas_fee)?;
        }
        let sender_nonce = state.nonce(&tx.from)?;
        state.increment_nonce(&tx.from)?;

        #[allow(clippy::cast_possible_wrap)]
        let frame_gas = (tx.gas_limit - intrinsic) as i64;
        let recipient = match tx.to {
            Some(to) => to,
            None => Address::from_create(&tx.from, sender_nonce),
        };
        let message = Message {
            kind: if create { CallKind::Create } else { CallKind::Call },
            is_static: false,
            depth: 0,
            gas: frame_gas,
            recipient,
            sender: tx.from,
            code_address: recipient,
            input: if create { Vec::new() } else { tx.data.clone() },
            value: tx.value,
        };
        let code = if create {
            tx.data.clone()
        } else {
            state.code(&recipient)?
        };

        let mut machine = Machine {
            env,
            revision,
            state,
            tracers,
            origin: tx.from,
            gas_price: tx.gas_price,
            refund: 0,
        };

        let snapshot = machine.state.take_snapshot();
        let result = machine.run_message(&message, code)?;
        if result.status.is_success() {
            machine.state.discard_snapshot(snapshot);
        } else {
            machine.state.revert_to_snapshot(snapshot);
        }

        let mut gas_left = result.gas_left;
        #[allow(clippy::cast_possible_wrap)]
        if refund_enabled && result.status.is_success() {
            let used = tx.gas_limit as i64 - gas_left;
            let quotient = if revision >= Revision::London { 5 } else { 2 };
            gas_left += machine.refund.min(used / quotient);
        }

        #[allow(clippy::cast_possible_wrap)]
        let gas_used = (tx.gas_limit as i64 - gas_left).max(0);
        if charge_fees {
            let refund_wei = tx.gas_price.wrapping_mul(U256::from(gas_left.max(0).unsigned_abs()));
            machine.state.add_balance(&tx.from, refund_wei)?;
            let fee_wei = tx.gas_price.wrapping_mul(U256::from(gas_used.unsigned_abs()));
            let coinbase = machine.env.coinbase;
            machine.state.add_balance(&coinbase, fee_wei)?;
        }

        let final_result = ExecutionResult {
            status: result.status,
            gas_left,
            output: result.output.clone(),
        };
        machine.tracers.on_reward_granted(&final_result, &*machine.state);

        Ok(TxOutcome {
            status: result.status,
            gas_left,
            gas_used: gas_used.unsigned_abs(),
            output: result.output,
            pre_check_error: None,
        })
    }

    /// Dispatch one message: precompiles short-circuit without a frame,
    /// creates set up the new account, everything else runs bytecode.
    pub(crate) fn run_message(
        &mut self,
        message: &Message,
        code: Vec<u8>,
    ) -> Result<ExecutionResult, StateError> {
        let create = matches!(message.kind, CallKind::Create | CallKind::Create2);

        if !create && message.code_address.is_reserved_range(precompile::count(self.revision)) {
            if message.kind == CallKind::Call && message.value > U256::ZERO {
                self.state
                    .transfer(&message.sender, &message.recipient, message.value)?;
            }
            let result = precompile::run(
                message.code_address.as_bytes()[19],
                &message.input,
                message.gas,
                self.revision,
            );
            self.tracers
                .on_precompiled_run(&result, message.gas, &*self.state);
            return Ok(result);
        }

        if create {
            if self.state.nonce(&message.recipient)? != 0
                || !self.state.code(&message.recipient)?.is_empty()
            {
                return Ok(ExecutionResult {
                    status: StatusCode::OtherFailure,
                    gas_left: 0,
                    output: Vec::new(),
                });
            }
            self.state.create_contract(&message.recipient)?;
            if self.revision >= Revision::Spurious {
                self.state.set_nonce(&message.recipient, 1)?;
            }
            self.state
                .transfer(&message.sender, &message.recipient, message.value)?;
        } else if message.kind == CallKind::Call && message.value > U256::ZERO {
            self.state
                .transfer(&message.sender, &message.recipient, message.value)?;
        }

        let mut result = self.run_frame(message, &code)?;

        if create && result.status.is_success() {
            result = self.deposit_code(&message.recipient, result)?;
        }
        Ok(result)
    }

    fn deposit_code(
        &mut self,
        address: &Address,
        mut result: ExecutionResult,
    ) -> Result<ExecutionResult, StateError> {
        let deposit = gas::G_CODE_DEPOSIT_BYTE * i64::try_from(result.output.len()).unwrap_or(i64::MAX);
        if result.output.len() > gas::MAX_CODE_SIZE || deposit > result.gas_left {
            return Ok(ExecutionResult {
                status: StatusCode::OutOfGas,
                gas_left: 0,
                output: Vec::new(),
            });
        }
        result.gas_left -= deposit;
        self.state.set_code(address, result.output.clone())?;
        Ok(result)
    }

    fn run_frame(
        &mut self,
        message: &Message,
        code: &[u8],
    ) -> Result<ExecutionResult, StateError> {
        self.tracers.on_execution_start(self.revision, message, code);

        let mut frame = Frame::new(message.gas, code);
        let mut output = Vec::new();

        let status = loop {
            let Some(&op) = code.get(frame.pc) else {
                break StatusCode::Success;
            };

            {
                let context = ExecutionContext {
                    code,
                    gas_left: frame.gas,
                    memory: frame.memory.as_slice(),
                    message,
                };
                self.tracers.on_instruction_start(
                    frame.pc,
                    StackView(frame.stack.as_slice()),
                    &context,
                    &*self.state,
                );
            }

            if !opcode_table::is_defined(self.revision, op) {
                break StatusCode::UndefinedInstruction;
            }
            if op == opcode_table::opcode::INVALID {
                break StatusCode::InvalidInstruction;
            }

            let (pops, pushes) = opcodes::stack_io(op);
            if frame.stack.len() < pops {
                break StatusCode::StackUnderflow;
            }
            if frame.stack.len() - pops + pushes > STACK_LIMIT {
                break StatusCode::StackOverflow;
            }
            if message.is_static && opcodes::forbidden_in_static(op) {
                break StatusCode::OtherFailure;
            }
            if !frame.use_gas(gas::constant_cost(op)) {
                break StatusCode::OutOfGas;
            }

            match self.exec_opcode(&mut frame, message, code, op)? {
                Action::Continue => frame.pc += 1,
                Action::Advance(distance) => frame.pc += distance,
                Action::Jump(target) => {
                    if frame.is_valid_jumpdest(target) {
                        frame.pc = target;
                    } else {
                        break StatusCode::BadJumpDestination;
                    }
                }
                Action::Stop | Action::SelfDestruct => break StatusCode::Success,
                Action::Return(data) => {
                    output = data;
                    break StatusCode::Success;
                }
                Action::Revert(data) => {
                    output = data;
                    break StatusCode::Revert;
                }
                Action::Fail(status) => break status,
            }
        };

        let gas_left = match status {
            StatusCode::Success | StatusCode::Revert => frame.gas,
            _ => 0,
        };
        let result = ExecutionResult {
            status,
            gas_left,
            output,
        };
        self.tracers.on_execution_end(&result, &*self.state);
        Ok(result)
    }
}

#[cfg(test)]
mod tests;
