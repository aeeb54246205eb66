use ethnum::{I256, U256};

use crate::opcode_table::opcode::*;
use crate::revision::Revision;
use crate::state::{Log, StateError};
use crate::tracing::{CallKind, Message, StatusCode};
use crate::types::{keccak256, Address};

use super::{gas, Action, Frame, Machine};

/// (pops, pushes) of every defined instruction; checked before dispatch so
/// handlers can pop freely.
#[allow(clippy::match_same_arms)]
pub(crate) fn stack_io(op: u8) -> (usize, usize) {
    match op {
        STOP | JUMPDEST => (0, 0),
        ADD | MUL | SUB | DIV | SDIV | MOD | SMOD | EXP | SIGNEXTEND | LT | GT | SLT | SGT
        | EQ | AND | OR | XOR | BYTE | SHL | SHR | SAR | KECCAK256 => (2, 1),
        ADDMOD | MULMOD => (3, 1),
        ISZERO | NOT | BALANCE | CALLDATALOAD | EXTCODESIZE | EXTCODEHASH | BLOCKHASH | MLOAD => {
            (1, 1)
        }
        ADDRESS | ORIGIN | CALLER | CALLVALUE | CALLDATASIZE | CODESIZE | GASPRICE
        | RETURNDATASIZE | COINBASE | TIMESTAMP | NUMBER | DIFFICULTY | GASLIMIT | CHAINID
        | SELFBALANCE | BASEFEE | PC | MSIZE | GAS | PUSH0 => (0, 1),
        CALLDATACOPY | CODECOPY | RETURNDATACOPY => (3, 0),
        EXTCODECOPY => (4, 0),
        POP | JUMP => (1, 0),
        MSTORE | MSTORE8 | SSTORE | JUMPI | RETURN | REVERT => (2, 0),
        SLOAD => (1, 1),
        PUSH1..=PUSH32 => (0, 1),
        DUP1..=DUP16 => ((op - DUP1) as usize + 1, (op - DUP1) as usize + 2),
        SWAP1..=SWAP16 => ((op - SWAP1) as usize + 2, (op - SWAP1) as usize + 2),
        LOG0..=LOG4 => ((op - LOG0) as usize + 2, 0),
        CREATE => (3, 1),
        CREATE2 => (4, 1),
        CALL | CALLCODE => (7, 1),
        DELEGATECALL | STATICCALL => (6, 1),
        SELFDESTRUCT => (1, 0),
        _ => (0, 0),
    }
}

pub(crate) fn forbidden_in_static(op: u8) -> bool {
    matches!(op, SSTORE | LOG0..=LOG4 | CREATE | CREATE2 | SELFDESTRUCT)
}

pub(crate) fn address_to_u256(address: &Address) -> U256 {
    let mut bytes = [0u8; 32];
    bytes[12..].copy_from_slice(address.as_bytes());
    U256::from_be_bytes(bytes)
}

pub(crate) fn u256_to_address(value: U256) -> Address {
    let bytes = value.to_be_bytes();
    Address(*arrayref::array_ref![bytes, 12, 20])
}

fn addmod_reduced(a: U256, b: U256, n: U256) -> U256 {
    let (sum, overflow) = a.overflowing_add(b);
    if overflow || sum >= n {
        sum.wrapping_sub(n)
    } else {
        sum
    }
}

fn addmod(a: U256, b: U256, n: U256) -> U256 {
    if n == U256::ZERO {
        return U256::ZERO;
    }
    addmod_reduced(a % n, b % n, n)
}

fn mulmod(a: U256, b: U256, n: U256) -> U256 {
    if n == U256::ZERO {
        return U256::ZERO;
    }
    let mut result = U256::ZERO;
    let mut a = a % n;
    let mut b = b;
    while b > U256::ZERO {
        if b & U256::ONE == U256::ONE {
            result = addmod_reduced(result, a, n);
        }
        a = addmod_reduced(a, a, n);
        b >>= 1;
    }
    result
}

fn exp_by_squaring(base: U256, exponent: U256) -> U256 {
    let mut result = U256::ONE;
    let mut base = base;
    let mut exponent = exponent;
    while exponent > U256::ZERO {
        if exponent & U256::ONE == U256::ONE {
            result = result.wrapping_mul(base);
        }
        base = base.wrapping_mul(base);
        exponent >>= 1;
    }
    result
}

impl Machine<'_> {
    #[allow(clippy::too_many_lines)]
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn exec_opcode(
        &mut self,
        frame: &mut Frame,
        message: &Message,
        code: &[u8],
        op: u8,
    ) -> Result<Action, StateError> {
        let action = match op {
            STOP => Action::Stop,
            ADD => {
                let a = frame.stack.pop();
                let b = frame.stack.pop();
                frame.stack.push(a.wrapping_add(b));
                Action::Continue
            }
            MUL => {
                let a = frame.stack.pop();
                let b = frame.stack.pop();
                frame.stack.push(a.wrapping_mul(b));
                Action::Continue
            }
            SUB => {
                let a = frame.stack.pop();
                let b = frame.stack.pop();
                frame.stack.push(a.wrapping_sub(b));
                Action::Continue
            }
            DIV => {
                let a = frame.stack.pop();
                let b = frame.stack.pop();
                frame
                    .stack
                    .push(if b == U256::ZERO { U256::ZERO } else { a.wrapping_div(b) });
                Action::Continue
            }
            SDIV => {
                let a = frame.stack.pop_i256();
                let b = frame.stack.pop_i256();
                frame
                    .stack
                    .push_i256(if b == I256::ZERO { I256::ZERO } else { a.wrapping_div(b) });
                Action::Continue
            }
            MOD => {
                let a = frame.stack.pop();
                let b = frame.stack.pop();
                frame
                    .stack
                    .push(if b == U256::ZERO { U256::ZERO } else { a.wrapping_rem(b) });
                Action::Continue
            }
            SMOD => {
                let a = frame.stack.pop_i256();
                let b = frame.stack.pop_i256();
                frame
                    .stack
                    .push_i256(if b == I256::ZERO { I256::ZERO } else { a.wrapping_rem(b) });
                Action::Continue
            }
            ADDMOD => {
                let a = frame.stack.pop();
                let b = frame.stack.pop();
                let n = frame.stack.pop();
                frame.stack.push(addmod(a, b, n));
                Action::Continue
            }
            MULMOD => {
                let a = frame.stack.pop();
                let b = frame.stack.pop();
                let n = frame.stack.pop();
                frame.stack.push(mulmod(a, b, n));
                Action::Continue
            }
            EXP => {
                let base = frame.stack.pop();
                let exponent = frame.stack.pop();
                let byte_count = i64::from((256 - exponent.leading_zeros() + 7) / 8);
                if !frame.use_gas(gas::G_EXP_BYTE * byte_count) {
                    return Ok(Action::Fail(StatusCode::OutOfGas));
                }
                frame.stack.push(exp_by_squaring(base, exponent));
                Action::Continue
            }
            SIGNEXTEND => {
                let position = frame.stack.pop();
                let value = frame.stack.pop();
                let result = if position < U256::from(31u8) {
                    let bit = position.as_u64() * 8 + 7;
                    let mask = (U256::ONE << bit) - 1;
                    if value & (U256::ONE << bit) != U256::ZERO {
                        value | !mask
                    } else {
                        value & mask
                    }
                } else {
                    value
                };
                frame.stack.push(result);
                Action::Continue
            }
            LT => {
                let a = frame.stack.pop();
                let b = frame.stack.pop();
                frame.stack.push_bool(a < b);
                Action::Continue
            }
            GT => {
                let a = frame.stack.pop();
                let b = frame.stack.pop();
                frame.stack.push_bool(a > b);
                Action::Continue
            }
            SLT => {
                let a = frame.stack.pop_i256();
                let b = frame.stack.pop_i256();
                frame.stack.push_bool(a < b);
                Action::Continue
            }
            SGT => {
                let a = frame.stack.pop_i256();
                let b = frame.stack.pop_i256();
                frame.stack.push_bool(a > b);
                Action::Continue
            }
            EQ => {
                let a = frame.stack.pop();
                let b = frame.stack.pop();
                frame.stack.push_bool(a == b);
                Action::Continue
            }
            ISZERO => {
                let a = frame.stack.pop();
                frame.stack.push_bool(a == U256::ZERO);
                Action::Continue
            }
            AND => {
                let a = frame.stack.pop();
                let b = frame.stack.pop();
                frame.stack.push(a & b);
                Action::Continue
            }
            OR => {
                let a = frame.stack.pop();
                let b = frame.stack.pop();
                frame.stack.push(a | b);
                Action::Continue
            }
            XOR => {
                let a = frame.stack.pop();
                let b = frame.stack.pop();
                frame.stack.push(a ^ b);
                Action::Continue
            }
            NOT => {
                let a = frame.stack.pop();
                frame.stack.push(!a);
                Action::Continue
            }
            BYTE => {
                let index = frame.stack.pop();
                let value = frame.stack.pop();
                let result = if index < U256::from(32u8) {
                    U256::from(value.to_be_bytes()[index.as_u64() as usize])
                } else {
                    U256::ZERO
                };
                frame.stack.push(result);
                Action::Continue
            }
            SHL => {
                let shift = frame.stack.pop();
                let value = frame.stack.pop();
                frame.stack.push(if shift >= U256::from(256u16) {
                    U256::ZERO
                } else {
                    value << shift.as_u64()
                });
                Action::Continue
            }
            SHR => {
                let shift = frame.stack.pop();
                let value = frame.stack.pop();
                frame.stack.push(if shift >= U256::from(256u16) {
                    U256::ZERO
                } else {
                    value >> shift.as_u64()
                });
                Action::Continue
            }
            SAR => {
                let shift = frame.stack.pop();
                let value = frame.stack.pop_i256();
                let result = if shift >= U256::from(256u16) {
                    if value < I256::ZERO { I256::MINUS_ONE } else { I256::ZERO }
                } else {
                    value >> shift.as_u64()
                };
                frame.stack.push_i256(result);
                Action::Continue
            }
            KECCAK256 => {
                let offset = frame.stack.pop_usize();
                let len = frame.stack.pop_usize();
                let words = i64::try_from(gas::to_words(len as u64)).unwrap_or(i64::MAX / 8);
                if !frame.use_gas(gas::G_SHA3_WORD * words) || !frame.charge_memory(offset, len) {
                    return Ok(Action::Fail(StatusCode::OutOfGas));
                }
                let hash = keccak256(&frame.memory.read(offset, len));
                frame.stack.push(U256::from_be_bytes(hash));
                Action::Continue
            }
            ADDRESS => {
                frame.stack.push(address_to_u256(&message.recipient));
                Action::Continue
            }
            BALANCE => {
                let address = u256_to_address(frame.stack.pop());
                let balance = self.state.balance(&address)?;
                frame.stack.push(balance);
                Action::Continue
            }
            ORIGIN => {
                frame.stack.push(address_to_u256(&self.origin));
                Action::Continue
            }
            CALLER => {
                frame.stack.push(address_to_u256(&message.sender));
                Action::Continue
            }
            CALLVALUE => {
                frame.stack.push(message.value);
                Action::Continue
            }
            CALLDATALOAD => {
                let offset = frame.stack.pop_usize();
                let mut word = [0u8; 32];
                for (i, byte) in word.iter_mut().enumerate() {
                    *byte = message.input.get(offset.saturating_add(i)).copied().unwrap_or(0);
                }
                frame.stack.push(U256::from_be_bytes(word));
                Action::Continue
            }
            CALLDATASIZE => {
                frame.stack.push(U256::from(message.input.len() as u64));
                Action::Continue
            }
            CALLDATACOPY | CODECOPY | RETURNDATACOPY => {
                let offset = frame.stack.pop_usize();
                let source_offset = frame.stack.pop_usize();
                let len = frame.stack.pop_usize();
                let words = i64::try_from(gas::to_words(len as u64)).unwrap_or(i64::MAX / 8);
                if !frame.use_gas(gas::G_COPY_WORD * words) || !frame.charge_memory(offset, len) {
                    return Ok(Action::Fail(StatusCode::OutOfGas));
                }
                match op {
                    CALLDATACOPY => {
                        frame
                            .memory
                            .copy_padded(offset, &message.input, source_offset, len);
                    }
                    CODECOPY => frame.memory.copy_padded(offset, code, source_offset, len),
                    _ => {
                        if source_offset.saturating_add(len) > frame.return_data.len() {
                            return Ok(Action::Fail(StatusCode::OtherFailure));
                        }
                        let data = frame.return_data.clone();
                        frame.memory.copy_padded(offset, &data, source_offset, len);
                    }
                }
                Action::Continue
            }
            CODESIZE => {
                frame.stack.push(U256::from(code.len() as u64));
                Action::Continue
            }
            GASPRICE => {
                frame.stack.push(self.gas_price);
                Action::Continue
            }
            EXTCODESIZE => {
                let address = u256_to_address(frame.stack.pop());
                let size = self.state.code(&address)?.len();
                frame.stack.push(U256::from(size as u64));
                Action::Continue
            }
            EXTCODECOPY => {
                let address = u256_to_address(frame.stack.pop());
                let offset = frame.stack.pop_usize();
                let source_offset = frame.stack.pop_usize();
                let len = frame.stack.pop_usize();
                let words = i64::try_from(gas::to_words(len as u64)).unwrap_or(i64::MAX / 8);
                if !frame.use_gas(gas::G_COPY_WORD * words) || !frame.charge_memory(offset, len) {
                    return Ok(Action::Fail(StatusCode::OutOfGas));
                }
                let external = self.state.code(&address)?;
                frame.memory.copy_padded(offset, &external, source_offset, len);
                Action::Continue
            }
            RETURNDATASIZE => {
                frame.stack.push(U256::from(frame.return_data.len() as u64));
                Action::Continue
            }
            EXTCODEHASH => {
                let address = u256_to_address(frame.stack.pop());
                let result = if self.state.exists(&address)? {
                    U256::from_be_bytes(self.state.code_hash(&address)?)
                } else {
                    U256::ZERO
                };
                frame.stack.push(result);
                Action::Continue
            }
            BLOCKHASH => {
                // Header chain access is outside the machine's state view.
                let _ = frame.stack.pop();
                frame.stack.push(U256::ZERO);
                Action::Continue
            }
            COINBASE => {
                frame.stack.push(address_to_u256(&self.env.coinbase));
                Action::Continue
            }
            TIMESTAMP => {
                frame.stack.push(U256::from(self.env.timestamp));
                Action::Continue
            }
            NUMBER => {
                frame.stack.push(U256::from(self.env.number));
                Action::Continue
            }
            DIFFICULTY => {
                frame.stack.push(self.env.difficulty);
                Action::Continue
            }
            GASLIMIT => {
                frame.stack.push(U256::from(self.env.gas_limit));
                Action::Continue
            }
            CHAINID => {
                frame.stack.push(U256::from(self.env.chain_id));
                Action::Continue
            }
            SELFBALANCE => {
                let balance = self.state.balance(&message.recipient)?;
                frame.stack.push(balance);
                Action::Continue
            }
            BASEFEE => {
                frame.stack.push(self.env.base_fee.unwrap_or(U256::ZERO));
                Action::Continue
            }
            POP => {
                let _ = frame.stack.pop();
                Action::Continue
            }
            MLOAD => {
                let offset = frame.stack.pop_usize();
                if !frame.charge_memory(offset, 32) {
                    return Ok(Action::Fail(StatusCode::OutOfGas));
                }
                let word = frame.memory.read_word(offset);
                frame.stack.push(word);
                Action::Continue
            }
            MSTORE => {
                let offset = frame.stack.pop_usize();
                let value = frame.stack.pop();
                if !frame.charge_memory(offset, 32) {
                    return Ok(Action::Fail(StatusCode::OutOfGas));
                }
                frame.memory.write_word(offset, value);
                Action::Continue
            }
            MSTORE8 => {
                let offset = frame.stack.pop_usize();
                let value = frame.stack.pop();
                if !frame.charge_memory(offset, 1) {
                    return Ok(Action::Fail(StatusCode::OutOfGas));
                }
                frame.memory.write_byte(offset, value.to_be_bytes()[31]);
                Action::Continue
            }
            SLOAD => {
                let key = frame.stack.pop();
                let value = self.state.storage(&message.recipient, &key)?;
                frame.stack.push(value);
                Action::Continue
            }
            SSTORE => self.op_sstore(frame, message)?,
            JUMP => {
                let target = frame.stack.pop_usize();
                Action::Jump(target)
            }
            JUMPI => {
                let target = frame.stack.pop_usize();
                let condition = frame.stack.pop();
                if condition == U256::ZERO {
                    Action::Continue
                } else {
                    Action::Jump(target)
                }
            }
            PC => {
                frame.stack.push(U256::from(frame.pc as u64));
                Action::Continue
            }
            MSIZE => {
                frame.stack.push(U256::from(frame.memory.len() as u64));
                Action::Continue
            }
            GAS => {
                frame.stack.push(U256::from(frame.gas.unsigned_abs()));
                Action::Continue
            }
            JUMPDEST => Action::Continue,
            PUSH0 => {
                frame.stack.push(U256::ZERO);
                Action::Continue
            }
            PUSH1..=PUSH32 => {
                let count = (op - PUSH1) as usize + 1;
                let mut word = [0u8; 32];
                for i in 0..count {
                    word[32 - count + i] = code.get(frame.pc + 1 + i).copied().unwrap_or(0);
                }
                frame.stack.push(U256::from_be_bytes(word));
                Action::Advance(count + 1)
            }
            DUP1..=DUP16 => {
                frame.stack.dup((op - DUP1) as usize + 1);
                Action::Continue
            }
            SWAP1..=SWAP16 => {
                frame.stack.swap((op - SWAP1) as usize + 1);
                Action::Continue
            }
            LOG0..=LOG4 => {
                let offset = frame.stack.pop_usize();
                let len = frame.stack.pop_usize();
                let data_cost = gas::G_LOG_DATA * i64::try_from(len).unwrap_or(i64::MAX / 8);
                if !frame.use_gas(data_cost) || !frame.charge_memory(offset, len) {
                    return Ok(Action::Fail(StatusCode::OutOfGas));
                }
                let mut topics = Vec::with_capacity((op - LOG0) as usize);
                for _ in 0..(op - LOG0) {
                    topics.push(frame.stack.pop());
                }
                let data = frame.memory.read(offset, len);
                self.state.add_log(Log {
                    address: message.recipient,
                    topics,
                    data,
                });
                Action::Continue
            }
            CREATE | CREATE2 => self.op_create(frame, message, op)?,
            CALL | CALLCODE | DELEGATECALL | STATICCALL => self.op_call(frame, message, op)?,
            RETURN => {
                let offset = frame.stack.pop_usize();
                let len = frame.stack.pop_usize();
                if !frame.charge_memory(offset, len) {
                    return Ok(Action::Fail(StatusCode::OutOfGas));
                }
                Action::Return(frame.memory.read(offset, len))
            }
            REVERT => {
                let offset = frame.stack.pop_usize();
                let len = frame.stack.pop_usize();
                if !frame.charge_memory(offset, len) {
                    return Ok(Action::Fail(StatusCode::OutOfGas));
                }
                Action::Revert(frame.memory.read(offset, len))
            }
            SELFDESTRUCT => {
                let beneficiary = u256_to_address(frame.stack.pop());
                self.state.selfdestruct(&message.recipient, &beneficiary)?;
                if self.revision < Revision::London {
                    self.refund += 24_000;
                }
                Action::SelfDestruct
            }
            _ => Action::Fail(StatusCode::UndefinedInstruction),
        };
        Ok(action)
    }

    fn op_sstore(&mut self, frame: &mut Frame, message: &Message) -> Result<Action, StateError> {
        let key = frame.stack.pop();
        let value = frame.stack.pop();
        let current = self.state.storage(&message.recipient, &key)?;

        let cost = if current == U256::ZERO && value != U256::ZERO {
            gas::G_SSTORE_SET
        } else {
            gas::G_SSTORE_RESET
        };
        if !frame.use_gas(cost) {
            return Ok(Action::Fail(StatusCode::OutOfGas));
        }
        if current != U256::ZERO && value == U256::ZERO {
            self.refund += gas::R_SSTORE_CLEAR;
        }
        self.state.set_storage(&message.recipient, &key, value)?;
        Ok(Action::Continue)
    }

    fn op_create(
        &mut self,
        frame: &mut Frame,
        message: &Message,
        op: u8,
    ) -> Result<Action, StateError> {
        let value = frame.stack.pop();
        let offset = frame.stack.pop_usize();
        let len = frame.stack.pop_usize();
        let salt = if op == CREATE2 { Some(frame.stack.pop()) } else { None };

        if !frame.charge_memory(offset, len) {
            return Ok(Action::Fail(StatusCode::OutOfGas));
        }
        if op == CREATE2 {
            let words = i64::try_from(gas::to_words(len as u64)).unwrap_or(i64::MAX / 8);
            if !frame.use_gas(gas::G_SHA3_WORD * words) {
                return Ok(Action::Fail(StatusCode::OutOfGas));
            }
        }

        let init = frame.memory.read(offset, len);
        frame.return_data.clear();

        if message.depth >= 1024 || self.state.balance(&message.recipient)? < value {
            frame.stack.push(U256::ZERO);
            return Ok(Action::Continue);
        }

        let nonce = self.state.nonce(&message.recipient)?;
        self.state.increment_nonce(&message.recipient)?;
        let new_address = match salt {
            Some(salt) => {
                Address::from_create2(&message.recipient, &salt.to_be_bytes(), &init)
            }
            None => Address::from_create(&message.recipient, nonce),
        };

        let forwarded = frame.gas - frame.gas / 64;
        frame.gas -= forwarded;

        let child = Message {
            kind: if op == CREATE2 { CallKind::Create2 } else { CallKind::Create },
            is_static: false,
            depth: message.depth + 1,
            gas: forwarded,
            recipient: new_address,
            sender: message.recipient,
            code_address: new_address,
            input: Vec::new(),
            value,
        };

        let snapshot = self.state.take_snapshot();
        let result = self.run_message(&child, init)?;
        frame.gas += result.gas_left;

        if result.status.is_success() {
            self.state.discard_snapshot(snapshot);
            frame.stack.push(address_to_u256(&new_address));
        } else {
            self.state.revert_to_snapshot(snapshot);
            frame.stack.push(U256::ZERO);
            if result.status == StatusCode::Revert {
                frame.return_data = result.output;
            }
        }
        Ok(Action::Continue)
    }

    fn op_call(
        &mut self,
        frame: &mut Frame,
        message: &Message,
        op: u8,
    ) -> Result<Action, StateError> {
        let gas_requested = frame.stack.pop();
        let to = u256_to_address(frame.stack.pop());
        let value = if matches!(op, CALL | CALLCODE) { frame.stack.pop() } else { U256::ZERO };
        let in_offset = frame.stack.pop_usize();
        let in_len = frame.stack.pop_usize();
        let out_offset = frame.stack.pop_usize();
        let out_len = frame.stack.pop_usize();

        if !frame.charge_memory(in_offset, in_len) || !frame.charge_memory(out_offset, out_len) {
            return Ok(Action::Fail(StatusCode::OutOfGas));
        }

        if message.is_static && op == CALL && value > U256::ZERO {
            return Ok(Action::Fail(StatusCode::OtherFailure));
        }

        if value > U256::ZERO {
            if !frame.use_gas(gas::G_CALL_VALUE) {
                return Ok(Action::Fail(StatusCode::OutOfGas));
            }
            if op == CALL && !self.state.exists(&to)? && !frame.use_gas(gas::G_NEW_ACCOUNT) {
                return Ok(Action::Fail(StatusCode::OutOfGas));
            }
        }

        let available = frame.gas - frame.gas / 64;
        let requested = if gas_requested > U256::from(i64::MAX.unsigned_abs()) {
            i64::MAX
        } else {
            i64::try_from(gas_requested.as_u64()).unwrap_or(i64::MAX)
        };
        let mut forwarded = requested.min(available);
        frame.gas -= forwarded;
        if value > U256::ZERO {
            forwarded += gas::G_CALL_STIPEND;
        }

        let input = frame.memory.read(in_offset, in_len);
        frame.return_data.clear();

        let transfers_value = op == CALL && value > U256::ZERO;
        if message.depth >= 1024
            || (transfers_value && self.state.balance(&message.recipient)? < value)
        {
            frame.gas += forwarded;
            frame.stack.push(U256::ZERO);
            return Ok(Action::Continue);
        }

        let child = match op {
            CALL => Message {
                kind: CallKind::Call,
                is_static: message.is_static,
                depth: message.depth + 1,
                gas: forwarded,
                recipient: to,
                sender: message.recipient,
                code_address: to,
                input,
                value,
            },
            CALLCODE => Message {
                kind: CallKind::CallCode,
                is_static: message.is_static,
                depth: message.depth + 1,
                gas: forwarded,
                recipient: message.recipient,
                sender: message.recipient,
                code_address: to,
                input,
                value,
            },
            DELEGATECALL => Message {
                kind: CallKind::DelegateCall,
                is_static: message.is_static,
                depth: message.depth + 1,
                gas: forwarded,
                recipient: message.recipient,
                sender: message.sender,
                code_address: to,
                input,
                value: message.value,
            },
            _ => Message {
                kind: CallKind::Call,
                is_static: true,
                depth: message.depth + 1,
                gas: forwarded,
                recipient: to,
                sender: message.recipient,
                code_address: to,
                input,
                value: U256::ZERO,
            },
        };

        let code = self.state.code(&to)?;
        let snapshot = self.state.take_snapshot();
        let result = self.run_message(&child, code)?;
        if result.status.is_success() {
            self.state.discard_snapshot(snapshot);
        } else {
            self.state.revert_to_snapshot(snapshot);
        }

        frame.gas += result.gas_left;
        frame.return_data = result.output.clone();
        let copy_len = out_len.min(result.output.len());
        if copy_len > 0 {
            frame.memory.write(out_offset, &result.output[..copy_len]);
        }
        frame.stack.push_bool(result.status.is_success());
        Ok(Action::Continue)
    }
}
