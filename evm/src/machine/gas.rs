//! Constant gas schedule of the replay machine, close to the Istanbul
//! fee table. Warm/cold account tracking is intentionally not modeled; the
//! tracers treat every cost as opaque.

use crate::opcode_table::opcode::*;
use crate::revision::Revision;

pub const G_ZERO: i64 = 0;
pub const G_BASE: i64 = 2;
pub const G_VERY_LOW: i64 = 3;
pub const G_LOW: i64 = 5;
pub const G_MID: i64 = 8;
pub const G_HIGH: i64 = 10;
pub const G_JUMPDEST: i64 = 1;

pub const G_SLOAD: i64 = 800;
pub const G_BALANCE: i64 = 700;
pub const G_EXT_CODE: i64 = 700;
pub const G_BLOCKHASH: i64 = 20;
pub const G_SHA3: i64 = 30;
pub const G_SHA3_WORD: i64 = 6;
pub const G_COPY_WORD: i64 = 3;
pub const G_EXP: i64 = 10;
pub const G_EXP_BYTE: i64 = 50;
pub const G_LOG: i64 = 375;
pub const G_LOG_TOPIC: i64 = 375;
pub const G_LOG_DATA: i64 = 8;
pub const G_CREATE: i64 = 32_000;
pub const G_CALL: i64 = 700;
pub const G_CALL_VALUE: i64 = 9_000;
pub const G_CALL_STIPEND: i64 = 2_300;
pub const G_NEW_ACCOUNT: i64 = 25_000;
pub const G_SELFDESTRUCT: i64 = 5_000;
pub const G_SSTORE_SET: i64 = 20_000;
pub const G_SSTORE_RESET: i64 = 5_000;
pub const R_SSTORE_CLEAR: i64 = 15_000;
pub const G_CODE_DEPOSIT_BYTE: i64 = 200;

pub const TX_GAS: u64 = 21_000;
pub const TX_CREATE_GAS: u64 = 53_000;
pub const TX_DATA_ZERO_GAS: u64 = 4;
pub const TX_DATA_NON_ZERO_GAS_FRONTIER: u64 = 68;
pub const TX_DATA_NON_ZERO_GAS_ISTANBUL: u64 = 16;

pub const MAX_CODE_SIZE: usize = 24_576;

/// Static part of an instruction's cost. Dynamic parts (memory growth,
/// copies, storage) are charged by the handlers.
#[must_use]
#[allow(clippy::match_same_arms)]
pub fn constant_cost(op: u8) -> i64 {
    match op {
        STOP | RETURN | REVERT | SSTORE | INVALID => G_ZERO,
        ADDRESS | ORIGIN | CALLER | CALLVALUE | CALLDATASIZE | CODESIZE | GASPRICE | COINBASE
        | TIMESTAMP | NUMBER | DIFFICULTY | GASLIMIT | RETURNDATASIZE | POP | PC | MSIZE | GAS
        | CHAINID | BASEFEE | PUSH0 => G_BASE,
        ADD | SUB | NOT | LT | GT | SLT | SGT | EQ | ISZERO | AND | OR | XOR | BYTE | SHL | SHR
        | SAR | CALLDATALOAD | MLOAD | MSTORE | MSTORE8 | CALLDATACOPY | CODECOPY
        | RETURNDATACOPY | PUSH1..=PUSH32 | DUP1..=DUP16 | SWAP1..=SWAP16 => G_VERY_LOW,
        MUL | DIV | SDIV | MOD | SMOD | SIGNEXTEND | SELFBALANCE => G_LOW,
        ADDMOD | MULMOD | JUMP => G_MID,
        JUMPI | EXP => G_HIGH,
        JUMPDEST => G_JUMPDEST,
        KECCAK256 => G_SHA3,
        SLOAD => G_SLOAD,
        BALANCE => G_BALANCE,
        EXTCODESIZE | EXTCODEHASH | EXTCODECOPY => G_EXT_CODE,
        BLOCKHASH => G_BLOCKHASH,
        LOG0..=LOG4 => G_LOG + i64::from(op - LOG0) * G_LOG_TOPIC,
        CREATE | CREATE2 => G_CREATE,
        CALL | CALLCODE | DELEGATECALL | STATICCALL => G_CALL,
        SELFDESTRUCT => G_SELFDESTRUCT,
        _ => G_ZERO,
    }
}

/// Total cost of a memory of `words` 32-byte words.
#[must_use]
pub fn memory_cost(words: u64) -> i64 {
    let words = i64::try_from(words).unwrap_or(i64::MAX / 1024);
    words.saturating_mul(3).saturating_add(
        words.saturating_mul(words) / 512,
    )
}

/// Word count covering `len` bytes.
#[must_use]
pub fn to_words(len: u64) -> u64 {
    (len + 31) / 32
}

/// Per-byte calldata cost of the transaction intrinsic gas.
#[must_use]
pub fn data_gas(byte: u8, revision: Revision) -> u64 {
    if byte == 0 {
        TX_DATA_ZERO_GAS
    } else if revision >= Revision::Istanbul {
        TX_DATA_NON_ZERO_GAS_ISTANBUL
    } else {
        TX_DATA_NON_ZERO_GAS_FRONTIER
    }
}
