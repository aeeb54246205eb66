#![allow(clippy::too_many_lines)]

use once_cell::sync::Lazy;

use crate::revision::Revision;

pub mod opcode {
    pub const STOP: u8 = 0x00;
    pub const ADD: u8 = 0x01;
    pub const MUL: u8 = 0x02;
    pub const SUB: u8 = 0x03;
    pub const DIV: u8 = 0x04;
    pub const SDIV: u8 = 0x05;
    pub const MOD: u8 = 0x06;
    pub const SMOD: u8 = 0x07;
    pub const ADDMOD: u8 = 0x08;
    pub const MULMOD: u8 = 0x09;
    pub const EXP: u8 = 0x0A;
    pub const SIGNEXTEND: u8 = 0x0B;

    pub const LT: u8 = 0x10;
    pub const GT: u8 = 0x11;
    pub const SLT: u8 = 0x12;
    pub const SGT: u8 = 0x13;
    pub const EQ: u8 = 0x14;
    pub const ISZERO: u8 = 0x15;
    pub const AND: u8 = 0x16;
    pub const OR: u8 = 0x17;
    pub const XOR: u8 = 0x18;
    pub const NOT: u8 = 0x19;
    pub const BYTE: u8 = 0x1A;
    pub const SHL: u8 = 0x1B;
    pub const SHR: u8 = 0x1C;
    pub const SAR: u8 = 0x1D;

    pub const KECCAK256: u8 = 0x20;

    pub const ADDRESS: u8 = 0x30;
    pub const BALANCE: u8 = 0x31;
    pub const ORIGIN: u8 = 0x32;
    pub const CALLER: u8 = 0x33;
    pub const CALLVALUE: u8 = 0x34;
    pub const CALLDATALOAD: u8 = 0x35;
    pub const CALLDATASIZE: u8 = 0x36;
    pub const CALLDATACOPY: u8 = 0x37;
    pub const CODESIZE: u8 = 0x38;
    pub const CODECOPY: u8 = 0x39;
    pub const GASPRICE: u8 = 0x3A;
    pub const EXTCODESIZE: u8 = 0x3B;
    pub const EXTCODECOPY: u8 = 0x3C;
    pub const RETURNDATASIZE: u8 = 0x3D;
    pub const RETURNDATACOPY: u8 = 0x3E;
    pub const EXTCODEHASH: u8 = 0x3F;
    pub const BLOCKHASH: u8 = 0x40;
    pub const COINBASE: u8 = 0x41;
    pub const TIMESTAMP: u8 = 0x42;
    pub const NUMBER: u8 = 0x43;
    pub const DIFFICULTY: u8 = 0x44;
    pub const GASLIMIT: u8 = 0x45;
    pub const CHAINID: u8 = 0x46;
    pub const SELFBALANCE: u8 = 0x47;
    pub const BASEFEE: u8 = 0x48;

    pub const POP: u8 = 0x50;
    pub const MLOAD: u8 = 0x51;
    pub const MSTORE: u8 = 0x52;
    pub const MSTORE8: u8 = 0x53;
    pub const SLOAD: u8 = 0x54;
    pub const SSTORE: u8 = 0x55;
    pub const JUMP: u8 = 0x56;
    pub const JUMPI: u8 = 0x57;
    pub const PC: u8 = 0x58;
    pub const MSIZE: u8 = 0x59;
    pub const GAS: u8 = 0x5A;
    pub const JUMPDEST: u8 = 0x5B;

    pub const PUSH0: u8 = 0x5F;
    pub const PUSH1: u8 = 0x60;
    pub const PUSH32: u8 = 0x7F;

    pub const DUP1: u8 = 0x80;
    pub const DUP16: u8 = 0x8F;

    pub const SWAP1: u8 = 0x90;
    pub const SWAP16: u8 = 0x9F;

    pub const LOG0: u8 = 0xA0;
    pub const LOG4: u8 = 0xA4;

    pub const CREATE: u8 = 0xF0;
    pub const CALL: u8 = 0xF1;
    pub const CALLCODE: u8 = 0xF2;
    pub const RETURN: u8 = 0xF3;
    pub const DELEGATECALL: u8 = 0xF4;
    pub const CREATE2: u8 = 0xF5;

    pub const STATICCALL: u8 = 0xFA;

    pub const REVERT: u8 = 0xFD;
    pub const INVALID: u8 = 0xFE;

    pub const SELFDESTRUCT: u8 = 0xFF;
}

type OpName = Option<&'static str>;

const LATEST_NAMES: [OpName; 256] = {
    let mut names: [OpName; 256] = [None; 256];

    names[0x00] = Some("STOP");
    names[0x01] = Some("ADD");
    names[0x02] = Some("MUL");
    names[0x03] = Some("SUB");
    names[0x04] = Some("DIV");
    names[0x05] = Some("SDIV");
    names[0x06] = Some("MOD");
    names[0x07] = Some("SMOD");
    names[0x08] = Some("ADDMOD");
    names[0x09] = Some("MULMOD");
    names[0x0A] = Some("EXP");
    names[0x0B] = Some("SIGNEXTEND");

    names[0x10] = Some("LT");
    names[0x11] = Some("GT");
    names[0x12] = Some("SLT");
    names[0x13] = Some("SGT");
    names[0x14] = Some("EQ");
    names[0x15] = Some("ISZERO");
    names[0x16] = Some("AND");
    names[0x17] = Some("OR");
    names[0x18] = Some("XOR");
    names[0x19] = Some("NOT");
    names[0x1A] = Some("BYTE");
    names[0x1B] = Some("SHL");
    names[0x1C] = Some("SHR");
    names[0x1D] = Some("SAR");

    names[0x20] = Some("KECCAK256");

    names[0x30] = Some("ADDRESS");
    names[0x31] = Some("BALANCE");
    names[0x32] = Some("ORIGIN");
    names[0x33] = Some("CALLER");
    names[0x34] = Some("CALLVALUE");
    names[0x35] = Some("CALLDATALOAD");
    names[0x36] = Some("CALLDATASIZE");
    names[0x37] = Some("CALLDATACOPY");
    names[0x38] = Some("CODESIZE");
    names[0x39] = Some("CODECOPY");
    names[0x3A] = Some("GASPRICE");
    names[0x3B] = Some("EXTCODESIZE");
    names[0x3C] = Some("EXTCODECOPY");
    names[0x3D] = Some("RETURNDATASIZE");
    names[0x3E] = Some("RETURNDATACOPY");
    names[0x3F] = Some("EXTCODEHASH");
    names[0x40] = Some("BLOCKHASH");
    names[0x41] = Some("COINBASE");
    names[0x42] = Some("TIMESTAMP");
    names[0x43] = Some("NUMBER");
    names[0x44] = Some("PREVRANDAO");
    names[0x45] = Some("GASLIMIT");
    names[0x46] = Some("CHAINID");
    names[0x47] = Some("SELFBALANCE");
    names[0x48] = Some("BASEFEE");

    names[0x50] = Some("POP");
    names[0x51] = Some("MLOAD");
    names[0x52] = Some("MSTORE");
    names[0x53] = Some("MSTORE8");
    names[0x54] = Some("SLOAD");
    names[0x55] = Some("SSTORE");
    names[0x56] = Some("JUMP");
    names[0x57] = Some("JUMPI");
    names[0x58] = Some("PC");
    names[0x59] = Some("MSIZE");
    names[0x5A] = Some("GAS");
    names[0x5B] = Some("JUMPDEST");

    names[0x5F] = Some("PUSH0");
    names[0x60] = Some("PUSH1");
    names[0x61] = Some("PUSH2");
    names[0x62] = Some("PUSH3");
    names[0x63] = Some("PUSH4");
    names[0x64] = Some("PUSH5");
    names[0x65] = Some("PUSH6");
    names[0x66] = Some("PUSH7");
    names[0x67] = Some("PUSH8");
    names[0x68] = Some("PUSH9");
    names[0x69] = Some("PUSH10");
    names[0x6A] = Some("PUSH11");
    names[0x6B] = Some("PUSH12");
    names[0x6C] = Some("PUSH13");
    names[0x6D] = Some("PUSH14");
    names[0x6E] = Some("PUSH15");
    names[0x6F] = Some("PUSH16");
    names[0x70] = Some("PUSH17");
    names[0x71] = Some("PUSH18");
    names[0x72] = Some("PUSH19");
    names[0x73] = Some("PUSH20");
    names[0x74] = Some("PUSH21");
    names[0x75] = Some("PUSH22");
    names[0x76] = Some("PUSH23");
    names[0x77] = Some("PUSH24");
    names[0x78] = Some("PUSH25");
    names[0x79] = Some("PUSH26");
    names[0x7A] = Some("PUSH27");
    names[0x7B] = Some("PUSH28");
    names[0x7C] = Some("PUSH29");
    names[0x7D] = Some("PUSH30");
    names[0x7E] = Some("PUSH31");
    names[0x7F] = Some("PUSH32");

    names[0x80] = Some("DUP1");
    names[0x81] = Some("DUP2");
    names[0x82] = Some("DUP3");
    names[0x83] = Some("DUP4");
    names[0x84] = Some("DUP5");
    names[0x85] = Some("DUP6");
    names[0x86] = Some("DUP7");
    names[0x87] = Some("DUP8");
    names[0x88] = Some("DUP9");
    names[0x89] = Some("DUP10");
    names[0x8A] = Some("DUP11");
    names[0x8B] = Some("DUP12");
    names[0x8C] = Some("DUP13");
    names[0x8D] = Some("DUP14");
    names[0x8E] = Some("DUP15");
    names[0x8F] = Some("DUP16");

    names[0x90] = Some("SWAP1");
    names[0x91] = Some("SWAP2");
    names[0x92] = Some("SWAP3");
    names[0x93] = Some("SWAP4");
    names[0x94] = Some("SWAP5");
    names[0x95] = Some("SWAP6");
    names[0x96] = Some("SWAP7");
    names[0x97] = Some("SWAP8");
    names[0x98] = Some("SWAP9");
    names[0x99] = Some("SWAP10");
    names[0x9A] = Some("SWAP11");
    names[0x9B] = Some("SWAP12");
    names[0x9C] = Some("SWAP13");
    names[0x9D] = Some("SWAP14");
    names[0x9E] = Some("SWAP15");
    names[0x9F] = Some("SWAP16");

    names[0xA0] = Some("LOG0");
    names[0xA1] = Some("LOG1");
    names[0xA2] = Some("LOG2");
    names[0xA3] = Some("LOG3");
    names[0xA4] = Some("LOG4");

    names[0xF0] = Some("CREATE");
    names[0xF1] = Some("CALL");
    names[0xF2] = Some("CALLCODE");
    names[0xF3] = Some("RETURN");
    names[0xF4] = Some("DELEGATECALL");
    names[0xF5] = Some("CREATE2");

    names[0xFA] = Some("STATICCALL");

    names[0xFD] = Some("REVERT");
    names[0xFE] = Some("INVALID");

    names[0xFF] = Some("SELFDESTRUCT");

    names
};

/// The revision an instruction first became available in.
fn introduced_in(op: u8) -> Revision {
    use opcode::*;

    match op {
        DELEGATECALL => Revision::Homestead,
        RETURNDATASIZE | RETURNDATACOPY | REVERT | STATICCALL => Revision::Byzantium,
        SHL | SHR | SAR | EXTCODEHASH | CREATE2 => Revision::Constantinople,
        CHAINID | SELFBALANCE => Revision::Istanbul,
        BASEFEE => Revision::London,
        PUSH0 => Revision::Shanghai,
        _ => Revision::Frontier,
    }
}

/// The 256-entry instruction name table for `revision`. Tables are built once
/// per revision and shared process-wide.
pub fn instruction_names(revision: Revision) -> &'static [OpName; 256] {
    static TABLES: Lazy<Vec<[OpName; 256]>> = Lazy::new(|| {
        Revision::ALL
            .iter()
            .map(|revision| {
                let mut names = LATEST_NAMES;
                for (op, name) in names.iter_mut().enumerate() {
                    #[allow(clippy::cast_possible_truncation)]
                    if introduced_in(op as u8) > *revision {
                        *name = None;
                    }
                }
                if *revision < Revision::Paris {
                    names[opcode::DIFFICULTY as usize] = Some("DIFFICULTY");
                }
                names
            })
            .collect()
    });
    &TABLES[Revision::ALL
        .iter()
        .position(|candidate| *candidate == revision)
        .unwrap_or(Revision::ALL.len() - 1)]
}

/// Instruction name, or the diagnostic form for undefined opcodes. Leading
/// zero of the hex byte is stripped below 0x10.
#[must_use]
pub fn op_name(names: &[OpName; 256], op: u8) -> String {
    match names[op as usize] {
        Some(name) => name.to_owned(),
        None => format!("opcode 0x{op:x} not defined"),
    }
}

/// True when the instruction exists in `revision`.
#[must_use]
pub fn is_defined(revision: Revision, op: u8) -> bool {
    instruction_names(revision)[op as usize].is_some()
}
