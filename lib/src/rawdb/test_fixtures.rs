//! Small canonical chain installed into a `MemoryDatabaseReader`: a genesis
//! hash with chain config, one head block holding a single signed
//! transaction, and the plain state backing it.

use ethnum::U256;
use traced_evm::state::AccountInfo;
use traced_evm::types::{keccak256, Address};

use crate::kv::MemoryDatabaseReader;
use crate::state::{encode_account, tables};
use crate::types::Transaction;

pub const HEAD_NUMBER: u64 = 100;
pub const CHAIN_ID: u64 = 5;

/// PUSH1 0x2a PUSH1 0x00 SSTORE STOP
pub const CONTRACT_CODE: [u8; 6] = [0x60, 0x2A, 0x60, 0x00, 0x55, 0x00];

pub struct ChainFixture {
    pub sender: Address,
    pub contract: Address,
    pub coinbase: Address,
    genesis_hash: [u8; 32],
    header_raw: Vec<u8>,
    header_hash: [u8; 32],
    tx_raw: Vec<u8>,
}

fn append_trimmed(stream: &mut rlp::RlpStream, value: U256) {
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|byte| *byte != 0).unwrap_or(32);
    stream.encoder().encode_value(&bytes[start..]);
}

fn signed_transaction(secret: &libsecp256k1::SecretKey, to: Address) -> Vec<u8> {
    let mut unsigned = Transaction {
        nonce: 0,
        gas_price: U256::from(7u8),
        gas_limit: 90_000,
        to: Some(to),
        value: U256::ZERO,
        data: Vec::new(),
        v: 35 + 2 * CHAIN_ID,
        ..Transaction::default()
    };

    let mut sighash_payload = rlp::RlpStream::new_list(9);
    sighash_payload.append(&unsigned.nonce);
    append_trimmed(&mut sighash_payload, unsigned.gas_price);
    sighash_payload.append(&unsigned.gas_limit);
    sighash_payload.append(&to);
    append_trimmed(&mut sighash_payload, unsigned.value);
    sighash_payload.append(&unsigned.data);
    sighash_payload.append(&CHAIN_ID);
    sighash_payload.append_empty_data();
    sighash_payload.append_empty_data();
    let sighash = keccak256(&sighash_payload.out());

    let message = libsecp256k1::Message::parse(&sighash);
    let (signature, recovery_id) = libsecp256k1::sign(&message, secret);
    unsigned.v = 35 + 2 * CHAIN_ID + u64::from(recovery_id.serialize());
    unsigned.r = U256::from_be_bytes(signature.r.b32());
    unsigned.s = U256::from_be_bytes(signature.s.b32());

    let mut raw = rlp::RlpStream::new_list(9);
    raw.append(&unsigned.nonce);
    append_trimmed(&mut raw, unsigned.gas_price);
    raw.append(&unsigned.gas_limit);
    raw.append(&to);
    append_trimmed(&mut raw, unsigned.value);
    raw.append(&unsigned.data);
    raw.append(&unsigned.v);
    append_trimmed(&mut raw, unsigned.r);
    append_trimmed(&mut raw, unsigned.s);
    raw.out().to_vec()
}

fn header_rlp(number: u64, coinbase: Address) -> Vec<u8> {
    let mut stream = rlp::RlpStream::new_list(15);
    stream.append(&vec![0x11u8; 32]); // parent hash
    stream.append(&vec![0x22u8; 32]); // ommers hash
    stream.append(&coinbase);
    stream.append(&vec![0x33u8; 32]); // state root
    stream.append(&vec![0x44u8; 32]); // transactions root
    stream.append(&vec![0x55u8; 32]); // receipts root
    stream.append(&vec![0u8; 256]); // bloom
    stream.append(&2_000_000u64); // difficulty
    stream.append(&number);
    stream.append(&8_000_000u64); // gas limit
    stream.append(&0u64); // gas used
    stream.append(&1_600_000_000u64); // timestamp
    stream.append(&Vec::<u8>::new()); // extra data
    stream.append(&vec![0u8; 32]); // mix hash
    stream.append(&vec![0u8; 8]); // nonce
    stream.out().to_vec()
}

impl ChainFixture {
    #[must_use]
    pub fn new() -> Self {
        let secret = libsecp256k1::SecretKey::parse(&[0x11; 32]).expect("valid test key");
        let public = libsecp256k1::PublicKey::from_secret_key(&secret);
        let sender_hash = keccak256(&public.serialize()[1..]);
        let sender = Address(*arrayref::array_ref![sender_hash, 12, 20]);
        let contract = Address([0x71; 20]);
        let coinbase = Address([0xC0; 20]);

        let header_raw = header_rlp(HEAD_NUMBER, coinbase);
        Self {
            sender,
            contract,
            coinbase,
            genesis_hash: [0xAA; 32],
            header_hash: keccak256(&header_raw),
            header_raw,
            tx_raw: signed_transaction(&secret, contract),
        }
    }

    #[must_use]
    pub fn head_number(&self) -> u64 {
        HEAD_NUMBER
    }

    #[must_use]
    pub fn tx_hash(&self) -> [u8; 32] {
        keccak256(&self.tx_raw)
    }

    pub fn install(&self, db: &mut MemoryDatabaseReader) {
        db.insert(
            tables::CANONICAL_HEADERS,
            0u64.to_be_bytes().to_vec(),
            self.genesis_hash.to_vec(),
        );
        db.insert(
            tables::CANONICAL_HEADERS,
            HEAD_NUMBER.to_be_bytes().to_vec(),
            self.header_hash.to_vec(),
        );
        db.insert(
            tables::CONFIG,
            self.genesis_hash.to_vec(),
            serde_json::json!({
                "chainId": CHAIN_ID,
                "homesteadBlock": 0,
                "eip150Block": 0,
                "eip155Block": 0,
                "byzantiumBlock": 0,
                "constantinopleBlock": 0,
                "petersburgBlock": 0,
                "istanbulBlock": 0,
            })
            .to_string()
            .into_bytes(),
        );

        let mut block_key = HEAD_NUMBER.to_be_bytes().to_vec();
        block_key.extend_from_slice(&self.header_hash);
        db.insert(tables::HEADERS, block_key.clone(), self.header_raw.clone());

        let mut body = rlp::RlpStream::new_list(2);
        body.begin_list(1);
        body.append_raw(&self.tx_raw, 1);
        body.begin_list(0);
        db.insert(tables::BLOCK_BODIES, block_key, body.out().to_vec());

        db.insert(
            tables::HEADER_NUMBERS,
            self.header_hash.to_vec(),
            HEAD_NUMBER.to_be_bytes().to_vec(),
        );
        db.insert(
            tables::TX_LOOKUP,
            self.tx_hash().to_vec(),
            vec![u8::try_from(HEAD_NUMBER).expect("test head fits one byte")],
        );

        // Live state: a funded sender and the contract with its code.
        db.insert(
            tables::PLAIN_STATE,
            self.sender.as_bytes().to_vec(),
            encode_account(&AccountInfo {
                nonce: 0,
                balance: U256::from(10u8).pow(21),
                ..AccountInfo::default()
            }),
        );
        let code_hash = keccak256(&CONTRACT_CODE);
        db.insert(
            tables::PLAIN_STATE,
            self.contract.as_bytes().to_vec(),
            encode_account(&AccountInfo {
                nonce: 1,
                balance: U256::ZERO,
                code_hash,
                incarnation: 1,
            }),
        );
        db.insert(tables::CODE, code_hash.to_vec(), CONTRACT_CODE.to_vec());
    }
}

impl Default for ChainFixture {
    fn default() -> Self {
        Self::new()
    }
}
