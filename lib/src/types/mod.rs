//! Domain types the executors and the RPC surface share.

use ethnum::U256;
use serde::Deserialize;
use traced_evm::machine::TxEnv;
use traced_evm::types::{keccak256, Address, HexBytes};

use crate::errors::TracerError;

pub mod hexnum;

/// Default gas allowance for `eth_call`-style synthetic transactions.
pub const CALL_GAS_CAP: u64 = 50_000_000;

/// The header fields execution needs. The block hash is carried next to the
/// header because the database keys it; it is never recomputed here.
#[derive(Debug, Clone, Default)]
pub struct BlockHeader {
    pub parent_hash: [u8; 32],
    pub coinbase: Address,
    pub difficulty: U256,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub base_fee: Option<U256>,
}

fn rlp_u256(rlp: &rlp::Rlp<'_>, index: usize) -> Result<U256, rlp::DecoderError> {
    let bytes: Vec<u8> = rlp.val_at(index)?;
    if bytes.len() > 32 {
        return Err(rlp::DecoderError::RlpIsTooBig);
    }
    let mut padded = [0u8; 32];
    padded[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(U256::from_be_bytes(padded))
}

fn rlp_hash(rlp: &rlp::Rlp<'_>, index: usize) -> Result<[u8; 32], rlp::DecoderError> {
    let bytes: Vec<u8> = rlp.val_at(index)?;
    bytes.try_into().map_err(|_| rlp::DecoderError::RlpInvalidLength)
}

impl BlockHeader {
    /// Decode the canonical 15(+base fee) field header encoding, keeping the
    /// fields execution cares about.
    pub fn from_rlp(data: &[u8]) -> Result<Self, rlp::DecoderError> {
        let rlp = rlp::Rlp::new(data);
        if !rlp.is_list() || rlp.item_count()? < 15 {
            return Err(rlp::DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            parent_hash: rlp_hash(&rlp, 0)?,
            coinbase: rlp.val_at(2)?,
            difficulty: rlp_u256(&rlp, 7)?,
            number: rlp.val_at(8)?,
            gas_limit: rlp.val_at(9)?,
            gas_used: rlp.val_at(10)?,
            timestamp: rlp.val_at(11)?,
            base_fee: if rlp.item_count()? > 15 {
                Some(rlp_u256(&rlp, 15)?)
            } else {
                None
            },
        })
    }
}

/// A signed transaction as stored in a block body (legacy encoding).
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Vec<u8>,
    pub v: u64,
    pub r: U256,
    pub s: U256,
    /// Cached sender; populated by `recover_sender` or supplied upstream.
    pub from: Option<Address>,
    pub hash: [u8; 32],
    pub transaction_index: Option<usize>,
}

impl Transaction {
    pub fn from_rlp(rlp: &rlp::Rlp<'_>) -> Result<Self, rlp::DecoderError> {
        if !rlp.is_list() || rlp.item_count()? != 9 {
            return Err(rlp::DecoderError::RlpIncorrectListLen);
        }
        let to_bytes: Vec<u8> = rlp.val_at(3)?;
        let to = match to_bytes.len() {
            0 => None,
            20 => Some(Address(to_bytes.try_into().expect("length checked"))),
            _ => return Err(rlp::DecoderError::RlpInvalidLength),
        };
        Ok(Self {
            nonce: rlp.val_at(0)?,
            gas_price: rlp_u256(rlp, 1)?,
            gas_limit: rlp.val_at(2)?,
            to,
            value: rlp_u256(rlp, 4)?,
            data: rlp.val_at(5)?,
            v: rlp.val_at(6)?,
            r: rlp_u256(rlp, 7)?,
            s: rlp_u256(rlp, 8)?,
            from: None,
            hash: keccak256(rlp.as_raw()),
            transaction_index: None,
        })
    }

    /// EIP-155 chain id folded into `v`, if any.
    #[must_use]
    pub fn chain_id(&self) -> Option<u64> {
        if self.v >= 35 {
            Some((self.v - 35) / 2)
        } else {
            None
        }
    }

    fn signing_hash(&self) -> [u8; 32] {
        let chain_id = self.chain_id();
        let mut stream = rlp::RlpStream::new_list(if chain_id.is_some() { 9 } else { 6 });
        stream.append(&self.nonce);
        append_u256(&mut stream, self.gas_price);
        stream.append(&self.gas_limit);
        match &self.to {
            Some(to) => stream.append(to),
            None => stream.append_empty_data(),
        };
        append_u256(&mut stream, self.value);
        stream.append(&self.data);
        if let Some(chain_id) = chain_id {
            stream.append(&chain_id);
            stream.append_empty_data();
            stream.append_empty_data();
        }
        keccak256(&stream.out())
    }

    /// ECDSA public key recovery for transactions whose sender was not
    /// provided upstream.
    pub fn recover_sender(&self) -> Result<Address, TracerError> {
        let recovery_bit = if self.v >= 35 {
            (self.v - 35) % 2
        } else if self.v == 27 || self.v == 28 {
            self.v - 27
        } else {
            return Err(TracerError::SenderRecovery(format!(
                "unsupported signature v value {}",
                self.v
            )));
        };

        let mut signature = [0u8; 64];
        signature[..32].copy_from_slice(&self.r.to_be_bytes());
        signature[32..].copy_from_slice(&self.s.to_be_bytes());

        let message = libsecp256k1::Message::parse(&self.signing_hash());
        let signature = libsecp256k1::Signature::parse_standard(&signature)
            .map_err(|error| TracerError::SenderRecovery(error.to_string()))?;
        #[allow(clippy::cast_possible_truncation)]
        let recovery_id = libsecp256k1::RecoveryId::parse(recovery_bit as u8)
            .map_err(|error| TracerError::SenderRecovery(error.to_string()))?;
        let public_key = libsecp256k1::recover(&message, &signature, &recovery_id)
            .map_err(|error| TracerError::SenderRecovery(error.to_string()))?;

        let hash = keccak256(&public_key.serialize()[1..]);
        Ok(Address(*arrayref::array_ref![hash, 12, 20]))
    }

    /// Sender, recovering it on demand.
    pub fn sender(&mut self) -> Result<Address, TracerError> {
        if let Some(from) = self.from {
            return Ok(from);
        }
        let from = self.recover_sender()?;
        self.from = Some(from);
        Ok(from)
    }

    #[must_use]
    pub fn tx_env(&self, from: Address) -> TxEnv {
        TxEnv {
            from,
            to: self.to,
            gas_limit: self.gas_limit,
            gas_price: self.gas_price,
            value: self.value,
            data: self.data.clone(),
            nonce: Some(self.nonce),
        }
    }
}

fn append_u256(stream: &mut rlp::RlpStream, value: U256) {
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|byte| *byte != 0).unwrap_or(32);
    stream.encoder().encode_value(&bytes[start..]);
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub header: BlockHeader,
    pub hash: [u8; 32],
    pub transactions: Vec<Transaction>,
    pub ommers: usize,
}

/// `eth_call`-shaped request object.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Call {
    pub from: Option<Address>,
    pub to: Option<Address>,
    #[serde(deserialize_with = "hexnum::opt_u64")]
    pub gas: Option<u64>,
    #[serde(deserialize_with = "hexnum::opt_u256")]
    pub gas_price: Option<U256>,
    #[serde(deserialize_with = "hexnum::opt_u256")]
    pub value: Option<U256>,
    pub data: Option<HexBytes>,
}

impl Call {
    /// Synthetic transaction: no nonce check, capped default gas.
    #[must_use]
    pub fn tx_env(&self) -> TxEnv {
        TxEnv {
            from: self.from.unwrap_or_default(),
            to: self.to,
            gas_limit: self.gas.unwrap_or(CALL_GAS_CAP),
            gas_price: self.gas_price.unwrap_or(U256::ZERO),
            value: self.value.unwrap_or(U256::ZERO),
            data: self.data.clone().map(Into::into).unwrap_or_default(),
            nonce: None,
        }
    }
}

/// Which of the three trace artifacts a `trace_*` request wants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceConfig {
    pub vm_trace: bool,
    pub trace: bool,
    pub state_diff: bool,
}

impl TraceConfig {
    #[must_use]
    pub fn from_modes<S: AsRef<str>>(modes: &[S]) -> Self {
        let mut config = Self::default();
        for mode in modes {
            match mode.as_ref() {
                "vmTrace" => config.vm_trace = true,
                "trace" => config.trace = true,
                "stateDiff" => config.state_diff = true,
                _ => {}
            }
        }
        config
    }

    #[must_use]
    pub fn all() -> Self {
        Self {
            vm_trace: true,
            trace: true,
            state_diff: true,
        }
    }
}

/// Block selector accepted by the RPC methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockId {
    Number(u64),
    Hash([u8; 32]),
    Latest,
    Earliest,
}

impl BlockId {
    pub fn from_json(value: &serde_json::Value) -> Result<Self, TracerError> {
        let invalid = || TracerError::InvalidParams(format!("invalid block id: {value}"));
        match value {
            serde_json::Value::String(tag) => match tag.as_str() {
                "latest" | "pending" | "safe" | "finalized" => Ok(Self::Latest),
                "earliest" => Ok(Self::Earliest),
                raw => {
                    let stripped = raw.strip_prefix("0x").ok_or_else(invalid)?;
                    if stripped.len() == 64 {
                        let bytes = hex::decode(stripped).map_err(|_| invalid())?;
                        Ok(Self::Hash(bytes.try_into().expect("length checked")))
                    } else {
                        u64::from_str_radix(stripped, 16)
                            .map(Self::Number)
                            .map_err(|_| invalid())
                    }
                }
            },
            serde_json::Value::Number(number) => {
                number.as_u64().map(Self::Number).ok_or_else(invalid)
            }
            _ => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn sample_signed_transaction() -> (Transaction, Address) {
        // Deterministic secp256k1 key: the address is derived from it, then
        // the signature below must recover the same address.
        let secret = libsecp256k1::SecretKey::parse(&[0x11; 32]).unwrap();
        let public = libsecp256k1::PublicKey::from_secret_key(&secret);
        let expected_hash = keccak256(&public.serialize()[1..]);
        let expected = Address(*arrayref::array_ref![expected_hash, 12, 20]);

        let mut tx = Transaction {
            nonce: 27,
            gas_price: U256::from(1_000_000_000u64),
            gas_limit: 90_000,
            to: Some(Address([0x22; 20])),
            value: U256::from(10u64),
            data: vec![0xAB, 0xCD],
            v: 37, // chain id 1, recovery bit 0
            ..Transaction::default()
        };
        let message = libsecp256k1::Message::parse(&tx.signing_hash());
        let (signature, recovery_id) = libsecp256k1::sign(&message, &secret);
        tx.v = 35 + 2 + u64::from(recovery_id.serialize());
        tx.r = U256::from_be_bytes(signature.r.b32());
        tx.s = U256::from_be_bytes(signature.s.b32());
        (tx, expected)
    }

    #[test]
    fn header_decoding_keeps_execution_fields() {
        let mut stream = rlp::RlpStream::new_list(15);
        stream.append(&vec![0x11u8; 32]); // parent
        stream.append(&vec![0x22u8; 32]); // ommers
        stream.append(&Address([0xC0; 20]));
        stream.append(&vec![0x33u8; 32]); // state root
        stream.append(&vec![0x44u8; 32]); // tx root
        stream.append(&vec![0x55u8; 32]); // receipts root
        stream.append(&vec![0u8; 256]); // bloom
        stream.append(&2_000_000u64); // difficulty
        stream.append(&1_024_165u64); // number
        stream.append(&8_000_000u64); // gas limit
        stream.append(&42_000u64); // gas used
        stream.append(&1_600_000_000u64); // timestamp
        stream.append(&vec![0xEEu8; 4]); // extra
        stream.append(&vec![0u8; 32]); // mix
        stream.append(&vec![0u8; 8]); // nonce

        let header = BlockHeader::from_rlp(&stream.out()).unwrap();
        assert_eq!(header.number, 1_024_165);
        assert_eq!(header.coinbase, Address([0xC0; 20]));
        assert_eq!(header.gas_limit, 8_000_000);
        assert_eq!(header.difficulty, U256::from(2_000_000u64));
        assert!(header.base_fee.is_none());
        assert_eq!(header.parent_hash, [0x11; 32]);
    }

    #[test]
    fn transaction_roundtrip_and_sender_recovery() {
        let (tx, expected) = sample_signed_transaction();
        assert_eq!(tx.chain_id(), Some(1));
        assert_eq!(tx.recover_sender().unwrap(), expected);
    }

    #[test]
    fn transaction_rlp_decoding() {
        let (tx, _) = sample_signed_transaction();
        let mut stream = rlp::RlpStream::new_list(9);
        stream.append(&tx.nonce);
        append_u256(&mut stream, tx.gas_price);
        stream.append(&tx.gas_limit);
        stream.append(tx.to.as_ref().unwrap());
        append_u256(&mut stream, tx.value);
        stream.append(&tx.data);
        stream.append(&tx.v);
        append_u256(&mut stream, tx.r);
        append_u256(&mut stream, tx.s);
        let raw = stream.out();

        let decoded = Transaction::from_rlp(&rlp::Rlp::new(&raw)).unwrap();
        assert_eq!(decoded.nonce, tx.nonce);
        assert_eq!(decoded.to, tx.to);
        assert_eq!(decoded.v, tx.v);
        assert_eq!(decoded.hash, keccak256(&raw));
        assert_eq!(decoded.recover_sender().unwrap(), tx.recover_sender().unwrap());
    }

    #[test]
    fn call_deserializes_quantities() {
        let call: Call = serde_json::from_str(
            r#"{
                "from": "0xe0a2bd4258d2768837baa26a28fe71dc079f84c7",
                "gas": "0x1d09a",
                "gasPrice": "0x7",
                "data": "0x602a60005500"
            }"#,
        )
        .unwrap();
        assert_eq!(call.gas, Some(0x1D09A));
        assert_eq!(call.gas_price, Some(U256::from(7u8)));
        assert_eq!(call.to, None);
        let env = call.tx_env();
        assert_eq!(env.gas_limit, 0x1D09A);
        assert_eq!(env.data, hex!("602a60005500"));
        assert_eq!(env.nonce, None);
    }

    #[test]
    fn trace_modes_parse() {
        let config = TraceConfig::from_modes(&["trace", "vmTrace"]);
        assert!(config.trace && config.vm_trace && !config.state_diff);
        assert_eq!(TraceConfig::from_modes(&["stateDiff", "trace", "vmTrace"]), TraceConfig::all());
    }

    #[test]
    fn block_ids_parse() {
        assert_eq!(
            BlockId::from_json(&serde_json::json!("latest")).unwrap(),
            BlockId::Latest
        );
        assert_eq!(
            BlockId::from_json(&serde_json::json!("0x5279a7")).unwrap(),
            BlockId::Number(0x0052_79A7)
        );
        let hash = "0x527198f474c1f1f1d01129d3a17ecc17895d85884a31b05ef0ecd480faee1592";
        assert!(matches!(
            BlockId::from_json(&serde_json::json!(hash)).unwrap(),
            BlockId::Hash(_)
        ));
        assert!(BlockId::from_json(&serde_json::json!(["nope"])).is_err());
    }
}
