//! Compact account record codec. The value stores a field-set byte followed
//! by length-prefixed big-endian fields for every bit that is set:
//! nonce (bit 0), balance (bit 1), incarnation (bit 2), code hash (bit 3).

use ethnum::U256;
use traced_evm::state::AccountInfo;
use traced_evm::types::EMPTY_CODE_HASH;

use super::StateReadError;

const FIELD_NONCE: u8 = 0b0001;
const FIELD_BALANCE: u8 = 0b0010;
const FIELD_INCARNATION: u8 = 0b0100;
const FIELD_CODE_HASH: u8 = 0b1000;

fn minimal_be(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|byte| *byte != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

pub fn encode_account(account: &AccountInfo) -> Vec<u8> {
    let mut field_set = 0u8;
    let mut payload = Vec::new();

    let mut put = |field: u8, bytes: &[u8]| {
        let trimmed = minimal_be(bytes);
        if !trimmed.is_empty() {
            field_set |= field;
            #[allow(clippy::cast_possible_truncation)]
            payload.push(trimmed.len() as u8);
            payload.extend_from_slice(trimmed);
        }
    };

    put(FIELD_NONCE, &account.nonce.to_be_bytes());
    put(FIELD_BALANCE, &account.balance.to_be_bytes());
    put(FIELD_INCARNATION, &account.incarnation.to_be_bytes());
    if account.code_hash != EMPTY_CODE_HASH {
        field_set |= FIELD_CODE_HASH;
        payload.push(32);
        payload.extend_from_slice(&account.code_hash);
    }

    let mut encoded = vec![field_set];
    encoded.extend_from_slice(&payload);
    encoded
}

pub fn decode_account(data: &[u8], table: &str) -> Result<AccountInfo, StateReadError> {
    let Some((&field_set, mut rest)) = data.split_first() else {
        return Err(StateReadError::decode(table, "empty account record"));
    };
    let mut account = AccountInfo::default();

    let mut take = |rest: &mut &[u8]| -> Result<Vec<u8>, StateReadError> {
        let Some((&len, tail)) = rest.split_first() else {
            return Err(StateReadError::decode(table, "truncated field length"));
        };
        let len = len as usize;
        if tail.len() < len {
            return Err(StateReadError::decode(table, "truncated field payload"));
        }
        let (field, tail) = tail.split_at(len);
        *rest = tail;
        Ok(field.to_vec())
    };

    if field_set & FIELD_NONCE != 0 {
        let bytes = take(&mut rest)?;
        if bytes.len() > 8 {
            return Err(StateReadError::decode(table, "nonce wider than u64"));
        }
        let mut padded = [0u8; 8];
        padded[8 - bytes.len()..].copy_from_slice(&bytes);
        account.nonce = u64::from_be_bytes(padded);
    }
    if field_set & FIELD_BALANCE != 0 {
        let bytes = take(&mut rest)?;
        if bytes.len() > 32 {
            return Err(StateReadError::decode(table, "balance wider than u256"));
        }
        let mut padded = [0u8; 32];
        padded[32 - bytes.len()..].copy_from_slice(&bytes);
        account.balance = U256::from_be_bytes(padded);
    }
    if field_set & FIELD_INCARNATION != 0 {
        let bytes = take(&mut rest)?;
        if bytes.len() > 8 {
            return Err(StateReadError::decode(table, "incarnation wider than u64"));
        }
        let mut padded = [0u8; 8];
        padded[8 - bytes.len()..].copy_from_slice(&bytes);
        account.incarnation = u64::from_be_bytes(padded);
    }
    if field_set & FIELD_CODE_HASH != 0 {
        let bytes = take(&mut rest)?;
        if bytes.len() != 32 {
            return Err(StateReadError::decode(table, "code hash is not 32 bytes"));
        }
        account.code_hash.copy_from_slice(&bytes);
    }

    Ok(account)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_full_record() {
        let account = AccountInfo {
            nonce: 0x343,
            balance: U256::from(1_000_000_007u64),
            code_hash: [0xAB; 32],
            incarnation: 2,
        };
        let encoded = encode_account(&account);
        let decoded = decode_account(&encoded, "PlainState").unwrap();
        assert_eq!(decoded, account);
    }

    #[test]
    fn empty_account_is_one_byte() {
        let account = AccountInfo::default();
        let encoded = encode_account(&account);
        assert_eq!(encoded, vec![0]);
        assert_eq!(decode_account(&encoded, "PlainState").unwrap(), account);
    }

    #[test]
    fn truncated_record_is_rejected() {
        let account = AccountInfo {
            nonce: 1,
            balance: U256::from(5u8),
            ..AccountInfo::default()
        };
        let mut encoded = encode_account(&account);
        encoded.truncate(encoded.len() - 1);
        assert!(decode_account(&encoded, "PlainState").is_err());
        assert!(decode_account(&[], "PlainState").is_err());
    }
}
