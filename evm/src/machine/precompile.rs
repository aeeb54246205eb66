//! Built-in contracts at the reserved low addresses. Gas accounting covers
//! the full address range of each revision; the pairing-curve and blake2
//! bodies are not evaluated here and report a precompile failure instead,
//! which the tracers surface like any other frame failure.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::revision::Revision;
use crate::tracing::{ExecutionResult, StatusCode};
use crate::types::keccak256;

/// Highest precompile address byte for `revision`.
#[must_use]
pub fn count(revision: Revision) -> u8 {
    if revision >= Revision::Istanbul {
        9
    } else if revision >= Revision::Byzantium {
        8
    } else {
        4
    }
}

fn word_count(len: usize) -> i64 {
    i64::try_from((len + 31) / 32).unwrap_or(i64::MAX / 1024)
}

fn ecrecover(input: &[u8]) -> Vec<u8> {
    let mut padded = [0u8; 128];
    let len = input.len().min(128);
    padded[..len].copy_from_slice(&input[..len]);

    let mut hash = [0u8; 32];
    hash.copy_from_slice(&padded[..32]);
    let v = &padded[32..64];
    if v[..31] != [0u8; 31] || (v[31] != 27 && v[31] != 28) {
        return Vec::new();
    }
    let recovery_id = v[31] - 27;

    let mut signature = [0u8; 64];
    signature.copy_from_slice(&padded[64..128]);

    let Ok(message) = libsecp256k1::Message::parse_slice(&hash) else {
        return Vec::new();
    };
    let Ok(signature) = libsecp256k1::Signature::parse_standard(&signature) else {
        return Vec::new();
    };
    let Ok(recovery_id) = libsecp256k1::RecoveryId::parse(recovery_id) else {
        return Vec::new();
    };
    let Ok(public_key) = libsecp256k1::recover(&message, &signature, &recovery_id) else {
        return Vec::new();
    };

    let hash = keccak256(&public_key.serialize()[1..]);
    let mut output = vec![0u8; 32];
    output[12..].copy_from_slice(&hash[12..]);
    output
}

/// Execute the precompile at address byte `address`, charging from `gas`.
/// Insufficient gas consumes the whole frame allowance.
#[must_use]
pub fn run(address: u8, input: &[u8], gas: i64, _revision: Revision) -> ExecutionResult {
    let (cost, body): (i64, Option<Vec<u8>>) = match address {
        0x01 => (3_000, Some(ecrecover(input))),
        0x02 => {
            let cost = 60 + 12 * word_count(input.len());
            (cost, Some(Sha256::digest(input).to_vec()))
        }
        0x03 => {
            let cost = 600 + 120 * word_count(input.len());
            let digest = Ripemd160::digest(input);
            let mut output = vec![0u8; 32];
            output[12..].copy_from_slice(&digest);
            (cost, Some(output))
        }
        0x04 => (15 + 3 * word_count(input.len()), Some(input.to_vec())),
        0x05 => (200, None),
        0x06 => (150, None),
        0x07 => (6_000, None),
        0x08 => {
            let pairs = i64::try_from(input.len() / 192).unwrap_or(0);
            (45_000 + 34_000 * pairs, None)
        }
        0x09 => {
            let rounds = input
                .get(..4)
                .map_or(0, |bytes| i64::from(u32::from_be_bytes(bytes.try_into().unwrap())));
            (rounds.max(1), None)
        }
        _ => (0, None),
    };

    if cost > gas {
        return ExecutionResult {
            status: StatusCode::OutOfGas,
            gas_left: 0,
            output: Vec::new(),
        };
    }

    match body {
        Some(output) => ExecutionResult {
            status: StatusCode::Success,
            gas_left: gas - cost,
            output,
        },
        None => ExecutionResult {
            status: StatusCode::PrecompileFailure,
            gas_left: 0,
            output: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_echoes_input() {
        let result = run(0x04, &[1, 2, 3], 100, Revision::Istanbul);
        assert_eq!(result.status, StatusCode::Success);
        assert_eq!(result.output, vec![1, 2, 3]);
        assert_eq!(result.gas_left, 100 - 18);
    }

    #[test]
    fn insufficient_gas_consumes_the_frame() {
        let result = run(0x09, &[0, 1, 0, 0], 50_000, Revision::Istanbul);
        assert_eq!(result.status, StatusCode::OutOfGas);
        assert_eq!(result.gas_left, 0);
    }

    #[test]
    fn sha256_of_empty_input() {
        let result = run(0x02, &[], 1_000, Revision::Istanbul);
        assert_eq!(result.status, StatusCode::Success);
        assert_eq!(
            hex::encode(&result.output),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn bad_recovery_id_yields_empty_output() {
        let result = run(0x01, &[0u8; 128], 5_000, Revision::Istanbul);
        assert_eq!(result.status, StatusCode::Success);
        assert!(result.output.is_empty());
    }

    #[test]
    fn precompile_range_grows_with_revisions() {
        assert_eq!(count(Revision::Homestead), 4);
        assert_eq!(count(Revision::Byzantium), 8);
        assert_eq!(count(Revision::Istanbul), 9);
    }
}
