//! Deserializers for "0x"-prefixed quantity strings.

use ethnum::U256;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

pub fn u64_from_hex(raw: &str) -> Option<u64> {
    let stripped = raw.strip_prefix("0x")?;
    u64::from_str_radix(stripped, 16).ok()
}

pub fn u256_from_hex(raw: &str) -> Option<U256> {
    let stripped = raw.strip_prefix("0x")?;
    if stripped.is_empty() || stripped.len() > 64 {
        return None;
    }
    U256::from_str_radix(stripped, 16).ok()
}

pub fn opt_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    u64_from_hex(&raw)
        .map(Some)
        .ok_or_else(|| D::Error::custom(format!("invalid quantity: {raw}")))
}

pub fn opt_u256<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<U256>, D::Error> {
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    u256_from_hex(&raw)
        .map(Some)
        .ok_or_else(|| D::Error::custom(format!("invalid quantity: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefixed_quantities() {
        assert_eq!(u64_from_hex("0x5279a7"), Some(0x0052_79A7));
        assert_eq!(u64_from_hex("5279a7"), None);
        assert_eq!(u256_from_hex("0x1bc16d674ec80000"), U256::from_str_hex("0x1bc16d674ec80000").ok());
        assert_eq!(u256_from_hex("0x"), None);
    }
}
