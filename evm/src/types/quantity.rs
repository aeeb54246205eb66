//! Hex-quantity formatting shared by the trace output shapes.

use ethnum::U256;
use serde::Serializer;

/// Shortest "0x"-prefixed form, "0x0" for zero.
#[must_use]
pub fn from_u64(number: u64) -> String {
    format!("0x{number:x}")
}

/// Shortest "0x"-prefixed form, "0x0" for zero.
#[must_use]
pub fn from_u256(number: U256) -> String {
    format!("0x{number:x}")
}

/// "0x"-prefixed form with every leading zero stripped, leaving a bare "0x"
/// for zero. Balance fields of the state diff render this way.
#[must_use]
pub fn stripped_u256(number: U256) -> String {
    if number == U256::ZERO {
        "0x".to_owned()
    } else {
        format!("0x{number:x}")
    }
}

/// "0x"-prefixed form padded to 32 bytes.
#[must_use]
pub fn padded_u256(number: U256) -> String {
    format!("0x{number:064x}")
}

/// 32-byte padded form without the "0x" prefix.
#[must_use]
pub fn bare_padded_u256(number: U256) -> String {
    format!("{number:064x}")
}

pub fn serialize_u64<S: Serializer>(number: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&from_u64(*number))
}

pub fn serialize_u256<S: Serializer>(number: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&from_u256(*number))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortest_forms() {
        assert_eq!(from_u64(0), "0x0");
        assert_eq!(from_u64(0x343), "0x343");
        assert_eq!(from_u256(U256::from(0x2au8)), "0x2a");
    }

    #[test]
    fn stripped_form_leaves_a_bare_prefix_for_zero() {
        assert_eq!(stripped_u256(U256::ZERO), "0x");
        assert_eq!(stripped_u256(U256::from(0x2au8)), "0x2a");
    }

    #[test]
    fn padded_forms() {
        assert_eq!(
            bare_padded_u256(U256::from(0x2au8)),
            "000000000000000000000000000000000000000000000000000000000000002a"
        );
        assert_eq!(
            padded_u256(U256::ZERO),
            "0x0000000000000000000000000000000000000000000000000000000000000000"
        );
    }
}
