use std::fmt::{Debug, Display};

use hex::FromHex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::keccak256;

#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    #[must_use]
    pub fn from_create(source: &Address, nonce: u64) -> Self {
        let mut stream = rlp::RlpStream::new_list(2);
        stream.append(source);
        stream.append(&nonce);
        let hash = keccak256(&stream.out());

        let bytes = arrayref::array_ref![hash, 12, 20];
        Address(*bytes)
    }

    #[must_use]
    pub fn from_create2(source: &Address, salt: &[u8; 32], initialization_code: &[u8]) -> Self {
        let code_hash = keccak256(initialization_code);
        let hash = super::keccak256v(&[&[0xFF], source.as_bytes(), salt, &code_hash]);

        let bytes = arrayref::array_ref![hash, 12, 20];
        Address(*bytes)
    }

    pub fn from_hex(mut s: &str) -> Result<Self, hex::FromHexError> {
        if let Some(stripped) = s.strip_prefix("0x") {
            s = stripped;
        }

        let bytes = <[u8; 20]>::from_hex(s)?;
        Ok(Address(bytes))
    }

    /// True for the reserved low addresses precompiled contracts live at.
    #[must_use]
    pub fn is_reserved_range(&self, last: u8) -> bool {
        self.0[..19].iter().all(|b| *b == 0) && self.0[19] >= 1 && self.0[19] <= last
    }
}

impl From<[u8; 20]> for Address {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

impl From<Address> for [u8; 20] {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("0x")?;
        f.write_str(&hex::encode(self.0))
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl rlp::Encodable for Address {
    fn rlp_append(&self, s: &mut rlp::RlpStream) {
        s.encoder().encode_value(&self.0);
    }
}

impl rlp::Decodable for Address {
    fn decode(rlp: &rlp::Rlp) -> Result<Self, rlp::DecoderError> {
        let bytes = rlp.data()?;
        let array: [u8; 20] = bytes
            .try_into()
            .map_err(|_| rlp::DecoderError::RlpInvalidLength)?;
        Ok(Address(array))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(D::Error::custom)
    }
}
