//! Validated primitive types shared across the indexing engine.
//!
//! These newtypes provide:
//! - Type safety (can't accidentally pass a block number as a chain id)
//! - Validation at construction time
//! - The two on-disk encodings for `uint256` columns described in the
//!   persisted-state layout.

use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// ETHEREUM ADDRESS
// ═══════════════════════════════════════════════════════════════════════════════

/// Validated 20-byte Ethereum address.
///
/// This newtype ensures addresses are always exactly 20 bytes. Use
/// `alloy::primitives::Address` for on-chain interaction, but this type for
/// persistence and filter-fragment fingerprinting.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EthAddress([u8; 20]);

impl EthAddress {
    /// Create from a fixed-size array (infallible).
    #[must_use]
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Try to create from a byte slice.
    ///
    /// # Errors
    /// Returns `InvalidAddress::WrongLength` if the slice is not exactly 20 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, InvalidAddress> {
        let bytes: [u8; 20] = slice
            .try_into()
            .map_err(|_| InvalidAddress::WrongLength(slice.len()))?;
        Ok(Self(bytes))
    }

    /// Parse from a hex string (with or without `0x` prefix).
    ///
    /// # Errors
    /// Returns `InvalidAddress` if the string is not valid hex or the wrong length.
    pub fn from_hex(s: &str) -> Result<Self, InvalidAddress> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        if s.len() != 40 {
            return Err(InvalidAddress::WrongLength(s.len() / 2));
        }
        let bytes = hex::decode(s).map_err(|_| InvalidAddress::InvalidHex)?;
        Self::from_slice(&bytes)
    }

    /// Extract the last 20 bytes of a 32-byte topic (factory child-address
    /// extraction, `childAddressLocation = "topic{1,2,3}"`).
    #[must_use]
    pub fn from_topic(topic: &[u8; 32]) -> Self {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&topic[12..32]);
        Self(bytes)
    }

    /// Read 20 bytes at byte offset `12 + offset` within `data` (factory
    /// child-address extraction, `childAddressLocation = "offsetN"`).
    ///
    /// # Errors
    /// Returns `InvalidAddress::WrongLength` if `data` is too short.
    pub fn from_data_offset(data: &[u8], offset: usize) -> Result<Self, InvalidAddress> {
        let start = 12 + offset;
        let end = start + 20;
        let slice = data
            .get(start..end)
            .ok_or(InvalidAddress::WrongLength(data.len()))?;
        Self::from_slice(slice)
    }

    /// Get the underlying bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Convert to a lowercase hex string with `0x` prefix.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Check if this is the zero address.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// The zero address (`0x0000...0000`).
    pub const ZERO: Self = Self([0u8; 20]);
}

impl fmt::Debug for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EthAddress({})", self.to_hex())
    }
}

impl fmt::Display for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<EthAddress> for String {
    fn from(addr: EthAddress) -> Self {
        addr.to_hex()
    }
}

impl TryFrom<String> for EthAddress {
    type Error = InvalidAddress;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

impl From<[u8; 20]> for EthAddress {
    fn from(bytes: [u8; 20]) -> Self {
        Self::new(bytes)
    }
}

impl From<Address> for EthAddress {
    fn from(addr: Address) -> Self {
        Self::new(addr.0.0)
    }
}

impl From<EthAddress> for Address {
    fn from(addr: EthAddress) -> Self {
        Self::from(addr.0)
    }
}

/// Error for invalid Ethereum addresses.
#[derive(Debug, Clone, Error)]
pub enum InvalidAddress {
    /// Address has the wrong byte length.
    #[error("wrong length: expected 20 bytes, got {0}")]
    WrongLength(usize),
    /// Address contains invalid hex characters.
    #[error("invalid hex encoding")]
    InvalidHex,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN ID / BLOCK NUMBER
// ═══════════════════════════════════════════════════════════════════════════════

/// Chain id newtype for clarity in function signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(u64);

impl ChainId {
    /// Create a new chain id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ChainId> for u64 {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

impl From<ChainId> for i64 {
    #[allow(clippy::cast_possible_wrap)]
    fn from(id: ChainId) -> Self {
        id.0 as Self
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Block number newtype for clarity in function signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockNumber(u64);

impl BlockNumber {
    /// Create a new block number.
    #[must_use]
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// Get the value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns the next block number (saturating at `u64::MAX`).
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the previous block number (saturating at 0).
    #[must_use]
    pub const fn prev(&self) -> Self {
        Self(self.0.saturating_sub(1))
    }
}

impl From<u64> for BlockNumber {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

impl From<BlockNumber> for u64 {
    fn from(b: BlockNumber) -> Self {
        b.0
    }
}

impl From<BlockNumber> for i64 {
    #[allow(clippy::cast_possible_wrap)]
    fn from(b: BlockNumber) -> Self {
        b.0 as Self
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// UINT256
// ═══════════════════════════════════════════════════════════════════════════════

/// `uint256` value with the two persisted-state encodings described in
/// the data model: `NUMERIC(78,0)` for Postgres, and a sign-prefixed,
/// zero-padded decimal string for SQLite whose lexicographic byte order
/// matches numeric order.
///
/// The sign-prefixed string is 79 characters: one sign character (`+` is
/// always used since the type is unsigned) followed by the 78-digit
/// zero-padded decimal representation (`2^256 - 1` has 78 decimal
/// digits). `spec.md` names a 33-character encoding; 33 characters
/// cannot hold a full 78-digit `uint256`, so this crate uses the width
/// that is actually sufficient and records the discrepancy in
/// `DESIGN.md`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uint256(U256);

/// Width of the zero-padded decimal digits in the SQLite encoding.
const SQLITE_DIGITS: usize = 78;
/// Total width of the SQLite encoding, including the sign character.
const SQLITE_ENCODED_LEN: usize = SQLITE_DIGITS + 1;

impl Uint256 {
    /// Zero.
    pub const ZERO: Self = Self(U256::ZERO);

    /// Maximum representable value.
    pub const MAX: Self = Self(U256::MAX);

    /// Wrap a raw `U256`.
    #[must_use]
    pub const fn new(value: U256) -> Self {
        Self(value)
    }

    /// Unwrap to the raw `U256`.
    #[must_use]
    pub const fn get(&self) -> U256 {
        self.0
    }

    /// Encode for the SQLite backend: `+` followed by 78 zero-padded decimal digits.
    #[must_use]
    pub fn to_sqlite_string(&self) -> String {
        format!("+{:0>width$}", self.0, width = SQLITE_DIGITS)
    }

    /// Decode the SQLite sign-padded encoding.
    ///
    /// # Errors
    /// Returns `InvalidUint256` if the string is malformed.
    pub fn from_sqlite_string(s: &str) -> Result<Self, InvalidUint256> {
        if s.len() != SQLITE_ENCODED_LEN || !s.starts_with('+') {
            return Err(InvalidUint256::MalformedEncoding);
        }
        let digits = &s[1..];
        U256::from_str(digits)
            .map(Self)
            .map_err(|_| InvalidUint256::MalformedEncoding)
    }

    /// Encode as a `NUMERIC(78,0)`-compatible decimal string for Postgres.
    #[must_use]
    pub fn to_numeric_string(&self) -> String {
        self.0.to_string()
    }

    /// Decode a `NUMERIC(78,0)` decimal string.
    ///
    /// # Errors
    /// Returns `InvalidUint256` if the string is not a valid non-negative integer.
    pub fn from_numeric_string(s: &str) -> Result<Self, InvalidUint256> {
        U256::from_str(s)
            .map(Self)
            .map_err(|_| InvalidUint256::MalformedEncoding)
    }
}

impl From<U256> for Uint256 {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl From<Uint256> for U256 {
    fn from(value: Uint256) -> Self {
        value.0
    }
}

impl fmt::Display for Uint256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error for invalid `uint256` encodings.
#[derive(Debug, Clone, Error)]
pub enum InvalidUint256 {
    /// The encoded string did not match the expected format.
    #[error("malformed uint256 encoding")]
    MalformedEncoding,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    mod eth_address_tests {
        use super::*;

        #[test]
        fn from_hex_with_prefix() {
            let addr = EthAddress::from_hex("0x1234567890123456789012345678901234567890").unwrap();
            assert_eq!(addr.to_hex(), "0x1234567890123456789012345678901234567890");
        }

        #[test]
        fn from_hex_wrong_length() {
            assert!(EthAddress::from_hex("0x1234").is_err());
        }

        #[test]
        fn zero_address() {
            assert!(EthAddress::ZERO.is_zero());
        }

        #[test]
        fn alloy_address_roundtrip() {
            let addr_hex = "0x1234567890123456789012345678901234567890";
            let eth_addr = EthAddress::from_hex(addr_hex).unwrap();
            let alloy_addr: Address = eth_addr.into();
            let back: EthAddress = alloy_addr.into();
            assert_eq!(eth_addr, back);
        }

        #[test]
        fn from_topic_takes_last_20_bytes() {
            let mut topic = [0u8; 32];
            topic[12..32].copy_from_slice(&[0xAB; 20]);
            let addr = EthAddress::from_topic(&topic);
            assert_eq!(addr.as_bytes(), &[0xAB; 20]);
        }

        #[test]
        fn from_data_offset_reads_20_bytes_after_12_byte_pad() {
            let mut data = vec![0u8; 64];
            data[12..32].copy_from_slice(&[0xCD; 20]);
            let addr = EthAddress::from_data_offset(&data, 0).unwrap();
            assert_eq!(addr.as_bytes(), &[0xCD; 20]);
        }

        #[test]
        fn from_data_offset_nonzero() {
            let mut data = vec![0u8; 96];
            data[12 + 32..32 + 32].copy_from_slice(&[0xEF; 20]);
            let addr = EthAddress::from_data_offset(&data, 32).unwrap();
            assert_eq!(addr.as_bytes(), &[0xEF; 20]);
        }
    }

    mod block_number_tests {
        use super::*;

        #[test]
        fn next_and_prev() {
            let block = BlockNumber::new(100);
            assert_eq!(block.next().value(), 101);
            assert_eq!(block.prev().value(), 99);
        }

        #[test]
        fn prev_saturates_at_zero() {
            assert_eq!(BlockNumber::new(0).prev().value(), 0);
        }
    }

    mod uint256_tests {
        use super::*;

        #[test]
        fn sqlite_roundtrip() {
            let value = Uint256::new(U256::from(123_456_789_u64));
            let encoded = value.to_sqlite_string();
            assert_eq!(encoded.len(), SQLITE_ENCODED_LEN);
            assert_eq!(Uint256::from_sqlite_string(&encoded).unwrap(), value);
        }

        #[test]
        fn sqlite_encoding_preserves_byte_order() {
            let small = Uint256::new(U256::from(5_u64));
            let large = Uint256::new(U256::from(500_u64));
            assert!(small.to_sqlite_string() < large.to_sqlite_string());
            assert!(small < large);
        }

        #[test]
        fn sqlite_roundtrip_max() {
            let encoded = Uint256::MAX.to_sqlite_string();
            assert_eq!(Uint256::from_sqlite_string(&encoded).unwrap(), Uint256::MAX);
        }

        #[test]
        fn numeric_roundtrip() {
            let value = Uint256::new(U256::from(42_u64));
            let encoded = value.to_numeric_string();
            assert_eq!(Uint256::from_numeric_string(&encoded).unwrap(), value);
        }

        #[test]
        fn malformed_sqlite_string_rejected() {
            assert!(Uint256::from_sqlite_string("not-a-number").is_err());
        }
    }
}
