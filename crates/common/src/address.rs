// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! Canonical address types for the two backend families.
//!
//! The account-model side treats addresses as case-insensitive (`0xABCD...` and
//! `0xabcd...` name the same account); the runtime-module side has no such notion and
//! addresses must compare byte-exact.

use std::fmt;

use alloy_primitives::Address as AlloyAddress;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing an address from user input.
#[derive(Debug, Error)]
pub enum AddressError {
    /// The account-model address was not valid `0x`-prefixed 20-byte hex.
    #[error("invalid account-model address: {0:?}")]
    InvalidEvm(String),
    /// The runtime-module address was not valid hex.
    #[error("invalid runtime-module address: {0:?}")]
    InvalidSubstrate(String),
}

/// An account-model address, stored and compared in its canonical lowercase form.
///
/// Two `EvmAddress` values constructed from differently-cased input hex always
/// compare equal, hash equal and serialize identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EvmAddress(AlloyAddress);

impl EvmAddress {
    /// Parse from `0x`-prefixed (or bare) hex, regardless of case.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        raw.parse::<AlloyAddress>()
            .map(Self)
            .map_err(|_| AddressError::InvalidEvm(raw.to_string()))
    }

    /// The underlying 20-byte address.
    pub fn as_alloy(&self) -> AlloyAddress {
        self.0
    }

    /// The canonical lowercase `0x`-prefixed hex representation.
    pub fn to_lowercase_hex(&self) -> String {
        format!("{:#x}", self.0)
    }
}

impl From<AlloyAddress> for EvmAddress {
    fn from(value: AlloyAddress) -> Self {
        Self(value)
    }
}

impl fmt::Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_lowercase_hex())
    }
}

impl Serialize for EvmAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_lowercase_hex())
    }
}

impl<'de> Deserialize<'de> for EvmAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// A runtime-module address (an `AccountId`-shaped byte string), compared byte-exact.
///
/// Substrate chains use a variety of account-id widths (32 bytes is by far the most
/// common); this type stores whatever width the chain actually uses rather than
/// assuming 32.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubstrateAddress(Vec<u8>);

impl SubstrateAddress {
    /// Parse from `0x`-prefixed (or bare) hex.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let stripped = raw.strip_prefix("0x").unwrap_or(raw);
        hex::decode(stripped)
            .map(Self)
            .map_err(|_| AddressError::InvalidSubstrate(raw.to_string()))
    }

    /// Construct directly from raw bytes, e.g. as decoded from SCALE-encoded storage.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The raw account-id bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for SubstrateAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

impl Serialize for SubstrateAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SubstrateAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evm_address_is_case_insensitive() {
        let lower = EvmAddress::parse("0x000000000000000000000000000000000000a1").unwrap();
        let upper = EvmAddress::parse("0x000000000000000000000000000000000000A1").unwrap();
        assert_eq!(lower, upper);
        assert_eq!(lower.to_lowercase_hex(), upper.to_lowercase_hex());
    }

    #[test]
    fn substrate_address_is_byte_exact() {
        let a = SubstrateAddress::parse("0xdeadbeef").unwrap();
        let b = SubstrateAddress::parse("0xdeadbeef").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_bytes(), &[0xde, 0xad, 0xbe, 0xef]);
    }
}
