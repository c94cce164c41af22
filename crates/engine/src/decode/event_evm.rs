// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! Account-model event/log decoding (C3): a fixed catalogue of well-known event
//! signatures (ERC20/721/1155, common DEX events, ownership/upgradeability) plus an
//! optional custom-ABI extension.

use alloy_dyn_abi::DynSolType;
use alloy_primitives::{keccak256, Address, FixedBytes, B256};
use once_cell::sync::Lazy;

use crate::types::DecodedEvent;

/// One ABI parameter of a catalogued event.
#[derive(Debug, Clone, Copy)]
pub struct EventParam {
    /// Parameter name, as it appears in `fields`.
    pub name: &'static str,
    /// The ABI type, used to decode non-indexed parameters.
    pub ty: DynSolTypeKind,
    /// Whether this parameter is part of the topics (vs. the data blob).
    pub indexed: bool,
}

/// A minimal subset of ABI types needed by the catalogue, avoiding a `DynSolType` that
/// isn't `Copy`.
#[derive(Debug, Clone, Copy)]
pub enum DynSolTypeKind {
    /// `address`
    Address,
    /// `uint256`
    Uint256,
    /// `bool`
    Bool,
    /// `uint256[]`
    Uint256Array,
}

impl DynSolTypeKind {
    fn as_dyn_sol_type(self) -> DynSolType {
        match self {
            Self::Address => DynSolType::Address,
            Self::Uint256 => DynSolType::Uint(256),
            Self::Bool => DynSolType::Bool,
            Self::Uint256Array => DynSolType::Array(Box::new(DynSolType::Uint(256))),
        }
    }
}

/// A single catalogued event.
#[derive(Debug, Clone, Copy)]
pub struct CatalogEntry {
    /// Event name.
    pub name: &'static str,
    /// The full Solidity event signature, e.g. `Transfer(address,address,uint256)`.
    pub signature: &'static str,
    /// Parameters in declaration order.
    pub params: &'static [EventParam],
}

macro_rules! event {
    ($name:literal, $sig:literal, [$(($p:literal, $ty:ident, $idx:literal)),* $(,)?]) => {
        CatalogEntry {
            name: $name,
            signature: $sig,
            params: &[$(EventParam { name: $p, ty: DynSolTypeKind::$ty, indexed: $idx }),*],
        }
    };
}

const CATALOG: &[CatalogEntry] = &[
    event!("Transfer", "Transfer(address,address,uint256)", [
        ("from", Address, true),
        ("to", Address, true),
        ("value", Uint256, false),
    ]),
    event!("Approval", "Approval(address,address,uint256)", [
        ("owner", Address, true),
        ("spender", Address, true),
        ("value", Uint256, false),
    ]),
    event!("ApprovalForAll", "ApprovalForAll(address,address,bool)", [
        ("owner", Address, true),
        ("operator", Address, true),
        ("approved", Bool, false),
    ]),
    event!("TransferSingle", "TransferSingle(address,address,address,uint256,uint256)", [
        ("operator", Address, true),
        ("from", Address, true),
        ("to", Address, true),
        ("id", Uint256, false),
        ("value", Uint256, false),
    ]),
    event!("Swap", "Swap(address,uint256,uint256,uint256,uint256,address)", [
        ("sender", Address, true),
        ("amount0In", Uint256, false),
        ("amount1In", Uint256, false),
        ("amount0Out", Uint256, false),
        ("amount1Out", Uint256, false),
        ("to", Address, true),
    ]),
    event!("Mint", "Mint(address,uint256,uint256)", [
        ("sender", Address, true),
        ("amount0", Uint256, false),
        ("amount1", Uint256, false),
    ]),
    event!("Burn", "Burn(address,uint256,uint256,address)", [
        ("sender", Address, true),
        ("amount0", Uint256, false),
        ("amount1", Uint256, false),
        ("to", Address, true),
    ]),
    event!("Sync", "Sync(uint112,uint112)", [("reserve0", Uint256, false), ("reserve1", Uint256, false)]),
    event!("OwnershipTransferred", "OwnershipTransferred(address,address)", [
        ("previousOwner", Address, true),
        ("newOwner", Address, true),
    ]),
    event!("Upgraded", "Upgraded(address)", [("implementation", Address, true)]),
];

static SELECTOR_INDEX: Lazy<Vec<(B256, &'static CatalogEntry)>> = Lazy::new(|| {
    CATALOG.iter().map(|entry| (keccak256(entry.signature.as_bytes()), entry)).collect()
});

/// One raw log entry as surfaced by the fork backend.
#[derive(Debug, Clone)]
pub struct RawLog {
    /// The emitting contract address.
    pub address: Address,
    /// Topics, `topics[0]` is the event signature hash when present.
    pub topics: Vec<B256>,
    /// The non-indexed data blob.
    pub data: Vec<u8>,
    /// The log's index within the transaction receipt.
    pub log_index: u64,
}

fn decode_indexed(topic: &FixedBytes<32>, kind: DynSolTypeKind) -> String {
    match kind {
        DynSolTypeKind::Address => {
            let addr = Address::from_slice(&topic[12..32]);
            format!("{addr:#x}")
        }
        DynSolTypeKind::Uint256 => {
            alloy_primitives::U256::from_be_bytes(topic.0).to_string()
        }
        DynSolTypeKind::Bool => (topic[31] != 0).to_string(),
        DynSolTypeKind::Uint256Array => hex::encode(topic.0),
    }
}

fn decode_non_indexed(entry: &CatalogEntry, data: &[u8]) -> Option<Vec<(String, String)>> {
    let non_indexed: Vec<&EventParam> = entry.params.iter().filter(|p| !p.indexed).collect();
    if non_indexed.is_empty() {
        return Some(Vec::new());
    }
    let tuple_type = DynSolType::Tuple(non_indexed.iter().map(|p| p.ty.as_dyn_sol_type()).collect());
    let decoded = tuple_type.abi_decode(data).ok()?;
    let values = decoded.as_tuple()?;
    Some(
        non_indexed
            .iter()
            .zip(values.iter())
            .map(|(param, value)| (param.name.to_string(), stringify_value(value)))
            .collect(),
    )
}

fn stringify_value(value: &alloy_dyn_abi::DynSolValue) -> String {
    use alloy_dyn_abi::DynSolValue;
    match value {
        DynSolValue::Address(addr) => format!("{addr:#x}"),
        DynSolValue::Uint(v, _) => v.to_string(),
        DynSolValue::Bool(b) => b.to_string(),
        other => format!("{other:?}"),
    }
}

fn try_decode_with(entry: &CatalogEntry, log: &RawLog) -> Option<DecodedEvent> {
    let indexed_topics = &log.topics[1.min(log.topics.len())..];
    let indexed_params: Vec<&EventParam> = entry.params.iter().filter(|p| p.indexed).collect();
    if indexed_topics.len() != indexed_params.len() {
        return None;
    }
    let mut fields = Vec::new();
    for (topic, param) in indexed_topics.iter().zip(indexed_params.iter()) {
        fields.push((param.name.to_string(), decode_indexed(topic, param.ty)));
    }
    let non_indexed = decode_non_indexed(entry, &log.data)?;

    // Re-interleave in declaration order.
    let mut ordered = Vec::with_capacity(entry.params.len());
    let mut indexed_iter = fields.into_iter();
    let mut non_indexed_iter = non_indexed.into_iter();
    for param in entry.params {
        if param.indexed {
            ordered.push(indexed_iter.next()?);
        } else {
            ordered.push(non_indexed_iter.next()?);
        }
    }

    Some(DecodedEvent {
        origin: format!("{:#x}", log.address),
        name: entry.name.to_string(),
        ordinal: log.log_index,
        fields: ordered,
    })
}

/// Decode one raw log against the built-in catalogue, trying the topic0-indexed hit
/// first, then every other catalogued signature to handle topic collisions.
pub fn decode_log(log: &RawLog) -> Option<DecodedEvent> {
    let topic0 = log.topics.first()?;

    if let Some((_, entry)) = SELECTOR_INDEX.iter().find(|(sel, _)| sel == topic0) {
        if let Some(decoded) = try_decode_with(entry, log) {
            return Some(decoded);
        }
    }
    SELECTOR_INDEX.iter().find_map(|(_, entry)| try_decode_with(entry, log))
}

/// Decode a batch of logs, sorted ascending by log index (P5).
pub fn decode_logs(logs: &[RawLog]) -> Vec<DecodedEvent> {
    let mut decoded: Vec<DecodedEvent> = logs.iter().filter_map(decode_log).collect();
    decoded.sort_by_key(|e| e.ordinal);
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, U256};

    fn transfer_log(from: Address, to: Address, value: U256, index: u64) -> RawLog {
        let topic0 = keccak256("Transfer(address,address,uint256)".as_bytes());
        let mut from_topic = [0u8; 32];
        from_topic[12..].copy_from_slice(from.as_slice());
        let mut to_topic = [0u8; 32];
        to_topic[12..].copy_from_slice(to.as_slice());
        RawLog {
            address: Address::repeat_byte(0xaa),
            topics: vec![topic0, B256::from(from_topic), B256::from(to_topic)],
            data: value.to_be_bytes::<32>().to_vec(),
            log_index: index,
        }
    }

    #[test]
    fn decodes_transfer_event() {
        let from = address!("0000000000000000000000000000000000000001");
        let to = address!("0000000000000000000000000000000000000002");
        let log = transfer_log(from, to, U256::from(1000u64), 3);
        let decoded = decode_log(&log).expect("should decode");
        assert_eq!(decoded.name, "Transfer");
        assert_eq!(decoded.ordinal, 3);
        assert_eq!(decoded.fields[0], ("from".to_string(), format!("{from:#x}")));
        assert_eq!(decoded.fields[2], ("value".to_string(), "1000".to_string()));
    }

    #[test]
    fn decode_logs_sorts_by_ordinal() {
        let from = address!("0000000000000000000000000000000000000001");
        let to = address!("0000000000000000000000000000000000000002");
        let logs = vec![
            transfer_log(from, to, U256::from(1u64), 5),
            transfer_log(from, to, U256::from(2u64), 1),
        ];
        let decoded = decode_logs(&logs);
        assert_eq!(decoded[0].ordinal, 1);
        assert_eq!(decoded[1].ordinal, 5);
    }
}
