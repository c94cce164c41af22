// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! Runtime-module event decoding (C4): walk raw event records, attach their block
//! phase, and filter by originating extrinsic index.

use serde_json::Value;

use crate::types::DecodedEvent;

/// The block phase an event record was produced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Produced while applying extrinsic `index`.
    ApplyExtrinsic(u32),
    /// Produced during block initialization.
    Initialization,
    /// Produced during block finalization.
    Finalization,
    /// An unrecognised phase shape.
    Unknown,
}

impl Phase {
    /// Parse a raw `{ApplyExtrinsic: n} | "Initialization" | "Finalization"` phase value.
    pub fn parse(raw: &Value) -> Self {
        if let Some(index) = raw.get("ApplyExtrinsic").and_then(Value::as_u64) {
            return Self::ApplyExtrinsic(index as u32);
        }
        match raw.as_str() {
            Some("Initialization") => Self::Initialization,
            Some("Finalization") => Self::Finalization,
            _ => Self::Unknown,
        }
    }
}

/// One decoded raw event record, before the relevance filter is applied.
#[derive(Debug, Clone)]
pub struct EventRecord {
    /// The event's phase within the block.
    pub phase: Phase,
    /// The pallet (section) name, e.g. `balances`.
    pub pallet: String,
    /// The method name, e.g. `Transfer`.
    pub method: String,
    /// The decoded event record's index within `system.events()`.
    pub ordinal: u64,
    /// Field name → stringified-value pairs, in declaration order.
    pub fields: Vec<(String, String)>,
}

const RELEVANT_PALLETS: &[&str] =
    &["balances", "assets", "tokens", "system", "transactionpayment"];
const RELEVANT_METHODS: &[&str] = &[
    "transfer",
    "deposit",
    "withdraw",
    "reserved",
    "unreserved",
    "extrinsicsuccess",
    "extrinsicfailed",
];

fn format_field_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(format_field_value).collect();
            format!("[{}]", rendered.join(", "))
        }
        Value::Object(map) => {
            let rendered: Vec<String> =
                map.iter().map(|(k, v)| format!("{k}: {}", format_field_value(v))).collect();
            format!("{{{}}}", rendered.join(", "))
        }
    }
}

/// Decode one raw `{event: {section, method, data}, phase}` record, pairing `data[i]`
/// with metadata field names where available, else `arg<i>`.
pub fn decode_record(
    raw: &Value,
    ordinal: u64,
    field_names: impl Fn(&str, &str) -> Option<Vec<String>>,
) -> Option<EventRecord> {
    let event = raw.get("event")?;
    let pallet = event.get("section").and_then(Value::as_str)?.to_string();
    let method = event.get("method").and_then(Value::as_str)?.to_string();
    let data = event.get("data").and_then(Value::as_array).cloned().unwrap_or_default();

    let names = field_names(&pallet, &method);
    let fields = data
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let name = names.as_ref().and_then(|n| n.get(i)).cloned().unwrap_or(format!("arg{i}"));
            (name, format_field_value(value))
        })
        .collect();

    let phase = raw.get("phase").map(Phase::parse).unwrap_or(Phase::Unknown);
    Some(EventRecord { phase, pallet, method, ordinal, fields })
}

/// Convert a decoded record into the backend-agnostic reporting type.
pub fn to_decoded_event(record: &EventRecord) -> DecodedEvent {
    DecodedEvent {
        origin: record.pallet.clone(),
        name: record.method.clone(),
        ordinal: record.ordinal,
        fields: record.fields.clone(),
    }
}

/// Filter records down to those produced while applying extrinsic `index`.
pub fn filter_by_extrinsic_index(records: &[EventRecord], index: u32) -> Vec<&EventRecord> {
    records.iter().filter(|r| r.phase == Phase::ApplyExtrinsic(index)).collect()
}

/// Find the maximum `ApplyExtrinsic` index across all records; `None` if there is none.
pub fn max_apply_extrinsic_index(records: &[EventRecord]) -> Option<u32> {
    records
        .iter()
        .filter_map(|r| match r.phase {
            Phase::ApplyExtrinsic(i) => Some(i),
            _ => None,
        })
        .max()
}

/// Filter records down to the relevant pallets/methods for the user-visible events list.
pub fn filter_relevant(records: &[EventRecord]) -> Vec<&EventRecord> {
    records
        .iter()
        .filter(|r| {
            RELEVANT_PALLETS.contains(&r.pallet.to_lowercase().as_str())
                || RELEVANT_METHODS.contains(&r.method.to_lowercase().as_str())
        })
        .collect()
}
