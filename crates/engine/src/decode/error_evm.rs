// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! Account-model error decoding (C1): turn an arbitrary raised error into a tagged,
//! total [`DecodedErrorEvm`].

use alloy_dyn_abi::DynSolType;
use alloy_primitives::U256;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;

use crate::types::DecodedErrorEvm;

const PANIC_SELECTOR: &str = "4e487b71";
const REVERT_SELECTOR: &str = "08c379a0";

fn panic_message(code: u64) -> &'static str {
    match code {
        0x00 => "Generic compiler-inserted panic",
        0x01 => "Assertion failed",
        0x11 => "Arithmetic operation overflowed or underflowed",
        0x12 => "Division or modulo by zero",
        0x21 => "Invalid enum value conversion",
        0x22 => "Storage byte array accessed incorrectly",
        0x31 => "Pop on empty array",
        0x32 => "Array index out of bounds",
        0x41 => "Out-of-memory / too-large allocation",
        0x51 => "Called an uninitialized internal function",
        _ => "Unknown panic code",
    }
}

static CUSTOM_ERRORS: Lazy<BTreeMap<&'static str, &'static str>> = Lazy::new(|| {
    BTreeMap::from([
        ("e450d38c", "InsufficientBalance(address,uint256,uint256)"),
        ("fb8f41b2", "InsufficientAllowance(address,uint256,uint256)"),
    ])
});

/// Probe a JSON error value for a hex revert payload, checking `error.data`,
/// `error.info.error.data`, `error.error.data`, or a `data="(0x...)"` substring in any
/// message field.
pub fn extract_payload(error: &serde_json::Value) -> Option<String> {
    let candidates = [
        error.pointer("/data"),
        error.pointer("/info/error/data"),
        error.pointer("/error/data"),
    ];
    for candidate in candidates.into_iter().flatten() {
        if let Some(s) = candidate.as_str() {
            if s.starts_with("0x") {
                return Some(s.to_string());
            }
        }
    }

    for message in [error.pointer("/message"), error.pointer("/reason"), Some(error)] {
        if let Some(text) = message.and_then(|v| v.as_str()) {
            if let Some(start) = text.find("data=\"") {
                let rest = &text[start + 6..];
                if let Some(end) = rest.find('"') {
                    return Some(rest[..end].to_string());
                }
            }
        }
    }
    None
}

fn clean_message(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(stripped) = raw.strip_prefix("Error: ") {
        return clean_message(stripped);
    }
    for pattern in ["execution reverted: \"", "reason=\""] {
        if let Some(start) = raw.find(pattern) {
            let rest = &raw[start + pattern.len()..];
            if let Some(end) = rest.find('"') {
                return rest[..end].to_string();
            }
        }
    }
    if raw == "execution reverted" {
        return "Transaction reverted".to_string();
    }
    raw.to_string()
}

/// Decode an arbitrary raised error (as captured from an RPC failure) into a tagged,
/// total [`DecodedErrorEvm`].
pub fn decode_error(error: &serde_json::Value) -> DecodedErrorEvm {
    if let Some(payload) = extract_payload(error) {
        let hex_body = payload.trim_start_matches("0x");
        if hex_body.len() >= 10 {
            let selector = &hex_body[..8];
            let body = &hex_body[8..];
            if selector == PANIC_SELECTOR {
                if let Ok(bytes) = hex::decode(body) {
                    if let Ok(value) = DynSolType::Uint(256).abi_decode(&bytes) {
                        if let Some(word) = value.as_uint() {
                            let code: u64 = word.0.to::<u64>();
                            return DecodedErrorEvm::Panic {
                                code,
                                message: panic_message(code).to_string(),
                            };
                        }
                    }
                }
            } else if selector == REVERT_SELECTOR {
                if let Ok(bytes) = hex::decode(body) {
                    if let Ok(value) = DynSolType::String.abi_decode(&bytes) {
                        if let Some(message) = value.as_str() {
                            let message = if message.is_empty() {
                                "Transaction reverted".to_string()
                            } else {
                                message.to_string()
                            };
                            return DecodedErrorEvm::Revert { message };
                        }
                    }
                }
                return DecodedErrorEvm::Revert { message: "Transaction reverted".to_string() };
            } else if let Some(signature) = CUSTOM_ERRORS.get(selector) {
                let name = signature.split('(').next().unwrap_or(signature).to_string();
                return DecodedErrorEvm::Custom { name, args: None };
            }
        }
    }

    for pointer in ["/reason", "/info/error/message", "/message"] {
        if let Some(text) = error.pointer(pointer).and_then(|v| v.as_str()) {
            return DecodedErrorEvm::Unknown { message: clean_message(text) };
        }
    }
    if let Some(text) = error.as_str() {
        return DecodedErrorEvm::Unknown { message: clean_message(text) };
    }

    DecodedErrorEvm::Unknown { message: "Unknown error occurred".to_string() }
}

/// Build the revert payload for a zero-status receipt with no richer decoded error.
pub fn generic_revert() -> DecodedErrorEvm {
    DecodedErrorEvm::Revert { message: "Transaction reverted".to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_dyn_abi::DynSolValue;
    use serde_json::json;

    fn encode_revert_string(message: &str) -> String {
        let encoded = DynSolValue::String(message.to_string()).abi_encode();
        format!("0x{REVERT_SELECTOR}{}", hex::encode(encoded))
    }

    #[test]
    fn decodes_revert_string() {
        let data = encode_revert_string("insufficient balance");
        let error = json!({ "data": data });
        let decoded = decode_error(&error);
        assert_eq!(
            decoded,
            DecodedErrorEvm::Revert { message: "insufficient balance".to_string() }
        );
    }

    #[test]
    fn decodes_panic_code() {
        let mut payload = hex::decode(PANIC_SELECTOR).unwrap();
        payload.extend(U256::from(0x11u64).to_be_bytes::<32>());
        let data = format!("0x{}", hex::encode(payload));
        let error = json!({ "error": { "data": data } });
        assert_eq!(
            decode_error(&error),
            DecodedErrorEvm::Panic {
                code: 0x11,
                message: "Arithmetic operation overflowed or underflowed".to_string()
            }
        );
    }

    #[test]
    fn falls_back_to_reason() {
        let error = json!({ "reason": "Error: execution reverted: \"custom reason\"" });
        assert_eq!(
            decode_error(&error),
            DecodedErrorEvm::Unknown { message: "custom reason".to_string() }
        );
    }

    #[test]
    fn totality_on_unrecognised_input() {
        let error = json!(null);
        assert_eq!(
            decode_error(&error),
            DecodedErrorEvm::Unknown { message: "Unknown error occurred".to_string() }
        );
    }
}
