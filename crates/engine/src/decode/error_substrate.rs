// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! Runtime-module error decoding (C2): turn a dispatch-error value into a tagged,
//! total [`DecodedErrorSubstrate`].

use serde_json::Value;

use crate::types::DecodedErrorSubstrate;

/// Resolves a pallet/error-index pair to a human-readable name and docs.
///
/// A real deployment backs this with runtime metadata (`Metadata::pallet(index)` then
/// `.error_variant(error_index)`); tests and fakes supply a small in-memory table.
pub trait ModuleMetadataLookup {
    /// Resolve `(pallet_index, error_index)` to `(pallet_name, error_name, docs)`.
    fn resolve(&self, pallet_index: u8, error_index: u8) -> Option<(String, String, Vec<String>)>;
}

/// Decode a runtime dispatch-error value into a tagged, total [`DecodedErrorSubstrate`].
pub fn decode_error(error: &Value, metadata: &dyn ModuleMetadataLookup) -> DecodedErrorSubstrate {
    if let Some(module) = error.pointer("/module").or_else(|| error.get("Module")) {
        let pallet_index = module.get("index").and_then(Value::as_u64).unwrap_or_default() as u8;
        let error_index = module
            .get("error")
            .and_then(|v| v.as_u64().or_else(|| v.as_array().and_then(|a| a.first()?.as_u64())))
            .unwrap_or_default() as u8;

        return match metadata.resolve(pallet_index, error_index) {
            Some((pallet, error, docs)) => {
                DecodedErrorSubstrate::Module { pallet, error, docs: docs.join("\n") }
            }
            None => DecodedErrorSubstrate::Module {
                pallet: "Unknown".to_string(),
                error: "Unknown".to_string(),
                docs: "Unknown module error".to_string(),
            },
        };
    }

    if is_truthy(error, "isBadOrigin") || matches_variant(error, "BadOrigin") {
        return DecodedErrorSubstrate::BadOrigin;
    }
    if is_truthy(error, "isCannotLookup") || matches_variant(error, "CannotLookup") {
        return DecodedErrorSubstrate::CannotLookup;
    }
    if let Some(value) = error.get("Token").or_else(|| error.get("token")) {
        return DecodedErrorSubstrate::Token { message: stringify(value) };
    }
    if let Some(value) = error.get("Arithmetic").or_else(|| error.get("arithmetic")) {
        return DecodedErrorSubstrate::Arithmetic { message: stringify(value) };
    }
    if let Some(value) = error.get("Other").or_else(|| error.pointer("/asOther")) {
        let text = value.as_str().map(str::to_string).unwrap_or_else(|| "Other error".to_string());
        return DecodedErrorSubstrate::Other { message: text };
    }

    if let Some(object) = error.as_object() {
        if object.len() == 1 {
            let (key, value) = object.iter().next().expect("len==1");
            if value.is_string() || value.is_number() || value.is_boolean() {
                return DecodedErrorSubstrate::Unknown {
                    message: format!("{key}: {}", stringify(value)),
                };
            }
        }
    }

    if let Some(text) = error.as_str() {
        return DecodedErrorSubstrate::Unknown { message: text.to_string() };
    }
    if let Some(text) = error.get("message").and_then(Value::as_str) {
        return DecodedErrorSubstrate::Unknown { message: text.to_string() };
    }

    DecodedErrorSubstrate::Unknown { message: "Unknown error occurred".to_string() }
}

fn is_truthy(error: &Value, key: &str) -> bool {
    error.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn matches_variant(error: &Value, name: &str) -> bool {
    error.as_str() == Some(name) || error.get(name).is_some()
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FakeMetadata;
    impl ModuleMetadataLookup for FakeMetadata {
        fn resolve(
            &self,
            pallet_index: u8,
            error_index: u8,
        ) -> Option<(String, String, Vec<String>)> {
            match (pallet_index, error_index) {
                (5, 2) => Some((
                    "Balances".to_string(),
                    "InsufficientBalance".to_string(),
                    vec!["Balance too low".to_string()],
                )),
                _ => None,
            }
        }
    }

    #[test]
    fn decodes_module_error() {
        let error = json!({ "module": { "index": 5, "error": 2 } });
        let decoded = decode_error(&error, &FakeMetadata);
        assert_eq!(
            decoded,
            DecodedErrorSubstrate::Module {
                pallet: "Balances".to_string(),
                error: "InsufficientBalance".to_string(),
                docs: "Balance too low".to_string(),
            }
        );
    }

    #[test]
    fn unresolvable_module_error_falls_back() {
        let error = json!({ "module": { "index": 99, "error": 99 } });
        let decoded = decode_error(&error, &FakeMetadata);
        assert_eq!(
            decoded,
            DecodedErrorSubstrate::Module {
                pallet: "Unknown".to_string(),
                error: "Unknown".to_string(),
                docs: "Unknown module error".to_string(),
            }
        );
    }

    #[test]
    fn decodes_bad_origin() {
        let error = json!({ "isBadOrigin": true });
        assert_eq!(decode_error(&error, &FakeMetadata), DecodedErrorSubstrate::BadOrigin);
    }

    #[test]
    fn totality_on_null() {
        let error = json!(null);
        assert_eq!(
            decode_error(&error, &FakeMetadata),
            DecodedErrorSubstrate::Unknown { message: "Unknown error occurred".to_string() }
        );
    }
}
