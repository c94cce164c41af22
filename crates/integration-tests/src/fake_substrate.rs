// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! An in-memory stand-in for [`SubstrateForkBackend`], plus the small call-encoder and
//! module-metadata lookups the end-to-end tests drive it with.

use std::collections::BTreeMap;
use std::sync::Mutex;

use alloy_primitives::U256;
use codec::Encode;
use eyre::Result;
use serde_json::Value;
use txsim_common::address::SubstrateAddress;
use txsim_engine::backend::{PaymentInfo, SubstrateForkBackend, SubstrateSubmitOutcome};
use txsim_engine::decode::error_substrate::ModuleMetadataLookup;
use txsim_engine::engine_substrate::RuntimeCallEncoder;
use txsim_engine::types::{SubstrateNative, TokenMetadata};

/// A fake runtime-module fork: native balances live in a plain map, and `new_block()`
/// replays a scripted list of raw event records rather than deriving them from the
/// submitted extrinsic — the same simplification the engine's own unit tests use, since
/// the call bytes a [`RuntimeCallEncoder`] produces are opaque to the fork itself.
pub struct FakeSubstrateBackend {
    native: Mutex<BTreeMap<Vec<u8>, U256>>,
    events: Vec<Value>,
    symbol: String,
}

impl FakeSubstrateBackend {
    /// Build a fake with starting native (free) balances and the events its one block
    /// will report.
    pub fn new(native: BTreeMap<Vec<u8>, U256>, events: Vec<Value>) -> Self {
        Self { native: Mutex::new(native), events, symbol: "UNIT".to_string() }
    }

    /// Read back a native free balance, for test assertions.
    pub fn free_balance_of(&self, addr: &SubstrateAddress) -> U256 {
        *self.native.lock().unwrap().get(addr.as_bytes()).unwrap_or(&U256::ZERO)
    }
}

impl SubstrateForkBackend for FakeSubstrateBackend {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disable_signature_verification(&self) -> Result<()> {
        Ok(())
    }

    async fn enable_signature_verification(&self) -> Result<()> {
        Ok(())
    }

    async fn chain_properties(&self) -> Result<TokenMetadata> {
        Ok(TokenMetadata { symbol: self.symbol.clone(), decimals: 12 })
    }

    async fn native_balance(&self, addr: &SubstrateAddress) -> Result<SubstrateNative> {
        let free = *self.native.lock().unwrap().get(addr.as_bytes()).unwrap_or(&U256::ZERO);
        Ok(SubstrateNative { free, reserved: U256::ZERO, frozen: U256::ZERO })
    }

    async fn asset_balance(&self, _asset: u64, _addr: &SubstrateAddress) -> Result<U256> {
        Ok(U256::ZERO)
    }

    async fn asset_metadata(&self, asset: u64) -> Result<TokenMetadata> {
        Ok(TokenMetadata { symbol: format!("A{asset}"), decimals: 6 })
    }

    async fn account_nonce(&self, _addr: &SubstrateAddress) -> Result<u64> {
        Ok(0)
    }

    async fn payment_info(&self, _call: &[u8], _sender: &SubstrateAddress) -> Result<PaymentInfo> {
        Ok(PaymentInfo { ref_time: 100_000_000, proof_size: 4_096, partial_fee: U256::from(1_000u64) })
    }

    async fn submit_extrinsic(&self, _extrinsic: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn new_block(&self) -> Result<SubstrateSubmitOutcome> {
        // Applying the scripted Transfer/Withdraw/Deposit events against our own ledger
        // keeps `free_balance_of` honest for assertions made after `simulate()` resets.
        for event in &self.events {
            apply_scripted_event(&mut self.native.lock().unwrap(), event);
        }
        Ok(SubstrateSubmitOutcome { events: self.events.clone() })
    }

    async fn reset(&self) -> Result<()> {
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        true
    }
}

fn apply_scripted_event(native: &mut BTreeMap<Vec<u8>, U256>, event: &Value) {
    let Some(inner) = event.get("event") else { return };
    let Some("balances") = inner.get("section").and_then(Value::as_str) else { return };
    let Some(method) = inner.get("method").and_then(Value::as_str) else { return };
    let data = inner.get("data").and_then(Value::as_array).cloned().unwrap_or_default();

    let addr_bytes = |raw: &Value| raw.as_str().and_then(|s| SubstrateAddress::parse(s).ok());
    let amount = |raw: &Value| raw.as_u64().map(U256::from);

    match method {
        "Transfer" => {
            if let (Some(from), Some(to), Some(amount)) =
                (data.first().and_then(addr_bytes), data.get(1).and_then(addr_bytes), data.get(2).and_then(amount))
            {
                let from_balance = *native.get(from.as_bytes()).unwrap_or(&U256::ZERO);
                let to_balance = *native.get(to.as_bytes()).unwrap_or(&U256::ZERO);
                native.insert(from.as_bytes().to_vec(), from_balance.saturating_sub(amount));
                native.insert(to.as_bytes().to_vec(), to_balance.saturating_add(amount));
            }
        }
        "Withdraw" => {
            if let (Some(who), Some(amount)) = (data.first().and_then(addr_bytes), data.get(1).and_then(amount)) {
                let balance = *native.get(who.as_bytes()).unwrap_or(&U256::ZERO);
                native.insert(who.as_bytes().to_vec(), balance.saturating_sub(amount));
            }
        }
        "Deposit" => {
            if let (Some(who), Some(amount)) = (data.first().and_then(addr_bytes), data.get(1).and_then(amount)) {
                let balance = *native.get(who.as_bytes()).unwrap_or(&U256::ZERO);
                native.insert(who.as_bytes().to_vec(), balance.saturating_add(amount));
            }
        }
        _ => {}
    }
}

/// Resolves `balances.transfer` and `utility.batch` into placeholder-but-stable SCALE
/// call bytes, exercising the same nested-call encoding path a real metadata-driven
/// dynamic codec would.
pub struct TestCallEncoder;

impl RuntimeCallEncoder for TestCallEncoder {
    fn encode_call(&self, pallet: &str, method: &str, args: &[Value]) -> Option<Vec<u8>> {
        match (pallet, method) {
            ("balances", "transfer") => {
                let dest = args.first()?.as_str()?;
                let dest_bytes = hex::decode(dest.trim_start_matches("0x")).ok()?;
                let amount = arg_as_u128(args.get(1)?)?;
                let mut out = vec![0x04, 0x00];
                out.extend_from_slice(&dest_bytes);
                out.extend_from_slice(&codec::Compact(amount).encode());
                Some(out)
            }
            ("utility", "batch") => {
                let calls: Vec<Vec<u8>> = args
                    .iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(|s| hex::decode(s.trim_start_matches("0x")).ok())
                    .collect();
                if calls.len() != args.len() {
                    return None;
                }
                let mut out = vec![0x28, 0x00];
                out.extend_from_slice(&codec::Compact(calls.len() as u64).encode());
                for call in calls {
                    out.extend_from_slice(&call);
                }
                Some(out)
            }
            _ => None,
        }
    }
}

fn arg_as_u128(value: &Value) -> Option<u128> {
    value.as_u64().map(u128::from).or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// Resolves pallet index `5` / error index `2` to `Balances::InsufficientBalance`, the
/// one module error the dispatch-failure scenario needs.
pub struct TestMetadataLookup;

impl ModuleMetadataLookup for TestMetadataLookup {
    fn resolve(&self, pallet_index: u8, error_index: u8) -> Option<(String, String, Vec<String>)> {
        match (pallet_index, error_index) {
            (5, 2) => Some((
                "Balances".to_string(),
                "InsufficientBalance".to_string(),
                vec!["Balance too low to send value".to_string()],
            )),
            _ => None,
        }
    }
}
