// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! The runtime-module simulation engine (C9, kind B): head-reset → build extrinsic →
//! fake-sign → submit → produce a block → reduce balance deltas from events →
//! head-reset, serialised by a per-backend mutex.

use std::collections::BTreeMap;

use alloy_primitives::U256;
use codec::Encode;
use eyre::{eyre, Result};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{error, warn};
use txsim_common::address::SubstrateAddress;
use txsim_common::error::FatalError;
use txsim_common::numeric::{format_amount, parse_amount, SignedAmount};

use crate::backend::substrate::{encode_fake_signed_extrinsic, fake_signature_bytes};
use crate::backend::SubstrateForkBackend;
use crate::decode::error_substrate::{self, ModuleMetadataLookup};
use crate::decode::event_substrate::{
    decode_record, filter_by_extrinsic_index, filter_relevant, max_apply_extrinsic_index,
    to_decoded_event, EventRecord,
};
use crate::impact::human_amount;
use crate::snapshot::snapshot_substrate;
use crate::types::{
    BalanceSnapshot, DecodedErrorSubstrate, ExtrinsicSpec, GasReport, GasReportSubstrate,
    SimulateRequestSubstrate, SimulationError, SimulationResponse, StateImpactReport, StructuredCall,
    TokenId, TokenMetadata,
};

/// Resolves `{pallet, method}` + positional args into a SCALE-encoded call.
///
/// A real deployment backs this with the runtime's metadata-driven dynamic codec (as
/// `subxt`'s `DynamicPayload` does); tests and fakes supply a small in-memory table of
/// known calls, mirroring [`ModuleMetadataLookup`]'s role for error decoding.
pub trait RuntimeCallEncoder {
    /// Encode `pallet.method(args)` into a raw SCALE call, or `None` if unrecognised.
    fn encode_call(&self, pallet: &str, method: &str, args: &[Value]) -> Option<Vec<u8>>;
}

/// A [`RuntimeCallEncoder`] that recognises no calls; useful when only `rawHex`
/// extrinsics are expected.
pub struct NoCallEncoder;

impl RuntimeCallEncoder for NoCallEncoder {
    fn encode_call(&self, _pallet: &str, _method: &str, _args: &[Value]) -> Option<Vec<u8>> {
        None
    }
}

/// A [`ModuleMetadataLookup`] that resolves nothing; every module error decodes to the
/// generic "Unknown module error" record.
pub struct NoMetadataLookup;

impl ModuleMetadataLookup for NoMetadataLookup {
    fn resolve(&self, _pallet_index: u8, _error_index: u8) -> Option<(String, String, Vec<String>)> {
        None
    }
}

const IMMORTAL_ERA: u8 = 0x00;
const EXTRINSIC_VERSION: u8 = 0x84;

/// The runtime-module simulation engine, generic over its fork backend, call encoder
/// and module-error metadata lookup.
pub struct EngineSubstrate<B, C = NoCallEncoder, M = NoMetadataLookup>
where
    B: SubstrateForkBackend,
    C: RuntimeCallEncoder,
    M: ModuleMetadataLookup,
{
    backend: B,
    call_encoder: C,
    metadata: M,
    lock: Mutex<()>,
    native_symbol_override: Option<String>,
}

impl<B, C, M> EngineSubstrate<B, C, M>
where
    B: SubstrateForkBackend,
    C: RuntimeCallEncoder,
    M: ModuleMetadataLookup,
{
    /// Build an engine around an already-constructed backend, call encoder and
    /// module-metadata lookup.
    pub fn new(backend: B, call_encoder: C, metadata: M, native_symbol_override: Option<String>) -> Self {
        Self { backend, call_encoder, metadata, lock: Mutex::new(()), native_symbol_override }
    }

    /// The backend this engine drives, for health probes at the composition root.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The configured native-symbol override, or `"chain-reported"` when the engine
    /// defers to the fork's own `system_properties` on every simulation.
    pub fn native_symbol_hint(&self) -> String {
        self.native_symbol_override.clone().unwrap_or_else(|| "chain-reported".to_string())
    }

    /// Run one simulation end to end. Only a stratum-3 (restoration) failure is
    /// returned as `Err`.
    pub async fn simulate(
        &self,
        request: SimulateRequestSubstrate,
    ) -> Result<SimulationResponse, FatalError> {
        let _guard = self.lock.lock().await;

        if let Err(err) = self.backend.reset().await {
            warn!(%err, "head-reset before simulation failed, attempting simulation anyway");
        }

        let outcome = self.execute(&request).await;
        let (response, original_error, already_reset) = match outcome {
            Ok((response, already_reset)) => (response, None, already_reset),
            Err(err) => {
                warn!(%err, "recoverable engine error during simulation");
                (self.business_failure(&request, err.to_string()), Some(err.to_string()), false)
            }
        };

        if !already_reset {
            self.restore(original_error).await?;
        }
        Ok(response)
    }

    /// Returns the response plus whether a head-reset was already performed as part of
    /// the business-failure path (step 13 of §4.2), so `simulate` doesn't reset twice.
    async fn execute(&self, request: &SimulateRequestSubstrate) -> Result<(SimulationResponse, bool)> {
        let properties = self.backend.chain_properties().await?;
        let native_symbol = self.native_symbol_override.clone().unwrap_or(properties.symbol.clone());

        let call_bytes = build_call_bytes(&request.extrinsic, &self.call_encoder)?;
        let recipient = presumptive_recipient(&request.extrinsic);

        let mut tracked = vec![request.sender.clone()];
        if let Some(recipient) = &recipient {
            tracked.push(recipient.clone());
        }

        let asset_metadata = self.resolve_asset_metadata(&request.track_assets).await;
        let before = snapshot_substrate(&self.backend, &tracked, &request.track_assets).await;

        let payment = self.backend.payment_info(&call_bytes, &request.sender).await?;
        let nonce = self.backend.account_nonce(&request.sender).await?;

        let wire_extrinsic = build_fake_signed_extrinsic(&request.sender, nonce, &call_bytes);

        self.backend.disable_signature_verification().await?;
        self.backend.submit_extrinsic(&wire_extrinsic).await?;
        let outcome = self.backend.new_block().await?;

        let records: Vec<EventRecord> = outcome
            .events
            .iter()
            .enumerate()
            .filter_map(|(i, raw)| decode_record(raw, i as u64, |_, _| None))
            .collect();

        let our_index = max_apply_extrinsic_index(&records);
        let our_events: Vec<&EventRecord> = match our_index {
            Some(index) => filter_by_extrinsic_index(&records, index),
            None => Vec::new(),
        };
        let relevant_events: Vec<_> =
            filter_relevant(&our_events.iter().map(|e| (*e).clone()).collect::<Vec<_>>())
                .into_iter()
                .cloned()
                .collect();
        let decoded_events: Vec<_> = relevant_events.iter().map(to_decoded_event).collect();

        let failure = our_events
            .iter()
            .find(|e| e.pallet.eq_ignore_ascii_case("system") && e.method.eq_ignore_ascii_case("ExtrinsicFailed"));

        let gas = self.gas_report(&payment, &native_symbol);

        if let Some(failure_event) = failure {
            if let Err(err) = self.backend.reset().await {
                return Err(eyre!("reset after dispatch failure also failed: {err}"));
            }
            // `EventRecord::fields` already flattened the raw data into display strings
            // (see `decode_record`), which loses the `module`/`token`/... structure the
            // decoder needs; go back to the untouched record for that one field.
            let dispatch_error_value = outcome
                .events
                .get(failure_event.ordinal as usize)
                .and_then(|raw| raw.pointer("/event/data/0"))
                .cloned()
                .unwrap_or(Value::Null);
            let decoded_error = error_substrate::decode_error(&dispatch_error_value, &self.metadata);
            return Ok((
                SimulationResponse {
                    success: false,
                    state_changes: empty_impact(&request.sender, recipient.as_ref()),
                    events: decoded_events,
                    gas,
                    error: Some(SimulationError::Substrate(decoded_error)),
                },
                true,
            ));
        }

        let deltas = reduce_balance_deltas(&our_events);
        let after_read = snapshot_substrate(&self.backend, &tracked, &request.track_assets).await;
        let after = apply_deltas(&before, &after_read, &deltas);

        let counterparty_has_change = recipient
            .as_ref()
            .map(|addr| deltas.get(addr).map(|d| !d.is_zero()).unwrap_or(false))
            .unwrap_or(false);
        let counterparty = recipient.filter(|_| counterparty_has_change);

        let state_changes = crate::impact::build_impact(
            &request.sender,
            counterparty.as_ref(),
            &before,
            &after,
            &native_symbol,
            &asset_metadata,
        );

        if let Err(err) = self.backend.reset().await {
            return Err(eyre!("reset after successful simulation failed: {err}"));
        }

        Ok((
            SimulationResponse { success: true, state_changes, events: decoded_events, gas, error: None },
            true,
        ))
    }

    async fn resolve_asset_metadata(&self, assets: &[u64]) -> BTreeMap<TokenId, TokenMetadata> {
        let mut out = BTreeMap::new();
        for &asset in assets {
            let id = TokenId::Asset(asset);
            let metadata = match self.backend.asset_metadata(asset).await {
                Ok(metadata) => metadata,
                Err(_) => TokenMetadata::unknown(&id),
            };
            out.insert(id, metadata);
        }
        out
    }

    fn gas_report(&self, payment: &crate::backend::PaymentInfo, native_symbol: &str) -> GasReport {
        GasReport::Substrate(GasReportSubstrate {
            ref_time: payment.ref_time,
            proof_size: payment.proof_size,
            partial_fee: format_amount(payment.partial_fee),
            partial_fee_formatted: human_amount(payment.partial_fee, 12),
            native_symbol: native_symbol.to_string(),
        })
    }

    fn business_failure(&self, request: &SimulateRequestSubstrate, message: String) -> SimulationResponse {
        let symbol = self.native_symbol_override.clone().unwrap_or_else(|| "UNIT".to_string());
        SimulationResponse {
            success: false,
            state_changes: empty_impact(&request.sender, None),
            events: Vec::new(),
            gas: GasReport::Substrate(GasReportSubstrate {
                ref_time: 0,
                proof_size: 0,
                partial_fee: "0".to_string(),
                partial_fee_formatted: "0.0".to_string(),
                native_symbol: symbol,
            }),
            error: Some(SimulationError::Substrate(DecodedErrorSubstrate::Unknown { message })),
        }
    }

    async fn restore(&self, original_error: Option<String>) -> Result<(), FatalError> {
        match self.backend.reset().await {
            Ok(()) => Ok(()),
            Err(first_err) => match self.backend.connect().await {
                Ok(()) => match self.backend.reset().await {
                    Ok(()) => Ok(()),
                    Err(second_err) => {
                        let fatal = FatalError::RestoreFailed {
                            original: original_error.unwrap_or_else(|| first_err.to_string()),
                            restore: second_err.to_string(),
                        };
                        error!(%fatal, "fatal: fork state could not be restored");
                        Err(fatal)
                    }
                },
                Err(reconnect_err) => {
                    let fatal = FatalError::RestoreFailed {
                        original: original_error.unwrap_or_else(|| first_err.to_string()),
                        restore: reconnect_err.to_string(),
                    };
                    error!(%fatal, "fatal: fork state could not be restored");
                    Err(fatal)
                }
            },
        }
    }
}

fn empty_impact(sender: &SubstrateAddress, counterparty: Option<&SubstrateAddress>) -> StateImpactReport {
    crate::impact::build_impact(sender, counterparty, &BTreeMap::new(), &BTreeMap::new(), "", &BTreeMap::new())
}

fn parse_nested_call(value: &Value) -> Option<StructuredCall> {
    serde_json::from_value(value.clone()).ok()
}

fn build_call_bytes(spec: &ExtrinsicSpec, encoder: &impl RuntimeCallEncoder) -> Result<Vec<u8>> {
    match spec {
        ExtrinsicSpec::Raw { raw_hex } => {
            hex::decode(raw_hex.trim_start_matches("0x")).map_err(|_| eyre!("malformed raw extrinsic hex"))
        }
        ExtrinsicSpec::Structured(call) => encode_structured(call, encoder),
    }
}

fn encode_structured(call: &StructuredCall, encoder: &impl RuntimeCallEncoder) -> Result<Vec<u8>> {
    let mut args = Vec::with_capacity(call.args.len());
    for arg in &call.args {
        if let Some(nested) = parse_nested_call(arg) {
            let nested_bytes = encode_structured(&nested, encoder)?;
            args.push(Value::String(format!("0x{}", hex::encode(nested_bytes))));
        } else {
            args.push(arg.clone());
        }
    }
    encoder
        .encode_call(&call.pallet, &call.method, &args)
        .ok_or_else(|| eyre!("unknown extrinsic: {}.{}", call.pallet, call.method))
}

fn presumptive_recipient(spec: &ExtrinsicSpec) -> Option<SubstrateAddress> {
    let ExtrinsicSpec::Structured(call) = spec else { return None };
    if !call.method.to_lowercase().contains("transfer") {
        return None;
    }
    let first = call.args.first()?;
    let raw = first.as_str().map(str::to_string).unwrap_or_else(|| first.to_string());
    SubstrateAddress::parse(&raw).ok()
}

fn build_fake_signed_extrinsic(sender: &SubstrateAddress, nonce: u64, call_bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.push(EXTRINSIC_VERSION);
    body.push(0x00); // address type: AccountId32
    let mut address_bytes = sender.as_bytes().to_vec();
    address_bytes.resize(32, 0);
    body.extend_from_slice(&address_bytes);
    body.push(0x01); // signature type: Sr25519
    body.extend_from_slice(&fake_signature_bytes());
    body.push(IMMORTAL_ERA);
    body.extend_from_slice(&codec::Compact(nonce).encode());
    body.extend_from_slice(&codec::Compact(0u64).encode()); // tip
    body.extend_from_slice(call_bytes);
    encode_fake_signed_extrinsic(&body)
}

fn reduce_balance_deltas(events: &[&EventRecord]) -> BTreeMap<SubstrateAddress, SignedAmount> {
    let mut deltas: BTreeMap<SubstrateAddress, SignedAmount> = BTreeMap::new();
    for event in events {
        if !event.pallet.eq_ignore_ascii_case("balances") {
            continue;
        }
        match event.method.as_str() {
            "Transfer" => {
                if let (Some(from), Some(to), Some(amount)) =
                    (positional(event, 0), positional(event, 1), positional_amount(event, 2))
                {
                    if let Ok(from) = SubstrateAddress::parse(from) {
                        apply(&mut deltas, from, SignedAmount::negative(amount));
                    }
                    if let Ok(to) = SubstrateAddress::parse(to) {
                        apply(&mut deltas, to, SignedAmount::positive(amount));
                    }
                }
            }
            "Withdraw" => {
                if let (Some(who), Some(amount)) = (positional(event, 0), positional_amount(event, 1)) {
                    if let Ok(who) = SubstrateAddress::parse(who) {
                        apply(&mut deltas, who, SignedAmount::negative(amount));
                    }
                }
            }
            "Deposit" => {
                if let (Some(who), Some(amount)) = (positional(event, 0), positional_amount(event, 1)) {
                    if let Ok(who) = SubstrateAddress::parse(who) {
                        apply(&mut deltas, who, SignedAmount::positive(amount));
                    }
                }
            }
            _ => {}
        }
    }
    deltas
}

fn positional<'a>(event: &'a EventRecord, index: usize) -> Option<&'a str> {
    event.fields.get(index).map(|(_, v)| v.as_str())
}

fn positional_amount(event: &EventRecord, index: usize) -> Option<U256> {
    positional(event, index).and_then(|s| parse_amount(s).ok())
}

fn apply(deltas: &mut BTreeMap<SubstrateAddress, SignedAmount>, addr: SubstrateAddress, delta: SignedAmount) {
    let entry = deltas.entry(addr).or_insert(SignedAmount::ZERO);
    if let Some(sum) = entry.checked_add(delta) {
        *entry = sum;
    }
}

fn apply_deltas(
    before: &BTreeMap<SubstrateAddress, BalanceSnapshot>,
    after_read: &BTreeMap<SubstrateAddress, BalanceSnapshot>,
    deltas: &BTreeMap<SubstrateAddress, SignedAmount>,
) -> BTreeMap<SubstrateAddress, BalanceSnapshot> {
    let mut out = BTreeMap::new();
    for (addr, before_snap) in before {
        let delta = deltas.get(addr).copied().unwrap_or(SignedAmount::ZERO);
        let native = delta.apply_to(before_snap.native);
        let fungibles = after_read.get(addr).map(|s| s.fungibles.clone()).unwrap_or_default();
        out.insert(addr.clone(), BalanceSnapshot { native, fungibles });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{PaymentInfo, SubstrateSubmitOutcome};
    use crate::types::{SubstrateNative, TokenMetadata as EngineTokenMetadata};
    use serde_json::json;

    struct FakeBackend {
        events: Vec<Value>,
        native: std::sync::Mutex<BTreeMap<Vec<u8>, U256>>,
    }

    impl SubstrateForkBackend for FakeBackend {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn disable_signature_verification(&self) -> Result<()> {
            Ok(())
        }
        async fn enable_signature_verification(&self) -> Result<()> {
            Ok(())
        }
        async fn chain_properties(&self) -> Result<EngineTokenMetadata> {
            Ok(EngineTokenMetadata { symbol: "UNIT".into(), decimals: 12 })
        }
        async fn native_balance(&self, addr: &SubstrateAddress) -> Result<SubstrateNative> {
            let free = *self.native.lock().unwrap().get(addr.as_bytes()).unwrap_or(&U256::ZERO);
            Ok(SubstrateNative { free, reserved: U256::ZERO, frozen: U256::ZERO })
        }
        async fn asset_balance(&self, _asset: u64, _addr: &SubstrateAddress) -> Result<U256> {
            Ok(U256::ZERO)
        }
        async fn asset_metadata(&self, asset: u64) -> Result<EngineTokenMetadata> {
            Ok(EngineTokenMetadata { symbol: format!("A{asset}"), decimals: 6 })
        }
        async fn account_nonce(&self, _addr: &SubstrateAddress) -> Result<u64> {
            Ok(0)
        }
        async fn payment_info(&self, _call: &[u8], _sender: &SubstrateAddress) -> Result<PaymentInfo> {
            Ok(PaymentInfo { ref_time: 100, proof_size: 10, partial_fee: U256::from(500u64) })
        }
        async fn submit_extrinsic(&self, _extrinsic: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn new_block(&self) -> Result<SubstrateSubmitOutcome> {
            Ok(SubstrateSubmitOutcome { events: self.events.clone() })
        }
        async fn reset(&self) -> Result<()> {
            Ok(())
        }
        async fn is_connected(&self) -> bool {
            true
        }
    }

    fn transfer_event(from: &str, to: &str, amount: u64, index: u32) -> Value {
        json!({
            "phase": { "ApplyExtrinsic": index },
            "event": { "section": "balances", "method": "Transfer", "data": [from, to, amount] }
        })
    }

    #[test]
    fn fake_extrinsic_has_expected_header_bytes() {
        let sender = SubstrateAddress::from_bytes(vec![0xaa; 32]);
        let call = vec![0x01, 0x02];
        let wire = build_fake_signed_extrinsic(&sender, 7, &call);
        // after the compact length prefix, the body starts with the version byte.
        assert!(wire.windows(1).any(|w| w == [EXTRINSIC_VERSION]));
        assert!(wire.ends_with(&call));
    }

    #[tokio::test]
    async fn reduces_transfer_event_into_native_delta() {
        let sender = SubstrateAddress::parse("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        let recipient = SubstrateAddress::parse("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb").unwrap();
        let backend = FakeBackend {
            events: vec![
                transfer_event(&sender.to_string(), &recipient.to_string(), 100, 0),
                json!({ "phase": "Initialization", "event": { "section": "system", "method": "ExtrinsicSuccess", "data": [] } }),
            ],
            native: std::sync::Mutex::new(BTreeMap::from([(sender.as_bytes().to_vec(), U256::from(1000u64))])),
        };
        let engine = EngineSubstrate::new(backend, NoCallEncoder, NoMetadataLookup, None);

        let request = SimulateRequestSubstrate {
            sender: sender.clone(),
            extrinsic: ExtrinsicSpec::Raw { raw_hex: "0x0102".to_string() },
            track_assets: Vec::new(),
        };

        let response = engine.simulate(request).await.expect("no fatal error");
        assert!(response.success);
        assert_eq!(response.state_changes.sender.changes[0].delta, "-100");
    }
}
