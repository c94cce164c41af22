// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! The account-model simulation engine (C9, kind A): snapshot → impersonate → execute →
//! two-pass address discovery → diff → restore, serialised by a per-backend mutex.

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{Bytes, U256};
use eyre::{eyre, Result};
use tokio::sync::Mutex;
use tracing::{error, warn};
use txsim_common::address::EvmAddress;
use txsim_common::error::FatalError;
use txsim_common::numeric::{format_amount, parse_amount};

use crate::backend::{EvmCallRequest, EvmCallOutcome, EvmForkBackend};
use crate::decode::error_evm;
use crate::decode::event_evm::decode_logs;
use crate::impact::{build_impact, human_amount};
use crate::snapshot::snapshot_evm;
use crate::types::{
    DecodedEvent, GasReport, GasReportEvm, SimulateRequestEvm, SimulationError, SimulationResponse,
    StateImpactReport, TokenId, TokenMetadata,
};

const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
const TRANSFER_FROM_SELECTOR: [u8; 4] = [0x23, 0xb8, 0x72, 0xdd];

/// The account-model simulation engine, generic over its fork backend so a fake
/// in-memory backend can stand in during tests.
pub struct EngineEvm<B: EvmForkBackend> {
    backend: B,
    lock: Mutex<()>,
    native_symbol: String,
}

impl<B: EvmForkBackend> EngineEvm<B> {
    /// Build an engine around an already-constructed backend.
    pub fn new(backend: B, native_symbol: impl Into<String>) -> Self {
        Self { backend, lock: Mutex::new(()), native_symbol: native_symbol.into() }
    }

    /// The backend this engine drives, for health probes at the composition root.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The native-currency symbol this engine reports balances in.
    pub fn native_symbol(&self) -> &str {
        &self.native_symbol
    }

    /// Run one simulation end to end. Only a stratum-3 (restoration) failure is
    /// returned as `Err`; business and recoverable engine failures are reported inside
    /// a normal `SimulationResponse` with `success: false`.
    pub async fn simulate(&self, request: SimulateRequestEvm) -> Result<SimulationResponse, FatalError> {
        let _guard = self.lock.lock().await;

        let snapshot_id = match self.backend.snapshot().await {
            Ok(id) => id,
            Err(err) => return Ok(self.business_failure(&request, err.to_string())),
        };

        let outcome = self.execute(&request, snapshot_id).await;
        let (response, original_error) = match outcome {
            Ok(response) => (response, None),
            Err(err) => {
                warn!(%err, "recoverable engine error during simulation");
                (self.business_failure(&request, err.to_string()), Some(err.to_string()))
            }
        };

        self.restore(request.sender.as_alloy(), snapshot_id, original_error).await?;
        Ok(response)
    }

    async fn execute(&self, request: &SimulateRequestEvm, snapshot_id: U256) -> Result<SimulationResponse> {
        let data_bytes = match &request.data {
            Some(hex_str) => hex::decode(hex_str.trim_start_matches("0x"))
                .map_err(|_| eyre!("malformed calldata: {hex_str:?}"))?,
            None => Vec::new(),
        };
        let value = match &request.value {
            Some(raw) => parse_amount(raw).map_err(|e| eyre!(e.to_string()))?,
            None => U256::ZERO,
        };
        let gas_limit = match &request.gas_limit {
            Some(raw) => Some(parse_amount(raw).map_err(|e| eyre!(e.to_string()))?.to::<u64>()),
            None => None,
        };

        let extracted_recipient = extract_recipient(&data_bytes);

        let mut tracked_set: BTreeSet<EvmAddress> = BTreeSet::new();
        tracked_set.insert(request.sender);
        tracked_set.insert(request.to);
        if let Some(recipient) = extracted_recipient {
            tracked_set.insert(recipient);
        }
        let mut tracked_addrs: Vec<EvmAddress> = tracked_set.iter().copied().collect();

        let mut before =
            snapshot_evm(&self.backend, &tracked_addrs, &request.track_tokens).await;

        self.backend.impersonate(request.sender.as_alloy()).await?;

        let call_request = EvmCallRequest {
            from: request.sender.as_alloy(),
            to: request.to.as_alloy(),
            data: Bytes::from(data_bytes),
            value,
            gas_limit,
        };

        let mut outcome = self.backend.send(call_request.clone()).await?;
        let mut decoded_events = decode_logs(&outcome.logs);

        let discovered: BTreeSet<EvmAddress> = decoded_events
            .iter()
            .filter(|event| event.name == "Transfer" || event.name == "TransferSingle")
            .filter_map(transfer_parties)
            .flat_map(|(from, to)| [from, to])
            .filter(|addr| !tracked_set.contains(addr))
            .collect();

        if !discovered.is_empty() {
            match self.backend.revert(snapshot_id).await {
                Ok(true) => {}
                Ok(false) => return Err(eyre!("evm_revert returned false during address expansion")),
                Err(err) => return Err(err),
            }

            let discovered_vec: Vec<EvmAddress> = discovered.into_iter().collect();
            let historical_before =
                snapshot_evm(&self.backend, &discovered_vec, &request.track_tokens).await;
            before.extend(historical_before);
            tracked_addrs.extend(discovered_vec);

            self.backend.impersonate(request.sender.as_alloy()).await?;
            outcome = self.backend.send(call_request).await?;
            decoded_events = decode_logs(&outcome.logs);
        }

        let after = snapshot_evm(&self.backend, &tracked_addrs, &request.track_tokens).await;

        let gas = self.gas_report(&outcome);

        if !outcome.success {
            let decoded_error = outcome
                .error
                .as_ref()
                .map(error_evm::decode_error)
                .unwrap_or_else(error_evm::generic_revert);
            return Ok(SimulationResponse {
                success: false,
                state_changes: empty_impact(&request.sender, extracted_recipient.as_ref().or(Some(&request.to))),
                events: decoded_events,
                gas,
                error: Some(SimulationError::Evm(decoded_error)),
            });
        }

        let counterparty = extracted_recipient.unwrap_or(request.to);
        let token_metadata = self.resolve_token_metadata(&request.track_tokens).await;
        let state_changes = build_impact(
            &request.sender,
            Some(&counterparty),
            &before,
            &after,
            &self.native_symbol,
            &token_metadata,
        );

        Ok(SimulationResponse { success: true, state_changes, events: decoded_events, gas, error: None })
    }

    async fn resolve_token_metadata(
        &self,
        tokens: &[EvmAddress],
    ) -> BTreeMap<TokenId, TokenMetadata> {
        let mut out = BTreeMap::new();
        for &token in tokens {
            let id = TokenId::Contract(token);
            let metadata = match self.backend.token_metadata(token.as_alloy()).await {
                Ok(metadata) => metadata,
                Err(_) => TokenMetadata::unknown(&id),
            };
            out.insert(id, metadata);
        }
        out
    }

    fn gas_report(&self, outcome: &EvmCallOutcome) -> GasReport {
        let total_cost = U256::from(outcome.gas_used).saturating_mul(outcome.gas_price);
        GasReport::Evm(GasReportEvm {
            gas_used: outcome.gas_used,
            gas_price: format_amount(outcome.gas_price),
            total_cost_wei: format_amount(total_cost),
            total_cost_native: human_amount(total_cost, 18),
            native_symbol: self.native_symbol.clone(),
        })
    }

    fn business_failure(&self, request: &SimulateRequestEvm, message: String) -> SimulationResponse {
        SimulationResponse {
            success: false,
            state_changes: empty_impact(&request.sender, Some(&request.to)),
            events: Vec::new(),
            gas: GasReport::Evm(GasReportEvm {
                gas_used: 0,
                gas_price: "0".to_string(),
                total_cost_wei: "0".to_string(),
                total_cost_native: "0.0".to_string(),
                native_symbol: self.native_symbol.clone(),
            }),
            error: Some(SimulationError::Evm(crate::types::DecodedErrorEvm::Unknown { message })),
        }
    }

    async fn restore(
        &self,
        sender: alloy_primitives::Address,
        snapshot_id: U256,
        original_error: Option<String>,
    ) -> Result<(), FatalError> {
        if let Err(err) = self.backend.stop_impersonating(sender).await {
            warn!(%err, "failed to stop impersonating sender, continuing with restore");
        }

        match self.backend.revert(snapshot_id).await {
            Ok(true) => Ok(()),
            Ok(false) => self.fallback_reset(original_error.unwrap_or_else(|| "evm_revert returned false".into())).await,
            Err(err) => self.fallback_reset(original_error.unwrap_or_else(|| err.to_string())).await,
        }
    }

    async fn fallback_reset(&self, original: String) -> Result<(), FatalError> {
        match self.backend.reset().await {
            Ok(()) => Ok(()),
            Err(reset_err) => {
                let fatal = FatalError::RestoreFailed { original, restore: reset_err.to_string() };
                error!(%fatal, "fatal: fork state could not be restored");
                Err(fatal)
            }
        }
    }
}

fn empty_impact(sender: &EvmAddress, counterparty: Option<&EvmAddress>) -> StateImpactReport {
    build_impact(sender, counterparty, &BTreeMap::new(), &BTreeMap::new(), "", &BTreeMap::new())
}

/// Extract a `transfer`/`transferFrom` recipient from calldata per the fixed selector
/// table, or `None` for anything else.
fn extract_recipient(data: &[u8]) -> Option<EvmAddress> {
    if data.len() >= 4 + 32 && data[..4] == TRANSFER_SELECTOR {
        return address_from_word(&data[4..36]);
    }
    if data.len() >= 4 + 64 && data[..4] == TRANSFER_FROM_SELECTOR {
        return address_from_word(&data[36..68]);
    }
    None
}

fn address_from_word(word: &[u8]) -> Option<EvmAddress> {
    if word.len() != 32 {
        return None;
    }
    let addr = alloy_primitives::Address::from_slice(&word[12..32]);
    Some(EvmAddress::from(addr))
}

fn transfer_parties(event: &DecodedEvent) -> Option<(EvmAddress, EvmAddress)> {
    let from = field(event, "from")?;
    let to = field(event, "to")?;
    Some((EvmAddress::parse(from).ok()?, EvmAddress::parse(to).ok()?))
}

fn field<'a>(event: &'a DecodedEvent, name: &str) -> Option<&'a str> {
    event.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenMetadata as EngineTokenMetadata;
    use alloy_primitives::{address, Address};
    use std::sync::Mutex as StdMutex;

    struct FakeBackend {
        balances: StdMutex<BTreeMap<Address, U256>>,
        logs: Vec<crate::decode::event_evm::RawLog>,
        receipt_success: bool,
    }

    impl EvmForkBackend for FakeBackend {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn snapshot(&self) -> Result<U256> {
            Ok(U256::from(1u64))
        }
        async fn revert(&self, _id: U256) -> Result<bool> {
            Ok(true)
        }
        async fn reset(&self) -> Result<()> {
            Ok(())
        }
        async fn impersonate(&self, _addr: Address) -> Result<()> {
            Ok(())
        }
        async fn stop_impersonating(&self, _addr: Address) -> Result<()> {
            Ok(())
        }
        async fn native_balance(&self, addr: Address) -> Result<U256> {
            Ok(*self.balances.lock().unwrap().get(&addr).unwrap_or(&U256::ZERO))
        }
        async fn token_balance(&self, _token: Address, _owner: Address) -> Result<U256> {
            Ok(U256::ZERO)
        }
        async fn token_metadata(&self, _token: Address) -> Result<EngineTokenMetadata> {
            Ok(EngineTokenMetadata { symbol: "TOK".into(), decimals: 18 })
        }
        async fn gas_price(&self) -> Result<U256> {
            Ok(U256::from(1_000_000_000u64))
        }
        async fn send(&self, request: EvmCallRequest) -> Result<EvmCallOutcome> {
            let mut balances = self.balances.lock().unwrap();
            let sender_balance = *balances.get(&request.from).unwrap_or(&U256::ZERO);
            let recipient_balance = *balances.get(&request.to).unwrap_or(&U256::ZERO);
            balances.insert(request.from, sender_balance.saturating_sub(request.value));
            balances.insert(request.to, recipient_balance.saturating_add(request.value));
            Ok(EvmCallOutcome {
                success: self.receipt_success,
                gas_used: 21_000,
                gas_price: U256::from(1_000_000_000u64),
                logs: self.logs.clone(),
                error: None,
            })
        }
        async fn is_connected(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn conserves_value_on_simple_transfer() {
        let sender = address!("00000000000000000000000000000000000000a1");
        let to = address!("00000000000000000000000000000000000000a2");
        let backend = FakeBackend {
            balances: StdMutex::new(BTreeMap::from([(sender, U256::from(1_000u64))])),
            logs: Vec::new(),
            receipt_success: true,
        };
        let engine = EngineEvm::new(backend, "ETH");

        let request = SimulateRequestEvm {
            sender: EvmAddress::from(sender),
            to: EvmAddress::from(to),
            data: None,
            value: Some("100".to_string()),
            gas_limit: None,
            track_tokens: Vec::new(),
        };

        let response = engine.simulate(request).await.expect("no fatal error");
        assert!(response.success);
        assert_eq!(response.state_changes.sender.changes[0].delta, "-100");
        let counterparty = response.state_changes.counterparty.expect("counterparty present");
        assert_eq!(counterparty.changes[0].delta, "100");
    }

    #[tokio::test]
    async fn reverted_receipt_is_business_failure_not_fatal() {
        let sender = address!("00000000000000000000000000000000000000b1");
        let to = address!("00000000000000000000000000000000000000b2");
        let backend = FakeBackend {
            balances: StdMutex::new(BTreeMap::new()),
            logs: Vec::new(),
            receipt_success: false,
        };
        let engine = EngineEvm::new(backend, "ETH");
        let request = SimulateRequestEvm {
            sender: EvmAddress::from(sender),
            to: EvmAddress::from(to),
            data: None,
            value: None,
            gas_limit: None,
            track_tokens: Vec::new(),
        };

        let response = engine.simulate(request).await.expect("no fatal error");
        assert!(!response.success);
        assert!(response.error.is_some());
    }

    #[test]
    fn extracts_transfer_recipient() {
        let recipient = address!("0000000000000000000000000000000000000abc");
        let mut data = TRANSFER_SELECTOR.to_vec();
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(recipient.as_slice());
        data.extend_from_slice(&U256::from(1000u64).to_be_bytes::<32>());
        assert_eq!(extract_recipient(&data), Some(EvmAddress::from(recipient)));
    }
}
