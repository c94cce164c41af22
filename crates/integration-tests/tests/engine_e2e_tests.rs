// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end scenarios (S1-S6) driving both engines against fake fork backends, plus
//! spot-checks of the properties in the engines' invariant catalogue.

use std::collections::BTreeMap;

use alloy_primitives::{address, U256};
use serde_json::json;
use txsim_common::address::{EvmAddress, SubstrateAddress};
use txsim_engine::engine_evm::EngineEvm;
use txsim_engine::engine_substrate::EngineSubstrate;
use txsim_engine::types::{
    ExtrinsicSpec, GasReport, SimulateRequestEvm, SimulateRequestSubstrate, StructuredCall,
};
use txsim_integration_tests::fake_evm::{FakeEvmBackend, ScriptedReceipt};
use txsim_integration_tests::fake_substrate::{FakeSubstrateBackend, TestCallEncoder, TestMetadataLookup};

fn substrate_addr(byte: u8) -> SubstrateAddress {
    SubstrateAddress::from_bytes(vec![byte; 32])
}

// S1: kind A native transfer.
#[tokio::test]
async fn s1_native_transfer_conserves_value() {
    let sender = address!("1111111111111111111111111111111111111111");
    let to = address!("2222222222222222222222222222222222222222");
    let backend = FakeEvmBackend::new(BTreeMap::from([(
        sender,
        U256::from(1_000_000_000_000_000_000u128),
    )]));
    let engine = EngineEvm::new(backend, "ETH");

    let request = SimulateRequestEvm {
        sender: EvmAddress::from(sender),
        to: EvmAddress::from(to),
        data: None,
        value: Some("100000000000000000".to_string()),
        gas_limit: None,
        track_tokens: Vec::new(),
    };

    let response = engine.simulate(request).await.expect("no fatal error");
    assert!(response.success);
    assert!(response.events.is_empty());
    assert_eq!(response.state_changes.sender.changes[0].delta, "-100000000000000000");
    let counterparty = response.state_changes.counterparty.expect("counterparty present");
    assert_eq!(counterparty.changes[0].delta, "100000000000000000");
    match response.gas {
        GasReport::Evm(gas) => assert_eq!(gas.gas_used, 21_000),
        GasReport::Substrate(_) => panic!("expected an account-model gas report"),
    }
}

// S2: kind A ERC20 transfer via calldata; counterparty is the calldata recipient, not `to`.
#[tokio::test]
async fn s2_erc20_transfer_counterparty_is_calldata_recipient() {
    let sender = address!("3333333333333333333333333333333333333333");
    let token = address!("4444444444444444444444444444444444444444");
    let recipient = address!("5555555555555555555555555555555555555555");

    let backend = FakeEvmBackend::new(BTreeMap::new())
        .with_token(token, BTreeMap::from([(sender, U256::from(1_000u64))]));
    let engine = EngineEvm::new(backend, "ETH");

    let mut data = vec![0xa9, 0x05, 0x9c, 0xbb];
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(recipient.as_slice());
    data.extend_from_slice(&U256::from(1_000u64).to_be_bytes::<32>());

    let request = SimulateRequestEvm {
        sender: EvmAddress::from(sender),
        to: EvmAddress::from(token),
        data: Some(format!("0x{}", hex::encode(data))),
        value: None,
        gas_limit: None,
        track_tokens: vec![EvmAddress::from(token)],
    };

    let response = engine.simulate(request).await.expect("no fatal error");
    assert!(response.success);

    let counterparty = response.state_changes.counterparty.expect("counterparty present");
    assert_eq!(counterparty.address, EvmAddress::from(recipient).to_string());
    assert_eq!(counterparty.changes[0].delta, "1000");
    assert_eq!(response.state_changes.sender.changes[0].delta, "-1000");

    assert_eq!(response.events.len(), 1);
    assert_eq!(response.events[0].name, "Transfer");
}

// S3: kind A revert, reported as a business failure with an empty impact report.
#[tokio::test]
async fn s3_reverted_transaction_is_business_failure() {
    let sender = address!("6666666666666666666666666666666666666666");
    let to = address!("7777777777777777777777777777777777777777");

    let backend = FakeEvmBackend::new(BTreeMap::from([(sender, U256::from(10u64))])).with_receipts(vec![
        ScriptedReceipt { success: false, error: None },
    ]);
    let engine = EngineEvm::new(backend, "ETH");

    let request = SimulateRequestEvm {
        sender: EvmAddress::from(sender),
        to: EvmAddress::from(to),
        data: None,
        value: Some("5".to_string()),
        gas_limit: None,
        track_tokens: Vec::new(),
    };

    let response = engine.simulate(request).await.expect("no fatal error");
    assert!(!response.success);
    assert!(response.state_changes.sender.changes.is_empty());
    let error = response.error.expect("error present on failure");
    match error {
        txsim_engine::types::SimulationError::Evm(decoded) => {
            assert_eq!(decoded.message(), "Transaction reverted");
        }
        txsim_engine::types::SimulationError::Substrate(_) => panic!("expected an evm error"),
    }
}

// S4: kind B balances.transfer plus a Withdraw fee event.
#[tokio::test]
async fn s4_substrate_transfer_with_fee_withdrawal() {
    let sender = substrate_addr(0xaa);
    let recipient = substrate_addr(0xbb);

    let events = vec![
        json!({
            "phase": { "ApplyExtrinsic": 0 },
            "event": {
                "section": "balances",
                "method": "Transfer",
                "data": [sender.to_string(), recipient.to_string(), 1_000_000_000_000_000_000u128],
            }
        }),
        json!({
            "phase": { "ApplyExtrinsic": 0 },
            "event": {
                "section": "balances",
                "method": "Withdraw",
                "data": [sender.to_string(), 100_000_000_000_000_000u128],
            }
        }),
        json!({
            "phase": { "ApplyExtrinsic": 0 },
            "event": { "section": "system", "method": "ExtrinsicSuccess", "data": [] }
        }),
    ];

    let backend = FakeSubstrateBackend::new(
        BTreeMap::from([
            (sender.as_bytes().to_vec(), U256::from(2_000_000_000_000_000_000u128)),
            (recipient.as_bytes().to_vec(), U256::from(500_000_000_000_000_000u128)),
        ]),
        events,
    );
    let engine = EngineSubstrate::new(backend, TestCallEncoder, TestMetadataLookup, None);

    let request = SimulateRequestSubstrate {
        sender: sender.clone(),
        extrinsic: ExtrinsicSpec::Structured(StructuredCall {
            pallet: "balances".to_string(),
            method: "transfer".to_string(),
            args: vec![json!(recipient.to_string()), json!(1_000_000_000_000_000_000u128)],
        }),
        track_assets: Vec::new(),
    };

    let response = engine.simulate(request).await.expect("no fatal error");
    assert!(response.success);
    assert_eq!(response.state_changes.sender.changes[0].delta, "-1100000000000000000");
    let counterparty = response.state_changes.counterparty.expect("counterparty present");
    assert_eq!(counterparty.changes[0].delta, "1000000000000000000");
    assert!(response.state_changes.other_affected.is_empty());
}

// S5: kind B ExtrinsicFailed, module error decoded via the metadata lookup.
#[tokio::test]
async fn s5_extrinsic_failed_decodes_module_error() {
    let sender = substrate_addr(0xcc);

    let events = vec![json!({
        "phase": { "ApplyExtrinsic": 0 },
        "event": {
            "section": "system",
            "method": "ExtrinsicFailed",
            "data": [{ "module": { "index": 5, "error": 2 } }],
        }
    })];

    let backend = FakeSubstrateBackend::new(
        BTreeMap::from([(sender.as_bytes().to_vec(), U256::from(10u64))]),
        events,
    );
    let engine = EngineSubstrate::new(backend, TestCallEncoder, TestMetadataLookup, None);

    let request = SimulateRequestSubstrate {
        sender: sender.clone(),
        extrinsic: ExtrinsicSpec::Raw { raw_hex: "0x0000".to_string() },
        track_assets: Vec::new(),
    };

    let response = engine.simulate(request).await.expect("no fatal error");
    assert!(!response.success);
    match response.error.expect("error present on failure") {
        txsim_engine::types::SimulationError::Substrate(decoded) => {
            assert_eq!(
                decoded,
                txsim_engine::types::DecodedErrorSubstrate::Module {
                    pallet: "Balances".to_string(),
                    error: "InsufficientBalance".to_string(),
                    docs: "Balance too low to send value".to_string(),
                }
            );
        }
        txsim_engine::types::SimulationError::Evm(_) => panic!("expected a substrate error"),
    }
    match response.gas {
        GasReport::Substrate(gas) => assert_eq!(gas.ref_time, 100_000_000),
        GasReport::Evm(_) => panic!("expected a substrate gas report"),
    }
}

// S6: kind B nested utility.batch wrapping two balances.transfer calls.
#[tokio::test]
async fn s6_nested_batch_produces_two_transfer_deltas() {
    let sender = substrate_addr(0x01);
    let addr1 = substrate_addr(0x02);
    let addr2 = substrate_addr(0x03);

    let events = vec![
        json!({
            "phase": { "ApplyExtrinsic": 0 },
            "event": {
                "section": "balances",
                "method": "Transfer",
                "data": [sender.to_string(), addr1.to_string(), 1_000_000_000_000_000_000u128],
            }
        }),
        json!({
            "phase": { "ApplyExtrinsic": 0 },
            "event": {
                "section": "balances",
                "method": "Transfer",
                "data": [sender.to_string(), addr2.to_string(), 2_000_000_000_000_000_000u128],
            }
        }),
        json!({
            "phase": { "ApplyExtrinsic": 0 },
            "event": { "section": "system", "method": "ExtrinsicSuccess", "data": [] }
        }),
    ];

    let backend = FakeSubstrateBackend::new(
        BTreeMap::from([(sender.as_bytes().to_vec(), U256::from(10_000_000_000_000_000_000u128))]),
        events,
    );
    let engine = EngineSubstrate::new(backend, TestCallEncoder, TestMetadataLookup, None);

    // Each element of `args` is itself parsed as a nested `StructuredCall` (see
    // `encode_structured`), so the two inner transfers are direct batch args, not
    // wrapped in a further array.
    let inner_calls = vec![
        json!({ "pallet": "balances", "method": "transfer", "args": [addr1.to_string(), 1_000_000_000_000_000_000u128] }),
        json!({ "pallet": "balances", "method": "transfer", "args": [addr2.to_string(), 2_000_000_000_000_000_000u128] }),
    ];
    let request = SimulateRequestSubstrate {
        sender: sender.clone(),
        extrinsic: ExtrinsicSpec::Structured(StructuredCall {
            pallet: "utility".to_string(),
            method: "batch".to_string(),
            args: inner_calls,
        }),
        track_assets: Vec::new(),
    };

    let response = engine.simulate(request).await.expect("no fatal error");
    assert!(response.success);
    assert_eq!(response.events.len(), 2);
    assert!(response.state_changes.counterparty.is_none());

    let other: BTreeMap<String, String> = response
        .state_changes
        .other_affected
        .iter()
        .map(|state| (state.address.clone(), state.changes[0].delta.clone()))
        .collect();
    assert_eq!(other.get(&addr1.to_string()), Some(&"1000000000000000000".to_string()));
    assert_eq!(other.get(&addr2.to_string()), Some(&"2000000000000000000".to_string()));
}

// P2: restore runs after both a failed and a successful simulation, so the same
// backend can be driven through repeated revert/restore cycles with no accumulated
// state (an unrestored fork would otherwise carry the first call's balance mutation
// into the second).
#[tokio::test]
async fn p2_restore_idempotence_across_repeated_simulations() {
    let sender = address!("8888888888888888888888888888888888888888");
    let to = address!("9999999999999999999999999999999999999999");

    let backend = FakeEvmBackend::new(BTreeMap::from([(sender, U256::from(1_000u64))]));
    let engine = EngineEvm::new(backend, "ETH");

    let request = || SimulateRequestEvm {
        sender: EvmAddress::from(sender),
        to: EvmAddress::from(to),
        data: None,
        value: Some("10".to_string()),
        gas_limit: None,
        track_tokens: Vec::new(),
    };

    let first = engine.simulate(request()).await.expect("no fatal error");
    let second = engine.simulate(request()).await.expect("no fatal error");
    assert_eq!(first.state_changes.sender.changes[0].delta, "-10");
    assert_eq!(second.state_changes.sender.changes[0].delta, "-10");
}
