// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! The real runtime-module fork backend (C8): a thin client over a `dev_*`-capable
//! JSON-RPC fork, using `jsonrpsee` for transport and `parity-scale-codec` for the
//! compact-length prefix used by the fake-signature extrinsic layout.

use alloy_primitives::U256;
use codec::Encode;
use eyre::{eyre, Result};
use jsonrpsee::core::client::ClientT;
use jsonrpsee::rpc_params;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use once_cell::sync::OnceCell;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use txsim_common::address::SubstrateAddress;
use txsim_common::cache::ProcessCache;

use crate::backend::{PaymentInfo, SubstrateForkBackend, SubstrateSubmitOutcome};
use crate::types::{SubstrateNative, TokenMetadata};

/// The fake signature byte pattern the fork's mock-signature host accepts once
/// `dev_setSignatureVerification false` is active: `0xdeadbeef` followed by 60 bytes
/// of `0xcd`.
pub fn fake_signature_bytes() -> Vec<u8> {
    let mut sig = vec![0xde, 0xad, 0xbe, 0xef];
    sig.extend(std::iter::repeat_n(0xcdu8, 60));
    sig
}

/// Build the final wire-form extrinsic: the unsigned/unpatched body with its fake
/// signature spliced in, prefixed with a SCALE-compact length.
pub fn encode_fake_signed_extrinsic(body_with_signature: &[u8]) -> Vec<u8> {
    let length_prefix = codec::Compact(body_with_signature.len() as u32).encode();
    let mut out = length_prefix;
    out.extend_from_slice(body_with_signature);
    out
}

/// RPC-backed runtime-module fork client.
pub struct SubstrateRpcBackend {
    endpoint: String,
    client: OnceCell<WsClient>,
    origin_block_hash: RwLock<Option<String>>,
    asset_cache: ProcessCache<u64, TokenMetadata>,
    properties_cache: OnceCell<TokenMetadata>,
}

impl SubstrateRpcBackend {
    /// Construct a backend pointed at `endpoint`; no connection is opened until
    /// [`SubstrateForkBackend::connect`] is called.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: OnceCell::new(),
            origin_block_hash: RwLock::new(None),
            asset_cache: ProcessCache::new(),
            properties_cache: OnceCell::new(),
        }
    }

    fn client(&self) -> Result<&WsClient> {
        self.client.get().ok_or_else(|| eyre!("backend not connected"))
    }
}

impl SubstrateForkBackend for SubstrateRpcBackend {
    async fn connect(&self) -> Result<()> {
        let client = WsClientBuilder::default().build(&self.endpoint).await?;
        let header: Value = client.request("chain_getHeader", rpc_params![]).await?;
        let hash: Value = client.request("chain_getBlockHash", rpc_params![]).await?;
        debug!(?header, "connected to runtime-module fork");
        *self.origin_block_hash.write().await = hash.as_str().map(str::to_string);
        self.client.set(client).map_err(|_| eyre!("backend already connected"))?;
        Ok(())
    }

    async fn disable_signature_verification(&self) -> Result<()> {
        let client = self.client()?;
        debug!("dev_setSignatureVerification false");
        client.request("dev_setSignatureVerification", rpc_params![false]).await?;
        Ok(())
    }

    async fn enable_signature_verification(&self) -> Result<()> {
        let client = self.client()?;
        debug!("dev_setSignatureVerification true");
        client.request("dev_setSignatureVerification", rpc_params![true]).await?;
        Ok(())
    }

    async fn chain_properties(&self) -> Result<TokenMetadata> {
        if let Some(metadata) = self.properties_cache.get() {
            return Ok(metadata.clone());
        }
        let client = self.client()?;
        let props: Value = client.request("system_properties", rpc_params![]).await?;
        let symbol = props
            .pointer("/tokenSymbol/0")
            .or_else(|| props.get("tokenSymbol"))
            .and_then(Value::as_str)
            .unwrap_or("UNIT")
            .to_string();
        let decimals = props
            .pointer("/tokenDecimals/0")
            .or_else(|| props.get("tokenDecimals"))
            .and_then(Value::as_u64)
            .unwrap_or(12) as u8;
        let metadata = TokenMetadata { symbol, decimals };
        let _ = self.properties_cache.set(metadata.clone());
        Ok(metadata)
    }

    async fn native_balance(&self, addr: &SubstrateAddress) -> Result<SubstrateNative> {
        let client = self.client()?;
        let account: Value = client
            .request("system_account", rpc_params![addr.to_string()])
            .await
            .unwrap_or(Value::Null);
        let free = parse_balance_field(&account, "free");
        let reserved = parse_balance_field(&account, "reserved");
        let frozen = parse_balance_field(&account, "frozen");
        Ok(SubstrateNative { free, reserved, frozen })
    }

    async fn asset_balance(&self, asset: u64, addr: &SubstrateAddress) -> Result<U256> {
        let client = self.client()?;
        let result: Result<Value, _> =
            client.request("assets_account", rpc_params![asset, addr.to_string()]).await;
        Ok(result.ok().map(|v| parse_balance_field(&v, "balance")).unwrap_or(U256::ZERO))
    }

    async fn asset_metadata(&self, asset: u64) -> Result<TokenMetadata> {
        if let Some(metadata) = self.asset_cache.get(&asset) {
            return Ok(metadata);
        }
        let client = self.client()?;
        let result: Result<Value, _> = client.request("assets_metadata", rpc_params![asset]).await;
        let metadata = match result {
            Ok(value) => TokenMetadata {
                symbol: value.get("symbol").and_then(Value::as_str).unwrap_or("UNKNOWN").to_string(),
                decimals: value.get("decimals").and_then(Value::as_u64).unwrap_or(18) as u8,
            },
            Err(_) => TokenMetadata { symbol: format!("Asset#{asset}"), decimals: 18 },
        };
        self.asset_cache.get_or_try_init::<eyre::Error>(asset, || Ok(metadata.clone()))
    }

    async fn account_nonce(&self, addr: &SubstrateAddress) -> Result<u64> {
        let client = self.client()?;
        let nonce: u64 =
            client.request("system_accountNextIndex", rpc_params![addr.to_string()]).await?;
        Ok(nonce)
    }

    async fn payment_info(&self, call: &[u8], _sender: &SubstrateAddress) -> Result<PaymentInfo> {
        let client = self.client()?;
        let hex_call = format!("0x{}", hex::encode(call));
        let info: Value = client.request("payment_queryInfo", rpc_params![hex_call]).await?;
        Ok(PaymentInfo {
            ref_time: info.pointer("/weight/refTime").and_then(Value::as_u64).unwrap_or_default(),
            proof_size: info.pointer("/weight/proofSize").and_then(Value::as_u64).unwrap_or_default(),
            partial_fee: info
                .get("partialFee")
                .and_then(Value::as_str)
                .and_then(|s| U256::from_str_radix(s.trim_start_matches("0x"), 16).ok())
                .unwrap_or(U256::ZERO),
        })
    }

    async fn submit_extrinsic(&self, extrinsic: &[u8]) -> Result<()> {
        let client = self.client()?;
        let hex_extrinsic = format!("0x{}", hex::encode(extrinsic));
        client.request::<Value, _>("author_submitExtrinsic", rpc_params![hex_extrinsic]).await?;
        Ok(())
    }

    async fn new_block(&self) -> Result<SubstrateSubmitOutcome> {
        let client = self.client()?;
        client.request::<Value, _>("dev_newBlock", rpc_params![serde_json::json!({})]).await?;
        let events: Value = client.request("system_events", rpc_params![]).await?;
        let events = events.as_array().cloned().unwrap_or_default();
        Ok(SubstrateSubmitOutcome { events })
    }

    async fn reset(&self) -> Result<()> {
        let client = self.client()?;
        let origin = self.origin_block_hash.read().await.clone();
        let Some(hash) = origin else { return Err(eyre!("no fork origin recorded")) };
        client.request::<Value, _>("dev_setHead", rpc_params![hash]).await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        match self.client() {
            Ok(client) => client.request::<Value, _>("system_health", rpc_params![]).await.is_ok(),
            Err(_) => false,
        }
    }
}

fn parse_balance_field(value: &Value, field: &str) -> U256 {
    value
        .get(field)
        .or_else(|| value.pointer(&format!("/data/{field}")))
        .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_u64().map(|n| n.to_string())))
        .and_then(|s| txsim_common::numeric::parse_amount(&s).ok())
        .unwrap_or(U256::ZERO)
}
