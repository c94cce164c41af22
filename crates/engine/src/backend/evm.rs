// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! The real account-model fork backend (C7): a thin client over an Anvil-style
//! JSON-RPC fork, using raw RPC calls for everything Anvil-specific and standard
//! `eth_*` methods (via [`alloy_provider::Provider`]) for everything else.

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use alloy_provider::{Provider, ProviderBuilder, RootProvider};
use eyre::{eyre, Result};
use once_cell::sync::OnceCell;
use serde_json::json;
use tracing::{debug, warn};
use txsim_common::cache::ProcessCache;

use crate::backend::{EvmCallOutcome, EvmCallRequest, EvmForkBackend};
use crate::decode::event_evm::RawLog;
use crate::types::TokenMetadata;

const ERC20_BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
const ERC20_SYMBOL_SELECTOR: [u8; 4] = [0x95, 0xd8, 0x9b, 0x41];
const ERC20_DECIMALS_SELECTOR: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];

/// RPC-backed account-model fork client.
pub struct EvmRpcBackend {
    rpc_url: String,
    provider: OnceCell<RootProvider>,
    token_cache: ProcessCache<Address, TokenMetadata>,
}

impl EvmRpcBackend {
    /// Construct a backend pointed at `rpc_url`; no connection is opened until
    /// [`EvmForkBackend::connect`] is called.
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self { rpc_url: rpc_url.into(), provider: OnceCell::new(), token_cache: ProcessCache::new() }
    }

    fn provider(&self) -> Result<&RootProvider> {
        self.provider.get().ok_or_else(|| eyre!("backend not connected"))
    }

    async fn raw_call(&self, to: Address, data: Vec<u8>) -> Result<Bytes> {
        let provider = self.provider()?;
        let tx = json!({ "to": to, "data": Bytes::from(data) });
        let result: Bytes = provider.raw_request("eth_call".into(), (tx, "latest")).await?;
        Ok(result)
    }
}

impl EvmForkBackend for EvmRpcBackend {
    async fn connect(&self) -> Result<()> {
        let provider = ProviderBuilder::new().connect(&self.rpc_url).await?;
        let block_number = provider.get_block_number().await?;
        debug!(block_number, "connected to account-model fork");
        self.provider.set(provider).map_err(|_| eyre!("backend already connected"))?;
        Ok(())
    }

    async fn snapshot(&self) -> Result<U256> {
        let provider = self.provider()?;
        debug!("evm_snapshot");
        let id: U256 = provider.raw_request("evm_snapshot".into(), ()).await?;
        Ok(id)
    }

    async fn revert(&self, id: U256) -> Result<bool> {
        let provider = self.provider()?;
        debug!(%id, "evm_revert");
        let ok: bool = provider.raw_request("evm_revert".into(), (id,)).await?;
        Ok(ok)
    }

    async fn reset(&self) -> Result<()> {
        let provider = self.provider()?;
        debug!("anvil_reset");
        provider.raw_request::<_, serde_json::Value>("anvil_reset".into(), ()).await?;
        Ok(())
    }

    async fn impersonate(&self, addr: Address) -> Result<()> {
        let provider = self.provider()?;
        debug!(%addr, "anvil_impersonateAccount");
        provider
            .raw_request::<_, serde_json::Value>("anvil_impersonateAccount".into(), (addr,))
            .await?;
        Ok(())
    }

    async fn stop_impersonating(&self, addr: Address) -> Result<()> {
        let provider = self.provider()?;
        debug!(%addr, "anvil_stopImpersonatingAccount");
        let result = provider
            .raw_request::<_, serde_json::Value>("anvil_stopImpersonatingAccount".into(), (addr,))
            .await;
        if let Err(err) = &result {
            warn!(%addr, %err, "failed to stop impersonating account, continuing");
        }
        Ok(())
    }

    async fn native_balance(&self, addr: Address) -> Result<U256> {
        let provider = self.provider()?;
        Ok(provider.get_balance(addr).await?)
    }

    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256> {
        let mut data = ERC20_BALANCE_OF_SELECTOR.to_vec();
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(owner.as_slice());
        let result = self.raw_call(token, data).await?;
        if result.len() < 32 {
            return Ok(U256::ZERO);
        }
        Ok(U256::from_be_slice(&result[..32]))
    }

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata> {
        let cached = self.token_cache.get(&token);
        if let Some(metadata) = cached {
            return Ok(metadata);
        }

        let symbol = match self.raw_call(token, ERC20_SYMBOL_SELECTOR.to_vec()).await {
            Ok(bytes) => decode_string_return(&bytes).unwrap_or_else(|| "UNKNOWN".to_string()),
            Err(_) => "UNKNOWN".to_string(),
        };
        let decimals = match self.raw_call(token, ERC20_DECIMALS_SELECTOR.to_vec()).await {
            Ok(bytes) if bytes.len() >= 32 => bytes[31],
            _ => 18,
        };

        let metadata = TokenMetadata { symbol, decimals };
        self.token_cache.get_or_try_init::<eyre::Error>(token, || Ok(metadata.clone()))
    }

    async fn gas_price(&self) -> Result<U256> {
        let provider = self.provider()?;
        match provider.get_gas_price().await {
            Ok(price) => Ok(U256::from(price)),
            Err(err) => {
                warn!(%err, "failed to read live gas price, falling back to fork default");
                Ok(U256::from(1_000_000_000u64))
            }
        }
    }

    async fn send(&self, request: EvmCallRequest) -> Result<EvmCallOutcome> {
        let provider = self.provider()?;
        let mut tx = json!({
            "from": request.from,
            "to": request.to,
            "data": request.data,
            "value": request.value,
        });
        if let Some(gas_limit) = request.gas_limit {
            tx["gas"] = json!(format!("0x{gas_limit:x}"));
        }

        let tx_hash: alloy_primitives::TxHash =
            provider.raw_request("eth_sendTransaction".into(), (tx,)).await?;
        let receipt = provider
            .get_transaction_receipt(tx_hash)
            .await?
            .ok_or_else(|| eyre!("receipt not found for {tx_hash:?}"))?;

        let success = receipt.status();
        let gas_used = receipt.gas_used;
        let gas_price = U256::from(receipt.effective_gas_price);
        let logs: Vec<RawLog> = receipt
            .logs()
            .iter()
            .enumerate()
            .map(|(i, log)| RawLog {
                address: log.address(),
                topics: log.topics().to_vec(),
                data: log.data().data.to_vec(),
                log_index: log.log_index.unwrap_or(i as u64),
            })
            .collect();

        Ok(EvmCallOutcome { success, gas_used, gas_price, logs, error: None })
    }

    async fn is_connected(&self) -> bool {
        match self.provider() {
            Ok(provider) => provider.get_block_number().await.is_ok(),
            Err(_) => false,
        }
    }
}

fn decode_string_return(bytes: &Bytes) -> Option<String> {
    use alloy_dyn_abi::DynSolType;
    let value = DynSolType::String.abi_decode(bytes).ok()?;
    value.as_str().map(str::to_string)
}

/// Shared handle type used by the engine and the HTTP composition root.
pub type SharedEvmBackend = Arc<EvmRpcBackend>;
