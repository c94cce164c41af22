// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! Thin fork-backend clients (C7, C8).
//!
//! Both engines are generic over their backend trait rather than holding a trait
//! object, so a real RPC-backed client and a fake in-memory client (used by
//! integration tests) are interchangeable at compile time with no dynamic dispatch.

pub mod evm;
pub mod substrate;

use alloy_primitives::{Address, Bytes, U256};
use eyre::Result;
use txsim_common::address::SubstrateAddress;

use crate::decode::event_evm::RawLog;
use crate::types::{SubstrateNative, TokenMetadata};

/// A fully-formed account-model transaction to submit as the impersonated sender.
#[derive(Debug, Clone)]
pub struct EvmCallRequest {
    /// Sender, impersonated for the duration of the call.
    pub from: Address,
    /// Recipient / contract address.
    pub to: Address,
    /// Calldata.
    pub data: Bytes,
    /// Value to send, in wei.
    pub value: U256,
    /// Gas limit, if the caller supplied one.
    pub gas_limit: Option<u64>,
}

/// The outcome of sending an [`EvmCallRequest`].
#[derive(Debug, Clone)]
pub struct EvmCallOutcome {
    /// Whether the receipt's status field was `1`.
    pub success: bool,
    /// Gas actually used.
    pub gas_used: u64,
    /// Effective gas price paid.
    pub gas_price: U256,
    /// Decoded logs, unsorted.
    pub logs: Vec<RawLog>,
    /// The raw error captured when `success` is `false` and the backend surfaced one.
    pub error: Option<serde_json::Value>,
}

/// Account-model fork backend (C7): thin client over an Anvil-style JSON-RPC fork.
pub trait EvmForkBackend: Send + Sync {
    /// Open the RPC connection and remember the current block as the fork origin.
    fn connect(&self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// `evm_snapshot`.
    fn snapshot(&self) -> impl std::future::Future<Output = Result<U256>> + Send;

    /// `evm_revert`; `Ok(false)` is a recoverable failure, not an error.
    fn revert(&self, id: U256) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// `anvil_reset`, falling back to origin fork parameters when available.
    fn reset(&self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// `anvil_impersonateAccount`.
    fn impersonate(&self, addr: Address) -> impl std::future::Future<Output = Result<()>> + Send;

    /// `anvil_stopImpersonatingAccount`; failures here are swallowed by the caller.
    fn stop_impersonating(
        &self,
        addr: Address,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Read a native balance at the current head.
    fn native_balance(&self, addr: Address) -> impl std::future::Future<Output = Result<U256>> + Send;

    /// Read an ERC20-style `balanceOf(addr)` at the current head.
    fn token_balance(
        &self,
        token: Address,
        owner: Address,
    ) -> impl std::future::Future<Output = Result<U256>> + Send;

    /// Read and cache an ERC20-style token's symbol/decimals.
    fn token_metadata(
        &self,
        token: Address,
    ) -> impl std::future::Future<Output = Result<TokenMetadata>> + Send;

    /// Current fee data (gas price); falls back to the fork's own fee data on upstream
    /// read failure.
    fn gas_price(&self) -> impl std::future::Future<Output = Result<U256>> + Send;

    /// Send `request` as the already-impersonated sender and await its receipt.
    fn send(
        &self,
        request: EvmCallRequest,
    ) -> impl std::future::Future<Output = Result<EvmCallOutcome>> + Send;

    /// Best-effort health probe.
    fn is_connected(&self) -> impl std::future::Future<Output = bool> + Send;
}

/// The result of submitting an extrinsic and producing a block.
#[derive(Debug, Clone)]
pub struct SubstrateSubmitOutcome {
    /// All event records produced by the block, in `system.events()` order.
    pub events: Vec<serde_json::Value>,
}

/// Fee/weight information returned by `payment_queryInfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PaymentInfo {
    /// Computational weight reference time.
    pub ref_time: u64,
    /// Proof-size weight component.
    pub proof_size: u64,
    /// The partial fee, in the chain's smallest unit.
    pub partial_fee: U256,
}

/// Runtime-module fork backend (C8): thin client over a `dev_*`-capable JSON-RPC fork.
pub trait SubstrateForkBackend: Send + Sync {
    /// Open the RPC connection and remember the current header as the fork origin.
    fn connect(&self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// `dev_setSignatureVerification false`.
    fn disable_signature_verification(
        &self,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// `dev_setSignatureVerification true`.
    fn enable_signature_verification(&self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Read the chain's native-currency symbol and decimals (cached by the caller).
    fn chain_properties(
        &self,
    ) -> impl std::future::Future<Output = Result<TokenMetadata>> + Send;

    /// Read a native balance triple at the current head.
    fn native_balance(
        &self,
        addr: &SubstrateAddress,
    ) -> impl std::future::Future<Output = Result<SubstrateNative>> + Send;

    /// Read an asset-account balance; a missing account is `0`, not an error.
    fn asset_balance(
        &self,
        asset: u64,
        addr: &SubstrateAddress,
    ) -> impl std::future::Future<Output = Result<U256>> + Send;

    /// Read and cache an asset's symbol/decimals.
    fn asset_metadata(
        &self,
        asset: u64,
    ) -> impl std::future::Future<Output = Result<TokenMetadata>> + Send;

    /// Read the sender's current nonce.
    fn account_nonce(
        &self,
        addr: &SubstrateAddress,
    ) -> impl std::future::Future<Output = Result<u64>> + Send;

    /// `payment_queryInfo`-style fee/weight query for an encoded call.
    fn payment_info(
        &self,
        call: &[u8],
        sender: &SubstrateAddress,
    ) -> impl std::future::Future<Output = Result<PaymentInfo>> + Send;

    /// Raw `author_submitExtrinsic`.
    fn submit_extrinsic(&self, extrinsic: &[u8]) -> impl std::future::Future<Output = Result<()>> + Send;

    /// `dev_newBlock [{}]`; returns the produced block's events.
    fn new_block(&self) -> impl std::future::Future<Output = Result<SubstrateSubmitOutcome>> + Send;

    /// `dev_setHead [original]`; on failure the caller should disconnect/reconnect.
    fn reset(&self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Best-effort health probe.
    fn is_connected(&self) -> impl std::future::Future<Output = bool> + Send;
}
