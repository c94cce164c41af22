// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! Environment variable name constants for the simulation service.
//!
//! This module provides constant string names for every environment variable the service
//! reads, so that the name is spelled exactly once and documented in a single place.
//!
//! # Environment Variables
//!
//! - [`TXSIM_HTTP_ADDR`] - HTTP bind address for the dispatch layer
//! - [`TXSIM_EVM_RPC_URL`] - Fork endpoint for the account-model backend
//! - [`TXSIM_SUBSTRATE_RPC_URL`] - Fork endpoint for the runtime-module backend
//! - [`TXSIM_EVM_NATIVE_SYMBOL`] - Override for the account-model native symbol
//! - [`TXSIM_SUBSTRATE_NATIVE_SYMBOL`] - Override for the runtime-module native symbol

/// HTTP bind address for the simulate/health endpoints, e.g. `127.0.0.1:8787`.
pub const TXSIM_HTTP_ADDR: &str = "TXSIM_HTTP_ADDR";

/// JSON-RPC endpoint of the account-model fork (Anvil-style devnode).
///
/// # Default
/// `http://127.0.0.1:8545` when unset.
pub const TXSIM_EVM_RPC_URL: &str = "TXSIM_EVM_RPC_URL";

/// JSON-RPC endpoint of the runtime-module fork (`dev_*`-capable node).
///
/// # Default
/// `ws://127.0.0.1:9944` when unset.
pub const TXSIM_SUBSTRATE_RPC_URL: &str = "TXSIM_SUBSTRATE_RPC_URL";

/// Override for the account-model chain's native currency symbol.
///
/// # Default
/// `ETH` when unset.
pub const TXSIM_EVM_NATIVE_SYMBOL: &str = "TXSIM_EVM_NATIVE_SYMBOL";

/// Override for the runtime-module chain's native currency symbol.
///
/// When unset, the symbol is read from the chain's own properties the first time it is
/// needed and cached for the lifetime of the process.
pub const TXSIM_SUBSTRATE_NATIVE_SYMBOL: &str = "TXSIM_SUBSTRATE_NATIVE_SYMBOL";
