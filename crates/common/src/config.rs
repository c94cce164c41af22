// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! Process-wide configuration, resolved once at startup from CLI flags, then
//! `TXSIM_*` environment variables (optionally loaded from a `.env` file), then
//! built-in defaults.

use clap::Parser;

use crate::env as env_names;

const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_EVM_RPC_URL: &str = "http://127.0.0.1:8545";
const DEFAULT_SUBSTRATE_RPC_URL: &str = "ws://127.0.0.1:9944";
const DEFAULT_EVM_NATIVE_SYMBOL: &str = "ETH";

/// Immutable, fully-resolved process configuration.
///
/// Construct via [`Settings::load`], which reads `.env` (if present) before parsing
/// CLI arguments, so that environment variables set there participate in clap's own
/// CLI-over-env-over-default precedence.
#[derive(Debug, Clone, Parser)]
#[command(name = "txsim", about = "Transaction-simulation service")]
pub struct Settings {
    /// HTTP bind address for the `/simulate` and `/health` endpoints.
    #[arg(long, env = env_names::TXSIM_HTTP_ADDR, default_value = DEFAULT_HTTP_ADDR)]
    pub http_addr: String,

    /// JSON-RPC endpoint of the account-model fork.
    #[arg(long, env = env_names::TXSIM_EVM_RPC_URL, default_value = DEFAULT_EVM_RPC_URL)]
    pub evm_rpc_url: String,

    /// JSON-RPC endpoint of the runtime-module fork.
    #[arg(long, env = env_names::TXSIM_SUBSTRATE_RPC_URL, default_value = DEFAULT_SUBSTRATE_RPC_URL)]
    pub substrate_rpc_url: String,

    /// Override for the account-model chain's native currency symbol.
    #[arg(long, env = env_names::TXSIM_EVM_NATIVE_SYMBOL, default_value = DEFAULT_EVM_NATIVE_SYMBOL)]
    pub evm_native_symbol: String,

    /// Override for the runtime-module chain's native currency symbol. Unset means
    /// "read it from the chain's own properties".
    #[arg(long, env = env_names::TXSIM_SUBSTRATE_NATIVE_SYMBOL)]
    pub substrate_native_symbol: Option<String>,
}

impl Settings {
    /// Load a `.env` file from the current directory if present, then resolve
    /// settings from CLI arguments and environment variables.
    pub fn load() -> Self {
        if let Err(err) = dotenv::dotenv() {
            tracing::debug!(%err, "no .env file loaded");
        }
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_with_no_arguments() {
        let settings = Settings::parse_from(["txsim"]);
        assert_eq!(settings.http_addr, DEFAULT_HTTP_ADDR);
        assert_eq!(settings.evm_rpc_url, DEFAULT_EVM_RPC_URL);
        assert_eq!(settings.substrate_rpc_url, DEFAULT_SUBSTRATE_RPC_URL);
        assert_eq!(settings.evm_native_symbol, DEFAULT_EVM_NATIVE_SYMBOL);
        assert_eq!(settings.substrate_native_symbol, None);
    }

    #[test]
    fn cli_flags_override_defaults() {
        let settings = Settings::parse_from(["txsim", "--http-addr", "0.0.0.0:9000"]);
        assert_eq!(settings.http_addr, "0.0.0.0:9000");
    }
}
