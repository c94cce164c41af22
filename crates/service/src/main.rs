// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! The composition root: wires up both fork backends and engines, then serves the
//! `/simulate` + `/health` HTTP surface until interrupted.

use std::sync::Arc;

use eyre::Result;
use txsim_common::config::Settings;
use txsim_engine::api;
use txsim_engine::backend::evm::EvmRpcBackend;
use txsim_engine::backend::substrate::SubstrateRpcBackend;
use txsim_engine::backend::{EvmForkBackend, SubstrateForkBackend};
use txsim_engine::engine_evm::EngineEvm;
use txsim_engine::engine_substrate::EngineSubstrate;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load();
    txsim_common::logging::init_logging("txsim", atty_like_default());

    tracing::info!(addr = %settings.http_addr, "starting transaction-simulation service");

    let evm_backend = EvmRpcBackend::new(settings.evm_rpc_url.clone());
    evm_backend.connect().await?;
    let evm_engine = Arc::new(EngineEvm::new(evm_backend, settings.evm_native_symbol.clone()));

    let substrate_backend = SubstrateRpcBackend::new(settings.substrate_rpc_url.clone());
    substrate_backend.connect().await?;
    let substrate_engine = Arc::new(EngineSubstrate::new(
        substrate_backend,
        txsim_engine::engine_substrate::NoCallEncoder,
        txsim_engine::engine_substrate::NoMetadataLookup,
        settings.substrate_native_symbol.clone(),
    ));

    let router = api::build_router(evm_engine, substrate_engine);
    let addr = settings.http_addr.parse()?;

    api::serve(router, addr, shutdown_signal()).await?;

    tracing::info!("transaction-simulation service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to install ctrl-c handler");
        return;
    }
    tracing::info!("received ctrl-c, shutting down");
}

/// Colourise log output only when stderr is a real terminal.
fn atty_like_default() -> bool {
    std::io::IsTerminal::is_terminal(&std::io::stderr())
}
