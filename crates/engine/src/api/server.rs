// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! The thin `axum` dispatch layer (A4): `POST /simulate` and `GET /health`. This layer
//! owns no business logic — it discriminates the request body, maps sender strings into
//! typed addresses, and maps engine outcomes onto status codes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use eyre::Result;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use txsim_common::address::{EvmAddress, SubstrateAddress};

use crate::api::types::{BackendHealth, BadRequestBody, HealthResponse, SimulateHttpRequest, TransactionBody};
use crate::backend::{EvmForkBackend, SubstrateForkBackend};
use crate::decode::error_substrate::ModuleMetadataLookup;
use crate::engine_evm::EngineEvm;
use crate::engine_substrate::{EngineSubstrate, RuntimeCallEncoder};
use crate::types::{ExtrinsicSpec, SimulateRequestEvm, SimulateRequestSubstrate};

struct AppState<BE, BS, C, M>
where
    BE: EvmForkBackend,
    BS: SubstrateForkBackend,
    C: RuntimeCallEncoder,
    M: ModuleMetadataLookup,
{
    evm: Arc<EngineEvm<BE>>,
    substrate: Arc<EngineSubstrate<BS, C, M>>,
}

// Derived `Clone` would require `BE: Clone` etc; every field is already an `Arc`.
impl<BE, BS, C, M> Clone for AppState<BE, BS, C, M>
where
    BE: EvmForkBackend,
    BS: SubstrateForkBackend,
    C: RuntimeCallEncoder,
    M: ModuleMetadataLookup,
{
    fn clone(&self) -> Self {
        Self { evm: self.evm.clone(), substrate: self.substrate.clone() }
    }
}

/// Build the `/simulate` + `/health` router over the two already-constructed engines.
pub fn build_router<BE, BS, C, M>(
    evm: Arc<EngineEvm<BE>>,
    substrate: Arc<EngineSubstrate<BS, C, M>>,
) -> Router
where
    BE: EvmForkBackend + 'static,
    BS: SubstrateForkBackend + 'static,
    C: RuntimeCallEncoder + Send + Sync + 'static,
    M: ModuleMetadataLookup + Send + Sync + 'static,
{
    Router::new()
        .route("/simulate", post(simulate::<BE, BS, C, M>))
        .route("/health", get(health::<BE, BS, C, M>))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_methods([Method::POST, Method::GET])
                .allow_headers(Any)
                .allow_origin(Any),
        )
        .with_state(AppState { evm, substrate })
}

/// Bind `addr` and serve `router` until `shutdown` resolves, then return once the
/// listener has drained in-flight connections.
pub async fn serve(router: Router, addr: SocketAddr, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "txsim listening");
    axum::serve(listener, router).with_graceful_shutdown(shutdown).await?;
    Ok(())
}

async fn simulate<BE, BS, C, M>(
    State(state): State<AppState<BE, BS, C, M>>,
    Json(body): Json<SimulateHttpRequest>,
) -> Response
where
    BE: EvmForkBackend,
    BS: SubstrateForkBackend,
    C: RuntimeCallEncoder + Send + Sync + 'static,
    M: ModuleMetadataLookup + Send + Sync + 'static,
{
    match (&body.transaction, &body.extrinsic) {
        (Some(_), Some(_)) => {
            return bad_request("request body must not set both `transaction` and `extrinsic`")
        }
        (None, None) => {
            return bad_request("request body must set exactly one of `transaction` or `extrinsic`")
        }
        _ => {}
    }

    if let Some(transaction) = &body.transaction {
        return simulate_evm(&state, &body, transaction).await;
    }
    simulate_substrate(&state, &body, body.extrinsic.clone().expect("checked above")).await
}

async fn simulate_evm<BE, BS, C, M>(
    state: &AppState<BE, BS, C, M>,
    body: &SimulateHttpRequest,
    transaction: &TransactionBody,
) -> Response
where
    BE: EvmForkBackend,
    BS: SubstrateForkBackend,
    C: RuntimeCallEncoder + Send + Sync + 'static,
    M: ModuleMetadataLookup + Send + Sync + 'static,
{
    let sender = match EvmAddress::parse(&body.sender) {
        Ok(addr) => addr,
        Err(err) => return bad_request(&format!("invalid sender address: {err}")),
    };

    let request = SimulateRequestEvm {
        sender,
        to: transaction.to,
        data: transaction.data.clone(),
        value: transaction.value.clone(),
        gas_limit: transaction.gas_limit.clone(),
        track_tokens: body.track_tokens.clone(),
    };

    match state.evm.simulate(request).await {
        Ok(response) => {
            let status = if response.success { StatusCode::OK } else { StatusCode::UNPROCESSABLE_ENTITY };
            (status, Json(response)).into_response()
        }
        Err(fatal) => {
            warn!(%fatal, "fatal restoration failure, backend requires operator intervention");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(BadRequestBody::new(fatal.to_string())))
                .into_response()
        }
    }
}

async fn simulate_substrate<BE, BS, C, M>(
    state: &AppState<BE, BS, C, M>,
    body: &SimulateHttpRequest,
    extrinsic: ExtrinsicSpec,
) -> Response
where
    BE: EvmForkBackend,
    BS: SubstrateForkBackend,
    C: RuntimeCallEncoder + Send + Sync + 'static,
    M: ModuleMetadataLookup + Send + Sync + 'static,
{
    let sender = match SubstrateAddress::parse(&body.sender) {
        Ok(addr) => addr,
        Err(err) => return bad_request(&format!("invalid sender address: {err}")),
    };

    let request =
        SimulateRequestSubstrate { sender, extrinsic, track_assets: body.track_assets.clone() };

    match state.substrate.simulate(request).await {
        Ok(response) => {
            let status = if response.success { StatusCode::OK } else { StatusCode::UNPROCESSABLE_ENTITY };
            (status, Json(response)).into_response()
        }
        Err(fatal) => {
            warn!(%fatal, "fatal restoration failure, backend requires operator intervention");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(BadRequestBody::new(fatal.to_string())))
                .into_response()
        }
    }
}

async fn health<BE, BS, C, M>(State(state): State<AppState<BE, BS, C, M>>) -> Json<HealthResponse>
where
    BE: EvmForkBackend,
    BS: SubstrateForkBackend,
    C: RuntimeCallEncoder + Send + Sync + 'static,
    M: ModuleMetadataLookup + Send + Sync + 'static,
{
    let evm_ok = state.evm.backend().is_connected().await;
    let substrate_ok = state.substrate.backend().is_connected().await;

    let evm = BackendHealth {
        status: if evm_ok { "ok" } else { "unreachable" },
        symbol: state.evm.native_symbol().to_string(),
    };
    let substrate = BackendHealth {
        status: if substrate_ok { "ok" } else { "unreachable" },
        symbol: state.substrate.native_symbol_hint(),
    };

    let status = if evm_ok && substrate_ok { "ok" } else { "degraded" };
    Json(HealthResponse { status, evm, substrate })
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(BadRequestBody::new(message))).into_response()
}
