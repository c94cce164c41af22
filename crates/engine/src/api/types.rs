// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! The HTTP-facing request/response shapes, one layer removed from the engines' own
//! [`crate::types`] so the wire format (a tagged-by-presence union, camelCase fields)
//! stays independent of the engines' internal representation.

use serde::{Deserialize, Serialize};

use crate::types::ExtrinsicSpec;
use txsim_common::address::EvmAddress;

/// The account-model half of a `/simulate` request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionBody {
    /// Recipient / contract address.
    pub to: EvmAddress,
    /// Calldata, hex-encoded.
    #[serde(default)]
    pub data: Option<String>,
    /// Value to send, in wei, as a decimal string.
    #[serde(default)]
    pub value: Option<String>,
    /// Gas limit override, as a decimal string.
    #[serde(default)]
    pub gas_limit: Option<String>,
}

/// The full `/simulate` request body, discriminated by which of `transaction` /
/// `extrinsic` is present.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateHttpRequest {
    /// The sender address, in whichever format the discriminated kind expects.
    pub sender: String,
    /// Present for an account-model (kind A) request.
    #[serde(default)]
    pub transaction: Option<TransactionBody>,
    /// Present for a runtime-module (kind B) request.
    #[serde(default)]
    pub extrinsic: Option<ExtrinsicSpec>,
    /// Additional ERC20-style contracts to track (kind A only).
    #[serde(default)]
    pub track_tokens: Vec<EvmAddress>,
    /// Asset ids to track in the balance diff (kind B only).
    #[serde(default)]
    pub track_assets: Vec<u64>,
}

/// A validation failure surfaced as HTTP 400 before any engine is invoked.
#[derive(Debug, Clone, Serialize)]
pub struct BadRequestBody {
    /// A human-readable explanation of what was wrong with the request.
    pub error: String,
}

impl BadRequestBody {
    /// Build a 400 body from a free-form message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { error: message.into() }
    }
}

/// The body returned on a fatal (stratum-3) restoration failure, mapped to HTTP 500.
#[derive(Debug, Clone, Serialize)]
pub struct FatalErrorBody {
    /// [`txsim_common::error::FatalError`]'s `Display`, naming both failures verbatim.
    pub error: String,
}

/// One backend's probe result within [`HealthResponse`].
#[derive(Debug, Clone, Serialize)]
pub struct BackendHealth {
    /// `"ok"` or `"unreachable"`.
    pub status: &'static str,
    /// The backend's configured native-currency symbol.
    pub symbol: String,
}

/// The `GET /health` response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` iff both backends probed healthy, `"degraded"` otherwise.
    pub status: &'static str,
    /// The account-model backend's probe result.
    pub evm: BackendHealth,
    /// The runtime-module backend's probe result.
    pub substrate: BackendHealth,
}
