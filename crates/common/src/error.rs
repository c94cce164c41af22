// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! Closed error taxonomy shared by both engines.
//!
//! [`EngineError`] covers the first two error strata: business failures (the call
//! reverted / the extrinsic was dispatched with an error) and recoverable engine errors
//! (RPC plumbing, malformed input). Both are reported to the caller as a decoded error
//! on an otherwise-normal [`SimulationResponse`](crate placeholder, see `txsim-engine`).
//!
//! [`FatalError`] covers the third stratum: state restoration itself failed. A fatal
//! error must never be swallowed — it is raised all the way to the HTTP layer as a 500
//! and the backend refuses further requests until an operator re-establishes a clean fork.

use thiserror::Error;

/// Business and recoverable engine failures (§7 strata 1–2).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The account-model call reverted; the decoded revert reason, if any, is carried.
    #[error("reverted: {0}")]
    Reverted(String),

    /// The runtime-module extrinsic was applied but dispatched with an error.
    #[error("dispatched with error: {0}")]
    Dispatched(String),

    /// The requested pallet/method pair could not be resolved into a callable extrinsic.
    #[error("unknown extrinsic: {0}")]
    UnknownExtrinsic(String),

    /// The request body could not be turned into calldata/call arguments.
    #[error("malformed calldata: {0}")]
    MalformedCalldata(String),

    /// A transport-level JSON-RPC failure that does not itself indicate a fatal restore
    /// failure (e.g. a single balance read failing mid-snapshot).
    #[error("rpc error: {0}")]
    Rpc(#[from] eyre::Error),
}

/// Stratum-3 failures: state restoration failed after an engine run. The engine must
/// surface this as a hard failure and accept no further requests on the affected
/// backend until an operator intervenes.
#[derive(Debug, Error)]
pub enum FatalError {
    /// Both the primary restore attempt (revert / head-reset) and its fallback failed.
    /// The display message names both verbatim, per §7's wording requirement.
    #[error("fatal: state restoration failed after engine error ({original}); restore also failed ({restore})")]
    RestoreFailed {
        /// The error that triggered the restore attempt.
        original: String,
        /// The error the restore attempt itself produced.
        restore: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_failed_names_both_errors() {
        let err = FatalError::RestoreFailed {
            original: "call reverted".to_string(),
            restore: "evm_revert failed".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("call reverted"));
        assert!(message.contains("evm_revert failed"));
    }
}
