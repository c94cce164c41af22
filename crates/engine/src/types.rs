// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! The request/response data model shared by both simulation engines.

use std::collections::BTreeMap;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use txsim_common::address::{EvmAddress, SubstrateAddress};
use txsim_common::numeric::SignedAmount;

/// A fungible token/asset identifier: a contract address on the account-model side, an
/// integer asset id on the runtime-module side.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenId {
    /// ERC20-style contract address.
    Contract(EvmAddress),
    /// Runtime-module asset id.
    Asset(u64),
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Contract(addr) => write!(f, "{addr}"),
            Self::Asset(id) => write!(f, "Asset#{id}"),
        }
    }
}

/// Cached token/asset metadata, derived from an on-chain query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    /// The token's symbol, or `UNKNOWN`/`Asset#<id>` on lookup failure.
    pub symbol: String,
    /// Decimal places, defaulting to 18 on lookup failure.
    pub decimals: u8,
}

impl TokenMetadata {
    /// The fallback metadata used when an on-chain lookup fails.
    pub fn unknown(token: &TokenId) -> Self {
        let symbol = match token {
            TokenId::Contract(_) => "UNKNOWN".to_string(),
            TokenId::Asset(id) => format!("Asset#{id}"),
        };
        Self { symbol, decimals: 18 }
    }
}

/// Native-currency balance on the account-model side: a single non-negative integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvmNative(pub U256);

/// Native-currency balance on the runtime-module side: free/reserved/frozen components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubstrateNative {
    /// Spendable balance.
    pub free: U256,
    /// Balance locked by a reserve (e.g. a deposit).
    pub reserved: U256,
    /// Balance that cannot be spent even though it is free (e.g. a vesting lock).
    pub frozen: U256,
}

impl SubstrateNative {
    /// The "total controlled balance" this service reports as the native amount:
    /// `free + reserved`.
    pub fn total_controlled(&self) -> U256 {
        self.free.saturating_add(self.reserved)
    }
}

/// A snapshot of one address's balances at a point in time.
#[derive(Debug, Clone, Default)]
pub struct BalanceSnapshot {
    /// Native balance; for kind B this is already reduced via [`SubstrateNative::total_controlled`].
    pub native: U256,
    /// Fungible balances, keyed by token id, insertion-ordered as queried.
    pub fungibles: Vec<(TokenId, U256)>,
}

impl BalanceSnapshot {
    /// Look up a fungible balance by token id.
    pub fn fungible(&self, token: &TokenId) -> Option<U256> {
        self.fungibles.iter().find(|(id, _)| id == token).map(|(_, v)| *v)
    }
}

/// A single token balance entry in a reported [`AddressState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBalance {
    /// `None` for the native entry, `Some` for a tracked fungible.
    pub token: Option<TokenId>,
    /// The symbol to display.
    pub symbol: String,
    /// The raw balance, as a canonical decimal string.
    pub amount: String,
}

/// A single non-zero balance change entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceChange {
    /// `None` for the native entry, `Some` for a tracked fungible.
    pub token: Option<TokenId>,
    /// The symbol to display.
    pub symbol: String,
    /// The signed delta, as a canonical decimal string (e.g. `-1000`, `1000`).
    pub delta: String,
}

/// The reported before/after/changes state for one address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressState {
    /// The address, canonicalised.
    pub address: String,
    /// Balances before the simulated transaction/extrinsic, native first.
    pub before: Vec<TokenBalance>,
    /// Balances after, same ordering as `before`.
    pub after: Vec<TokenBalance>,
    /// Non-zero changes only.
    pub changes: Vec<BalanceChange>,
}

/// The full per-address state-impact report for one simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateImpactReport {
    /// The transaction/extrinsic sender.
    pub sender: AddressState,
    /// The primary counterparty, when one exists.
    pub counterparty: Option<AddressState>,
    /// Every other address with at least one non-zero change.
    pub other_affected: Vec<AddressState>,
}

/// A decoded log/event, backend-agnostic at the reporting layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedEvent {
    /// Contract address (A) or `pallet.method`'s owning pallet (B).
    pub origin: String,
    /// Event/log name.
    pub name: String,
    /// Log index (A) or event-record index (B).
    pub ordinal: u64,
    /// Ordered name → stringified-value fields.
    pub fields: Vec<(String, String)>,
}

/// A tagged, total decoding of an account-model error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DecodedErrorEvm {
    /// A plain revert with a human message.
    Revert {
        /// The revert message.
        message: String,
    },
    /// A Solidity `Panic(uint256)`.
    Panic {
        /// The numeric panic code.
        code: u64,
        /// The English meaning of the code.
        message: String,
    },
    /// A custom Solidity error, recognised by selector.
    Custom {
        /// The error's name.
        name: String,
        /// Stringified decoded arguments, if decoding succeeded.
        args: Option<Vec<String>>,
    },
    /// Nothing more specific could be determined.
    Unknown {
        /// Best-effort message.
        message: String,
    },
}

impl DecodedErrorEvm {
    /// The human-readable message for this error, regardless of variant.
    pub fn message(&self) -> String {
        match self {
            Self::Revert { message } | Self::Unknown { message } | Self::Panic { message, .. } => {
                message.clone()
            }
            Self::Custom { name, args } => match args {
                Some(args) => format!("{name}({})", args.join(", ")),
                None => name.clone(),
            },
        }
    }
}

/// A tagged, total decoding of a runtime-module dispatch error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DecodedErrorSubstrate {
    /// A module-specific error, resolved via runtime metadata.
    Module {
        /// The pallet name.
        pallet: String,
        /// The error name within the pallet.
        error: String,
        /// Documentation lines joined with newlines.
        docs: String,
    },
    /// The dispatch origin was not authorised.
    BadOrigin,
    /// The referenced account/index could not be resolved.
    CannotLookup,
    /// An arithmetic overflow/underflow/division error.
    Arithmetic {
        /// The variant name, e.g. `Overflow`.
        message: String,
    },
    /// A token-subsystem error (e.g. insufficient funds, frozen).
    Token {
        /// The variant name.
        message: String,
    },
    /// A bag-of-fields "other" error.
    Other {
        /// The free-form message.
        message: String,
    },
    /// Nothing more specific could be determined.
    Unknown {
        /// Best-effort message.
        message: String,
    },
}

/// Fee/gas reporting for an account-model simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasReportEvm {
    /// Gas consumed by the transaction.
    pub gas_used: u64,
    /// Effective gas price, in wei, as a decimal string.
    pub gas_price: String,
    /// `gasUsed * gasPrice`, in wei, as a decimal string.
    pub total_cost_wei: String,
    /// The same cost, human-formatted in the native currency.
    pub total_cost_native: String,
    /// The native currency's symbol.
    pub native_symbol: String,
}

/// Fee/weight reporting for a runtime-module simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasReportSubstrate {
    /// Computational weight reference time.
    pub ref_time: u64,
    /// Proof-size weight component.
    pub proof_size: u64,
    /// The raw partial fee, in the chain's smallest unit, as a decimal string.
    pub partial_fee: String,
    /// The same fee, human-formatted.
    pub partial_fee_formatted: String,
    /// The native currency's symbol.
    pub native_symbol: String,
}

/// The gas/fee report, discriminated by backend kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GasReport {
    /// Account-model fee report.
    Evm(GasReportEvm),
    /// Runtime-module fee report.
    Substrate(GasReportSubstrate),
}

/// The engine-level response for a single simulation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResponse {
    /// Whether the simulated transaction/extrinsic succeeded.
    pub success: bool,
    /// Per-address balance changes.
    pub state_changes: StateImpactReport,
    /// Decoded events, sorted ascending by ordinal.
    pub events: Vec<DecodedEvent>,
    /// Gas/fee report.
    pub gas: GasReport,
    /// Present iff `success` is false.
    pub error: Option<SimulationError>,
}

/// The decoded error surfaced on a failed simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SimulationError {
    /// Account-model decoded error.
    Evm(DecodedErrorEvm),
    /// Runtime-module decoded error.
    Substrate(DecodedErrorSubstrate),
}

/// An account-model simulation request.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulateRequestEvm {
    /// The transaction sender.
    pub sender: EvmAddress,
    /// The transaction recipient/contract.
    pub to: EvmAddress,
    /// Calldata, hex-encoded; defaults to empty.
    #[serde(default)]
    pub data: Option<String>,
    /// Value to send, in wei, as a decimal string; defaults to zero.
    #[serde(default)]
    pub value: Option<String>,
    /// Gas limit override, as a decimal string.
    #[serde(default)]
    pub gas_limit: Option<String>,
    /// Additional ERC20-style contracts to track.
    #[serde(default)]
    pub track_tokens: Vec<EvmAddress>,
}

/// A structured runtime-module call, possibly nested (batch/proxy/multisig).
#[derive(Debug, Clone, Deserialize)]
pub struct StructuredCall {
    /// The pallet name.
    pub pallet: String,
    /// The method name within the pallet.
    pub method: String,
    /// Positional arguments; array elements may themselves be nested [`StructuredCall`]s.
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

/// The extrinsic payload of a kind-B request: either a structured call or raw hex.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExtrinsicSpec {
    /// A structured `{pallet, method, args}` call.
    Structured(StructuredCall),
    /// An opaque, already-encoded call as hex.
    Raw {
        /// The raw hex-encoded call.
        #[serde(rename = "rawHex")]
        raw_hex: String,
    },
}

/// A runtime-module simulation request.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulateRequestSubstrate {
    /// The extrinsic sender.
    pub sender: SubstrateAddress,
    /// The call to inject.
    pub extrinsic: ExtrinsicSpec,
    /// Asset ids to track in the balance diff.
    #[serde(default)]
    pub track_assets: Vec<u64>,
}

/// A per-address, per-token balance-delta map keyed by canonical address string.
pub type DeltaMap = BTreeMap<String, BTreeMap<Option<TokenId>, SignedAmount>>;
