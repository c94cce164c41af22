// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! The two fork-based simulation engines, their shared data model, and the thin HTTP
//! surface that fronts them.

pub mod api;
pub mod backend;
pub mod decode;
pub mod engine_evm;
pub mod engine_substrate;
pub mod impact;
pub mod snapshot;
pub mod types;

pub use engine_evm::EngineEvm;
pub use engine_substrate::EngineSubstrate;
