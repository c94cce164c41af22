// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! The ambient HTTP dispatch layer (A4): a thin `axum` adapter in front of the two
//! simulation engines, owning no business logic of its own.

pub mod server;
pub mod types;

pub use server::{build_router, serve};
