// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! Shared types, configuration and error plumbing used by both the account-model and
//! runtime-module simulation engines.

pub mod address;
pub mod cache;
pub mod config;
pub mod env;
pub mod error;
pub mod logging;
pub mod numeric;
