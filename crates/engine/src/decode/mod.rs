// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! Pure decoding collaborators (C1–C4): error and event decoders for both backend
//! families. These modules hold no engine state and perform no I/O.

pub mod error_evm;
pub mod error_substrate;
pub mod event_evm;
pub mod event_substrate;
