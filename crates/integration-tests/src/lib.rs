// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! Fake fork backends and supporting test doubles shared by the end-to-end scenario
//! tests under `tests/`.

pub mod fake_evm;
pub mod fake_substrate;
