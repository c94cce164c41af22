// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! Process-wide logging initialisation.

use std::sync::Once;

use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Install the global `tracing` subscriber, once per process.
///
/// `service_name` is attached as a static field on every event so that logs from the
/// account-model and runtime-module backends can be told apart when both run in one
/// process. `ansi` controls whether output is colourised; the caller typically passes
/// `atty::is(atty::Stream::Stderr)` or a config flag.
///
/// Calling this more than once is harmless: only the first call takes effect.
pub fn init_logging(service_name: &'static str, ansi: bool) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let result =
            fmt().with_env_filter(filter).with_ansi(ansi).with_target(true).try_init();

        if result.is_err() {
            eprintln!("tracing subscriber already initialized");
        }

        tracing::info!(service = service_name, "logging initialized");
    });
}
