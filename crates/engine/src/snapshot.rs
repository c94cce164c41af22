// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! The balance snapshotter (C5): reads native + selected fungible balances for a set
//! of addresses from the fork, tolerating per-address/per-token read failures.

use std::collections::BTreeMap;

use alloy_primitives::Address as AlloyAddress;
use tracing::warn;
use txsim_common::address::{EvmAddress, SubstrateAddress};

use crate::backend::{EvmForkBackend, SubstrateForkBackend};
use crate::types::{BalanceSnapshot, TokenId};

/// Capture a snapshot for every address in `addresses`, reading the native balance and
/// every fungible in `tokens` for each. A failed native read is logged and reported as
/// zero rather than aborting the whole snapshot.
pub async fn snapshot_evm<B: EvmForkBackend>(
    backend: &B,
    addresses: &[EvmAddress],
    tokens: &[EvmAddress],
) -> BTreeMap<EvmAddress, BalanceSnapshot> {
    let mut out = BTreeMap::new();
    for &addr in addresses {
        let native = match backend.native_balance(addr.as_alloy()).await {
            Ok(value) => value,
            Err(err) => {
                warn!(%addr, %err, "native balance read failed, reporting zero");
                Default::default()
            }
        };

        let mut fungibles = Vec::with_capacity(tokens.len());
        for &token in tokens {
            let balance = match backend.token_balance(token.as_alloy(), addr.as_alloy()).await {
                Ok(value) => value,
                Err(err) => {
                    warn!(%addr, %token, %err, "token balance read failed, reporting zero");
                    Default::default()
                }
            };
            fungibles.push((TokenId::Contract(token), balance));
        }

        out.insert(addr, BalanceSnapshot { native, fungibles });
    }
    out
}

/// Capture a snapshot for every address in `addresses` on the runtime-module side,
/// reading the native triple (reduced to `free + reserved`) and every tracked asset.
pub async fn snapshot_substrate<B: SubstrateForkBackend>(
    backend: &B,
    addresses: &[SubstrateAddress],
    assets: &[u64],
) -> BTreeMap<SubstrateAddress, BalanceSnapshot> {
    let mut out = BTreeMap::new();
    for addr in addresses {
        let native = match backend.native_balance(addr).await {
            Ok(native) => native.total_controlled(),
            Err(err) => {
                warn!(%addr, %err, "native balance read failed, reporting zero");
                Default::default()
            }
        };

        let mut fungibles = Vec::with_capacity(assets.len());
        for &asset in assets {
            let balance = match backend.asset_balance(asset, addr).await {
                Ok(value) => value,
                Err(err) => {
                    warn!(%addr, asset, %err, "asset balance read failed, reporting zero");
                    Default::default()
                }
            };
            fungibles.push((TokenId::Asset(asset), balance));
        }

        out.insert(addr.clone(), BalanceSnapshot { native, fungibles });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{EvmCallOutcome, EvmCallRequest};
    use crate::types::TokenMetadata;
    use alloy_primitives::U256;
    use eyre::Result;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeEvmBackend {
        native: Mutex<HashMap<AlloyAddress, U256>>,
        fail_native_for: AlloyAddress,
    }

    impl EvmForkBackend for FakeEvmBackend {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn snapshot(&self) -> Result<U256> {
            Ok(U256::ZERO)
        }
        async fn revert(&self, _id: U256) -> Result<bool> {
            Ok(true)
        }
        async fn reset(&self) -> Result<()> {
            Ok(())
        }
        async fn impersonate(&self, _addr: AlloyAddress) -> Result<()> {
            Ok(())
        }
        async fn stop_impersonating(&self, _addr: AlloyAddress) -> Result<()> {
            Ok(())
        }
        async fn native_balance(&self, addr: AlloyAddress) -> Result<U256> {
            if addr == self.fail_native_for {
                return Err(eyre::eyre!("rpc failure"));
            }
            Ok(*self.native.lock().unwrap().get(&addr).unwrap_or(&U256::ZERO))
        }
        async fn token_balance(&self, _token: AlloyAddress, _owner: AlloyAddress) -> Result<U256> {
            Ok(U256::from(42u64))
        }
        async fn token_metadata(&self, _token: AlloyAddress) -> Result<TokenMetadata> {
            Ok(TokenMetadata { symbol: "TOK".to_string(), decimals: 18 })
        }
        async fn gas_price(&self) -> Result<U256> {
            Ok(U256::from(1u64))
        }
        async fn send(&self, _request: EvmCallRequest) -> Result<EvmCallOutcome> {
            unreachable!("not exercised by snapshot tests")
        }
        async fn is_connected(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn failed_native_read_yields_zero_not_abort() {
        let bad = EvmAddress::parse("0x0000000000000000000000000000000000000bad").unwrap();
        let good = EvmAddress::parse("0x0000000000000000000000000000000000000001").unwrap();
        let backend = FakeEvmBackend {
            native: Mutex::new(HashMap::from([(good.as_alloy(), U256::from(100u64))])),
            fail_native_for: bad.as_alloy(),
        };

        let snapshot = snapshot_evm(&backend, &[bad, good], &[]).await;
        assert_eq!(snapshot[&bad].native, U256::ZERO);
        assert_eq!(snapshot[&good].native, U256::from(100u64));
    }
}
