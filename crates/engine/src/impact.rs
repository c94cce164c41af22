// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! The state-impact builder (C6): diffs two balance snapshots per address into a
//! change list, then partitions addresses into sender / primary counterparty / other
//! affected.

use std::collections::{BTreeMap, BTreeSet};

use txsim_common::numeric::{format_amount, format_human, SignedAmount};

use crate::types::{AddressState, BalanceSnapshot, StateImpactReport, TokenBalance, TokenId, TokenMetadata};

/// Build the full [`StateImpactReport`] for one simulation.
///
/// `counterparty` is taken as-is: the caller has already decided, per backend kind,
/// whether a counterparty should be reported at all (kind A always supplies one, kind B
/// only when a recognised counterparty exists and its delta is non-zero).
pub fn build_impact<A>(
    sender: &A,
    counterparty: Option<&A>,
    before: &BTreeMap<A, BalanceSnapshot>,
    after: &BTreeMap<A, BalanceSnapshot>,
    native_symbol: &str,
    token_metadata: &BTreeMap<TokenId, TokenMetadata>,
) -> StateImpactReport
where
    A: Ord + Clone + std::fmt::Display,
{
    let excluded: BTreeSet<&A> = [Some(sender), counterparty].into_iter().flatten().collect();

    let sender_state = address_state(sender, before, after, native_symbol, token_metadata);
    let counterparty_state =
        counterparty.map(|addr| address_state(addr, before, after, native_symbol, token_metadata));

    let mut all_addresses: BTreeSet<&A> = before.keys().collect();
    all_addresses.extend(after.keys());

    let mut other_affected = Vec::new();
    for addr in all_addresses {
        if excluded.contains(addr) {
            continue;
        }
        let state = address_state(addr, before, after, native_symbol, token_metadata);
        if !state.changes.is_empty() {
            other_affected.push(state);
        }
    }

    StateImpactReport { sender: sender_state, counterparty: counterparty_state, other_affected }
}

fn address_state<A>(
    addr: &A,
    before: &BTreeMap<A, BalanceSnapshot>,
    after: &BTreeMap<A, BalanceSnapshot>,
    native_symbol: &str,
    token_metadata: &BTreeMap<TokenId, TokenMetadata>,
) -> AddressState
where
    A: Ord + Clone + std::fmt::Display,
{
    let empty = BalanceSnapshot::default();
    let before_snap = before.get(addr).unwrap_or(&empty);
    let after_snap = after.get(addr).unwrap_or(&empty);

    let mut tokens: Vec<TokenId> = before_snap
        .fungibles
        .iter()
        .chain(after_snap.fungibles.iter())
        .map(|(id, _)| id.clone())
        .collect();
    tokens.sort();
    tokens.dedup();

    let mut before_list = vec![native_balance_entry(before_snap.native, native_symbol)];
    let mut after_list = vec![native_balance_entry(after_snap.native, native_symbol)];
    let mut changes = Vec::new();

    let native_delta = SignedAmount::diff(before_snap.native, after_snap.native);
    if !native_delta.is_zero() {
        changes.push(crate::types::BalanceChange {
            token: None,
            symbol: native_symbol.to_string(),
            delta: native_delta.to_string(),
        });
    }

    for token in tokens {
        let metadata = token_metadata.get(&token).cloned().unwrap_or_else(|| TokenMetadata::unknown(&token));
        let before_amount = before_snap.fungible(&token).unwrap_or_default();
        let after_amount = after_snap.fungible(&token).unwrap_or_default();

        before_list.push(TokenBalance {
            token: Some(token.clone()),
            symbol: metadata.symbol.clone(),
            amount: format_amount(before_amount),
        });
        after_list.push(TokenBalance {
            token: Some(token.clone()),
            symbol: metadata.symbol.clone(),
            amount: format_amount(after_amount),
        });

        let delta = SignedAmount::diff(before_amount, after_amount);
        if !delta.is_zero() {
            changes.push(crate::types::BalanceChange {
                token: Some(token),
                symbol: metadata.symbol,
                delta: delta.to_string(),
            });
        }
    }

    AddressState { address: addr.to_string(), before: before_list, after: after_list, changes }
}

fn native_balance_entry(amount: alloy_primitives::U256, symbol: &str) -> TokenBalance {
    TokenBalance { token: None, symbol: symbol.to_string(), amount: format_amount(amount) }
}

/// Render an amount in its human form, used by the fee/gas reporting layer.
pub fn human_amount(amount: alloy_primitives::U256, decimals: u8) -> String {
    format_human(amount, decimals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use txsim_common::address::EvmAddress;

    fn addr(byte: u8) -> EvmAddress {
        EvmAddress::parse(&format!("0x{:040x}", byte)).unwrap()
    }

    #[test]
    fn partitions_sender_counterparty_and_other_affected() {
        let sender = addr(1);
        let counterparty = addr(2);
        let bystander = addr(3);
        let untouched = addr(4);

        let mut before = BTreeMap::new();
        before.insert(sender, BalanceSnapshot { native: U256::from(100u64), fungibles: vec![] });
        before.insert(counterparty, BalanceSnapshot { native: U256::from(0u64), fungibles: vec![] });
        before.insert(bystander, BalanceSnapshot { native: U256::from(5u64), fungibles: vec![] });
        before.insert(untouched, BalanceSnapshot { native: U256::from(9u64), fungibles: vec![] });

        let mut after = before.clone();
        after.insert(sender, BalanceSnapshot { native: U256::from(70u64), fungibles: vec![] });
        after.insert(counterparty, BalanceSnapshot { native: U256::from(30u64), fungibles: vec![] });
        after.insert(bystander, BalanceSnapshot { native: U256::from(6u64), fungibles: vec![] });

        let report =
            build_impact(&sender, Some(&counterparty), &before, &after, "ETH", &BTreeMap::new());

        assert_eq!(report.sender.changes.len(), 1);
        assert_eq!(report.sender.changes[0].delta, "-30");
        let cp = report.counterparty.unwrap();
        assert_eq!(cp.changes[0].delta, "30");
        assert_eq!(report.other_affected.len(), 1);
        assert_eq!(report.other_affected[0].address, bystander.to_string());
    }

    #[test]
    fn zero_delta_counterparty_omitted_by_caller_not_builder() {
        let sender = addr(1);
        let counterparty = addr(2);
        let mut before = BTreeMap::new();
        before.insert(sender, BalanceSnapshot { native: U256::from(100u64), fungibles: vec![] });
        before.insert(counterparty, BalanceSnapshot { native: U256::from(10u64), fungibles: vec![] });
        let after = before.clone();

        let report = build_impact(&sender, None, &before, &after, "ETH", &BTreeMap::new());
        assert!(report.counterparty.is_none());
        assert!(report.other_affected.is_empty());
    }
}
