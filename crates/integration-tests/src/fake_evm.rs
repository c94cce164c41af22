// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0

//! An in-memory stand-in for [`EvmForkBackend`], driving the engine end to end without
//! an actual Anvil-style fork.

use std::collections::BTreeMap;
use std::sync::Mutex;

use alloy_primitives::{Address, U256};
use eyre::Result;
use txsim_engine::backend::{EvmCallOutcome, EvmCallRequest, EvmForkBackend};
use txsim_engine::decode::event_evm::RawLog;
use txsim_engine::types::TokenMetadata;

const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// A single scripted outcome for one `send()` call: whether the receipt succeeded, and
/// an optional raw error value (as a real RPC failure would surface one) when it did not.
#[derive(Debug, Clone, Default)]
pub struct ScriptedReceipt {
    pub success: bool,
    pub error: Option<serde_json::Value>,
}

struct Inner {
    native: BTreeMap<Address, U256>,
    tokens: BTreeMap<(Address, Address), U256>,
    receipts: Vec<ScriptedReceipt>,
}

/// A fake account-model fork: native/token balances live in plain maps, and `send()`
/// both applies the native-value transfer and, for a recognised ERC20 `transfer`
/// selector against a tracked token contract, moves the token balance and emits the
/// matching `Transfer` log — mirroring what a real fork plus its EVM would do.
pub struct FakeEvmBackend {
    inner: Mutex<Inner>,
    token_contract: Option<Address>,
}

impl FakeEvmBackend {
    /// Build a fake with starting native balances and no token contract configured.
    pub fn new(native: BTreeMap<Address, U256>) -> Self {
        Self {
            inner: Mutex::new(Inner { native, tokens: BTreeMap::new(), receipts: Vec::new() }),
            token_contract: None,
        }
    }

    /// Configure the single ERC20-style contract this fake recognises `transfer` calls
    /// against, with its starting per-holder balances.
    pub fn with_token(mut self, contract: Address, balances: BTreeMap<Address, U256>) -> Self {
        self.token_contract = Some(contract);
        self.inner.get_mut().unwrap().tokens = balances
            .into_iter()
            .map(|(holder, balance)| ((contract, holder), balance))
            .collect();
        self
    }

    /// Script the receipt(s) `send()` returns, one per call in order; the last entry is
    /// reused once the list is exhausted (the two-pass re-execution used by address
    /// discovery calls `send()` twice with an identical request).
    pub fn with_receipts(self, receipts: Vec<ScriptedReceipt>) -> Self {
        self.inner.lock().unwrap().receipts = receipts;
        self
    }

    /// Read back a token balance, for test assertions.
    pub fn token_balance_of(&self, contract: Address, holder: Address) -> U256 {
        *self.inner.lock().unwrap().tokens.get(&(contract, holder)).unwrap_or(&U256::ZERO)
    }
}

impl EvmForkBackend for FakeEvmBackend {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn snapshot(&self) -> Result<U256> {
        Ok(U256::from(1u64))
    }

    async fn revert(&self, _id: U256) -> Result<bool> {
        Ok(true)
    }

    async fn reset(&self) -> Result<()> {
        Ok(())
    }

    async fn impersonate(&self, _addr: Address) -> Result<()> {
        Ok(())
    }

    async fn stop_impersonating(&self, _addr: Address) -> Result<()> {
        Ok(())
    }

    async fn native_balance(&self, addr: Address) -> Result<U256> {
        Ok(*self.inner.lock().unwrap().native.get(&addr).unwrap_or(&U256::ZERO))
    }

    async fn token_balance(&self, token: Address, owner: Address) -> Result<U256> {
        Ok(*self.inner.lock().unwrap().tokens.get(&(token, owner)).unwrap_or(&U256::ZERO))
    }

    async fn token_metadata(&self, _token: Address) -> Result<TokenMetadata> {
        Ok(TokenMetadata { symbol: "TOK".to_string(), decimals: 18 })
    }

    async fn gas_price(&self) -> Result<U256> {
        Ok(U256::from(1_000_000_000u64))
    }

    async fn send(&self, request: EvmCallRequest) -> Result<EvmCallOutcome> {
        let mut inner = self.inner.lock().unwrap();

        let receipt = match inner.receipts.len() {
            0 => ScriptedReceipt { success: true, error: None },
            1 => inner.receipts[0].clone(),
            _ => inner.receipts.remove(0),
        };

        let sender_balance = *inner.native.get(&request.from).unwrap_or(&U256::ZERO);
        let recipient_balance = *inner.native.get(&request.to).unwrap_or(&U256::ZERO);
        inner.native.insert(request.from, sender_balance.saturating_sub(request.value));
        inner.native.insert(request.to, recipient_balance.saturating_add(request.value));

        let mut logs = Vec::new();
        if receipt.success {
            if let Some(contract) = self.token_contract {
                if request.to == contract
                    && request.data.len() >= 4 + 64
                    && request.data[..4] == TRANSFER_SELECTOR
                {
                    let recipient = Address::from_slice(&request.data[16..36]);
                    let amount = U256::from_be_slice(&request.data[36..68]);

                    let holder_balance =
                        *inner.tokens.get(&(contract, request.from)).unwrap_or(&U256::ZERO);
                    let recipient_token_balance =
                        *inner.tokens.get(&(contract, recipient)).unwrap_or(&U256::ZERO);
                    inner
                        .tokens
                        .insert((contract, request.from), holder_balance.saturating_sub(amount));
                    inner.tokens.insert(
                        (contract, recipient),
                        recipient_token_balance.saturating_add(amount),
                    );

                    logs.push(transfer_log(contract, request.from, recipient, amount, 0));
                }
            }
        }

        Ok(EvmCallOutcome {
            success: receipt.success,
            gas_used: 21_000,
            gas_price: U256::from(1_000_000_000u64),
            logs,
            error: receipt.error,
        })
    }

    async fn is_connected(&self) -> bool {
        true
    }
}

fn transfer_log(contract: Address, from: Address, to: Address, value: U256, index: u64) -> RawLog {
    let topic0 = alloy_primitives::keccak256("Transfer(address,address,uint256)".as_bytes());
    let mut from_topic = [0u8; 32];
    from_topic[12..].copy_from_slice(from.as_slice());
    let mut to_topic = [0u8; 32];
    to_topic[12..].copy_from_slice(to.as_slice());
    RawLog {
        address: contract,
        topics: vec![topic0, from_topic.into(), to_topic.into()],
        data: value.to_be_bytes::<32>().to_vec(),
        log_index: index,
    }
}
