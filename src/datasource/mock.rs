//! Mock chain for testing without network calls.

use super::{ChainQuery, ChainQueryError};
use crate::domain::{Address, Decimal};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Mock chain that returns predefined balances and head block.
#[derive(Debug, Default)]
pub struct MockChain {
    head: AtomicI64,
    balances: Mutex<HashMap<(Address, Address), Decimal>>,
    calls: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the head block returned by `block_number`.
    pub fn with_head(self, head: i64) -> Self {
        self.head.store(head, Ordering::SeqCst);
        self
    }

    pub fn with_balance(self, token: &Address, owner: &Address, amount: Decimal) -> Self {
        self.set_balance(token, owner, amount);
        self
    }

    pub fn set_head(&self, head: i64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn set_balance(&self, token: &Address, owner: &Address, amount: Decimal) {
        if let Ok(mut balances) = self.balances.lock() {
            balances.insert((token.clone(), owner.clone()), amount);
        }
    }

    /// Number of `balance_of` calls served so far.
    pub fn balance_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainQuery for MockChain {
    async fn block_number(&self) -> Result<i64, ChainQueryError> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    /// Unknown pairs report a zero balance, like an untouched ERC-20 slot.
    async fn balance_of(
        &self,
        token: &Address,
        owner: &Address,
        _block: Option<i64>,
    ) -> Result<Decimal, ChainQueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let balances = self
            .balances
            .lock()
            .map_err(|_| ChainQueryError::NetworkError("mock lock poisoned".to_string()))?;
        Ok(balances
            .get(&(token.clone(), owner.clone()))
            .copied()
            .unwrap_or_default())
    }
}
