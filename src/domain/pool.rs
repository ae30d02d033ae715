//! AMM pool orders: an order whose NFT side is a pool of tokens.
//!
//! A pool event may affect both the fungible and the NFT side of a trade;
//! those are two independent single-key updates, never one transaction.

use crate::domain::{Address, Decimal, EntityKey, EntityKind, KeyParseError, TimeMs};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderHash(pub String);

impl OrderHash {
    pub fn new(hash: impl Into<String>) -> Self {
        OrderHash(hash.into().trim().to_lowercase())
    }
}

impl fmt::Display for OrderHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl EntityKey for OrderHash {
    fn to_key_string(&self) -> String {
        self.0.clone()
    }

    fn parse_key(raw: &str) -> Result<Self, KeyParseError> {
        if raw.trim().is_empty() {
            return Err(KeyParseError::new(raw, "empty order hash"));
        }
        Ok(OrderHash::new(raw))
    }
}

/// Which side of the pool holds the NFTs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolSide {
    /// The pool sells NFTs: the NFT count is the make side.
    Sell,
    /// The pool buys NFTs.
    Bid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolPayload {
    OnChainAmmOrder {
        maker: Address,
        collection: Address,
        side: PoolSide,
        token_ids: Vec<String>,
        price: Decimal,
        fee: Decimal,
        delta: Decimal,
    },
    NftIn {
        collection: Address,
        token_ids: Vec<String>,
        /// Direct deposit into the pool, as opposed to a swap.
        deposit: bool,
    },
    NftOut {
        token_ids: Vec<String>,
    },
    SpotPriceUpdate {
        new_spot_price: Decimal,
    },
    FeeUpdate {
        new_fee: Decimal,
    },
    DeltaUpdate {
        new_delta: Decimal,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolOrder {
    pub hash: OrderHash,
    pub maker: Option<Address>,
    pub collection: Option<Address>,
    pub side: PoolSide,
    /// Number of NFTs currently held by the pool.
    pub make_value: Decimal,
    pub make_price: Option<Decimal>,
    pub take_price: Option<Decimal>,
    pub fee: Decimal,
    pub delta: Decimal,
    pub created_at: Option<TimeMs>,
}

impl PoolOrder {
    pub fn empty(hash: &OrderHash) -> Self {
        Self {
            hash: hash.clone(),
            maker: None,
            collection: None,
            side: PoolSide::Sell,
            make_value: Decimal::zero(),
            make_price: None,
            take_price: None,
            fee: Decimal::zero(),
            delta: Decimal::zero(),
            created_at: None,
        }
    }
}

pub struct PoolKind;

impl EntityKind for PoolKind {
    const KIND: &'static str = "pool";

    type Key = OrderHash;
    type Data = PoolOrder;
    type Payload = PoolPayload;
}
