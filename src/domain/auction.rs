//! On-chain auctions keyed by auction hash.

use crate::domain::{Address, Decimal, EntityKey, EntityKind, KeyParseError, OrderKey, TimeMs};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AuctionHash(pub String);

impl AuctionHash {
    pub fn new(hash: impl Into<String>) -> Self {
        AuctionHash(hash.into().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuctionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl EntityKey for AuctionHash {
    fn to_key_string(&self) -> String {
        self.0.clone()
    }

    fn parse_key(raw: &str) -> Result<Self, KeyParseError> {
        if raw.trim().is_empty() {
            return Err(KeyParseError::new(raw, "empty auction hash"));
        }
        Ok(AuctionHash::new(raw))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "assetClass", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetType {
    Eth,
    Erc20 { token: Address },
    Erc721 { token: Address, token_id: String },
    Erc1155 { token: Address, token_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub asset_type: AssetType,
    pub value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub amount: Decimal,
    pub date: TimeMs,
}

/// Auction terms as emitted by the auction contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseAuction {
    pub seller: Address,
    pub buyer: Option<Address>,
    pub sell: Asset,
    pub buy: AssetType,
    pub last_bid: Option<Bid>,
    pub end_time: Option<TimeMs>,
    pub minimal_step: Decimal,
    pub minimal_price: Decimal,
    pub protocol_fee: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuctionPayload {
    OnChainAuction {
        contract: Address,
        auction_id: u64,
        start_time: Option<TimeMs>,
        base: BaseAuction,
    },
    BidPlaced {
        buyer: Address,
        bid: Bid,
    },
    AuctionCancelled,
    AuctionFinished {
        base: BaseAuction,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuctionStatus {
    Active,
    Finished,
    Cancelled,
}

/// A not-yet-confirmed auction event kept for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuctionEvent {
    pub id: String,
    pub order: OrderKey,
    pub payload: AuctionPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auction {
    pub hash: AuctionHash,
    pub contract: Address,
    pub auction_id: u64,
    pub seller: Address,
    pub buyer: Option<Address>,
    pub sell: Asset,
    pub buy: AssetType,
    pub last_bid: Option<Bid>,
    pub start_time: Option<TimeMs>,
    pub end_time: Option<TimeMs>,
    pub minimal_step: Decimal,
    pub minimal_price: Decimal,
    pub protocol_fee: Decimal,
    pub status: AuctionStatus,
    pub finished: bool,
    pub cancelled: bool,
    pub created_at: TimeMs,
    pub last_update_at: TimeMs,
    pub pending: Vec<PendingAuctionEvent>,
    /// Hash chain over the ids of every applied confirmed event.
    pub last_event_id: Option<String>,
}

impl Auction {
    pub fn empty(hash: &AuctionHash) -> Self {
        Self {
            hash: hash.clone(),
            contract: Address::zero(),
            auction_id: 0,
            seller: Address::zero(),
            buyer: None,
            sell: Asset {
                asset_type: AssetType::Eth,
                value: Decimal::zero(),
            },
            buy: AssetType::Eth,
            last_bid: None,
            start_time: None,
            end_time: None,
            minimal_step: Decimal::zero(),
            minimal_price: Decimal::zero(),
            protocol_fee: Decimal::zero(),
            status: AuctionStatus::Active,
            finished: false,
            cancelled: false,
            created_at: TimeMs::new(0),
            last_update_at: TimeMs::new(0),
            pending: Vec::new(),
            last_event_id: None,
        }
    }
}

pub struct AuctionKind;

impl EntityKind for AuctionKind {
    const KIND: &'static str = "auction";

    type Key = AuctionHash;
    type Data = Auction;
    type Payload = AuctionPayload;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auction_hash_normalized() {
        let hash = AuctionHash::parse_key(" 0xABC ").unwrap();
        assert_eq!(hash.as_str(), "0xabc");
        assert!(AuctionHash::parse_key("  ").is_err());
    }

    #[test]
    fn test_cancelled_payload_json() {
        let json = serde_json::to_value(AuctionPayload::AuctionCancelled).unwrap();
        assert_eq!(json, serde_json::json!({"type": "AUCTION_CANCELLED"}));
    }
}
