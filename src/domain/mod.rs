//! Domain types for the reduction engine.
//!
//! This module provides:
//! - Lossless amount handling via the Decimal wrapper
//! - Log events with their status and total order key
//! - Snapshots with their progress watermark
//! - Entity kinds: balances, allowances, auctions and AMM pool orders

pub mod auction;
pub mod balance;
pub mod decimal;
pub mod event;
pub mod kind;
pub mod ordering;
pub mod pool;
pub mod primitives;
pub mod snapshot;
pub mod status;

pub use auction::{
    Asset, AssetType, Auction, AuctionHash, AuctionKind, AuctionPayload, AuctionStatus,
    BaseAuction, Bid, PendingAuctionEvent,
};
pub use balance::{Allowance, AllowanceKind, Balance, BalanceId, BalanceKind, BalancePayload};
pub use decimal::{checked_sum, ArithmeticError, Decimal};
pub use event::LogEvent;
pub use kind::{EntityKey, EntityKind, EventOf, KeyParseError, SnapshotOf};
pub use ordering::OrderKey;
pub use pool::{OrderHash, PoolKind, PoolOrder, PoolPayload, PoolSide};
pub use primitives::{Address, TimeMs};
pub use snapshot::{Mark, Snapshot};
pub use status::LogStatus;
