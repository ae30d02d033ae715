use crate::domain::{
    Auction, AuctionHash, AuctionKind, AuctionPayload, AuctionStatus, BaseAuction, EventOf,
    LogStatus, PendingAuctionEvent,
};
use sha2::{Digest, Sha256};

use super::{EntityReducer, EventInverter, ReduceError};

#[derive(Debug, Clone, Copy, Default)]
pub struct AuctionReducer;

/// Next link of the `last_event_id` hash chain.
pub fn chain_event_id(last: Option<&str>, event_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(last.unwrap_or_default().as_bytes());
    hasher.update(event_id.as_bytes());
    hex::encode(hasher.finalize())
}

fn replace_base(auction: &mut Auction, base: &BaseAuction) {
    auction.seller = base.seller.clone();
    auction.buyer = base.buyer.clone();
    auction.sell = base.sell.clone();
    auction.buy = base.buy.clone();
    auction.last_bid = base.last_bid.clone();
    auction.end_time = base.end_time;
    auction.minimal_step = base.minimal_step;
    auction.minimal_price = base.minimal_price;
    auction.protocol_fee = base.protocol_fee;
}

fn derive_status(auction: &Auction) -> AuctionStatus {
    if auction.cancelled {
        AuctionStatus::Cancelled
    } else if auction.finished {
        AuctionStatus::Finished
    } else {
        AuctionStatus::Active
    }
}

impl EntityReducer for AuctionReducer {
    type Kind = AuctionKind;

    fn initial_data(&self, key: &AuctionHash) -> Auction {
        Auction::empty(key)
    }

    fn apply(
        &self,
        mut auction: Auction,
        event: &EventOf<AuctionKind>,
    ) -> Result<Auction, ReduceError> {
        match &event.payload {
            AuctionPayload::OnChainAuction {
                contract,
                auction_id,
                start_time,
                base,
            } => {
                replace_base(&mut auction, base);
                auction.contract = contract.clone();
                auction.auction_id = *auction_id;
                auction.start_time = *start_time;
                auction.finished = false;
                auction.cancelled = false;
                if auction.created_at.as_i64() == 0 {
                    auction.created_at = event.timestamp;
                }
            }
            AuctionPayload::BidPlaced { buyer, bid } => {
                if bid.amount.is_negative() {
                    return Err(ReduceError::unexpected(event, "negative bid"));
                }
                auction.buyer = Some(buyer.clone());
                auction.last_bid = Some(bid.clone());
            }
            AuctionPayload::AuctionCancelled => {
                auction.cancelled = true;
            }
            AuctionPayload::AuctionFinished { base } => {
                replace_base(&mut auction, base);
                auction.finished = true;
            }
        }

        auction.pending.retain(|p| p.id != event.id);
        auction.last_update_at = event.timestamp;
        auction.last_event_id = Some(chain_event_id(
            auction.last_event_id.as_deref(),
            &event.id,
        ));
        auction.status = derive_status(&auction);
        Ok(auction)
    }

    /// Pending events are listed for display; dropped ones are removed again.
    fn apply_unconfirmed(&self, mut auction: Auction, event: &EventOf<AuctionKind>) -> Auction {
        match event.status {
            LogStatus::Pending => {
                if !auction.pending.iter().any(|p| p.id == event.id) {
                    auction.pending.push(PendingAuctionEvent {
                        id: event.id.clone(),
                        order: event.order,
                        payload: event.payload.clone(),
                    });
                }
            }
            LogStatus::Dropped | LogStatus::Inactive => {
                auction.pending.retain(|p| p.id != event.id);
            }
            LogStatus::Confirmed | LogStatus::Reverted => {}
        }
        auction
    }
}

impl EventInverter for AuctionReducer {
    fn invert(&self, _event: &EventOf<AuctionKind>) -> Option<EventOf<AuctionKind>> {
        None
    }
}
