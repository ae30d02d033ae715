use crate::domain::{
    Decimal, EventOf, OrderHash, PoolKind, PoolOrder, PoolPayload, PoolSide,
};

use super::{EntityReducer, EventInverter, ReduceError};

/// AMM pool order state. NFT counts saturate at zero, which is not
/// invertible, so reorgs replay the pool history.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolReducer;

fn token_count(token_ids: &[String]) -> Decimal {
    Decimal::from(token_ids.len() as u64)
}

fn non_negative(event: &EventOf<PoolKind>, value: &Decimal, what: &str) -> Result<(), ReduceError> {
    if value.is_negative() {
        return Err(ReduceError::unexpected(event, format!("negative {}", what)));
    }
    Ok(())
}

impl EntityReducer for PoolReducer {
    type Kind = PoolKind;

    fn initial_data(&self, key: &OrderHash) -> PoolOrder {
        PoolOrder::empty(key)
    }

    fn apply(
        &self,
        mut order: PoolOrder,
        event: &EventOf<PoolKind>,
    ) -> Result<PoolOrder, ReduceError> {
        match &event.payload {
            PoolPayload::OnChainAmmOrder {
                maker,
                collection,
                side,
                token_ids,
                price,
                fee,
                delta,
            } => {
                non_negative(event, price, "price")?;
                order.maker = Some(maker.clone());
                order.collection = Some(collection.clone());
                order.side = *side;
                order.make_value = token_count(token_ids);
                order.fee = *fee;
                order.delta = *delta;
                set_price(&mut order, *price);
                order.created_at.get_or_insert(event.timestamp);
            }
            PoolPayload::NftIn {
                collection,
                token_ids,
                deposit,
            } => {
                // Deposits of another collection do not change what the pool holds.
                if *deposit && order.collection.as_ref() != Some(collection) {
                    return Ok(order);
                }
                order.make_value = (order.make_value + token_count(token_ids))
                    .map_err(|e| ReduceError::overflow(event, e))?;
            }
            PoolPayload::NftOut { token_ids } => {
                order.make_value = order.make_value.saturating_sub(token_count(token_ids));
            }
            PoolPayload::SpotPriceUpdate { new_spot_price } => {
                non_negative(event, new_spot_price, "price")?;
                set_price(&mut order, *new_spot_price);
            }
            PoolPayload::FeeUpdate { new_fee } => {
                non_negative(event, new_fee, "fee")?;
                order.fee = *new_fee;
            }
            PoolPayload::DeltaUpdate { new_delta } => {
                order.delta = *new_delta;
            }
        }
        Ok(order)
    }
}

fn set_price(order: &mut PoolOrder, price: Decimal) {
    match order.side {
        PoolSide::Sell => order.make_price = Some(price),
        PoolSide::Bid => order.take_price = Some(price),
    }
}

impl EventInverter for PoolReducer {
    fn invert(&self, _event: &EventOf<PoolKind>) -> Option<EventOf<PoolKind>> {
        None
    }
}
