use crate::api::AppState;
use crate::domain::{Address, BalanceId, BalanceKind, SnapshotOf};
use crate::error::AppError;
use crate::store::SnapshotStore;
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceDto {
    pub token: String,
    pub owner: String,
    pub amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<i64>,
    /// Highest block incorporated, including non-confirmed events.
    pub mark: i64,
}

impl From<SnapshotOf<BalanceKind>> for BalanceDto {
    fn from(snapshot: SnapshotOf<BalanceKind>) -> Self {
        let balance = snapshot.data;
        Self {
            token: balance.token.to_string(),
            owner: balance.owner.to_string(),
            amount: balance.amount.to_canonical_string(),
            block_number: balance.block_number,
            created_at: balance.created_at.map(|t| t.as_i64()),
            last_updated_at: balance.last_updated_at.map(|t| t.as_i64()),
            mark: snapshot.mark.as_i64(),
        }
    }
}

fn parse_address(raw: &str, field: &str) -> Result<Address, AppError> {
    let address = Address::new(raw);
    let digits = address.hex_digits();
    if !address.as_str().starts_with("0x")
        || digits.is_empty()
        || !digits.chars().all(|c| c.is_ascii_hexdigit())
    {
        return Err(AppError::BadRequest(format!("Invalid {} address", field)));
    }
    Ok(address)
}

pub async fn get_balance(
    Path((token, owner)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<BalanceDto>, AppError> {
    let id = BalanceId::new(parse_address(&token, "token")?, parse_address(&owner, "owner")?);
    let snapshot = SnapshotStore::<BalanceKind>::get(state.repo.as_ref(), &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No balance for {}", id)))?;
    Ok(Json(snapshot.into()))
}
