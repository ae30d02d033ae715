//! Fungible token balances and allowances keyed by `(token, owner)`.

use crate::domain::{Address, Decimal, EntityKey, EntityKind, KeyParseError, TimeMs};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `(token, owner)` pair. Its string form is `token:owner`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BalanceId {
    pub token: Address,
    pub owner: Address,
}

impl BalanceId {
    pub fn new(token: Address, owner: Address) -> Self {
        Self { token, owner }
    }

    /// Prefix shared by all keys of one token, for scoped scans.
    pub fn token_prefix(token: &Address) -> String {
        format!("{}:", token)
    }
}

impl fmt::Display for BalanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.token, self.owner)
    }
}

impl EntityKey for BalanceId {
    fn to_key_string(&self) -> String {
        self.to_string()
    }

    fn parse_key(raw: &str) -> Result<Self, KeyParseError> {
        let (token, owner) = raw
            .split_once(':')
            .ok_or_else(|| KeyParseError::new(raw, "expected token:owner"))?;
        if token.is_empty() || owner.is_empty() {
            return Err(KeyParseError::new(raw, "empty address"));
        }
        Ok(BalanceId::new(Address::new(token), Address::new(owner)))
    }

    fn owner(&self) -> Option<&Address> {
        Some(&self.owner)
    }
}

/// Events of the fungible token log, from the point of view of one owner.
///
/// A transfer between two accounts arrives as two events: an outcome for
/// the sender's key and an income for the receiver's key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BalancePayload {
    IncomeTransfer { value: Decimal },
    OutcomeTransfer { value: Decimal },
    Deposit { value: Decimal },
    Withdrawal { value: Decimal },
    Approval { spender: Address, value: Decimal },
}

impl BalancePayload {
    /// Effect on the owner's balance, or `None` for events that never touch it.
    pub fn signed_delta(&self) -> Option<Decimal> {
        match self {
            BalancePayload::IncomeTransfer { value } | BalancePayload::Deposit { value } => {
                Some(*value)
            }
            BalancePayload::OutcomeTransfer { value } | BalancePayload::Withdrawal { value } => {
                Some(-*value)
            }
            BalancePayload::Approval { .. } => None,
        }
    }

    pub fn value(&self) -> Decimal {
        match self {
            BalancePayload::IncomeTransfer { value }
            | BalancePayload::OutcomeTransfer { value }
            | BalancePayload::Deposit { value }
            | BalancePayload::Withdrawal { value }
            | BalancePayload::Approval { value, .. } => *value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub token: Address,
    pub owner: Address,
    pub amount: Decimal,
    /// Block of the last confirmed balance-changing event.
    pub block_number: Option<i64>,
    pub created_at: Option<TimeMs>,
    pub last_updated_at: Option<TimeMs>,
}

impl Balance {
    pub fn empty(id: &BalanceId) -> Self {
        Self {
            token: id.token.clone(),
            owner: id.owner.clone(),
            amount: Decimal::zero(),
            block_number: None,
            created_at: None,
            last_updated_at: None,
        }
    }

    pub fn id(&self) -> BalanceId {
        BalanceId::new(self.token.clone(), self.owner.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowance {
    pub token: Address,
    pub owner: Address,
    pub spender: Option<Address>,
    pub allowance: Decimal,
    pub created_at: Option<TimeMs>,
    pub last_updated_at: Option<TimeMs>,
}

impl Allowance {
    pub fn empty(id: &BalanceId) -> Self {
        Self {
            token: id.token.clone(),
            owner: id.owner.clone(),
            spender: None,
            allowance: Decimal::zero(),
            created_at: None,
            last_updated_at: None,
        }
    }
}

pub struct BalanceKind;

impl EntityKind for BalanceKind {
    const KIND: &'static str = "balance";

    type Key = BalanceId;
    type Data = Balance;
    type Payload = BalancePayload;
}

/// Allowances fold the same event stream as balances.
pub struct AllowanceKind;

impl EntityKind for AllowanceKind {
    const KIND: &'static str = "allowance";
    const STREAM: &'static str = BalanceKind::KIND;

    type Key = BalanceId;
    type Data = Allowance;
    type Payload = BalancePayload;
}
