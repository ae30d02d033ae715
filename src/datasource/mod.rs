//! Live chain queries used by reconciliation, never by the hot path.

use crate::domain::{Address, Decimal};
use async_trait::async_trait;
use std::fmt;

pub mod mock;
pub mod rpc;

pub use mock::MockChain;
pub use rpc::JsonRpcChain;

/// Ground-truth reads against a chain node.
///
/// Implementations must handle retry/backoff for transient failures.
#[async_trait]
pub trait ChainQuery: Send + Sync + fmt::Debug {
    /// Current head block number.
    async fn block_number(&self) -> Result<i64, ChainQueryError>;

    /// `balanceOf(owner)` on `token`, at `block` or at the head when `None`.
    async fn balance_of(
        &self,
        token: &Address,
        owner: &Address,
        block: Option<i64>,
    ) -> Result<Decimal, ChainQueryError>;
}

/// Error type for chain queries.
#[derive(Debug, Clone)]
pub enum ChainQueryError {
    /// Network error (e.g., connection timeout, DNS failure)
    NetworkError(String),
    /// HTTP error (e.g., 429 rate limit, 5xx server error)
    HttpError { status: u16, message: String },
    /// JSON-RPC error object returned by the node
    RpcError { code: i64, message: String },
    /// Parsing error (invalid JSON or malformed result)
    ParseError(String),
    /// Rate limit exceeded
    RateLimited,
}

impl fmt::Display for ChainQueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainQueryError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            ChainQueryError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            ChainQueryError::RpcError { code, message } => {
                write!(f, "RPC error {}: {}", code, message)
            }
            ChainQueryError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            ChainQueryError::RateLimited => write!(f, "Rate limited"),
        }
    }
}

impl std::error::Error for ChainQueryError {}
