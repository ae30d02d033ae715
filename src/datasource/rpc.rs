//! Ethereum JSON-RPC client for balance cross-checks.

use super::{ChainQuery, ChainQueryError};
use crate::domain::{Address, Decimal};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// `balanceOf(address)` selector.
const BALANCE_OF_SELECTOR: &str = "70a08231";

#[derive(Debug)]
pub struct JsonRpcChain {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcChain {
    pub fn new(url: String) -> Self {
        Self {
            client: Client::new(),
            url,
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ChainQueryError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        retry(backoff, || async {
            let payload = serde_json::json!({
                "jsonrpc": "2.0",
                "id": self.next_id.fetch_add(1, Ordering::Relaxed),
                "method": method,
                "params": params,
            });
            let response = self
                .client
                .post(&self.url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| {
                    backoff::Error::transient(ChainQueryError::NetworkError(e.to_string()))
                })?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(ChainQueryError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(ChainQueryError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(ChainQueryError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            let body = response.json::<serde_json::Value>().await.map_err(|e| {
                backoff::Error::permanent(ChainQueryError::ParseError(e.to_string()))
            })?;
            extract_result(body).map_err(backoff::Error::permanent)
        })
        .await
    }
}

fn extract_result(body: serde_json::Value) -> Result<serde_json::Value, ChainQueryError> {
    if let Some(error) = body.get("error") {
        return Err(ChainQueryError::RpcError {
            code: error.get("code").and_then(|c| c.as_i64()).unwrap_or_default(),
            message: error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
                .to_string(),
        });
    }
    body.get("result")
        .cloned()
        .ok_or_else(|| ChainQueryError::ParseError("Missing result field".to_string()))
}

/// Call data for `balanceOf(owner)`: selector plus the address left-padded
/// to 32 bytes.
pub fn balance_of_call_data(owner: &Address) -> String {
    format!("0x{}{:0>64}", BALANCE_OF_SELECTOR, owner.hex_digits())
}

fn block_tag(block: Option<i64>) -> String {
    match block {
        Some(number) => format!("0x{:x}", number),
        None => "latest".to_string(),
    }
}

/// Parse a hex quantity into an exact decimal.
pub fn parse_quantity(raw: &str) -> Result<Decimal, ChainQueryError> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| ChainQueryError::ParseError(format!("Not a hex quantity: {}", raw)))?;
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(Decimal::zero());
    }
    let value = u128::from_str_radix(digits, 16)
        .map_err(|e| ChainQueryError::ParseError(format!("Invalid quantity {}: {}", raw, e)))?;
    Decimal::from_u128(value)
        .ok_or_else(|| ChainQueryError::ParseError(format!("Quantity out of range: {}", raw)))
}

#[async_trait]
impl ChainQuery for JsonRpcChain {
    async fn block_number(&self) -> Result<i64, ChainQueryError> {
        let result = self.call("eth_blockNumber", serde_json::json!([])).await?;
        let raw = result
            .as_str()
            .ok_or_else(|| ChainQueryError::ParseError("Expected hex string".to_string()))?;
        let digits = raw.trim_start_matches("0x");
        i64::from_str_radix(digits, 16)
            .map_err(|e| ChainQueryError::ParseError(format!("Invalid block number: {}", e)))
    }

    async fn balance_of(
        &self,
        token: &Address,
        owner: &Address,
        block: Option<i64>,
    ) -> Result<Decimal, ChainQueryError> {
        debug!(token = %token, owner = %owner, block = ?block, "eth_call balanceOf");

        let params = serde_json::json!([
            { "to": token.as_str(), "data": balance_of_call_data(owner) },
            block_tag(block),
        ]);
        let result = self.call("eth_call", params).await?;
        let raw = result
            .as_str()
            .ok_or_else(|| ChainQueryError::ParseError("Expected hex string".to_string()))?;
        parse_quantity(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_of_call_data() {
        let data = balance_of_call_data(&Address::new("0x00000000000000000000000000000000000000AB"));
        assert_eq!(data.len(), 2 + 8 + 64);
        assert!(data.starts_with("0x70a08231"));
        assert!(data.ends_with("ab"));
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x").unwrap(), Decimal::zero());
        assert_eq!(
            parse_quantity("0x0000000000000000000000000000000000000000000000000000000000000011")
                .unwrap(),
            Decimal::from(17u64)
        );
        assert!(parse_quantity("17").is_err());
        assert!(parse_quantity(&format!("0x{}", "f".repeat(40))).is_err());
    }

    #[test]
    fn test_extract_result_surfaces_rpc_error() {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32602, "message": "invalid params"}
        });
        match extract_result(body) {
            Err(ChainQueryError::RpcError { code, message }) => {
                assert_eq!(code, -32602);
                assert_eq!(message, "invalid params");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_block_tag() {
        assert_eq!(block_tag(Some(255)), "0xff");
        assert_eq!(block_tag(None), "latest");
    }
}
