//! Etherscan client with rate limiting.
//!
//! Serves two external collaborators of the pipeline:
//! - the ledger query service (`account/txlist`), paged by block window
//! - the address-type oracle (`proxy/eth_getCode`)
//!
//! Every request waits on one shared `governor` limiter so the two uses
//! together stay inside the API key's request budget.

use crate::config::{ChainConfig, RateLimitConfig};
use crate::schemas::TransferRecord;
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use serde::Deserialize;
use std::collections::HashSet;
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Etherscan error: message={message}, result={result}")]
    Api { message: String, result: String },

    #[error("JSON-RPC error: code={code}, message={message}")]
    JsonRpc { code: i64, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Inclusive block window of a ledger query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl From<&ChainConfig> for BlockRange {
    fn from(chain: &ChainConfig) -> Self {
        Self {
            start: chain.start_block,
            end: chain.end_block,
        }
    }
}

/// Ledger query service: transfer history into one address.
///
/// An `Err` is an explicit failure; "no transfers" is `Ok(vec![])`.
#[async_trait]
pub trait TransferSource: Send + Sync {
    async fn fetch_transfers(
        &self,
        target: &str,
        range: BlockRange,
    ) -> Result<Vec<TransferRecord>, RpcError>;
}

/// Raw Etherscan envelope. `result` is a list on success and a message
/// string on most failures, so it stays untyped until the status is known.
#[derive(Debug, Deserialize)]
struct EtherscanResponse {
    status: Option<String>,
    message: Option<String>,
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Rate-limited Etherscan v2 client bound to one chain.
pub struct EtherscanClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    chain_id: u64,
    rate_limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
    config: RateLimitConfig,
}

impl EtherscanClient {
    pub fn new(
        base_url: String,
        api_key: String,
        chain_id: u64,
        config: RateLimitConfig,
    ) -> Result<Self, RpcError> {
        let rps = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rps));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .pool_max_idle_per_host(20)
            .user_agent("eth-recovery-pipeline/1.0")
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key,
            chain_id,
            rate_limiter,
            config,
        })
    }

    async fn get(&self, params: &[(&str, String)]) -> Result<EtherscanResponse, RpcError> {
        self.rate_limiter.until_ready().await;

        let chain_id = self.chain_id.to_string();
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("chainid", chain_id.as_str()), ("apikey", self.api_key.as_str())])
            .query(params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RpcError::Status(response.status().as_u16()));
        }

        Ok(response.json().await?)
    }

    /// One `txlist` page, ascending by block
    async fn txlist_page(
        &self,
        target: &str,
        start_block: u64,
        end_block: u64,
    ) -> Result<Vec<TransferRecord>, RpcError> {
        let params = [
            ("module", "account".to_string()),
            ("action", "txlist".to_string()),
            ("address", target.to_string()),
            ("startblock", start_block.to_string()),
            ("endblock", end_block.to_string()),
            ("page", "1".to_string()),
            ("offset", self.config.page_size.to_string()),
            ("sort", "asc".to_string()),
        ];

        let response = self.get(&params).await?;
        parse_txlist(response)
    }

    /// Raw `eth_getCode` result for an address at the latest block
    pub async fn get_code(&self, address: &str) -> Result<String, RpcError> {
        let params = [
            ("module", "proxy".to_string()),
            ("action", "eth_getCode".to_string()),
            ("address", address.to_string()),
            ("tag", "latest".to_string()),
        ];

        let response = self.get(&params).await?;
        parse_get_code(response)
    }
}

#[async_trait]
impl TransferSource for EtherscanClient {
    /// Fetch every normal transaction touching `target` in `range`.
    ///
    /// Etherscan caps a single result window, so when a page comes back full
    /// the next request restarts at the last block seen. Overlapping records
    /// from that block are dropped by hash.
    async fn fetch_transfers(
        &self,
        target: &str,
        range: BlockRange,
    ) -> Result<Vec<TransferRecord>, RpcError> {
        info!(
            "Fetching transactions for {} on chain {} (blocks {} to {})",
            target, self.chain_id, range.start, range.end
        );

        let mut all_records = Vec::new();
        let mut seen_hashes: HashSet<String> = HashSet::new();
        let mut cursor = range.start;
        let max_pages = self.config.max_pages.max(1);

        for page in 0..max_pages {
            let records = self.txlist_page(target, cursor, range.end).await?;
            let page_len = records.len();
            let last_block = records
                .last()
                .and_then(|r| r.block_number.parse::<u64>().ok());

            for record in records {
                if record.hash.is_empty() || seen_hashes.insert(record.hash.clone()) {
                    all_records.push(record);
                }
            }

            if page_len < self.config.page_size {
                debug!(
                    "Pagination complete: {} pages, {} total records",
                    page + 1,
                    all_records.len()
                );
                break;
            }

            match last_block {
                Some(block) if block > cursor => {
                    debug!(
                        "Page {} full ({} records), continuing from block {}",
                        page + 1,
                        page_len,
                        block
                    );
                    cursor = block;
                }
                _ => {
                    warn!(
                        "Full page without block progress at block {}; some transactions may be missing",
                        cursor
                    );
                    break;
                }
            }

            if page == max_pages - 1 {
                warn!(
                    "Hit pagination safety limit ({} pages, {} records). Some transactions may be missing.",
                    max_pages,
                    all_records.len()
                );
            }
        }

        info!("Fetched {} raw transactions", all_records.len());
        Ok(all_records)
    }
}

fn parse_txlist(response: EtherscanResponse) -> Result<Vec<TransferRecord>, RpcError> {
    let message = response.message.unwrap_or_default();
    let result = response.result.unwrap_or(serde_json::Value::Null);

    match response.status.as_deref() {
        Some("1") => serde_json::from_value(result)
            .map_err(|e| RpcError::InvalidResponse(format!("malformed txlist result: {}", e))),
        Some("0") if message.starts_with("No transactions found") => Ok(Vec::new()),
        _ => Err(RpcError::Api {
            message,
            result: result_text(&result),
        }),
    }
}

fn parse_get_code(response: EtherscanResponse) -> Result<String, RpcError> {
    if let Some(error) = response.error {
        return Err(RpcError::JsonRpc {
            code: error.code,
            message: error.message,
        });
    }

    // Proxy failures (rate limit, bad key) come back in the account envelope
    if response.status.as_deref() == Some("0") {
        return Err(RpcError::Api {
            message: response.message.unwrap_or_default(),
            result: result_text(&response.result.unwrap_or(serde_json::Value::Null)),
        });
    }

    match response.result {
        Some(serde_json::Value::String(code)) if code.is_empty() || code.starts_with("0x") => {
            Ok(code)
        }
        Some(other) => Err(RpcError::InvalidResponse(format!(
            "unexpected eth_getCode result: {}",
            other
        ))),
        None => Err(RpcError::InvalidResponse(
            "missing eth_getCode result".to_string(),
        )),
    }
}

fn result_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(json: &str) -> EtherscanResponse {
        serde_json::from_str(json).expect("valid envelope")
    }

    #[test]
    fn test_txlist_success() {
        let response = envelope(
            r#"{"status":"1","message":"OK","result":[
                {"blockNumber":"10","hash":"0x01","from":"0xA","to":"0xB","value":"5","isError":"0"},
                {"blockNumber":"11","hash":"0x02","from":"0xC","to":"0xB","value":"7","isError":"1"}
            ]}"#,
        );
        let records = parse_txlist(response).expect("parses");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].value, "7");
        assert!(records[1].is_failed());
    }

    #[test]
    fn test_txlist_empty_is_not_an_error() {
        let response = envelope(r#"{"status":"0","message":"No transactions found","result":[]}"#);
        assert!(parse_txlist(response).expect("empty").is_empty());
    }

    #[test]
    fn test_txlist_failure_is_explicit() {
        let response =
            envelope(r#"{"status":"0","message":"NOTOK","result":"Invalid API Key"}"#);
        match parse_txlist(response) {
            Err(RpcError::Api { message, result }) => {
                assert_eq!(message, "NOTOK");
                assert_eq!(result, "Invalid API Key");
            }
            other => panic!("expected api error, got {:?}", other),
        }
    }

    #[test]
    fn test_get_code_results() {
        let eoa = envelope(r#"{"jsonrpc":"2.0","id":1,"result":"0x"}"#);
        assert_eq!(parse_get_code(eoa).unwrap(), "0x");

        let contract = envelope(r#"{"jsonrpc":"2.0","id":1,"result":"0x6080604052"}"#);
        assert_eq!(parse_get_code(contract).unwrap(), "0x6080604052");

        let limited =
            envelope(r#"{"status":"0","message":"NOTOK","result":"Max rate limit reached"}"#);
        assert!(matches!(parse_get_code(limited), Err(RpcError::Api { .. })));

        let rpc_error = envelope(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"header not found"}}"#,
        );
        assert!(matches!(
            parse_get_code(rpc_error),
            Err(RpcError::JsonRpc { code: -32000, .. })
        ));

        let missing = envelope(r#"{"jsonrpc":"2.0","id":1}"#);
        assert!(matches!(
            parse_get_code(missing),
            Err(RpcError::InvalidResponse(_))
        ));
    }
}
