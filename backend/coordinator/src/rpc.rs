//! Ethereum JSON-RPC gateway: `eth_call` for reads, `eth_sendTransaction`
//! for writes, `eth_getTransactionReceipt` polling for confirmation.
//!
//! ## Signing
//!
//! Transactions are sent with `eth_sendTransaction`, so the node (or the
//! wallet proxy in front of it) owns the key for `from` and may refuse to
//! sign. A refusal surfaces as [`CartError::SubmissionRejected`].
//!
//! ## Resilience
//!
//! Submissions and reads are never retried. While waiting for a receipt,
//! transport errors and rate-limit responses only delay the next poll, with
//! exponential back-off up to [`MAX_BACKOFF_SECS`] seconds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::abi;
use crate::errors::{CartError, Result};
use crate::events::{self, RawLog};
use crate::gateway::{Confirmation, Contracts, LedgerCall, LedgerGateway, TxReceipt};
use crate::types::{Address, RawCartInfo};

const MAX_BACKOFF_SECS: u64 = 30;
const INITIAL_BACKOFF_SECS: u64 = 1;

/// EIP-1193 "user rejected the request".
const USER_REJECTED: i64 = 4001;

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ReceiptResult {
    status: Option<String>,
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
    #[serde(default)]
    logs: Vec<LogResult>,
}

#[derive(Debug, Deserialize)]
struct LogResult {
    address: String,
    topics: Vec<String>,
    data: String,
}

/// Why a single JSON-RPC round trip failed.
#[derive(Debug)]
enum RpcFailure {
    Transport(reqwest::Error),
    RateLimited,
    Node { code: i64, message: String },
    Decode(String),
}

impl std::fmt::Display for RpcFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::RateLimited => f.write_str("rate limited"),
            Self::Node { code, message } => write!(f, "node error {code}: {message}"),
            Self::Decode(msg) => write!(f, "decode error: {msg}"),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Gateway
// ─────────────────────────────────────────────────────────

pub struct RpcGateway {
    client: Client,
    rpc_url: String,
    contracts: Contracts,
    chain_id: u64,
    poll_interval: Duration,
    next_id: AtomicU64,
}

impl RpcGateway {
    pub fn new(
        client: Client,
        rpc_url: impl Into<String>,
        contracts: Contracts,
        chain_id: u64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            rpc_url: rpc_url.into(),
            contracts,
            chain_id,
            poll_interval,
            next_id: AtomicU64::new(1),
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<Option<T>, RpcFailure> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let resp = self
            .client
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .map_err(RpcFailure::Transport)?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(RpcFailure::RateLimited);
        }

        let body: RpcResponse<T> = resp
            .json()
            .await
            .map_err(|e| RpcFailure::Decode(e.to_string()))?;

        if let Some(err) = body.error {
            return Err(RpcFailure::Node {
                code: err.code,
                message: err.message,
            });
        }
        Ok(body.result)
    }

    async fn eth_call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>> {
        let params = json!([
            { "to": to.to_string(), "data": format!("0x{}", hex::encode(data)) },
            "latest"
        ]);
        let raw: Option<String> = self
            .request("eth_call", params)
            .await
            .map_err(|e| CartError::ReadUnavailable(format!("eth_call to {to}: {e}")))?;
        let raw = raw.ok_or_else(|| {
            CartError::ReadUnavailable(format!("eth_call to {to}: empty result"))
        })?;
        decode_hex(&raw).map_err(CartError::ReadUnavailable)
    }

    /// One `eth_getTransactionReceipt` poll; `Ok(None)` while pending.
    async fn fetch_receipt(
        &self,
        tx_hash: &str,
    ) -> std::result::Result<Option<ReceiptResult>, RpcFailure> {
        self.request("eth_getTransactionReceipt", json!([tx_hash]))
            .await
    }
}

impl LedgerGateway for RpcGateway {
    async fn submit(&self, from: Address, call: LedgerCall) -> Result<TxReceipt> {
        let kind = call.kind();
        let to = call.target(&self.contracts);
        let params = json!([{
            "from": from.to_string(),
            "to": to.to_string(),
            "data": format!("0x{}", hex::encode(call.calldata())),
            "chainId": format!("0x{:x}", self.chain_id),
        }]);

        let tx_hash: Option<String> = self
            .request("eth_sendTransaction", params)
            .await
            .map_err(|e| match e {
                RpcFailure::Node { code, message } if code == USER_REJECTED => {
                    CartError::SubmissionRejected(format!("{kind} declined by signer: {message}"))
                }
                other => CartError::SubmissionRejected(format!("{kind}: {other}")),
            })?;
        let tx_hash = tx_hash.ok_or_else(|| {
            CartError::SubmissionRejected(format!("{kind}: node returned no transaction hash"))
        })?;

        debug!("Submitted {kind} to {to}: {tx_hash}");
        Ok(TxReceipt {
            tx_hash,
            kind,
            target: to,
        })
    }

    async fn await_confirmation(&self, receipt: &TxReceipt) -> Result<Confirmation> {
        let mut backoff = INITIAL_BACKOFF_SECS;

        loop {
            match self.fetch_receipt(&receipt.tx_hash).await {
                Ok(Some(result)) => return confirmation_from(receipt, result),
                Ok(None) => {
                    backoff = INITIAL_BACKOFF_SECS;
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(RpcFailure::Decode(msg)) => {
                    return Err(CartError::ReadUnavailable(format!(
                        "receipt for {}: {msg}",
                        receipt.tx_hash
                    )));
                }
                Err(e) => {
                    warn!(
                        "Receipt poll for {} failed (next poll in {backoff}s): {e}",
                        receipt.tx_hash
                    );
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                }
            }
        }
    }

    async fn cart_addresses(&self) -> Result<Vec<Address>> {
        let data = abi::encode_call(abi::GET_ALL_CART_ADDRESSES, &[]);
        let raw = self.eth_call(self.contracts.factory, data).await?;
        abi::decode_address_array(&raw)
    }

    async fn read_cart(&self, cart: Address) -> Result<RawCartInfo> {
        let data = abi::encode_call(abi::GET_CART_INFO, &[]);
        let raw = self.eth_call(cart, data).await?;
        abi::decode_cart_info(&raw)
    }
}

fn confirmation_from(receipt: &TxReceipt, result: ReceiptResult) -> Result<Confirmation> {
    let block_number = result.block_number.as_deref().and_then(parse_hex_u64);

    if result.status.as_deref() == Some("0x0") {
        return Err(CartError::Reverted {
            tx_hash: receipt.tx_hash.clone(),
            reason: format!("{} reverted in block {block_number:?}", receipt.kind),
        });
    }

    let logs: Vec<RawLog> = result
        .logs
        .into_iter()
        .filter_map(|log| {
            Some(RawLog {
                address: log.address.parse().ok()?,
                topics: log.topics,
                data: decode_hex(&log.data).ok()?,
            })
        })
        .collect();

    Ok(Confirmation {
        tx_hash: receipt.tx_hash.clone(),
        block_number,
        events: events::decode_logs(&logs),
    })
}

fn decode_hex(raw: &str) -> std::result::Result<Vec<u8>, String> {
    hex::decode(raw.trim_start_matches("0x")).map_err(|e| format!("bad hex payload: {e}"))
}

fn parse_hex_u64(raw: &str) -> Option<u64> {
    u64::from_str_radix(raw.trim_start_matches("0x"), 16).ok()
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
