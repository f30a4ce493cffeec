//! JSON-RPC 2.0 envelopes and wire types.
//!
//! Quantities arrive as 0x-prefixed hex strings; the serde helpers here
//! decode them into native integers once, at the boundary.

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::RpcError;

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self { jsonrpc: "2.0", id, method, params }
    }
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl JsonRpcErrorObject {
    /// Map a provider error object onto the gateway taxonomy.
    pub fn classify(self) -> RpcError {
        let lowered = self.message.to_ascii_lowercase();
        let range_limited = lowered.contains("block range")
            || lowered.contains("range limit")
            || lowered.contains("query returned more than")
            || lowered.contains("exceed maximum block range");
        if range_limited {
            return RpcError::BlockRangeTooLarge;
        }

        // Rate limiting and transient provider hiccups are retryable; reverts
        // and malformed requests are not.
        let retryable = self.code == 429
            || lowered.contains("too many requests")
            || lowered.contains("timeout")
            || lowered.contains("try again")
            || self.code == -32603;

        let data = self.data.as_ref().and_then(|d| match d {
            Value::String(s) => Some(s.clone()),
            other => serde_json::to_string(other).ok(),
        });

        RpcError::Call { code: self.code, message: self.message, data, retryable }
    }
}

/// Parameters for `eth_getLogs`, restricted to the shape the indexer uses:
/// one contract address, an OR-set of topic0 values, an inclusive range.
#[derive(Debug, Clone)]
pub struct LogFilter {
    pub from_block: u64,
    pub to_block: u64,
    pub address: Address,
    pub topics: Vec<B256>,
}

impl LogFilter {
    pub fn to_params(&self) -> Value {
        let topic0: Vec<String> = self.topics.iter().map(|t| format!("{t:#x}")).collect();
        serde_json::json!([{
            "fromBlock": format!("{:#x}", self.from_block),
            "toBlock": format!("{:#x}", self.to_block),
            "address": format!("{:#x}", self.address),
            "topics": [topic0],
        }])
    }
}

/// A log entry as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(rename = "blockNumber", deserialize_with = "hex_u64")]
    pub block_number: u64,
    #[serde(rename = "transactionHash")]
    pub transaction_hash: B256,
    #[serde(rename = "logIndex", deserialize_with = "hex_u64")]
    pub log_index: u64,
    #[serde(default)]
    pub removed: bool,
}

/// A mined transaction receipt.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcReceipt {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: B256,
    #[serde(rename = "blockNumber", deserialize_with = "hex_u64")]
    pub block_number: u64,
    #[serde(deserialize_with = "hex_u64")]
    pub status: u64,
    #[serde(rename = "gasUsed", deserialize_with = "hex_u64")]
    pub gas_used: u64,
    #[serde(rename = "effectiveGasPrice", default, deserialize_with = "hex_u256_opt")]
    pub effective_gas_price: Option<U256>,
}

impl RpcReceipt {
    pub fn succeeded(&self) -> bool {
        self.status == 1
    }
}

pub fn hex_u64<'de, D: Deserializer<'de>>(de: D) -> Result<u64, D::Error> {
    let raw = String::deserialize(de)?;
    parse_hex_u64(&raw).map_err(serde::de::Error::custom)
}

fn hex_u256_opt<'de, D: Deserializer<'de>>(de: D) -> Result<Option<U256>, D::Error> {
    let raw = Option::<String>::deserialize(de)?;
    match raw {
        None => Ok(None),
        Some(s) => {
            let digits = s.trim_start_matches("0x");
            U256::from_str_radix(digits, 16)
                .map(Some)
                .map_err(|e| serde::de::Error::custom(format!("bad hex quantity {s:?}: {e}")))
        }
    }
}

pub fn parse_hex_u64(raw: &str) -> Result<u64, String> {
    let digits = raw.trim_start_matches("0x");
    u64::from_str_radix(digits, 16).map_err(|e| format!("bad hex quantity {raw:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_quantities() {
        assert_eq!(parse_hex_u64("0x0").unwrap(), 0);
        assert_eq!(parse_hex_u64("0x2a").unwrap(), 42);
        assert_eq!(parse_hex_u64("0x186a0").unwrap(), 100_000);
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[test]
    fn test_log_deserialization() {
        let raw = serde_json::json!({
            "address": "0x4bfb41d5b3570defd03c39a9a4d8de6bd8b8982e",
            "topics": ["0xd0a08e8c493f9c94f29311604c9de1b4e8c8d4c06bd0c789af57f2d65bfec0f6"],
            "data": "0x",
            "blockNumber": "0x1e0a6e3",
            "transactionHash": "0x88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b",
            "logIndex": "0x5"
        });
        let log: RpcLog = serde_json::from_value(raw).unwrap();
        assert_eq!(log.block_number, 0x1e0a6e3);
        assert_eq!(log.log_index, 5);
        assert!(!log.removed);
    }

    #[test]
    fn test_range_limit_classification() {
        let err = JsonRpcErrorObject {
            code: -32005,
            message: "query exceeds max block range 1000".to_string(),
            data: None,
        };
        // Provider phrasing varies; "block range" is the stable fragment.
        assert!(matches!(err.classify(), RpcError::BlockRangeTooLarge));

        let err = JsonRpcErrorObject {
            code: -32000,
            message: "execution reverted: Pool already settled".to_string(),
            data: Some(Value::String("0x08c379a0".to_string())),
        };
        match err.classify() {
            RpcError::Call { retryable, .. } => assert!(!retryable),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_filter_params_shape() {
        let filter = LogFilter {
            from_block: 100_000,
            to_block: 100_500,
            address: Address::ZERO,
            topics: vec![B256::ZERO],
        };
        let params = filter.to_params();
        assert_eq!(params[0]["fromBlock"], "0x186a0");
        assert_eq!(params[0]["toBlock"], "0x18894");
        // topic0 is an OR-array nested in position 0
        assert!(params[0]["topics"][0].is_array());
    }
}
