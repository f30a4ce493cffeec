//! Logical-name → address mapping plus the shared byte-level codecs.

use alloy::primitives::{keccak256, Address, B256};
use alloy::sol_types::SolEvent;

use crate::config::ContractsConfig;
use crate::error::{RevertKind, RpcError};

use super::abi;

/// Logical contract names used across the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractName {
    PoolCore,
    GuidedOracle,
    Oddyssey,
    BitrToken,
    ReputationSystem,
    BitrFaucet,
}

impl std::fmt::Display for ContractName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContractName::PoolCore => "PoolCore",
            ContractName::GuidedOracle => "GuidedOracle",
            ContractName::Oddyssey => "Oddyssey",
            ContractName::BitrToken => "BitrToken",
            ContractName::ReputationSystem => "ReputationSystem",
            ContractName::BitrFaucet => "BitrFaucet",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ContractRegistry {
    cfg: ContractsConfig,
}

impl ContractRegistry {
    pub fn new(cfg: ContractsConfig) -> Self {
        Self { cfg }
    }

    pub fn address(&self, name: ContractName) -> Address {
        match name {
            ContractName::PoolCore => self.cfg.pool_core,
            ContractName::GuidedOracle => self.cfg.guided_oracle,
            ContractName::Oddyssey => self.cfg.oddyssey,
            ContractName::BitrToken => self.cfg.bitr_token,
            ContractName::ReputationSystem => self.cfg.reputation_system,
            ContractName::BitrFaucet => self.cfg.bitr_faucet,
        }
    }

    /// Topic0 set watched on the pool contract.
    pub fn pool_core_topics(&self) -> Vec<B256> {
        vec![
            abi::PoolCreated::SIGNATURE_HASH,
            abi::BetPlaced::SIGNATURE_HASH,
            abi::LiquidityAdded::SIGNATURE_HASH,
            abi::LiquidityRemoved::SIGNATURE_HASH,
            abi::PoolSettled::SIGNATURE_HASH,
            abi::PoolRefunded::SIGNATURE_HASH,
        ]
    }

    pub fn guided_oracle_topics(&self) -> Vec<B256> {
        vec![abi::OutcomeSubmitted::SIGNATURE_HASH]
    }

    pub fn oddyssey_topics(&self) -> Vec<B256> {
        vec![
            abi::SlipPlaced::SIGNATURE_HASH,
            abi::CycleStarted::SIGNATURE_HASH,
            abi::CycleResolved::SIGNATURE_HASH,
            abi::SlipEvaluated::SIGNATURE_HASH,
            abi::PrizeClaimed::SIGNATURE_HASH,
        ]
    }
}

/// Classify an RPC failure from a write path into the revert taxonomy. Tries
/// the ABI-encoded Error(string) payload first, then the raw message the
/// node attached.
pub fn classify_revert(err: &RpcError) -> RevertKind {
    if let RpcError::Call { message, data, .. } = err {
        if let Some(reason) = data.as_deref().and_then(decode_error_string) {
            let kind = RevertKind::classify(&reason);
            if kind != RevertKind::Other {
                return kind;
            }
        }
        return RevertKind::classify(message);
    }
    RevertKind::Other
}

/// Topic value of an indexed `string` parameter: keccak256 of its UTF-8 bytes.
pub fn indexed_string_topic(s: &str) -> B256 {
    keccak256(s.as_bytes())
}

/// Decode a fixed 32-byte field back into the UTF-8 string the contract
/// packed into it: drop trailing zero bytes, return an empty string if the
/// remainder is not valid UTF-8. Never fails.
pub fn bytes32_to_string(b: &B256) -> String {
    let raw = b.as_slice();
    let end = raw.iter().rposition(|&x| x != 0).map_or(0, |p| p + 1);
    match std::str::from_utf8(&raw[..end]) {
        Ok(s) => s.to_string(),
        Err(_) => String::new(),
    }
}

/// Pack a string into a bytes32, truncating at 32 bytes on a char boundary.
pub fn string_to_bytes32(s: &str) -> B256 {
    let mut out = [0u8; 32];
    let mut len = s.len().min(32);
    while len > 0 && !s.is_char_boundary(len) {
        len -= 1;
    }
    out[..len].copy_from_slice(&s.as_bytes()[..len]);
    B256::from(out)
}

/// Extract the reason from an ABI-encoded `Error(string)` revert payload
/// (selector 0x08c379a0), if that is what the text contains.
fn decode_error_string(text: &str) -> Option<String> {
    let hex = text.trim().strip_prefix("0x")?;
    if !hex.starts_with("08c379a0") || hex.len() < 8 + 128 {
        return None;
    }
    let payload = alloy::hex::decode(&hex[8..]).ok()?;
    // offset (32) | length (32) | data
    if payload.len() < 64 {
        return None;
    }
    let len = u64::from_be_bytes(payload[56..64].try_into().ok()?) as usize;
    if payload.len() < 64 + len {
        return None;
    }
    String::from_utf8(payload[64..64 + len].to_vec()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;
    use std::str::FromStr;

    fn test_registry() -> ContractRegistry {
        let addr = |n: u8| Address::from_str(&format!("0x{:040x}", n)).unwrap();
        ContractRegistry::new(crate::config::ContractsConfig {
            pool_core: addr(1),
            guided_oracle: addr(2),
            oddyssey: addr(3),
            bitr_token: addr(4),
            reputation_system: addr(5),
            bitr_faucet: addr(6),
        })
    }

    #[test]
    fn test_bytes32_roundtrip() {
        let b = string_to_bytes32("Premier League");
        assert_eq!(bytes32_to_string(&b), "Premier League");
    }

    #[test]
    fn test_bytes32_trims_trailing_zeros_only() {
        let mut raw = [0u8; 32];
        raw[..3].copy_from_slice(b"a\0b");
        // Interior NUL survives; only the trailing padding is dropped.
        assert_eq!(bytes32_to_string(&B256::from(raw)), "a\0b");
    }

    #[test]
    fn test_bytes32_invalid_utf8_is_empty() {
        let mut raw = [0u8; 32];
        raw[0] = 0xFF;
        raw[1] = 0xFE;
        assert_eq!(bytes32_to_string(&B256::from(raw)), "");
    }

    #[test]
    fn test_bytes32_all_zero_is_empty() {
        assert_eq!(bytes32_to_string(&B256::ZERO), "");
    }

    #[test]
    fn test_string_to_bytes32_truncates_on_char_boundary() {
        // 33 ASCII bytes: truncated to 32.
        let long = "a".repeat(33);
        let b = string_to_bytes32(&long);
        assert_eq!(bytes32_to_string(&b).len(), 32);

        // Multibyte char straddling the 32-byte edge is dropped whole.
        let tricky = format!("{}é", "a".repeat(31));
        let b = string_to_bytes32(&tricky);
        assert_eq!(bytes32_to_string(&b), "a".repeat(31));
    }

    #[test]
    fn test_indexed_string_topic_matches_keccak() {
        let topic = indexed_string_topic("19391153");
        assert_eq!(topic, keccak256("19391153".as_bytes()));
        assert_ne!(topic, indexed_string_topic("19391154"));
    }

    #[test]
    fn test_decode_error_string_payload() {
        // abi.encodeWithSignature("Error(string)", "Pool already settled")
        let reason = "Pool already settled";
        let mut payload = Vec::new();
        payload.extend_from_slice(&alloy::hex::decode("08c379a0").unwrap());
        let mut offset = [0u8; 32];
        offset[31] = 0x20;
        payload.extend_from_slice(&offset);
        let mut len = [0u8; 32];
        len[31] = reason.len() as u8;
        payload.extend_from_slice(&len);
        let mut data = reason.as_bytes().to_vec();
        data.resize(32, 0);
        payload.extend_from_slice(&data);

        let text = format!("0x{}", alloy::hex::encode(payload));
        assert_eq!(decode_error_string(&text).as_deref(), Some(reason));
    }

    #[test]
    fn test_classify_revert_from_message_text() {
        let err = RpcError::Call {
            code: 3,
            message: "execution reverted: Event not ended".into(),
            data: None,
            retryable: false,
        };
        assert_eq!(classify_revert(&err), crate::error::RevertKind::EventNotEnded);
    }

    #[test]
    fn test_classify_revert_prefers_decoded_payload() {
        // Error(string) payload carries the reason; the message only says
        // "execution reverted".
        let reason = "Pool already settled";
        let mut payload = Vec::new();
        payload.extend_from_slice(&alloy::hex::decode("08c379a0").unwrap());
        let mut offset = [0u8; 32];
        offset[31] = 0x20;
        payload.extend_from_slice(&offset);
        let mut len = [0u8; 32];
        len[31] = reason.len() as u8;
        payload.extend_from_slice(&len);
        let mut data = reason.as_bytes().to_vec();
        data.resize(32, 0);
        payload.extend_from_slice(&data);

        let err = RpcError::Call {
            code: 3,
            message: "execution reverted".into(),
            data: Some(format!("0x{}", alloy::hex::encode(payload))),
            retryable: false,
        };
        assert_eq!(classify_revert(&err), crate::error::RevertKind::AlreadySettled);
    }

    #[test]
    fn test_topic_sets_are_disjoint() {
        let reg = test_registry();
        let pool = reg.pool_core_topics();
        let oracle = reg.guided_oracle_topics();
        let odd = reg.oddyssey_topics();
        assert_eq!(pool.len(), 6);
        assert_eq!(odd.len(), 5);
        for t in &oracle {
            assert!(!pool.contains(t));
            assert!(!odd.contains(t));
        }
    }
}
