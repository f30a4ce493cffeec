//! Signed write-path to the chain.
//!
//! One signing key serves both the oracle submitter and the settlement
//! coordinator, so every send holds the per-key mutex from nonce assignment
//! through `eth_sendRawTransaction`. Gas limits are estimated with a 20%
//! buffer, falling back to a per-function table when estimation reverts;
//! the gas price is `max(nodePrice × 1.10, 20 gwei)`.

use std::sync::Arc;
use std::time::Duration;

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, TxKind, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::contracts::registry::classify_revert;
use crate::error::{RevertKind, RpcError};
use crate::rpc::RpcGateway;

/// Floor for the effective gas price.
const FALLBACK_GAS_PRICE_WEI: u128 = 20_000_000_000; // 20 gwei

/// Gas limits used when `eth_estimateGas` reverts. Sized generously from
/// observed usage on the target chain.
const FALLBACK_GAS_LIMITS: &[(&str, u64)] = &[
    ("submitOutcome", 200_000),
    ("settlePool", 400_000),
    ("settlePoolAutomatically", 450_000),
    ("refundPool", 300_000),
    ("startDailyCycle", 1_500_000),
    ("resolveDailyCycle", 900_000),
];

const DEFAULT_FALLBACK_GAS: u64 = 500_000;

/// How long to wait for a receipt before giving up on this tick.
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(90);
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Outcome of a confirmed transaction.
#[derive(Debug, Clone, Copy)]
pub struct TxOutcome {
    pub hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
    pub success: bool,
}

/// Failure modes a write can end in, beyond plain transport trouble.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The node rejected the call during estimation or submission.
    #[error("transaction reverted: {0}")]
    Reverted(RevertKind),
    /// Mined, but with status = 0.
    #[error("transaction {hash:#x} mined with failure status")]
    Failed { hash: B256 },
    /// Not mined within the receipt window; may still land later.
    #[error("no receipt for {hash:#x} within {timeout:?}")]
    ReceiptTimeout { hash: B256, timeout: Duration },
    /// The bot wallet cannot cover gas; operators must top it up.
    #[error("bot wallet has insufficient funds for gas")]
    InsufficientFunds,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub struct TxSender {
    gateway: Arc<RpcGateway>,
    signer: PrivateKeySigner,
    chain_id: u64,
    /// Cached next nonce; `None` forces a refetch (startup, nonce conflicts).
    nonce: Mutex<Option<u64>>,
}

impl TxSender {
    pub fn new(gateway: Arc<RpcGateway>, private_key: &str, chain_id: u64) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .trim_start_matches("0x")
            .parse()
            .context("ORACLE_BOT_PRIVATE_KEY is not a valid secp256k1 key")?;
        Ok(Self { gateway, signer, chain_id, nonce: Mutex::new(None) })
    }

    /// Address of the oracle-bot key.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Sign, send, and await the receipt of a contract call.
    ///
    /// `function` is the Solidity function name, used only for the fallback
    /// gas table and logs.
    pub async fn send(
        &self,
        to: Address,
        calldata: Bytes,
        function: &'static str,
    ) -> Result<TxOutcome, SendError> {
        let gas_limit = self.gas_limit(to, &calldata, function).await?;
        let gas_price = self.effective_gas_price().await?;

        // Nonce is assigned and consumed under the key mutex so concurrent
        // submitters cannot race each other into nonce gaps.
        let hash = {
            let mut nonce_slot = self.nonce.lock().await;
            let nonce = match *nonce_slot {
                Some(n) => n,
                None => {
                    let n = self
                        .gateway
                        .transaction_count(self.signer.address())
                        .await
                        .map_err(classify_rpc)?;
                    *nonce_slot = Some(n);
                    n
                }
            };

            let mut tx = TxLegacy {
                chain_id: Some(self.chain_id),
                nonce,
                gas_price,
                gas_limit,
                to: TxKind::Call(to),
                value: U256::ZERO,
                input: calldata,
            };
            let signature = self
                .signer
                .sign_transaction_sync(&mut tx)
                .context("transaction signing failed")?;
            let raw = TxEnvelope::from(tx.into_signed(signature)).encoded_2718();

            debug!(
                "[TX] {} nonce={} gas_limit={} gas_price={}",
                function, nonce, gas_limit, gas_price
            );

            match self.gateway.send_raw_transaction(&raw).await {
                Ok(hash) => {
                    *nonce_slot = Some(nonce + 1);
                    hash
                }
                Err(e) => {
                    let text = e.to_string().to_ascii_lowercase();
                    if text.contains("nonce") {
                        // Lost track of the account nonce; refetch next time.
                        *nonce_slot = None;
                    }
                    if text.contains("insufficient funds") {
                        return Err(SendError::InsufficientFunds);
                    }
                    return Err(classify_rpc(e));
                }
            }
        };

        info!("[TX] {} sent: {:#x}", function, hash);
        self.await_receipt(hash, function).await
    }

    async fn await_receipt(&self, hash: B256, function: &str) -> Result<TxOutcome, SendError> {
        let deadline = tokio::time::Instant::now() + RECEIPT_TIMEOUT;
        loop {
            match self.gateway.transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    let outcome = TxOutcome {
                        hash,
                        block_number: receipt.block_number,
                        gas_used: receipt.gas_used,
                        success: receipt.succeeded(),
                    };
                    if !outcome.success {
                        warn!("[TX] {} failed on-chain: {:#x}", function, hash);
                        return Err(SendError::Failed { hash });
                    }
                    info!(
                        "[TX] {} confirmed in block {} ({} gas)",
                        function, receipt.block_number, receipt.gas_used
                    );
                    return Ok(outcome);
                }
                Ok(None) => {}
                Err(e) if e.is_retryable() => {
                    debug!("[TX] receipt poll error for {:#x}: {}", hash, e);
                }
                Err(e) => return Err(classify_rpc(e)),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(SendError::ReceiptTimeout { hash, timeout: RECEIPT_TIMEOUT });
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }

    async fn gas_limit(
        &self,
        to: Address,
        calldata: &Bytes,
        function: &'static str,
    ) -> Result<u64, SendError> {
        match self.gateway.estimate_gas(self.signer.address(), to, calldata).await {
            Ok(estimate) => Ok(buffered_gas_limit(estimate)),
            Err(e @ RpcError::Call { .. }) if !e.is_retryable() => {
                // Estimation reverted. Surface definite reverts so callers can
                // classify them, except the simulation-only artifacts where a
                // fixed limit still lets the real call through.
                let kind = classify_revert(&e);
                if kind == RevertKind::Other || kind == RevertKind::UnknownSelector {
                    warn!(
                        "[TX] gas estimation reverted for {}, using fallback limit",
                        function
                    );
                    Ok(fallback_gas_limit(function))
                } else {
                    Err(SendError::Reverted(kind))
                }
            }
            Err(e) => Err(classify_rpc(e)),
        }
    }

    async fn effective_gas_price(&self) -> Result<u128, SendError> {
        let base: u128 = match self.gateway.gas_price().await {
            Ok(price) => price.try_into().unwrap_or(u128::MAX),
            Err(e) if e.is_retryable() || matches!(e, RpcError::Unavailable) => {
                warn!("[TX] gas price query failed ({}), using fallback", e);
                0
            }
            Err(e) => return Err(classify_rpc(e)),
        };
        Ok(effective_gas_price(base))
    }
}

/// `max(base × 1.10, 20 gwei)`.
pub fn effective_gas_price(base: u128) -> u128 {
    let bumped = base.saturating_mul(110) / 100;
    bumped.max(FALLBACK_GAS_PRICE_WEI)
}

/// Estimate plus a 20% buffer.
pub fn buffered_gas_limit(estimate: u64) -> u64 {
    estimate.saturating_mul(120) / 100
}

pub fn fallback_gas_limit(function: &str) -> u64 {
    FALLBACK_GAS_LIMITS
        .iter()
        .find(|(name, _)| *name == function)
        .map(|(_, gas)| *gas)
        .unwrap_or(DEFAULT_FALLBACK_GAS)
}

fn classify_rpc(e: RpcError) -> SendError {
    match &e {
        RpcError::Call { .. } if !e.is_retryable() => SendError::Reverted(classify_revert(&e)),
        _ => SendError::Other(anyhow::Error::new(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_gas_price_floor() {
        // Cheap chain: the 20 gwei floor wins.
        assert_eq!(effective_gas_price(1_000_000_000), FALLBACK_GAS_PRICE_WEI);
        assert_eq!(effective_gas_price(0), FALLBACK_GAS_PRICE_WEI);
    }

    #[test]
    fn test_effective_gas_price_bump() {
        // Busy chain: node price + 10% wins.
        let base = 100_000_000_000u128; // 100 gwei
        assert_eq!(effective_gas_price(base), 110_000_000_000);
    }

    #[test]
    fn test_buffered_gas_limit() {
        assert_eq!(buffered_gas_limit(100_000), 120_000);
        assert_eq!(buffered_gas_limit(0), 0);
    }

    #[test]
    fn test_fallback_gas_table() {
        assert_eq!(fallback_gas_limit("submitOutcome"), 200_000);
        assert_eq!(fallback_gas_limit("startDailyCycle"), 1_500_000);
        assert_eq!(fallback_gas_limit("somethingElse"), DEFAULT_FALLBACK_GAS);
    }
}
