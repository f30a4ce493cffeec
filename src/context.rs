//! Startup wiring: the explicit capability context that replaces ambient
//! singletons. Everything stateful is built once here, shared as `Arc`s,
//! and torn down through [`AppContext::shutdown`].

use std::sync::Arc;

use alloy::primitives::Bytes;
use alloy::sol_types::SolCall;
use anyhow::{bail, Context as _, Result};
use tracing::info;

use crate::config::Config;
use crate::contracts::{abi, ContractName, ContractRegistry};
use crate::db::Store;
use crate::flags::{Heartbeats, SyncFlags};
use crate::rpc::RpcGateway;
use crate::tx::TxSender;

pub struct AppContext {
    pub cfg: Config,
    pub gateway: Arc<RpcGateway>,
    pub store: Store,
    pub registry: Arc<ContractRegistry>,
    pub sender: Arc<TxSender>,
    pub flags: Arc<SyncFlags>,
    pub heartbeats: Arc<Heartbeats>,
}

impl AppContext {
    pub async fn init(cfg: Config) -> Result<Self> {
        let gateway = Arc::new(RpcGateway::new(&cfg.rpc)?);
        let store = Store::connect(&cfg.db).await?;
        let registry = Arc::new(ContractRegistry::new(cfg.contracts.clone()));
        let sender = Arc::new(TxSender::new(
            gateway.clone(),
            &cfg.oracle.bot_private_key,
            cfg.oracle.chain_id,
        )?);

        let ctx = Self {
            cfg,
            gateway,
            store,
            registry,
            sender,
            flags: Arc::new(SyncFlags::new()),
            heartbeats: Arc::new(Heartbeats::new()),
        };
        ctx.verify_oracle_bot().await?;
        Ok(ctx)
    }

    /// The signing key must be the address the guided oracle trusts; a
    /// mismatch means every submission would revert, so refuse to run.
    async fn verify_oracle_bot(&self) -> Result<()> {
        let call = abi::oracleBotCall {};
        let raw = self
            .gateway
            .call(
                self.registry.address(ContractName::GuidedOracle),
                &Bytes::from(call.abi_encode()),
            )
            .await
            .context("oracleBot() view call failed during startup check")?;
        let configured = abi::oracleBotCall::abi_decode_returns(&raw)
            .context("oracleBot() returned undecodable data")?;

        let ours = self.sender.address();
        if configured != ours {
            bail!(
                "signing key {ours:#x} is not the configured oracle bot {configured:#x}; \
                 refusing to start"
            );
        }
        info!("[INIT] oracle-bot key verified: {ours:#x}");
        Ok(())
    }

    /// Drain the pool; running tasks are cancelled by dropping their join
    /// handles before this is called.
    pub async fn shutdown(&self) {
        self.store.close().await;
        info!("[INIT] shutdown complete");
    }
}
