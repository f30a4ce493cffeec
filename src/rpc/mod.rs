//! Multi-endpoint failover client for the chain's JSON-RPC interface.
//!
//! All chain traffic goes through [`gateway::RpcGateway`]: it owns the
//! endpoint list, rotates away from unhealthy providers, retries transient
//! failures with exponential backoff, and classifies provider errors so
//! callers can react (notably `eth_getLogs` range-limit rejections, which
//! are signalled upward instead of retried).

pub mod gateway;
pub mod health;
pub mod transport;

pub use gateway::RpcGateway;
pub use transport::{LogFilter, RpcLog, RpcReceipt};
