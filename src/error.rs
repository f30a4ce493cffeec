//! Typed error taxonomy for chain-facing components.
//!
//! Most component code propagates `anyhow::Result`; the types here exist for
//! the places where the caller must branch on *what* failed: the indexer
//! shrinking its block window, the settlement coordinator parking a pool, the
//! oracle submitter treating an existing outcome as success.

use thiserror::Error;

/// Errors surfaced by the RPC gateway.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Every configured endpoint is unhealthy or exhausted its retry budget.
    #[error("all RPC endpoints unavailable")]
    Unavailable,

    /// The provider rejected an `eth_getLogs` window as too wide. Not
    /// retryable as-is; callers shrink the window and try again.
    #[error("block range too large for eth_getLogs")]
    BlockRangeTooLarge,

    /// A JSON-RPC level error object. `retryable` is the gateway's
    /// classification; reverts and bad requests are not retryable.
    #[error("rpc error {code}: {message}")]
    Call {
        code: i64,
        message: String,
        /// ABI-encoded revert payload when the node supplies one.
        data: Option<String>,
        retryable: bool,
    },

    /// Transport failure (connect, timeout, 5xx body read).
    #[error("rpc transport error: {0}")]
    Transport(String),

    /// The node answered with something that does not decode.
    #[error("malformed rpc response: {0}")]
    Malformed(String),
}

impl RpcError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::Transport(_) => true,
            RpcError::Call { retryable, .. } => *retryable,
            RpcError::Unavailable | RpcError::BlockRangeTooLarge | RpcError::Malformed(_) => false,
        }
    }
}

/// Classified contract reverts. Recoverable variants are state signals, not
/// failures: the component reconciles the DB and parks the work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RevertKind {
    #[error("pool already settled")]
    AlreadySettled,
    #[error("outcome already exists")]
    OutcomeAlreadyExists,
    #[error("event has not ended")]
    EventNotEnded,
    #[error("oracle outcome not set")]
    OutcomeNotSet,
    #[error("refund not eligible")]
    RefundNotEligible,
    #[error("caller is not the oracle bot")]
    Unauthorized,
    #[error("unknown function selector")]
    UnknownSelector,
    #[error("unclassified revert")]
    Other,
}

impl RevertKind {
    /// Map a revert reason string (or raw error text) onto the taxonomy.
    /// Matching is substring-based because nodes differ in how much framing
    /// ("execution reverted: ...") they keep around the reason.
    pub fn classify(text: &str) -> Self {
        let t = text.to_ascii_lowercase();
        if t.contains("already settled") {
            RevertKind::AlreadySettled
        } else if t.contains("outcome already") || t.contains("already set") {
            RevertKind::OutcomeAlreadyExists
        } else if t.contains("not ended") || t.contains("event not over") {
            RevertKind::EventNotEnded
        } else if t.contains("outcome not set") || t.contains("no outcome") {
            RevertKind::OutcomeNotSet
        } else if t.contains("not eligible") || t.contains("refund") && t.contains("denied") {
            RevertKind::RefundNotEligible
        } else if t.contains("not oracle bot") || t.contains("unauthorized") || t.contains("not authorized") {
            RevertKind::Unauthorized
        } else if t.contains("function selector was not recognized")
            || t.contains("unknown selector")
            || t.contains("function does not exist")
        {
            RevertKind::UnknownSelector
        } else {
            RevertKind::Other
        }
    }

    /// Fatal reverts abort the service rather than parking the task.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RevertKind::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_reverts() {
        assert_eq!(
            RevertKind::classify("execution reverted: Pool already settled"),
            RevertKind::AlreadySettled
        );
        assert_eq!(
            RevertKind::classify("execution reverted: Event not ended"),
            RevertKind::EventNotEnded
        );
        assert_eq!(
            RevertKind::classify("Outcome not set for market"),
            RevertKind::OutcomeNotSet
        );
        assert_eq!(
            RevertKind::classify("execution reverted: caller is NOT ORACLE BOT"),
            RevertKind::Unauthorized
        );
    }

    #[test]
    fn test_classify_unknown_falls_through() {
        assert_eq!(RevertKind::classify("something else entirely"), RevertKind::Other);
    }

    #[test]
    fn test_fatal_classes() {
        assert!(RevertKind::Unauthorized.is_fatal());
        assert!(!RevertKind::AlreadySettled.is_fatal());
        assert!(!RevertKind::EventNotEnded.is_fatal());
    }

    #[test]
    fn test_rpc_error_retryability() {
        assert!(RpcError::Transport("timeout".into()).is_retryable());
        assert!(!RpcError::BlockRangeTooLarge.is_retryable());
        assert!(!RpcError::Call {
            code: 3,
            message: "execution reverted".into(),
            data: None,
            retryable: false
        }
        .is_retryable());
    }
}
