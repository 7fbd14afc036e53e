use alloy::primitives::B256;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// A structured error suitable for printing in a run report.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Submission rejected before execution (nonce, gas, funds).
    #[error("call rejected: {0}")]
    ChainCall(String),

    /// The contract executed and reverted.
    #[error("execution reverted: {reason}")]
    ChainRevert { reason: String, tx: Option<B256> },

    #[error("tx {tx:#x} did not reach {depth} confirmation(s) within {waited_secs}s")]
    ConfirmationTimeout {
        tx: B256,
        depth: u64,
        waited_secs: u64,
    },

    #[error("price quote is stale: updated {age_secs}s ago (max {max_age_secs}s)")]
    StaleQuote {
        updated_at: u64,
        age_secs: u64,
        max_age_secs: u64,
    },

    #[error("invalid price quote: {0}")]
    InvalidQuote(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("decode {what}: {message}")]
    Decode { what: &'static str, message: String },
}

impl PipelineError {
    pub fn revert(reason: impl Into<String>) -> Self {
        Self::ChainRevert {
            reason: reason.into(),
            tx: None,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn decode(what: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            what,
            message: err.to_string(),
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::ChainCall(_) => "chain_call_error",
            Self::ChainRevert { .. } => "chain_revert_error",
            Self::ConfirmationTimeout { .. } => "confirmation_timeout",
            Self::StaleQuote { .. } => "stale_quote",
            Self::InvalidQuote(_) => "invalid_quote",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Decode { .. } => "decode_error",
        }
    }

    /// True when a revert was caused by a missing or too small ERC-20 allowance.
    pub fn is_allowance_insufficient(&self) -> bool {
        match self {
            Self::ChainRevert { reason, .. } => {
                let r = reason.to_ascii_lowercase();
                r.contains("allowance") || r.contains("safeerc20: low-level call failed")
            }
            Self::ChainCall(_)
            | Self::ConfirmationTimeout { .. }
            | Self::StaleQuote { .. }
            | Self::InvalidQuote(_)
            | Self::InvalidRequest(_)
            | Self::Decode { .. } => false,
        }
    }

    /// Map an RPC/provider error message onto the taxonomy.
    ///
    /// Node implementations only agree on message text, so this is string matching.
    pub fn classify_rpc(err: &eyre::Report) -> Self {
        let full = format!("{err:#}");
        let s = full.to_ascii_lowercase();
        if s.contains("insufficient funds")
            || s.contains("nonce too low")
            || s.contains("nonce too high")
            || s.contains("replacement transaction underpriced")
            || s.contains("intrinsic gas too low")
            || s.contains("already known")
        {
            return Self::ChainCall(full);
        }
        if let Some(idx) = s.find("execution reverted") {
            let rest = full
                .get(idx + "execution reverted".len()..)
                .unwrap_or_default()
                .trim_start_matches([':', ' '])
                .split(", data:")
                .next()
                .unwrap_or_default()
                .trim();
            let reason = if rest.is_empty() { "no reason given" } else { rest };
            return Self::revert(reason);
        }
        if s.contains("revert") {
            return Self::revert(full);
        }
        Self::ChainCall(full)
    }
}

impl From<&PipelineError> for ErrorReport {
    fn from(e: &PipelineError) -> Self {
        let data = match e {
            PipelineError::ChainRevert { tx: Some(tx), .. } => {
                serde_json::json!({ "tx": format!("{tx:#x}") })
            }
            PipelineError::ConfirmationTimeout { tx, depth, .. } => {
                serde_json::json!({ "tx": format!("{tx:#x}"), "depth": depth })
            }
            PipelineError::StaleQuote { updated_at, .. } => {
                serde_json::json!({ "updated_at": updated_at })
            }
            PipelineError::ChainRevert { tx: None, .. }
            | PipelineError::ChainCall(_)
            | PipelineError::InvalidQuote(_)
            | PipelineError::InvalidRequest(_)
            | PipelineError::Decode { .. } => Value::Null,
        };
        Self {
            code: e.code(),
            message: e.to_string(),
            data,
        }
    }
}
