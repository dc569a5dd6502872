//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SaveFiError {
    /// A remote service (RPC node, indexing API, completion API) could not be
    /// reached or answered with a non-success status.
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The wallet provider refused to sign.
    #[error("Wallet rejected the request: {0}")]
    WalletRejection(String),

    /// The transaction was mined (or simulated) and failed.
    #[error("Contract reverted{}: {message}", tx_suffix(.tx))]
    ContractRevert {
        tx: Option<String>,
        message: String,
    },

    /// The completion service answered with text we could not turn into a plan.
    #[error("Could not extract a plan: {reason}")]
    Extraction { reason: String, raw: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Another action is already in flight")]
    Busy,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SaveFiError {
    /// Stable identifier used by the HTTP API and in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) | Self::Http(_) => "network_error",
            Self::WalletRejection(_) => "wallet_rejection",
            Self::ContractRevert { .. } => "contract_revert",
            Self::Extraction { .. } => "extraction_error",
            Self::Validation(_) => "validation_error",
            Self::MalformedResponse(_) | Self::Json(_) => "malformed_response",
            Self::Busy => "busy",
            Self::Config(_) => "config_error",
        }
    }

    /// Raw completion text attached to an extraction failure.
    pub fn raw_text(&self) -> Option<&str> {
        match self {
            Self::Extraction { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

fn tx_suffix(tx: &Option<String>) -> String {
    tx.as_deref().map(|t| format!(" ({t})")).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, SaveFiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revert_message_includes_tx_when_known() {
        let err = SaveFiError::ContractRevert {
            tx: Some("0xabc".to_string()),
            message: "status 0x0".to_string(),
        };
        assert_eq!(err.to_string(), "Contract reverted (0xabc): status 0x0");

        let err = SaveFiError::ContractRevert {
            tx: None,
            message: "execution reverted".to_string(),
        };
        assert_eq!(err.to_string(), "Contract reverted: execution reverted");
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(SaveFiError::Busy.kind(), "busy");
        assert_eq!(SaveFiError::Network("down".into()).kind(), "network_error");
        let err = SaveFiError::Extraction {
            reason: "no json".into(),
            raw: "hello".into(),
        };
        assert_eq!(err.kind(), "extraction_error");
        assert_eq!(err.raw_text(), Some("hello"));
    }
}
