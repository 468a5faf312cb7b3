//! Error types for the txflow orchestrator

use thiserror::Error;

/// Main error type for pipeline execution
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Network error on {network}: {message}")]
    Network { network: String, message: String },

    #[error("Endpoint {endpoint} unavailable: {reason}")]
    EndpointUnavailable { endpoint: String, reason: String },

    #[error("Call {method} reverted: {reason}")]
    CallReverted { method: String, reason: String },

    #[error("Submission of {method} rejected: {reason}")]
    SubmissionRejected { method: String, reason: String },

    #[error("Transaction {tx_hash} reverted: {reason}")]
    TransactionReverted { tx_hash: String, reason: String },

    #[error("No confirmation for {tx_hash} within {waited_ms}ms")]
    ConfirmationTimeout { tx_hash: String, waited_ms: u64 },

    #[error("Event {event} (argument {argument}) not found in receipt")]
    EventNotFound { event: String, argument: String },

    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl OrchestratorError {
    /// Stable name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::Config(_) => "config",
            OrchestratorError::Wallet(_) => "wallet",
            OrchestratorError::Network { .. } => "network",
            OrchestratorError::EndpointUnavailable { .. } => "endpoint_unavailable",
            OrchestratorError::CallReverted { .. } => "call_reverted",
            OrchestratorError::SubmissionRejected { .. } => "submission_rejected",
            OrchestratorError::TransactionReverted { .. } => "transaction_reverted",
            OrchestratorError::ConfirmationTimeout { .. } => "confirmation_timeout",
            OrchestratorError::EventNotFound { .. } => "event_not_found",
            OrchestratorError::Pipeline(_) => "pipeline",
        }
    }

    /// Errors that originate in the remote contract rather than in local wiring
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            OrchestratorError::CallReverted { .. }
                | OrchestratorError::TransactionReverted { .. }
                | OrchestratorError::ConfirmationTimeout { .. }
                | OrchestratorError::EndpointUnavailable { .. }
        )
    }
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
