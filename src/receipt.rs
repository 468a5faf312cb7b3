//! Transaction handles, confirmation receipts, and derived-value extraction

use crate::error::{OrchestratorError, OrchestratorResult};

use ethers::abi::Token;
use ethers::types::H256;
use std::collections::BTreeMap;
use std::fmt;

/// An in-flight state-changing operation, returned immediately on submission
#[derive(Debug, Clone)]
pub struct TxHandle {
    pub tx_hash: H256,
    /// Method label for diagnostics
    pub method: String,
}

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.method, self.tx_hash)
    }
}

/// A decoded event from a confirmation receipt
#[derive(Debug, Clone)]
pub struct EmittedEvent {
    pub name: String,
    pub args: BTreeMap<String, Token>,
}

/// Confirmed result of a state-changing operation. Immutable once obtained.
#[derive(Debug, Clone)]
pub struct ConfirmationReceipt {
    pub tx_hash: H256,
    pub block_number: u64,
    /// Events in emission order
    pub events: Vec<EmittedEvent>,
}

impl ConfirmationReceipt {
    /// Extract a named argument from the first event with the given name.
    ///
    /// A missing event (or a missing argument within a matching event) is a
    /// reported error the caller can branch on, never a silent default.
    pub fn extract(&self, event: &str, argument: &str) -> OrchestratorResult<Token> {
        self.events
            .iter()
            .find(|e| e.name == event)
            .and_then(|e| e.args.get(argument).cloned())
            .ok_or_else(|| OrchestratorError::EventNotFound {
                event: event.to_string(),
                argument: argument.to_string(),
            })
    }

    /// Names of all emitted events, for diagnostics
    pub fn event_names(&self) -> Vec<&str> {
        self.events.iter().map(|e| e.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U256;

    fn transfer_receipt() -> ConfirmationReceipt {
        let mut args = BTreeMap::new();
        args.insert("tokenId".to_string(), Token::Uint(U256::from(7u64)));
        ConfirmationReceipt {
            tx_hash: H256::zero(),
            block_number: 42,
            events: vec![EmittedEvent {
                name: "Transfer".to_string(),
                args,
            }],
        }
    }

    #[test]
    fn test_extract_event_argument() {
        let receipt = transfer_receipt();
        let token = receipt.extract("Transfer", "tokenId").unwrap();
        assert_eq!(token, Token::Uint(U256::from(7u64)));
    }

    #[test]
    fn test_extract_missing_event_is_reported() {
        let receipt = transfer_receipt();
        let err = receipt.extract("Approval", "owner").unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::EventNotFound { ref event, .. } if event == "Approval"
        ));
    }

    #[test]
    fn test_extract_missing_argument_is_reported() {
        let receipt = transfer_receipt();
        let err = receipt.extract("Transfer", "from").unwrap_err();
        assert_eq!(err.kind(), "event_not_found");
    }
}
