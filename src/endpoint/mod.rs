//! Endpoint abstraction - deployed remote contract instances
//!
//! An endpoint is addressed over the network and exposes named methods with
//! typed positional arguments. State-changing methods emit named events on
//! confirmation. The orchestrator depends only on this call/event contract.

pub mod eth;
pub mod gas;

pub use eth::{EthEndpoint, EthResolver, NetworkClient};
pub use gas::{GasPrice, GasQuoter};

use crate::call::CallDescriptor;
use crate::error::OrchestratorResult;
use crate::receipt::{ConfirmationReceipt, TxHandle};

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::Address;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// A bound endpoint reference. Immutable once obtained.
#[derive(Debug, Clone)]
pub struct EndpointRef {
    pub name: String,
    pub address: Address,
}

impl fmt::Display for EndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {:?}", self.name, self.address)
    }
}

/// How an endpoint is obtained
#[derive(Debug, Clone)]
pub enum EndpointIdentity {
    /// Deploy a new instance from a compiled artifact and wait for confirmation
    Deploy {
        name: String,
        artifact: PathBuf,
        constructor_args: Vec<Token>,
    },
    /// Bind to a known address without confirmation
    Attach {
        name: String,
        address: Address,
        /// Human-readable ABI fragments for the methods and events used
        abi: Vec<String>,
    },
}

impl EndpointIdentity {
    pub fn name(&self) -> &str {
        match self {
            EndpointIdentity::Deploy { name, .. } => name,
            EndpointIdentity::Attach { name, .. } => name,
        }
    }
}

/// A deployed remote contract instance
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// The bound reference for this endpoint
    fn reference(&self) -> &EndpointRef;

    /// Execute a read-only call against current confirmed state
    async fn invoke(&self, call: &CallDescriptor) -> OrchestratorResult<Vec<Token>>;

    /// Submit a state-changing call. Returns as soon as the transaction is
    /// accepted for inclusion; confirmation is awaited separately.
    async fn submit(&self, call: &CallDescriptor) -> OrchestratorResult<TxHandle>;

    /// Wait for a submitted transaction to reach a terminal state. Polls
    /// without an upper bound; the pipeline runner applies the timeout.
    async fn confirmation(&self, handle: &TxHandle) -> OrchestratorResult<ConfirmationReceipt>;
}

/// Resolves endpoint identities into live endpoints
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    /// Deploy or attach per the identity. Deployment waits for the deploy
    /// transaction to confirm; the runner bounds the wait and reports
    /// `EndpointUnavailable` on timeout.
    async fn resolve(&self, identity: &EndpointIdentity)
        -> OrchestratorResult<Arc<dyn Endpoint>>;
}
