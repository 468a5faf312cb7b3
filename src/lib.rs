//! txflow - sequential contract-call pipeline orchestrator for EVM networks
//!
//! Executes an ordered pipeline of remote operations against deployed
//! contracts: deploy or attach to endpoints, invoke read-only methods, submit
//! state-changing transactions, wait for each to confirm, and thread values
//! extracted from confirmation receipts into later calls. The first failure
//! aborts the remaining steps and is reported with the originating step's
//! identity and a typed underlying error.

pub mod call;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod pipeline;
pub mod receipt;

pub use call::{CallDescriptor, LiteralValue};
pub use config::{OrchestratorConfig, Settings};
pub use endpoint::{Endpoint, EndpointIdentity, EndpointRef, EndpointResolver};
pub use error::{OrchestratorError, OrchestratorResult};
pub use pipeline::{Pipeline, PipelineManifest, PipelineReport, PipelineRunner, StepFailure};
pub use receipt::{ConfirmationReceipt, EmittedEvent, TxHandle};
