//! Ordered pipelines of remote operations
//!
//! A pipeline is the generalized form of a deploy-then-exercise script:
//! 1. Declares the endpoints it talks to (deploy or attach)
//! 2. Lists steps in execution order
//! 3. Threads derived values (event arguments, return values, addresses)
//!    from confirmed steps into later call descriptors

pub mod manifest;
pub mod runner;
pub mod step;

pub use manifest::PipelineManifest;
pub use runner::{PipelineReport, PipelineRunner, StepFailure, StepOutcome};
pub use step::{ArgSource, Pipeline, Step, StepAction};
