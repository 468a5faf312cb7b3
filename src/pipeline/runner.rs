//! Pipeline execution
//!
//! Steps run strictly in declared order. A step is issued only once every
//! derived value it consumes has been extracted from a confirmed record;
//! the first failure aborts the remainder of the run.

use super::step::{ArgSource, Pipeline, Step, StepAction};
use crate::call::CallDescriptor;
use crate::config::OrchestratorConfig;
use crate::endpoint::{Endpoint, EndpointRef, EndpointResolver};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::receipt::ConfirmationReceipt;

use ethers::abi::Token;
use ethers::types::Address;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A pipeline failure with enough context to diagnose the originating step
#[derive(Error, Debug)]
#[error("Step '{step}' against {endpoint} failed: {source}")]
pub struct StepFailure {
    pub step: String,
    pub endpoint: String,
    /// Call summary, if the step got as far as building one
    pub call: Option<String>,
    #[source]
    pub source: OrchestratorError,
}

/// What one completed step produced
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Resolved(EndpointRef),
    Returned(Vec<Token>),
    Confirmed(ConfirmationReceipt),
}

/// Result of a full pipeline run
#[derive(Debug)]
pub struct PipelineReport {
    pub run_id: Uuid,
    /// Outcomes in step order
    pub outcomes: Vec<(String, StepOutcome)>,
}

impl PipelineReport {
    pub fn outcome(&self, label: &str) -> Option<&StepOutcome> {
        self.outcomes
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, o)| o)
    }
}

/// Executes one pipeline against one network. Consumed by the run.
pub struct PipelineRunner {
    resolver: Arc<dyn EndpointResolver>,
    caller: Address,
    config: OrchestratorConfig,
    endpoints: HashMap<String, Arc<dyn Endpoint>>,
    records: HashMap<String, StepOutcome>,
}

impl PipelineRunner {
    pub fn new(
        resolver: Arc<dyn EndpointResolver>,
        caller: Address,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            resolver,
            caller,
            config,
            endpoints: HashMap::new(),
            records: HashMap::new(),
        }
    }

    /// Run the pipeline to completion or first failure
    pub async fn run(mut self, pipeline: Pipeline) -> Result<PipelineReport, StepFailure> {
        let run_id = Uuid::new_v4();

        if let Err(message) = pipeline.validate() {
            return Err(StepFailure {
                step: "(validation)".to_string(),
                endpoint: String::new(),
                call: None,
                source: OrchestratorError::Pipeline(message),
            });
        }

        info!("Pipeline run {} started ({} steps)", run_id, pipeline.steps.len());

        let mut outcomes = Vec::with_capacity(pipeline.steps.len());
        for step in &pipeline.steps {
            info!("Executing {}", step);

            let outcome = self.execute(&pipeline, step).await.map_err(|failure| {
                error!(
                    "Pipeline run {} aborted at '{}' [{}]: {}",
                    run_id,
                    failure.step,
                    failure.source.kind(),
                    failure
                );
                failure
            })?;

            self.records.insert(step.label.clone(), outcome.clone());
            outcomes.push((step.label.clone(), outcome));
        }

        info!("Pipeline run {} completed", run_id);
        Ok(PipelineReport { run_id, outcomes })
    }

    async fn execute(&mut self, pipeline: &Pipeline, step: &Step) -> Result<StepOutcome, StepFailure> {
        let fail = |call: Option<String>, source: OrchestratorError| StepFailure {
            step: step.label.clone(),
            endpoint: step.endpoint.clone(),
            call,
            source,
        };

        match &step.action {
            StepAction::Resolve => {
                let endpoint = self
                    .ensure_endpoint(pipeline, &step.endpoint)
                    .await
                    .map_err(|e| fail(None, e))?;
                Ok(StepOutcome::Resolved(endpoint.reference().clone()))
            }

            StepAction::Invoke { method, args } => {
                let args = self
                    .materialize(pipeline, args)
                    .await
                    .map_err(|e| fail(None, e))?;
                let call = CallDescriptor::new(method.clone(), args);
                let summary = call.to_string();

                let endpoint = self
                    .ensure_endpoint(pipeline, &step.endpoint)
                    .await
                    .map_err(|e| fail(Some(summary.clone()), e))?;

                let returned = endpoint
                    .invoke(&call)
                    .await
                    .map_err(|e| fail(Some(summary), e))?;
                Ok(StepOutcome::Returned(returned))
            }

            StepAction::Submit {
                method,
                args,
                gas_limit,
                value,
            } => {
                let args = self
                    .materialize(pipeline, args)
                    .await
                    .map_err(|e| fail(None, e))?;
                let mut call = CallDescriptor::new(method.clone(), args);
                if let Some(gas_limit) = gas_limit {
                    call = call.with_gas_limit(*gas_limit);
                }
                if let Some(value) = value {
                    call = call.with_value(*value);
                }
                let summary = call.to_string();

                let endpoint = self
                    .ensure_endpoint(pipeline, &step.endpoint)
                    .await
                    .map_err(|e| fail(Some(summary.clone()), e))?;

                let handle = endpoint
                    .submit(&call)
                    .await
                    .map_err(|e| fail(Some(summary.clone()), e))?;

                let receipt = self
                    .await_confirmation(endpoint.as_ref(), &handle)
                    .await
                    .map_err(|e| fail(Some(summary), e))?;
                Ok(StepOutcome::Confirmed(receipt))
            }
        }
    }

    /// Suspend until the handle reaches a terminal state, bounded by the
    /// configured confirmation timeout.
    async fn await_confirmation(
        &self,
        endpoint: &dyn Endpoint,
        handle: &crate::receipt::TxHandle,
    ) -> OrchestratorResult<ConfirmationReceipt> {
        let bound = self.config.confirmation_timeout();
        match timeout(bound, endpoint.confirmation(handle)).await {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::ConfirmationTimeout {
                tx_hash: format!("{:?}", handle.tx_hash),
                waited_ms: bound.as_millis() as u64,
            }),
        }
    }

    /// Resolve an endpoint on first reference. Deployment confirmation is
    /// bounded by the same timeout as transaction confirmation.
    async fn ensure_endpoint(
        &mut self,
        pipeline: &Pipeline,
        key: &str,
    ) -> OrchestratorResult<Arc<dyn Endpoint>> {
        if let Some(endpoint) = self.endpoints.get(key) {
            return Ok(endpoint.clone());
        }

        let identity = pipeline
            .endpoints
            .get(key)
            .ok_or_else(|| OrchestratorError::Pipeline(format!("Unknown endpoint {}", key)))?;

        let bound = self.config.confirmation_timeout();
        let endpoint = match timeout(bound, self.resolver.resolve(identity)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(OrchestratorError::EndpointUnavailable {
                    endpoint: key.to_string(),
                    reason: format!("No deployment confirmation within {}ms", bound.as_millis()),
                })
            }
        };

        self.endpoints.insert(key.to_string(), endpoint.clone());
        Ok(endpoint)
    }

    /// Build concrete arguments from literals and confirmed step records
    async fn materialize(
        &mut self,
        pipeline: &Pipeline,
        sources: &[ArgSource],
    ) -> OrchestratorResult<Vec<Token>> {
        let mut tokens = Vec::with_capacity(sources.len());

        for source in sources {
            let token = match source {
                ArgSource::Literal(token) => token.clone(),

                ArgSource::Caller => Token::Address(self.caller),

                ArgSource::Endpoint { endpoint } => {
                    let endpoint = self.ensure_endpoint(pipeline, endpoint).await?;
                    Token::Address(endpoint.reference().address)
                }

                ArgSource::Event {
                    step,
                    event,
                    argument,
                } => match self.records.get(step) {
                    Some(StepOutcome::Confirmed(receipt)) => {
                        receipt.extract(event, argument).map_err(|e| {
                            warn!(
                                "Receipt of step {} carries events {:?}",
                                step,
                                receipt.event_names()
                            );
                            e
                        })?
                    }
                    Some(_) => {
                        return Err(OrchestratorError::Pipeline(format!(
                            "Step {} has no confirmation receipt to extract from",
                            step
                        )))
                    }
                    None => {
                        return Err(OrchestratorError::Pipeline(format!(
                            "Step {} has not run",
                            step
                        )))
                    }
                },

                ArgSource::Returned { step, index } => match self.records.get(step) {
                    Some(StepOutcome::Returned(values)) => {
                        values.get(*index).cloned().ok_or_else(|| {
                            OrchestratorError::Pipeline(format!(
                                "Step {} returned {} values, index {} out of range",
                                step,
                                values.len(),
                                index
                            ))
                        })?
                    }
                    Some(_) => {
                        return Err(OrchestratorError::Pipeline(format!(
                            "Step {} has no return values",
                            step
                        )))
                    }
                    None => {
                        return Err(OrchestratorError::Pipeline(format!(
                            "Step {} has not run",
                            step
                        )))
                    }
                },
            };

            tokens.push(token);
        }

        Ok(tokens)
    }
}
