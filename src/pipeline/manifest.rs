//! TOML pipeline manifests
//!
//! A manifest is the declarative form of a deploy-and-exercise script:
//! endpoint identities plus an ordered step list. Literals carry explicit
//! ABI types so arguments never rely on guessed encodings.

use super::step::{ArgSource, Pipeline, Step, StepAction};
use crate::call::LiteralValue;
use crate::endpoint::EndpointIdentity;
use crate::error::{OrchestratorError, OrchestratorResult};

use ethers::types::{Address, U256};
use ethers::utils::parse_ether;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Top-level manifest file
#[derive(Debug, Deserialize)]
pub struct PipelineManifest {
    pub endpoints: HashMap<String, EndpointSpec>,
    pub steps: Vec<StepSpec>,
}

/// Endpoint declaration: exactly one of `deploy` or `attach`
#[derive(Debug, Deserialize)]
pub struct EndpointSpec {
    /// Path to a compiled artifact (abi + bytecode) to deploy
    pub deploy: Option<PathBuf>,
    /// Known address to bind to
    pub attach: Option<String>,
    /// Human-readable ABI fragments for attached endpoints
    #[serde(default)]
    pub abi: Vec<String>,
    /// Constructor arguments for deployments
    #[serde(default)]
    pub constructor_args: Vec<LiteralValue>,
}

#[derive(Debug, Deserialize)]
pub struct StepSpec {
    pub label: String,
    pub endpoint: String,
    pub action: ActionKind,
    pub method: Option<String>,
    #[serde(default)]
    pub args: Vec<ArgSpec>,
    pub gas_limit: Option<u64>,
    /// Ether amount attached to a submit, e.g. "0.01"
    pub value: Option<String>,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Resolve,
    Invoke,
    Submit,
}

/// One call argument as written in the manifest
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ArgSpec {
    Literal {
        literal: LiteralValue,
    },
    Event {
        step: String,
        event: String,
        argument: String,
    },
    Returned {
        step: String,
        index: usize,
    },
    Endpoint {
        endpoint: String,
    },
    Caller {
        caller: bool,
    },
}

impl PipelineManifest {
    /// Load a manifest from a TOML file
    pub fn load(path: &Path) -> OrchestratorResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::Config(format!("Failed to read manifest {:?}: {}", path, e))
        })?;
        toml::from_str(&raw).map_err(|e| {
            OrchestratorError::Config(format!("Invalid manifest {:?}: {}", path, e))
        })
    }

    /// Convert into an executable pipeline, validating references
    pub fn into_pipeline(self) -> OrchestratorResult<Pipeline> {
        let mut endpoints = HashMap::new();
        for (name, spec) in self.endpoints {
            endpoints.insert(name.clone(), spec.into_identity(&name)?);
        }

        let mut steps = Vec::with_capacity(self.steps.len());
        for spec in self.steps {
            steps.push(spec.into_step()?);
        }

        let pipeline = Pipeline { endpoints, steps };
        pipeline.validate().map_err(OrchestratorError::Config)?;
        Ok(pipeline)
    }
}

impl EndpointSpec {
    fn into_identity(self, name: &str) -> OrchestratorResult<EndpointIdentity> {
        match (self.deploy, self.attach) {
            (Some(artifact), None) => {
                let constructor_args = self
                    .constructor_args
                    .into_iter()
                    .map(LiteralValue::into_token)
                    .collect::<OrchestratorResult<Vec<_>>>()?;
                Ok(EndpointIdentity::Deploy {
                    name: name.to_string(),
                    artifact,
                    constructor_args,
                })
            }
            (None, Some(address)) => {
                let address = Address::from_str(address.trim()).map_err(|e| {
                    OrchestratorError::Config(format!(
                        "Endpoint {} has invalid address: {}",
                        name, e
                    ))
                })?;
                Ok(EndpointIdentity::Attach {
                    name: name.to_string(),
                    address,
                    abi: self.abi,
                })
            }
            _ => Err(OrchestratorError::Config(format!(
                "Endpoint {} must declare exactly one of deploy or attach",
                name
            ))),
        }
    }
}

impl StepSpec {
    fn into_step(self) -> OrchestratorResult<Step> {
        let args = self
            .args
            .into_iter()
            .map(ArgSpec::into_source)
            .collect::<OrchestratorResult<Vec<_>>>()?;

        let method = |m: Option<String>, label: &str| {
            m.ok_or_else(|| {
                OrchestratorError::Config(format!("Step {} is missing a method", label))
            })
        };

        let action = match self.action {
            ActionKind::Resolve => StepAction::Resolve,
            ActionKind::Invoke => StepAction::Invoke {
                method: method(self.method, &self.label)?,
                args,
            },
            ActionKind::Submit => StepAction::Submit {
                method: method(self.method, &self.label)?,
                args,
                gas_limit: self.gas_limit.map(U256::from),
                value: self
                    .value
                    .map(|v| {
                        parse_ether(&v).map_err(|e| {
                            OrchestratorError::Config(format!(
                                "Step {} has invalid value {}: {}",
                                self.label, v, e
                            ))
                        })
                    })
                    .transpose()?,
            },
        };

        Ok(Step {
            label: self.label,
            endpoint: self.endpoint,
            action,
        })
    }
}

impl ArgSpec {
    fn into_source(self) -> OrchestratorResult<ArgSource> {
        Ok(match self {
            ArgSpec::Literal { literal } => ArgSource::Literal(literal.into_token()?),
            ArgSpec::Event {
                step,
                event,
                argument,
            } => ArgSource::Event {
                step,
                event,
                argument,
            },
            ArgSpec::Returned { step, index } => ArgSource::Returned { step, index },
            ArgSpec::Endpoint { endpoint } => ArgSource::Endpoint { endpoint },
            ArgSpec::Caller { .. } => ArgSource::Caller,
        })
    }
}
