//! Pipeline step definitions

use crate::endpoint::EndpointIdentity;

use ethers::abi::Token;
use ethers::types::U256;
use std::collections::HashMap;
use std::fmt;

/// Where a call argument comes from
#[derive(Debug, Clone)]
pub enum ArgSource {
    /// A fixed configuration value
    Literal(Token),
    /// An event argument extracted from a prior step's confirmation receipt
    Event {
        step: String,
        event: String,
        argument: String,
    },
    /// A positional return value from a prior read-only step
    Returned { step: String, index: usize },
    /// The address of a resolved endpoint
    Endpoint { endpoint: String },
    /// The signing account address
    Caller,
}

/// What a step does against its endpoint
#[derive(Debug, Clone)]
pub enum StepAction {
    /// Bind the endpoint (deploys if its identity is a deployment)
    Resolve,
    /// Read-only call against current confirmed state
    Invoke {
        method: String,
        args: Vec<ArgSource>,
    },
    /// State-changing call, confirmed before the next step runs
    Submit {
        method: String,
        args: Vec<ArgSource>,
        gas_limit: Option<U256>,
        value: Option<U256>,
    },
}

impl StepAction {
    pub fn describes(&self) -> String {
        match self {
            StepAction::Resolve => "resolve".to_string(),
            StepAction::Invoke { method, args } => format!("invoke {}({} args)", method, args.len()),
            StepAction::Submit { method, args, .. } => {
                format!("submit {}({} args)", method, args.len())
            }
        }
    }
}

/// One remote operation in a pipeline
#[derive(Debug, Clone)]
pub struct Step {
    /// Unique label; derived values are addressed by it
    pub label: String,
    /// Key into the pipeline's endpoint table
    pub endpoint: String,
    pub action: StepAction,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} on {}", self.label, self.action.describes(), self.endpoint)
    }
}

/// An ordered pipeline of steps against named endpoints
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub endpoints: HashMap<String, EndpointIdentity>,
    pub steps: Vec<Step>,
}

impl Pipeline {
    /// Check step labels are unique and every reference points at something
    /// that exists earlier in the declared order.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen: Vec<&str> = Vec::new();

        for step in &self.steps {
            if seen.contains(&step.label.as_str()) {
                return Err(format!("Duplicate step label: {}", step.label));
            }
            if !self.endpoints.contains_key(&step.endpoint) {
                return Err(format!(
                    "Step {} references unknown endpoint {}",
                    step.label, step.endpoint
                ));
            }

            let args = match &step.action {
                StepAction::Resolve => &[][..],
                StepAction::Invoke { args, .. } => args.as_slice(),
                StepAction::Submit { args, .. } => args.as_slice(),
            };

            for arg in args {
                match arg {
                    ArgSource::Event { step: from, .. } | ArgSource::Returned { step: from, .. } => {
                        if !seen.contains(&from.as_str()) {
                            return Err(format!(
                                "Step {} consumes {} before it has run",
                                step.label, from
                            ));
                        }
                    }
                    ArgSource::Endpoint { endpoint } => {
                        if !self.endpoints.contains_key(endpoint) {
                            return Err(format!(
                                "Step {} references unknown endpoint {}",
                                step.label, endpoint
                            ));
                        }
                    }
                    ArgSource::Literal(_) | ArgSource::Caller => {}
                }
            }

            seen.push(&step.label);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attach(name: &str) -> EndpointIdentity {
        EndpointIdentity::Attach {
            name: name.to_string(),
            address: ethers::types::Address::zero(),
            abi: vec![],
        }
    }

    #[test]
    fn test_validate_rejects_forward_reference() {
        let pipeline = Pipeline {
            endpoints: HashMap::from([("a".to_string(), attach("a"))]),
            steps: vec![Step {
                label: "first".to_string(),
                endpoint: "a".to_string(),
                action: StepAction::Invoke {
                    method: "f".to_string(),
                    args: vec![ArgSource::Returned {
                        step: "later".to_string(),
                        index: 0,
                    }],
                },
            }],
        };

        assert!(pipeline.validate().unwrap_err().contains("before it has run"));
    }

    #[test]
    fn test_validate_rejects_duplicate_labels() {
        let step = Step {
            label: "dup".to_string(),
            endpoint: "a".to_string(),
            action: StepAction::Resolve,
        };
        let pipeline = Pipeline {
            endpoints: HashMap::from([("a".to_string(), attach("a"))]),
            steps: vec![step.clone(), step],
        };

        assert!(pipeline.validate().unwrap_err().contains("Duplicate"));
    }
}
