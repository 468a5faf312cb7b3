//! Pipeline execution against scripted in-memory endpoints

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Address, H256, U256};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use txflow::call::CallDescriptor;
use txflow::config::OrchestratorConfig;
use txflow::endpoint::{Endpoint, EndpointIdentity, EndpointRef, EndpointResolver};
use txflow::error::{OrchestratorError, OrchestratorResult};
use txflow::pipeline::{ArgSource, Pipeline, PipelineRunner, Step, StepAction, StepOutcome};
use txflow::receipt::{ConfirmationReceipt, EmittedEvent, TxHandle};

/// Scripted outcome of a submitted method
enum Confirmation {
    Events(Vec<EmittedEvent>),
    Revert(String),
    Never,
}

/// In-memory endpoint that records every call in a shared journal
struct ScriptedEndpoint {
    reference: EndpointRef,
    journal: Arc<Mutex<Vec<String>>>,
    returns: HashMap<String, Vec<Token>>,
    confirmations: HashMap<String, Confirmation>,
}

impl ScriptedEndpoint {
    fn new(name: &str, address: Address, journal: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            reference: EndpointRef {
                name: name.to_string(),
                address,
            },
            journal,
            returns: HashMap::new(),
            confirmations: HashMap::new(),
        }
    }

    fn with_return(mut self, method: &str, values: Vec<Token>) -> Self {
        self.returns.insert(method.to_string(), values);
        self
    }

    fn with_confirmation(mut self, method: &str, confirmation: Confirmation) -> Self {
        self.confirmations.insert(method.to_string(), confirmation);
        self
    }

    fn record(&self, kind: &str, method: &str, args: &[Token]) {
        self.journal.lock().unwrap().push(format!(
            "{} {}.{} {:?}",
            kind, self.reference.name, method, args
        ));
    }
}

#[async_trait]
impl Endpoint for ScriptedEndpoint {
    fn reference(&self) -> &EndpointRef {
        &self.reference
    }

    async fn invoke(&self, call: &CallDescriptor) -> OrchestratorResult<Vec<Token>> {
        self.record("invoke", &call.method, &call.args);
        self.returns
            .get(&call.method)
            .cloned()
            .ok_or_else(|| OrchestratorError::CallReverted {
                method: call.method.clone(),
                reason: "unscripted method".to_string(),
            })
    }

    async fn submit(&self, call: &CallDescriptor) -> OrchestratorResult<TxHandle> {
        self.record("submit", &call.method, &call.args);
        if !self.confirmations.contains_key(&call.method) {
            return Err(OrchestratorError::SubmissionRejected {
                method: call.method.clone(),
                reason: "unscripted method".to_string(),
            });
        }
        Ok(TxHandle {
            tx_hash: H256::random(),
            method: call.method.clone(),
        })
    }

    async fn confirmation(&self, handle: &TxHandle) -> OrchestratorResult<ConfirmationReceipt> {
        match self.confirmations.get(&handle.method) {
            Some(Confirmation::Events(events)) => Ok(ConfirmationReceipt {
                tx_hash: handle.tx_hash,
                block_number: 1,
                events: events.clone(),
            }),
            Some(Confirmation::Revert(reason)) => Err(OrchestratorError::TransactionReverted {
                tx_hash: format!("{:?}", handle.tx_hash),
                reason: reason.clone(),
            }),
            Some(Confirmation::Never) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            None => Err(OrchestratorError::TransactionReverted {
                tx_hash: format!("{:?}", handle.tx_hash),
                reason: "unscripted method".to_string(),
            }),
        }
    }
}

/// Resolver serving pre-built scripted endpoints by identity name
struct ScriptedResolver {
    endpoints: Mutex<HashMap<String, Arc<ScriptedEndpoint>>>,
    stalled: Mutex<Vec<String>>,
    journal: Arc<Mutex<Vec<String>>>,
}

impl ScriptedResolver {
    fn new(journal: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            endpoints: Mutex::new(HashMap::new()),
            stalled: Mutex::new(Vec::new()),
            journal,
        }
    }

    fn with_endpoint(self, endpoint: ScriptedEndpoint) -> Self {
        let name = endpoint.reference.name.clone();
        self.endpoints
            .lock()
            .unwrap()
            .insert(name, Arc::new(endpoint));
        self
    }

    /// Deployment confirmation for this endpoint never arrives
    fn with_stalled(self, name: &str) -> Self {
        self.stalled.lock().unwrap().push(name.to_string());
        self
    }
}

#[async_trait]
impl EndpointResolver for ScriptedResolver {
    async fn resolve(
        &self,
        identity: &EndpointIdentity,
    ) -> OrchestratorResult<Arc<dyn Endpoint>> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("resolve {}", identity.name()));
        if self.stalled.lock().unwrap().iter().any(|n| n == identity.name()) {
            std::future::pending::<()>().await;
            unreachable!()
        }
        self.endpoints
            .lock()
            .unwrap()
            .get(identity.name())
            .cloned()
            .map(|e| e as Arc<dyn Endpoint>)
            .ok_or_else(|| OrchestratorError::EndpointUnavailable {
                endpoint: identity.name().to_string(),
                reason: "unscripted endpoint".to_string(),
            })
    }
}

fn attach(name: &str) -> (String, EndpointIdentity) {
    (
        name.to_string(),
        EndpointIdentity::Attach {
            name: name.to_string(),
            address: Address::random(),
            abi: vec![],
        },
    )
}

fn deploy(name: &str) -> (String, EndpointIdentity) {
    (
        name.to_string(),
        EndpointIdentity::Deploy {
            name: name.to_string(),
            artifact: PathBuf::from("unused.json"),
            constructor_args: vec![],
        },
    )
}

fn submit_step(label: &str, endpoint: &str, method: &str, args: Vec<ArgSource>) -> Step {
    Step {
        label: label.to_string(),
        endpoint: endpoint.to_string(),
        action: StepAction::Submit {
            method: method.to_string(),
            args,
            gas_limit: None,
            value: None,
        },
    }
}

fn invoke_step(label: &str, endpoint: &str, method: &str, args: Vec<ArgSource>) -> Step {
    Step {
        label: label.to_string(),
        endpoint: endpoint.to_string(),
        action: StepAction::Invoke {
            method: method.to_string(),
            args,
        },
    }
}

fn resolve_step(label: &str, endpoint: &str) -> Step {
    Step {
        label: label.to_string(),
        endpoint: endpoint.to_string(),
        action: StepAction::Resolve,
    }
}

fn transfer_event(token_id: u64) -> EmittedEvent {
    let mut args = BTreeMap::new();
    args.insert("tokenId".to_string(), Token::Uint(U256::from(token_id)));
    EmittedEvent {
        name: "Transfer".to_string(),
        args,
    }
}

fn runner(resolver: ScriptedResolver, config: OrchestratorConfig) -> PipelineRunner {
    PipelineRunner::new(Arc::new(resolver), Address::random(), config)
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        confirmation_timeout_ms: 5_000,
        poll_interval_ms: 10,
        ..OrchestratorConfig::default()
    }
}

#[tokio::test]
async fn failing_step_issues_no_further_calls() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let resolver = ScriptedResolver::new(journal.clone()).with_endpoint(
        ScriptedEndpoint::new("solution", Address::random(), journal.clone())
            .with_confirmation("declareDeadAnimal", Confirmation::Revert("not authorized".into()))
            .with_return("balanceOf", vec![Token::Uint(U256::one())]),
    );

    let pipeline = Pipeline {
        endpoints: HashMap::from([attach("solution")]),
        steps: vec![
            submit_step("kill", "solution", "declareDeadAnimal", vec![]),
            invoke_step("check", "solution", "balanceOf", vec![ArgSource::Caller]),
        ],
    };

    let failure = runner(resolver, fast_config())
        .run(pipeline)
        .await
        .unwrap_err();

    assert_eq!(failure.step, "kill");
    match &failure.source {
        OrchestratorError::TransactionReverted { reason, .. } => {
            assert_eq!(reason, "not authorized")
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let journal = journal.lock().unwrap();
    let calls: Vec<_> = journal
        .iter()
        .filter(|c| !c.starts_with("resolve"))
        .collect();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].starts_with("submit solution.declareDeadAnimal"));
}

#[tokio::test]
async fn event_argument_threads_into_dependent_call() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let resolver = ScriptedResolver::new(journal.clone()).with_endpoint(
        ScriptedEndpoint::new("solution", Address::random(), journal.clone())
            .with_confirmation("declareAnimal", Confirmation::Events(vec![transfer_event(7)]))
            .with_confirmation("transferFrom", Confirmation::Events(vec![])),
    );

    let pipeline = Pipeline {
        endpoints: HashMap::from([attach("solution")]),
        steps: vec![
            submit_step("declare", "solution", "declareAnimal", vec![]),
            submit_step(
                "transfer",
                "solution",
                "transferFrom",
                vec![
                    ArgSource::Caller,
                    ArgSource::Event {
                        step: "declare".to_string(),
                        event: "Transfer".to_string(),
                        argument: "tokenId".to_string(),
                    },
                ],
            ),
        ],
    };

    let report = runner(resolver, fast_config()).run(pipeline).await.unwrap();

    match report.outcome("declare").unwrap() {
        StepOutcome::Confirmed(receipt) => {
            assert_eq!(
                receipt.extract("Transfer", "tokenId").unwrap(),
                Token::Uint(U256::from(7u64))
            );
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let calls = journal.lock().unwrap();
    let transfer_call = calls
        .iter()
        .find(|c| c.contains("transferFrom"))
        .expect("transferFrom was issued");
    assert!(transfer_call.contains('7'), "derived token id missing: {}", transfer_call);
}

#[tokio::test]
async fn missing_event_aborts_pipeline() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let resolver = ScriptedResolver::new(journal.clone()).with_endpoint(
        ScriptedEndpoint::new("solution", Address::random(), journal.clone())
            .with_confirmation("declareAnimal", Confirmation::Events(vec![]))
            .with_confirmation("transferFrom", Confirmation::Events(vec![])),
    );

    let pipeline = Pipeline {
        endpoints: HashMap::from([attach("solution")]),
        steps: vec![
            submit_step("declare", "solution", "declareAnimal", vec![]),
            submit_step(
                "transfer",
                "solution",
                "transferFrom",
                vec![ArgSource::Event {
                    step: "declare".to_string(),
                    event: "Transfer".to_string(),
                    argument: "tokenId".to_string(),
                }],
            ),
        ],
    };

    let failure = runner(resolver, fast_config())
        .run(pipeline)
        .await
        .unwrap_err();

    assert_eq!(failure.step, "transfer");
    assert!(matches!(
        failure.source,
        OrchestratorError::EventNotFound { ref event, .. } if event == "Transfer"
    ));

    // The dependent submit was never issued
    let calls = journal.lock().unwrap();
    assert!(calls.iter().all(|c| !c.contains("transferFrom")));
}

#[tokio::test]
async fn deployed_address_is_usable_in_next_step() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let solution_address = Address::random();
    let resolver = ScriptedResolver::new(journal.clone())
        .with_endpoint(
            ScriptedEndpoint::new("solution", solution_address, journal.clone())
                .with_return("ownerOf", vec![Token::Address(Address::random())]),
        )
        .with_endpoint(
            ScriptedEndpoint::new("evaluator", Address::random(), journal.clone())
                .with_confirmation("submitExercice", Confirmation::Events(vec![])),
        );

    let pipeline = Pipeline {
        endpoints: HashMap::from([deploy("solution"), attach("evaluator")]),
        steps: vec![
            resolve_step("deploy_solution", "solution"),
            invoke_step(
                "owner",
                "solution",
                "ownerOf",
                vec![ArgSource::Literal(Token::Uint(U256::one()))],
            ),
            submit_step(
                "submit_exercise",
                "evaluator",
                "submitExercice",
                vec![ArgSource::Endpoint {
                    endpoint: "solution".to_string(),
                }],
            ),
        ],
    };

    let report = runner(resolver, fast_config()).run(pipeline).await.unwrap();

    match report.outcome("deploy_solution").unwrap() {
        StepOutcome::Resolved(reference) => assert_eq!(reference.address, solution_address),
        other => panic!("unexpected outcome: {:?}", other),
    }

    let calls = journal.lock().unwrap();
    let submit_call = calls
        .iter()
        .find(|c| c.contains("submitExercice"))
        .expect("submitExercice was issued");
    assert!(
        submit_call.contains(&format!("{:?}", solution_address)),
        "deployed address missing: {}",
        submit_call
    );
}

#[tokio::test(start_paused = true)]
async fn confirmation_timeout_is_bounded() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let resolver = ScriptedResolver::new(journal.clone()).with_endpoint(
        ScriptedEndpoint::new("solution", Address::random(), journal.clone())
            .with_confirmation("stall", Confirmation::Never),
    );

    let pipeline = Pipeline {
        endpoints: HashMap::from([attach("solution")]),
        steps: vec![submit_step("stall", "solution", "stall", vec![])],
    };

    let timeout = Duration::from_secs(5);
    let config = OrchestratorConfig {
        confirmation_timeout_ms: timeout.as_millis() as u64,
        ..OrchestratorConfig::default()
    };

    let started = tokio::time::Instant::now();
    let failure = runner(resolver, config).run(pipeline).await.unwrap_err();
    let waited = started.elapsed();

    assert!(waited >= timeout, "timed out early: {:?}", waited);
    match failure.source {
        OrchestratorError::ConfirmationTimeout { waited_ms, .. } => {
            assert_eq!(waited_ms, 5_000)
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn read_only_invoke_is_idempotent() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let resolver = ScriptedResolver::new(journal.clone()).with_endpoint(
        ScriptedEndpoint::new("solution", Address::random(), journal.clone())
            .with_return("balanceOf", vec![Token::Uint(U256::from(3u64))]),
    );

    let pipeline = Pipeline {
        endpoints: HashMap::from([attach("solution")]),
        steps: vec![
            invoke_step("first", "solution", "balanceOf", vec![ArgSource::Caller]),
            invoke_step("second", "solution", "balanceOf", vec![ArgSource::Caller]),
        ],
    };

    let report = runner(resolver, fast_config()).run(pipeline).await.unwrap();

    let values = |label: &str| match report.outcome(label).unwrap() {
        StepOutcome::Returned(values) => values.clone(),
        other => panic!("unexpected outcome: {:?}", other),
    };
    assert_eq!(values("first"), values("second"));
    assert_eq!(values("first"), vec![Token::Uint(U256::from(3u64))]);
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_deployment_reports_endpoint_unavailable() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let resolver = ScriptedResolver::new(journal.clone()).with_stalled("solution");

    let pipeline = Pipeline {
        endpoints: HashMap::from([deploy("solution")]),
        steps: vec![
            resolve_step("deploy_solution", "solution"),
            invoke_step("owner", "solution", "ownerOf", vec![]),
        ],
    };

    let failure = runner(resolver, fast_config())
        .run(pipeline)
        .await
        .unwrap_err();

    assert_eq!(failure.step, "deploy_solution");
    match &failure.source {
        OrchestratorError::EndpointUnavailable { endpoint, reason } => {
            assert_eq!(endpoint, "solution");
            assert!(reason.contains("5000ms"), "unexpected reason: {}", reason);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn failed_resolution_issues_no_further_calls() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let resolver = ScriptedResolver::new(journal.clone()).with_endpoint(
        ScriptedEndpoint::new("evaluator", Address::random(), journal.clone())
            .with_confirmation("submitExercice", Confirmation::Events(vec![])),
    );

    let pipeline = Pipeline {
        endpoints: HashMap::from([deploy("solution"), attach("evaluator")]),
        steps: vec![
            resolve_step("deploy_solution", "solution"),
            submit_step(
                "submit_exercise",
                "evaluator",
                "submitExercice",
                vec![ArgSource::Endpoint {
                    endpoint: "solution".to_string(),
                }],
            ),
        ],
    };

    let failure = runner(resolver, fast_config())
        .run(pipeline)
        .await
        .unwrap_err();

    assert_eq!(failure.step, "deploy_solution");
    assert!(matches!(
        failure.source,
        OrchestratorError::EndpointUnavailable { ref endpoint, .. } if endpoint == "solution"
    ));

    let calls = journal.lock().unwrap();
    assert!(calls.iter().all(|c| !c.contains("submitExercice")));
}
