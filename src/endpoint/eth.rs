//! EVM endpoint implementation over JSON-RPC
//!
//! One `NetworkClient` per pipeline run holds the provider, the signing
//! wallet, and the gas quoter. Endpoints share the client and carry their
//! own ABI for call encoding and event decoding.

use super::gas::{GasPrice, GasQuoter};
use super::{Endpoint, EndpointIdentity, EndpointRef, EndpointResolver};
use crate::call::CallDescriptor;
use crate::config::{NetworkConfig, OrchestratorConfig};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::receipt::{ConfirmationReceipt, EmittedEvent, TxHandle};

use async_trait::async_trait;
use ethers::abi::{Abi, RawLog, Token};
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection to one configured network: provider, signer, gas quoting
pub struct NetworkClient {
    name: String,
    chain_id: u64,
    provider: Provider<Http>,
    wallet: LocalWallet,
    quoter: GasQuoter,
    poll_interval: Duration,
}

impl NetworkClient {
    /// Connect to a network and verify its chain id matches the configuration
    pub async fn connect(
        name: &str,
        network: &NetworkConfig,
        orchestrator: &OrchestratorConfig,
    ) -> OrchestratorResult<Arc<Self>> {
        let provider = Provider::<Http>::try_from(network.rpc_url.as_str()).map_err(|e| {
            OrchestratorError::Network {
                network: name.to_string(),
                message: format!("Invalid RPC URL: {}", e),
            }
        })?;
        let provider = provider.interval(Duration::from_millis(100));

        let remote_chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| OrchestratorError::Network {
                network: name.to_string(),
                message: e.to_string(),
            })?
            .as_u64();

        if remote_chain_id != network.chain_id {
            return Err(OrchestratorError::Config(format!(
                "Network {} reports chain id {} but {} is configured",
                name, remote_chain_id, network.chain_id
            )));
        }

        let wallet = Self::load_wallet(network)?.with_chain_id(network.chain_id);
        info!(
            "Connected to {} (chain {}) with account {:?}",
            name,
            network.chain_id,
            wallet.address()
        );

        Ok(Arc::new(Self {
            name: name.to_string(),
            chain_id: network.chain_id,
            provider,
            wallet,
            quoter: GasQuoter::new(name, network, orchestrator),
            poll_interval: orchestrator.poll_interval(),
        }))
    }

    /// Load the signing key from the configured environment variable
    fn load_wallet(network: &NetworkConfig) -> OrchestratorResult<LocalWallet> {
        let key = std::env::var(&network.private_key_env).map_err(|_| {
            OrchestratorError::Wallet(format!(
                "No signing key: set {}",
                network.private_key_env
            ))
        })?;

        key.trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| OrchestratorError::Wallet(format!("Invalid private key: {}", e)))
    }

    /// Signing account address
    pub fn caller(&self) -> Address {
        self.wallet.address()
    }

    pub fn network(&self) -> &str {
        &self.name
    }

    fn network_err(&self, message: impl ToString) -> OrchestratorError {
        OrchestratorError::Network {
            network: self.name.clone(),
            message: message.to_string(),
        }
    }

    /// Next nonce including pending transactions
    async fn pending_nonce(&self) -> OrchestratorResult<U256> {
        self.provider
            .get_transaction_count(self.caller(), Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| self.network_err(e))
    }

    /// Sign a prepared transaction and send it raw. Returns the hash as soon
    /// as the transaction is accepted; does not wait for inclusion.
    async fn sign_and_send(&self, mut tx: TypedTransaction) -> Result<H256, String> {
        tx.set_chain_id(self.chain_id);

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| format!("signing failed: {}", e))?;
        let raw = tx.rlp_signed(&signature);

        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| e.to_string())?;
        Ok(pending.tx_hash())
    }

    /// Fill nonce, gas price and gas limit on a transaction request
    async fn prepare(
        &self,
        to: Option<Address>,
        data: Vec<u8>,
        gas_limit: Option<U256>,
        value: Option<U256>,
    ) -> Result<TypedTransaction, OrchestratorError> {
        let nonce = self.pending_nonce().await?;
        let gas_price = self.quoter.gas_price(&self.provider).await?;

        // Estimate before pinning the gas fields so an eager revert surfaces here
        let gas = match gas_limit {
            Some(limit) => limit,
            None => {
                let mut probe = TransactionRequest::new()
                    .from(self.caller())
                    .data(data.clone());
                if let Some(to) = to {
                    probe = probe.to(to);
                }
                if let Some(value) = value {
                    probe = probe.value(value);
                }
                let estimated = self
                    .provider
                    .estimate_gas(&probe.into(), None)
                    .await
                    .map_err(|e| OrchestratorError::SubmissionRejected {
                        method: "gas estimation".to_string(),
                        reason: revert_reason(&e.to_string()),
                    })?;
                self.quoter.buffer_gas_limit(estimated)
            }
        };

        let typed = match gas_price {
            GasPrice::Legacy(price) => {
                let mut tx = TransactionRequest::new()
                    .from(self.caller())
                    .data(data)
                    .nonce(nonce)
                    .gas(gas)
                    .gas_price(price);
                if let Some(to) = to {
                    tx = tx.to(to);
                }
                if let Some(value) = value {
                    tx = tx.value(value);
                }
                TypedTransaction::Legacy(tx)
            }
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let mut tx = Eip1559TransactionRequest::new()
                    .from(self.caller())
                    .data(data)
                    .nonce(nonce)
                    .gas(gas)
                    .max_fee_per_gas(max_fee_per_gas)
                    .max_priority_fee_per_gas(max_priority_fee_per_gas);
                if let Some(to) = to {
                    tx = tx.to(to);
                }
                if let Some(value) = value {
                    tx = tx.value(value);
                }
                TypedTransaction::Eip1559(tx)
            }
        };

        Ok(typed)
    }

    /// Poll for a receipt until the transaction reaches a terminal state.
    /// The caller bounds the wait.
    async fn wait_for_receipt(&self, tx_hash: H256) -> OrchestratorResult<TransactionReceipt> {
        loop {
            match self
                .provider
                .get_transaction_receipt(tx_hash)
                .await
                .map_err(|e| self.network_err(e))?
            {
                Some(receipt) => return Ok(receipt),
                None => {
                    debug!("No receipt yet for {:?}", tx_hash);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}

/// A contract instance bound to an address on one network
pub struct EthEndpoint {
    client: Arc<NetworkClient>,
    reference: EndpointRef,
    abi: Abi,
}

impl EthEndpoint {
    pub fn new(client: Arc<NetworkClient>, reference: EndpointRef, abi: Abi) -> Self {
        Self {
            client,
            reference,
            abi,
        }
    }

    fn encode_call(&self, call: &CallDescriptor) -> Result<Vec<u8>, String> {
        let function = self
            .abi
            .function(&call.method)
            .map_err(|_| format!("Method {} not in ABI of {}", call.method, self.reference))?;
        function
            .encode_input(&call.args)
            .map_err(|e| format!("Arguments for {} do not match ABI: {}", call.method, e))
    }

    /// Decode receipt logs against this endpoint's ABI, preserving order.
    /// Logs from contracts whose events are not in the ABI are skipped.
    fn decode_receipt(&self, receipt: &TransactionReceipt) -> ConfirmationReceipt {
        let mut events = Vec::new();

        for log in &receipt.logs {
            let raw = RawLog {
                topics: log.topics.clone(),
                data: log.data.to_vec(),
            };

            let decoded = self.abi.events().find_map(|event| {
                event
                    .parse_log(raw.clone())
                    .ok()
                    .map(|parsed| (event.name.clone(), parsed))
            });

            match decoded {
                Some((name, parsed)) => {
                    let args: BTreeMap<String, Token> = parsed
                        .params
                        .into_iter()
                        .map(|p| (p.name, p.value))
                        .collect();
                    events.push(EmittedEvent { name, args });
                }
                None => {
                    debug!(
                        "Skipping undecodable log {:?} in receipt {:?}",
                        log.topics.first(),
                        receipt.transaction_hash
                    );
                }
            }
        }

        ConfirmationReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|b| b.as_u64()).unwrap_or(0),
            events,
        }
    }

    /// A status 0 receipt carries no revert message. Re-execute the
    /// transaction's calldata with eth_call at the receipt's block; the node
    /// reverts again with the message, which `revert_reason` extracts.
    async fn recover_revert_reason(&self, tx_hash: H256, block: Option<U64>) -> String {
        let tx = match self.client.provider.get_transaction(tx_hash).await {
            Ok(Some(tx)) => tx,
            _ => return "execution reverted".to_string(),
        };

        let typed: TypedTransaction = (&tx).into();
        let replay = self
            .client
            .provider
            .call(&typed, block.map(Into::into))
            .await
            .map(|_| ())
            .map_err(|e| e.to_string());
        replayed_reason(replay)
    }
}

#[async_trait]
impl Endpoint for EthEndpoint {
    fn reference(&self) -> &EndpointRef {
        &self.reference
    }

    async fn invoke(&self, call: &CallDescriptor) -> OrchestratorResult<Vec<Token>> {
        let data = self
            .encode_call(call)
            .map_err(OrchestratorError::Pipeline)?;

        let tx = read_request(self.client.caller(), self.reference.address, data, call);

        let output = self
            .client
            .provider
            .call(&tx, None)
            .await
            .map_err(|e| OrchestratorError::CallReverted {
                method: call.method.clone(),
                reason: revert_reason(&e.to_string()),
            })?;

        let function = self
            .abi
            .function(&call.method)
            .map_err(|e| OrchestratorError::Pipeline(e.to_string()))?;
        let tokens = function
            .decode_output(&output)
            .map_err(|e| OrchestratorError::Pipeline(format!(
                "Undecodable output from {}: {}",
                call.method, e
            )))?;

        debug!("Invoked {} on {}: {:?}", call.method, self.reference, tokens);
        Ok(tokens)
    }

    async fn submit(&self, call: &CallDescriptor) -> OrchestratorResult<TxHandle> {
        let data = self
            .encode_call(call)
            .map_err(|reason| OrchestratorError::SubmissionRejected {
                method: call.method.clone(),
                reason,
            })?;

        let tx = self
            .client
            .prepare(Some(self.reference.address), data, call.gas_limit, call.value)
            .await?;

        let tx_hash = self.client.sign_and_send(tx).await.map_err(|e| {
            OrchestratorError::SubmissionRejected {
                method: call.method.clone(),
                reason: revert_reason(&e),
            }
        })?;

        info!("Submitted {} to {}: {:?}", call.method, self.reference, tx_hash);
        Ok(TxHandle {
            tx_hash,
            method: call.method.clone(),
        })
    }

    async fn confirmation(&self, handle: &TxHandle) -> OrchestratorResult<ConfirmationReceipt> {
        let receipt = self.client.wait_for_receipt(handle.tx_hash).await?;

        if receipt.status != Some(1.into()) {
            warn!("Transaction {} reverted on {}", handle, self.reference);
            let reason = self
                .recover_revert_reason(handle.tx_hash, receipt.block_number)
                .await;
            return Err(OrchestratorError::TransactionReverted {
                tx_hash: format!("{:?}", handle.tx_hash),
                reason,
            });
        }

        let confirmed = self.decode_receipt(&receipt);
        info!(
            "Confirmed {} in block {} ({} events)",
            handle,
            confirmed.block_number,
            confirmed.events.len()
        );
        Ok(confirmed)
    }
}

/// Resolves endpoint identities against one network
pub struct EthResolver {
    client: Arc<NetworkClient>,
}

impl EthResolver {
    pub fn new(client: Arc<NetworkClient>) -> Self {
        Self { client }
    }

    /// Deploy a contract from a compiled artifact and wait for confirmation
    async fn deploy(
        &self,
        name: &str,
        artifact: &Path,
        constructor_args: &[Token],
    ) -> OrchestratorResult<Arc<dyn Endpoint>> {
        let (abi, bytecode) = load_artifact(artifact)?;

        let data = match abi.constructor() {
            Some(constructor) => constructor
                .encode_input(bytecode, constructor_args)
                .map_err(|e| OrchestratorError::EndpointUnavailable {
                    endpoint: name.to_string(),
                    reason: format!("Constructor arguments do not match ABI: {}", e),
                })?,
            None if constructor_args.is_empty() => bytecode,
            None => {
                return Err(OrchestratorError::EndpointUnavailable {
                    endpoint: name.to_string(),
                    reason: "Constructor arguments given but ABI has no constructor".to_string(),
                })
            }
        };

        let tx = self
            .client
            .prepare(None, data, None, None)
            .await
            .map_err(|e| unavailable(name, e))?;
        let tx_hash = self
            .client
            .sign_and_send(tx)
            .await
            .map_err(|e| unavailable(name, e))?;

        info!("Deploying {}: {:?}", name, tx_hash);

        let receipt = self.client.wait_for_receipt(tx_hash).await?;
        if receipt.status != Some(1.into()) {
            return Err(unavailable(name, "deployment reverted"));
        }

        let address = receipt
            .contract_address
            .ok_or_else(|| unavailable(name, "no contract address in deployment receipt"))?;

        let reference = EndpointRef {
            name: name.to_string(),
            address,
        };
        info!("Deployed {}", reference);

        Ok(Arc::new(EthEndpoint::new(self.client.clone(), reference, abi)))
    }
}

#[async_trait]
impl EndpointResolver for EthResolver {
    async fn resolve(
        &self,
        identity: &EndpointIdentity,
    ) -> OrchestratorResult<Arc<dyn Endpoint>> {
        match identity {
            EndpointIdentity::Deploy {
                name,
                artifact,
                constructor_args,
            } => self.deploy(name, artifact, constructor_args).await,

            EndpointIdentity::Attach { name, address, abi } => {
                let fragments: Vec<&str> = abi.iter().map(String::as_str).collect();
                let abi = ethers::abi::parse_abi(&fragments).map_err(|e| {
                    OrchestratorError::EndpointUnavailable {
                        endpoint: name.clone(),
                        reason: format!("Invalid ABI: {}", e),
                    }
                })?;

                let reference = EndpointRef {
                    name: name.clone(),
                    address: *address,
                };
                info!("Attached to {}", reference);

                Ok(Arc::new(EthEndpoint::new(
                    self.client.clone(),
                    reference,
                    abi,
                )))
            }
        }
    }
}

/// Load abi and creation bytecode from a hardhat-style artifact file
fn load_artifact(path: &Path) -> OrchestratorResult<(Abi, Vec<u8>)> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        OrchestratorError::Config(format!("Failed to read artifact {:?}: {}", path, e))
    })?;
    let artifact: serde_json::Value = serde_json::from_str(&raw).map_err(|e| {
        OrchestratorError::Config(format!("Invalid artifact {:?}: {}", path, e))
    })?;

    let abi: Abi = serde_json::from_value(artifact["abi"].clone()).map_err(|e| {
        OrchestratorError::Config(format!("Invalid ABI in artifact {:?}: {}", path, e))
    })?;

    let bytecode = artifact["bytecode"]
        .as_str()
        .ok_or_else(|| OrchestratorError::Config(format!("No bytecode in artifact {:?}", path)))?;
    let bytecode = hex::decode(bytecode.trim_start_matches("0x")).map_err(|e| {
        OrchestratorError::Config(format!("Invalid bytecode in artifact {:?}: {}", path, e))
    })?;

    Ok((abi, bytecode))
}

fn unavailable(name: &str, reason: impl ToString) -> OrchestratorError {
    OrchestratorError::EndpointUnavailable {
        endpoint: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Pull a usable revert reason out of a JSON-RPC error message
/// Build the eth_call request for a read-only invocation. A descriptor's
/// gas limit caps the call the same way it caps a submitted transaction.
fn read_request(
    from: Address,
    to: Address,
    data: Vec<u8>,
    call: &CallDescriptor,
) -> TypedTransaction {
    let mut tx = TransactionRequest::new().from(from).to(to).data(data);
    if let Some(gas_limit) = call.gas_limit {
        tx = tx.gas(gas_limit);
    }
    if let Some(value) = call.value {
        tx = tx.value(value);
    }
    tx.into()
}

/// Reason for a reverted transaction, from the outcome of replaying its
/// calldata. A replay that no longer reverts yields nothing usable.
fn replayed_reason(replay: Result<(), String>) -> String {
    match replay {
        Err(message) => revert_reason(&message),
        Ok(()) => "execution reverted".to_string(),
    }
}

fn revert_reason(message: &str) -> String {
    let Some(idx) = message.find("execution reverted") else {
        return message.to_string();
    };

    // Cut trailing JSON-RPC noise some nodes append
    let mut reason = message[idx + "execution reverted".len()..].trim_start_matches([':', ' ']);
    for stop in [", data:", "\"", "}", "\n"] {
        if let Some(i) = reason.find(stop) {
            reason = &reason[..i];
        }
    }

    let reason = reason.trim().trim_end_matches(')').trim();
    if reason.is_empty() {
        "execution reverted".to_string()
    } else {
        reason.to_string()
    }
}
