//! Gas quoting with strategy selection and safety buffers

use crate::config::{GasPriceStrategy, NetworkConfig, OrchestratorConfig};
use crate::error::{OrchestratorError, OrchestratorResult};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use tracing::debug;

/// Gas price types
#[derive(Debug, Clone)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

/// Quotes gas prices and buffers gas limits for a single network
pub struct GasQuoter {
    network: String,
    strategy: GasPriceStrategy,
    max_gas_price_gwei: u64,
    gas_limit_buffer_percent: u64,
    gas_price_buffer_percent: u64,
}

impl GasQuoter {
    pub fn new(name: &str, network: &NetworkConfig, orchestrator: &OrchestratorConfig) -> Self {
        Self {
            network: name.to_string(),
            strategy: network.gas_price_strategy.clone(),
            max_gas_price_gwei: network.max_gas_price_gwei,
            gas_limit_buffer_percent: orchestrator.gas_limit_buffer_percent,
            gas_price_buffer_percent: orchestrator.gas_price_buffer_percent,
        }
    }

    /// Apply the configured buffer to an estimated gas limit
    pub fn buffer_gas_limit(&self, estimated: U256) -> U256 {
        estimated + estimated * self.gas_limit_buffer_percent / 100
    }

    /// Get a buffered gas price per the network strategy
    pub async fn gas_price(&self, provider: &Provider<Http>) -> OrchestratorResult<GasPrice> {
        let quoted = match self.strategy {
            GasPriceStrategy::Legacy => {
                let price = provider
                    .get_gas_price()
                    .await
                    .map_err(|e| OrchestratorError::Network {
                        network: self.network.clone(),
                        message: e.to_string(),
                    })?;
                GasPrice::Legacy(self.buffer(price))
            }
            GasPriceStrategy::Eip1559 => {
                let (max_fee, priority_fee) = self.estimate_eip1559_fees(provider).await?;
                GasPrice::Eip1559 {
                    max_fee_per_gas: self.buffer(max_fee),
                    max_priority_fee_per_gas: self.buffer(priority_fee),
                }
            }
        };

        debug!("Gas price quote: {:?}", quoted);
        Ok(quoted)
    }

    fn buffer(&self, price: U256) -> U256 {
        let buffered = price + price * self.gas_price_buffer_percent / 100;
        let cap = U256::from(self.max_gas_price_gwei) * U256::from(1_000_000_000u64);
        std::cmp::min(buffered, cap)
    }

    /// Estimate EIP-1559 fees from the latest block's base fee
    async fn estimate_eip1559_fees(
        &self,
        provider: &Provider<Http>,
    ) -> OrchestratorResult<(U256, U256)> {
        let block = provider
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| OrchestratorError::Network {
                network: self.network.clone(),
                message: e.to_string(),
            })?
            .ok_or_else(|| OrchestratorError::Network {
                network: self.network.clone(),
                message: "No latest block".to_string(),
            })?;

        let base_fee = block.base_fee_per_gas.ok_or_else(|| OrchestratorError::Network {
            network: self.network.clone(),
            message: "No base fee in block".to_string(),
        })?;

        let priority_fee = U256::from(2_000_000_000u64); // 2 gwei default

        // Max fee = 2 * base_fee + priority_fee (buffer for block variability)
        let max_fee = base_fee * 2 + priority_fee;

        Ok((max_fee, priority_fee))
    }
}
