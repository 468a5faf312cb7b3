//! txflow - run a contract-call pipeline manifest against a configured network

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use txflow::endpoint::eth::{EthResolver, NetworkClient};
use txflow::pipeline::{PipelineManifest, PipelineRunner, StepOutcome};
use txflow::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let (network_name, manifest_path) = parse_args()?;

    info!("Starting txflow v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;
    let network = settings.network(&network_name)?;

    let manifest = PipelineManifest::load(&manifest_path)
        .with_context(|| format!("Failed to load pipeline manifest {:?}", manifest_path))?;
    let pipeline = manifest.into_pipeline()?;
    info!(
        "Loaded pipeline with {} endpoints and {} steps",
        pipeline.endpoints.len(),
        pipeline.steps.len()
    );

    let client = NetworkClient::connect(&network_name, network, &settings.orchestrator).await?;
    let caller = client.caller();
    let resolver = Arc::new(EthResolver::new(client));

    let runner = PipelineRunner::new(resolver, caller, settings.orchestrator.clone());

    match runner.run(pipeline).await {
        Ok(report) => {
            info!("Pipeline run {} succeeded", report.run_id);
            for (label, outcome) in &report.outcomes {
                match outcome {
                    StepOutcome::Resolved(reference) => {
                        info!("  {}: resolved {}", label, reference)
                    }
                    StepOutcome::Returned(values) => {
                        info!("  {}: returned {:?}", label, values)
                    }
                    StepOutcome::Confirmed(receipt) => info!(
                        "  {}: confirmed {:?} in block {} ({} events)",
                        label,
                        receipt.tx_hash,
                        receipt.block_number,
                        receipt.events.len()
                    ),
                }
            }
            Ok(())
        }
        Err(failure) => {
            error!("{}", failure);
            if let Some(call) = &failure.call {
                error!("  call: {}", call);
            }
            std::process::exit(1);
        }
    }
}

fn parse_args() -> Result<(String, PathBuf)> {
    let mut args = std::env::args().skip(1);
    match (args.next(), args.next()) {
        (Some(network), Some(manifest)) => Ok((network, PathBuf::from(manifest))),
        _ => anyhow::bail!("Usage: txflow <network> <pipeline.toml>"),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,txflow=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
