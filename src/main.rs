//! Recovery-address classification CLI
//!
//! Builds the refund list for native currency sent to one address on a
//! supported chain.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use eth_recovery_pipeline::config::{chain_config, PipelineConfig, SUPPORTED_CHAINS};
use eth_recovery_pipeline::custodians::CustodianDirectory;
use eth_recovery_pipeline::denylist::DenylistClient;
use eth_recovery_pipeline::pipeline::RecoveryPipeline;
use eth_recovery_pipeline::report::{
    read_classified_parquet, read_recovery_file, CLASSIFIED_PARQUET, CUSTODIAN_FILE, FLAGGED_FILE,
    METADATA_FILE, NON_CUSTODIAN_FILE, NORMAL_FILE, RECOVERY_FILE, UNSCREENED_FILE,
};
use eth_recovery_pipeline::rpc::EtherscanClient;
use eth_recovery_pipeline::schemas::{RunMetadata, RunStatus};

#[derive(Parser)]
#[command(name = "eth-recovery")]
#[command(version)]
#[command(about = "Classify senders to a recovery address and build the refund list", long_about = None)]
struct Cli {
    /// Path to configuration file (optional, uses env vars if not provided)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output directory for result files
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    /// Address whose inbound transfers are analyzed
    #[arg(short, long, global = true)]
    target: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis for one chain
    Analyze {
        /// Chain ID (see `chains`)
        chain_id: u64,

        /// Custodian wallet directory (JSON or CSV)
        #[arg(long)]
        custodians: Option<PathBuf>,
    },

    /// List supported chains
    Chains,

    /// Show results of the last run for one chain
    Status {
        /// Chain ID (see `chains`)
        chain_id: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => PipelineConfig::load().context("Failed to load config from environment")?,
    };

    // CLI overrides
    if let Some(output_dir) = &cli.output_dir {
        config.paths.output_dir = output_dir.clone();
    }
    if let Some(target) = &cli.target {
        config.target_address = target.clone();
    }

    match cli.command {
        Commands::Analyze {
            chain_id,
            custodians,
        } => {
            if let Some(path) = custodians {
                config.paths.custodian_directory = path;
            }
            cmd_analyze(&config, chain_id).await?;
        }
        Commands::Chains => cmd_chains(),
        Commands::Status { chain_id } => cmd_status(&config, chain_id)?,
    }

    Ok(())
}

async fn cmd_analyze(config: &PipelineConfig, chain_id: u64) -> Result<()> {
    let chain = chain_config(chain_id)?;
    let target = config
        .validate_for_run()
        .context("Configuration is not runnable")?;

    info!("=== Recovery Analysis ===");
    info!("Target: {}", target.to_checksum());
    info!("Chain: {} ({})", chain.name, chain.chain_id);

    let directory = CustodianDirectory::load(&config.paths.custodian_directory)
        .context("Failed to load custodian directory")?;
    if directory.is_empty() {
        warn!("Custodian directory is empty; every sender will be screened");
    }

    let etherscan = Arc::new(
        EtherscanClient::new(
            config.etherscan_base_url.clone(),
            config.etherscan_api_key.clone(),
            chain.chain_id,
            config.rate_limits.clone(),
        )
        .context("Failed to build Etherscan client")?,
    );
    let denylist = Arc::new(
        DenylistClient::new(&config.denylist, config.screening.call_timeout())
            .context("Failed to build denylist client")?,
    );
    info!(
        "Denylist endpoint: {} ({:?})",
        denylist.url(),
        config.denylist.environment
    );

    let pipeline = RecoveryPipeline::new(
        Arc::clone(&etherscan),
        etherscan,
        denylist,
        directory,
        config,
    );

    let report = pipeline
        .run(&target, chain)
        .await
        .with_context(|| format!("Analysis failed for chain {}", chain.chain_id))?;

    info!("=== Analysis {} ===", report.status);
    info!(
        "{} transfers, {} senders: {} custodian, {} flagged, {} normal, {} unscreened",
        report.counts.transfers_fetched,
        report.counts.senders,
        report.counts.custodian,
        report.counts.flagged,
        report.counts.normal,
        report.counts.unscreened
    );
    info!("Results: {:?}", report.paths.output_dir);
    info!("Metadata: {:?}", report.metadata_path);

    if report.status == RunStatus::Aborted {
        anyhow::bail!(
            "Analysis aborted (address types: {:?}, screening: {:?}); partial results are marked aborted",
            report.address_kind_stage,
            report.screening_stage
        );
    }

    Ok(())
}

fn cmd_chains() {
    info!("Supported chains:");
    for chain in SUPPORTED_CHAINS {
        info!(
            "  {:>6}: {} (blocks {}-{}, output dir {:?})",
            chain.chain_id, chain.name, chain.start_block, chain.end_block, chain.slug
        );
    }
}

fn cmd_status(config: &PipelineConfig, chain_id: u64) -> Result<()> {
    let chain = chain_config(chain_id)?;
    let dir = config.chain_output_dir(chain);

    info!("=== Status for {} ({}) ===", chain.name, chain.chain_id);
    info!("Output directory: {:?}", dir);

    let metadata_path = dir.join(METADATA_FILE);
    if metadata_path.exists() {
        let metadata = RunMetadata::load(&metadata_path)
            .with_context(|| format!("Failed to read {:?}", metadata_path))?;
        info!(
            "Last run: {} at {} (target {})",
            metadata.status,
            metadata.run_timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            metadata.target_address
        );
        info!(
            "  address types: {:?}, screening: {:?}",
            metadata.address_kind_stage, metadata.screening_stage
        );
        if metadata.status == RunStatus::Aborted {
            warn!("Last run aborted; do not use its recovery list");
        }
    } else {
        info!("No run metadata found");
    }

    for file in [
        CUSTODIAN_FILE,
        NON_CUSTODIAN_FILE,
        NORMAL_FILE,
        FLAGGED_FILE,
        UNSCREENED_FILE,
        RECOVERY_FILE,
        CLASSIFIED_PARQUET,
    ] {
        let path = dir.join(file);
        if path.exists() {
            let size_kb = std::fs::metadata(&path)?.len() / 1024;
            info!("  {} {} ({} KB)", "✓", file, size_kb);
        } else {
            info!("  {} {}: not found", "✗", file);
        }
    }

    let recovery_path = dir.join(RECOVERY_FILE);
    if recovery_path.exists() {
        let recovery = read_recovery_file(&recovery_path)?;
        info!(
            "Recovery list: {} addresses ({})",
            recovery.addresses.len(),
            recovery.status
        );
    }

    let parquet_path = dir.join(CLASSIFIED_PARQUET);
    if parquet_path.exists() {
        let senders = read_classified_parquet(&parquet_path)?;
        info!("Classified senders: {}", senders.len());
    }

    Ok(())
}
