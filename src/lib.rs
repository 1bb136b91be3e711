//! Recovery-address classification pipeline
//!
//! Builds the refund list for native currency that was sent to a single
//! address on a supported chain. Every sender is classified before it is
//! allowed into the recovery dataset.
//!
//! # Pipeline Stages
//!
//! 1. **Transfer Collection** ([`rpc`]): Pages the target's transfer history from Etherscan
//! 2. **Aggregation** ([`aggregate`]): Sums successful inbound value per sender in `U256`
//! 3. **Address Types** ([`address_kind`]): EOA vs. contract via `eth_getCode`, EOA on failure
//! 4. **Categorization** ([`categorize`]): Custodian directory pass, then screening pass
//! 5. **Denylist Screening** ([`denylist`]): Non-custodian senders only
//! 6. **Reporting** ([`report`]): Category datasets, recovery list, Parquet export
//!
//! Both classification stages run on the shared batching engine in
//! [`classify`].
//!
//! # Output Files
//!
//! Written to `<output_dir>/<chain slug>/`:
//!
//! - `custodian.json`, `non_custodian.json`, `normal.json`, `flagged.json`
//! - `recovery_addresses.json`: NORMAL senders only
//! - `classified_senders.parquet`: every sender, flat
//! - `run_metadata.json`
//!
//! # Example
//!
//! ```no_run
//! use eth_recovery_pipeline::config::{chain_config, PipelineConfig};
//! use eth_recovery_pipeline::custodians::CustodianDirectory;
//! use eth_recovery_pipeline::denylist::DenylistClient;
//! use eth_recovery_pipeline::pipeline::RecoveryPipeline;
//! use eth_recovery_pipeline::rpc::EtherscanClient;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::load()?;
//!     let target = config.validate_for_run()?;
//!     let chain = chain_config(8453)?;
//!
//!     let etherscan = Arc::new(EtherscanClient::new(
//!         config.etherscan_base_url.clone(),
//!         config.etherscan_api_key.clone(),
//!         chain.chain_id,
//!         config.rate_limits.clone(),
//!     )?);
//!     let denylist = Arc::new(DenylistClient::new(&config.denylist, config.screening.call_timeout())?);
//!     let directory = CustodianDirectory::load(&config.paths.custodian_directory)?;
//!
//!     let pipeline = RecoveryPipeline::new(etherscan.clone(), etherscan, denylist, directory, &config);
//!     let report = pipeline.run(&target, chain).await?;
//!     println!("{} senders, status {}", report.counts.senders, report.status);
//!     Ok(())
//! }
//! ```

pub mod address_kind;
pub mod aggregate;
pub mod categorize;
pub mod classify;
pub mod config;
pub mod custodians;
pub mod denylist;
pub mod ethereum;
pub mod pipeline;
pub mod report;
pub mod rpc;
pub mod schemas;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use pipeline::{RecoveryPipeline, RunReport};
pub use schemas::{AddressKind, ClassifiedSender, Disposition, RunMetadata, RunStatus};
