//! End-to-end recovery run for one chain.
//!
//! fetch → aggregate → address kinds → categorize → screen → report.
//! Stages run one after another; only the two classification stages fan
//! out, and they do so inside the engine.

use crate::address_kind::resolve_address_kinds;
use crate::aggregate::{aggregate_transfers, AggregationError};
use crate::categorize::{apply_screening, categorize};
use crate::classify::{BatchClassifier, ClassificationEndpoint};
use crate::config::{ChainConfig, PathConfig, PipelineConfig};
use crate::custodians::CustodianDirectory;
use crate::denylist::screen_addresses;
use crate::ethereum::ValidatedAddress;
use crate::report::{write_report, ReportError, ReportPaths};
use crate::rpc::{BlockRange, RpcError, TransferSource};
use crate::schemas::{
    get_git_commit, AddressKind, Disposition, RecordCounts, RunMetadata, RunStatus, StageStatus,
    SCHEMA_VERSION,
};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Ledger query failed: {0}")]
    Fetch(#[from] RpcError),

    #[error("Aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("Report failed: {0}")]
    Report(#[from] ReportError),
}

/// Outcome of one run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub address_kind_stage: StageStatus,
    pub screening_stage: StageStatus,
    pub counts: RecordCounts,
    pub paths: ReportPaths,
    pub metadata_path: PathBuf,
}

/// Recovery pipeline over injected collaborators.
///
/// `S` is the ledger query service, `K` the address-type oracle and `D`
/// the denylist service. In production `S` and `K` are the same client.
pub struct RecoveryPipeline<S, K, D> {
    source: Arc<S>,
    kind_oracle: Arc<K>,
    denylist: Arc<D>,
    directory: CustodianDirectory,
    kind_engine: BatchClassifier,
    screening_engine: BatchClassifier,
    paths: PathConfig,
}

impl<S, K, D> RecoveryPipeline<S, K, D>
where
    S: TransferSource,
    K: ClassificationEndpoint<Output = AddressKind>,
    D: ClassificationEndpoint<Output = bool>,
{
    pub fn new(
        source: Arc<S>,
        kind_oracle: Arc<K>,
        denylist: Arc<D>,
        directory: CustodianDirectory,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            source,
            kind_oracle,
            denylist,
            directory,
            kind_engine: BatchClassifier::new(config.address_kind.clone()),
            screening_engine: BatchClassifier::new(config.screening.clone()),
            paths: config.paths.clone(),
        }
    }

    /// Run the full analysis for `target` on `chain`.
    ///
    /// An aborted classification stage is not an error here: the partial
    /// report is written and the returned status says `Aborted`.
    pub async fn run(
        &self,
        target: &ValidatedAddress,
        chain: &ChainConfig,
    ) -> Result<RunReport, PipelineError> {
        let target_key = target.to_key();
        info!(
            "Starting analysis of {} on {} ({})",
            target.to_checksum(),
            chain.name,
            chain.chain_id
        );

        // 1. Fetch
        let range = BlockRange::from(chain);
        info!("Fetching transfers in blocks {}-{}", range.start, range.end);
        let transfers = self.source.fetch_transfers(&target_key, range).await?;
        info!("Fetched {} transfers", transfers.len());

        // 2. Aggregate
        let (aggregates, _stats) = aggregate_transfers(&transfers, &target_key)?;

        let (senders, kind_status, screening_status) = if aggregates.is_empty() {
            info!("No relevant transfers, writing empty datasets");
            (Vec::new(), StageStatus::Skipped, StageStatus::Skipped)
        } else {
            let mut addresses: Vec<String> = aggregates.keys().cloned().collect();
            addresses.sort();

            // 3. Address kinds
            let kinds = resolve_address_kinds(
                &self.kind_engine,
                Arc::clone(&self.kind_oracle),
                &addresses,
            )
            .await;

            // 4. Directory pass
            let categorized = categorize(&aggregates, &self.directory, &kinds);

            // 5. Screening (non-custodians only)
            let screening = screen_addresses(
                &self.screening_engine,
                Arc::clone(&self.denylist),
                &categorized.screening_candidates,
            )
            .await;

            // 6. Final pass; unanswered candidates stay NOT_CUSTODIAN
            let senders = apply_screening(
                categorized.senders,
                &screening.flagged,
                &screening.screened,
            );
            (senders, kinds.status, screening.status)
        };

        let status = if kind_status.is_aborted() || screening_status.is_aborted() {
            RunStatus::Aborted
        } else {
            RunStatus::Completed
        };

        let count = |d: Disposition| senders.iter().filter(|s| s.disposition == d).count();
        let counts = RecordCounts {
            transfers_fetched: transfers.len(),
            senders: senders.len(),
            custodian: count(Disposition::Custodian),
            normal: count(Disposition::Normal),
            flagged: count(Disposition::Flagged),
            unscreened: count(Disposition::NotCustodian),
        };

        let metadata = RunMetadata {
            schema_version: SCHEMA_VERSION.to_string(),
            run_timestamp: Utc::now(),
            chain_id: chain.chain_id,
            chain_name: chain.name.to_string(),
            target_address: target.to_checksum(),
            start_block: chain.start_block,
            end_block: chain.end_block,
            status,
            address_kind_stage: kind_status.clone(),
            screening_stage: screening_status.clone(),
            record_counts: counts.clone(),
            git_commit: get_git_commit(),
            pipeline_version: env!("CARGO_PKG_VERSION").to_string(),
        };

        // 7. Report
        let output_dir = self.paths.chain_output_dir(chain);
        let (_, paths) = write_report(&output_dir, chain, &senders, &metadata)?;

        match status {
            RunStatus::Completed => info!("Analysis complete, results in {:?}", output_dir),
            RunStatus::Aborted => warn!(
                "Analysis aborted, partial results in {:?} are marked aborted",
                output_dir
            ),
        }

        Ok(RunReport {
            status,
            address_kind_stage: kind_status,
            screening_stage: screening_status,
            counts,
            metadata_path: paths.metadata_path.clone(),
            paths,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::tests::{Script, ScriptedEndpoint};
    use crate::classify::{EndpointError, Lookup};
    use crate::config::chain_config;
    use crate::report::{
        read_recovery_file, FLAGGED_FILE, NORMAL_FILE, RECOVERY_FILE, UNSCREENED_FILE,
    };
    use crate::schemas::TransferRecord;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const TARGET: &str = "0x49048044D57e1C92A77f79988d21Fa8fAF74E97e";
    const BINANCE: &str = "0x28c6c06298d514db089934071355e5743bf21d60";
    const ALICE: &str = "0x1111111111111111111111111111111111111111";
    const BOB: &str = "0x2222222222222222222222222222222222222222";
    const CAROL: &str = "0x3333333333333333333333333333333333333333";
    const DAVE: &str = "0x4444444444444444444444444444444444444444";

    struct StubSource {
        records: Result<Vec<TransferRecord>, u16>,
    }

    #[async_trait]
    impl TransferSource for StubSource {
        async fn fetch_transfers(
            &self,
            _target: &str,
            _range: BlockRange,
        ) -> Result<Vec<TransferRecord>, RpcError> {
            self.records.clone().map_err(RpcError::Status)
        }
    }

    /// Address-type oracle that records every lookup
    struct SpyOracle {
        contracts: Vec<&'static str>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ClassificationEndpoint for SpyOracle {
        type Output = AddressKind;

        fn name(&self) -> &'static str {
            "spy-oracle"
        }

        async fn submit(&self, address: &str) -> Result<Lookup<AddressKind>, EndpointError> {
            self.seen.lock().unwrap().push(address.to_string());
            if self.contracts.contains(&address) {
                Ok(Lookup::Found(AddressKind::Contract))
            } else {
                Ok(Lookup::Found(AddressKind::Eoa))
            }
        }
    }

    fn transfer(from: &str, value: &str, is_error: &str) -> TransferRecord {
        TransferRecord {
            hash: format!("0x{}-{}", from, value),
            from: from.to_string(),
            to: TARGET.to_string(),
            value: value.to_string(),
            is_error: is_error.to_string(),
            block_number: "111048900".to_string(),
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        config: PipelineConfig,
        oracle: Arc<SpyOracle>,
        denylist: Arc<ScriptedEndpoint>,
    }

    impl Harness {
        fn new(denylist: Vec<(&str, Script)>) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = PipelineConfig::default();
            config.paths.output_dir = dir.path().to_path_buf();
            config.screening.retry_backoff_ms = 1;
            config.screening.inter_batch_delay_ms = 1;
            Self {
                _dir: dir,
                config,
                oracle: Arc::new(SpyOracle {
                    contracts: vec![CAROL],
                    seen: Mutex::new(Vec::new()),
                }),
                denylist: Arc::new(ScriptedEndpoint::new(denylist)),
            }
        }

        async fn run(&self, records: Result<Vec<TransferRecord>, u16>) -> Result<RunReport, PipelineError> {
            let pipeline = RecoveryPipeline::new(
                Arc::new(StubSource { records }),
                Arc::clone(&self.oracle),
                Arc::clone(&self.denylist),
                CustodianDirectory::from_entries([(BINANCE, "Binance 14")]),
                &self.config,
            );
            let target = ValidatedAddress::parse(TARGET).unwrap();
            pipeline.run(&target, chain_config(42161).unwrap()).await
        }

        fn read_json(&self, name: &str) -> serde_json::Value {
            let chain = chain_config(42161).unwrap();
            let path = self.config.chain_output_dir(chain).join(name);
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
        }
    }

    #[tokio::test]
    async fn test_custodian_is_excluded_and_never_screened() {
        let harness = Harness::new(Vec::new());
        let records = vec![
            transfer(BINANCE, "900", "0"),
            transfer(ALICE, "5", "0"),
            transfer(ALICE, "3", "0"),
            transfer(BOB, "10", "1"),
        ];

        let report = harness.run(Ok(records)).await.unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.counts.senders, 2);
        assert_eq!(report.counts.custodian, 1);
        assert_eq!(report.counts.normal, 1);
        assert!(!harness.denylist.called_addresses().contains(BINANCE));
        assert_eq!(harness.denylist.calls_for(ALICE), 1);

        let recovery = read_recovery_file(&report.paths.output_dir.join(RECOVERY_FILE)).unwrap();
        assert_eq!(recovery.addresses.len(), 1);
        assert_eq!(recovery.addresses[0].refund_address, ALICE);
        assert_eq!(recovery.addresses[0].total_wei, "8");
    }

    #[tokio::test]
    async fn test_flagged_sender_lands_only_in_flagged_dataset() {
        let harness = Harness::new(vec![(CAROL, Script::FailThenFound(0, true))]);
        let records = vec![transfer(CAROL, "100", "0"), transfer(DAVE, "50", "0")];

        let report = harness.run(Ok(records)).await.unwrap();

        assert_eq!(report.counts.flagged, 1);
        let flagged = harness.read_json(FLAGGED_FILE);
        assert_eq!(flagged["members"].as_array().unwrap().len(), 1);
        assert_eq!(flagged["members"][0]["address"], CAROL);
        assert_eq!(flagged["members"][0]["kind"], "CONTRACT");
        assert_eq!(flagged["summary"]["total_value_wei"], "100");

        let normal = harness.read_json(NORMAL_FILE);
        assert_eq!(normal["members"][0]["address"], DAVE);
        assert_eq!(normal["members"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_transfers_skips_both_stages() {
        let harness = Harness::new(Vec::new());

        let report = harness.run(Ok(Vec::new())).await.unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.address_kind_stage, StageStatus::Skipped);
        assert_eq!(report.screening_stage, StageStatus::Skipped);
        assert!(harness.oracle.seen.lock().unwrap().is_empty());
        assert!(harness.denylist.called_addresses().is_empty());

        let recovery = read_recovery_file(&report.paths.output_dir.join(RECOVERY_FILE)).unwrap();
        assert!(recovery.addresses.is_empty());
        assert!(report.metadata_path.exists());
    }

    #[tokio::test]
    async fn test_screening_abort_marks_every_dataset() {
        let harness = Harness::new(vec![(ALICE, Script::AlwaysFail)]);
        let records = vec![transfer(ALICE, "7", "0"), transfer(DAVE, "3", "0")];

        let report = harness.run(Ok(records)).await.unwrap();

        assert_eq!(report.status, RunStatus::Aborted);
        assert!(report.screening_stage.is_aborted());
        assert_eq!(harness.denylist.calls_for(ALICE), 3);
        assert_eq!(harness.read_json(NORMAL_FILE)["status"], "aborted");
        assert_eq!(harness.read_json(FLAGGED_FILE)["status"], "aborted");

        // DAVE was answered in the same batch; ALICE never was
        let recovery = read_recovery_file(&report.paths.output_dir.join(RECOVERY_FILE)).unwrap();
        assert_eq!(recovery.status, RunStatus::Aborted);
        let refunds: Vec<&str> = recovery
            .addresses
            .iter()
            .map(|a| a.refund_address.as_str())
            .collect();
        assert_eq!(refunds, vec![DAVE]);
        let unscreened = harness.read_json(UNSCREENED_FILE);
        assert_eq!(unscreened["members"][0]["address"], ALICE);
        assert_eq!(unscreened["members"][0]["disposition"], "NOT_CUSTODIAN");

        let metadata = RunMetadata::load(&report.metadata_path).unwrap();
        assert_eq!(metadata.status, RunStatus::Aborted);
        assert_eq!(
            metadata.screening_stage,
            StageStatus::Aborted {
                failed_address: ALICE.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_screening_abort_keeps_unscreened_out_of_recovery() {
        let mut harness = Harness::new(vec![(ALICE, Script::AlwaysFail)]);
        harness.config.screening.batch_size = 1;
        let records = vec![
            transfer(BINANCE, "900", "0"),
            transfer(ALICE, "9", "0"),
            transfer(BOB, "5", "0"),
        ];

        let report = harness.run(Ok(records)).await.unwrap();

        assert_eq!(report.status, RunStatus::Aborted);
        assert_eq!(harness.denylist.calls_for(BOB), 0);
        assert_eq!(report.counts.normal, 0);
        assert_eq!(report.counts.unscreened, 2);
        assert_eq!(report.counts.custodian, 1);

        let recovery = read_recovery_file(&report.paths.output_dir.join(RECOVERY_FILE)).unwrap();
        assert_eq!(recovery.status, RunStatus::Aborted);
        assert!(recovery.addresses.is_empty());
        assert!(harness.read_json(NORMAL_FILE)["members"]
            .as_array()
            .unwrap()
            .is_empty());

        let unscreened = harness.read_json(UNSCREENED_FILE);
        let members: Vec<&str> = unscreened["members"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["address"].as_str().unwrap())
            .collect();
        assert_eq!(members, vec![ALICE, BOB]);
    }

    #[tokio::test]
    async fn test_ledger_failure_is_fatal_and_writes_nothing() {
        let harness = Harness::new(Vec::new());

        let err = harness.run(Err(502)).await.unwrap_err();

        assert!(matches!(err, PipelineError::Fetch(RpcError::Status(502))));
        let chain = chain_config(42161).unwrap();
        assert!(!harness.config.chain_output_dir(chain).exists());
    }
}
