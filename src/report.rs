//! Report generation.
//!
//! Partitions the classified senders into the category datasets plus the
//! recovery list, computes summaries in `U256`, and persists everything
//! under the chain's output directory. Native-unit rendering happens only
//! at the very end.
//!
//! A report is staged in a sibling directory and swapped into place once
//! every file is written, so a failed write leaves the previous run intact.

use crate::config::ChainConfig;
use crate::ethereum::format_units;
use crate::schemas::{
    AddressKind, CategoryDataset, CategorySummary, ClassifiedSender, Disposition,
    KindBreakdown, RecoveryEntry, RecoveryFile, RunMetadata, RunStatus, ValueTotals,
};
use alloy_primitives::U256;
use polars::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub const CUSTODIAN_FILE: &str = "custodian.json";
pub const NON_CUSTODIAN_FILE: &str = "non_custodian.json";
pub const NORMAL_FILE: &str = "normal.json";
pub const FLAGGED_FILE: &str = "flagged.json";
pub const UNSCREENED_FILE: &str = "unscreened.json";
pub const RECOVERY_FILE: &str = "recovery_addresses.json";
pub const CLASSIFIED_PARQUET: &str = "classified_senders.parquet";
pub const METADATA_FILE: &str = "run_metadata.json";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Value overflow while summing {0}")]
    Overflow(&'static str),

    #[error("Invalid record in {path:?}: {reason}")]
    InvalidRecord { path: PathBuf, reason: String },
}

/// Count and totals for one set of senders
fn totals<'a, I>(members: I, decimals: u8, what: &'static str) -> Result<ValueTotals, ReportError>
where
    I: IntoIterator<Item = &'a ClassifiedSender>,
{
    let mut count = 0usize;
    let mut total = U256::ZERO;
    for member in members {
        count += 1;
        total = total
            .checked_add(member.total_value_wei)
            .ok_or(ReportError::Overflow(what))?;
    }
    Ok(ValueTotals {
        count,
        total_value_wei: total,
        total_value: format_units(total, decimals),
    })
}

/// Summarize a category, with the EOA/contract split
pub fn summarize(
    members: &[ClassifiedSender],
    decimals: u8,
) -> Result<CategorySummary, ReportError> {
    let all = totals(members, decimals, "category")?;
    let eoa = totals(
        members.iter().filter(|m| m.kind == AddressKind::Eoa),
        decimals,
        "EOA slice",
    )?;
    let contract = totals(
        members.iter().filter(|m| m.kind == AddressKind::Contract),
        decimals,
        "contract slice",
    )?;

    Ok(CategorySummary {
        total_count: all.count,
        total_value_wei: all.total_value_wei,
        total_value: all.total_value,
        by_kind: KindBreakdown { eoa, contract },
    })
}

/// Everything a run persists, before it touches the disk
#[derive(Debug, Clone)]
pub struct ReportDatasets {
    pub custodian: CategoryDataset,
    pub non_custodian: CategoryDataset,
    pub normal: CategoryDataset,
    pub flagged: CategoryDataset,
    /// Non-custodians the screening stage never answered for
    pub unscreened: CategoryDataset,
    pub recovery: RecoveryFile,
}

fn dataset(
    category: &str,
    members: Vec<ClassifiedSender>,
    chain: &ChainConfig,
    status: RunStatus,
) -> Result<CategoryDataset, ReportError> {
    Ok(CategoryDataset {
        category: category.to_string(),
        status,
        chain_id: chain.chain_id,
        chain_name: chain.name.to_string(),
        native_symbol: chain.native_symbol.to_string(),
        summary: summarize(&members, chain.decimals)?,
        members,
    })
}

fn select<F>(senders: &[ClassifiedSender], pred: F) -> Vec<ClassifiedSender>
where
    F: Fn(&ClassifiedSender) -> bool,
{
    senders.iter().filter(|s| pred(s)).cloned().collect()
}

/// Partition final senders into the persisted datasets.
///
/// Input order is kept inside every partition.
pub fn build_datasets(
    senders: &[ClassifiedSender],
    chain: &ChainConfig,
    status: RunStatus,
) -> Result<ReportDatasets, ReportError> {
    let custodian = select(senders, |s| s.disposition == Disposition::Custodian);
    let non_custodian = select(senders, |s| {
        matches!(s.disposition, Disposition::Normal | Disposition::Flagged)
    });
    let normal = select(senders, |s| s.disposition == Disposition::Normal);
    let flagged = select(senders, |s| s.disposition == Disposition::Flagged);
    let unscreened = select(senders, |s| s.disposition == Disposition::NotCustodian);

    let recovery = RecoveryFile {
        status,
        addresses: normal
            .iter()
            .map(|s| RecoveryEntry {
                refund_address: s.address.clone(),
                category: s.disposition,
                kind: s.kind,
                total_wei: s.total_value_wei.to_string(),
            })
            .collect(),
    };

    Ok(ReportDatasets {
        custodian: dataset("custodian", custodian, chain, status)?,
        non_custodian: dataset("non_custodian", non_custodian, chain, status)?,
        normal: dataset("normal", normal, chain, status)?,
        flagged: dataset("flagged", flagged, chain, status)?,
        unscreened: dataset("unscreened", unscreened, chain, status)?,
        recovery,
    })
}

/// Files written by one report
#[derive(Debug, Clone, Default)]
pub struct ReportPaths {
    pub output_dir: PathBuf,
    pub files: Vec<PathBuf>,
    pub metadata_path: PathBuf,
}

fn write_json<T: Serialize>(
    dir: &Path,
    name: &'static str,
    value: &T,
) -> Result<&'static str, ReportError> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(dir.join(name), json)?;
    Ok(name)
}

/// `.{name}.{suffix}` next to `dir`
fn sibling_dir(dir: &Path, suffix: &str) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report".to_string());
    dir.with_file_name(format!(".{}.{}", name, suffix))
}

fn remove_stale_dir(dir: &Path) -> std::io::Result<()> {
    if dir.is_dir() {
        std::fs::remove_dir_all(dir)?;
    }
    Ok(())
}

/// Every report file, written into `dir`. Returns the file names.
fn write_files(
    dir: &Path,
    senders: &[ClassifiedSender],
    datasets: &ReportDatasets,
    metadata: &RunMetadata,
) -> Result<Vec<&'static str>, ReportError> {
    let mut files = vec![
        write_json(dir, CUSTODIAN_FILE, &datasets.custodian)?,
        write_json(dir, NON_CUSTODIAN_FILE, &datasets.non_custodian)?,
        write_json(dir, NORMAL_FILE, &datasets.normal)?,
        write_json(dir, FLAGGED_FILE, &datasets.flagged)?,
        write_json(dir, UNSCREENED_FILE, &datasets.unscreened)?,
        write_json(dir, RECOVERY_FILE, &datasets.recovery)?,
    ];

    write_classified_parquet(senders, &dir.join(CLASSIFIED_PARQUET))?;
    files.push(CLASSIFIED_PARQUET);

    metadata.save(&dir.join(METADATA_FILE))?;
    files.push(METADATA_FILE);

    Ok(files)
}

/// Swap `staging` in as `output_dir`, keeping the previous report until
/// the swap has succeeded.
fn publish(staging: &Path, output_dir: &Path) -> Result<(), ReportError> {
    let previous = sibling_dir(output_dir, "old");
    remove_stale_dir(&previous)?;

    let had_previous = output_dir.exists();
    if had_previous {
        std::fs::rename(output_dir, &previous)?;
    }

    if let Err(e) = std::fs::rename(staging, output_dir) {
        if had_previous {
            if let Err(restore) = std::fs::rename(&previous, output_dir) {
                warn!("Failed to restore previous report {:?}: {}", previous, restore);
            }
        }
        let _ = std::fs::remove_dir_all(staging);
        return Err(e.into());
    }

    if had_previous {
        if let Err(e) = std::fs::remove_dir_all(&previous) {
            warn!("Failed to remove previous report {:?}: {}", previous, e);
        }
    }
    Ok(())
}

/// Build and persist the full report for one run, metadata included.
///
/// Either every file lands in `output_dir` or none does.
pub fn write_report(
    output_dir: &Path,
    chain: &ChainConfig,
    senders: &[ClassifiedSender],
    metadata: &RunMetadata,
) -> Result<(ReportDatasets, ReportPaths), ReportError> {
    let datasets = build_datasets(senders, chain, metadata.status)?;

    if let Some(parent) = output_dir.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let staging = sibling_dir(output_dir, "staging");
    remove_stale_dir(&staging)?;
    std::fs::create_dir(&staging)?;

    let names = match write_files(&staging, senders, &datasets, metadata) {
        Ok(names) => names,
        Err(e) => {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }
    };
    publish(&staging, output_dir)?;

    log_summary(chain, &datasets);

    Ok((
        datasets,
        ReportPaths {
            output_dir: output_dir.to_path_buf(),
            files: names.into_iter().map(|name| output_dir.join(name)).collect(),
            metadata_path: output_dir.join(METADATA_FILE),
        },
    ))
}

/// Human-readable run summary
pub fn log_summary(chain: &ChainConfig, datasets: &ReportDatasets) {
    let line = |label: &str, summary: &CategorySummary| {
        info!(
            "  {:<14} {:>6} addresses  {} {} ({} EOA / {} contract)",
            label,
            summary.total_count,
            summary.total_value,
            chain.native_symbol,
            summary.by_kind.eoa.count,
            summary.by_kind.contract.count
        );
    };

    info!("Summary for {} ({}):", chain.name, chain.chain_id);
    line("custodian", &datasets.custodian.summary);
    line("non-custodian", &datasets.non_custodian.summary);
    line("normal", &datasets.normal.summary);
    line("flagged", &datasets.flagged.summary);
    line("unscreened", &datasets.unscreened.summary);
    info!(
        "  {} {} to recover across {} addresses",
        datasets.normal.summary.total_value,
        chain.native_symbol,
        datasets.recovery.addresses.len()
    );

    if datasets.normal.status == RunStatus::Aborted {
        warn!("Run aborted: datasets are partial and must not be used for refunds");
    }
    if !datasets.unscreened.members.is_empty() {
        warn!(
            "{} non-custodian senders were never screened and are left out of the recovery list",
            datasets.unscreened.members.len()
        );
    }
}

/// Write the flat table of all classified senders
pub fn write_classified_parquet(
    senders: &[ClassifiedSender],
    output_path: &Path,
) -> Result<(), ReportError> {
    let addresses: Vec<&str> = senders.iter().map(|s| s.address.as_str()).collect();
    let totals: Vec<String> = senders.iter().map(|s| s.total_value_wei.to_string()).collect();
    let counts: Vec<i64> = senders.iter().map(|s| s.transfer_count as i64).collect();
    let kinds: Vec<String> = senders.iter().map(|s| s.kind.to_string()).collect();
    let dispositions: Vec<String> = senders.iter().map(|s| s.disposition.to_string()).collect();
    let custodians: Vec<Option<&str>> = senders
        .iter()
        .map(|s| s.custodian_name.as_deref())
        .collect();

    let mut df = DataFrame::new(vec![
        Column::new("address".into(), addresses),
        Column::new("total_value_wei".into(), totals),
        Column::new("transfer_count".into(), counts),
        Column::new("kind".into(), kinds),
        Column::new("disposition".into(), dispositions),
        Column::new("custodian_name".into(), custodians),
    ])?;

    let file = std::fs::File::create(output_path)?;
    ParquetWriter::new(file)
        .with_compression(ParquetCompression::Zstd(None))
        .finish(&mut df)?;

    info!("Wrote {} classified senders to {:?}", senders.len(), output_path);
    Ok(())
}

fn parse_disposition(raw: &str) -> Option<Disposition> {
    match raw {
        "CUSTODIAN" => Some(Disposition::Custodian),
        "NOT_CUSTODIAN" => Some(Disposition::NotCustodian),
        "NORMAL" => Some(Disposition::Normal),
        "FLAGGED" => Some(Disposition::Flagged),
        _ => None,
    }
}

/// Read classified senders back from Parquet
pub fn read_classified_parquet(path: &Path) -> Result<Vec<ClassifiedSender>, ReportError> {
    let file = std::fs::File::open(path)?;
    let df = ParquetReader::new(file).finish()?;

    let addresses = df.column("address")?.str()?;
    let totals = df.column("total_value_wei")?.str()?;
    let counts = df.column("transfer_count")?.i64()?;
    let kinds = df.column("kind")?.str()?;
    let dispositions = df.column("disposition")?.str()?;
    let custodians = df.column("custodian_name")?.str()?;

    let invalid = |reason: String| ReportError::InvalidRecord {
        path: path.to_path_buf(),
        reason,
    };

    let mut result = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let raw_total = totals.get(i).unwrap_or("0");
        let total_value_wei = U256::from_str_radix(raw_total, 10)
            .map_err(|_| invalid(format!("row {}: bad total {:?}", i, raw_total)))?;
        let raw_disposition = dispositions.get(i).unwrap_or_default();
        let disposition = parse_disposition(raw_disposition)
            .ok_or_else(|| invalid(format!("row {}: bad disposition {:?}", i, raw_disposition)))?;
        let kind = match kinds.get(i) {
            Some("CONTRACT") => AddressKind::Contract,
            _ => AddressKind::Eoa,
        };

        result.push(ClassifiedSender {
            address: addresses.get(i).unwrap_or_default().to_string(),
            total_value_wei,
            transfer_count: counts.get(i).unwrap_or(0).max(0) as u64,
            kind,
            disposition,
            custodian_name: custodians.get(i).map(str::to_string),
        });
    }

    Ok(result)
}

/// Load a previously written recovery list
pub fn read_recovery_file(path: &Path) -> Result<RecoveryFile, ReportError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
