//! Data schemas for the recovery pipeline.
//!
//! This module is the canonical definition of every record that flows
//! between stages and of every dataset written to disk.

use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version for tracking changes to the persisted datasets
pub const SCHEMA_VERSION: &str = "1.0.0";

// ============================================================================
// PART A: Ledger records
// ============================================================================

/// Transfer record as delivered by the ledger query service.
///
/// Values stay in their wire form; the aggregator is responsible for
/// rejecting anything malformed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    #[serde(default)]
    pub hash: String,

    pub from: String,

    #[serde(default)]
    pub to: String,

    /// Amount in wei, base-10
    pub value: String,

    /// "0" for a successful transaction
    pub is_error: String,

    #[serde(default)]
    pub block_number: String,
}

impl TransferRecord {
    pub fn is_failed(&self) -> bool {
        self.is_error.trim() != "0"
    }
}

// ============================================================================
// PART B: Per-sender records
// ============================================================================

/// Running totals for one sender (lowercase address)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderAggregate {
    pub address: String,
    pub total_value_wei: U256,
    pub transfer_count: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum AddressKind {
    /// Externally Owned Account
    #[default]
    Eoa,
    /// Smart Contract
    Contract,
}

impl std::fmt::Display for AddressKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressKind::Eoa => write!(f, "EOA"),
            AddressKind::Contract => write!(f, "CONTRACT"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    /// Known exchange-operated wallet
    Custodian,
    /// Not in the custodian directory, awaiting screening
    NotCustodian,
    /// Screened and not flagged
    Normal,
    /// Matched by the denylist service
    Flagged,
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Disposition::Custodian => write!(f, "CUSTODIAN"),
            Disposition::NotCustodian => write!(f, "NOT_CUSTODIAN"),
            Disposition::Normal => write!(f, "NORMAL"),
            Disposition::Flagged => write!(f, "FLAGGED"),
        }
    }
}

/// Terminal per-sender record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassifiedSender {
    pub address: String,

    /// Total received from this sender in wei (decimal string for u256)
    #[serde(with = "u256_decimal")]
    pub total_value_wei: U256,

    pub transfer_count: u64,

    pub kind: AddressKind,

    pub disposition: Disposition,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custodian_name: Option<String>,
}

// ============================================================================
// PART C: Persisted datasets
// ============================================================================

/// Terminal status of a classification stage or of the whole run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StageStatus {
    Completed,
    Aborted { failed_address: String },
    Skipped,
}

impl StageStatus {
    pub fn is_aborted(&self) -> bool {
        matches!(self, StageStatus::Aborted { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Aborted,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Count and value totals for one slice of senders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueTotals {
    pub count: usize,

    #[serde(with = "u256_decimal")]
    pub total_value_wei: U256,

    /// `total_value_wei` rendered in the chain's native unit
    pub total_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindBreakdown {
    pub eoa: ValueTotals,
    pub contract: ValueTotals,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub total_count: usize,

    #[serde(with = "u256_decimal")]
    pub total_value_wei: U256,

    pub total_value: String,

    pub by_kind: KindBreakdown,
}

/// One persisted category partition (custodian, non-custodian, normal, flagged)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryDataset {
    pub category: String,
    pub status: RunStatus,
    pub chain_id: u64,
    pub chain_name: String,
    pub native_symbol: String,
    pub summary: CategorySummary,
    pub members: Vec<ClassifiedSender>,
}

/// Minimal entry consumed by the downstream recovery tooling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryEntry {
    pub refund_address: String,
    pub category: Disposition,
    pub kind: AddressKind,
    /// Wei as a decimal string. The refund scripts read it as `total_eth`.
    #[serde(rename = "total_eth")]
    pub total_wei: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryFile {
    /// An aborted list holds only senders screened before the abort
    pub status: RunStatus,
    pub addresses: Vec<RecoveryEntry>,
}

// ============================================================================
// Metadata Schema
// ============================================================================

/// Run metadata for reproducibility and auditing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub schema_version: String,
    pub run_timestamp: DateTime<Utc>,
    pub chain_id: u64,
    pub chain_name: String,
    pub target_address: String,
    pub start_block: u64,
    pub end_block: u64,
    pub status: RunStatus,
    pub address_kind_stage: StageStatus,
    pub screening_stage: StageStatus,
    pub record_counts: RecordCounts,
    pub git_commit: Option<String>,
    pub pipeline_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RecordCounts {
    pub transfers_fetched: usize,
    pub senders: usize,
    pub custodian: usize,
    pub normal: usize,
    pub flagged: usize,
    /// Non-custodians left unscreened by an aborted screening stage
    #[serde(default)]
    pub unscreened: usize,
}

impl RunMetadata {
    pub fn save(&self, path: &std::path::Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }

    pub fn load(path: &std::path::Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

pub fn get_git_commit() -> Option<String> {
    std::process::Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                String::from_utf8(output.stdout)
                    .ok()
                    .map(|s| s.trim().to_string())
            } else {
                None
            }
        })
}

/// Serialize `U256` as a base-10 string so large totals survive JSON consumers
pub(crate) mod u256_decimal {
    use alloy_primitives::U256;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        U256::from_str_radix(&raw, 10).map_err(D::Error::custom)
    }
}
