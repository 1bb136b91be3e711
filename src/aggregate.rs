//! Sender aggregation.
//!
//! Folds the raw transfer history of the target address into one
//! [`SenderAggregate`] per sender. All arithmetic is on `U256`.

use crate::ethereum::{normalize_address, parse_wei};
use crate::schemas::{SenderAggregate, TransferRecord};
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum AggregationError {
    #[error("Malformed value {value:?} in transaction {hash}")]
    MalformedValue { hash: String, value: String },

    #[error("Value overflow while summing transfers from {0}")]
    Overflow(String),
}

/// Filter accounting for one aggregation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationStats {
    pub records: usize,
    pub kept: usize,
    pub skipped_zero_value: usize,
    pub skipped_failed: usize,
    pub skipped_other_destination: usize,
}

/// Aggregate inbound transfers to `target` by sender.
///
/// Zero-value, failed, and foreign-destination records are skipped. A
/// non-numeric value anywhere past those filters fails the whole pass.
pub fn aggregate_transfers(
    records: &[TransferRecord],
    target: &str,
) -> Result<(HashMap<String, SenderAggregate>, AggregationStats), AggregationError> {
    let target = normalize_address(target);
    let mut senders: HashMap<String, SenderAggregate> = HashMap::new();
    let mut stats = AggregationStats {
        records: records.len(),
        ..AggregationStats::default()
    };

    for record in records {
        if record.value.trim() == "0" {
            stats.skipped_zero_value += 1;
            continue;
        }
        if record.is_failed() {
            stats.skipped_failed += 1;
            continue;
        }
        if normalize_address(&record.to) != target {
            stats.skipped_other_destination += 1;
            continue;
        }

        let value = parse_wei(&record.value).ok_or_else(|| AggregationError::MalformedValue {
            hash: record.hash.clone(),
            value: record.value.clone(),
        })?;
        // "000" and friends
        if value.is_zero() {
            stats.skipped_zero_value += 1;
            continue;
        }

        let sender = normalize_address(&record.from);
        let entry = senders
            .entry(sender.clone())
            .or_insert_with(|| SenderAggregate {
                address: sender.clone(),
                total_value_wei: Default::default(),
                transfer_count: 0,
            });
        entry.total_value_wei = entry
            .total_value_wei
            .checked_add(value)
            .ok_or(AggregationError::Overflow(sender))?;
        entry.transfer_count += 1;
        stats.kept += 1;
    }

    info!(
        "Aggregation: {} records -> {} kept from {} senders, filtered: {} zero-value, {} failed, {} other-destination",
        stats.records,
        stats.kept,
        senders.len(),
        stats.skipped_zero_value,
        stats.skipped_failed,
        stats.skipped_other_destination
    );

    Ok((senders, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    const TARGET: &str = "0x49048044D57e1C92A77f79988d21Fa8fAF74E97e";

    fn transfer(from: &str, to: &str, value: &str, is_error: &str) -> TransferRecord {
        TransferRecord {
            hash: format!("0x{}{}", from, value),
            from: from.to_string(),
            to: to.to_string(),
            value: value.to_string(),
            is_error: is_error.to_string(),
            block_number: "1".to_string(),
        }
    }

    #[test]
    fn test_errored_transfers_are_excluded() {
        let records = vec![
            transfer("0xA", TARGET, "5", "0"),
            transfer("0xA", TARGET, "3", "0"),
            transfer("0xB", TARGET, "10", "1"),
        ];

        let (senders, stats) = aggregate_transfers(&records, TARGET).unwrap();

        assert_eq!(senders.len(), 1);
        let a = &senders["0xa"];
        assert_eq!(a.total_value_wei, U256::from(8u64));
        assert_eq!(a.transfer_count, 2);
        assert!(!senders.contains_key("0xb"));
        assert_eq!(stats.skipped_failed, 1);
        assert_eq!(stats.kept, 2);
    }

    #[test]
    fn test_filters_and_case_normalization() {
        let records = vec![
            transfer("0xAbC", &TARGET.to_lowercase(), "7", "0"),
            transfer("0xabc", &TARGET.to_uppercase().replace("0X", "0x"), "1", "0"),
            transfer("0xabc", TARGET, "0", "0"),
            transfer("0xabc", "0x0000000000000000000000000000000000000001", "100", "0"),
            transfer("0xdef", TARGET, "000", "0"),
        ];

        let (senders, stats) = aggregate_transfers(&records, TARGET).unwrap();

        assert_eq!(senders.len(), 1);
        assert_eq!(senders["0xabc"].total_value_wei, U256::from(8u64));
        assert_eq!(senders["0xabc"].transfer_count, 2);
        assert_eq!(stats.skipped_zero_value, 2);
        assert_eq!(stats.skipped_other_destination, 1);
    }

    #[test]
    fn test_sum_is_preserved_beyond_u64() {
        let big = "50000000000000000000000"; // 50k ETH, > u64::MAX wei
        let records = vec![
            transfer("0x1", TARGET, big, "0"),
            transfer("0x1", TARGET, big, "0"),
            transfer("0x2", TARGET, "18446744073709551615", "0"),
            transfer("0x3", TARGET, "999", "1"),
        ];

        let (senders, _) = aggregate_transfers(&records, TARGET).unwrap();

        let total: U256 = senders.values().map(|s| s.total_value_wei).sum();
        let expected = U256::from_str_radix(big, 10).unwrap() * U256::from(2u64)
            + U256::from(u64::MAX);
        assert_eq!(total, expected);
        assert_eq!(
            senders["0x1"].total_value_wei.to_string(),
            "100000000000000000000000"
        );
    }

    #[test]
    fn test_malformed_value_fails_aggregation() {
        let records = vec![
            transfer("0x1", TARGET, "12", "0"),
            transfer("0x2", TARGET, "1.5e18", "0"),
        ];

        let err = aggregate_transfers(&records, TARGET).unwrap_err();
        assert!(matches!(err, AggregationError::MalformedValue { ref value, .. } if value == "1.5e18"));
    }

    #[test]
    fn test_empty_input() {
        let (senders, stats) = aggregate_transfers(&[], TARGET).unwrap();
        assert!(senders.is_empty());
        assert_eq!(stats, AggregationStats::default());
    }
}
