//! Sender categorization.
//!
//! Two passes. The directory pass marks known exchange wallets CUSTODIAN
//! and everything else NOT_CUSTODIAN; the screening pass resolves every
//! screened NOT_CUSTODIAN entry to FLAGGED or NORMAL. Entries the screening
//! stage never answered for stay NOT_CUSTODIAN.

use crate::address_kind::AddressKinds;
use crate::custodians::CustodianDirectory;
use crate::schemas::{ClassifiedSender, Disposition, SenderAggregate};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::info;

/// Result of the directory pass
#[derive(Debug, Clone)]
pub struct Categorization {
    /// All senders, highest total first
    pub senders: Vec<ClassifiedSender>,
    /// NOT_CUSTODIAN addresses in the same order as `senders`
    pub screening_candidates: Vec<String>,
}

/// Total descending, then address ascending
fn by_value_desc(a: &ClassifiedSender, b: &ClassifiedSender) -> Ordering {
    b.total_value_wei
        .cmp(&a.total_value_wei)
        .then_with(|| a.address.cmp(&b.address))
}

pub fn categorize(
    aggregates: &HashMap<String, SenderAggregate>,
    directory: &CustodianDirectory,
    kinds: &AddressKinds,
) -> Categorization {
    let mut senders: Vec<ClassifiedSender> = aggregates
        .values()
        .map(|aggregate| {
            let custodian_name = directory.lookup(&aggregate.address).map(str::to_string);
            let disposition = if custodian_name.is_some() {
                Disposition::Custodian
            } else {
                Disposition::NotCustodian
            };
            ClassifiedSender {
                address: aggregate.address.clone(),
                total_value_wei: aggregate.total_value_wei,
                transfer_count: aggregate.transfer_count,
                kind: kinds.kind_of(&aggregate.address),
                disposition,
                custodian_name,
            }
        })
        .collect();
    senders.sort_by(by_value_desc);

    let screening_candidates: Vec<String> = senders
        .iter()
        .filter(|s| s.disposition == Disposition::NotCustodian)
        .map(|s| s.address.clone())
        .collect();

    info!(
        "Categorized {} senders: {} custodian, {} to screen",
        senders.len(),
        senders.len() - screening_candidates.len(),
        screening_candidates.len()
    );

    Categorization {
        senders,
        screening_candidates,
    }
}

/// Resolve NOT_CUSTODIAN entries against the screening answers.
///
/// Custodians pass through untouched. A sender missing from `screened`
/// keeps NOT_CUSTODIAN, so an aborted screening stage never yields NORMAL
/// for an address it did not check. Applying the same sets twice yields
/// the same result.
pub fn apply_screening(
    senders: Vec<ClassifiedSender>,
    flagged: &HashSet<String>,
    screened: &HashSet<String>,
) -> Vec<ClassifiedSender> {
    senders
        .into_iter()
        .map(|mut sender| {
            if sender.disposition != Disposition::Custodian {
                sender.disposition = if flagged.contains(&sender.address) {
                    Disposition::Flagged
                } else if screened.contains(&sender.address) {
                    Disposition::Normal
                } else {
                    Disposition::NotCustodian
                };
            }
            sender
        })
        .collect()
}
