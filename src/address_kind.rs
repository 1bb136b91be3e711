//! Address-type stage: EOA vs. contract for every sender.
//!
//! A missing, erroring or exhausted lookup resolves to EOA. This is the
//! fallback the recovery process has always used; it under-reports
//! contracts when the oracle is unhealthy, so the count of defaulted
//! addresses is logged.

use crate::classify::{BatchClassifier, ClassificationEndpoint, EndpointError, Lookup};
use crate::rpc::{EtherscanClient, RpcError};
use crate::schemas::{AddressKind, StageStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Kind implied by raw `eth_getCode` output
pub fn kind_from_code(code: &str) -> AddressKind {
    let code = code.trim();
    let body = code
        .strip_prefix("0x")
        .or_else(|| code.strip_prefix("0X"))
        .unwrap_or(code);

    if body.is_empty() || body.bytes().all(|b| b == b'0') {
        AddressKind::Eoa
    } else {
        AddressKind::Contract
    }
}

impl From<RpcError> for EndpointError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Http(e) if e.is_timeout() => EndpointError::Transport(format!("timeout: {}", e)),
            RpcError::Http(e) => EndpointError::Transport(e.to_string()),
            RpcError::Status(code) => EndpointError::Status(code),
            other => EndpointError::InvalidResponse(other.to_string()),
        }
    }
}

#[async_trait]
impl ClassificationEndpoint for EtherscanClient {
    type Output = AddressKind;

    fn name(&self) -> &'static str {
        "address-type"
    }

    async fn submit(&self, address: &str) -> Result<Lookup<AddressKind>, EndpointError> {
        let code = self.get_code(address).await?;
        Ok(Lookup::Found(kind_from_code(&code)))
    }
}

/// Resolved kinds plus how the stage ended
#[derive(Debug)]
pub struct AddressKinds {
    pub kinds: HashMap<String, AddressKind>,
    pub status: StageStatus,
    /// Addresses that fell back to EOA without an answer
    pub defaulted: usize,
}

impl AddressKinds {
    pub fn kind_of(&self, address: &str) -> AddressKind {
        self.kinds.get(address).copied().unwrap_or_default()
    }
}

/// Resolve the kind of every address. Never fails.
pub async fn resolve_address_kinds<E>(
    engine: &BatchClassifier,
    oracle: Arc<E>,
    addresses: &[String],
) -> AddressKinds
where
    E: ClassificationEndpoint<Output = AddressKind>,
{
    info!("Checking address types for {} addresses", addresses.len());

    let outcome = engine.run(oracle, addresses).await;

    let mut kinds = HashMap::with_capacity(addresses.len());
    let mut defaulted = 0usize;
    for address in addresses {
        let kind = match outcome.results.get(address) {
            Some(Lookup::Found(kind)) => *kind,
            Some(Lookup::Absent) | None => {
                defaulted += 1;
                AddressKind::Eoa
            }
        };
        kinds.insert(address.clone(), kind);
    }

    if outcome.status.is_aborted() {
        warn!(
            "Address-type stage aborted; {} unresolved addresses default to EOA",
            defaulted
        );
    } else if defaulted > 0 {
        warn!(
            "{} addresses could not be checked and default to EOA",
            defaulted
        );
    }

    let contract_count = kinds.values().filter(|k| **k == AddressKind::Contract).count();
    info!(
        "Address types complete: {} EOAs, {} contracts",
        kinds.len() - contract_count,
        contract_count
    );

    AddressKinds {
        kinds,
        status: outcome.status,
        defaulted,
    }
}
