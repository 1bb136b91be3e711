//! Denylist screening stage.
//!
//! Each non-custodian sender is posted to the screening service. A
//! non-empty match list flags the address; an empty list or a 404 clears
//! it; anything else is a retryable failure handled by the engine.

use crate::classify::{BatchClassifier, ClassificationEndpoint, EndpointError, Lookup};
use crate::config::DenylistConfig;
use crate::schemas::StageStatus;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct ScreeningRequest<'a> {
    address: &'a str,
}

/// Interpret one screening response.
///
/// `Found(true)` means flagged, `Found(false)` screened clean, `Absent`
/// means the service has no record of the address.
pub fn interpret_response(status: u16, body: &str) -> Result<Lookup<bool>, EndpointError> {
    match status {
        200 => {
            let parsed: serde_json::Value = serde_json::from_str(body)
                .map_err(|e| EndpointError::InvalidResponse(format!("undecodable body: {}", e)))?;
            let flagged = parsed.as_array().is_some_and(|matches| !matches.is_empty());
            Ok(Lookup::Found(flagged))
        }
        404 => Ok(Lookup::Absent),
        other => Err(EndpointError::Status(other)),
    }
}

/// HTTP client for the screening service
pub struct DenylistClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl DenylistClient {
    pub fn new(config: &DenylistConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("eth-recovery-pipeline/1.0")
            .build()?;

        Ok(Self {
            client,
            url: config.url(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ClassificationEndpoint for DenylistClient {
    type Output = bool;

    fn name(&self) -> &'static str {
        "denylist"
    }

    async fn submit(&self, address: &str) -> Result<Lookup<bool>, EndpointError> {
        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .json(&ScreeningRequest { address })
            .send()
            .await
            .map_err(|e| EndpointError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| EndpointError::Transport(e.to_string()))?;

        let lookup = interpret_response(status, &body)?;
        if lookup == Lookup::Found(true) {
            warn!("FLAGGED: {}", address);
        }
        Ok(lookup)
    }
}

/// Flagged addresses plus how the stage ended
#[derive(Debug)]
pub struct ScreeningOutcome {
    /// Lowercase addresses matched by the service
    pub flagged: HashSet<String>,
    pub status: StageStatus,
    /// Addresses that received an answer (flagged, clean or absent)
    pub screened: HashSet<String>,
}

/// Screen `candidates` against the denylist service.
pub async fn screen_addresses<E>(
    engine: &BatchClassifier,
    service: Arc<E>,
    candidates: &[String],
) -> ScreeningOutcome
where
    E: ClassificationEndpoint<Output = bool>,
{
    let policy = engine.policy();
    info!(
        "Checking denylist for {} addresses ({} per batch, {}ms between batches)",
        candidates.len(),
        policy.batch_size,
        policy.inter_batch_delay_ms
    );

    let outcome = engine.run(service, candidates).await;

    let mut flagged = HashSet::new();
    let mut screened = HashSet::with_capacity(outcome.results.len());
    for (address, lookup) in outcome.results {
        let address = address.to_lowercase();
        if lookup == Lookup::Found(true) {
            flagged.insert(address.clone());
        }
        screened.insert(address);
    }

    match &outcome.status {
        StageStatus::Aborted { failed_address } => warn!(
            "Denylist screening aborted at {}: {} of {} addresses screened, {} flagged",
            failed_address,
            screened.len(),
            candidates.len(),
            flagged.len()
        ),
        _ => info!(
            "Denylist complete: {}/{} addresses flagged",
            flagged.len(),
            candidates.len()
        ),
    }

    ScreeningOutcome {
        flagged,
        status: outcome.status,
        screened,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::tests::{fast_policy, Script, ScriptedEndpoint};
    use crate::config::ExhaustionPolicy;

    #[test]
    fn test_interpret_response() {
        assert_eq!(
            interpret_response(200, r#"[{"entity":"mixer"}]"#),
            Ok(Lookup::Found(true))
        );
        assert_eq!(interpret_response(200, "[]"), Ok(Lookup::Found(false)));
        assert_eq!(interpret_response(200, "{}"), Ok(Lookup::Found(false)));
        assert_eq!(interpret_response(404, ""), Ok(Lookup::Absent));
        assert_eq!(interpret_response(500, ""), Err(EndpointError::Status(500)));
        assert_eq!(interpret_response(429, "slow down"), Err(EndpointError::Status(429)));
        assert!(matches!(
            interpret_response(200, "<html>"),
            Err(EndpointError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_screening_collects_flagged_lowercase() {
        let service = Arc::new(ScriptedEndpoint::new(vec![
            ("0xAA", Script::FailThenFound(0, true)),
            ("0xbb", Script::FailThenFound(0, false)),
            ("0xcc", Script::Absent),
        ]));
        let engine = BatchClassifier::new(fast_policy(10, ExhaustionPolicy::Abort));
        let candidates = vec!["0xAA".to_string(), "0xbb".to_string(), "0xcc".to_string()];

        let outcome = screen_addresses(&engine, Arc::clone(&service), &candidates).await;

        assert_eq!(outcome.status, StageStatus::Completed);
        assert_eq!(outcome.flagged, HashSet::from(["0xaa".to_string()]));
        assert_eq!(outcome.screened.len(), 3);
    }

    #[tokio::test]
    async fn test_screening_abort_reports_partial_results() {
        let service = Arc::new(ScriptedEndpoint::new(vec![
            ("0x01", Script::FailThenFound(0, true)),
            ("0x02", Script::AlwaysFail),
            ("0x03", Script::FailThenFound(0, true)),
        ]));
        let engine = BatchClassifier::new(fast_policy(2, ExhaustionPolicy::Abort));
        let candidates = vec!["0x01".to_string(), "0x02".to_string(), "0x03".to_string()];

        let outcome = screen_addresses(&engine, Arc::clone(&service), &candidates).await;

        assert!(outcome.status.is_aborted());
        assert!(outcome.flagged.contains("0x01"));
        assert!(!outcome.flagged.contains("0x03"));
        assert!(!outcome.screened.contains("0x03"));
        assert_eq!(service.calls_for("0x03"), 0);
    }
}
