//! Static directory of known exchange (custodian) wallets.
//!
//! Loaded once per run, read-only afterwards. Two on-disk formats are
//! accepted, chosen by extension:
//! - `.json`: `{ "wallets": [ { "address": "0x..", "name": "Binance 14" } ] }`
//! - `.csv`: header `address,name`

use crate::ethereum::ValidatedAddress;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum CustodianError {
    #[error("IO error reading custodian directory {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed custodian JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed custodian CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Unsupported custodian directory format: {0:?}")]
    UnsupportedFormat(std::path::PathBuf),
}

#[derive(Debug, Deserialize)]
struct WalletFile {
    wallets: Vec<WalletEntry>,
}

#[derive(Debug, Deserialize)]
struct WalletEntry {
    address: String,
    name: String,
}

/// Lowercase address → custodian name
#[derive(Debug, Clone, Default)]
pub struct CustodianDirectory {
    wallets: HashMap<String, String>,
}

impl CustodianDirectory {
    pub fn load(path: &Path) -> Result<Self, CustodianError> {
        let contents = std::fs::read_to_string(path).map_err(|source| CustodianError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        let entries = match extension.as_deref() {
            Some("json") => serde_json::from_str::<WalletFile>(&contents)?.wallets,
            Some("csv") => {
                let mut reader = csv::ReaderBuilder::new()
                    .trim(csv::Trim::All)
                    .from_reader(contents.as_bytes());
                reader
                    .deserialize::<WalletEntry>()
                    .collect::<Result<Vec<_>, _>>()?
            }
            _ => return Err(CustodianError::UnsupportedFormat(path.to_path_buf())),
        };

        let directory = Self::from_entries(
            entries.into_iter().map(|e| (e.address, e.name)),
        );
        info!(
            "Loaded {} custodian wallets from {:?}",
            directory.len(),
            path
        );
        Ok(directory)
    }

    /// Build from `(address, name)` pairs; invalid addresses are skipped
    pub fn from_entries<I, A, N>(entries: I) -> Self
    where
        I: IntoIterator<Item = (A, N)>,
        A: AsRef<str>,
        N: Into<String>,
    {
        let mut wallets = HashMap::new();
        for (address, name) in entries {
            match ValidatedAddress::parse(address.as_ref()) {
                Ok(validated) => {
                    wallets.insert(validated.to_key(), name.into());
                }
                Err(e) => warn!("Skipping custodian entry: {}", e),
            }
        }
        Self { wallets }
    }

    /// Custodian name for a lowercase address
    pub fn lookup(&self, address: &str) -> Option<&str> {
        self.wallets.get(address).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }
}
