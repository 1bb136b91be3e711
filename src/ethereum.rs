//! Ethereum address validation and value formatting.
//!
//! Addresses are keyed lowercase everywhere in the pipeline; the EIP-55
//! checksum form is only used for display.

use alloy_primitives::{Address, U256};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Strict pattern for a full 0x-prefixed Ethereum address
static ETH_ADDRESS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^0[xX][a-fA-F0-9]{40}$").expect("Invalid regex pattern")
});

#[derive(Error, Debug)]
pub enum AddressError {
    #[error("Invalid address format: {0}")]
    InvalidFormat(String),

    #[error("Address too short or long: {0}")]
    InvalidLength(String),
}

/// Validated Ethereum address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValidatedAddress(Address);

impl ValidatedAddress {
    /// Parse a 0x-prefixed 40-hex-digit address
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let trimmed = input.trim();

        if trimmed.len() != 42 {
            return Err(AddressError::InvalidLength(input.to_string()));
        }
        if !ETH_ADDRESS_PATTERN.is_match(trimmed) {
            return Err(AddressError::InvalidFormat(input.to_string()));
        }

        let address: Address = trimmed
            .parse()
            .map_err(|_| AddressError::InvalidFormat(input.to_string()))?;

        Ok(Self(address))
    }

    /// EIP-55 checksummed string representation
    pub fn to_checksum(&self) -> String {
        self.0.to_checksum(None)
    }

    /// Lowercase 0x-prefixed key used by every lookup table in the pipeline
    pub fn to_key(&self) -> String {
        format!("{:#x}", self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl std::fmt::Display for ValidatedAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_checksum())
    }
}

/// Case-normalize an address string without validating it.
///
/// Ledger records are opaque; a sender that fails validation is still a
/// distinct sender and must keep its own aggregate.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Parse a base-10 wei amount as delivered by the ledger service.
pub fn parse_wei(value: &str) -> Option<U256> {
    let trimmed = value.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    U256::from_str_radix(trimmed, 10).ok()
}

/// Render a base-unit amount as a fixed-point decimal string.
///
/// Trailing fractional zeros are trimmed, but at least one fractional
/// digit is always kept ("1.0", "0.000000000000000001").
pub fn format_units(value: U256, decimals: u8) -> String {
    let scale = U256::from(10u64).pow(U256::from(decimals));
    let (whole, fraction) = value.div_rem(scale);

    if decimals == 0 {
        return whole.to_string();
    }

    let fraction = format!("{:0>width$}", fraction.to_string(), width = decimals as usize);
    let trimmed = fraction.trim_end_matches('0');
    let fraction = if trimmed.is_empty() { "0" } else { trimmed };

    format!("{}.{}", whole, fraction)
}
