// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cluster-wide transaction identifiers
//!
//! A [`TransactionId`] is the pair `(coordinator, identifier)`: the
//! coordinator names the registry that minted the id, the identifier is
//! unique within that registry's allocation stream. The wire form is
//! `"<coordinator>-<identifier>"`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a transaction across the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TransactionId {
    coordinator: u64,
    identifier: u64,
}

/// Error returned by the strict [`FromStr`] parser
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed transaction id '{0}', expected '<coordinator>-<identifier>'")]
pub struct ParseTransactionIdError(pub String);

impl TransactionId {
    /// The reserved "no transaction" value
    pub const ZERO: TransactionId = TransactionId {
        coordinator: 0,
        identifier: 0,
    };

    pub const fn new(coordinator: u64, identifier: u64) -> Self {
        Self {
            coordinator,
            identifier,
        }
    }

    pub fn coordinator(&self) -> u64 {
        self.coordinator
    }

    pub fn identifier(&self) -> u64 {
        self.identifier
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Parse the wire form, yielding [`TransactionId::ZERO`] for anything malformed
    pub fn parse_or_zero(text: &str) -> Self {
        text.parse().unwrap_or(Self::ZERO)
    }
}

/// Both parts must be non-empty runs of ASCII digits that fit into a u64.
fn parse_part(part: &str) -> Option<u64> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

impl FromStr for TransactionId {
    type Err = ParseTransactionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseTransactionIdError(s.to_string());
        let (coordinator, identifier) = s.split_once('-').ok_or_else(malformed)?;
        Ok(Self {
            coordinator: parse_part(coordinator).ok_or_else(malformed)?,
            identifier: parse_part(identifier).ok_or_else(malformed)?,
        })
    }
}

impl From<&str> for TransactionId {
    fn from(text: &str) -> Self {
        Self::parse_or_zero(text)
    }
}

impl From<Option<&str>> for TransactionId {
    fn from(text: Option<&str>) -> Self {
        text.map(Self::parse_or_zero).unwrap_or(Self::ZERO)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.coordinator, self.identifier)
    }
}

impl Serialize for TransactionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TransactionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_ids() {
        let id = TransactionId::from("42-86");
        assert_eq!(id.coordinator(), 42);
        assert_eq!(id.identifier(), 86);

        let id = TransactionId::from("32343-23432");
        assert_eq!(id, TransactionId::new(32343, 23432));
        assert_eq!(id.to_string(), "32343-23432");
    }

    #[test]
    fn test_malformed_ids_become_zero() {
        for text in [
            "-23432",
            "8987",
            "",
            "32343-",
            "3fred4-23432",
            "32343-23422boss",
            "1-2-3",
            "+1-2",
            " 1-2",
            "99999999999999999999-1",
        ] {
            assert_eq!(TransactionId::from(text), TransactionId::ZERO, "{text:?}");
        }
        assert_eq!(TransactionId::from(None), TransactionId::ZERO);
    }

    #[test]
    fn test_strict_parse_reports_input() {
        let err = "8987".parse::<TransactionId>().unwrap_err();
        assert_eq!(err.0, "8987");
    }

    #[test]
    fn test_round_trip_through_string_and_json() {
        let id = TransactionId::new(u64::MAX, 4);
        assert_eq!(TransactionId::from(id.to_string().as_str()), id);

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}-4\"", u64::MAX));
        assert_eq!(serde_json::from_str::<TransactionId>(&json).unwrap(), id);
    }

    #[test]
    fn test_zero_is_default() {
        assert!(TransactionId::default().is_zero());
        assert!(TransactionId::from("0-0").is_zero());
        assert!(!TransactionId::new(0, 4).is_zero());
    }
}
