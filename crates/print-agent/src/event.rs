// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event types flowing through the pipeline: the raw log entry as reported by
//! the source, the composite identity used for deduplication, and the
//! normalized record shipped to the collector.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One print-service log entry as surfaced by the event source.
///
/// Field names mirror the JSON emitted by the `Get-WinEvent` query so a raw
/// line deserializes directly. Everything except the record id is optional on
/// the wire; missing fields default to empty strings and are repaired during
/// extraction.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "RecordId")]
    pub record_id: u64,
    #[serde(rename = "TimeCreated", default)]
    pub time_created: String,
    #[serde(rename = "UserId", default)]
    pub user_id: String,
    #[serde(rename = "MachineName", default)]
    pub machine_name: String,
    #[serde(rename = "Message", default)]
    pub message: String,
    #[serde(rename = "Level", default)]
    pub level: String,
}

/// Globally-stable identity of a raw event: `(machine, record id)`.
///
/// Rendered as `"{machine}_{record_id}"` in the persisted state file. Record
/// ids are monotonically increasing per host, so the pair is collision-free
/// across machines sharing one state file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventIdentity {
    pub machine: String,
    pub record_id: u64,
}

impl EventIdentity {
    pub fn new(machine: impl Into<String>, record_id: u64) -> Self {
        EventIdentity {
            machine: machine.into(),
            record_id,
        }
    }

    /// Parses a persisted identity string.
    ///
    /// Accepts the composite `"{machine}_{record_id}"` form and, for state
    /// files written by older agent versions, bare integers (attributed to
    /// `local_machine`). Machine names containing underscores are handled by
    /// falling back to the last underscore when the remainder after the first
    /// one is not numeric.
    pub fn parse(raw: &str, local_machine: &str) -> Option<Self> {
        if let Ok(record_id) = raw.parse::<u64>() {
            return Some(EventIdentity::new(local_machine, record_id));
        }
        if let Some((machine, rest)) = raw.split_once('_') {
            if !machine.is_empty() {
                if let Ok(record_id) = rest.parse::<u64>() {
                    return Some(EventIdentity::new(machine, record_id));
                }
            }
        }
        if let Some((machine, tail)) = raw.rsplit_once('_') {
            if !machine.is_empty() {
                if let Ok(record_id) = tail.parse::<u64>() {
                    return Some(EventIdentity::new(machine, record_id));
                }
            }
        }
        None
    }
}

impl fmt::Display for EventIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.machine, self.record_id)
    }
}

/// Normalized, collector-ready print-job record.
///
/// Serializes with exactly the wire field names the collector expects. The
/// event identity is intentionally not part of this type; it never leaves the
/// process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalEvent {
    pub date: String,
    pub user: String,
    pub machine: String,
    pub pages: u32,
    pub document: String,
    pub printer: String,
}

/// A canonical event waiting in the delivery buffer, paired with the identity
/// to confirm once its batch lands.
#[derive(Debug, Clone)]
pub struct BufferedEvent {
    pub identity: EventIdentity,
    pub event: CanonicalEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_identity_display() {
        let identity = EventIdentity::new("PC1", 42);
        assert_eq!(identity.to_string(), "PC1_42");
    }

    #[test]
    fn test_parse_composite() {
        let identity = EventIdentity::parse("PC1_42", "OTHER").unwrap();
        assert_eq!(identity, EventIdentity::new("PC1", 42));
    }

    #[test]
    fn test_parse_legacy_bare_integer_uses_local_machine() {
        let identity = EventIdentity::parse("42", "PC1").unwrap();
        assert_eq!(identity, EventIdentity::new("PC1", 42));
    }

    #[test]
    fn test_parse_machine_with_underscores() {
        let identity = EventIdentity::parse("LAB_PC_7_42", "OTHER").unwrap();
        assert_eq!(identity, EventIdentity::new("LAB_PC_7", 42));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(EventIdentity::parse("", "PC1").is_none());
        assert!(EventIdentity::parse("no-separator", "PC1").is_none());
        assert!(EventIdentity::parse("PC1_notanumber", "PC1").is_none());
        assert!(EventIdentity::parse("_42", "PC1").is_none());
    }

    #[test]
    fn test_raw_event_deserializes_powershell_json() {
        let line = r#"{"RecordId":307,"TimeCreated":"2025-06-01 10:30:00","UserId":"alice","MachineName":"PC1","Message":"Document printed","Level":"Information"}"#;
        let raw: RawEvent = serde_json::from_str(line).unwrap();
        assert_eq!(raw.record_id, 307);
        assert_eq!(raw.machine_name, "PC1");
    }

    #[test]
    fn test_raw_event_tolerates_missing_fields() {
        let raw: RawEvent = serde_json::from_str(r#"{"RecordId":1}"#).unwrap();
        assert!(raw.message.is_empty());
        assert!(raw.machine_name.is_empty());
    }

    #[test]
    fn test_canonical_event_wire_field_names() {
        let event = CanonicalEvent {
            date: "2025-06-01 10:30:00".to_string(),
            user: "alice".to_string(),
            machine: "PC1".to_string(),
            pages: 7,
            document: "report.docx".to_string(),
            printer: "HP-LaserJet".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["user"], "alice");
        assert_eq!(value["machine"], "PC1");
        assert_eq!(value["pages"], 7);
        assert_eq!(value["document"], "report.docx");
        assert_eq!(value["printer"], "HP-LaserJet");
        assert_eq!(value["date"], "2025-06-01 10:30:00");
    }

    proptest! {
        #[test]
        fn prop_identity_round_trips(machine in "[A-Za-z][A-Za-z0-9_-]{0,20}", record_id in 0u64..u64::MAX) {
            let identity = EventIdentity::new(machine, record_id);
            let parsed = EventIdentity::parse(&identity.to_string(), "LOCAL").unwrap();
            prop_assert_eq!(parsed, identity);
        }

        #[test]
        fn prop_identity_injective_per_machine(a in 0u64..1_000_000, b in 0u64..1_000_000) {
            prop_assume!(a != b);
            let lhs = EventIdentity::new("PC1", a);
            let rhs = EventIdentity::new("PC1", b);
            prop_assert_ne!(lhs.to_string(), rhs.to_string());
        }
    }
}
