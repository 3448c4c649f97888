// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use crate::flusher::FlushError;

/// Errors surfaced by the agent core.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Event source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Failed to persist state file {path}: {source}")]
    StatePersist {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to encode state: {0}")]
    StateEncode(#[from] serde_json::Error),

    #[error("Delivery failed: {0}")]
    Delivery(#[from] FlushError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = AgentError::InvalidConfig("collector URL cannot be empty".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: collector URL cannot be empty"
        );
    }

    #[test]
    fn test_state_persist_display() {
        let error = AgentError::StatePersist {
            path: PathBuf::from("processed_events.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(error.to_string().contains("processed_events.json"));
    }
}
