// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP delivery of event batches to the collector.
//!
//! One POST per batch, HTTP 200 is the only success, and every batch gets an
//! independent retry budget. Failures come back to the caller; the flusher
//! never drops or reorders records on its own.

use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::batch;
use crate::event::CanonicalEvent;

/// Wire envelope for one delivery request.
#[derive(Serialize)]
struct Envelope<'a> {
    events: &'a [CanonicalEvent],
}

/// Retry budget for one batch.
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    /// Up to N attempts, back to back.
    Immediate(u32),
    /// Up to N attempts with a fixed pause (milliseconds) between them.
    FixedDelay(u32, u64),
}

impl RetryStrategy {
    fn attempts(&self) -> u32 {
        match self {
            RetryStrategy::Immediate(attempts) | RetryStrategy::FixedDelay(attempts, _) => {
                (*attempts).max(1)
            }
        }
    }

    async fn pause(&self) {
        if let RetryStrategy::FixedDelay(_, delay_ms) = self {
            sleep(Duration::from_millis(*delay_ms)).await;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error("Failed to encode payload: {0}")]
    Payload(String),

    #[error("Collector error ({status:?}): {message}")]
    Collector {
        status: Option<StatusCode>,
        message: String,
    },
}

pub struct FlusherConfig {
    /// Full collector intake URL, e.g. `http://host:5002/api/print_events`.
    pub endpoint: String,
    pub batch_size: usize,
    pub request_timeout: Duration,
    pub retry_strategy: RetryStrategy,
    /// Pause between consecutive batch sends within one delivery.
    pub batch_pause: Duration,
}

/// Delivers canonical events to the collector.
pub struct EventFlusher {
    client: reqwest::Client,
    endpoint: String,
    batch_size: usize,
    request_timeout: Duration,
    retry_strategy: RetryStrategy,
    batch_pause: Duration,
}

impl EventFlusher {
    pub fn new(config: FlusherConfig) -> Self {
        EventFlusher {
            client: reqwest::Client::new(),
            endpoint: config.endpoint,
            batch_size: config.batch_size,
            request_timeout: config.request_timeout,
            retry_strategy: config.retry_strategy,
            batch_pause: config.batch_pause,
        }
    }

    /// Delivers all events, chunked into batches, in order.
    ///
    /// Stops at the first batch that exhausts its retry budget and returns
    /// that failure; earlier batches are already with the collector and are
    /// not resent within this call. Returns the number of events sent on full
    /// success.
    pub async fn deliver(&self, events: &[CanonicalEvent]) -> Result<usize, FlushError> {
        if events.is_empty() {
            return Ok(0);
        }

        let batches = batch::chunk(events, self.batch_size);
        let total = batches.len();
        for (index, slice) in batches.iter().enumerate() {
            info!(
                "sending batch {}/{} ({} events)",
                index + 1,
                total,
                slice.len()
            );
            self.send_batch(slice).await?;
            if index + 1 < total {
                sleep(self.batch_pause).await;
            }
        }

        Ok(events.len())
    }

    /// Sends one batch, retrying per the configured strategy.
    ///
    /// No pause follows the final attempt; the caller's loop cadence is the
    /// backoff at that point.
    pub async fn send_batch(&self, events: &[CanonicalEvent]) -> Result<(), FlushError> {
        if events.is_empty() {
            return Ok(());
        }

        let body = serde_json::to_vec(&Envelope { events })
            .map_err(|err| FlushError::Payload(err.to_string()))?;
        let attempts = self.retry_strategy.attempts();
        let mut last_error = FlushError::Collector {
            status: None,
            message: "no attempt made".to_string(),
        };

        for attempt in 1..=attempts {
            let response = self
                .client
                .post(&self.endpoint)
                .timeout(self.request_timeout)
                .header("Content-Type", "application/json")
                .body(body.clone())
                .send()
                .await;

            match response {
                Ok(response) if response.status() == StatusCode::OK => {
                    if let Ok(body) = response.json::<serde_json::Value>().await {
                        if let Some(message) = body.get("message").and_then(|m| m.as_str()) {
                            debug!("collector: {message}");
                        }
                    }
                    return Ok(());
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    error!("attempt {attempt}: collector returned {status}: {body}");
                    last_error = FlushError::Collector {
                        status: Some(status),
                        message: body,
                    };
                }
                Err(error) => {
                    warn!("attempt {attempt}: collector unreachable: {error}");
                    last_error = FlushError::Collector {
                        status: error.status(),
                        message: error.to_string(),
                    };
                }
            }

            if attempt < attempts {
                self.retry_strategy.pause().await;
            }
        }

        Err(last_error)
    }

    /// Non-fatal reachability check against the collector root.
    pub async fn probe(&self) -> bool {
        let root = match reqwest::Url::parse(&self.endpoint) {
            Ok(mut url) => {
                url.set_path("/");
                url.set_query(None);
                url
            }
            Err(error) => {
                warn!("unparsable collector URL {}: {error}", self.endpoint);
                return false;
            }
        };

        match self
            .client
            .get(root)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                warn!("collector probe failed: {error}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_strategy_attempts() {
        assert_eq!(RetryStrategy::Immediate(3).attempts(), 3);
        assert_eq!(RetryStrategy::FixedDelay(5, 100).attempts(), 5);
        // A zero budget still makes one attempt.
        assert_eq!(RetryStrategy::Immediate(0).attempts(), 1);
    }

    #[test]
    fn test_flush_error_display() {
        let error = FlushError::Collector {
            status: Some(StatusCode::INTERNAL_SERVER_ERROR),
            message: "boom".to_string(),
        };
        assert!(error.to_string().contains("500"));
        assert!(error.to_string().contains("boom"));
    }
}
