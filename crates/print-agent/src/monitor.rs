// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The agent loop: polling, buffering, delivery, and state persistence.
//!
//! A single logical worker drives everything sequentially. The loop is
//! expressed as public step functions ([`PrintMonitor::run_catch_up`],
//! [`PrintMonitor::tick`]) plus a cancellation-driven scheduler
//! ([`PrintMonitor::run`]) with distinct tick and error-backoff intervals, so
//! the steps are testable without the timer.

use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::AgentError;
use crate::event::{BufferedEvent, CanonicalEvent, EventIdentity};
use crate::extractor::Extractor;
use crate::flusher::{EventFlusher, FlusherConfig, RetryStrategy};
use crate::processed::ProcessedEvents;
use crate::source::EventSource;

/// Buffered records above this count trigger truncation.
const BUFFER_LIMIT: usize = 1_000;
/// Records kept (newest first) when the buffer is truncated.
const BUFFER_KEEP: usize = 500;
/// Fixed delay between delivery attempts for one batch, in milliseconds.
const RETRY_DELAY_MS: u64 = 5_000;
/// Pause between consecutive batch sends within one delivery.
const BATCH_PAUSE: Duration = Duration::from_secs(1);

/// Orchestrates the event pipeline on a fixed cadence.
pub struct PrintMonitor<S: EventSource> {
    config: Config,
    source: S,
    flusher: EventFlusher,
    extractor: Extractor,
    store: ProcessedEvents,
    buffer: Vec<BufferedEvent>,
}

impl<S: EventSource> PrintMonitor<S> {
    pub fn new(config: Config, source: S) -> Self {
        let flusher = EventFlusher::new(FlusherConfig {
            endpoint: config.collector_url.clone(),
            batch_size: config.batch_size,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            retry_strategy: RetryStrategy::FixedDelay(config.max_retries, RETRY_DELAY_MS),
            batch_pause: BATCH_PAUSE,
        });
        let extractor = Extractor::new(config.machine_name.clone());
        let store = ProcessedEvents::load(config.state_path.clone(), config.machine_name.clone());

        PrintMonitor {
            config,
            source,
            flusher,
            extractor,
            store,
            buffer: Vec::new(),
        }
    }

    pub fn store(&self) -> &ProcessedEvents {
        &self.store
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Runs the agent until the token is cancelled, then drains.
    ///
    /// The only fatal condition is an event source that is missing outright at
    /// startup; an unreachable collector merely buffers events.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), AgentError> {
        info!("machine: {}", self.config.machine_name);
        info!("collector: {}", self.config.collector_url);
        info!("check interval: {}s", self.config.check_interval_secs);

        if !self.source.probe().await {
            return Err(AgentError::SourceUnavailable(
                "event source probe failed at startup".to_string(),
            ));
        }
        if !self.flusher.probe().await {
            warn!("collector unreachable, events will buffer until it comes back");
        }

        if self.config.catch_up_on_start {
            self.run_catch_up().await;
        } else {
            info!("catch-up on start disabled");
        }

        info!("watching for new events");
        let check_interval = Duration::from_secs(self.config.check_interval_secs);
        let retry_interval = Duration::from_secs(self.config.retry_interval_secs);
        let mut delay = check_interval;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = sleep(delay) => {
                    delay = match self.tick().await {
                        Ok(()) => check_interval,
                        Err(err) => {
                            error!("tick failed: {err}, backing off {}s", retry_interval.as_secs());
                            retry_interval
                        }
                    };
                }
            }
        }

        self.drain().await;
        info!("monitor stopped");
        Ok(())
    }

    /// One-time full-history reconciliation.
    ///
    /// All-or-nothing: identities are marked delivered only if every batch of
    /// the pass lands. A failed pass marks nothing and repeats wholesale on
    /// the next run; the collector is expected to tolerate the resulting
    /// duplicate rows. Returns whether the pass completed.
    pub async fn run_catch_up(&mut self) -> bool {
        info!("reconciling full event history");
        let raw_events = self.source.fetch_all().await;
        if raw_events.is_empty() {
            info!("no events in the log");
            return true;
        }

        let mut identities = Vec::new();
        let mut events = Vec::new();
        let mut already_processed = 0usize;
        for raw in &raw_events {
            let identity = self.identity_of(raw);
            if self.store.contains(&identity) {
                already_processed += 1;
                continue;
            }
            identities.push(identity);
            events.push(self.extractor.extract(raw));
        }

        info!(
            "history: {} total, {} already processed, {} new",
            raw_events.len(),
            already_processed,
            events.len()
        );
        if events.is_empty() {
            return true;
        }

        let total_pages: u64 = events.iter().map(|event| u64::from(event.pages)).sum();
        let multi_page = events.iter().filter(|event| event.pages > 1).count();
        info!("{total_pages} pages across the new events, {multi_page} multi-page jobs");

        match self.flusher.deliver(&events).await {
            Ok(sent) => {
                for identity in identities {
                    self.store.mark_delivered(identity);
                }
                if let Err(err) = self.store.persist() {
                    warn!("state persistence failed after catch-up: {err}");
                }
                info!(
                    "catch-up complete, {sent} events delivered, high-water mark {}",
                    self.store.highest_record_id()
                );
                true
            }
            Err(err) => {
                warn!("catch-up pass incomplete ({err}), will retry on next run");
                false
            }
        }
    }

    /// One steady-state poll step.
    ///
    /// Source and delivery problems are handled here (buffer and retry on the
    /// normal cadence); an `Err` is reserved for unexpected failures the loop
    /// answers with the longer backoff interval.
    pub async fn tick(&mut self) -> Result<(), AgentError> {
        let window = Duration::from_secs(self.config.lookback_minutes * 60);
        let raw_events = self.source.fetch_since(window).await;

        let mut found = 0usize;
        for raw in &raw_events {
            let identity = self.identity_of(raw);
            // New, from this machine, and beyond the high-water mark; the
            // pending marks inside `contains` keep events already buffered in
            // this run from being picked up twice.
            if self.store.contains(&identity)
                || identity.machine != self.config.machine_name
                || identity.record_id <= self.store.highest_record_id()
            {
                continue;
            }
            let event = self.extractor.extract(raw);
            self.store.mark_pending(identity.clone());
            self.buffer.push(BufferedEvent { identity, event });
            found += 1;
        }
        if found > 0 {
            info!("found {found} new events");
        }

        if !self.buffer.is_empty() {
            self.deliver_buffer().await?;
        }

        self.store.compact_in_memory();
        Ok(())
    }

    /// Attempts to deliver the entire buffer, not just newly-added events.
    async fn deliver_buffer(&mut self) -> Result<(), AgentError> {
        debug!("delivering {} buffered events", self.buffer.len());
        let events: Vec<CanonicalEvent> = self
            .buffer
            .iter()
            .map(|buffered| buffered.event.clone())
            .collect();

        match self.flusher.deliver(&events).await {
            Ok(sent) => {
                let identities = self.buffer.drain(..).map(|buffered| buffered.identity);
                self.store.confirm(identities);
                info!("delivered {sent} buffered events");
                // In-memory state stays authoritative if the write fails; the
                // loop backs off and the next persist retries.
                self.store.persist()?;
                Ok(())
            }
            Err(err) => {
                warn!(
                    "delivery failed ({err}), keeping {} events buffered",
                    self.buffer.len()
                );
                self.truncate_buffer();
                Ok(())
            }
        }
    }

    /// Bounds the retry buffer: beyond [`BUFFER_LIMIT`] records the oldest are
    /// dropped down to [`BUFFER_KEEP`]. The drop is data loss and is logged as
    /// such; pending marks of dropped events are forgotten so a reappearance
    /// within the look-back window is not silently suppressed.
    fn truncate_buffer(&mut self) {
        if self.buffer.len() <= BUFFER_LIMIT {
            return;
        }
        let dropped: Vec<EventIdentity> = self
            .buffer
            .drain(..self.buffer.len() - BUFFER_KEEP)
            .map(|buffered| buffered.identity)
            .collect();
        for identity in &dropped {
            self.store.drop_pending(identity);
        }
        warn!(
            "buffer overflow: dropped {} oldest undelivered events ({} .. {})",
            dropped.len(),
            dropped.first().map(ToString::to_string).unwrap_or_default(),
            dropped.last().map(ToString::to_string).unwrap_or_default(),
        );
    }

    /// Final delivery attempt plus an unconditional persist.
    async fn drain(&mut self) {
        info!("shutdown requested, draining");
        if !self.buffer.is_empty() {
            info!("sending {} remaining events", self.buffer.len());
            if let Err(err) = self.deliver_buffer().await {
                warn!("final persist failed: {err}");
            }
        }
        if let Err(err) = self.store.persist() {
            warn!("final state persistence failed: {err}");
        }
    }

    fn identity_of(&self, raw: &crate::event::RawEvent) -> EventIdentity {
        let machine = if raw.machine_name.is_empty() {
            self.config.machine_name.clone()
        } else {
            raw.machine_name.clone()
        };
        EventIdentity::new(machine, raw.record_id)
    }
}
