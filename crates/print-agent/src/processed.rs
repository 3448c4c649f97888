// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Persisted record of delivered event identities.
//!
//! Answers "has this event already been shipped?" in O(1) and survives agent
//! restarts. Identities move through two tiers: `pending` (buffered in the
//! current run, not yet confirmed) and `delivered` (confirmed by the
//! collector). Only the delivered tier is persisted, and only the delivered
//! tier is ever compacted.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::event::EventIdentity;

/// Persist-time compaction kicks in above this many delivered identities.
const PERSIST_COMPACTION_THRESHOLD: usize = 50_000;
/// Identities retained per machine by persist-time compaction.
const RETAINED_PER_MACHINE: usize = 10_000;
/// In-memory compaction kicks in above this many delivered identities.
const MEMORY_COMPACTION_THRESHOLD: usize = 10_000;
/// In-memory compaction keeps local identities within this distance of the
/// high-water mark.
const MEMORY_RETENTION_WINDOW: u64 = 5_000;

/// On-disk layout of the state file.
///
/// `processed_ids` entries are identity strings; files written by older agent
/// versions stored bare record ids, which deserialize through the untagged
/// variant and are attributed to the local machine on load.
#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    processed_ids: Vec<StoredId>,
    #[serde(default)]
    last_update: String,
    #[serde(default)]
    highest_id_this_machine: u64,
    #[serde(default)]
    total_processed: usize,
    #[serde(default)]
    stats_by_machine: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredId {
    Legacy(u64),
    Tagged(String),
}

/// Delivered-identity set plus the local high-water mark.
pub struct ProcessedEvents {
    path: PathBuf,
    machine: String,
    delivered: HashSet<EventIdentity>,
    pending: HashSet<EventIdentity>,
    highest_record_id: u64,
}

impl ProcessedEvents {
    /// Loads persisted state, migrating legacy entries.
    ///
    /// A missing file is a normal first run. An unreadable or undecodable file
    /// is logged and treated as empty; the agent re-delivers rather than
    /// refusing to start.
    pub fn load(path: impl Into<PathBuf>, machine: impl Into<String>) -> Self {
        let path = path.into();
        let machine = machine.into();

        let mut store = ProcessedEvents {
            path,
            machine,
            delivered: HashSet::new(),
            pending: HashSet::new(),
            highest_record_id: 0,
        };

        let contents = match std::fs::read_to_string(&store.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                info!("no state file at {}, starting fresh", store.path.display());
                return store;
            }
            Err(error) => {
                warn!(
                    "failed to read state file {}: {error}, starting fresh",
                    store.path.display()
                );
                return store;
            }
        };

        let state: StateFile = match serde_json::from_str(&contents) {
            Ok(state) => state,
            Err(error) => {
                warn!(
                    "undecodable state file {}: {error}, starting fresh",
                    store.path.display()
                );
                return store;
            }
        };

        for stored in state.processed_ids {
            let identity = match stored {
                StoredId::Legacy(record_id) => {
                    Some(EventIdentity::new(store.machine.clone(), record_id))
                }
                StoredId::Tagged(raw) => {
                    let parsed = EventIdentity::parse(&raw, &store.machine);
                    if parsed.is_none() {
                        warn!("skipping unparsable identity {raw:?} in state file");
                    }
                    parsed
                }
            };
            if let Some(identity) = identity {
                store.delivered.insert(identity);
            }
        }

        // The high-water mark is recomputed from the loaded identities rather
        // than trusted from the file.
        store.highest_record_id = store
            .delivered
            .iter()
            .filter(|identity| identity.machine == store.machine)
            .map(|identity| identity.record_id)
            .max()
            .unwrap_or(0);

        info!(
            "loaded {} delivered identities ({} for this machine), high-water mark {}",
            store.delivered.len(),
            store
                .delivered
                .iter()
                .filter(|identity| identity.machine == store.machine)
                .count(),
            store.highest_record_id
        );

        store
    }

    pub fn machine(&self) -> &str {
        &self.machine
    }

    pub fn highest_record_id(&self) -> u64 {
        self.highest_record_id
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// True if the identity was delivered in a previous run or is already
    /// buffered in this one.
    pub fn contains(&self, identity: &EventIdentity) -> bool {
        self.delivered.contains(identity) || self.pending.contains(identity)
    }

    /// Records a buffered-but-unconfirmed identity.
    pub fn mark_pending(&mut self, identity: EventIdentity) {
        self.pending.insert(identity);
    }

    /// Forgets a pending identity whose buffered event was dropped.
    pub fn drop_pending(&mut self, identity: &EventIdentity) {
        self.pending.remove(identity);
    }

    /// Promotes pending identities to delivered after a confirmed delivery,
    /// advancing the local high-water mark.
    pub fn confirm<I>(&mut self, identities: I)
    where
        I: IntoIterator<Item = EventIdentity>,
    {
        for identity in identities {
            self.pending.remove(&identity);
            self.mark_delivered(identity);
        }
    }

    /// Directly records a confirmed delivery (catch-up path, where events from
    /// other machines may be present in the scanned history).
    pub fn mark_delivered(&mut self, identity: EventIdentity) {
        if identity.machine == self.machine && identity.record_id > self.highest_record_id {
            self.highest_record_id = identity.record_id;
        }
        self.delivered.insert(identity);
    }

    /// Durably writes the delivered set plus metadata.
    ///
    /// Runs persist-time compaction first: above
    /// [`PERSIST_COMPACTION_THRESHOLD`] total identities, only the
    /// [`RETAINED_PER_MACHINE`] highest record ids per machine are kept.
    /// Pending identities are never written; an unconfirmed event must be
    /// re-fetched, not remembered.
    pub fn persist(&mut self) -> Result<(), AgentError> {
        self.compact_for_persist();

        let mut ids: Vec<&EventIdentity> = self.delivered.iter().collect();
        ids.sort();

        let mut stats_by_machine: BTreeMap<String, usize> = BTreeMap::new();
        for identity in &self.delivered {
            *stats_by_machine.entry(identity.machine.clone()).or_default() += 1;
        }

        let state = StateFile {
            processed_ids: ids
                .into_iter()
                .map(|identity| StoredId::Tagged(identity.to_string()))
                .collect(),
            last_update: chrono::Local::now().to_rfc3339(),
            highest_id_this_machine: self.highest_record_id,
            total_processed: self.delivered.len(),
            stats_by_machine,
        };

        let encoded = serde_json::to_string_pretty(&state)?;
        std::fs::write(&self.path, encoded).map_err(|source| AgentError::StatePersist {
            path: self.path.clone(),
            source,
        })?;

        debug!("persisted {} delivered identities", self.delivered.len());
        Ok(())
    }

    fn compact_for_persist(&mut self) {
        if self.delivered.len() <= PERSIST_COMPACTION_THRESHOLD {
            return;
        }

        let mut by_machine: HashMap<String, Vec<EventIdentity>> = HashMap::new();
        for identity in self.delivered.drain() {
            by_machine
                .entry(identity.machine.clone())
                .or_default()
                .push(identity);
        }

        for (_, mut identities) in by_machine {
            // Most recent by record id, not by insertion order.
            identities.sort_by_key(|identity| identity.record_id);
            let keep_from = identities.len().saturating_sub(RETAINED_PER_MACHINE);
            self.delivered.extend(identities.drain(keep_from..));
        }

        info!(
            "state file compacted, retaining {} identities",
            self.delivered.len()
        );
    }

    /// Bounds the working set: above [`MEMORY_COMPACTION_THRESHOLD`] delivered
    /// identities, local-machine entries further than
    /// [`MEMORY_RETENTION_WINDOW`] below the high-water mark are dropped.
    ///
    /// Pending identities live in a separate set and are never touched here.
    /// Returns the number of dropped identities.
    pub fn compact_in_memory(&mut self) -> usize {
        if self.delivered.len() <= MEMORY_COMPACTION_THRESHOLD {
            return 0;
        }

        let cutoff = self.highest_record_id.saturating_sub(MEMORY_RETENTION_WINDOW);
        let before = self.delivered.len();
        let machine = self.machine.clone();
        self.delivered
            .retain(|identity| identity.machine != machine || identity.record_id >= cutoff);

        let dropped = before - self.delivered.len();
        if dropped > 0 {
            debug!("dropped {dropped} old identities from the working set");
        }
        dropped
    }
}
