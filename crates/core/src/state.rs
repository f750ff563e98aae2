use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::result_set::QueryResult;

pub const DEFAULT_PAGE_SIZE: u64 = 50;

fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

/// The panel's view model. This is the only state the panel holds and the
/// exact shape written to the persistence slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelState {
    #[serde(rename = "connId", default)]
    pub connection_id: Option<String>,
    #[serde(rename = "resultMap", default)]
    pub results_by_query: BTreeMap<String, QueryResult>,
    #[serde(rename = "queries", default)]
    pub query_order: Vec<String>,
    #[serde(rename = "activeTab", default)]
    pub active_index: Option<usize>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default)]
    pub loading: bool,
    #[serde(default)]
    pub generation: u64,
}

impl Default for PanelState {
    fn default() -> Self {
        Self {
            connection_id: None,
            results_by_query: BTreeMap::new(),
            query_order: Vec::new(),
            active_index: None,
            error: None,
            page_size: DEFAULT_PAGE_SIZE,
            loading: true,
            generation: 0,
        }
    }
}

impl PanelState {
    #[must_use]
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn active_query(&self) -> Option<&str> {
        let index = self.active_index?;
        self.query_order.get(index).map(String::as_str)
    }

    #[must_use]
    pub fn active_result(&self) -> Option<&QueryResult> {
        self.results_by_query.get(self.active_query()?)
    }

    /// Tabs are only offered when more than one query is held.
    #[must_use]
    pub fn shows_tabs(&self) -> bool {
        self.query_order.len() > 1
    }
}

/// A shallow partial update: `Some` fields overwrite, `None` fields keep the
/// prior value. Nullable fields nest a second `Option` so they can be cleared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PanelStateUpdate {
    pub connection_id: Option<Option<String>>,
    pub results_by_query: Option<BTreeMap<String, QueryResult>>,
    pub query_order: Option<Vec<String>>,
    pub active_index: Option<Option<usize>>,
    pub error: Option<Option<String>>,
    pub page_size: Option<u64>,
    pub loading: Option<bool>,
    pub generation: Option<u64>,
}

impl PanelStateUpdate {
    fn merge_into(self, state: &mut PanelState) {
        if let Some(connection_id) = self.connection_id {
            state.connection_id = connection_id;
        }
        if let Some(results_by_query) = self.results_by_query {
            state.results_by_query = results_by_query;
        }
        if let Some(query_order) = self.query_order {
            state.query_order = query_order;
        }
        if let Some(active_index) = self.active_index {
            state.active_index = active_index;
        }
        if let Some(error) = self.error {
            state.error = error;
        }
        if let Some(page_size) = self.page_size {
            state.page_size = page_size;
        }
        if let Some(loading) = self.loading {
            state.loading = loading;
        }
        if let Some(generation) = self.generation {
            state.generation = generation;
        }
    }
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to read panel snapshot at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse panel snapshot at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to create snapshot directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write panel snapshot at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode panel snapshot: {source}")]
    Encode {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode panel snapshot: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
    },
}

/// Host-provided storage holding one opaque snapshot of [`PanelState`].
pub trait PersistenceSlot {
    fn read(&self) -> Result<Option<PanelState>, PersistError>;
    fn write(&mut self, snapshot: &PanelState) -> Result<(), PersistError>;
}

/// In-process slot. Clones share the same snapshot, so a slot handle can
/// outlive the panel that wrote it.
#[derive(Debug, Clone, Default)]
pub struct MemorySlot {
    snapshot: Arc<Mutex<Option<String>>>,
}

impl MemorySlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn raw_snapshot(&self) -> Option<String> {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PersistenceSlot for MemorySlot {
    fn read(&self) -> Result<Option<PanelState>, PersistError> {
        let Some(raw) = self.raw_snapshot() else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| PersistError::Decode { source })
    }

    fn write(&mut self, snapshot: &PanelState) -> Result<(), PersistError> {
        let rendered =
            serde_json::to_string(snapshot).map_err(|source| PersistError::Encode { source })?;
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = Some(rendered);
        Ok(())
    }
}

/// Owns the panel state and writes a snapshot after every mutation.
#[derive(Debug)]
pub struct StateStore<S> {
    state: PanelState,
    slot: S,
}

impl<S: PersistenceSlot> StateStore<S> {
    /// Seeds the store from the slot, falling back to `defaults` when the slot
    /// is empty or unreadable.
    pub fn restore(slot: S, defaults: PanelState) -> Self {
        let state = match slot.read() {
            Ok(Some(snapshot)) => {
                debug!(
                    queries = snapshot.query_order.len(),
                    loading = snapshot.loading,
                    "restored panel snapshot"
                );
                snapshot
            }
            Ok(None) => defaults,
            Err(error) => {
                warn!(%error, "ignoring unreadable panel snapshot");
                defaults
            }
        };

        Self { state, slot }
    }

    #[must_use]
    pub fn state(&self) -> &PanelState {
        &self.state
    }

    #[must_use]
    pub fn slot(&self) -> &S {
        &self.slot
    }

    pub fn into_slot(self) -> S {
        self.slot
    }

    pub fn apply(&mut self, update: PanelStateUpdate) {
        self.apply_then(update, |_| {});
    }

    /// Merges `update`, runs `on_applied` against the merged state, then
    /// writes the snapshot. Nothing else can mutate the store in between.
    pub fn apply_then(&mut self, update: PanelStateUpdate, on_applied: impl FnOnce(&PanelState)) {
        update.merge_into(&mut self.state);
        on_applied(&self.state);
        if let Err(error) = self.slot.write(&self.state) {
            warn!(%error, "failed to persist panel snapshot");
        }
    }
}
