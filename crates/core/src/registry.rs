use std::collections::BTreeMap;

use crate::result_set::QueryResult;
use crate::state::{PanelState, PanelStateUpdate};

/// One entry of the tab strip, in `query_order` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tab<'a> {
    pub index: usize,
    pub query: &'a str,
    pub label: &'a str,
    pub active: bool,
}

/// Translates result batches, tab switches and resets into state updates.
#[derive(Debug, Default)]
pub struct ResultRegistry;

impl ResultRegistry {
    /// Rebuilds the registry from a batch. The previous order and map are
    /// replaced, the connection id comes from the last result, and the first
    /// tab becomes active. A query repeated within the batch keeps every
    /// position in the order and its last result.
    #[must_use]
    pub fn ingest(&self, results: Vec<QueryResult>) -> PanelStateUpdate {
        let mut connection_id = None;
        let mut query_order = Vec::with_capacity(results.len());
        let mut results_by_query = BTreeMap::new();

        for result in results {
            connection_id.clone_from(&result.connection_id);
            query_order.push(result.query.clone());
            results_by_query.insert(result.query.clone(), result);
        }

        let active_index = if query_order.is_empty() { None } else { Some(0) };

        PanelStateUpdate {
            connection_id: Some(connection_id),
            results_by_query: Some(results_by_query),
            query_order: Some(query_order),
            active_index: Some(active_index),
            error: Some(None),
            loading: Some(false),
            ..PanelStateUpdate::default()
        }
    }

    /// Selects tab `index`. Callers pass indices taken from `query_order`.
    #[must_use]
    pub fn toggle(&self, index: usize) -> PanelStateUpdate {
        PanelStateUpdate {
            active_index: Some(Some(index)),
            ..PanelStateUpdate::default()
        }
    }

    /// Discards everything held and waits for the next batch.
    #[must_use]
    pub fn reset(&self) -> PanelStateUpdate {
        PanelStateUpdate {
            connection_id: Some(None),
            results_by_query: Some(BTreeMap::new()),
            query_order: Some(Vec::new()),
            active_index: Some(None),
            error: Some(None),
            loading: Some(true),
            ..PanelStateUpdate::default()
        }
    }

    #[must_use]
    pub fn tabs<'a>(&self, state: &'a PanelState) -> Vec<Tab<'a>> {
        state
            .query_order
            .iter()
            .enumerate()
            .map(|(index, query)| Tab {
                index,
                query,
                label: state
                    .results_by_query
                    .get(query)
                    .map_or(query.as_str(), QueryResult::tab_label),
                active: state.active_index == Some(index),
            })
            .collect()
    }
}
