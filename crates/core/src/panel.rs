use std::time::Instant;

use tracing::{debug, warn};

use crate::channel::MessageChannel;
use crate::config::PanelConfig;
use crate::messages::{Envelope, HostMessage, PanelMessage};
use crate::pagination::{PageRequest, PaginationController};
use crate::registry::{ResultRegistry, Tab};
use crate::result_set::QueryResult;
use crate::state::{PanelState, PanelStateUpdate, PersistenceSlot, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelPhase {
    Uninitialized,
    Loading,
    Ready,
    Errored,
}

/// The panel state machine: host envelopes and user intents in, state
/// mutations and outbound messages out. Every mutation goes through the
/// [`StateStore`], so each one is persisted before the next is handled.
#[derive(Debug)]
pub struct Panel<C, S> {
    store: StateStore<S>,
    channel: C,
    registry: ResultRegistry,
    pagination: PaginationController,
    mounted: bool,
}

impl<C: MessageChannel, S: PersistenceSlot> Panel<C, S> {
    /// Restores the last snapshot from `slot`, or starts empty and loading.
    ///
    /// A snapshot taken while a page request was in flight (results held and
    /// still loading) restarts the request timeout, since the reply may never
    /// come.
    pub fn new(channel: C, slot: S, config: &PanelConfig) -> Self {
        let defaults = PanelState::default().with_page_size(config.page_size);
        let store = StateStore::restore(slot, defaults);
        let mut pagination =
            PaginationController::new(config.namespace.clone(), config.request_timeout());

        let state = store.state();
        if state.loading && !state.query_order.is_empty() {
            debug!(generation = state.generation, "resuming page request timeout");
            pagination.resume(state.generation, Instant::now());
        }

        Self {
            store,
            channel,
            registry: ResultRegistry,
            pagination,
            mounted: false,
        }
    }

    /// Tells the host the panel can receive data. Only the first call sends.
    pub fn mount(&mut self) {
        if self.mounted {
            return;
        }
        self.mounted = true;
        self.channel.send(PanelMessage::ViewReady);
    }

    #[must_use]
    pub fn state(&self) -> &PanelState {
        self.store.state()
    }

    #[must_use]
    pub fn phase(&self) -> PanelPhase {
        let state = self.state();
        if !self.mounted {
            PanelPhase::Uninitialized
        } else if state.error.is_some() || state.active_result().is_some_and(QueryResult::is_error)
        {
            PanelPhase::Errored
        } else if state.loading {
            PanelPhase::Loading
        } else {
            PanelPhase::Ready
        }
    }

    #[must_use]
    pub fn tabs(&self) -> Vec<Tab<'_>> {
        self.registry.tabs(self.state())
    }

    #[must_use]
    pub fn active_result(&self) -> Option<&QueryResult> {
        self.state().active_result()
    }

    #[must_use]
    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Releases the channel and slot, e.g. to re-create the panel from the
    /// same slot.
    pub fn teardown(self) -> (C, S) {
        (self.channel, self.store.into_slot())
    }

    /// Handles one inbound envelope. Every path ends in a defined outcome;
    /// nothing here fails.
    pub fn handle_envelope(&mut self, envelope: Envelope) {
        match HostMessage::decode(envelope) {
            Ok(Some(message)) => self.handle_message(message),
            Ok(None) => {}
            Err(error) => warn!(%error, "ignoring host envelope"),
        }
    }

    pub fn handle_message(&mut self, message: HostMessage) {
        debug!(action = message.action(), "message received");
        match message {
            HostMessage::QueryResults {
                results,
                generation,
            } => self.on_query_results(results, generation),
            HostMessage::Reset => self.on_reset(),
            HostMessage::GetState => {
                let snapshot = self.state().clone();
                self.channel
                    .send(PanelMessage::ReceivedState(Box::new(snapshot)));
            }
        }
    }

    fn on_query_results(&mut self, results: Vec<QueryResult>, generation: Option<u64>) {
        let current = self.state().generation;
        if let Some(generation) = generation.filter(|generation| *generation != current) {
            warn!(generation, current, "discarding stale query results");
            return;
        }

        // An unstamped batch is a new run; a late reply to the page request
        // it supersedes must no longer match.
        let superseded = generation.is_none() && self.pagination.pending().is_some();
        self.pagination.settle();
        let mut update = self.registry.ingest(results);
        if superseded {
            update.generation = Some(current + 1);
        }
        self.store.apply(update);
    }

    fn on_reset(&mut self) {
        self.pagination.settle();
        let generation = self.state().generation + 1;
        self.store.apply(PanelStateUpdate {
            generation: Some(generation),
            ..self.registry.reset()
        });
    }

    pub fn toggle(&mut self, index: usize) {
        let update = self.registry.toggle(index);
        self.store.apply(update);
    }

    /// Sets `loading` and asks the host for another page. Returns `false`
    /// without touching state when the request names no query type.
    pub fn request_page(&mut self, request: &PageRequest) -> bool {
        self.request_page_at(request, Instant::now())
    }

    pub fn request_page_at(&mut self, request: &PageRequest, now: Instant) -> bool {
        let generation = self.state().generation + 1;
        let Some(call) = self.pagination.prepare(request, generation, now) else {
            return false;
        };

        debug!(command = %call.command, page = request.page, "requesting page");
        let channel = &mut self.channel;
        self.store.apply_then(
            PanelStateUpdate {
                loading: Some(true),
                generation: Some(generation),
                ..PanelStateUpdate::default()
            },
            |_| channel.send(PanelMessage::Call(call)),
        );
        true
    }

    /// Fails the pending page request once it has waited past the configured
    /// timeout. Returns whether anything changed.
    pub fn poll_timeout(&mut self, now: Instant) -> bool {
        let Some(expired) = self.pagination.take_expired(now) else {
            return false;
        };

        let timeout = self.pagination.timeout();
        warn!(
            command = %expired.command,
            generation = expired.generation,
            timeout = ?timeout,
            "page request timed out"
        );
        let generation = self.state().generation + 1;
        self.store.apply(PanelStateUpdate {
            error: Some(Some(format!(
                "request `{}` timed out after {}ms",
                expired.command,
                timeout.as_millis()
            ))),
            loading: Some(false),
            generation: Some(generation),
            ..PanelStateUpdate::default()
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use serde_json::json;

    use super::{Panel, PanelPhase};
    use crate::channel::Outbox;
    use crate::config::PanelConfig;
    use crate::messages::{Envelope, HostMessage, PanelMessage};
    use crate::pagination::PageRequest;
    use crate::result_set::QueryResult;
    use crate::state::{MemorySlot, PanelState};

    fn mounted_panel() -> Panel<Outbox, MemorySlot> {
        let mut panel = Panel::new(Outbox::new(), MemorySlot::new(), &PanelConfig::default());
        panel.mount();
        panel.channel_mut().drain();
        panel
    }

    fn two_results() -> Envelope {
        Envelope::new("queryResults").with_payload(json!([
            {"connId": "c1", "query": "SELECT 1", "cols": ["1"], "results": [{"1": 1}]},
            {"connId": "c1", "query": "SELECT 2", "cols": ["2"], "results": [{"2": 2}]}
        ]))
    }

    #[test]
    fn mount_sends_view_ready_once() {
        let mut panel = Panel::new(Outbox::new(), MemorySlot::new(), &PanelConfig::default());
        assert_eq!(panel.phase(), PanelPhase::Uninitialized);

        panel.mount();
        panel.mount();

        let sent = panel.channel_mut().drain();
        assert_eq!(sent, vec![PanelMessage::ViewReady]);
        assert_eq!(panel.phase(), PanelPhase::Loading);
    }

    #[test]
    fn results_then_page_request_scenario() {
        let mut panel = mounted_panel();
        panel.handle_envelope(two_results());

        let state = panel.state();
        assert_eq!(state.query_order, vec!["SELECT 1", "SELECT 2"]);
        assert_eq!(state.active_index, Some(0));
        assert!(!state.loading);
        assert_eq!(panel.phase(), PanelPhase::Ready);

        let sent = panel.request_page(&PageRequest::new(
            "showRecords",
            json!({"table": "t"}),
            2,
            50,
        ));
        assert!(sent);
        assert!(panel.state().loading);
        assert_eq!(panel.phase(), PanelPhase::Loading);

        let outbound = panel.channel_mut().drain();
        assert_eq!(outbound.len(), 1);
        let PanelMessage::Call(call) = &outbound[0] else {
            panic!("expected a call envelope, got {:?}", outbound[0]);
        };
        assert!(call.command.ends_with(".showRecords"));
        assert_eq!(call.args, vec![json!({"table": "t"}), json!(2), json!(50)]);
    }

    #[test]
    fn page_request_without_query_type_changes_nothing() {
        let mut panel = mounted_panel();
        panel.handle_envelope(two_results());
        let before = panel.state().clone();

        let request = PageRequest {
            query_type: None,
            query_params: json!({"table": "t"}),
            page: 1,
            page_size: 50,
        };
        assert!(!panel.request_page(&request));
        assert_eq!(panel.state(), &before);
        assert!(panel.channel().is_empty());
    }

    #[test]
    fn reset_empties_registry_from_any_state() {
        let mut panel = mounted_panel();
        panel.handle_envelope(two_results());
        panel.toggle(1);
        panel.handle_envelope(Envelope::new("reset"));

        let state = panel.state();
        assert!(state.results_by_query.is_empty());
        assert!(state.query_order.is_empty());
        assert!(state.loading);
        assert_eq!(state.connection_id, None);
    }

    #[test]
    fn get_state_replies_without_mutating() {
        let mut panel = mounted_panel();
        panel.handle_envelope(two_results());
        panel.toggle(1);
        let before = panel.state().clone();

        panel.handle_envelope(Envelope::new("getState"));

        assert_eq!(panel.state(), &before);
        let outbound = panel.channel_mut().drain();
        assert_eq!(
            outbound,
            vec![PanelMessage::ReceivedState(Box::new(before))]
        );
    }

    #[test]
    fn malformed_and_unknown_envelopes_are_ignored() {
        let mut panel = mounted_panel();
        panel.handle_envelope(two_results());
        let before = panel.state().clone();

        panel.handle_envelope(Envelope::default());
        panel.handle_envelope(Envelope::new("themeChanged").with_payload(json!({"dark": true})));
        panel.handle_envelope(Envelope::new("queryResults").with_payload(json!("oops")));

        assert_eq!(panel.state(), &before);
        assert!(panel.channel().is_empty());
    }

    #[test]
    fn state_survives_teardown_and_recreate() {
        let slot = MemorySlot::new();
        let config = PanelConfig::default();
        let mut panel = Panel::new(Outbox::new(), slot.clone(), &config);
        panel.mount();
        panel.handle_envelope(two_results());
        panel.toggle(1);
        let before = panel.state().clone();
        let (_channel, slot) = panel.teardown();

        let restored = Panel::new(Outbox::new(), slot, &config);
        assert_eq!(restored.state(), &before);
        assert_eq!(restored.state().active_query(), Some("SELECT 2"));
    }

    #[test]
    fn stale_results_after_reset_are_discarded() {
        let mut panel = mounted_panel();
        panel.handle_envelope(two_results());
        assert!(panel.request_page(&PageRequest::new("showRecords", json!(null), 1, 50)));
        let call_generation = match &panel.channel_mut().drain()[0] {
            PanelMessage::Call(call) => call.generation,
            other => panic!("expected a call envelope, got {other:?}"),
        };

        panel.handle_envelope(Envelope::new("reset"));
        panel.handle_message(HostMessage::QueryResults {
            results: vec![QueryResult::new("c1", "SELECT 1")],
            generation: Some(call_generation),
        });

        let state = panel.state();
        assert!(state.loading);
        assert!(state.query_order.is_empty());
    }

    #[test]
    fn matching_generation_is_accepted() {
        let mut panel = mounted_panel();
        panel.handle_envelope(two_results());
        assert!(panel.request_page(&PageRequest::new("showRecords", json!(null), 1, 50)));
        let generation = panel.state().generation;

        panel.handle_envelope(
            Envelope::new("queryResults")
                .with_payload(json!({"connId": "c1", "query": "SELECT * FROM t", "page": 1}))
                .with_generation(generation),
        );

        let state = panel.state();
        assert!(!state.loading);
        assert_eq!(state.query_order, vec!["SELECT * FROM t"]);
    }

    #[test]
    fn newer_batch_discards_late_page_reply() {
        let mut panel = mounted_panel();
        panel.handle_envelope(Envelope::new("queryResults").with_payload(json!({
            "connId": "c1",
            "query": "SELECT 1"
        })));
        assert!(panel.request_page(&PageRequest::new("showRecords", json!(null), 1, 50)));
        let page_generation = panel.state().generation;

        panel.handle_envelope(Envelope::new("queryResults").with_payload(json!({
            "connId": "c1",
            "query": "SELECT new"
        })));
        assert_ne!(panel.state().generation, page_generation);

        panel.handle_envelope(
            Envelope::new("queryResults")
                .with_payload(json!({"connId": "c1", "query": "SELECT * FROM t", "page": 1}))
                .with_generation(page_generation),
        );

        let state = panel.state();
        assert_eq!(state.query_order, vec!["SELECT new"]);
        assert!(!state.loading);
    }

    #[test]
    fn unstamped_batch_without_pending_request_keeps_generation() {
        let mut panel = mounted_panel();
        panel.handle_envelope(two_results());
        let generation = panel.state().generation;

        panel.handle_envelope(two_results());
        assert_eq!(panel.state().generation, generation);
    }

    #[test]
    fn restore_during_page_request_still_times_out() {
        let config = PanelConfig::default();
        let mut panel = Panel::new(Outbox::new(), MemorySlot::new(), &config);
        panel.mount();
        panel.handle_envelope(two_results());
        assert!(panel.request_page_at(
            &PageRequest::new("showRecords", json!(null), 1, 50),
            Instant::now()
        ));
        let (_channel, slot) = panel.teardown();

        let mut restored = Panel::new(Outbox::new(), slot, &config);
        assert!(restored.state().loading);
        assert!(!restored.poll_timeout(Instant::now()));
        assert!(restored.poll_timeout(Instant::now() + Duration::from_secs(3600)));

        let state = restored.state();
        assert!(!state.loading);
        assert!(state.error.as_deref().is_some_and(|error| error.contains("timed out")));
    }

    #[test]
    fn restore_while_awaiting_first_batch_has_no_timeout() {
        let config = PanelConfig::default();
        let mut panel = Panel::new(Outbox::new(), MemorySlot::new(), &config);
        panel.mount();
        panel.handle_envelope(Envelope::new("reset"));
        let (_channel, slot) = panel.teardown();

        let mut restored = Panel::new(Outbox::new(), slot, &config);
        assert!(restored.state().loading);
        assert!(!restored.poll_timeout(Instant::now() + Duration::from_secs(3600)));
    }

    #[test]
    fn unanswered_page_request_times_out() {
        let mut panel = mounted_panel();
        panel.handle_envelope(two_results());
        let issued_at = Instant::now();
        assert!(panel.request_page_at(
            &PageRequest::new("showRecords", json!(null), 1, 50),
            issued_at
        ));
        let generation = panel.state().generation;

        assert!(!panel.poll_timeout(issued_at + Duration::from_secs(1)));
        assert!(panel.poll_timeout(issued_at + Duration::from_secs(30)));

        let state = panel.state();
        assert!(!state.loading);
        assert!(state.error.as_deref().is_some_and(|error| error.contains("timed out")));
        assert_eq!(panel.phase(), PanelPhase::Errored);

        panel.handle_envelope(
            Envelope::new("queryResults")
                .with_payload(json!({"connId": "c1", "query": "late"}))
                .with_generation(generation),
        );
        assert_eq!(panel.phase(), PanelPhase::Errored);

        panel.handle_envelope(Envelope::new("queryResults").with_payload(json!({
            "connId": "c1",
            "query": "SELECT 3"
        })));
        assert_eq!(panel.phase(), PanelPhase::Ready);
        assert!(panel.state().error.is_none());
    }

    #[test]
    fn result_carried_error_reports_errored_phase() {
        let mut panel = mounted_panel();
        panel.handle_envelope(Envelope::new("queryResults").with_payload(json!({
            "connId": "c1",
            "query": "SELECT nope",
            "error": true,
            "rawError": {"message": "unknown column nope"}
        })));

        assert_eq!(panel.phase(), PanelPhase::Errored);
        assert!(panel.state().error.is_none());
        assert_eq!(
            panel
                .active_result()
                .and_then(QueryResult::error_message)
                .as_deref(),
            Some("unknown column nope")
        );
    }

    #[test]
    fn restored_state_uses_configured_page_size_only_without_snapshot() {
        let config = PanelConfig {
            page_size: 25,
            ..PanelConfig::default()
        };
        let panel = Panel::new(Outbox::new(), MemorySlot::new(), &config);
        assert_eq!(panel.state(), &PanelState::default().with_page_size(25));
    }
}
