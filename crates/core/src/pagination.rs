use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messages::CallRequest;
use crate::result_set::QueryResult;

const RESUMED_QUERY_TYPE: &str = "<restored>";

/// A user page/size change, as forwarded by the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    #[serde(default)]
    pub query_type: Option<String>,
    #[serde(default)]
    pub query_params: Value,
    pub page: u64,
    pub page_size: u64,
}

impl PageRequest {
    #[must_use]
    pub fn new(query_type: impl Into<String>, query_params: Value, page: u64, page_size: u64) -> Self {
        Self {
            query_type: Some(query_type.into()),
            query_params,
            page,
            page_size,
        }
    }

    /// Request for `page` of the same fetch that produced `result`.
    #[must_use]
    pub fn for_result(result: &QueryResult, page: u64, default_page_size: u64) -> Self {
        Self {
            query_type: result.query_type.clone(),
            query_params: result.query_params.clone().unwrap_or(Value::Null),
            page,
            page_size: result.page_size.unwrap_or(default_page_size),
        }
    }

    /// Pages are zero-based. Without a known total the next page is always
    /// offered; the host answers with an empty page when past the end.
    #[must_use]
    pub fn next_for(result: &QueryResult, default_page_size: u64) -> Option<Self> {
        result.query_type.as_ref()?;
        let next = result.page.unwrap_or(0).checked_add(1)?;
        let page_size = result.page_size.unwrap_or(default_page_size);
        if let Some(total) = result.total {
            if next.saturating_mul(page_size) >= total {
                return None;
            }
        }
        Some(Self::for_result(result, next, default_page_size))
    }

    #[must_use]
    pub fn previous_for(result: &QueryResult, default_page_size: u64) -> Option<Self> {
        result.query_type.as_ref()?;
        let page = result.page.unwrap_or(0);
        if page == 0 {
            return None;
        }
        Some(Self::for_result(result, page - 1, default_page_size))
    }

    fn query_type(&self) -> Option<&str> {
        self.query_type.as_deref().filter(|query_type| !query_type.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub command: String,
    pub generation: u64,
    pub issued_at: Instant,
}

/// Builds outbound page calls and remembers the one in flight so it can be
/// timed out.
#[derive(Debug)]
pub struct PaginationController {
    namespace: String,
    timeout: Duration,
    pending: Option<PendingRequest>,
}

impl PaginationController {
    #[must_use]
    pub fn new(namespace: impl Into<String>, timeout: Duration) -> Self {
        Self {
            namespace: namespace.into(),
            timeout,
            pending: None,
        }
    }

    #[must_use]
    pub fn command_for(&self, query_type: &str) -> String {
        format!("{}.{query_type}", self.namespace)
    }

    #[must_use]
    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the call to send, or `None` when the request names no query
    /// type. A returned call becomes the pending request.
    pub fn prepare(
        &mut self,
        request: &PageRequest,
        generation: u64,
        now: Instant,
    ) -> Option<CallRequest> {
        let command = self.command_for(request.query_type()?);
        self.pending = Some(PendingRequest {
            command: command.clone(),
            generation,
            issued_at: now,
        });
        Some(CallRequest::page(
            command,
            request.query_params.clone(),
            request.page,
            request.page_size,
            generation,
        ))
    }

    /// Re-arms the timeout for a request issued before a restore, whose
    /// command is no longer known.
    pub fn resume(&mut self, generation: u64, now: Instant) {
        self.pending = Some(PendingRequest {
            command: format!("{}.{RESUMED_QUERY_TYPE}", self.namespace),
            generation,
            issued_at: now,
        });
    }

    pub fn settle(&mut self) {
        self.pending = None;
    }

    /// Takes the pending request once it has waited at least the timeout.
    pub fn take_expired(&mut self, now: Instant) -> Option<PendingRequest> {
        let pending = self.pending.as_ref()?;
        if now.saturating_duration_since(pending.issued_at) < self.timeout {
            return None;
        }
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use serde_json::json;

    use super::{PageRequest, PaginationController};
    use crate::result_set::QueryResult;

    fn controller() -> PaginationController {
        PaginationController::new("sqltools", Duration::from_secs(30))
    }

    #[test]
    fn prepare_builds_namespaced_call() {
        let mut controller = controller();
        let request = PageRequest::new("showRecords", json!({"table": "t"}), 2, 50);

        let call = controller
            .prepare(&request, 3, Instant::now())
            .expect("call should be built");
        assert_eq!(call.command, "sqltools.showRecords");
        assert_eq!(call.args, vec![json!({"table": "t"}), json!(2), json!(50)]);
        assert_eq!(call.generation, 3);
        assert_eq!(
            controller.pending().map(|pending| pending.generation),
            Some(3)
        );
    }

    #[test]
    fn missing_or_empty_query_type_is_dropped() {
        let mut controller = controller();
        let mut request = PageRequest::new("", json!(null), 1, 50);
        assert!(controller.prepare(&request, 1, Instant::now()).is_none());

        request.query_type = None;
        assert!(controller.prepare(&request, 1, Instant::now()).is_none());
        assert!(controller.pending().is_none());
    }

    #[test]
    fn expiry_waits_for_timeout() {
        let mut controller = controller();
        let issued_at = Instant::now();
        controller
            .prepare(
                &PageRequest::new("showRecords", json!(null), 1, 50),
                1,
                issued_at,
            )
            .expect("call should be built");

        assert!(controller
            .take_expired(issued_at + Duration::from_secs(29))
            .is_none());
        let expired = controller
            .take_expired(issued_at + Duration::from_secs(30))
            .expect("request should expire");
        assert_eq!(expired.command, "sqltools.showRecords");
        assert!(controller.pending().is_none());
    }

    #[test]
    fn resumed_request_expires_like_a_fresh_one() {
        let mut controller = controller();
        let resumed_at = Instant::now();
        controller.resume(4, resumed_at);

        assert!(controller
            .take_expired(resumed_at + Duration::from_secs(1))
            .is_none());
        let expired = controller
            .take_expired(resumed_at + Duration::from_secs(30))
            .expect("resumed request should expire");
        assert_eq!(expired.generation, 4);
        assert!(expired.command.starts_with("sqltools."));
    }

    #[test]
    fn page_window_follows_result_metadata() {
        let result = QueryResult::new("c1", "SELECT * FROM t")
            .with_query_type("showRecords", json!({"table": "t"}))
            .with_pagination(1, 50, Some(120));

        let next = PageRequest::next_for(&result, 50).expect("page 2 exists");
        assert_eq!(next.page, 2);
        assert_eq!(next.page_size, 50);
        assert_eq!(next.query_params, json!({"table": "t"}));

        let previous = PageRequest::previous_for(&result, 50).expect("page 0 exists");
        assert_eq!(previous.page, 0);

        let last = result.clone().with_pagination(2, 50, Some(120));
        assert!(PageRequest::next_for(&last, 50).is_none());

        let first = result.with_pagination(0, 50, None);
        assert!(PageRequest::previous_for(&first, 50).is_none());
        assert_eq!(
            PageRequest::next_for(&first, 50).map(|request| request.page),
            Some(1)
        );
    }

    #[test]
    fn next_page_stops_at_the_largest_page_number() {
        let result = QueryResult::new("c1", "SELECT * FROM t")
            .with_query_type("showRecords", json!(null))
            .with_pagination(u64::MAX, 50, None);
        assert!(PageRequest::next_for(&result, 50).is_none());
        assert_eq!(
            PageRequest::previous_for(&result, 50).map(|request| request.page),
            Some(u64::MAX - 1)
        );
    }

    #[test]
    fn page_window_requires_query_type() {
        let result = QueryResult::new("c1", "SELECT 1").with_pagination(1, 50, None);
        assert!(PageRequest::next_for(&result, 50).is_none());
        assert!(PageRequest::previous_for(&result, 50).is_none());
    }
}
