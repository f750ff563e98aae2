use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_ERROR_MESSAGE: &str = "Query errored. Check the logs.";

/// One query's rows, columns and metadata as produced by the host.
///
/// Field names follow the host's wire format, so a result set can be passed
/// through `receivedState` and the persisted snapshot untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    #[serde(rename = "connId", default)]
    pub connection_id: Option<String>,
    pub query: String,
    #[serde(rename = "cols", default)]
    pub columns: Vec<String>,
    #[serde(rename = "results", default)]
    pub rows: Vec<Value>,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_params: Option<Value>,
}

impl QueryResult {
    #[must_use]
    pub fn new(connection_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            connection_id: Some(connection_id.into()),
            query: query.into(),
            columns: Vec::new(),
            rows: Vec::new(),
            messages: Vec::new(),
            label: None,
            error: None,
            raw_error: None,
            page: None,
            page_size: None,
            total: None,
            query_type: None,
            query_params: None,
        }
    }

    #[must_use]
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_rows(mut self, rows: Vec<Value>) -> Self {
        self.rows = rows;
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_pagination(mut self, page: u64, page_size: u64, total: Option<u64>) -> Self {
        self.page = Some(page);
        self.page_size = Some(page_size);
        self.total = total;
        self
    }

    #[must_use]
    pub fn with_query_type(mut self, query_type: impl Into<String>, params: Value) -> Self {
        self.query_type = Some(query_type.into());
        self.query_params = Some(params);
        self
    }

    #[must_use]
    pub fn with_error(mut self, raw_error: Value) -> Self {
        self.error = Some(true);
        self.raw_error = Some(raw_error);
        self
    }

    /// Text shown on this result's tab: the host label when given, else the query.
    #[must_use]
    pub fn tab_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.query)
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.unwrap_or(false)
    }

    /// Best-effort human message for a result-carried error.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        if !self.is_error() {
            return None;
        }

        let message = match &self.raw_error {
            Some(Value::String(message)) => message.clone(),
            Some(Value::Object(object)) => object
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| Value::Object(object.clone()).to_string(), str::to_string),
            Some(Value::Null) | None => DEFAULT_ERROR_MESSAGE.to_string(),
            Some(other) => other.to_string(),
        };
        Some(message)
    }

    /// Cell text for `column` in row `row_index`, rendered for display.
    #[must_use]
    pub fn cell_text(&self, row_index: usize, column: &str) -> Option<String> {
        let row = self.rows.get(row_index)?;
        let value = match row {
            Value::Object(record) => record.get(column)?,
            Value::Array(values) => {
                let column_index = self.columns.iter().position(|name| name == column)?;
                values.get(column_index)?
            }
            _ => return None,
        };

        Some(match value {
            Value::String(text) => text.clone(),
            Value::Null => "NULL".to_string(),
            other => other.to_string(),
        })
    }
}

/// A `queryResults` payload: the host sends either one result set or an
/// ordered sequence of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultBatch {
    Many(Vec<QueryResult>),
    One(Box<QueryResult>),
}

impl ResultBatch {
    #[must_use]
    pub fn into_results(self) -> Vec<QueryResult> {
        match self {
            Self::Many(results) => results,
            Self::One(result) => vec![*result],
        }
    }
}
