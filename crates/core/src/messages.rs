use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::result_set::{QueryResult, ResultBatch};
use crate::state::PanelState;

pub const ACTION_QUERY_RESULTS: &str = "queryResults";
pub const ACTION_RESET: &str = "reset";
pub const ACTION_GET_STATE: &str = "getState";
pub const ACTION_VIEW_READY: &str = "viewReady";
pub const ACTION_RECEIVED_STATE: &str = "receivedState";
pub const ACTION_CALL: &str = "call";

/// The unit exchanged across the panel/host boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
}

impl Envelope {
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            payload: None,
            generation: None,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    #[must_use]
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("no handler for action `{0}`")]
    UnknownAction(String),
    #[error("invalid payload for action `{action}`: {source}")]
    Payload {
        action: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode `{action}` envelope: {source}")]
    Encode {
        action: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostAction {
    QueryResults,
    Reset,
    GetState,
}

impl HostAction {
    fn parse(action: &str) -> Option<Self> {
        match action {
            ACTION_QUERY_RESULTS => Some(Self::QueryResults),
            ACTION_RESET => Some(Self::Reset),
            ACTION_GET_STATE => Some(Self::GetState),
            _ => None,
        }
    }
}

/// Host → panel messages.
#[derive(Debug, Clone, PartialEq)]
pub enum HostMessage {
    QueryResults {
        results: Vec<QueryResult>,
        generation: Option<u64>,
    },
    Reset,
    GetState,
}

impl HostMessage {
    /// `Ok(None)` means the envelope carried no (or an empty) action and is a
    /// no-op.
    pub fn decode(envelope: Envelope) -> Result<Option<Self>, EnvelopeError> {
        let Some(action) = envelope.action.filter(|action| !action.is_empty()) else {
            return Ok(None);
        };
        let Some(kind) = HostAction::parse(&action) else {
            return Err(EnvelopeError::UnknownAction(action));
        };

        let message = match kind {
            HostAction::QueryResults => {
                let payload = envelope.payload.unwrap_or(Value::Null);
                let batch: ResultBatch = serde_json::from_value(payload)
                    .map_err(|source| EnvelopeError::Payload { action, source })?;
                Self::QueryResults {
                    results: batch.into_results(),
                    generation: envelope.generation,
                }
            }
            HostAction::Reset => Self::Reset,
            HostAction::GetState => Self::GetState,
        };
        Ok(Some(message))
    }

    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Self::QueryResults { .. } => ACTION_QUERY_RESULTS,
            Self::Reset => ACTION_RESET,
            Self::GetState => ACTION_GET_STATE,
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, EnvelopeError> {
        let envelope = Envelope::new(self.action());
        match self {
            Self::QueryResults {
                results,
                generation,
            } => {
                let payload =
                    serde_json::to_value(results).map_err(|source| EnvelopeError::Encode {
                        action: ACTION_QUERY_RESULTS,
                        source,
                    })?;
                let envelope = envelope.with_payload(payload);
                Ok(match generation {
                    Some(generation) => envelope.with_generation(*generation),
                    None => envelope,
                })
            }
            Self::Reset | Self::GetState => Ok(envelope),
        }
    }
}

/// Payload of an outbound `call`: a namespaced host command and its
/// positional arguments `[queryParams, page, pageSize]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub command: String,
    pub args: Vec<Value>,
    #[serde(skip)]
    pub generation: u64,
}

impl CallRequest {
    #[must_use]
    pub fn page(
        command: impl Into<String>,
        query_params: Value,
        page: u64,
        page_size: u64,
        generation: u64,
    ) -> Self {
        Self {
            command: command.into(),
            args: vec![query_params, json!(page), json!(page_size)],
            generation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PanelAction {
    ViewReady,
    ReceivedState,
    Call,
}

impl PanelAction {
    fn parse(action: &str) -> Option<Self> {
        match action {
            ACTION_VIEW_READY => Some(Self::ViewReady),
            ACTION_RECEIVED_STATE => Some(Self::ReceivedState),
            ACTION_CALL => Some(Self::Call),
            _ => None,
        }
    }
}

/// Panel → host messages.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelMessage {
    ViewReady,
    ReceivedState(Box<PanelState>),
    Call(CallRequest),
}

impl PanelMessage {
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Self::ViewReady => ACTION_VIEW_READY,
            Self::ReceivedState(_) => ACTION_RECEIVED_STATE,
            Self::Call(_) => ACTION_CALL,
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, EnvelopeError> {
        let action = self.action();
        let encode = |source: serde_json::Error| EnvelopeError::Encode { action, source };
        let envelope = Envelope::new(action);
        match self {
            Self::ViewReady => Ok(envelope.with_payload(Value::Bool(true))),
            Self::ReceivedState(state) => Ok(envelope
                .with_payload(serde_json::to_value(state.as_ref()).map_err(encode)?)),
            Self::Call(call) => Ok(envelope
                .with_payload(serde_json::to_value(call).map_err(encode)?)
                .with_generation(call.generation)),
        }
    }

    /// Host-side decoding, used by transports and host implementations.
    pub fn decode(envelope: Envelope) -> Result<Option<Self>, EnvelopeError> {
        let Some(action) = envelope.action.filter(|action| !action.is_empty()) else {
            return Ok(None);
        };
        let Some(kind) = PanelAction::parse(&action) else {
            return Err(EnvelopeError::UnknownAction(action));
        };
        let payload = envelope.payload.unwrap_or(Value::Null);

        let message = match kind {
            PanelAction::ViewReady => Self::ViewReady,
            PanelAction::ReceivedState => {
                let state: PanelState = serde_json::from_value(payload)
                    .map_err(|source| EnvelopeError::Payload { action, source })?;
                Self::ReceivedState(Box::new(state))
            }
            PanelAction::Call => {
                let mut call: CallRequest = serde_json::from_value(payload)
                    .map_err(|source| EnvelopeError::Payload { action, source })?;
                call.generation = envelope.generation.unwrap_or_default();
                Self::Call(call)
            }
        };
        Ok(Some(message))
    }
}
