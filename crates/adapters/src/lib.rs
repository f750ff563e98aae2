pub mod channel;
pub mod driver;
pub mod json_lines;
pub mod slot;

use sqlpanel_core::messages::EnvelopeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("channel already has an active subscription")]
    AlreadySubscribed,
    #[error("channel is closed")]
    Closed,
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error("invalid JSON envelope: {source}")]
    Json {
        #[source]
        source: serde_json::Error,
    },
    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),
}

