use sqlpanel_core::messages::{Envelope, PanelMessage};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::channel::PanelTransport;
use crate::TransportError;

/// Renders one outbound message as a single JSON line (without the newline).
pub fn encode_line(message: &PanelMessage) -> Result<String, TransportError> {
    let envelope = message.to_envelope()?;
    serde_json::to_string(&envelope).map_err(|source| TransportError::Json { source })
}

pub fn decode_line(line: &str) -> Result<Envelope, TransportError> {
    serde_json::from_str(line).map_err(|source| TransportError::Json { source })
}

/// Bridges newline-delimited JSON envelopes on `reader`/`writer` to a
/// [`PanelTransport`]. Must be called inside a tokio runtime.
///
/// Lines that are not valid envelopes are logged and skipped. The inbound
/// queue closes when `reader` reaches end of input.
pub fn spawn_json_lines<R, W>(reader: R, writer: W) -> PanelTransport
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (transport, _writer) = bridge_json_lines(reader, writer);
    transport
}

/// Like [`spawn_json_lines`], also returning the writer task. The task ends
/// once every sender for the transport is dropped and the queued messages
/// are flushed, so awaiting it guarantees nothing outbound is lost.
pub fn bridge_json_lines<R, W>(reader: R, writer: W) -> (PanelTransport, JoinHandle<()>)
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    tokio::spawn(read_envelopes(reader, inbound_tx));
    let writer = tokio::spawn(write_messages(writer, outbound_rx));

    (PanelTransport::new(outbound_tx, inbound_rx), writer)
}

async fn read_envelopes<R>(reader: R, inbound: UnboundedSender<Envelope>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("host input closed");
                return;
            }
            Err(error) => {
                warn!(%error, "failed to read from host");
                return;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match decode_line(&line) {
            Ok(envelope) => {
                if inbound.send(envelope).is_err() {
                    debug!("panel side dropped; stopping reader");
                    return;
                }
            }
            Err(error) => warn!(%error, "skipping undecodable host line"),
        }
    }
}

async fn write_messages<W>(mut writer: W, mut outbound: UnboundedReceiver<PanelMessage>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let line = match encode_line(&message) {
            Ok(line) => line,
            Err(error) => {
                warn!(%error, action = message.action(), "dropping unencodable message");
                continue;
            }
        };

        if let Err(error) = write_line(&mut writer, &line).await {
            warn!(%error, "failed to write to host; stopping writer");
            return;
        }
    }
}

async fn write_line<W>(writer: &mut W, line: &str) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
