use std::sync::{Arc, Mutex, PoisonError};

use sqlpanel_core::channel::MessageChannel;
use sqlpanel_core::messages::{Envelope, HostMessage, PanelMessage};
use tokio::sync::mpsc::{
    self,
    error::TryRecvError,
    UnboundedReceiver, UnboundedSender,
};
use tracing::warn;

use crate::TransportError;

type InboundSlot = Arc<Mutex<Option<UnboundedReceiver<Envelope>>>>;

/// Panel side of a transport: an outbound sender plus the inbound queue,
/// which at most one [`Subscription`] can hold at a time.
#[derive(Debug, Clone)]
pub struct PanelTransport {
    outbound: UnboundedSender<PanelMessage>,
    inbound: InboundSlot,
}

impl PanelTransport {
    pub(crate) fn new(
        outbound: UnboundedSender<PanelMessage>,
        inbound: UnboundedReceiver<Envelope>,
    ) -> Self {
        Self {
            outbound,
            inbound: Arc::new(Mutex::new(Some(inbound))),
        }
    }

    #[must_use]
    pub fn sender(&self) -> ChannelSender {
        ChannelSender {
            outbound: self.outbound.clone(),
        }
    }

    /// Acquires the inbound queue. Fails while another subscription is alive;
    /// dropping that subscription hands the queue back.
    pub fn subscribe(&self) -> Result<Subscription, TransportError> {
        let receiver = self
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(TransportError::AlreadySubscribed)?;

        Ok(Subscription {
            receiver: Some(receiver),
            home: Arc::clone(&self.inbound),
        })
    }
}

/// Outbound half handed to the panel.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    outbound: UnboundedSender<PanelMessage>,
}

impl MessageChannel for ChannelSender {
    fn send(&mut self, message: PanelMessage) {
        let action = message.action();
        if self.outbound.send(message).is_err() {
            warn!(action, "host side of the channel is closed; dropping message");
        }
    }
}

/// Live registration for inbound envelopes, delivered in arrival order.
#[derive(Debug)]
pub struct Subscription {
    receiver: Option<UnboundedReceiver<Envelope>>,
    home: InboundSlot,
}

impl Subscription {
    /// Next envelope, or `None` once the host side has gone away.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.as_mut()?.recv().await
    }

    /// Non-blocking variant for render loops. `Ok(None)` means nothing queued.
    pub fn try_recv(&mut self) -> Result<Option<Envelope>, TransportError> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Err(TransportError::Closed);
        };
        match receiver.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::Closed),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            *self.home.lock().unwrap_or_else(PoisonError::into_inner) = Some(receiver);
        }
    }
}

/// Host side of an in-memory channel.
#[derive(Debug)]
pub struct HostEnd {
    inbound: Option<UnboundedSender<Envelope>>,
    outbound: UnboundedReceiver<PanelMessage>,
}

impl HostEnd {
    pub fn send(&self, message: &HostMessage) -> Result<(), TransportError> {
        self.send_envelope(message.to_envelope()?)
    }

    pub fn send_envelope(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.inbound
            .as_ref()
            .ok_or(TransportError::Closed)?
            .send(envelope)
            .map_err(|_| TransportError::Closed)
    }

    /// Stops sending to the panel while still receiving what it sends back.
    pub fn close(&mut self) {
        self.inbound = None;
    }

    pub async fn recv(&mut self) -> Option<PanelMessage> {
        self.outbound.recv().await
    }

    #[must_use]
    pub fn try_recv(&mut self) -> Option<PanelMessage> {
        self.outbound.try_recv().ok()
    }
}

/// Connected in-process pair, for embedding a host in the same process.
#[must_use]
pub fn memory_channel() -> (PanelTransport, HostEnd) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    (
        PanelTransport::new(outbound_tx, inbound_rx),
        HostEnd {
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use sqlpanel_core::channel::MessageChannel;
    use sqlpanel_core::messages::{Envelope, HostMessage, PanelMessage};

    use super::memory_channel;
    use crate::TransportError;

    #[test]
    fn only_one_subscription_at_a_time() {
        let (transport, _host) = memory_channel();
        let first = transport.subscribe().expect("first subscribe should succeed");
        assert!(matches!(
            transport.subscribe(),
            Err(TransportError::AlreadySubscribed)
        ));

        drop(first);
        transport
            .subscribe()
            .expect("released subscription should be reusable");
    }

    #[test]
    fn envelopes_arrive_in_order_and_survive_resubscribe() {
        let (transport, host) = memory_channel();
        host.send(&HostMessage::Reset).expect("send reset");
        host.send(&HostMessage::GetState).expect("send getState");

        let mut subscription = transport.subscribe().expect("subscribe");
        let first = subscription
            .try_recv()
            .expect("channel open")
            .expect("first envelope queued");
        assert_eq!(first.action.as_deref(), Some("reset"));
        drop(subscription);

        let mut subscription = transport.subscribe().expect("resubscribe");
        let second = subscription
            .try_recv()
            .expect("channel open")
            .expect("second envelope queued");
        assert_eq!(second.action.as_deref(), Some("getState"));
        assert!(subscription.try_recv().expect("channel open").is_none());
    }

    #[test]
    fn sender_reaches_host_end() {
        let (transport, mut host) = memory_channel();
        let mut sender = transport.sender();
        sender.send(PanelMessage::ViewReady);

        assert_eq!(host.try_recv(), Some(PanelMessage::ViewReady));
        assert_eq!(host.try_recv(), None);
    }

    #[test]
    fn closed_host_is_reported() {
        let (transport, mut host) = memory_channel();
        host.send_envelope(Envelope::new("reset")).expect("send");
        host.close();
        assert!(matches!(
            host.send_envelope(Envelope::new("reset")),
            Err(TransportError::Closed)
        ));

        let mut subscription = transport.subscribe().expect("subscribe");
        assert!(subscription.try_recv().expect("queued envelope").is_some());
        assert!(matches!(
            subscription.try_recv(),
            Err(TransportError::Closed)
        ));
    }
}
