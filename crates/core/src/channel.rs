use std::collections::VecDeque;

use crate::messages::PanelMessage;

/// Outbound half of the panel/host channel.
///
/// Sending never fails from the panel's point of view: delivery problems
/// belong to the transport, which reports them through its own logging.
pub trait MessageChannel {
    fn send(&mut self, message: PanelMessage);
}

impl<C: MessageChannel + ?Sized> MessageChannel for Box<C> {
    fn send(&mut self, message: PanelMessage) {
        (**self).send(message);
    }
}

/// Queue of outbound messages for embedders that pull instead of push.
#[derive(Debug, Default)]
pub struct Outbox {
    messages: VecDeque<PanelMessage>,
}

impl Outbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn drain(&mut self) -> Vec<PanelMessage> {
        self.messages.drain(..).collect()
    }
}

impl MessageChannel for Outbox {
    fn send(&mut self, message: PanelMessage) {
        self.messages.push_back(message);
    }
}

#[cfg(test)]
mod tests {
    use super::{MessageChannel, Outbox};
    use crate::messages::PanelMessage;

    #[test]
    fn outbox_preserves_send_order() {
        let mut outbox = Outbox::new();
        outbox.send(PanelMessage::ViewReady);
        outbox.send(PanelMessage::ReceivedState(Box::default()));

        assert_eq!(outbox.len(), 2);
        let drained = outbox.drain();
        assert!(matches!(drained[0], PanelMessage::ViewReady));
        assert!(matches!(drained[1], PanelMessage::ReceivedState(_)));
        assert!(outbox.is_empty());
    }
}
