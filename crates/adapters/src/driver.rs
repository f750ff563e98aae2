use std::time::{Duration, Instant};

use sqlpanel_core::channel::MessageChannel;
use sqlpanel_core::panel::Panel;
use sqlpanel_core::state::PersistenceSlot;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use crate::channel::Subscription;

pub const DEFAULT_TICK: Duration = Duration::from_millis(250);

/// Feeds every inbound envelope to `panel` and checks the page request
/// timeout every `tick`, until the host side closes.
///
/// The panel is only touched from this loop, one event at a time.
pub async fn drive_panel<C, S>(
    panel: &mut Panel<C, S>,
    subscription: &mut Subscription,
    tick: Duration,
) where
    C: MessageChannel,
    S: PersistenceSlot,
{
    let mut ticker = time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    panel.mount();

    loop {
        tokio::select! {
            envelope = subscription.recv() => {
                let Some(envelope) = envelope else {
                    debug!("host channel closed; stopping panel loop");
                    return;
                };
                panel.handle_envelope(envelope);
            }
            _ = ticker.tick() => {
                panel.poll_timeout(Instant::now());
            }
        }
    }
}
