//! Fire-and-forget notifications from the realtime thread to the control domain.

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Events raised by modules while running inside the realtime thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// A PCM input bridge performed its first evaluation; capture is live.
    PcmInputActive,
    /// The scheduler finished its teardown and left the realtime loop.
    EngineStopped,
}

/// Sending half, handed to modules through their process and reset contexts.
///
/// Sends never block and never allocate: the channel is bounded and a full
/// channel drops the event (counted in [`Notifier::dropped`]).
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: Sender<ControlEvent>,
    dropped: Arc<AtomicU64>,
}

impl Notifier {
    pub fn notify(&self, event: ControlEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Receiving half, owned by the control domain.
#[derive(Debug, Clone)]
pub struct Notifications {
    receiver: Receiver<ControlEvent>,
}

impl Notifications {
    pub fn try_recv(&self) -> Option<ControlEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<ControlEvent> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Collects every event that is currently queued.
    pub fn drain(&self) -> Vec<ControlEvent> {
        self.receiver.try_iter().collect()
    }
}

/// Creates a bounded notification channel.
pub fn notification_channel(capacity: usize) -> (Notifier, Notifications) {
    let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
    (
        Notifier {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        Notifications { receiver },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_is_counted_not_blocking() {
        let (notifier, notifications) = notification_channel(1);
        notifier.notify(ControlEvent::PcmInputActive);
        notifier.notify(ControlEvent::EngineStopped);
        assert_eq!(notifier.dropped(), 1);
        assert_eq!(notifications.drain(), vec![ControlEvent::PcmInputActive]);
        assert_eq!(notifications.try_recv(), None);
    }
}
