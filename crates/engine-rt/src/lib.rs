//! Real-time primitives shared across the Harmoniq synthesis engine.

pub mod clock;
pub mod notify;
pub mod queue;

pub use clock::TickClock;
pub use notify::{notification_channel, ControlEvent, Notifications, Notifier};
pub use queue::{EventQueue, QueueError};
