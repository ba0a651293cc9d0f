//! Status fan-out for design sessions and orders.
//!
//! Writers append through a [`BroadcastEventStore`], which publishes every
//! committed envelope on an in-process channel. The [`StatusNotifier`]
//! turns that firehose into per-session and per-order streams. A snapshot
//! loaded from the store is always the source of truth; the streams only
//! save clients from polling it.

pub mod broadcast_store;
pub mod error;
pub mod events;
pub mod notifier;

pub use broadcast_store::BroadcastEventStore;
pub use error::{Result, StatusError};
pub use events::{OrderSnapshot, SessionSnapshot, StageEvent, StagePosition};
pub use notifier::{OrderStream, StageEventStream, StatusNotifier};
