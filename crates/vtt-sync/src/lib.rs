//! Client-side state synchronization for the virtual tabletop.
//!
//! The pieces, bottom up:
//!
//! - [`ConfirmedState`]: the client's copy of server-acknowledged state.
//! - [`PredictionStore`]: optimistic local patches awaiting confirmation.
//! - [`merge`]: the view a UI renders, confirmed state overlaid with patches.
//! - [`BatchProcessor`] and [`apply_delta`]: how server updates land in
//!   confirmed state.
//! - [`reconcile`]: recovery when the server's state diverges.
//! - [`NetworkMonitor`]: latency, jitter, loss, and quality tier.
//! - [`SyncClient`]: the facade tying them to a [`vtt_net::Transport`].

pub mod client;
pub mod delta;
pub mod error;
pub mod events;
pub mod intent;
pub mod merge;
pub mod monitor;
pub mod prediction;
pub mod processor;
pub mod reconciliation;
pub mod state;

pub use client::{Role, Session, SyncClient};
pub use delta::{DeltaError, MAX_ARRAY_LEN, apply_delta};
pub use error::SyncError;
pub use events::{EventBus, Handler, SubscriptionId, SyncEvent, Topic};
pub use intent::{COMBAT_ENTITY_ID, Intent, InventoryChange};
pub use merge::{merge, merge_record};
pub use monitor::{NetworkMetrics, NetworkMonitor, NetworkQuality, QualityChange};
pub use prediction::{PendingInput, PredictedPatch, PredictionStore};
pub use processor::{AppliedEvent, BatchProcessor, ProcessError, ProcessorStats, TickReport};
pub use reconciliation::{ReconcileReport, reconcile, resync};
pub use state::{ConfirmedState, WriteOutcome};
