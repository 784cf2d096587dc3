//! # LastWord Delivery
//!
//! Moves a released message from `Delivering` to `Delivered` or `Expired`.
//!
//! ## Overview
//!
//! Each [`Orchestrator::deliver`] call is one pass: claim the delivery lease,
//! reveal the content through the vault, attempt every due recipient on its
//! channel, then persist the outcomes. Failed attempts are rescheduled with
//! [`BackoffPolicy`]; a pass never sleeps. When all recipients are settled,
//! or the per-message ceiling passes, the tier's quorum decides the final
//! state.
//!
//! ## Collaborators
//!
//! - [`ChannelAdapter`] - one per channel (email, SMS, webhook)
//! - [`DurableBackup`] - off-site copy of the sealed payload for the
//!   `DecentralizedBackup` tier
//! - [`AlertSink`] - operator alerts for integrity failures
//!
//! ## Pass Flow
//!
//! ```text
//! claim lease ──> reveal ──> backup (once) ──> send due recipients
//!                   │                                   │
//!                   └─ integrity failure ─> Expired      v
//!                                             record outcomes (CAS)
//!                                                       │
//!                                   settled? ──> quorum ──> Delivered | Expired
//! ```

pub mod backoff;
pub mod backup;
pub mod channel;
pub mod error;
pub mod orchestrator;

pub use backoff::BackoffPolicy;
pub use backup::{AlertSink, DurableBackup, IntegrityAlert, TracingAlertSink};
pub use channel::{
    ChannelAdapter, ChannelRegistry, ContentKind, DeliveryContent, SendOutcome,
    DEFAULT_SEND_TIMEOUT,
};
pub use error::{DeliveryError, Result};
pub use orchestrator::{DeliveryConfig, Orchestrator, PassOutcome, PassReport};
