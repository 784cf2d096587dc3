//! # LastWord Core
//!
//! Pure primitives for the LastWord conditional release engine: records,
//! deadlines, the message lifecycle, delivery tiers, audit entries and
//! release capabilities.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Message`] - A sealed message under watch, with its recipients
//! - [`MessageStatus`] - Lifecycle state; see [`next_status`] for the table
//! - [`CheckInPolicy`] - Validated interval and grace, computes deadlines
//! - [`ReleaseCapability`] - Signed permission to reveal one payload
//! - [`AuditEntry`] - Append-only record committed with every transition

pub mod audit;
pub mod capability;
pub mod clock;
pub mod crypto;
pub mod deadline;
pub mod error;
pub mod lifecycle;
pub mod message;
pub mod request;
pub mod tier;
pub mod types;
pub mod validation;

pub use audit::{AuditEntry, AuditEvent, SequencedAuditEntry};
pub use capability::{ReleaseAuthority, ReleaseCapability};
pub use clock::{Clock, SystemClock};
pub use crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature, Keypair};
pub use deadline::{compute_deadline, CheckInPolicy};
pub use error::{CoreError, IllegalTransition, ValidationError};
pub use lifecycle::{next_status, MessageStatus, Transition};
pub use message::{
    Channel, DeliveryLease, DeliveryStatus, DissolutionPlan, Message, MessageStatusView,
    Recipient, RecipientStatusView, SealedPayload, User,
};
pub use request::{
    CheckInKind, CheckInSignal, DissolutionPlanRequest, MessageCreateRequest, OwnerAction,
    OwnerActionKind, RecipientRequest,
};
pub use tier::{DeliveryTier, QuorumPolicy, TierPolicy, TierTable};
pub use types::{MessageId, RecipientId, Timestamp, UserId, WorkerId, DAY_MS, HOUR_MS, MINUTE_MS};
pub use validation::{
    validate_check_in, validate_create_request, validate_dissolution_plan, PolicyLimits,
};
