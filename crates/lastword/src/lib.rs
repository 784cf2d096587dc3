//! # LastWord
//!
//! A conditional message release engine. A user writes sealed messages and
//! periodically checks in; if they stop checking in past their deadline, the
//! messages are released to their recipients.
//!
//! ## Overview
//!
//! - **Check-ins** move the deadline of every watched message forward
//! - **Sweeps** find messages whose deadline passed and start their release
//! - **Delivery** reveals content through the vault and sends it over each
//!   recipient's channel, with retries, until the tier's quorum decides the
//!   outcome
//! - **Audit** every transition and attempt is recorded atomically with it
//!
//! ## Lifecycle
//!
//! ```text
//! Draft ──▶ Active ⇄ Paused
//!   │         │
//!   │         └──(deadline)──▶ Delivering ──▶ Delivered | Expired
//!   └──────────────┴──▶ Cancelled
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lastword::{Engine, EngineConfig};
//! use lastword::core::{CheckInSignal, ReleaseAuthority, User, UserId};
//! use lastword::store::SqliteStore;
//! use lastword::vault::{Vault, VaultSecret};
//!
//! async fn example() {
//!     let authority = ReleaseAuthority::generate();
//!     let vault = Arc::new(Vault::new(VaultSecret::generate(), authority.public_key()));
//!     let store = SqliteStore::open("lastword.db").unwrap();
//!
//!     let engine = Engine::builder(store, authority, vault)
//!         .config(EngineConfig::default())
//!         .build();
//!
//!     let user = User::new(UserId::generate(), 7, 3, None).unwrap();
//!     engine.upsert_user(&user).await.unwrap();
//!     engine
//!         .record_check_in(&CheckInSignal::manual(user.id, 0))
//!         .await
//!         .unwrap();
//!
//!     // let (_tx, rx) = tokio::sync::watch::channel(false);
//!     // engine.scheduler().run(rx).await;
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `lastword::core` - Records, lifecycle, deadlines, audit entries
//! - `lastword::store` - Storage abstraction, memory and SQLite stores
//! - `lastword::vault` - Sealing and capability-gated reveal
//! - `lastword::delivery` - Channel adapters and the delivery orchestrator

pub mod checkin;
pub mod config;
pub mod engine;
pub mod error;
pub mod scheduler;

pub use lastword_core as core;
pub use lastword_delivery as delivery;
pub use lastword_store as store;
pub use lastword_vault as vault;

pub use checkin::{CheckInOutcome, CheckInTracker};
pub use config::{EngineConfig, SchedulerConfig};
pub use engine::{ActionOutcome, Engine, EngineBuilder};
pub use error::{EngineError, Result};
pub use scheduler::{Scheduler, SweepReport};

pub use lastword_core::{
    CheckInSignal, DeliveryTier, Message, MessageCreateRequest, MessageId, MessageStatus,
    MessageStatusView, OwnerAction, OwnerActionKind, User, UserId,
};
