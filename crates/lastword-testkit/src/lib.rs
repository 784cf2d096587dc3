//! # LastWord Testkit
//!
//! Testing utilities for the LastWord release engine.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Clock**: [`ManualClock`], moved by hand so tests can jump days
//! - **Doubles**: recording and failing durable backups, a recording alert
//!   sink, a store that fails writes on demand
//! - **Fixtures**: an authority and vault that trust each other, scriptable
//!   channels, request builders
//! - **Generators**: proptest strategies for policies, recipients and tiers
//!
//! ## Test Fixtures
//!
//! ```rust
//! use lastword_core::DeliveryTier;
//! use lastword_testkit::{two_email_recipients, TestFixture};
//!
//! let fixture = TestFixture::new();
//! let user = fixture.user(7, 3, Some(0));
//! let request = fixture.request(user.id, DeliveryTier::Standard, two_email_recipients());
//! assert_eq!(request.recipients.len(), 2);
//! ```

pub mod clock;
pub mod doubles;
pub mod fixtures;
pub mod generators;

pub use clock::ManualClock;
pub use doubles::{FailingBackup, FlakyStore, RecordingAlertSink, RecordingBackup};
pub use fixtures::{two_email_recipients, TestFixture, PLAINTEXT};

/// Install a test-friendly tracing subscriber. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}
