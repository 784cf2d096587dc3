//! # LastWord Store
//!
//! Storage abstraction for the LastWord engine. A trait-based interface for
//! users, messages and the audit log, with SQLite and in-memory
//! implementations.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage with identical semantics
//! - [`StoreExt::mutate_message`] - Read-modify-CAS retry loop
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lastword_store::{SqliteStore, Store};
//!
//! async fn example() {
//!     let store = SqliteStore::open("lastword.db").unwrap();
//!     let page = store.audit_since(0, 100).await.unwrap();
//!     # let _ = page;
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Optimistic versioning**: every message write is a compare-and-swap on
//!   the record's version; losers re-read and retry
//! - **Write-ahead audit**: audit entries commit with the write they describe
//! - **Monotonic check-ins**: a user's last check-in never moves backwards

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

#[cfg(test)]
mod testing;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{CasResult, CheckInWrite, Mutated, Mutation, Store, StoreExt, DEFAULT_CAS_ATTEMPTS};
