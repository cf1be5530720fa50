//! compass-state — embedded state store for the formation engine.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for formations, formation templates, participants, memberships,
//! formation assignments, webhooks, constraints, and operations.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{formation_id}/{source_id}/{target_id}`,
//! `{template_id}/{constraint_id}`) enable prefix scans for related records.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. Multi-record mutations that must
//! observe a consistent snapshot run inside a single write transaction.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
