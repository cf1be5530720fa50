//! compass-formation — formation orchestrator.
//!
//! Owns every formation mutation: creating and deleting formations,
//! assigning and unassigning participants, fanning out notifications to
//! their webhooks, applying asynchronous status callbacks, resyncing and
//! expiring stale pending assignments.
//!
//! # Architecture
//!
//! ```text
//!   API ──▶ Orchestrator ──▶ ConstraintEngine (PRE / POST)
//!                │
//!                ├──▶ StateStore (memberships, assignments, operations)
//!                │
//!                └──▶ Dispatcher ──▶ WebhookTransport ──▶ targets
//!                                                          │
//!   API ◀── status callback ◀───────────────────────────────┘
//! ```
//!
//! The pure pieces live in their own modules: the participant matrix and
//! aggregate state in [`matrix`], the assignment state machine in
//! [`assignment`], caller checks in [`authz`].

pub mod assignment;
pub mod authz;
pub mod callback;
pub mod error;
pub mod locks;
pub mod matrix;
pub mod orchestrator;
pub mod participants;
pub mod registry;
pub mod resync;
pub mod status;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod testing;

pub use assignment::{Applied, StatusReport};
pub use authz::{Caller, ConsumerDirectory};
pub use callback::CallbackOutcome;
pub use error::{FormationError, FormationResult};
pub use orchestrator::{
    AssignRequest, DeleteOutcome, MutationOutcome, NotificationErrors, Orchestrator,
    OrchestratorConfig, UnassignRequest,
};
pub use resync::ResyncReport;
pub use status::{Condition, FormationStatus, StatusError};
pub use sweeper::Sweeper;
