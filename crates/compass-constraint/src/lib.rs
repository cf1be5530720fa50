//! compass-constraint — pre/post policy rules for formation mutations.
//!
//! A [`FormationConstraint`](compass_state::FormationConstraint) names an
//! operator from a closed set, the operation it gates, and the resource type
//! and subtype it applies to. The [`ConstraintEngine`] resolves the
//! constraints visible on a formation template, renders their input
//! templates and runs the operators through the [`OperatorRegistry`].
//! The [`ConstraintCatalog`] manages constraints and their attachments.

pub mod catalog;
pub mod engine;
pub mod error;
pub mod operator;
pub mod registry;

pub use catalog::{ConstraintCatalog, ConstraintInput, ConstraintUpdate};
pub use engine::{ANY_SUBTYPE, ConstraintContext, ConstraintEngine, Denial, MemberFact, Verdict};
pub use error::{ConstraintError, ConstraintResult};
pub use operator::{Decision, OperatorKind};
pub use registry::{OperatorFn, OperatorRegistry};
