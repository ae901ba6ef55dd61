//! Declarative reconciliation primitives
//!
//! - [`ensure_named_object`]: fetch, build desired state, compare, and write
//!   at most once (create or resourceVersion-guarded update)
//! - [`reconcile_objects`] and its per-kind instantiations: drive the
//!   ensure engine over a list of named creators, fail-fast
//! - creators and modifiers: the function types builders plug into
//!
//! The engine never merges: a creator receives the full current object (or
//! a blank one) and returns the full desired object.

pub mod batch;
pub mod compare;
pub mod creator;
pub mod ensure;
pub mod error;
pub mod kind;

pub use batch::*;
pub use compare::semantically_equal;
pub use creator::{
    NamedObjectCreator, ObjectCreator, ObjectModifier, named_creator, owner_reference_modifier,
};
pub use ensure::{EnsureOutcome, ensure_named_object};
pub use error::{BuildError, ReconcileError};
pub use kind::ManagedKind;

#[cfg(test)]
mod ensure_test;
