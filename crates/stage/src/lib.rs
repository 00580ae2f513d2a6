#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! The staging and transition halves of a synchronization cycle: once the
//! reconciler has decided what must change, [`staging`] receives the
//! content those changes need into a content-addressed directory, and
//! [`transition`] moves it into place atomically, one path at a time.
//!
//! # Design
//!
//! Staging and transition are deliberately split: staging can be driven
//! incrementally as rsync transmissions for individual files complete
//! (possibly out of order, possibly concurrently with other paths still
//! scanning), while transition is a single best-effort batch applied once
//! every path a change batch needs is fully staged. [`transition::apply`]
//! verifies each path's pre-state immediately before mutating it rather
//! than trusting the reconciler's stale snapshot, catching the case where
//! something else touched the path in between.
//!
//! # Invariants
//!
//! - A path already staged with the exact digest a [`staging::StageRequest`]
//!   asks for is never re-transmitted.
//! - [`transition::apply`] never aborts a whole batch for one path's
//!   failure; failures are collected as [`transition::TransitionProblem`]s
//!   and the remaining changes still apply.
//! - A transition never mutates a path whose current entry kind no longer
//!   matches the change's recorded pre-state.

mod staging;
mod transition;

pub use staging::{StageError, StageRequest, StageResponse, Stager};
pub use transition::{
    apply, TransitionDefaults, TransitionError, TransitionOutcome, TransitionProblem,
    DEFAULT_DIRECTORY_MODE, DEFAULT_FILE_MODE,
};
