#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! Session identity and layered configuration: the [`Configuration`]
//! struct whose fields are all optional (`None` meaning "inherit"), the
//! [`SessionDescriptor`] that names a session's two endpoints and holds its
//! merged options, and the merge algorithm that resolves a global default,
//! a session override, and an endpoint override into one concrete
//! [`ResolvedConfiguration`].
//!
//! # Design
//!
//! This crate owns no I/O; the manager persists [`SessionDescriptor`]
//! values and the controller resolves a [`Configuration`] once per session
//! before constructing its endpoints.
//!
//! # Invariants
//!
//! - [`Configuration::merge`] never loses a field that the base has and
//!   the override leaves unset.
//! - [`SessionDescriptor::identifier`] and
//!   [`SessionDescriptor::created_at`] are fixed at creation and never
//!   mutated afterward.

mod config;
mod descriptor;

pub use config::{
    merge_layers, ConfigError, Configuration, Labels, OwnershipIdentifier, ResolvedConfiguration,
    Result, DEFAULT_DIRECTORY_MODE, DEFAULT_FILE_MODE, DEFAULT_WATCH_POLLING_INTERVAL,
};
pub use descriptor::{EndpointUrl, SessionDescriptor};
