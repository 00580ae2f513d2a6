#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! The engine's verbosity level and the `tracing-subscriber` installer
//! that every process entry point (the manager, and the agent binary) uses
//! instead of configuring logging ad hoc.
//!
//! # Design
//!
//! [`Verbosity`] is a small ordered level, matching the teacher's
//! verbosity-flag-to-filter mapping: each step up widens which targets get
//! logged without requiring callers to hand-write `EnvFilter` directives.
//! [`install`] is idempotent-by-convention (callers invoke it exactly once
//! per process) and installs a global default subscriber.
//!
//! # Invariants
//!
//! - [`Verbosity::Quiet`] never emits anything below `error`.
//! - An explicit `RUST_LOG` environment variable always overrides the
//!   level-derived filter, matching `EnvFilter::from_default_env`'s normal
//!   precedence.

use std::str::FromStr;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// The engine's four logging verbosity levels, from least to most chatty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Only fatal session errors.
    Quiet,
    /// Errors, warnings (conflicts, per-path problems), and state
    /// transitions at `info`.
    Normal,
    /// `Normal` plus per-file scan/stage/transition detail at `debug`.
    Verbose,
    /// Everything, including `trace`-level protocol framing detail.
    Debug,
}

impl Verbosity {
    fn level_filter(self) -> LevelFilter {
        match self {
            Self::Quiet => LevelFilter::ERROR,
            Self::Normal => LevelFilter::INFO,
            Self::Verbose => LevelFilter::DEBUG,
            Self::Debug => LevelFilter::TRACE,
        }
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Self::Normal
    }
}

impl FromStr for Verbosity {
    type Err = UnknownVerbosity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quiet" => Ok(Self::Quiet),
            "normal" => Ok(Self::Normal),
            "verbose" => Ok(Self::Verbose),
            "debug" => Ok(Self::Debug),
            other => Err(UnknownVerbosity(other.to_owned())),
        }
    }
}

/// Returned when a verbosity name doesn't match one of `quiet`, `normal`,
/// `verbose`, or `debug`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown verbosity level {0:?}")]
pub struct UnknownVerbosity(String);

/// Installs a global `tracing-subscriber` `fmt` subscriber filtered to
/// `verbosity`, unless `RUST_LOG` is set in the environment (in which case
/// it takes precedence, matching `EnvFilter`'s normal behavior).
///
/// Returns an error if a global subscriber was already installed; callers
/// are expected to invoke this exactly once, at process start.
pub fn install(verbosity: Verbosity) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.level_filter().to_string()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_orders_from_quiet_to_debug() {
        assert!(Verbosity::Quiet < Verbosity::Normal);
        assert!(Verbosity::Normal < Verbosity::Verbose);
        assert!(Verbosity::Verbose < Verbosity::Debug);
    }

    #[test]
    fn verbosity_parses_known_names() {
        assert_eq!("quiet".parse(), Ok(Verbosity::Quiet));
        assert_eq!("debug".parse(), Ok(Verbosity::Debug));
        assert!("loud".parse::<Verbosity>().is_err());
    }

    #[test]
    fn default_verbosity_is_normal() {
        assert_eq!(Verbosity::default(), Verbosity::Normal);
    }
}
