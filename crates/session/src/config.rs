//! Layered session configuration: every option is optional, with `None`
//! meaning "inherit the value from whichever layer is merged next".

use model::{ProbeMode, ScanMode, StageMode, SymbolicLinkMode, SynchronizationMode, WatchMode};
use model::IgnoreVCSMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// A numeric or symbolic owner/group identifier, as accepted by
/// `defaultOwner`/`defaultGroup`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnershipIdentifier {
    /// A numeric uid/gid.
    Id(u32),
    /// A symbolic user or group name.
    Name(String),
}

/// Errors produced while validating or merging [`Configuration`] layers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A symbolic owner/group name was empty.
    #[error("ownership identifier name is empty")]
    EmptyOwnershipName,
    /// `watchPollingInterval` was set to zero, which is not a valid polling
    /// period.
    #[error("watch polling interval must be greater than zero")]
    ZeroPollingInterval,
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Every tunable option a session exposes. All fields are optional;
/// [`Configuration::merge`] resolves a concrete value by walking layers in
/// precedence order and taking the first `Some`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Conflict resolution policy. See [`SynchronizationMode`].
    pub synchronization_mode: Option<SynchronizationMode>,
    /// Cap on total tree size; `Some(0)` means unlimited.
    pub maximum_entry_count: Option<u64>,
    /// Cap on bytes staged per file; `Some(0)` means unlimited.
    pub maximum_staging_file_size: Option<u64>,
    /// Whether to probe filesystem capabilities. See [`ProbeMode`].
    pub probe_mode: Option<ProbeMode>,
    /// Full vs. accelerated scanning. See [`ScanMode`].
    pub scan_mode: Option<ScanMode>,
    /// Where staging directories live. See [`StageMode`].
    pub stage_mode: Option<StageMode>,
    /// How symbolic links are represented. See [`SymbolicLinkMode`].
    pub symbolic_link_mode: Option<SymbolicLinkMode>,
    /// How filesystem changes are observed between scans. See [`WatchMode`].
    pub watch_mode: Option<WatchMode>,
    /// Polling interval in seconds, used when watching falls back to
    /// polling.
    pub watch_polling_interval: Option<u64>,
    /// Ordered ignore patterns; `!`-prefixed entries re-include.
    pub ignores: Option<Vec<String>>,
    /// Whether conventional VCS directories are ignored. See
    /// [`IgnoreVCSMode`].
    pub ignore_vcs_mode: Option<IgnoreVCSMode>,
    /// Permission bits applied to newly created files in portable mode.
    pub default_file_mode: Option<u32>,
    /// Permission bits applied to newly created directories in portable
    /// mode.
    pub default_directory_mode: Option<u32>,
    /// Owner applied to newly created entries when set.
    pub default_owner: Option<OwnershipIdentifier>,
    /// Group applied to newly created entries when set.
    pub default_group: Option<OwnershipIdentifier>,
    /// Whether alpha wins divergent conflicts in
    /// [`SynchronizationMode::TwoWayResolved`].
    pub alpha_wins_on_conflict: Option<bool>,
    /// Whether beta wins divergent conflicts in
    /// [`SynchronizationMode::TwoWayResolved`]. If both hints are set,
    /// `alpha_wins_on_conflict` takes precedence.
    pub beta_wins_on_conflict: Option<bool>,
}

/// Default permission bits for newly created files in portable mode.
pub const DEFAULT_FILE_MODE: u32 = 0o600;
/// Default permission bits for newly created directories in portable mode.
pub const DEFAULT_DIRECTORY_MODE: u32 = 0o700;
/// Default polling interval, in seconds, when watching falls back to
/// polling.
pub const DEFAULT_WATCH_POLLING_INTERVAL: u64 = 10;

impl Configuration {
    /// An empty configuration: every field inherits from whatever it is
    /// merged with.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Merges `override_` on top of `self`, preferring `override_`'s value
    /// for every field it sets and falling back to `self`'s otherwise.
    /// Used to layer a session-level override on top of a global default,
    /// and (for remote endpoints) an endpoint-specific override on top of
    /// that.
    #[must_use]
    pub fn merge(&self, override_: &Self) -> Self {
        Self {
            synchronization_mode: override_.synchronization_mode.or(self.synchronization_mode),
            maximum_entry_count: override_.maximum_entry_count.or(self.maximum_entry_count),
            maximum_staging_file_size: override_
                .maximum_staging_file_size
                .or(self.maximum_staging_file_size),
            probe_mode: override_.probe_mode.or(self.probe_mode),
            scan_mode: override_.scan_mode.or(self.scan_mode),
            stage_mode: override_.stage_mode.or(self.stage_mode),
            symbolic_link_mode: override_.symbolic_link_mode.or(self.symbolic_link_mode),
            watch_mode: override_.watch_mode.or(self.watch_mode),
            watch_polling_interval: override_
                .watch_polling_interval
                .or(self.watch_polling_interval),
            ignores: override_.ignores.clone().or_else(|| self.ignores.clone()),
            ignore_vcs_mode: override_.ignore_vcs_mode.or(self.ignore_vcs_mode),
            default_file_mode: override_.default_file_mode.or(self.default_file_mode),
            default_directory_mode: override_
                .default_directory_mode
                .or(self.default_directory_mode),
            default_owner: override_.default_owner.clone().or_else(|| self.default_owner.clone()),
            default_group: override_.default_group.clone().or_else(|| self.default_group.clone()),
            alpha_wins_on_conflict: override_
                .alpha_wins_on_conflict
                .or(self.alpha_wins_on_conflict),
            beta_wins_on_conflict: override_
                .beta_wins_on_conflict
                .or(self.beta_wins_on_conflict),
        }
    }

    /// Resolves every field to a concrete value, falling back to the
    /// session-version defaults in [`Configuration`]'s associated
    /// constants for anything still unset after merging.
    #[must_use]
    pub fn resolve(&self) -> ResolvedConfiguration {
        ResolvedConfiguration {
            synchronization_mode: self.synchronization_mode.unwrap_or_default(),
            maximum_entry_count: self.maximum_entry_count.unwrap_or(0),
            maximum_staging_file_size: self.maximum_staging_file_size.unwrap_or(0),
            probe_mode: self.probe_mode.unwrap_or_default(),
            scan_mode: self.scan_mode.unwrap_or_default(),
            stage_mode: self.stage_mode.unwrap_or_default(),
            symbolic_link_mode: self.symbolic_link_mode.unwrap_or_default(),
            watch_mode: self.watch_mode.unwrap_or_default(),
            watch_polling_interval: self
                .watch_polling_interval
                .unwrap_or(DEFAULT_WATCH_POLLING_INTERVAL),
            ignores: self.ignores.clone().unwrap_or_default(),
            ignore_vcs_mode: self.ignore_vcs_mode.unwrap_or_default(),
            default_file_mode: self.default_file_mode.unwrap_or(DEFAULT_FILE_MODE),
            default_directory_mode: self
                .default_directory_mode
                .unwrap_or(DEFAULT_DIRECTORY_MODE),
            default_owner: self.default_owner.clone(),
            default_group: self.default_group.clone(),
            alpha_wins_on_conflict: self.alpha_wins_on_conflict.unwrap_or(true),
            beta_wins_on_conflict: self.beta_wins_on_conflict.unwrap_or(false),
        }
    }

    /// Validates that any set fields hold legal values: ownership names are
    /// non-empty and the polling interval, if set, is non-zero.
    pub fn validate(&self) -> Result<()> {
        if let Some(OwnershipIdentifier::Name(name)) = &self.default_owner {
            if name.is_empty() {
                return Err(ConfigError::EmptyOwnershipName);
            }
        }
        if let Some(OwnershipIdentifier::Name(name)) = &self.default_group {
            if name.is_empty() {
                return Err(ConfigError::EmptyOwnershipName);
            }
        }
        if self.watch_polling_interval == Some(0) {
            return Err(ConfigError::ZeroPollingInterval);
        }
        Ok(())
    }
}

/// A [`Configuration`] with every field resolved to a concrete value,
/// ready for the scanner, reconciler, and stager to consume directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfiguration {
    /// See [`Configuration::synchronization_mode`].
    pub synchronization_mode: SynchronizationMode,
    /// See [`Configuration::maximum_entry_count`].
    pub maximum_entry_count: u64,
    /// See [`Configuration::maximum_staging_file_size`].
    pub maximum_staging_file_size: u64,
    /// See [`Configuration::probe_mode`].
    pub probe_mode: ProbeMode,
    /// See [`Configuration::scan_mode`].
    pub scan_mode: ScanMode,
    /// See [`Configuration::stage_mode`].
    pub stage_mode: StageMode,
    /// See [`Configuration::symbolic_link_mode`].
    pub symbolic_link_mode: SymbolicLinkMode,
    /// See [`Configuration::watch_mode`].
    pub watch_mode: WatchMode,
    /// See [`Configuration::watch_polling_interval`].
    pub watch_polling_interval: u64,
    /// See [`Configuration::ignores`].
    pub ignores: Vec<String>,
    /// See [`Configuration::ignore_vcs_mode`].
    pub ignore_vcs_mode: IgnoreVCSMode,
    /// See [`Configuration::default_file_mode`].
    pub default_file_mode: u32,
    /// See [`Configuration::default_directory_mode`].
    pub default_directory_mode: u32,
    /// See [`Configuration::default_owner`].
    pub default_owner: Option<OwnershipIdentifier>,
    /// See [`Configuration::default_group`].
    pub default_group: Option<OwnershipIdentifier>,
    /// See [`Configuration::alpha_wins_on_conflict`].
    pub alpha_wins_on_conflict: bool,
    /// See [`Configuration::beta_wins_on_conflict`].
    pub beta_wins_on_conflict: bool,
}

/// A session's three configuration layers, merged in precedence order:
/// endpoint-specific override, then session override, then global default.
#[must_use]
pub fn merge_layers(
    global_default: &Configuration,
    session_override: &Configuration,
    endpoint_override: Option<&Configuration>,
) -> Configuration {
    let merged = global_default.merge(session_override);
    match endpoint_override {
        Some(endpoint) => merged.merge(endpoint),
        None => merged,
    }
}

/// Convenience alias for a per-endpoint label map (`Configuration::ignores`
/// and friends don't need this, but [`crate::descriptor::SessionDescriptor`]
/// does for label selectors).
pub type Labels = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_override_and_falls_back_to_base() {
        let base = Configuration {
            synchronization_mode: Some(SynchronizationMode::TwoWaySafe),
            maximum_entry_count: Some(100),
            ..Configuration::empty()
        };
        let override_ = Configuration {
            maximum_entry_count: Some(200),
            ..Configuration::empty()
        };
        let merged = base.merge(&override_);
        assert_eq!(merged.synchronization_mode, Some(SynchronizationMode::TwoWaySafe));
        assert_eq!(merged.maximum_entry_count, Some(200));
    }

    #[test]
    fn resolve_fills_in_session_defaults() {
        let resolved = Configuration::empty().resolve();
        assert_eq!(resolved.synchronization_mode, SynchronizationMode::TwoWaySafe);
        assert_eq!(resolved.maximum_entry_count, 0);
        assert_eq!(resolved.default_file_mode, DEFAULT_FILE_MODE);
        assert_eq!(resolved.default_directory_mode, DEFAULT_DIRECTORY_MODE);
        assert_eq!(resolved.watch_polling_interval, DEFAULT_WATCH_POLLING_INTERVAL);
    }

    #[test]
    fn three_layer_merge_respects_precedence() {
        let global = Configuration {
            maximum_entry_count: Some(1),
            ..Configuration::empty()
        };
        let session = Configuration {
            maximum_entry_count: Some(2),
            ..Configuration::empty()
        };
        let endpoint = Configuration {
            maximum_entry_count: Some(3),
            ..Configuration::empty()
        };
        let merged = merge_layers(&global, &session, Some(&endpoint));
        assert_eq!(merged.maximum_entry_count, Some(3));
        let merged_no_endpoint = merge_layers(&global, &session, None);
        assert_eq!(merged_no_endpoint.maximum_entry_count, Some(2));
    }

    #[test]
    fn validate_rejects_empty_ownership_name_and_zero_polling_interval() {
        let bad_owner = Configuration {
            default_owner: Some(OwnershipIdentifier::Name(String::new())),
            ..Configuration::empty()
        };
        assert_eq!(bad_owner.validate(), Err(ConfigError::EmptyOwnershipName));

        let bad_polling = Configuration {
            watch_polling_interval: Some(0),
            ..Configuration::empty()
        };
        assert_eq!(bad_polling.validate(), Err(ConfigError::ZeroPollingInterval));
    }
}
