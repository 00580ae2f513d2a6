//! Session identity: the immutable descriptor the manager persists and the
//! controller is constructed from.

use crate::config::Configuration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An endpoint's connection string. Parsing and dialing are external
/// collaborators (transport establishment); this type is an opaque,
/// serializable handle a caller supplies and the endpoint layer interprets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointUrl(pub String);

impl EndpointUrl {
    /// Whether this URL denotes the local filesystem, i.e. it names a bare
    /// path with no `user@host:` prefix.
    #[must_use]
    pub fn is_local(&self) -> bool {
        !self.0.contains("://") && self.scheme_prefix().is_none()
    }

    fn scheme_prefix(&self) -> Option<&str> {
        // A remote URL looks like `[user@]host:path` (rsync-style) or
        // `scheme://host/path`; a bare Windows drive letter like `C:\x` is
        // distinguished by requiring at least two characters before the
        // colon.
        let colon = self.0.find(':')?;
        if colon >= 2 {
            Some(&self.0[..colon])
        } else {
            None
        }
    }
}

/// Immutable identity and mutable lifecycle state for one synchronization
/// session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// Unique session identifier, assigned at creation and never reused.
    pub identifier: String,
    /// Optional human-assigned name, unique among a manager's sessions if
    /// set.
    pub name: Option<String>,
    /// Arbitrary key/value labels, consulted by the manager's label
    /// selector.
    pub labels: HashMap<String, String>,
    /// Alpha endpoint's connection string.
    pub alpha: EndpointUrl,
    /// Beta endpoint's connection string.
    pub beta: EndpointUrl,
    /// The session's merged configuration (global default merged with the
    /// session-level override at creation time).
    pub configuration: Configuration,
    /// Per-endpoint configuration overrides, applied on top of
    /// `configuration` when each endpoint resolves its options.
    pub alpha_configuration: Configuration,
    /// See [`SessionDescriptor::alpha_configuration`].
    pub beta_configuration: Configuration,
    /// Creation timestamp, as seconds since the Unix epoch.
    pub created_at: u64,
    /// The engine version that created this session, for compatibility
    /// checks on resurrection.
    pub creation_version: String,
    /// Whether the session is currently paused.
    pub paused: bool,
}

impl SessionDescriptor {
    /// Whether `self` matches a label selector of the form `key=value`
    /// (exact match) or `key` (key merely present).
    #[must_use]
    pub fn matches_label_selector(&self, selector: &str) -> bool {
        match selector.split_once('=') {
            Some((key, value)) => self.labels.get(key).is_some_and(|v| v == value),
            None => self.labels.contains_key(selector),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionDescriptor {
        let mut labels = HashMap::new();
        labels.insert("project".to_owned(), "web".to_owned());
        labels.insert("env".to_owned(), "prod".to_owned());
        SessionDescriptor {
            identifier: "sess-1".to_owned(),
            name: Some("web-sync".to_owned()),
            labels,
            alpha: EndpointUrl("/local/path".to_owned()),
            beta: EndpointUrl("user@host:/remote/path".to_owned()),
            configuration: Configuration::empty(),
            alpha_configuration: Configuration::empty(),
            beta_configuration: Configuration::empty(),
            created_at: 0,
            creation_version: "0.1.0".to_owned(),
            paused: false,
        }
    }

    #[test]
    fn label_selector_supports_exact_and_presence_matches() {
        let descriptor = sample();
        assert!(descriptor.matches_label_selector("project=web"));
        assert!(!descriptor.matches_label_selector("project=mobile"));
        assert!(descriptor.matches_label_selector("env"));
        assert!(!descriptor.matches_label_selector("missing"));
    }

    #[test]
    fn endpoint_url_distinguishes_local_from_remote() {
        assert!(EndpointUrl("/local/path".to_owned()).is_local());
        assert!(EndpointUrl("./relative".to_owned()).is_local());
        assert!(!EndpointUrl("user@host:/remote/path".to_owned()).is_local());
        assert!(!EndpointUrl("ssh://host/path".to_owned()).is_local());
    }
}
