//! Single-rule glob pattern parsing and matching.

use crate::{FilterError, Result};

/// A parsed ignore pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    /// Segments of the pattern, split on `/`. A pattern with more than one
    /// segment (or a leading `/`) is anchored to the synchronization root.
    segments: Vec<String>,
    anchored: bool,
    directory_only: bool,
}

impl Pattern {
    /// Parses a single (already de-negated) pattern body.
    pub fn parse(body: &str) -> Result<Self> {
        let mut body = body;
        let mut anchored = body.starts_with('/');
        if anchored {
            body = &body[1..];
        }
        let directory_only = body.ends_with('/') && body.len() > 1;
        let body = if directory_only {
            &body[..body.len() - 1]
        } else {
            body
        };
        if body.is_empty() {
            return Err(FilterError::InvalidPattern(
                body.to_owned(),
                "pattern has no content after anchor/trailing slash",
            ));
        }
        let segments: Vec<String> = body.split('/').map(ToOwned::to_owned).collect();
        if segments.len() > 1 {
            anchored = true;
        }
        Ok(Self {
            segments,
            anchored,
            directory_only,
        })
    }

    /// Whether this pattern matches `relative_path`.
    #[must_use]
    pub fn matches(&self, relative_path: &str, is_dir: bool) -> bool {
        if self.directory_only && !is_dir {
            return false;
        }
        let path_segments: Vec<&str> = relative_path.split('/').collect();
        if self.anchored {
            Self::match_from_start(&self.segments, &path_segments)
        } else {
            // Unanchored: the pattern may match the path's final segment
            // (basename) at any depth, or a contiguous suffix alignment.
            (0..path_segments.len()).any(|start| {
                Self::match_from_start(&self.segments, &path_segments[start..])
            })
        }
    }

    fn match_from_start(pattern: &[String], path: &[&str]) -> bool {
        match (pattern.first(), path.first()) {
            (None, None) => true,
            (None, Some(_)) => false,
            (Some(head), _) if head == "**" => {
                if pattern.len() == 1 {
                    return true;
                }
                (0..=path.len())
                    .any(|skip| Self::match_from_start(&pattern[1..], &path[skip..]))
            }
            (Some(head), Some(first)) => {
                glob_match_segment(head, first) && Self::match_from_start(&pattern[1..], &path[1..])
            }
            (Some(_), None) => false,
        }
    }
}

/// Matches a single path component against a glob segment supporting `*`
/// (any run of characters), `?` (any single character), and literal bytes.
fn glob_match_segment(glob: &str, text: &str) -> bool {
    let glob: Vec<char> = glob.chars().collect();
    let text: Vec<char> = text.chars().collect();
    match_rec(&glob, &text)
}

fn match_rec(glob: &[char], text: &[char]) -> bool {
    match glob.first() {
        None => text.is_empty(),
        Some('*') => {
            (0..=text.len()).any(|i| match_rec(&glob[1..], &text[i..]))
        }
        Some('?') => !text.is_empty() && match_rec(&glob[1..], &text[1..]),
        Some(c) => {
            !text.is_empty() && text[0] == *c && match_rec(&glob[1..], &text[1..])
        }
    }
}
