use std::fmt;

use super::StoreError;

/// Longest segment the store accepts, in bytes.
pub const MAX_SEGMENT_LEN: usize = 768;

const FORBIDDEN: &[char] = &['/', '.', '#', '$', '[', ']'];

/// A validated location in the document tree, e.g. `transfers/{receiver}/{key}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocPath {
    segments: Vec<String>,
}

impl DocPath {
    /// Parse a slash-separated path. Leading and trailing slashes are ignored.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Err(StoreError::InvalidPath(raw.to_string()));
        }

        let mut path = DocPath {
            segments: Vec::new(),
        };
        for segment in trimmed.split('/') {
            path = path.child(segment)?;
        }
        Ok(path)
    }

    /// A single-segment path.
    pub fn root(segment: &str) -> Result<Self, StoreError> {
        DocPath {
            segments: Vec::new(),
        }
        .child(segment)
    }

    /// Extend this path by one segment.
    pub fn child(&self, segment: &str) -> Result<Self, StoreError> {
        validate_segment(segment)?;
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(DocPath { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment of the path.
    pub fn key(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// True when `self` is `other` or one of its ancestors.
    pub fn contains(&self, other: &DocPath) -> bool {
        other.segments.len() >= self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// True when a change at one path can alter the snapshot of the other.
    pub fn overlaps(&self, other: &DocPath) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

fn validate_segment(segment: &str) -> Result<(), StoreError> {
    let valid = !segment.is_empty()
        && segment.len() <= MAX_SEGMENT_LEN
        && !segment
            .chars()
            .any(|c| FORBIDDEN.contains(&c) || c.is_control());

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidPath(segment.to_string()))
    }
}
