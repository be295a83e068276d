use serde::{Deserialize, Serialize};

/// The document representation. Osmosis does no schema validation, so we
/// reuse `serde_json::Value` rather than inventing a bespoke value enum.
pub type Json = serde_json::Value;

/// One step of a direct, literal path into the live document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    pub fn as_key(&self) -> Option<&str> {
        match self {
            PathSegment::Key(k) => Some(k),
            PathSegment::Index(_) => None,
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            PathSegment::Index(i) => Some(*i),
            PathSegment::Key(_) => None,
        }
    }
}

impl From<&str> for PathSegment {
    fn from(value: &str) -> Self {
        PathSegment::Key(value.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(value: String) -> Self {
        PathSegment::Key(value)
    }
}

impl From<usize> for PathSegment {
    fn from(value: usize) -> Self {
        PathSegment::Index(value)
    }
}

/// A direct path into the live document at a point in time.
pub type PathArray = Vec<PathSegment>;

pub fn path_of(segments: impl IntoIterator<Item = impl Into<PathSegment>>) -> PathArray {
    segments.into_iter().map(Into::into).collect()
}
