use std::fmt;

use serde::{Deserialize, Serialize};

/// One step into a nested value: an array index or an object key.
///
/// Serialized untagged so a path travels as a plain JSON array such as
/// `["attributes", "items", 3]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

pub type Path = Vec<PathSegment>;

impl PathSegment {
    /// Index this segment addresses inside an array. Numeric keys count too,
    /// since inspection results key array members by their decimal index.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            PathSegment::Index(index) => Some(*index),
            PathSegment::Key(key) => key.parse().ok(),
        }
    }

    pub fn as_key(&self) -> String {
        match self {
            PathSegment::Index(index) => index.to_string(),
            PathSegment::Key(key) => key.clone(),
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

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(index) => write!(f, "[{index}]"),
            PathSegment::Key(key) => write!(f, ".{key}"),
        }
    }
}

/// Renders a path for log output, e.g. `$.attributes.items[3]`.
pub fn format_path(path: &[PathSegment]) -> String {
    let mut out = String::from("$");
    for segment in path {
        out.push_str(&segment.to_string());
    }
    out
}
