use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};

use crate::path::{Path, PathSegment};

/// Key under which an inspection result carries its prototype's members.
pub const PROTO_KEY: &str = "[[Prototype]]";

/// A received value: real JSON data with proxy markers spliced in at every
/// path the sender could not serialize.
#[derive(Debug, Clone, PartialEq)]
pub enum Hydrated {
    /// A JSON scalar (null, bool, number or string).
    Real(Value),
    Array(Vec<Hydrated>),
    /// Members in the order the sender wrote them.
    Object(IndexMap<String, Hydrated>),
    Proxy(Marker),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub proxy: Proxy,
    /// False until the observer fetches the real members with an inspect call.
    pub inspected: bool,
}

/// What a proxy stands in for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proxy {
    Function { name: String },
    Object { name: String, len: usize },
    Array { name: String, len: usize },
}

impl Proxy {
    pub fn kind(&self) -> &'static str {
        match self {
            Proxy::Function { .. } => "function",
            Proxy::Object { .. } => "object",
            Proxy::Array { .. } => "array",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Proxy::Function { name } | Proxy::Object { name, .. } | Proxy::Array { name, .. } => {
                name
            }
        }
    }

    /// Size hint carried in the marker's `meta`; functions have none.
    pub fn len(&self) -> Option<usize> {
        match self {
            Proxy::Function { .. } => None,
            Proxy::Object { len, .. } | Proxy::Array { len, .. } => Some(*len),
        }
    }

    /// Reads the summary a sender wrote in place of the real value.
    fn from_summary(summary: &Hydrated) -> Option<Proxy> {
        let kind = summary.get("kind")?.as_str()?;
        let name = summary
            .get("name")
            .and_then(Hydrated::as_str)
            .unwrap_or_default()
            .to_string();
        let len = summary
            .get("meta")
            .and_then(|meta| meta.get("length"))
            .and_then(|length| match length {
                Hydrated::Real(Value::Number(number)) => number.as_u64(),
                _ => None,
            })
            .unwrap_or(0) as usize;
        match kind {
            "function" => Some(Proxy::Function { name }),
            "object" => Some(Proxy::Object { name, len }),
            "array" => Some(Proxy::Array { name, len }),
            _ => None,
        }
    }
}

impl Marker {
    pub fn to_json(&self) -> Value {
        let mut out = json!({
            "name": self.proxy.name(),
            "kind": self.proxy.kind(),
            "inspected": self.inspected,
        });
        if let (Some(len), Value::Object(map)) = (self.proxy.len(), &mut out) {
            map.insert("meta".into(), json!({ "length": len }));
        }
        out
    }
}

impl Default for Hydrated {
    fn default() -> Self {
        Hydrated::Real(Value::Null)
    }
}

impl From<Value> for Hydrated {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => Hydrated::Array(items.into_iter().map(Hydrated::from).collect()),
            Value::Object(map) => Hydrated::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Hydrated::from(value)))
                    .collect(),
            ),
            scalar => Hydrated::Real(scalar),
        }
    }
}

impl Hydrated {
    pub fn is_null(&self) -> bool {
        matches!(self, Hydrated::Real(Value::Null))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Hydrated::Real(Value::String(text)) => Some(text),
            _ => None,
        }
    }

    pub fn as_marker(&self) -> Option<&Marker> {
        match self {
            Hydrated::Proxy(marker) => Some(marker),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Hydrated> {
        match self {
            Hydrated::Object(map) => map.get(key),
            _ => None,
        }
    }

    fn child(&self, segment: &PathSegment) -> Option<&Hydrated> {
        match self {
            Hydrated::Object(map) => map.get(&segment.as_key()),
            Hydrated::Array(items) => segment.as_index().and_then(|index| items.get(index)),
            _ => None,
        }
    }

    fn child_mut(&mut self, segment: &PathSegment) -> Option<&mut Hydrated> {
        match self {
            Hydrated::Object(map) => map.get_mut(&segment.as_key()),
            Hydrated::Array(items) => segment.as_index().and_then(|index| items.get_mut(index)),
            _ => None,
        }
    }

    pub fn get_path(&self, path: &[PathSegment]) -> Option<&Hydrated> {
        path.iter().try_fold(self, |node, segment| node.child(segment))
    }

    pub fn get_path_mut(&mut self, path: &[PathSegment]) -> Option<&mut Hydrated> {
        let mut node = self;
        for segment in path {
            node = node.child_mut(segment)?;
        }
        Some(node)
    }

    /// Replaces the slot at `path`. Returns false when the parent container
    /// does not exist or the slot is out of range.
    pub fn set_path(&mut self, path: &[PathSegment], value: Hydrated) -> bool {
        let Some((last, parent)) = path.split_last() else {
            *self = value;
            return true;
        };
        match self.get_path_mut(parent) {
            Some(Hydrated::Object(map)) => {
                map.insert(last.as_key(), value);
                true
            }
            Some(Hydrated::Array(items)) => match last.as_index().and_then(|i| items.get_mut(i)) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Swaps the summary found at `path` for a typed, uninspected marker.
    pub(crate) fn mark_proxy(&mut self, path: &[PathSegment]) -> bool {
        let Some(slot) = self.get_path_mut(path) else {
            return false;
        };
        match Proxy::from_summary(slot) {
            Some(proxy) => {
                *slot = Hydrated::Proxy(Marker {
                    proxy,
                    inspected: false,
                });
                true
            }
            None => false,
        }
    }

    /// Every location holding a marker, depth-first in member order.
    pub fn proxy_paths(&self) -> Vec<Path> {
        fn walk(node: &Hydrated, path: &mut Path, out: &mut Vec<Path>) {
            match node {
                Hydrated::Proxy(_) => out.push(path.clone()),
                Hydrated::Array(items) => {
                    for (index, item) in items.iter().enumerate() {
                        path.push(PathSegment::Index(index));
                        walk(item, path, out);
                        path.pop();
                    }
                }
                Hydrated::Object(map) => {
                    for (key, value) in map {
                        path.push(PathSegment::Key(key.clone()));
                        walk(value, path, out);
                        path.pop();
                    }
                }
                Hydrated::Real(_) => {}
            }
        }
        let mut out = Vec::new();
        walk(self, &mut Vec::new(), &mut out);
        out
    }

    pub fn to_json(&self) -> Value {
        match self {
            Hydrated::Real(value) => value.clone(),
            Hydrated::Array(items) => Value::Array(items.iter().map(Hydrated::to_json).collect()),
            Hydrated::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            Hydrated::Proxy(marker) => marker.to_json(),
        }
    }
}

impl Serialize for Hydrated {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}
