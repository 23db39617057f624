//! Bounded-cost value codec.
//!
//! [`sanitize`] turns a [`Live`] value into JSON, replacing everything that is
//! too deep, not plain data, or not serializable at all with a small summary
//! and recording where it did so. [`hydrate`] runs on the receiving side and
//! turns those summaries into typed [`Marker`](crate::Marker)s.
//!
//! Recursion stops at [`MAX_DEPTH`], so the work done is bounded by the depth
//! ceiling times the branching actually present, and reference cycles cannot
//! loop.

use serde_json::{json, Map, Number, Value};

use crate::hydrated::Hydrated;
use crate::live::Live;
use crate::path::{Path, PathSegment};

/// Deepest container level that is walked member by member.
pub const MAX_DEPTH: usize = 3;
/// Strings longer than this many UTF-16 code units are truncated.
pub const STRING_LIMIT: usize = 500;
/// Stand-in text for [`Live::OpaqueFragment`].
pub const OPAQUE_FRAGMENT_TEXT: &str = "A fragment";

const ELLIPSIS: char = '…';

#[derive(Debug, Clone, PartialEq)]
pub struct Sanitized {
    pub value: Value,
    /// Every path that received a summary instead of the real value, in visit
    /// order.
    pub cleaned: Vec<Path>,
}

impl Sanitized {
    pub fn has_proxies(&self) -> bool {
        !self.cleaned.is_empty()
    }
}

pub fn sanitize(value: &Live) -> Sanitized {
    sanitize_at(value, Vec::new(), 0)
}

/// Sanitizes `value` as if it sat at `path`, `depth` levels below the root.
/// Recorded paths are prefixed with `path`.
pub fn sanitize_at(value: &Live, path: Path, depth: usize) -> Sanitized {
    let mut path = path;
    let mut cleaned = Vec::new();
    let value = dehydrate(value, &mut path, depth, &mut cleaned);
    Sanitized { value, cleaned }
}

fn dehydrate(value: &Live, path: &mut Path, depth: usize, cleaned: &mut Vec<Path>) -> Value {
    match value {
        Live::Function(function) => {
            cleaned.push(path.clone());
            json!({ "name": function.name(), "kind": "function" })
        }
        Live::String(text) => Value::String(truncate(text)),
        Live::OpaqueFragment => Value::String(OPAQUE_FRAGMENT_TEXT.to_string()),
        Live::Array(array) => {
            if depth > MAX_DEPTH || !array.is_generic() {
                cleaned.push(path.clone());
                return summary("array", array.name(), array.len());
            }
            let items = array.items();
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                path.push(PathSegment::Index(index));
                out.push(dehydrate(item, path, depth + 1, cleaned));
                path.pop();
            }
            Value::Array(out)
        }
        Live::Object(object) => {
            if depth > MAX_DEPTH || !object.is_generic() {
                cleaned.push(path.clone());
                return summary("object", object.name(), object.len());
            }
            let mut out = Map::new();
            for (key, member) in object.entries() {
                path.push(PathSegment::Key(key.clone()));
                let member = dehydrate(&member, path, depth + 1, cleaned);
                path.pop();
                out.insert(key, member);
            }
            Value::Object(out)
        }
        Live::Undefined | Live::Null => Value::Null,
        Live::Bool(flag) => Value::Bool(*flag),
        Live::Number(number) => number_to_json(*number),
    }
}

/// Whole numbers travel as JSON integers so they read back as indices and
/// counts. NaN and the infinities have no JSON spelling.
fn number_to_json(number: f64) -> Value {
    const SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;
    if number.fract() == 0.0 && number.abs() <= SAFE_INTEGER {
        return Value::from(number as i64);
    }
    Number::from_f64(number).map_or(Value::Null, Value::Number)
}

fn summary(kind: &str, name: &str, len: usize) -> Value {
    json!({ "kind": kind, "name": name, "meta": { "length": len } })
}

fn truncate(text: &str) -> String {
    if text.encode_utf16().count() <= STRING_LIMIT {
        return text.to_string();
    }
    let mut units = 0;
    let mut out = String::new();
    for ch in text.chars() {
        units += ch.len_utf16();
        if units > STRING_LIMIT {
            break;
        }
        out.push(ch);
    }
    out.push(ELLIPSIS);
    out
}

/// Rebuilds a received value, swapping the summary at every cleaned path for
/// an uninspected marker. Paths that no longer resolve are skipped.
///
/// The cleaned set must come straight from the envelope that carried `data`;
/// hydrating the same tree twice is not supported.
pub fn hydrate(data: Value, cleaned: &[Path]) -> Hydrated {
    let mut tree = Hydrated::from(data);
    for path in cleaned {
        tree.mark_proxy(path);
    }
    tree
}
