//! Values as they exist inside the instrumented runtime.
//!
//! A [`Live`] value is not JSON-safe: it can hold functions, class instances,
//! non-finite numbers and reference cycles. Containers are shared
//! (`Arc`) and interior-mutable so an adapter can build self-referential
//! graphs and keep mutating them after they were handed to a transport. Only
//! [`crate::sanitize`] turns a `Live` into something that may cross a channel.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::path::PathSegment;

#[derive(Clone, Default)]
pub enum Live {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Function(Arc<LiveFunction>),
    Array(Arc<LiveArray>),
    Object(Arc<LiveObject>),
    /// Sentinel for runtime fragments that have no meaningful value of their own.
    OpaqueFragment,
}

impl Live {
    pub fn object<K, I>(entries: I) -> Live
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Live)>,
    {
        let object = LiveObject::plain();
        for (key, value) in entries {
            object.set(key, value);
        }
        Live::Object(Arc::new(object))
    }

    /// An object whose constructor is `class`, optionally backed by a prototype
    /// carrying the class's shared members.
    pub fn instance<K, I>(class: impl Into<String>, proto: Option<Arc<LiveObject>>, entries: I) -> Live
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Live)>,
    {
        let object = LiveObject::instance_of(class, proto);
        for (key, value) in entries {
            object.set(key, value);
        }
        Live::Object(Arc::new(object))
    }

    pub fn array<I>(items: I) -> Live
    where
        I: IntoIterator<Item = Live>,
    {
        Live::Array(Arc::new(LiveArray::new(None, items.into_iter().collect())))
    }

    pub fn function(name: impl Into<String>) -> Live {
        Live::Function(Arc::new(LiveFunction::new(name)))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Live::String(value) => Some(value),
            _ => None,
        }
    }

    /// Reads one member. Functions expose their own properties, arrays their
    /// items by index.
    pub fn get(&self, segment: &PathSegment) -> Option<Live> {
        match self {
            Live::Object(object) => object.get(&segment.as_key()),
            Live::Function(function) => function.get(&segment.as_key()),
            Live::Array(array) => segment.as_index().and_then(|index| array.get(index)),
            _ => None,
        }
    }

    pub fn descend(&self, path: &[PathSegment]) -> Option<Live> {
        let mut current = self.clone();
        for segment in path {
            current = current.get(segment)?;
        }
        Some(current)
    }

    /// The `id` member of an object payload, used to key the inspectable cache.
    pub fn id(&self) -> Option<String> {
        match self {
            Live::Object(object) => object
                .get("id")
                .and_then(|value| value.as_str().map(str::to_string)),
            _ => None,
        }
    }
}

impl fmt::Debug for Live {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Containers print shallowly; a full walk would never end on a cycle.
        match self {
            Live::Undefined => f.write_str("undefined"),
            Live::Null => f.write_str("null"),
            Live::Bool(value) => write!(f, "{value}"),
            Live::Number(value) => write!(f, "{value}"),
            Live::String(value) => write!(f, "{value:?}"),
            Live::Function(function) => write!(f, "function {}()", function.name),
            Live::Array(array) => write!(f, "{}({})", array.name(), array.len()),
            Live::Object(object) => write!(f, "{} {{{} keys}}", object.name(), object.len()),
            Live::OpaqueFragment => f.write_str("<fragment>"),
        }
    }
}

impl From<&str> for Live {
    fn from(value: &str) -> Self {
        Live::String(value.to_string())
    }
}

impl From<String> for Live {
    fn from(value: String) -> Self {
        Live::String(value)
    }
}

impl From<bool> for Live {
    fn from(value: bool) -> Self {
        Live::Bool(value)
    }
}

impl From<f64> for Live {
    fn from(value: f64) -> Self {
        Live::Number(value)
    }
}

impl From<i64> for Live {
    fn from(value: i64) -> Self {
        Live::Number(value as f64)
    }
}

impl From<serde_json::Value> for Live {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Live::Null,
            serde_json::Value::Bool(flag) => Live::Bool(flag),
            serde_json::Value::Number(number) => Live::Number(number.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(text) => Live::String(text),
            serde_json::Value::Array(items) => Live::array(items.into_iter().map(Live::from)),
            serde_json::Value::Object(map) => {
                Live::object(map.into_iter().map(|(key, value)| (key, Live::from(value))))
            }
        }
    }
}

pub struct LiveObject {
    class: Option<String>,
    proto: Option<Arc<LiveObject>>,
    props: RwLock<Vec<(String, Live)>>,
}

impl LiveObject {
    pub fn plain() -> Self {
        Self {
            class: None,
            proto: None,
            props: RwLock::new(Vec::new()),
        }
    }

    pub fn instance_of(class: impl Into<String>, proto: Option<Arc<LiveObject>>) -> Self {
        Self {
            class: Some(class.into()),
            proto,
            props: RwLock::new(Vec::new()),
        }
    }

    /// Constructor name, `"Object"` for plain objects.
    pub fn name(&self) -> &str {
        self.class.as_deref().unwrap_or("Object")
    }

    /// True when the constructor is the generic object kind.
    pub fn is_generic(&self) -> bool {
        self.name() == "Object"
    }

    pub fn prototype(&self) -> Option<&Arc<LiveObject>> {
        self.proto.as_ref()
    }

    /// Inserts or replaces `key`, keeping first-insertion order.
    pub fn set(&self, key: impl Into<String>, value: Live) {
        let key = key.into();
        let mut props = self.props.write();
        match props.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value,
            None => props.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<Live> {
        self.props
            .read()
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.clone())
    }

    pub fn entries(&self) -> Vec<(String, Live)> {
        self.props.read().clone()
    }

    pub fn len(&self) -> usize {
        self.props.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct LiveArray {
    class: Option<String>,
    items: RwLock<Vec<Live>>,
}

impl LiveArray {
    /// `class` names a specialised array kind (typed arrays and the like);
    /// `None` is the generic array.
    pub fn new(class: Option<String>, items: Vec<Live>) -> Self {
        Self {
            class,
            items: RwLock::new(items),
        }
    }

    pub fn name(&self) -> &str {
        self.class.as_deref().unwrap_or("Array")
    }

    pub fn is_generic(&self) -> bool {
        self.name() == "Array"
    }

    pub fn push(&self, value: Live) {
        self.items.write().push(value);
    }

    pub fn get(&self, index: usize) -> Option<Live> {
        self.items.read().get(index).cloned()
    }

    pub fn items(&self) -> Vec<Live> {
        self.items.read().clone()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct LiveFunction {
    name: String,
    props: RwLock<Vec<(String, Live)>>,
}

impl LiveFunction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            props: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set(&self, key: impl Into<String>, value: Live) {
        let key = key.into();
        let mut props = self.props.write();
        match props.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value,
            None => props.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<Live> {
        self.props
            .read()
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.clone())
    }

    pub fn entries(&self) -> Vec<(String, Live)> {
        self.props.read().clone()
    }
}
