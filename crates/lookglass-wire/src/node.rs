use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::live::{Live, LiveObject};

/// Payload keys of a node record on the wire.
pub mod field {
    pub const ID: &str = "id";
    pub const KIND: &str = "kind";
    pub const NAME: &str = "name";
    pub const ATTRIBUTES: &str = "attributes";
    pub const LOCAL_STATE: &str = "localState";
    pub const CONTEXT: &str = "context";
    pub const CHILDREN: &str = "children";
    pub const CAPABILITIES: &str = "capabilities";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Host-rendered leaf.
    Native,
    /// User-defined container with attributes and state.
    Composite,
    /// Structural node; navigation passes through it.
    Wrapper,
    Text,
    /// Renders somewhere other than under its logical parent.
    Portal,
    /// UI-opaque node, shown collapsed.
    Custom,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Native => "Native",
            NodeKind::Composite => "Composite",
            NodeKind::Wrapper => "Wrapper",
            NodeKind::Text => "Text",
            NodeKind::Portal => "Portal",
            NodeKind::Custom => "Custom",
        }
    }

    pub fn parse(value: &str) -> Option<NodeKind> {
        match value {
            "Native" => Some(NodeKind::Native),
            "Composite" => Some(NodeKind::Composite),
            "Wrapper" => Some(NodeKind::Wrapper),
            "Text" => Some(NodeKind::Text),
            "Portal" => Some(NodeKind::Portal),
            "Custom" => Some(NodeKind::Custom),
            _ => None,
        }
    }
}

/// A node's children: ordered ids, or a literal string rendered inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildList {
    Ids(Vec<String>),
    Text(String),
}

impl ChildList {
    pub fn ids(&self) -> &[String] {
        match self {
            ChildList::Ids(ids) => ids,
            ChildList::Text(_) => &[],
        }
    }

    fn to_live(&self) -> Live {
        match self {
            ChildList::Ids(ids) => Live::array(ids.iter().map(|id| Live::from(id.as_str()))),
            ChildList::Text(text) => Live::from(text.as_str()),
        }
    }
}

/// Optional features a runtime advertises during the handshake.
pub type Capabilities = BTreeMap<String, bool>;

/// Opaque back-reference to the runtime object behind a node. It stays on the
/// runtime side; nothing in this crate serializes it.
#[derive(Clone)]
pub struct ExternalHandle(Arc<dyn Any + Send + Sync>);

impl ExternalHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for ExternalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExternalHandle(..)")
    }
}

/// A node as an adapter reports it. Fields left `None` are omitted from the
/// payload, which makes the same type usable for partial updates.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub id: String,
    pub kind: Option<NodeKind>,
    pub name: Option<Live>,
    pub attributes: Option<Live>,
    pub local_state: Option<Live>,
    pub context: Option<Live>,
    pub children: Option<ChildList>,
    pub capabilities: Vec<String>,
    pub external_handle: Option<ExternalHandle>,
}

impl NodeRecord {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::patch(id)
        }
    }

    /// A record carrying only the id, for updates.
    pub fn patch(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: None,
            name: None,
            attributes: None,
            local_state: None,
            context: None,
            children: None,
            capabilities: Vec::new(),
            external_handle: None,
        }
    }

    pub fn name(mut self, name: impl Into<Live>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn attributes(mut self, attributes: Live) -> Self {
        self.attributes = Some(attributes);
        self
    }

    pub fn local_state(mut self, state: Live) -> Self {
        self.local_state = Some(state);
        self
    }

    pub fn context(mut self, context: Live) -> Self {
        self.context = Some(context);
        self
    }

    pub fn children<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.children = Some(ChildList::Ids(ids.into_iter().map(Into::into).collect()));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children = Some(ChildList::Text(text.into()));
        self
    }

    pub fn capability(mut self, name: impl Into<String>) -> Self {
        self.capabilities.push(name.into());
        self
    }

    pub fn handle(mut self, handle: ExternalHandle) -> Self {
        self.external_handle = Some(handle);
        self
    }

    /// Builds the event payload. Capabilities travel as function values, so
    /// the codec turns each into a function marker; the external handle is
    /// dropped.
    pub fn to_live(&self) -> Live {
        let object = LiveObject::plain();
        object.set(field::ID, Live::from(self.id.as_str()));
        if let Some(kind) = self.kind {
            object.set(field::KIND, Live::from(kind.as_str()));
        }
        let optional = [
            (field::NAME, &self.name),
            (field::ATTRIBUTES, &self.attributes),
            (field::LOCAL_STATE, &self.local_state),
            (field::CONTEXT, &self.context),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                object.set(key, value.clone());
            }
        }
        if let Some(children) = &self.children {
            object.set(field::CHILDREN, children.to_live());
        }
        if !self.capabilities.is_empty() {
            let capabilities = LiveObject::plain();
            for name in &self.capabilities {
                capabilities.set(name.clone(), Live::function(name.clone()));
            }
            object.set(field::CAPABILITIES, Live::Object(Arc::new(capabilities)));
        }
        Live::Object(Arc::new(object))
    }
}
