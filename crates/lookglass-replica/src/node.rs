use std::collections::BTreeSet;

use lookglass_wire::{field, ChildList, Hydrated, NodeKind, PathSegment, Proxy};

use crate::error::{StoreError, StoreResult};

/// One node of the replica.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub name: Hydrated,
    pub attributes: Hydrated,
    pub local_state: Hydrated,
    pub context: Hydrated,
    pub children: Option<ChildList>,
    /// Mutation entry points the runtime exposes for this node.
    pub capabilities: BTreeSet<String>,
    pub collapsed: bool,
    /// Starts at 1 and counts every applied update.
    pub renders: u32,
    pub(crate) mount_seq: u64,
}

impl Node {
    pub(crate) fn mount(patch: NodePatch, mount_seq: u64) -> StoreResult<Node> {
        let Some(kind) = patch.kind else {
            return Err(StoreError::MalformedPayload(format!("mount of `{}` without kind", patch.id)));
        };
        let mut node = Node {
            id: patch.id.clone(),
            kind,
            name: Hydrated::default(),
            attributes: Hydrated::default(),
            local_state: Hydrated::default(),
            context: Hydrated::default(),
            children: None,
            capabilities: BTreeSet::new(),
            collapsed: kind == NodeKind::Custom,
            renders: 1,
            mount_seq,
        };
        node.merge(patch);
        Ok(node)
    }

    pub(crate) fn merge(&mut self, patch: NodePatch) {
        if let Some(kind) = patch.kind {
            self.kind = kind;
        }
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(attributes) = patch.attributes {
            self.attributes = attributes;
        }
        if let Some(state) = patch.local_state {
            self.local_state = state;
        }
        if let Some(context) = patch.context {
            self.context = context;
        }
        if let Some(children) = patch.children {
            self.children = children;
        }
        if let Some(capabilities) = patch.capabilities {
            self.capabilities = capabilities;
        }
    }

    pub fn display_name(&self) -> String {
        match self.name.as_str() {
            Some(name) => name.to_string(),
            None if self.name.is_null() => self.kind.as_str().to_string(),
            None => self.name.to_json().to_string(),
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.children {
            Some(ChildList::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub fn child_ids(&self) -> &[String] {
        match &self.children {
            Some(children) => children.ids(),
            None => &[],
        }
    }

    pub fn has_children(&self) -> bool {
        !self.child_ids().is_empty()
    }

    /// Expanded nodes with children render a closing line of their own.
    pub fn has_bottom(&self) -> bool {
        self.has_children() && !self.collapsed
    }

    pub fn is_wrapper(&self) -> bool {
        self.kind == NodeKind::Wrapper
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.contains(name)
    }

    /// The data field a path's first segment names, for inspection splicing.
    pub(crate) fn field_mut(&mut self, segment: &PathSegment) -> Option<&mut Hydrated> {
        match segment.as_key().as_str() {
            field::ATTRIBUTES => Some(&mut self.attributes),
            field::LOCAL_STATE => Some(&mut self.local_state),
            field::CONTEXT => Some(&mut self.context),
            _ => None,
        }
    }
}

/// Fields read from one mount or update payload. `None` leaves the replica's
/// value untouched; `children: Some(None)` clears the children.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodePatch {
    pub id: String,
    pub kind: Option<NodeKind>,
    pub name: Option<Hydrated>,
    pub attributes: Option<Hydrated>,
    pub local_state: Option<Hydrated>,
    pub context: Option<Hydrated>,
    pub children: Option<Option<ChildList>>,
    pub capabilities: Option<BTreeSet<String>>,
}

impl NodePatch {
    pub fn from_payload(data: &Hydrated) -> StoreResult<NodePatch> {
        let id = data
            .get(field::ID)
            .and_then(Hydrated::as_str)
            .ok_or_else(|| StoreError::MalformedPayload("node payload without id".into()))?
            .to_string();

        let kind = match data.get(field::KIND) {
            None => None,
            Some(kind) => {
                let parsed = kind.as_str().and_then(NodeKind::parse);
                Some(parsed.ok_or_else(|| {
                    StoreError::MalformedPayload(format!("node `{id}` has unknown kind {}", kind.to_json()))
                })?)
            }
        };

        let children = match data.get(field::CHILDREN) {
            None => None,
            Some(children) => Some(parse_children(&id, children)?),
        };

        let capabilities = data.get(field::CAPABILITIES).map(|record| match record {
            Hydrated::Object(entries) => entries
                .iter()
                .filter(|(_, value)| {
                    matches!(value.as_marker(), Some(marker) if matches!(marker.proxy, Proxy::Function { .. }))
                })
                .map(|(name, _)| name.clone())
                .collect(),
            _ => BTreeSet::new(),
        });

        Ok(NodePatch {
            kind,
            name: data.get(field::NAME).cloned(),
            attributes: data.get(field::ATTRIBUTES).cloned(),
            local_state: data.get(field::LOCAL_STATE).cloned(),
            context: data.get(field::CONTEXT).cloned(),
            children,
            capabilities,
            id,
        })
    }
}

fn parse_children(id: &str, children: &Hydrated) -> StoreResult<Option<ChildList>> {
    match children {
        Hydrated::Array(items) => {
            let ids = items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| StoreError::MalformedPayload(format!("node `{id}` has a non-string child id")))?;
            Ok(Some(ChildList::Ids(ids)))
        }
        Hydrated::Real(serde_json::Value::String(text)) => Ok(Some(ChildList::Text(text.clone()))),
        child if child.is_null() => Ok(None),
        _ => Err(StoreError::MalformedPayload(format!("node `{id}` has unreadable children"))),
    }
}
