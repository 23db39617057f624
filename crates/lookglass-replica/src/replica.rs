use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lookglass_wire::{ChildList, Hydrated, PathSegment};
use tracing::{trace, warn};

use crate::node::{Node, NodePatch};
use crate::search::{NameMatcher, NodeMatcher};

/// What changed after a mutation. Store listeners subscribe per topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Node(String),
    Roots,
    SearchRoots,
    Selection,
    Hover,
    Connection,
}

struct Search {
    text: String,
    needle: String,
    results: Vec<String>,
}

/// The observer's model of the remote tree.
///
/// The node map, parent index and root list are only changed together by the
/// methods below; each returns the topics it touched so the caller can notify
/// after the whole mutation is applied.
pub struct ReplicaState {
    nodes: HashMap<String, Node>,
    parents: HashMap<String, String>,
    roots: Vec<String>,
    selected: Option<String>,
    selected_bottom: bool,
    hovered: Option<String>,
    search: Option<Search>,
    matcher: Arc<dyn NodeMatcher>,
    next_seq: u64,
}

impl Default for ReplicaState {
    fn default() -> Self {
        Self::new(Arc::new(NameMatcher))
    }
}

impl ReplicaState {
    pub fn new(matcher: Arc<dyn NodeMatcher>) -> Self {
        Self {
            nodes: HashMap::new(),
            parents: HashMap::new(),
            roots: Vec::new(),
            selected: None,
            selected_bottom: false,
            hovered: None,
            search: None,
            matcher,
            next_seq: 0,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn parent_of(&self, id: &str) -> Option<&str> {
        self.parents.get(id).map(String::as_str)
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// True when the selection sits on the closing line of its node.
    pub fn selected_bottom(&self) -> bool {
        self.selected_bottom
    }

    pub fn hovered(&self) -> Option<&str> {
        self.hovered.as_deref()
    }

    pub fn search_text(&self) -> Option<&str> {
        self.search.as_ref().map(|search| search.text.as_str())
    }

    /// Matches of the active search, in the order they are listed.
    pub fn search_roots(&self) -> Option<&[String]> {
        self.search.as_ref().map(|search| search.results.as_slice())
    }

    /// Parent as navigation sees it: search results are listed flat, so they
    /// have none.
    pub(crate) fn effective_parent(&self, id: &str) -> Option<&str> {
        if self
            .search
            .as_ref()
            .is_some_and(|search| search.results.iter().any(|result| result == id))
        {
            return None;
        }
        self.parent_of(id)
    }

    /// The list `id` is a member of for sibling motion.
    pub(crate) fn siblings(&self, id: &str) -> &[String] {
        match self.effective_parent(id) {
            Some(parent) => self.nodes.get(parent).map_or(&[][..], Node::child_ids),
            None => self.search_roots().unwrap_or(&self.roots),
        }
    }

    pub fn mount(&mut self, patch: NodePatch) -> crate::StoreResult<Vec<Topic>> {
        let id = patch.id.clone();
        let seq = match self.nodes.get(&id) {
            Some(existing) => existing.mount_seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        let mut node = Node::mount(patch, seq)?;
        self.drop_cyclic_children(&mut node, &[]);
        for child in node.child_ids() {
            self.parents.insert(child.clone(), id.clone());
        }

        let mut topics = vec![Topic::Node(id.clone())];
        if let Some(search) = &mut self.search {
            if self.matcher.matches(&node, &search.needle) && !search.results.contains(&id) {
                node.collapsed = true;
                search.results.push(id.clone());
                topics.push(Topic::SearchRoots);
            }
        }
        self.nodes.insert(id, node);
        Ok(topics)
    }

    /// Applies an update. Unknown ids are ignored.
    pub fn update(&mut self, patch: NodePatch) -> Vec<Topic> {
        let id = patch.id.clone();
        let Some(mut node) = self.nodes.remove(&id) else {
            trace!(target = "lookglass.store", node = %id, "update for unknown node");
            return Vec::new();
        };
        let children_changed = patch.children.is_some();
        let previous: Vec<String> = node.child_ids().to_vec();
        node.merge(patch);
        node.renders += 1;
        if children_changed {
            self.drop_cyclic_children(&mut node, &previous);
        }
        let current = node.child_ids().to_vec();
        self.nodes.insert(id.clone(), node);
        if children_changed {
            for child in previous {
                if self.parents.get(&child) == Some(&id) {
                    self.parents.remove(&child);
                }
            }
            for child in current {
                self.parents.insert(child, id.clone());
            }
        }
        vec![Topic::Node(id)]
    }

    /// Removes a node. Unknown ids are ignored.
    pub fn unmount(&mut self, id: &str) -> Vec<Topic> {
        let Some(node) = self.nodes.remove(id) else {
            trace!(target = "lookglass.store", node = %id, "unmount for unknown node");
            return Vec::new();
        };
        let parent = self.parents.remove(id);
        for child in node.child_ids() {
            if self.parents.get(child).map(String::as_str) == Some(id) {
                self.parents.remove(child);
            }
        }

        let mut topics = vec![Topic::Node(id.to_string())];
        if let Some(position) = self.roots.iter().position(|root| root == id) {
            self.roots.remove(position);
            topics.push(Topic::Roots);
        }
        if let Some(search) = &mut self.search {
            if let Some(position) = search.results.iter().position(|result| result == id) {
                search.results.remove(position);
                topics.push(Topic::SearchRoots);
            }
        }
        if self.hovered.as_deref() == Some(id) {
            self.hovered = None;
            topics.push(Topic::Hover);
        }
        if self.selected.as_deref() == Some(id) {
            let target = parent
                .and_then(|parent| self.visible_ancestor_or_self(&parent))
                .or_else(|| self.roots.first().cloned());
            self.selected = target;
            self.selected_bottom = false;
            topics.push(Topic::Selection);
        }
        topics
    }

    /// Drops newly listed children that already lead back to `node`, so
    /// child lists and the parent index stay acyclic. Ids in `known` were
    /// checked when they were first linked.
    fn drop_cyclic_children(&self, node: &mut Node, known: &[String]) {
        let Some(ChildList::Ids(children)) = &mut node.children else {
            return;
        };
        let id = node.id.as_str();
        children.retain(|child| {
            if known.contains(child) || !self.reaches(child, id) {
                return true;
            }
            warn!(target = "lookglass.store", node = %id, child = %child, "ignoring child link that would form a cycle");
            false
        });
    }

    /// True when `target` is `from` or lies below it through child lists.
    fn reaches(&self, from: &str, target: &str) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(node) = self.nodes.get(current) {
                stack.extend(node.child_ids().iter().map(String::as_str));
            }
        }
        false
    }

    /// Nearest node at or above `id` that is not a wrapper.
    fn visible_ancestor_or_self(&self, id: &str) -> Option<String> {
        let mut current = id;
        loop {
            let node = self.nodes.get(current)?;
            if !node.is_wrapper() {
                return Some(current.to_string());
            }
            current = self.parents.get(current)?.as_str();
        }
    }

    /// Adds `id` to the root list; the first root becomes the selection.
    pub fn add_root(&mut self, id: &str) -> Vec<Topic> {
        if self.roots.iter().any(|root| root == id) {
            return Vec::new();
        }
        self.roots.push(id.to_string());
        let mut topics = vec![Topic::Roots];
        if self.selected.is_none() {
            self.selected = Some(id.to_string());
            self.selected_bottom = false;
            topics.push(Topic::Selection);
        }
        topics
    }

    /// Selects `id` and expands its ancestors so it is visible. Unknown ids
    /// are ignored.
    pub fn select(&mut self, id: Option<&str>, bottom: bool) -> Vec<Topic> {
        let mut topics = Vec::new();
        if let Some(id) = id {
            if !self.nodes.contains_key(id) {
                return topics;
            }
            topics.extend(self.reveal(id));
        }
        let id = id.map(str::to_string);
        if self.selected != id || self.selected_bottom != bottom {
            self.selected = id;
            self.selected_bottom = bottom;
            topics.push(Topic::Selection);
        }
        topics
    }

    fn reveal(&mut self, id: &str) -> Vec<Topic> {
        let mut topics = Vec::new();
        let mut current = self.parents.get(id).cloned();
        while let Some(ancestor) = current {
            if let Some(node) = self.nodes.get_mut(&ancestor) {
                if node.collapsed {
                    node.collapsed = false;
                    topics.push(Topic::Node(ancestor.clone()));
                }
            }
            current = self.parents.get(&ancestor).cloned();
        }
        topics
    }

    pub fn hover(&mut self, id: &str, on: bool) -> Vec<Topic> {
        let next = if on {
            Some(id.to_string())
        } else if self.hovered.as_deref() == Some(id) {
            None
        } else {
            return Vec::new();
        };
        if self.hovered == next {
            return Vec::new();
        }
        self.hovered = next;
        vec![Topic::Hover]
    }

    pub fn set_collapsed(&mut self, id: &str, collapsed: bool) -> Vec<Topic> {
        let Some(node) = self.nodes.get_mut(id) else {
            return Vec::new();
        };
        if node.collapsed == collapsed {
            return Vec::new();
        }
        node.collapsed = collapsed;
        let mut topics = vec![Topic::Node(id.to_string())];
        // a collapsed node has no closing line to stand on
        if collapsed && self.selected.as_deref() == Some(id) && self.selected_bottom {
            self.selected_bottom = false;
            topics.push(Topic::Selection);
        }
        topics
    }

    pub fn toggle_collapse(&mut self, id: &str) -> Vec<Topic> {
        match self.nodes.get(id) {
            Some(node) => {
                let collapsed = !node.collapsed;
                self.set_collapsed(id, collapsed)
            }
            None => Vec::new(),
        }
    }

    /// Visible ancestors of `id`, root first, ending with `id` itself.
    pub fn breadcrumb(&self, id: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let Some(node) = self.nodes.get(node_id) else {
                break;
            };
            if !node.is_wrapper() {
                chain.push(node_id.to_string());
            }
            current = self.parent_of(node_id);
        }
        chain.reverse();
        chain
    }

    /// Applies a search string. A refinement of the previous one re-tests
    /// only the current matches; anything else rescans every node. An empty
    /// string ends the search.
    pub fn change_search(&mut self, text: &str) -> Vec<Topic> {
        let mut topics = vec![Topic::SearchRoots];
        if text.is_empty() {
            self.search = None;
            return topics;
        }
        let needle = text.to_lowercase();
        let candidates: Vec<String> = match &self.search {
            Some(previous) if needle.contains(&previous.needle) => previous.results.clone(),
            _ => {
                let mut all: Vec<&Node> = self.nodes.values().collect();
                all.sort_by_key(|node| node.mount_seq);
                all.into_iter().map(|node| node.id.clone()).collect()
            }
        };
        let results: Vec<String> = candidates
            .into_iter()
            .filter(|id| {
                self.nodes
                    .get(id)
                    .is_some_and(|node| self.matcher.matches(node, &needle))
            })
            .collect();

        for id in &results {
            if let Some(node) = self.nodes.get_mut(id) {
                if !node.collapsed {
                    node.collapsed = true;
                    topics.push(Topic::Node(id.clone()));
                }
            }
        }

        let selection_matches = self
            .selected
            .as_ref()
            .is_some_and(|selected| results.contains(selected));
        if !selection_matches {
            let first = results.first().cloned();
            if self.selected != first {
                self.selected = first;
                self.selected_bottom = false;
                topics.push(Topic::Selection);
            }
        } else if self.selected_bottom {
            self.selected_bottom = false;
            topics.push(Topic::Selection);
        }

        self.search = Some(Search {
            text: text.to_string(),
            needle,
            results,
        });
        topics
    }

    /// Replaces the value at `path` inside a node's data with an inspection
    /// result. The first segment names the field.
    pub fn splice(&mut self, id: &str, path: &[PathSegment], value: Hydrated) -> Vec<Topic> {
        let Some((field, rest)) = path.split_first() else {
            return Vec::new();
        };
        let Some(slot) = self.nodes.get_mut(id).and_then(|node| node.field_mut(field)) else {
            return Vec::new();
        };
        if slot.set_path(rest, value) {
            vec![Topic::Node(id.to_string())]
        } else {
            Vec::new()
        }
    }
}
