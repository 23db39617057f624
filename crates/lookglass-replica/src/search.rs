use crate::node::Node;

/// Decides whether a node belongs in the search results.
pub trait NodeMatcher: Send + Sync {
    /// `needle` is already lowercased and never empty.
    fn matches(&self, node: &Node, needle: &str) -> bool;
}

/// Case-insensitive substring match on the display name or text content.
/// Wrappers never match; they are invisible in the tree.
#[derive(Debug, Default, Clone, Copy)]
pub struct NameMatcher;

impl NodeMatcher for NameMatcher {
    fn matches(&self, node: &Node, needle: &str) -> bool {
        if node.is_wrapper() {
            return false;
        }
        if node.display_name().to_lowercase().contains(needle) {
            return true;
        }
        node.text()
            .is_some_and(|text| text.to_lowercase().contains(needle))
    }
}
