use std::fmt::Write;

use lookglass_replica::{Node, ReplicaState};
use lookglass_wire::NodeKind;

/// Renders the visible tree one node per line. The selected line is marked
/// with `>`; expanded parents get a closing line of their own. During a
/// search only the flat result list is shown.
pub fn render(state: &ReplicaState) -> String {
    let mut out = String::new();
    match state.search_roots() {
        Some(results) => {
            for id in results {
                if let Some(node) = state.get(id) {
                    line(&mut out, state, node, 0, false);
                }
            }
        }
        None => {
            for id in state.roots() {
                walk(&mut out, state, id, 0);
            }
        }
    }
    out
}

fn walk(out: &mut String, state: &ReplicaState, id: &str, depth: usize) {
    let Some(node) = state.get(id) else {
        return;
    };
    line(out, state, node, depth, false);
    if node.collapsed {
        return;
    }
    for child in node.child_ids() {
        walk(out, state, child, depth + 1);
    }
    if node.has_bottom() {
        line(out, state, node, depth, true);
    }
}

fn line(out: &mut String, state: &ReplicaState, node: &Node, depth: usize, bottom: bool) {
    let selected = state.selected() == Some(node.id.as_str()) && state.selected_bottom() == bottom;
    let marker = if selected { '>' } else { ' ' };
    let indent = "  ".repeat(depth);
    let label = if bottom {
        format!("</{}>", node.display_name())
    } else if node.kind == NodeKind::Text {
        format!("{:?}", node.text().unwrap_or_default())
    } else if node.text().is_some() {
        let name = node.display_name();
        format!("<{name}>{}</{name}>", node.text().unwrap_or_default())
    } else if node.has_children() && node.collapsed {
        format!("<{}>…", node.display_name())
    } else if node.has_children() {
        format!("<{}>", node.display_name())
    } else {
        format!("<{} />", node.display_name())
    };
    let _ = writeln!(out, "{marker} {indent}{label}");
}
