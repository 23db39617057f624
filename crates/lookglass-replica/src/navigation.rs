//! Keyboard navigation over the replica.
//!
//! Every node is drawn as an opening line and, when it is expanded and has
//! children, a closing line ("bottom"). [`decide_intent`] turns a key press
//! into an intent from the current line alone; [`resolve_intent`] turns that
//! intent into a concrete selection, treating wrapper nodes as if they were
//! not there.

use crate::replica::ReplicaState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn parse(value: &str) -> Option<Direction> {
        match value.trim().to_ascii_lowercase().as_str() {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    NextSibling,
    PrevSibling,
    FirstChild,
    LastChild,
    /// Move from a node's closing line to its opening line.
    SelectTop,
    Collapse,
    Uncollapse,
    Parent,
    /// The parent's closing line.
    ParentBottom,
    NoOp,
}

/// What applying an intent to the replica amounts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Select { id: String, bottom: bool },
    Collapse(String),
    Uncollapse(String),
    Unchanged,
}

pub fn decide_intent(direction: Direction, at_closing: bool, collapsed: bool, has_children: bool) -> Intent {
    match direction {
        Direction::Down if at_closing || collapsed || !has_children => Intent::NextSibling,
        Direction::Down => Intent::FirstChild,
        Direction::Up if !at_closing || collapsed || !has_children => Intent::PrevSibling,
        Direction::Up => Intent::LastChild,
        Direction::Left if !collapsed && has_children => {
            if at_closing {
                Intent::SelectTop
            } else {
                Intent::Collapse
            }
        }
        Direction::Left => Intent::Parent,
        Direction::Right if collapsed && has_children => Intent::Uncollapse,
        Direction::Right if has_children && !at_closing => Intent::FirstChild,
        Direction::Right => Intent::NoOp,
    }
}

/// Resolves `intent` against the current selection.
pub fn resolve_intent(intent: Intent, state: &ReplicaState) -> Resolution {
    let Some(selected) = state.selected() else {
        return Resolution::Unchanged;
    };
    if !state.contains(selected) {
        return Resolution::Unchanged;
    }
    match intent {
        Intent::NoOp => Resolution::Unchanged,
        Intent::SelectTop => select(selected, false),
        Intent::Collapse => Resolution::Collapse(selected.to_string()),
        Intent::Uncollapse => Resolution::Uncollapse(selected.to_string()),
        Intent::FirstChild => match descend(state, selected, Edge::First) {
            Some(child) => select(&child, false),
            None => Resolution::Unchanged,
        },
        Intent::LastChild => match descend(state, selected, Edge::Last) {
            Some(child) => select(&child, has_bottom(state, &child)),
            None => Resolution::Unchanged,
        },
        Intent::NextSibling => sibling(state, selected, Edge::Last),
        Intent::PrevSibling => sibling(state, selected, Edge::First),
        Intent::Parent => parent(state, selected, false),
        Intent::ParentBottom => parent(state, selected, true),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Edge {
    First,
    Last,
}

fn select(id: &str, bottom: bool) -> Resolution {
    Resolution::Select {
        id: id.to_string(),
        bottom,
    }
}

fn has_bottom(state: &ReplicaState, id: &str) -> bool {
    state.get(id).is_some_and(|node| node.has_bottom())
}

fn is_wrapper(state: &ReplicaState, id: &str) -> bool {
    state.get(id).is_some_and(|node| node.is_wrapper())
}

/// First or last visible child of `id`, looking through wrappers.
fn descend(state: &ReplicaState, id: &str, edge: Edge) -> Option<String> {
    let children = state.get(id)?.child_ids();
    let ordered: Box<dyn Iterator<Item = &String>> = match edge {
        Edge::First => Box::new(children.iter()),
        Edge::Last => Box::new(children.iter().rev()),
    };
    for child in ordered {
        if !state.contains(child) {
            continue;
        }
        if !is_wrapper(state, child) {
            return Some(child.clone());
        }
        if let Some(inner) = descend(state, child, edge) {
            return Some(inner);
        }
    }
    None
}

/// Moves to the neighbour of `id` towards `edge`. Past the end of the list
/// the motion continues at the parent.
fn sibling(state: &ReplicaState, id: &str, toward: Edge) -> Resolution {
    let siblings = state.siblings(id);
    let Some(position) = siblings.iter().position(|sibling| sibling == id) else {
        return Resolution::Unchanged;
    };
    let candidates: Box<dyn Iterator<Item = &String>> = match toward {
        Edge::Last => Box::new(siblings[position + 1..].iter()),
        Edge::First => Box::new(siblings[..position].iter().rev()),
    };
    for candidate in candidates {
        if !state.contains(candidate) {
            continue;
        }
        let target = if is_wrapper(state, candidate) {
            let inward = match toward {
                Edge::Last => Edge::First,
                Edge::First => Edge::Last,
            };
            match descend(state, candidate, inward) {
                Some(target) => target,
                None => continue,
            }
        } else {
            candidate.clone()
        };
        let bottom = toward == Edge::First && has_bottom(state, &target);
        return select(&target, bottom);
    }
    if state.effective_parent(id).is_some() {
        parent(state, id, toward == Edge::Last)
    } else {
        Resolution::Unchanged
    }
}

/// Selects the parent of `id` (its closing line when `bottom`). A wrapper
/// parent is skipped: the motion continues as sibling motion from the
/// outermost wrapper in the chain.
fn parent(state: &ReplicaState, id: &str, bottom: bool) -> Resolution {
    let Some(mut parent) = state.effective_parent(id) else {
        return Resolution::Unchanged;
    };
    if !is_wrapper(state, parent) {
        return select(parent, bottom && has_bottom(state, parent));
    }
    while let Some(above) = state.effective_parent(parent) {
        if !is_wrapper(state, above) {
            break;
        }
        parent = above;
    }
    sibling(state, parent, if bottom { Edge::Last } else { Edge::First })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookglass_wire::{ChildList, Hydrated, NodeKind};
    use serde_json::json;

    use crate::node::NodePatch;

    fn mount(state: &mut ReplicaState, id: &str, kind: NodeKind, children: &[&str]) {
        state
            .mount(NodePatch {
                id: id.to_string(),
                kind: Some(kind),
                name: Some(Hydrated::from(json!(id))),
                children: (!children.is_empty())
                    .then(|| Some(ChildList::Ids(children.iter().map(|c| c.to_string()).collect()))),
                ..NodePatch::default()
            })
            .expect("mount");
    }

    fn step(state: &mut ReplicaState, direction: Direction) -> Resolution {
        let id = state.selected().expect("selection").to_string();
        let node = state.get(&id).expect("selected node");
        let intent = decide_intent(direction, state.selected_bottom(), node.collapsed, node.has_children());
        let resolution = resolve_intent(intent, state);
        match &resolution {
            Resolution::Select { id, bottom } => {
                state.select(Some(id.as_str()), *bottom);
            }
            Resolution::Collapse(id) => {
                state.set_collapsed(id, true);
            }
            Resolution::Uncollapse(id) => {
                state.set_collapsed(id, false);
            }
            Resolution::Unchanged => {}
        }
        resolution
    }

    fn at(state: &ReplicaState) -> (String, bool) {
        (state.selected().expect("selection").to_string(), state.selected_bottom())
    }

    #[test]
    fn every_input_combination_has_an_intent() {
        use Direction::*;
        use Intent::*;
        let expected = [
            // (direction, at_closing, collapsed, has_children) -> intent
            ((Down, false, false, true), FirstChild),
            ((Down, true, false, true), NextSibling),
            ((Down, false, true, true), NextSibling),
            ((Down, false, false, false), NextSibling),
            ((Up, true, false, true), LastChild),
            ((Up, false, false, true), PrevSibling),
            ((Up, true, true, true), PrevSibling),
            ((Up, true, false, false), PrevSibling),
            ((Left, false, false, true), Collapse),
            ((Left, true, false, true), SelectTop),
            ((Left, false, true, true), Parent),
            ((Left, false, false, false), Parent),
            ((Right, false, true, true), Uncollapse),
            ((Right, false, false, true), FirstChild),
            ((Right, true, false, true), NoOp),
            ((Right, false, false, false), NoOp),
        ];
        for ((direction, closing, collapsed, children), intent) in expected {
            assert_eq!(decide_intent(direction, closing, collapsed, children), intent);
        }
        for direction in [Up, Down, Left, Right] {
            for bits in 0..8u8 {
                // must not panic for any combination
                let _ = decide_intent(direction, bits & 1 != 0, bits & 2 != 0, bits & 4 != 0);
            }
        }
    }

    #[test]
    fn down_walks_roots_and_stops_at_the_last() {
        let mut state = ReplicaState::default();
        mount(&mut state, "r1", NodeKind::Native, &[]);
        mount(&mut state, "r2", NodeKind::Native, &[]);
        state.add_root("r1");
        state.add_root("r2");

        assert_eq!(step(&mut state, Direction::Down), select("r2", false));
        assert_eq!(step(&mut state, Direction::Down), Resolution::Unchanged);
        assert_eq!(at(&state), ("r2".to_string(), false));
    }

    #[test]
    fn walks_into_and_out_of_children() {
        let mut state = ReplicaState::default();
        mount(&mut state, "app", NodeKind::Composite, &["a", "b"]);
        mount(&mut state, "a", NodeKind::Native, &[]);
        mount(&mut state, "b", NodeKind::Native, &[]);
        mount(&mut state, "next", NodeKind::Native, &[]);
        state.add_root("app");
        state.add_root("next");

        step(&mut state, Direction::Down);
        assert_eq!(at(&state), ("a".to_string(), false));
        step(&mut state, Direction::Down);
        assert_eq!(at(&state), ("b".to_string(), false));
        // past the last child lands on the parent's closing line
        step(&mut state, Direction::Down);
        assert_eq!(at(&state), ("app".to_string(), true));
        step(&mut state, Direction::Down);
        assert_eq!(at(&state), ("next".to_string(), false));
        // and back up onto the closing line of the previous root
        step(&mut state, Direction::Up);
        assert_eq!(at(&state), ("app".to_string(), true));
        step(&mut state, Direction::Up);
        assert_eq!(at(&state), ("b".to_string(), false));
        step(&mut state, Direction::Up);
        step(&mut state, Direction::Up);
        assert_eq!(at(&state), ("app".to_string(), false));
    }

    #[test]
    fn left_and_right_collapse_and_expand() {
        let mut state = ReplicaState::default();
        mount(&mut state, "app", NodeKind::Composite, &["a"]);
        mount(&mut state, "a", NodeKind::Native, &[]);
        state.add_root("app");

        assert_eq!(step(&mut state, Direction::Left), Resolution::Collapse("app".into()));
        assert!(state.get("app").expect("app").collapsed);
        assert_eq!(step(&mut state, Direction::Right), Resolution::Uncollapse("app".into()));
        assert_eq!(step(&mut state, Direction::Right), select("a", false));
        assert_eq!(step(&mut state, Direction::Left), select("app", false));
        assert_eq!(step(&mut state, Direction::Left), Resolution::Collapse("app".into()));
        assert_eq!(step(&mut state, Direction::Left), Resolution::Unchanged);
    }

    #[test]
    fn wrappers_are_invisible_to_navigation() {
        let mut state = ReplicaState::default();
        mount(&mut state, "app", NodeKind::Composite, &["w1", "z"]);
        mount(&mut state, "w1", NodeKind::Wrapper, &["w2"]);
        mount(&mut state, "w2", NodeKind::Wrapper, &["x", "y"]);
        mount(&mut state, "x", NodeKind::Native, &[]);
        mount(&mut state, "y", NodeKind::Native, &[]);
        mount(&mut state, "z", NodeKind::Native, &[]);
        state.add_root("app");

        // first child looks through both wrappers
        step(&mut state, Direction::Down);
        assert_eq!(at(&state), ("x".to_string(), false));
        step(&mut state, Direction::Down);
        assert_eq!(at(&state), ("y".to_string(), false));
        // past the end of the wrapped list continues after the outer wrapper
        step(&mut state, Direction::Down);
        assert_eq!(at(&state), ("z".to_string(), false));
        // and back into the wrapped list from below
        step(&mut state, Direction::Up);
        assert_eq!(at(&state), ("y".to_string(), false));

        // left from a wrapped child with no sibling before the wrapper reaches app
        state.select(Some("x"), false);
        step(&mut state, Direction::Left);
        assert_eq!(at(&state), ("app".to_string(), false));
    }

    #[test]
    fn search_results_navigate_as_a_flat_list() {
        let mut state = ReplicaState::default();
        mount(&mut state, "List", NodeKind::Composite, &["item-a", "item-b"]);
        mount(&mut state, "item-a", NodeKind::Native, &[]);
        mount(&mut state, "item-b", NodeKind::Native, &[]);
        state.add_root("List");
        state.change_search("item");
        assert_eq!(at(&state), ("item-a".to_string(), false));

        step(&mut state, Direction::Down);
        assert_eq!(at(&state), ("item-b".to_string(), false));
        assert_eq!(step(&mut state, Direction::Down), Resolution::Unchanged);
        assert_eq!(step(&mut state, Direction::Left), Resolution::Unchanged);
    }
}
