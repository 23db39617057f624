//! Observer side of lookglass.
//!
//! [`ReplicaState`] is the tree model built from mount/update/unmount events,
//! [`navigation`] maps directional input onto it, and [`Store`] wires both to
//! a [`lookglass_bridge::Transport`] and runs the connection handshake.

pub mod config;
pub mod error;
pub mod navigation;
pub mod node;
pub mod replica;
pub mod search;
pub mod store;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use navigation::{decide_intent, resolve_intent, Direction, Intent, Resolution};
pub use node::{Node, NodePatch};
pub use replica::{ReplicaState, Topic};
pub use search::{NameMatcher, NodeMatcher};
pub use store::{ConnectionState, Store};
