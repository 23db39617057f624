//! Event names both ends agree on.

pub const MOUNT: &str = "mount";
pub const UPDATE: &str = "update";
pub const UNMOUNT: &str = "unmount";
pub const ROOT: &str = "root";

/// Runtime asks the observer to select a node.
pub const SELECT: &str = "select";
/// Observer reports its current selection to the runtime.
pub const SELECTED: &str = "selected";

pub const REQUEST_CAPABILITIES: &str = "requestCapabilities";
pub const CAPABILITIES: &str = "capabilities";

pub const HIGHLIGHT: &str = "highlight";
pub const HIDE_HIGHLIGHT: &str = "hideHighlight";
pub const SCROLL_TO_NODE: &str = "scrollToNode";

pub const SET_ATTRIBUTE: &str = "setAttribute";
pub const SET_LOCAL_STATE: &str = "setLocalState";
pub const SET_CONTEXT: &str = "setContext";
pub const FORCE_REFRESH: &str = "forceRefresh";
