use std::sync::{Arc, Weak};

use lookglass_bridge::{CallbackId, SubscriptionId, Subscriptions, Transport};
use lookglass_wire::{events, field, Capabilities, Hydrated, Live, Path, PathSegment};
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::navigation::{decide_intent, resolve_intent, Direction, Resolution};
use crate::node::{Node, NodePatch};
use crate::replica::{ReplicaState, Topic};
use crate::search::{NameMatcher, NodeMatcher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected(Capabilities),
    Failed,
}

/// Observer-side state container. Feeds transport events into a
/// [`ReplicaState`], runs the capability handshake, and exposes the
/// user-facing operations: selection, hover, navigation, search, inspection
/// and capability-gated mutations.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    transport: Transport,
    config: StoreConfig,
    state: Mutex<ReplicaState>,
    connection: Mutex<ConnectionState>,
    listeners: Subscriptions<Topic, Topic>,
    handshake: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        if let Some(handle) = self.handshake.lock().take() {
            handle.abort();
        }
    }
}

impl Store {
    pub fn new(transport: Transport, config: StoreConfig) -> Self {
        Self::with_matcher(transport, config, Arc::new(NameMatcher))
    }

    pub fn with_matcher(transport: Transport, config: StoreConfig, matcher: Arc<dyn NodeMatcher>) -> Self {
        let inner = Arc::new(StoreInner {
            transport,
            config,
            state: Mutex::new(ReplicaState::new(matcher)),
            connection: Mutex::new(ConnectionState::Connecting),
            listeners: Subscriptions::new(),
            handshake: Mutex::new(None),
        });
        Self::subscribe(&inner);
        Self::start_handshake(&inner);
        Self { inner }
    }

    fn subscribe(inner: &Arc<StoreInner>) {
        let transport = &inner.transport;

        let weak = Arc::downgrade(inner);
        transport.on(events::MOUNT, move |data| {
            with_store(&weak, |store| store.on_mount(data));
        });
        let weak = Arc::downgrade(inner);
        transport.on(events::UPDATE, move |data| {
            with_store(&weak, |store| store.on_update(data));
        });
        let weak = Arc::downgrade(inner);
        transport.on(events::UNMOUNT, move |data| {
            with_store(&weak, |store| match data.as_str() {
                Some(id) => store.on_unmount(id),
                None => warn!(target = "lookglass.store", "unmount without node id"),
            });
        });
        let weak = Arc::downgrade(inner);
        transport.on(events::ROOT, move |data| {
            with_store(&weak, |store| match data.as_str() {
                Some(id) => store.on_root(id),
                None => warn!(target = "lookglass.store", "root without node id"),
            });
        });
        let weak = Arc::downgrade(inner);
        transport.on(events::SELECT, move |data| {
            with_store(&weak, |store| match data.as_str() {
                Some(id) => {
                    let topics = store.state().select(Some(id), false);
                    store.notify(topics);
                }
                None => warn!(target = "lookglass.store", "select without node id"),
            });
        });
        let weak = Arc::downgrade(inner);
        transport.on(events::CAPABILITIES, move |data| {
            with_store(&weak, |store| store.on_capabilities(data));
        });
    }

    fn start_handshake(inner: &Arc<StoreInner>) {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                error!(target = "lookglass.store", error = %err, "handshake needs a tokio runtime");
                return;
            }
        };
        let weak = Arc::downgrade(inner);
        let interval = inner.config.handshake_interval;
        let attempts = inner.config.handshake_attempts;
        let handle = runtime.spawn(async move {
            for attempt in 1..=attempts {
                {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    if *inner.connection.lock() != ConnectionState::Connecting {
                        return;
                    }
                    debug!(target = "lookglass.store", attempt, "requesting capabilities");
                    if let Err(err) = inner.transport.send_one(events::REQUEST_CAPABILITIES, Live::Null) {
                        warn!(target = "lookglass.store", attempt, error = %err, "capability request failed");
                    }
                }
                tokio::time::sleep(interval).await;
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let store = Store { inner };
            {
                let mut connection = store.inner.connection.lock();
                if *connection != ConnectionState::Connecting {
                    return;
                }
                *connection = ConnectionState::Failed;
            }
            warn!(target = "lookglass.store", attempts, "connection failed; no capability answer");
            store.notify(vec![Topic::Connection]);
        });
        *inner.handshake.lock() = Some(handle);
    }

    fn state(&self) -> MutexGuard<'_, ReplicaState> {
        self.inner.state.lock()
    }

    fn notify(&self, topics: Vec<Topic>) {
        let mut seen: Vec<&Topic> = Vec::with_capacity(topics.len());
        for topic in &topics {
            if seen.contains(&topic) {
                continue;
            }
            seen.push(topic);
            self.inner.listeners.emit(topic, topic);
        }
    }

    fn on_mount(&self, data: &Hydrated) {
        let patch = match NodePatch::from_payload(data) {
            Ok(patch) => patch,
            Err(err) => {
                warn!(target = "lookglass.store", error = %err, "ignoring mount");
                return;
            }
        };
        let result = self.state().mount(patch);
        match result {
            Ok(topics) => self.notify(topics),
            Err(err) => warn!(target = "lookglass.store", error = %err, "ignoring mount"),
        }
    }

    fn on_update(&self, data: &Hydrated) {
        match NodePatch::from_payload(data) {
            Ok(patch) => {
                let topics = self.state().update(patch);
                self.notify(topics);
            }
            Err(err) => warn!(target = "lookglass.store", error = %err, "ignoring update"),
        }
    }

    fn on_unmount(&self, id: &str) {
        let (topics, hovered_gone) = {
            let mut state = self.state();
            let was_hovered = state.hovered() == Some(id);
            let topics = state.unmount(id);
            (topics, was_hovered)
        };
        if topics.is_empty() {
            return;
        }
        self.inner.transport.forget(id);
        if hovered_gone {
            self.send_one(events::HIDE_HIGHLIGHT, Live::Null);
        }
        let selection_changed = topics.contains(&Topic::Selection);
        self.notify(topics);
        if selection_changed {
            self.report_selection();
        }
    }

    fn on_root(&self, id: &str) {
        let topics = self.state().add_root(id);
        let selection_changed = topics.contains(&Topic::Selection);
        self.notify(topics);
        if selection_changed {
            self.report_selection();
        }
    }

    fn on_capabilities(&self, data: &Hydrated) {
        let capabilities: Capabilities = match data {
            Hydrated::Object(entries) => entries
                .iter()
                .filter_map(|(name, value)| match value {
                    Hydrated::Real(Value::Bool(enabled)) => Some((name.clone(), *enabled)),
                    _ => None,
                })
                .collect(),
            _ => Capabilities::new(),
        };
        {
            let mut connection = self.inner.connection.lock();
            if matches!(*connection, ConnectionState::Connected(_)) {
                debug!(target = "lookglass.store", "ignoring repeated capability answer");
                return;
            }
            *connection = ConnectionState::Connected(capabilities);
        }
        info!(target = "lookglass.store", "connected");
        self.notify(vec![Topic::Connection]);
    }

    fn send_one(&self, event: &str, data: Live) {
        if let Err(err) = self.inner.transport.send_one(event, data) {
            warn!(target = "lookglass.store", event, error = %err, "failed to send");
        }
    }

    fn report_selection(&self) {
        let selected = self.state().selected().map(str::to_string);
        if let Some(id) = selected {
            self.send_one(events::SELECTED, Live::from(id));
        }
    }

    fn apply_selection(&self, id: Option<&str>, bottom: bool) {
        let topics = self.state().select(id, bottom);
        let changed = topics.contains(&Topic::Selection);
        self.notify(topics);
        if changed {
            self.report_selection();
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    pub fn connection(&self) -> ConnectionState {
        self.inner.connection.lock().clone()
    }

    /// Listens for changes to one topic. The handler runs after the change is
    /// fully applied.
    pub fn subscribe_topic<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&Topic) + Send + Sync + 'static,
    {
        self.inner.listeners.on(topic, handler)
    }

    pub fn unsubscribe_topic(&self, topic: &Topic, id: SubscriptionId) -> bool {
        self.inner.listeners.off(topic, id)
    }

    /// Runs `f` with read access to the replica.
    pub fn with_state<R>(&self, f: impl FnOnce(&ReplicaState) -> R) -> R {
        f(&self.state())
    }

    pub fn node(&self, id: &str) -> Option<Node> {
        self.state().get(id).cloned()
    }

    pub fn roots(&self) -> Vec<String> {
        self.state().roots().to_vec()
    }

    pub fn selected(&self) -> Option<String> {
        self.state().selected().map(str::to_string)
    }

    pub fn hovered(&self) -> Option<String> {
        self.state().hovered().map(str::to_string)
    }

    pub fn search_roots(&self) -> Option<Vec<String>> {
        self.state().search_roots().map(<[String]>::to_vec)
    }

    pub fn select(&self, id: &str) {
        self.apply_selection(Some(id), false);
    }

    pub fn clear_selection(&self) {
        self.apply_selection(None, false);
    }

    /// Records hover and asks the runtime to highlight or un-highlight.
    pub fn hover(&self, id: &str, on: bool) {
        let topics = self.state().hover(id, on);
        if topics.is_empty() {
            return;
        }
        if on {
            self.send_one(events::HIGHLIGHT, Live::from(id));
        } else {
            self.send_one(events::HIDE_HIGHLIGHT, Live::Null);
        }
        self.notify(topics);
    }

    pub fn scroll_to(&self, id: &str) {
        self.send_one(events::SCROLL_TO_NODE, Live::from(id));
    }

    /// Moves the selection one step. Returns how the step resolved.
    pub fn navigate(&self, direction: Direction) -> Resolution {
        let resolution = {
            let state = self.state();
            let Some(node) = state.selected().and_then(|id| state.get(id)) else {
                return Resolution::Unchanged;
            };
            let intent = decide_intent(direction, state.selected_bottom(), node.collapsed, node.has_children());
            resolve_intent(intent, &state)
        };
        match &resolution {
            Resolution::Select { id, bottom } => self.apply_selection(Some(id.as_str()), *bottom),
            Resolution::Collapse(id) => self.set_collapsed(id, true),
            Resolution::Uncollapse(id) => self.set_collapsed(id, false),
            Resolution::Unchanged => {}
        }
        resolution
    }

    pub fn change_search(&self, text: &str) {
        let topics = self.state().change_search(text);
        let changed = topics.contains(&Topic::Selection);
        self.notify(topics);
        if changed {
            self.report_selection();
        }
    }

    pub fn set_collapsed(&self, id: &str, collapsed: bool) {
        let topics = self.state().set_collapsed(id, collapsed);
        self.notify(topics);
    }

    pub fn toggle_collapse(&self, id: &str) {
        let topics = self.state().toggle_collapse(id);
        self.notify(topics);
    }

    pub fn breadcrumb(&self, id: &str) -> Vec<String> {
        self.state().breadcrumb(id)
    }

    /// Fetches the members behind a proxy marker in one of a node's data
    /// fields and splices them into the replica before calling `callback`.
    pub fn inspect<F>(&self, id: &str, path: Path, callback: F) -> StoreResult<CallbackId>
    where
        F: FnOnce(&Hydrated) + Send + 'static,
    {
        if !self.state().contains(id) {
            return Err(StoreError::UnknownNode(id.to_string()));
        }
        match path.first().map(PathSegment::as_key).as_deref() {
            Some(field::ATTRIBUTES | field::LOCAL_STATE | field::CONTEXT) => {}
            _ => {
                return Err(StoreError::MalformedPayload(format!(
                    "inspect path must start with a data field, got {}",
                    lookglass_wire::format_path(&path)
                )))
            }
        }
        let weak = Arc::downgrade(&self.inner);
        let node_id = id.to_string();
        let splice_path = path.clone();
        let callback_id = self.inner.transport.inspect(id, path, move |value| {
            if let Some(inner) = weak.upgrade() {
                let store = Store { inner };
                let topics = store.state().splice(&node_id, &splice_path, value.clone());
                store.notify(topics);
            }
            callback(&value);
        })?;
        Ok(callback_id)
    }

    pub fn set_attribute(&self, id: &str, path: Path, value: Value) -> StoreResult<()> {
        self.mutate(id, events::SET_ATTRIBUTE, Some((path, value)))
    }

    pub fn set_local_state(&self, id: &str, path: Path, value: Value) -> StoreResult<()> {
        self.mutate(id, events::SET_LOCAL_STATE, Some((path, value)))
    }

    pub fn set_context(&self, id: &str, path: Path, value: Value) -> StoreResult<()> {
        self.mutate(id, events::SET_CONTEXT, Some((path, value)))
    }

    pub fn force_refresh(&self, id: &str) -> StoreResult<()> {
        self.mutate(id, events::FORCE_REFRESH, None)
    }

    fn mutate(&self, id: &str, capability: &'static str, edit: Option<(Path, Value)>) -> StoreResult<()> {
        {
            let state = self.state();
            let node = state
                .get(id)
                .ok_or_else(|| StoreError::UnknownNode(id.to_string()))?;
            if !node.has_capability(capability) {
                return Err(StoreError::MissingCapability {
                    id: id.to_string(),
                    capability,
                });
            }
        }
        let mut payload = vec![(field::ID, Live::from(id))];
        if let Some((path, value)) = edit {
            payload.push(("path", path_to_live(&path)));
            payload.push(("value", Live::from(value)));
        }
        self.inner.transport.send(capability, Live::object(payload));
        Ok(())
    }
}

fn with_store(weak: &Weak<StoreInner>, f: impl FnOnce(&Store)) {
    if let Some(inner) = weak.upgrade() {
        f(&Store { inner });
    }
}

fn path_to_live(path: &[PathSegment]) -> Live {
    Live::array(path.iter().map(|segment| match segment {
        PathSegment::Index(index) => Live::Number(*index as f64),
        PathSegment::Key(key) => Live::from(key.as_str()),
    }))
}
