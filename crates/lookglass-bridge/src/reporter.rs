use std::collections::HashMap;
use std::sync::{Arc, Weak};

use lookglass_wire::{events, field, Capabilities, ExternalHandle, Hydrated, Live, NodeRecord, Path};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::BridgeResult;
use crate::transport::Transport;

/// A mutation the observer asked the runtime to apply to one node.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    SetAttribute { path: Path, value: Value },
    SetLocalState { path: Path, value: Value },
    SetContext { path: Path, value: Value },
    ForceRefresh,
}

/// Host-side effects the observer can trigger. Every hook receives the
/// external handle the adapter registered for the node, if any.
pub trait HostHooks: Send + Sync {
    fn highlight(&self, _id: &str, _handle: Option<&ExternalHandle>) {}
    fn hide_highlight(&self) {}
    fn scroll_to(&self, _id: &str, _handle: Option<&ExternalHandle>) {}
    fn selected(&self, _id: &str, _handle: Option<&ExternalHandle>) {}
    fn mutate(&self, _id: &str, _mutation: Mutation, _handle: Option<&ExternalHandle>) {}
}

/// Hooks for runtimes with nothing to highlight or mutate.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl HostHooks for NoopHooks {}

/// Runtime-side reporting API. An adapter that watches the real tree calls
/// `mount`/`update`/`unmount`; the reporter turns those into batched events
/// and answers the observer's requests.
#[derive(Clone)]
pub struct TreeReporter {
    inner: Arc<ReporterInner>,
}

struct ReporterInner {
    transport: Transport,
    capabilities: Capabilities,
    handles: Mutex<HashMap<String, ExternalHandle>>,
    hooks: Arc<dyn HostHooks>,
}

impl TreeReporter {
    pub fn new(transport: Transport, capabilities: Capabilities, hooks: Arc<dyn HostHooks>) -> Self {
        let inner = Arc::new(ReporterInner {
            transport,
            capabilities,
            handles: Mutex::new(HashMap::new()),
            hooks,
        });
        Self::subscribe(&inner);
        Self { inner }
    }

    fn subscribe(inner: &Arc<ReporterInner>) {
        let transport = &inner.transport;

        let weak = Arc::downgrade(inner);
        transport.on(events::REQUEST_CAPABILITIES, move |_| {
            with_inner(&weak, |inner| {
                let record = Live::object(
                    inner
                        .capabilities
                        .iter()
                        .map(|(name, enabled)| (name.clone(), Live::from(*enabled))),
                );
                if let Err(err) = inner.transport.send_one(events::CAPABILITIES, record) {
                    warn!(target = "lookglass.reporter", error = %err, "failed to answer capability request");
                }
            });
        });

        let weak = Arc::downgrade(inner);
        transport.on(events::HIGHLIGHT, move |data| {
            with_node(&weak, data, |inner, id, handle| inner.hooks.highlight(id, handle));
        });

        let weak = Arc::downgrade(inner);
        transport.on(events::HIDE_HIGHLIGHT, move |_| {
            with_inner(&weak, |inner| inner.hooks.hide_highlight());
        });

        let weak = Arc::downgrade(inner);
        transport.on(events::SCROLL_TO_NODE, move |data| {
            with_node(&weak, data, |inner, id, handle| inner.hooks.scroll_to(id, handle));
        });

        let weak = Arc::downgrade(inner);
        transport.on(events::SELECTED, move |data| {
            with_node(&weak, data, |inner, id, handle| inner.hooks.selected(id, handle));
        });

        for event in [
            events::SET_ATTRIBUTE,
            events::SET_LOCAL_STATE,
            events::SET_CONTEXT,
            events::FORCE_REFRESH,
        ] {
            let weak = Arc::downgrade(inner);
            transport.on(event, move |data| {
                let Some(id) = data.get(field::ID).and_then(Hydrated::as_str) else {
                    warn!(target = "lookglass.reporter", event, "mutation without node id");
                    return;
                };
                let Some(mutation) = parse_mutation(event, data) else {
                    warn!(target = "lookglass.reporter", event, node = %id, "malformed mutation");
                    return;
                };
                with_inner(&weak, |inner| {
                    let handle = inner.handles.lock().get(id).cloned();
                    inner.hooks.mutate(id, mutation, handle.as_ref());
                });
            });
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    pub fn add_root(&self, id: &str) {
        self.inner.transport.send(events::ROOT, Live::from(id));
    }

    pub fn mount(&self, record: NodeRecord) {
        self.track_handle(&record);
        debug!(target = "lookglass.reporter", node = %record.id, "mount");
        self.inner.transport.send(events::MOUNT, record.to_live());
    }

    pub fn update(&self, record: NodeRecord) {
        self.track_handle(&record);
        self.inner.transport.send(events::UPDATE, record.to_live());
    }

    /// Reports the removal and releases everything held for `id`.
    pub fn unmount(&self, id: &str) {
        self.inner.handles.lock().remove(id);
        debug!(target = "lookglass.reporter", node = %id, "unmount");
        self.inner.transport.send(events::UNMOUNT, Live::from(id));
        self.inner.transport.forget(id);
    }

    /// Asks the observer to select `id`, e.g. after the user picked an element
    /// in the running application.
    pub fn select(&self, id: &str) -> BridgeResult<()> {
        self.inner.transport.flush()?;
        self.inner.transport.send_one(events::SELECT, Live::from(id))
    }

    pub fn handle(&self, id: &str) -> Option<ExternalHandle> {
        self.inner.handles.lock().get(id).cloned()
    }

    fn track_handle(&self, record: &NodeRecord) {
        if let Some(handle) = &record.external_handle {
            self.inner
                .handles
                .lock()
                .insert(record.id.clone(), handle.clone());
        }
    }
}

fn with_inner(weak: &Weak<ReporterInner>, f: impl FnOnce(&ReporterInner)) {
    if let Some(inner) = weak.upgrade() {
        f(&inner);
    }
}

fn with_node(
    weak: &Weak<ReporterInner>,
    data: &Hydrated,
    f: impl FnOnce(&ReporterInner, &str, Option<&ExternalHandle>),
) {
    let Some(id) = data.as_str() else {
        warn!(target = "lookglass.reporter", "expected a node id");
        return;
    };
    with_inner(weak, |inner| {
        let handle = inner.handles.lock().get(id).cloned();
        f(inner, id, handle.as_ref());
    });
}

fn parse_mutation(event: &str, data: &Hydrated) -> Option<Mutation> {
    if event == events::FORCE_REFRESH {
        return Some(Mutation::ForceRefresh);
    }
    let path: Path = serde_json::from_value(data.get("path")?.to_json()).ok()?;
    let value = data.get("value").map(Hydrated::to_json).unwrap_or(Value::Null);
    match event {
        events::SET_ATTRIBUTE => Some(Mutation::SetAttribute { path, value }),
        events::SET_LOCAL_STATE => Some(Mutation::SetLocalState { path, value }),
        events::SET_CONTEXT => Some(Mutation::SetContext { path, value }),
        _ => None,
    }
}
