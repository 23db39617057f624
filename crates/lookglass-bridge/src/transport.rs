use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use lookglass_wire::{
    hydrate, sanitize, sanitize_at, Envelope, EventFrame, Hydrated, Live, Path, PathSegment,
    WireError, PROTO_KEY,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

use crate::channel::Channel;
use crate::config::TransportConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::subscriptions::{SubscriptionId, Subscriptions};

/// Correlation id of an outstanding call or inspection.
pub type CallbackId = u64;

type CallHandler = Arc<dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync>;
type Continuation = Box<dyn FnOnce(Vec<Value>) + Send>;

/// Reflective members of function values that inspection never enumerates.
const HIDDEN_FUNCTION_MEMBERS: [&str; 3] = ["arguments", "callee", "caller"];

/// One end of a bridge.
///
/// Outbound events are queued and flushed as a single `many-events` envelope
/// after an adaptive delay; `send_one` skips the queue. Calls and inspections
/// are correlated by id and resolved when the peer's `callback` arrives.
/// Inbound events are hydrated and fanned out to subscribers by name.
///
/// Cloning is cheap; every clone drives the same state.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

/// Non-owning handle, for callbacks that must not keep a transport alive.
#[derive(Clone)]
pub struct WeakTransport {
    inner: Weak<Inner>,
}

impl WeakTransport {
    pub fn upgrade(&self) -> Option<Transport> {
        self.inner.upgrade().map(|inner| Transport { inner })
    }
}

struct Inner {
    channel: Arc<dyn Channel>,
    config: TransportConfig,
    subscriptions: Subscriptions<String, Hydrated>,
    call_handlers: Mutex<HashMap<String, CallHandler>>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    queue: Vec<(String, Live)>,
    flush_scheduled: bool,
    last_flush: Duration,
    /// Set while the peer has asked us to hold the queue.
    held: bool,
    next_callback: CallbackId,
    pending: HashMap<CallbackId, Continuation>,
    inspectables: HashMap<String, Live>,
    /// Ids forgotten while still queued; evicted again once the queue drains.
    forget_on_flush: HashSet<String>,
}

impl Transport {
    pub fn new(channel: Arc<dyn Channel>, config: TransportConfig) -> Self {
        let inner = Arc::new(Inner {
            channel,
            config,
            subscriptions: Subscriptions::new(),
            call_handlers: Mutex::new(HashMap::new()),
            state: Mutex::new(State::default()),
        });
        let weak = Arc::downgrade(&inner);
        inner.channel.listen(Arc::new(move |envelope| {
            if let Some(inner) = weak.upgrade() {
                Transport { inner }.receive(envelope);
            }
        }));
        Self { inner }
    }

    pub fn downgrade(&self) -> WeakTransport {
        WeakTransport {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Queues an event for the next batched flush.
    pub fn send(&self, event_name: impl Into<String>, data: impl Into<Live>) {
        let event_name = event_name.into();
        let delay = {
            let mut state = self.inner.state.lock();
            state.queue.push((event_name, data.into()));
            if state.flush_scheduled || state.held {
                return;
            }
            state.flush_scheduled = true;
            self.inner.config.flush_delay(state.last_flush)
        };
        self.schedule_flush(delay);
    }

    fn schedule_flush(&self, delay: Duration) {
        match Handle::try_current() {
            Ok(runtime) => {
                let weak = Arc::downgrade(&self.inner);
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(inner) = weak.upgrade() {
                        Transport { inner }.on_flush_timer();
                    }
                });
            }
            Err(_) => {
                trace!(target = "lookglass.transport", "no runtime; flushing inline");
                self.on_flush_timer();
            }
        }
    }

    fn on_flush_timer(&self) {
        {
            let mut state = self.inner.state.lock();
            state.flush_scheduled = false;
            if state.held {
                trace!(target = "lookglass.transport", queued = state.queue.len(), "flush held by peer");
                return;
            }
        }
        if let Err(err) = self.flush() {
            warn!(target = "lookglass.transport", error = %err, "batched flush failed");
        }
    }

    /// Sanitizes everything queued and sends it as one `many-events`
    /// envelope. The time this takes sets the delay before the next flush.
    pub fn flush(&self) -> BridgeResult<()> {
        let started = Instant::now();
        let envelope = {
            let mut state = self.inner.state.lock();
            if state.queue.is_empty() {
                return Ok(());
            }
            let queue = std::mem::take(&mut state.queue);
            let mut events = Vec::with_capacity(queue.len());
            for (event_name, data) in queue {
                let sanitized = sanitize(&data);
                if sanitized.has_proxies() {
                    remember(&mut state, &data);
                }
                events.push(EventFrame {
                    event_name,
                    data: sanitized.value,
                    cleaned: sanitized.cleaned,
                });
            }
            for id in std::mem::take(&mut state.forget_on_flush) {
                state.inspectables.remove(&id);
            }
            Envelope::ManyEvents { events }
        };
        let result = self.inner.channel.send(&envelope);
        let elapsed = started.elapsed();
        self.inner.state.lock().last_flush = elapsed;
        if let Envelope::ManyEvents { events } = &envelope {
            trace!(
                target = "lookglass.transport",
                events = events.len(),
                elapsed_us = elapsed.as_micros() as u64,
                "flushed batch"
            );
        }
        result
    }

    /// Sends a single event immediately, ahead of anything queued.
    pub fn send_one(&self, event_name: impl Into<String>, data: impl Into<Live>) -> BridgeResult<()> {
        let data = data.into();
        let sanitized = sanitize(&data);
        if sanitized.has_proxies() {
            remember(&mut self.inner.state.lock(), &data);
        }
        self.inner.channel.send(&Envelope::Event(EventFrame {
            event_name: event_name.into(),
            data: sanitized.value,
            cleaned: sanitized.cleaned,
        }))
    }

    pub fn on<F>(&self, event_name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Hydrated) + Send + Sync + 'static,
    {
        self.inner.subscriptions.on(event_name.into(), handler)
    }

    pub fn once<F>(&self, event_name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Hydrated) + Send + Sync + 'static,
    {
        self.inner.subscriptions.once(event_name.into(), handler)
    }

    pub fn off(&self, event_name: &str, id: SubscriptionId) -> bool {
        self.inner.subscriptions.off(&event_name.to_string(), id)
    }

    /// Registers the handler that answers `call` envelopes named `name`.
    /// Each name takes exactly one handler.
    pub fn on_call<F>(&self, name: impl Into<String>, handler: F) -> BridgeResult<()>
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        let mut handlers = self.inner.call_handlers.lock();
        if handlers.contains_key(&name) {
            error!(target = "lookglass.transport", call = %name, "call handler registered twice");
            return Err(BridgeError::HandlerExists(name));
        }
        handlers.insert(name, Arc::new(handler));
        Ok(())
    }

    /// Invokes `name` on the peer. `callback` receives the handler's result;
    /// it never runs if the peer has no handler or the handler fails.
    pub fn call<F>(&self, name: impl Into<String>, args: Value, callback: F) -> BridgeResult<CallbackId>
    where
        F: FnOnce(Value) + Send + 'static,
    {
        let name = name.into();
        let id = self.register(Box::new(move |mut args: Vec<Value>| {
            let result = if args.is_empty() {
                Value::Null
            } else {
                args.swap_remove(0)
            };
            callback(result)
        }));
        self.send_pending(id, &Envelope::Call {
            name,
            args,
            callback: id,
        })?;
        Ok(id)
    }

    /// [`call`](Self::call) as a future. Resolves to [`BridgeError::Closed`]
    /// only when the transport is dropped with the call still pending; wrap it
    /// in `tokio::time::timeout` to bound the wait.
    pub async fn request(&self, name: impl Into<String>, args: Value) -> BridgeResult<Value> {
        let (tx, rx) = oneshot::channel();
        self.call(name, args, move |result| {
            let _ = tx.send(result);
        })?;
        rx.await.map_err(|_| BridgeError::Closed)
    }

    /// Asks the peer for the members of the value at `path` inside the payload
    /// it last sent for node `id`. `callback` receives the hydrated members
    /// with any prototype members under [`PROTO_KEY`].
    pub fn inspect<F>(&self, id: impl Into<String>, path: Path, callback: F) -> BridgeResult<CallbackId>
    where
        F: FnOnce(Hydrated) + Send + 'static,
    {
        let callback_id = self.register(Box::new(move |args: Vec<Value>| {
            callback(assemble_inspection(args))
        }));
        self.send_pending(callback_id, &Envelope::Inspect {
            id: id.into(),
            path,
            callback: callback_id,
        })?;
        Ok(callback_id)
    }

    fn register(&self, continuation: Continuation) -> CallbackId {
        let mut state = self.inner.state.lock();
        let id = state.next_callback;
        state.next_callback += 1;
        state.pending.insert(id, continuation);
        id
    }

    fn send_pending(&self, id: CallbackId, envelope: &Envelope) -> BridgeResult<()> {
        if let Err(err) = self.inner.channel.send(envelope) {
            self.inner.state.lock().pending.remove(&id);
            return Err(err);
        }
        Ok(())
    }

    /// Drops the cached value for `id`. An event for `id` that is still queued
    /// is evicted again once it has been flushed.
    pub fn forget(&self, id: &str) {
        let mut state = self.inner.state.lock();
        state.inspectables.remove(id);
        if !state.queue.is_empty() {
            state.forget_on_flush.insert(id.to_string());
        }
    }

    pub fn is_inspectable(&self, id: &str) -> bool {
        self.inner.state.lock().inspectables.contains_key(id)
    }

    pub fn pending_calls(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// True while the peer has asked this side to hold its queue.
    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().held
    }

    /// Asks the peer to hold its batched events until [`resume_peer`](Self::resume_peer).
    pub fn pause_peer(&self) -> BridgeResult<()> {
        self.inner.channel.send(&Envelope::Pause)
    }

    pub fn resume_peer(&self) -> BridgeResult<()> {
        self.inner.channel.send(&Envelope::Resume)
    }

    /// Entry point for every inbound envelope. Channels call this through the
    /// listener installed by [`Transport::new`]; custom channels may also call
    /// it directly.
    pub fn receive(&self, envelope: Envelope) {
        match envelope {
            Envelope::Event(frame) => self.deliver(frame),
            Envelope::ManyEvents { events } => {
                for frame in events {
                    self.deliver(frame);
                }
            }
            Envelope::Call {
                name,
                args,
                callback,
            } => self.answer_call(name, args, callback),
            Envelope::Inspect { id, path, callback } => self.answer_inspect(&id, &path, callback),
            Envelope::Callback { id, args } => {
                let continuation = self.inner.state.lock().pending.remove(&id);
                match continuation {
                    Some(continuation) => continuation(args),
                    None => debug!(target = "lookglass.transport", callback = id, "callback for unknown id"),
                }
            }
            Envelope::Pause => {
                debug!(target = "lookglass.transport", "peer paused transfer");
                self.inner.state.lock().held = true;
            }
            Envelope::Resume => {
                debug!(target = "lookglass.transport", "peer resumed transfer");
                self.inner.state.lock().held = false;
                if let Err(err) = self.flush() {
                    warn!(target = "lookglass.transport", error = %err, "flush on resume failed");
                }
            }
        }
    }

    fn deliver(&self, frame: EventFrame) {
        let data = hydrate(frame.data, &frame.cleaned);
        let delivered = self.inner.subscriptions.emit(&frame.event_name, &data);
        if delivered == 0 {
            trace!(target = "lookglass.transport", event = %frame.event_name, "event without subscribers");
        }
    }

    fn answer_call(&self, name: String, args: Value, callback: CallbackId) {
        let handler = self.inner.call_handlers.lock().get(&name).cloned();
        let Some(handler) = handler else {
            warn!(target = "lookglass.transport", call = %name, callback, "no handler registered for call");
            return;
        };
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| handler(args))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                error!(target = "lookglass.transport", call = %name, panic = panic_message(&*payload), "call handler panicked");
                return;
            }
        };
        match outcome {
            Ok(result) => {
                let reply = Envelope::Callback {
                    id: callback,
                    args: vec![result],
                };
                if let Err(err) = self.inner.channel.send(&reply) {
                    warn!(target = "lookglass.transport", call = %name, error = %err, "failed to send call result");
                }
            }
            Err(err) => {
                error!(target = "lookglass.transport", call = %name, error = ?err, "call handler failed");
            }
        }
    }

    fn answer_inspect(&self, id: &str, path: &[PathSegment], callback: CallbackId) {
        let cached = self.inner.state.lock().inspectables.get(id).cloned();
        let target = cached.and_then(|value| value.descend(path));
        let reply = match &target {
            Some(value) => inspection_reply(value),
            None => {
                debug!(target = "lookglass.transport", node = %id, "inspect target not cached");
                Ok(vec![
                    Value::Object(Map::new()),
                    Value::Array(Vec::new()),
                    Value::Null,
                    Value::Array(Vec::new()),
                ])
            }
        };
        let result = reply.and_then(|args| {
            self.inner.channel.send(&Envelope::Callback { id: callback, args })
        });
        if let Err(err) = result {
            warn!(target = "lookglass.transport", node = %id, error = %err, "failed to answer inspect");
        }
    }
}

fn remember(state: &mut State, data: &Live) {
    if let Some(id) = data.id() {
        state.inspectables.insert(id, data.clone());
    }
}

/// Own members of `value`, each sanitized under its own key.
fn members_of(value: &Live) -> Vec<(String, Live)> {
    match value {
        Live::Object(object) => object.entries(),
        Live::Array(array) => array
            .items()
            .into_iter()
            .enumerate()
            .map(|(index, item)| (index.to_string(), item))
            .collect(),
        Live::Function(function) => function
            .entries()
            .into_iter()
            .filter(|(key, _)| !HIDDEN_FUNCTION_MEMBERS.contains(&key.as_str()))
            .collect(),
        _ => Vec::new(),
    }
}

fn sanitize_members(members: Vec<(String, Live)>) -> (Value, Vec<Path>) {
    let mut out = Map::new();
    let mut cleaned = Vec::new();
    for (key, member) in members {
        let sanitized = sanitize_at(&member, vec![PathSegment::Key(key.clone())], 0);
        cleaned.extend(sanitized.cleaned);
        out.insert(key, sanitized.value);
    }
    (Value::Object(out), cleaned)
}

fn inspection_reply(value: &Live) -> BridgeResult<Vec<Value>> {
    let (result, cleaned) = sanitize_members(members_of(value));
    let (proto, proto_cleaned) = match value {
        Live::Object(object) if !object.is_generic() => match object.prototype() {
            Some(proto) => sanitize_members(proto.entries()),
            None => (Value::Null, Vec::new()),
        },
        _ => (Value::Null, Vec::new()),
    };
    Ok(vec![
        result,
        paths_to_json(&cleaned)?,
        proto,
        paths_to_json(&proto_cleaned)?,
    ])
}

fn paths_to_json(paths: &[Path]) -> BridgeResult<Value> {
    serde_json::to_value(paths).map_err(|err| BridgeError::Wire(WireError::Encode(err)))
}

fn paths_from_json(value: Option<Value>) -> Vec<Path> {
    value
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default()
}

/// Rebuilds `[result, cleaned, proto, protoCleaned]` into one hydrated value.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn assemble_inspection(args: Vec<Value>) -> Hydrated {
    let mut args = args.into_iter();
    let result = args.next().unwrap_or(Value::Null);
    let cleaned = paths_from_json(args.next());
    let proto = args.next().unwrap_or(Value::Null);
    let proto_cleaned = paths_from_json(args.next());

    let mut result = hydrate(result, &cleaned);
    if !proto.is_null() {
        let proto = hydrate(proto, &proto_cleaned);
        if let Hydrated::Object(map) = &mut result {
            map.insert(PROTO_KEY.to_string(), proto);
        }
    }
    result
}
