use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lookglass_bridge::{
    Channel, HostHooks, LocalChannel, Mutation, Transport, TransportConfig, TreeReporter,
};
use lookglass_replica::{ConnectionState, Direction, Resolution, Store, StoreConfig, StoreError, Topic};
use lookglass_wire::{
    events, Capabilities, Envelope, EventFrame, ExternalHandle, Live, LiveObject, NodeKind, NodeRecord,
};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

#[derive(Default)]
struct Hooks {
    calls: Mutex<Vec<String>>,
}

impl HostHooks for Hooks {
    fn highlight(&self, id: &str, handle: Option<&ExternalHandle>) {
        let tag = handle.and_then(|h| h.downcast_ref::<&'static str>()).copied().unwrap_or("-");
        self.calls.lock().push(format!("highlight {id} {tag}"));
    }

    fn hide_highlight(&self) {
        self.calls.lock().push("hide".into());
    }

    fn selected(&self, id: &str, _handle: Option<&ExternalHandle>) {
        self.calls.lock().push(format!("selected {id}"));
    }

    fn mutate(&self, id: &str, mutation: Mutation, _handle: Option<&ExternalHandle>) {
        self.calls.lock().push(format!("mutate {id} {mutation:?}"));
    }
}

struct Session {
    reporter: TreeReporter,
    store: Store,
    hooks: Arc<Hooks>,
}

fn session() -> Session {
    let (runtime_end, observer_end) = LocalChannel::pair();
    let runtime = Transport::new(Arc::new(runtime_end), TransportConfig::default());
    let observer = Transport::new(Arc::new(observer_end), TransportConfig::default());
    let hooks = Arc::new(Hooks::default());
    let reporter = TreeReporter::new(
        runtime,
        Capabilities::from([("inspect".to_string(), true)]),
        hooks.clone(),
    );
    let store = Store::new(observer, StoreConfig::default());
    Session { reporter, store, hooks }
}

/// Lets every pending flush, delivery and reply run. Under a paused clock
/// this costs no real time.
async fn settle() {
    tokio::time::sleep(Duration::from_secs(1)).await;
}

fn mount_app(reporter: &TreeReporter) {
    reporter.mount(
        NodeRecord::new("app", NodeKind::Composite)
            .name("App")
            .children(["header", "list"])
            .capability(events::SET_ATTRIBUTE),
    );
    reporter.mount(
        NodeRecord::new("header", NodeKind::Native)
            .name("Header")
            .handle(ExternalHandle::new("header-view")),
    );
    reporter.mount(NodeRecord::new("list", NodeKind::Composite).name("List"));
    reporter.add_root("app");
}

#[test_timeout::tokio_timeout_test(paused)]
async fn handshake_connects_when_the_runtime_answers() {
    let session = session();
    let (tx, mut rx) = mpsc::unbounded_channel();
    session.store.subscribe_topic(Topic::Connection, move |_| {
        let _ = tx.send(());
    });
    rx.recv().await.expect("connection topic");
    assert_eq!(
        session.store.connection(),
        ConnectionState::Connected(Capabilities::from([("inspect".to_string(), true)]))
    );
    // a second answer is ignored
    session
        .reporter
        .transport()
        .send_one(events::CAPABILITIES, Live::object([("inspect", Live::from(false))]))
        .expect("send");
    settle().await;
    assert!(matches!(session.store.connection(), ConnectionState::Connected(caps) if caps["inspect"]));
}

#[test_timeout::tokio_timeout_test(paused)]
async fn handshake_fails_after_the_configured_attempts() {
    let (observer_end, silent_end) = LocalChannel::pair();
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = requests.clone();
    silent_end.listen(Arc::new(move |envelope| {
        if let Envelope::Event(frame) = envelope {
            if frame.event_name == events::REQUEST_CAPABILITIES {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }
    }));
    let observer = Transport::new(Arc::new(observer_end), TransportConfig::default());
    let config = StoreConfig {
        handshake_interval: Duration::from_millis(100),
        handshake_attempts: 5,
    };
    let store = Store::new(observer, config);
    let (tx, mut rx) = mpsc::unbounded_channel();
    store.subscribe_topic(Topic::Connection, move |_| {
        let _ = tx.send(());
    });

    let started = tokio::time::Instant::now();
    rx.recv().await.expect("connection topic");
    assert_eq!(store.connection(), ConnectionState::Failed);
    assert!(started.elapsed() >= Duration::from_millis(500));
    settle().await;
    assert_eq!(requests.load(Ordering::SeqCst), 5);

    // a late answer still connects
    silent_end
        .send(&Envelope::Event(EventFrame {
            event_name: events::CAPABILITIES.into(),
            data: json!({}),
            cleaned: Vec::new(),
        }))
        .expect("late answer");
    rx.recv().await.expect("connected after failure");
    assert_eq!(store.connection(), ConnectionState::Connected(Capabilities::new()));
}

#[test_timeout::tokio_timeout_test(paused)]
async fn replica_follows_the_reported_tree() {
    let session = session();
    mount_app(&session.reporter);
    settle().await;

    let store = &session.store;
    assert_eq!(store.roots(), ["app"]);
    assert_eq!(store.selected().as_deref(), Some("app"));
    assert_eq!(store.with_state(|state| state.parent_of("list").map(str::to_string)), Some("app".into()));
    assert_eq!(session.hooks.calls.lock().as_slice(), ["selected app"]);

    session
        .reporter
        .update(NodeRecord::patch("list").children(["item"]));
    session.reporter.mount(NodeRecord::new("item", NodeKind::Text).text("milk"));
    settle().await;
    assert_eq!(store.node("list").expect("list").renders, 2);
    assert_eq!(store.with_state(|state| state.parent_of("item").map(str::to_string)), Some("list".into()));

    store.select("item");
    session.reporter.unmount("item");
    settle().await;
    assert!(store.node("item").is_none());
    assert_eq!(store.selected().as_deref(), Some("list"));
    assert_eq!(
        session.hooks.calls.lock().as_slice(),
        ["selected app", "selected item", "selected list"]
    );
}

#[test_timeout::tokio_timeout_test(paused)]
async fn navigation_and_hover_reach_the_runtime() {
    let session = session();
    mount_app(&session.reporter);
    settle().await;

    let store = &session.store;
    assert_eq!(
        store.navigate(Direction::Down),
        Resolution::Select {
            id: "header".into(),
            bottom: false
        }
    );
    store.hover("header", true);
    store.hover("header", false);
    settle().await;
    assert_eq!(
        session.hooks.calls.lock().as_slice(),
        ["selected app", "selected header", "highlight header header-view", "hide"]
    );
    assert_eq!(store.breadcrumb("header"), ["app", "header"]);
}

#[test_timeout::tokio_timeout_test(paused)]
async fn runtime_can_select_a_node() {
    let session = session();
    mount_app(&session.reporter);
    settle().await;
    session.store.set_collapsed("app", true);

    session.reporter.select("list").expect("select");
    settle().await;
    assert_eq!(session.store.selected().as_deref(), Some("list"));
    assert!(!session.store.node("app").expect("app").collapsed);
}

#[test_timeout::tokio_timeout_test(paused)]
async fn mutations_require_the_capability() {
    let session = session();
    mount_app(&session.reporter);
    settle().await;

    let err = session
        .store
        .set_attribute("header", vec!["title".into()], json!("x"))
        .expect_err("header lacks setAttribute");
    assert!(matches!(err, StoreError::MissingCapability { capability, .. } if capability == events::SET_ATTRIBUTE));
    assert!(matches!(
        session.store.force_refresh("ghost"),
        Err(StoreError::UnknownNode(_))
    ));

    session
        .store
        .set_attribute("app", vec!["title".into()], json!("Groceries"))
        .expect("app supports setAttribute");
    settle().await;
    let calls = session.hooks.calls.lock();
    let last = calls.last().expect("mutation reported");
    assert!(last.starts_with("mutate app SetAttribute"));
    assert!(last.contains("Groceries"));
    drop(calls);

    session
        .store
        .set_attribute("app", vec!["rows".into(), 1_usize.into()], json!(5))
        .expect("index paths");
    settle().await;
    let calls = session.hooks.calls.lock();
    assert!(calls.last().expect("second mutation").contains("Index(1)"));
}

#[test_timeout::tokio_timeout_test(paused)]
async fn inspection_results_are_spliced_into_the_replica() {
    let session = session();
    let proto = Arc::new(LiveObject::plain());
    proto.set("describe", Live::function("describe"));
    let cart = Live::instance("Cart", Some(proto), [("items", Live::from(3_i64))]);
    session.reporter.mount(
        NodeRecord::new("panel", NodeKind::Composite)
            .local_state(Live::object([("cart", cart)])),
    );
    session.reporter.add_root("panel");
    settle().await;

    let before = session.store.node("panel").expect("panel");
    assert_eq!(before.local_state.to_json()["cart"]["inspected"], json!(false));

    let (tx, rx) = oneshot::channel();
    session
        .store
        .inspect("panel", vec!["localState".into(), "cart".into()], move |value| {
            let _ = tx.send(value.to_json());
        })
        .expect("inspect");
    let value = rx.await.expect("answered");
    assert_eq!(value["items"], json!(3));

    let after = session.store.node("panel").expect("panel");
    let cart = after.local_state.to_json();
    assert_eq!(cart["cart"]["items"], json!(3));
    assert_eq!(cart["cart"]["[[Prototype]]"]["describe"]["kind"], json!("function"));

    assert!(matches!(
        session.store.inspect("panel", vec!["name".into()], |_| {}),
        Err(StoreError::MalformedPayload(_))
    ));
}
