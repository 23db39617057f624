use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lookglass_bridge::{BridgeError, Channel, LocalChannel, Transport, TransportConfig};
use lookglass_wire::{Envelope, Hydrated, Live, LiveObject, NodeKind, NodeRecord, PROTO_KEY};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

fn connected() -> (Transport, Transport) {
    let (left, right) = LocalChannel::pair();
    (
        Transport::new(Arc::new(left), TransportConfig::default()),
        Transport::new(Arc::new(right), TransportConfig::default()),
    )
}

fn collect(transport: &Transport, event: &str) -> mpsc::UnboundedReceiver<Value> {
    let (tx, rx) = mpsc::unbounded_channel();
    transport.on(event, move |data: &Hydrated| {
        let _ = tx.send(data.to_json());
    });
    rx
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::task::yield_now().await;
    }
}

#[test_timeout::tokio_timeout_test(paused)]
async fn queued_events_flush_as_one_batch_in_order() {
    let (runtime_end, observer_end) = LocalChannel::pair();
    let runtime = Transport::new(Arc::new(runtime_end), TransportConfig::default());

    let (tx, mut rx) = mpsc::unbounded_channel();
    observer_end.listen(Arc::new(move |envelope| {
        let _ = tx.send(envelope);
    }));

    runtime.send("mount", Live::object([("id", Live::from("a"))]));
    runtime.send("mount", Live::object([("id", Live::from("b"))]));
    runtime.send("root", "a");

    match rx.recv().await.expect("batch delivered") {
        Envelope::ManyEvents { events } => {
            let names: Vec<_> = events.iter().map(|frame| frame.event_name.as_str()).collect();
            assert_eq!(names, ["mount", "mount", "root"]);
            assert_eq!(events[1].data, json!({"id": "b"}));
        }
        other => panic!("expected many-events, got {other:?}"),
    }
}

#[test_timeout::tokio_timeout_test(paused)]
async fn send_one_bypasses_the_queue() {
    let (runtime, observer) = connected();
    let mut seen = Vec::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    for event in ["mount", "highlight"] {
        let tx = tx.clone();
        observer.on(event, move |_| {
            let _ = tx.send(event);
        });
    }

    runtime.send("mount", Live::object([("id", Live::from("a"))]));
    runtime.send_one("highlight", "a").expect("send_one");
    seen.push(rx.recv().await.expect("first"));
    seen.push(rx.recv().await.expect("second"));
    assert_eq!(seen, ["highlight", "mount"]);
}

#[test_timeout::tokio_timeout_test(5)]
async fn calls_resolve_through_the_peer_handler() {
    let (runtime, observer) = connected();
    runtime
        .on_call("rn:getStyle", |args| Ok(json!({ "node": args, "flex": 1 })))
        .expect("register");

    let result = observer
        .request("rn:getStyle", json!("node-1"))
        .await
        .expect("call answered");
    assert_eq!(result, json!({"node": "node-1", "flex": 1}));
    assert_eq!(observer.pending_calls(), 0);
}

#[tracing_test::traced_test]
#[test_timeout::tokio_timeout_test(5)]
async fn unhandled_and_failing_calls_never_invoke_the_callback() {
    let (runtime, observer) = connected();
    runtime
        .on_call("explode", |_| Err(anyhow::anyhow!("boom")))
        .expect("register");
    runtime.on_call("ping", |_| Ok(json!("pong"))).expect("register");

    let fired = Arc::new(AtomicBool::new(false));
    for name in ["rn:getStyle", "explode"] {
        let fired = fired.clone();
        observer
            .call(name, json!("node-1"), move |_| fired.store(true, Ordering::SeqCst))
            .expect("sent");
    }

    // Channel order means both calls were handled once ping answers.
    assert_eq!(observer.request("ping", Value::Null).await.expect("ping"), json!("pong"));
    assert!(!fired.load(Ordering::SeqCst));
    assert_eq!(observer.pending_calls(), 2);
    assert!(logs_contain("no handler registered for call"));
    assert!(logs_contain("call handler failed"));
}

#[tracing_test::traced_test]
#[test_timeout::tokio_timeout_test(5)]
async fn a_panicking_call_handler_leaves_the_channel_running() {
    let (runtime, observer) = connected();
    runtime
        .on_call("crash", |_| panic!("handler crashed"))
        .expect("register");
    runtime.on_call("ping", |_| Ok(json!("pong"))).expect("register");

    let fired = Arc::new(AtomicBool::new(false));
    let flag = fired.clone();
    observer
        .call("crash", Value::Null, move |_| flag.store(true, Ordering::SeqCst))
        .expect("sent");

    assert_eq!(observer.request("ping", Value::Null).await.expect("ping"), json!("pong"));
    assert!(!fired.load(Ordering::SeqCst));
    assert_eq!(observer.pending_calls(), 1);
    assert!(logs_contain("call handler panicked"));
    assert!(logs_contain("handler crashed"));
}

#[test_timeout::tokio_timeout_test(5)]
async fn registering_a_call_handler_twice_fails() {
    let (runtime, _observer) = connected();
    runtime.on_call("ping", |_| Ok(Value::Null)).expect("first");
    let err = runtime
        .on_call("ping", |_| Ok(Value::Null))
        .expect_err("second registration");
    assert!(matches!(err, BridgeError::HandlerExists(name) if name == "ping"));
}

#[test_timeout::tokio_timeout_test(5)]
async fn dropping_a_transport_releases_its_pending_callbacks() {
    let (_runtime, observer) = connected();
    let (tx, rx) = oneshot::channel::<Value>();
    observer
        .call("missing", Value::Null, move |value| {
            let _ = tx.send(value);
        })
        .expect("sent");
    assert_eq!(observer.pending_calls(), 1);

    drop(observer);
    assert!(rx.await.is_err());
}

fn widget_node() -> Live {
    let proto = Arc::new(LiveObject::plain());
    proto.set("render", Live::function("render"));
    proto.set("kind", Live::from("widget"));
    let widget = Live::instance("Widget", Some(proto), [("size", Live::from(3_i64))]);
    NodeRecord::new("n1", NodeKind::Composite)
        .name("Panel")
        .attributes(Live::object([("widget", widget), ("label", Live::from("ok"))]))
        .to_live()
}

#[test_timeout::tokio_timeout_test(paused)]
async fn inspect_returns_members_and_prototype() {
    let (runtime, observer) = connected();
    let mut mounts = collect(&observer, "mount");

    runtime.send("mount", widget_node());
    let payload = mounts.recv().await.expect("mount delivered");
    assert_eq!(payload["attributes"]["widget"]["inspected"], json!(false));
    assert!(runtime.is_inspectable("n1"));

    let (tx, rx) = oneshot::channel();
    observer
        .inspect("n1", vec!["attributes".into(), "widget".into()], move |value| {
            let _ = tx.send(value);
        })
        .expect("inspect sent");
    let inspected = rx.await.expect("inspect answered");

    assert_eq!(inspected.get("size").map(Hydrated::to_json), Some(json!(3)));
    let proto = inspected.get(PROTO_KEY).expect("prototype attached");
    assert_eq!(proto.get("kind").and_then(Hydrated::as_str), Some("widget"));
    assert!(proto.get("render").and_then(Hydrated::as_marker).is_some());
}

#[test_timeout::tokio_timeout_test(paused)]
async fn forgotten_nodes_answer_inspection_with_nothing() {
    let (runtime, observer) = connected();
    let mut mounts = collect(&observer, "mount");
    runtime.send("mount", widget_node());
    mounts.recv().await.expect("mount delivered");

    runtime.forget("n1");
    assert!(!runtime.is_inspectable("n1"));

    let (tx, rx) = oneshot::channel();
    observer
        .inspect("n1", vec!["attributes".into()], move |value| {
            let _ = tx.send(value);
        })
        .expect("inspect sent");
    assert_eq!(rx.await.expect("answered").to_json(), json!({}));
}

#[test_timeout::tokio_timeout_test(paused)]
async fn forget_before_flush_keeps_the_queued_value_out_of_the_cache() {
    let (runtime, observer) = connected();
    let mut unmounts = collect(&observer, "unmount");
    runtime.send("mount", widget_node());
    runtime.send("unmount", "n1");
    runtime.forget("n1");

    unmounts.recv().await.expect("batch delivered");
    assert!(!runtime.is_inspectable("n1"));
}

#[test_timeout::tokio_timeout_test(paused)]
async fn paused_peers_hold_their_queue_until_resumed() {
    let (runtime, observer) = connected();
    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    observer.on("mount", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    observer.pause_peer().expect("pause");
    wait_until(|| runtime.is_paused()).await;

    runtime.send("mount", Live::object([("id", Live::from("a"))]));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(received.load(Ordering::SeqCst), 0);

    // unbatched traffic is never held
    let mut highlights = collect(&observer, "highlight");
    runtime.send_one("highlight", "a").expect("send_one");
    highlights.recv().await.expect("highlight delivered");

    observer.resume_peer().expect("resume");
    wait_until(|| received.load(Ordering::SeqCst) == 1).await;
    assert!(!runtime.is_paused());
}

#[test_timeout::tokio_timeout_test(paused)]
async fn a_flush_timer_firing_while_paused_keeps_the_queue() {
    let (runtime_end, observer_end) = LocalChannel::pair();
    // Any measured flush time pushes the next timer out to the ceiling.
    let config = TransportConfig {
        flush_multiplier: u32::MAX,
        max_flush_delay: Duration::from_secs(1),
    };
    let runtime = Transport::new(Arc::new(runtime_end), config);
    let observer = Transport::new(Arc::new(observer_end), TransportConfig::default());
    let mut mounts = collect(&observer, "mount");

    runtime.send("mount", Live::object([("id", Live::from("warmup"))]));
    runtime.flush().expect("flush");
    assert_eq!(mounts.recv().await.expect("warmup"), json!({"id": "warmup"}));
    // the warmup's own timer finds an empty queue
    tokio::time::sleep(Duration::from_millis(10)).await;

    // the timer for this send is due after the pause lands
    runtime.send("mount", Live::object([("id", Live::from("a"))]));
    observer.pause_peer().expect("pause");
    wait_until(|| runtime.is_paused()).await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(mounts.try_recv().is_err());
    runtime.send("mount", Live::object([("id", Live::from("b"))]));
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(mounts.try_recv().is_err());

    observer.resume_peer().expect("resume");
    assert_eq!(mounts.recv().await.expect("a"), json!({"id": "a"}));
    assert_eq!(mounts.recv().await.expect("b"), json!({"id": "b"}));
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(mounts.try_recv().is_err());
}
