//! End-to-end routing tests: a real hub on an ephemeral port, driven by
//! real WebSocket peers.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use stagelink_client::HubClient;
use stagelink_hub::hub::Hub;
use stagelink_hub::server::create_router;
use stagelink_protocol::{Envelope, HUB_ID};

const RECV: Duration = Duration::from_secs(2);
const SILENCE: Duration = Duration::from_millis(250);
const SETTLE: Duration = Duration::from_millis(100);

async fn spawn_hub() -> (String, Arc<Hub>) {
    let hub = Arc::new(Hub::new(None));
    tokio::spawn(Arc::clone(&hub).run());

    let app = create_router(Arc::clone(&hub));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("ws://{addr}/ws"), hub)
}

#[tokio::test]
async fn test_unicast_reaches_only_the_target() {
    let (url, _hub) = spawn_hub().await;

    let mut alpha = HubClient::connect(&url).await.unwrap();
    alpha.register_plugin("alpha", "Alpha").await.unwrap();
    let mut beta = HubClient::connect(&url).await.unwrap();
    beta.register_plugin("beta", "Beta").await.unwrap();
    let mut gamma = HubClient::connect(&url).await.unwrap();
    gamma.register_plugin("gamma", "Gamma").await.unwrap();

    alpha
        .send(&Envelope::new("alpha", "beta", "noop"))
        .await
        .unwrap();

    let received = beta.recv_timeout(RECV).await.unwrap().unwrap();
    assert_eq!(received.from, "alpha");
    assert_eq!(received.to, "beta");
    assert_eq!(received.kind, "noop");
    assert!(received.payload.is_empty());

    assert!(gamma.recv_timeout(SILENCE).await.is_err());
}

#[tokio::test]
async fn test_class_multicast_reaches_subscribers_only() {
    let (url, _hub) = spawn_hub().await;

    let mut main = HubClient::connect(&url).await.unwrap();
    main.register_main_module("core", "Core").await.unwrap();

    let mut beta = HubClient::connect(&url).await.unwrap();
    beta.register_plugin("beta", "Beta").await.unwrap();
    beta.subscribe(&["timer"]).await.unwrap();

    let mut gamma = HubClient::connect(&url).await.unwrap();
    gamma.register_plugin("gamma", "Gamma").await.unwrap();

    tokio::time::sleep(SETTLE).await;

    main.send(&Envelope::with_payload(
        "core",
        "broadcast:timer",
        "timer_updated",
        json!({"timer_id": "t1", "elapsed_time": 1500}),
    ))
    .await
    .unwrap();

    let received = beta.recv_timeout(RECV).await.unwrap().unwrap();
    assert_eq!(received.kind, "timer_updated");
    assert_eq!(received.payload_get("elapsed_time"), Some(&json!(1500)));

    assert!(gamma.recv_timeout(SILENCE).await.is_err());
}

#[tokio::test]
async fn test_empty_target_with_class_payload_is_multicast() {
    let (url, _hub) = spawn_hub().await;

    let mut subscriber = HubClient::connect(&url).await.unwrap();
    subscriber.register_plugin("sub", "Sub").await.unwrap();
    subscriber.subscribe(&["overlay"]).await.unwrap();

    let mut outsider = HubClient::connect(&url).await.unwrap();
    outsider.register_plugin("out", "Out").await.unwrap();

    let mut sender = HubClient::connect(&url).await.unwrap();
    sender.register_plugin("src", "Src").await.unwrap();
    tokio::time::sleep(SETTLE).await;

    sender
        .send(&Envelope::with_payload(
            "src",
            "",
            "overlay_refresh",
            json!({"class": "overlay"}),
        ))
        .await
        .unwrap();

    let received = subscriber.recv_timeout(RECV).await.unwrap().unwrap();
    assert_eq!(received.kind, "overlay_refresh");
    assert!(outsider.recv_timeout(SILENCE).await.is_err());
}

#[tokio::test]
async fn test_broadcast_excludes_main_module_by_default() {
    let (url, _hub) = spawn_hub().await;

    let mut main = HubClient::connect(&url).await.unwrap();
    main.register_main_module("core", "Core").await.unwrap();

    let mut beta = HubClient::connect(&url).await.unwrap();
    beta.register_plugin("beta", "Beta").await.unwrap();

    let mut gamma = HubClient::connect(&url).await.unwrap();
    gamma.register_plugin("gamma", "Gamma").await.unwrap();
    tokio::time::sleep(SETTLE).await;

    gamma
        .send(&Envelope::new("gamma", "broadcast", "scene_changed"))
        .await
        .unwrap();

    assert_eq!(
        beta.recv_timeout(RECV).await.unwrap().unwrap().kind,
        "scene_changed"
    );
    assert!(main.recv_timeout(SILENCE).await.is_err());

    // A class-tagged payload opts the main module back in.
    gamma
        .send(&Envelope::with_payload(
            "gamma",
            "broadcast",
            "scene_changed",
            json!({"class": "scene"}),
        ))
        .await
        .unwrap();
    assert_eq!(
        main.recv_timeout(RECV).await.unwrap().unwrap().kind,
        "scene_changed"
    );
}

#[tokio::test]
async fn test_main_module_slot_is_exclusive() {
    let (url, _hub) = spawn_hub().await;

    let mut first = HubClient::connect(&url).await.unwrap();
    let confirmation = first.register_main_module("core-a", "Core A").await.unwrap();
    assert_eq!(confirmation.kind, "registered");
    assert_eq!(confirmation.payload_str("status"), Some("connected"));
    assert_eq!(confirmation.payload_str("role"), Some("main_module"));

    let mut second = HubClient::connect(&url).await.unwrap();
    let rejection = second.register_main_module("core-b", "Core B").await.unwrap();
    assert_eq!(rejection.kind, "error");
    assert_eq!(
        rejection.payload_str("code"),
        Some("main_module_already_active")
    );

    // The loser is expelled: its connection closes shortly after.
    assert!(second.recv_timeout(RECV).await.unwrap().is_none());

    // The slot holder is untouched.
    let mut probe = HubClient::connect(&url).await.unwrap();
    probe.register_plugin("probe", "Probe").await.unwrap();
    probe
        .send(&Envelope::new("probe", "core-a", "noop"))
        .await
        .unwrap();
    assert_eq!(first.recv_timeout(RECV).await.unwrap().unwrap().kind, "noop");
}

#[tokio::test]
async fn test_register_without_id_is_expelled() {
    let (url, _hub) = spawn_hub().await;

    let mut nameless = HubClient::connect(&url).await.unwrap();
    nameless
        .send(&Envelope::with_payload(
            "",
            HUB_ID,
            "register",
            json!({"name": "who am I"}),
        ))
        .await
        .unwrap();

    let rejection = nameless.recv_timeout(RECV).await.unwrap().unwrap();
    assert_eq!(rejection.kind, "error");
    assert_eq!(rejection.payload_str("code"), Some("register_missing_id"));
    assert!(nameless.recv_timeout(RECV).await.unwrap().is_none());
}

#[tokio::test]
async fn test_declare_required_plugins_reports_connected_ones() {
    let (url, _hub) = spawn_hub().await;

    let mut p1 = HubClient::connect(&url).await.unwrap();
    p1.register_plugin("p1", "P1").await.unwrap();

    let mut main = HubClient::connect(&url).await.unwrap();
    main.register_main_module("core", "Core").await.unwrap();
    main.declare_required_plugins(&["p1", "p2"]).await.unwrap();

    let notice = main.recv_timeout(RECV).await.unwrap().unwrap();
    assert_eq!(notice.kind, "plugin_online");
    assert_eq!(notice.payload_str("plugin_id"), Some("p1"));

    // p2 is neither connected nor local; nothing else arrives yet.
    assert!(main.recv_timeout(SILENCE).await.is_err());

    // When p2 finally connects, the main module hears about it.
    let mut p2 = HubClient::connect(&url).await.unwrap();
    p2.register_plugin("p2", "P2").await.unwrap();
    let notice = main.recv_timeout(RECV).await.unwrap().unwrap();
    assert_eq!(notice.kind, "plugin_online");
    assert_eq!(notice.payload_str("plugin_id"), Some("p2"));
}

#[tokio::test]
async fn test_declare_required_plugins_rejects_descriptor_objects() {
    let (url, hub) = spawn_hub().await;

    let mut main = HubClient::connect(&url).await.unwrap();
    main.register_main_module("core", "Core").await.unwrap();

    main.send(&Envelope::with_payload(
        "core",
        HUB_ID,
        "declare_required_plugins",
        json!({"plugins": [{"id": "old-shape"}, "good-id"]}),
    ))
    .await
    .unwrap();
    tokio::time::sleep(SETTLE).await;

    assert!(!hub.is_expected("old-shape").await);
    assert!(hub.is_expected("good-id").await);
}

#[tokio::test]
async fn test_plugin_status_round_trip() {
    let (url, _hub) = spawn_hub().await;

    let mut plugin = HubClient::connect(&url).await.unwrap();
    plugin.register_plugin("recorder", "Recorder").await.unwrap();
    plugin.request_plugin_status().await.unwrap();

    let reply = plugin.recv_timeout(RECV).await.unwrap().unwrap();
    assert_eq!(reply.kind, "plugin_status_response");

    let plugins = reply.payload_get("plugins").unwrap().as_array().unwrap();
    assert!(plugins.iter().any(|p| p["id"] == "recorder"));
    assert!(reply.payload_get("main_module").unwrap().is_null());
}

#[tokio::test]
async fn test_subscribe_is_idempotent_and_unsubscribe_removes() {
    let (url, hub) = spawn_hub().await;

    let mut plugin = HubClient::connect(&url).await.unwrap();
    plugin.register_plugin("viewer", "Viewer").await.unwrap();

    plugin.subscribe(&["timer"]).await.unwrap();
    plugin.subscribe(&["timer", "score"]).await.unwrap();
    tokio::time::sleep(SETTLE).await;

    let snapshot = hub.snapshot().await;
    let caps = snapshot["plugins"][0]["capabilities"].as_array().unwrap();
    assert_eq!(caps.len(), 2);

    plugin.unsubscribe("timer").await.unwrap();
    // Unsubscribing a class that was never held is a no-op.
    plugin.unsubscribe("ghost-class").await.unwrap();
    tokio::time::sleep(SETTLE).await;

    let snapshot = hub.snapshot().await;
    let caps = snapshot["plugins"][0]["capabilities"].as_array().unwrap();
    assert_eq!(caps.len(), 1);
    assert_eq!(caps[0], "score");
}

#[tokio::test]
async fn test_unknown_verbs_are_routed_opaquely() {
    let (url, _hub) = spawn_hub().await;

    let mut sender = HubClient::connect(&url).await.unwrap();
    sender.register_plugin("obs-bridge", "OBS").await.unwrap();
    let mut receiver = HubClient::connect(&url).await.unwrap();
    receiver.register_plugin("overlay", "Overlay").await.unwrap();

    sender
        .send(&Envelope::with_payload(
            "obs-bridge",
            "overlay",
            "plugin_status",
            json!({"scene": "halftime", "recording": true}),
        ))
        .await
        .unwrap();

    let received = receiver.recv_timeout(RECV).await.unwrap().unwrap();
    assert_eq!(received.kind, "plugin_status");
    assert_eq!(received.payload_str("scene"), Some("halftime"));
}

#[tokio::test]
async fn test_ping_is_answered_locally_not_forwarded() {
    let (url, hub) = spawn_hub().await;

    let mut prober = HubClient::connect(&url).await.unwrap();
    prober.register_plugin("prober", "Prober").await.unwrap();

    // Raw send so the client's own auto-pong path stays out of the way.
    prober
        .send(&Envelope::new("prober", HUB_ID, "ping"))
        .await
        .unwrap();

    let pong = prober.recv_timeout(RECV).await.unwrap().unwrap();
    assert_eq!(pong.kind, "pong");
    assert_eq!(pong.from, HUB_ID);
    assert_eq!(pong.to, "prober");

    // The hub never saw a ping envelope: nothing got routed anywhere.
    assert!(hub.is_peer_active("prober").await);
}

#[tokio::test]
async fn test_class_broadcast_with_no_subscribers_is_a_no_op() {
    let (url, hub) = spawn_hub().await;

    let mut sender = HubClient::connect(&url).await.unwrap();
    sender.register_plugin("solo", "Solo").await.unwrap();

    sender
        .send(&Envelope::new("solo", "broadcast:ghost", "noop"))
        .await
        .unwrap();
    tokio::time::sleep(SETTLE).await;

    // Nothing delivered, nobody expelled, hub still routing.
    assert!(sender.recv_timeout(SILENCE).await.is_err());
    assert!(hub.is_peer_active("solo").await);
}

#[tokio::test]
async fn test_heartbeat_refreshes_without_echo() {
    let (url, _hub) = spawn_hub().await;

    let mut plugin = HubClient::connect(&url).await.unwrap();
    plugin.register_plugin("quiet", "Quiet").await.unwrap();

    plugin.send_heartbeat().await.unwrap();
    assert!(plugin.recv_timeout(SILENCE).await.is_err());
}
