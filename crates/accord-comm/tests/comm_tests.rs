//! Delivery, queuing, retry and transport tests for the communication manager

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use accord_comm::{
    ChannelTransport, CommConfig, CommError, CommEvent, CommunicationManager, Middleware, Next,
    RetryOutcome, Route, SendOptions, Transport,
};
use accord_core::{Message, Recipient, HEARTBEAT, HEARTBEAT_RESPONSE};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

fn manager(agent_id: &str) -> Arc<CommunicationManager> {
    Arc::new(CommunicationManager::new(CommConfig {
        agent_id: agent_id.to_string(),
        ..Default::default()
    }))
}

/// Transport that refuses every send while `failing` is set but stays open
struct FlakyTransport {
    failing: AtomicBool,
    inner: ChannelTransport,
}

impl Transport for FlakyTransport {
    fn send(&self, message: &Message) -> Result<(), CommError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CommError::Transport("simulated failure".to_string()));
        }
        self.inner.send(message)
    }

    fn close(&self) {}

    fn is_open(&self) -> bool {
        true
    }
}

async fn wait_until_connected(manager: &CommunicationManager, agent: &str) {
    for _ in 0..100 {
        if manager.is_agent_connected(agent).await {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never connected", agent);
}

#[tokio::test]
async fn test_queued_messages_flush_in_send_order() {
    let manager = manager("a");
    let mut sent = Vec::new();
    for n in 0..5 {
        sent.push(
            manager
                .send_message(Recipient::one("b"), "task", json!({ "n": n }), SendOptions::default())
                .await
                .unwrap(),
        );
    }
    assert!(!manager.is_agent_connected("b").await);

    let mut events = manager.subscribe();
    let (transport, mut rx) = ChannelTransport::pair();
    let flushed = manager.attach_connection("b", Arc::new(transport)).await;
    assert_eq!(flushed, 5);

    let mut received = Vec::new();
    while let Ok(message) = rx.try_recv() {
        received.push(message.id);
    }
    assert_eq!(received, sent);
    assert!(manager.pending_messages("b").await.is_empty());

    let mut established = false;
    while let Ok(event) = events.try_recv() {
        established |= matches!(event, CommEvent::ConnectionEstablished { flushed: 5, .. });
    }
    assert!(established);
}

#[tokio::test]
async fn test_broadcast_survives_failing_recipient() {
    let manager = manager("a");
    let (broken, _broken_rx) = ChannelTransport::pair();
    manager
        .attach_connection(
            "b",
            Arc::new(FlakyTransport {
                failing: AtomicBool::new(true),
                inner: broken,
            }),
        )
        .await;

    let (c_transport, mut c_rx) = ChannelTransport::pair();
    let (d_transport, mut d_rx) = ChannelTransport::pair();
    manager.attach_connection("c", Arc::new(c_transport)).await;
    manager.attach_connection("d", Arc::new(d_transport)).await;

    let report = manager
        .broadcast_message("announce", json!({ "hello": true }), SendOptions::default())
        .await
        .unwrap();

    assert_eq!(report.delivered, vec!["c".to_string(), "d".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].agent_id, "b");
    assert_eq!(c_rx.recv().await.unwrap().message_type, "announce");
    assert_eq!(d_rx.recv().await.unwrap().message_type, "announce");

    // the failed copy waits for a retry
    assert_eq!(manager.pending_messages("b").await.len(), 1);
    assert!(manager.is_agent_connected("b").await);
}

#[tokio::test]
async fn test_broadcast_excludes_self() {
    let manager = manager("a");
    let (transport, mut rx) = ChannelTransport::pair();
    manager.attach_connection("b", Arc::new(transport)).await;

    let report = manager
        .broadcast_message("announce", json!(null), SendOptions::default())
        .await
        .unwrap();
    assert_eq!(report.delivered, vec!["b".to_string()]);
    assert_eq!(rx.recv().await.unwrap().to, Recipient::many(["b"]));
}

#[tokio::test]
async fn test_multicast_mixes_live_and_queued() {
    let manager = manager("a");
    let (transport, mut rx) = ChannelTransport::pair();
    manager.attach_connection("b", Arc::new(transport)).await;

    let report = manager
        .multicast_message(
            vec!["b".to_string(), "c".to_string()],
            "task",
            json!(null),
            SendOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(report.delivered, vec!["b".to_string()]);
    assert_eq!(report.queued, vec!["c".to_string()]);
    assert!(rx.recv().await.is_some());
    assert_eq!(manager.pending_messages("c").await.len(), 1);
}

#[tokio::test]
async fn test_retry_is_capped() {
    let manager = manager("a");
    let id = manager
        .send_message(Recipient::one("offline"), "task", json!(null), SendOptions::default())
        .await
        .unwrap();

    for _ in 0..3 {
        assert_eq!(
            manager.retry_failed_message(&id).await.unwrap(),
            RetryOutcome::StillQueued
        );
    }
    assert_eq!(
        manager.retry_failed_message(&id).await.unwrap(),
        RetryOutcome::Exhausted
    );
    assert_eq!(manager.pending_messages("offline").await.len(), 1);

    assert!(matches!(
        manager.retry_failed_message("msg_unknown").await,
        Err(CommError::MessageNotFound(_))
    ));
}

#[tokio::test]
async fn test_retry_delivers_once_transport_recovers() {
    let manager = manager("a");
    let (inner, mut rx) = ChannelTransport::pair();
    let transport = Arc::new(FlakyTransport {
        failing: AtomicBool::new(true),
        inner,
    });
    manager.attach_connection("b", transport.clone()).await;

    let id = manager
        .send_message(Recipient::one("b"), "task", json!(null), SendOptions::default())
        .await
        .unwrap();
    assert_eq!(manager.pending_messages("b").await.len(), 1);

    transport.failing.store(false, Ordering::SeqCst);
    assert_eq!(
        manager.retry_failed_message(&id).await.unwrap(),
        RetryOutcome::Delivered
    );
    assert_eq!(rx.recv().await.unwrap().id, id);
    assert!(manager.pending_messages("b").await.is_empty());
}

#[tokio::test]
async fn test_failed_retry_keeps_queue_order() {
    let manager = manager("a");
    let transport = Arc::new(FlakyTransport {
        failing: AtomicBool::new(true),
        inner: ChannelTransport::pair().0,
    });
    manager.attach_connection("b", transport.clone()).await;

    let mut sent = Vec::new();
    for n in 0..3 {
        sent.push(
            manager
                .send_message(Recipient::one("b"), "task", json!({ "n": n }), SendOptions::default())
                .await
                .unwrap(),
        );
    }

    assert_eq!(
        manager.retry_failed_message(&sent[2]).await.unwrap(),
        RetryOutcome::StillQueued
    );
    let pending: Vec<_> = manager.pending_messages("b").await.into_iter().map(|m| m.id).collect();
    assert_eq!(pending, sent);

    let (healthy, mut rx) = ChannelTransport::pair();
    assert_eq!(manager.attach_connection("b", Arc::new(healthy)).await, 3);
    let mut received = Vec::new();
    while let Ok(message) = rx.try_recv() {
        received.push(message.id);
    }
    assert_eq!(received, sent);
}

#[tokio::test]
async fn test_heartbeat_gets_reply() {
    let manager = manager("a");
    let (transport, mut rx) = ChannelTransport::pair();
    manager.attach_connection("b", Arc::new(transport)).await;

    let ping = Message::new("b", Recipient::one("a"), HEARTBEAT, json!({}));
    manager.handle_incoming(ping.clone()).await;

    let reply = rx.recv().await.unwrap();
    assert_eq!(reply.message_type, HEARTBEAT_RESPONSE);
    assert_eq!(reply.to, Recipient::one("b"));
    assert_eq!(reply.payload["in_reply_to"], json!(ping.id));
}

#[tokio::test]
async fn test_send_heartbeats_to_connected_agents() {
    let manager = manager("a");
    let (transport, mut rx) = ChannelTransport::pair();
    manager.attach_connection("b", Arc::new(transport)).await;

    let report = manager.send_heartbeats().await.unwrap();
    assert_eq!(report.delivered, vec!["b".to_string()]);
    assert_eq!(rx.recv().await.unwrap().message_type, HEARTBEAT);
}

#[tokio::test]
async fn test_middleware_rewrites_before_handler() {
    let manager = manager("a");
    let (transport, mut rx) = ChannelTransport::pair();
    manager.attach_connection("b", Arc::new(transport)).await;

    manager
        .add_route(Route::new(
            "task",
            Arc::new(|m: &Message| -> Result<Option<Message>, CommError> {
                let mut forwarded = m.clone();
                forwarded.message_type = "task.accepted".to_string();
                Ok(Some(forwarded))
            }),
        ))
        .await;

    let stamp: Arc<dyn Middleware> = Arc::new(|m: &Message, next: Next<'_>| {
        let stamped = m.clone().with_metadata("checked", "yes");
        next.run(&stamped)
    });
    manager.add_middleware("task", stamp).await.unwrap();

    manager
        .send_message(Recipient::one("b"), "task", json!(null), SendOptions::default())
        .await
        .unwrap();

    let delivered = rx.recv().await.unwrap();
    assert_eq!(delivered.message_type, "task.accepted");
    assert_eq!(delivered.metadata.get("checked").map(String::as_str), Some("yes"));
}

#[tokio::test]
async fn test_tcp_loopback_exchange() {
    let alpha = manager("alpha");
    let beta = manager("beta");

    let (alpha_tx, mut alpha_rx) = mpsc::unbounded_channel();
    alpha
        .register_message_handler(
            "task",
            Arc::new(move |m: &Message| -> Result<(), CommError> {
                alpha_tx
                    .send(m.clone())
                    .map_err(|e| CommError::Handler(e.to_string()))
            }),
        )
        .await;

    let (beta_tx, mut beta_rx) = mpsc::unbounded_channel();
    beta.register_message_handler(
        "task.*",
        Arc::new(move |m: &Message| -> Result<(), CommError> {
            beta_tx
                .send(m.clone())
                .map_err(|e| CommError::Handler(e.to_string()))
        }),
    )
    .await;

    // queued before the connection exists
    beta.send_message(Recipient::one("alpha"), "task", json!({ "n": 0 }), SendOptions::default())
        .await
        .unwrap();

    let addr = alpha.listen("127.0.0.1:0").await.unwrap();
    let flushed = beta
        .connect_to_agent("alpha", &addr.to_string())
        .await
        .unwrap();
    assert_eq!(flushed, 1);
    assert!(beta.is_agent_connected("alpha").await);

    let first = timeout(Duration::from_secs(2), alpha_rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.from, "beta");
    assert_eq!(first.payload["n"], 0);

    wait_until_connected(&alpha, "beta").await;
    alpha
        .send_message(Recipient::one("beta"), "task.done", json!({ "ok": true }), SendOptions::default())
        .await
        .unwrap();

    let reply = timeout(Duration::from_secs(2), beta_rx.recv()).await.unwrap().unwrap();
    assert_eq!(reply.from, "alpha");
    assert_eq!(reply.payload["ok"], true);
}

#[tokio::test]
async fn test_tcp_passive_close_keeps_queue() {
    let alpha = manager("alpha");
    let beta = manager("beta");

    let addr = alpha.listen("127.0.0.1:0").await.unwrap();
    beta.connect_to_agent("alpha", &addr.to_string()).await.unwrap();
    wait_until_connected(&alpha, "beta").await;

    // alpha drops beta explicitly, beta only sees the socket close
    alpha.disconnect_from_agent("beta").await.unwrap();
    for _ in 0..100 {
        if !beta.is_agent_connected("alpha").await {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(!beta.is_agent_connected("alpha").await);

    beta.send_message(Recipient::one("alpha"), "task", json!(null), SendOptions::default())
        .await
        .unwrap();
    assert_eq!(beta.pending_messages("alpha").await.len(), 1);
}

#[tokio::test]
async fn test_handshake_timeout() {
    // accepts the socket but never answers the handshake
    let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = silent.local_addr().unwrap();
    let _holder = tokio::spawn(async move {
        let mut sockets = Vec::new();
        while let Ok((socket, _)) = silent.accept().await {
            sockets.push(socket);
        }
    });

    let manager = Arc::new(CommunicationManager::new(CommConfig {
        agent_id: "beta".to_string(),
        handshake_timeout: Duration::from_millis(100),
        ..Default::default()
    }));

    let result = manager.connect_to_agent("alpha", &addr.to_string()).await;
    assert!(matches!(result, Err(CommError::HandshakeTimeout { timeout_ms: 100, .. })));
    assert!(!manager.is_agent_connected("alpha").await);
}
