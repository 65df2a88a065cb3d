//! WebSocket fan-out hub for real-time synchronization between terminals.
//!
//! Every piece of mutable state here (`connections`, `offline_queue`) is
//! owned by a single actor task and reached only through an
//! `mpsc::UnboundedSender<HubCommand>`, mirroring the teacher's `Store`
//! actor-loop pattern (`runtime/src/lib.rs`): callers never touch the state
//! directly, they send a command and the owning loop applies it. This makes
//! the "only the owning loop touches shared state" rule hold by construction
//! rather than by discipline around a mutex.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use pos_audit::AuditLogger;
use pos_core::{DomainEvent, EventBus};

/// Topics domain services publish to that the hub bridges onto sync messages.
const BRIDGED_TOPICS: [&str; 2] = ["queue-events", "reservation-events"];

/// Read-only snapshot returned by [`SyncHub::status`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct HubStatus {
    /// Currently connected terminals and the user occupying each one.
    pub connected_terminals: HashMap<String, String>,
    /// `connected_terminals.len()`, surfaced separately per the wire contract.
    pub total_connections: usize,
    /// Number of queued (undelivered) messages per terminal with a non-empty queue.
    pub queued_messages: HashMap<String, usize>,
}

/// A frame queued for delivery to one terminal's connection.
enum OutboundFrame {
    Text(String),
    Close(u16, &'static str),
}

struct ConnectionInfo {
    user_id: String,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
}

enum HubCommand {
    Register {
        terminal_id: String,
        user_id: String,
        outbound: mpsc::UnboundedSender<OutboundFrame>,
        ack: oneshot::Sender<()>,
    },
    Inbound {
        terminal_id: String,
        raw: String,
    },
    Disconnect {
        terminal_id: String,
    },
    Status {
        reply: oneshot::Sender<HubStatus>,
    },
    /// A domain event bridged in from the event bus, to be broadcast to
    /// every connected/queued terminal rather than relayed from a single one.
    Publish {
        action: String,
        entity_type: String,
        entity_id: String,
        data: Value,
    },
}

struct HubState {
    connections: HashMap<String, ConnectionInfo>,
    offline_queue: HashMap<String, VecDeque<Value>>,
    audit: AuditLogger,
}

/// Handle to the sync hub's actor task.
///
/// Cheaply cloneable; every clone shares the same underlying command channel
/// and therefore the same connection table.
#[derive(Clone)]
pub struct SyncHub {
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl SyncHub {
    /// Start the hub's owning actor task and return a handle to it.
    ///
    /// Subscribes to every topic in [`BRIDGED_TOPICS`] so that queue and
    /// reservation mutations — which publish to the event bus, never talk to
    /// the hub directly — are broadcast to all terminals as sync messages
    /// (spec §2's "publish sync messages through the sync hub to all other
    /// terminals" data flow).
    #[must_use]
    pub fn start(audit: AuditLogger, events: Arc<dyn EventBus>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<HubCommand>();

        for topic in BRIDGED_TOPICS {
            let tx = tx.clone();
            events.subscribe(
                topic,
                Arc::new(move |event: &DomainEvent| {
                    let _ = tx.send(HubCommand::Publish {
                        action: event.action.clone(),
                        entity_type: event.entity_type.clone(),
                        entity_id: event.entity_id.clone(),
                        data: event.payload.clone(),
                    });
                }),
            );
        }

        tokio::spawn(async move {
            let mut state = HubState {
                connections: HashMap::new(),
                offline_queue: HashMap::new(),
                audit,
            };

            while let Some(command) = rx.recv().await {
                match command {
                    HubCommand::Register {
                        terminal_id,
                        user_id,
                        outbound,
                        ack,
                    } => handle_register(&mut state, terminal_id, user_id, outbound, ack),
                    HubCommand::Inbound { terminal_id, raw } => {
                        handle_inbound(&mut state, &terminal_id, &raw).await;
                    }
                    HubCommand::Disconnect { terminal_id } => {
                        handle_disconnect(&mut state, &terminal_id);
                    }
                    HubCommand::Status { reply } => {
                        let _ = reply.send(build_status(&state));
                    }
                    HubCommand::Publish {
                        action,
                        entity_type,
                        entity_id,
                        data,
                    } => {
                        broadcast_domain_event(&mut state, &action, &entity_type, &entity_id, data).await;
                    }
                }
            }
        });

        Self { commands: tx }
    }

    /// Read-only snapshot of connected terminals and queued message counts.
    pub async fn status(&self) -> HubStatus {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(HubCommand::Status { reply }).is_err() {
            return HubStatus::default();
        }
        rx.await.unwrap_or_default()
    }
}

fn build_status(state: &HubState) -> HubStatus {
    let connected_terminals = state
        .connections
        .iter()
        .map(|(terminal_id, info)| (terminal_id.clone(), info.user_id.clone()))
        .collect::<HashMap<_, _>>();
    let queued_messages = state
        .offline_queue
        .iter()
        .filter(|(_, queue)| !queue.is_empty())
        .map(|(terminal_id, queue)| (terminal_id.clone(), queue.len()))
        .collect();

    HubStatus {
        total_connections: connected_terminals.len(),
        connected_terminals,
        queued_messages,
    }
}

fn handle_register(
    state: &mut HubState,
    terminal_id: String,
    user_id: String,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    ack: oneshot::Sender<()>,
) {
    if let Some(previous) = state.connections.remove(&terminal_id) {
        let _ = previous.outbound.send(OutboundFrame::Close(1000, "superseded by a newer connection"));
    }

    let queued = state.offline_queue.entry(terminal_id.clone()).or_default();
    for message in queued.drain(..) {
        let _ = outbound.send(OutboundFrame::Text(message.to_string()));
    }

    let connected = json!({
        "type": "CONNECTED",
        "terminal_id": terminal_id,
        "timestamp": Utc::now(),
    });
    let _ = outbound.send(OutboundFrame::Text(connected.to_string()));

    state.connections.insert(
        terminal_id.clone(),
        ConnectionInfo {
            user_id,
            outbound,
        },
    );

    let _ = ack.send(());

    broadcast_presence(state, &terminal_id, "TERMINAL_CONNECTED");
}

fn handle_disconnect(state: &mut HubState, terminal_id: &str) {
    if state.connections.remove(terminal_id).is_some() {
        broadcast_presence(state, terminal_id, "TERMINAL_DISCONNECTED");
    }
}

fn broadcast_presence(state: &HubState, terminal_id: &str, event_type: &str) {
    let message = json!({
        "type": event_type,
        "terminal_id": terminal_id,
        "timestamp": Utc::now(),
    })
    .to_string();

    for (other_id, connection) in &state.connections {
        if other_id != terminal_id {
            let _ = connection.outbound.send(OutboundFrame::Text(message.clone()));
        }
    }
}

const FAN_OUT_TYPES: [&str; 4] = ["CREATE", "UPDATE", "DELETE", "INVALIDATE_CACHE"];

async fn handle_inbound(state: &mut HubState, terminal_id: &str, raw: &str) {
    let payload: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(%terminal_id, %error, "closing connection on malformed sync message");
            if let Some(connection) = state.connections.get(terminal_id) {
                let _ = connection
                    .outbound
                    .send(OutboundFrame::Close(4001, "invalid JSON"));
            }
            return;
        }
    };

    let message_type = payload
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if message_type == "PING" {
        if let Some(connection) = state.connections.get(terminal_id) {
            let pong = json!({"type": "PONG", "timestamp": Utc::now()});
            let _ = connection.outbound.send(OutboundFrame::Text(pong.to_string()));
        }
        return;
    }

    if FAN_OUT_TYPES.contains(&message_type.as_str()) {
        fan_out(state, terminal_id, &message_type, payload).await;
        return;
    }

    tracing::debug!(%terminal_id, message_type = %message_type, "ignoring unrecognized sync message type");
}

async fn fan_out(state: &mut HubState, from_terminal: &str, action: &str, mut payload: Value) {
    let from_user = state
        .connections
        .get(from_terminal)
        .map(|info| info.user_id.clone())
        .unwrap_or_default();

    if let Value::Object(ref mut map) = payload {
        map.insert("from_terminal".to_string(), json!(from_terminal));
        map.insert("from_user".to_string(), json!(from_user));
        map.insert("server_timestamp".to_string(), json!(Utc::now()));
    }

    let entity_type = payload
        .get("entity")
        .and_then(Value::as_str)
        .unwrap_or("sync_message")
        .to_string();
    let entity_id = payload
        .get("entity_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| action.to_string());

    let destinations = other_destinations(state, from_terminal);
    let (success, error) = deliver(state, &destinations, &payload);

    state
        .audit
        .log_sync_event(
            action,
            &entity_type,
            &entity_id,
            from_terminal,
            &destinations.into_iter().collect::<Vec<_>>(),
            &from_user,
            success,
            error.as_deref(),
        )
        .await;
}

/// Bridge a domain event published by `pos-queue`/`pos-reservation` onto a
/// sync message broadcast to every terminal. Unlike [`fan_out`] this has no
/// originating terminal to enrich from or exclude: the mutation came in over
/// HTTP, not an existing WebSocket connection.
async fn broadcast_domain_event(state: &mut HubState, action: &str, entity_type: &str, entity_id: &str, data: Value) {
    let payload = json!({
        "type": action,
        "entity": entity_type,
        "entity_id": entity_id,
        "data": data,
        "from_terminal": "",
        "from_user": "",
        "server_timestamp": Utc::now(),
    });

    let destinations: BTreeSet<String> = state.connections.keys().chain(state.offline_queue.keys()).cloned().collect();
    let (success, error) = deliver(state, &destinations, &payload);

    state
        .audit
        .log_sync_event(
            action,
            entity_type,
            entity_id,
            "",
            &destinations.into_iter().collect::<Vec<_>>(),
            "",
            success,
            error.as_deref(),
        )
        .await;
}

fn other_destinations(state: &HubState, from_terminal: &str) -> BTreeSet<String> {
    state
        .connections
        .keys()
        .chain(state.offline_queue.keys())
        .filter(|terminal_id| terminal_id.as_str() != from_terminal)
        .cloned()
        .collect()
}

/// Send `payload` to every terminal in `destinations`: directly if connected,
/// queued for later delivery otherwise. A connected terminal whose send fails
/// is dropped and treated as disconnected. Returns overall success and, on
/// partial failure, a description of which terminals could not be reached.
fn deliver(state: &mut HubState, destinations: &BTreeSet<String>, payload: &Value) -> (bool, Option<String>) {
    let text = payload.to_string();
    let mut failed = Vec::new();

    for destination in destinations {
        let delivered = state
            .connections
            .get(destination)
            .is_some_and(|connection| connection.outbound.send(OutboundFrame::Text(text.clone())).is_ok());

        if !delivered {
            if state.connections.contains_key(destination) {
                failed.push(destination.clone());
            }
            state
                .offline_queue
                .entry(destination.clone())
                .or_default()
                .push_back(payload.clone());
        }
    }

    for destination in &failed {
        state.connections.remove(destination);
    }

    if failed.is_empty() {
        (true, None)
    } else {
        (false, Some(format!("failed to deliver to: {}", failed.join(", "))))
    }
}

/// Drive one accepted WebSocket connection through the connection and message
/// protocols in full, until the client disconnects or the hub closes it.
///
/// This owns the axum-specific framing so that `pos-web`'s handler is a thin
/// `ws.on_upgrade(|socket| pos_sync::handle_socket(hub, socket))`.
pub async fn handle_socket(hub: SyncHub, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    let handshake = match stream.next().await {
        Some(Ok(Message::Text(text))) => text,
        _ => {
            let _ = sink.send(close_frame(4000, "missing terminal_id")).await;
            return;
        }
    };

    let handshake: Value = match serde_json::from_str(&handshake) {
        Ok(value) => value,
        Err(_) => {
            let _ = sink.send(close_frame(4001, "invalid JSON")).await;
            return;
        }
    };

    let terminal_id = match handshake.get("terminal_id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            let _ = sink.send(close_frame(4000, "missing terminal_id")).await;
            return;
        }
    };
    let user_id = handshake
        .get("user_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundFrame>();
    let (ack_tx, ack_rx) = oneshot::channel();
    if hub
        .commands
        .send(HubCommand::Register {
            terminal_id: terminal_id.clone(),
            user_id,
            outbound: outbound_tx,
            ack: ack_tx,
        })
        .is_err()
    {
        return;
    }
    let _ = ack_rx.await;

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let result = match frame {
                OutboundFrame::Text(text) => sink.send(Message::Text(text)).await,
                OutboundFrame::Close(code, reason) => {
                    let result = sink.send(close_frame(code, reason)).await;
                    let _ = result;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let _ = hub.commands.send(HubCommand::Inbound {
                            terminal_id: terminal_id.clone(),
                            raw: text,
                        });
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            _ = &mut writer => break,
        }
    }

    let _ = hub.commands.send(HubCommand::Disconnect { terminal_id });
    writer.abort();
}

fn close_frame(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::time::Duration;

    use pos_core::InMemoryEventBus;

    async fn test_audit() -> AuditLogger {
        let dir = tempfile::tempdir().expect("tempdir");
        AuditLogger::start(pos_audit::AuditConfig {
            log_dir: dir.keep(),
            ..pos_audit::AuditConfig::default()
        })
        .await
        .expect("audit logger")
    }

    fn register(
        hub: &SyncHub,
        terminal_id: &str,
        user_id: &str,
    ) -> mpsc::UnboundedReceiver<OutboundFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ack, _) = oneshot::channel();
        hub.commands
            .send(HubCommand::Register {
                terminal_id: terminal_id.to_string(),
                user_id: user_id.to_string(),
                outbound: tx,
                ack,
            })
            .unwrap();
        rx
    }

    fn expect_text(rx: &mut mpsc::UnboundedReceiver<OutboundFrame>) -> Value {
        match rx.try_recv().expect("expected a queued frame") {
            OutboundFrame::Text(text) => serde_json::from_str(&text).unwrap(),
            OutboundFrame::Close(code, reason) => panic!("expected text, got close {code} {reason}"),
        }
    }

    #[tokio::test]
    async fn register_sends_connected_and_broadcasts_presence() {
        let hub = SyncHub::start(test_audit().await, Arc::new(InMemoryEventBus::new()));
        let mut t1 = register(&hub, "t1", "alice");
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(expect_text(&mut t1)["type"], "CONNECTED");

        let mut t2 = register(&hub, "t2", "bob");
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(expect_text(&mut t2)["type"], "CONNECTED");
        let presence = expect_text(&mut t1);
        assert_eq!(presence["type"], "TERMINAL_CONNECTED");
        assert_eq!(presence["terminal_id"], "t2");
    }

    #[tokio::test]
    async fn fan_out_enriches_and_skips_the_sender() {
        let hub = SyncHub::start(test_audit().await, Arc::new(InMemoryEventBus::new()));
        let mut t1 = register(&hub, "t1", "alice");
        let mut t2 = register(&hub, "t2", "bob");
        tokio::time::sleep(Duration::from_millis(5)).await;
        expect_text(&mut t1); // CONNECTED
        expect_text(&mut t2); // CONNECTED
        expect_text(&mut t1); // TERMINAL_CONNECTED(t2)

        hub.commands
            .send(HubCommand::Inbound {
                terminal_id: "t1".to_string(),
                raw: r#"{"type":"UPDATE","entity":"reservation","entity_id":"r1"}"#.to_string(),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let fanned = expect_text(&mut t2);
        assert_eq!(fanned["type"], "UPDATE");
        assert_eq!(fanned["entity"], "reservation");
        assert_eq!(fanned["from_terminal"], "t1");
        assert_eq!(fanned["from_user"], "alice");
        assert!(fanned["server_timestamp"].is_string());
        assert!(t1.try_recv().is_err(), "sender should not receive its own fan-out");
    }

    #[tokio::test]
    async fn a_domain_event_published_on_the_event_bus_reaches_every_terminal() {
        let events: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());
        let hub = SyncHub::start(test_audit().await, Arc::clone(&events));
        let mut t1 = register(&hub, "t1", "alice");
        let mut t2 = register(&hub, "t2", "bob");
        tokio::time::sleep(Duration::from_millis(5)).await;
        expect_text(&mut t1); // CONNECTED
        expect_text(&mut t2); // CONNECTED
        expect_text(&mut t1); // TERMINAL_CONNECTED(t2)

        events.publish(DomainEvent::new(
            "queue-events",
            "queue_entry",
            "q1",
            "CREATE",
            json!({"id": "q1"}),
        ));
        tokio::time::sleep(Duration::from_millis(5)).await;

        for rx in [&mut t1, &mut t2] {
            let message = expect_text(rx);
            assert_eq!(message["type"], "CREATE");
            assert_eq!(message["entity"], "queue_entry");
            assert_eq!(message["entity_id"], "q1");
            assert_eq!(message["data"]["id"], "q1");
        }
    }

    #[tokio::test]
    async fn ping_replies_pong_only_to_sender() {
        let hub = SyncHub::start(test_audit().await, Arc::new(InMemoryEventBus::new()));
        let mut t1 = register(&hub, "t1", "alice");
        let mut t2 = register(&hub, "t2", "bob");
        tokio::time::sleep(Duration::from_millis(5)).await;
        expect_text(&mut t1);
        expect_text(&mut t2);
        expect_text(&mut t1);

        hub.commands
            .send(HubCommand::Inbound {
                terminal_id: "t1".to_string(),
                raw: r#"{"type":"PING"}"#.to_string(),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(expect_text(&mut t1)["type"], "PONG");
        assert!(t2.try_recv().is_err());
    }

    #[tokio::test]
    async fn messages_to_a_disconnected_terminal_are_queued_and_drained_on_reconnect() {
        let hub = SyncHub::start(test_audit().await, Arc::new(InMemoryEventBus::new()));
        let mut t1 = register(&hub, "t1", "alice");
        {
            let mut t2 = register(&hub, "t2", "bob");
            tokio::time::sleep(Duration::from_millis(5)).await;
            expect_text(&mut t1);
            expect_text(&mut t2);
            expect_text(&mut t1);
        }
        // t2 dropped without an explicit Disconnect command: still "connected"
        // from the hub's point of view until it is told otherwise.
        hub.commands
            .send(HubCommand::Disconnect {
                terminal_id: "t2".to_string(),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        expect_text(&mut t1); // TERMINAL_DISCONNECTED(t2)

        hub.commands
            .send(HubCommand::Inbound {
                terminal_id: "t1".to_string(),
                raw: r#"{"type":"CREATE","entity":"queue_entry","entity_id":"q1"}"#.to_string(),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let status = hub.status().await;
        assert_eq!(status.queued_messages.get("t2"), Some(&1));

        let mut t2_again = register(&hub, "t2", "bob");
        tokio::time::sleep(Duration::from_millis(5)).await;
        let drained = expect_text(&mut t2_again);
        assert_eq!(drained["type"], "CREATE");
        let connected = expect_text(&mut t2_again);
        assert_eq!(connected["type"], "CONNECTED");

        let status = hub.status().await;
        assert_eq!(status.queued_messages.get("t2"), None);
    }

    #[tokio::test]
    async fn status_reports_connected_terminals_and_total() {
        let hub = SyncHub::start(test_audit().await, Arc::new(InMemoryEventBus::new()));
        let _t1 = register(&hub, "t1", "alice");
        let _t2 = register(&hub, "t2", "bob");
        tokio::time::sleep(Duration::from_millis(5)).await;

        let status = hub.status().await;
        assert_eq!(status.total_connections, 2);
        assert_eq!(status.connected_terminals.get("t1"), Some(&"alice".to_string()));
    }

    #[tokio::test]
    async fn reconnecting_the_same_terminal_closes_the_previous_connection() {
        let hub = SyncHub::start(test_audit().await, Arc::new(InMemoryEventBus::new()));
        let mut first = register(&hub, "t1", "alice");
        tokio::time::sleep(Duration::from_millis(5)).await;
        expect_text(&mut first);

        let mut second = register(&hub, "t1", "alice");
        tokio::time::sleep(Duration::from_millis(5)).await;
        expect_text(&mut second);

        match first.try_recv().expect("previous connection should be closed") {
            OutboundFrame::Close(code, _) => assert_eq!(code, 1000),
            OutboundFrame::Text(text) => panic!("expected close, got text {text}"),
        }
    }

    #[tokio::test]
    async fn malformed_json_closes_with_4001() {
        let hub = SyncHub::start(test_audit().await, Arc::new(InMemoryEventBus::new()));
        let mut t1 = register(&hub, "t1", "alice");
        tokio::time::sleep(Duration::from_millis(5)).await;
        expect_text(&mut t1);

        hub.commands
            .send(HubCommand::Inbound {
                terminal_id: "t1".to_string(),
                raw: "not json".to_string(),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        match t1.try_recv().expect("expected a close frame") {
            OutboundFrame::Close(code, _) => assert_eq!(code, 4001),
            OutboundFrame::Text(text) => panic!("expected close, got text {text}"),
        }
    }
}
