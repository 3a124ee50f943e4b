//! JSON-over-WebSocket bridge for external clients.
//!
//! [`WsBridge`] speaks a small subset of the rosbridge protocol:
//!
//! | Direction | Frame | Effect |
//! |---|---|---|
//! | in  | `{"op":"publish","topic":"<joint>_<mode>_controller/command","msg":{"data":1.2}}` | [`EventPayload::JointCommand`] on [`Topic::JointCommands`] |
//! | in  | `{"op":"call_service","service":"pause_physics","id":"1"}` | [`ControlService::call`], answered with `service_response` |
//! | out | `{"op":"publish","topic":"/joint_states","msg":{..}}` | every [`Topic::JointStates`] event |
//! | out | `{"op":"publish","topic":"/simbridge/alerts","msg":{..}}` | every [`Topic::SystemAlerts`] event |
//!
//! The bridge does not validate command values or joint names; that is the
//! business of whoever consumes [`Topic::JointCommands`].

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use simbridge_types::{
    BridgeError, ControlRequest, Event, EventPayload, JointMode, JointStateSnapshot, parse_command_topic,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bus::{EventBus, Topic};

/// Topic name of the outbound joint-state stream.
pub const JOINT_STATES_TOPIC: &str = "/joint_states";

/// Topic name of the outbound alert stream.
pub const ALERTS_TOPIC: &str = "/simbridge/alerts";

const SOURCE: &str = "simbridge-middleware::ws";

/// The pause/unpause/reset services as seen from the transport.
///
/// Implemented by the simulation loop's control handle; an `Ok` return means
/// the request has been fully applied.
#[async_trait]
pub trait ControlService: Send + Sync {
    async fn call(&self, request: ControlRequest) -> Result<(), BridgeError>;
}

/// Bridge between WebSocket clients and the internal [`EventBus`].
#[derive(Clone)]
pub struct WsBridge {
    bus: Arc<EventBus>,
    control: Arc<dyn ControlService>,
}

impl WsBridge {
    /// Create a new bridge backed by `bus`, forwarding service calls to
    /// `control`.
    pub fn new(bus: Arc<EventBus>, control: Arc<dyn ControlService>) -> Self {
        Self { bus, control }
    }

    /// Publish one joint command onto [`Topic::JointCommands`].
    pub fn ingest_command(&self, joint: &str, mode: JointMode, value: f64) -> usize {
        let event = Event::new(
            SOURCE,
            EventPayload::JointCommand {
                joint: joint.to_string(),
                mode,
                value,
            },
        );
        self.bus.publish_to(Topic::JointCommands, event)
    }

    // -----------------------------------------------------------------------
    // WebSocket server
    // -----------------------------------------------------------------------

    /// Start a WebSocket server on `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Channel`] if the TCP listener cannot be bound.
    pub async fn run_ws_server(self, addr: SocketAddr) -> Result<(), BridgeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Channel(format!("ws bind error on {addr}: {e}")))?;
        info!(%addr, "websocket bridge listening");
        self.serve(listener).await
    }

    /// Accept clients on an already bound `listener` until the task is
    /// cancelled.
    pub async fn serve(self, listener: TcpListener) -> Result<(), BridgeError> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let bridge = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = bridge.handle_ws_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "ws client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "ws accept error");
                }
            }
        }
    }

    async fn handle_ws_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), BridgeError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| BridgeError::Channel(format!("ws handshake from {peer}: {e}")))?;
        debug!(%peer, "ws client connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut states = self.bus.subscribe_to(Topic::JointStates);
        let mut alerts = self.bus.subscribe_to(Topic::SystemAlerts);

        loop {
            let outbound = tokio::select! {
                result = states.recv() => match result {
                    Ok(event) => outbound_message(&event),
                    Err(RecvError::Lagged(n)) => {
                        warn!(peer = %peer, lagged_by = n, "ws client lagged on joint states");
                        None
                    }
                    Err(RecvError::Closed) => break,
                },
                result = alerts.recv() => match result {
                    Ok(event) => outbound_message(&event),
                    Err(RecvError::Lagged(n)) => {
                        warn!(peer = %peer, lagged_by = n, "ws client lagged on alerts");
                        None
                    }
                    Err(RecvError::Closed) => break,
                },
                msg = ws_rx.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_incoming_ws_message(text.as_str()).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => None,
                },
            };

            if let Some(frame) = outbound {
                if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                    break;
                }
            }
        }

        debug!(%peer, "ws client disconnected");
        Ok(())
    }

    /// Parse an incoming WebSocket text message.
    ///
    /// Returns the frame to send back to the client, if any.  Anything that
    /// is neither a command publish nor a known service call is ignored.
    async fn handle_incoming_ws_message(&self, text: &str) -> Option<Value> {
        let Ok(json) = serde_json::from_str::<Value>(text) else {
            warn!("ignoring non-JSON ws frame");
            return None;
        };

        match json.get("op").and_then(Value::as_str) {
            Some("publish") => {
                let topic = json.get("topic").and_then(Value::as_str).unwrap_or("");
                let Some((joint, mode)) = parse_command_topic(topic) else {
                    debug!(topic, "ignoring publish on unknown topic");
                    return None;
                };
                match json.get("msg").and_then(|m| m.get("data")).and_then(Value::as_f64) {
                    Some(value) => {
                        self.ingest_command(joint, mode, value);
                    }
                    None => warn!(topic, "command without numeric msg.data"),
                }
                None
            }
            Some("call_service") => {
                let service = json.get("service").and_then(Value::as_str).unwrap_or("");
                let id = json.get("id").cloned().unwrap_or(Value::Null);
                let result = match ControlRequest::from_service_name(service) {
                    Some(request) => self.control.call(request).await,
                    None => Err(BridgeError::Channel(format!("unknown service '{service}'"))),
                };
                Some(service_response(service, id, result))
            }
            _ => None,
        }
    }
}

fn service_response(service: &str, id: Value, result: Result<(), BridgeError>) -> Value {
    match result {
        Ok(()) => json!({
            "op": "service_response",
            "service": service,
            "id": id,
            "result": true,
            "values": {},
        }),
        Err(e) => json!({
            "op": "service_response",
            "service": service,
            "id": id,
            "result": false,
            "values": e.to_string(),
        }),
    }
}

/// Translate a bus event into an outbound frame.
fn outbound_message(event: &Event) -> Option<Value> {
    match &event.payload {
        EventPayload::JointStates(snapshot) => Some(json!({
            "op": "publish",
            "topic": JOINT_STATES_TOPIC,
            "msg": joint_state_msg(snapshot),
        })),
        EventPayload::LoopStateChanged(_) | EventPayload::SimulationFault { .. } => {
            let msg = serde_json::to_value(&event.payload).ok()?;
            Some(json!({
                "op": "publish",
                "topic": ALERTS_TOPIC,
                "msg": msg,
            }))
        }
        EventPayload::JointCommand { .. } => None,
    }
}

fn joint_state_msg(snapshot: &JointStateSnapshot) -> Value {
    json!({
        "header": {
            "stamp": {
                "secs": snapshot.stamp.timestamp(),
                "nsecs": snapshot.stamp.timestamp_subsec_nanos(),
            },
        },
        "name": snapshot.name,
        "position": snapshot.position,
        "velocity": snapshot.velocity,
        "effort": snapshot.effort,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use simbridge_types::{JointReading, LoopState};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingControl {
        calls: Mutex<Vec<ControlRequest>>,
    }

    #[async_trait]
    impl ControlService for RecordingControl {
        async fn call(&self, request: ControlRequest) -> Result<(), BridgeError> {
            self.calls.lock().unwrap().push(request);
            Ok(())
        }
    }

    fn make_bridge() -> (Arc<EventBus>, Arc<RecordingControl>, WsBridge) {
        let bus = Arc::new(EventBus::default());
        let control = Arc::new(RecordingControl::default());
        let bridge = WsBridge::new(Arc::clone(&bus), control.clone());
        (bus, control, bridge)
    }

    #[tokio::test]
    async fn command_publish_becomes_joint_command_event() {
        let (bus, _, bridge) = make_bridge();
        let mut rx = bus.subscribe_to(Topic::JointCommands);

        let frame = r#"{"op":"publish","topic":"/hip_position_controller/command","msg":{"data":1.2}}"#;
        assert!(bridge.handle_incoming_ws_message(frame).await.is_none());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.source, SOURCE);
        match event.payload {
            EventPayload::JointCommand { joint, mode, value } => {
                assert_eq!(joint, "hip");
                assert_eq!(mode, JointMode::Position);
                assert!((value - 1.2).abs() < f64::EPSILON);
            }
            other => panic!("expected JointCommand, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_frames_are_ignored() {
        let (bus, control, bridge) = make_bridge();
        let mut rx = bus.subscribe_to(Topic::JointCommands);

        for frame in [
            "not json",
            r#"{"op":"publish","topic":"/hip_position_controller/command","msg":{"data":"high"}}"#,
            r#"{"op":"publish","topic":"/cmd_vel","msg":{"data":1.0}}"#,
            r#"{"op":"subscribe","topic":"/joint_states"}"#,
        ] {
            assert!(bridge.handle_incoming_ws_message(frame).await.is_none());
        }
        assert!(rx.try_recv().is_err());
        assert!(control.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn service_calls_reach_control_and_are_acknowledged() {
        let (_, control, bridge) = make_bridge();

        let reply = bridge
            .handle_incoming_ws_message(r#"{"op":"call_service","service":"/simbridge/pause_physics","id":"c1"}"#)
            .await
            .unwrap();
        assert_eq!(reply["op"], "service_response");
        assert_eq!(reply["id"], "c1");
        assert_eq!(reply["result"], true);

        bridge
            .handle_incoming_ws_message(r#"{"op":"call_service","service":"reset_simulation"}"#)
            .await
            .unwrap();
        assert_eq!(
            *control.calls.lock().unwrap(),
            vec![ControlRequest::Pause, ControlRequest::Reset]
        );
    }

    #[tokio::test]
    async fn unknown_service_is_answered_with_failure() {
        let (_, control, bridge) = make_bridge();
        let reply = bridge
            .handle_incoming_ws_message(r#"{"op":"call_service","service":"spawn_model","id":7}"#)
            .await
            .unwrap();
        assert_eq!(reply["result"], false);
        assert_eq!(reply["id"], 7);
        assert!(control.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn joint_states_frame_layout() {
        let stamp = Utc.timestamp_opt(1_700_000_000, 250).unwrap();
        let mut snapshot = JointStateSnapshot::with_capacity(stamp, 1);
        snapshot.push(
            "hip",
            JointReading {
                position: 0.5,
                velocity: -0.1,
                applied_effort: 3.0,
            },
        );
        let frame = outbound_message(&Event::new("test", EventPayload::JointStates(snapshot))).unwrap();
        assert_eq!(frame["topic"], JOINT_STATES_TOPIC);
        assert_eq!(frame["msg"]["name"][0], "hip");
        assert_eq!(frame["msg"]["effort"][0], 3.0);
        assert_eq!(frame["msg"]["header"]["stamp"]["secs"], 1_700_000_000i64);
        assert_eq!(frame["msg"]["header"]["stamp"]["nsecs"], 250);
    }

    #[test]
    fn alerts_are_forwarded_and_commands_are_not() {
        let alert = Event::new("test", EventPayload::LoopStateChanged(LoopState::Paused));
        assert_eq!(outbound_message(&alert).unwrap()["topic"], ALERTS_TOPIC);

        let command = Event::new(
            "test",
            EventPayload::JointCommand {
                joint: "hip".into(),
                mode: JointMode::Effort,
                value: 1.0,
            },
        );
        assert!(outbound_message(&command).is_none());
    }

    #[tokio::test]
    async fn websocket_round_trip() {
        let (bus, control, bridge) = make_bridge();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(bridge.serve(listener));

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        ws.send(Message::Text(
            r#"{"op":"call_service","service":"unpause_physics","id":"r"}"#
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

        let reply = loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => break serde_json::from_str::<Value>(text.as_str()).unwrap(),
                _ => continue,
            }
        };
        assert_eq!(reply["service"], "unpause_physics");
        assert_eq!(reply["result"], true);
        assert_eq!(*control.calls.lock().unwrap(), vec![ControlRequest::Resume]);

        // The client is subscribed by now; joint states flow out.
        bus.publish_to(
            Topic::JointStates,
            Event::new(
                "test",
                EventPayload::JointStates(JointStateSnapshot::with_capacity(Utc::now(), 0)),
            ),
        );
        let frame = loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => break serde_json::from_str::<Value>(text.as_str()).unwrap(),
                _ => continue,
            }
        };
        assert_eq!(frame["topic"], JOINT_STATES_TOPIC);

        server.abort();
    }
}
