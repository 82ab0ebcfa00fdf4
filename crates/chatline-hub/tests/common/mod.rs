//! Test utilities for driving the hub over in-memory transports.
//!
//! Each [`TestClient`] stands in for a WebSocket peer: frames pushed with
//! `send_*` arrive at the connection's reader, and whatever the writer emits
//! shows up in `recv`.

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chatline_hub::{
    ChatHub, ChatService, ConnectionId, ConnectionTasks, Frame, HubConfig, IdentityVerifier,
    IncomingEvent, OutgoingEvent, RequestType, ServiceError,
};
use futures::channel::mpsc;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Default timeout for test operations that run on the real clock.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Accepts tokens of the form `token-<user id>`.
pub struct PrefixVerifier;

#[async_trait]
impl IdentityVerifier for PrefixVerifier {
    async fn verify(&self, token: &str) -> Result<String, ServiceError> {
        token
            .strip_prefix("token-")
            .filter(|subject| !subject.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ServiceError::Unauthorized("unknown token".to_string()))
    }
}

/// Chat service that records every call and echoes the request back as an
/// event for the listed participants.
#[derive(Default)]
pub struct RecordingChat {
    calls: Mutex<Vec<IncomingEvent>>,
}

impl RecordingChat {
    pub fn calls(&self) -> Vec<IncomingEvent> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, kind: RequestType, event: IncomingEvent) -> OutgoingEvent {
        self.calls.lock().unwrap().push(event.clone());
        OutgoingEvent {
            conversation_id: event.conversation_id,
            request_type: kind,
            message: event.message,
            participants: event.participants.unwrap_or_default(),
            origin: None,
        }
    }
}

#[async_trait]
impl ChatService for RecordingChat {
    async fn add_message(&self, event: IncomingEvent) -> Result<OutgoingEvent, ServiceError> {
        Ok(self.record(RequestType::AddMessage, event))
    }

    async fn add_participant(&self, event: IncomingEvent) -> Result<OutgoingEvent, ServiceError> {
        Ok(self.record(RequestType::AddParticipant, event))
    }
}

/// A running hub plus the collaborators it was built with.
pub struct TestHub {
    pub hub: ChatHub,
    pub chat: Arc<RecordingChat>,
    pub registry_task: JoinHandle<()>,
}

impl TestHub {
    pub fn start() -> Self {
        Self::with_config(HubConfig::default())
    }

    pub fn with_config(config: HubConfig) -> Self {
        init_tracing();
        let chat = Arc::new(RecordingChat::default());
        let (hub, registry_task) =
            ChatHub::start(config, chat.clone(), Arc::new(PrefixVerifier)).unwrap();
        Self {
            hub,
            chat,
            registry_task,
        }
    }

    /// Open a connection claiming `user_id` with an unbounded client side.
    pub async fn connect(&self, user_id: &str) -> TestClient {
        let (to_server, server_stream) = mpsc::unbounded::<Result<Frame, io::Error>>();
        let (server_sink, from_server) = mpsc::unbounded::<Frame>();
        let tasks = self
            .hub
            .accept(user_id, server_stream, server_sink)
            .await
            .unwrap();
        TestClient {
            user_id: user_id.to_string(),
            id: tasks.id,
            to_server,
            from_server,
            tasks,
        }
    }

    /// Connection ids currently registered for a user.
    pub async fn connections_for(&self, user_id: &str) -> Vec<ConnectionId> {
        let snapshot = self.hub.registry().snapshot().await.unwrap();
        snapshot.connections_for(user_id).to_vec()
    }
}

/// Client end of an in-memory connection.
pub struct TestClient {
    pub user_id: String,
    pub id: ConnectionId,
    to_server: mpsc::UnboundedSender<Result<Frame, io::Error>>,
    from_server: mpsc::UnboundedReceiver<Frame>,
    tasks: ConnectionTasks,
}

impl TestClient {
    pub fn send_frame(&self, frame: Frame) {
        self.to_server.unbounded_send(Ok(frame)).unwrap();
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.send_frame(Frame::Text(text.into()));
    }

    pub fn send_json(&self, value: Value) {
        self.send_text(value.to_string());
    }

    /// Present `token-<user id>` for this connection's own user.
    pub fn authenticate(&self) {
        self.authenticate_as(&self.user_id);
    }

    /// Present a token issued to another subject.
    pub fn authenticate_as(&self, subject: &str) {
        self.send_json(json!({
            "requestType": RequestType::Authenticate.code(),
            "token": format!("token-{}", subject),
        }));
    }

    /// Inject a transport error on the read side.
    pub fn fail_read(&self) {
        let _ = self
            .to_server
            .unbounded_send(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer")));
    }

    /// Next frame from the writer. Waits without a timeout, so it also works
    /// with a paused clock.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_server.next().await
    }

    /// Next text frame within [`DEFAULT_TIMEOUT`], skipping heartbeats.
    pub async fn recv_text(&mut self) -> String {
        loop {
            match timeout(DEFAULT_TIMEOUT, self.from_server.next()).await {
                Ok(Some(Frame::Text(text))) => return text,
                Ok(Some(Frame::Ping(_))) => continue,
                other => panic!("expected a text frame, got {:?}", other),
            }
        }
    }

    /// Next text frame parsed as JSON.
    pub async fn recv_json(&mut self) -> Value {
        let text = self.recv_text().await;
        serde_json::from_str(&text).unwrap()
    }

    /// Assert nothing but heartbeats arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        loop {
            match timeout(window, self.from_server.next()).await {
                Err(_) => return,
                Ok(Some(Frame::Ping(_))) => continue,
                Ok(other) => panic!("expected no frames, got {:?}", other),
            }
        }
    }

    /// Stop reading the writer's output; its next write fails.
    pub fn drop_receiver(&mut self) {
        self.from_server.close();
    }

    /// Close the client side and wait for both pumps to finish.
    pub async fn close(self) {
        let _ = self.to_server.unbounded_send(Ok(Frame::Close));
        self.tasks.join().await;
    }

    /// Wait for both pumps to finish.
    pub async fn finished(self) {
        timeout(DEFAULT_TIMEOUT, self.tasks.join()).await.unwrap();
    }
}

/// AddMessage request in wire form.
pub fn add_message(conversation_id: &str, sender: &str, body: &str, participants: &[&str]) -> Value {
    json!({
        "conversationId": conversation_id,
        "requestType": RequestType::AddMessage.code(),
        "message": {"senderId": sender, "contentType": "text", "body": body},
        "participants": participants,
    })
}
