//! Hub entry point: owns the registry and accepts connections.

use std::fmt::Display;
use std::sync::Arc;

use futures::{Sink, Stream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, info_span, instrument, Instrument};

use crate::config::HubConfig;
use crate::connection::{ConnectionHandle, ConnectionId, Teardown};
use crate::protocol::{Frame, Notice};
use crate::reader::Reader;
use crate::registry::{Registry, RegistryHandle};
use crate::service::{ChatService, IdentityVerifier};
use crate::session::ClientSession;
use crate::writer::Writer;
use crate::HubError;

/// Running chat hub.
///
/// Cheap to clone; every clone talks to the same registry task.
#[derive(Clone)]
pub struct ChatHub {
    config: Arc<HubConfig>,
    registry: RegistryHandle,
    chat: Arc<dyn ChatService>,
    verifier: Arc<dyn IdentityVerifier>,
}

/// Reader and writer tasks of one accepted connection.
#[derive(Debug)]
pub struct ConnectionTasks {
    pub id: ConnectionId,
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

impl ConnectionTasks {
    /// Wait for both pumps to finish.
    pub async fn join(self) {
        let _ = self.reader.await;
        let _ = self.writer.await;
    }
}

impl ChatHub {
    /// Validate the configuration and start the registry task.
    pub fn start(
        config: HubConfig,
        chat: Arc<dyn ChatService>,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Result<(Self, JoinHandle<()>), HubError> {
        config.validate()?;
        let (registry, task) = Registry::spawn(config.registry_capacity);
        info!(
            outbound_capacity = config.outbound_capacity,
            max_frame_size = config.max_frame_size,
            handshake_deadline = ?config.handshake_deadline,
            "Chat hub started"
        );
        let hub = Self {
            config: Arc::new(config),
            registry,
            chat,
            verifier,
        };
        Ok((hub, task))
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Register a freshly upgraded connection and spawn its pumps.
    ///
    /// The connection is registered before authentication so rejection
    /// notices can still reach it.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn accept<S, E, K>(
        &self,
        user_id: &str,
        stream: S,
        sink: K,
    ) -> Result<ConnectionTasks, HubError>
    where
        S: Stream<Item = Result<Frame, E>> + Send + Unpin + 'static,
        E: Display + Send + 'static,
        K: Sink<Frame> + Send + Unpin + 'static,
        K::Error: Display + Send,
    {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.config.outbound_capacity);
        let notices = tx.downgrade();

        self.registry
            .register(ConnectionHandle::new(id, user_id, tx))
            .await?;

        let mut session = ClientSession::new(id, user_id, self.chat.clone(), self.verifier.clone());
        session.open();
        let teardown = Arc::new(Teardown::new(self.registry.clone(), user_id, id));

        let writer = Writer {
            outbound: rx,
            teardown: teardown.clone(),
            config: self.config.clone(),
        };
        let reader = Reader {
            session,
            registry: self.registry.clone(),
            notices,
            teardown,
            config: self.config.clone(),
        };

        let writer = tokio::spawn(writer.run(sink).instrument(info_span!(
            "chat.connection.writer",
            connection_id = %id,
            user_id = %user_id,
        )));
        let reader = tokio::spawn(reader.run(stream).instrument(info_span!(
            "chat.connection.reader",
            connection_id = %id,
            user_id = %user_id,
        )));

        info!(connection_id = %id, "Connection accepted");
        Ok(ConnectionTasks { id, reader, writer })
    }

    /// Send a notice to every connection.
    pub async fn broadcast_notice(&self, notice: &Notice) -> Result<(), HubError> {
        self.registry.broadcast(notice.encode()).await
    }

    /// Close every connection and stop the registry.
    pub async fn shutdown(&self) -> Result<usize, HubError> {
        self.registry.shutdown().await
    }
}
