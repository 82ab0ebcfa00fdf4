//! The registry task and its handle.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::directory::{Directory, DirectorySnapshot};
use crate::connection::{ConnectionHandle, ConnectionId};
use crate::protocol::{OutboundFrame, OutgoingEvent};
use crate::HubError;

/// Commands processed by the registry loop, one at a time.
#[derive(Debug)]
enum RegistryCommand {
    Register(ConnectionHandle),
    Unregister {
        user_id: String,
        id: ConnectionId,
    },
    Broadcast(OutboundFrame),
    Send {
        participants: Vec<String>,
        origin: Option<ConnectionId>,
        frame: OutboundFrame,
    },
    Snapshot(oneshot::Sender<DirectorySnapshot>),
    Shutdown(oneshot::Sender<usize>),
}

/// Single owner of the connection directory.
///
/// Runs as one task; every membership change and every fan-out goes through
/// its command queue, so the directory needs no locking.
pub struct Registry {
    directory: Directory,
    commands: mpsc::Receiver<RegistryCommand>,
}

impl Registry {
    /// Start the registry task with a command queue of the given capacity.
    pub fn spawn(capacity: usize) -> (RegistryHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let registry = Self {
            directory: Directory::new(),
            commands: rx,
        };
        let task = tokio::spawn(registry.run());
        (RegistryHandle { commands: tx }, task)
    }

    async fn run(mut self) {
        info!("Connection registry started");

        while let Some(command) = self.commands.recv().await {
            match command {
                RegistryCommand::Register(handle) => {
                    debug!(
                        connection_id = %handle.id(),
                        user_id = %handle.user_id(),
                        "Registered connection"
                    );
                    self.directory.insert(handle);
                }
                RegistryCommand::Unregister { user_id, id } => {
                    if self.directory.remove(&user_id, id) {
                        debug!(connection_id = %id, user_id = %user_id, "Unregistered connection");
                    } else {
                        debug!(connection_id = %id, user_id = %user_id, "Connection was not registered");
                    }
                }
                RegistryCommand::Broadcast(frame) => {
                    let report = self.directory.broadcast(&frame);
                    debug!(
                        delivered = report.delivered,
                        evicted = report.evicted.len(),
                        "Broadcast complete"
                    );
                }
                RegistryCommand::Send {
                    participants,
                    origin,
                    frame,
                } => {
                    let report = self.directory.send_to(&participants, origin, &frame);
                    debug!(
                        delivered = report.delivered,
                        evicted = report.evicted.len(),
                        "Targeted send complete"
                    );
                }
                RegistryCommand::Snapshot(reply) => {
                    let _ = reply.send(self.directory.snapshot());
                }
                RegistryCommand::Shutdown(reply) => {
                    let dropped = self.directory.clear();
                    info!(connections = dropped, "Connection registry shutting down");
                    let _ = reply.send(dropped);
                    return;
                }
            }
        }

        info!("All registry handles dropped, registry stopped");
    }
}

/// Cloneable handle for sending commands to the registry.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    commands: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Add a connection to the directory.
    #[instrument(skip(self, handle), fields(connection_id = %handle.id(), user_id = %handle.user_id()))]
    pub async fn register(&self, handle: ConnectionHandle) -> Result<(), HubError> {
        self.dispatch(RegistryCommand::Register(handle)).await
    }

    /// Remove a connection from the directory. Unknown connections are ignored.
    pub async fn unregister(&self, user_id: &str, id: ConnectionId) -> Result<(), HubError> {
        self.dispatch(RegistryCommand::Unregister {
            user_id: user_id.to_string(),
            id,
        })
        .await
    }

    /// Non-async unregister used from teardown paths.
    ///
    /// Queues the command immediately when there is room, otherwise hands it
    /// to a spawned task so the caller never waits on the registry.
    pub fn release(&self, user_id: &str, id: ConnectionId) {
        let command = RegistryCommand::Unregister {
            user_id: user_id.to_string(),
            id,
        };
        match self.commands.try_send(command) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(command)) => {
                let commands = self.commands.clone();
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        runtime.spawn(async move {
                            let _ = commands.send(command).await;
                        });
                    }
                    Err(_) => warn!(connection_id = %id, "No runtime available to release connection"),
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(connection_id = %id, "Registry already stopped");
            }
        }
    }

    /// Queue a frame for every registered connection.
    pub async fn broadcast(&self, frame: OutboundFrame) -> Result<(), HubError> {
        self.dispatch(RegistryCommand::Broadcast(frame)).await
    }

    /// Deliver an event to its participants, skipping its origin connection.
    ///
    /// The event is encoded here, once, before it reaches the registry.
    pub async fn send(&self, event: OutgoingEvent) -> Result<(), HubError> {
        let frame = event.encode()?;
        self.dispatch(RegistryCommand::Send {
            participants: event.participants,
            origin: event.origin,
            frame,
        })
        .await
    }

    /// Current directory membership.
    pub async fn snapshot(&self) -> Result<DirectorySnapshot, HubError> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(RegistryCommand::Snapshot(tx)).await?;
        rx.await.map_err(|_| HubError::RegistryClosed)
    }

    /// Drop every connection and stop the registry.
    ///
    /// Returns the number of connections that were still registered.
    pub async fn shutdown(&self) -> Result<usize, HubError> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(RegistryCommand::Shutdown(tx)).await?;
        rx.await.map_err(|_| HubError::RegistryClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn dispatch(&self, command: RegistryCommand) -> Result<(), HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::RegistryClosed)
    }
}
