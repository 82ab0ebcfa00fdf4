//! Inbound pump: the only reader of a connection.

use std::fmt::Display;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::connection::Teardown;
use crate::protocol::{decode_frame, Frame, Notice, OutboundFrame};
use crate::registry::RegistryHandle;
use crate::session::{ClientSession, SessionAction};
use crate::HubError;

/// Everything the reader needs besides the transport.
pub struct Reader {
    pub session: ClientSession,
    pub registry: RegistryHandle,
    /// Weak so that only the directory keeps the queue open
    pub notices: mpsc::WeakSender<OutboundFrame>,
    pub teardown: Arc<Teardown>,
    pub config: Arc<HubConfig>,
}

impl Reader {
    /// Read frames until the transport ends, the session closes, or the
    /// connection is torn down by the writer or the registry.
    pub async fn run<S, E>(mut self, mut stream: S)
    where
        S: Stream<Item = Result<Frame, E>> + Unpin,
        E: Display,
    {
        let handshake = sleep(self.config.handshake_deadline);
        tokio::pin!(handshake);
        let read_deadline = sleep_until(Instant::now() + self.config.pong_wait);
        tokio::pin!(read_deadline);

        let outcome: Result<(), HubError> = loop {
            tokio::select! {
                biased;

                _ = self.teardown.cancelled() => break Ok(()),

                _ = &mut handshake, if !self.session.is_authenticated() => {
                    let action = self.session.expire(self.config.handshake_deadline);
                    if let Some(err) = self.apply(action).await {
                        break Err(err);
                    }
                }

                _ = &mut read_deadline => {
                    break Err(HubError::PongTimeout(self.config.pong_wait));
                }

                next = stream.next() => {
                    let frame = match next {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => break Err(HubError::transport(e.to_string())),
                        None => break Ok(()),
                    };
                    match frame {
                        Frame::Text(text) => {
                            if let Err(err) = self.check_size(text.len()) {
                                break Err(err);
                            }
                            match decode_frame(&text) {
                                Ok(request) => {
                                    let action = self.session.handle(request).await;
                                    if let Some(err) = self.apply(action).await {
                                        break Err(err);
                                    }
                                }
                                Err(e) => {
                                    warn!(
                                        connection_id = %self.session.connection_id(),
                                        error = %e,
                                        "Skipping malformed frame"
                                    );
                                }
                            }
                        }
                        Frame::Binary(data) => {
                            if let Err(err) = self.check_size(data.len()) {
                                break Err(err);
                            }
                            warn!(
                                connection_id = %self.session.connection_id(),
                                len = data.len(),
                                "Skipping binary frame"
                            );
                        }
                        Frame::Pong(_) => {
                            read_deadline.as_mut().reset(Instant::now() + self.config.pong_wait);
                        }
                        Frame::Ping(_) => {}
                        Frame::Close => break Ok(()),
                    }
                }
            }
        };

        self.session.close();
        match outcome {
            Ok(()) => {
                info!(
                    connection_id = %self.session.connection_id(),
                    user_id = %self.session.user_id(),
                    "Connection closed"
                );
                self.teardown.run("reader finished");
            }
            Err(err) => {
                info!(
                    connection_id = %self.session.connection_id(),
                    user_id = %self.session.user_id(),
                    error = %err,
                    "Connection closed with error"
                );
                self.teardown.run("reader failed");
            }
        }
    }

    fn check_size(&self, size: usize) -> Result<(), HubError> {
        if size > self.config.max_frame_size {
            return Err(HubError::FrameTooLarge {
                size,
                limit: self.config.max_frame_size,
            });
        }
        Ok(())
    }

    /// Carry out a session action. Returns the error that ends the connection, if any.
    async fn apply(&mut self, action: SessionAction) -> Option<HubError> {
        match action {
            SessionAction::Ignore | SessionAction::Authenticated => None,
            SessionAction::Deliver(event) => {
                if let Err(e) = self.registry.send(event).await {
                    warn!(error = %e, "Could not hand event to registry");
                }
                None
            }
            SessionAction::Notify(notice) => {
                self.notify(&notice);
                None
            }
            SessionAction::Suppressed(err) => {
                debug!(error = %err, "Event suppressed");
                None
            }
            SessionAction::Close(err) => {
                self.notify(&Notice::new(err.notice_text()));
                Some(err)
            }
        }
    }

    /// Best-effort notice to this connection's own queue.
    fn notify(&self, notice: &Notice) {
        let Some(sender) = self.notices.upgrade() else {
            debug!("Outbound queue already closed, dropping notice");
            return;
        };
        if sender.try_send(notice.encode()).is_err() {
            debug!("Outbound queue unavailable, dropping notice");
        }
    }
}
