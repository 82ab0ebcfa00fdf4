//! Outbound pump: the only writer of a connection.

use std::fmt::Display;
use std::sync::Arc;

use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::HubConfig;
use crate::connection::Teardown;
use crate::protocol::{Frame, OutboundFrame, FRAME_DELIMITER};
use crate::HubError;

/// Drains one connection's outbound queue onto its transport.
pub struct Writer {
    pub outbound: mpsc::Receiver<OutboundFrame>,
    pub teardown: Arc<Teardown>,
    pub config: Arc<HubConfig>,
}

impl Writer {
    /// Write until the queue closes or a write fails.
    ///
    /// A closed queue means the registry dropped the connection: whatever is
    /// still buffered is flushed, then a close frame is sent.
    pub async fn run<K>(mut self, mut sink: K)
    where
        K: Sink<Frame> + Unpin,
        K::Error: Display,
    {
        let period = self.config.ping_period;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome: Result<(), HubError> = loop {
            // Heartbeat first: a queue that never empties must not starve it.
            tokio::select! {
                biased;

                _ = heartbeat.tick() => {
                    if let Err(err) = self.write(&mut sink, Frame::Ping(Vec::new())).await {
                        break Err(err);
                    }
                }

                next = self.outbound.recv() => match next {
                    Some(first) => {
                        let text = coalesce(first, &mut self.outbound);
                        if let Err(err) = self.write(&mut sink, Frame::Text(text)).await {
                            break Err(err);
                        }
                    }
                    None => {
                        debug!(connection_id = %self.teardown.connection_id(), "Outbound queue closed");
                        if let Err(err) = self.write(&mut sink, Frame::Close).await {
                            debug!(error = %err, "Could not send close frame");
                        }
                        break Ok(());
                    }
                },
            }
        };

        if let Err(err) = &outcome {
            info!(
                connection_id = %self.teardown.connection_id(),
                error = %err,
                "Write failed, closing connection"
            );
        }
        let _ = timeout(self.config.write_wait, sink.close()).await;
        self.teardown.run("writer finished");
    }

    async fn write<K>(&self, sink: &mut K, frame: Frame) -> Result<(), HubError>
    where
        K: Sink<Frame> + Unpin,
        K::Error: Display,
    {
        match timeout(self.config.write_wait, sink.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(HubError::transport(e.to_string())),
            Err(_) => Err(HubError::WriteTimeout(self.config.write_wait)),
        }
    }
}

/// Join the first message with everything already buffered behind it.
///
/// Only the messages queued at this moment are taken; the call never waits.
pub fn coalesce(first: OutboundFrame, outbound: &mut mpsc::Receiver<OutboundFrame>) -> String {
    let pending = outbound.len();
    let mut text = String::from(first.as_str());
    for _ in 0..pending {
        match outbound.try_recv() {
            Ok(next) => {
                text.push(FRAME_DELIMITER);
                text.push_str(next.as_str());
            }
            Err(_) => break,
        }
    }
    text
}
