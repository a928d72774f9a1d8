//! ---
//! flx_section: "05-networking-external-interfaces"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Telemetry producers feeding the session event queue."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
//! Producers turn each backend into [`SourceEvent`]s on one channel. They
//! never touch session state, and a failing fetch or publish only costs that
//! tick: the previous sample stays in place.

use std::sync::Arc;

use anyhow::Result;
use flexo_common::SharedClock;
use flexo_msg::{Message, MessagePayload, Sample, SampleUpdate, Subscription, Transport};
use flexo_net::TelemetryRelay;
use serde::Serialize;
use strum::{Display, IntoStaticStr};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Backend a sample came from; doubles as the metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceKind {
    Simulation,
    Bus,
    Relay,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Sample { sample: Sample, source: SourceKind },
    Connectivity { connected: bool, source: SourceKind },
}

/// Forward `machine/update` samples from the bus into the session queue.
///
/// Used by the remote simulation route, where the simulator publishes and the
/// console reads back what the bus delivered.
pub async fn forward_bus_samples(
    mut subscription: Subscription,
    events: mpsc::Sender<SourceEvent>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!(topic = %subscription.topic(), "bus listener shutdown");
                break;
            }
            received = subscription.recv() => {
                let message = match received {
                    Ok(message) => message,
                    Err(err) => {
                        warn!(error = %err, "bus subscription ended");
                        break;
                    }
                };
                let kind = message.kind();
                let MessagePayload::Sample(sample) = message.payload else {
                    debug!(kind, "ignoring non-sample message");
                    continue;
                };
                let event = SourceEvent::Sample { sample, source: SourceKind::Bus };
                if events.send(event).await.is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Fetches one relay sample per poll request.
pub struct RelayPoller {
    relay: Arc<dyn TelemetryRelay>,
    transport: Arc<dyn Transport>,
    events: mpsc::Sender<SourceEvent>,
    clock: SharedClock,
    last: Sample,
    connected: Option<bool>,
}

impl RelayPoller {
    pub fn new(
        relay: Arc<dyn TelemetryRelay>,
        transport: Arc<dyn Transport>,
        events: mpsc::Sender<SourceEvent>,
        clock: SharedClock,
    ) -> Self {
        let last = Sample::idle(clock.now());
        Self {
            relay,
            transport,
            events,
            clock,
            last,
            connected: None,
        }
    }

    /// One fetch. Errors are logged and reported as lost connectivity.
    pub async fn poll_once(&mut self) -> Result<()> {
        match self.relay.fetch_sample().await {
            Ok(Some(raw)) => {
                if let Err(err) = self.transport.publish(Message::debug_raw(raw.clone())) {
                    debug!(error = %err, "raw sample not republished");
                }
                let update = SampleUpdate::from_json(&raw);
                if update.is_empty() {
                    warn!("relay sample carried no known fields, keeping previous values");
                }
                self.mark_connected(true).await?;
                self.last = self.last.merged(&update, self.clock.now());
                self.send(SourceEvent::Sample {
                    sample: self.last,
                    source: SourceKind::Relay,
                })
                .await
            }
            Ok(None) => self.mark_connected(true).await,
            Err(err) => {
                warn!(error = %err, "relay fetch failed");
                self.mark_connected(false).await
            }
        }
    }

    async fn mark_connected(&mut self, connected: bool) -> Result<()> {
        if self.connected == Some(connected) {
            return Ok(());
        }
        self.connected = Some(connected);
        self.send(SourceEvent::Connectivity {
            connected,
            source: SourceKind::Relay,
        })
        .await
    }

    async fn send(&self, event: SourceEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| anyhow::anyhow!("session event queue closed"))
    }

    /// Serve poll requests until shutdown. A request arriving while a fetch is
    /// still in flight is dropped by the sender, never queued.
    pub async fn run(
        mut self,
        mut requests: mpsc::Receiver<()>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("relay poller shutdown");
                    break;
                }
                request = requests.recv() => {
                    if request.is_none() {
                        break;
                    }
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        result = self.poll_once() => result?,
                    }
                }
            }
        }
        Ok(())
    }
}
