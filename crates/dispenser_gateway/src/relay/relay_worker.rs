use common::domain::{DomainError, DomainResult, EventPublisher, OutboundEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Delivery totals for one worker run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct RelayStats {
    delivered: u64,
    dropped: u64,
}

impl RelayStats {
    fn record(&mut self, delivered: bool) {
        if delivered {
            self.delivered += 1;
        } else {
            self.dropped += 1;
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayWorkerConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub publish_timeout: Duration,
}

impl Default for RelayWorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(2),
        }
    }
}

/// Drains the relay queue into an [`EventPublisher`], retrying with
/// exponential backoff. Events that exhaust their attempts are dropped.
pub struct RelayWorker {
    receiver: mpsc::Receiver<OutboundEvent>,
    publisher: Arc<dyn EventPublisher>,
    config: RelayWorkerConfig,
}

impl RelayWorker {
    pub fn new(
        receiver: mpsc::Receiver<OutboundEvent>,
        publisher: Arc<dyn EventPublisher>,
        config: RelayWorkerConfig,
    ) -> Self {
        Self {
            receiver,
            publisher,
            config,
        }
    }

    /// Run until cancelled or until every sender is gone.
    /// On cancellation, events already queued get one delivery attempt each.
    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        info!("relay worker started");
        let stats = self.relay_until_stopped(&ctx).await;
        info!(
            delivered = stats.delivered,
            dropped = stats.dropped,
            "relay worker stopped"
        );
        Ok(())
    }

    async fn relay_until_stopped(mut self, ctx: &CancellationToken) -> RelayStats {
        let mut stats = RelayStats::default();

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                next = self.receiver.recv() => match next {
                    Some(event) => {
                        let delivered = self.deliver(event, ctx).await;
                        stats.record(delivered);
                    }
                    None => {
                        info!("relay queue closed");
                        return stats;
                    }
                },
            }
        }

        self.receiver.close();
        let mut drained = 0usize;
        while let Ok(event) = self.receiver.try_recv() {
            let delivered = self.deliver(event, ctx).await;
            stats.record(delivered);
            drained += 1;
        }
        debug!(drained, "relay queue drained after cancellation");
        stats
    }

    async fn deliver(&self, event: OutboundEvent, ctx: &CancellationToken) -> bool {
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = self.config.initial_backoff;

        for attempt in 1..=max_attempts {
            match self.publish_once(&event).await {
                Ok(()) => {
                    debug!(device_id = %event.device_id, attempt, "relayed event delivered");
                    return true;
                }
                Err(e) if attempt < max_attempts && !ctx.is_cancelled() => {
                    warn!(
                        device_id = %event.device_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "relay publish failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = ctx.cancelled() => {}
                    }
                    backoff = (backoff * 2).min(self.config.max_backoff);
                }
                Err(e) => {
                    error!(
                        device_id = %event.device_id,
                        event_type = %event.event_type,
                        attempt,
                        error = %e,
                        "dropping relayed event"
                    );
                    return false;
                }
            }
        }
        false
    }

    async fn publish_once(&self, event: &OutboundEvent) -> DomainResult<()> {
        tokio::time::timeout(self.config.publish_timeout, self.publisher.publish(event))
            .await
            .map_err(|_| DomainError::RelayUnavailable("publish timed out".to_string()))?
    }
}
