use crate::nats::traits::JetStreamPublisher;
use anyhow::{Context, Result};
use async_nats::jetstream::{self, stream::Config as StreamConfig};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

pub struct NatsClient {
    jetstream: jetstream::Context,
}

impl NatsClient {
    pub async fn connect(url: &str, timeout: std::time::Duration) -> Result<Self> {
        info!(url = %url, timeout_ms = timeout.as_millis(), "Connecting to NATS");

        // Configure connection timeout for establishing the TCP connection
        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .context("Failed to connect to NATS")?;

        let jetstream = jetstream::new(client);

        info!("Successfully connected to NATS");
        Ok(Self { jetstream })
    }

    /// Create a JetStreamPublisher trait object from this client
    pub fn create_publisher_client(&self) -> Arc<dyn JetStreamPublisher> {
        Arc::new(NatsJetStreamPublisher::new(self.jetstream.clone()))
    }

    pub async fn close(self) {
        info!("Closing NATS connection");
        // Connection closes automatically when dropped
    }
}

/// Make sure `stream_name` exists, capturing every `{stream_name}.*` subject
pub async fn ensure_stream(publisher: &dyn JetStreamPublisher, stream_name: &str) -> Result<()> {
    info!(stream = %stream_name, "Ensuring stream exists");

    if publisher.get_stream(stream_name).await.is_ok() {
        info!(stream = %stream_name, "Stream already exists");
        return Ok(());
    }

    let stream_config = StreamConfig {
        name: stream_name.to_string(),
        subjects: vec![format!("{}.*", stream_name)],
        description: Some("Accepted dispenser lifecycle events".to_string()),
        ..Default::default()
    };

    publisher
        .create_stream(stream_config)
        .await
        .context("Failed to create stream")?;
    info!(stream = %stream_name, "Created stream");
    Ok(())
}

/// Concrete implementation of JetStreamPublisher using async-nats
pub struct NatsJetStreamPublisher {
    context: jetstream::Context,
}

impl NatsJetStreamPublisher {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl JetStreamPublisher for NatsJetStreamPublisher {
    async fn get_stream(&self, stream_name: &str) -> Result<()> {
        self.context
            .get_stream(stream_name)
            .await
            .context("Failed to get stream")?;
        Ok(())
    }

    async fn create_stream(&self, config: jetstream::stream::Config) -> Result<()> {
        self.context
            .create_stream(config)
            .await
            .context("Failed to create stream")?;
        Ok(())
    }

    #[instrument(skip(self, payload), fields(subject = %subject, payload_size = payload.len()))]
    async fn publish(&self, subject: String, payload: bytes::Bytes) -> Result<()> {
        let ack = self
            .context
            .publish(subject, payload)
            .await
            .context("Failed to publish message to JetStream")?;

        ack.await
            .context("Failed to receive JetStream acknowledgment")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::MockJetStreamPublisher;

    #[tokio::test]
    async fn test_ensure_stream_existing() {
        let mut mock = MockJetStreamPublisher::new();
        mock.expect_get_stream()
            .withf(|name: &str| name == "dispenser_events")
            .times(1)
            .returning(|_| Ok(()));
        mock.expect_create_stream().times(0);

        ensure_stream(&mock, "dispenser_events").await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_stream_creates_missing_stream() {
        let mut mock = MockJetStreamPublisher::new();
        mock.expect_get_stream()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("stream not found")));
        mock.expect_create_stream()
            .withf(|config: &jetstream::stream::Config| {
                config.name == "dispenser_events"
                    && config.subjects == vec!["dispenser_events.*".to_string()]
            })
            .times(1)
            .returning(|_| Ok(()));

        ensure_stream(&mock, "dispenser_events").await.unwrap();
    }
}
