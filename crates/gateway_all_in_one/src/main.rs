mod config;

use anyhow::Context;
use common::domain::{CredentialStore, DeviceCredential, DeviceRepository, EventPublisher};
use common::memory::{InMemoryCredentialStore, InMemoryDeviceRepository};
use common::nats::{ensure_stream, NatsClient, NatsEventPublisher};
use common::postgres::{PostgresClient, PostgresCredentialStore, PostgresDeviceRepository};
use common::telemetry::{init_telemetry, TelemetryConfig};
use crate::config::{RelayBackend, ServiceConfig, StorageBackend};
use dispenser_gateway::{
    relay_channel, Authenticator, CorsConfig, DeviceDefaults, DispatcherConfig, DispenserGateway,
    EventAdmissionService, EventDispatcher, EventValidator, HttpLoggingConfig, HttpServerConfig,
    LoggingEventPublisher, RelayWorker, RelayWorkerConfig,
};
use dispenser_runner::Runner;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_telemetry(&TelemetryConfig {
        service_name: "dispenser-gateway".to_string(),
        log_level: config.log_level.clone(),
        json: config.log_json,
    }) {
        eprintln!("Failed to initialize telemetry: {}", e);
        std::process::exit(1);
    }

    info!(
        storage_backend = ?config.storage_backend,
        relay_backend = ?config.relay_backend,
        "Starting dispenser gateway"
    );
    debug!("Configuration: {:?}", config);

    let storage = match initialize_storage(&config).await {
        Ok(storage) => storage,
        Err(e) => {
            error!("Failed to initialize storage: {:#}", e);
            std::process::exit(1);
        }
    };

    let (publisher, nats_client) = match initialize_publisher(&config).await {
        Ok(publisher) => publisher,
        Err(e) => {
            error!("Failed to initialize relay publisher: {:#}", e);
            std::process::exit(1);
        }
    };

    let registry_timeout = Duration::from_millis(config.registry_timeout_ms);
    let (relay, relay_queue) = relay_channel(config.relay_queue_capacity);
    let relay_worker = RelayWorker::new(
        relay_queue,
        publisher,
        RelayWorkerConfig {
            max_attempts: config.relay_max_attempts,
            initial_backoff: Duration::from_millis(config.relay_initial_backoff_ms),
            max_backoff: Duration::from_millis(config.relay_max_backoff_ms),
            publish_timeout: Duration::from_millis(config.relay_timeout_ms),
        },
    );

    let dispatcher = EventDispatcher::new(
        storage.devices.clone(),
        Arc::new(relay),
        DispatcherConfig {
            defaults: DeviceDefaults {
                name: config.default_device_name.clone(),
                capacity: config.default_capacity,
            },
            registry_timeout,
            max_conflict_retries: config.max_conflict_retries,
        },
    );
    let admission = Arc::new(EventAdmissionService::new(
        EventValidator::new(),
        Authenticator::new(storage.credentials, registry_timeout),
        dispatcher,
        storage.devices,
        registry_timeout,
    ));

    let gateway = DispenserGateway::new(
        admission,
        HttpServerConfig {
            host: config.http_host.clone(),
            port: config.http_port,
            cors: CorsConfig::from_comma_separated(&config.cors_allowed_origins),
            logging: HttpLoggingConfig::default(),
        },
    );

    Runner::new()
        .with_app_process("http", gateway.into_runner_process())
        .with_app_process("relay_worker", move |ctx| relay_worker.run(ctx))
        .with_closer(move || async move {
            info!("Running cleanup tasks...");
            if let Some(client) = nats_client {
                client.close().await;
            }
            info!("Cleanup complete");
            Ok(())
        })
        .with_shutdown_grace(Duration::from_secs(config.shutdown_grace_secs))
        .with_closer_timeout(Duration::from_secs(10))
        .run()
        .await;
}

struct Storage {
    devices: Arc<dyn DeviceRepository>,
    credentials: Arc<dyn CredentialStore>,
}

async fn initialize_storage(config: &ServiceConfig) -> anyhow::Result<Storage> {
    let credentials = DeviceCredential::parse_list(&config.device_credentials)
        .context("Invalid GATEWAY_DEVICE_CREDENTIALS")?;

    match config.storage_backend {
        StorageBackend::Memory => {
            info!(
                credentials = credentials.len(),
                "Using in-memory device registry"
            );
            Ok(Storage {
                devices: Arc::new(InMemoryDeviceRepository::new()),
                credentials: Arc::new(InMemoryCredentialStore::new(credentials)),
            })
        }
        StorageBackend::Postgres => {
            info!("Initializing PostgreSQL...");
            let client = PostgresClient::new(
                &config.postgres_host,
                config.postgres_port,
                &config.postgres_database,
                &config.postgres_username,
                &config.postgres_password,
                config.postgres_max_pool_size,
            )?;
            tokio::time::timeout(
                Duration::from_secs(config.startup_timeout_secs),
                client.migrate(),
            )
            .await
            .context("Timed out applying PostgreSQL schema")??;

            let credential_store = PostgresCredentialStore::new(client.clone());
            for credential in credentials {
                credential_store
                    .upsert_credential(credential)
                    .await
                    .context("Failed to seed device credentials")?;
            }

            Ok(Storage {
                devices: Arc::new(PostgresDeviceRepository::new(client)),
                credentials: Arc::new(credential_store),
            })
        }
    }
}

async fn initialize_publisher(
    config: &ServiceConfig,
) -> anyhow::Result<(Arc<dyn EventPublisher>, Option<NatsClient>)> {
    match config.relay_backend {
        RelayBackend::Log => {
            info!("Relaying accepted events to the log");
            Ok((
                Arc::new(LoggingEventPublisher::new(config.nats_events_stream.clone())),
                None,
            ))
        }
        RelayBackend::Nats => {
            info!("Initializing NATS...");
            let client = NatsClient::connect(
                &config.nats_url,
                Duration::from_secs(config.startup_timeout_secs),
            )
            .await?;
            let jetstream = client.create_publisher_client();
            ensure_stream(jetstream.as_ref(), &config.nats_events_stream).await?;
            Ok((
                Arc::new(NatsEventPublisher::new(
                    jetstream,
                    config.nats_events_stream.clone(),
                )),
                Some(client),
            ))
        }
    }
}
