//! logstream broker entry point.
//!
//! All configuration is via environment variables:
//!
//! - `LOGSTREAM_ADDR`: bind address (default: 127.0.0.1:1234)
//! - `LOGSTREAM_LOG_DIR`: log root directory (default: ./data/logs)
//! - `LOGSTREAM_RETENTION_MS`: segment retention (default: 5h)
//! - `LOGSTREAM_SEGMENT_MAX_BYTES`: segment size cap (default: 10MB)
//! - `LOGSTREAM_LINGER_MS`: dispatch batch linger (default: 10ms)
//! - `LOGSTREAM_PUBLISH_CHECKSUMS`: `0` disables PUB checksum trailers
//!
//! Logging is controlled via `RUST_LOG` (default: info).

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use logstream_broker::{Broker, BrokerConfig};
use logstream_storage::{LogStore, MaintenanceTasks, OffsetStore, StorageConfig};

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, target: &mut T) -> anyhow::Result<()> {
    if let Ok(value) = std::env::var(name) {
        *target = value
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid value for {name}: {value:?}"))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut storage = StorageConfig::new(env_or("LOGSTREAM_LOG_DIR", "./data/logs"));
    env_parse("LOGSTREAM_RETENTION_MS", &mut storage.retention_ms)?;
    env_parse("LOGSTREAM_SEGMENT_MAX_BYTES", &mut storage.segment_max_bytes)?;

    let mut config = BrokerConfig {
        bind_addr: env_or("LOGSTREAM_ADDR", "127.0.0.1:1234"),
        ..Default::default()
    };
    env_parse("LOGSTREAM_LINGER_MS", &mut config.linger_ms)?;
    if env_or("LOGSTREAM_PUBLISH_CHECKSUMS", "1") == "0" {
        config.publish_checksums = false;
    }

    info!(dir = %storage.log_dir.display(), "opening log store");
    let log = Arc::new(LogStore::open(storage).context("opening log store")?);
    let offsets = Arc::new(OffsetStore::load(log.clone()));
    let maintenance = MaintenanceTasks::spawn(log.clone());

    let broker = Broker::bind(config, log.clone(), offsets)
        .await
        .context("binding broker")?;

    tokio::select! {
        result = broker.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("received ctrl-c, shutting down"),
    }

    maintenance.shutdown().await;
    log.flush_all().await;
    Ok(())
}
