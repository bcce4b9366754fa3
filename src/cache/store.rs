use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tokio::time::timeout;
use tracing::info;

use super::applier::ApplyError;
use crate::config::CacheConfig;
use crate::Error;

/// The key-value protocol the applier writes through. Implementations must
/// make both operations unconditional so that re-application converges.
#[async_trait]
pub trait CacheStore: Send + 'static {
    async fn set(&mut self, key: &str, value: &str) -> Result<(), ApplyError>;

    /// Deleting an absent key is a success, not an error.
    async fn delete(&mut self, key: &str) -> Result<(), ApplyError>;
}

/// Redis-backed store.
///
/// Wraps a [`ConnectionManager`], which multiplexes and reconnects under the
/// hood; clones share the underlying connection, so one store can be handed
/// to every partition worker.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    operation_timeout: Duration,
}

impl RedisStore {
    pub async fn connect(config: &CacheConfig) -> crate::Result<Self> {
        let client = redis::Client::open(config.url())?;

        let conn = timeout(config.connect_timeout(), ConnectionManager::new(client))
            .await
            .map_err(|_| Error::Timeout {
                message: format!(
                    "connecting to cache at {}:{} after {:?}",
                    config.host,
                    config.port,
                    config.connect_timeout()
                ),
            })??;

        info!(host = %config.host, port = config.port, tls = config.tls, "Connected to cache");

        Ok(Self {
            conn,
            operation_timeout: config.operation_timeout(),
        })
    }

    async fn run_command(&mut self, cmd: redis::Cmd, label: &str) -> Result<(), ApplyError> {
        match timeout(self.operation_timeout, cmd.query_async::<_, ()>(&mut self.conn)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ApplyError::CacheUnavailable(e.to_string())),
            Err(_) => Err(ApplyError::CacheUnavailable(format!(
                "{} timed out after {:?}",
                label, self.operation_timeout
            ))),
        }
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn set(&mut self, key: &str, value: &str) -> Result<(), ApplyError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        self.run_command(cmd, "SET").await
    }

    async fn delete(&mut self, key: &str) -> Result<(), ApplyError> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        self.run_command(cmd, "DEL").await
    }
}
