//! Containerized Redis for the Redis desired-state source

use redis::{AsyncCommands, Client};
use std::time::Duration;
use testcontainers::{
    core::{ContainerPort, WaitFor},
    runners::AsyncRunner,
    GenericImage,
};

/// Redis test environment with containerized Redis instance
pub struct RedisTestEnv {
    _container: testcontainers::ContainerAsync<GenericImage>,
    pub client: Client,
    pub host: String,
    pub port: u16,
}

impl RedisTestEnv {
    /// Start a new Redis container for testing
    ///
    /// # Errors
    /// Returns error if container fails to start or client connection fails
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let container = GenericImage::new("redis", "7-alpine")
            .with_exposed_port(ContainerPort::Tcp(6379))
            .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
            .start()
            .await?;

        let host = container.get_host().await?.to_string();
        let port = container.get_host_port_ipv4(6379).await?;

        let client = Client::open(format!("redis://{}:{}", host, port))?;

        for _ in 0..5 {
            match client.get_connection_with_timeout(Duration::from_secs(1)) {
                Ok(_) => break,
                Err(_) => tokio::time::sleep(Duration::from_millis(200)).await,
            }
        }

        Ok(Self {
            _container: container,
            client,
            host,
            port,
        })
    }

    /// Get an async Redis connection
    pub async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    /// Write one desired object hash under `table|kind|namespace|name`
    pub async fn put_desired(
        &self,
        table: &str,
        kind: &str,
        namespace: &str,
        name: &str,
        fields: &[(&str, &str)],
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.connection().await?;
        let key = format!("{}|{}|{}|{}", table, kind, namespace, name);
        conn.hset_multiple(key, fields).await
    }

    /// Delete one desired object hash
    pub async fn remove_desired(
        &self,
        table: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.connection().await?;
        conn.del(format!("{}|{}|{}|{}", table, kind, namespace, name))
            .await
    }

    /// Flush all keys from all databases
    pub async fn flush_all(&self) -> Result<(), redis::RedisError> {
        let mut conn = self.connection().await?;
        redis::cmd("FLUSHALL").query_async::<()>(&mut conn).await
    }
}
