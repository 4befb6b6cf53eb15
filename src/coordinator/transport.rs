//! Coordinator -> renter shard transport
//!
//! [`ShardTransport`] is the seam between the control plane and the renters.
//! [`HttpRenterClient`] speaks the renter HTTP API; tests plug in an
//! in-memory implementation.

use crate::common::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Identity of a shard on a renter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardKey {
    pub internal_id: String,
    pub index: u32,
}

impl ShardKey {
    pub fn new(internal_id: impl Into<String>, index: u32) -> Self {
        Self {
            internal_id: internal_id.into(),
            index,
        }
    }

    /// Path of this shard on the renter API
    pub fn path(&self) -> String {
        format!("/shards/{}/{}", self.internal_id, self.index)
    }
}

impl std::fmt::Display for ShardKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.internal_id, self.index)
    }
}

#[async_trait]
pub trait ShardTransport: Send + Sync + 'static {
    async fn store_shard(&self, address: &str, key: &ShardKey, data: Bytes) -> Result<()>;

    async fn fetch_shard(&self, address: &str, key: &ShardKey) -> Result<Bytes>;

    /// Deleting a shard the renter does not have succeeds.
    async fn delete_shard(&self, address: &str, key: &ShardKey) -> Result<()>;
}

/// HTTP client for renter nodes
#[derive(Clone)]
pub struct HttpRenterClient {
    client: reqwest::Client,
}

impl HttpRenterClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    fn url(address: &str, key: &ShardKey) -> String {
        format!("{}{}", address.trim_end_matches('/'), key.path())
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(Error::Renter {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ShardTransport for HttpRenterClient {
    async fn store_shard(&self, address: &str, key: &ShardKey, data: Bytes) -> Result<()> {
        let response = self
            .client
            .put(Self::url(address, key))
            .body(data)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn fetch_shard(&self, address: &str, key: &ShardKey) -> Result<Bytes> {
        let response = self.client.get(Self::url(address, key)).send().await?;
        let response = Self::check(response).await?;
        Ok(response.bytes().await?)
    }

    async fn delete_shard(&self, address: &str, key: &ShardKey) -> Result<()> {
        let response = self.client.delete(Self::url(address, key)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_url() {
        let key = ShardKey::new("9b2e", 3);
        assert_eq!(key.path(), "/shards/9b2e/3");
        assert_eq!(
            HttpRenterClient::url("http://10.0.0.5:8001/", &key),
            "http://10.0.0.5:8001/shards/9b2e/3"
        );
        assert_eq!(key.to_string(), "9b2e#3");
    }
}
