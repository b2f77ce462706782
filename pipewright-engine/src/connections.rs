//! Connection resolution boundary
//!
//! Extractor and loader modules reference connections by an opaque string.
//! Resolution to decrypted parameters happens outside this core, behind the
//! [`ConnectionResolver`] trait. Nothing here ever decrypts anything.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

/// Decrypted connection parameters handed back by the credential service
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionParams {
    pub base_url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Error)]
#[error("connection `{0}` cannot be resolved")]
pub struct UnknownConnection(pub String);

/// Opaque reference to decrypted connection parameters
#[async_trait]
pub trait ConnectionResolver: Send + Sync {
    async fn resolve(&self, reference: &str) -> Result<ConnectionParams, UnknownConnection>;
}

/// In-memory resolver for tests and single-process deployments
#[derive(Debug, Default)]
pub struct StaticResolver {
    connections: HashMap<String, ConnectionParams>,
}

impl StaticResolver {
    pub fn new(connections: HashMap<String, ConnectionParams>) -> Self {
        Self { connections }
    }

    /// Parse a `{"ref": {"base_url": ..., "headers": {...}}}` JSON map.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(raw)?))
    }
}

#[async_trait]
impl ConnectionResolver for StaticResolver {
    async fn resolve(&self, reference: &str) -> Result<ConnectionParams, UnknownConnection> {
        self.connections
            .get(reference)
            .cloned()
            .ok_or_else(|| UnknownConnection(reference.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticResolver::from_json(
            r#"{"warehouse": {"base_url": "http://wh:9000", "headers": {"x-token": "t"}}}"#,
        )
        .unwrap();

        let params = resolver.resolve("warehouse").await.unwrap();
        assert_eq!(params.base_url, "http://wh:9000");
        assert_eq!(params.headers.get("x-token").map(String::as_str), Some("t"));

        assert!(resolver.resolve("missing").await.is_err());
    }
}
