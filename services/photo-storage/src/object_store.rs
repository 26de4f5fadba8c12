//! Durable object store boundary.
//!
//! The service talks to storage exclusively through this trait so the
//! backend can be swapped for an in-memory fake in tests. The production
//! implementation is [`S3PhotoStore`](crate::s3_storage::S3PhotoStore).

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// A stored object as returned by a namespace listing.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

/// Minimal surface the service needs from durable object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Persist `body` under `key`, overwriting any prior object. Each call
    /// is a complete independent put; a failed call leaves no partial
    /// object behind.
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        cache_control: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()>;

    /// Delete the object under `key`.
    async fn delete_object(&self, key: &str) -> Result<()>;

    /// List every object under `prefix` with its last-modified timestamp.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<StoredObject>>;

    /// Produce a time-limited retrieval URL for `key`, valid for
    /// `expires_in`.
    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String>;
}
