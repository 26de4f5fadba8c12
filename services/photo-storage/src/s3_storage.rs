//! S3-backed implementation of the object store boundary.

use crate::config::S3Config;
use crate::object_store::{ObjectStore, StoredObject};
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::{ByteStream, DateTime as S3DateTime};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Photo object store backed by S3 (or an S3-compatible backend such as
/// MinIO via a custom endpoint).
pub struct S3PhotoStore {
    client: S3Client,
    bucket: String,
}

impl S3PhotoStore {
    /// Create a new S3 photo store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let s3_config = s3_config_builder.build();
        let client = S3Client::from_conf(s3_config);

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 photo store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3PhotoStore {
    #[instrument(skip(self, body, metadata), fields(key = %key, size_bytes = body.len()))]
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        cache_control: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .cache_control(cache_control);

        for (name, value) in metadata {
            request = request.metadata(name, value);
        }

        request
            .send()
            .await
            .context("Failed to upload photo to S3")?;

        debug!(key = %key, "Photo uploaded to S3");
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("Failed to delete photo from S3")?;

        debug!(key = %key, "Photo deleted from S3");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_objects(&self, prefix: &str) -> Result<Vec<StoredObject>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .context("Failed to list stored photos")?;

            for object in response.contents() {
                let (Some(key), Some(modified)) = (object.key(), object.last_modified()) else {
                    continue;
                };
                let Some(last_modified) = to_utc(modified) else {
                    continue;
                };
                objects.push(StoredObject {
                    key: key.to_string(),
                    last_modified,
                });
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated() == Some(true) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(objects)
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String> {
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .context("Failed to create presigning config")?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .context("Failed to generate presigned URL")?;

        Ok(presigned.uri().to_string())
    }
}

/// Convert an S3 last-modified timestamp to chrono UTC.
fn to_utc(timestamp: &S3DateTime) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(timestamp.secs(), timestamp.subsec_nanos())
        .single()
}
