//! Photo storage orchestration: variant pipeline, signed URL retrieval,
//! delete consistency and the stale object sweep.

use crate::config::{CacheConfig, CleanupConfig, UploadConfig};
use crate::image_processor::{self, ProcessingError, OUTPUT_CONTENT_TYPE};
use crate::metrics_ledger::{MetricsLedger, UploadMetrics};
use crate::object_store::ObjectStore;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::url_cache::UrlCache;
use crate::variants::{self, KEY_NAMESPACE, ORIGINAL};
use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use chrono::Utc;
use futures::future;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, instrument};

/// Variant keys are content-addressed, so a stored object never changes
/// under its key and downstream caches may hold it indefinitely.
const CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Errors surfaced by the upload pipeline.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Caller asked for a variant that is not in the fixed table
    #[error("unknown photo variant: {0}")]
    UnknownVariant(String),

    /// Source bytes could not be decoded or re-encoded; never retried
    #[error(transparent)]
    Processing(#[from] ProcessingError),

    /// Storage backend failure after all retry attempts were exhausted
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Photo variant pipeline and storage-access layer.
///
/// Owns the signed URL cache and the upload metrics ledger; both are
/// lifecycle-scoped to this value rather than process globals, so each
/// instance (and each test) reasons about its own state.
pub struct PhotoStorageService {
    store: Arc<dyn ObjectStore>,
    url_cache: UrlCache,
    ledger: MetricsLedger,
    retry: RetryPolicy,
    default_url_expiry: Duration,
    cleanup_retention_days: u32,
    cleanup_concurrency: usize,
}

impl PhotoStorageService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        upload: &UploadConfig,
        cache: &CacheConfig,
        cleanup: &CleanupConfig,
    ) -> Self {
        Self {
            store,
            url_cache: UrlCache::new(cache.url_cache_margin()),
            ledger: MetricsLedger::new(cache.metrics_retention()),
            retry: RetryPolicy {
                max_attempts: upload.max_attempts,
                initial_delay: upload.initial_backoff(),
            },
            default_url_expiry: Duration::from_secs(cache.presigned_url_expiry_secs),
            cleanup_retention_days: cleanup.retention_days,
            cleanup_concurrency: cleanup.concurrency,
        }
    }

    /// Process one variant of `data` and persist it, returning the storage
    /// key. `variant` defaults to `original`.
    ///
    /// Processing runs off the async scheduler; the put is wrapped in the
    /// retry policy. On success a metrics record is appended against the
    /// returned key.
    #[instrument(skip(self, data), fields(business_id = %business_id, photo_id = %photo_id))]
    pub async fn upload_photo(
        &self,
        data: &[u8],
        business_id: &str,
        photo_id: &str,
        variant: Option<&str>,
    ) -> Result<String, UploadError> {
        let variant_name = variant.unwrap_or(ORIGINAL);
        let spec = variants::get(variant_name)
            .ok_or_else(|| UploadError::UnknownVariant(variant_name.to_string()))?;

        let started = Instant::now();

        // Image re-encoding is CPU-bound; run it off the async pool so
        // concurrent uploads and signings keep making progress.
        let source = data.to_vec();
        let processed = tokio::task::spawn_blocking(move || {
            image_processor::process_variant(&source, spec)
        })
        .await
        .map_err(|e| UploadError::Storage(anyhow!("image processing task failed: {e}")))??;

        let processing_time = started.elapsed();
        let size_bytes = processed.len() as u64;
        let body = Bytes::from(processed);

        let key = variants::object_key(business_id, photo_id, variant_name);
        let metadata = HashMap::from([
            ("business-id".to_string(), business_id.to_string()),
            ("photo-id".to_string(), photo_id.to_string()),
            ("variant".to_string(), variant_name.to_string()),
            ("processed-at".to_string(), Utc::now().to_rfc3339()),
        ]);

        let upload_started = Instant::now();
        retry_with_backoff(&self.retry, "put_object", || {
            self.store.put_object(
                &key,
                body.clone(),
                OUTPUT_CONTENT_TYPE,
                CACHE_CONTROL,
                &metadata,
            )
        })
        .await
        .map_err(|e| {
            metrics::counter!("photos.uploads.failed").increment(1);
            UploadError::Storage(e.context(format!(
                "photo upload failed: business={business_id} photo={photo_id} \
                 variant={variant_name} processing_ms={} elapsed_ms={}",
                processing_time.as_millis(),
                started.elapsed().as_millis(),
            )))
        })?;

        let upload_time = upload_started.elapsed();
        let total_time = started.elapsed();

        self.ledger.record(
            &key,
            UploadMetrics {
                processing_ms: processing_time.as_millis() as u64,
                upload_ms: upload_time.as_millis() as u64,
                total_ms: total_time.as_millis() as u64,
                size_bytes,
                variant: variant_name.to_string(),
            },
        );

        metrics::counter!("photos.uploads.completed").increment(1);
        metrics::counter!("photos.bytes.uploaded").increment(size_bytes);
        metrics::histogram!("photos.upload.duration_ms").record(total_time.as_millis() as f64);

        info!(
            key = %key,
            variant = %variant_name,
            size_bytes = size_bytes,
            total_ms = total_time.as_millis() as u64,
            "Photo variant stored"
        );

        Ok(key)
    }

    /// Run the full pipeline once per entry in the variant table,
    /// concurrently, and return the variant-to-key mapping.
    ///
    /// All five pipelines are awaited; if any fails, the first error (in
    /// table order) fails the whole call and no mapping is returned.
    /// Sibling uploads that already completed are not rolled back.
    #[instrument(skip(self, data), fields(business_id = %business_id, photo_id = %photo_id))]
    pub async fn upload_all_variants(
        &self,
        data: &[u8],
        business_id: &str,
        photo_id: &str,
    ) -> Result<HashMap<String, String>, UploadError> {
        let uploads = variants::VARIANTS.iter().map(|spec| async move {
            let key = self
                .upload_photo(data, business_id, photo_id, Some(spec.name))
                .await?;
            Ok::<_, UploadError>((spec.name.to_string(), key))
        });

        let results = future::join_all(uploads).await;

        let mut keys = HashMap::with_capacity(results.len());
        for result in results {
            let (variant, key) = result?;
            keys.insert(variant, key);
        }

        Ok(keys)
    }

    /// Return a time-limited retrieval URL for `key`, signing only on a
    /// cache miss. Signing failures propagate immediately; retrieval is
    /// caller-driven and infrequent, so there is no retry here.
    #[instrument(skip(self))]
    pub async fn get_url(&self, key: &str, expires_in: Option<Duration>) -> Result<String> {
        let expires_in = expires_in.unwrap_or(self.default_url_expiry);

        if let Some(url) = self.url_cache.get(key) {
            metrics::counter!("photos.url_cache.hits").increment(1);
            return Ok(url);
        }
        metrics::counter!("photos.url_cache.misses").increment(1);

        let url = self
            .store
            .presign_get(key, expires_in)
            .await
            .with_context(|| format!("failed to sign retrieval URL for {key}"))?;

        self.url_cache.insert(key, url.clone(), expires_in);
        Ok(url)
    }

    /// Delete the object under `key` and evict it from both the URL cache
    /// and the metrics ledger, so neither layer can serve stale data for a
    /// removed object.
    #[instrument(skip(self))]
    pub async fn delete_photo(&self, key: &str) -> Result<()> {
        self.store
            .delete_object(key)
            .await
            .with_context(|| format!("failed to delete {key}"))?;

        self.url_cache.remove(key);
        self.ledger.remove(key);

        metrics::counter!("photos.deletes.completed").increment(1);
        info!(key = %key, "Photo deleted");
        Ok(())
    }

    /// Delete every stored object whose last-modified timestamp is strictly
    /// older than `older_than_days` (default from config), returning the
    /// number removed.
    ///
    /// Deletes run concurrently through [`delete_photo`](Self::delete_photo)
    /// so the caches stay consistent. The sweep is best-effort: the first
    /// failed delete aborts it, and objects already deleted stay deleted.
    #[instrument(skip(self))]
    pub async fn cleanup_unused(&self, older_than_days: Option<u32>) -> Result<usize> {
        let retention_days = older_than_days.unwrap_or(self.cleanup_retention_days);
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));

        let objects = self
            .store
            .list_objects(KEY_NAMESPACE)
            .await
            .context("failed to list stored photos")?;

        let scanned = objects.len();
        let stale: Vec<_> = objects
            .into_iter()
            .filter(|object| object.last_modified < cutoff)
            .collect();

        let mut delete_futures = Vec::with_capacity(stale.len());
        for object in &stale {
            delete_futures.push(self.delete_photo(&object.key));
        }
        let mut deletions = stream::iter(delete_futures).buffer_unordered(self.cleanup_concurrency);

        while let Some(result) = deletions.next().await {
            result?;
        }
        drop(deletions);

        let removed = stale.len();
        metrics::counter!("photos.cleanup.removed").increment(removed as u64);
        info!(scanned, removed, retention_days, "Stale photo sweep completed");

        Ok(removed)
    }

    /// Snapshot of every upload metrics sequence still retained.
    pub fn all_metrics(&self) -> HashMap<String, Vec<UploadMetrics>> {
        self.ledger.snapshot()
    }

    /// Default signature lifetime used when a caller does not override it.
    pub fn default_url_expiry(&self) -> Duration {
        self.default_url_expiry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::StoredObject;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeObjectStore {
        put_attempts: AtomicUsize,
        stored_keys: Mutex<Vec<String>>,
        deleted_keys: Mutex<Vec<String>>,
        sign_calls: AtomicUsize,
        listing: Mutex<Vec<StoredObject>>,
        fail_next_puts: AtomicUsize,
        fail_puts_containing: Mutex<Option<String>>,
        fail_deletes_containing: Mutex<Option<String>>,
    }

    #[async_trait]
    impl ObjectStore for FakeObjectStore {
        async fn put_object(
            &self,
            key: &str,
            _body: Bytes,
            _content_type: &str,
            _cache_control: &str,
            _metadata: &HashMap<String, String>,
        ) -> Result<()> {
            self.put_attempts.fetch_add(1, Ordering::SeqCst);

            if let Some(pattern) = self.fail_puts_containing.lock().as_deref() {
                if key.contains(pattern) {
                    return Err(anyhow!("injected put failure"));
                }
            }
            if self.fail_next_puts.load(Ordering::SeqCst) > 0 {
                self.fail_next_puts.fetch_sub(1, Ordering::SeqCst);
                return Err(anyhow!("injected transient failure"));
            }

            self.stored_keys.lock().push(key.to_string());
            Ok(())
        }

        async fn delete_object(&self, key: &str) -> Result<()> {
            if let Some(pattern) = self.fail_deletes_containing.lock().as_deref() {
                if key.contains(pattern) {
                    return Err(anyhow!("injected delete failure"));
                }
            }
            self.deleted_keys.lock().push(key.to_string());
            Ok(())
        }

        async fn list_objects(&self, prefix: &str) -> Result<Vec<StoredObject>> {
            Ok(self
                .listing
                .lock()
                .iter()
                .filter(|object| object.key.starts_with(prefix))
                .cloned()
                .collect())
        }

        async fn presign_get(&self, key: &str, _expires_in: Duration) -> Result<String> {
            let n = self.sign_calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("https://signed.example/{key}?sig={n}"))
        }
    }

    fn service(store: Arc<FakeObjectStore>) -> PhotoStorageService {
        let upload = UploadConfig {
            max_attempts: 3,
            initial_backoff_ms: 10,
        };
        PhotoStorageService::new(
            store,
            &upload,
            &CacheConfig::default(),
            &CleanupConfig::default(),
        )
    }

    fn tiny_jpeg() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([10, 20, 30]));
        let mut bytes = Vec::new();
        image::codecs::jpeg::JpegEncoder::new(&mut bytes)
            .encode_image(&img)
            .unwrap();
        bytes
    }

    #[tokio::test]
    async fn test_upload_returns_deterministic_key_and_records_metrics() {
        let store = Arc::new(FakeObjectStore::default());
        let svc = service(store.clone());

        let key = svc
            .upload_photo(&tiny_jpeg(), "b1", "p1", Some("thumbnail"))
            .await
            .unwrap();

        assert_eq!(key, "businesses/b1/photos/p1-thumbnail.jpg");
        assert_eq!(store.put_attempts.load(Ordering::SeqCst), 1);

        let metrics = svc.all_metrics();
        assert_eq!(metrics[&key].len(), 1);
        assert_eq!(metrics[&key][0].variant, "thumbnail");
        assert!(metrics[&key][0].size_bytes > 0);
    }

    #[tokio::test]
    async fn test_upload_defaults_to_original_variant() {
        let store = Arc::new(FakeObjectStore::default());
        let svc = service(store.clone());

        let key = svc.upload_photo(&tiny_jpeg(), "b1", "p1", None).await.unwrap();

        assert_eq!(key, "businesses/b1/photos/p1.jpg");
    }

    #[tokio::test]
    async fn test_unknown_variant_fails_before_any_backend_call() {
        let store = Arc::new(FakeObjectStore::default());
        let svc = service(store.clone());

        let err = svc
            .upload_photo(&tiny_jpeg(), "b1", "p1", Some("poster"))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::UnknownVariant(ref name) if name == "poster"));
        assert_eq!(store.put_attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_image_fails_without_retries() {
        let store = Arc::new(FakeObjectStore::default());
        let svc = service(store.clone());

        let err = svc
            .upload_photo(&[0xde, 0xad, 0xbe, 0xef], "b1", "p1", Some("small"))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Processing(_)));
        assert_eq!(store.put_attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_put_failures_are_retried() {
        let store = Arc::new(FakeObjectStore::default());
        store.fail_next_puts.store(2, Ordering::SeqCst);
        let svc = service(store.clone());

        let key = svc
            .upload_photo(&tiny_jpeg(), "b1", "p1", Some("medium"))
            .await
            .unwrap();

        assert_eq!(key, "businesses/b1/photos/p1-medium.jpg");
        assert_eq!(store.put_attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_propagate_storage_error() {
        let store = Arc::new(FakeObjectStore::default());
        store.fail_next_puts.store(usize::MAX, Ordering::SeqCst);
        let svc = service(store.clone());

        let err = svc
            .upload_photo(&tiny_jpeg(), "b1", "p1", Some("medium"))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Storage(_)));
        assert_eq!(store.put_attempts.load(Ordering::SeqCst), 3);
        // Context carries the identifying fields for the route layer's logs
        let message = format!("{:#}", anyhow::Error::from(err));
        assert!(message.contains("business=b1"));
        assert!(message.contains("variant=medium"));
    }

    #[tokio::test]
    async fn test_upload_all_variants_yields_one_key_per_variant() {
        let store = Arc::new(FakeObjectStore::default());
        let svc = service(store.clone());

        let keys = svc
            .upload_all_variants(&tiny_jpeg(), "b1", "p1")
            .await
            .unwrap();

        assert_eq!(keys.len(), variants::VARIANTS.len());
        assert_eq!(keys["thumbnail"], "businesses/b1/photos/p1-thumbnail.jpg");
        assert_eq!(keys["original"], "businesses/b1/photos/p1.jpg");
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_all_variants_fails_when_any_variant_fails() {
        let store = Arc::new(FakeObjectStore::default());
        *store.fail_puts_containing.lock() = Some("-medium".to_string());
        let svc = service(store.clone());

        let result = svc.upload_all_variants(&tiny_jpeg(), "b1", "p1").await;

        assert!(matches!(result, Err(UploadError::Storage(_))));
        // Completed siblings are not rolled back
        let stored = store.stored_keys.lock();
        assert!(stored.iter().any(|k| k.ends_with("p1-thumbnail.jpg")));
        assert!(!stored.iter().any(|k| k.ends_with("p1-medium.jpg")));
    }

    #[tokio::test]
    async fn test_get_url_signs_once_within_cache_ttl() {
        let store = Arc::new(FakeObjectStore::default());
        let svc = service(store.clone());

        let first = svc.get_url("businesses/b1/photos/p1.jpg", None).await.unwrap();
        let second = svc.get_url("businesses/b1/photos/p1.jpg", None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.sign_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_url_resigns_after_cache_ttl_elapses() {
        let store = Arc::new(FakeObjectStore::default());
        let svc = service(store.clone());

        let first = svc.get_url("businesses/b1/photos/p1.jpg", None).await.unwrap();

        // Local TTL is the 3600s signature lifetime minus the 60s margin
        tokio::time::advance(Duration::from_secs(3541)).await;
        let second = svc.get_url("businesses/b1/photos/p1.jpg", None).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(store.sign_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_delete_evicts_url_cache_and_metrics() {
        let store = Arc::new(FakeObjectStore::default());
        let svc = service(store.clone());

        let key = svc
            .upload_photo(&tiny_jpeg(), "b1", "p1", Some("small"))
            .await
            .unwrap();
        let cached = svc.get_url(&key, None).await.unwrap();

        svc.delete_photo(&key).await.unwrap();

        assert!(svc.all_metrics().is_empty());
        assert_eq!(*store.deleted_keys.lock(), vec![key.clone()]);

        // A later lookup must re-sign rather than serve the stale entry
        let resigned = svc.get_url(&key, None).await.unwrap();
        assert_ne!(cached, resigned);
        assert_eq!(store.sign_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_objects_older_than_cutoff() {
        let store = Arc::new(FakeObjectStore::default());
        *store.listing.lock() = vec![
            StoredObject {
                key: "businesses/b1/photos/old.jpg".to_string(),
                last_modified: Utc::now() - chrono::Duration::days(45),
            },
            StoredObject {
                key: "businesses/b1/photos/recent.jpg".to_string(),
                last_modified: Utc::now() - chrono::Duration::days(2),
            },
        ];
        let svc = service(store.clone());

        let removed = svc.cleanup_unused(Some(30)).await.unwrap();

        assert_eq!(removed, 1);
        assert_eq!(
            *store.deleted_keys.lock(),
            vec!["businesses/b1/photos/old.jpg".to_string()]
        );
    }

    #[tokio::test]
    async fn test_cleanup_failure_surfaces_as_overall_failure() {
        let store = Arc::new(FakeObjectStore::default());
        *store.listing.lock() = vec![StoredObject {
            key: "businesses/b1/photos/old.jpg".to_string(),
            last_modified: Utc::now() - chrono::Duration::days(45),
        }];
        *store.fail_deletes_containing.lock() = Some("old".to_string());
        let svc = service(store.clone());

        assert!(svc.cleanup_unused(Some(30)).await.is_err());
    }
}
