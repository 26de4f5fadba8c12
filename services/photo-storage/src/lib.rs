//! Storefront Photo Storage Service
//!
//! Photo variant processing and storage service for the Storefront business
//! directory platform. This service accepts raw image uploads for business
//! listings, derives a fixed set of resolution/quality variants, stores each
//! under a deterministic S3 key, serves time-limited signed retrieval URLs,
//! and sweeps stale objects on a schedule.
//!
//! ## Features
//!
//! - **Variant Pipeline**: Five canonical renditions (thumbnail through
//!   original) derived per upload, resized to fit without upscaling and
//!   re-encoded as progressive JPEG at full chroma resolution
//! - **Retry-Protected Storage**: Puts wrapped in bounded exponential
//!   backoff; deterministic keys make re-uploads idempotent overwrites
//! - **Signed URL Cache**: Presigned GET URLs cached with a safety margin so
//!   a cached URL always outlives its consumer, never its signature
//! - **Upload Metrics Ledger**: Per-key timing/size records retained for a
//!   bounded window, exposed for diagnostics
//! - **Stale Object Sweeper**: Periodic deletion of objects past retention,
//!   kept consistent with the in-process caches
//!
//! ## Architecture
//!
//! ```text
//! HTTP Upload                 S3 Bucket
//! ┌──────────────┐           ┌──────────────────┐
//! │ Photo        │           │ businesses/      │
//! │ API          │──────────▶│   {business}/    │
//! └──────────────┘           │     photos/      │
//!        │                   │       {photo}-*  │
//!        ▼                   └──────────────────┘
//! ┌──────────────┐                  ▲      │
//! │ Variant      │                  │      │
//! │ Processor    │                  │      ▼
//! └──────────────┘           ┌──────────────┐
//!        │                   │ URL Signer   │
//!        ▼                   │ & Cache      │
//! ┌──────────────┐           └──────────────┘
//! │ Retrying     │           ┌──────────────┐
//! │ Uploader     │──────────▶│ Metrics      │
//! └──────────────┘           │ Ledger       │
//!        │                   └──────────────┘
//!        ▼
//! ┌──────────────┐
//! │ Cleanup      │
//! │ Sweeper      │
//! └──────────────┘
//! ```

pub mod config;
pub mod http_api;
pub mod image_processor;
pub mod metrics_ledger;
pub mod object_store;
pub mod retry;
pub mod s3_storage;
pub mod service;
pub mod url_cache;
pub mod variants;

pub use config::Config;
pub use http_api::AppState;
pub use image_processor::ProcessingError;
pub use metrics_ledger::{MetricsLedger, UploadMetrics};
pub use object_store::{ObjectStore, StoredObject};
pub use retry::RetryPolicy;
pub use s3_storage::S3PhotoStore;
pub use service::{PhotoStorageService, UploadError};
pub use url_cache::UrlCache;
pub use variants::{VariantSpec, VARIANTS};
