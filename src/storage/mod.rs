/// Cloud Storage Backend
///
/// This module defines the seam between the tool handlers and the object store:
/// - mod.rs: the `StorageBackend` trait, value types, and `StorageError`
/// - auth.rs: ambient credential discovery and access-token caching
/// - gcs.rs: the Google Cloud Storage JSON API client
/// - signing.rs: V4 signed URL generation
///
/// Handlers only ever see `StorageError`; raw HTTP or credential errors are
/// folded into its variants by the client.

pub mod auth;
#[cfg(test)]
pub mod fake_server;
pub mod gcs;
#[cfg(test)]
pub mod memory;
pub mod signing;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Errors reported by a storage backend.
///
/// The variants mirror the distinguishable categories of the Cloud Storage
/// API. Handlers translate them into tool-level errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    /// The active credentials cannot produce URL signatures.
    #[error("signing unavailable: {0}")]
    SigningUnavailable(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("unexpected response (HTTP {status}): {message}")]
    Unexpected { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Bucket metadata as returned by the backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BucketInfo {
    pub id: String,
    pub name: String,
    pub location: Option<String>,
    pub storage_class: Option<String>,
    pub time_created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub versioning_enabled: bool,
    pub labels: BTreeMap<String, String>,
    pub cors: Vec<CorsRule>,
}

/// Object metadata as returned by the backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectInfo {
    pub name: String,
    pub bucket: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub updated: Option<DateTime<Utc>>,
    pub storage_class: Option<String>,
    pub crc32c: Option<String>,
    pub md5_hash: Option<String>,
}

/// A single CORS rule in the Cloud Storage JSON representation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CorsRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub origin: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub method: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_header: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_seconds: Option<i64>,
}

/// Operations the tool handlers need from an object store.
///
/// Implementations must be safe to share across worker threads; the server
/// constructs one instance at startup and hands out `Arc` clones.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, StorageError>;

    async fn create_bucket(&self, name: &str, location: &str) -> Result<BucketInfo, StorageError>;

    /// Deletes an empty bucket. A non-empty bucket yields `Conflict`.
    async fn delete_bucket(&self, name: &str) -> Result<(), StorageError>;

    async fn get_bucket(&self, name: &str) -> Result<BucketInfo, StorageError>;

    async fn set_bucket_cors(&self, name: &str, rules: &[CorsRule]) -> Result<BucketInfo, StorageError>;

    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectInfo>, StorageError>;

    async fn upload_object(
        &self,
        bucket: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<ObjectInfo, StorageError>;

    async fn download_object(&self, bucket: &str, name: &str) -> Result<Bytes, StorageError>;

    async fn delete_object(&self, bucket: &str, name: &str) -> Result<(), StorageError>;

    async fn get_object(&self, bucket: &str, name: &str) -> Result<ObjectInfo, StorageError>;

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_name: &str,
        destination_bucket: &str,
        destination_name: &str,
    ) -> Result<ObjectInfo, StorageError>;

    /// Produces a time-limited GET URL for an object. Does not check that the
    /// object exists.
    async fn signed_url(&self, bucket: &str, name: &str, expires_in: Duration) -> Result<String, StorageError>;
}
