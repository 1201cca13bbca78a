/// Google Cloud Storage JSON API Client
///
/// A small reqwest-based client covering the bucket and object calls the tools
/// need. One instance is built at startup and shared by every request; the
/// underlying `reqwest::Client` pools connections and the token provider caches
/// credentials.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::OnceCell;

use super::auth::{Credentials, TokenProvider};
use super::{BucketInfo, CorsRule, ObjectInfo, StorageBackend, StorageError};

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Settings for constructing a [`GcsClient`].
#[derive(Debug, Clone)]
pub struct GcsOptions {
    /// Project used for listing and creating buckets.
    pub project: Option<String>,
    /// `host:port` (or URL) of a storage emulator. Disables authentication.
    pub emulator_host: Option<String>,
    /// Upper bound on each backend request.
    pub request_timeout: Duration,
}

impl Default for GcsOptions {
    fn default() -> Self {
        Self {
            project: None,
            emulator_host: None,
            request_timeout: Duration::from_secs(60),
        }
    }
}

pub struct GcsClient {
    http: reqwest::Client,
    endpoint: String,
    tokens: TokenProvider,
    configured_project: Option<String>,
    project: OnceCell<String>,
    request_timeout: Duration,
}

impl GcsClient {
    /// Build a client using ambient credentials, or anonymous access when an
    /// emulator host is configured.
    pub fn new(options: GcsOptions) -> Result<Self, StorageError> {
        let credentials = match options.emulator_host {
            Some(_) => Credentials::Anonymous,
            None => Credentials::discover()?,
        };
        Self::with_credentials(options, credentials)
    }

    pub fn with_credentials(options: GcsOptions, credentials: Credentials) -> Result<Self, StorageError> {
        let http = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let endpoint = match options.emulator_host.as_deref() {
            Some(host) if host.starts_with("http://") || host.starts_with("https://") => {
                host.trim_end_matches('/').to_string()
            }
            Some(host) => format!("http://{}", host.trim_end_matches('/')),
            None => DEFAULT_ENDPOINT.to_string(),
        };

        let configured_project = options
            .project
            .or_else(|| credentials.project_id().map(str::to_string));

        tracing::info!(
            %endpoint,
            project = configured_project.as_deref().unwrap_or("<metadata server>"),
            "storage client configured"
        );

        Ok(Self {
            tokens: TokenProvider::new(credentials, http.clone()),
            http,
            endpoint,
            configured_project,
            project: OnceCell::new(),
            request_timeout: options.request_timeout,
        })
    }

    async fn project(&self) -> Result<&str, StorageError> {
        self.project
            .get_or_try_init(|| async {
                match &self.configured_project {
                    Some(project) => Ok(project.clone()),
                    None => self.tokens.metadata_project_id(self.request_timeout).await,
                }
            })
            .await
            .map(String::as_str)
    }

    fn bucket_url(&self, bucket: &str) -> String {
        format!("{}/storage/v1/b/{}", self.endpoint, urlencoding::encode(bucket))
    }

    fn object_url(&self, bucket: &str, object: &str) -> String {
        format!("{}/o/{}", self.bucket_url(bucket), urlencoding::encode(object))
    }

    /// Attach credentials, send, and map non-2xx responses to `StorageError`.
    async fn send(&self, request: RequestBuilder) -> Result<Response, StorageError> {
        let request = match self.tokens.token().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(error_from_response(response).await)
    }

    /// Fetch every page of a list endpoint.
    async fn list_all<T>(&self, url: String, base_query: &[(&str, &str)]) -> Result<Vec<T>, StorageError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self.http.get(&url).query(base_query);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let page: ListPage<T> = self.send(request).await?.json().await?;
            items.extend(page.items);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl StorageBackend for GcsClient {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, StorageError> {
        let project = self.project().await?;
        let url = format!("{}/storage/v1/b", self.endpoint);
        let buckets: Vec<WireBucket> = self.list_all(url, &[("project", project)]).await?;
        Ok(buckets.into_iter().map(BucketInfo::from).collect())
    }

    async fn create_bucket(&self, name: &str, location: &str) -> Result<BucketInfo, StorageError> {
        let project = self.project().await?;
        let request = self
            .http
            .post(format!("{}/storage/v1/b", self.endpoint))
            .query(&[("project", project)])
            .json(&serde_json::json!({ "name": name, "location": location }));
        let bucket: WireBucket = self.send(request).await?.json().await?;
        Ok(bucket.into())
    }

    async fn delete_bucket(&self, name: &str) -> Result<(), StorageError> {
        self.send(self.http.delete(self.bucket_url(name))).await?;
        Ok(())
    }

    async fn get_bucket(&self, name: &str) -> Result<BucketInfo, StorageError> {
        let bucket: WireBucket = self.send(self.http.get(self.bucket_url(name))).await?.json().await?;
        Ok(bucket.into())
    }

    async fn set_bucket_cors(&self, name: &str, rules: &[CorsRule]) -> Result<BucketInfo, StorageError> {
        let request = self
            .http
            .patch(self.bucket_url(name))
            .json(&serde_json::json!({ "cors": rules }));
        let bucket: WireBucket = self.send(request).await?.json().await?;
        Ok(bucket.into())
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        let url = format!("{}/o", self.bucket_url(bucket));
        let objects: Vec<WireObject> = self.list_all(url, &[]).await?;
        Ok(objects.into_iter().map(ObjectInfo::from).collect())
    }

    async fn upload_object(
        &self,
        bucket: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<ObjectInfo, StorageError> {
        let request = self
            .http
            .post(format!(
                "{}/upload/storage/v1/b/{}/o",
                self.endpoint,
                urlencoding::encode(bucket)
            ))
            .query(&[("uploadType", "media"), ("name", name)])
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data);
        let object: WireObject = self.send(request).await?.json().await?;
        Ok(object.into())
    }

    async fn download_object(&self, bucket: &str, name: &str) -> Result<Bytes, StorageError> {
        let request = self.http.get(self.object_url(bucket, name)).query(&[("alt", "media")]);
        Ok(self.send(request).await?.bytes().await?)
    }

    async fn delete_object(&self, bucket: &str, name: &str) -> Result<(), StorageError> {
        self.send(self.http.delete(self.object_url(bucket, name))).await?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, name: &str) -> Result<ObjectInfo, StorageError> {
        let object: WireObject = self.send(self.http.get(self.object_url(bucket, name))).await?.json().await?;
        Ok(object.into())
    }

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_name: &str,
        destination_bucket: &str,
        destination_name: &str,
    ) -> Result<ObjectInfo, StorageError> {
        let url = format!(
            "{}/copyTo/b/{}/o/{}",
            self.object_url(source_bucket, source_name),
            urlencoding::encode(destination_bucket),
            urlencoding::encode(destination_name)
        );
        let request = self.http.post(url).json(&serde_json::json!({}));
        let object: WireObject = self.send(request).await?.json().await?;
        Ok(object.into())
    }

    async fn signed_url(&self, bucket: &str, name: &str, expires_in: Duration) -> Result<String, StorageError> {
        let signer = self.tokens.credentials().url_signer()?;
        tracing::debug!(signer = signer.client_email(), bucket, object = name, "signing URL");
        signer.sign_get(bucket, name, expires_in, Utc::now())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

async fn error_from_response(response: Response) -> StorageError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            if body.is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                body
            }
        });
    classify(status, message)
}

fn classify(status: StatusCode, message: String) -> StorageError {
    match status {
        StatusCode::NOT_FOUND => StorageError::NotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StorageError::Forbidden(message),
        StatusCode::CONFLICT => StorageError::Conflict(message),
        StatusCode::BAD_REQUEST => StorageError::BadRequest(message),
        StatusCode::PRECONDITION_FAILED => StorageError::PreconditionFailed(message),
        other => StorageError::Unexpected {
            status: other.as_u16(),
            message,
        },
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBucket {
    #[serde(default)]
    id: String,
    name: String,
    location: Option<String>,
    storage_class: Option<String>,
    time_created: Option<DateTime<Utc>>,
    updated: Option<DateTime<Utc>>,
    versioning: Option<WireVersioning>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    cors: Vec<CorsRule>,
}

#[derive(Deserialize)]
struct WireVersioning {
    #[serde(default)]
    enabled: bool,
}

impl From<WireBucket> for BucketInfo {
    fn from(b: WireBucket) -> Self {
        BucketInfo {
            id: b.id,
            name: b.name,
            location: b.location,
            storage_class: b.storage_class,
            time_created: b.time_created,
            updated: b.updated,
            versioning_enabled: b.versioning.is_some_and(|v| v.enabled),
            labels: b.labels,
            cors: b.cors,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireObject {
    name: String,
    bucket: String,
    /// Sizes are transmitted as decimal strings.
    size: Option<String>,
    content_type: Option<String>,
    updated: Option<DateTime<Utc>>,
    storage_class: Option<String>,
    crc32c: Option<String>,
    md5_hash: Option<String>,
}

impl From<WireObject> for ObjectInfo {
    fn from(o: WireObject) -> Self {
        ObjectInfo {
            name: o.name,
            bucket: o.bucket,
            size: o.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            content_type: o.content_type,
            updated: o.updated,
            storage_class: o.storage_class,
            crc32c: o.crc32c,
            md5_hash: o.md5_hash,
        }
    }
}
