/// In-memory storage backend used by the tool and dispatcher tests.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;

use super::signing::UrlSigner;
use super::{BucketInfo, CorsRule, ObjectInfo, StorageBackend, StorageError};

#[derive(Default)]
struct MemoryBucket {
    info: BucketInfo,
    objects: BTreeMap<String, (ObjectInfo, Bytes)>,
}

#[derive(Default)]
pub struct MemoryStorage {
    buckets: Mutex<BTreeMap<String, MemoryBucket>>,
    signer: Option<UrlSigner>,
    /// Buckets for which every call fails with `Forbidden`.
    forbidden: Vec<String>,
    /// Project-wide denial for calls that are not scoped to a bucket.
    forbidden_project: bool,
    /// Objects under a hold; deleting them fails with `Forbidden`.
    held: Vec<(String, String)>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signer(mut self, signer: UrlSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_forbidden_bucket(mut self, bucket: &str) -> Self {
        self.forbidden.push(bucket.to_string());
        self
    }

    pub fn with_forbidden_project(mut self) -> Self {
        self.forbidden_project = true;
        self
    }

    pub fn with_held_object(mut self, bucket: &str, name: &str, data: &[u8]) -> Self {
        self.held.push((bucket.to_string(), name.to_string()));
        self.with_object(bucket, name, data)
    }

    pub fn with_object(self, bucket: &str, name: &str, data: &[u8]) -> Self {
        {
            let mut buckets = self.buckets.lock().unwrap();
            let entry = buckets
                .entry(bucket.to_string())
                .or_insert_with(|| MemoryBucket {
                    info: new_bucket(bucket, "US"),
                    objects: BTreeMap::new(),
                });
            let object = new_object(bucket, name, data.len(), "application/octet-stream");
            entry
                .objects
                .insert(name.to_string(), (object, Bytes::copy_from_slice(data)));
        }
        self
    }

    pub fn with_bucket(self, bucket: &str) -> Self {
        self.buckets
            .lock()
            .unwrap()
            .entry(bucket.to_string())
            .or_insert_with(|| MemoryBucket {
                info: new_bucket(bucket, "US"),
                objects: BTreeMap::new(),
            });
        self
    }

    pub fn object_names(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .map(|b| b.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.buckets.lock().unwrap().contains_key(bucket)
    }

    fn check_access(&self, bucket: &str) -> Result<(), StorageError> {
        if self.forbidden.iter().any(|b| b == bucket) {
            return Err(StorageError::Forbidden(format!(
                "caller does not have storage access to bucket {bucket}"
            )));
        }
        Ok(())
    }
}

fn new_bucket(name: &str, location: &str) -> BucketInfo {
    let now = Utc::now();
    BucketInfo {
        id: name.to_string(),
        name: name.to_string(),
        location: Some(location.to_uppercase()),
        storage_class: Some("STANDARD".to_string()),
        time_created: Some(now),
        updated: Some(now),
        ..BucketInfo::default()
    }
}

fn new_object(bucket: &str, name: &str, size: usize, content_type: &str) -> ObjectInfo {
    ObjectInfo {
        name: name.to_string(),
        bucket: bucket.to_string(),
        size: size as u64,
        content_type: Some(content_type.to_string()),
        updated: Some(Utc::now()),
        storage_class: Some("STANDARD".to_string()),
        crc32c: Some("AAAAAA==".to_string()),
        md5_hash: Some("1B2M2Y8AsgTpgAmY7PhCfg==".to_string()),
    }
}

fn bucket_not_found(bucket: &str) -> StorageError {
    StorageError::NotFound(format!("The specified bucket does not exist: {bucket}"))
}

fn object_not_found(bucket: &str, name: &str) -> StorageError {
    StorageError::NotFound(format!("No such object: {bucket}/{name}"))
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, StorageError> {
        if self.forbidden_project {
            return Err(StorageError::Forbidden(
                "caller does not have storage.buckets.list access to the Google Cloud project".to_string(),
            ));
        }
        Ok(self.buckets.lock().unwrap().values().map(|b| b.info.clone()).collect())
    }

    async fn create_bucket(&self, name: &str, location: &str) -> Result<BucketInfo, StorageError> {
        self.check_access(name)?;
        if location.trim().is_empty() || location.contains(' ') {
            return Err(StorageError::BadRequest(format!("Invalid location: {location}")));
        }
        let mut buckets = self.buckets.lock().unwrap();
        if buckets.contains_key(name) {
            return Err(StorageError::Conflict(
                "Your previous request to create the named bucket succeeded and you already own it.".to_string(),
            ));
        }
        let info = new_bucket(name, location);
        buckets.insert(
            name.to_string(),
            MemoryBucket {
                info: info.clone(),
                objects: BTreeMap::new(),
            },
        );
        Ok(info)
    }

    async fn delete_bucket(&self, name: &str) -> Result<(), StorageError> {
        self.check_access(name)?;
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.get(name).ok_or_else(|| bucket_not_found(name))?;
        if !bucket.objects.is_empty() {
            return Err(StorageError::Conflict("The bucket you tried to delete is not empty.".to_string()));
        }
        buckets.remove(name);
        Ok(())
    }

    async fn get_bucket(&self, name: &str) -> Result<BucketInfo, StorageError> {
        self.check_access(name)?;
        self.buckets
            .lock()
            .unwrap()
            .get(name)
            .map(|b| b.info.clone())
            .ok_or_else(|| bucket_not_found(name))
    }

    async fn set_bucket_cors(&self, name: &str, rules: &[CorsRule]) -> Result<BucketInfo, StorageError> {
        self.check_access(name)?;
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.get_mut(name).ok_or_else(|| bucket_not_found(name))?;
        bucket.info.cors = rules.to_vec();
        bucket.info.updated = Some(Utc::now());
        Ok(bucket.info.clone())
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        self.check_access(bucket)?;
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .map(|b| b.objects.values().map(|(info, _)| info.clone()).collect())
            .ok_or_else(|| bucket_not_found(bucket))
    }

    async fn upload_object(
        &self,
        bucket: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<ObjectInfo, StorageError> {
        self.check_access(bucket)?;
        let mut buckets = self.buckets.lock().unwrap();
        let entry = buckets.get_mut(bucket).ok_or_else(|| bucket_not_found(bucket))?;
        let info = new_object(bucket, name, data.len(), content_type);
        entry.objects.insert(name.to_string(), (info.clone(), data));
        Ok(info)
    }

    async fn download_object(&self, bucket: &str, name: &str) -> Result<Bytes, StorageError> {
        self.check_access(bucket)?;
        let buckets = self.buckets.lock().unwrap();
        let entry = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;
        entry
            .objects
            .get(name)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| object_not_found(bucket, name))
    }

    async fn delete_object(&self, bucket: &str, name: &str) -> Result<(), StorageError> {
        self.check_access(bucket)?;
        if self.held.iter().any(|(b, n)| b == bucket && n == name) {
            return Err(StorageError::Forbidden(format!(
                "Object '{name}' is under active Temporary hold and cannot be deleted"
            )));
        }
        let mut buckets = self.buckets.lock().unwrap();
        let entry = buckets.get_mut(bucket).ok_or_else(|| bucket_not_found(bucket))?;
        entry
            .objects
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| object_not_found(bucket, name))
    }

    async fn get_object(&self, bucket: &str, name: &str) -> Result<ObjectInfo, StorageError> {
        self.check_access(bucket)?;
        let buckets = self.buckets.lock().unwrap();
        let entry = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;
        entry
            .objects
            .get(name)
            .map(|(info, _)| info.clone())
            .ok_or_else(|| object_not_found(bucket, name))
    }

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_name: &str,
        destination_bucket: &str,
        destination_name: &str,
    ) -> Result<ObjectInfo, StorageError> {
        self.check_access(source_bucket)?;
        self.check_access(destination_bucket)?;
        let mut buckets = self.buckets.lock().unwrap();
        let (source_info, data) = buckets
            .get(source_bucket)
            .ok_or_else(|| bucket_not_found(source_bucket))?
            .objects
            .get(source_name)
            .cloned()
            .ok_or_else(|| object_not_found(source_bucket, source_name))?;
        let destination = buckets
            .get_mut(destination_bucket)
            .ok_or_else(|| bucket_not_found(destination_bucket))?;
        let info = ObjectInfo {
            name: destination_name.to_string(),
            bucket: destination_bucket.to_string(),
            updated: Some(Utc::now()),
            ..source_info
        };
        destination
            .objects
            .insert(destination_name.to_string(), (info.clone(), data));
        Ok(info)
    }

    async fn signed_url(&self, bucket: &str, name: &str, expires_in: Duration) -> Result<String, StorageError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| StorageError::SigningUnavailable("no private key available".to_string()))?;
        signer.sign_get(bucket, name, expires_in, Utc::now())
    }
}
