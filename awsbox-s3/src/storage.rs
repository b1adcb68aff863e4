//! S3 in-memory storage
//!
//! One mutex guards buckets and in-flight multipart uploads. Multipart
//! uploads are transient: they exist only between creation and
//! complete/abort.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Object {
    pub data: Vec<u8>,
    pub md5: [u8; 16],
    pub content_type: Option<String>,
    pub tags: Vec<(String, String)>,
    pub last_modified: DateTime<Utc>,
}

impl Object {
    pub fn etag(&self) -> String {
        hex::encode(self.md5)
    }
}

#[derive(Debug, Default)]
struct Bucket {
    objects: HashMap<String, Object>,
}

#[derive(Debug)]
struct MultipartUpload {
    bucket: String,
    key: String,
    content_type: Option<String>,
    parts: HashMap<i32, Part>,
}

#[derive(Debug)]
struct Part {
    data: Vec<u8>,
    md5: [u8; 16],
}

#[derive(Debug, Clone)]
pub struct CompletedUpload {
    pub etag: String,
    pub key: String,
    pub bucket: String,
}

/// S3 errors
#[derive(Debug, thiserror::Error)]
pub enum S3Error {
    #[error("The specified bucket does not exist: {0}")]
    NoSuchBucket(String),

    #[error("Bucket already exists: {0}")]
    BucketAlreadyExists(String),

    #[error("Bucket not empty: {0}")]
    BucketNotEmpty(String),

    #[error("The specified key does not exist: {0}")]
    NoSuchKey(String),

    #[error("The specified upload does not exist: {0}")]
    NoSuchUpload(String),

    #[error("Invalid part: {0}")]
    InvalidPart(String),

    #[error("{0}")]
    InvalidArgument(String),
}

impl S3Error {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoSuchBucket(_) => "NoSuchBucket",
            Self::BucketAlreadyExists(_) => "BucketAlreadyExists",
            Self::BucketNotEmpty(_) => "BucketNotEmpty",
            Self::NoSuchKey(_) => "NoSuchKey",
            Self::NoSuchUpload(_) => "NoSuchUpload",
            Self::InvalidPart(_) => "InvalidPart",
            Self::InvalidArgument(_) => "InvalidArgument",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::NoSuchBucket(_) | Self::NoSuchKey(_) | Self::NoSuchUpload(_) => 404,
            Self::BucketAlreadyExists(_) | Self::BucketNotEmpty(_) => 409,
            Self::InvalidPart(_) | Self::InvalidArgument(_) => 400,
        }
    }
}

/// In-memory S3 store
pub struct S3Storage {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    buckets: BTreeMap<String, Bucket>,
    multipart_uploads: HashMap<String, MultipartUpload>,
}

impl Default for S3Storage {
    fn default() -> Self {
        Self::new()
    }
}

impl S3Storage {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("s3 state lock poisoned")
    }

    // === Buckets ===

    pub fn create_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        let mut inner = self.lock();
        if inner.buckets.contains_key(bucket) {
            return Err(S3Error::BucketAlreadyExists(bucket.to_string()));
        }
        inner.buckets.insert(bucket.to_string(), Bucket::default());
        Ok(())
    }

    pub fn bucket_exists(&self, bucket: &str) -> bool {
        self.lock().buckets.contains_key(bucket)
    }

    pub fn delete_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        let mut inner = self.lock();
        let b = inner
            .buckets
            .get(bucket)
            .ok_or_else(|| S3Error::NoSuchBucket(bucket.to_string()))?;
        if !b.objects.is_empty() {
            return Err(S3Error::BucketNotEmpty(bucket.to_string()));
        }
        inner.buckets.remove(bucket);
        Ok(())
    }

    pub fn list_buckets(&self) -> Vec<String> {
        self.lock().buckets.keys().cloned().collect()
    }

    // === Objects ===

    pub fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<String, S3Error> {
        let mut inner = self.lock();
        let b = inner
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| S3Error::NoSuchBucket(bucket.to_string()))?;

        let object = Object {
            md5: Md5::digest(&data).into(),
            data,
            content_type,
            tags: Vec::new(),
            last_modified: Utc::now(),
        };
        let etag = object.etag();
        b.objects.insert(key.to_string(), object);
        Ok(etag)
    }

    pub fn get_object(&self, bucket: &str, key: &str) -> Result<Object, S3Error> {
        let inner = self.lock();
        let b = inner
            .buckets
            .get(bucket)
            .ok_or_else(|| S3Error::NoSuchBucket(bucket.to_string()))?;
        b.objects
            .get(key)
            .cloned()
            .ok_or_else(|| S3Error::NoSuchKey(key.to_string()))
    }

    pub fn delete_object(&self, bucket: &str, key: &str) -> Result<(), S3Error> {
        let mut inner = self.lock();
        let b = inner
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| S3Error::NoSuchBucket(bucket.to_string()))?;
        b.objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| S3Error::NoSuchKey(key.to_string()))
    }

    pub fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
    ) -> Result<String, S3Error> {
        let mut inner = self.lock();
        let source = inner
            .buckets
            .get(source_bucket)
            .ok_or_else(|| S3Error::NoSuchBucket(source_bucket.to_string()))?
            .objects
            .get(source_key)
            .cloned()
            .ok_or_else(|| S3Error::NoSuchKey(source_key.to_string()))?;

        let destination = inner
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| S3Error::NoSuchBucket(bucket.to_string()))?;

        let mut object = source;
        if content_type.is_some() {
            object.content_type = content_type;
        }
        object.last_modified = Utc::now();
        let etag = object.etag();
        destination.objects.insert(key.to_string(), object);
        Ok(etag)
    }

    pub fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<(String, Object)>, S3Error> {
        let inner = self.lock();
        let b = inner
            .buckets
            .get(bucket)
            .ok_or_else(|| S3Error::NoSuchBucket(bucket.to_string()))?;
        let mut objects: Vec<(String, Object)> = b
            .objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        objects.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(objects)
    }

    // === Tagging ===

    pub fn get_object_tags(&self, bucket: &str, key: &str) -> Result<Vec<(String, String)>, S3Error> {
        Ok(self.get_object(bucket, key)?.tags)
    }

    pub fn put_object_tags(
        &self,
        bucket: &str,
        key: &str,
        tags: Vec<(String, String)>,
    ) -> Result<(), S3Error> {
        let mut inner = self.lock();
        let object = inner
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| S3Error::NoSuchBucket(bucket.to_string()))?
            .objects
            .get_mut(key)
            .ok_or_else(|| S3Error::NoSuchKey(key.to_string()))?;
        object.tags = tags;
        Ok(())
    }

    pub fn delete_object_tags(&self, bucket: &str, key: &str) -> Result<(), S3Error> {
        self.put_object_tags(bucket, key, Vec::new())
    }

    // === Multipart uploads ===

    pub fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
    ) -> Result<String, S3Error> {
        let mut inner = self.lock();
        if !inner.buckets.contains_key(bucket) {
            return Err(S3Error::NoSuchBucket(bucket.to_string()));
        }

        let upload_id = URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes());
        inner.multipart_uploads.insert(
            upload_id.clone(),
            MultipartUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                content_type,
                parts: HashMap::new(),
            },
        );
        Ok(upload_id)
    }

    pub fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Vec<u8>,
    ) -> Result<String, S3Error> {
        let mut inner = self.lock();
        let upload = inner
            .multipart_uploads
            .get_mut(upload_id)
            .ok_or_else(|| S3Error::NoSuchUpload(upload_id.to_string()))?;
        if upload.bucket != bucket || upload.key != key {
            return Err(S3Error::NoSuchUpload(upload_id.to_string()));
        }

        let part = Part {
            md5: Md5::digest(&data).into(),
            data,
        };
        let etag = hex::encode(part.md5);
        upload.parts.insert(part_number, part);
        Ok(etag)
    }

    /// Assemble the object from the listed parts. The combined ETag is
    /// `md5(concat part MD5s)-<part count>`.
    pub fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        mut parts: Vec<(i32, String)>,
    ) -> Result<CompletedUpload, S3Error> {
        let mut inner = self.lock();
        let upload = inner
            .multipart_uploads
            .get(upload_id)
            .ok_or_else(|| S3Error::NoSuchUpload(upload_id.to_string()))?;
        if upload.bucket != bucket || upload.key != key {
            return Err(S3Error::NoSuchUpload(upload_id.to_string()));
        }

        parts.sort_by_key(|(number, _)| *number);

        let mut combined_md5s = Vec::with_capacity(parts.len() * 16);
        let mut total_len = 0;
        for (number, etag) in &parts {
            let part = upload
                .parts
                .get(number)
                .ok_or_else(|| S3Error::InvalidPart(format!("missing part {}", number)))?;
            if *etag != hex::encode(part.md5) {
                return Err(S3Error::InvalidPart(format!("wrong etag for part {}", number)));
            }
            combined_md5s.extend_from_slice(&part.md5);
            total_len += part.data.len();
        }

        let mut data = Vec::with_capacity(total_len);
        for (number, _) in &parts {
            data.extend_from_slice(&upload.parts[number].data);
        }

        let etag = format!("{}-{}", hex::encode(Md5::digest(&combined_md5s)), parts.len());
        let content_type = upload.content_type.clone();
        let object = Object {
            md5: Md5::digest(&data).into(),
            data,
            content_type,
            tags: Vec::new(),
            last_modified: Utc::now(),
        };

        inner
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| S3Error::NoSuchBucket(bucket.to_string()))?
            .objects
            .insert(key.to_string(), object);
        inner.multipart_uploads.remove(upload_id);

        Ok(CompletedUpload {
            etag,
            key: key.to_string(),
            bucket: bucket.to_string(),
        })
    }

    pub fn abort_multipart_upload(&self, upload_id: &str) -> Result<(), S3Error> {
        self.lock()
            .multipart_uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| S3Error::NoSuchUpload(upload_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_lifecycle() {
        let storage = S3Storage::new();
        storage.create_bucket("b").unwrap();
        assert!(storage.bucket_exists("b"));
        assert!(matches!(
            storage.create_bucket("b"),
            Err(S3Error::BucketAlreadyExists(_))
        ));

        storage.put_object("b", "k", b"v".to_vec(), None).unwrap();
        assert!(matches!(
            storage.delete_bucket("b"),
            Err(S3Error::BucketNotEmpty(_))
        ));

        storage.delete_object("b", "k").unwrap();
        storage.delete_bucket("b").unwrap();
        assert!(!storage.bucket_exists("b"));
    }

    #[test]
    fn test_put_get_object_round_trip() {
        let storage = S3Storage::new();
        storage.create_bucket("b").unwrap();

        let etag = storage
            .put_object("b", "k", b"hello".to_vec(), Some("text/plain".to_string()))
            .unwrap();
        // md5("hello")
        assert_eq!(etag, "5d41402abc4b2a76b9719d911017c592");

        let object = storage.get_object("b", "k").unwrap();
        assert_eq!(object.data, b"hello");
        assert_eq!(object.content_type.as_deref(), Some("text/plain"));

        assert!(matches!(
            storage.get_object("b", "missing"),
            Err(S3Error::NoSuchKey(_))
        ));
        assert!(matches!(
            storage.get_object("missing", "k"),
            Err(S3Error::NoSuchBucket(_))
        ));
    }

    #[test]
    fn test_copy_object() {
        let storage = S3Storage::new();
        storage.create_bucket("src").unwrap();
        storage.create_bucket("dst").unwrap();
        storage.put_object("src", "k", b"data".to_vec(), None).unwrap();

        storage.copy_object("src", "k", "dst", "k2", None).unwrap();
        assert_eq!(storage.get_object("dst", "k2").unwrap().data, b"data");
    }

    #[test]
    fn test_object_tagging() {
        let storage = S3Storage::new();
        storage.create_bucket("b").unwrap();
        storage.put_object("b", "k", b"v".to_vec(), None).unwrap();

        storage
            .put_object_tags("b", "k", vec![("a".to_string(), "1".to_string())])
            .unwrap();
        assert_eq!(
            storage.get_object_tags("b", "k").unwrap(),
            vec![("a".to_string(), "1".to_string())]
        );

        storage.delete_object_tags("b", "k").unwrap();
        assert!(storage.get_object_tags("b", "k").unwrap().is_empty());
    }

    #[test]
    fn test_multipart_upload_assembles_parts() {
        let storage = S3Storage::new();
        storage.create_bucket("b").unwrap();

        let upload_id = storage.create_multipart_upload("b", "k", None).unwrap();
        let etag1 = storage
            .upload_part("b", "k", &upload_id, 1, b"hello ".to_vec())
            .unwrap();
        let etag2 = storage
            .upload_part("b", "k", &upload_id, 2, b"world".to_vec())
            .unwrap();

        // Parts listed out of order still assemble in part-number order.
        let completed = storage
            .complete_multipart_upload("b", "k", &upload_id, vec![(2, etag2), (1, etag1)])
            .unwrap();
        assert!(completed.etag.ends_with("-2"));

        let object = storage.get_object("b", "k").unwrap();
        assert_eq!(object.data, b"hello world");

        // The upload is gone once completed.
        assert!(matches!(
            storage.abort_multipart_upload(&upload_id),
            Err(S3Error::NoSuchUpload(_))
        ));
    }

    #[test]
    fn test_multipart_upload_rejects_bad_etag() {
        let storage = S3Storage::new();
        storage.create_bucket("b").unwrap();

        let upload_id = storage.create_multipart_upload("b", "k", None).unwrap();
        storage
            .upload_part("b", "k", &upload_id, 1, b"data".to_vec())
            .unwrap();

        assert!(matches!(
            storage.complete_multipart_upload("b", "k", &upload_id, vec![(1, "bogus".to_string())]),
            Err(S3Error::InvalidPart(_))
        ));
        assert!(matches!(
            storage.complete_multipart_upload("b", "k", &upload_id, vec![(2, "x".to_string())]),
            Err(S3Error::InvalidPart(_))
        ));
    }

    #[test]
    fn test_abort_multipart_upload() {
        let storage = S3Storage::new();
        storage.create_bucket("b").unwrap();

        let upload_id = storage.create_multipart_upload("b", "k", None).unwrap();
        storage.abort_multipart_upload(&upload_id).unwrap();
        assert!(matches!(
            storage.upload_part("b", "k", &upload_id, 1, b"d".to_vec()),
            Err(S3Error::NoSuchUpload(_))
        ));
    }
}
