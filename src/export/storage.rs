//! Object storage for finished exports
//!
//! Objects are addressed by slash-separated keys. The local-disk backend
//! keeps them under `{root}/{bucket}/{key}` and hands out capability URLs
//! signed with HMAC-SHA256 over the key and expiry.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::path::{Path, PathBuf};

use crate::crypto::{sign_hex, verify_hex};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Object not found: {0}")]
    NotFound(String),
}

/// Why a download link was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignedUrlError {
    #[error("Download link has expired")]
    Expired,

    #[error("Invalid download signature")]
    BadSignature,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// An opened object ready to stream
#[derive(Debug)]
pub struct StoredObject {
    pub file: tokio::fs::File,
    pub size: u64,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Upload a local file under `key`; returns the stored size in bytes
    async fn put_file(&self, key: &str, source: &Path, content_type: &str) -> Result<u64, StorageError>;

    /// Time-limited download URL for `key`
    fn signed_url(&self, key: &str, ttl_secs: i64) -> SignedUrl;

    async fn open(&self, key: &str) -> Result<StoredObject, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Signs and verifies `/downloads/{key}?expires=..&signature=..` links
#[derive(Clone)]
pub struct UrlSigner {
    secret: Vec<u8>,
    public_url: String,
}

impl UrlSigner {
    pub fn new(secret: impl AsRef<[u8]>, public_url: impl Into<String>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn signature(&self, key: &str, expires: i64) -> String {
        sign_hex(&self.secret, &[key.as_bytes(), &b"\n"[..], expires.to_string().as_bytes()])
    }

    pub fn sign(&self, key: &str, expires_at: DateTime<Utc>) -> SignedUrl {
        let expires = expires_at.timestamp();
        SignedUrl {
            url: format!(
                "{}/downloads/{}?expires={}&signature={}",
                self.public_url,
                key,
                expires,
                self.signature(key, expires)
            ),
            expires_at,
        }
    }

    pub fn verify(
        &self,
        key: &str,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SignedUrlError> {
        if !verify_hex(&self.secret, &[key.as_bytes(), &b"\n"[..], expires.to_string().as_bytes()], signature) {
            return Err(SignedUrlError::BadSignature);
        }
        let expires_at = Utc
            .timestamp_opt(expires, 0)
            .single()
            .ok_or(SignedUrlError::BadSignature)?;
        if expires_at <= now {
            return Err(SignedUrlError::Expired);
        }
        Ok(())
    }
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("public_url", &self.public_url)
            .finish_non_exhaustive()
    }
}

/// Keys are relative, URL-safe paths without `.` or `..` segments
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let well_formed = !key.is_empty()
        && !key.starts_with('/')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.'))
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if well_formed {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct LocalDiskStorage {
    base: PathBuf,
    signer: UrlSigner,
}

impl LocalDiskStorage {
    pub fn new(root: impl Into<PathBuf>, bucket: &str, signer: UrlSigner) -> Self {
        Self {
            base: root.into().join(bucket),
            signer,
        }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.base.clone(), |path, segment| path.join(segment)))
    }
}

#[async_trait]
impl ObjectStorage for LocalDiskStorage {
    async fn put_file(&self, key: &str, source: &Path, content_type: &str) -> Result<u64, StorageError> {
        let target = self.object_path(key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Copy beside the target, then rename, so readers never see a partial object
        let staging = target.with_extension("partial");
        let size = tokio::fs::copy(source, &staging).await?;
        tokio::fs::rename(&staging, &target).await?;

        tracing::debug!(key, size, content_type, "Stored object");
        Ok(size)
    }

    fn signed_url(&self, key: &str, ttl_secs: i64) -> SignedUrl {
        self.signer.sign(key, Utc::now() + Duration::seconds(ttl_secs))
    }

    async fn open(&self, key: &str) -> Result<StoredObject, StorageError> {
        let path = self.object_path(key)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();
        Ok(StoredObject { file, size })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn signer() -> UrlSigner {
        UrlSigner::new("url-secret", "https://api.example.com/")
    }

    #[test]
    fn test_key_validation() {
        assert!(validate_key("exports/p1/2024-01-01/job.csv").is_ok());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("exports//x.csv").is_err());
        assert!(validate_key("/abs/x.csv").is_err());
        assert!(validate_key("exports/a b.csv").is_err());
        assert!(validate_key("").is_err());
    }

    #[test]
    fn test_signed_url_round_trip() {
        let signer = signer();
        let now = Utc::now();
        let expires_at = now + Duration::seconds(900);
        let signed = signer.sign("exports/p/d/j.csv", expires_at);

        assert!(signed
            .url
            .starts_with("https://api.example.com/downloads/exports/p/d/j.csv?expires="));

        let query = signed.url.split('?').nth(1).unwrap();
        let mut expires = 0;
        let mut signature = "";
        for pair in query.split('&') {
            let (k, v) = pair.split_once('=').unwrap();
            match k {
                "expires" => expires = v.parse().unwrap(),
                "signature" => signature = v,
                _ => {}
            }
        }

        assert_eq!(signer.verify("exports/p/d/j.csv", expires, signature, now), Ok(()));
        assert_eq!(
            signer.verify("exports/p/d/other.csv", expires, signature, now),
            Err(SignedUrlError::BadSignature)
        );
        assert_eq!(
            signer.verify("exports/p/d/j.csv", expires + 1, signature, now),
            Err(SignedUrlError::BadSignature)
        );
        assert_eq!(
            signer.verify("exports/p/d/j.csv", expires, signature, expires_at + Duration::seconds(1)),
            Err(SignedUrlError::Expired)
        );
    }

    #[tokio::test]
    async fn test_local_disk_put_open_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDiskStorage::new(dir.path(), "bucket", signer());

        let source = dir.path().join("source.csv");
        tokio::fs::write(&source, b"a,b\r\n1,2\r\n").await.unwrap();

        let key = "exports/p1/2024-01-01/job.csv";
        let size = storage.put_file(key, &source, "text/csv").await.unwrap();
        assert_eq!(size, 10);
        assert!(dir.path().join("bucket/exports/p1/2024-01-01/job.csv").exists());

        let mut object = storage.open(key).await.unwrap();
        assert_eq!(object.size, 10);
        let mut contents = String::new();
        object.file.read_to_string(&mut contents).await.unwrap();
        assert_eq!(contents, "a,b\r\n1,2\r\n");

        storage.delete(key).await.unwrap();
        assert!(matches!(storage.open(key).await, Err(StorageError::NotFound(_))));
        assert!(matches!(storage.open("../x").await, Err(StorageError::InvalidKey(_))));
    }
}
