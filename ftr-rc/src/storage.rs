//! Object storage for collection photos
//!
//! The intake workflow only needs three operations from a bucket: upload
//! without overwrite, public URL lookup and removal. `LocalObjectStore`
//! keeps objects as plain files under `<root>/storage/<bucket>`, which the
//! router serves read-only at `/storage/<bucket>/`.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Bucket-scoped binary object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `path`; fails if the object already exists
    async fn upload(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()>;

    /// Public URL for an object path
    fn public_url(&self, path: &str) -> String;

    /// Delete objects; missing objects are not an error
    ///
    /// Every path is attempted; failures are reported together.
    async fn remove(&self, paths: &[String]) -> Result<()>;
}

/// Filesystem-backed bucket
pub struct LocalObjectStore {
    dir: PathBuf,
    public_base_url: String,
}

impl LocalObjectStore {
    pub fn new(dir: PathBuf, public_base_url: impl Into<String>) -> Self {
        Self {
            dir,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create the bucket directory if missing
    pub async fn ensure_bucket(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create bucket directory {}", self.dir.display()))
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn object_path(&self, path: &str) -> Result<PathBuf> {
        if path.is_empty() || path.contains('/') || path.contains('\\') || path.starts_with('.') {
            bail!("Invalid object path '{}'", path);
        }
        Ok(self.dir.join(path))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let target = self.object_path(path)?;
        self.ensure_bucket().await?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => anyhow!("Object '{}' already exists", path),
                _ => anyhow!("Failed to create object '{}': {}", path, e),
            })?;

        let written = match file.write_all(bytes).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            drop(file);
            if let Err(cleanup) = fs::remove_file(&target).await {
                warn!(path, error = %cleanup, "Failed to remove partial object");
            }
            return Err(anyhow!("Failed to write object '{}': {}", path, e));
        }

        debug!(path, content_type, size = bytes.len(), "Stored object");
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.public_base_url, path)
    }

    async fn remove(&self, paths: &[String]) -> Result<()> {
        let mut failures = Vec::new();
        for path in paths {
            let target = match self.object_path(path) {
                Ok(target) => target,
                Err(e) => {
                    failures.push(e.to_string());
                    continue;
                }
            };
            match fs::remove_file(&target).await {
                Ok(()) => debug!(path = %path, "Removed object"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(path = %path, "Object already absent")
                }
                Err(e) => failures.push(format!("'{}': {}", path, e)),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(
                "Failed to remove {} object(s): {}",
                failures.len(),
                failures.join("; ")
            ))
        }
    }
}

/// Reduce an uploaded file name to characters safe for an object path
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "foto".to_string()
    } else {
        cleaned
    }
}
