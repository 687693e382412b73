//! Object store contract (C8)
//!
//! The store is external and eventually consistent; callers tolerate stale
//! reads by listing before fetching and by read-append-write for logs. Keys
//! are `s3://bucket/key` URLs throughout.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object(&self, url: &str) -> Result<Vec<u8>>;
    async fn put_object(&self, url: &str, body: Vec<u8>) -> Result<()>;
    /// Full URLs of every object under the prefix, lexically ordered
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;
    async fn object_exists(&self, url: &str) -> Result<bool>;
}

/// Split `s3://bucket/key` into bucket and key
pub fn parse_object_url(url: &str) -> Result<(String, String)> {
    let rest = url
        .strip_prefix("s3://")
        .with_context(|| format!("Not an object store URL: {url}"))?;
    match rest.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
            Ok((bucket.to_string(), key.to_string()))
        }
        _ => bail!("Object store URL has no key: {url}"),
    }
}

/// In-memory store for tests
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get_object(&self, url: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .await
            .get(url)
            .cloned()
            .with_context(|| format!("No such object: {url}"))
    }

    async fn put_object(&self, url: &str, body: Vec<u8>) -> Result<()> {
        self.objects.lock().await.insert(url.to_string(), body);
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .await
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn object_exists(&self, url: &str) -> Result<bool> {
        Ok(self.objects.lock().await.contains_key(url))
    }
}

/// Filesystem-backed store mapping `s3://bucket/key` under a root directory.
/// Stands in for the real store in local deployments.
pub struct FileObjectStore {
    root: PathBuf,
}

impl FileObjectStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, url: &str) -> Result<PathBuf> {
        let (bucket, key) = parse_object_url(url)?;
        Ok(self.root.join(bucket).join(key))
    }

    fn url_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        Some(format!("s3://{}", relative.to_string_lossy()))
    }

    fn collect_files(dir: &Path, found: &mut Vec<PathBuf>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                Self::collect_files(&path, found)?;
            } else {
                found.push(path);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn get_object(&self, url: &str) -> Result<Vec<u8>> {
        let path = self.path_for(url)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("No such object: {url}"))
    }

    async fn put_object(&self, url: &str, body: Vec<u8>) -> Result<()> {
        let path = self.path_for(url)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write object: {url}"))
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let (bucket, key) = parse_object_url(prefix)?;
        let dir = self.root.join(&bucket).join(key.trim_end_matches('/'));
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        Self::collect_files(&dir, &mut files)?;
        let mut urls: Vec<String> = files
            .iter()
            .filter_map(|path| self.url_for(path))
            .filter(|url| url.starts_with(prefix))
            .collect();
        urls.sort();
        Ok(urls)
    }

    async fn object_exists(&self, url: &str) -> Result<bool> {
        Ok(self.path_for(url)?.is_file())
    }
}
