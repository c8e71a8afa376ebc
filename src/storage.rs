//! Durable byte storage used by the disk cache
//!
//! Objects are addressed by flat identifiers (file names). The filesystem
//! implementation writes through a temporary file and renames it into place,
//! so a reader never observes a half-written object.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use directories::ProjectDirs;
use tokio::fs;

/// Size and modification time of a stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfo {
    pub len: u64,
    pub modified: SystemTime,
}

/// Byte-addressable durable medium
#[async_trait]
pub trait Storage: Send + Sync + fmt::Debug {
    /// Reads an object; `Ok(None)` if it does not exist
    async fn read(&self, id: &str) -> io::Result<Option<Vec<u8>>>;

    /// Creates or replaces an object
    async fn write(&self, id: &str, bytes: &[u8]) -> io::Result<()>;

    /// Deletes an object; returns whether it existed
    async fn delete(&self, id: &str) -> io::Result<bool>;

    /// Lists every object identifier
    async fn list(&self) -> io::Result<Vec<String>>;

    /// Size and last-modified time; `Ok(None)` if it does not exist
    async fn stat(&self, id: &str) -> io::Result<Option<ObjectInfo>>;
}

/// Storage rooted at a directory on the local filesystem
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Creates storage rooted at `root`; the directory is created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> io::Result<PathBuf> {
        validate_id(id)?;
        Ok(self.root.join(id))
    }
}

/// Platform cache directory for this crate (`~/.cache/steadyfetch/` on Linux)
pub fn default_cache_dir() -> Option<PathBuf> {
    let project_dirs = ProjectDirs::from("", "", "steadyfetch")?;
    Some(project_dirs.cache_dir().to_path_buf())
}

/// Identifiers are plain file names; temporary files start with a dot
fn validate_id(id: &str) -> io::Result<()> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid storage identifier: {:?}", id),
        ))
    }
}

fn not_found_as_none<T>(result: io::Result<T>) -> io::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn read(&self, id: &str) -> io::Result<Option<Vec<u8>>> {
        let path = self.path_for(id)?;
        not_found_as_none(fs::read(path).await)
    }

    async fn write(&self, id: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.path_for(id)?;
        fs::create_dir_all(&self.root).await?;

        let tmp = self.root.join(format!(".{}.tmp", id));
        fs::write(&tmp, bytes).await?;
        if let Err(err) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(err);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> io::Result<bool> {
        let path = self.path_for(id)?;
        Ok(not_found_as_none(fs::remove_file(path).await)?.is_some())
    }

    async fn list(&self) -> io::Result<Vec<String>> {
        let Some(mut dir) = not_found_as_none(fs::read_dir(&self.root).await)? else {
            return Ok(Vec::new());
        };

        let mut ids = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_id(name).is_ok() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn stat(&self, id: &str) -> io::Result<Option<ObjectInfo>> {
        let path = self.path_for(id)?;
        let Some(meta) = not_found_as_none(fs::metadata(path).await)? else {
            return Ok(None);
        };
        Ok(Some(ObjectInfo {
            len: meta.len(),
            modified: meta.modified()?,
        }))
    }
}
