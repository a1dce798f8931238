//! Object lifecycle manager — the pending/processed/failed prefix convention.
//!
//! Raw messages are landed under `pending/` by the inbound gateway. The
//! pipeline moves each object to exactly one of `processed/` or `failed/`
//! when it settles. A move is copy-then-delete: if the delete fails after
//! a successful copy the object is logged as duplicated-but-not-lost and
//! the move still counts (availability over strict exactly-once).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::StorageError;

/// The three lifecycle locations for a stored raw message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefix {
    Pending,
    Processed,
    Failed,
}

impl Prefix {
    pub const ALL: [Prefix; 3] = [Prefix::Pending, Prefix::Processed, Prefix::Failed];

    /// Prefix path segment, with trailing slash, as laid out by the gateway.
    pub fn as_str(&self) -> &'static str {
        match self {
            Prefix::Pending => "pending/",
            Prefix::Processed => "processed/",
            Prefix::Failed => "failed/",
        }
    }

    /// Directory name without the trailing slash.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Prefix::Pending => "pending",
            Prefix::Processed => "processed",
            Prefix::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Reference to a stored object: prefix plus object name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub prefix: Prefix,
    /// Object name within the prefix (no slashes).
    pub name: String,
}

impl ObjectRef {
    pub fn new(prefix: Prefix, name: impl Into<String>) -> Self {
        Self {
            prefix,
            name: name.into(),
        }
    }

    /// Full key, e.g. `pending/20260112-abc.eml`.
    pub fn key(&self) -> String {
        format!("{}{}", self.prefix.as_str(), self.name)
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// Object-storage seam. The pipeline only ever talks to this trait.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List objects currently under `pending/`, oldest first.
    async fn list_pending(&self) -> Result<Vec<ObjectRef>, StorageError>;

    /// Fetch the raw bytes of an object.
    async fn fetch(&self, object: &ObjectRef) -> Result<Vec<u8>, StorageError>;

    /// Move an object to another prefix. Returns the new reference.
    async fn move_to(&self, object: &ObjectRef, target: Prefix)
    -> Result<ObjectRef, StorageError>;

    /// Object counts per prefix, for the `status` command.
    async fn counts(&self) -> Result<Vec<(Prefix, usize)>, StorageError>;
}

/// Filesystem-backed object store.
///
/// The spool directory is the bucket: three subdirectories, one per
/// prefix. This is the layout the inbound gateway writes into.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Open a store rooted at `root`, creating the prefix directories.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        for prefix in Prefix::ALL {
            std::fs::create_dir_all(root.join(prefix.dir_name()))?;
        }
        Ok(Self { root })
    }

    fn path_of(&self, object: &ObjectRef) -> PathBuf {
        self.root.join(object.prefix.dir_name()).join(&object.name)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn list_pending(&self) -> Result<Vec<ObjectRef>, StorageError> {
        let dir = self.root.join(Prefix::Pending.dir_name());
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
            StorageError::List {
                prefix: Prefix::Pending.as_str().to_string(),
                source: e,
            }
        })?;

        let mut names: Vec<(std::time::SystemTime, String)> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                warn!(path = %entry.path().display(), "Skipping object with non-UTF-8 name");
                continue;
            };
            let modified = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
            names.push((modified, name));
        }

        names.sort();
        Ok(names
            .into_iter()
            .map(|(_, name)| ObjectRef::new(Prefix::Pending, name))
            .collect())
    }

    async fn fetch(&self, object: &ObjectRef) -> Result<Vec<u8>, StorageError> {
        tokio::fs::read(self.path_of(object))
            .await
            .map_err(|e| StorageError::Fetch {
                key: object.key(),
                source: e,
            })
    }

    async fn move_to(
        &self,
        object: &ObjectRef,
        target: Prefix,
    ) -> Result<ObjectRef, StorageError> {
        let new_ref = ObjectRef::new(target, object.name.clone());
        let src = self.path_of(object);
        let dst = self.path_of(&new_ref);

        // Copy first, delete second. Never delete before the copy lands.
        tokio::fs::copy(&src, &dst)
            .await
            .map_err(|e| StorageError::Copy {
                key: object.key(),
                target: target.as_str().to_string(),
                source: e,
            })?;

        if let Err(e) = tokio::fs::remove_file(&src).await {
            warn!(
                key = %object.key(),
                target = %new_ref.key(),
                error = %e,
                "Object duplicated but not lost: copy succeeded, delete failed"
            );
        } else {
            debug!(from = %object.key(), to = %new_ref.key(), "Object moved");
        }

        Ok(new_ref)
    }

    async fn counts(&self) -> Result<Vec<(Prefix, usize)>, StorageError> {
        let mut out = Vec::with_capacity(Prefix::ALL.len());
        for prefix in Prefix::ALL {
            let dir = self.root.join(prefix.dir_name());
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
                StorageError::List {
                    prefix: prefix.as_str().to_string(),
                    source: e,
                }
            })?;
            let mut count = 0;
            while let Some(entry) = entries.next_entry().await? {
                if entry.metadata().await?.is_file() {
                    count += 1;
                }
            }
            out.push((prefix, count));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_pending(names: &[&str]) -> (tempfile::TempDir, FsObjectStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsObjectStore::open(tmp.path()).unwrap();
        for name in names {
            tokio::fs::write(tmp.path().join("pending").join(name), b"raw bytes")
                .await
                .unwrap();
        }
        (tmp, store)
    }

    #[tokio::test]
    async fn open_creates_prefix_directories() {
        let tmp = tempfile::tempdir().unwrap();
        FsObjectStore::open(tmp.path()).unwrap();
        for prefix in Prefix::ALL {
            assert!(tmp.path().join(prefix.dir_name()).is_dir());
        }
    }

    #[tokio::test]
    async fn list_pending_returns_only_pending_files() {
        let (tmp, store) = store_with_pending(&["a.eml", "b.eml"]).await;
        tokio::fs::write(tmp.path().join("processed").join("done.eml"), b"x")
            .await
            .unwrap();

        let pending = store.list_pending().await.unwrap();
        let names: Vec<&str> = pending.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(pending.len(), 2);
        assert!(names.contains(&"a.eml"));
        assert!(names.contains(&"b.eml"));
        assert!(pending.iter().all(|r| r.prefix == Prefix::Pending));
    }

    #[tokio::test]
    async fn fetch_returns_raw_bytes() {
        let (_tmp, store) = store_with_pending(&["a.eml"]).await;
        let bytes = store
            .fetch(&ObjectRef::new(Prefix::Pending, "a.eml"))
            .await
            .unwrap();
        assert_eq!(bytes, b"raw bytes");
    }

    #[tokio::test]
    async fn fetch_missing_object_errors() {
        let (_tmp, store) = store_with_pending(&[]).await;
        let err = store
            .fetch(&ObjectRef::new(Prefix::Pending, "nope.eml"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Fetch { .. }));
    }

    #[tokio::test]
    async fn move_leaves_object_under_exactly_one_prefix() {
        let (tmp, store) = store_with_pending(&["a.eml"]).await;
        let obj = ObjectRef::new(Prefix::Pending, "a.eml");

        let moved = store.move_to(&obj, Prefix::Processed).await.unwrap();
        assert_eq!(moved.key(), "processed/a.eml");

        assert!(!tmp.path().join("pending").join("a.eml").exists());
        assert!(tmp.path().join("processed").join("a.eml").exists());
        assert!(!tmp.path().join("failed").join("a.eml").exists());
    }

    #[tokio::test]
    async fn move_to_failed_prefix() {
        let (tmp, store) = store_with_pending(&["bad.eml"]).await;
        let obj = ObjectRef::new(Prefix::Pending, "bad.eml");

        store.move_to(&obj, Prefix::Failed).await.unwrap();
        assert!(tmp.path().join("failed").join("bad.eml").exists());
        assert!(!tmp.path().join("pending").join("bad.eml").exists());
    }

    #[tokio::test]
    async fn move_missing_source_is_copy_error() {
        let (_tmp, store) = store_with_pending(&[]).await;
        let err = store
            .move_to(&ObjectRef::new(Prefix::Pending, "ghost.eml"), Prefix::Failed)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Copy { .. }));
    }

    #[tokio::test]
    async fn counts_per_prefix() {
        let (tmp, store) = store_with_pending(&["a.eml", "b.eml"]).await;
        tokio::fs::write(tmp.path().join("failed").join("c.eml"), b"x")
            .await
            .unwrap();

        let counts = store.counts().await.unwrap();
        let get = |p: Prefix| counts.iter().find(|(q, _)| *q == p).unwrap().1;
        assert_eq!(get(Prefix::Pending), 2);
        assert_eq!(get(Prefix::Processed), 0);
        assert_eq!(get(Prefix::Failed), 1);
    }

    #[test]
    fn object_ref_key_format() {
        let obj = ObjectRef::new(Prefix::Pending, "20260112-abc.eml");
        assert_eq!(obj.key(), "pending/20260112-abc.eml");
    }
}
