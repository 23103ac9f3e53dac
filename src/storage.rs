//! Object-storage listing and partition-directory discovery.
//!
//! Listing is a thin wrapper over `object_store`; the discovery helpers are
//! pure so glob grouping can be tested without a store.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::ObjectStore;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path;
use snafu::ResultExt;

use crate::error::{GcsConfigSnafu, ObjectStoreSnafu, StorageError};
use crate::metadata::ignore_key;

/// One listed object: key plus last-modified timestamp.
#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

/// Listing surface over a single bucket.
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ObjectStorage {
    /// GCS-backed storage for `bucket`, configured from the environment.
    pub fn gcs(bucket: &str) -> Result<Self, StorageError> {
        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(bucket)
            .build()
            .context(GcsConfigSnafu)?;
        Ok(Self {
            store: Arc::new(store),
            bucket: bucket.to_string(),
        })
    }

    /// Storage over an existing object store (tests, other backends).
    pub fn with_store(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// List every object under `prefix`.
    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StorageError> {
        let path = Path::from(prefix);
        let mut stream = self.store.list(Some(&path));
        let mut entries = Vec::new();
        while let Some(meta) = stream.try_next().await.context(ObjectStoreSnafu)? {
            entries.push(ObjectEntry {
                key: meta.location.to_string(),
                last_modified: meta.last_modified,
            });
        }
        Ok(entries)
    }
}

/// Keep the most recently modified object per partition directory.
///
/// A directory is one logical partition snapshot; an older object in the
/// same directory is a superseded write. Ties keep the first object seen.
pub fn latest_objects(
    entries: impl IntoIterator<Item = ObjectEntry>,
) -> BTreeMap<String, ObjectEntry> {
    let mut latest: BTreeMap<String, ObjectEntry> = BTreeMap::new();
    for entry in entries {
        if ignore_key(&entry.key) {
            continue;
        }
        let directory = entry
            .key
            .rsplit_once('/')
            .map(|(directory, _)| directory)
            .unwrap_or("")
            .to_string();
        match latest.get(&directory) {
            Some(current) if current.last_modified >= entry.last_modified => {}
            _ => {
                latest.insert(directory, entry);
            }
        }
    }
    latest
}

/// Every loadable object key, with the ignore patterns applied.
pub fn loadable_objects(entries: impl IntoIterator<Item = ObjectEntry>) -> Vec<String> {
    entries
        .into_iter()
        .filter(|entry| !ignore_key(&entry.key))
        .map(|entry| entry.key)
        .collect()
}
