//! Directory-backed repository.
//!
//! ```text
//! <root>/
//!   islandora%3A42/
//!     object.json          manifest: datastream metadata + relationships
//!     datastreams/
//!       OBJ                raw content, one file per datastream
//!       OCR
//! ```
//!
//! The object directory name is the object id with every byte outside
//! `[A-Za-z0-9._-]` percent-encoded, so distinct ids never share a directory.

use super::{
    ContentSource, DatastreamContent, DatastreamSink, DatastreamWrite, ObjectId,
    RelationshipStore,
};
use crate::error::RepositoryError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

const MANIFEST: &str = "object.json";
const DATASTREAM_DIR: &str = "datastreams";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    id: String,
    #[serde(default)]
    datastreams: BTreeMap<String, DatastreamMeta>,
    #[serde(default)]
    relationships: Vec<RelationshipEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatastreamMeta {
    label: String,
    mime_type: String,
    control_group: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RelationshipEntry {
    namespace: String,
    predicate: String,
    value: String,
}

/// A repository stored as plain files under a root directory.
#[derive(Debug)]
pub struct FsRepository {
    root: PathBuf,
    // Serialises manifest read-modify-write cycles.
    manifest_lock: Mutex<()>,
}

impl FsRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            manifest_lock: Mutex::new(()),
        }
    }

    /// Directory holding `object`.
    pub fn object_dir(&self, object: &ObjectId) -> PathBuf {
        self.root.join(encode_object_id(object.as_str()))
    }

    /// Create an empty object. Existing objects are left untouched.
    pub async fn create_object(&self, object: &ObjectId) -> Result<(), RepositoryError> {
        let _guard = self.manifest_lock.lock().await;
        let dir = self.object_dir(object);
        let ds_dir = dir.join(DATASTREAM_DIR);
        tokio::fs::create_dir_all(&ds_dir)
            .await
            .map_err(|source| RepositoryError::Io {
                path: ds_dir.clone(),
                source,
            })?;
        if !dir.join(MANIFEST).exists() {
            let manifest = Manifest {
                id: object.to_string(),
                ..Default::default()
            };
            write_manifest(&dir, &manifest).await?;
        }
        Ok(())
    }

    /// Store `bytes` as datastream `dsid`, creating the object if needed.
    pub async fn put_datastream(
        &self,
        object: &ObjectId,
        dsid: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<(), RepositoryError> {
        self.create_object(object).await?;
        let _guard = self.manifest_lock.lock().await;
        let dir = self.object_dir(object);
        let target = dir.join(DATASTREAM_DIR).join(dsid);
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|source| RepositoryError::Io {
                path: target.clone(),
                source,
            })?;
        let mut manifest = read_manifest(&dir, object).await?;
        manifest.datastreams.insert(
            dsid.to_string(),
            DatastreamMeta {
                label: dsid.to_string(),
                mime_type: mime_type.to_string(),
                control_group: super::MANAGED_CONTROL_GROUP.to_string(),
            },
        );
        write_manifest(&dir, &manifest).await
    }

    /// MIME type recorded for `dsid`, if the datastream exists.
    pub async fn datastream_mime_type(
        &self,
        object: &ObjectId,
        dsid: &str,
    ) -> Result<Option<String>, RepositoryError> {
        let manifest = read_manifest(&self.object_dir(object), object).await?;
        Ok(manifest.datastreams.get(dsid).map(|m| m.mime_type.clone()))
    }
}

#[async_trait]
impl ContentSource for FsRepository {
    async fn fetch_datastream(
        &self,
        object: &ObjectId,
        dsid: &str,
    ) -> Result<DatastreamContent, RepositoryError> {
        let dir = self.object_dir(object);
        let manifest = read_manifest(&dir, object).await?;
        let meta = manifest
            .datastreams
            .get(dsid)
            .ok_or_else(|| RepositoryError::DatastreamNotFound {
                object: object.to_string(),
                dsid: dsid.to_string(),
            })?;
        let path = dir.join(DATASTREAM_DIR).join(dsid);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| RepositoryError::Io { path, source })?;
        Ok(DatastreamContent {
            bytes,
            mime_type: meta.mime_type.clone(),
        })
    }

    async fn has_datastream(&self, object: &ObjectId, dsid: &str) -> Result<bool, RepositoryError> {
        let manifest = read_manifest(&self.object_dir(object), object).await?;
        Ok(manifest.datastreams.contains_key(dsid))
    }
}

#[async_trait]
impl DatastreamSink for FsRepository {
    async fn write_datastream(
        &self,
        object: &ObjectId,
        write: &DatastreamWrite,
    ) -> Result<(), RepositoryError> {
        let _guard = self.manifest_lock.lock().await;
        let dir = self.object_dir(object);
        let mut manifest = read_manifest(&dir, object).await?;

        // Copy beside the target, then rename, so readers never see a
        // half-written datastream.
        let target = dir.join(DATASTREAM_DIR).join(&write.dsid);
        let staging = target.with_extension("partial");
        tokio::fs::copy(&write.file, &staging)
            .await
            .map_err(|source| RepositoryError::Io {
                path: write.file.clone(),
                source,
            })?;
        tokio::fs::rename(&staging, &target)
            .await
            .map_err(|source| RepositoryError::Io {
                path: target.clone(),
                source,
            })?;

        manifest.datastreams.insert(
            write.dsid.clone(),
            DatastreamMeta {
                label: write.label.clone(),
                mime_type: write.mime_type.clone(),
                control_group: write.control_group.clone(),
            },
        );
        write_manifest(&dir, &manifest).await?;
        debug!("stored {} on {} ({})", write.dsid, object, write.mime_type);
        Ok(())
    }
}

#[async_trait]
impl RelationshipStore for FsRepository {
    async fn get_relationships(
        &self,
        object: &ObjectId,
        namespace: &str,
        predicate: &str,
    ) -> Result<Vec<String>, RepositoryError> {
        let manifest = read_manifest(&self.object_dir(object), object).await?;
        Ok(manifest
            .relationships
            .into_iter()
            .filter(|r| r.namespace == namespace && r.predicate == predicate)
            .map(|r| r.value)
            .collect())
    }

    async fn add_relationship(
        &self,
        object: &ObjectId,
        namespace: &str,
        predicate: &str,
        value: &str,
    ) -> Result<(), RepositoryError> {
        let _guard = self.manifest_lock.lock().await;
        let dir = self.object_dir(object);
        let mut manifest = read_manifest(&dir, object).await?;
        manifest.relationships.push(RelationshipEntry {
            namespace: namespace.to_string(),
            predicate: predicate.to_string(),
            value: value.to_string(),
        });
        write_manifest(&dir, &manifest).await
    }

    async fn remove_relationship(
        &self,
        object: &ObjectId,
        namespace: &str,
        predicate: &str,
        value: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let _guard = self.manifest_lock.lock().await;
        let dir = self.object_dir(object);
        let mut manifest = read_manifest(&dir, object).await?;
        manifest.relationships.retain(|r| {
            !(r.namespace == namespace
                && r.predicate == predicate
                && value.map_or(true, |v| v == r.value))
        });
        write_manifest(&dir, &manifest).await
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn encode_object_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for b in id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

async fn read_manifest(dir: &Path, object: &ObjectId) -> Result<Manifest, RepositoryError> {
    let path = dir.join(MANIFEST);
    let raw = match tokio::fs::read(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RepositoryError::ObjectNotFound(object.to_string()))
        }
        Err(source) => return Err(RepositoryError::Io { path, source }),
    };
    serde_json::from_slice(&raw)
        .map_err(|e| RepositoryError::Malformed(format!("{}: {}", path.display(), e)))
}

async fn write_manifest(dir: &Path, manifest: &Manifest) -> Result<(), RepositoryError> {
    let path = dir.join(MANIFEST);
    let tmp = dir.join(format!("{MANIFEST}.tmp"));
    let json = serde_json::to_vec_pretty(manifest)
        .map_err(|e| RepositoryError::Malformed(e.to_string()))?;
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|source| RepositoryError::Io {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, &path)
        .await
        .map_err(|source| RepositoryError::Io { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{HAS_LANGUAGE, RELS_EXT_NAMESPACE};

    #[test]
    fn object_ids_are_percent_encoded() {
        assert_eq!(encode_object_id("islandora:42"), "islandora%3A42");
        assert_eq!(encode_object_id("a/b"), "a%2Fb");
        assert_eq!(encode_object_id("plain-id_1.0"), "plain-id_1.0");
    }

    #[tokio::test]
    async fn datastream_and_relationships_persist() {
        let root = tempfile::tempdir().unwrap();
        let repo = FsRepository::new(root.path());
        let pid = ObjectId::from("book:7");

        repo.put_datastream(&pid, "OBJ", "image/jpeg", b"jpegbytes")
            .await
            .unwrap();
        repo.add_relationship(&pid, RELS_EXT_NAMESPACE, HAS_LANGUAGE, "fra")
            .await
            .unwrap();

        // A fresh handle sees the same state.
        let reopened = FsRepository::new(root.path());
        let content = reopened.fetch_datastream(&pid, "OBJ").await.unwrap();
        assert_eq!(content.bytes, b"jpegbytes");
        assert_eq!(content.mime_type, "image/jpeg");
        assert!(reopened.has_datastream(&pid, "OBJ").await.unwrap());
        assert!(!reopened.has_datastream(&pid, "OCR").await.unwrap());
        assert_eq!(
            reopened
                .get_relationships(&pid, RELS_EXT_NAMESPACE, HAS_LANGUAGE)
                .await
                .unwrap(),
            vec!["fra".to_string()]
        );
    }

    #[tokio::test]
    async fn write_copies_and_records_metadata() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let repo = FsRepository::new(root.path());
        let pid = ObjectId::from("book:8");
        repo.create_object(&pid).await.unwrap();

        let file = scratch.path().join("page.html");
        std::fs::write(&file, "<html/>").unwrap();
        repo.write_datastream(
            &pid,
            &DatastreamWrite {
                dsid: "HOCR".into(),
                label: "HOCR".into(),
                mime_type: "text/html".into(),
                control_group: "M".into(),
                file: file.clone(),
            },
        )
        .await
        .unwrap();

        assert!(file.exists(), "sink must not consume the caller's file");
        let stored = repo.fetch_datastream(&pid, "HOCR").await.unwrap();
        assert_eq!(stored.bytes, b"<html/>");
        assert_eq!(
            repo.datastream_mime_type(&pid, "HOCR").await.unwrap().as_deref(),
            Some("text/html")
        );
    }

    #[tokio::test]
    async fn missing_object_reports_not_found() {
        let root = tempfile::tempdir().unwrap();
        let repo = FsRepository::new(root.path());
        let err = repo
            .get_relationships(&ObjectId::from("x:1"), "ns", "p")
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::ObjectNotFound(_)));
    }
}
