//! In-memory repository.

use super::{
    ContentSource, DatastreamContent, DatastreamSink, DatastreamWrite, ObjectId,
    RelationshipStore,
};
use crate::error::RepositoryError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// A datastream as held by [`MemoryRepository`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDatastream {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub label: String,
    pub control_group: String,
}

#[derive(Debug, Default, Clone)]
struct MemoryObject {
    datastreams: BTreeMap<String, StoredDatastream>,
    relationships: Vec<(String, String, String)>,
}

/// A repository that lives entirely in memory.
///
/// Objects must be created with [`MemoryRepository::add_object`] before any
/// capability call touches them; unknown objects yield
/// [`RepositoryError::ObjectNotFound`], as a real repository would.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    objects: Mutex<HashMap<ObjectId, MemoryObject>>,
    fail_writes: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_object(&self, object: impl Into<ObjectId>) {
        self.lock().entry(object.into()).or_default();
    }

    /// Store a datastream directly, bypassing the sink contract.
    pub fn put_datastream(
        &self,
        object: impl Into<ObjectId>,
        dsid: &str,
        mime_type: &str,
        bytes: impl Into<Vec<u8>>,
    ) {
        self.lock().entry(object.into()).or_default().datastreams.insert(
            dsid.to_string(),
            StoredDatastream {
                bytes: bytes.into(),
                mime_type: mime_type.to_string(),
                label: dsid.to_string(),
                control_group: super::MANAGED_CONTROL_GROUP.to_string(),
            },
        );
    }

    pub fn datastream(&self, object: &ObjectId, dsid: &str) -> Option<StoredDatastream> {
        self.lock()
            .get(object)
            .and_then(|o| o.datastreams.get(dsid).cloned())
    }

    /// Make every subsequent [`DatastreamSink::write_datastream`] fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ObjectId, MemoryObject>> {
        // A poisoned lock only means another test thread panicked mid-update;
        // the map itself is still usable.
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ContentSource for MemoryRepository {
    async fn fetch_datastream(
        &self,
        object: &ObjectId,
        dsid: &str,
    ) -> Result<DatastreamContent, RepositoryError> {
        let objects = self.lock();
        let obj = objects
            .get(object)
            .ok_or_else(|| RepositoryError::ObjectNotFound(object.to_string()))?;
        let ds = obj
            .datastreams
            .get(dsid)
            .ok_or_else(|| RepositoryError::DatastreamNotFound {
                object: object.to_string(),
                dsid: dsid.to_string(),
            })?;
        Ok(DatastreamContent {
            bytes: ds.bytes.clone(),
            mime_type: ds.mime_type.clone(),
        })
    }

    async fn has_datastream(&self, object: &ObjectId, dsid: &str) -> Result<bool, RepositoryError> {
        let objects = self.lock();
        let obj = objects
            .get(object)
            .ok_or_else(|| RepositoryError::ObjectNotFound(object.to_string()))?;
        Ok(obj.datastreams.contains_key(dsid))
    }
}

#[async_trait]
impl DatastreamSink for MemoryRepository {
    async fn write_datastream(
        &self,
        object: &ObjectId,
        write: &DatastreamWrite,
    ) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Malformed(format!(
                "write of {} rejected",
                write.dsid
            )));
        }
        let bytes = tokio::fs::read(&write.file)
            .await
            .map_err(|source| RepositoryError::Io {
                path: write.file.clone(),
                source,
            })?;

        let mut objects = self.lock();
        let obj = objects
            .get_mut(object)
            .ok_or_else(|| RepositoryError::ObjectNotFound(object.to_string()))?;
        obj.datastreams.insert(
            write.dsid.clone(),
            StoredDatastream {
                bytes,
                mime_type: write.mime_type.clone(),
                label: write.label.clone(),
                control_group: write.control_group.clone(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl RelationshipStore for MemoryRepository {
    async fn get_relationships(
        &self,
        object: &ObjectId,
        namespace: &str,
        predicate: &str,
    ) -> Result<Vec<String>, RepositoryError> {
        let objects = self.lock();
        let obj = objects
            .get(object)
            .ok_or_else(|| RepositoryError::ObjectNotFound(object.to_string()))?;
        Ok(obj
            .relationships
            .iter()
            .filter(|(ns, p, _)| ns == namespace && p == predicate)
            .map(|(_, _, v)| v.clone())
            .collect())
    }

    async fn add_relationship(
        &self,
        object: &ObjectId,
        namespace: &str,
        predicate: &str,
        value: &str,
    ) -> Result<(), RepositoryError> {
        let mut objects = self.lock();
        let obj = objects
            .get_mut(object)
            .ok_or_else(|| RepositoryError::ObjectNotFound(object.to_string()))?;
        obj.relationships
            .push((namespace.to_string(), predicate.to_string(), value.to_string()));
        Ok(())
    }

    async fn remove_relationship(
        &self,
        object: &ObjectId,
        namespace: &str,
        predicate: &str,
        value: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut objects = self.lock();
        let obj = objects
            .get_mut(object)
            .ok_or_else(|| RepositoryError::ObjectNotFound(object.to_string()))?;
        obj.relationships.retain(|(ns, p, v)| {
            !(ns == namespace && p == predicate && value.map_or(true, |want| want == v))
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{GENERATE_OCR, RELS_EXT_NAMESPACE};

    #[tokio::test]
    async fn relationships_round_trip() {
        let repo = MemoryRepository::new();
        let pid = ObjectId::from("book:1");
        repo.add_object(pid.clone());

        repo.add_relationship(&pid, RELS_EXT_NAMESPACE, GENERATE_OCR, "TRUE")
            .await
            .unwrap();
        assert_eq!(
            repo.get_relationships(&pid, RELS_EXT_NAMESPACE, GENERATE_OCR)
                .await
                .unwrap(),
            vec!["TRUE".to_string()]
        );

        repo.remove_relationship(&pid, RELS_EXT_NAMESPACE, GENERATE_OCR, None)
            .await
            .unwrap();
        assert!(repo
            .get_relationships(&pid, RELS_EXT_NAMESPACE, GENERATE_OCR)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn remove_with_value_keeps_others() {
        let repo = MemoryRepository::new();
        let pid = ObjectId::from("book:1");
        repo.add_object(pid.clone());
        repo.add_relationship(&pid, "ns", "p", "a").await.unwrap();
        repo.add_relationship(&pid, "ns", "p", "b").await.unwrap();
        repo.remove_relationship(&pid, "ns", "p", Some("a")).await.unwrap();
        assert_eq!(
            repo.get_relationships(&pid, "ns", "p").await.unwrap(),
            vec!["b".to_string()]
        );
    }

    #[tokio::test]
    async fn unknown_object_is_an_error() {
        let repo = MemoryRepository::new();
        let err = repo
            .has_datastream(&ObjectId::from("nope:1"), "OBJ")
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::ObjectNotFound(_)));
    }

    #[tokio::test]
    async fn write_reads_file_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ocr.txt");
        std::fs::write(&file, "hello").unwrap();

        let repo = MemoryRepository::new();
        let pid = ObjectId::from("book:1");
        repo.add_object(pid.clone());
        repo.write_datastream(
            &pid,
            &DatastreamWrite {
                dsid: "OCR".into(),
                label: "OCR".into(),
                mime_type: "text/plain".into(),
                control_group: "M".into(),
                file,
            },
        )
        .await
        .unwrap();

        let ds = repo.datastream(&pid, "OCR").unwrap();
        assert_eq!(ds.bytes, b"hello");
        assert_eq!(ds.mime_type, "text/plain");
        assert_eq!(ds.label, "OCR");
    }
}
