//! Repository capability traits and the metadata types read from them.
//!
//! The pipeline never talks to a concrete repository. It consumes three narrow
//! capabilities:
//!
//! * [`ContentSource`]: read datastream bytes and check for existence
//! * [`DatastreamSink`]: create or replace a datastream from a local file
//! * [`RelationshipStore`]: read and edit RELS-EXT style relationships
//!
//! Any type implementing all three is a [`Repository`]. Three backends ship
//! with the crate: [`MemoryRepository`] for tests and embedding,
//! [`FsRepository`] for a plain directory tree, and [`FedoraRepository`] for a
//! Fedora Commons 3 REST endpoint.

mod fedora;
mod fs;
mod memory;

pub use fedora::FedoraRepository;
pub use fs::FsRepository;
pub use memory::MemoryRepository;

use crate::error::RepositoryError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Namespace of the Islandora RELS-EXT predicates read by the pipeline.
pub const RELS_EXT_NAMESPACE: &str = "http://islandora.ca/ontology/relsext#";

/// Predicate naming the OCR language of a page.
pub const HAS_LANGUAGE: &str = "hasLanguage";

/// Predicate carrying the transient batch directive.
pub const GENERATE_OCR: &str = "generate_ocr";

/// Control group for repository-managed content.
pub const MANAGED_CONTROL_GROUP: &str = "M";

/// Identifier of a repository object, e.g. `islandora:42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ObjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Bytes of a datastream together with its declared MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatastreamContent {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// A request to create or replace a datastream from a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatastreamWrite {
    pub dsid: String,
    pub label: String,
    pub mime_type: String,
    pub control_group: String,
    pub file: PathBuf,
}

/// Read access to datastream content.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch_datastream(
        &self,
        object: &ObjectId,
        dsid: &str,
    ) -> Result<DatastreamContent, RepositoryError>;

    async fn has_datastream(&self, object: &ObjectId, dsid: &str) -> Result<bool, RepositoryError>;
}

/// Write access to datastreams.
#[async_trait]
pub trait DatastreamSink: Send + Sync {
    /// Create the datastream if absent, then set its content, label and MIME
    /// type from `write` and persist it on the object.
    ///
    /// The local file is left in place; the caller owns it.
    async fn write_datastream(
        &self,
        object: &ObjectId,
        write: &DatastreamWrite,
    ) -> Result<(), RepositoryError>;
}

/// Read/write access to literal-valued relationships.
#[async_trait]
pub trait RelationshipStore: Send + Sync {
    /// All literal values of `namespace` + `predicate` on `object`, in
    /// storage order.
    async fn get_relationships(
        &self,
        object: &ObjectId,
        namespace: &str,
        predicate: &str,
    ) -> Result<Vec<String>, RepositoryError>;

    async fn add_relationship(
        &self,
        object: &ObjectId,
        namespace: &str,
        predicate: &str,
        value: &str,
    ) -> Result<(), RepositoryError>;

    /// Remove matching relationships. `value: None` removes every value of
    /// the predicate.
    async fn remove_relationship(
        &self,
        object: &ObjectId,
        namespace: &str,
        predicate: &str,
        value: Option<&str>,
    ) -> Result<(), RepositoryError>;
}

/// Everything the pipeline needs from a repository.
pub trait Repository: ContentSource + DatastreamSink + RelationshipStore {}

impl<T> Repository for T where T: ContentSource + DatastreamSink + RelationshipStore {}

// ── Relationship-derived metadata ────────────────────────────────────────

/// The `generate_ocr` batch directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GenerateOcr {
    /// No directive stored; behaves like [`GenerateOcr::Generate`].
    #[default]
    Default,
    /// Stored as `TRUE`.
    Generate,
    /// Stored as `FALSE`.
    Suppress,
}

impl GenerateOcr {
    /// Interpret the first stored value of the relation.
    ///
    /// Unrecognised values are treated as absent.
    pub fn from_relationship(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("true") => GenerateOcr::Generate,
            Some(v) if v.eq_ignore_ascii_case("false") => GenerateOcr::Suppress,
            Some(other) => {
                tracing::warn!("ignoring unrecognised generate_ocr value {:?}", other);
                GenerateOcr::Default
            }
            None => GenerateOcr::Default,
        }
    }

    pub fn allows_generation(self) -> bool {
        !matches!(self, GenerateOcr::Suppress)
    }
}

/// The `hasLanguage` relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    /// A Tesseract language specification such as `eng` or `eng+fra`.
    Code(String),
    /// The `no_ocr` sentinel.
    NoOcr,
}

impl Language {
    pub const NO_OCR: &'static str = "no_ocr";

    /// Interpret the first stored value, falling back to `default` when the
    /// relation is absent or blank.
    pub fn from_relationship(value: Option<&str>, default: &str) -> Self {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(Self::NO_OCR) => Language::NoOcr,
            Some(code) => Language::Code(code.to_string()),
            None => Language::Code(default.to_string()),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Language::Code(c) => Some(c),
            Language::NoOcr => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Code(c) => f.write_str(c),
            Language::NoOcr => f.write_str(Self::NO_OCR),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_flag_parsing() {
        assert_eq!(GenerateOcr::from_relationship(None), GenerateOcr::Default);
        assert_eq!(GenerateOcr::from_relationship(Some("TRUE")), GenerateOcr::Generate);
        assert_eq!(GenerateOcr::from_relationship(Some("true")), GenerateOcr::Generate);
        assert_eq!(GenerateOcr::from_relationship(Some("FALSE")), GenerateOcr::Suppress);
        assert_eq!(GenerateOcr::from_relationship(Some(" False ")), GenerateOcr::Suppress);
        assert_eq!(GenerateOcr::from_relationship(Some("maybe")), GenerateOcr::Default);
    }

    #[test]
    fn only_suppress_blocks_generation() {
        assert!(GenerateOcr::Default.allows_generation());
        assert!(GenerateOcr::Generate.allows_generation());
        assert!(!GenerateOcr::Suppress.allows_generation());
    }

    #[test]
    fn language_parsing() {
        assert_eq!(
            Language::from_relationship(None, "eng"),
            Language::Code("eng".into())
        );
        assert_eq!(
            Language::from_relationship(Some("  "), "deu"),
            Language::Code("deu".into())
        );
        assert_eq!(
            Language::from_relationship(Some("fra"), "eng"),
            Language::Code("fra".into())
        );
        assert_eq!(Language::from_relationship(Some("no_ocr"), "eng"), Language::NoOcr);
        assert_eq!(Language::NoOcr.to_string(), "no_ocr");
        assert_eq!(Language::NoOcr.code(), None);
    }
}
