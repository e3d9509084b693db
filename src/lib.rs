//! # ocr-derivatives
//!
//! Derive plain-text OCR and positional HOCR datastreams from scanned page
//! images held in a digital repository.
//!
//! The recognition itself is done by the external `tesseract` binary; this
//! crate is the glue around it. It makes sure tesseract gets an image it can
//! read, copes with the HOCR file naming change between tesseract releases,
//! validates the markup it produces, and keeps derivatives in step with the
//! object's `hasLanguage` / `generate_ocr` relationships.
//!
//! ## Pipeline Overview
//!
//! ```text
//! page object
//!  │
//!  ├─ 1. Decide   read hasLanguage / generate_ocr, skip or generate
//!  ├─ 2. Acquire  copy the OBJ datastream into a private scratch dir
//!  ├─ 3. Normalise identify depth/codec/alpha, convert to 8-bit gray TIFF
//!  ├─ 4. Recognise tesseract → .txt and tesseract hocr → .html (concurrently)
//!  └─ 5. Reconcile write OCR / HOCR datastreams, drop generate_ocr
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ocr_derivatives::{Deriver, FsRepository, ObjectId, PipelineConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let repo = Arc::new(FsRepository::new("/srv/objects"));
//!     let config = PipelineConfig::builder().default_language("eng").build()?;
//!     let deriver = Deriver::new(config, repo)?;
//!
//!     let report = deriver.derive_page(&ObjectId::from("book:1")).await?;
//!     for outcome in &report.outcomes {
//!         println!("{}: {:?}", outcome.kind, outcome.status);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ocrderive` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! ocr-derivatives = { version = "0.1", default-features = false }
//! ```
//!
//! ## External Tools
//!
//! | Tool | Used for | Configured by |
//! |------|----------|---------------|
//! | `tesseract` | OCR, HOCR, `--version`, `--list-langs` | [`PipelineConfig::tesseract_path`] |
//! | `identify`  | depth / codec / alpha probe | [`PipelineConfig::identify_path`] |
//! | `convert`   | normalisation to gray TIFF | [`PipelineConfig::convert_path`] |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod derive;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod repository;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConvertArgsHook, PipelineConfig, PipelineConfigBuilder};
pub use derive::Deriver;
pub use error::{DeriveError, PageFailure, ProcessError, RepositoryError, StageError};
pub use output::{
    BatchOutput, BatchStats, Channel, DerivativeKind, DerivativeOutcome, DerivativeStatus,
    Message, OutcomeReport, PageReport, Severity, SkipReason,
};
pub use pipeline::tesseract::{Tesseract, ToolVersion};
pub use process::{CommandSpec, ProcessOutput, ProcessRunner, TokioProcessRunner};
pub use progress::{DeriveProgressCallback, NoopProgressCallback, ProgressCallback};
pub use repository::{
    ContentSource, DatastreamContent, DatastreamSink, DatastreamWrite, FedoraRepository,
    FsRepository, GenerateOcr, Language, MemoryRepository, ObjectId, RelationshipStore,
    Repository,
};
pub use stream::{derive_stream, PageStream};
