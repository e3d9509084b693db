//! Derivative reconciliation: the public entry points.
//!
//! [`Deriver`] decides, per derivative, whether to skip or generate, runs the
//! pipeline stages and writes the results back to the repository.
//!
//! ```text
//! relations ─▶ skip? ──yes──▶ Skipped outcome
//!                │
//!                no
//!                ▼
//!   scratch ─▶ acquire ─▶ normalize ─┬─▶ ocr  ─▶ write OCR
//!                                    └─▶ hocr ─▶ write HOCR ─▶ drop generate_ocr
//! ```
//!
//! Stage failures become [`DerivativeStatus::Failed`] outcomes. Repository
//! failures abort the call with [`DeriveError`].

use crate::config::PipelineConfig;
use crate::error::{DeriveError, StageError};
use crate::output::{
    BatchOutput, BatchStats, Channel, DerivativeKind, DerivativeOutcome, DerivativeStatus,
    OutcomeReport, PageReport, Severity, SkipReason,
};
use crate::pipeline::acquire::acquire_source;
use crate::pipeline::hocr::run_hocr;
use crate::pipeline::normalize::normalize;
use crate::pipeline::ocr::run_ocr;
use crate::pipeline::tesseract::Tesseract;
use crate::pipeline::{remove_scratch_file, DerivativeResult, PageImage, Scratch, Toolchain};
use crate::process::{ProcessRunner, TokioProcessRunner};
use crate::repository::{
    DatastreamWrite, GenerateOcr, Language, ObjectId, Repository, GENERATE_OCR, HAS_LANGUAGE,
    RELS_EXT_NAMESPACE,
};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Derives OCR and HOCR datastreams for page objects of one repository.
///
/// Cheap to share: wrap it in an [`Arc`] to drive it from several tasks.
pub struct Deriver {
    config: Arc<PipelineConfig>,
    repository: Arc<dyn Repository>,
    tools: Arc<Toolchain>,
}

/// Relationship-derived state of one object.
struct ObjectState {
    language: Language,
    generate: GenerateOcr,
}

impl Deriver {
    /// Create a deriver that runs tools as real subprocesses.
    pub fn new(
        config: PipelineConfig,
        repository: Arc<dyn Repository>,
    ) -> Result<Self, DeriveError> {
        Self::with_runner(config, repository, Arc::new(TokioProcessRunner))
    }

    /// Create a deriver with a custom [`ProcessRunner`].
    pub fn with_runner(
        config: PipelineConfig,
        repository: Arc<dyn Repository>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Result<Self, DeriveError> {
        let tools = Toolchain::from_config(&config, runner)?;
        Ok(Self {
            config: Arc::new(config),
            repository,
            tools: Arc::new(tools),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn tesseract(&self) -> &Tesseract {
        &self.tools.tesseract
    }

    /// Derive the `OCR` datastream of `object`.
    pub async fn derive_ocr(
        &self,
        object: &ObjectId,
        force: bool,
    ) -> Result<DerivativeOutcome, DeriveError> {
        self.derive_one(object, DerivativeKind::Ocr, force).await
    }

    /// Derive the `HOCR` datastream of `object`.
    pub async fn derive_hocr(
        &self,
        object: &ObjectId,
        force: bool,
    ) -> Result<DerivativeOutcome, DeriveError> {
        self.derive_one(object, DerivativeKind::Hocr, force).await
    }

    /// Derive both datastreams, honouring [`PipelineConfig::force`].
    pub async fn derive_page(&self, object: &ObjectId) -> Result<PageReport, DeriveError> {
        self.derive(object, &DerivativeKind::ALL, self.config.force).await
    }

    async fn derive_one(
        &self,
        object: &ObjectId,
        kind: DerivativeKind,
        force: bool,
    ) -> Result<DerivativeOutcome, DeriveError> {
        let mut report = self.derive(object, &[kind], force).await?;
        report
            .outcomes
            .pop()
            .ok_or_else(|| DeriveError::Internal(format!("no {kind} outcome for {object}")))
    }

    /// Derive `kinds` for `object`.
    ///
    /// The source image is acquired and normalised once and shared by every
    /// derivative that needs generating. Outcomes are returned in the order
    /// of `kinds` (duplicates are ignored).
    pub async fn derive(
        &self,
        object: &ObjectId,
        kinds: &[DerivativeKind],
        force: bool,
    ) -> Result<PageReport, DeriveError> {
        let start = Instant::now();
        let mut requested: Vec<DerivativeKind> = Vec::with_capacity(kinds.len());
        for kind in kinds {
            if !requested.contains(kind) {
                requested.push(*kind);
            }
        }
        info!("Deriving {:?} for {} (force={})", requested, object, force);

        let state = self.read_state(object).await?;
        debug!(
            "{}: language={} generate_ocr={:?}",
            object, state.language, state.generate
        );

        let mut outcomes = Vec::with_capacity(requested.len());
        let mut pending = Vec::new();
        for kind in &requested {
            match self.skip_reason(object, *kind, &state, force).await? {
                Some(reason) => outcomes.push(skipped(object, *kind, reason)),
                None => pending.push(*kind),
            }
        }

        if let Some(language) = state.language.code().filter(|_| !pending.is_empty()) {
            outcomes.extend(self.generate(object, &pending, language).await?);
        }
        outcomes.sort_by_key(|o| requested.iter().position(|k| *k == o.kind));

        let report = PageReport {
            object: object.clone(),
            outcomes,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Finished {} in {}ms (success={})",
            object,
            report.duration_ms,
            report.success()
        );
        Ok(report)
    }

    /// Derive every object in `objects` with bounded concurrency.
    ///
    /// Fatal per-object errors are collected in [`BatchOutput::errors`]; the
    /// remaining objects still run. Pages are returned in submission order.
    pub async fn derive_batch(&self, objects: &[ObjectId], kinds: &[DerivativeKind]) -> BatchOutput {
        let start = Instant::now();
        let total = objects.len();
        let callback = self.config.progress_callback.clone();
        if let Some(ref cb) = callback {
            cb.on_batch_start(total);
        }

        let mut results: Vec<(usize, ObjectId, Result<PageReport, DeriveError>)> =
            stream::iter(objects.iter().enumerate().map(|(idx, object)| {
                let callback = callback.clone();
                async move {
                    if let Some(ref cb) = callback {
                        cb.on_page_start(idx + 1, total, object);
                    }
                    let result = self.derive(object, kinds, self.config.force).await;
                    if let Some(ref cb) = callback {
                        match &result {
                            Ok(report) => cb.on_page_complete(idx + 1, total, report),
                            Err(e) => cb.on_page_error(idx + 1, total, object, &e.to_string()),
                        }
                    }
                    (idx, object.clone(), result)
                }
            }))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(idx, _, _)| *idx);

        let mut pages = Vec::with_capacity(total);
        let mut errors = Vec::new();
        for (_, object, result) in results {
            match result {
                Ok(report) => pages.push(report),
                Err(e) => {
                    warn!("{} aborted: {}", object, e);
                    errors.push((object, e.to_string()));
                }
            }
        }

        let mut stats = BatchStats::from_reports(&pages, start.elapsed().as_millis() as u64);
        stats.total_pages = total;
        stats.failed_pages += errors.len();
        if let Some(ref cb) = callback {
            cb.on_batch_complete(total, stats.succeeded_pages);
        }
        info!(
            "Batch done: {}/{} pages succeeded, {} derivatives created in {}ms",
            stats.succeeded_pages, total, stats.derivatives_created, stats.total_duration_ms
        );
        BatchOutput {
            pages,
            errors,
            stats,
        }
    }

    async fn read_state(&self, object: &ObjectId) -> Result<ObjectState, DeriveError> {
        let read_err = |source| DeriveError::RepositoryRead {
            object: object.to_string(),
            source,
        };
        let language = self
            .repository
            .get_relationships(object, RELS_EXT_NAMESPACE, HAS_LANGUAGE)
            .await
            .map_err(read_err)?;
        let generate = self
            .repository
            .get_relationships(object, RELS_EXT_NAMESPACE, GENERATE_OCR)
            .await
            .map_err(read_err)?;
        Ok(ObjectState {
            language: Language::from_relationship(
                language.first().map(String::as_str),
                &self.config.default_language,
            ),
            generate: GenerateOcr::from_relationship(generate.first().map(String::as_str)),
        })
    }

    async fn skip_reason(
        &self,
        object: &ObjectId,
        kind: DerivativeKind,
        state: &ObjectState,
        force: bool,
    ) -> Result<Option<SkipReason>, DeriveError> {
        if state.language == Language::NoOcr {
            return Ok(Some(SkipReason::NoOcrLanguage));
        }
        if !state.generate.allows_generation() {
            return Ok(Some(SkipReason::Suppressed));
        }
        if force {
            return Ok(None);
        }
        let exists = self
            .repository
            .has_datastream(object, kind.dsid())
            .await
            .map_err(|source| DeriveError::RepositoryRead {
                object: object.to_string(),
                source,
            })?;
        Ok(exists.then_some(SkipReason::AlreadyPresent))
    }

    /// Acquire, normalise, invoke and write for every kind in `pending`.
    async fn generate(
        &self,
        object: &ObjectId,
        pending: &[DerivativeKind],
        language: &str,
    ) -> Result<Vec<DerivativeOutcome>, DeriveError> {
        let scratch = Scratch::create(&self.config.scratch_root())?;
        let source_dsid = &self.config.source_dsid;

        let image = match acquire_source(&*self.repository, object, source_dsid, scratch.path()).await {
            Ok(image) => image,
            Err(e) => return Ok(self.all_failed(object, pending, e)),
        };
        let acquired = image.path.clone();
        let image = match normalize(&self.tools, image).await {
            Ok(image) => image,
            Err(e) => {
                remove_scratch_file(&acquired).await;
                return Ok(self.all_failed(object, pending, e));
            }
        };

        let stem = image
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "page".to_string());
        let results = join_all(pending.iter().map(|kind| {
            let base = scratch.path().join(match kind {
                DerivativeKind::Ocr => format!("{stem}.ocr"),
                DerivativeKind::Hocr => format!("{stem}.hocr"),
            });
            self.invoke(*kind, &image, base, language)
        }))
        .await;

        let mut outcomes = Vec::with_capacity(pending.len());
        let mut written = Ok(());
        for (kind, result) in pending.iter().zip(results) {
            if written.is_err() {
                if let Ok(ref artifact) = result {
                    remove_scratch_file(artifact).await;
                }
                continue;
            }
            match result {
                Ok(artifact) => match self.store(object, *kind, &artifact).await {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => written = Err(e),
                },
                Err(e) => outcomes.push(self.failed(object, *kind, e)),
            }
        }

        remove_scratch_file(&image.path).await;
        written.map(|()| outcomes)
    }

    async fn invoke(
        &self,
        kind: DerivativeKind,
        image: &PageImage,
        base: PathBuf,
        language: &str,
    ) -> DerivativeResult {
        match kind {
            DerivativeKind::Ocr => run_ocr(&self.tools, image, &base, language).await,
            DerivativeKind::Hocr => run_hocr(&self.tools, image, &base, language).await,
        }
    }

    /// Write `artifact` as the `kind` datastream, then delete it.
    async fn store(
        &self,
        object: &ObjectId,
        kind: DerivativeKind,
        artifact: &Path,
    ) -> Result<DerivativeOutcome, DeriveError> {
        let dsid = kind.dsid();
        let write = DatastreamWrite {
            dsid: dsid.to_string(),
            label: dsid.to_string(),
            mime_type: mime_guess::from_path(artifact)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
            control_group: self.config.control_group.clone(),
            file: artifact.to_path_buf(),
        };
        let write_err = |source| DeriveError::RepositoryWrite {
            object: object.to_string(),
            dsid: dsid.to_string(),
            source,
        };

        let result = self.repository.write_datastream(object, &write).await;
        remove_scratch_file(artifact).await;
        result.map_err(write_err)?;
        info!("Wrote {} ({}) to {}", dsid, write.mime_type, object);

        if kind == DerivativeKind::Hocr {
            self.repository
                .remove_relationship(object, RELS_EXT_NAMESPACE, GENERATE_OCR, None)
                .await
                .map_err(|source| DeriveError::RepositoryWrite {
                    object: object.to_string(),
                    dsid: "RELS-EXT".to_string(),
                    source,
                })?;
            debug!("Removed {} from {}", GENERATE_OCR, object);
        }

        Ok(DerivativeOutcome {
            kind,
            status: DerivativeStatus::Created,
            report: OutcomeReport::succeeded().with(
                format!(
                    "Created {} datastream on {} from {}",
                    dsid, object, self.config.source_dsid
                ),
                Severity::Info,
                Channel::Log,
            ),
        })
    }

    fn failed(&self, object: &ObjectId, kind: DerivativeKind, error: StageError) -> DerivativeOutcome {
        let report = OutcomeReport::failed().with(
            format!(
                "Could not create {} datastream on {} from {}: {}",
                kind.dsid(),
                object,
                self.config.source_dsid,
                error
            ),
            Severity::Error,
            Channel::Log,
        );
        DerivativeOutcome {
            kind,
            status: DerivativeStatus::Failed { error },
            report,
        }
    }

    fn all_failed(
        &self,
        object: &ObjectId,
        kinds: &[DerivativeKind],
        error: StageError,
    ) -> Vec<DerivativeOutcome> {
        kinds
            .iter()
            .map(|kind| self.failed(object, *kind, error.clone()))
            .collect()
    }
}

fn skipped(object: &ObjectId, kind: DerivativeKind, reason: SkipReason) -> DerivativeOutcome {
    let text = match reason {
        SkipReason::AlreadyPresent => format!(
            "{} already exists on {}; not regenerated (use force to replace it)",
            kind.dsid(),
            object
        ),
        _ => format!("Skipped {} for {}: {}", kind.dsid(), object, reason),
    };
    DerivativeOutcome {
        kind,
        status: DerivativeStatus::Skipped { reason },
        report: OutcomeReport::succeeded().with(text, Severity::Notice, Channel::User),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemoryRepository, RelationshipStore};

    fn deriver(repo: Arc<MemoryRepository>) -> Deriver {
        let config = PipelineConfig::builder()
            .tesseract_path("/nonexistent/tesseract")
            .convert_path("/nonexistent/convert")
            .build()
            .unwrap();
        Deriver::new(config, repo).unwrap()
    }

    #[tokio::test]
    async fn no_ocr_language_skips_both() {
        let repo = Arc::new(MemoryRepository::new());
        let pid = ObjectId::from("book:1");
        repo.add_object(pid.clone());
        repo.add_relationship(&pid, RELS_EXT_NAMESPACE, HAS_LANGUAGE, "no_ocr")
            .await
            .unwrap();

        let report = deriver(Arc::clone(&repo)).derive_page(&pid).await.unwrap();
        assert!(report.success());
        assert_eq!(report.outcomes.len(), 2);
        for o in &report.outcomes {
            assert_eq!(
                o.status,
                DerivativeStatus::Skipped {
                    reason: SkipReason::NoOcrLanguage
                }
            );
            assert_eq!(o.report.messages_on(Channel::User).count(), 1);
        }
    }

    #[tokio::test]
    async fn existing_datastream_is_reported_as_already_present() {
        let repo = Arc::new(MemoryRepository::new());
        let pid = ObjectId::from("book:1");
        repo.put_datastream(pid.clone(), "OCR", "text/plain", b"old".to_vec());

        let outcome = deriver(Arc::clone(&repo)).derive_ocr(&pid, false).await.unwrap();
        assert_eq!(
            outcome.status,
            DerivativeStatus::Skipped {
                reason: SkipReason::AlreadyPresent
            }
        );
        assert!(outcome.is_success());
        assert!(outcome.report.messages[0].text.contains("already exists"));
        assert_eq!(repo.datastream(&pid, "OCR").unwrap().bytes, b"old");
    }

    #[tokio::test]
    async fn unknown_object_is_fatal() {
        let repo = Arc::new(MemoryRepository::new());
        let err = deriver(repo)
            .derive_page(&ObjectId::from("missing:1"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeriveError::RepositoryRead { .. }));
    }

    #[tokio::test]
    async fn missing_source_fails_without_running_tools() {
        let repo = Arc::new(MemoryRepository::new());
        let pid = ObjectId::from("book:1");
        repo.add_object(pid.clone());

        let report = deriver(Arc::clone(&repo)).derive_page(&pid).await.unwrap();
        assert!(!report.success());
        for o in &report.outcomes {
            assert!(matches!(
                o.error(),
                Some(StageError::SourceUnavailable { .. })
            ));
            let text = &o.report.messages[0].text;
            assert!(text.contains("OBJ") && text.contains(o.kind.dsid()) && text.contains("book:1"));
        }
        assert!(repo.datastream(&pid, "OCR").is_none());
    }

    #[tokio::test]
    async fn duplicate_kinds_are_collapsed() {
        let repo = Arc::new(MemoryRepository::new());
        let pid = ObjectId::from("book:1");
        repo.add_object(pid.clone());
        repo.add_relationship(&pid, RELS_EXT_NAMESPACE, GENERATE_OCR, "FALSE")
            .await
            .unwrap();

        let report = deriver(repo)
            .derive(
                &pid,
                &[DerivativeKind::Hocr, DerivativeKind::Ocr, DerivativeKind::Hocr],
                true,
            )
            .await
            .unwrap();
        let kinds: Vec<_> = report.outcomes.iter().map(|o| o.kind).collect();
        assert_eq!(kinds, vec![DerivativeKind::Hocr, DerivativeKind::Ocr]);
        assert!(report.outcomes.iter().all(DerivativeOutcome::was_skipped));
    }
}
