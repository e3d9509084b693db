//! Configuration types for OCR derivative generation.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`] and handed to [`crate::Deriver::new`]. There
//! is no process-wide state: two derivers with different tool paths can run
//! side by side in one process.

use crate::error::DeriveError;
use crate::pipeline::hocr::HOCR_NAMING_BASELINE;
use crate::progress::ProgressCallback;
use crate::repository::MANAGED_CONTROL_GROUP;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Hook that may rewrite the image-conversion argument list before the
/// command is built.
///
/// `args` holds the flag tokens that sit between `<source>[0]` and
/// `<dest>`; the default list is [`crate::pipeline::normalize::DEFAULT_CONVERT_ARGS`].
pub trait ConvertArgsHook: Send + Sync {
    fn alter(&self, args: &mut Vec<String>, source: &Path, dest: &Path);
}

impl<F> ConvertArgsHook for F
where
    F: Fn(&mut Vec<String>, &Path, &Path) + Send + Sync,
{
    fn alter(&self, args: &mut Vec<String>, source: &Path, dest: &Path) {
        self(args, source, dest)
    }
}

/// Configuration for OCR/HOCR derivation.
///
/// # Example
/// ```rust
/// use ocr_derivatives::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .tesseract_path("/usr/local/bin/tesseract")
///     .default_language("deu")
///     .process_timeout_secs(120)
///     .build()
///     .unwrap();
/// assert_eq!(config.default_language, "deu");
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// OCR executable. Default: `tesseract` (resolved on `PATH`).
    pub tesseract_path: PathBuf,

    /// ImageMagick `convert` executable. Default: `convert`.
    pub convert_path: PathBuf,

    /// ImageMagick `identify` executable. When `None` it is derived from
    /// [`Self::convert_path`] by swapping the file name.
    pub identify_path: Option<PathBuf>,

    /// Language used when an object carries no `hasLanguage` relation.
    /// Default: `eng`.
    pub default_language: String,

    /// Datastream holding the page master image. Default: `OBJ`.
    pub source_dsid: String,

    /// Control group for newly created derivative datastreams. Default: `M`.
    pub control_group: String,

    /// Regenerate even when the derivative already exists. Default: false.
    pub force: bool,

    /// Directory under which per-run scratch directories are created.
    /// Default: the system temp directory.
    pub scratch_root: Option<PathBuf>,

    /// Per-subprocess timeout in seconds; 0 disables it. Default: 300.
    pub process_timeout_secs: u64,

    /// Pages processed concurrently by the batch APIs. Default: 4.
    pub concurrency: usize,

    /// Tesseract versions newer than this write `.hocr` instead of `.html`.
    pub hocr_naming_baseline: String,

    /// Optional rewrite of the image-conversion arguments.
    pub convert_args_hook: Option<Arc<dyn ConvertArgsHook>>,

    /// Optional per-page progress events for the batch APIs.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tesseract_path: PathBuf::from("tesseract"),
            convert_path: PathBuf::from("convert"),
            identify_path: None,
            default_language: "eng".to_string(),
            source_dsid: "OBJ".to_string(),
            control_group: MANAGED_CONTROL_GROUP.to_string(),
            force: false,
            scratch_root: None,
            process_timeout_secs: 300,
            concurrency: 4,
            hocr_naming_baseline: HOCR_NAMING_BASELINE.to_string(),
            convert_args_hook: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("tesseract_path", &self.tesseract_path)
            .field("convert_path", &self.convert_path)
            .field("identify_path", &self.identify_path)
            .field("default_language", &self.default_language)
            .field("source_dsid", &self.source_dsid)
            .field("control_group", &self.control_group)
            .field("force", &self.force)
            .field("scratch_root", &self.scratch_root)
            .field("process_timeout_secs", &self.process_timeout_secs)
            .field("concurrency", &self.concurrency)
            .field("hocr_naming_baseline", &self.hocr_naming_baseline)
            .field(
                "convert_args_hook",
                &self.convert_args_hook.as_ref().map(|_| "<dyn ConvertArgsHook>"),
            )
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn DeriveProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// The `identify` executable actually used for probing.
    ///
    /// `/usr/bin/convert` → `/usr/bin/identify` unless
    /// [`Self::identify_path`] is set.
    pub fn resolved_identify_path(&self) -> PathBuf {
        if let Some(ref p) = self.identify_path {
            return p.clone();
        }
        let name = self
            .convert_path
            .file_name()
            .map(|n| n.to_string_lossy().replace("convert", "identify"))
            .unwrap_or_else(|| "identify".to_string());
        self.convert_path.with_file_name(name)
    }

    /// Timeout applied to each subprocess, if any.
    pub fn process_timeout(&self) -> Option<Duration> {
        (self.process_timeout_secs > 0).then(|| Duration::from_secs(self.process_timeout_secs))
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn tesseract_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tesseract_path = path.into();
        self
    }

    pub fn convert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.convert_path = path.into();
        self
    }

    pub fn identify_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.identify_path = Some(path.into());
        self
    }

    pub fn default_language(mut self, lang: impl Into<String>) -> Self {
        self.config.default_language = lang.into();
        self
    }

    pub fn source_dsid(mut self, dsid: impl Into<String>) -> Self {
        self.config.source_dsid = dsid.into();
        self
    }

    pub fn control_group(mut self, group: impl Into<String>) -> Self {
        self.config.control_group = group.into();
        self
    }

    pub fn force(mut self, v: bool) -> Self {
        self.config.force = v;
        self
    }

    pub fn scratch_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_root = Some(dir.into());
        self
    }

    pub fn process_timeout_secs(mut self, secs: u64) -> Self {
        self.config.process_timeout_secs = secs;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn hocr_naming_baseline(mut self, version: impl Into<String>) -> Self {
        self.config.hocr_naming_baseline = version.into();
        self
    }

    pub fn convert_args_hook(mut self, hook: Arc<dyn ConvertArgsHook>) -> Self {
        self.config.convert_args_hook = Some(hook);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, DeriveError> {
        let c = &self.config;
        if c.default_language.trim().is_empty() {
            return Err(DeriveError::InvalidConfig(
                "default language must not be empty".into(),
            ));
        }
        if c.source_dsid.trim().is_empty() {
            return Err(DeriveError::InvalidConfig(
                "source datastream id must not be empty".into(),
            ));
        }
        if !matches!(c.control_group.as_str(), "M" | "X" | "E" | "R") {
            return Err(DeriveError::InvalidConfig(format!(
                "control group must be one of M, X, E, R, got {:?}",
                c.control_group
            )));
        }
        if crate::pipeline::tesseract::ToolVersion::parse(&c.hocr_naming_baseline).is_none() {
            return Err(DeriveError::InvalidConfig(format!(
                "HOCR naming baseline {:?} is not a dotted version",
                c.hocr_naming_baseline
            )));
        }
        Ok(self.config)
    }
}
