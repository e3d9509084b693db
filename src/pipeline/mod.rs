//! Pipeline stages for OCR derivative generation.
//!
//! Each submodule implements exactly one step; [`crate::derive`] strings them
//! together and reconciles the results with the repository.
//!
//! ## Data Flow
//!
//! ```text
//! acquire ──▶ normalize ──┬──▶ ocr  ──▶ <base>.txt
//! (repo→tmp)  (identify/  │
//!              convert)   └──▶ hocr ──▶ <base>.html (validated, no DOCTYPE)
//! ```
//!
//! 1. [`acquire`]: copy the source datastream into the run's scratch dir
//! 2. [`normalize`]: probe depth/codec/alpha and convert to 8-bit gray TIFF
//!    when tesseract would choke on the original
//! 3. [`ocr`]: plain-text recognition
//! 4. [`hocr`]: positional markup, version-dependent naming, validation
//!
//! Stages never return `Err` across this boundary for tool problems: they
//! return [`DerivativeResult`] / `Result<_, StageError>` values that the
//! caller must inspect.

pub mod acquire;
pub mod hocr;
pub mod normalize;
pub mod ocr;
pub mod tesseract;

use crate::config::{ConvertArgsHook, PipelineConfig};
use crate::error::{DeriveError, StageError};
use crate::process::{CommandSpec, ProcessOutput, ProcessRunner};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tesseract::Tesseract;
use tracing::{error, warn};

/// Path to a generated artifact, or the reason there is none.
pub type DerivativeResult = Result<PathBuf, StageError>;

/// One page's working image inside the scratch directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub path: PathBuf,
    /// Bits per channel (`%z`), once probed.
    pub depth: Option<u32>,
    /// ImageMagick format name (`%m`), once probed.
    pub codec: Option<String>,
    /// Alpha channel presence (`%A`), once probed.
    pub has_alpha: Option<bool>,
}

impl PageImage {
    pub fn unprobed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            depth: None,
            codec: None,
            has_alpha: None,
        }
    }
}

/// Everything the stages need to run external tools.
pub struct Toolchain {
    pub runner: Arc<dyn ProcessRunner>,
    pub tesseract: Tesseract,
    pub identify: PathBuf,
    pub convert: PathBuf,
    pub timeout: Option<Duration>,
    pub convert_args_hook: Option<Arc<dyn ConvertArgsHook>>,
}

impl Toolchain {
    pub fn from_config(
        config: &PipelineConfig,
        runner: Arc<dyn ProcessRunner>,
    ) -> Result<Self, DeriveError> {
        let tesseract = Tesseract::new(
            config.tesseract_path.clone(),
            Arc::clone(&runner),
            config.process_timeout(),
            &config.hocr_naming_baseline,
        )?;
        Ok(Self {
            runner,
            tesseract,
            identify: config.resolved_identify_path(),
            convert: config.convert_path.clone(),
            timeout: config.process_timeout(),
            convert_args_hook: config.convert_args_hook.clone(),
        })
    }

    /// Run a command built from `program` + `args` under the configured
    /// timeout, mapping runner errors onto [`StageError`].
    pub async fn exec(
        &self,
        program: &Path,
        args: Vec<OsString>,
    ) -> Result<(CommandSpec, ProcessOutput), StageError> {
        let command = CommandSpec::new(program).args(args).timeout(self.timeout);
        let output = run_logged(self.runner.as_ref(), &command).await?;
        Ok((command, output))
    }
}

/// Run `command`, logging a spawn, wait or timeout failure once here.
pub(crate) async fn run_logged(
    runner: &dyn ProcessRunner,
    command: &CommandSpec,
) -> Result<ProcessOutput, StageError> {
    runner.run(command).await.map_err(|e| {
        let stage = StageError::from_process(&command.tool_name(), e);
        error!("{}", stage);
        stage
    })
}

/// Build the failure for a tool that exited non-zero, logging it once here.
pub(crate) fn tool_failed(command: &CommandSpec, output: ProcessOutput) -> StageError {
    error!(
        "{} failed with exit code {:?}\n  command: {}\n  output: {}",
        command.tool_name(),
        output.exit_code,
        command,
        output.output.trim_end()
    );
    StageError::ToolFailed {
        tool: command.tool_name(),
        exit_code: output.exit_code,
        command: command.to_string(),
        output: output.output,
    }
}

/// Build the failure for a tool that exited zero without writing `path`.
pub(crate) fn output_missing(command: &CommandSpec, output: ProcessOutput, path: &Path) -> StageError {
    error!(
        "{} exited {:?} but {} is missing\n  command: {}\n  output: {}",
        command.tool_name(),
        output.exit_code,
        path.display(),
        command,
        output.output.trim_end()
    );
    StageError::OutputMissing {
        tool: command.tool_name(),
        path: path.to_path_buf(),
        command: command.to_string(),
        output: output.output,
    }
}

/// `base` + `.ext`, keeping any dots already in the file name.
pub fn append_extension(base: &Path, ext: &str) -> PathBuf {
    let mut s = base.as_os_str().to_os_string();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

/// Private scratch directory for one pipeline run.
///
/// Files are removed explicitly as soon as each stage is done with them; the
/// directory itself goes away on drop, which also covers error returns and
/// cancelled futures.
#[derive(Debug)]
pub struct Scratch {
    dir: TempDir,
}

impl Scratch {
    pub fn create(root: &Path) -> Result<Self, DeriveError> {
        let dir = tempfile::Builder::new()
            .prefix("ocr-derive-")
            .tempdir_in(root)
            .map_err(|source| DeriveError::ScratchDir {
                root: root.to_path_buf(),
                source,
            })?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Remove a scratch file, tolerating its absence.
pub async fn remove_scratch_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("could not remove scratch file {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_extension_keeps_existing_dots() {
        assert_eq!(
            append_extension(Path::new("/tmp/book_1_OBJ.ocr"), "txt"),
            PathBuf::from("/tmp/book_1_OBJ.ocr.txt")
        );
        assert_eq!(
            append_extension(Path::new("page"), "html"),
            PathBuf::from("page.html")
        );
    }

    #[tokio::test]
    async fn scratch_dir_is_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let scratch = Scratch::create(root.path()).unwrap();
        let inner = scratch.path().to_path_buf();
        std::fs::write(inner.join("leftover"), b"x").unwrap();
        drop(scratch);
        assert!(!inner.exists());
    }

    #[tokio::test]
    async fn removing_missing_file_is_quiet() {
        let root = tempfile::tempdir().unwrap();
        remove_scratch_file(&root.path().join("never-existed")).await;
    }
}
