//! Error types for the ocr-derivatives library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`DeriveError`]: **Fatal**: the derivation cannot proceed or its result
//!   cannot be recorded (repository unreachable, scratch directory not
//!   writable, invalid configuration). Returned as `Err(DeriveError)` from the
//!   `Deriver::derive_*` entry points.
//!
//! * [`StageError`]: **Non-fatal**: one pipeline stage failed for one
//!   derivative (tool exited non-zero, output missing or malformed, source
//!   datastream unreadable). Stored inside [`crate::output::DerivativeOutcome`]
//!   so a failed HOCR run does not hide a successful OCR run for the same page.
//!
//! Two narrower error types sit underneath: [`ProcessError`] from a
//! [`crate::process::ProcessRunner`] and [`RepositoryError`] from the
//! repository capability traits.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the ocr-derivatives library.
///
/// Stage-level failures use [`StageError`] and are stored in
/// [`crate::output::DerivativeOutcome`] rather than propagated here.
#[derive(Debug, Error)]
pub enum DeriveError {
    // ── Repository errors ─────────────────────────────────────────────────
    /// Reading relationships or datastream state failed.
    #[error("Repository read failed for '{object}': {source}")]
    RepositoryRead {
        object: String,
        #[source]
        source: RepositoryError,
    },

    /// Writing a derivative or updating relationships failed.
    #[error("Repository write failed for '{object}' datastream {dsid}: {source}")]
    RepositoryWrite {
        object: String,
        dsid: String,
        #[source]
        source: RepositoryError,
    },

    // ── Scratch errors ────────────────────────────────────────────────────
    /// The per-run scratch directory could not be created.
    #[error("Failed to create scratch directory under '{}': {source}\nCheck --scratch-dir is writable.", .root.display())]
    ScratchDir {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A fatal error for one object of a streamed batch.
#[derive(Debug, Error)]
#[error("{object}: {error}")]
pub struct PageFailure {
    pub object: crate::repository::ObjectId,
    #[source]
    pub error: DeriveError,
}

/// A non-fatal failure of one pipeline stage for one derivative.
///
/// Every variant carries enough context to reproduce the failure by hand:
/// the exact command line and whatever the tool printed.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageError {
    /// The source datastream could not be fetched into scratch space.
    #[error("Source datastream {dsid} of '{object}' is unavailable: {detail}")]
    SourceUnavailable {
        object: String,
        dsid: String,
        detail: String,
    },

    /// The tool ran and exited non-zero.
    #[error("{tool} exited with code {exit_code:?}\ncommand: {command}\noutput: {output}")]
    ToolFailed {
        tool: String,
        exit_code: Option<i32>,
        command: String,
        output: String,
    },

    /// The tool could not be started at all.
    #[error("{tool} could not be executed: {detail}\ncommand: {command}")]
    ToolUnavailable {
        tool: String,
        command: String,
        detail: String,
    },

    /// The tool was killed after exceeding the configured timeout.
    #[error("{tool} timed out after {secs}s\ncommand: {command}")]
    TimedOut {
        tool: String,
        command: String,
        secs: u64,
    },

    /// The tool exited zero but the expected output file is absent.
    #[error("{tool} reported success but '{}' does not exist\ncommand: {command}\noutput: {output}", .path.display())]
    OutputMissing {
        tool: String,
        path: PathBuf,
        command: String,
        output: String,
    },

    /// The output exists but failed validation.
    #[error("Output '{}' is invalid: {detail}", .path.display())]
    OutputInvalid { path: PathBuf, detail: String },
}

impl StageError {
    /// Lift a runner-level error into a stage failure for `tool`.
    pub fn from_process(tool: &str, err: ProcessError) -> Self {
        match err {
            ProcessError::Spawn { command, source } => StageError::ToolUnavailable {
                tool: tool.to_string(),
                command,
                detail: source.to_string(),
            },
            ProcessError::TimedOut { command, secs } => StageError::TimedOut {
                tool: tool.to_string(),
                command,
                secs,
            },
            ProcessError::Wait { command, source } => StageError::ToolUnavailable {
                tool: tool.to_string(),
                command,
                detail: format!("wait failed: {source}"),
            },
        }
    }
}

/// Errors returned by a [`crate::process::ProcessRunner`].
///
/// A non-zero exit status is *not* an error at this level; it is returned
/// in [`crate::process::ProcessOutput`] for the caller to interpret.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {secs}s")]
    TimedOut { command: String, secs: u64 },
}

/// Errors raised by repository backends.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("object '{0}' not found")]
    ObjectNotFound(String),

    #[error("datastream {dsid} not found on '{object}'")]
    DatastreamNotFound { object: String, dsid: String },

    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP request to '{url}' failed: {reason}")]
    Http { url: String, reason: String },

    #[error("malformed repository data: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_failed_display_includes_command_and_output() {
        let e = StageError::ToolFailed {
            tool: "tesseract".into(),
            exit_code: Some(1),
            command: "tesseract a.tif a -l eng".into(),
            output: "Error opening data file".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("Some(1)"), "got: {msg}");
        assert!(msg.contains("tesseract a.tif a -l eng"));
        assert!(msg.contains("Error opening data file"));
    }

    #[test]
    fn from_process_maps_timeout() {
        let e = StageError::from_process(
            "convert",
            ProcessError::TimedOut {
                command: "convert a b".into(),
                secs: 30,
            },
        );
        assert_eq!(
            e,
            StageError::TimedOut {
                tool: "convert".into(),
                command: "convert a b".into(),
                secs: 30,
            }
        );
    }

    #[test]
    fn from_process_maps_spawn_failure() {
        let e = StageError::from_process(
            "identify",
            ProcessError::Spawn {
                command: "identify x".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            },
        );
        assert!(matches!(e, StageError::ToolUnavailable { ref tool, .. } if tool == "identify"));
    }

    #[test]
    fn stage_error_serialises_with_kind_tag() {
        let e = StageError::SourceUnavailable {
            object: "book:1".into(),
            dsid: "OBJ".into(),
            detail: "gone".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"kind\":\"source_unavailable\""), "got: {json}");
    }

    #[test]
    fn repository_write_display() {
        let e = DeriveError::RepositoryWrite {
            object: "book:1".into(),
            dsid: "OCR".into(),
            source: RepositoryError::ObjectNotFound("book:1".into()),
        };
        assert!(e.to_string().contains("OCR"));
        assert!(e.to_string().contains("book:1"));
    }
}
