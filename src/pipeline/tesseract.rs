//! Tesseract command construction and introspection.

use crate::error::{DeriveError, StageError};
use crate::pipeline::{run_logged, tool_failed};
use crate::process::{CommandSpec, ProcessRunner};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, error};

/// A dotted numeric version such as `3.02.02` or `5.3.0`.
///
/// Compared component by component as integers; missing trailing components
/// count as zero, so `3.2` == `3.02.00` and `3.10` > `3.2`.
#[derive(Debug, Clone, Eq)]
pub struct ToolVersion {
    parts: Vec<u32>,
    raw: String,
}

static RE_LEADING_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v?(\d+(?:\.\d+)*)").unwrap());

static RE_TESSERACT_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*tesseract\s+v?(\d+(?:\.\d+)*)").unwrap());

impl ToolVersion {
    /// Parse the leading dotted-number part of `s` (`v5.0.0-alpha` → `5.0.0`).
    pub fn parse(s: &str) -> Option<Self> {
        let caps = RE_LEADING_VERSION.captures(s.trim())?;
        let raw = caps.get(1)?.as_str();
        let parts = raw
            .split('.')
            .map(|p| p.parse::<u32>().ok())
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            parts,
            raw: raw.to_string(),
        })
    }

    /// Extract the version from `tesseract --version` output.
    pub fn from_version_output(output: &str) -> Option<Self> {
        RE_TESSERACT_VERSION
            .captures(output)
            .and_then(|caps| caps.get(1))
            .and_then(|m| Self::parse(m.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl PartialEq for ToolVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for ToolVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ToolVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Handle on one tesseract executable.
///
/// The version is queried on first use and cached for the lifetime of the
/// handle.
pub struct Tesseract {
    path: PathBuf,
    runner: Arc<dyn ProcessRunner>,
    timeout: Option<Duration>,
    hocr_baseline: ToolVersion,
    version: OnceCell<ToolVersion>,
}

impl fmt::Debug for Tesseract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tesseract")
            .field("path", &self.path)
            .field("timeout", &self.timeout)
            .field("hocr_baseline", &self.hocr_baseline)
            .field("version", &self.version.get())
            .finish()
    }
}

impl Tesseract {
    pub fn new(
        path: PathBuf,
        runner: Arc<dyn ProcessRunner>,
        timeout: Option<Duration>,
        hocr_baseline: &str,
    ) -> Result<Self, DeriveError> {
        let hocr_baseline = ToolVersion::parse(hocr_baseline).ok_or_else(|| {
            DeriveError::InvalidConfig(format!(
                "HOCR naming baseline {hocr_baseline:?} is not a dotted version"
            ))
        })?;
        Ok(Self {
            path,
            runner,
            timeout,
            hocr_baseline,
            version: OnceCell::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn hocr_baseline(&self) -> &ToolVersion {
        &self.hocr_baseline
    }

    /// `tesseract <image> <base> -l <language> [hocr]`
    pub fn recognise_args(image: &Path, base: &Path, language: &str, hocr: bool) -> Vec<std::ffi::OsString> {
        let mut args = vec![
            image.as_os_str().to_os_string(),
            base.as_os_str().to_os_string(),
            "-l".into(),
            language.into(),
        ];
        if hocr {
            args.push("hocr".into());
        }
        args
    }

    /// Installed version, queried once via `--version`.
    pub async fn version(&self) -> Result<&ToolVersion, StageError> {
        self.version
            .get_or_try_init(|| async {
                let command = CommandSpec::new(&self.path)
                    .arg("--version")
                    .timeout(self.timeout);
                let output = run_logged(self.runner.as_ref(), &command).await?;
                if !output.success() {
                    return Err(tool_failed(&command, output));
                }
                match ToolVersion::from_version_output(&output.output) {
                    Some(v) => {
                        debug!("{} reports version {}", self.path.display(), v);
                        Ok(v)
                    }
                    None => {
                        error!(
                            "unrecognised version output from {}: {}",
                            command,
                            output.output.trim_end()
                        );
                        Err(StageError::ToolFailed {
                            tool: command.tool_name(),
                            exit_code: output.exit_code,
                            command: command.to_string(),
                            output: format!(
                                "could not find a version number in: {}",
                                output.output.trim_end()
                            ),
                        })
                    }
                }
            })
            .await
    }

    /// Whether this tesseract writes HOCR to `<base>.hocr` rather than
    /// `<base>.html`.
    pub async fn writes_hocr_extension(&self) -> Result<bool, StageError> {
        Ok(self.version().await? > &self.hocr_baseline)
    }

    /// Language packs reported by `--list-langs`.
    pub async fn list_languages(&self) -> Result<Vec<String>, StageError> {
        let command = CommandSpec::new(&self.path)
            .arg("--list-langs")
            .timeout(self.timeout);
        let output = run_logged(self.runner.as_ref(), &command).await?;
        if !output.success() {
            return Err(tool_failed(&command, output));
        }
        Ok(parse_language_list(&output.output))
    }
}

fn parse_language_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| !l.to_ascii_lowercase().starts_with("list of available languages"))
        .filter(|l| !l.contains(char::is_whitespace))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> ToolVersion {
        ToolVersion::parse(s).unwrap()
    }

    #[test]
    fn versions_compare_numerically() {
        assert!(v("3.03.00") > v("3.02.02"));
        assert!(v("3.01.00") < v("3.02.02"));
        assert!(v("3.02.02") == v("3.2.2"));
        assert!(v("3.10") > v("3.2"));
        assert!(v("4.1.1") > v("3.02.02"));
        assert!(v("3.02") < v("3.02.02"));
        assert_eq!(v("3.2"), v("3.2.0"));
    }

    #[test]
    fn parse_strips_prefix_and_suffix() {
        assert_eq!(v("v5.0.0-alpha.20201127").as_str(), "5.0.0");
        assert_eq!(v("4.1.1-rc2").as_str(), "4.1.1");
        assert!(ToolVersion::parse("alpha").is_none());
        assert!(ToolVersion::parse("").is_none());
    }

    #[test]
    fn version_from_tool_output() {
        let old = "tesseract 3.02.02\n leptonica-1.69\n  libgif 4.1.6(?) : libjpeg 8d\n";
        assert_eq!(ToolVersion::from_version_output(old).unwrap().as_str(), "3.02.02");

        let new = "tesseract v5.3.0.20221214\n leptonica-1.82.0\n";
        assert_eq!(
            ToolVersion::from_version_output(new).unwrap().as_str(),
            "5.3.0.20221214"
        );

        assert!(ToolVersion::from_version_output("command not found").is_none());
    }

    #[test]
    fn language_list_parsing() {
        let out = "List of available languages in \"/usr/share/tessdata/\" (3):\neng\nfra\nosd\n";
        assert_eq!(parse_language_list(out), vec!["eng", "fra", "osd"]);
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct MissingBinary;

    #[async_trait::async_trait]
    impl ProcessRunner for MissingBinary {
        async fn run(
            &self,
            command: &CommandSpec,
        ) -> Result<crate::process::ProcessOutput, crate::error::ProcessError> {
            Err(crate::error::ProcessError::Spawn {
                command: command.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
            })
        }
    }

    #[tokio::test]
    async fn missing_binary_is_logged_where_detected() {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let tesseract = Tesseract::new(
            PathBuf::from("/opt/missing/tesseract"),
            Arc::new(MissingBinary),
            None,
            "3.02.02",
        )
        .unwrap();
        let err = tesseract.version().await.unwrap_err();
        assert!(matches!(err, StageError::ToolUnavailable { ref tool, .. } if tool == "tesseract"));
        let err = tesseract.list_languages().await.unwrap_err();
        assert!(matches!(err, StageError::ToolUnavailable { .. }));

        let text = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        let errors: Vec<&str> = text.lines().filter(|l| l.contains(" ERROR ")).collect();
        assert_eq!(errors.len(), 2, "{text}");
        assert!(errors.iter().all(|l| l.contains("could not be executed")), "{text}");
    }

    #[test]
    fn recognise_args_layout() {
        let args = Tesseract::recognise_args(Path::new("/s/p.tif"), Path::new("/s/p.hocr"), "eng", true);
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["/s/p.tif", "/s/p.hocr", "-l", "eng", "hocr"]);
    }
}
