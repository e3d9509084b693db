//! Result types: outcome reports, per-derivative outcomes, batch statistics.

use crate::error::StageError;
use crate::repository::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a report message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Notice,
    Warning,
    Error,
}

/// Where a message is meant to be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Operator logs.
    Log,
    /// Shown to the person who triggered the run.
    User,
}

/// One entry of an [`OutcomeReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub severity: Severity,
    pub channel: Channel,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.severity, self.text)
    }
}

/// Success flag plus an append-only list of messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub success: bool,
    pub messages: Vec<Message>,
}

impl OutcomeReport {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            messages: Vec::new(),
        }
    }

    pub fn failed() -> Self {
        Self {
            success: false,
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, text: impl Into<String>, severity: Severity, channel: Channel) {
        self.messages.push(Message {
            text: text.into(),
            severity,
            channel,
        });
    }

    pub fn with(mut self, text: impl Into<String>, severity: Severity, channel: Channel) -> Self {
        self.push(text, severity, channel);
        self
    }

    /// Append `other`'s messages; success becomes the conjunction.
    pub fn merge(&mut self, other: &OutcomeReport) {
        self.success &= other.success;
        self.messages.extend(other.messages.iter().cloned());
    }

    pub fn messages_on(&self, channel: Channel) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(move |m| m.channel == channel)
    }
}

/// Which derivative a result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DerivativeKind {
    Ocr,
    Hocr,
}

impl DerivativeKind {
    pub const ALL: [DerivativeKind; 2] = [DerivativeKind::Ocr, DerivativeKind::Hocr];

    /// Destination datastream id.
    pub fn dsid(self) -> &'static str {
        match self {
            DerivativeKind::Ocr => "OCR",
            DerivativeKind::Hocr => "HOCR",
        }
    }
}

impl fmt::Display for DerivativeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dsid())
    }
}

/// Why a derivative was not generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// `hasLanguage` is `no_ocr`.
    NoOcrLanguage,
    /// `generate_ocr` is `FALSE`.
    Suppressed,
    /// Target exists and force was not requested.
    AlreadyPresent,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::NoOcrLanguage => "language is set to no_ocr",
            SkipReason::Suppressed => "generate_ocr is FALSE",
            SkipReason::AlreadyPresent => "datastream already exists",
        })
    }
}

/// Final state of one derivative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DerivativeStatus {
    Created,
    Skipped { reason: SkipReason },
    Failed { error: StageError },
}

/// Outcome of one derivative for one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivativeOutcome {
    pub kind: DerivativeKind,
    pub status: DerivativeStatus,
    pub report: OutcomeReport,
}

impl DerivativeOutcome {
    pub fn is_success(&self) -> bool {
        self.report.success
    }

    pub fn was_created(&self) -> bool {
        matches!(self.status, DerivativeStatus::Created)
    }

    pub fn was_skipped(&self) -> bool {
        matches!(self.status, DerivativeStatus::Skipped { .. })
    }

    pub fn error(&self) -> Option<&StageError> {
        match &self.status {
            DerivativeStatus::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// All derivative outcomes for one page object.
///
/// Partial success is preserved: inspect [`Self::outcomes`] rather than
/// relying on [`Self::success`] alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageReport {
    pub object: ObjectId,
    pub outcomes: Vec<DerivativeOutcome>,
    pub duration_ms: u64,
}

impl PageReport {
    /// True when every requested derivative succeeded (created or skipped).
    pub fn success(&self) -> bool {
        self.outcomes.iter().all(DerivativeOutcome::is_success)
    }

    pub fn outcome(&self, kind: DerivativeKind) -> Option<&DerivativeOutcome> {
        self.outcomes.iter().find(|o| o.kind == kind)
    }

    /// Every outcome's messages folded into a single report, in order.
    pub fn combined_report(&self) -> OutcomeReport {
        let mut report = OutcomeReport::succeeded();
        for o in &self.outcomes {
            report.merge(&o.report);
        }
        report
    }
}

/// Aggregate statistics for a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_pages: usize,
    pub succeeded_pages: usize,
    pub failed_pages: usize,
    pub derivatives_created: usize,
    pub derivatives_skipped: usize,
    pub derivatives_failed: usize,
    pub total_duration_ms: u64,
}

impl BatchStats {
    pub fn from_reports(reports: &[PageReport], total_duration_ms: u64) -> Self {
        let mut stats = BatchStats {
            total_pages: reports.len(),
            total_duration_ms,
            ..Default::default()
        };
        for page in reports {
            if page.success() {
                stats.succeeded_pages += 1;
            } else {
                stats.failed_pages += 1;
            }
            for o in &page.outcomes {
                match o.status {
                    DerivativeStatus::Created => stats.derivatives_created += 1,
                    DerivativeStatus::Skipped { .. } => stats.derivatives_skipped += 1,
                    DerivativeStatus::Failed { .. } => stats.derivatives_failed += 1,
                }
            }
        }
        stats
    }
}

/// Result of a batch run: one report per page that could be processed, plus
/// fatal errors for the ones that could not.
#[derive(Debug, Serialize)]
pub struct BatchOutput {
    pub pages: Vec<PageReport>,
    /// `(object, error message)` for pages aborted by a fatal error.
    pub errors: Vec<(ObjectId, String)>,
    pub stats: BatchStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(kind: DerivativeKind, status: DerivativeStatus, success: bool) -> DerivativeOutcome {
        DerivativeOutcome {
            kind,
            status,
            report: OutcomeReport {
                success,
                messages: vec![Message {
                    text: format!("{kind}"),
                    severity: Severity::Info,
                    channel: Channel::Log,
                }],
            },
        }
    }

    #[test]
    fn merge_accumulates_and_ands_success() {
        let mut a = OutcomeReport::succeeded().with("one", Severity::Info, Channel::Log);
        let b = OutcomeReport::failed().with("two", Severity::Error, Channel::User);
        a.merge(&b);
        assert!(!a.success);
        assert_eq!(a.messages.len(), 2);
        assert_eq!(a.messages[0].text, "one");
        assert_eq!(a.messages_on(Channel::User).count(), 1);
    }

    #[test]
    fn partial_success_is_preserved() {
        let page = PageReport {
            object: ObjectId::from("book:1"),
            outcomes: vec![
                outcome(DerivativeKind::Ocr, DerivativeStatus::Created, true),
                outcome(
                    DerivativeKind::Hocr,
                    DerivativeStatus::Failed {
                        error: StageError::OutputInvalid {
                            path: "x.html".into(),
                            detail: "bad".into(),
                        },
                    },
                    false,
                ),
            ],
            duration_ms: 5,
        };
        assert!(!page.success());
        assert!(page.outcome(DerivativeKind::Ocr).unwrap().was_created());
        assert!(page.outcome(DerivativeKind::Hocr).unwrap().error().is_some());
        assert_eq!(page.combined_report().messages.len(), 2);

        let stats = BatchStats::from_reports(&[page], 5);
        assert_eq!(stats.failed_pages, 1);
        assert_eq!(stats.derivatives_created, 1);
        assert_eq!(stats.derivatives_failed, 1);
    }

    #[test]
    fn dsids() {
        assert_eq!(DerivativeKind::Ocr.dsid(), "OCR");
        assert_eq!(DerivativeKind::Hocr.to_string(), "HOCR");
    }
}
