//! Source status state machine.
//!
//! [`next_status`] is the single authority over which status a source may move to. Callers
//! never assign a status directly; they describe what happened with a [`StatusEvent`] and write
//! back whatever this module returns.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Position of a source in the ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    /// Record exists, binary not yet uploaded.
    Pending,
    /// Binary uploaded, waiting for text extraction.
    Uploaded,
    /// OCR stage running.
    Processing,
    /// Extracted text available.
    Processed,
    /// Summarization stage running.
    Summarizing,
    /// Summary and themes available.
    Summarized,
    /// A stage failed; no further automatic progression.
    Failed,
}

impl SourceStatus {
    /// Lowercase identifier used in storage and over the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploaded => "uploaded",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Summarizing => "summarizing",
            Self::Summarized => "summarized",
            Self::Failed => "failed",
        }
    }

    /// Whether automatic progression stops here.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Summarized | Self::Failed)
    }

    /// Ordinal along the forward path; `None` for `failed`, which sits off the path.
    pub const fn progress(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Uploaded => Some(1),
            Self::Processing => Some(2),
            Self::Processed => Some(3),
            Self::Summarizing => Some(4),
            Self::Summarized => Some(5),
            Self::Failed => None,
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a status string does not name a known state.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown source status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for SourceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "uploaded" => Ok(Self::Uploaded),
            "processing" => Ok(Self::Processing),
            "processed" => Ok(Self::Processed),
            "summarizing" => Ok(Self::Summarizing),
            "summarized" => Ok(Self::Summarized),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Discrete pipeline phase with fixed entry, running, and exit states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Text extraction through the external OCR process.
    Ocr,
    /// Summary and theme generation through the text-generation service.
    Summarization,
}

impl Stage {
    /// Status a source must hold before the stage may start.
    pub const fn required_status(self) -> SourceStatus {
        match self {
            Self::Ocr => SourceStatus::Uploaded,
            Self::Summarization => SourceStatus::Processed,
        }
    }

    /// Status held while the stage runs.
    pub const fn running_status(self) -> SourceStatus {
        match self {
            Self::Ocr => SourceStatus::Processing,
            Self::Summarization => SourceStatus::Summarizing,
        }
    }

    /// Status reached when the stage succeeds.
    pub const fn completed_status(self) -> SourceStatus {
        match self {
            Self::Ocr => SourceStatus::Processed,
            Self::Summarization => SourceStatus::Summarized,
        }
    }

    /// Short name used in logs and error messages.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ocr => "ocr",
            Self::Summarization => "summarization",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Something that happened to a source and may move its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// The original binary finished uploading.
    Upload,
    /// A plain-text binary finished uploading; it already is the extracted text, so OCR is
    /// skipped in the same step.
    UploadText,
    /// A stage was entered.
    Begin(Stage),
    /// A stage finished successfully.
    Complete(Stage),
    /// A stage failed.
    Fail,
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => f.write_str("upload"),
            Self::UploadText => f.write_str("upload-text"),
            Self::Begin(stage) => write!(f, "begin {stage}"),
            Self::Complete(stage) => write!(f, "complete {stage}"),
            Self::Fail => f.write_str("fail"),
        }
    }
}

/// A status change the state machine does not allow.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("cannot apply '{event}' to a source in status '{from}'")]
pub struct TransitionError {
    /// Status the source held.
    pub from: SourceStatus,
    /// Event that was rejected.
    pub event: StatusEvent,
}

/// Resolve the status that follows `from` after `event`.
pub fn next_status(from: SourceStatus, event: StatusEvent) -> Result<SourceStatus, TransitionError> {
    use SourceStatus::*;
    use StatusEvent::*;

    let to = match (from, event) {
        (Pending, Upload) => Uploaded,
        (Pending, UploadText) => Processed,
        (Uploaded, Begin(Stage::Ocr)) => Processing,
        (Processing, Complete(Stage::Ocr)) => Processed,
        (Processed, Begin(Stage::Summarization)) => Summarizing,
        (Summarizing, Complete(Stage::Summarization)) => Summarized,
        (status, Fail) if !status.is_terminal() => Failed,
        _ => return Err(TransitionError { from, event }),
    };
    Ok(to)
}
