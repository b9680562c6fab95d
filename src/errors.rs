use std::error::Error as _;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    UpstreamUnreachable,
    UpstreamTimeout,
    ExtractionFailed,
    DownloadFailed,
    ModelResponseEmpty,
}

#[derive(thiserror::Error, Debug)]
pub enum RetrievalError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no response received from {service}: {message}")]
    UpstreamUnreachable {
        service: &'static str,
        message: String,
    },

    #[error("timed out waiting for {0}")]
    UpstreamTimeout(String),

    #[error("extraction failed: {message}")]
    ExtractionFailed {
        message: String,
        upstream_status: Option<u16>,
    },

    #[error("download failed: {message}")]
    DownloadFailed {
        message: String,
        upstream_status: Option<u16>,
    },

    #[error("No image data received from the Generative AI model.")]
    ModelResponseEmpty,
}

/// Serializable form of a [`RetrievalError`], returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
}

impl RetrievalError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        Self::ExtractionFailed {
            message: message.into(),
            upstream_status: None,
        }
    }

    pub fn download(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: message.into(),
            upstream_status: None,
        }
    }

    /// Classifies a failed request to a mirror or model service.
    pub fn from_upstream(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::UpstreamTimeout(format!("response from {service}"));
        }

        Self::UpstreamUnreachable {
            service,
            message: get_error(&err),
        }
    }

    /// Classifies a failed artifact fetch. Timeouts stay timeouts, anything
    /// else is a failed download.
    pub fn from_download(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::UpstreamTimeout("artifact download".to_string());
        }

        Self::DownloadFailed {
            message: get_error(&err),
            upstream_status: err.status().map(|s| s.as_u16()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::UpstreamUnreachable { .. } => ErrorKind::UpstreamUnreachable,
            Self::UpstreamTimeout(_) => ErrorKind::UpstreamTimeout,
            Self::ExtractionFailed { .. } => ErrorKind::ExtractionFailed,
            Self::DownloadFailed { .. } => ErrorKind::DownloadFailed,
            Self::ModelResponseEmpty => ErrorKind::ModelResponseEmpty,
        }
    }

    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::ExtractionFailed {
                upstream_status, ..
            }
            | Self::DownloadFailed {
                upstream_status, ..
            } => *upstream_status,
            _ => None,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            upstream_status: self.upstream_status(),
        }
    }
}

/// Innermost useful message of a reqwest error. The top-level message is
/// usually just "error sending request".
pub fn get_error(error: &reqwest::Error) -> String {
    match error.source() {
        Some(e) => match e.source() {
            Some(e) => e.to_string(),
            None => e.to_string(),
        },
        None => error.to_string(),
    }
}
