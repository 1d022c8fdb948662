use std::path::PathBuf;
use thiserror::Error;

/// Why a single domain could not be processed.
///
/// These never abort the run; each one ends up in that domain's report.
#[derive(Error, Debug)]
pub enum DomainError {
    /// The request could not be sent or the body could not be read.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The log answered with a non-success status.
    #[error("certificate log returned HTTP {0}")]
    Status(reqwest::StatusCode),

    /// The body is not the expected array of certificate records.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Writing the results failed.
    #[error("cannot write {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DomainError {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DomainError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Short tag used in the final summary.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::Transport(_) => "transport",
            DomainError::Status(_) => "status",
            DomainError::MalformedResponse(_) => "malformed",
            DomainError::Filesystem { .. } => "filesystem",
        }
    }
}
