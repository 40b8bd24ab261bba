//! Error taxonomy of the merge pipeline.
//!
//! Every failure is reported to the caller of the triggering action; nothing
//! is retried. The HTTP layer maps these onto status codes in
//! [`crate::api::error::AppError`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MergeError {
    /// An input could not be parsed as a page-container document.
    #[error("'{name}' is not a readable PDF: {reason}")]
    Unreadable { name: String, reason: String },

    /// An input is protected by a user password.
    #[error("'{name}' is encrypted and cannot be merged")]
    Encrypted { name: String },

    /// Merging is disabled while staged inputs have unresolved problems.
    #[error("merge is disabled until these files are removed: {}", names.join(", "))]
    Blocked { names: Vec<String> },

    #[error("no staged documents to merge")]
    NothingToMerge,

    #[error("merged output is empty")]
    EmptyOutput,

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("upload exceeds the {limit} byte limit")]
    TooLarge { limit: usize },

    #[error("remote upload failed: {0}")]
    RemoteUpload(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF structure error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for MergeError {
    fn from(e: tokio::task::JoinError) -> Self {
        MergeError::Task(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MergeError>;
