use crate::config::{MergeOrder, ReduceStrategy, SplitMode};
use crate::services::manifest::Manifest;
use crate::services::merger::Inspection;
use crate::services::reducer::Accumulator;
use crate::services::session::MergeSession;
use crate::services::stager::StagedFile;
use chrono::{DateTime, Utc};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StagedFileResponse {
    pub id: Uuid,
    pub name: String,
    pub size: u64,
    pub sequence: u64,
    pub looks_like_pdf: bool,
    pub inspection: Inspection,
}

impl From<&StagedFile> for StagedFileResponse {
    fn from(file: &StagedFile) -> Self {
        Self {
            id: file.id,
            name: file.display_name.clone(),
            size: file.size,
            sequence: file.sequence,
            looks_like_pdf: file.looks_like_pdf,
            inspection: file.inspection.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AccumulatorResponse {
    pub size: u64,
    pub pages: Option<usize>,
    /// Files folded in so far, in page order
    pub sources: Vec<String>,
}

impl From<&Accumulator> for AccumulatorResponse {
    fn from(acc: &Accumulator) -> Self {
        Self {
            size: acc.size,
            pages: acc.pages,
            sources: acc.sources.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionResponse {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub staged: Vec<StagedFileResponse>,
    pub staged_bytes: u64,
    pub accumulator: Option<AccumulatorResponse>,
    /// Staged files that must be removed before merging
    pub blocked_by: Vec<String>,
    pub can_merge: bool,
    pub outcome: Option<MergeOutcome>,
}

impl From<&MergeSession> for SessionResponse {
    fn from(session: &MergeSession) -> Self {
        let blocked_by = session.blocking_names();
        let has_input = !session.staged.is_empty() || session.accumulator.is_some();
        Self {
            id: session.id,
            created_at: session.created_at,
            staged: session.staged.iter().map(StagedFileResponse::from).collect(),
            staged_bytes: session.staged_bytes(),
            accumulator: session.accumulator.as_ref().map(AccumulatorResponse::from),
            can_merge: has_input && blocked_by.is_empty(),
            blocked_by,
            outcome: session.outcome.clone(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    pub files: Vec<StagedFileResponse>,
}

/// Per-request overrides of the configured defaults
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct MergeOptions {
    pub order: Option<MergeOrder>,
    pub strategy: Option<ReduceStrategy>,
    /// Must be within 5..=500
    pub part_size_mb: Option<u64>,
    pub split: Option<SplitMode>,
    pub upload_remote: Option<bool>,
    pub skip_page_count: Option<bool>,
    /// Defaults to `merged.pdf`
    pub output_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct FoldOptions {
    pub order: Option<MergeOrder>,
    pub strategy: Option<ReduceStrategy>,
    pub skip_page_count: Option<bool>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ArtifactResponse {
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub download_url: String,
}

impl ArtifactResponse {
    pub fn new(session_id: Uuid, name: &str, size: u64, content_type: &mime::Mime) -> Self {
        Self {
            name: name.to_string(),
            size,
            content_type: content_type.to_string(),
            download_url: format!(
                "/sessions/{}/artifacts/{}",
                session_id,
                utf8_percent_encode(name, NON_ALPHANUMERIC)
            ),
        }
    }
}

/// How the merged document was handed over
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Delivery {
    Single {
        file: ArtifactResponse,
    },
    Parts {
        part_size: u64,
        parts: Vec<ArtifactResponse>,
        /// Checksum list, manifest and reconstruction scripts
        files: Vec<ArtifactResponse>,
        manifest: Manifest,
    },
    Remote {
        key: String,
        url: String,
        expires_in_secs: u64,
    },
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MergeOutcome {
    pub output_name: String,
    pub total_size: u64,
    pub pages: Option<usize>,
    pub sha256: String,
    pub sources: Vec<String>,
    pub delivery: Delivery,
    /// Non-fatal problems, e.g. a remote upload that fell back to local delivery
    pub warnings: Vec<String>,
    pub finished_at: DateTime<Utc>,
}
