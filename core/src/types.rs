//! Domain DTOs for the eLearning API.
//!
//! # Design
//! These types mirror the server's JSON schema but are defined independently
//! of the mock-server crate; integration tests catch any drift between the
//! two. Field names follow the wire format, which mixes camelCase (ingest,
//! jobs, exports) with snake_case (curriculum records and a few request
//! fields), so renames are spelled out per type.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Output formats a subject or export job can produce.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Pptx,
    Pdf,
    Txt,
    Video,
    Jira,
    Confluence,
    Image,
}

// ---------------------------------------------------------------------------
// Ingest
// ---------------------------------------------------------------------------

/// Request payload for presigning a source upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadRequest {
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the file contents.
    pub sha256: String,
}

/// Presigned form-upload target returned by `createUpload`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadResponse {
    pub source_id: String,
    pub upload_url: String,
    pub expires_at: String,
    /// Form fields that must accompany the file in the storage POST.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    pub method: String,
    pub filename: String,
    pub size_limit_bytes: u64,
}

/// Request payload for registering an uploaded object as a source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSourceRequest {
    pub source_id: String,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSourceResponse {
    pub source_id: String,
    /// Antivirus scan state reported by the server, e.g. `pending` or `clean`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub av_status: Option<String>,
}

// ---------------------------------------------------------------------------
// Curriculums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateCurriculumRequest {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateCurriculumResponse {
    pub curriculum_id: String,
}

/// A curriculum record. The server emits snake_case; the camelCase aliases
/// accept payloads produced by older API gateways.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Curriculum {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(alias = "userId")]
    pub user_id: String,
    #[serde(alias = "createdAt")]
    pub created_at: String,
    #[serde(default, alias = "subjectCount", skip_serializing_if = "Option::is_none")]
    pub subject_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurriculumList {
    pub items: Vec<Curriculum>,
}

// ---------------------------------------------------------------------------
// Subjects and exports
// ---------------------------------------------------------------------------

/// Reference to an input document, either a registered source or a URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl SourceRef {
    pub fn source(id: impl Into<String>) -> Self {
        Self { source_id: Some(id.into()), url: None }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self { source_id: None, url: Some(url.into()) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubjectSpec {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_id: Option<String>,
}

/// Single-call request that ingests sources for a subject and renders outputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessSubjectRequest {
    pub subject: SubjectSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curriculum_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceRef>,
    pub outputs: Vec<OutputFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<Webhook>,
}

impl ProcessSubjectRequest {
    pub fn new(title: impl Into<String>, outputs: Vec<OutputFormat>) -> Self {
        Self {
            subject: SubjectSpec { title: title.into(), options: None },
            curriculum_id: None,
            sources: Vec::new(),
            outputs,
            webhook: None,
        }
    }

    pub fn with_source(mut self, source: SourceRef) -> Self {
        self.sources.push(source);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_images: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<serde_json::Value>,
}

/// Export job request. Exactly one of `subject_id` and `curriculum_id` must
/// be set; `ElearningClient::create_export` rejects anything else before
/// touching the network.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateExportRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curriculum_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputFormat>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ExportOptions>,
}

impl CreateExportRequest {
    /// Export from a subject. Preferred: subjects support every output type.
    pub fn for_subject(subject_id: impl Into<String>, outputs: Vec<OutputFormat>) -> Self {
        Self { subject_id: Some(subject_id.into()), outputs, ..Self::default() }
    }

    pub fn for_curriculum(curriculum_id: impl Into<String>, outputs: Vec<OutputFormat>) -> Self {
        Self { curriculum_id: Some(curriculum_id.into()), outputs, ..Self::default() }
    }
}

// ---------------------------------------------------------------------------
// Jobs and artifacts
// ---------------------------------------------------------------------------

/// Acknowledgement returned by every job-creating endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobAccepted {
    pub job_id: String,
    /// Status URL, possibly relative to the API base.
    pub status_url: String,
}

/// Lifecycle state of a job. Transitions only move forward:
/// `queued -> running -> {succeeded, failed, canceled}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    /// Completion percentage in `0..=100`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub submitted_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<ArtifactList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<OutputFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactList {
    pub items: Vec<Artifact>,
}

/// Time-limited download capability for one artifact. Fetch on demand; do
/// not cache past `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactLink {
    pub download_url: String,
    pub expires_at: String,
}

/// Result of a conditional artifact listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactListing {
    Modified { artifacts: ArtifactList, etag: Option<String> },
    /// The server answered `304 Not Modified` to `If-None-Match`.
    NotModified,
}

/// Service liveness report from `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Health {
    pub status: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// RFC 7807 problem details, as returned in error bodies and failed jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub problem_type: Option<String>,
    pub title: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Problem {
    /// Parse a response body as a problem document, if it is one.
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }
}
