//! Response shape rules applied when `validate_responses` is enabled.
//!
//! Deserialization already enforces field presence and types; these rules
//! cover what serde cannot express (non-empty identifiers, value ranges).

use crate::types::{
    Artifact, ArtifactLink, ArtifactList, CreateCurriculumResponse, CreateUploadResponse, Curriculum, CurriculumList,
    Health, Job, JobAccepted, Problem, RegisterSourceResponse,
};

pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

fn non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{field} must not be empty"))
    } else {
        Ok(())
    }
}

impl Validate for CreateUploadResponse {
    fn validate(&self) -> Result<(), String> {
        non_empty("sourceId", &self.source_id)?;
        non_empty("uploadUrl", &self.upload_url)?;
        non_empty("expiresAt", &self.expires_at)?;
        non_empty("method", &self.method)
    }
}

impl Validate for RegisterSourceResponse {
    fn validate(&self) -> Result<(), String> {
        non_empty("sourceId", &self.source_id)
    }
}

impl Validate for CreateCurriculumResponse {
    fn validate(&self) -> Result<(), String> {
        non_empty("curriculumId", &self.curriculum_id)
    }
}

impl Validate for Curriculum {
    fn validate(&self) -> Result<(), String> {
        non_empty("id", &self.id)?;
        non_empty("user_id", &self.user_id)?;
        non_empty("created_at", &self.created_at)
    }
}

impl Validate for CurriculumList {
    fn validate(&self) -> Result<(), String> {
        self.items
            .iter()
            .enumerate()
            .try_for_each(|(i, c)| c.validate().map_err(|e| format!("items[{i}]: {e}")))
    }
}

impl Validate for JobAccepted {
    fn validate(&self) -> Result<(), String> {
        non_empty("jobId", &self.job_id)?;
        non_empty("statusUrl", &self.status_url)
    }
}

impl Validate for Problem {
    fn validate(&self) -> Result<(), String> {
        if !(100..=599).contains(&self.status) {
            return Err(format!("status {} is not an HTTP status", self.status));
        }
        Ok(())
    }
}

impl Validate for Job {
    fn validate(&self) -> Result<(), String> {
        non_empty("id", &self.id)?;
        non_empty("submittedAt", &self.submitted_at)?;
        if let Some(progress) = self.progress {
            if !(0.0..=100.0).contains(&progress) {
                return Err(format!("progress {progress} outside 0..=100"));
            }
        }
        if let Some(artifacts) = &self.artifacts {
            artifacts.validate().map_err(|e| format!("artifacts.{e}"))?;
        }
        if let Some(problem) = &self.error {
            problem.validate().map_err(|e| format!("error: {e}"))?;
        }
        Ok(())
    }
}

impl Validate for Artifact {
    fn validate(&self) -> Result<(), String> {
        if let Some(sha) = &self.sha256 {
            if sha.len() != 64 || !sha.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err("sha256 must be 64 hex characters".to_string());
            }
        }
        Ok(())
    }
}

impl Validate for ArtifactList {
    fn validate(&self) -> Result<(), String> {
        self.items
            .iter()
            .enumerate()
            .try_for_each(|(i, a)| a.validate().map_err(|e| format!("items[{i}]: {e}")))
    }
}

impl Validate for Health {
    fn validate(&self) -> Result<(), String> {
        non_empty("status", &self.status)
    }
}

impl Validate for ArtifactLink {
    fn validate(&self) -> Result<(), String> {
        non_empty("downloadUrl", &self.download_url)?;
        non_empty("expiresAt", &self.expires_at)
    }
}
