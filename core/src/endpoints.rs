//! Stateless request builders and response decoders for the eLearning API.
//!
//! # Design
//! `Endpoints` holds only a `base_url`. Each operation has a `build_*` method
//! that produces an `HttpRequest`; responses are turned into typed values by
//! [`decode`]. Neither touches the network, so URL templates, bodies and
//! decoding rules are testable as plain data. `ElearningClient` pairs these
//! with the `RequestExecutor`.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::types::{
    ArtifactList, ArtifactListing, CreateCurriculumRequest, CreateExportRequest, CreateUploadRequest,
    ProcessSubjectRequest, RegisterSourceRequest,
};
use crate::validate::Validate;

#[derive(Debug, Clone)]
pub struct Endpoints {
    base_url: String,
}

impl Endpoints {
    pub fn new(base_url: &str) -> Self {
        Self { base_url: base_url.trim_end_matches('/').to_string() }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url)
    }

    fn json<T: Serialize>(&self, path: &str, input: &T) -> Result<HttpRequest> {
        let body = serde_json::to_string(input).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(HttpRequest::new(HttpMethod::Post, self.url(path)).with_json_body(body))
    }

    /// Liveness probe; lives outside the versioned API prefix.
    pub fn build_health(&self) -> HttpRequest {
        HttpRequest::new(HttpMethod::Get, format!("{}/health", self.base_url))
    }

    pub fn build_create_upload(&self, input: &CreateUploadRequest) -> Result<HttpRequest> {
        self.json("/uploads", input)
    }

    pub fn build_register_source(&self, input: &RegisterSourceRequest) -> Result<HttpRequest> {
        self.json("/sources", input)
    }

    pub fn build_create_curriculum(&self, input: &CreateCurriculumRequest) -> Result<HttpRequest> {
        self.json("/curriculums", input)
    }

    pub fn build_list_curriculums(&self) -> HttpRequest {
        HttpRequest::new(HttpMethod::Get, self.url("/curriculums"))
    }

    pub fn build_get_curriculum(&self, curriculum_id: &str) -> HttpRequest {
        HttpRequest::new(HttpMethod::Get, self.url(&format!("/curriculums/{}", segment(curriculum_id))))
    }

    pub fn build_process_subject(&self, input: &ProcessSubjectRequest) -> Result<HttpRequest> {
        self.json("/subjects/process", input)
    }

    pub fn build_create_export(&self, input: &CreateExportRequest) -> Result<HttpRequest> {
        self.json("/exports", input)
    }

    pub fn build_get_job(&self, job_id: &str) -> HttpRequest {
        HttpRequest::new(HttpMethod::Get, self.url(&format!("/jobs/{}", segment(job_id))))
    }

    pub fn build_cancel_job(&self, job_id: &str) -> HttpRequest {
        HttpRequest::new(HttpMethod::Post, self.url(&format!("/jobs/{}/cancel", segment(job_id))))
    }

    pub fn build_list_job_artifacts(&self, job_id: &str, if_none_match: Option<&str>) -> HttpRequest {
        let mut request = HttpRequest::new(HttpMethod::Get, self.url(&format!("/jobs/{}/artifacts", segment(job_id))));
        if let Some(etag) = if_none_match {
            request.set_header("if-none-match", etag);
        }
        request
    }

    pub fn build_get_artifact(&self, artifact_id: &str) -> HttpRequest {
        HttpRequest::new(HttpMethod::Get, self.url(&format!("/artifacts/{}", segment(artifact_id))))
    }

    pub fn parse_list_job_artifacts(&self, response: &HttpResponse, validate: bool) -> Result<ArtifactListing> {
        if response.status == 304 {
            return Ok(ArtifactListing::NotModified);
        }
        let artifacts: ArtifactList = decode(response, validate, "ArtifactList")?;
        Ok(ArtifactListing::Modified { artifacts, etag: response.header("etag").map(str::to_string) })
    }
}

fn segment(id: &str) -> std::borrow::Cow<'_, str> {
    urlencoding::encode(id)
}

/// Decode a JSON response body into `T`.
///
/// With `validate` set, shape mismatches of any kind (including serde
/// failures) are reported as `Error::Validation` and `T`'s [`Validate`]
/// rules are enforced; otherwise only serde's checks apply.
pub fn decode<T>(response: &HttpResponse, validate: bool, context: &'static str) -> Result<T>
where
    T: DeserializeOwned + Validate,
{
    let value: T = serde_json::from_str(&response.body).map_err(|e| {
        if validate {
            Error::Validation { context, message: e.to_string() }
        } else {
            Error::Deserialization { context, message: e.to_string() }
        }
    })?;
    if validate {
        value.validate().map_err(|message| Error::Validation { context, message })?;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Job, OutputFormat, SourceRef};

    fn endpoints() -> Endpoints {
        Endpoints::new("http://localhost:3000")
    }

    #[test]
    fn build_create_upload_produces_correct_request() {
        let input = CreateUploadRequest {
            filename: "doc.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: 123_456,
            sha256: "a".repeat(64),
        };
        let req = endpoints().build_create_upload(&input).unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url, "http://localhost:3000/api/v1/uploads");
        assert_eq!(req.header("content-type"), Some("application/json"));
        let body: serde_json::Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["mimeType"], "application/pdf");
        assert_eq!(body["sizeBytes"], 123_456);
    }

    #[test]
    fn build_process_subject_produces_correct_request() {
        let input = ProcessSubjectRequest::new("Safety", vec![OutputFormat::Pptx]).with_source(SourceRef::source("src-1"));
        let req = endpoints().build_process_subject(&input).unwrap();
        assert_eq!(req.url, "http://localhost:3000/api/v1/subjects/process");
        let body: serde_json::Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["sources"][0]["sourceId"], "src-1");
        assert_eq!(body["outputs"][0], "pptx");
    }

    #[test]
    fn get_requests_have_no_body() {
        let e = endpoints();
        for req in [
            e.build_list_curriculums(),
            e.build_get_curriculum("c1"),
            e.build_get_job("j1"),
            e.build_get_artifact("a1"),
            e.build_list_job_artifacts("j1", None),
        ] {
            assert_eq!(req.method, HttpMethod::Get);
            assert!(req.body.is_none());
            assert!(req.headers.is_empty());
        }
    }

    #[test]
    fn path_parameters_are_percent_encoded() {
        let req = endpoints().build_get_job("job 1/../x");
        assert_eq!(req.url, "http://localhost:3000/api/v1/jobs/job%201%2F..%2Fx");
    }

    #[test]
    fn cancel_and_artifact_urls() {
        let e = endpoints();
        let cancel = e.build_cancel_job("j1");
        assert_eq!(cancel.method, HttpMethod::Post);
        assert_eq!(cancel.url, "http://localhost:3000/api/v1/jobs/j1/cancel");
        let listing = e.build_list_job_artifacts("j1", Some("\"etag-1\""));
        assert_eq!(listing.url, "http://localhost:3000/api/v1/jobs/j1/artifacts");
        assert_eq!(listing.header("if-none-match"), Some("\"etag-1\""));
        assert_eq!(e.build_get_artifact("a1").url, "http://localhost:3000/api/v1/artifacts/a1");
        assert_eq!(e.build_get_curriculum("c1").url, "http://localhost:3000/api/v1/curriculums/c1");
        assert_eq!(e.build_health().url, "http://localhost:3000/health");
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let e = Endpoints::new("http://localhost:3000/");
        assert_eq!(e.build_list_curriculums().url, "http://localhost:3000/api/v1/curriculums");
    }

    #[test]
    fn parse_artifacts_modified_and_not_modified() {
        let e = endpoints();
        let ok = HttpResponse::new(200, r#"{"items":[{"id":"a1","type":"pdf"}]}"#).with_header("ETag", "\"v3\"");
        match e.parse_list_job_artifacts(&ok, false).unwrap() {
            ArtifactListing::Modified { artifacts, etag } => {
                assert_eq!(artifacts.items.len(), 1);
                assert_eq!(etag.as_deref(), Some("\"v3\""));
            }
            ArtifactListing::NotModified => panic!("expected a listing"),
        }
        let not_modified = HttpResponse::new(304, "");
        assert_eq!(e.parse_list_job_artifacts(&not_modified, false).unwrap(), ArtifactListing::NotModified);
    }

    #[test]
    fn decode_bad_json_depends_on_validation() {
        let response = HttpResponse::new(200, r#"{"id":"j1"}"#);
        let lenient = decode::<Job>(&response, false, "Job").unwrap_err();
        assert!(matches!(lenient, Error::Deserialization { context: "Job", .. }));
        let strict = decode::<Job>(&response, true, "Job").unwrap_err();
        assert!(matches!(strict, Error::Validation { context: "Job", .. }));
    }

    #[test]
    fn decode_applies_rules_only_when_validating() {
        let response = HttpResponse::new(200, r#"{"id":"j1","status":"running","progress":250,"submittedAt":"t"}"#);
        assert!(decode::<Job>(&response, false, "Job").is_ok());
        assert!(matches!(decode::<Job>(&response, true, "Job"), Err(Error::Validation { .. })));
    }
}
