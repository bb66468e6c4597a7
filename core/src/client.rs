//! Typed facade over the eLearning API.
//!
//! # Design
//! `ElearningClient` pairs the stateless [`Endpoints`] builders with one
//! [`RequestExecutor`]. Every method builds a request, executes it and
//! decodes the body, applying response validation when the configuration
//! asks for it. Submission methods take an optional [`IdempotencyKey`] and
//! generate one per call when none is supplied; the key is fixed for the
//! whole call, so a caller retrying with the same key replays server-side.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::auth::{ClientCredentialsResolver, Credentials, TokenSource};
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::endpoints::{decode, Endpoints};
use crate::error::{Error, Result};
use crate::executor::RequestExecutor;
use crate::http::{ReqwestTransport, Transport};
use crate::idempotency::{next_key, IdempotencyKey};
use crate::jobs::{poll_job, JobSource, PollOptions};
use crate::types::{
    ArtifactLink, ArtifactListing, CreateCurriculumRequest, CreateCurriculumResponse, CreateExportRequest,
    CreateUploadRequest, CreateUploadResponse, Curriculum, CurriculumList, Health, Job, JobAccepted,
    ProcessSubjectRequest, RegisterSourceRequest, RegisterSourceResponse,
};

pub struct ElearningClient {
    endpoints: Endpoints,
    executor: RequestExecutor,
    clock: Arc<dyn Clock>,
    validate: bool,
}

impl ElearningClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            endpoints: Endpoints::new(&config.base_url),
            executor: RequestExecutor::new(&config),
            clock: config.clock.clone(),
            validate: config.validate_responses,
        }
    }

    /// Client that authenticates with the client-credentials grant against
    /// `credentials.base_url()` and talks to the same host.
    pub fn with_credentials(credentials: Credentials) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new());
        let base_url = credentials.base_url().to_string();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let resolver = ClientCredentialsResolver::new(credentials, transport.clone(), clock.clone());
        let config = ClientConfig::builder(base_url, TokenSource::supplier(resolver))
            .transport(transport)
            .clock(clock)
            .build()?;
        Ok(Self::new(config))
    }

    pub fn base_url(&self) -> &str {
        self.endpoints.base_url()
    }

    pub async fn health(&self) -> Result<Health> {
        let response = self.executor.execute(self.endpoints.build_health(), None).await?;
        decode(&response, self.validate, "Health")
    }

    /// Presign an upload. The returned form must be posted to `upload_url`
    /// before the source is registered.
    pub async fn create_upload(
        &self,
        input: &CreateUploadRequest,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<CreateUploadResponse> {
        let key = next_key(idempotency_key);
        let response = self.executor.execute(self.endpoints.build_create_upload(input)?, Some(&key)).await?;
        decode(&response, self.validate, "CreateUploadResponse")
    }

    pub async fn register_source(
        &self,
        input: &RegisterSourceRequest,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<RegisterSourceResponse> {
        let key = next_key(idempotency_key);
        let response = self.executor.execute(self.endpoints.build_register_source(input)?, Some(&key)).await?;
        decode(&response, self.validate, "RegisterSourceResponse")
    }

    pub async fn create_curriculum(&self, input: &CreateCurriculumRequest) -> Result<CreateCurriculumResponse> {
        let response = self.executor.execute(self.endpoints.build_create_curriculum(input)?, None).await?;
        decode(&response, self.validate, "CreateCurriculumResponse")
    }

    pub async fn list_curriculums(&self) -> Result<CurriculumList> {
        let response = self.executor.execute(self.endpoints.build_list_curriculums(), None).await?;
        decode(&response, self.validate, "CurriculumList")
    }

    pub async fn get_curriculum(&self, curriculum_id: &str) -> Result<Curriculum> {
        let response = self.executor.execute(self.endpoints.build_get_curriculum(curriculum_id), None).await?;
        decode(&response, self.validate, "Curriculum")
    }

    /// Submit a subject for processing. Returns as soon as the job is accepted.
    pub async fn process_subject(
        &self,
        input: &ProcessSubjectRequest,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<JobAccepted> {
        let key = next_key(idempotency_key);
        let response = self.executor.execute(self.endpoints.build_process_subject(input)?, Some(&key)).await?;
        let accepted: JobAccepted = decode(&response, self.validate, "JobAccepted")?;
        info!(job_id = %accepted.job_id, idempotency_key = %key, "subject processing accepted");
        Ok(accepted)
    }

    /// Start an export job.
    ///
    /// Exactly one of `subject_id` and `curriculum_id` must be set; anything
    /// else fails with [`Error::Usage`] before a request is made.
    pub async fn create_export(
        &self,
        input: &CreateExportRequest,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<JobAccepted> {
        match (&input.subject_id, &input.curriculum_id) {
            (Some(_), Some(_)) => {
                return Err(Error::Usage("provide either subject_id or curriculum_id, not both".to_string()))
            }
            (None, None) => return Err(Error::Usage("one of subject_id or curriculum_id is required".to_string())),
            _ => {}
        }
        let key = next_key(idempotency_key);
        let response = self.executor.execute(self.endpoints.build_create_export(input)?, Some(&key)).await?;
        let accepted: JobAccepted = decode(&response, self.validate, "JobAccepted")?;
        info!(job_id = %accepted.job_id, idempotency_key = %key, "export accepted");
        Ok(accepted)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job> {
        let response = self.executor.execute(self.endpoints.build_get_job(job_id), None).await?;
        decode(&response, self.validate, "Job")
    }

    /// Request cancellation of a queued or running job. The server answers
    /// 409 once the job is terminal.
    pub async fn cancel_job(&self, job_id: &str, idempotency_key: Option<IdempotencyKey>) -> Result<()> {
        let key = next_key(idempotency_key);
        self.executor.execute(self.endpoints.build_cancel_job(job_id), Some(&key)).await?;
        debug!(job_id, "cancellation requested");
        Ok(())
    }

    /// List a job's artifacts. Pass the last seen `ETag` as `if_none_match`
    /// to get [`ArtifactListing::NotModified`] when nothing changed.
    pub async fn list_job_artifacts(&self, job_id: &str, if_none_match: Option<&str>) -> Result<ArtifactListing> {
        let request = self.endpoints.build_list_job_artifacts(job_id, if_none_match);
        let response = self.executor.execute(request, None).await?;
        self.endpoints.parse_list_job_artifacts(&response, self.validate)
    }

    /// Fetch a fresh, time-limited download link. Links are never cached.
    pub async fn get_artifact(&self, artifact_id: &str) -> Result<ArtifactLink> {
        let response = self.executor.execute(self.endpoints.build_get_artifact(artifact_id), None).await?;
        decode(&response, self.validate, "ArtifactLink")
    }

    /// Poll `job_id` until it is terminal, per `options`.
    pub async fn wait_for_job(&self, job_id: &str, options: &PollOptions) -> Result<Job> {
        poll_job(self, self.clock.as_ref(), job_id, options).await
    }

    pub async fn process_subject_and_wait(
        &self,
        input: &ProcessSubjectRequest,
        idempotency_key: Option<IdempotencyKey>,
        options: &PollOptions,
    ) -> Result<Job> {
        options.validate()?;
        let accepted = self.process_subject(input, idempotency_key).await?;
        self.wait_for_job(&accepted.job_id, options).await
    }

    pub async fn create_export_and_wait(
        &self,
        input: &CreateExportRequest,
        idempotency_key: Option<IdempotencyKey>,
        options: &PollOptions,
    ) -> Result<Job> {
        options.validate()?;
        let accepted = self.create_export(input, idempotency_key).await?;
        self.wait_for_job(&accepted.job_id, options).await
    }
}

#[async_trait]
impl JobSource for ElearningClient {
    async fn job(&self, job_id: &str) -> Result<Job> {
        self.get_job(job_id).await
    }
}
