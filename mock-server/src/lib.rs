//! In-memory implementation of the eLearning API.
//!
//! Jobs advance one step per status read (`queued -> running -> terminal`),
//! so clients can exercise polling without wall-clock waits. A subject whose
//! title contains "fail" produces a failed job.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEMO_CLIENT_ID: &str = "demo-client";
pub const DEMO_CLIENT_SECRET: &str = "demo-secret";
/// Always accepted as a bearer token, for tests that skip the token exchange.
pub const STATIC_TOKEN: &str = "mock-static-token";
pub const UPLOAD_SIZE_LIMIT: u64 = 100 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub correlation_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Output {
    Pptx,
    Pdf,
    Txt,
    Video,
    Jira,
    Confluence,
    Image,
}

impl Output {
    fn name(self) -> &'static str {
        match self {
            Output::Pptx => "pptx",
            Output::Pdf => "pdf",
            Output::Txt => "txt",
            Output::Video => "video",
            Output::Jira => "jira",
            Output::Confluence => "confluence",
            Output::Image => "image",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Output::Video => "mp4",
            Output::Jira => "json",
            Output::Confluence => "html",
            Output::Image => "png",
            other => other.name(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateUpload {
    filename: String,
    mime_type: String,
    size_bytes: u64,
    sha256: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterSource {
    source_id: String,
}

#[derive(Deserialize)]
struct CreateCurriculum {
    title: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Curriculum {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub user_id: String,
    pub created_at: String,
    pub subject_count: u32,
}

#[derive(Deserialize)]
struct SubjectSpec {
    title: String,
}

#[derive(Deserialize)]
struct ProcessSubject {
    subject: SubjectSpec,
    #[serde(default)]
    curriculum_id: Option<String>,
    outputs: Vec<Output>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateExport {
    #[serde(default)]
    subject_id: Option<String>,
    #[serde(default)]
    curriculum_id: Option<String>,
    #[serde(default)]
    outputs: Vec<Output>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: String,
    #[serde(rename = "type")]
    pub artifact_type: Output,
    pub filename: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub expires_at: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobState {
    fn name(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Canceled => "canceled",
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Canceled)
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    id: String,
    status: JobState,
    progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<&'static str>,
    submitted_at: String,
    updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifacts: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Problem>,
    #[serde(skip)]
    label: String,
    #[serde(skip)]
    outputs: Vec<Output>,
    #[serde(skip)]
    will_fail: bool,
    #[serde(skip)]
    produced: Vec<Artifact>,
}

#[derive(Deserialize)]
struct TokenForm {
    grant_type: String,
    client_id: String,
    client_secret: String,
    #[serde(default)]
    scope: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A Problem response with its status.
#[derive(Debug)]
pub struct ApiProblem(Problem);

impl ApiProblem {
    fn new(status: StatusCode, title: &str, detail: impl Into<Option<String>>) -> Self {
        ApiProblem(problem(status, title, detail.into()))
    }

    fn not_found(what: &str, id: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "Not found", format!("{what} {id} does not exist"))
    }

    fn bad_request(detail: String) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "Invalid request", detail)
    }
}

impl IntoResponse for ApiProblem {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let correlation = self.0.correlation_id.clone();
        let mut response = (status, Json(self.0)).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/problem+json"));
        if let Ok(value) = HeaderValue::from_str(&correlation) {
            headers.insert("x-correlation-id", value);
        }
        response
    }
}

fn problem(status: StatusCode, title: &str, detail: Option<String>) -> Problem {
    Problem {
        problem_type: "about:blank".to_string(),
        title: title.to_string(),
        status: status.as_u16(),
        detail,
        code: None,
        correlation_id: Uuid::new_v4().to_string(),
    }
}

fn parse<T: serde::de::DeserializeOwned>(body: &Value) -> Result<T, ApiProblem> {
    serde_json::from_value(body.clone()).map_err(|e| ApiProblem::bad_request(e.to_string()))
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct Replay {
    request: Value,
    status: StatusCode,
    body: Value,
}

#[derive(Default)]
struct Store {
    tokens: HashSet<String>,
    token_failures: u32,
    uploads: HashMap<String, String>,
    curriculums: Vec<Curriculum>,
    jobs: HashMap<String, Job>,
    artifacts: HashMap<String, Artifact>,
    replays: HashMap<(&'static str, String), Replay>,
}

#[derive(Clone)]
pub struct AppState {
    clients: Arc<HashMap<String, String>>,
    store: Arc<RwLock<Store>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// State that knows the demo client.
    pub fn new() -> Self {
        Self::with_token_outage(0)
    }

    /// Like [`AppState::new`], but the first `failures` token requests get 503.
    pub fn with_token_outage(failures: u32) -> Self {
        let clients = HashMap::from([(DEMO_CLIENT_ID.to_string(), DEMO_CLIENT_SECRET.to_string())]);
        let store = Store { token_failures: failures, ..Store::default() };
        Self { clients: Arc::new(clients), store: Arc::new(RwLock::new(store)) }
    }

    async fn accepts(&self, token: &str) -> bool {
        token == STATIC_TOKEN || self.store.read().await.tokens.contains(token)
    }
}

pub fn app() -> Router {
    router(AppState::new())
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/uploads", post(create_upload))
        .route("/sources", post(register_source))
        .route("/curriculums", get(list_curriculums).post(create_curriculum))
        .route("/curriculums/{id}", get(get_curriculum))
        .route("/subjects/process", post(process_subject))
        .route("/exports", post(create_export))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/jobs/{id}/artifacts", get(list_job_artifacts))
        .route("/artifacts/{id}", get(get_artifact))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/health", get(health))
        .route("/api/oauth2/token", post(issue_token))
        .nest("/api/v1", api)
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with(listener, AppState::new()).await
}

pub async fn run_with(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    axum::serve(listener, router(state)).await
}

async fn require_bearer(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    match token {
        Some(token) if state.accepts(&token).await => next.run(request).await,
        _ => {
            debug!(path = %request.uri().path(), "rejected request without valid bearer token");
            ApiProblem::new(StatusCode::UNAUTHORIZED, "Unauthorized", "missing or unknown bearer token".to_string())
                .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Idempotency
// ---------------------------------------------------------------------------

/// Run `create` once per `(scope, Idempotency-Key)`.
///
/// A replay with the same body returns the stored response with
/// `Idempotency-Replayed: true`; a different body is a 409. Requests
/// without a key are never deduplicated.
fn idempotent<F>(store: &mut Store, scope: &'static str, headers: &HeaderMap, body: Value, create: F) -> Response
where
    F: FnOnce(&mut Store, &Value) -> Result<(StatusCode, Value), ApiProblem>,
{
    let key = headers.get("idempotency-key").and_then(|v| v.to_str().ok()).map(str::to_string);
    let Some(key) = key else {
        return match create(store, &body) {
            Ok((status, body)) => (status, Json(body)).into_response(),
            Err(problem) => problem.into_response(),
        };
    };

    if let Some(replay) = store.replays.get(&(scope, key.clone())) {
        if replay.request != body {
            warn!(scope, key = %key, "idempotency key reused with a different body");
            return ApiProblem::new(
                StatusCode::CONFLICT,
                "Idempotency key reuse",
                "the key was already used with a different request body".to_string(),
            )
            .into_response();
        }
        info!(scope, key = %key, "replaying stored response");
        let mut response = (replay.status, Json(replay.body.clone())).into_response();
        response.headers_mut().insert("idempotency-replayed", HeaderValue::from_static("true"));
        return response;
    }

    match create(store, &body) {
        Ok((status, response_body)) => {
            store.replays.insert((scope, key), Replay { request: body, status, body: response_body.clone() });
            (status, Json(response_body)).into_response()
        }
        Err(problem) => problem.into_response(),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn issue_token(State(state): State<AppState>, Form(form): Form<TokenForm>) -> Response {
    let mut store = state.store.write().await;
    if store.token_failures > 0 {
        store.token_failures -= 1;
        warn!(remaining = store.token_failures, "simulating token endpoint outage");
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "temporarily_unavailable"}))).into_response();
    }
    if form.grant_type != "client_credentials" {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "unsupported_grant_type"}))).into_response();
    }
    if state.clients.get(&form.client_id) != Some(&form.client_secret) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid_client"}))).into_response();
    }

    let token = mint_token(&form.client_id, &form.scope);
    store.tokens.insert(token.clone());
    info!(client_id = %form.client_id, scope = %form.scope, "issued token");
    Json(json!({"access_token": token, "token_type": "Bearer", "expires_in": 3600, "scope": form.scope})).into_response()
}

/// Unsigned JWT-shaped token carrying `sub`, `scope`, `iat` and `exp`.
fn mint_token(client_id: &str, scope: &str) -> String {
    let now = Utc::now().timestamp();
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
    let claims = json!({"sub": client_id, "scope": scope, "iat": now, "exp": now + 3600});
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.{}", Uuid::new_v4().simple())
}

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

fn expires_in_minutes(minutes: i64) -> String {
    (Utc::now() + Duration::minutes(minutes)).to_rfc3339()
}

async fn create_upload(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let mut store = state.store.write().await;
    idempotent(&mut store, "uploads", &headers, body, |store, body| {
        let input: CreateUpload = parse(body)?;
        if input.sha256.len() != 64 || !input.sha256.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ApiProblem::bad_request("sha256 must be 64 hex characters".to_string()));
        }
        if input.size_bytes > UPLOAD_SIZE_LIMIT {
            return Err(ApiProblem::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                "Upload too large",
                format!("{} bytes exceeds the {UPLOAD_SIZE_LIMIT} byte limit", input.size_bytes),
            ));
        }
        let source_id = Uuid::new_v4().to_string();
        store.uploads.insert(source_id.clone(), input.filename.clone());
        Ok((
            StatusCode::CREATED,
            json!({
                "sourceId": source_id,
                "uploadUrl": format!("https://uploads.mock.local/{source_id}"),
                "expiresAt": expires_in_minutes(15),
                "fields": {"key": format!("uploads/{source_id}/{}", input.filename), "Content-Type": input.mime_type},
                "method": "POST",
                "filename": input.filename,
                "sizeLimitBytes": UPLOAD_SIZE_LIMIT,
            }),
        ))
    })
}

async fn register_source(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let mut store = state.store.write().await;
    idempotent(&mut store, "sources", &headers, body, |store, body| {
        let input: RegisterSource = parse(body)?;
        if !store.uploads.contains_key(&input.source_id) {
            return Err(ApiProblem::not_found("upload", &input.source_id));
        }
        Ok((StatusCode::CREATED, json!({"sourceId": input.source_id, "avStatus": "clean"})))
    })
}

async fn create_curriculum(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Response, ApiProblem> {
    let input: CreateCurriculum = parse(&body)?;
    if input.title.trim().is_empty() {
        return Err(ApiProblem::bad_request("title must not be empty".to_string()));
    }
    let curriculum = Curriculum {
        id: Uuid::new_v4().to_string(),
        title: input.title,
        description: input.description,
        user_id: "mock-user".to_string(),
        created_at: timestamp(),
        subject_count: 0,
    };
    let id = curriculum.id.clone();
    state.store.write().await.curriculums.push(curriculum);
    Ok((StatusCode::CREATED, Json(json!({"curriculumId": id}))).into_response())
}

async fn list_curriculums(State(state): State<AppState>) -> Json<Value> {
    let store = state.store.read().await;
    Json(json!({"items": store.curriculums}))
}

async fn get_curriculum(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Curriculum>, ApiProblem> {
    let store = state.store.read().await;
    store
        .curriculums
        .iter()
        .find(|c| c.id == id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiProblem::not_found("curriculum", &id))
}

fn submit_job(store: &mut Store, label: String, outputs: Vec<Output>, will_fail: bool) -> (StatusCode, Value) {
    let id = Uuid::new_v4().to_string();
    let now = timestamp();
    let job = Job {
        id: id.clone(),
        status: JobState::Queued,
        progress: 0,
        stage: None,
        submitted_at: now.clone(),
        updated_at: now,
        artifacts: None,
        error: None,
        label,
        outputs,
        will_fail,
        produced: Vec::new(),
    };
    store.jobs.insert(id.clone(), job);
    info!(job_id = %id, "job queued");
    (StatusCode::ACCEPTED, json!({"jobId": id, "statusUrl": format!("/api/v1/jobs/{id}")}))
}

async fn process_subject(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let mut store = state.store.write().await;
    idempotent(&mut store, "subjects", &headers, body, |store, body| {
        let input: ProcessSubject = parse(body)?;
        if input.outputs.is_empty() {
            return Err(ApiProblem::bad_request("at least one output is required".to_string()));
        }
        if let Some(curriculum_id) = &input.curriculum_id {
            let curriculum = store
                .curriculums
                .iter_mut()
                .find(|c| &c.id == curriculum_id)
                .ok_or_else(|| ApiProblem::not_found("curriculum", curriculum_id))?;
            curriculum.subject_count += 1;
        }
        let will_fail = input.subject.title.to_lowercase().contains("fail");
        Ok(submit_job(store, input.subject.title, input.outputs, will_fail))
    })
}

async fn create_export(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let mut store = state.store.write().await;
    idempotent(&mut store, "exports", &headers, body, |store, body| {
        let input: CreateExport = parse(body)?;
        let label = match (input.subject_id, input.curriculum_id) {
            (Some(subject), None) => format!("subject-{subject}"),
            (None, Some(curriculum)) => {
                let found = store.curriculums.iter().find(|c| c.id == curriculum);
                found.ok_or_else(|| ApiProblem::not_found("curriculum", &curriculum))?.title.clone()
            }
            _ => {
                return Err(ApiProblem::bad_request("exactly one of subjectId or curriculumId is required".to_string()))
            }
        };
        let outputs = if input.outputs.is_empty() { vec![Output::Pdf] } else { input.outputs };
        Ok(submit_job(store, label, outputs, false))
    })
}

fn artifact_for(output: Output, label: &str) -> Artifact {
    let slug: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    Artifact {
        id: Uuid::new_v4().to_string(),
        artifact_type: output,
        filename: format!("{slug}.{}", output.extension()),
        sha256: format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple()),
        size_bytes: 2048,
        expires_at: expires_in_minutes(60 * 24),
    }
}

/// Move a job one step forward.
fn advance(job: &mut Job, artifacts: &mut HashMap<String, Artifact>) {
    match job.status {
        JobState::Queued => {
            job.status = JobState::Running;
            job.progress = 50;
            job.stage = Some("rendering");
        }
        JobState::Running if job.will_fail => {
            job.status = JobState::Failed;
            job.stage = None;
            job.error = Some(problem(
                StatusCode::UNPROCESSABLE_ENTITY,
                "Processing failed",
                Some(format!("could not render {}", job.label)),
            ));
        }
        JobState::Running => {
            job.status = JobState::Succeeded;
            job.progress = 100;
            job.stage = None;
            job.produced = job.outputs.iter().map(|o| artifact_for(*o, &job.label)).collect();
            for artifact in &job.produced {
                artifacts.insert(artifact.id.clone(), artifact.clone());
            }
            job.artifacts = Some(json!({"items": job.produced}));
        }
        _ => return,
    }
    job.updated_at = timestamp();
    debug!(job_id = %job.id, status = job.status.name(), "job advanced");
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Job>, ApiProblem> {
    let mut store = state.store.write().await;
    let Store { jobs, artifacts, .. } = &mut *store;
    let job = jobs.get_mut(&id).ok_or_else(|| ApiProblem::not_found("job", &id))?;
    let snapshot = job.clone();
    advance(job, artifacts);
    Ok(Json(snapshot))
}

async fn cancel_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiProblem> {
    let mut store = state.store.write().await;
    let job = store.jobs.get_mut(&id).ok_or_else(|| ApiProblem::not_found("job", &id))?;
    if job.status.is_terminal() {
        return Err(ApiProblem::new(
            StatusCode::CONFLICT,
            "Job already terminal",
            format!("job {id} is {}", job.status.name()),
        ));
    }
    job.status = JobState::Canceled;
    job.stage = None;
    job.updated_at = timestamp();
    info!(job_id = %id, "job canceled");
    Ok((StatusCode::ACCEPTED, Json(job.clone())).into_response())
}

async fn list_job_artifacts(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiProblem> {
    let store = state.store.read().await;
    let job = store.jobs.get(&id).ok_or_else(|| ApiProblem::not_found("job", &id))?;
    let etag = format!("\"{}-{}\"", id, job.produced.len());
    let matches = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == etag);

    let mut response =
        if matches { StatusCode::NOT_MODIFIED.into_response() } else { Json(json!({"items": job.produced})).into_response() };
    if let Ok(value) = HeaderValue::from_str(&etag) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

async fn get_artifact(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiProblem> {
    let store = state.store.read().await;
    let artifact = store.artifacts.get(&id).ok_or_else(|| ApiProblem::not_found("artifact", &id))?;
    Ok(Json(json!({
        "downloadUrl": format!("https://downloads.mock.local/{}/{}", artifact.id, artifact.filename),
        "expiresAt": expires_in_minutes(5),
    })))
}
