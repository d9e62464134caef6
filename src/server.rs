//! HTTP surface: routing, auth extraction, and the ndjson progress stream.
//!
//! Thin by intent — every handler validates input, calls one service method,
//! and shapes the response. All failure paths funnel through [`ApiError`] so
//! no error crosses the route boundary without becoming `{"error": message}`
//! JSON with the right status code.
//!
//! `POST /process-pdf` answers with a chunked `text/plain` body of
//! newline-delimited JSON events; the response connection *is* the progress
//! channel, and a client that disconnects implicitly cancels the remaining
//! pages.

use axum::{
    body::{Body, Bytes},
    extract::{
        rejection::JsonRejection, DefaultBodyLimit, FromRequestParts, Multipart, Path, State,
    },
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::auth::AuthService;
use crate::catalog::{Catalog, SessionUser};
use crate::config::{AppConfig, IngestOptions};
use crate::error::LecternError;
use crate::explain::VlmExplainer;
use crate::narrate::{SpeechSynthesizer, VoiceSettings};
use crate::pipeline::{IngestEvent, IngestOutcome, IngestPipeline, PdfiumRasterizer, UploadedPdf};
use crate::retrieval::{ArtifactSource, RetrievalService};
use crate::store::{ContentStore, S3RemoteTier};

/// Shared application state: every service, constructor-injected and
/// `Arc`-shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub store: Arc<ContentStore>,
    pub auth: Arc<AuthService>,
    pub ingest: Arc<IngestPipeline>,
    pub retrieval: Arc<RetrievalService>,
}

impl AppState {
    /// Wire up the whole service graph from deployment config.
    ///
    /// Missing object-store credentials degrade to local-only storage; a
    /// missing vision-LLM key is a hard error — the service is useless
    /// without its explanation model.
    pub async fn from_config(config: &AppConfig) -> Result<Self, LecternError> {
        let remote = S3RemoteTier::from_env(config)
            .map(|tier| Arc::new(tier) as Arc<dyn crate::store::RemoteTier>);
        if remote.is_some() {
            info!(bucket = %config.bucket, "remote storage tier enabled");
        }

        let store = Arc::new(ContentStore::new(
            config.data_dir.join("objects"),
            remote.clone(),
        ));
        let catalog = Arc::new(Catalog::open(config.data_dir.join("catalog.db"), remote).await?);

        let explainer = Arc::new(VlmExplainer::from_env()?);
        let narrator = Arc::new(SpeechSynthesizer::new(
            config.tts_api_key.clone(),
            VoiceSettings {
                language_code: config.tts_language.clone(),
                voice_name: config.tts_voice.clone(),
                speaking_rate: 1.0,
            },
        )?);
        let rasterizer = Arc::new(PdfiumRasterizer::new(config.max_rendered_pixels));

        let auth = Arc::new(AuthService::new(Arc::clone(&catalog)));
        let ingest = Arc::new(IngestPipeline::new(
            Arc::clone(&store),
            Arc::clone(&catalog),
            rasterizer,
            explainer.clone(),
            narrator.clone(),
        ));
        let retrieval = Arc::new(RetrievalService::new(
            Arc::clone(&store),
            Arc::clone(&catalog),
            explainer,
            narrator,
            config.url_ttl_secs,
        ));

        Ok(Self {
            catalog,
            store,
            auth,
            ingest,
            retrieval,
        })
    }
}

/// Build the router over prepared state (tests hit this directly).
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/process-pdf", post(process_pdf))
        .route("/use-existing/{pdf_name}", get(use_existing))
        .route("/pdf/{pdf_name}/image/{page}", get(pdf_image))
        .route("/pdf/{pdf_name}/audio/{page}", get(pdf_audio))
        .route("/ask-question", post(ask_question))
        .route("/generate-quiz/{pdf_name}", post(generate_quiz))
        .route("/download-materials/{pdf_name}", get(download_materials))
        .route("/check-pdf/{pdf_name}", get(check_pdf))
        .route("/check-pdf-by-filename/{filename}", get(check_pdf_by_filename))
        .route("/existing-pdfs", get(existing_pdfs))
        .route("/health", get(health))
        // Uploads routinely exceed the framework's 2 MB default.
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until the process is terminated.
pub async fn serve(state: AppState, port: u16) -> Result<(), LecternError> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on http://{addr}");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| LecternError::Internal(format!("server error: {e}")))
}

// ── Error mapping ────────────────────────────────────────────────────────

/// JSON error envelope with its HTTP status.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<LecternError> for ApiError {
    fn from(e: LecternError) -> Self {
        let status = match &e {
            LecternError::NotAPdf { .. } | LecternError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            _ => {
                error!(error = %e, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

// ── Auth extractor ───────────────────────────────────────────────────────

/// Extractor form of the auth guard: any handler taking `AuthUser` rejects
/// unauthenticated requests with a 401 before its body runs.
pub struct AuthUser(pub SessionUser);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        state
            .auth
            .authenticate(header)
            .await
            .map(AuthUser)
            .map_err(|u| ApiError::unauthorized(u.reason))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

// ── Auth routes ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RegisterRequest {
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let (Some(username), Some(email), Some(password)) = (
        body.username.filter(|v| !v.is_empty()),
        body.email.filter(|v| !v.is_empty()),
        body.password.filter(|v| !v.is_empty()),
    ) else {
        return Err(ApiError::bad_request("Missing required fields"));
    };

    match state.auth.register(&username, &email, &password).await? {
        Some(user_id) => Ok((
            StatusCode::CREATED,
            Json(json!({ "message": "User registered successfully", "user_id": user_id })),
        )
            .into_response()),
        None => Err(ApiError::bad_request("Username or email already exists")),
    }
}

#[derive(Deserialize)]
struct LoginRequest {
    username: Option<String>,
    password: Option<String>,
}

async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let (Some(username), Some(password)) = (
        body.username.filter(|v| !v.is_empty()),
        body.password.filter(|v| !v.is_empty()),
    ) else {
        return Err(ApiError::bad_request("Missing username or password"));
    };

    match state.auth.login(&username, &password).await? {
        Some(session) => Ok(Json(json!({
            "message": "Login successful",
            "user_id": session.user_id,
            "username": session.username,
            "session_token": session.token,
        }))
        .into_response()),
        None => Err(ApiError::unauthorized("Invalid username or password")),
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    let Some(token) = bearer_token(&headers) else {
        return Err(ApiError::bad_request("No valid session token provided"));
    };

    if state.auth.logout(token).await? {
        Ok(Json(json!({ "message": "Logout successful" })).into_response())
    } else {
        Err(ApiError::bad_request("Invalid session token"))
    }
}

// ── Ingestion ────────────────────────────────────────────────────────────

async fn process_pdf(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut options = IngestOptions::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("failed to read upload: {e}")))?;
                file = Some((filename, bytes.to_vec()));
            }
            Some("difficulty_level") => {
                if let Ok(level) = field.text().await {
                    if !level.is_empty() {
                        options.difficulty = level;
                    }
                }
            }
            _ => {}
        }
    }

    let Some((filename, bytes)) = file else {
        return Err(ApiError::bad_request("No file provided"));
    };
    if filename.is_empty() {
        return Err(ApiError::bad_request("No file selected"));
    }
    if !filename.to_ascii_lowercase().ends_with(".pdf") {
        return Err(ApiError::bad_request("File must be a PDF"));
    }

    let outcome = state
        .ingest
        .ingest(UploadedPdf { filename, bytes }, user.user_id, options)
        .await?;

    match outcome {
        IngestOutcome::Existing { pdf_name } => {
            Ok(Json(IngestEvent::Existing { pdf_name }).into_response())
        }
        IngestOutcome::Stream(events) => {
            let body = Body::from_stream(events.map(|event| {
                let line = serde_json::to_string(&event).unwrap_or_else(|e| {
                    format!(r#"{{"type":"error","error":"event serialisation: {e}"}}"#)
                });
                Ok::<Bytes, Infallible>(Bytes::from(line + "\n"))
            }));
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/plain")
                .body(body)
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
        }
    }
}

// ── Retrieval ────────────────────────────────────────────────────────────

async fn use_existing(
    State(state): State<AppState>,
    Path(pdf_name): Path<String>,
) -> Result<Response, ApiError> {
    let existing = state.retrieval.assemble_existing(&pdf_name).await?;
    Ok(Json(existing).into_response())
}

async fn pdf_image(
    State(state): State<AppState>,
    Path((pdf_name, page)): Path<(String, usize)>,
) -> Result<Response, ApiError> {
    match state.retrieval.get_image(&pdf_name, page).await? {
        Some(ArtifactSource::Url(url)) => Ok(Redirect::temporary(&url).into_response()),
        Some(ArtifactSource::Bytes(bytes)) => {
            Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response())
        }
        None => Err(ApiError::not_found("Image file not found")),
    }
}

async fn pdf_audio(
    State(state): State<AppState>,
    Path((pdf_name, page)): Path<(String, usize)>,
) -> Result<Response, ApiError> {
    match state.retrieval.get_audio(&pdf_name, page).await? {
        Some(ArtifactSource::Url(url)) => Ok(Redirect::temporary(&url).into_response()),
        Some(ArtifactSource::Bytes(bytes)) => {
            Ok(([(header::CONTENT_TYPE, "audio/mpeg")], bytes).into_response())
        }
        None => Err(ApiError::not_found(
            "Audio file not found and could not be generated",
        )),
    }
}

#[derive(Deserialize)]
struct AskQuestionRequest {
    question: Option<String>,
    context: Option<String>,
    #[serde(default)]
    pdf_name: Option<String>,
}

async fn ask_question(
    State(state): State<AppState>,
    body: Result<Json<AskQuestionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let (Some(question), Some(context)) = (body.question, body.context) else {
        return Err(ApiError::bad_request("Missing question or context"));
    };

    let answer = state
        .retrieval
        .answer_question(&question, &context, body.pdf_name.as_deref())
        .await?;
    Ok(Json(json!({ "answer": answer })).into_response())
}

async fn generate_quiz(
    State(state): State<AppState>,
    Path(pdf_name): Path<String>,
) -> Result<Response, ApiError> {
    let questions = state.retrieval.generate_quiz(&pdf_name).await?;
    Ok(Json(questions).into_response())
}

async fn download_materials(
    State(state): State<AppState>,
    Path(pdf_name): Path<String>,
) -> Result<Response, ApiError> {
    let (filename, archive) = state.retrieval.package_materials(&pdf_name).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        archive,
    )
        .into_response())
}

async fn check_pdf(
    State(state): State<AppState>,
    Path(pdf_name): Path<String>,
) -> Result<Response, ApiError> {
    let exists = state.retrieval.exists(&pdf_name).await;
    Ok(Json(json!({ "exists": exists })).into_response())
}

async fn check_pdf_by_filename(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let check = state.retrieval.check_by_filename(&filename).await?;
    if check.exists {
        Ok(Json(check).into_response())
    } else {
        Ok(Json(json!({ "exists": false })).into_response())
    }
}

async fn existing_pdfs(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Response, ApiError> {
    let pdfs = state.retrieval.list_user_pdfs(user.user_id).await?;
    Ok(Json(json!({ "pdfs": pdfs })).into_response())
}

async fn health() -> Response {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}
