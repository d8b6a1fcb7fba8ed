use axum::{
    Router,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State, multipart::MultipartRejection},
    http::{HeaderValue, StatusCode, header::CONTENT_TYPE},
    middleware::{Next, from_fn},
    response::{Json, Response},
    routing::{get, post},
};
use plantme::protocol::fields;
use plantme::{ChatReply, MessageType, Mode, UploadReply};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use crate::backend::{BackendGateway, HttpBackendGateway, ImageForm, QuestionForm};
use crate::config::ProxyConfig;
use crate::error::BackendError;
use crate::models::{BackendAnswer, ChatBody, IncomingQuestion, UploadedFile, parse_kind};

pub const NO_RESPONSE: &str = "No response received";
pub const INTERNAL_FAILURE: &str = "Sorry, there was an error processing your request.";
pub const MISSING_IMAGE: &str = "No image file provided";
pub const IMAGE_FAILURE: &str = "Failed to process image";

/// Apologies returned with HTTP 200 when the backend lets us down.
struct Fallbacks {
    unreachable: &'static str,
    invalid_response: &'static str,
}

fn fallbacks(mode: Mode) -> Fallbacks {
    match mode {
        Mode::PlantDisease => Fallbacks {
            unreachable: "Sorry, I couldn't connect to the plant disease analysis service. Please try again later.",
            invalid_response: "Sorry, I received an invalid response from the plant disease service. Please try again.",
        },
        Mode::Normal => Fallbacks {
            unreachable: "Sorry, I couldn't connect to the chat service. Please try again later.",
            invalid_response: "Sorry, I received an invalid response from the chat service. Please try again.",
        },
    }
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn BackendGateway>,
}

pub fn create_app(config: &ProxyConfig) -> Result<Router, BackendError> {
    let backend = HttpBackendGateway::new(&config.backend_base_url, config.backend_timeout)?;
    let app_state = AppState {
        backend: Arc::new(backend),
    };
    Ok(build_router(app_state, config.max_upload_bytes))
}

pub fn build_router(app_state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/chat", post(chat))
        .route("/api/upload", post(upload))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(correlation_id_middleware))
        .with_state(app_state)
}

/// Tags every request with an `x-correlation-id` and runs it inside a span carrying it.
async fn correlation_id_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = Uuid::new_v4().to_string();

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "PlantMe Proxy",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Forwards chat, voice and image requests to the plant disease backend",
        "endpoints": {
            "POST /api/chat": "Ask a question (JSON) or send a voice message (multipart)",
            "POST /api/upload": "Analyse a plant image (multipart)",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn chat(State(state): State<AppState>, request: Request) -> (StatusCode, Json<ChatReply>) {
    let is_json = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("application/json"));

    let question = if is_json {
        read_json_question(request, &state).await
    } else {
        read_multipart_question(request, &state).await
    };

    match question {
        Ok(question) => {
            let answer = answer_question(&state, question).await;
            (StatusCode::OK, Json(ChatReply { answer }))
        }
        Err(details) => {
            error!("API Error: {}", details);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ChatReply {
                    answer: INTERNAL_FAILURE.to_string(),
                }),
            )
        }
    }
}

async fn read_json_question(request: Request, state: &AppState) -> Result<IncomingQuestion, String> {
    let Json(body) = Json::<ChatBody>::from_request(request, state)
        .await
        .map_err(|e| e.body_text())?;

    Ok(body.into_question())
}

/// Reads the voice-message form. Canonical field names win over their aliases.
async fn read_multipart_question(
    request: Request,
    state: &AppState,
) -> Result<IncomingQuestion, String> {
    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|e| e.body_text())?;

    let mut canonical: HashMap<&'static str, String> = HashMap::new();
    let mut aliased: HashMap<&'static str, String> = HashMap::new();
    let mut audio = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| e.body_text())? {
        let name = field.name().unwrap_or_default().to_string();
        let Some(key) = fields::canonical(&name) else {
            debug!("Ignoring unknown form field {:?}", name);
            continue;
        };

        if key == fields::AUDIO {
            audio = Some(read_file(field).await?);
            continue;
        }

        let value = field.text().await.map_err(|e| e.body_text())?;
        if key == name {
            canonical.insert(key, value);
        } else {
            debug!("Form field {:?} accepted as alias for {:?}", name, key);
            aliased.insert(key, value);
        }
    }

    let mut value_of = |key: &'static str| {
        canonical
            .remove(key)
            .filter(|value| !value.is_empty())
            .or_else(|| aliased.remove(key).filter(|value| !value.is_empty()))
    };

    Ok(IncomingQuestion {
        message: value_of(fields::MESSAGE).unwrap_or_default(),
        mode: value_of(fields::MODE)
            .map(|mode| Mode::from_label(&mode))
            .unwrap_or(Mode::PlantDisease),
        kind: value_of(fields::TYPE)
            .map(|kind| parse_kind(&kind))
            .unwrap_or(MessageType::Audio),
        session_id: value_of(fields::SESSION_ID),
        audio,
    })
}

async fn read_file(field: axum::extract::multipart::Field<'_>) -> Result<UploadedFile, String> {
    let file_name = field.file_name().unwrap_or("upload").to_string();
    let media_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = field.bytes().await.map_err(|e| e.body_text())?;
    Ok(UploadedFile {
        file_name,
        media_type,
        data: data.to_vec(),
    })
}

async fn answer_question(state: &AppState, question: IncomingQuestion) -> String {
    let mode = question.mode;
    // General chat never carries the voice clip.
    let audio = match (mode, question.kind) {
        (Mode::PlantDisease, MessageType::Audio) => question.audio,
        _ => None,
    };

    info!(
        mode = mode.as_str(),
        kind = question.kind.as_str(),
        session_id = ?question.session_id,
        has_audio = audio.is_some(),
        "Forwarding question to backend"
    );

    let form = QuestionForm {
        question: question.message,
        session_id: question.session_id,
        audio,
    };

    match state.backend.question_answer(form).await {
        Ok(BackendAnswer {
            answer: Some(answer),
        }) if !answer.is_empty() => answer,
        Ok(_) => {
            warn!("Backend reply carried no answer");
            NO_RESPONSE.to_string()
        }
        Err(BackendError::Decode(e)) => {
            error!("JSON parsing error: {}", e);
            fallbacks(mode).invalid_response.to_string()
        }
        Err(e) => {
            error!("Question-answer request failed: {}", e);
            fallbacks(mode).unreachable.to_string()
        }
    }
}

async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<UploadReply> {
    let mut multipart = multipart.map_err(|e| {
        error!("Upload Error: {}", e.body_text());
        internal_error(IMAGE_FAILURE, &e.body_text())
    })?;

    let mut image = None;
    let mut session_id = None;
    let mut alias_session_id = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                error!("Upload Error: {}", e.body_text());
                return Err(internal_error(IMAGE_FAILURE, &e.body_text()));
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        match fields::canonical(&name) {
            Some(fields::IMAGE) => {
                image = Some(
                    read_file(field)
                        .await
                        .map_err(|details| internal_error(IMAGE_FAILURE, &details))?,
                );
            }
            Some(fields::SESSION_ID) => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| internal_error(IMAGE_FAILURE, &e.body_text()))?;
                if name == fields::SESSION_ID {
                    session_id = Some(value);
                } else {
                    alias_session_id = Some(value);
                }
            }
            _ => debug!("Ignoring form field {:?}", name),
        }
    }

    let Some(image) = image else {
        warn!("Upload without an image file");
        return Err(bad_request_error(MISSING_IMAGE));
    };
    let session_id = session_id
        .or(alias_session_id)
        .filter(|id| !id.is_empty());

    info!(
        filename = %image.file_name,
        size = image.size(),
        session_id = ?session_id,
        "Forwarding image to backend"
    );

    let filename = image.file_name.clone();
    let size = image.size();
    let media_type = image.media_type.clone();

    let prediction = state
        .backend
        .predict(ImageForm { image, session_id })
        .await
        .map_err(|e| {
            error!("Upload Error: {}", e);
            internal_error(IMAGE_FAILURE, &e.to_string())
        })?;

    Ok(Json(prediction.into_upload_reply(filename, size, media_type)))
}
