//! Client for the inference backend's two endpoints.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::error::{BackendError, Result};
use crate::models::{BackendAnswer, Prediction, UploadedFile};

pub const QUESTION_ANSWER_PATH: &str = "/queastionAnswer";
pub const PREDICT_PATH: &str = "/predictscore";

/// Form field names fixed by the backend.
pub mod backend_fields {
    pub const QUESTION: &str = "queastion";
    pub const SESSION_ID: &str = "uid";
    pub const AUDIO: &str = "audio";
    pub const FILE: &str = "file";
}

#[derive(Debug, Clone)]
pub struct QuestionForm {
    pub question: String,
    pub session_id: Option<String>,
    pub audio: Option<UploadedFile>,
}

#[derive(Debug, Clone)]
pub struct ImageForm {
    pub image: UploadedFile,
    pub session_id: Option<String>,
}

#[async_trait]
pub trait BackendGateway: Send + Sync {
    async fn question_answer(&self, form: QuestionForm) -> Result<BackendAnswer>;
    async fn predict(&self, form: ImageForm) -> Result<Prediction>;
}

pub struct HttpBackendGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackendGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post_form<T: DeserializeOwned>(&self, path: &str, form: Form) -> Result<T> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        debug!(
            path,
            body = %String::from_utf8_lossy(&body),
            "Received from backend"
        );
        serde_json::from_slice(&body).map_err(|e| BackendError::Decode(e.to_string()))
    }
}

fn file_part(file: UploadedFile) -> Result<Part> {
    let media_type = file.media_type.clone();
    Part::bytes(file.data)
        .file_name(file.file_name)
        .mime_str(&media_type)
        .map_err(|_| BackendError::InvalidPart(format!("bad media type {:?}", media_type)))
}

#[async_trait]
impl BackendGateway for HttpBackendGateway {
    async fn question_answer(&self, form: QuestionForm) -> Result<BackendAnswer> {
        let mut body = Form::new().text(backend_fields::QUESTION, form.question);
        if let Some(session_id) = form.session_id {
            body = body.text(backend_fields::SESSION_ID, session_id);
        }
        if let Some(audio) = form.audio {
            body = body.part(backend_fields::AUDIO, file_part(audio)?);
        }
        self.post_form(QUESTION_ANSWER_PATH, body).await
    }

    async fn predict(&self, form: ImageForm) -> Result<Prediction> {
        let mut body = Form::new().part(backend_fields::FILE, file_part(form.image)?);
        if let Some(session_id) = form.session_id {
            body = body.text(backend_fields::SESSION_ID, session_id);
        }
        self.post_form(PREDICT_PATH, body).await
    }
}
