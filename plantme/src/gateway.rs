use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ChatError, Result};
use crate::message::MessageType;
use crate::protocol::{ChatReply, ChatRequest, Mode, UploadReply, fields};
use crate::recorder::AudioClip;
use crate::state::PendingImage;

pub const CHAT_ROUTE: &str = "/api/chat";
pub const UPLOAD_ROUTE: &str = "/api/upload";

/// Outbound calls the chat session makes. Implemented over HTTP by
/// [`HttpChatGateway`]; tests script their own.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn ask(&self, request: &ChatRequest) -> Result<ChatReply>;

    async fn ask_audio(&self, session_id: Option<&str>, clip: &AudioClip) -> Result<ChatReply>;

    async fn analyze_image(
        &self,
        session_id: Option<&str>,
        image: &PendingImage,
    ) -> Result<UploadReply>;
}

/// Talks to the proxy routes served by `plantme-proxy`.
#[derive(Clone)]
pub struct HttpChatGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChatGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        route: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = request.send().await.map_err(|source| ChatError::Transport {
            route: route.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Status {
                route: route.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|source| ChatError::Transport {
            route: route.to_string(),
            source,
        })?;
        debug!(route, bytes = body.len(), "Received proxy response");

        serde_json::from_slice(&body).map_err(|e| ChatError::Decode {
            route: route.to_string(),
            message: e.to_string(),
        })
    }
}

fn file_part(data: &[u8], file_name: &str, media_type: &str) -> Result<Part> {
    Part::bytes(data.to_vec())
        .file_name(file_name.to_string())
        .mime_str(media_type)
        .map_err(|e| ChatError::Decode {
            route: "multipart".to_string(),
            message: format!("invalid media type {}: {}", media_type, e),
        })
}

#[async_trait]
impl ChatGateway for HttpChatGateway {
    async fn ask(&self, request: &ChatRequest) -> Result<ChatReply> {
        let builder = self.client.post(self.url(CHAT_ROUTE)).json(request);
        self.send(CHAT_ROUTE, builder).await
    }

    async fn ask_audio(&self, session_id: Option<&str>, clip: &AudioClip) -> Result<ChatReply> {
        let mut form = Form::new()
            .part(
                fields::AUDIO,
                file_part(&clip.data, &clip.file_name, &clip.media_type)?,
            )
            .text(fields::MESSAGE, "")
            .text(fields::MODE, Mode::PlantDisease.as_str())
            .text(fields::TYPE, MessageType::Audio.as_str());
        if let Some(session_id) = session_id {
            form = form.text(fields::SESSION_ID, session_id.to_string());
        }

        let builder = self.client.post(self.url(CHAT_ROUTE)).multipart(form);
        self.send(CHAT_ROUTE, builder).await
    }

    async fn analyze_image(
        &self,
        session_id: Option<&str>,
        image: &PendingImage,
    ) -> Result<UploadReply> {
        let mut form = Form::new().part(
            fields::IMAGE,
            file_part(&image.data, &image.file_name, &image.media_type)?,
        );
        if let Some(session_id) = session_id {
            form = form.text(fields::SESSION_ID, session_id.to_string());
        }

        let builder = self.client.post(self.url(UPLOAD_ROUTE)).multipart(form);
        self.send(UPLOAD_ROUTE, builder).await
    }
}
