use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Id of the seeded welcome message. Every other message is numbered after it.
pub const WELCOME_MESSAGE_ID: u64 = 1;

pub const WELCOME_MESSAGE: &str = "Hello! I'm your PlantMe AI assistant. I specialize in plant disease detection. Upload a plant image or describe symptoms to get started.";

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(WELCOME_MESSAGE_ID + 1);

fn next_message_id() -> u64 {
    NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Audio,
    Image,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Audio => "audio",
            MessageType::Image => "image",
        }
    }
}

/// Structured result of an image analysis, as normalized by the upload route.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageAnalysis {
    pub disease: String,
    pub message: String,
    /// Classifier confidence in `[0, 1]`.
    pub confidence: f64,
    pub severity: String,
    pub symptoms: Vec<String>,
    pub treatment: Vec<String>,
    pub prevention: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_recovery: Option<String>,
}

impl ImageAnalysis {
    /// Label shown in the header once the backend confirms it stored the result.
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.disease)
    }
}

/// A single entry of the chat log. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: u64,
    pub sender: Sender,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_analysis: Option<ImageAnalysis>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(sender: Sender, content: impl Into<String>, kind: MessageType) -> Self {
        Self {
            id: next_message_id(),
            sender,
            content: content.into(),
            kind,
            audio_url: None,
            image_url: None,
            image_analysis: None,
            timestamp: Utc::now(),
        }
    }

    pub fn welcome() -> Self {
        Self {
            id: WELCOME_MESSAGE_ID,
            ..Self::new(Sender::Bot, WELCOME_MESSAGE, MessageType::Text)
        }
    }

    pub fn user_text(content: impl Into<String>) -> Self {
        Self::new(Sender::User, content, MessageType::Text)
    }

    pub fn user_image(caption: impl Into<String>, preview: impl Into<String>) -> Self {
        Self {
            image_url: Some(preview.into()),
            ..Self::new(Sender::User, caption, MessageType::Image)
        }
    }

    pub fn user_audio(content: impl Into<String>, audio_url: impl Into<String>) -> Self {
        Self {
            audio_url: Some(audio_url.into()),
            ..Self::new(Sender::User, content, MessageType::Audio)
        }
    }

    pub fn bot(content: impl Into<String>) -> Self {
        Self::new(Sender::Bot, content, MessageType::Text)
    }

    pub fn bot_analysis(analysis: ImageAnalysis) -> Self {
        Self {
            image_analysis: Some(analysis.clone()),
            ..Self::new(Sender::Bot, analysis.message, MessageType::Text)
        }
    }

    pub fn is_from_user(&self) -> bool {
        self.sender == Sender::User
    }
}
