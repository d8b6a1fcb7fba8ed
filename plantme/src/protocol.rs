//! Wire types shared by the chat client and the proxy routes.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::message::{ImageAnalysis, MessageType};

/// Chat mode. This deployment always runs in [`Mode::PlantDisease`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    PlantDisease,
    Normal,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::PlantDisease => "plant-disease",
            Mode::Normal => "normal",
        }
    }

    /// Any label other than `plant-disease` is treated as general chat.
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "plant-disease" => Mode::PlantDisease,
            _ => Mode::Normal,
        }
    }
}

impl Serialize for Mode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(Mode::from_label(&label))
    }
}

/// JSON body accepted by the chat route.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatRequest {
    pub message: String,
    pub mode: Mode,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ChatRequest {
    pub fn text(message: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            message: message.into(),
            mode: Mode::PlantDisease,
            kind: MessageType::Text,
            session_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    #[serde(default)]
    pub answer: String,
}

/// Body returned by the upload route on success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadReply {
    pub success: bool,
    pub analysis: Option<ImageAnalysis>,
    pub filename: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub media_type: String,
    pub stored: bool,
}

/// Multipart field names understood by the proxy routes.
pub mod fields {
    pub const MESSAGE: &str = "message";
    pub const SESSION_ID: &str = "sessionId";
    pub const MODE: &str = "mode";
    pub const TYPE: &str = "type";
    pub const AUDIO: &str = "audio";
    pub const IMAGE: &str = "image";

    /// Older clients posted the backend's own field names. Each alias is
    /// `(alias, canonical)`.
    pub const ALIASES: &[(&str, &str)] = &[("queastion", MESSAGE), ("uid", SESSION_ID)];

    pub fn canonical(name: &str) -> Option<&'static str> {
        [MESSAGE, SESSION_ID, MODE, TYPE, AUDIO, IMAGE]
            .into_iter()
            .find(|field| *field == name)
            .or_else(|| {
                ALIASES
                    .iter()
                    .find(|(alias, _)| *alias == name)
                    .map(|(_, canonical)| *canonical)
            })
    }
}
