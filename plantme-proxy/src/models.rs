use plantme::{ImageAnalysis, MessageType, Mode, UploadReply};
use serde::{Deserialize, Serialize};

/// A file received in a multipart body.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    pub file_name: String,
    pub media_type: String,
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// JSON body of the chat route. Every field is optional and may be null;
/// unknown `type` and `mode` labels are mapped, not rejected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChatBody {
    pub message: Option<String>,
    pub mode: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

impl ChatBody {
    pub fn into_question(self) -> IncomingQuestion {
        IncomingQuestion {
            message: self.message.unwrap_or_default(),
            mode: self
                .mode
                .map(|mode| Mode::from_label(&mode))
                .unwrap_or(Mode::PlantDisease),
            kind: self
                .kind
                .map(|kind| parse_kind(&kind))
                .unwrap_or(MessageType::Text),
            session_id: self.session_id.filter(|id| !id.is_empty()),
            audio: None,
        }
    }
}

/// Unknown labels are plain text.
pub fn parse_kind(kind: &str) -> MessageType {
    match kind {
        "audio" => MessageType::Audio,
        "image" => MessageType::Image,
        _ => MessageType::Text,
    }
}

/// Chat route input after JSON or multipart decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingQuestion {
    pub message: String,
    pub mode: Mode,
    pub kind: MessageType,
    pub session_id: Option<String>,
    pub audio: Option<UploadedFile>,
}

/// Backend question-answer reply.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BackendAnswer {
    #[serde(default)]
    pub answer: Option<String>,
}

/// Backend image-analysis reply.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Prediction {
    pub predicted_class: String,
    pub message: Option<String>,
    pub confidence: Option<f64>,
    pub confidence_level: Option<String>,
    pub stored: bool,
    pub full_name: Option<String>,
    pub estimated_recovery: Option<String>,
}

const SYMPTOMS: [&str; 3] = [
    "Based on the image analysis",
    "Visual symptoms detected",
    "Requires further examination",
];

const TREATMENT: [&str; 3] = [
    "Consult with a plant specialist",
    "Apply appropriate treatment based on diagnosis",
    "Monitor plant health regularly",
];

const PREVENTION: [&str; 3] = [
    "Maintain proper plant hygiene",
    "Ensure adequate spacing and air circulation",
    "Regular monitoring and early intervention",
];

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

impl Prediction {
    pub fn into_analysis(self) -> ImageAnalysis {
        let message = self
            .message
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| self.predicted_class.clone());

        ImageAnalysis {
            disease: self.predicted_class,
            message,
            confidence: self.confidence.unwrap_or_default(),
            severity: self.confidence_level.unwrap_or_default(),
            symptoms: owned(&SYMPTOMS),
            treatment: owned(&TREATMENT),
            prevention: owned(&PREVENTION),
            full_name: self.full_name,
            estimated_recovery: self.estimated_recovery,
        }
    }

    /// Upload route body for a successful analysis of the described image.
    pub fn into_upload_reply(self, filename: String, size: u64, media_type: String) -> UploadReply {
        let stored = self.stored;
        UploadReply {
            success: true,
            analysis: Some(self.into_analysis()),
            filename,
            size,
            media_type,
            stored,
        }
    }
}
