use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;

use crate::message::Message;
use crate::protocol::Mode;

/// An image chosen by the user but not sent yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingImage {
    pub file_name: String,
    pub media_type: String,
    #[serde(skip)]
    pub data: Vec<u8>,
    /// `data:` URL used to render the thumbnail before upload.
    pub preview: String,
}

impl PendingImage {
    /// Returns `None` unless the media type is an image.
    pub fn from_file(
        file_name: impl Into<String>,
        media_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Option<Self> {
        let media_type = media_type.into();
        if !media_type.starts_with("image/") {
            return None;
        }
        let preview = data_url(&media_type, &data);
        Some(Self {
            file_name: file_name.into(),
            media_type,
            data,
            preview,
        })
    }
}

pub(crate) fn data_url(media_type: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", media_type, STANDARD.encode(data))
}

/// Immutable snapshot of one chat session. Every change produces a new snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub messages: Vec<Message>,
    pub mode: Mode,
    pub is_loading: bool,
    pub is_recording: bool,
    pub detected_disease: Option<String>,
    pub pending_image: Option<PendingImage>,
}

/// A single change to a [`SessionState`].
#[derive(Debug, Clone)]
pub enum Transition {
    Append(Message),
    SetLoading(bool),
    SetRecording(bool),
    SetDetectedDisease(String),
    SelectImage(PendingImage),
    ClearImage,
    Reset,
}

impl SessionState {
    /// Fresh state with the welcome message seeded.
    pub fn initial() -> Self {
        Self {
            messages: vec![Message::welcome()],
            mode: Mode::PlantDisease,
            is_loading: false,
            is_recording: false,
            detected_disease: None,
            pending_image: None,
        }
    }

    pub fn apply(&self, transition: Transition) -> Self {
        let mut next = self.clone();
        match transition {
            Transition::Append(message) => next.messages.push(message),
            Transition::SetLoading(loading) => next.is_loading = loading,
            Transition::SetRecording(recording) => next.is_recording = recording,
            Transition::SetDetectedDisease(disease) => next.detected_disease = Some(disease),
            Transition::SelectImage(image) => next.pending_image = Some(image),
            Transition::ClearImage => next.pending_image = None,
            Transition::Reset => return Self::initial(),
        }
        next
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::initial()
    }
}
