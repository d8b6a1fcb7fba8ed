use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{ChatError, Result};
use crate::state::data_url;

pub const RECORDING_MEDIA_TYPE: &str = "audio/webm";
pub const RECORDING_FILE_NAME: &str = "recording.webm";

/// Grants access to an audio input device.
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Fails with [`ChatError::MicrophoneDenied`] when access is refused.
    async fn open(&self) -> Result<Box<dyn AudioStream>>;
}

/// A live capture from an open microphone.
#[async_trait]
pub trait AudioStream: Send {
    /// Next buffered segment. After [`AudioStream::release`] this drains what is
    /// left and then returns `None`.
    async fn next_segment(&mut self) -> Option<Vec<u8>>;

    /// Stops every track and gives the device back.
    fn release(&mut self);
}

/// Placeholder for environments with no input device.
pub struct NoMicrophone;

#[async_trait]
impl Microphone for NoMicrophone {
    async fn open(&self) -> Result<Box<dyn AudioStream>> {
        Err(ChatError::MicrophoneDenied(
            "no audio input device available".to_string(),
        ))
    }
}

/// A finished recording.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub file_name: String,
    pub media_type: String,
    pub data: Vec<u8>,
}

impl AudioClip {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            file_name: RECORDING_FILE_NAME.to_string(),
            media_type: RECORDING_MEDIA_TYPE.to_string(),
            data,
        }
    }

    pub fn from_segments(segments: Vec<Vec<u8>>) -> Self {
        Self::new(segments.concat())
    }

    /// Local playback reference for the chat log.
    pub fn playback_url(&self) -> String {
        data_url(&self.media_type, &self.data)
    }
}

enum RecorderState {
    Idle,
    Recording(Box<dyn AudioStream>),
}

/// Two-state recorder: `Idle` and `Recording`.
pub struct Recorder {
    state: RecorderState,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            state: RecorderState::Idle,
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, RecorderState::Recording(_))
    }

    /// Opens the microphone and starts recording. Starting twice is an error.
    pub async fn start(&mut self, microphone: &dyn Microphone) -> Result<()> {
        if self.is_recording() {
            return Err(ChatError::RecorderError("already recording".to_string()));
        }
        let stream = microphone.open().await?;
        self.state = RecorderState::Recording(stream);
        debug!("Recording started");
        Ok(())
    }

    /// Releases the microphone and joins every buffered segment into one clip.
    /// Returns `None` when idle.
    pub async fn stop(&mut self) -> Option<AudioClip> {
        let RecorderState::Recording(mut stream) =
            std::mem::replace(&mut self.state, RecorderState::Idle)
        else {
            return None;
        };

        stream.release();
        let mut segments = Vec::new();
        while let Some(segment) = stream.next_segment().await {
            segments.push(segment);
        }

        let clip = AudioClip::from_segments(segments);
        debug!("Recording stopped: {} bytes", clip.data.len());
        Some(clip)
    }

    /// Drops an active capture without producing a clip.
    pub fn abandon(&mut self) {
        if let RecorderState::Recording(mut stream) =
            std::mem::replace(&mut self.state, RecorderState::Idle)
        {
            warn!("Discarding active recording");
            stream.release();
        }
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeMicrophone;
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn stop_joins_segments_and_releases() {
        let microphone = FakeMicrophone::with_segments(vec![b"ab".to_vec(), b"cd".to_vec()]);
        let mut recorder = Recorder::new();

        recorder.start(&microphone).await.unwrap();
        assert!(recorder.is_recording());

        let clip = recorder.stop().await.unwrap();
        assert_eq!(clip.data, b"abcd");
        assert_eq!(clip.media_type, RECORDING_MEDIA_TYPE);
        assert_eq!(clip.file_name, RECORDING_FILE_NAME);
        assert!(!recorder.is_recording());
        assert!(microphone.released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stop_while_idle_does_nothing() {
        let mut recorder = Recorder::new();
        assert!(recorder.stop().await.is_none());
    }

    #[tokio::test]
    async fn cannot_start_twice() {
        let microphone = FakeMicrophone::default();
        let mut recorder = Recorder::new();
        recorder.start(&microphone).await.unwrap();

        let second = recorder.start(&microphone).await;
        assert!(matches!(second, Err(ChatError::RecorderError(_))));
        assert_eq!(microphone.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn denied_microphone_stays_idle() {
        let mut recorder = Recorder::new();
        let result = recorder.start(&FakeMicrophone::denied()).await;
        assert!(matches!(result, Err(ChatError::MicrophoneDenied(_))));
        assert!(!recorder.is_recording());
    }
}
