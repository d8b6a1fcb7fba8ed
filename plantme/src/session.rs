//! ChatSession – the single owner of the chat log and its transient flags.
//!
//! Every change goes through [`SessionState::apply`] and is published as a new
//! `Arc<SessionState>` on a `watch` channel, so a presentation layer only ever
//! sees whole snapshots. Outbound work is single-flight: while one request is
//! pending, further text submissions come back as [`Submission::Busy`] and
//! leave the state alone. A reset frees the slot at once; the request it
//! interrupted finishes in the background without touching the new state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use crate::error::ChatError;
use crate::gateway::ChatGateway;
use crate::message::Message;
use crate::protocol::{ChatRequest, UploadReply};
use crate::recorder::{AudioClip, Microphone, NoMicrophone, Recorder};
use crate::state::{PendingImage, SessionState, Transition};

pub const DEFAULT_IMAGE_CAPTION: &str = "Plant disease analysis";
pub const VOICE_MESSAGE_CONTENT: &str = "Voice message";

pub const TEXT_FAILURE: &str =
    "Sorry, there was an error processing your message. Please try again.";
pub const TEXT_EMPTY_ANSWER: &str = "Sorry, I couldn't process your message.";
pub const IMAGE_FAILURE: &str =
    "Sorry, I couldn't analyze the image. Please try again with a clearer photo.";
pub const VOICE_FAILURE: &str =
    "Sorry, I couldn't process your voice message. Please try again.";
pub const VOICE_EMPTY_ANSWER: &str = "Sorry, I couldn't process your voice message.";
pub const MICROPHONE_ALERT: &str = "Could not access microphone. Please check permissions.";

/// Blocking, user-facing notices (the browser's `alert`).
pub trait Alerts: Send + Sync {
    fn alert(&self, message: &str);
}

/// Sends alerts to the log only.
pub struct LogAlerts;

impl Alerts for LogAlerts {
    fn alert(&self, message: &str) {
        warn!(alert = %message, "User alert");
    }
}

/// What happened to a submit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Nothing to send; state untouched.
    Skipped,
    /// Another text or image request is in flight; state untouched.
    Busy,
    /// The backend answered and its reply was appended.
    Answered,
    /// The request failed and the fallback message was appended.
    Failed,
}

pub struct ChatSession {
    state: watch::Sender<Arc<SessionState>>,
    gateway: Arc<dyn ChatGateway>,
    session_id: Option<String>,
    /// Generation plus one of the request holding the single-flight slot, or
    /// zero when free.
    in_flight: AtomicU64,
    generation: AtomicU64,
    recorder: Mutex<Recorder>,
    microphone: Arc<dyn Microphone>,
    alerts: Arc<dyn Alerts>,
}

/// Clears the loading flag (and optionally the pending image) however the
/// request ends, including when the future is dropped mid-flight. Results from
/// before a reset are not applied.
struct InFlight<'a> {
    session: &'a ChatSession,
    generation: u64,
    clear_image: bool,
}

impl InFlight<'_> {
    fn apply(&self, transitions: impl IntoIterator<Item = Transition>) {
        if self.session.generation.load(Ordering::SeqCst) != self.generation {
            debug!("Session was reset while a request was in flight, dropping result");
            return;
        }
        self.session.publish(transitions);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut cleanup = vec![Transition::SetLoading(false)];
        if self.clear_image {
            cleanup.push(Transition::ClearImage);
        }
        self.apply(cleanup);
        // Fails when a newer request took the slot after a reset.
        let _ = self.session.in_flight.compare_exchange(
            self.generation + 1,
            0,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

impl ChatSession {
    pub fn builder(gateway: Arc<dyn ChatGateway>) -> ChatSessionBuilder {
        ChatSessionBuilder::new(gateway)
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<SessionState> {
        self.state.borrow().clone()
    }

    /// Receives every snapshot published from now on.
    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionState>> {
        self.state.subscribe()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn publish(&self, transitions: impl IntoIterator<Item = Transition>) {
        self.state.send_modify(|current| {
            let mut next = current.as_ref().clone();
            for transition in transitions {
                next = next.apply(transition);
            }
            *current = Arc::new(next);
        });
    }

    fn begin(&self, clear_image: bool) -> Option<InFlight<'_>> {
        let generation = self.generation.load(Ordering::SeqCst);
        let claim = generation + 1;
        // A holder from before the last reset does not block.
        self.in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |holder| {
                (holder != claim).then_some(claim)
            })
            .ok()?;
        Some(InFlight {
            session: self,
            generation,
            clear_image,
        })
    }

    /// Sends the typed text, or the pending image with the text as caption.
    pub async fn submit_text(&self, text: &str) -> Submission {
        let pending_image = self.snapshot().pending_image.clone();
        if text.trim().is_empty() && pending_image.is_none() {
            return Submission::Skipped;
        }

        let Some(flight) = self.begin(true) else {
            warn!("Submission rejected, a request is already in flight");
            return Submission::Busy;
        };

        match pending_image {
            Some(image) => self.send_image(&flight, text, image).await,
            None => self.send_text(&flight, text).await,
        }
    }

    async fn send_text(&self, flight: &InFlight<'_>, text: &str) -> Submission {
        flight.apply([
            Transition::Append(Message::user_text(text)),
            Transition::SetLoading(true),
        ]);

        let request = ChatRequest::text(text, self.session_id.clone());
        match self.gateway.ask(&request).await {
            Ok(reply) => {
                let answer = if reply.answer.trim().is_empty() {
                    TEXT_EMPTY_ANSWER.to_string()
                } else {
                    reply.answer
                };
                flight.apply([Transition::Append(Message::bot(answer))]);
                Submission::Answered
            }
            Err(e) => {
                error!("Error sending message: {}", e);
                flight.apply([Transition::Append(Message::bot(TEXT_FAILURE))]);
                Submission::Failed
            }
        }
    }

    async fn send_image(
        &self,
        flight: &InFlight<'_>,
        caption: &str,
        image: PendingImage,
    ) -> Submission {
        let caption = if caption.trim().is_empty() {
            DEFAULT_IMAGE_CAPTION
        } else {
            caption
        };
        flight.apply([
            Transition::Append(Message::user_image(caption, image.preview.clone())),
            Transition::SetLoading(true),
        ]);

        match self.gateway.analyze_image(self.session_id(), &image).await {
            Ok(UploadReply {
                success: true,
                analysis: Some(analysis),
                stored,
                ..
            }) => {
                info!(disease = %analysis.disease, stored, "Image analysed");
                let detected = stored.then(|| analysis.display_name().to_string());
                let mut transitions = vec![Transition::Append(Message::bot_analysis(analysis))];
                transitions.extend(detected.map(Transition::SetDetectedDisease));
                flight.apply(transitions);
                Submission::Answered
            }
            Ok(reply) => {
                warn!(success = reply.success, "Upload reply carried no analysis");
                flight.apply([Transition::Append(Message::bot(IMAGE_FAILURE))]);
                Submission::Failed
            }
            Err(e) => {
                error!("Error analysing image: {}", e);
                flight.apply([Transition::Append(Message::bot(IMAGE_FAILURE))]);
                Submission::Failed
            }
        }
    }

    /// Sends a finished recording to the question-answer route. The voice
    /// message is always logged; if another request is in flight the clip is
    /// not sent and the voice fallback follows it.
    pub async fn submit_audio(&self, clip: AudioClip) -> Submission {
        let voice_message = Message::user_audio(VOICE_MESSAGE_CONTENT, clip.playback_url());

        let Some(flight) = self.begin(false) else {
            warn!(
                bytes = clip.data.len(),
                "Voice message not sent, a request is already in flight"
            );
            self.publish([
                Transition::Append(voice_message),
                Transition::Append(Message::bot(VOICE_FAILURE)),
            ]);
            return Submission::Failed;
        };

        flight.apply([
            Transition::Append(voice_message),
            Transition::SetLoading(true),
        ]);

        match self.gateway.ask_audio(self.session_id(), &clip).await {
            Ok(reply) => {
                let answer = if reply.answer.trim().is_empty() {
                    VOICE_EMPTY_ANSWER.to_string()
                } else {
                    reply.answer
                };
                flight.apply([Transition::Append(Message::bot(answer))]);
                Submission::Answered
            }
            Err(e) => {
                error!("Error processing audio: {}", e);
                flight.apply([Transition::Append(Message::bot(VOICE_FAILURE))]);
                Submission::Failed
            }
        }
    }

    /// Opens the microphone. On denial the user is alerted and nothing changes.
    /// Calling this while already recording has no effect.
    pub async fn start_recording(&self) -> Result<(), ChatError> {
        let mut recorder = self.recorder.lock().await;
        if recorder.is_recording() {
            debug!("start_recording ignored, already recording");
            return Ok(());
        }

        match recorder.start(self.microphone.as_ref()).await {
            Ok(()) => {
                self.publish([Transition::SetRecording(true)]);
                Ok(())
            }
            Err(e) => {
                error!("Error accessing microphone: {}", e);
                self.alerts.alert(MICROPHONE_ALERT);
                Err(e)
            }
        }
    }

    /// Finishes the recording and submits it. Without an active recording this
    /// is a no-op returning [`Submission::Skipped`].
    pub async fn stop_recording(&self) -> Submission {
        let clip = {
            let mut recorder = self.recorder.lock().await;
            recorder.stop().await
        };
        let Some(clip) = clip else {
            return Submission::Skipped;
        };

        self.publish([Transition::SetRecording(false)]);
        self.submit_audio(clip).await
    }

    /// Attaches an image to the next submission. Non-images are ignored, as is
    /// anything chosen while recording.
    pub fn select_image(
        &self,
        file_name: impl Into<String>,
        media_type: impl Into<String>,
        data: Vec<u8>,
    ) -> bool {
        if self.snapshot().is_recording {
            debug!("Image selection ignored while recording");
            return false;
        }
        match PendingImage::from_file(file_name, media_type, data) {
            Some(image) => {
                self.publish([Transition::SelectImage(image)]);
                true
            }
            None => {
                debug!("Ignoring non-image selection");
                false
            }
        }
    }

    pub fn clear_image(&self) {
        self.publish([Transition::ClearImage]);
    }

    /// Back to the seeded state. Any active recording is discarded and replies
    /// to requests sent before the reset are dropped. The session identifier
    /// is kept.
    pub async fn reset(&self) {
        self.recorder.lock().await.abandon();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.publish([Transition::Reset]);
        info!("Chat session reset");
    }
}

pub struct ChatSessionBuilder {
    gateway: Arc<dyn ChatGateway>,
    session_id: Option<String>,
    microphone: Arc<dyn Microphone>,
    alerts: Arc<dyn Alerts>,
}

impl ChatSessionBuilder {
    pub fn new(gateway: Arc<dyn ChatGateway>) -> Self {
        Self {
            gateway,
            session_id: None,
            microphone: Arc::new(NoMicrophone),
            alerts: Arc::new(LogAlerts),
        }
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn microphone(mut self, microphone: Arc<dyn Microphone>) -> Self {
        self.microphone = microphone;
        self
    }

    pub fn alerts(mut self, alerts: Arc<dyn Alerts>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn build(self) -> ChatSession {
        let (state, _) = watch::channel(Arc::new(SessionState::initial()));
        ChatSession {
            state,
            gateway: self.gateway,
            session_id: self.session_id,
            in_flight: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            recorder: Mutex::new(Recorder::new()),
            microphone: self.microphone,
            alerts: self.alerts,
        }
    }
}
