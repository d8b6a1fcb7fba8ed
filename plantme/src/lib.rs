pub mod error;
pub mod gateway;
pub mod identity;
pub mod message;
pub mod protocol;
pub mod recorder;
pub mod session;
pub mod state;
pub mod storage;
pub mod theme;

// Re-export commonly used types
pub use error::{ChatError, Result};
pub use gateway::{ChatGateway, HttpChatGateway};
pub use identity::SessionIdentifierStore;
pub use message::{ImageAnalysis, Message, MessageType, Sender};
pub use protocol::{ChatReply, ChatRequest, Mode, UploadReply};
pub use recorder::{AudioClip, AudioStream, Microphone, NoMicrophone, Recorder};
pub use session::{Alerts, ChatSession, ChatSessionBuilder, LogAlerts, Submission};
pub use state::{PendingImage, SessionState, Transition};
pub use storage::{InMemoryKeyValueStore, JsonFileStore, KeyValueStore};
pub use theme::{Theme, ThemePreference};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::testing::FakeMicrophone;
    use crate::session::{
        DEFAULT_IMAGE_CAPTION, IMAGE_FAILURE, MICROPHONE_ALERT, TEXT_EMPTY_ANSWER, TEXT_FAILURE,
        VOICE_FAILURE, VOICE_MESSAGE_CONTENT,
    };
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Semaphore;

    /// Gateway that hands back canned replies and remembers what it was asked.
    #[derive(Default)]
    struct ScriptedGateway {
        answer: Option<String>,
        upload: Option<UploadReply>,
        fail: bool,
        hold: Option<Arc<Semaphore>>,
        questions: Mutex<Vec<ChatRequest>>,
        audio_sessions: Mutex<Vec<Option<String>>>,
        uploads: Mutex<Vec<String>>,
    }

    impl ScriptedGateway {
        fn answering(answer: &str) -> Self {
            Self {
                answer: Some(answer.to_string()),
                ..Default::default()
            }
        }

        fn uploading(reply: UploadReply) -> Self {
            Self {
                upload: Some(reply),
                ..Default::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        async fn outcome<T>(&self, value: Option<T>) -> Result<T> {
            if let Some(hold) = &self.hold {
                if let Ok(permit) = hold.acquire().await {
                    permit.forget();
                }
            }
            if self.fail {
                return Err(ChatError::Status {
                    route: "/api/chat".to_string(),
                    status: 502,
                });
            }
            value.ok_or_else(|| ChatError::Decode {
                route: "scripted".to_string(),
                message: "no reply scripted".to_string(),
            })
        }
    }

    #[async_trait]
    impl ChatGateway for ScriptedGateway {
        async fn ask(&self, request: &ChatRequest) -> Result<ChatReply> {
            self.questions.lock().unwrap().push(request.clone());
            let answer = self.answer.clone().map(|answer| ChatReply { answer });
            self.outcome(answer).await
        }

        async fn ask_audio(&self, session_id: Option<&str>, _clip: &AudioClip) -> Result<ChatReply> {
            self.audio_sessions
                .lock()
                .unwrap()
                .push(session_id.map(str::to_string));
            let answer = self.answer.clone().map(|answer| ChatReply { answer });
            self.outcome(answer).await
        }

        async fn analyze_image(
            &self,
            _session_id: Option<&str>,
            image: &PendingImage,
        ) -> Result<UploadReply> {
            self.uploads.lock().unwrap().push(image.file_name.clone());
            self.outcome(self.upload.clone()).await
        }
    }

    #[derive(Default)]
    struct RecordedAlerts(Mutex<Vec<String>>);

    impl Alerts for RecordedAlerts {
        fn alert(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    fn assert_seeded(state: &SessionState) {
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].id, message::WELCOME_MESSAGE_ID);
        assert!(!state.is_loading);
        assert!(!state.is_recording);
        assert!(state.detected_disease.is_none());
        assert!(state.pending_image.is_none());
    }

    fn session_with(gateway: Arc<ScriptedGateway>) -> ChatSession {
        ChatSession::builder(gateway).session_id("session-1").build()
    }

    fn leaf_rust_reply() -> UploadReply {
        UploadReply {
            success: true,
            analysis: Some(ImageAnalysis {
                disease: "Leaf Rust".to_string(),
                message: "Leaf rust detected".to_string(),
                confidence: 0.92,
                severity: "high".to_string(),
                ..Default::default()
            }),
            filename: "leaf.png".to_string(),
            size: 3,
            media_type: "image/png".to_string(),
            stored: true,
        }
    }

    #[tokio::test]
    async fn text_submission_appends_user_then_bot() {
        let gateway = Arc::new(ScriptedGateway::answering("Likely nitrogen deficiency"));
        let session = session_with(gateway.clone());
        assert!(!session.snapshot().is_loading);

        let outcome = session.submit_text("My leaves are yellow").await;
        assert_eq!(outcome, Submission::Answered);

        let state = session.snapshot();
        assert_eq!(state.messages.len(), 3);
        assert_eq!(state.messages[1].sender, Sender::User);
        assert_eq!(state.messages[1].content, "My leaves are yellow");
        assert_eq!(state.messages[2].sender, Sender::Bot);
        assert_eq!(state.messages[2].content, "Likely nitrogen deficiency");
        assert!(!state.is_loading);

        let questions = gateway.questions.lock().unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].session_id.as_deref(), Some("session-1"));
        assert_eq!(questions[0].mode, Mode::PlantDisease);
    }

    #[tokio::test]
    async fn blank_submission_changes_nothing() {
        let gateway = Arc::new(ScriptedGateway::answering("unused"));
        let session = session_with(gateway.clone());
        let before = session.snapshot();

        assert_eq!(session.submit_text("   \n").await, Submission::Skipped);
        assert_eq!(session.snapshot(), before);
        assert!(gateway.questions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn backend_failure_becomes_fallback_message() {
        let session = session_with(Arc::new(ScriptedGateway::failing()));

        assert_eq!(session.submit_text("hello").await, Submission::Failed);
        let state = session.snapshot();
        assert_eq!(state.last_message().unwrap().content, TEXT_FAILURE);
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn empty_answer_uses_placeholder() {
        let session = session_with(Arc::new(ScriptedGateway::answering("")));
        session.submit_text("hello").await;
        assert_eq!(session.snapshot().last_message().unwrap().content, TEXT_EMPTY_ANSWER);
    }

    #[tokio::test]
    async fn image_submission_sets_detected_disease() {
        let gateway = Arc::new(ScriptedGateway::uploading(leaf_rust_reply()));
        let session = session_with(gateway.clone());
        assert!(session.select_image("leaf.png", "image/png", vec![1, 2, 3]));

        assert_eq!(session.submit_text("").await, Submission::Answered);

        let state = session.snapshot();
        let user = &state.messages[1];
        assert_eq!(user.kind, MessageType::Image);
        assert_eq!(user.content, DEFAULT_IMAGE_CAPTION);
        assert!(user.image_url.as_deref().unwrap().starts_with("data:image/png;base64,"));

        let bot = &state.messages[2];
        assert_eq!(bot.content, "Leaf rust detected");
        assert_eq!(bot.image_analysis.as_ref().unwrap().confidence, 0.92);
        assert_eq!(state.detected_disease.as_deref(), Some("Leaf Rust"));
        assert!(state.pending_image.is_none());
        assert!(!state.is_loading);
        assert_eq!(*gateway.uploads.lock().unwrap(), vec!["leaf.png".to_string()]);
        assert!(gateway.questions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unstored_analysis_leaves_detected_disease_alone() {
        let reply = UploadReply {
            stored: false,
            ..leaf_rust_reply()
        };
        let session = session_with(Arc::new(ScriptedGateway::uploading(reply)));
        session.select_image("leaf.png", "image/png", vec![1]);
        session.submit_text("what is this?").await;

        let state = session.snapshot();
        assert_eq!(state.messages[1].content, "what is this?");
        assert!(state.detected_disease.is_none());
    }

    #[tokio::test]
    async fn failed_upload_clears_image_and_apologises() {
        let session = session_with(Arc::new(ScriptedGateway::failing()));
        session.select_image("leaf.png", "image/png", vec![1]);

        assert_eq!(session.submit_text("").await, Submission::Failed);
        let state = session.snapshot();
        assert_eq!(state.last_message().unwrap().content, IMAGE_FAILURE);
        assert!(state.pending_image.is_none());
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn unsuccessful_upload_reply_apologises() {
        let session = session_with(Arc::new(ScriptedGateway::uploading(UploadReply::default())));
        session.select_image("leaf.png", "image/png", vec![1]);

        assert_eq!(session.submit_text("").await, Submission::Failed);
        assert_eq!(session.snapshot().last_message().unwrap().content, IMAGE_FAILURE);
    }

    #[tokio::test]
    async fn non_image_selection_is_ignored() {
        let session = session_with(Arc::new(ScriptedGateway::answering("ok")));
        assert!(!session.select_image("notes.txt", "text/plain", vec![1]));
        assert!(session.snapshot().pending_image.is_none());

        assert!(session.select_image("leaf.jpg", "image/jpeg", vec![1]));
        session.clear_image();
        assert!(session.snapshot().pending_image.is_none());
    }

    #[tokio::test]
    async fn second_submission_while_in_flight_is_rejected() {
        let hold = Arc::new(Semaphore::new(0));
        let gateway = Arc::new(ScriptedGateway {
            answer: Some("done".to_string()),
            hold: Some(hold.clone()),
            ..Default::default()
        });
        let session = Arc::new(session_with(gateway.clone()));

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.submit_text("first").await }
        });

        let mut updates = session.subscribe();
        updates.wait_for(|state| state.is_loading).await.unwrap();

        assert_eq!(session.submit_text("second").await, Submission::Busy);
        assert_eq!(session.snapshot().messages.len(), 2);

        hold.add_permits(1);
        assert_eq!(first.await.unwrap(), Submission::Answered);

        let state = session.snapshot();
        assert_eq!(state.messages.len(), 3);
        assert!(!state.is_loading);
        assert_eq!(gateway.questions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reset_restores_welcome_and_keeps_session_id() {
        let session = session_with(Arc::new(ScriptedGateway::uploading(leaf_rust_reply())));
        session.select_image("leaf.png", "image/png", vec![1]);
        session.submit_text("").await;
        session.select_image("leaf2.png", "image/png", vec![2]);

        session.reset().await;

        let state = session.snapshot();
        assert_seeded(&state);
        assert_eq!(session.session_id(), Some("session-1"));
    }

    #[tokio::test]
    async fn reply_arriving_after_reset_is_dropped() {
        let hold = Arc::new(Semaphore::new(0));
        let gateway = Arc::new(ScriptedGateway {
            answer: Some("late".to_string()),
            hold: Some(hold.clone()),
            ..Default::default()
        });
        let session = Arc::new(session_with(gateway));

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.submit_text("question").await }
        });
        session
            .subscribe()
            .wait_for(|state| state.is_loading)
            .await
            .unwrap();

        session.reset().await;
        hold.add_permits(1);
        pending.await.unwrap();

        assert_seeded(&session.snapshot());
    }

    #[tokio::test]
    async fn recording_round_trip_submits_voice_message() {
        let gateway = Arc::new(ScriptedGateway::answering("Sounds like overwatering"));
        let microphone = FakeMicrophone::with_segments(vec![b"seg1".to_vec(), b"seg2".to_vec()]);
        let session = ChatSession::builder(gateway.clone())
            .session_id("session-1")
            .microphone(Arc::new(microphone.clone()))
            .build();

        session.start_recording().await.unwrap();
        assert!(session.snapshot().is_recording);

        assert_eq!(session.stop_recording().await, Submission::Answered);

        let state = session.snapshot();
        assert!(!state.is_recording);
        assert!(!state.is_loading);
        assert_eq!(state.messages[1].kind, MessageType::Audio);
        assert_eq!(state.messages[1].content, VOICE_MESSAGE_CONTENT);
        assert!(state.messages[1].audio_url.as_deref().unwrap().starts_with("data:audio/webm"));
        assert_eq!(state.messages[2].content, "Sounds like overwatering");
        assert!(microphone.released.load(Ordering::SeqCst));
        assert_eq!(
            *gateway.audio_sessions.lock().unwrap(),
            vec![Some("session-1".to_string())]
        );
    }

    #[tokio::test]
    async fn stop_without_start_has_no_effect() {
        let session = session_with(Arc::new(ScriptedGateway::answering("unused")));
        let before = session.snapshot();

        assert_eq!(session.stop_recording().await, Submission::Skipped);
        assert_eq!(session.snapshot(), before);
    }

    #[tokio::test]
    async fn denied_microphone_alerts_and_stays_idle() {
        let alerts = Arc::new(RecordedAlerts::default());
        let session = ChatSession::builder(Arc::new(ScriptedGateway::answering("unused")))
            .microphone(Arc::new(FakeMicrophone::denied()))
            .alerts(alerts.clone())
            .build();

        let result = session.start_recording().await;
        assert!(matches!(result, Err(ChatError::MicrophoneDenied(_))));
        assert!(!session.snapshot().is_recording);
        assert_eq!(*alerts.0.lock().unwrap(), vec![MICROPHONE_ALERT.to_string()]);
    }

    #[tokio::test]
    async fn starting_twice_opens_the_microphone_once() {
        let microphone = FakeMicrophone::default();
        let session = ChatSession::builder(Arc::new(ScriptedGateway::answering("ok")))
            .microphone(Arc::new(microphone.clone()))
            .build();

        session.start_recording().await.unwrap();
        session.start_recording().await.unwrap();
        assert_eq!(microphone.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn voice_failure_uses_voice_fallback() {
        let session = session_with(Arc::new(ScriptedGateway::failing()));
        assert_eq!(
            session.submit_audio(AudioClip::new(vec![1, 2])).await,
            Submission::Failed
        );
        let state = session.snapshot();
        assert_eq!(state.messages[1].kind, MessageType::Audio);
        assert_eq!(state.last_message().unwrap().content, VOICE_FAILURE);
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn reset_discards_active_recording() {
        let microphone = FakeMicrophone::default();
        let session = ChatSession::builder(Arc::new(ScriptedGateway::answering("ok")))
            .microphone(Arc::new(microphone.clone()))
            .build();

        session.start_recording().await.unwrap();
        session.reset().await;

        assert!(!session.snapshot().is_recording);
        assert!(microphone.released.load(Ordering::SeqCst));
        assert_eq!(session.stop_recording().await, Submission::Skipped);
    }

    #[tokio::test]
    async fn submission_after_reset_does_not_wait_for_stale_request() {
        let hold = Arc::new(Semaphore::new(0));
        let gateway = Arc::new(ScriptedGateway {
            answer: Some("answer".to_string()),
            hold: Some(hold.clone()),
            ..Default::default()
        });
        let session = Arc::new(session_with(gateway.clone()));

        let stale = tokio::spawn({
            let session = session.clone();
            async move { session.submit_text("before reset").await }
        });
        session
            .subscribe()
            .wait_for(|state| state.is_loading)
            .await
            .unwrap();

        session.reset().await;
        assert!(!session.snapshot().is_loading);

        let fresh = tokio::spawn({
            let session = session.clone();
            async move { session.submit_text("after reset").await }
        });
        session
            .subscribe()
            .wait_for(|state| state.is_loading)
            .await
            .unwrap();

        hold.add_permits(2);
        assert_eq!(fresh.await.unwrap(), Submission::Answered);
        stale.await.unwrap();

        let state = session.snapshot();
        assert_eq!(state.messages.len(), 3);
        assert_eq!(state.messages[1].content, "after reset");
        assert_eq!(state.messages[2].content, "answer");
        assert!(!state.is_loading);
        assert_eq!(gateway.questions.lock().unwrap().len(), 2);

        hold.add_permits(1);
        assert_eq!(session.submit_text("next").await, Submission::Answered);
    }

    #[tokio::test]
    async fn voice_clip_finished_while_busy_is_kept_in_the_log() {
        let hold = Arc::new(Semaphore::new(0));
        let gateway = Arc::new(ScriptedGateway {
            answer: Some("done".to_string()),
            hold: Some(hold.clone()),
            ..Default::default()
        });
        let session = Arc::new(session_with(gateway.clone()));

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.submit_text("first").await }
        });
        session
            .subscribe()
            .wait_for(|state| state.is_loading)
            .await
            .unwrap();

        assert_eq!(
            session.submit_audio(AudioClip::new(vec![1, 2])).await,
            Submission::Failed
        );

        let state = session.snapshot();
        assert_eq!(state.messages.len(), 4);
        assert_eq!(state.messages[2].kind, MessageType::Audio);
        assert!(state.messages[2].audio_url.is_some());
        assert_eq!(state.messages[3].content, VOICE_FAILURE);
        assert!(state.is_loading);
        assert!(gateway.audio_sessions.lock().unwrap().is_empty());

        hold.add_permits(1);
        assert_eq!(first.await.unwrap(), Submission::Answered);
        assert!(!session.snapshot().is_loading);
    }
}
