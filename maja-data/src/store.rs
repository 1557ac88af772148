use std::sync::Arc;

use crate::audio_store::{AudioRef, AudioStore};
use crate::backend_client::BackendClient;
use crate::config::ClientConfig;
use crate::conversation::{ConversationController, TurnOutcome};
use crate::error::{BackendError, SessionError};
use crate::messages::MessageId;
use crate::playback::{AudioPlaybackManager, PlaybackBackend};
use crate::presets::{PresetsResponse, SelectionRequest, SelectionResponse};
use crate::session::Session;

/// Actions that can be dispatched to modify the Store
#[derive(Clone, Debug, Default, PartialEq)]
pub enum StoreAction {
    /// Play or pause a message's clip
    Toggle(MessageId),
    /// Pause a message's clip
    Pause(MessageId),
    /// Move a message's clip to `time` seconds
    Seek { id: MessageId, time: f64 },
    /// Drop all messages locally
    ClearConversation,
    /// Leave the chat and forget the selection
    EndSession,
    /// No action
    #[default]
    None,
}

/// Central state container for the application
///
/// The Store owns the session, the presets offered on the welcome page, the
/// backend client and the conversation. Front ends read from it to render
/// and dispatch [`StoreAction`]s or call the async operations to change it.
pub struct Store {
    /// Loaded configuration
    pub config: ClientConfig,

    /// Current user selection (in memory only)
    pub session: Session,

    /// Models and roles to choose from
    pub presets: PresetsResponse,

    /// Why presets could not be loaded, if they could not
    pub presets_error: Option<String>,

    backend: Arc<BackendClient>,
    conversation: ConversationController,
}

impl Store {
    pub fn new(config: ClientConfig, audio: AudioStore, players: Arc<dyn PlaybackBackend>) -> Self {
        let backend = Arc::new(
            BackendClient::new(config.base_url.clone()).with_upload_timeout(config.upload_timeout()),
        );
        let playback =
            AudioPlaybackManager::new(players).with_progress_interval(config.progress_interval());
        let conversation = ConversationController::new(audio, backend.clone(), playback)
            .with_log_capacity(config.max_messages)
            .with_upload_timeout(config.upload_timeout())
            .with_probe_timeout(config.probe_timeout());

        let mut session = Session::new();
        session.init();

        Self {
            config,
            session,
            presets: PresetsResponse::default(),
            presets_error: None,
            backend,
            conversation,
        }
    }

    // ── Welcome ──────────────────────────────────────────────────────────────

    /// Fetch models and roles; offline defaults are used if that fails.
    pub async fn load_presets(&mut self) -> &PresetsResponse {
        match self.backend.presets().await {
            Ok(presets) => {
                self.presets = presets;
                self.presets_error = None;
            }
            Err(e) => {
                log::warn!("Store: failed to load presets: {}", e);
                self.presets_error = Some(format!(
                    "Connection error: {}. Please make sure the backend server is running.",
                    e
                ));
                self.presets = PresetsResponse::fallback();
            }
        }
        &self.presets
    }

    /// First model and role, no username.
    pub fn default_selection(&self) -> SelectionRequest {
        SelectionRequest {
            username: None,
            model_id: self.presets.default_model().map(|m| m.id.clone()),
            role_id: self.presets.default_role().map(|r| r.id.clone()),
            api_key: None,
        }
    }

    /// Apply `request` on the backend and start the session.
    pub async fn start_session(
        &mut self,
        request: SelectionRequest,
    ) -> Result<SelectionResponse, SessionError> {
        request.validate()?;
        if !self.presets.models.is_empty() {
            self.presets.check(&request)?;
        }
        let request = request.normalized();
        let response = self.backend.select(&request).await?;

        self.session.start(&request)?;
        self.conversation.open();
        Ok(response)
    }

    // ── Chat ─────────────────────────────────────────────────────────────────

    pub async fn submit_recording(&self, recording: AudioRef) -> TurnOutcome {
        self.conversation.submit_recording(recording).await
    }

    /// Reset the dialog on the backend and clear the local conversation.
    pub async fn reset_conversation(&self) -> Result<(), BackendError> {
        self.conversation.reset().await
    }

    /// Leave the chat: best-effort backend reset, then end the session.
    pub async fn go_back(&mut self) {
        if let Err(e) = self.backend.reset_dialog().await {
            log::warn!("Store: reset on leave failed: {}", e);
        }
        self.handle_action(&StoreAction::EndSession);
    }

    pub fn conversation(&self) -> &ConversationController {
        &self.conversation
    }

    pub fn backend(&self) -> &BackendClient {
        &self.backend
    }

    pub fn assistant_name(&self) -> &str {
        &self.config.assistant_name
    }

    /// Handle a StoreAction and update state accordingly
    pub fn handle_action(&mut self, action: &StoreAction) {
        match action {
            StoreAction::Toggle(id) => {
                if let Err(e) = self.conversation.toggle(*id) {
                    log::warn!("Store: cannot play {}: {}", id, e);
                }
            }
            StoreAction::Pause(id) => {
                self.conversation.pause(*id);
            }
            StoreAction::Seek { id, time } => {
                self.conversation.seek(*id, *time);
            }
            StoreAction::ClearConversation => {
                self.conversation.clear();
            }
            StoreAction::EndSession => {
                self.conversation.clear();
                self.session.end();
            }
            StoreAction::None => {}
        }
    }

    /// Close the conversation and forget the session.
    pub fn teardown(&mut self) {
        self.conversation.close();
        self.session.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SelectionError;
    use crate::playback::testing::FakeBackend;
    use crate::presets::LOCAL_MODEL_ID;

    /// A store whose backend refuses every connection.
    async fn offline_store() -> (Store, AudioStore) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig {
            base_url: format!("http://{}", listener.local_addr().unwrap()),
            ..Default::default()
        };
        drop(listener);
        let audio = AudioStore::new();
        (Store::new(config, audio.clone(), FakeBackend::new()), audio)
    }

    #[tokio::test]
    async fn test_presets_fall_back_when_offline() {
        let (mut store, _) = offline_store().await;

        let presets = store.load_presets().await;
        assert_eq!(presets.default_model().unwrap().id, LOCAL_MODEL_ID);
        assert!(store
            .presets_error
            .as_deref()
            .unwrap()
            .starts_with("Connection error"));
        assert_eq!(store.default_selection().role_id.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn test_start_session_requires_valid_selection_and_backend() {
        let (mut store, _) = offline_store().await;
        store.load_presets().await;

        let missing_role = SelectionRequest {
            model_id: Some(LOCAL_MODEL_ID.to_string()),
            ..Default::default()
        };
        assert_eq!(
            store.start_session(missing_role).await.unwrap_err(),
            SessionError::Selection(SelectionError::MissingRole)
        );

        let unknown = SelectionRequest {
            role_id: Some("default".to_string()),
            model_id: Some("gemini".to_string()),
            api_key: Some("key".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            store.start_session(unknown).await,
            Err(SessionError::Selection(SelectionError::UnknownModel(_)))
        ));

        let valid = store.default_selection();
        assert!(matches!(
            store.start_session(valid).await,
            Err(SessionError::Backend(_))
        ));
        assert!(!store.session.is_started());
    }

    #[tokio::test]
    async fn test_actions_on_unknown_messages_are_harmless() {
        let (mut store, _) = offline_store().await;
        let id = MessageId::new();

        store.handle_action(&StoreAction::Toggle(id));
        store.handle_action(&StoreAction::Seek { id, time: 3.0 });
        store.handle_action(&StoreAction::Pause(id));
        store.handle_action(&StoreAction::None);

        assert_eq!(store.conversation().playback().playing_id(), None);
    }

    #[tokio::test]
    async fn test_end_session_and_teardown() {
        let (mut store, audio) = offline_store().await;
        let request = SelectionRequest {
            model_id: Some(LOCAL_MODEL_ID.to_string()),
            role_id: Some("default".to_string()),
            ..Default::default()
        };
        store.session.start(&request).unwrap();

        // The offline backend fails the turn after the recording is logged
        let recording = audio.create(crate::audio_store::AudioBlob::new(vec![0u8; 16], "audio/webm"));
        let outcome = store.submit_recording(recording).await;
        assert!(matches!(outcome, TurnOutcome::Failed(_)));
        assert_eq!(store.conversation().messages().len(), 2);

        store.handle_action(&StoreAction::EndSession);
        assert!(!store.session.is_started());
        assert!(store.conversation().messages().is_empty());
        assert_eq!(audio.live_count(), 0);

        store.teardown();
        assert!(!store.conversation().playback().is_open());
    }
}
