//! The record -> upload -> reply turn.
//!
//! [`ConversationController`] owns the message log and the reference registry,
//! and drives a single turn at a time: dereference the recording, log it,
//! upload it, log the synthesized reply and auto-play it. Failures end the
//! turn with one system message; nothing is retried.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;

use crate::audio_store::{AudioBlob, AudioRef, AudioStore};
use crate::blob_registry::BlobUrlRegistry;
use crate::duration_probe::{DurationProbe, DEFAULT_FALLBACK_TIMEOUT};
use crate::error::{BackendError, PlaybackError, TurnError, UploadError};
use crate::messages::{Message, MessageId, MessageLog, MAX_MESSAGES};
use crate::playback::AudioPlaybackManager;

/// Bound on a single upload.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// File name the recording is uploaded under.
pub const RECORDING_FILENAME: &str = "recording.webm";

/// MIME type of synthesized replies.
pub const REPLY_MIME: &str = "audio/mpeg";

// ─── Upload collaborator ─────────────────────────────────────────────────────

/// Raw reply of the upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// The server side of a conversation.
pub trait VoiceBackend: Send + Sync {
    /// Submit a recording and return the synthesized reply as raw bytes.
    fn upload<'a>(
        &'a self,
        blob: AudioBlob,
        filename: &'a str,
    ) -> BoxFuture<'a, Result<UploadResponse, UploadError>>;

    /// Forget the server-side dialog history.
    fn reset(&self) -> BoxFuture<'_, Result<(), BackendError>>;
}

/// How a call to [`ConversationController::submit_recording`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// `user` is `None` when the recording repeated the previous one
    Replied {
        user: Option<MessageId>,
        assistant: MessageId,
    },
    /// One system message was logged
    Failed(TurnError),
    /// Another turn was in flight; nothing happened
    Dropped,
}

// ─── Controller ──────────────────────────────────────────────────────────────

struct ConversationState {
    log: MessageLog,
    registry: BlobUrlRegistry,
}

/// Clears the busy flags however the turn ends.
struct TurnGuard<'a> {
    in_flight: &'a AtomicBool,
    loading: &'a AtomicBool,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.loading.store(false, Ordering::Release);
        self.in_flight.store(false, Ordering::Release);
    }
}

pub struct ConversationController {
    store: AudioStore,
    backend: Arc<dyn VoiceBackend>,
    playback: AudioPlaybackManager,
    probe: DurationProbe,
    state: Mutex<ConversationState>,
    in_flight: AtomicBool,
    loading: AtomicBool,
    upload_timeout: Duration,
    probe_timeout: Duration,
}

impl ConversationController {
    pub fn new(
        store: AudioStore,
        backend: Arc<dyn VoiceBackend>,
        playback: AudioPlaybackManager,
    ) -> Self {
        Self {
            probe: DurationProbe::new(store.clone()),
            state: Mutex::new(ConversationState {
                log: MessageLog::with_capacity(MAX_MESSAGES),
                registry: BlobUrlRegistry::new(store.clone()),
            }),
            store,
            backend,
            playback,
            in_flight: AtomicBool::new(false),
            loading: AtomicBool::new(false),
            upload_timeout: UPLOAD_TIMEOUT,
            probe_timeout: DEFAULT_FALLBACK_TIMEOUT,
        }
    }

    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.state.get_mut().unwrap_or_else(|p| p.into_inner()).log =
            MessageLog::with_capacity(capacity);
        self
    }

    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_probe(mut self, probe: DurationProbe) -> Self {
        self.probe = probe;
        self
    }

    // ── Turn ─────────────────────────────────────────────────────────────────

    /// Run one turn for a freshly recorded clip.
    ///
    /// A call made while another turn is in flight is dropped, not queued.
    pub async fn submit_recording(&self, recording: AudioRef) -> TurnOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("Conversation: a turn is already in flight, dropping {}", recording);
            return TurnOutcome::Dropped;
        }
        self.loading.store(true, Ordering::Release);
        let _guard = TurnGuard {
            in_flight: &self.in_flight,
            loading: &self.loading,
        };

        match self.run_turn(&recording).await {
            Ok((user, assistant)) => TurnOutcome::Replied { user, assistant },
            Err(e) => {
                log::error!("Conversation: error sending audio: {}", e);
                self.append(Message::system());
                TurnOutcome::Failed(e)
            }
        }
    }

    async fn run_turn(
        &self,
        recording: &AudioRef,
    ) -> Result<(Option<MessageId>, MessageId), TurnError> {
        let blob = self.store.fetch(recording)?;

        let my_secs = self.probe.probe(&blob, self.probe_timeout).await;
        let user = self.append_recording(Message::me(recording.clone(), Some(my_secs)));

        let response = tokio::time::timeout(
            self.upload_timeout,
            self.backend.upload(blob, RECORDING_FILENAME),
        )
        .await
        .map_err(|_| UploadError::Timeout(self.upload_timeout))??;

        if response.status != 200 {
            return Err(UploadError::Status {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            }
            .into());
        }
        if response.body.is_empty() {
            return Err(UploadError::EmptyBody.into());
        }

        let reply = AudioBlob::new(response.body, REPLY_MIME);
        let reply_secs = self.probe.probe(&reply, self.probe_timeout).await;
        let reply_ref = self.store.create(reply);
        let assistant = Message::assistant(reply_ref.clone(), Some(reply_secs));
        let assistant_id = assistant.id;
        self.append(assistant);

        if let Err(e) = self.playback.play(assistant_id, &reply_ref) {
            log::warn!("Conversation: auto-play failed: {}", e);
        }
        Ok((user, assistant_id))
    }

    // ── Log maintenance ──────────────────────────────────────────────────────

    fn append(&self, message: Message) {
        let mut state = self.state();
        let evicted = state.log.append(message);
        self.reconcile(&mut state, &evicted);
    }

    fn append_recording(&self, message: Message) -> Option<MessageId> {
        let id = message.id;
        let mut state = self.state();
        let evicted = state.log.append_recording(message)?;
        self.reconcile(&mut state, &evicted);
        Some(id)
    }

    /// Runs after every log mutation: evicted messages lose their players
    /// first, then unreferenced audio is revoked.
    fn reconcile(&self, state: &mut ConversationState, evicted: &[Message]) {
        for message in evicted {
            self.playback.release(message.id);
        }
        let ConversationState { log, registry } = state;
        registry.sync(&log.audio_refs());
    }

    fn state(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Transport ────────────────────────────────────────────────────────────

    /// Play or pause the clip of message `id`.
    pub fn toggle(&self, id: MessageId) -> Result<(), PlaybackError> {
        let source = self.audio_of(id)?;
        self.playback.toggle(id, &source)
    }

    pub fn pause(&self, id: MessageId) {
        self.playback.pause(id);
    }

    /// Seek within message `id`; ignored while its duration is unknown.
    pub fn seek(&self, id: MessageId, time: f64) {
        let duration = self.state().log.get(id).and_then(|m| m.duration);
        self.playback.seek(id, time, duration);
    }

    fn audio_of(&self, id: MessageId) -> Result<AudioRef, PlaybackError> {
        self.state()
            .log
            .get(id)
            .and_then(|m| m.audio.clone())
            .ok_or_else(|| PlaybackError::Source(format!("message {} has no audio", id)))
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Drop every message and release all audio and players.
    pub fn clear(&self) {
        self.playback.cleanup_all();
        let mut state = self.state();
        let dropped = state.log.clear();
        let released = state.registry.release_all();
        log::info!(
            "Conversation: cleared {} messages, released {} clips",
            dropped.len(),
            released
        );
    }

    /// Reset the server-side dialog, then clear locally.
    pub async fn reset(&self) -> Result<(), BackendError> {
        self.backend.reset().await?;
        self.clear();
        Ok(())
    }

    /// Tear down for good (until [`ConversationController::open`]).
    pub fn close(&self) {
        self.playback.close();
        let mut state = self.state();
        state.log.clear();
        state.registry.close();
    }

    pub fn open(&self) {
        self.playback.open();
        self.state().registry.open();
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state().log.to_vec()
    }

    pub fn message(&self, id: MessageId) -> Option<Message> {
        self.state().log.get(id).cloned()
    }

    pub fn playback(&self) -> &AudioPlaybackManager {
        &self.playback
    }

    pub fn audio_store(&self) -> &AudioStore {
        &self.store
    }
}
