//! Single-active audio playback across the whole conversation.
//!
//! Platform players sit behind [`PlaybackHandle`]; the manager owns one handle
//! per message, samples the active handle's position on a fixed interval and
//! reacts to the signals each handle emits.
//!
//! Invariant: at most one handle is playing. `play` pauses every competitor
//! before it starts its own handle, all under one lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio_store::AudioRef;
use crate::error::PlaybackError;
use crate::messages::MessageId;

/// How often the active handle's position is sampled.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(120);

// ─── Platform seam ───────────────────────────────────────────────────────────

/// Signals a handle emits on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackSignal {
    Started,
    /// Paused for any reason, including by the platform
    Paused,
    /// Reached the end of the clip naturally
    Ended,
    Error,
}

pub type SignalSink = mpsc::UnboundedSender<PlaybackSignal>;

/// One platform player bound to one audio reference.
///
/// A handle that reaches the end of its clip reports `is_paused() == true`.
pub trait PlaybackHandle: Send {
    fn start(&mut self) -> Result<(), PlaybackError>;
    fn pause(&mut self);
    fn is_paused(&self) -> bool;
    /// Position in seconds
    fn current_time(&self) -> f64;
    fn set_current_time(&mut self, secs: f64);
    fn source(&self) -> &AudioRef;
    fn set_source(&mut self, source: AudioRef);
    fn subscribe(&mut self, sink: SignalSink);
    fn unsubscribe(&mut self);
    /// Drop the platform resources. The handle is unusable afterwards.
    fn release(&mut self);
}

pub trait PlaybackBackend: Send + Sync {
    fn create(&self, source: &AudioRef) -> Box<dyn PlaybackHandle>;
}

// ─── State ───────────────────────────────────────────────────────────────────

/// Point-in-time copy of the playback state for rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackSnapshot {
    pub playing_id: Option<MessageId>,
    pub progress: HashMap<MessageId, f64>,
}

impl PlaybackSnapshot {
    pub fn is_playing(&self, id: MessageId) -> bool {
        self.playing_id == Some(id)
    }

    pub fn progress(&self, id: MessageId) -> f64 {
        self.progress.get(&id).copied().unwrap_or(0.0)
    }
}

struct Player {
    handle: Box<dyn PlaybackHandle>,
    sampler: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

impl Player {
    fn stop_sampling(&mut self) {
        if let Some(task) = self.sampler.take() {
            task.abort();
        }
    }

    fn teardown(mut self) {
        self.handle.pause();
        self.handle.unsubscribe();
        self.handle.release();
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop_sampling();
        if let Some(task) = self.listener.take() {
            task.abort();
        }
    }
}

struct Inner {
    open: bool,
    playing_id: Option<MessageId>,
    progress: HashMap<MessageId, f64>,
    players: HashMap<MessageId, Player>,
}

impl Inner {
    fn clear_playing(&mut self, id: MessageId) {
        if self.playing_id == Some(id) {
            self.playing_id = None;
        }
    }

    fn on_signal(&mut self, id: MessageId, signal: PlaybackSignal) {
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        // A handle that is playing again makes any pause/end report stale
        let paused = player.handle.is_paused();

        match signal {
            PlaybackSignal::Started => {
                log::debug!("Playback: {} started", id);
            }
            PlaybackSignal::Paused => {
                if paused {
                    player.stop_sampling();
                    self.clear_playing(id);
                }
            }
            PlaybackSignal::Ended => {
                if paused {
                    player.stop_sampling();
                    self.clear_playing(id);
                    self.progress.insert(id, 0.0);
                }
            }
            PlaybackSignal::Error => {
                log::warn!("Playback: {} reported an error", id);
                player.stop_sampling();
                self.clear_playing(id);
            }
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ─── Manager ─────────────────────────────────────────────────────────────────

/// Owns every playback handle of a conversation. Cheap to clone.
#[derive(Clone)]
pub struct AudioPlaybackManager {
    backend: Arc<dyn PlaybackBackend>,
    interval: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl AudioPlaybackManager {
    /// Create an open manager.
    pub fn new(backend: Arc<dyn PlaybackBackend>) -> Self {
        Self {
            backend,
            interval: PROGRESS_INTERVAL,
            inner: Arc::new(Mutex::new(Inner {
                open: true,
                playing_id: None,
                progress: HashMap::new(),
                players: HashMap::new(),
            })),
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn open(&self) {
        lock(&self.inner).open = true;
    }

    /// Release every handle and refuse playback until reopened.
    pub fn close(&self) {
        self.cleanup_all();
        lock(&self.inner).open = false;
    }

    pub fn is_open(&self) -> bool {
        lock(&self.inner).open
    }

    /// Start `id` from `source`, pausing whatever else is playing.
    ///
    /// A start failure leaves nothing marked as playing.
    pub fn play(&self, id: MessageId, source: &AudioRef) -> Result<(), PlaybackError> {
        let mut guard = lock(&self.inner);
        let inner = &mut *guard;
        if !inner.open {
            return Err(PlaybackError::Closed);
        }

        for (other_id, other) in inner.players.iter_mut() {
            if *other_id != id && !other.handle.is_paused() {
                other.handle.pause();
                other.stop_sampling();
            }
        }

        let player = inner
            .players
            .entry(id)
            .or_insert_with(|| self.materialize(id, source));
        if player.handle.source() != source {
            player.handle.set_source(source.clone());
        }

        if inner.playing_id == Some(id) && !player.handle.is_paused() {
            return Ok(());
        }

        inner.playing_id = Some(id);
        player.stop_sampling();
        player.sampler = self.spawn(sample(Arc::downgrade(&self.inner), id, self.interval));

        if let Err(e) = player.handle.start() {
            log::warn!("Playback: could not start {}: {}", id, e);
            player.stop_sampling();
            inner.clear_playing(id);
            return Err(e);
        }
        Ok(())
    }

    pub fn pause(&self, id: MessageId) {
        let mut guard = lock(&self.inner);
        let inner = &mut *guard;
        let Some(player) = inner.players.get_mut(&id) else {
            return;
        };
        player.stop_sampling();
        player.handle.pause();
        inner.clear_playing(id);
    }

    /// Pause `id` if it is the one playing, otherwise play it.
    pub fn toggle(&self, id: MessageId, source: &AudioRef) -> Result<(), PlaybackError> {
        let playing = {
            let inner = lock(&self.inner);
            inner.playing_id == Some(id)
                && inner
                    .players
                    .get(&id)
                    .is_some_and(|p| !p.handle.is_paused())
        };
        if playing {
            self.pause(id);
            Ok(())
        } else {
            self.play(id, source)
        }
    }

    /// Move `id` to `time`, clamped to `[0, duration]`.
    ///
    /// Does nothing without a known duration or an existing handle.
    pub fn seek(&self, id: MessageId, time: f64, duration: Option<f64>) {
        let Some(duration) = duration.filter(|d| d.is_finite() && *d > 0.0) else {
            return;
        };
        if time.is_nan() {
            return;
        }

        let mut guard = lock(&self.inner);
        let inner = &mut *guard;
        let Some(player) = inner.players.get_mut(&id) else {
            return;
        };
        let clamped = time.max(0.0).min(duration);
        player.handle.set_current_time(clamped);
        inner.progress.insert(id, clamped);
    }

    /// Pause and release every handle, forgetting all playback state.
    pub fn cleanup_all(&self) {
        let players: Vec<Player> = {
            let mut inner = lock(&self.inner);
            inner.playing_id = None;
            inner.progress.clear();
            inner.players.drain().map(|(_, p)| p).collect()
        };
        for player in players {
            player.teardown();
        }
    }

    /// Release the handle of a single message, e.g. one evicted from the log.
    pub fn release(&self, id: MessageId) {
        let player = {
            let mut inner = lock(&self.inner);
            inner.clear_playing(id);
            inner.progress.remove(&id);
            inner.players.remove(&id)
        };
        if let Some(player) = player {
            player.teardown();
        }
    }

    pub fn playing_id(&self) -> Option<MessageId> {
        lock(&self.inner).playing_id
    }

    pub fn progress(&self, id: MessageId) -> f64 {
        lock(&self.inner).progress.get(&id).copied().unwrap_or(0.0)
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let inner = lock(&self.inner);
        PlaybackSnapshot {
            playing_id: inner.playing_id,
            progress: inner.progress.clone(),
        }
    }

    pub fn handle_count(&self) -> usize {
        lock(&self.inner).players.len()
    }

    fn materialize(&self, id: MessageId, source: &AudioRef) -> Player {
        let mut handle = self.backend.create(source);
        let (tx, rx) = mpsc::unbounded_channel();
        handle.subscribe(tx);
        Player {
            handle,
            sampler: None,
            listener: self.spawn(listen(Arc::downgrade(&self.inner), id, rx)),
        }
    }

    fn spawn<F>(&self, task: F) -> Option<JoinHandle<()>>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => Some(runtime.spawn(task)),
            Err(_) => {
                log::warn!("Playback: no async runtime, progress and signals are not tracked");
                None
            }
        }
    }
}

impl std::fmt::Debug for AudioPlaybackManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("AudioPlaybackManager")
            .field("open", &inner.open)
            .field("playing_id", &inner.playing_id)
            .field("handles", &inner.players.len())
            .finish()
    }
}

async fn sample(inner: Weak<Mutex<Inner>>, id: MessageId, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let mut inner = lock(&inner);
        let position = match inner.players.get(&id) {
            Some(player) => player.handle.current_time(),
            None => break,
        };
        inner.progress.insert(id, position);
    }
}

async fn listen(
    inner: Weak<Mutex<Inner>>,
    id: MessageId,
    mut signals: mpsc::UnboundedReceiver<PlaybackSignal>,
) {
    while let Some(signal) = signals.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        lock(&inner).on_signal(id, signal);
    }
}

// ─── Test doubles ────────────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::testing::{settle, FakeBackend};
    use super::*;
    use crate::audio_store::{AudioBlob, AudioStore};

    fn clip(store: &AudioStore) -> AudioRef {
        store.create(AudioBlob::new(vec![0u8; 4], "audio/mpeg"))
    }

    #[tokio::test]
    async fn test_play_pauses_the_previous_clip() {
        let store = AudioStore::new();
        let backend = FakeBackend::new();
        let manager = AudioPlaybackManager::new(backend.clone());
        let (a, b) = (clip(&store), clip(&store));
        let (x, y) = (MessageId::new(), MessageId::new());

        manager.play(y, &a).unwrap();
        manager.play(x, &b).unwrap();
        settle().await;

        assert_eq!(manager.playing_id(), Some(x));
        assert!(backend.state(&a).lock().unwrap().paused);
        assert_eq!(backend.playing(), vec![b]);
    }

    #[tokio::test]
    async fn test_at_most_one_playing_after_any_sequence() {
        let store = AudioStore::new();
        let backend = FakeBackend::new();
        let manager = AudioPlaybackManager::new(backend.clone());
        let clips: Vec<(MessageId, AudioRef)> =
            (0..3).map(|_| (MessageId::new(), clip(&store))).collect();

        for step in 0..12usize {
            let (id, source) = &clips[(step * 7) % clips.len()];
            match step % 3 {
                0 => manager.play(*id, source).unwrap(),
                1 => manager.toggle(*id, source).unwrap(),
                _ => manager.pause(*id),
            }
            settle().await;
            assert!(backend.playing().len() <= 1);
            if let Some(playing) = manager.playing_id() {
                let (_, source) = clips.iter().find(|(id, _)| *id == playing).unwrap();
                assert_eq!(backend.playing(), vec![source.clone()]);
            }
        }
    }

    #[tokio::test]
    async fn test_toggle_pauses_then_resumes() {
        let store = AudioStore::new();
        let backend = FakeBackend::new();
        let manager = AudioPlaybackManager::new(backend.clone());
        let source = clip(&store);
        let id = MessageId::new();

        manager.toggle(id, &source).unwrap();
        assert_eq!(manager.playing_id(), Some(id));

        manager.toggle(id, &source).unwrap();
        assert_eq!(manager.playing_id(), None);

        manager.toggle(id, &source).unwrap();
        assert_eq!(manager.playing_id(), Some(id));
        assert_eq!(backend.state(&source).lock().unwrap().starts, 2);
        assert_eq!(backend.created(), 1);
    }

    #[tokio::test]
    async fn test_play_while_playing_does_not_restart() {
        let store = AudioStore::new();
        let backend = FakeBackend::new();
        let manager = AudioPlaybackManager::new(backend.clone());
        let source = clip(&store);
        let id = MessageId::new();

        manager.play(id, &source).unwrap();
        manager.play(id, &source).unwrap();
        assert_eq!(backend.state(&source).lock().unwrap().starts, 1);
    }

    #[tokio::test]
    async fn test_changed_source_rebinds_handle() {
        let store = AudioStore::new();
        let backend = FakeBackend::new();
        let manager = AudioPlaybackManager::new(backend.clone());
        let (first, second) = (clip(&store), clip(&store));
        let id = MessageId::new();

        manager.play(id, &first).unwrap();
        manager.pause(id);
        manager.play(id, &second).unwrap();

        assert_eq!(backend.created(), 1);
        assert_eq!(backend.playing(), vec![second]);
    }

    #[tokio::test]
    async fn test_failed_start_clears_playing() {
        let store = AudioStore::new();
        let backend = FakeBackend::new();
        backend.reject_starts(true);
        let manager = AudioPlaybackManager::new(backend.clone());
        let source = clip(&store);
        let id = MessageId::new();

        let result = manager.play(id, &source);
        assert!(matches!(result, Err(PlaybackError::Rejected(_))));
        assert_eq!(manager.playing_id(), None);
    }

    #[tokio::test]
    async fn test_seek_clamps_into_range() {
        let store = AudioStore::new();
        let backend = FakeBackend::new();
        let manager = AudioPlaybackManager::new(backend.clone());
        let source = clip(&store);
        let id = MessageId::new();
        manager.play(id, &source).unwrap();

        manager.seek(id, 42.0, Some(10.0));
        assert_eq!(manager.progress(id), 10.0);
        assert_eq!(backend.state(&source).lock().unwrap().position, 10.0);

        manager.seek(id, -3.0, Some(10.0));
        assert_eq!(manager.progress(id), 0.0);

        manager.seek(id, 4.0, Some(10.0));
        assert_eq!(manager.progress(id), 4.0);
    }

    #[tokio::test]
    async fn test_seek_without_duration_is_noop() {
        let store = AudioStore::new();
        let backend = FakeBackend::new();
        let manager = AudioPlaybackManager::new(backend.clone());
        let source = clip(&store);
        let id = MessageId::new();
        manager.play(id, &source).unwrap();
        manager.seek(id, 2.0, Some(5.0));

        manager.seek(id, 4.0, None);
        manager.seek(id, 4.0, Some(0.0));
        manager.seek(id, 4.0, Some(f64::INFINITY));
        assert_eq!(manager.progress(id), 2.0);

        // No handle yet for this id
        let other = MessageId::new();
        manager.seek(other, 1.0, Some(5.0));
        assert_eq!(manager.snapshot().progress.get(&other), None);
    }

    #[tokio::test]
    async fn test_natural_end_resets_progress() {
        let store = AudioStore::new();
        let backend = FakeBackend::new();
        let manager = AudioPlaybackManager::new(backend.clone());
        let source = clip(&store);
        let id = MessageId::new();
        manager.play(id, &source).unwrap();
        manager.seek(id, 3.0, Some(5.0));

        backend.state(&source).lock().unwrap().finish();
        settle().await;

        assert_eq!(manager.playing_id(), None);
        assert_eq!(manager.progress(id), 0.0);
    }

    #[tokio::test]
    async fn test_platform_pause_clears_playing() {
        let store = AudioStore::new();
        let backend = FakeBackend::new();
        let manager = AudioPlaybackManager::new(backend.clone());
        let source = clip(&store);
        let id = MessageId::new();
        manager.play(id, &source).unwrap();
        manager.seek(id, 1.5, Some(5.0));

        backend.state(&source).lock().unwrap().interrupt();
        settle().await;

        assert_eq!(manager.playing_id(), None);
        assert_eq!(manager.progress(id), 1.5);
    }

    #[tokio::test]
    async fn test_stale_pause_after_restart_is_ignored() {
        let store = AudioStore::new();
        let backend = FakeBackend::new();
        let manager = AudioPlaybackManager::new(backend.clone());
        let source = clip(&store);
        let id = MessageId::new();

        manager.play(id, &source).unwrap();
        manager.pause(id);
        // Resume before the listener sees the pause signal
        manager.play(id, &source).unwrap();
        settle().await;

        assert_eq!(manager.playing_id(), Some(id));
    }

    #[tokio::test]
    async fn test_stale_end_after_restart_is_ignored() {
        let store = AudioStore::new();
        let backend = FakeBackend::new();
        let manager = AudioPlaybackManager::new(backend.clone());
        let source = clip(&store);
        let id = MessageId::new();
        manager.play(id, &source).unwrap();
        manager.seek(id, 3.0, Some(5.0));

        backend.state(&source).lock().unwrap().finish();
        // Replayed before the listener sees the end of the first run
        manager.play(id, &source).unwrap();
        settle().await;

        assert_eq!(manager.playing_id(), Some(id));
        assert_eq!(manager.progress(id), 3.0);
        assert_eq!(backend.state(&source).lock().unwrap().starts, 2);
        assert_eq!(backend.playing(), vec![source]);
    }

    #[tokio::test]
    async fn test_error_signal_clears_playing() {
        let store = AudioStore::new();
        let backend = FakeBackend::new();
        let manager = AudioPlaybackManager::new(backend.clone());
        let source = clip(&store);
        let id = MessageId::new();
        manager.play(id, &source).unwrap();
        manager.seek(id, 2.0, Some(5.0));

        backend.state(&source).lock().unwrap().fail();
        settle().await;

        assert_eq!(manager.playing_id(), None);
        assert_eq!(manager.progress(id), 2.0);
        assert_eq!(manager.handle_count(), 1);

        // The clip can be played again afterwards
        manager.play(id, &source).unwrap();
        assert_eq!(manager.playing_id(), Some(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_sampled() {
        let store = AudioStore::new();
        let backend = FakeBackend::new();
        let manager = AudioPlaybackManager::new(backend.clone());
        let source = clip(&store);
        let id = MessageId::new();
        manager.play(id, &source).unwrap();

        backend.state(&source).lock().unwrap().position = 1.25;
        tokio::time::sleep(PROGRESS_INTERVAL * 3).await;
        assert_eq!(manager.progress(id), 1.25);

        // Paused clips are no longer sampled
        manager.pause(id);
        backend.state(&source).lock().unwrap().position = 2.0;
        tokio::time::sleep(PROGRESS_INTERVAL * 3).await;
        assert_eq!(manager.progress(id), 1.25);
    }

    #[tokio::test]
    async fn test_cleanup_all_releases_everything() {
        let store = AudioStore::new();
        let backend = FakeBackend::new();
        let manager = AudioPlaybackManager::new(backend.clone());
        let (a, b) = (clip(&store), clip(&store));
        let (x, y) = (MessageId::new(), MessageId::new());
        manager.play(x, &a).unwrap();
        manager.play(y, &b).unwrap();
        manager.seek(y, 1.0, Some(2.0));

        manager.cleanup_all();

        assert_eq!(manager.snapshot(), PlaybackSnapshot::default());
        assert_eq!(manager.handle_count(), 0);
        assert!(backend.state(&a).lock().unwrap().released);
        assert!(backend.state(&b).lock().unwrap().released);
        assert!(backend.playing().is_empty());
    }

    #[tokio::test]
    async fn test_release_single_handle() {
        let store = AudioStore::new();
        let backend = FakeBackend::new();
        let manager = AudioPlaybackManager::new(backend.clone());
        let (a, b) = (clip(&store), clip(&store));
        let (x, y) = (MessageId::new(), MessageId::new());
        manager.play(x, &a).unwrap();
        manager.pause(x);
        manager.play(y, &b).unwrap();

        manager.release(x);

        assert_eq!(manager.handle_count(), 1);
        assert_eq!(manager.playing_id(), Some(y));
        assert!(backend.state(&a).lock().unwrap().released);
    }

    #[tokio::test]
    async fn test_closed_manager_refuses_playback() {
        let store = AudioStore::new();
        let backend = FakeBackend::new();
        let manager = AudioPlaybackManager::new(backend.clone());
        let source = clip(&store);
        let id = MessageId::new();

        manager.close();
        assert_eq!(manager.play(id, &source), Err(PlaybackError::Closed));
        assert_eq!(backend.created(), 0);

        manager.open();
        assert!(manager.play(id, &source).is_ok());
    }
}
