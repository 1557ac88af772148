//! Chat messages and the bounded, insertion-ordered conversation log.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audio_store::AudioRef;

/// Maximum number of messages kept in a conversation.
pub const MAX_MESSAGES: usize = 50;

// ─── Identity ────────────────────────────────────────────────────────────────

/// Unique message identifier. Time-ordered, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

/// Who a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The local user (a recorded clip)
    Me,
    /// The synthesized voice reply
    Assistant,
    /// A failed turn; carries no audio
    System,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Me => "me",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

// ─── Message ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: Sender,
    /// Playable clip; `None` for system messages
    pub audio: Option<AudioRef>,
    pub timestamp: DateTime<Utc>,
    /// Seconds; `None` when unknown
    pub duration: Option<f64>,
}

impl Message {
    fn new(sender: Sender, audio: Option<AudioRef>, duration: Option<f64>) -> Self {
        Self {
            id: MessageId::new(),
            sender,
            audio,
            timestamp: Utc::now(),
            duration: duration.and_then(known_duration),
        }
    }

    pub fn me(audio: AudioRef, duration: Option<f64>) -> Self {
        Self::new(Sender::Me, Some(audio), duration)
    }

    pub fn assistant(audio: AudioRef, duration: Option<f64>) -> Self {
        Self::new(Sender::Assistant, Some(audio), duration)
    }

    pub fn system() -> Self {
        Self::new(Sender::System, None, None)
    }

    pub fn is_system(&self) -> bool {
        self.sender == Sender::System
    }
}

/// Only finite positive durations count as known.
fn known_duration(secs: f64) -> Option<f64> {
    (secs.is_finite() && secs > 0.0).then_some(secs)
}

// ─── Log ─────────────────────────────────────────────────────────────────────

/// Append-only conversation log capped at a fixed number of entries.
///
/// Growing past the cap evicts the oldest entries; the remainder keeps its
/// insertion order. Timestamps never decrease along the log.
#[derive(Debug, Clone)]
pub struct MessageLog {
    messages: VecDeque<Message>,
    capacity: usize,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLog {
    pub fn new() -> Self {
        Self::with_capacity(MAX_MESSAGES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `message`, returning whatever fell off the front.
    pub fn append(&mut self, mut message: Message) -> Vec<Message> {
        if self.get(message.id).is_some() {
            log::warn!("MessageLog: ignoring duplicate message id {}", message.id);
            return Vec::new();
        }
        if let Some(last) = self.messages.back() {
            if message.timestamp < last.timestamp {
                message.timestamp = last.timestamp;
            }
        }
        self.messages.push_back(message);

        let overflow = self.messages.len().saturating_sub(self.capacity);
        self.messages.drain(..overflow).collect()
    }

    /// Append a freshly recorded clip unless the last entry is the same
    /// recording. Returns `None` when the clip was suppressed.
    pub fn append_recording(&mut self, message: Message) -> Option<Vec<Message>> {
        let duplicate = self.messages.back().is_some_and(|last| {
            last.sender == Sender::Me && message.sender == Sender::Me && last.audio == message.audio
        });
        if duplicate {
            log::debug!("MessageLog: suppressed repeated recording {:?}", message.audio);
            return None;
        }
        Some(self.append(message))
    }

    /// Remove every message, returning them in order.
    pub fn clear(&mut self) -> Vec<Message> {
        self.messages.drain(..).collect()
    }

    /// Fill in a duration that was unknown when the message was created.
    pub fn backfill_duration(&mut self, id: MessageId, secs: f64) -> bool {
        let Some(secs) = known_duration(secs) else {
            return false;
        };
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.duration = Some(secs);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Every audio reference the log currently points at.
    pub fn audio_refs(&self) -> HashSet<AudioRef> {
        self.messages.iter().filter_map(|m| m.audio.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_store::{AudioBlob, AudioStore};

    fn clip(store: &AudioStore) -> AudioRef {
        store.create(AudioBlob::new(vec![0u8; 8], "audio/webm"))
    }

    #[test]
    fn test_log_never_exceeds_capacity() {
        let store = AudioStore::new();
        let mut log = MessageLog::new();
        let mut appended = Vec::new();

        for i in 0..120 {
            let message = if i % 3 == 0 {
                Message::system()
            } else {
                Message::assistant(clip(&store), Some(1.0))
            };
            appended.push(message.id);
            log.append(message);
            assert!(log.len() <= MAX_MESSAGES);
        }

        let kept: Vec<MessageId> = log.iter().map(|m| m.id).collect();
        assert_eq!(kept, appended[appended.len() - MAX_MESSAGES..]);
    }

    #[test]
    fn test_append_returns_evicted_oldest_first() {
        let store = AudioStore::new();
        let mut log = MessageLog::with_capacity(2);
        let first = Message::me(clip(&store), None);
        let first_id = first.id;

        assert!(log.append(first).is_empty());
        assert!(log.append(Message::system()).is_empty());
        let evicted = log.append(Message::system());

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, first_id);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_repeated_recording_is_suppressed() {
        let store = AudioStore::new();
        let mut log = MessageLog::new();
        let recording = clip(&store);

        assert!(log.append_recording(Message::me(recording.clone(), None)).is_some());
        assert!(log.append_recording(Message::me(recording.clone(), None)).is_none());
        assert_eq!(log.len(), 1);

        // A different clip, or anything in between, is not a repeat
        assert!(log.append_recording(Message::me(clip(&store), None)).is_some());
        log.append(Message::system());
        assert!(log.append_recording(Message::me(recording, None)).is_some());
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn test_plain_append_never_deduplicates() {
        let store = AudioStore::new();
        let mut log = MessageLog::new();
        let reply = clip(&store);

        log.append(Message::assistant(reply.clone(), None));
        log.append(Message::assistant(reply, None));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_timestamps_never_decrease() {
        let mut log = MessageLog::new();
        let later = Message::system();
        let mut earlier = Message::system();
        earlier.timestamp = later.timestamp - chrono::Duration::seconds(10);

        log.append(later);
        log.append(earlier);

        let stamps: Vec<_> = log.iter().map(|m| m.timestamp).collect();
        assert!(stamps[0] <= stamps[1]);
    }

    #[test]
    fn test_duplicate_id_is_ignored() {
        let mut log = MessageLog::new();
        let message = Message::system();

        log.append(message.clone());
        log.append(message);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_backfill_duration() {
        let store = AudioStore::new();
        let mut log = MessageLog::new();
        let message = Message::me(clip(&store), Some(f64::INFINITY));
        let id = message.id;
        log.append(message);

        assert_eq!(log.get(id).unwrap().duration, None);
        assert!(!log.backfill_duration(id, 0.0));
        assert!(log.backfill_duration(id, 2.5));
        assert_eq!(log.get(id).unwrap().duration, Some(2.5));
    }

    #[test]
    fn test_audio_refs_skip_system_messages() {
        let store = AudioStore::new();
        let mut log = MessageLog::new();
        let recording = clip(&store);

        log.append(Message::me(recording.clone(), None));
        log.append(Message::system());

        let refs = log.audio_refs();
        assert_eq!(refs.len(), 1);
        assert!(refs.contains(&recording));
    }

    #[test]
    fn test_clear_returns_everything() {
        let mut log = MessageLog::new();
        log.append(Message::system());
        log.append(Message::system());

        assert_eq!(log.clear().len(), 2);
        assert!(log.is_empty());
    }
}
