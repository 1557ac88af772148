//! # ChatViewData - Render Snapshot for the Chat Page
//!
//! The shell builds a `ChatViewData` from the [`Store`] each time it redraws
//! and hands it to whatever front end draws the page. Front ends never touch
//! the conversation controller directly; they render this snapshot and
//! dispatch [`StoreAction`](maja_data::StoreAction)s back.
//!
//! ```ignore
//! let view = ChatViewData::from_store(&store);
//! for bubble in &view.bubbles {
//!     println!("{} {} {}", bubble.label, bubble.time, bubble.transport);
//! }
//! ```

use serde::Serialize;

use maja_data::{Message, PlaybackSnapshot, Store};

use crate::bubble::{BubbleView, Names};

pub const EMPTY_TITLE: &str = "Start the conversation";
pub const EMPTY_HINT: &str = "Press and hold the microphone to record your message";
pub const LOADING_HINT: &str = "Processing your message...";

/// Data needed to draw the chat page
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ChatViewData {
    /// Bubbles, oldest first
    pub bubbles: Vec<BubbleView>,

    /// Whether a turn is in flight
    pub loading: bool,

    /// Assistant name shown in the header
    pub assistant_name: String,
}

impl ChatViewData {
    pub fn new(
        messages: &[Message],
        playback: &PlaybackSnapshot,
        loading: bool,
        names: Names<'_>,
    ) -> Self {
        Self {
            bubbles: messages
                .iter()
                .map(|m| BubbleView::from_message(m, playback, names))
                .collect(),
            loading,
            assistant_name: names.assistant.to_string(),
        }
    }

    /// Snapshot of the store's current conversation
    pub fn from_store(store: &Store) -> Self {
        let conversation = store.conversation();
        let names = Names {
            user: store.session.display_name(),
            assistant: store.assistant_name(),
        };
        Self::new(
            &conversation.messages(),
            &conversation.playback().snapshot(),
            conversation.is_loading(),
            names,
        )
    }

    /// Title and hint for an empty, idle conversation
    pub fn empty_state(&self) -> Option<(&'static str, &'static str)> {
        (self.bubbles.is_empty() && !self.loading).then_some((EMPTY_TITLE, EMPTY_HINT))
    }

    pub fn loading_hint(&self) -> Option<&'static str> {
        self.loading.then_some(LOADING_HINT)
    }

    pub fn playing(&self) -> Option<&BubbleView> {
        self.bubbles.iter().find(|b| b.is_playing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maja_data::{AudioBlob, AudioStore};

    fn names() -> Names<'static> {
        Names {
            user: "You",
            assistant: "Maja",
        }
    }

    #[test]
    fn test_empty_state() {
        let view = ChatViewData::new(&[], &PlaybackSnapshot::default(), false, names());
        assert_eq!(view.empty_state(), Some((EMPTY_TITLE, EMPTY_HINT)));
        assert_eq!(view.loading_hint(), None);

        let loading = ChatViewData::new(&[], &PlaybackSnapshot::default(), true, names());
        assert_eq!(loading.empty_state(), None);
        assert_eq!(loading.loading_hint(), Some(LOADING_HINT));
    }

    #[test]
    fn test_bubbles_follow_log_order() {
        let store = AudioStore::new();
        let mine = Message::me(store.create(AudioBlob::new(vec![1u8], "audio/webm")), Some(2.0));
        let reply = Message::assistant(
            store.create(AudioBlob::new(vec![2u8], "audio/mpeg")),
            Some(4.0),
        );
        let playback = PlaybackSnapshot {
            playing_id: Some(reply.id),
            ..Default::default()
        };

        let view = ChatViewData::new(&[mine.clone(), reply.clone()], &playback, false, names());

        assert_eq!(view.bubbles.len(), 2);
        assert_eq!(view.bubbles[0].id, mine.id);
        assert_eq!(view.playing().map(|b| b.id), Some(reply.id));
        assert_eq!(view.empty_state(), None);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["bubbles"][1]["kind"], "assistant");
        assert_eq!(json["assistant_name"], "Maja");
    }
}
