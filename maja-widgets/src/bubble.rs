//! View model for one chat bubble.

use chrono::Local;
use serde::Serialize;

use maja_data::{Message, MessageId, PlaybackSnapshot, Sender};

/// Text shown in place of transport controls for a failed turn
pub const SYSTEM_ERROR_TEXT: &str = "Error processing audio. Please try again.";

/// `m:ss`; non-finite or negative input renders as `0:00`.
pub fn format_time(secs: f64) -> String {
    if !secs.is_finite() || secs < 0.0 {
        return "0:00".to_string();
    }
    let whole = secs.floor() as u64;
    format!("{}:{:02}", whole / 60, whole % 60)
}

/// Which side and style a bubble takes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BubbleKind {
    Me,
    Assistant,
    System,
}

impl From<Sender> for BubbleKind {
    fn from(sender: Sender) -> Self {
        match sender {
            Sender::Me => Self::Me,
            Sender::Assistant => Self::Assistant,
            Sender::System => Self::System,
        }
    }
}

/// Labels for the two speakers
#[derive(Debug, Clone, Copy)]
pub struct Names<'a> {
    pub user: &'a str,
    pub assistant: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BubbleView {
    pub id: MessageId,
    pub kind: BubbleKind,
    pub label: String,
    /// Local `HH:MM`
    pub time: String,
    pub is_playing: bool,
    /// Seconds
    pub progress: f64,
    pub duration: Option<f64>,
    /// Filled share of the progress bar, 0..=100
    pub percent: f64,
    /// `"{progress} / {duration}"`
    pub transport: String,
    /// Upper end of the seek slider
    pub seek_max: f64,
}

impl BubbleView {
    pub fn from_message(message: &Message, playback: &PlaybackSnapshot, names: Names<'_>) -> Self {
        let kind = BubbleKind::from(message.sender);
        let label = match kind {
            BubbleKind::Me => names.user,
            BubbleKind::Assistant => names.assistant,
            BubbleKind::System => "System",
        };
        let progress = playback.progress(message.id);
        let duration = message.duration;
        let percent = match duration {
            Some(d) if d > 0.0 => (progress / d * 100.0).clamp(0.0, 100.0),
            _ => 0.0,
        };

        Self {
            id: message.id,
            kind,
            label: label.to_string(),
            time: message.timestamp.with_timezone(&Local).format("%H:%M").to_string(),
            is_playing: playback.is_playing(message.id),
            progress,
            duration,
            percent,
            transport: format!(
                "{} / {}",
                format_time(progress),
                format_time(duration.unwrap_or(0.0))
            ),
            seek_max: duration.unwrap_or(0.0).max(1.0),
        }
    }

    pub fn is_system(&self) -> bool {
        self.kind == BubbleKind::System
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maja_data::{AudioBlob, AudioStore};

    const NAMES: Names<'static> = Names {
        user: "Ada",
        assistant: "Maja",
    };

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "0:00");
        assert_eq!(format_time(7.9), "0:07");
        assert_eq!(format_time(65.2), "1:05");
        assert_eq!(format_time(600.0), "10:00");
        assert_eq!(format_time(-1.0), "0:00");
        assert_eq!(format_time(f64::NAN), "0:00");
        assert_eq!(format_time(f64::INFINITY), "0:00");
    }

    #[test]
    fn test_bubble_progress() {
        let store = AudioStore::new();
        let clip = store.create(AudioBlob::new(vec![0u8; 4], "audio/mpeg"));
        let message = Message::assistant(clip, Some(8.0));
        let mut playback = PlaybackSnapshot::default();
        playback.playing_id = Some(message.id);
        playback.progress.insert(message.id, 2.0);

        let view = BubbleView::from_message(&message, &playback, NAMES);

        assert_eq!(view.kind, BubbleKind::Assistant);
        assert_eq!(view.label, "Maja");
        assert!(view.is_playing);
        assert_eq!(view.percent, 25.0);
        assert_eq!(view.transport, "0:02 / 0:08");
        assert_eq!(view.seek_max, 8.0);
        assert_eq!(view.time.len(), 5);
    }

    #[test]
    fn test_unknown_duration() {
        let store = AudioStore::new();
        let clip = store.create(AudioBlob::new(vec![0u8; 4], "audio/webm"));
        let message = Message::me(clip, None);

        let view = BubbleView::from_message(&message, &PlaybackSnapshot::default(), NAMES);

        assert_eq!(view.label, "Ada");
        assert!(!view.is_playing);
        assert_eq!(view.percent, 0.0);
        assert_eq!(view.transport, "0:00 / 0:00");
        assert_eq!(view.seek_max, 1.0);
    }

    #[test]
    fn test_system_bubble() {
        let view = BubbleView::from_message(&Message::system(), &PlaybackSnapshot::default(), NAMES);
        assert!(view.is_system());
        assert_eq!(view.label, "System");
    }
}
