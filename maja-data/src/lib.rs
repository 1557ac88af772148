pub mod audio_store;
pub mod backend_client;
pub mod blob_registry;
pub mod config;
pub mod conversation;
pub mod duration_probe;
pub mod error;
pub mod messages;
pub mod playback;
pub mod presets;
pub mod session;
pub mod store;

pub use audio_store::{AudioBlob, AudioRef, AudioStore};
pub use backend_client::{BackendClient, HealthStatus};
pub use blob_registry::BlobUrlRegistry;
pub use config::ClientConfig;
pub use conversation::{ConversationController, TurnOutcome, UploadResponse, VoiceBackend};
pub use duration_probe::{DurationProbe, MediaInspector, Metadata, SymphoniaInspector};
pub use error::{
    BackendError, ConfigError, DecodeError, FetchError, PlaybackError, SelectionError,
    SessionError, TurnError, UploadError,
};
pub use messages::{Message, MessageId, MessageLog, Sender, MAX_MESSAGES};
pub use playback::{
    AudioPlaybackManager, PlaybackBackend, PlaybackHandle, PlaybackSignal, PlaybackSnapshot,
    SignalSink,
};
pub use presets::{
    CurrentSelection, ModelItem, PresetsResponse, RoleItem, SelectionRequest, SelectionResponse,
};
pub use session::Session;
pub use store::{Store, StoreAction};
