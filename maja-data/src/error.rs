//! Error types for the conversation core.
//!
//! Every failure a turn can hit is caught at the controller or playback
//! boundary; these types exist so the boundary can log and classify them.

use std::time::Duration;

use thiserror::Error;

use crate::audio_store::AudioRef;

/// A local audio reference could not be turned back into bytes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("audio reference {0} was never registered")]
    Unknown(AudioRef),
    #[error("audio reference {0} has been revoked")]
    Revoked(AudioRef),
}

/// The upload collaborator did not hand back a usable reply.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("server returned status {status}")]
    Status { status: u16, body: String },
    #[error("upload timed out after {0:?}")]
    Timeout(Duration),
    #[error("could not reach the server: {0}")]
    Transport(String),
    #[error("server replied without audio")]
    EmptyBody,
}

/// Starting playback failed (decode problem or platform policy).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("playback was rejected: {0}")]
    Rejected(String),
    #[error("audio source is unavailable: {0}")]
    Source(String),
    #[error("playback manager is closed")]
    Closed,
}

/// Why a record -> upload -> reply turn failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TurnError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Upload(#[from] UploadError),
}

/// Failures of the JSON endpoints of the backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not reach {url}: {message}")]
    Transport { url: String, message: String },
    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },
}

/// A model/role selection that cannot start a conversation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Please choose a model to continue.")]
    MissingModel,
    #[error("Please select a role for your assistant.")]
    MissingRole,
    #[error("API key is required for cloud models.")]
    MissingApiKey,
    #[error("unknown model '{0}'")]
    UnknownModel(String),
    #[error("unknown role '{0}'")]
    UnknownRole(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid base url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("cannot determine home directory")]
    NoHome,
}

/// The container could not be read as audio.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot decode audio: {0}")]
pub struct DecodeError(pub String);

/// Starting a session failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error("Failed to start conversation: {0}")]
    Backend(#[from] BackendError),
}
