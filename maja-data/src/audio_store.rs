//! Audio resources addressed by opaque `blob:` references.
//!
//! The store plays the part of the browser's object-URL table: recordings and
//! synthesized replies are registered once, handed around as [`AudioRef`]s and
//! revoked when nothing references them any more.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FetchError;

const REF_PREFIX: &str = "blob:maja/";

/// How many revoked references are remembered to report `Revoked`.
/// Older ones fetch as `Unknown`.
pub const REVOKED_HISTORY: usize = 256;

/// Opaque handle to a registered audio resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AudioRef(String);

impl AudioRef {
    fn mint() -> Self {
        Self(format!("{}{}", REF_PREFIX, Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AudioRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable audio bytes plus their MIME type. Cloning shares the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlob {
    data: Arc<[u8]>,
    mime: String,
}

impl AudioBlob {
    pub fn new(data: impl Into<Arc<[u8]>>, mime: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime: mime.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Shared handle to the bytes, for readers that outlive the borrow.
    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.data)
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// File extension matching the MIME type, used as a container hint.
    pub fn extension(&self) -> Option<&'static str> {
        let essence = self.mime.split(';').next().unwrap_or("").trim();
        match essence {
            "audio/mpeg" | "audio/mp3" => Some("mp3"),
            "audio/wav" | "audio/x-wav" | "audio/wave" => Some("wav"),
            "audio/webm" | "video/webm" => Some("webm"),
            "audio/ogg" => Some("ogg"),
            "audio/flac" => Some("flac"),
            "audio/mp4" | "audio/aac" => Some("m4a"),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Table {
    live: HashMap<AudioRef, AudioBlob>,
    revoked: HashSet<AudioRef>,
    /// Revocation order, oldest first
    revoked_order: VecDeque<AudioRef>,
}

impl Table {
    fn remember_revoked(&mut self, audio_ref: AudioRef) {
        if self.revoked.insert(audio_ref.clone()) {
            self.revoked_order.push_back(audio_ref);
        }
        while self.revoked_order.len() > REVOKED_HISTORY {
            if let Some(oldest) = self.revoked_order.pop_front() {
                self.revoked.remove(&oldest);
            }
        }
    }
}

/// Shared table of live audio resources.
#[derive(Clone, Default)]
pub struct AudioStore(Arc<Mutex<Table>>);

impl AudioStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `blob` and return a fresh reference to it.
    pub fn create(&self, blob: AudioBlob) -> AudioRef {
        let audio_ref = AudioRef::mint();
        log::debug!("AudioStore: created {} ({} bytes, {})", audio_ref, blob.len(), blob.mime());
        self.table().live.insert(audio_ref.clone(), blob);
        audio_ref
    }

    /// Dereference `audio_ref` back into its bytes.
    pub fn fetch(&self, audio_ref: &AudioRef) -> Result<AudioBlob, FetchError> {
        let table = self.table();
        if let Some(blob) = table.live.get(audio_ref) {
            return Ok(blob.clone());
        }
        if table.revoked.contains(audio_ref) {
            Err(FetchError::Revoked(audio_ref.clone()))
        } else {
            Err(FetchError::Unknown(audio_ref.clone()))
        }
    }

    /// Invalidate `audio_ref`. Returns `false` if it was not live.
    pub fn revoke(&self, audio_ref: &AudioRef) -> bool {
        let mut table = self.table();
        if table.live.remove(audio_ref).is_some() {
            table.remember_revoked(audio_ref.clone());
            log::debug!("AudioStore: revoked {}", audio_ref);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, audio_ref: &AudioRef) -> bool {
        self.table().live.contains_key(audio_ref)
    }

    /// Number of references that are currently live.
    pub fn live_count(&self) -> usize {
        self.table().live.len()
    }

    #[cfg(test)]
    pub(crate) fn revoked_count(&self) -> usize {
        self.table().revoked.len()
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for AudioStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioStore")
            .field("live", &self.live_count())
            .finish()
    }
}
