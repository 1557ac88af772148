//! Playable-duration probing for recorded and synthesized clips.
//!
//! Containers written by a live recorder (WebM in particular) often carry no
//! duration in their headers. When metadata reports nothing usable the probe
//! falls back to walking the packets to end-of-stream, bounded by an inner
//! timeout, and the whole probe is bounded by the caller's fallback timeout.
//! Any failure resolves to `0.0`.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use symphonia::core::codecs::CodecParameters;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::audio_store::{AudioBlob, AudioRef, AudioStore};
use crate::error::DecodeError;

/// Overall bound on a single probe.
pub const DEFAULT_FALLBACK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Bound on the end-of-stream scan once metadata came back unbounded.
pub const SEEK_RESOLVE_TIMEOUT: Duration = Duration::from_millis(3000);

// ─── Inspection ──────────────────────────────────────────────────────────────

/// What the container headers say about length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metadata {
    Finite(f64),
    /// Streaming container with no declared length
    Unbounded,
}

/// Reads container metadata. Both methods run on a blocking thread.
pub trait MediaInspector: Send + Sync + 'static {
    fn read_metadata(&self, blob: &AudioBlob) -> Result<Metadata, DecodeError>;

    /// Resolve the true length by reading to the end of the stream.
    /// Must return promptly once `cancel` is set.
    fn resolve_by_seek(&self, blob: &AudioBlob, cancel: &AtomicBool) -> Option<f64>;
}

/// [`MediaInspector`] backed by symphonia's format readers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaInspector;

impl SymphoniaInspector {
    fn open(blob: &AudioBlob) -> Result<Box<dyn FormatReader>, DecodeError> {
        let source = Cursor::new(blob.shared_bytes());
        let mss = MediaSourceStream::new(Box::new(source), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        if let Some(ext) = blob.extension() {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| DecodeError(e.to_string()))?;
        Ok(probed.format)
    }
}

impl MediaInspector for SymphoniaInspector {
    fn read_metadata(&self, blob: &AudioBlob) -> Result<Metadata, DecodeError> {
        let format = Self::open(blob)?;
        let track = format
            .default_track()
            .ok_or_else(|| DecodeError("no audio track".into()))?;

        let declared = track
            .codec_params
            .n_frames
            .and_then(|frames| ticks_to_seconds(&track.codec_params, frames));
        Ok(match declared {
            Some(secs) => Metadata::Finite(secs),
            None => Metadata::Unbounded,
        })
    }

    fn resolve_by_seek(&self, blob: &AudioBlob, cancel: &AtomicBool) -> Option<f64> {
        let mut format = Self::open(blob).ok()?;
        let (track_id, params) = {
            let track = format.default_track()?;
            (track.id, track.codec_params.clone())
        };

        let mut end = 0u64;
        while !cancel.load(Ordering::Relaxed) {
            match format.next_packet() {
                Ok(packet) if packet.track_id() == track_id => {
                    end = end.max(packet.ts() + packet.dur());
                }
                Ok(_) => {}
                // End of stream or a corrupt tail; either way we are done
                Err(_) => break,
            }
        }
        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        ticks_to_seconds(&params, end)
    }
}

fn ticks_to_seconds(params: &CodecParameters, ticks: u64) -> Option<f64> {
    let secs = match (params.time_base, params.sample_rate) {
        (Some(tb), _) => {
            let time = tb.calc_time(ticks);
            time.seconds as f64 + time.frac
        }
        (None, Some(rate)) if rate > 0 => ticks as f64 / f64::from(rate),
        _ => return None,
    };
    usable(secs)
}

fn usable(secs: f64) -> Option<f64> {
    (secs.is_finite() && secs > 0.0).then_some(secs)
}

// ─── Probe ───────────────────────────────────────────────────────────────────

/// Asynchronous duration probe. Cheap to clone; probes are independent.
#[derive(Clone)]
pub struct DurationProbe {
    store: AudioStore,
    inspector: Arc<dyn MediaInspector>,
    seek_timeout: Duration,
}

/// Revokes the temporary reference and stops any running scan.
struct ProbeGuard {
    store: AudioStore,
    temp: AudioRef,
    cancel: Arc<AtomicBool>,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.store.revoke(&self.temp);
    }
}

impl DurationProbe {
    pub fn new(store: AudioStore) -> Self {
        Self::with_inspector(store, Arc::new(SymphoniaInspector))
    }

    pub fn with_inspector(store: AudioStore, inspector: Arc<dyn MediaInspector>) -> Self {
        Self {
            store,
            inspector,
            seek_timeout: SEEK_RESOLVE_TIMEOUT,
        }
    }

    pub fn with_seek_timeout(mut self, timeout: Duration) -> Self {
        self.seek_timeout = timeout;
        self
    }

    /// Duration of `blob` in seconds, or `0.0` if it cannot be determined
    /// within `fallback`.
    pub async fn probe(&self, blob: &AudioBlob, fallback: Duration) -> f64 {
        let temp = self.store.create(blob.clone());
        let cancel = Arc::new(AtomicBool::new(false));
        let _guard = ProbeGuard {
            store: self.store.clone(),
            temp: temp.clone(),
            cancel: Arc::clone(&cancel),
        };

        match tokio::time::timeout(fallback, self.resolve(&temp, cancel)).await {
            Ok(Some(secs)) => secs,
            Ok(None) => 0.0,
            Err(_) => {
                log::warn!("DurationProbe: gave up after {:?}", fallback);
                0.0
            }
        }
    }

    async fn resolve(&self, temp: &AudioRef, cancel: Arc<AtomicBool>) -> Option<f64> {
        let blob = self.store.fetch(temp).ok()?;

        let inspector = Arc::clone(&self.inspector);
        let target = blob.clone();
        let metadata = tokio::task::spawn_blocking(move || inspector.read_metadata(&target))
            .await
            .ok()?;

        match metadata {
            Ok(Metadata::Finite(secs)) if usable(secs).is_some() => Some(secs),
            Ok(_) => self.resolve_by_seek(blob, cancel).await,
            Err(e) => {
                log::debug!("DurationProbe: {}", e);
                None
            }
        }
    }

    async fn resolve_by_seek(&self, blob: AudioBlob, cancel: Arc<AtomicBool>) -> Option<f64> {
        let inspector = Arc::clone(&self.inspector);
        let flag = Arc::clone(&cancel);
        let scan = tokio::task::spawn_blocking(move || inspector.resolve_by_seek(&blob, &flag));

        match tokio::time::timeout(self.seek_timeout, scan).await {
            Ok(Ok(secs)) => secs.and_then(usable),
            Ok(Err(e)) => {
                log::warn!("DurationProbe: scan task failed: {}", e);
                None
            }
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                log::debug!("DurationProbe: scan exceeded {:?}", self.seek_timeout);
                None
            }
        }
    }
}
