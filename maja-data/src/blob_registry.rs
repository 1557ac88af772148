//! Lifetime tracking for audio references held by the message log.
//!
//! The registry mirrors the set of references the log currently points at.
//! Anything that drops out of that set is revoked in the [`AudioStore`], once.
//! Only live references are ever tracked, so a revoked one cannot come back.

use std::collections::HashSet;

use crate::audio_store::{AudioRef, AudioStore};

pub struct BlobUrlRegistry {
    store: AudioStore,
    tracked: HashSet<AudioRef>,
    open: bool,
}

impl BlobUrlRegistry {
    pub fn new(store: AudioStore) -> Self {
        Self {
            store,
            tracked: HashSet::new(),
            open: true,
        }
    }

    /// Reconcile with the references currently in use.
    ///
    /// Every tracked reference absent from `current` is released; the tracked
    /// set then becomes the live part of `current`. Returns the references
    /// released by this call.
    pub fn sync<'a>(&mut self, current: impl IntoIterator<Item = &'a AudioRef>) -> Vec<AudioRef> {
        if !self.open {
            log::warn!("BlobUrlRegistry: sync on a closed registry ignored");
            return Vec::new();
        }

        let next: HashSet<AudioRef> = current
            .into_iter()
            .filter(|r| self.store.contains(r))
            .cloned()
            .collect();

        let dropped: Vec<AudioRef> = self
            .tracked
            .difference(&next)
            .filter(|r| self.store.revoke(r))
            .cloned()
            .collect();
        self.tracked = next;
        dropped
    }

    /// Release every tracked reference and forget them.
    pub fn release_all(&mut self) -> usize {
        let released = self
            .tracked
            .drain()
            .filter(|r| self.store.revoke(r))
            .count();
        if released > 0 {
            log::debug!("BlobUrlRegistry: released {} references", released);
        }
        released
    }

    pub fn open(&mut self) {
        self.open = true;
    }

    /// Release everything and stop accepting syncs until reopened.
    pub fn close(&mut self) {
        self.release_all();
        self.open = false;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_tracked(&self, audio_ref: &AudioRef) -> bool {
        self.tracked.contains(audio_ref)
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_store::AudioBlob;

    fn refs(store: &AudioStore, n: usize) -> Vec<AudioRef> {
        (0..n)
            .map(|_| store.create(AudioBlob::new(vec![0u8; 2], "audio/mpeg")))
            .collect()
    }

    #[test]
    fn test_sync_releases_only_missing_references() {
        let store = AudioStore::new();
        let all = refs(&store, 3);
        let mut registry = BlobUrlRegistry::new(store.clone());

        assert!(registry.sync(&all).is_empty());
        let released = registry.sync(&all[1..]);

        assert_eq!(released, vec![all[0].clone()]);
        assert!(!store.contains(&all[0]));
        assert!(store.contains(&all[1]));
        assert!(store.contains(&all[2]));
        assert_eq!(registry.tracked_count(), 2);
    }

    #[test]
    fn test_reference_released_at_most_once() {
        let store = AudioStore::new();
        let all = refs(&store, 2);
        let mut registry = BlobUrlRegistry::new(store.clone());

        registry.sync(&all);
        assert_eq!(registry.sync(&all[1..]).len(), 1);

        // A released reference showing up again is not re-tracked
        assert!(registry.sync(&all).is_empty());
        assert!(!registry.is_tracked(&all[0]));
        assert!(registry.sync(&all[1..]).is_empty());

        assert_eq!(registry.release_all(), 1);
        assert_eq!(registry.release_all(), 0);
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn test_overlapping_syncs() {
        let store = AudioStore::new();
        let all = refs(&store, 4);
        let mut registry = BlobUrlRegistry::new(store.clone());

        registry.sync(&all[0..2]);
        registry.sync(&all[1..3]);
        let released = registry.sync(&all[2..4]);

        assert_eq!(released, vec![all[1].clone()]);
        assert!(!store.contains(&all[0]));
        assert!(!store.contains(&all[1]));
        assert!(store.contains(&all[3]));
    }

    #[test]
    fn test_reference_revoked_elsewhere_is_dropped_quietly() {
        let store = AudioStore::new();
        let all = refs(&store, 2);
        let mut registry = BlobUrlRegistry::new(store.clone());
        registry.sync(&all);

        store.revoke(&all[0]);
        assert!(registry.sync(&all[1..]).is_empty());
        assert_eq!(registry.tracked_count(), 1);
        assert_eq!(registry.release_all(), 1);
    }

    #[test]
    fn test_close_releases_and_rejects_sync() {
        let store = AudioStore::new();
        let all = refs(&store, 2);
        let mut registry = BlobUrlRegistry::new(store.clone());
        registry.sync(&all);

        registry.close();
        assert!(!registry.is_open());
        assert_eq!(store.live_count(), 0);

        let fresh = refs(&store, 1);
        assert!(registry.sync(&fresh).is_empty());
        assert_eq!(registry.tracked_count(), 0);

        registry.open();
        registry.sync(&fresh);
        assert!(registry.is_tracked(&fresh[0]));
    }
}
