//! Live chime settings shared between the control surface and playback

use std::sync::{Arc, RwLock};

use chimeconf::ChimeSettings;

/// Cloneable handle to the current knobs.
///
/// Readers take a snapshot per computation; an in-flight session keeps the
/// values it expanded with but sees later changes at its next read.
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<ChimeSettings>>,
}

impl SettingsHandle {
    pub fn new(settings: ChimeSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn snapshot(&self) -> ChimeSettings {
        self.inner.read().expect("settings lock poisoned").clone()
    }

    /// Apply an edit; the closure's result is passed through.
    pub fn update<R>(&self, edit: impl FnOnce(&mut ChimeSettings) -> R) -> R {
        let mut guard = self.inner.write().expect("settings lock poisoned");
        edit(&mut guard)
    }

    pub fn replace(&self, settings: ChimeSettings) {
        *self.inner.write().expect("settings lock poisoned") = settings;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_see_updates() {
        let handle = SettingsHandle::default();
        let reader = handle.clone();

        handle
            .update(|s| s.set("volume", "0.4"))
            .expect("volume is a valid knob");

        assert_eq!(reader.snapshot().volume, 0.4);
    }

    #[test]
    fn snapshot_is_detached() {
        let handle = SettingsHandle::default();
        let before = handle.snapshot();
        handle.update(|s| s.note_length = 3.0);
        assert_eq!(before.note_length, 1.0);
        assert_eq!(handle.snapshot().note_length, 3.0);
    }
}
