// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Config port shared across meshcast tools (viewer, host).

use tracing::warn;

use crate::config::{ConfigService, ConfigStore};
use crate::prefs::{HostPrefs, ViewerPrefs};

/// Key viewer preferences are stored under.
pub const VIEWER_PREFS_KEY: &str = "viewer";
/// Key host preferences are stored under.
pub const HOST_PREFS_KEY: &str = "host";

/// Config-facing port for loading/saving tool preferences.
pub trait ConfigPort {
    /// Load viewer preferences (returns None if missing or unreadable).
    fn load_viewer_prefs(&self) -> Option<ViewerPrefs>;
    /// Persist viewer preferences (best-effort; failures are logged).
    fn save_viewer_prefs(&self, prefs: &ViewerPrefs);
    /// Load host preferences (returns None if missing or unreadable).
    fn load_host_prefs(&self) -> Option<HostPrefs>;
    /// Persist host preferences (best-effort; failures are logged).
    fn save_host_prefs(&self, prefs: &HostPrefs);
}

impl<S: ConfigStore> ConfigPort for ConfigService<S> {
    fn load_viewer_prefs(&self) -> Option<ViewerPrefs> {
        self.load(VIEWER_PREFS_KEY)
            .inspect_err(|err| warn!(%err, "unreadable viewer prefs; using defaults"))
            .ok()
            .flatten()
    }

    fn save_viewer_prefs(&self, prefs: &ViewerPrefs) {
        if let Err(err) = self.save(VIEWER_PREFS_KEY, prefs) {
            warn!(%err, "failed to persist viewer prefs");
        }
    }

    fn load_host_prefs(&self) -> Option<HostPrefs> {
        self.load(HOST_PREFS_KEY)
            .inspect_err(|err| warn!(%err, "unreadable host prefs; using defaults"))
            .ok()
            .flatten()
    }

    fn save_host_prefs(&self, prefs: &HostPrefs) {
        if let Err(err) = self.save(HOST_PREFS_KEY, prefs) {
            warn!(%err, "failed to persist host prefs");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigStore;

    #[test]
    fn viewer_prefs_survive_a_save() {
        let svc = ConfigService::new(MemoryConfigStore::new());
        assert!(svc.load_viewer_prefs().is_none());
        let mut prefs = ViewerPrefs::default();
        prefs.playback.frame_rate = 30;
        svc.save_viewer_prefs(&prefs);
        assert_eq!(svc.load_viewer_prefs(), Some(prefs));
    }

    #[test]
    fn unreadable_host_prefs_load_as_none() {
        let svc = ConfigService::new(MemoryConfigStore::new());
        svc.store().save_raw(HOST_PREFS_KEY, b"[1, 2").unwrap();
        assert!(svc.load_host_prefs().is_none());
    }
}
