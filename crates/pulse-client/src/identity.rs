use std::fs;
use std::path::PathBuf;

use pulse_core::BrowserId;

/// Source of the browser identity embedded in every stream request.
/// The degraded non-persistent mode is an explicit implementation, not
/// an inline availability check.
pub trait IdentitySource: Send + Sync {
    fn browser_id(&self) -> BrowserId;
}

/// File-backed identity: read-or-create, stable for the lifetime of
/// the backing storage.
pub struct PersistentIdentity {
    path: PathBuf,
}

impl PersistentIdentity {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: state_dir.into().join("browser-id"),
        }
    }
}

impl IdentitySource for PersistentIdentity {
    fn browser_id(&self) -> BrowserId {
        if let Ok(contents) = fs::read_to_string(&self.path) {
            let existing = contents.trim();
            if !existing.is_empty() {
                return BrowserId::from_raw(existing);
            }
        }

        let id = BrowserId::new();
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(e) = fs::write(&self.path, id.as_str()) {
            // Fall back to handing out the unpersisted value; the next
            // call mints a new one, same as ephemeral mode.
            tracing::warn!(path = %self.path.display(), error = %e, "failed to persist browser identity");
        }
        id
    }
}

/// Fresh random identity per call. Identity stability across
/// reconnects is not guaranteed in this mode; that is an accepted
/// degradation, not a defect.
pub struct EphemeralIdentity;

impl IdentitySource for EphemeralIdentity {
    fn browser_id(&self) -> BrowserId {
        BrowserId::from_raw(format!("ephemeral_{:016x}", rand::random::<u64>()))
    }
}
