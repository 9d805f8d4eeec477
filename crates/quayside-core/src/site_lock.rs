//! One in-flight deploy per site.
//!
//! `SiteLocks::acquire` hands out a `SiteLease`; a second acquire for the
//! same site fails with `StateConflict` until the first lease is dropped.
//! Different sites never contend.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::domain::{QuaysideError, Result};

#[derive(Debug, Clone, Default)]
pub struct SiteLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl SiteLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease for `site`, or fail if another deploy holds it.
    pub fn acquire(&self, site: &str) -> Result<SiteLease> {
        let mut held = self.held.lock().map_err(|_| QuaysideError::StateConflict {
            site: site.to_string(),
            reason: "site lock table poisoned".to_string(),
        })?;
        if !held.insert(site.to_string()) {
            return Err(QuaysideError::StateConflict {
                site: site.to_string(),
                reason: "another deploy for this site is in flight".to_string(),
            });
        }
        debug!(site, "site lease acquired");
        Ok(SiteLease {
            site: site.to_string(),
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, site: &str) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(site))
            .unwrap_or(false)
    }
}

/// Proof that the holder is the only deploy running for `site`.
#[derive(Debug)]
pub struct SiteLease {
    site: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl SiteLease {
    pub fn site(&self) -> &str {
        &self.site
    }
}

impl Drop for SiteLease {
    fn drop(&mut self) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.site);
        }
        debug!(site = %self.site, "site lease released");
    }
}
