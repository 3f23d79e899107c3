//! Controller identity resolution with a time-bounded cache.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use irbridge_core::topic::is_valid_identifier;
use irbridge_core::{ControllerDirectory, ControllerId};
use tokio::time::Instant;
use tracing::{debug, error};

#[derive(Debug, Clone)]
struct CacheEntry {
    internal_id: ControllerId,
    expires_at: Instant,
}

/// Maps wire identifiers to internal controller ids.
///
/// Positive lookups are cached for `ttl`; misses and directory errors are
/// not cached. Expired entries are removed when read.
pub struct ControllerResolver {
    directory: Arc<dyn ControllerDirectory>,
    cache: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl ControllerResolver {
    pub fn new(directory: Arc<dyn ControllerDirectory>, ttl: Duration) -> Self {
        Self {
            directory,
            cache: DashMap::new(),
            ttl,
        }
    }

    /// Resolve `external_id` to an internal controller id.
    pub async fn resolve(&self, external_id: &str) -> Option<ControllerId> {
        if !is_valid_identifier(external_id) {
            debug!(external_id, "Rejected malformed controller identifier");
            return None;
        }

        let now = Instant::now();
        if let Some(entry) = self.cache.get(external_id) {
            if entry.expires_at > now {
                return Some(entry.internal_id.clone());
            }
        }
        self.cache.remove_if(external_id, |_, e| e.expires_at <= now);

        match self.directory.find_by_external_id(external_id).await {
            Ok(Some(controller)) => {
                self.cache.insert(
                    external_id.to_string(),
                    CacheEntry {
                        internal_id: controller.id.clone(),
                        expires_at: Instant::now() + self.ttl,
                    },
                );
                Some(controller.id)
            }
            Ok(None) => {
                debug!(external_id, "Controller not registered");
                None
            }
            Err(e) => {
                error!(external_id, error = %e, "Controller lookup failed");
                None
            }
        }
    }

    /// Drop a cached mapping.
    pub fn invalidate(&self, external_id: &str) -> bool {
        self.cache.remove(external_id).is_some()
    }

    /// Number of cached entries, expired ones included.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}
