//! Per-user memo of effective roles and permissions.
//!
//! Entries are dropped explicitly whenever a role assignment or a role's
//! permission set changes; there is no time-based expiry. Every invalidation
//! bumps a generation counter, and a fill computed under an older generation
//! is discarded so a load racing with a change cannot restore stale grants.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;

use super::ADMIN_ROLE;

const DEFAULT_CAPACITY: usize = 1024;

/// Everything the resolver needs to answer checks for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserGrants {
    pub roles: Vec<String>,
    pub permissions: HashSet<String>,
}

impl UserGrants {
    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }

    /// Case-insensitive role membership.
    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|role| role.eq_ignore_ascii_case(name))
    }

    pub fn has_permission(&self, name: &str) -> bool {
        self.permissions.contains(name)
    }
}

struct Entries {
    grants: LruCache<i32, Arc<UserGrants>>,
    generation: u64,
}

pub struct PermissionCache {
    entries: Mutex<Entries>,
}

impl PermissionCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(Entries {
                grants: LruCache::new(capacity),
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, user_id: i32) -> Option<Arc<UserGrants>> {
        self.lock().grants.get(&user_id).cloned()
    }

    /// Current generation. Read it before loading grants from the database
    /// and hand it to [`PermissionCache::insert_if_current`].
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Stores `grants` unless an invalidation happened since `generation`
    /// was read. Returns whether the entry was stored.
    pub fn insert_if_current(&self, user_id: i32, grants: Arc<UserGrants>, generation: u64) -> bool {
        let mut entries = self.lock();
        if entries.generation != generation {
            return false;
        }
        entries.grants.put(user_id, grants);
        true
    }

    pub fn invalidate(&self, user_id: i32) {
        let mut entries = self.lock();
        entries.generation += 1;
        entries.grants.pop(&user_id);
    }

    /// Drops every entry. Used when a role's permissions change, since that
    /// affects every holder of the role.
    pub fn invalidate_all(&self) {
        let mut entries = self.lock();
        entries.generation += 1;
        entries.grants.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PermissionCache {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN))
    }
}

impl std::fmt::Debug for PermissionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionCache")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grants(roles: &[&str], permissions: &[&str]) -> Arc<UserGrants> {
        Arc::new(UserGrants {
            roles: roles.iter().map(|r| r.to_string()).collect(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        })
    }

    #[test]
    fn test_admin_role_is_case_insensitive() {
        assert!(grants(&["Admin"], &[]).is_admin());
        assert!(grants(&["ADMIN"], &[]).is_admin());
        assert!(!grants(&["Moderator"], &[]).is_admin());
    }

    #[test]
    fn test_invalidate_single_and_all() {
        let cache = PermissionCache::default();
        cache.insert_if_current(1, grants(&["Author"], &["post.create"]), cache.generation());
        cache.insert_if_current(2, grants(&["Viewer"], &["post.read.any"]), cache.generation());
        assert_eq!(cache.len(), 2);

        cache.invalidate(1);
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());

        cache.invalidate_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_fill_started_before_invalidation_is_dropped() {
        let cache = PermissionCache::default();
        let generation = cache.generation();

        // A revoke lands while the old grants are still being loaded.
        cache.invalidate_all();
        assert!(!cache.insert_if_current(1, grants(&["Author"], &["post.create"]), generation));
        assert!(cache.get(1).is_none());

        let generation = cache.generation();
        assert!(cache.insert_if_current(1, grants(&["Author"], &[]), generation));
        cache.invalidate(2);
        assert!(!cache.insert_if_current(3, grants(&[], &[]), generation));
        assert!(cache.get(1).is_some());
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let cache = PermissionCache::new(NonZeroUsize::new(2).unwrap());
        cache.insert_if_current(1, grants(&[], &[]), cache.generation());
        cache.insert_if_current(2, grants(&[], &[]), cache.generation());
        cache.get(1);
        cache.insert_if_current(3, grants(&[], &[]), cache.generation());

        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
        assert!(cache.get(3).is_some());
    }
}
