//SPDX-License-Identifier: MPL-2.0
/*!
The window registry: which logical windows exist, what native window each one maps to, and
where each one is in its lifecycle.

One [`Registry`] may be shared by several hosts (one per backend).  A single lock guards the
forward table, the reverse table, and the live count, so all three always change together.
*/

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Process-unique identifier for a logical window.  Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(u64);

static NEXT_ENTITY: AtomicU64 = AtomicU64::new(1);

impl EntityId {
    fn next() -> Self {
        EntityId(NEXT_ENTITY.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one owner loop (and therefore one backend instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostId(u32);

static NEXT_HOST: AtomicU32 = AtomicU32::new(1);

impl HostId {
    pub(crate) fn next() -> Self {
        HostId(NEXT_HOST.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

/**
A native window identifier, qualified by the host whose backend issued it.

Different backends may hand out the same raw number.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeKey {
    pub host: HostId,
    pub native: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Inserted; the owner thread has not finished binding a context yet.
    Created,
    Running,
    /// A close event or stop call arrived; teardown is pending.
    CloseRequested,
    /// Terminal.  Entries in this state are no longer in the registry.
    Destroyed,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no live entry for {0}")]
    Unknown(EntityId),
    #[error("{id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: EntityId,
        from: LifecycleState,
        to: LifecycleState,
    },
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub id: EntityId,
    pub native: NativeKey,
    pub title: String,
    pub state: LifecycleState,
}

#[derive(Debug, Default)]
struct Tables {
    entries: HashMap<EntityId, Entry>,
    reverse: HashMap<NativeKey, EntityId>,
}

#[derive(Debug, Default)]
pub struct Registry {
    tables: Mutex<Tables>,
    live: AtomicUsize,
    changed: Condvar,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /**
    Assigns a fresh id to `native`, inserts it in [`LifecycleState::Created`], and counts it
    as live.
    */
    pub fn register(&self, native: NativeKey, title: impl Into<String>) -> EntityId {
        let id = EntityId::next();
        let mut tables = self.lock();
        tables.entries.insert(
            id,
            Entry {
                id,
                native,
                title: title.into(),
                state: LifecycleState::Created,
            },
        );
        if let Some(stale) = tables.reverse.insert(native, id) {
            //the backend reused a native id whose window we never saw die
            logwise::warn_sync!(
                "native id {native} reassigned from entity {stale}",
                native = logwise::privacy::LogIt(native),
                stale = logwise::privacy::LogIt(stale)
            );
            if tables.entries.remove(&stale).is_some() {
                self.live.fetch_sub(1, Ordering::AcqRel);
            }
        }
        self.live.fetch_add(1, Ordering::AcqRel);
        drop(tables);
        self.changed.notify_all();
        id
    }

    /// Moves a created window to [`LifecycleState::Running`].
    pub fn mark_running(&self, id: EntityId) -> Result<(), RegistryError> {
        let mut tables = self.lock();
        let entry = tables.entries.get_mut(&id).ok_or(RegistryError::Unknown(id))?;
        match entry.state {
            LifecycleState::Created => {
                entry.state = LifecycleState::Running;
                Ok(())
            }
            from => Err(RegistryError::InvalidTransition {
                id,
                from,
                to: LifecycleState::Running,
            }),
        }
    }

    /**
    Marks `id` as closing.

    Returns `Ok(true)` if this call made the transition and `Ok(false)` if a close was already
    pending.
    */
    pub fn request_close(&self, id: EntityId) -> Result<bool, RegistryError> {
        let mut tables = self.lock();
        let entry = tables.entries.get_mut(&id).ok_or(RegistryError::Unknown(id))?;
        match entry.state {
            LifecycleState::Created | LifecycleState::Running => {
                entry.state = LifecycleState::CloseRequested;
                Ok(true)
            }
            LifecycleState::CloseRequested => Ok(false),
            LifecycleState::Destroyed => Err(RegistryError::Unknown(id)),
        }
    }

    /**
    Destroys and removes `id`.

    Idempotent: returns false, and changes nothing, if `id` is already gone.
    */
    pub fn evict(&self, id: EntityId) -> bool {
        let mut tables = self.lock();
        let Some(mut entry) = tables.entries.remove(&id) else {
            return false;
        };
        entry.state = LifecycleState::Destroyed;
        if tables.reverse.get(&entry.native) == Some(&id) {
            tables.reverse.remove(&entry.native);
        }
        self.live.fetch_sub(1, Ordering::AcqRel);
        drop(tables);
        self.changed.notify_all();
        true
    }

    /// Resolves a native window to its logical id.  Never returns an evicted id.
    pub fn lookup(&self, native: NativeKey) -> Option<EntityId> {
        self.lock().reverse.get(&native).copied()
    }

    /// Current lifecycle state; `None` once evicted.
    pub fn state(&self, id: EntityId) -> Option<LifecycleState> {
        self.lock().entries.get(&id).map(|e| e.state)
    }

    pub fn entry(&self, id: EntityId) -> Option<Entry> {
        self.lock().entries.get(&id).cloned()
    }

    /// Every live id belonging to `host`, oldest first.
    pub fn ids_for(&self, host: HostId) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .lock()
            .entries
            .values()
            .filter(|e| e.native.host == host)
            .map(|e| e.id)
            .collect();
        ids.sort();
        ids
    }

    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// True when no live windows remain in any host sharing this registry.
    pub fn is_quiescent(&self) -> bool {
        self.live_count() == 0
    }

    /**
    Blocks until the registry is quiescent or `timeout` elapses.

    Returns whether it became quiescent.
    */
    pub fn wait_quiescent(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut tables = self.lock();
        while !tables.entries.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tables = match self.changed.wait_timeout(tables, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}
