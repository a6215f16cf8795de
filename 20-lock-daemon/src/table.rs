//! The lock table: the daemon's only shared state.
//!
//! Maps each held [`ResourceKey`] to the instant it was acquired. A holder is
//! never tracked by identity; instead an entry older than the configured
//! timeout is treated as abandoned and the next `lock` on that key reclaims
//! it.
//!
//! Expiry is lazy. An entry is only examined when someone asks for the same
//! key again, so a key that is locked once and never requested again stays in
//! the map for the life of the process. [`LockTable::sweep_expired`] exists
//! for operators who would rather trade that leak for a periodic scan.

use std::{
    collections::{hash_map::Entry, HashMap},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use tracing::{trace, warn};

use crate::key::ResourceKey;

/// Default lock timeout in milliseconds.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 250;

/// How long a lock may be held before the next request for it reclaims it.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS);

/// Source of the current time for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Monotonic wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Receives a notification whenever an expired lock is reclaimed.
///
/// Called after the table mutex has been released.
pub trait ExpirySink: Send + Sync {
    fn lock_expired(&self, key: &ResourceKey, held_for: Duration);
}

/// Reports reclaimed locks as `warn` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingExpirySink;

impl ExpirySink for TracingExpirySink {
    fn lock_expired(&self, key: &ResourceKey, held_for: Duration) {
        warn!(
            key = %key,
            ?held_for,
            "lock expired; reclaiming from previous holder"
        );
    }
}

/// Result of a [`LockTable::lock`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The key was free and is now held by the caller.
    Granted,
    /// The key was held for longer than the timeout; the caller now holds it.
    Reclaimed { held_for: Duration },
    /// Someone else holds the key and has not timed out.
    Denied,
}

impl LockOutcome {
    pub fn is_granted(self) -> bool {
        !matches!(self, LockOutcome::Denied)
    }
}

/// Shared table of held locks.
///
/// One mutex guards the whole map. Every operation takes it for a single map
/// lookup or update and releases it before returning, so it is never held
/// across an `.await`.
pub struct LockTable {
    locks: Mutex<HashMap<ResourceKey, Instant>>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    expiry_sink: Arc<dyn ExpirySink>,
}

impl LockTable {
    /// Creates an empty table using the system clock and logging reclaims
    /// through `tracing`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            timeout,
            clock: Arc::new(SystemClock),
            expiry_sink: Arc::new(TracingExpirySink),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_expiry_sink(mut self, sink: Arc<dyn ExpirySink>) -> Self {
        self.expiry_sink = sink;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Attempts to acquire `key`.
    ///
    /// Grants the lock when the key is absent, or when its current holder
    /// acquired it at least `timeout` ago. In the second case the stored
    /// acquisition time is replaced and the expiry sink is notified.
    pub fn lock(&self, key: &ResourceKey) -> LockOutcome {
        let outcome = {
            let mut locks = self.entries();
            let now = self.clock.now();
            match locks.entry(key.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(now);
                    LockOutcome::Granted
                }
                Entry::Occupied(mut slot) => {
                    let held_for = now.saturating_duration_since(*slot.get());
                    if held_for < self.timeout {
                        LockOutcome::Denied
                    } else {
                        slot.insert(now);
                        LockOutcome::Reclaimed { held_for }
                    }
                }
            }
        };

        trace!(key = %key, ?outcome, "lock requested");
        if let LockOutcome::Reclaimed { held_for } = outcome {
            self.expiry_sink.lock_expired(key, held_for);
        }
        outcome
    }

    /// Releases `key` regardless of who locked it.
    ///
    /// Returns whether an entry was removed. Unlocking a key that is not
    /// held is not an error.
    pub fn unlock(&self, key: &ResourceKey) -> bool {
        let removed = self.entries().remove(key.as_bytes()).is_some();
        trace!(key = %key, removed, "unlock requested");
        removed
    }

    /// Whether `key` is currently held and not yet expired.
    pub fn is_locked(&self, key: &ResourceKey) -> bool {
        let locks = self.entries();
        let now = self.clock.now();
        locks
            .get(key.as_bytes())
            .is_some_and(|acquired_at| now.saturating_duration_since(*acquired_at) < self.timeout)
    }

    /// Number of entries in the table, including expired ones that have not
    /// been reclaimed yet.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Removes every expired entry and returns how many were dropped.
    ///
    /// A swept key is later granted as [`LockOutcome::Granted`] instead of
    /// [`LockOutcome::Reclaimed`], so no expiry notification is produced for
    /// it.
    pub fn sweep_expired(&self) -> usize {
        let mut locks = self.entries();
        let now = self.clock.now();
        let before = locks.len();
        locks.retain(|_, acquired_at| now.saturating_duration_since(*acquired_at) < self.timeout);
        before - locks.len()
    }

    // The map is consistent after every statement that mutates it, so a
    // panic elsewhere while the guard was held leaves nothing to repair.
    fn entries(&self) -> MutexGuard<'_, HashMap<ResourceKey, Instant>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl fmt::Debug for LockTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockTable")
            .field("timeout", &self.timeout)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}
