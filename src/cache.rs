//! Per-identifier resolution state shared by everything bound to one provider.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                              Cache<K, V>                                  │
//! │                                                                           │
//! │   Mutex<CacheInner>                                 Condvar `settled`     │
//! │   ┌───────────────────────────────────────────┐     (notified whenever an │
//! │   │ slots: FxHashMap<K, Slot<V>>              │      in-flight entry      │
//! │   │   ┌────────┬──────────────────┬─────┐     │      leaves InFlight)     │
//! │   │   │  key   │ state            │ seq │     │                           │
//! │   │   ├────────┼──────────────────┼─────┤     │                           │
//! │   │   │ "u:1"  │ Resolved(Arc<V>) │  0  │     │                           │
//! │   │   │ "u:2"  │ InFlight(7)      │  1  │     │                           │
//! │   │   │ "u:3"  │ Pending          │  2  │     │                           │
//! │   │   │ "u:4"  │ Missing          │  3  │     │                           │
//! │   │   └────────┴──────────────────┴─────┘     │                           │
//! │   │ counts: StateCounts                       │                           │
//! │   │ waiters: FxHashMap<FlushId, usize>        │                           │
//! │   │ failed:  FxHashMap<FlushId, FailedFlush>  │                           │
//! │   │ next_seq, next_flush                      │                           │
//! │   └───────────────────────────────────────────┘                           │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## State Transitions
//!
//! ```text
//!   register ──► Pending ──claim──► InFlight(f) ──complete──► Resolved(v)
//!                  ▲                    │    │                    │
//!                  │                    │    └──complete──► Missing
//!                  │◄───── fail ────────┘                         │
//!                  │◄──────────────── reset ──────────────────────┘
//!
//!   set: any state ──► Resolved(v), pinned
//! ```
//!
//! `claim` is the only way into `InFlight`, and it only takes `Pending`
//! entries, so two concurrent flushes can never both submit the same
//! identifier. `put` and `mark_missing` refuse entries that are not in flight.
//!
//! ## Thread Safety
//!
//! Every transition happens under a single `parking_lot::Mutex`. Callers that
//! find an entry in flight block on the `settled` condvar via
//! [`Cache::wait_settled`] until the owning flush completes or fails.
//!
//! A failure is recorded per flush, not per entry, and only while that flush
//! has blocked waiters. Re-claiming a failed identifier therefore cannot hide
//! the failure from a caller still waking up from the first flush; the last
//! such waiter drops the record.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use crate::error::{Error, InvariantError, Result, SharedError};
use crate::traits::Identifier;

/// Identifies one flush; assigned by [`Cache::claim`].
pub type FlushId = u64;

/// Resolution state of one identifier.
#[derive(Debug)]
pub enum EntryState<V> {
    /// Registered, not yet requested from the backend.
    Pending,
    /// Claimed by the flush with the given id.
    InFlight(FlushId),
    /// Value returned by the backend (or set explicitly).
    Resolved(Arc<V>),
    /// The backend was asked and did not return a value.
    Missing,
}

impl<V> Clone for EntryState<V> {
    fn clone(&self) -> Self {
        match self {
            Self::Pending => Self::Pending,
            Self::InFlight(flush) => Self::InFlight(*flush),
            Self::Resolved(value) => Self::Resolved(Arc::clone(value)),
            Self::Missing => Self::Missing,
        }
    }
}

impl<V> EntryState<V> {
    /// Short lowercase name, used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight(_) => "in-flight",
            Self::Resolved(_) => "resolved",
            Self::Missing => "missing",
        }
    }

    /// `true` for `Resolved` and `Missing`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved(_) | Self::Missing)
    }

    /// The resolved value, if any.
    pub fn value(&self) -> Option<&Arc<V>> {
        match self {
            Self::Resolved(value) => Some(value),
            _ => None,
        }
    }

    #[inline]
    fn is_in_flight(&self, flush: FlushId) -> bool {
        matches!(self, Self::InFlight(f) if *f == flush)
    }
}

/// Number of entries in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub resolved: usize,
    pub missing: usize,
}

impl StateCounts {
    /// Total number of entries.
    pub fn total(&self) -> usize {
        self.pending + self.in_flight + self.resolved + self.missing
    }

    fn slot_for<V>(&mut self, state: &EntryState<V>) -> &mut usize {
        match state {
            EntryState::Pending => &mut self.pending,
            EntryState::InFlight(_) => &mut self.in_flight,
            EntryState::Resolved(_) => &mut self.resolved,
            EntryState::Missing => &mut self.missing,
        }
    }

    fn count<V>(&mut self, state: &EntryState<V>) {
        *self.slot_for(state) += 1;
    }
}

/// Identifiers moved to `InFlight` by one [`Cache::claim`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim<K> {
    pub flush: FlushId,
    pub keys: Vec<K>,
}

impl<K> Claim<K> {
    /// `true` if nothing was claimed.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Outcome of [`Cache::complete`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Settled {
    /// Claimed identifiers that received a value.
    pub resolved: usize,
    /// Claimed identifiers the backend omitted.
    pub missing: usize,
    /// Returned identifiers that were not (or no longer) in flight for this
    /// flush: unrequested extras, or entries reset/set while in flight.
    pub ignored: usize,
}

#[derive(Debug)]
struct FailedFlush {
    batch_len: usize,
    error: SharedError,
}

#[derive(Debug)]
struct Slot<V> {
    state: EntryState<V>,
    seq: u64,
    pinned: bool,
}

#[derive(Debug)]
struct CacheInner<K, V> {
    slots: FxHashMap<K, Slot<V>>,
    counts: StateCounts,
    waiters: FxHashMap<FlushId, usize>,
    failed: FxHashMap<FlushId, FailedFlush>,
    next_seq: u64,
    next_flush: FlushId,
}

impl<K: Identifier, V> CacheInner<K, V> {
    fn in_flight_for(&self, key: &K, flush: FlushId) -> bool {
        self.slots
            .get(key)
            .is_some_and(|slot| slot.state.is_in_flight(flush))
    }
}

fn set_state<V>(counts: &mut StateCounts, slot: &mut Slot<V>, next: EntryState<V>) -> EntryState<V> {
    *counts.slot_for(&slot.state) -= 1;
    counts.count(&next);
    std::mem::replace(&mut slot.state, next)
}

/// Mapping from identifier to resolution state.
pub struct Cache<K, V> {
    inner: Mutex<CacheInner<K, V>>,
    settled: Condvar,
}

impl<K, V> fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Cache")
            .field("counts", &inner.counts)
            .field("next_flush", &inner.next_flush)
            .finish()
    }
}

impl<K: Identifier, V> Default for Cache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Identifier, V> Cache<K, V> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty cache with room for `capacity` identifiers.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                slots: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
                counts: StateCounts::default(),
                waiters: FxHashMap::default(),
                failed: FxHashMap::default(),
                next_seq: 0,
                next_flush: 0,
            }),
            settled: Condvar::new(),
        }
    }

    /// Inserts `key` as `Pending` if absent. Returns `true` if inserted.
    pub fn register(&self, key: K) -> bool {
        let mut inner = self.inner.lock();
        if inner.slots.contains_key(&key) {
            return false;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.counts.pending += 1;
        inner.slots.insert(
            key,
            Slot {
                state: EntryState::Pending,
                seq,
                pinned: false,
            },
        );
        true
    }

    /// Non-blocking inspection of `key`'s state.
    pub fn peek(&self, key: &K) -> Option<EntryState<V>> {
        self.inner.lock().slots.get(key).map(|slot| slot.state.clone())
    }

    /// Returns `true` if `key` is known in any state.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().slots.contains_key(key)
    }

    /// Returns `true` if `key` holds a value pinned by [`set`](Self::set).
    pub fn is_pinned(&self, key: &K) -> bool {
        self.inner
            .lock()
            .slots
            .get(key)
            .is_some_and(|slot| slot.pinned)
    }

    /// Number of known identifiers.
    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Returns `true` if no identifier is known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of identifiers in each state.
    pub fn counts(&self) -> StateCounts {
        self.inner.lock().counts
    }

    /// Number of `Pending` identifiers.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().counts.pending
    }

    /// Every `Pending` identifier, in registration order.
    pub fn pending(&self) -> Vec<K> {
        let inner = self.inner.lock();
        let mut pending: Vec<(u64, &K)> = inner
            .slots
            .iter()
            .filter(|(_, slot)| matches!(slot.state, EntryState::Pending))
            .map(|(key, slot)| (slot.seq, key))
            .collect();
        pending.sort_unstable_by_key(|(seq, _)| *seq);
        pending.into_iter().map(|(_, key)| key.clone()).collect()
    }

    /// The `Pending` subset of `keys`, in the order given.
    pub fn pending_among<'a, I>(&self, keys: I) -> Vec<K>
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        let inner = self.inner.lock();
        keys.into_iter()
            .filter(|key| {
                inner
                    .slots
                    .get(*key)
                    .is_some_and(|slot| matches!(slot.state, EntryState::Pending))
            })
            .cloned()
            .collect()
    }

    /// Atomically moves the `Pending` members of `keys` to `InFlight`.
    ///
    /// Identifiers that are absent, already claimed, or terminal are skipped,
    /// as are duplicates within `keys`.
    pub fn claim(&self, keys: &[K]) -> Claim<K> {
        let mut inner = self.inner.lock();
        let flush = inner.next_flush;
        inner.next_flush += 1;

        let CacheInner { slots, counts, .. } = &mut *inner;
        let mut claimed = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(slot) = slots.get_mut(key) {
                if matches!(slot.state, EntryState::Pending) {
                    set_state(counts, slot, EntryState::InFlight(flush));
                    claimed.push(key.clone());
                }
            }
        }
        Claim {
            flush,
            keys: claimed,
        }
    }

    /// `InFlight → Resolved(value)`.
    ///
    /// # Errors
    ///
    /// [`Error::DoubleClaimViolation`] if `key` is not in flight.
    pub fn put(&self, key: &K, value: V) -> Result<()> {
        self.finish_one(key, EntryState::Resolved(Arc::new(value)))
    }

    /// `InFlight → Missing`.
    ///
    /// # Errors
    ///
    /// [`Error::DoubleClaimViolation`] if `key` is not in flight.
    pub fn mark_missing(&self, key: &K) -> Result<()> {
        self.finish_one(key, EntryState::Missing)
    }

    fn finish_one(&self, key: &K, next: EntryState<V>) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            let CacheInner { slots, counts, .. } = &mut *inner;
            let slot = slots
                .get_mut(key)
                .ok_or_else(|| Error::double_claim(key, "absent"))?;
            if !matches!(slot.state, EntryState::InFlight(_)) {
                return Err(Error::double_claim(key, slot.state.name()));
            }
            set_state(counts, slot, next);
        }
        self.settled.notify_all();
        Ok(())
    }

    /// Any state → `Pending`, dropping any pinned value. Returns `false` if
    /// `key` is unknown.
    pub fn reset(&self, key: &K) -> bool {
        let known = {
            let mut inner = self.inner.lock();
            let CacheInner { slots, counts, .. } = &mut *inner;
            match slots.get_mut(key) {
                Some(slot) => {
                    set_state(counts, slot, EntryState::Pending);
                    slot.pinned = false;
                    true
                },
                None => false,
            }
        };
        if known {
            self.settled.notify_all();
        }
        known
    }

    /// Stores `value` for `key` and pins it, so later fetch results for
    /// `key` are ignored until the next [`reset`](Self::reset).
    pub fn set(&self, key: K, value: V) {
        {
            let mut inner = self.inner.lock();
            let CacheInner {
                slots,
                counts,
                next_seq,
                ..
            } = &mut *inner;
            let value = EntryState::Resolved(Arc::new(value));
            match slots.get_mut(&key) {
                Some(slot) => {
                    set_state(counts, slot, value);
                    slot.pinned = true;
                },
                None => {
                    counts.count(&value);
                    let seq = *next_seq;
                    *next_seq += 1;
                    slots.insert(
                        key,
                        Slot {
                            state: value,
                            seq,
                            pinned: true,
                        },
                    );
                },
            }
        }
        self.settled.notify_all();
    }

    /// Applies a successful bulk fetch for `flush`.
    ///
    /// Every returned identifier still in flight for `flush` becomes
    /// `Resolved`; every claimed identifier the result omitted becomes
    /// `Missing`. Entries reset or set while the fetch ran keep their newer
    /// state.
    pub fn complete(&self, flush: FlushId, claimed: &[K], fetched: HashMap<K, V>) -> Settled {
        let mut settled = Settled::default();
        {
            let mut inner = self.inner.lock();
            let CacheInner { slots, counts, .. } = &mut *inner;
            for (key, value) in fetched {
                match slots.get_mut(&key) {
                    Some(slot) if slot.state.is_in_flight(flush) => {
                        set_state(counts, slot, EntryState::Resolved(Arc::new(value)));
                        settled.resolved += 1;
                    },
                    _ => settled.ignored += 1,
                }
            }
            for key in claimed {
                if let Some(slot) = slots.get_mut(key) {
                    if slot.state.is_in_flight(flush) {
                        set_state(counts, slot, EntryState::Missing);
                        settled.missing += 1;
                    }
                }
            }
        }
        self.settled.notify_all();
        settled
    }

    /// Reverts the identifiers of a failed `flush` to `Pending` and hands the
    /// failure to callers blocked on that flush. Returns how many were
    /// reverted.
    pub fn fail(&self, flush: FlushId, claimed: &[K], error: SharedError) -> usize {
        let mut reverted = 0;
        {
            let mut inner = self.inner.lock();
            let CacheInner {
                slots,
                counts,
                waiters,
                failed,
                ..
            } = &mut *inner;
            for key in claimed {
                if let Some(slot) = slots.get_mut(key) {
                    if slot.state.is_in_flight(flush) {
                        set_state(counts, slot, EntryState::Pending);
                        reverted += 1;
                    }
                }
            }
            if waiters.contains_key(&flush) {
                failed.insert(
                    flush,
                    FailedFlush {
                        batch_len: claimed.len(),
                        error,
                    },
                );
            }
        }
        self.settled.notify_all();
        reverted
    }

    /// Blocks while `key` is in flight for `flush`.
    ///
    /// Returns at once if `key` is not in flight for `flush` on entry; the
    /// caller is expected to inspect the state again.
    ///
    /// # Errors
    ///
    /// [`Error::FetchFailed`] if `flush` failed while this call was blocked
    /// on it, even if `key` has been claimed by a newer flush since.
    pub fn wait_settled(&self, key: &K, flush: FlushId) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.in_flight_for(key, flush) {
            return Ok(());
        }
        *inner.waiters.entry(flush).or_insert(0) += 1;
        while inner.in_flight_for(key, flush) {
            self.settled.wait(&mut inner);
        }

        let last = match inner.waiters.get_mut(&flush) {
            Some(count) => {
                *count -= 1;
                *count == 0
            },
            None => true,
        };
        let failure = if last {
            inner.waiters.remove(&flush);
            inner.failed.remove(&flush).map(|failed| (failed.batch_len, failed.error))
        } else {
            inner
                .failed
                .get(&flush)
                .map(|failed| (failed.batch_len, Arc::clone(&failed.error)))
        };
        match failure {
            Some((batch_len, source)) => Err(Error::FetchFailed { batch_len, source }),
            None => Ok(()),
        }
    }

    /// Number of failed flushes still held for blocked waiters.
    pub fn retained_failures(&self) -> usize {
        self.inner.lock().failed.len()
    }

    /// Validates internal bookkeeping.
    pub fn check_invariants(&self) -> std::result::Result<(), InvariantError> {
        let inner = self.inner.lock();
        let mut recount = StateCounts::default();
        for slot in inner.slots.values() {
            recount.count(&slot.state);
            if slot.pinned && !matches!(slot.state, EntryState::Resolved(_)) {
                return Err(InvariantError::new(format!(
                    "pinned entry is {}, expected resolved",
                    slot.state.name()
                )));
            }
            if let EntryState::InFlight(flush) = slot.state {
                if flush >= inner.next_flush {
                    return Err(InvariantError::new(format!(
                        "in-flight flush {flush} was never issued"
                    )));
                }
            }
            if slot.seq >= inner.next_seq {
                return Err(InvariantError::new("registration sequence out of range"));
            }
        }
        if let Some(flush) = inner.failed.keys().find(|f| !inner.waiters.contains_key(*f)) {
            return Err(InvariantError::new(format!(
                "failure of flush {flush} retained without waiters"
            )));
        }
        if let Some(flush) = inner.waiters.keys().find(|f| **f >= inner.next_flush) {
            return Err(InvariantError::new(format!(
                "waiters registered on flush {flush} that was never issued"
            )));
        }
        if recount != inner.counts {
            return Err(InvariantError::new(format!(
                "state counts {:?} disagree with entries {:?}",
                inner.counts, recount
            )));
        }
        Ok(())
    }
}
