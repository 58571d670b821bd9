// registry.rs — Thread-safe keyed store of detected conflicts.
//
// The registry is the only shared mutable state in the pipeline. Every
// operation takes the single mutex for the duration of the map operation and
// nothing else: no policy evaluation, remediation or escalation ever runs
// while it is held.
//
// Each entry carries an insertion sequence number; a BTreeMap keyed by that
// number gives insertion-order enumeration with O(log n) removal. Enumeration
// returns owned snapshots so callers iterate without the lock.
//
// A resolver must `claim` a conflict (Open → Resolving) before touching it.
// The claim is taken under the lock, so at most one resolver works on a
// conflict at any time.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::conflict::{Conflict, ConflictStatus};
use crate::error::ConflictError;

struct Slot {
    seq: u64,
    conflict: Conflict,
}

#[derive(Default)]
struct Entries {
    by_id: HashMap<Uuid, Slot>,
    order: BTreeMap<u64, Uuid>,
    next_seq: u64,
}

impl Entries {
    fn in_order(&self) -> impl Iterator<Item = &Conflict> + '_ {
        self.order
            .values()
            .filter_map(|id| self.by_id.get(id).map(|slot| &slot.conflict))
    }

    fn status_mut(&mut self, conflict_id: Uuid) -> Option<&mut ConflictStatus> {
        self.by_id
            .get_mut(&conflict_id)
            .map(|slot| &mut slot.conflict.status)
    }
}

/// In-memory conflict store shared by the detector and the resolver.
#[derive(Default)]
pub struct ConflictRegistry {
    entries: Mutex<Entries>,
}

impl ConflictRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Each operation leaves the map consistent before it can panic, so a
    // poisoned lock still guards valid data.
    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a conflict. Overwriting is forbidden.
    pub fn put(&self, conflict: Conflict) -> Result<(), ConflictError> {
        let mut entries = self.lock();
        let conflict_id = conflict.conflict_id;
        if entries.by_id.contains_key(&conflict_id) {
            return Err(ConflictError::DuplicateConflict { conflict_id });
        }
        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.order.insert(seq, conflict_id);
        entries.by_id.insert(conflict_id, Slot { seq, conflict });
        Ok(())
    }

    pub fn get(&self, conflict_id: Uuid) -> Option<Conflict> {
        let conflict = self
            .lock()
            .by_id
            .get(&conflict_id)
            .map(|slot| slot.conflict.clone());
        if conflict.is_none() {
            tracing::debug!(%conflict_id, "conflict not found");
        }
        conflict
    }

    /// Snapshot of every registered conflict, in insertion order.
    pub fn list_all(&self) -> Vec<Conflict> {
        self.lock().in_order().cloned().collect()
    }

    /// Snapshot of the conflicts still awaiting resolution. Conflicts another
    /// resolver has claimed are not included.
    pub fn list_open(&self) -> Vec<Conflict> {
        self.lock()
            .in_order()
            .filter(|c| c.is_open())
            .cloned()
            .collect()
    }

    /// Take exclusive ownership of an open conflict for resolution.
    ///
    /// Flips it to `Resolving` and returns the claimed record. Returns `None`
    /// when the id is unknown or the conflict is not open (already claimed,
    /// escalated or removed).
    pub fn claim(&self, conflict_id: Uuid) -> Option<Conflict> {
        let mut entries = self.lock();
        let slot = entries.by_id.get_mut(&conflict_id)?;
        if slot.conflict.status != ConflictStatus::Open {
            return None;
        }
        slot.conflict.status = ConflictStatus::Resolving;
        Some(slot.conflict.clone())
    }

    /// Hand a claimed conflict back as `Open`. Returns whether it was claimed.
    pub fn release(&self, conflict_id: Uuid) -> bool {
        let mut entries = self.lock();
        match entries.status_mut(conflict_id) {
            Some(status) if *status == ConflictStatus::Resolving => {
                *status = ConflictStatus::Open;
                true
            }
            _ => false,
        }
    }

    /// Remove a conflict, returning it if it was present.
    ///
    /// Removing an absent id is a no-op that logs a warning.
    pub fn remove(&self, conflict_id: Uuid) -> Option<Conflict> {
        let removed = {
            let mut entries = self.lock();
            let removed = entries.by_id.remove(&conflict_id);
            if let Some(slot) = &removed {
                entries.order.remove(&slot.seq);
            }
            removed.map(|slot| slot.conflict)
        };
        match &removed {
            Some(_) => tracing::debug!(%conflict_id, "conflict removed"),
            None => tracing::warn!(%conflict_id, "conflict not found; nothing to remove"),
        }
        removed
    }

    /// Flip an open or claimed conflict to `Escalated`.
    ///
    /// Returns `Ok(true)` if this call made the transition and `Ok(false)` if
    /// the conflict was already escalated.
    pub fn mark_escalated(&self, conflict_id: Uuid) -> Result<bool, ConflictError> {
        let mut entries = self.lock();
        let status = entries
            .status_mut(conflict_id)
            .ok_or(ConflictError::NotFound(conflict_id))?;
        if *status == ConflictStatus::Escalated {
            return Ok(false);
        }
        *status = ConflictStatus::Escalated;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every stored conflict.
    pub fn clear(&self) {
        let mut entries = self.lock();
        let count = entries.by_id.len();
        entries.by_id.clear();
        entries.order.clear();
        tracing::info!(count, "conflict registry cleared");
    }
}
