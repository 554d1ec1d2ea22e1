//! Per-variable lock queues with strict two-phase locking semantics.
//!
//! Each variable at each site has a [`LockSlot`]: an ordered list of current
//! holders and a FIFO queue of waiters. Locks are held until the owning
//! transaction ends; waiters feed the waits-for graph consumed by the
//! deadlock detector.
//!
//! Grant rules:
//!
//! - A read is granted when no one is waiting and every holder (if any) is a
//!   reader.
//! - A write is granted only on a completely free slot.
//! - An upgrade (read holder requests write) vacates the read hold; if that
//!   leaves the slot free the write is granted immediately, otherwise the
//!   write request jumps to the *head* of the queue.
//! - On release, the queue head is granted; a granted read pulls every
//!   consecutive read behind it in the same batch.

use std::collections::{BTreeMap, BTreeSet};

use super::{TxnId, VarId};

/// Waits-for edges: waiter → the transactions it waits on. Ordered maps keep
/// detector traversal deterministic.
pub type WaitsFor = BTreeMap<TxnId, BTreeSet<TxnId>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

/// Result of a lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockRequest {
    Granted,
    Queued,
}

// ---------------------------------------------------------------------------
// LockSlot
// ---------------------------------------------------------------------------

/// Holders and waiters for one variable at one site.
#[derive(Debug, Default)]
pub struct LockSlot {
    holders: Vec<(LockMode, TxnId)>,
    waiters: Vec<(LockMode, TxnId)>,
}

impl LockSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `tid` currently holds this slot in any mode.
    pub fn holds(&self, tid: TxnId) -> bool {
        self.holders.iter().any(|&(_, t)| t == tid)
    }

    pub fn holders(&self) -> &[(LockMode, TxnId)] {
        &self.holders
    }

    pub fn waiters(&self) -> &[(LockMode, TxnId)] {
        &self.waiters
    }

    /// Request a shared lock for `tid`.
    pub fn request_read(&mut self, tid: TxnId) -> LockRequest {
        if self.holds(tid) {
            return LockRequest::Granted;
        }
        if self.waiters.contains(&(LockMode::Read, tid)) {
            return LockRequest::Queued;
        }

        if self.waiters.is_empty() && self.holders.iter().all(|&(m, _)| m == LockMode::Read) {
            self.holders.push((LockMode::Read, tid));
            LockRequest::Granted
        } else {
            self.waiters.push((LockMode::Read, tid));
            LockRequest::Queued
        }
    }

    /// Request an exclusive lock for `tid`, upgrading an existing read hold.
    pub fn request_write(&mut self, tid: TxnId) -> LockRequest {
        if self.holders.contains(&(LockMode::Write, tid)) {
            return LockRequest::Granted;
        }
        if self.waiters.contains(&(LockMode::Write, tid)) {
            return LockRequest::Queued;
        }

        if let Some(pos) = self.holders.iter().position(|&h| h == (LockMode::Read, tid)) {
            // Upgrade: vacate the read hold. Readers that arrived earlier
            // still block the write, but it overtakes every queued waiter.
            self.holders.remove(pos);
            if self.holders.is_empty() {
                self.holders.push((LockMode::Write, tid));
                return LockRequest::Granted;
            }
            self.waiters.insert(0, (LockMode::Write, tid));
            return LockRequest::Queued;
        }

        if self.holders.is_empty() && self.waiters.is_empty() {
            self.holders.push((LockMode::Write, tid));
            LockRequest::Granted
        } else {
            self.waiters.push((LockMode::Write, tid));
            LockRequest::Queued
        }
    }

    /// Drop every entry for `tid` and hand the slot to the queue head.
    ///
    /// Returns the transactions granted a lock by this release, in grant
    /// order. A granted read pulls all consecutive reads behind it.
    pub fn release(&mut self, tid: TxnId) -> Vec<TxnId> {
        self.holders.retain(|&(_, t)| t != tid);
        self.waiters.retain(|&(_, t)| t != tid);

        let mut granted = Vec::new();
        if self.holders.is_empty() && !self.waiters.is_empty() {
            let (mode, head) = self.waiters.remove(0);
            self.holders.push((mode, head));
            granted.push(head);
            if mode == LockMode::Read {
                while self
                    .waiters
                    .first()
                    .is_some_and(|&(m, _)| m == LockMode::Read)
                {
                    let (m, t) = self.waiters.remove(0);
                    self.holders.push((m, t));
                    granted.push(t);
                }
            }
        }
        granted
    }

    /// Withdraw `tid`'s queued write request without granting anyone.
    pub fn leave_queue(&mut self, tid: TxnId) {
        if let Some(pos) = self
            .waiters
            .iter()
            .position(|&w| w == (LockMode::Write, tid))
        {
            self.waiters.remove(pos);
        }
    }

    /// Add this slot's waits-for edges: every waiter waits on everyone ahead
    /// of it in the queue and on every holder. Every participant becomes a
    /// graph vertex even when it has no outgoing edge.
    pub fn collect_edges(&self, edges: &mut WaitsFor) {
        for &(_, t) in self.holders.iter().chain(self.waiters.iter()) {
            edges.entry(t).or_default();
        }
        for (i, &(_, waiter)) in self.waiters.iter().enumerate() {
            for &(_, ahead) in &self.waiters[..i] {
                if ahead != waiter {
                    edges.entry(waiter).or_default().insert(ahead);
                }
            }
            for &(_, holder) in &self.holders {
                if holder != waiter {
                    edges.entry(waiter).or_default().insert(holder);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// LockTable
// ---------------------------------------------------------------------------

/// One slot per variable stored at a site.
#[derive(Debug, Default)]
pub struct LockTable {
    slots: BTreeMap<VarId, LockSlot>,
}

impl LockTable {
    pub fn new(vars: impl IntoIterator<Item = VarId>) -> Self {
        Self {
            slots: vars.into_iter().map(|v| (v, LockSlot::new())).collect(),
        }
    }

    pub fn slot(&self, var: VarId) -> Option<&LockSlot> {
        self.slots.get(&var)
    }

    pub fn slot_mut(&mut self, var: VarId) -> &mut LockSlot {
        self.slots
            .get_mut(&var)
            .expect("lock slot exists for every stored variable")
    }

    pub fn slots(&self) -> impl Iterator<Item = (VarId, &LockSlot)> {
        self.slots.iter().map(|(&v, s)| (v, s))
    }

    /// Release `tid` from every slot; returns all newly granted transactions
    /// in ascending variable order.
    pub fn release(&mut self, tid: TxnId) -> Vec<TxnId> {
        self.slots
            .values_mut()
            .flat_map(|slot| slot.release(tid))
            .collect()
    }

    pub fn collect_edges(&self, edges: &mut WaitsFor) {
        for slot in self.slots.values() {
            slot.collect_edges(edges);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
