//! A replica site: up/down state, a lock table, and one versioned cell per
//! variable the replication map places here.
//!
//! Failure wipes the lock table (every lock and waiter vanishes) and marks
//! replicated cells unreadable. Recovery flips the site back up without
//! touching the cells; a replicated cell stays unreadable until the next
//! committed write.

use std::collections::BTreeMap;

use tracing::debug;

use super::error::DbError;
use super::lock::{LockRequest, LockTable, WaitsFor};
use super::placement;
use super::txn::Transaction;
use super::version::{Committed, VersionedCell};
use super::{SiteId, Tick, TxnId, Value, VarId};

/// Outcome of a read-write read at one site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Value(Committed),
    /// The read lock is queued; the coordinator parks the transaction.
    Blocked,
}

#[derive(Debug)]
pub struct Site {
    id: SiteId,
    up: bool,
    locks: LockTable,
    cells: BTreeMap<VarId, VersionedCell>,
}

impl Site {
    pub fn new(id: SiteId) -> Self {
        let cells: BTreeMap<VarId, VersionedCell> = placement::vars_at(id)
            .map(|v| (v, VersionedCell::new(v)))
            .collect();
        let locks = LockTable::new(cells.keys().copied());
        Self {
            id,
            up: true,
            locks,
            cells,
        }
    }

    pub fn id(&self) -> SiteId {
        self.id
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    pub fn holds(&self, var: VarId) -> bool {
        self.cells.contains_key(&var)
    }

    pub fn cell(&self, var: VarId) -> Option<&VersionedCell> {
        self.cells.get(&var)
    }

    pub fn lock_table(&self) -> &LockTable {
        &self.locks
    }

    // -- Reads ---------------------------------------------------------------

    /// Read the latest committed value for a read-write transaction,
    /// acquiring the read lock if it is not already held.
    pub fn read(&mut self, var: VarId, txn: &mut Transaction) -> ReadOutcome {
        if txn.has_read_lock(self.id, var) {
            return ReadOutcome::Value(self.cells[&var].latest());
        }
        match self.locks.slot_mut(var).request_read(txn.tid()) {
            LockRequest::Granted => {
                txn.add_read_lock(self.id, var);
                ReadOutcome::Value(self.cells[&var].latest())
            }
            LockRequest::Queued => ReadOutcome::Blocked,
        }
    }

    /// Lock-free snapshot read for a read-only transaction.
    pub fn snapshot_read(&self, var: VarId, snapshot: Tick) -> Result<Committed, DbError> {
        self.cells[&var].read_at_or_before(snapshot)
    }

    // -- Writes --------------------------------------------------------------

    /// Acquire (or upgrade to) the write lock on `var`. The write itself is
    /// deferred; the coordinator applies it at commit.
    pub fn write_lock(&mut self, var: VarId, txn: &mut Transaction) -> bool {
        if txn.has_write_lock(self.id, var) {
            return true;
        }
        let slot = self.locks.slot_mut(var);
        match slot.request_write(txn.tid()) {
            LockRequest::Granted => {
                txn.drop_read_lock(self.id, var);
                txn.add_write_lock(self.id, var);
                true
            }
            LockRequest::Queued => {
                if !slot.holds(txn.tid()) {
                    // An upgrade parked the request at the queue head; the
                    // read hold is gone.
                    txn.drop_read_lock(self.id, var);
                }
                false
            }
        }
    }

    /// Withdraw a queued write request (recovered-site optimization).
    pub fn leave_write_queue(&mut self, var: VarId, tid: TxnId) {
        self.locks.slot_mut(var).leave_queue(tid);
    }

    /// Apply a committed write.
    pub fn apply_write(&mut self, var: VarId, value: Value, version: Tick) {
        self.cells
            .get_mut(&var)
            .expect("commit targets a stored variable")
            .commit(value, version);
    }

    // -- Locks and failure ---------------------------------------------------

    /// Release every lock `tid` holds or awaits here; returns the
    /// transactions granted a lock as a result.
    pub fn release(&mut self, tid: TxnId) -> Vec<TxnId> {
        self.locks.release(tid)
    }

    pub fn fail(&mut self) {
        debug!(site = self.id, "site failing, lock table dropped");
        self.up = false;
        self.locks = LockTable::new(self.cells.keys().copied());
        for cell in self.cells.values_mut() {
            cell.mark_failed();
        }
    }

    pub fn recover(&mut self) {
        debug!(site = self.id, "site recovering");
        self.up = true;
    }

    pub fn collect_edges(&self, edges: &mut WaitsFor) {
        self.locks.collect_edges(edges);
    }

    /// The latest committed entry regardless of up/readable state; `dump`
    /// reveals state irrespective of failure.
    pub fn committed_value(&self, var: VarId) -> Option<Committed> {
        self.cells.get(&var).map(|c| c.latest())
    }
}
