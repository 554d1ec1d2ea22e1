//! Per-transaction bookkeeping owned by the coordinator.

use std::collections::BTreeSet;
use std::fmt;

use super::{SiteId, Tick, TxnId, Value, VarId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnKind {
    ReadWrite,
    ReadOnly,
}

/// Why a transaction will abort at its end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    Deadlock,
    SiteFailure(SiteId),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Deadlock => write!(f, "deadlock"),
            AbortReason::SiteFailure(site) => write!(f, "site {} failure", site),
        }
    }
}

/// A write deferred to commit time, with the target sites captured when the
/// write command succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub var: VarId,
    pub value: Value,
    pub targets: Vec<SiteId>,
}

/// Everything the coordinator tracks about one live transaction.
#[derive(Debug)]
pub struct Transaction {
    tid: TxnId,
    start: Tick,
    kind: TxnKind,
    read_locks: BTreeSet<(SiteId, VarId)>,
    write_locks: BTreeSet<(SiteId, VarId)>,
    pending: Vec<PendingWrite>,
    accessed_sites: BTreeSet<SiteId>,
    abort: Option<AbortReason>,
}

impl Transaction {
    pub fn new(tid: TxnId, start: Tick, kind: TxnKind) -> Self {
        Self {
            tid,
            start,
            kind,
            read_locks: BTreeSet::new(),
            write_locks: BTreeSet::new(),
            pending: Vec::new(),
            accessed_sites: BTreeSet::new(),
            abort: None,
        }
    }

    pub fn tid(&self) -> TxnId {
        self.tid
    }

    pub fn start(&self) -> Tick {
        self.start
    }

    pub fn kind(&self) -> TxnKind {
        self.kind
    }

    pub fn is_read_only(&self) -> bool {
        self.kind == TxnKind::ReadOnly
    }

    // -- Lock bookkeeping ---------------------------------------------------

    /// A write hold satisfies a read request too.
    pub fn has_read_lock(&self, site: SiteId, var: VarId) -> bool {
        self.read_locks.contains(&(site, var)) || self.write_locks.contains(&(site, var))
    }

    pub fn has_write_lock(&self, site: SiteId, var: VarId) -> bool {
        self.write_locks.contains(&(site, var))
    }

    pub fn add_read_lock(&mut self, site: SiteId, var: VarId) {
        self.read_locks.insert((site, var));
    }

    pub fn add_write_lock(&mut self, site: SiteId, var: VarId) {
        self.write_locks.insert((site, var));
    }

    /// Forget a read hold that an upgrade vacated.
    pub fn drop_read_lock(&mut self, site: SiteId, var: VarId) {
        self.read_locks.remove(&(site, var));
    }

    /// Forget every lock at a site whose lock table was wiped by failure.
    pub fn purge_site_locks(&mut self, site: SiteId) {
        self.read_locks.retain(|&(s, _)| s != site);
        self.write_locks.retain(|&(s, _)| s != site);
    }

    pub fn read_locks(&self) -> &BTreeSet<(SiteId, VarId)> {
        &self.read_locks
    }

    pub fn write_locks(&self) -> &BTreeSet<(SiteId, VarId)> {
        &self.write_locks
    }

    // -- Accesses and deferred writes ---------------------------------------

    pub fn note_read(&mut self, site: SiteId) {
        self.accessed_sites.insert(site);
    }

    /// Defer a write to commit time.
    pub fn queue_write(&mut self, var: VarId, value: Value, targets: Vec<SiteId>) {
        self.accessed_sites.extend(targets.iter().copied());
        self.pending.push(PendingWrite {
            var,
            value,
            targets,
        });
    }

    pub fn pending_writes(&self) -> &[PendingWrite] {
        &self.pending
    }

    /// Even-indexed variables this transaction wrote; committing them wakes
    /// readers parked on failed replicas.
    pub fn even_writes(&self) -> BTreeSet<VarId> {
        self.pending
            .iter()
            .filter(|w| w.var % 2 == 0)
            .map(|w| w.var)
            .collect()
    }

    pub fn accessed_sites(&self) -> &BTreeSet<SiteId> {
        &self.accessed_sites
    }

    // -- Abort state ---------------------------------------------------------

    pub fn mark_deadlocked(&mut self) {
        self.abort = Some(AbortReason::Deadlock);
    }

    /// Called when `site` fails; poisons the transaction if it ever touched
    /// that site.
    pub fn note_site_failure(&mut self, site: SiteId) {
        if self.accessed_sites.contains(&site) {
            self.abort = Some(AbortReason::SiteFailure(site));
        }
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        self.abort.as_ref()
    }

    /// Whether `end` commits this transaction. Read-only transactions never
    /// wrote anything, so they commit even when poisoned by a site failure.
    pub fn commits(&self) -> bool {
        self.abort.is_none() || self.is_read_only()
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}@{}", self.tid, self.start)?;
        if self.is_read_only() {
            write!(f, " (read-only)")?;
        }
        Ok(())
    }
}
