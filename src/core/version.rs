//! Committed version chains, one per (site, variable) pair.
//!
//! Writers never overwrite in place: each commit prepends a new
//! `(value, version)` entry, newest first. Read-only transactions walk the
//! chain for the newest version at or before their start tick. A site
//! failure records the version visible at the moment of failure; for
//! replicated variables the cell then refuses ordinary reads until the next
//! committed write restores it.

use super::error::DbError;
use super::{initial_value, placement, Tick, Value, VarId};

/// One committed version of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Committed {
    pub value: Value,
    pub version: Tick,
}

/// One variable's version chain at one site.
#[derive(Debug, Clone)]
pub struct VersionedCell {
    var: VarId,
    /// Newest first; never empty.
    versions: Vec<Committed>,
    /// Version visible just before the most recent site failure.
    fail_version: Option<Tick>,
    /// Clear from the moment the site fails until the next committed write.
    /// Only meaningful for replicated variables; a lone copy is available
    /// as soon as its site is back up.
    readable: bool,
}

impl VersionedCell {
    pub fn new(var: VarId) -> Self {
        Self {
            var,
            versions: vec![Committed {
                value: initial_value(var),
                version: 0,
            }],
            fail_version: None,
            readable: true,
        }
    }

    pub fn var(&self) -> VarId {
        self.var
    }

    /// The latest committed entry.
    pub fn latest(&self) -> Committed {
        self.versions[0]
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn fail_version(&self) -> Option<Tick> {
        self.fail_version
    }

    /// The chain, newest first.
    pub fn versions(&self) -> &[Committed] {
        &self.versions
    }

    /// Snapshot read: the newest version at or before `snapshot`.
    ///
    /// Version 0 predates every transaction, so a version is always found;
    /// the read still fails if that version does not survive the fail cut,
    /// in which case the caller picks another replica.
    pub fn read_at_or_before(&self, snapshot: Tick) -> Result<Committed, DbError> {
        let found = self.versions.iter().find(|v| v.version <= snapshot);
        match found {
            Some(&v) if !self.fail_version.is_some_and(|cut| v.version <= cut) => Ok(v),
            _ => Err(DbError::StaleRead(self.var)),
        }
    }

    /// Record the owning site's failure.
    pub fn mark_failed(&mut self) {
        if placement::is_replicated(self.var) {
            self.fail_version = Some(self.latest().version);
            self.readable = false;
        }
    }

    /// Apply a committed write, restoring readability.
    ///
    /// A transaction that wrote the same variable twice commits both writes
    /// at the same tick; the later one supersedes the head entry so the
    /// chain stays strictly decreasing.
    pub fn commit(&mut self, value: Value, version: Tick) {
        if self.versions[0].version == version {
            self.versions[0] = Committed { value, version };
        } else {
            self.versions.insert(0, Committed { value, version });
        }
        self.readable = true;
    }
}
