//! The transaction coordinator.
//!
//! Commands execute strictly one at a time. The coordinator owns the site
//! vector and the transaction table; blocked transactions are parked in two
//! explicit sets and re-driven synchronously by other commands:
//!
//! - `blocked_on_fail`: the access found no available site. Woken by
//!   `recover`, or — for reads of replicated variables — by a commit that
//!   writes the variable.
//! - `blocked_on_lock`: the access queued behind a lock. Woken when a
//!   release grants the transaction a lock.
//!
//! Every command advances the logical clock by one tick after its effects
//! and then runs the deadlock detector; wake paths re-enter the normal
//! read/write paths, which tick again.

use std::collections::{BTreeMap, BTreeSet};
use std::io::BufRead;
use std::mem;

use serde::Serialize;
use tracing::{debug, info};

use crate::core::error::DbError;
use crate::core::lock::WaitsFor;
use crate::core::placement;
use crate::core::site::{ReadOutcome, Site};
use crate::core::txn::{PendingWrite, Transaction, TxnKind};
use crate::core::{SiteId, Tick, TxnId, Value, VarId, SITE_COUNT, VAR_COUNT};
use crate::parser::{parse_line, Command};

use super::deadlock;
use super::output::{OutputLog, OutputOptions};

// ---------------------------------------------------------------------------
// Support types
// ---------------------------------------------------------------------------

/// A parked access, re-driven verbatim by a wake path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Blocked {
    Read { tid: TxnId, var: VarId },
    Write { tid: TxnId, var: VarId, value: Value },
}

impl Blocked {
    pub fn tid(&self) -> TxnId {
        match *self {
            Blocked::Read { tid, .. } | Blocked::Write { tid, .. } => tid,
        }
    }

    pub fn var(&self) -> VarId {
        match *self {
            Blocked::Read { var, .. } | Blocked::Write { var, .. } => var,
        }
    }
}

/// Run counters, reported once at end of run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub commands: u64,
    pub commits: u64,
    pub aborts: u64,
    pub deadlocks_detected: u64,
    /// Accesses parked behind a lock queue.
    pub lock_blocks: u64,
    /// Accesses parked because no site was available.
    pub site_blocks: u64,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct Coordinator {
    options: OutputOptions,
    sites: Vec<Site>,
    txns: BTreeMap<TxnId, Transaction>,
    time: Tick,
    blocked_on_fail: BTreeSet<Blocked>,
    blocked_on_lock: BTreeSet<Blocked>,
    out: OutputLog,
    stats: Stats,
}

impl Coordinator {
    pub fn new(options: OutputOptions) -> Self {
        Self::with_output(options, OutputLog::stdout())
    }

    pub fn with_output(options: OutputOptions, out: OutputLog) -> Self {
        Self {
            options,
            sites: (1..=SITE_COUNT).map(Site::new).collect(),
            txns: BTreeMap::new(),
            time: 1,
            blocked_on_fail: BTreeSet::new(),
            blocked_on_lock: BTreeSet::new(),
            out,
            stats: Stats::default(),
        }
    }

    pub fn time(&self) -> Tick {
        self.time
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn site(&self, id: SiteId) -> &Site {
        &self.sites[(id - 1) as usize]
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn transaction(&self, tid: TxnId) -> Option<&Transaction> {
        self.txns.get(&tid)
    }

    pub fn active_tids(&self) -> impl Iterator<Item = TxnId> + '_ {
        self.txns.keys().copied()
    }

    pub fn blocked_on_fail(&self) -> &BTreeSet<Blocked> {
        &self.blocked_on_fail
    }

    pub fn blocked_on_lock(&self) -> &BTreeSet<Blocked> {
        &self.blocked_on_lock
    }

    /// Captured output lines (capture sink only).
    pub fn output(&self) -> &[String] {
        self.out.lines()
    }

    // -- Command stream ------------------------------------------------------

    /// Execute every command in `reader` until end of input.
    pub fn run(&mut self, reader: impl BufRead) -> Result<(), DbError> {
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            match parse_line(&line, idx + 1)? {
                Some(cmd) => self.exec(cmd)?,
                None => info!(line = %line.trim_end(), "blank or comment line"),
            }
        }
        Ok(())
    }

    /// Execute a single command.
    pub fn exec(&mut self, cmd: Command) -> Result<(), DbError> {
        debug!(?cmd, time = self.time, "command");
        self.stats.commands += 1;
        match cmd {
            Command::Begin { tid } => self.exec_begin(tid, TxnKind::ReadWrite),
            Command::BeginRo { tid } => self.exec_begin(tid, TxnKind::ReadOnly),
            Command::Read { tid, var } => {
                if !placement::valid_var(var) {
                    return Err(DbError::IllegalVariable(var));
                }
                self.exec_read(tid, var)
            }
            Command::Write { tid, var, value } => {
                if !placement::valid_var(var) {
                    return Err(DbError::IllegalVariable(var));
                }
                self.exec_write(tid, var, value)
            }
            Command::End { tid } => self.exec_end(tid),
            Command::DumpAll => self.exec_dump(None, None),
            Command::DumpSite { site } => self.exec_dump(Some(site), None),
            Command::DumpVar { var } => self.exec_dump(None, Some(var)),
            Command::Fail { site } => self.exec_fail(site),
            Command::Recover { site } => self.exec_recover(site),
        }
    }

    // -- begin ---------------------------------------------------------------

    fn exec_begin(&mut self, tid: TxnId, kind: TxnKind) -> Result<(), DbError> {
        let txn = Transaction::new(tid, self.time, kind);
        info!(%txn, "new transaction");
        self.txns.insert(tid, txn);
        self.tick()
    }

    // -- read ----------------------------------------------------------------

    fn exec_read(&mut self, tid: TxnId, var: VarId) -> Result<(), DbError> {
        let (kind, start) = {
            let txn = self
                .txns
                .get(&tid)
                .ok_or(DbError::UnknownTransaction(tid))?;
            (txn.kind(), txn.start())
        };
        if kind == TxnKind::ReadOnly {
            return self.exec_snapshot_read(tid, var, start);
        }

        let Some(site_id) = self.pick_read_site(var) else {
            return self.park_on_fail(Blocked::Read { tid, var });
        };

        let txn = self
            .txns
            .get_mut(&tid)
            .ok_or(DbError::UnknownTransaction(tid))?;
        match self.sites[(site_id - 1) as usize].read(var, txn) {
            ReadOutcome::Value(v) => {
                txn.note_read(site_id);
                info!(txn = tid, var, site = site_id, value = v.value, version = v.version, "read");
                let tag = self.read_tag(tid);
                self.out.emit(format!("x{}: {}{}", var, v.value, tag));
            }
            ReadOutcome::Blocked => {
                info!(txn = tid, var, site = site_id, "read blocked on lock");
                self.blocked_on_lock.insert(Blocked::Read { tid, var });
                self.stats.lock_blocks += 1;
                if self.options.full_output {
                    self.out
                        .emit(format!("T{} blocked reading x{} (no lock)", tid, var));
                }
            }
        }
        self.tick()
    }

    /// Multiversion read for a read-only transaction: the newest committed
    /// version at or before its start tick. A replica whose surviving
    /// versions all predate its fail cut is skipped in favor of the next
    /// one; with no replica left the read parks on site availability.
    fn exec_snapshot_read(&mut self, tid: TxnId, var: VarId, start: Tick) -> Result<(), DbError> {
        for site_id in 1..=SITE_COUNT {
            let site = &self.sites[(site_id - 1) as usize];
            if !site.is_up() || !site.cell(var).is_some_and(|c| c.is_readable()) {
                continue;
            }
            match site.snapshot_read(var, start) {
                Ok(v) => {
                    info!(txn = tid, var, site = site_id, value = v.value, version = v.version, "snapshot read");
                    if let Some(txn) = self.txns.get_mut(&tid) {
                        txn.note_read(site_id);
                    }
                    let tag = self.read_tag(tid);
                    self.out.emit(format!("x{}: {}{}", var, v.value, tag));
                    return self.tick();
                }
                Err(DbError::StaleRead(_)) => {
                    debug!(txn = tid, var, site = site_id, "snapshot behind fail cut, trying next replica");
                }
                Err(other) => return Err(other),
            }
        }
        self.park_on_fail(Blocked::Read { tid, var })
    }

    /// First site that can serve an ordinary read: up, stores the variable,
    /// and (for replicated variables) restored since its last failure.
    fn pick_read_site(&self, var: VarId) -> Option<SiteId> {
        (1..=SITE_COUNT).find(|&id| {
            let site = &self.sites[(id - 1) as usize];
            site.is_up() && site.cell(var).is_some_and(|c| c.is_readable())
        })
    }

    fn read_tag(&self, tid: TxnId) -> String {
        if self.options.full_output {
            format!(" (T{})", tid)
        } else {
            String::new()
        }
    }

    // -- write ---------------------------------------------------------------

    fn exec_write(&mut self, tid: TxnId, var: VarId, value: Value) -> Result<(), DbError> {
        // Writes target every up site storing the variable.
        let targets: Vec<SiteId> = (1..=SITE_COUNT)
            .filter(|&id| {
                let site = &self.sites[(id - 1) as usize];
                site.is_up() && site.holds(var)
            })
            .collect();

        {
            let txn = self
                .txns
                .get(&tid)
                .ok_or(DbError::UnknownTransaction(tid))?;
            if txn.is_read_only() {
                return Err(DbError::ReadOnlyWrite(tid));
            }
        }

        if targets.is_empty() {
            info!(txn = tid, var, "write blocked: no site available");
            self.blocked_on_fail.insert(Blocked::Write { tid, var, value });
            self.stats.site_blocks += 1;
            if self.options.writes_logged() {
                self.out
                    .emit(format!("T{} blocked writing x{} (no site)", tid, var));
            }
            return self.tick();
        }

        let txn = self
            .txns
            .get_mut(&tid)
            .ok_or(DbError::UnknownTransaction(tid))?;
        let mut need_locks = Vec::new();
        for &id in &targets {
            if !self.sites[(id - 1) as usize].write_lock(var, txn) {
                need_locks.push(id);
            }
        }

        let mut final_targets = targets.clone();
        if !need_locks.is_empty() {
            // A site that recovered but has not been written since can be
            // treated as still down: withdraw the queued requests there and
            // write to the sites already locked.
            let all_unrestored = need_locks.iter().all(|&id| {
                self.sites[(id - 1) as usize]
                    .cell(var)
                    .is_some_and(|c| !c.is_readable())
            });
            if self.options.recovered_site_opt
                && need_locks.len() != targets.len()
                && all_unrestored
            {
                info!(txn = tid, var, sites = ?need_locks, "skipping unrestored recovered sites");
                for &id in &need_locks {
                    self.sites[(id - 1) as usize].leave_write_queue(var, tid);
                }
                final_targets.retain(|id| !need_locks.contains(id));
            } else {
                info!(txn = tid, var, sites = ?need_locks, "write blocked on locks");
                self.blocked_on_lock
                    .insert(Blocked::Write { tid, var, value });
                self.stats.lock_blocks += 1;
                if self.options.writes_logged() {
                    self.out
                        .emit(format!("T{} blocked writing x{} (need locks)", tid, var));
                }
                return self.tick();
            }
        }

        info!(txn = tid, var, value, sites = ?final_targets, "write deferred to commit");
        txn.queue_write(var, value, final_targets);
        if self.options.writes_logged() {
            self.out.emit(format!("x{} = {} (T{})", var, value, tid));
        }
        self.tick()
    }

    // -- end -----------------------------------------------------------------

    fn exec_end(&mut self, tid: TxnId) -> Result<(), DbError> {
        // Scripts may end transactions the deadlock detector already reaped.
        if !self.txns.contains_key(&tid) {
            debug!(txn = tid, "end of unknown transaction ignored");
            return Ok(());
        }
        self.finish(tid)
    }

    /// Commit or abort `tid`, release its locks everywhere, and drive the
    /// wake paths. Order matters: locks released, record deleted, tick,
    /// then wakes, so re-entries see the post-commit state.
    fn finish(&mut self, tid: TxnId) -> Result<(), DbError> {
        let Some(txn) = self.txns.get(&tid) else {
            return Ok(());
        };
        let commits = txn.commits();
        let writes: Vec<PendingWrite> = txn.pending_writes().to_vec();
        let reason = txn.abort_reason().cloned();
        let even_written = if commits { txn.even_writes() } else { BTreeSet::new() };
        info!(%txn, commits, accessed = ?txn.accessed_sites(), "finishing transaction");

        if commits {
            for w in &writes {
                for &id in &w.targets {
                    self.sites[(id - 1) as usize].apply_write(w.var, w.value, self.time);
                }
            }
            self.out.emit(format!("T{} commits", tid));
            self.stats.commits += 1;
        } else {
            let suffix = match reason {
                Some(reason) if self.options.full_output => format!(" ({})", reason),
                _ => String::new(),
            };
            self.out.emit(format!("T{} aborts{}", tid, suffix));
            self.stats.aborts += 1;
        }

        let mut woken: BTreeSet<TxnId> = BTreeSet::new();
        for site in &mut self.sites {
            woken.extend(site.release(tid));
        }
        info!(txn = tid, ?woken, "locks released");

        self.txns.remove(&tid);
        // A reaped transaction must never be re-driven by a wake path.
        self.blocked_on_fail.retain(|b| b.tid() != tid);
        self.blocked_on_lock.retain(|b| b.tid() != tid);

        self.tick()?;
        self.unblock_after_release(&woken)?;
        if !even_written.is_empty() {
            self.wake_after_even_commit(&even_written)?;
        }
        Ok(())
    }

    // -- fail / recover ------------------------------------------------------

    fn exec_fail(&mut self, site: SiteId) -> Result<(), DbError> {
        if !placement::valid_site(site) {
            return Err(DbError::IllegalSite(site));
        }
        self.sites[(site - 1) as usize].fail();
        for txn in self.txns.values_mut() {
            txn.note_site_failure(site);
            // The site's lock table is gone; held-lock records must follow.
            txn.purge_site_locks(site);
        }
        self.tick()
    }

    fn exec_recover(&mut self, site: SiteId) -> Result<(), DbError> {
        if !placement::valid_site(site) {
            return Err(DbError::IllegalSite(site));
        }
        self.sites[(site - 1) as usize].recover();
        self.tick()?;

        info!(site, parked = ?self.blocked_on_fail, "re-driving accesses parked on failure");
        let parked = mem::take(&mut self.blocked_on_fail);
        for entry in parked {
            // A nested abort earlier in this walk may have reaped the owner.
            if !self.txns.contains_key(&entry.tid()) {
                continue;
            }
            let var = entry.var();
            // Replicated variables exist here; an odd variable only matters
            // if this is its lone site.
            if placement::is_replicated(var) || placement::home_site(var) == Some(site) {
                self.replay(entry)?;
            } else {
                self.blocked_on_fail.insert(entry);
            }
        }
        Ok(())
    }

    // -- dump ----------------------------------------------------------------

    fn exec_dump(&mut self, site: Option<SiteId>, var: Option<VarId>) -> Result<(), DbError> {
        if let Some(s) = site {
            if !placement::valid_site(s) {
                return Err(DbError::IllegalSite(s));
            }
        }
        if let Some(v) = var {
            if !placement::valid_var(v) {
                return Err(DbError::IllegalVariable(v));
            }
        }

        let sites: Vec<SiteId> = match site {
            Some(s) => vec![s],
            None => (1..=SITE_COUNT).collect(),
        };
        let vars: Vec<VarId> = match var {
            Some(v) => vec![v],
            None => (1..=VAR_COUNT).collect(),
        };

        for s in sites {
            let mut entries = Vec::new();
            for &v in &vars {
                if let Some(c) = self.sites[(s - 1) as usize].committed_value(v) {
                    entries.push(format!("x{}: {}", v, c.value));
                }
            }
            if !entries.is_empty() {
                self.out.emit(format!("site {} - {}", s, entries.join(" ")));
            }
        }
        self.tick()
    }

    // -- wake paths ----------------------------------------------------------

    /// Re-drive lock-parked accesses whose transaction was just granted a
    /// lock. A re-entry may succeed, park on a different lock, or park on
    /// site availability.
    fn unblock_after_release(&mut self, woken: &BTreeSet<TxnId>) -> Result<(), DbError> {
        let parked = mem::take(&mut self.blocked_on_lock);
        for entry in parked {
            // A nested abort earlier in this walk may have reaped the owner.
            if !self.txns.contains_key(&entry.tid()) {
                continue;
            }
            if woken.contains(&entry.tid()) {
                self.replay(entry)?;
            } else {
                self.blocked_on_lock.insert(entry);
            }
        }
        Ok(())
    }

    /// After a commit writes even variables, re-drive reads parked on a
    /// failed replica of one of them. Everything else parked on failure is
    /// re-filed under `blocked_on_lock` — surprising, but the behavior this
    /// simulator has always had; see DESIGN.md.
    fn wake_after_even_commit(&mut self, evens: &BTreeSet<VarId>) -> Result<(), DbError> {
        let parked = mem::take(&mut self.blocked_on_fail);
        for entry in parked {
            // A nested abort earlier in this walk may have reaped the owner.
            if !self.txns.contains_key(&entry.tid()) {
                continue;
            }
            match entry {
                Blocked::Read { tid, var } if evens.contains(&var) => {
                    info!(txn = tid, var, "waking read after even-variable commit");
                    self.replay(entry)?;
                }
                other => {
                    self.blocked_on_lock.insert(other);
                }
            }
        }
        Ok(())
    }

    fn replay(&mut self, entry: Blocked) -> Result<(), DbError> {
        match entry {
            Blocked::Read { tid, var } => self.exec_read(tid, var),
            Blocked::Write { tid, var, value } => self.exec_write(tid, var, value),
        }
    }

    fn park_on_fail(&mut self, entry: Blocked) -> Result<(), DbError> {
        info!(txn = entry.tid(), var = entry.var(), "read blocked: no site available");
        self.blocked_on_fail.insert(entry);
        self.stats.site_blocks += 1;
        if self.options.full_output {
            self.out.emit(format!(
                "T{} blocked reading x{} (no site)",
                entry.tid(),
                entry.var()
            ));
        }
        self.tick()
    }

    // -- clock + deadlock ----------------------------------------------------

    fn tick(&mut self) -> Result<(), DbError> {
        self.time += 1;
        self.detect_deadlock()
    }

    /// Collect waits-for edges from every site and abort the youngest
    /// transaction on the first cycle found. At most one abort per tick;
    /// the abort's own tick catches any cycle that remains.
    fn detect_deadlock(&mut self) -> Result<(), DbError> {
        let mut edges = WaitsFor::new();
        for site in &self.sites {
            site.collect_edges(&mut edges);
        }
        let Some(cycle) = deadlock::find_cycle(&edges) else {
            return Ok(());
        };

        let victim = cycle
            .iter()
            .filter_map(|t| self.txns.get(t).map(|txn| (txn.start(), txn.tid())))
            .max()
            .map(|(_, tid)| tid);
        let Some(victim) = victim else {
            return Ok(());
        };

        info!(?cycle, victim, "deadlock detected, aborting youngest");
        self.stats.deadlocks_detected += 1;
        if let Some(txn) = self.txns.get_mut(&victim) {
            txn.mark_deadlocked();
        }
        self.finish(victim)
    }
}
