//! Property-based tests using proptest.
//!
//! Random command streams run against the invariants that must hold after
//! every command, whatever the interleaving of conflicts, failures, and
//! recoveries.

use proptest::prelude::*;

use crate::core::lock::{LockMode, WaitsFor};
use crate::parser::Command;
use crate::runtime::deadlock;
use crate::runtime::output::{OutputLog, OutputOptions};
use crate::Coordinator;

// ---------------------------------------------------------------------------
// Command-stream generator
// ---------------------------------------------------------------------------

const TIDS: u32 = 6;

fn arb_command() -> impl Strategy<Value = Command> {
    prop_oneof![
        (1..=TIDS).prop_map(|tid| Command::Begin { tid }),
        (1..=TIDS).prop_map(|tid| Command::BeginRo { tid }),
        (1..=TIDS, 1u32..=20).prop_map(|(tid, var)| Command::Read { tid, var }),
        (1..=TIDS, 1u32..=20, 0i64..1000)
            .prop_map(|(tid, var, value)| Command::Write { tid, var, value }),
        (1..=TIDS).prop_map(|tid| Command::End { tid }),
        (1u32..=10).prop_map(|site| Command::Fail { site }),
        (1u32..=10).prop_map(|site| Command::Recover { site }),
        Just(Command::DumpAll),
    ]
}

/// Drive a command stream, skipping commands a script generator cannot aim
/// sensibly (re-begins of live transactions, accesses to unknown or
/// read-only ones).
fn drive(coordinator: &mut Coordinator, commands: &[Command]) {
    for &cmd in commands {
        let skip = match cmd {
            Command::Begin { tid } | Command::BeginRo { tid } => {
                coordinator.transaction(tid).is_some()
            }
            Command::Read { tid, .. } => coordinator.transaction(tid).is_none(),
            Command::Write { tid, .. } => coordinator
                .transaction(tid)
                .map_or(true, |t| t.is_read_only()),
            _ => false,
        };
        if skip {
            continue;
        }
        coordinator.exec(cmd).unwrap();
        check_invariants(coordinator);
    }
}

// ---------------------------------------------------------------------------
// Invariants
// ---------------------------------------------------------------------------

fn check_invariants(c: &Coordinator) {
    for site in c.sites() {
        for (var, slot) in site.lock_table().slots() {
            // At most one write holder, and never alongside another holder.
            let writers = slot
                .holders()
                .iter()
                .filter(|&&(m, _)| m == LockMode::Write)
                .count();
            assert!(writers <= 1, "site {} x{}: {} writers", site.id(), var, writers);
            if writers == 1 {
                assert_eq!(
                    slot.holders().len(),
                    1,
                    "site {} x{}: write holder not exclusive",
                    site.id(),
                    var
                );
            }

            // Down sites hold no locks at all.
            if !site.is_up() {
                assert!(slot.holders().is_empty() && slot.waiters().is_empty());
            }

            // Lock participants are live read-write transactions.
            for &(_, tid) in slot.holders().iter().chain(slot.waiters()) {
                let txn = c
                    .transaction(tid)
                    .unwrap_or_else(|| panic!("T{} in a slot but not active", tid));
                assert!(!txn.is_read_only(), "read-only T{} owns a lock", tid);
            }
        }

        for var in 1..=20 {
            let Some(cell) = site.cell(var) else { continue };
            // Chains are strictly decreasing and never run ahead of the
            // clock.
            for pair in cell.versions().windows(2) {
                assert!(pair[0].version > pair[1].version);
            }
            assert!(cell.latest().version <= c.time());
            if let Some(cut) = cell.fail_version() {
                if cell.is_readable() {
                    assert!(cell.latest().version > cut);
                }
            }
        }
    }

    // Recorded lock holds match the slots.
    for tid in c.active_tids() {
        let txn = c.transaction(tid).unwrap();
        for &(site, var) in txn.read_locks() {
            let slot = c.site(site).lock_table().slot(var).unwrap();
            assert!(
                slot.holders().contains(&(LockMode::Read, tid)),
                "T{} records a read hold on x{} at site {} the slot lacks",
                tid,
                var,
                site
            );
        }
        for &(site, var) in txn.write_locks() {
            let slot = c.site(site).lock_table().slot(var).unwrap();
            assert!(
                slot.holders().contains(&(LockMode::Write, tid)),
                "T{} records a write hold on x{} at site {} the slot lacks",
                tid,
                var,
                site
            );
        }
    }

    // Parked accesses reference live transactions.
    for entry in c.blocked_on_fail().iter().chain(c.blocked_on_lock()) {
        assert!(c.transaction(entry.tid()).is_some());
    }

    // The detector left no cycle behind.
    let mut edges = WaitsFor::new();
    for site in c.sites() {
        site.collect_edges(&mut edges);
    }
    assert_eq!(deadlock::find_cycle(&edges), None);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    /// Every invariant holds after every command of any stream.
    #[test]
    fn invariants_hold_for_any_stream(commands in prop::collection::vec(arb_command(), 0..60)) {
        let mut c = Coordinator::with_output(OutputOptions::default(), OutputLog::capture());
        drive(&mut c, &commands);
    }

    /// Two consecutive dumps always produce identical output.
    #[test]
    fn dump_is_idempotent_after_any_stream(commands in prop::collection::vec(arb_command(), 0..40)) {
        let mut c = Coordinator::with_output(OutputOptions::default(), OutputLog::capture());
        drive(&mut c, &commands);

        let before = c.output().len();
        c.exec(Command::DumpAll).unwrap();
        let first: Vec<String> = c.output()[before..].to_vec();
        let middle = c.output().len();
        c.exec(Command::DumpAll).unwrap();
        let second: Vec<String> = c.output()[middle..].to_vec();
        prop_assert_eq!(first, second);
    }

    /// Minimum output is a subsequence of full output restricted to reads,
    /// commits, aborts, and dump lines.
    #[test]
    fn min_output_is_a_projection_of_full(commands in prop::collection::vec(arb_command(), 0..40)) {
        let mut full = Coordinator::with_output(OutputOptions::default(), OutputLog::capture());
        drive(&mut full, &commands);

        let min_options = OutputOptions { full_output: false, ..OutputOptions::default() };
        let mut min = Coordinator::with_output(min_options, OutputLog::capture());
        drive(&mut min, &commands);

        let projected: Vec<String> = full
            .output()
            .iter()
            .filter(|l| !l.contains("blocked") && !l.contains('='))
            .map(|l| {
                // Full output tags reads with the transaction id.
                match l.find(" (T") {
                    Some(pos) if l.starts_with('x') => l[..pos].to_string(),
                    _ => l.clone(),
                }
            })
            .map(|l| match l.find(" (") {
                // Abort reasons are a full-output suffix too.
                Some(pos) if l.contains("aborts") => l[..pos].to_string(),
                _ => l,
            })
            .collect();
        prop_assert_eq!(projected, min.output().to_vec());
    }
}
