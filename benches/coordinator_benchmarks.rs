//! Criterion benchmarks for the transaction coordinator.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use repdb::{Coordinator, OutputLog, OutputOptions};

// ---------------------------------------------------------------------------
// Script generators
// ---------------------------------------------------------------------------

/// Disjoint transactions: begin, write an even variable, read it back, end.
fn uncontended_script(txns: u32) -> String {
    let mut script = String::new();
    for t in 1..=txns {
        let var = 2 * (t % 10 + 1);
        script.push_str(&format!(
            "begin(T{t})\nW(T{t},x{var},{t})\nR(T{t},x{var})\nend(T{t})\n"
        ));
    }
    script
}

/// Every transaction writes the same replicated variable, forming a long
/// wait queue drained one commit at a time.
fn conflicting_script(txns: u32) -> String {
    let mut script = String::new();
    for t in 1..=txns {
        script.push_str(&format!("begin(T{t})\nW(T{t},x2,{t})\n"));
    }
    for t in 1..=txns {
        script.push_str(&format!("end(T{t})\n"));
    }
    script
}

/// Failure churn: writes keep landing while sites drop out and return.
fn failure_churn_script(rounds: u32) -> String {
    let mut script = String::new();
    for r in 1..=rounds {
        let site = r % 10 + 1;
        script.push_str(&format!(
            "begin(T{r})\nfail({site})\nW(T{r},x4,{r})\nrecover({site})\nend(T{r})\n"
        ));
    }
    script
}

fn run_script(script: &str) -> usize {
    let mut c = Coordinator::with_output(OutputOptions::default(), OutputLog::capture());
    c.run(script.as_bytes()).expect("benchmark script runs clean");
    c.output().len()
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("uncontended_txns");
    for count in [10u32, 100, 1_000] {
        let script = uncontended_script(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &script, |b, s| {
            b.iter(|| black_box(run_script(s)));
        });
    }
    group.finish();
}

fn bench_conflicting(c: &mut Criterion) {
    let mut group = c.benchmark_group("conflicting_txns");
    for count in [10u32, 50, 200] {
        let script = conflicting_script(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &script, |b, s| {
            b.iter(|| black_box(run_script(s)));
        });
    }
    group.finish();
}

fn bench_failure_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("failure_churn");
    for rounds in [10u32, 100] {
        let script = failure_churn_script(rounds);
        group.bench_with_input(BenchmarkId::from_parameter(rounds), &script, |b, s| {
            b.iter(|| black_box(run_script(s)));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_uncontended,
    bench_conflicting,
    bench_failure_churn
);
criterion_main!(benches);
