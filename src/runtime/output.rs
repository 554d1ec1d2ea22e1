//! The user-visible output channel and its mode toggles.
//!
//! Every output line is produced synchronously by the command that caused
//! it. The sink either prints to stdout (diagnostics go to stderr, so
//! stdout stays the deterministic command log) or captures lines for tests.

/// Output-mode toggles from the CLI.
#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    /// Full output adds write confirmations, blocked notifications, abort
    /// reasons, and transaction tags on reads.
    pub full_output: bool,
    /// Gates write-related lines; only meaningful with full output.
    pub log_writes: bool,
    /// Treat newly recovered, not-yet-restored sites as still down when a
    /// write fails to lock only those sites.
    pub recovered_site_opt: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            full_output: true,
            log_writes: true,
            recovered_site_opt: true,
        }
    }
}

impl OutputOptions {
    /// Whether write confirmations and blocked-write lines are emitted.
    pub fn writes_logged(&self) -> bool {
        self.full_output && self.log_writes
    }
}

/// Where committed reads, commits, aborts, and dump lines go.
#[derive(Debug)]
pub enum OutputLog {
    Stdout,
    Capture(Vec<String>),
}

impl OutputLog {
    pub fn stdout() -> Self {
        OutputLog::Stdout
    }

    pub fn capture() -> Self {
        OutputLog::Capture(Vec::new())
    }

    pub fn emit(&mut self, line: String) {
        match self {
            OutputLog::Stdout => println!("{}", line),
            OutputLog::Capture(lines) => lines.push(line),
        }
    }

    /// Captured lines; empty for the stdout sink.
    pub fn lines(&self) -> &[String] {
        match self {
            OutputLog::Stdout => &[],
            OutputLog::Capture(lines) => lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_logging_requires_full_output() {
        let mut opts = OutputOptions::default();
        assert!(opts.writes_logged());
        opts.full_output = false;
        assert!(!opts.writes_logged());
        opts.full_output = true;
        opts.log_writes = false;
        assert!(!opts.writes_logged());
    }

    #[test]
    fn test_capture_collects_lines() {
        let mut log = OutputLog::capture();
        log.emit("x1: 10".into());
        log.emit("T1 commits".into());
        assert_eq!(log.lines(), ["x1: 10", "T1 commits"]);
    }
}
