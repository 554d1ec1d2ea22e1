//! Script command grammar.
//!
//! Commands are matched case-insensitively with all spaces and tabs
//! stripped; any line may end in a `//` comment. A line that is blank or
//! comment-only parses to no command. Anything else is a parse error that
//! aborts the run.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::error::DbError;
use crate::core::{SiteId, TxnId, Value, VarId};

/// One scripted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Begin { tid: TxnId },
    BeginRo { tid: TxnId },
    Read { tid: TxnId, var: VarId },
    Write { tid: TxnId, var: VarId, value: Value },
    End { tid: TxnId },
    DumpAll,
    DumpSite { site: SiteId },
    DumpVar { var: VarId },
    Fail { site: SiteId },
    Recover { site: SiteId },
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Begin,
    BeginRo,
    Read,
    Write,
    End,
    DumpAll,
    DumpSite,
    DumpVar,
    Fail,
    Recover,
    Blank,
}

/// Pattern table, tried in order. Every pattern anchors at the start of the
/// normalized line and tolerates a trailing `//` comment.
static PATTERNS: LazyLock<Vec<(Kind, Regex)>> = LazyLock::new(|| {
    let pat = |p: &str| Regex::new(p).expect("static command pattern compiles");
    vec![
        (Kind::Begin, pat(r"^begin\(t([0-9]+)\)(?://|$)")),
        (Kind::BeginRo, pat(r"^beginro\(t([0-9]+)\)(?://|$)")),
        (Kind::Read, pat(r"^r\(t([0-9]+),x([0-9]+)\)(?://|$)")),
        (Kind::Write, pat(r"^w\(t([0-9]+),x([0-9]+),([0-9]+)\)(?://|$)")),
        (Kind::DumpAll, pat(r"^dump\(\)(?://|$)")),
        (Kind::DumpSite, pat(r"^dump\(([0-9]+)\)(?://|$)")),
        (Kind::DumpVar, pat(r"^dump\(x([0-9]+)\)(?://|$)")),
        (Kind::End, pat(r"^end\(t([0-9]+)\)(?://|$)")),
        (Kind::Fail, pat(r"^fail\(([0-9]+)\)(?://|$)")),
        (Kind::Recover, pat(r"^recover\(([0-9]+)\)(?://|$)")),
        (Kind::Blank, pat(r"^(?://|$)")),
    ]
});

/// Parse one script line. `Ok(None)` is a blank or comment-only line.
pub fn parse_line(line: &str, line_no: usize) -> Result<Option<Command>, DbError> {
    let normalized: String = line
        .to_lowercase()
        .chars()
        .filter(|&c| c != ' ' && c != '\t')
        .collect();

    let err = || DbError::Parse {
        line_no,
        line: line.trim_end().to_string(),
    };

    for (kind, pattern) in PATTERNS.iter() {
        let Some(caps) = pattern.captures(&normalized) else {
            continue;
        };
        let num = |i: usize| caps[i].parse::<u32>().map_err(|_| err());
        let val = |i: usize| caps[i].parse::<Value>().map_err(|_| err());
        return Ok(Some(match kind {
            Kind::Begin => Command::Begin { tid: num(1)? },
            Kind::BeginRo => Command::BeginRo { tid: num(1)? },
            Kind::Read => Command::Read {
                tid: num(1)?,
                var: num(2)?,
            },
            Kind::Write => Command::Write {
                tid: num(1)?,
                var: num(2)?,
                value: val(3)?,
            },
            Kind::End => Command::End { tid: num(1)? },
            Kind::DumpAll => Command::DumpAll,
            Kind::DumpSite => Command::DumpSite { site: num(1)? },
            Kind::DumpVar => Command::DumpVar { var: num(1)? },
            Kind::Fail => Command::Fail { site: num(1)? },
            Kind::Recover => Command::Recover { site: num(1)? },
            Kind::Blank => return Ok(None),
        }));
    }

    Err(err())
}
