//! Per-operation statistics for an export

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Operations the export counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Lookup,
    Create,
    Mkdir,
    Readdir,
    Getattr,
    Setattr,
    Rename,
    Unlink,
    Release,
    Open,
    Close,
    HandleToWire,
    CreateHandle,
    /// read, write, commit, reopen
    Io,
}

impl Op {
    pub const COUNT: usize = 14;

    pub const ALL: [Op; Op::COUNT] = [
        Op::Lookup,
        Op::Create,
        Op::Mkdir,
        Op::Readdir,
        Op::Getattr,
        Op::Setattr,
        Op::Rename,
        Op::Unlink,
        Op::Release,
        Op::Open,
        Op::Close,
        Op::HandleToWire,
        Op::CreateHandle,
        Op::Io,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Op::Lookup => "lookup",
            Op::Create => "create",
            Op::Mkdir => "mkdir",
            Op::Readdir => "readdir",
            Op::Getattr => "getattr",
            Op::Setattr => "setattr",
            Op::Rename => "rename",
            Op::Unlink => "unlink",
            Op::Release => "release",
            Op::Open => "open",
            Op::Close => "close",
            Op::HandleToWire => "handle_to_wire",
            Op::CreateHandle => "create_handle",
            Op::Io => "io",
        }
    }
}

/// Counters for one operation.
#[derive(Debug, Default)]
pub struct OpStats {
    /// Total request count
    pub requests: AtomicU64,
    /// Requests that returned an error
    pub errors: AtomicU64,
    /// Sum of all request latencies in microseconds
    pub latency_us_total: AtomicU64,
}

impl OpStats {
    pub fn record(&self, ok: bool, latency_us: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.latency_us_total
            .fetch_add(latency_us, Ordering::Relaxed);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn avg_latency_us(&self) -> u64 {
        let reqs = self.requests();
        if reqs == 0 {
            return 0;
        }
        self.latency_us_total.load(Ordering::Relaxed) / reqs
    }
}

/// Point-in-time copy of one operation's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpSnapshot {
    pub op: &'static str,
    pub requests: u64,
    pub errors: u64,
    pub avg_latency_us: u64,
}

/// Counters for every [`Op`] of one export.
#[derive(Debug, Default)]
pub struct ExportStats {
    ops: [OpStats; Op::COUNT],
}

impl ExportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op(&self, op: Op) -> &OpStats {
        &self.ops[op as usize]
    }

    /// Starts timing one request; finish it with [`OpTimer::finish`].
    pub fn start(&self, op: Op) -> OpTimer<'_> {
        OpTimer {
            stats: self.op(op),
            started: Instant::now(),
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.ops.iter().map(OpStats::requests).sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.ops.iter().map(OpStats::errors).sum()
    }

    pub fn snapshot(&self) -> Vec<OpSnapshot> {
        Op::ALL
            .iter()
            .map(|op| {
                let s = self.op(*op);
                OpSnapshot {
                    op: op.name(),
                    requests: s.requests(),
                    errors: s.errors(),
                    avg_latency_us: s.avg_latency_us(),
                }
            })
            .collect()
    }
}

/// In-flight request timer.
pub struct OpTimer<'a> {
    stats: &'a OpStats,
    started: Instant,
}

impl OpTimer<'_> {
    /// Records the outcome and passes the result through.
    pub fn finish<T, E>(self, result: Result<T, E>) -> Result<T, E> {
        let latency_us = self.started.elapsed().as_micros() as u64;
        self.stats.record(result.is_ok(), latency_us);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_indices_match_all() {
        for (i, op) in Op::ALL.iter().enumerate() {
            assert_eq!(*op as usize, i);
        }
    }

    #[test]
    fn test_record_counts_errors() {
        let stats = ExportStats::new();
        stats.op(Op::Lookup).record(true, 10);
        stats.op(Op::Lookup).record(false, 30);
        stats.op(Op::Mkdir).record(true, 5);
        assert_eq!(stats.op(Op::Lookup).requests(), 2);
        assert_eq!(stats.op(Op::Lookup).errors(), 1);
        assert_eq!(stats.op(Op::Lookup).avg_latency_us(), 20);
        assert_eq!(stats.total_requests(), 3);
        assert_eq!(stats.total_errors(), 1);
    }

    #[test]
    fn test_timer_passes_result_through() {
        let stats = ExportStats::new();
        let ok: Result<u32, &str> = stats.start(Op::Rename).finish(Ok(7));
        assert_eq!(ok, Ok(7));
        let err: Result<u32, &str> = stats.start(Op::Rename).finish(Err("nope"));
        assert_eq!(err, Err("nope"));
        assert_eq!(stats.op(Op::Rename).requests(), 2);
        assert_eq!(stats.op(Op::Rename).errors(), 1);
    }

    #[test]
    fn test_snapshot_lists_every_op() {
        let stats = ExportStats::new();
        stats.op(Op::Io).record(false, 0);
        let snap = stats.snapshot();
        assert_eq!(snap.len(), Op::COUNT);
        let io = snap.iter().find(|s| s.op == "io").unwrap();
        assert_eq!(io.errors, 1);
        assert_eq!(stats.op(Op::Open).avg_latency_us(), 0);
    }
}
