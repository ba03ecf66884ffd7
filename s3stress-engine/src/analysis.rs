//! Per-operation-kind statistics over a collected dataset.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sketches_ddsketch::DDSketch;

use crate::operation::{OpType, Operation, Operations};

/// Aggregated statistics for one kind of operation.
pub struct OpSummary {
    /// The operation kind.
    pub op: OpType,
    /// Number of successful operations.
    pub ops: u64,
    /// Number of failed operations.
    pub errors: u64,
    /// Bytes transferred by successful operations.
    pub bytes: u64,
    /// Objects touched by successful operations.
    pub objects: u64,
    /// Start of the earliest operation.
    pub first_start: DateTime<Utc>,
    /// End of the latest operation.
    pub last_end: DateTime<Utc>,
    /// Successful operations per endpoint.
    pub endpoints: BTreeMap<String, u64>,
    /// Latency of successful operations, in seconds.
    pub latency: DDSketch,
}

impl OpSummary {
    fn new(op: &Operation) -> Self {
        Self {
            op: op.op,
            ops: 0,
            errors: 0,
            bytes: 0,
            objects: 0,
            first_start: op.start,
            last_end: op.end,
            endpoints: BTreeMap::new(),
            latency: DDSketch::default(),
        }
    }

    fn add(&mut self, op: &Operation) {
        self.first_start = self.first_start.min(op.start);
        self.last_end = self.last_end.max(op.end);

        if op.is_error() {
            self.errors += 1;
            return;
        }
        self.ops += 1;
        self.bytes += op.size;
        self.objects += u64::from(op.obj_per_op);
        *self.endpoints.entry(op.endpoint.clone()).or_default() += 1;
        self.latency.add(op.duration().as_secs_f64());
    }

    /// Time between the first start and the last end.
    pub fn active(&self) -> Duration {
        (self.last_end - self.first_start).to_std().unwrap_or_default()
    }

    /// Successful operations per second of active time.
    pub fn ops_per_sec(&self) -> f64 {
        per_sec(self.ops as f64, self.active())
    }

    /// Bytes per second of active time.
    pub fn bytes_per_sec(&self) -> f64 {
        per_sec(self.bytes as f64, self.active())
    }

    /// Mean latency of successful operations.
    pub fn latency_avg(&self) -> Option<Duration> {
        let count = self.latency.count();
        let sum = self.latency.sum()?;
        (count > 0).then(|| Duration::from_secs_f64(sum / count as f64))
    }

    /// Latency at quantile `q` of successful operations.
    pub fn latency_quantile(&self, q: f64) -> Option<Duration> {
        let secs = self.latency.quantile(q).ok()??;
        Some(Duration::from_secs_f64(secs.max(0.0)))
    }
}

impl fmt::Debug for OpSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpSummary")
            .field("op", &self.op)
            .field("ops", &self.ops)
            .field("errors", &self.errors)
            .field("bytes", &self.bytes)
            .field("objects", &self.objects)
            .field("first_start", &self.first_start)
            .field("last_end", &self.last_end)
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

fn per_sec(value: f64, duration: Duration) -> f64 {
    match duration.as_secs_f64() {
        secs if secs > 0.0 => value / secs,
        _ => 0.0,
    }
}

/// Summarizes `ops` per operation kind, in [`OpType::ALL`] order.
pub fn analyze(ops: &Operations) -> Vec<OpSummary> {
    let mut summaries: BTreeMap<OpType, OpSummary> = BTreeMap::new();
    for op in ops {
        summaries
            .entry(op.op)
            .or_insert_with(|| OpSummary::new(op))
            .add(op);
    }
    summaries.into_values().collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn op(kind: OpType, start_ms: i64, latency_ms: i64, size: u64, error: bool) -> Operation {
        let base = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let start = base + TimeDelta::milliseconds(start_ms);
        Operation {
            op: kind,
            thread: 0,
            client_id: String::new(),
            obj_per_op: 1,
            size,
            endpoint: format!("node{}", start_ms % 2),
            file: String::new(),
            error: error.then(|| "boom".to_owned()),
            start,
            end: start + TimeDelta::milliseconds(latency_ms),
        }
    }

    #[test]
    fn summary_per_kind() {
        let mut ops: Vec<_> = (0..100)
            .map(|i| op(OpType::Put, i * 100, 100, 1000, false))
            .collect();
        ops.push(op(OpType::Put, 50, 10, 1000, true));
        ops.push(op(OpType::Get, 0, 20, 500, false));

        let summaries = analyze(&Operations::new(ops));
        assert_eq!(summaries.len(), 2);

        let put = &summaries[0];
        assert_eq!(put.op, OpType::Put);
        assert_eq!((put.ops, put.errors, put.bytes), (100, 1, 100_000));
        assert_eq!(put.active(), Duration::from_secs(10));
        assert_eq!(put.ops_per_sec(), 10.0);
        assert_eq!(put.bytes_per_sec(), 10_000.0);
        assert_eq!(put.endpoints["node0"], 100);

        let p50 = put.latency_quantile(0.5).unwrap();
        assert!(p50.abs_diff(Duration::from_millis(100)) < Duration::from_millis(2));
        let avg = put.latency_avg().unwrap();
        assert!(avg.abs_diff(Duration::from_millis(100)) < Duration::from_millis(1));

        assert_eq!(summaries[1].op, OpType::Get);
    }

    #[test]
    fn only_errors() {
        let summaries = analyze(&Operations::new(vec![op(OpType::Delete, 0, 5, 0, true)]));
        let delete = &summaries[0];
        assert_eq!((delete.ops, delete.errors), (0, 1));
        assert!(delete.latency_avg().is_none());
        assert!(delete.latency_quantile(0.99).is_none());
        assert_eq!(delete.ops_per_sec(), 0.0);
    }

    #[test]
    fn empty() {
        assert!(analyze(&Operations::default()).is_empty());
    }
}
