//! Early termination once throughput has stabilized.
//!
//! The monitor buckets completed operations of one kind into fixed-length windows, keyed by the
//! end time of each operation relative to the first one observed. Whenever a new window opens,
//! the two windows before it are complete and their rates are compared. If both hold enough
//! samples, the minimum duration has elapsed and the rates agree within the threshold, the run
//! is considered stable.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::operation::{OpType, Operation};

/// How many windows make up the minimum duration by default.
const WINDOWS_PER_MIN_DURATION: u32 = 7;

/// The smallest window used by default.
const MIN_WINDOW: Duration = Duration::from_millis(250);

/// Minimum number of successful operations per window by default.
const DEFAULT_MIN_SAMPLES: u64 = 5;

/// Parameters for auto-termination.
#[derive(Clone, Debug, PartialEq)]
pub struct AutoTerm {
    /// The operation kind whose throughput is watched.
    pub op: OpType,
    /// Allowed relative deviation between adjacent windows, `0.075` for 7.5%.
    pub threshold: f64,
    /// No termination before this much time has passed since the first operation.
    pub min_duration: Duration,
    /// Length of one window.
    pub window: Duration,
    /// Minimum number of successful operations in each compared window.
    pub min_samples: u64,
}

impl AutoTerm {
    /// Creates parameters from a percentage and a minimum duration.
    ///
    /// The window length is derived from the minimum duration.
    pub fn new(op: OpType, pct: f64, min_duration: Duration) -> Result<Self> {
        if !(pct > 0.0 && pct.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "autoterm percentage must be positive, got {pct}"
            )));
        }
        if min_duration.is_zero() {
            return Err(Error::InvalidConfig(
                "autoterm duration must be positive".into(),
            ));
        }

        Ok(Self {
            op,
            threshold: pct / 100.0,
            min_duration,
            window: (min_duration / WINDOWS_PER_MIN_DURATION).max(MIN_WINDOW),
            min_samples: DEFAULT_MIN_SAMPLES,
        })
    }

    /// Overrides the window length.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window.max(Duration::from_millis(1));
        self
    }

    /// Overrides the minimum sample count per window.
    pub fn with_min_samples(mut self, min_samples: u64) -> Self {
        self.min_samples = min_samples;
        self
    }
}

/// What the stable rate is measured in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateUnit {
    /// Bytes per second.
    Bytes,
    /// Operations per second.
    Operations,
}

/// Signals that two adjacent windows agreed.
#[derive(Clone, Debug, PartialEq)]
pub struct Convergence {
    /// Rate of the most recent complete window.
    pub rate: f64,
    /// Unit of `rate`.
    pub unit: RateUnit,
    /// Time since the first observed operation.
    pub elapsed: Duration,
}

impl fmt::Display for Convergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            RateUnit::Bytes => write!(f, "{:.1} MiB/s", self.rate / (1024.0 * 1024.0)),
            RateUnit::Operations => write!(f, "{:.1} ops/s", self.rate),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Window {
    index: u64,
    ops: u64,
    bytes: u64,
}

/// Watches a stream of operations for stable throughput.
#[derive(Debug)]
pub struct AutoTermMonitor {
    config: AutoTerm,
    origin: Option<DateTime<Utc>>,
    windows: VecDeque<Window>,
}

impl AutoTermMonitor {
    /// Creates a monitor that has not seen any operation yet.
    pub fn new(config: AutoTerm) -> Self {
        Self {
            config,
            origin: None,
            windows: VecDeque::new(),
        }
    }

    /// The parameters of this monitor.
    pub fn config(&self) -> &AutoTerm {
        &self.config
    }

    /// Feeds one operation, returning `Some` once throughput is stable.
    pub fn observe(&mut self, op: &Operation) -> Option<Convergence> {
        if op.op != self.config.op || op.is_error() {
            return None;
        }

        let origin = *self.origin.get_or_insert(op.start);
        let elapsed = (op.end - origin).to_std().unwrap_or_default();
        let index = (elapsed.as_nanos() / self.config.window.as_nanos()) as u64;

        let opened = match self.windows.back() {
            Some(back) if index <= back.index => false,
            _ => {
                self.windows.push_back(Window {
                    index,
                    ops: 0,
                    bytes: 0,
                });
                true
            }
        };

        // Operations finishing late for an already evaluated window still count towards it if
        // the window is retained, otherwise they are dropped.
        if let Some(window) = self.windows.iter_mut().rev().find(|w| w.index == index) {
            window.ops += 1;
            window.bytes += op.size;
        }

        if !opened {
            return None;
        }

        while self
            .windows
            .front()
            .is_some_and(|w| w.index + 3 < index)
        {
            self.windows.pop_front();
        }

        if elapsed < self.config.min_duration || index < 2 {
            return None;
        }
        self.evaluate(index - 2, index - 1, elapsed)
    }

    fn evaluate(&self, older: u64, newer: u64, elapsed: Duration) -> Option<Convergence> {
        let find = |index| self.windows.iter().find(|w| w.index == index).copied();
        let (older, newer) = (find(older)?, find(newer)?);
        if older.ops < self.config.min_samples || newer.ops < self.config.min_samples {
            return None;
        }

        let secs = self.config.window.as_secs_f64();
        let (unit, base, other) = if older.bytes > 0 && newer.bytes > 0 {
            (RateUnit::Bytes, newer.bytes as f64, older.bytes as f64)
        } else {
            (RateUnit::Operations, newer.ops as f64, older.ops as f64)
        };
        let (base, other) = (base / secs, other / secs);

        ((base - other).abs() <= self.config.threshold * base).then_some(Convergence {
            rate: base,
            unit,
            elapsed,
        })
    }
}
