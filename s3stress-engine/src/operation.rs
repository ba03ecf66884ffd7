//! Measured operations and ordered sets of them.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error text recorded for failures that did not describe themselves.
pub const UNKNOWN_ERROR: &str = "unknown error";

/// The kind of request an [`Operation`] measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpType {
    /// Object upload.
    Put,
    /// Object download.
    Get,
    /// Object removal.
    Delete,
    /// Object metadata lookup.
    Stat,
    /// Listing of a prefix.
    List,
}

impl OpType {
    /// All operation kinds, in display order.
    pub const ALL: [OpType; 5] = [Self::Put, Self::Get, Self::Delete, Self::Stat, Self::List];

    /// The uppercase wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Put => "PUT",
            Self::Get => "GET",
            Self::Delete => "DELETE",
            Self::Stat => "STAT",
            Self::List => "LIST",
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown operation `{s}`"))
    }
}

/// One measured unit of work.
///
/// Created by a worker when a step begins, completed when it ends, and immutable once it has
/// been handed to the collector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// What kind of request this was.
    pub op: OpType,
    /// Index of the worker that executed the operation.
    pub thread: u16,
    /// Identifier of the process that produced the dataset.
    pub client_id: String,
    /// Number of objects this operation touched.
    #[serde(rename = "n_objects")]
    pub obj_per_op: u32,
    /// Bytes transferred.
    #[serde(rename = "bytes")]
    pub size: u64,
    /// Identifier of the endpoint that served the request.
    pub endpoint: String,
    /// Key of the object, if any.
    pub file: String,
    /// Failure description, `None` if the operation succeeded.
    pub error: Option<String>,
    /// When the request was issued.
    pub start: DateTime<Utc>,
    /// When the response was complete.
    pub end: DateTime<Utc>,
}

impl Operation {
    /// Starts measuring an operation now.
    pub fn begin(op: OpType, thread: u16, endpoint: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            op,
            thread,
            client_id: String::new(),
            obj_per_op: 1,
            size: 0,
            endpoint: endpoint.into(),
            file: String::new(),
            error: None,
            start: now,
            end: now,
        }
    }

    /// Stops the clock on this operation.
    pub fn finish(&mut self) {
        self.end = Utc::now();
    }

    /// Records a failure, keeping the first one if several are reported.
    ///
    /// An empty error text is replaced with [`UNKNOWN_ERROR`], since an empty error column
    /// reads as success.
    pub fn fail(&mut self, error: impl fmt::Display) {
        if self.error.is_none() {
            let error = error.to_string();
            self.error = Some(if error.is_empty() {
                UNKNOWN_ERROR.to_owned()
            } else {
                error
            });
        }
    }

    /// Whether the operation failed.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Wall-clock duration of the operation.
    pub fn duration(&self) -> Duration {
        (self.end - self.start).to_std().unwrap_or_default()
    }
}

/// An ordered sequence of operations.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Operations(Vec<Operation>);

impl Operations {
    /// Wraps operations in arrival order.
    pub fn new(ops: Vec<Operation>) -> Self {
        Self(ops)
    }

    /// Sorts by start time. The sort is stable, operations starting at the same instant keep
    /// their arrival order.
    pub fn sort_by_start_time(&mut self) {
        self.0.sort_by_key(|op| op.start);
    }

    /// Whether the operations are ordered by start time.
    pub fn is_sorted_by_start_time(&self) -> bool {
        self.0.is_sorted_by_key(|op| op.start)
    }

    /// Stamps every operation with the id of the producing process.
    pub fn set_client_id(&mut self, client_id: &str) {
        for op in &mut self.0 {
            op.client_id.clear();
            op.client_id.push_str(client_id);
        }
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no operations.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over all operations.
    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.0.iter()
    }

    /// Number of failed operations.
    pub fn errors(&self) -> usize {
        self.0.iter().filter(|op| op.is_error()).count()
    }

    /// Earliest start and latest end over all operations.
    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.0.iter().map(|op| op.start).min()?;
        let end = self.0.iter().map(|op| op.end).max()?;
        Some((start, end))
    }
}

impl<'a> IntoIterator for &'a Operations {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<Operation> for Operations {
    fn from_iter<T: IntoIterator<Item = Operation>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
