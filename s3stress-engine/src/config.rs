//! Validated parameters of one benchmark run.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;

use crate::autoterm::AutoTerm;
use crate::error::{Error, Result};

/// Grace period between the end of setup and the first measured operation.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(3);

/// Length of the random client id stamped on every record.
const CLIENT_ID_LEN: usize = 4;

/// Where and how the dataset of a run is persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Output {
    /// The compressed dataset file.
    pub path: PathBuf,
    /// The reconstructed invocation, stored as the dataset's leading comment.
    pub command_line: String,
    /// Stamped on every record before writing.
    pub client_id: String,
}

/// Timing and teardown parameters consumed by the lifecycle.
#[derive(Clone, Debug, PartialEq)]
pub struct RunConfig {
    /// Number of workers.
    pub concurrency: u16,
    /// Length of the measured phase.
    pub duration: Duration,
    /// Wait between setup and start when no synchronized start is configured.
    pub grace: Duration,
    /// Wall-clock instant at which all workers start.
    pub sync_start: Option<DateTime<Utc>>,
    /// End the measured phase early once throughput is stable.
    pub auto_term: Option<AutoTerm>,
    /// Run cleanup after the measured phase.
    pub cleanup: bool,
    /// Persist the collected operations.
    pub output: Option<Output>,
}

impl RunConfig {
    /// Creates a configuration with default grace, cleanup enabled and no output.
    pub fn new(concurrency: u16, duration: Duration) -> Self {
        Self {
            concurrency,
            duration,
            grace: DEFAULT_GRACE,
            sync_start: None,
            auto_term: None,
            cleanup: true,
            output: None,
        }
    }

    /// Checks the parameters before any stage begins.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::InvalidConfig(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.duration.is_zero() {
            return Err(Error::InvalidConfig("duration must be positive".into()));
        }
        Ok(())
    }
}

/// Converts a requested concurrency into the supported range `1..=65535`.
pub fn concurrency(requested: u64) -> Result<u16> {
    match u16::try_from(requested) {
        Ok(0) | Err(_) => Err(Error::InvalidConfig(format!(
            "concurrency must be between 1 and {}, got {requested}",
            u16::MAX
        ))),
        Ok(concurrency) => Ok(concurrency),
    }
}

/// Parses an `HH:MM` local time of today into an absolute instant.
///
/// A time that has already passed today is returned as is, the lifecycle falls back to starting
/// immediately in that case.
pub fn parse_sync_start(value: &str) -> Result<DateTime<Utc>> {
    let time = NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| Error::InvalidStartTime(value.to_owned()))?;
    Local::now()
        .date_naive()
        .and_time(time)
        .and_local_timezone(Local)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| Error::InvalidStartTime(value.to_owned()))
}

/// Generates a random alphanumeric client id.
pub fn client_id() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(CLIENT_ID_LEN)
        .map(char::from)
        .collect()
}

/// The default dataset file name for a run of `command` started at `now`.
pub fn dataset_name(command: &str, now: DateTime<Local>, client_id: &str) -> String {
    let stamp = now.format("%Y-%m-%d[%H%M%S]");
    format!("s3stress-{command}-{stamp}-{client_id}.csv.zst")
}

/// Appends the dataset extension to a user supplied file stem unless already present.
pub fn dataset_path(stem: &str) -> PathBuf {
    if stem.ends_with(".csv.zst") {
        PathBuf::from(stem)
    } else {
        PathBuf::from(format!("{stem}.csv.zst"))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Timelike};

    use super::*;

    #[test]
    fn validation() {
        assert!(RunConfig::new(20, Duration::from_secs(300)).validate().is_ok());
        assert!(RunConfig::new(0, Duration::from_secs(1)).validate().is_err());
        assert!(RunConfig::new(1, Duration::ZERO).validate().is_err());
    }

    #[test]
    fn concurrency_range() {
        assert_eq!(concurrency(1).unwrap(), 1);
        assert_eq!(concurrency(65535).unwrap(), 65535);
        assert!(matches!(concurrency(0), Err(Error::InvalidConfig(_))));
        assert!(matches!(concurrency(65536), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn sync_start_today() {
        let start = parse_sync_start("13:45").unwrap().with_timezone(&Local);
        assert_eq!((start.hour(), start.minute(), start.second()), (13, 45, 0));
        assert_eq!(start.date_naive(), Local::now().date_naive());
    }

    #[test]
    fn sync_start_malformed() {
        for value in ["", "25:00", "12", "12:3x", "noon"] {
            assert!(
                matches!(parse_sync_start(value), Err(Error::InvalidStartTime(_))),
                "{value}"
            );
        }
    }

    #[test]
    fn client_ids() {
        let id = client_id();
        assert_eq!(id.len(), 4);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn dataset_names() {
        let now = Local.with_ymd_and_hms(2024, 5, 1, 9, 8, 7).unwrap();
        assert_eq!(
            dataset_name("video", now, "Xa3k"),
            "s3stress-video-2024-05-01[090807]-Xa3k.csv.zst"
        );
        assert_eq!(dataset_path("out"), PathBuf::from("out.csv.zst"));
        assert_eq!(dataset_path("out.csv.zst"), PathBuf::from("out.csv.zst"));
    }
}
