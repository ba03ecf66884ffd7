//! Configuration for the s3stress benchmark tool.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `S3STRESS__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! See [`Config`] for a description of all configuration fields and their defaults.
//!
//! # Environment Variables
//!
//! Environment variables use `S3STRESS__` as a prefix and double underscores (`__`) to denote
//! nested configuration structures. For example:
//!
//! - `S3STRESS__ENDPOINT=node{1...4}:9000` benchmarks four hosts
//! - `S3STRESS__CONCURRENCY=64` runs 64 workers
//! - `S3STRESS__PUT__OBJ_SIZE=1MiB` uploads objects of one MiB
//!
//! # YAML Configuration File
//!
//! The above configuration in YAML format would look like this:
//!
//! ```yaml
//! endpoint: node{1...4}:9000
//! concurrency: 64
//!
//! put:
//!   obj_size: 1MiB
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use bytesize::ByteSize;
use chrono::Local;
use figment::providers::{Env, Format, Serialized, Yaml};
use humantime_serde::re::humantime::format_duration;
use s3stress_engine::config::{self as run, Output};
use s3stress_engine::endpoint::{self, Endpoint, Secret};
use s3stress_engine::{AutoTerm, HostSelect, OpType, RunConfig};
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "S3STRESS__";

/// Name of the binary, used when reconstructing the command line.
const PROGRAM: &str = "s3stress";

/// Printed in place of credentials in the reconstructed command line.
const REDACTED: &str = "*REDACTED*";

/// Ends the measured phase early once throughput is stable.
///
/// Used in: [`Config::autoterm`]
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct AutoTermConfig {
    /// Allowed deviation between consecutive throughput samples, in percent.
    ///
    /// # Default
    ///
    /// `7.5`
    #[serde(default = "default_autoterm_pct")]
    pub pct: f64,

    /// Minimum time the throughput has to be stable.
    ///
    /// # Default
    ///
    /// `10s`
    #[serde(default = "default_autoterm_dur", with = "humantime_serde")]
    pub dur: Duration,
}

fn default_autoterm_pct() -> f64 {
    7.5
}

fn default_autoterm_dur() -> Duration {
    Duration::from_secs(10)
}

/// Size parameters of a log-normal object size distribution.
///
/// Used in: [`PutConfig::size_distribution`]
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SizeDistribution {
    /// Median object size.
    pub p50: ByteSize,
    /// 99th percentile object size.
    pub p99: ByteSize,
}

/// Parameters of the `put` workload.
///
/// Used in: [`Config::put`]
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PutConfig {
    /// Size of each uploaded object, unless a distribution is configured.
    ///
    /// # Default
    ///
    /// `10MiB`
    ///
    /// # Environment Variable
    ///
    /// `S3STRESS__PUT__OBJ_SIZE`
    pub obj_size: ByteSize,

    /// Draw object sizes from a log-normal distribution instead of using a fixed size.
    ///
    /// # Environment Variables
    ///
    /// - `S3STRESS__PUT__SIZE_DISTRIBUTION__P50=16KiB`
    /// - `S3STRESS__PUT__SIZE_DISTRIBUTION__P99=1MiB`
    pub size_distribution: Option<SizeDistribution>,

    /// Key prefix shared by all workers. Each worker gets a random prefix if unset.
    pub prefix: Option<String>,

    /// Upload all objects without any key prefix.
    pub noprefix: bool,
}

impl Default for PutConfig {
    fn default() -> Self {
        Self {
            obj_size: ByteSize::mib(10),
            size_distribution: None,
            prefix: None,
            noprefix: false,
        }
    }
}

/// Parameters of the `video` workload and its capacity plan.
///
/// Used in: [`Config::video`]
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    /// Number of simulated camera channels.
    pub channels: u32,
    /// Bitrate of one channel in megabits per second.
    pub bitrate_mbps: f64,
    /// Raw capacity of the storage cluster.
    pub capacity: ByteSize,
    /// Fraction of the capacity that may be filled, between `0` and `1`.
    pub safe_water_level: f64,
    /// Days of footage to retain. `0` derives the retention from the capacity.
    pub retention_days: u32,
    /// Size of one video segment object.
    pub obj_size: ByteSize,
    /// Prefix of the per-channel directory names.
    pub obj_prefix: String,
    /// Width of the zero-padded segment index in object keys.
    pub idx_width: usize,
    /// Common root directory for all channels.
    pub single_root: Option<String>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            channels: 16,
            bitrate_mbps: 4.0,
            capacity: ByteSize::tib(10),
            safe_water_level: 0.9,
            retention_days: 0,
            obj_size: ByteSize::mib(64),
            obj_prefix: "video".to_owned(),
            idx_width: 8,
            single_root: None,
        }
    }
}

/// Main configuration struct for the benchmark tool.
///
/// This is the top-level configuration that combines all settings. Every field can be set via a
/// YAML file or an environment variable named after the field, for example
/// `S3STRESS__BUCKET=bench`.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Comma separated list of hosts. Entries may contain `{N...M}` ranges.
    ///
    /// # Default
    ///
    /// `127.0.0.1:9000`
    pub endpoint: String,

    /// Access key sent with every request.
    pub access_key: String,

    /// Secret key belonging to the access key.
    pub secret_key: SecretBox<Secret>,

    /// Talk HTTPS to the endpoints.
    pub tls: bool,

    /// Skip TLS certificate verification.
    pub insecure: bool,

    /// Region name sent with every request.
    pub region: Option<String>,

    /// Endpoint selection policy, `weighted` or `roundrobin`.
    ///
    /// # Default
    ///
    /// `weighted`
    pub host_select: String,

    /// Resolve every host to all its IP addresses and use each as an endpoint.
    pub resolve_host: bool,

    /// Bucket the workloads operate on.
    ///
    /// # Default
    ///
    /// `s3stress-bucket`
    pub bucket: String,

    /// Number of concurrent workers.
    ///
    /// # Default
    ///
    /// `20`
    pub concurrency: u64,

    /// Length of the measured phase.
    ///
    /// # Default
    ///
    /// `5m`
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Wait between setup and the first measured operation.
    ///
    /// # Default
    ///
    /// `3s`
    #[serde(with = "humantime_serde")]
    pub grace: Duration,

    /// Start all workers at this local time of today, formatted `HH:MM`.
    pub syncstart: Option<String>,

    /// End the measured phase early once throughput is stable.
    ///
    /// # Environment Variables
    ///
    /// - `S3STRESS__AUTOTERM__PCT=7.5`
    /// - `S3STRESS__AUTOTERM__DUR=10s`
    pub autoterm: Option<AutoTermConfig>,

    /// Do not empty the bucket before the run.
    pub noclear: bool,

    /// Leave the uploaded objects in place after the run.
    pub keep_data: bool,

    /// File stem of the dataset. A name is generated if unset.
    pub benchdata: Option<String>,

    /// Parameters of the `put` workload.
    pub put: PutConfig,

    /// Parameters of the `video` workload.
    pub video: VideoConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:9000".to_owned(),
            access_key: String::new(),
            secret_key: Secret::default().boxed(),
            tls: false,
            insecure: false,
            region: None,
            host_select: HostSelect::default().to_string(),
            resolve_host: false,
            bucket: "s3stress-bucket".to_owned(),
            concurrency: 20,
            duration: Duration::from_secs(5 * 60),
            grace: run::DEFAULT_GRACE,
            syncstart: None,
            autoterm: None,
            noclear: false,
            keep_data: false,
            benchdata: None,
            put: PutConfig::default(),
            video: VideoConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided in `args`)
    /// 3. Environment variables (prefixed with `S3STRESS__`)
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The YAML configuration file cannot be read or parsed
    /// - Environment variables contain invalid values
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// The endpoint selection policy.
    pub fn host_select(&self) -> Result<HostSelect> {
        Ok(self.host_select.parse()?)
    }

    /// Expands the host list into endpoints, resolving DNS names if configured.
    pub async fn endpoints(&self) -> Result<Vec<Endpoint>> {
        let mut hosts = endpoint::parse_hosts(&self.endpoint)?;
        if self.resolve_host {
            hosts = endpoint::resolve_hosts(&hosts).await?;
        }
        if hosts.is_empty() {
            return Err(s3stress_engine::Error::NoEndpoints.into());
        }

        let endpoints = hosts
            .into_iter()
            .map(|host| Endpoint {
                host,
                access_key: self.access_key.clone(),
                secret_key: self.secret_key.clone(),
                tls: self.tls,
                insecure: self.insecure,
                region: self.region.clone(),
            })
            .collect();
        Ok(endpoints)
    }

    /// Converts the timing and output settings into the engine's run parameters.
    pub fn run_config(&self, command: &str) -> Result<RunConfig> {
        let mut config = RunConfig::new(run::concurrency(self.concurrency)?, self.duration);
        config.grace = self.grace;
        config.cleanup = !self.keep_data;

        if let Some(syncstart) = &self.syncstart {
            config.sync_start = Some(run::parse_sync_start(syncstart)?);
        }
        if let Some(autoterm) = &self.autoterm {
            let auto_term = AutoTerm::new(OpType::Put, autoterm.pct, autoterm.dur)
                .context("invalid autoterm settings")?;
            config.auto_term = Some(auto_term);
        }

        let client_id = run::client_id();
        let path = match &self.benchdata {
            Some(stem) => run::dataset_path(stem),
            None => run::dataset_name(command, Local::now(), &client_id).into(),
        };
        config.output = Some(Output {
            path,
            command_line: self.command_line(command),
            client_id,
        });

        config.validate()?;
        Ok(config)
    }

    /// Reconstructs an invocation that reproduces this configuration.
    ///
    /// Every setting that differs from its default becomes an environment assignment in front of
    /// the program, quoted for a POSIX shell. Credentials are redacted.
    pub fn command_line(&self, command: &str) -> String {
        let defaults = Config::default().settings();
        let mut line = String::new();

        for ((key, value), (_, default)) in self.settings().into_iter().zip(defaults) {
            if value == default {
                continue;
            }
            let value = match key {
                "access_key" | "secret_key" => REDACTED.to_owned(),
                _ => value,
            };
            let var = format!("{ENV_PREFIX}{}", key.replace('.', "__").to_uppercase());
            line.push_str(&format!("{var}={} ", shell_quote(&value)));
        }

        line.push_str(&format!("{PROGRAM} {command}"));
        line
    }

    /// All settings as `(key, value)` pairs, in a fixed order.
    fn settings(&self) -> Vec<(&'static str, String)> {
        let optional = |value: &Option<String>| value.clone().unwrap_or_default();
        let (autoterm_pct, autoterm_dur) = match &self.autoterm {
            Some(autoterm) => (
                autoterm.pct.to_string(),
                format_duration(autoterm.dur).to_string(),
            ),
            None => (String::new(), String::new()),
        };
        let (p50, p99) = match &self.put.size_distribution {
            Some(distribution) => (
                distribution.p50.as_u64().to_string(),
                distribution.p99.as_u64().to_string(),
            ),
            None => (String::new(), String::new()),
        };
        let video = &self.video;

        vec![
            ("endpoint", self.endpoint.clone()),
            ("access_key", self.access_key.clone()),
            ("secret_key", self.secret_key.expose_secret().as_str().to_owned()),
            ("tls", self.tls.to_string()),
            ("insecure", self.insecure.to_string()),
            ("region", optional(&self.region)),
            ("host_select", self.host_select.clone()),
            ("resolve_host", self.resolve_host.to_string()),
            ("bucket", self.bucket.clone()),
            ("concurrency", self.concurrency.to_string()),
            ("duration", format_duration(self.duration).to_string()),
            ("grace", format_duration(self.grace).to_string()),
            ("syncstart", optional(&self.syncstart)),
            ("autoterm.pct", autoterm_pct),
            ("autoterm.dur", autoterm_dur),
            ("noclear", self.noclear.to_string()),
            ("keep_data", self.keep_data.to_string()),
            ("benchdata", optional(&self.benchdata)),
            ("put.obj_size", self.put.obj_size.as_u64().to_string()),
            ("put.size_distribution.p50", p50),
            ("put.size_distribution.p99", p99),
            ("put.prefix", optional(&self.put.prefix)),
            ("put.noprefix", self.put.noprefix.to_string()),
            ("video.channels", video.channels.to_string()),
            ("video.bitrate_mbps", video.bitrate_mbps.to_string()),
            ("video.capacity", video.capacity.as_u64().to_string()),
            ("video.safe_water_level", video.safe_water_level.to_string()),
            ("video.retention_days", video.retention_days.to_string()),
            ("video.obj_size", video.obj_size.as_u64().to_string()),
            ("video.obj_prefix", video.obj_prefix.clone()),
            ("video.idx_width", video.idx_width.to_string()),
            ("video.single_root", optional(&video.single_root)),
        ]
    }
}

/// Quotes `value` for a POSIX shell unless it consists of safe characters only.
fn shell_quote(value: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "_-.,:/@%+".contains(c);
    if !value.is_empty() && value.chars().all(safe) {
        value.to_owned()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None).unwrap();
            assert_eq!(config.settings(), Config::default().settings());
            assert_eq!(config.concurrency, 20);
            assert_eq!(config.duration, Duration::from_secs(300));
            assert_eq!(config.host_select().unwrap(), HostSelect::Weighted);
            assert_eq!(config.command_line("put"), "s3stress put");

            Ok(())
        });
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("S3STRESS__ENDPOINT", "node{1...3}:9000");
            jail.set_env("S3STRESS__ACCESS_KEY", "minio");
            jail.set_env("S3STRESS__SECRET_KEY", "hunter2");
            jail.set_env("S3STRESS__HOST_SELECT", "weighed");
            jail.set_env("S3STRESS__CONCURRENCY", "64");
            jail.set_env("S3STRESS__DURATION", "30s");
            jail.set_env("S3STRESS__PUT__OBJ_SIZE", "1MiB");
            jail.set_env("S3STRESS__AUTOTERM__PCT", "5");
            jail.set_env("S3STRESS__AUTOTERM__DUR", "15s");

            let config = Config::load(None).unwrap();

            assert_eq!(config.endpoint, "node{1...3}:9000");
            assert_eq!(config.secret_key.expose_secret().as_str(), "hunter2");
            assert!(!format!("{config:?}").contains("hunter2"));
            assert_eq!(config.host_select().unwrap(), HostSelect::Weighted);
            assert_eq!(config.concurrency, 64);
            assert_eq!(config.duration, Duration::from_secs(30));
            assert_eq!(config.put.obj_size, ByteSize::mib(1));
            assert_eq!(
                config.autoterm,
                Some(AutoTermConfig {
                    pct: 5.0,
                    dur: Duration::from_secs(15)
                })
            );

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            endpoint: localhost:9000
            bucket: bench
            syncstart: "13:45"
            keep_data: true
            put:
                noprefix: true
                size_distribution:
                    p50: 16KiB
                    p99: 1MiB
            video:
                channels: 100
                single_root: cams
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path())).unwrap();

            assert_eq!(config.bucket, "bench");
            assert_eq!(config.syncstart.as_deref(), Some("13:45"));
            assert!(config.keep_data);
            assert!(config.put.noprefix);
            assert_eq!(
                config.put.size_distribution,
                Some(SizeDistribution {
                    p50: ByteSize::kib(16),
                    p99: ByteSize::mib(1),
                })
            );
            assert_eq!(config.video.channels, 100);
            assert_eq!(config.video.single_root.as_deref(), Some("cams"));
            assert_eq!(config.video.obj_prefix, "video");

            Ok(())
        });
    }

    #[test]
    fn configured_with_env_and_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            bucket: from-yaml
            concurrency: 8
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("S3STRESS__BUCKET", "from-env");
            let config = Config::load(Some(tempfile.path())).unwrap();

            assert_eq!(config.bucket, "from-env");
            assert_eq!(config.concurrency, 8);

            Ok(())
        });
    }

    #[test]
    fn command_line_lists_changes() {
        let config = Config {
            access_key: "minio".to_owned(),
            secret_key: Secret::from("hunter2").boxed(),
            concurrency: 4,
            duration: Duration::from_secs(90),
            put: PutConfig {
                prefix: Some("bench".to_owned()),
                ..Default::default()
            },
            ..Default::default()
        };

        assert_eq!(
            config.command_line("put"),
            "S3STRESS__ACCESS_KEY='*REDACTED*' S3STRESS__SECRET_KEY='*REDACTED*' \
             S3STRESS__CONCURRENCY=4 S3STRESS__DURATION='1m 30s' S3STRESS__PUT__PREFIX=bench \
             s3stress put"
        );
    }

    /// Splits a shell command line into words, honoring single quotes.
    fn shell_words(line: &str) -> Vec<String> {
        let mut words = Vec::new();
        let mut word = None::<String>;
        let mut quoted = false;
        let mut chars = line.chars();
        while let Some(c) = chars.next() {
            match c {
                '\'' => {
                    quoted = !quoted;
                    word.get_or_insert_default();
                }
                '\\' if !quoted => word.get_or_insert_default().extend(chars.next()),
                ' ' if !quoted => words.extend(word.take()),
                c => word.get_or_insert_default().push(c),
            }
        }
        words.extend(word);
        words
    }

    #[test]
    fn command_line_replays() {
        let config = Config {
            endpoint: "node{1...2}:9000".to_owned(),
            host_select: "roundrobin".to_owned(),
            concurrency: 4,
            duration: Duration::from_millis(90_500),
            syncstart: Some("13:45".to_owned()),
            autoterm: Some(AutoTermConfig {
                pct: 2.5,
                dur: Duration::from_secs(15),
            }),
            keep_data: true,
            put: PutConfig {
                obj_size: ByteSize::b(1_234_567),
                size_distribution: Some(SizeDistribution {
                    p50: ByteSize::kib(16),
                    p99: ByteSize::mib(1),
                }),
                prefix: Some("it's".to_owned()),
                ..Default::default()
            },
            video: VideoConfig {
                bitrate_mbps: 2.5,
                single_root: Some("cams".to_owned()),
                ..Default::default()
            },
            ..Default::default()
        };

        let line = config.command_line("video");
        let words = shell_words(&line);
        let (assignments, invocation) = words.split_last_chunk::<2>().unwrap();
        assert_eq!(*invocation, ["s3stress", "video"]);
        assert!(line.contains("S3STRESS__PUT__PREFIX='it'\\''s'"));

        figment::Jail::expect_with(|jail| {
            for assignment in assignments {
                let (var, value) = assignment.split_once('=').unwrap();
                jail.set_env(var, value);
            }

            let replayed = Config::load(None).unwrap();
            assert_eq!(replayed.settings(), config.settings());
            assert_eq!(replayed.command_line("video"), line);

            Ok(())
        });
    }

    #[test]
    fn run_config_conversion() {
        let config = Config {
            concurrency: 4,
            duration: Duration::from_secs(10),
            keep_data: true,
            benchdata: Some("results".to_owned()),
            autoterm: Some(AutoTermConfig {
                pct: 7.5,
                dur: Duration::from_secs(5),
            }),
            ..Default::default()
        };

        let run = config.run_config("put").unwrap();
        assert_eq!(run.concurrency, 4);
        assert_eq!(run.grace, run::DEFAULT_GRACE);
        assert!(!run.cleanup);
        assert!(run.auto_term.is_some());

        let output = run.output.unwrap();
        assert_eq!(output.path, Path::new("results.csv.zst"));
        assert_eq!(output.client_id.len(), 4);
        assert!(output.command_line.starts_with("s3stress put "));
    }

    #[test]
    fn generated_dataset_name() {
        let run = Config::default().run_config("video").unwrap();
        let output = run.output.unwrap();
        let name = output.path.to_str().unwrap();

        assert!(name.starts_with("s3stress-video-"));
        assert!(name.ends_with(&format!("-{}.csv.zst", output.client_id)));
    }

    #[test]
    fn invalid_settings() {
        let config = Config {
            concurrency: 0,
            ..Default::default()
        };
        assert!(config.run_config("put").is_err());

        let config = Config {
            concurrency: 70_000,
            ..Default::default()
        };
        assert!(config.run_config("put").is_err());

        let config = Config {
            syncstart: Some("noon".to_owned()),
            ..Default::default()
        };
        assert!(config.run_config("put").is_err());

        let config = Config {
            host_select: "random".to_owned(),
            ..Default::default()
        };
        assert!(config.host_select().is_err());

        let config = Config {
            autoterm: Some(AutoTermConfig {
                pct: 0.0,
                dur: Duration::from_secs(1),
            }),
            ..Default::default()
        };
        assert!(config.run_config("put").is_err());
    }

    #[tokio::test]
    async fn expands_endpoints() {
        let config = Config {
            endpoint: "node{1...2}:9000,other".to_owned(),
            access_key: "minio".to_owned(),
            tls: true,
            ..Default::default()
        };

        let endpoints = config.endpoints().await.unwrap();
        let hosts: Vec<_> = endpoints.iter().map(|e| e.host.as_str()).collect();
        assert_eq!(hosts, ["node1:9000", "node2:9000", "other"]);
        assert!(endpoints.iter().all(|e| e.tls && e.access_key == "minio"));

        let config = Config {
            endpoint: " , ".to_owned(),
            ..Default::default()
        };
        assert!(config.endpoints().await.is_err());
    }
}
