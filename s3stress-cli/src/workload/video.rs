//! Continuous video ingestion and the capacity plan behind it.
//!
//! Every channel writes fixed-size segments at a constant bitrate. The [`CapacityPlan`] derives
//! bandwidth, retention and object counts from the channel count, bitrate and cluster capacity.
//! The [`VideoWorkload`] writes segments as fast as the endpoints accept them, laid out the way a
//! recorder would store them:
//!
//! ```text
//! [<root>/]<YYYY-MM-DD>/<obj_prefix>-ch<N>/<index>
//! ```
//!
//! The date advances by one day after a channel has written one day worth of segments.

use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bytesize::ByteSize;
use chrono::{Days, NaiveDate};
use rand::RngCore;
use s3stress_engine::{EndpointPool, Lease, Operation, Progress, Worker, Workload};

use crate::config::VideoConfig;
use crate::payload::Payload;
use crate::transport::ObjectClient;
use crate::workload::{ensure_bucket, upload};

const SECS_PER_DAY: f64 = 86_400.0;

/// The first day of simulated recordings.
const FIRST_DAY: NaiveDate = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();

/// Storage requirements of continuous video ingestion.
#[derive(Clone, Debug, PartialEq)]
pub struct CapacityPlan {
    /// Number of channels.
    pub channels: u32,
    /// Bitrate of one channel in megabits per second.
    pub bitrate_mbps: f64,
    /// Raw capacity in bytes.
    pub capacity: u64,
    /// Fraction of the capacity that may be filled.
    pub safe_water_level: f64,
    /// Size of one segment in bytes.
    pub obj_size: u64,
    /// Capacity that may be filled, in bytes.
    pub usable: f64,
    /// Number of segments that fit into the usable capacity.
    pub object_budget: u64,
    /// Bytes per second of one channel.
    pub channel_bandwidth: f64,
    /// Bytes per second of all channels.
    pub total_bandwidth: f64,
    /// Bytes written per day by all channels.
    pub bytes_per_day: f64,
    /// Days of footage the usable capacity holds.
    pub retention_days: f64,
    /// Configured retention, if any.
    pub required_retention_days: Option<u32>,
    /// Segments one channel writes per day.
    pub objects_per_channel_per_day: f64,
    /// Time between two segments of one channel.
    pub object_interval: Duration,
}

impl CapacityPlan {
    /// Computes the plan for `config`.
    ///
    /// Fails if any of the channel count, bitrate or segment size is zero, if the safe water
    /// level is not within `(0, 1]`, or if the bitrate is too low to time a single segment.
    pub fn new(config: &VideoConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(config.channels > 0, "at least one channel is required");
        anyhow::ensure!(
            config.bitrate_mbps.is_finite() && config.bitrate_mbps > 0.0,
            "bitrate must be positive"
        );
        anyhow::ensure!(config.obj_size.as_u64() > 0, "object size must be positive");
        anyhow::ensure!(
            config.safe_water_level > 0.0 && config.safe_water_level <= 1.0,
            "safe water level must be within (0, 1]"
        );

        let obj_size = config.obj_size.as_u64();
        let usable = config.capacity.as_u64() as f64 * config.safe_water_level;
        let channel_bandwidth = config.bitrate_mbps * 1_000_000.0 / 8.0;
        let total_bandwidth = channel_bandwidth * f64::from(config.channels);
        let bytes_per_day = total_bandwidth * SECS_PER_DAY;
        let object_interval = Duration::try_from_secs_f64(obj_size as f64 / channel_bandwidth)
            .context("object interval out of range, bitrate too low")?;

        Ok(Self {
            channels: config.channels,
            bitrate_mbps: config.bitrate_mbps,
            capacity: config.capacity.as_u64(),
            safe_water_level: config.safe_water_level,
            obj_size,
            usable,
            object_budget: (usable / obj_size as f64) as u64,
            channel_bandwidth,
            total_bandwidth,
            bytes_per_day,
            retention_days: usable / bytes_per_day,
            required_retention_days: (config.retention_days > 0).then_some(config.retention_days),
            objects_per_channel_per_day: channel_bandwidth * SECS_PER_DAY / obj_size as f64,
            object_interval,
        })
    }

    /// Capacity needed to hold the configured retention, if one is configured.
    pub fn required_capacity(&self) -> Option<u64> {
        let days = self.required_retention_days?;
        Some((self.bytes_per_day * f64::from(days) / self.safe_water_level) as u64)
    }

    /// Whole segments per channel and day, at least one.
    fn segments_per_day(&self) -> u64 {
        (self.objects_per_channel_per_day as u64).max(1)
    }

    /// The plan as labelled values, in display order.
    pub fn summary(&self) -> Vec<(&'static str, String)> {
        let bytes = |value: f64| ByteSize::b(value as u64).to_string();
        let mut summary = vec![
            ("channels", self.channels.to_string()),
            ("bitrate per channel", format!("{} Mbit/s", self.bitrate_mbps)),
            ("bandwidth per channel", format!("{}/s", bytes(self.channel_bandwidth))),
            ("total bandwidth", format!("{}/s", bytes(self.total_bandwidth))),
            ("data per day", bytes(self.bytes_per_day)),
            ("raw capacity", ByteSize::b(self.capacity).to_string()),
            (
                "safe water level",
                format!("{:.0}%", self.safe_water_level * 100.0),
            ),
            ("usable capacity", bytes(self.usable)),
            ("object size", ByteSize::b(self.obj_size).to_string()),
            ("object budget", self.object_budget.to_string()),
            (
                "objects per channel per day",
                format!("{:.2}", self.objects_per_channel_per_day),
            ),
            ("object interval", format!("{:.2?}", self.object_interval)),
            ("retention", format!("{:.2} days", self.retention_days)),
        ];

        if let (Some(days), Some(capacity)) =
            (self.required_retention_days, self.required_capacity())
        {
            summary.push(("required retention", format!("{days} days")));
            summary.push(("required capacity", ByteSize::b(capacity).to_string()));
        }
        summary
    }
}

/// Every worker records one channel and uploads its segments back to back.
#[derive(Debug)]
pub struct VideoWorkload<C> {
    bucket: String,
    plan: CapacityPlan,
    obj_prefix: String,
    idx_width: usize,
    root: Option<String>,
    clear: bool,
    written: Vec<AtomicU64>,
    client: PhantomData<fn() -> C>,
}

impl<C> VideoWorkload<C> {
    /// Creates the workload and its capacity plan from `config`.
    pub fn new(config: &VideoConfig, bucket: &str, clear: bool) -> anyhow::Result<Self> {
        let plan = CapacityPlan::new(config).context("invalid video settings")?;
        let root = config
            .single_root
            .as_deref()
            .map(|root| root.trim_matches('/'))
            .filter(|root| !root.is_empty())
            .map(str::to_owned);

        Ok(Self {
            bucket: bucket.to_owned(),
            written: (0..plan.channels).map(|_| AtomicU64::new(0)).collect(),
            plan,
            obj_prefix: config.obj_prefix.clone(),
            idx_width: config.idx_width,
            root,
            clear,
            client: PhantomData,
        })
    }

    /// The capacity plan of this workload.
    pub fn plan(&self) -> &CapacityPlan {
        &self.plan
    }

    fn channel_name(&self, channel: u32) -> String {
        format!("{}-ch{channel}", self.obj_prefix)
    }

    /// The directory holding the segments `channel` recorded on `day`.
    fn day_prefix(&self, channel: &str, day: u64) -> String {
        let date = FIRST_DAY + Days::new(day);
        match &self.root {
            Some(root) => format!("{root}/{}/{channel}/", date.format("%Y-%m-%d")),
            None => format!("{}/{channel}/", date.format("%Y-%m-%d")),
        }
    }

    fn key(&self, channel: u32, index: u64) -> String {
        let day = index / self.plan.segments_per_day();
        format!(
            "{}{index:0width$}",
            self.day_prefix(&self.channel_name(channel), day),
            width = self.idx_width
        )
    }
}

#[async_trait]
impl<C: ObjectClient> Workload for VideoWorkload<C> {
    type Client = C;

    fn name(&self) -> &str {
        "video"
    }

    async fn prepare(&self, pool: &EndpointPool<C>, progress: &Progress) -> anyhow::Result<()> {
        ensure_bucket(pool, &self.bucket, self.clear, progress).await
    }

    fn partition(&self, worker: u16) -> String {
        self.channel_name(u32::from(worker) % self.plan.channels)
    }

    async fn step(&self, worker: &mut Worker, client: &Lease<C>) -> Operation {
        let channel = u32::from(worker.id) % self.plan.channels;
        let index = self.written[channel as usize].fetch_add(1, Ordering::Relaxed);
        let payload = Payload::new(self.plan.obj_size, rand::rng().next_u64());
        upload(client, worker, &self.bucket, self.key(channel, index), payload).await
    }

    async fn cleanup(
        &self,
        pool: &EndpointPool<C>,
        partitions: &BTreeSet<String>,
    ) -> anyhow::Result<()> {
        let client = pool.client(0);
        for channel in 0..self.plan.channels {
            let name = self.channel_name(channel);
            if !partitions.contains(&name) {
                continue;
            }

            let written = self.written[channel as usize].load(Ordering::Relaxed);
            let days = written.div_ceil(self.plan.segments_per_day());
            for day in 0..days {
                let prefix = self.day_prefix(&name, day);
                let removed = client
                    .delete_prefix(&self.bucket, &prefix)
                    .await
                    .with_context(|| format!("unable to delete prefix `{prefix}`"))?;
                tracing::debug!(prefix, removed, "removed segments");
            }
        }
        Ok(())
    }
}
