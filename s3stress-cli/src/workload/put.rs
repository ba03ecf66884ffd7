//! Uploads objects as fast as possible.

use std::collections::BTreeSet;
use std::marker::PhantomData;

use anyhow::Context;
use async_trait::async_trait;
use rand::distr::Alphanumeric;
use rand::{Rng, RngCore};
use s3stress_engine::{EndpointPool, Lease, Operation, Progress, Worker, Workload};

use crate::config::PutConfig;
use crate::payload::{ObjectSize, Payload};
use crate::transport::ObjectClient;
use crate::workload::{ensure_bucket, upload};

/// Length of the random per-worker key prefix.
const PREFIX_LEN: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq)]
enum KeyPrefix {
    Random,
    Shared(String),
    None,
}

/// Every worker uploads objects under its own key prefix.
#[derive(Debug)]
pub struct PutWorkload<C> {
    bucket: String,
    size: ObjectSize,
    prefix: KeyPrefix,
    clear: bool,
    client: PhantomData<fn() -> C>,
}

impl<C> PutWorkload<C> {
    /// Creates the workload from its configuration.
    ///
    /// With `clear` set, the bucket is emptied during prepare.
    pub fn new(config: &PutConfig, bucket: &str, clear: bool) -> anyhow::Result<Self> {
        let size = match &config.size_distribution {
            Some(distribution) => {
                ObjectSize::log_normal(distribution.p50.as_u64(), distribution.p99.as_u64())
                    .context("invalid size distribution")?
            }
            None => {
                anyhow::ensure!(config.obj_size.as_u64() > 0, "object size must be positive");
                ObjectSize::Fixed(config.obj_size.as_u64())
            }
        };

        let prefix = match (&config.prefix, config.noprefix) {
            (_, true) => KeyPrefix::None,
            (Some(prefix), false) => KeyPrefix::Shared(prefix.trim_matches('/').to_owned()),
            (None, false) => KeyPrefix::Random,
        };

        Ok(Self {
            bucket: bucket.to_owned(),
            size,
            prefix,
            clear,
            client: PhantomData,
        })
    }
}

fn key_prefix(partition: &str) -> String {
    if partition.is_empty() {
        String::new()
    } else {
        format!("{partition}/")
    }
}

#[async_trait]
impl<C: ObjectClient> Workload for PutWorkload<C> {
    type Client = C;

    fn name(&self) -> &str {
        "put"
    }

    async fn prepare(&self, pool: &EndpointPool<C>, progress: &Progress) -> anyhow::Result<()> {
        ensure_bucket(pool, &self.bucket, self.clear, progress).await
    }

    fn partition(&self, _worker: u16) -> String {
        match &self.prefix {
            KeyPrefix::Random => rand::rng()
                .sample_iter(Alphanumeric)
                .take(PREFIX_LEN)
                .map(char::from)
                .collect(),
            KeyPrefix::Shared(prefix) => prefix.clone(),
            KeyPrefix::None => String::new(),
        }
    }

    async fn step(&self, worker: &mut Worker, client: &Lease<C>) -> Operation {
        let (len, seed) = {
            let mut rng = rand::rng();
            (self.size.sample(&mut rng), rng.next_u64())
        };
        let key = format!(
            "{}{}-{}.obj",
            key_prefix(&worker.partition),
            worker.id,
            worker.iteration
        );
        upload(client, worker, &self.bucket, key, Payload::new(len, seed)).await
    }

    async fn cleanup(
        &self,
        pool: &EndpointPool<C>,
        partitions: &BTreeSet<String>,
    ) -> anyhow::Result<()> {
        let client = pool.client(0);
        for partition in partitions {
            let removed = client
                .delete_prefix(&self.bucket, &key_prefix(partition))
                .await
                .with_context(|| format!("unable to delete prefix `{partition}`"))?;
            tracing::debug!(partition, removed, "removed objects");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytesize::ByteSize;
    use s3stress_engine::{Endpoint, HostSelect};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::SizeDistribution;
    use crate::payload::Payload;
    use crate::transport::memory::MemoryClient;

    fn pool(truncate_by: u64) -> EndpointPool<MemoryClient> {
        EndpointPool::new(vec![Endpoint::new("mem")], HostSelect::Weighted, |_| {
            Ok(MemoryClient {
                truncate_by,
                ..Default::default()
            })
        })
        .unwrap()
    }

    fn worker(workload: &PutWorkload<MemoryClient>, id: u16) -> Worker {
        Worker {
            id,
            partition: workload.partition(id),
            iteration: 0,
            stop: CancellationToken::new(),
        }
    }

    fn config(size: u64) -> PutConfig {
        PutConfig {
            obj_size: ByteSize::b(size),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn prepare_creates_and_clears() {
        let pool = pool(0);
        let workload = PutWorkload::new(&config(100), "bench", true).unwrap();

        workload.prepare(&pool, &Progress::detached()).await.unwrap();
        let client = pool.client(0);
        client
            .put_object("bench", "old", Payload::new(1, 0))
            .await
            .unwrap();

        workload.prepare(&pool, &Progress::detached()).await.unwrap();
        assert!(client.keys("bench").is_empty());
    }

    #[tokio::test]
    async fn uploads_under_worker_prefix() {
        let pool = pool(0);
        let workload = PutWorkload::new(&config(100), "bench", false).unwrap();
        workload.prepare(&pool, &Progress::detached()).await.unwrap();

        let mut worker = worker(&workload, 3);
        assert_eq!(worker.partition.len(), PREFIX_LEN);
        worker.iteration = 7;

        let op = workload.step(&mut worker, &pool.acquire()).await;
        assert_eq!(op.error, None);
        assert_eq!(op.size, 100);
        assert_eq!(op.thread, 3);
        assert_eq!(op.endpoint, "mem");
        assert_eq!(op.file, format!("{}/3-7.obj", worker.partition));
        assert_eq!(pool.client(0).keys("bench"), [op.file]);
    }

    #[tokio::test]
    async fn short_upload_is_an_error() {
        let pool = pool(1);
        let workload = PutWorkload::new(&config(100), "bench", false).unwrap();
        workload.prepare(&pool, &Progress::detached()).await.unwrap();

        let mut worker = worker(&workload, 0);
        let op = workload.step(&mut worker, &pool.acquire()).await;
        assert_eq!(op.error.as_deref(), Some("short upload. want: 100, got: 99"));
    }

    #[tokio::test]
    async fn missing_bucket_is_recorded() {
        let pool = pool(0);
        let workload = PutWorkload::new(&config(10), "bench", false).unwrap();

        let mut worker = worker(&workload, 0);
        let op = workload.step(&mut worker, &pool.acquire()).await;
        assert!(op.is_error());
        assert!(op.end >= op.start);
    }

    #[test]
    fn prefix_modes() {
        let workload = PutWorkload::<MemoryClient>::new(&config(1), "bench", false).unwrap();
        assert_ne!(workload.partition(0), workload.partition(1));

        let shared = PutConfig {
            prefix: Some("/runs/a/".to_owned()),
            ..config(1)
        };
        let workload = PutWorkload::<MemoryClient>::new(&shared, "bench", false).unwrap();
        assert_eq!(workload.partition(0), "runs/a");

        let none = PutConfig {
            noprefix: true,
            ..shared
        };
        let workload = PutWorkload::<MemoryClient>::new(&none, "bench", false).unwrap();
        assert_eq!(workload.partition(5), "");
    }

    #[test]
    fn invalid_sizes() {
        assert!(PutWorkload::<MemoryClient>::new(&config(0), "bench", false).is_err());

        let distribution = PutConfig {
            size_distribution: Some(SizeDistribution {
                p50: ByteSize::mib(1),
                p99: ByteSize::kib(1),
            }),
            ..config(1)
        };
        assert!(PutWorkload::<MemoryClient>::new(&distribution, "bench", false).is_err());
    }

    #[tokio::test]
    async fn cleanup_removes_touched_prefixes() {
        let pool = pool(0);
        let workload = PutWorkload::new(&config(10), "bench", false).unwrap();
        workload.prepare(&pool, &Progress::detached()).await.unwrap();

        let client = pool.client(0);
        for key in ["a/0-0.obj", "a/0-1.obj", "b/1-0.obj", "other"] {
            client
                .put_object("bench", key, Payload::new(1, 0))
                .await
                .unwrap();
        }

        let partitions = BTreeSet::from(["a".to_owned(), "b".to_owned()]);
        workload.cleanup(&pool, &partitions).await.unwrap();
        assert_eq!(client.keys("bench"), ["other"]);
    }
}
