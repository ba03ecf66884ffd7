//! Benchmarks runnable from the command line.
//!
//! - [`put::PutWorkload`] uploads objects of a fixed or log-normally distributed size.
//! - [`video::VideoWorkload`] simulates continuous ingestion of video segments.

use s3stress_engine::{EndpointPool, Lease, OpType, Operation, Progress, Worker};

use crate::payload::Payload;
use crate::transport::{ClientError, ObjectClient};

pub mod put;
pub mod video;

/// Creates `bucket` on the first endpoint, and empties it if `clear` is set.
pub(crate) async fn ensure_bucket<C: ObjectClient>(
    pool: &EndpointPool<C>,
    bucket: &str,
    clear: bool,
    progress: &Progress,
) -> anyhow::Result<()> {
    let client = pool.client(0);
    match client.create_bucket(bucket).await {
        Ok(()) => tracing::info!(bucket, "created bucket"),
        Err(ClientError::BucketExists(_)) => tracing::debug!(bucket, "bucket exists"),
        Err(err) => return Err(err.into()),
    }
    progress.set(0.5);

    if clear {
        let removed = client.delete_prefix(bucket, "").await?;
        tracing::info!(bucket, removed, "cleared bucket");
    }
    Ok(())
}

/// Uploads `payload` as `key` and measures the request.
pub(crate) async fn upload<C: ObjectClient>(
    client: &Lease<C>,
    worker: &Worker,
    bucket: &str,
    key: String,
    payload: Payload,
) -> Operation {
    let size = payload.len;
    let mut op = Operation::begin(OpType::Put, worker.id, client.host());
    op.size = size;

    match client.put_object(bucket, &key, payload).await {
        Ok(stored) if stored != size => {
            op.fail(format!("short upload. want: {size}, got: {stored}"))
        }
        Ok(_) => {}
        Err(err) => op.fail(err),
    }
    op.finish();

    op.file = key;
    op
}
