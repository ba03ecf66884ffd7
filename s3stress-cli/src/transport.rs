//! The object protocol the workloads speak.
//!
//! [`ObjectClient`] is the seam between workloads and the wire. The binary uses
//! [`HttpClient`](crate::http::HttpClient); unit tests use an in-memory implementation.

use async_trait::async_trait;
use thiserror::Error;

use crate::payload::Payload;

/// Errors returned by an [`ObjectClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request could not be sent or its response could not be read.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The bucket to create exists already.
    #[error("bucket `{0}` already exists")]
    BucketExists(String),

    /// The bucket or object does not exist.
    #[error("`{0}` not found")]
    NotFound(String),

    /// The credentials were rejected.
    #[error("access denied")]
    Unauthorized,

    /// The service responded with an unexpected status code.
    #[error("unexpected status {status} for `{path}`")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// The requested path.
        path: String,
    },

    /// The response body is not what the protocol prescribes.
    #[error("malformed response: {0:?}")]
    Response(String),
}

/// A connection to one storage endpoint.
#[async_trait]
pub trait ObjectClient: Send + Sync + 'static {
    /// Creates `bucket`.
    async fn create_bucket(&self, bucket: &str) -> Result<(), ClientError>;

    /// Uploads `payload` as `key`, returning the size the service stored.
    async fn put_object(&self, bucket: &str, key: &str, payload: Payload)
    -> Result<u64, ClientError>;

    /// Downloads `key`, returning the number of bytes received.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<u64, ClientError>;

    /// Removes `key`.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ClientError>;

    /// Removes every object whose key starts with `prefix`, returning how many were removed.
    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> Result<u64, ClientError>;
}
