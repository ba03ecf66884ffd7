use thiserror::Error;

/// Errors produced by the benchmark engine.
///
/// Everything except [`Error::Io`], [`Error::Csv`] and [`Error::Decode`] is a configuration error
/// and is reported before any stage of a run begins.
#[derive(Debug, Error)]
pub enum Error {
    /// The endpoint list resolved to nothing.
    #[error("no endpoint defined")]
    NoEndpoints,

    /// The host selection policy is not one of the known names.
    #[error("unknown host selection policy `{0}`, expected `weighted` or `roundrobin`")]
    UnknownHostSelect(String),

    /// A host pattern could not be expanded or resolved.
    #[error("invalid host `{host}`: {reason}")]
    InvalidHost {
        /// The offending host pattern.
        host: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A client could not be created for an endpoint.
    #[error("unable to create client for `{endpoint}`")]
    Connect {
        /// The endpoint address.
        endpoint: String,
        /// The underlying failure.
        #[source]
        cause: anyhow::Error,
    },

    /// The synchronized start time is not a valid `HH:MM` local time.
    #[error("unable to parse start time `{0}`, expected HH:MM")]
    InvalidStartTime(String),

    /// A run parameter is out of range.
    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),

    /// Reading or writing a dataset failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A dataset row could not be encoded or decoded.
    #[error("dataset error: {0}")]
    Csv(#[from] csv::Error),

    /// A dataset is structurally invalid.
    #[error("malformed dataset: {0}")]
    Decode(String),
}

/// A convenience alias that defaults our [`Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
