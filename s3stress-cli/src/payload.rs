//! Generated object contents and object size distributions.

use std::pin::Pin;
use std::{io, task};

use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};
use rand_distr::{Distribution, LogNormal};
use tokio::io::{AsyncRead, ReadBuf};

/// Randomized contents of an object.
///
/// The contents are produced on the fly and never buffered, so the payload can be streamed as a
/// request body of any size.
#[derive(Debug, Clone)]
pub struct Payload {
    /// The remaining length of the payload in bytes.
    pub len: u64,
    /// The RNG used to fill the payload with random bytes.
    pub rng: SmallRng,
}

impl Payload {
    /// Creates a payload of `len` bytes with contents determined by `seed`.
    pub fn new(len: u64, seed: u64) -> Self {
        Self {
            len,
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl AsyncRead for Payload {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> task::Poll<io::Result<()>> {
        let len_to_fill = (buf.remaining() as u64).min(self.len) as usize;

        let fill_buf = buf.initialize_unfilled_to(len_to_fill);
        self.rng.fill_bytes(fill_buf);

        self.len -= len_to_fill as u64;
        buf.advance(len_to_fill);

        task::Poll::Ready(Ok(()))
    }
}

/// How large generated objects are.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ObjectSize {
    /// Every object has the same size.
    Fixed(u64),
    /// Sizes follow a log-normal distribution, modelling many small objects with a long tail of
    /// larger ones.
    LogNormal(LogNormal<f64>),
}

impl ObjectSize {
    /// A log-normal distribution with the given median and 99th percentile.
    pub fn log_normal(p50: u64, p99: u64) -> anyhow::Result<Self> {
        anyhow::ensure!(p50 > 0, "p50 object size must be positive");
        anyhow::ensure!(p99 >= p50, "p99 object size must not be below p50");

        // Inspired by <https://stats.stackexchange.com/a/649432>
        let mu = (p50 as f64).ln();
        let sigma = ((p99 as f64).ln() - mu) / 2.3263;
        Ok(Self::LogNormal(LogNormal::new(mu, sigma)?))
    }

    /// Draws the size of the next object, at least one byte.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        match self {
            Self::Fixed(size) => *size,
            Self::LogNormal(distribution) => (distribution.sample(rng) as u64).max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn payload_is_deterministic() {
        let mut first = Vec::new();
        Payload::new(10_000, 7).read_to_end(&mut first).await.unwrap();
        let mut second = Vec::new();
        Payload::new(10_000, 7).read_to_end(&mut second).await.unwrap();

        assert_eq!(first.len(), 10_000);
        assert_eq!(first, second);
    }

    #[test]
    fn lognormal_percentiles_work() {
        let size = ObjectSize::log_normal(100, 1000).unwrap();
        let mut rng = SmallRng::seed_from_u64(0);

        let mut sizes: Vec<_> = (0..10_000).map(|_| size.sample(&mut rng)).collect();
        sizes.sort_unstable();

        let p50 = sizes[5_000];
        let p99 = sizes[9_900];
        assert!((80..125).contains(&p50), "p50 {p50}");
        assert!((750..1300).contains(&p99), "p99 {p99}");
    }

    #[test]
    fn invalid_distribution() {
        assert!(ObjectSize::log_normal(0, 10).is_err());
        assert!(ObjectSize::log_normal(100, 10).is_err());
        assert_eq!(ObjectSize::Fixed(42).sample(&mut rand::rng()), 42);
    }
}
