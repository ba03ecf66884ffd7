//! Client pool spreading operations over multiple endpoints.
//!
//! [`EndpointPool`] hands out a [`Lease`] per operation. The lease derefs to the client of the
//! selected endpoint and returns the endpoint to the pool when it is released or dropped.
//!
//! With more than one endpoint, one of two [`HostSelect`] policies decides which endpoint the
//! next lease goes to:
//!
//! - [`HostSelect::RoundRobin`] cycles through the endpoints in order.
//! - [`HostSelect::Weighted`] picks the endpoint with the fewest leases in flight. Among equally
//!   loaded endpoints the one that finished its last operation the longest time ago wins, which
//!   gives recently busy endpoints a short cooldown.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::time::Instant;

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};

/// Policy deciding which endpoint receives the next lease.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HostSelect {
    /// Strict rotation over all endpoints.
    RoundRobin,
    /// Least in-flight leases first, oldest idle endpoint on ties.
    #[default]
    Weighted,
}

impl FromStr for HostSelect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "roundrobin" => Ok(Self::RoundRobin),
            "weighted" | "weighed" => Ok(Self::Weighted),
            other => Err(Error::UnknownHostSelect(other.to_owned())),
        }
    }
}

impl fmt::Display for HostSelect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoundRobin => f.write_str("roundrobin"),
            Self::Weighted => f.write_str("weighted"),
        }
    }
}

/// Bookkeeping for the weighted policy.
#[derive(Debug)]
struct WeightedState {
    running: Vec<usize>,
    last_finished: Vec<Instant>,
}

impl WeightedState {
    fn new(len: usize) -> Self {
        // Stagger the initial timestamps starting at a random endpoint, so that the first burst
        // of acquisitions does not always begin on endpoint 0.
        let now = Instant::now();
        let offset = rand::rng().random_range(0..len);
        let last_finished = (0..len)
            .map(|idx| now + Duration::from_nanos(((idx + len - offset) % len) as u64))
            .collect();

        Self {
            running: vec![0; len],
            last_finished,
        }
    }

    fn select(&self) -> usize {
        let min = self.running.iter().copied().min().unwrap_or_default();
        self.running
            .iter()
            .zip(&self.last_finished)
            .enumerate()
            .filter(|(_, (running, _))| **running == min)
            .min_by_key(|(_, (_, finished))| **finished)
            .map(|(idx, _)| idx)
            .unwrap_or_default()
    }
}

/// The endpoint selection strategy including its shared state.
#[derive(Debug)]
enum Selector {
    Single,
    RoundRobin(Mutex<usize>),
    Weighted(Mutex<WeightedState>),
}

impl Selector {
    fn new(len: usize, select: HostSelect) -> Self {
        match (len, select) {
            (1, _) => Self::Single,
            (_, HostSelect::RoundRobin) => Self::RoundRobin(Mutex::new(0)),
            (len, HostSelect::Weighted) => Self::Weighted(Mutex::new(WeightedState::new(len))),
        }
    }

    fn acquire(&self, len: usize) -> usize {
        match self {
            Self::Single => 0,
            Self::RoundRobin(current) => {
                let mut current = current.lock();
                let idx = *current % len;
                *current = current.wrapping_add(1);
                idx
            }
            Self::Weighted(state) => {
                let mut state = state.lock();
                let idx = state.select();
                state.running[idx] += 1;
                idx
            }
        }
    }

    /// Returns an endpoint to the pool.
    ///
    /// # Panics
    ///
    /// Panics if the endpoint has no lease in flight, which means a lease was released twice.
    fn release(&self, idx: usize) {
        let Self::Weighted(state) = self else {
            return;
        };

        let mut state = state.lock();
        let Some(running) = state.running[idx].checked_sub(1) else {
            drop(state);
            panic!("endpoint {idx} released more often than it was acquired");
        };
        state.running[idx] = running;
        state.last_finished[idx] = Instant::now();
    }

    fn in_flight(&self, len: usize) -> Vec<usize> {
        match self {
            Self::Weighted(state) => state.lock().running.clone(),
            _ => vec![0; len],
        }
    }
}

/// A pool of clients, one per configured endpoint.
pub struct EndpointPool<C> {
    clients: Vec<Arc<C>>,
    endpoints: Vec<Endpoint>,
    selector: Arc<Selector>,
}

impl<C> EndpointPool<C> {
    /// Creates a client for every endpoint using `connect`.
    ///
    /// Fails with [`Error::NoEndpoints`] if `endpoints` is empty.
    pub fn new<F>(endpoints: Vec<Endpoint>, select: HostSelect, mut connect: F) -> Result<Self>
    where
        F: FnMut(&Endpoint) -> anyhow::Result<C>,
    {
        if endpoints.is_empty() {
            return Err(Error::NoEndpoints);
        }

        let clients = endpoints
            .iter()
            .map(|endpoint| {
                connect(endpoint).map(Arc::new).map_err(|cause| Error::Connect {
                    endpoint: endpoint.host.clone(),
                    cause,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(endpoints = endpoints.len(), %select, "created endpoint pool");
        Ok(Self {
            selector: Arc::new(Selector::new(clients.len(), select)),
            clients,
            endpoints,
        })
    }

    /// Returns the client at `idx`, bypassing selection.
    ///
    /// Used for setup and teardown work that is not measured.
    pub fn client(&self, idx: usize) -> &C {
        &self.clients[idx]
    }

    /// Leases the next client according to the selection policy.
    pub fn acquire(&self) -> Lease<C> {
        let index = self.selector.acquire(self.clients.len());
        Lease {
            client: Arc::clone(&self.clients[index]),
            host: self.endpoints[index].host.clone(),
            index,
            selector: Some(Arc::clone(&self.selector)),
        }
    }

    /// Current number of leases in flight per endpoint.
    ///
    /// Only the weighted policy tracks leases; the other policies report zeros.
    pub fn in_flight(&self) -> Vec<usize> {
        self.selector.in_flight(self.clients.len())
    }
}

impl<C> fmt::Debug for EndpointPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointPool")
            .field("endpoints", &self.endpoints)
            .field("selector", &self.selector)
            .finish()
    }
}

/// Exclusive logical use of one endpoint for the duration of one operation.
///
/// Dropping the lease releases it.
pub struct Lease<C> {
    client: Arc<C>,
    host: String,
    index: usize,
    selector: Option<Arc<Selector>>,
}

impl<C> Lease<C> {
    /// Index of the leased endpoint within the pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Host of the leased endpoint, used as the endpoint identifier in operation records.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the endpoint to the pool.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(selector) = self.selector.take() {
            selector.release(self.index);
        }
    }
}

impl<C> Deref for Lease<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.client
    }
}

impl<C> Drop for Lease<C> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl<C> fmt::Debug for Lease<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("host", &self.host)
            .field("index", &self.index)
            .finish()
    }
}
