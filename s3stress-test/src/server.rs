//! Exposes an in-process object store for use in integration tests.
//!
//! ```
//! use s3stress_test::server::TestServer;
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = TestServer::new().await;
//!    let host = server.host();
//!    // point the benchmark at the host...
//! }
//! ```
//!
//! The server speaks a minimal object protocol:
//!
//! - `PUT /{bucket}` creates a bucket, `409 Conflict` if it already exists.
//! - `PUT /{bucket}/{key}` stores the request body and responds with the stored size.
//! - `GET /{bucket}/{key}` returns the object, `404 Not Found` if it is missing.
//! - `DELETE /{bucket}/{key}` removes one object.
//! - `DELETE /{bucket}?prefix={prefix}` removes every object under a prefix and responds with the
//!   number of removed objects.

use std::collections::{BTreeMap, HashMap};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::put;
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Basic;
use parking_lot::Mutex;
use serde::Deserialize;

type Buckets = HashMap<String, BTreeMap<String, Bytes>>;

#[derive(Clone, Debug, Default)]
struct Store {
    buckets: Arc<Mutex<Buckets>>,
    credentials: Option<Arc<(String, String)>>,
}

type Auth = Option<TypedHeader<Authorization<Basic>>>;

impl Store {
    fn authorize(&self, auth: Auth) -> Result<(), StatusCode> {
        let Some(expected) = &self.credentials else {
            return Ok(());
        };
        match auth {
            Some(TypedHeader(Authorization(basic)))
                if basic.username() == expected.0 && basic.password() == expected.1 =>
            {
                Ok(())
            }
            _ => Err(StatusCode::UNAUTHORIZED),
        }
    }
}

/// An in-memory object store for use in integration tests.
///
/// It listens on a random available port on localhost. All objects are dropped with the server.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    store: Store,
}

impl TestServer {
    /// Starts a server that accepts every request.
    pub async fn new() -> Self {
        Self::start(Store::default())
    }

    /// Starts a server that requires basic authentication with the given credentials.
    pub async fn with_credentials(access_key: &str, secret_key: &str) -> Self {
        Self::start(Store {
            credentials: Some(Arc::new((access_key.to_owned(), secret_key.to_owned()))),
            ..Default::default()
        })
    }

    fn start(store: Store) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let app = Router::new()
            .route("/{bucket}", put(create_bucket).delete(delete_prefix))
            .route(
                "/{bucket}/{*key}",
                put(put_object).get(get_object).delete(delete_object),
            )
            .layer(DefaultBodyLimit::disable())
            .with_state(store.clone());

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            handle,
            socket,
            store,
        }
    }

    /// Returns the `host:port` the server listens on.
    pub fn host(&self) -> String {
        self.socket.to_string()
    }

    /// Returns whether `bucket` has been created.
    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.store.buckets.lock().contains_key(bucket)
    }

    /// Returns all keys stored in `bucket`, in lexicographic order.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.store
            .buckets
            .lock()
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the contents of an object.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.store.buckets.lock().get(bucket)?.get(key).cloned()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn create_bucket(
    State(store): State<Store>,
    Path(bucket): Path<String>,
    auth: Auth,
) -> Result<StatusCode, StatusCode> {
    store.authorize(auth)?;
    let mut buckets = store.buckets.lock();
    if buckets.contains_key(&bucket) {
        return Err(StatusCode::CONFLICT);
    }
    tracing::debug!(bucket, "created bucket");
    buckets.insert(bucket, BTreeMap::new());
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct PrefixQuery {
    #[serde(default)]
    prefix: String,
}

async fn delete_prefix(
    State(store): State<Store>,
    Path(bucket): Path<String>,
    Query(query): Query<PrefixQuery>,
    auth: Auth,
) -> Result<String, StatusCode> {
    store.authorize(auth)?;
    let mut buckets = store.buckets.lock();
    let objects = buckets.get_mut(&bucket).ok_or(StatusCode::NOT_FOUND)?;
    let before = objects.len();
    objects.retain(|key, _| !key.starts_with(&query.prefix));
    Ok((before - objects.len()).to_string())
}

async fn put_object(
    State(store): State<Store>,
    Path((bucket, key)): Path<(String, String)>,
    auth: Auth,
    body: Bytes,
) -> Result<String, StatusCode> {
    store.authorize(auth)?;
    let mut buckets = store.buckets.lock();
    let objects = buckets.get_mut(&bucket).ok_or(StatusCode::NOT_FOUND)?;
    let size = body.len();
    objects.insert(key, body);
    Ok(size.to_string())
}

async fn get_object(
    State(store): State<Store>,
    Path((bucket, key)): Path<(String, String)>,
    auth: Auth,
) -> Result<Response, StatusCode> {
    store.authorize(auth)?;
    let buckets = store.buckets.lock();
    let object = buckets
        .get(&bucket)
        .and_then(|objects| objects.get(&key))
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(object.clone().into_response())
}

async fn delete_object(
    State(store): State<Store>,
    Path((bucket, key)): Path<(String, String)>,
    auth: Auth,
) -> Result<StatusCode, StatusCode> {
    store.authorize(auth)?;
    let mut buckets = store.buckets.lock();
    let objects = buckets.get_mut(&bucket).ok_or(StatusCode::NOT_FOUND)?;
    match objects.remove(&key) {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(StatusCode::NOT_FOUND),
    }
}
