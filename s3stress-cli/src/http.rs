//! Contains an [`ObjectClient`] implementation using HTTP.

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use s3stress_engine::{Endpoint, Secret};
use secrecy::{ExposeSecret, SecretBox};
use tokio_util::io::ReaderStream;

use crate::payload::Payload;
use crate::transport::{ClientError, ObjectClient};

/// Header carrying the configured region with every request.
const REGION_HEADER: &str = "x-s3stress-region";

/// An [`ObjectClient`] talking to one endpoint over HTTP.
#[derive(Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    base: String,
    credentials: Option<(String, SecretBox<Secret>)>,
    region: Option<String>,
}

impl HttpClient {
    /// Creates a client for `endpoint`.
    ///
    /// Credentials are sent as basic authentication when an access key is configured.
    pub fn connect(endpoint: &Endpoint) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(endpoint.tls && endpoint.insecure)
            .build()
            .context("failed to build HTTP client")?;

        let credentials = (!endpoint.access_key.is_empty())
            .then(|| (endpoint.access_key.clone(), endpoint.secret_key.clone()));

        Ok(Self {
            client,
            base: endpoint.url(),
            credentials,
            region: endpoint.region.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self.client.request(method, format!("{}/{path}", self.base));
        if let Some((access_key, secret_key)) = &self.credentials {
            builder = builder.basic_auth(access_key, Some(secret_key.expose_secret().as_str()));
        }
        if let Some(region) = &self.region {
            builder = builder.header(REGION_HEADER, region);
        }
        builder
    }
}

/// Maps error status codes, passing successful responses through.
fn check(response: Response, path: &str) -> Result<Response, ClientError> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::NOT_FOUND => Err(ClientError::NotFound(path.to_owned())),
        StatusCode::CONFLICT => Err(ClientError::BucketExists(path.to_owned())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ClientError::Unauthorized),
        status => Err(ClientError::Status {
            status: status.as_u16(),
            path: path.to_owned(),
        }),
    }
}

async fn read_count(response: Response) -> Result<u64, ClientError> {
    let text = response.text().await?;
    text.trim()
        .parse()
        .map_err(|_| ClientError::Response(text))
}

#[async_trait]
impl ObjectClient for HttpClient {
    async fn create_bucket(&self, bucket: &str) -> Result<(), ClientError> {
        let response = self.request(Method::PUT, bucket).send().await?;
        check(response, bucket)?;
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        payload: Payload,
    ) -> Result<u64, ClientError> {
        let path = format!("{bucket}/{key}");
        let len = payload.len;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(payload));

        let response = self
            .request(Method::PUT, &path)
            .header(CONTENT_LENGTH, len)
            .body(body)
            .send()
            .await?;
        read_count(check(response, &path)?).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<u64, ClientError> {
        let path = format!("{bucket}/{key}");
        let response = self.request(Method::GET, &path).send().await?;

        let mut stream = check(response, &path)?.bytes_stream();
        let mut received = 0;
        while let Some(chunk) = stream.next().await {
            received += chunk?.len() as u64;
        }
        Ok(received)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ClientError> {
        let path = format!("{bucket}/{key}");
        let response = self.request(Method::DELETE, &path).send().await?;
        check(response, &path)?;
        Ok(())
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> Result<u64, ClientError> {
        let response = self
            .request(Method::DELETE, bucket)
            .query(&[("prefix", prefix)])
            .send()
            .await?;
        read_count(check(response, bucket)?).await
    }
}
