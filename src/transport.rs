//! HTTP Request Execution
//!
//! This module defines the [`HttpTransport`] seam every endpoint call goes
//! through, and [`ReqwestTransport`], the default implementation that signs
//! requests with the configured bearer token.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::Method;
use std::time::Duration;
use tracing::debug;

use crate::errors::{DropboxError, Result};
use crate::protocol::user_agent;
use crate::types::ClientConfig;

/// Body of an outgoing request
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// No body
    Empty,
    /// `application/x-www-form-urlencoded` parameters
    Form(Vec<(String, String)>),
    /// Raw bytes with an explicit content type
    Raw { data: Bytes, content_type: String },
}

/// An outgoing request, fully addressed
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL including the query string
    pub url: String,
    /// Request body
    pub body: RequestBody,
}

impl HttpRequest {
    /// A GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            body: RequestBody::Empty,
        }
    }

    /// A form-encoded POST request
    pub fn post_form(url: impl Into<String>, params: &[(&str, String)]) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            body: RequestBody::Form(
                params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            ),
        }
    }

    /// A PUT request carrying raw bytes
    pub fn put_bytes(url: impl Into<String>, data: Bytes) -> Self {
        Self {
            method: Method::PUT,
            url: url.into(),
            body: RequestBody::Raw {
                data,
                content_type: "application/octet-stream".to_string(),
            },
        }
    }
}

/// A response with its body fully read
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
}

/// A response whose body is still being received
pub struct StreamingResponse {
    /// Status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// Body chunks as they arrive
    pub body: BoxStream<'static, Result<Bytes>>,
}

impl StreamingResponse {
    /// Reads the remaining body into memory
    pub async fn collect(self) -> Result<HttpResponse> {
        let chunks: Vec<Bytes> = self.body.try_collect().await?;
        Ok(HttpResponse {
            status: self.status,
            headers: self.headers,
            body: Bytes::from(chunks.concat()),
        })
    }
}

/// Authenticated request-execution facility
///
/// Network failures must surface as [`DropboxError::Network`] or
/// [`DropboxError::NetworkTimeout`] so the retry policy can recognize them.
/// Any status the server answers with is returned as a response, not an error.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Executes a request and reads the whole body
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Executes a request, handing the body back as a stream
    ///
    /// The default buffers through [`HttpTransport::execute`].
    async fn execute_streaming(&self, request: HttpRequest) -> Result<StreamingResponse> {
        let response = self.execute(request).await?;
        Ok(StreamingResponse {
            status: response.status,
            headers: response.headers,
            body: stream::once(async move { Ok(response.body) }).boxed(),
        })
    }
}

/// [`HttpTransport`] backed by a pooled `reqwest` client
#[derive(Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
    access_token: String,
}

impl ReqwestTransport {
    /// Creates a transport using the timeouts and identity from `config`
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout))
            .read_timeout(Duration::from_millis(config.network_timeout))
            .user_agent(user_agent(&config.client_identifier))
            .build()
            .map_err(|e| DropboxError::Config(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            access_token: config.access_token.clone(),
        })
    }

    async fn send(&self, request: HttpRequest) -> Result<reqwest::Response> {
        debug!(method = %request.method, url = %request.url, "sending request");

        let mut builder = self
            .http
            .request(request.method, &request.url)
            .bearer_auth(&self.access_token);

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Form(params) => builder.form(&params),
            RequestBody::Raw { data, content_type } => {
                builder.header(CONTENT_TYPE, content_type).body(data)
            }
        };

        let response = builder.send().await?;
        debug!(status = response.status().as_u16(), url = %request.url, "received response");
        Ok(response)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.clone();
        let response = self.send(request).await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| DropboxError::from_reqwest(e, url))?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn execute_streaming(&self, request: HttpRequest) -> Result<StreamingResponse> {
        let url = request.url.clone();
        let response = self.send(request).await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map_err(move |e| DropboxError::from_reqwest(e, url.clone()))
            .boxed();
        Ok(StreamingResponse {
            status,
            headers,
            body,
        })
    }
}
