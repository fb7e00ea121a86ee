use std::fmt;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method};

use crate::types::error::S3mpuError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Delete => Method::DELETE,
        }
    }
}

/// Scheme, host and optional port of the storage endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
}

impl Endpoint {
    /// Build a request against this endpoint. `path` already contains the
    /// escaped query string.
    pub fn request(&self, method: HttpMethod, path: String) -> RequestDescriptor {
        RequestDescriptor {
            method,
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            port: self.port,
            path,
            headers: Vec::new(),
        }
    }
}

/// Everything the transport needs to issue one request.
///
/// The signer appends its headers in place before the request is sent.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: HttpMethod,
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl RequestDescriptor {
    /// Full request URL. Default ports are omitted so that the signed host
    /// matches the `Host` header the HTTP client sends.
    pub fn url(&self) -> String {
        let default_port = match self.scheme.as_str() {
            "https" => 443,
            _ => 80,
        };
        match self.port {
            Some(port) if port != default_port => {
                format!("{}://{}:{}{}", self.scheme, self.host, port, self.path)
            }
            _ => format!("{}://{}{}", self.scheme, self.host, self.path),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Issues one HTTP request and returns its status and body.
///
/// Implementations perform exactly one round trip and never retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: &RequestDescriptor) -> Result<TransportResponse>;
}

/// [`Transport`] over a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, request: &RequestDescriptor) -> Result<TransportResponse> {
        let mut builder = self.client.request(request.method.into(), request.url());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| anyhow!(S3mpuError::Transport(e.to_string())))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| anyhow!(S3mpuError::Transport(e.to_string())))?;

        tracing::trace!(
            method = %request.method,
            path = request.path,
            status = status,
            body_len = body.len(),
            "HTTP exchange completed."
        );

        Ok(TransportResponse { status, body })
    }
}
