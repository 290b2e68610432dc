//! HTTP transport seam
//!
//! The loader issues exactly one GET per load pass and branches on the
//! status code, so the transport surface is deliberately tiny. Tests swap in
//! canned implementations; production uses [`ReqwestTransport`].

use async_trait::async_trait;
use url::Url;

use crate::error::Result;

/// A fetched response: status code plus the full body.
#[derive(Clone, Debug)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body bytes
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// Whether the status code is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Abstraction over the HTTP client, enabling testability.
///
/// An `Err` from [`get`](Transport::get) means no response was obtained at
/// all; a non-2xx response is returned as `Ok` and classified by the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a GET and return the status plus body.
    async fn get(&self, url: &Url) -> Result<TransportResponse>;
}

/// Production [`Transport`] backed by a shared reqwest client.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Wrap an existing client (connection pool reuse is the caller's choice)
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &Url) -> Result<TransportResponse> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        Ok(TransportResponse { status, body })
    }
}
