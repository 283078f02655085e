use std::future::Future;
use std::marker::PhantomData;

use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{CoalesceResult, ErrorKind};
use crate::upstream::Upstream;
use crate::{bail, coalesce_error};

/// [`Upstream`] that fetches a URL over HTTP and decodes the body as JSON.
///
/// Non-success status codes are reported as [`ErrorKind::UpstreamStatus`] and bodies that
/// fail to decode as [`ErrorKind::DeserializationError`]. Timeouts and default headers are
/// taken from the supplied [`Client`].
#[derive(Debug, Clone)]
pub struct HttpJsonUpstream<T = serde_json::Value> {
    client: Client,
    url: Url,
    phantom: PhantomData<fn() -> T>,
}

impl<T> HttpJsonUpstream<T> {
    /// Creates a new [`HttpJsonUpstream`] issuing `GET` requests to `url` with `client`.
    pub fn new(client: Client, url: Url) -> Self {
        Self {
            client,
            url,
            phantom: PhantomData,
        }
    }

    /// Returns the URL this upstream fetches.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl<T> HttpJsonUpstream<T>
where
    T: DeserializeOwned,
{
    async fn get(&self) -> CoalesceResult<T> {
        debug!(url = %self.url, "sending upstream request");

        let response = self.client.get(self.url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            bail!(
                ErrorKind::UpstreamStatus,
                "Upstream returned an error status",
                format!("GET {} returned {status}", self.url)
            );
        }

        let body = response.bytes().await?;
        debug!(url = %self.url, bytes = body.len(), "received upstream response");

        serde_json::from_slice(&body).map_err(|err| {
            coalesce_error!(
                ErrorKind::DeserializationError,
                "Upstream payload decoding failed",
                format!("GET {} returned an undecodable body: {err}", self.url),
                source: err
            )
        })
    }
}

impl<T> Upstream for HttpJsonUpstream<T>
where
    T: DeserializeOwned,
{
    type Output = T;

    fn fetch(&self) -> impl Future<Output = CoalesceResult<Self::Output>> + Send {
        self.get()
    }
}
