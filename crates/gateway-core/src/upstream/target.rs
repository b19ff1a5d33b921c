//! HTTP adapter for a single upstream provider.

use bytes::Bytes;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use std::{
    io::{Read, Write},
    sync::Arc,
    time::Duration,
};
use url::Url;

use crate::config::TargetConfig;

use super::errors::UpstreamError;

/// One configured upstream: parsed URL, pooled HTTP client bound to the
/// per-upstream timeout, and the provider's request-compression capability.
///
/// The adapter owns request mutation only. Classifying the response
/// (5xx/429 versus pass-through) is the dispatcher's job, so a completed
/// exchange is returned as-is regardless of status code.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    name: Arc<str>,
    url: Url,
    client: reqwest::Client,
    compression: bool,
}

impl UpstreamTarget {
    /// Builds the adapter from a target's configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL does not parse or the HTTP client cannot
    /// be constructed.
    pub fn new(config: &TargetConfig, upstream_timeout: Duration) -> Result<Self, UpstreamError> {
        let url = Url::parse(&config.connection.http.url)
            .map_err(|e| UpstreamError::InvalidUrl(e.to_string()))?;

        let mut builder = reqwest::Client::builder()
            .timeout(upstream_timeout)
            .connect_timeout(Duration::from_secs(5))
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none());

        if config.connection.http.disable_keep_alives {
            builder = builder.pool_max_idle_per_host(0);
        }

        let client = builder.build().map_err(|e| UpstreamError::ClientBuild(e.to_string()))?;

        Ok(Self {
            name: Arc::from(config.name.as_str()),
            url,
            client,
            compression: config.connection.http.compression,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn supports_compression(&self) -> bool {
        self.compression
    }

    /// Forwards the buffered request body to this upstream.
    ///
    /// The outgoing request is a fresh `POST` carrying `Content-Type:
    /// application/json` and, when the forwarded body is compressed,
    /// `Content-Encoding: gzip`. `Content-Length` always reflects the bytes
    /// actually sent because the body is attached after negotiation.
    ///
    /// # Errors
    ///
    /// Returns an error for gzip negotiation failures and transport-level
    /// failures (connect, TLS, timeout). A completed HTTP exchange is `Ok`
    /// whatever its status code.
    pub async fn forward(
        &self,
        body: &Bytes,
        client_gzip: bool,
    ) -> Result<reqwest::Response, UpstreamError> {
        let (payload, gzip_out) = self.negotiate_body(body, client_gzip)?;

        let mut request = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(payload);
        if gzip_out {
            request = request.header(CONTENT_ENCODING, "gzip");
        }

        request.send().await.map_err(|e| UpstreamError::from_transport(&e))
    }

    /// Applies the both-sides compression policy: the body leaves either
    /// exactly as received or re-coded to match the target's capability.
    fn negotiate_body(
        &self,
        body: &Bytes,
        client_gzip: bool,
    ) -> Result<(Bytes, bool), UpstreamError> {
        match (client_gzip, self.compression) {
            (false, false) | (true, true) => Ok((body.clone(), client_gzip)),
            (true, false) => Ok((gunzip(body)?, false)),
            (false, true) => Ok((gzip(body)?, true)),
        }
    }
}

fn gunzip(body: &Bytes) -> Result<Bytes, UpstreamError> {
    let mut decoder = GzDecoder::new(body.as_ref());
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(|e| UpstreamError::RequestRewrite(format!("gunzip failed: {e}")))?;
    Ok(Bytes::from(decoded))
}

fn gzip(body: &Bytes) -> Result<Bytes, UpstreamError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(body)
        .and_then(|()| encoder.finish())
        .map(Bytes::from)
        .map_err(|e| UpstreamError::RequestRewrite(format!("gzip failed: {e}")))
}
