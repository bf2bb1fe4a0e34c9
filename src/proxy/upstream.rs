use std::{fmt, time::Duration};

use bytes::Bytes;
use zeroize::Zeroizing;

use crate::{
    api::{Operation, CONTENT_TYPE_PKCS10},
    cert::Credential,
    error::{EstError, Result},
};

/// Where and how the proxy reaches the CA.
#[derive(Clone)]
pub struct UpstreamConfig {
    pub server: String,
    pub port: u16,
    /// PEM trust anchors for the CA's TLS certificate.
    pub trusted_pem: Vec<u8>,
    pub user: String,
    pub password: Zeroizing<String>,
    pub timeout: Duration,
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// A CA response to be relayed to the downstream client.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub retry_after: Option<String>,
    pub body: Bytes,
}

/// HTTPS client for the upstream CA.
#[derive(Clone)]
pub struct Upstream {
    client: reqwest::Client,
    base_url: String,
    user: String,
    password: Zeroizing<String>,
}

impl Upstream {
    /// Builds the client; the proxy presents `identity` to the CA for mutual TLS.
    pub fn new(config: &UpstreamConfig, identity: &Credential) -> Result<Self> {
        let reqwest_identity = reqwest::Identity::from_pem(&identity.identity_pem())
            .map_err(|err| EstError::Configuration(format!("proxy identity: {err}")))?;

        let roots = reqwest::Certificate::from_pem_bundle(&config.trusted_pem)
            .map_err(|err| EstError::Configuration(format!("upstream trust anchors: {err}")))?;

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .identity(reqwest_identity)
            .timeout(config.timeout);

        for root in roots {
            builder = builder.add_root_certificate(root);
        }

        let client = builder
            .build()
            .map_err(|err| EstError::Configuration(format!("upstream client: {err}")))?;

        let host = if config.server.contains(':') {
            format!("[{}]", config.server)
        } else {
            config.server.clone()
        };

        Ok(Upstream {
            client,
            base_url: format!("https://{host}:{}", config.port),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    /// Forwards one EST operation to the CA.
    pub async fn forward(&self, operation: Operation, body: Option<Bytes>) -> Result<UpstreamResponse> {
        let url = format!("{}{}", self.base_url, operation.path());

        log::debug!("Forwarding {operation} to {url}");

        let mut req = self
            .client
            .request(operation.method(), &url)
            .basic_auth(&self.user, Some(self.password.as_str()));

        if let Some(body) = body {
            req = req
                .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE_PKCS10)
                .body(body);
        }

        let res = req.send().await?;

        let header = |name: reqwest::header::HeaderName| {
            res.headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        };

        let status = res.status().as_u16();
        let content_type = header(reqwest::header::CONTENT_TYPE);
        let retry_after = header(reqwest::header::RETRY_AFTER);
        let body = res.bytes().await?;

        log::debug!("Upstream {operation} response: {status} ({} bytes)", body.len());

        Ok(UpstreamResponse {
            status,
            content_type,
            retry_after,
            body,
        })
    }
}

impl fmt::Debug for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upstream")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
