use std::{fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, StatusCode};
use http_body_util::{BodyExt as _, Full};
use hyper::client::conn::http1::SendRequest;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::{net::TcpStream, time::timeout};
use tokio_rustls::TlsConnector;
use zeroize::Zeroizing;

use crate::{
    api::{Operation, CONTENT_TYPE_PKCS10},
    error::{EstError, Result},
    tls,
};

/// A way of opening sessions to an EST server.
///
/// Each enrollment attempt opens a fresh session so that proof-of-possession binds the CSR to
/// the TLS session it is sent over.
#[allow(async_fn_in_trait)]
pub trait EstTransport {
    type Session: EstSession;

    async fn open(&self) -> Result<Self::Session>;
}

/// One connection to an EST server.
#[allow(async_fn_in_trait)]
pub trait EstSession {
    /// The `tls-exporter` channel binding of the underlying TLS session.
    fn channel_binding(&self) -> Option<&[u8]>;

    async fn send(&mut self, request: EstRequest) -> Result<EstResponse>;
}

/// A request for one EST operation.
#[derive(Clone)]
pub struct EstRequest {
    pub operation: Operation,
    pub body: Option<Vec<u8>>,
    pub authorization: Option<Zeroizing<String>>,
}

impl EstRequest {
    pub fn new(operation: Operation) -> Self {
        EstRequest {
            operation,
            body: None,
            authorization: None,
        }
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_authorization(mut self, authorization: Option<Zeroizing<String>>) -> Self {
        self.authorization = authorization;
        self
    }
}

impl fmt::Debug for EstRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EstRequest")
            .field("operation", &self.operation)
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .field("authorization", &self.authorization.is_some())
            .finish()
    }
}

/// A response as received from the server.
#[derive(Debug, Clone)]
pub struct EstResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl EstResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        EstResponse {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: header::HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }
}

/// HTTP/1.1 over rustls to a single EST server.
#[derive(Clone)]
pub struct TlsTransport {
    connector: TlsConnector,
    server: String,
    port: u16,
    read_timeout: Duration,
}

impl TlsTransport {
    pub fn new(
        config: rustls::ClientConfig,
        server: impl Into<String>,
        port: u16,
        read_timeout: Duration,
    ) -> Self {
        TlsTransport {
            connector: TlsConnector::from(Arc::new(config)),
            server: server.into(),
            port,
            read_timeout,
        }
    }

    fn authority(&self) -> String {
        if self.server.contains(':') {
            format!("[{}]:{}", self.server, self.port)
        } else {
            format!("{}:{}", self.server, self.port)
        }
    }
}

impl fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsTransport")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

impl EstTransport for TlsTransport {
    type Session = TlsSession;

    async fn open(&self) -> Result<TlsSession> {
        let server_name = ServerName::try_from(self.server.clone()).map_err(|err| {
            EstError::Configuration(format!("invalid server name {:?}: {err}", self.server))
        })?;

        log::debug!("Connecting to {}", self.authority());

        let tcp = timeout(
            self.read_timeout,
            TcpStream::connect((self.server.as_str(), self.port)),
        )
        .await
        .map_err(|_| EstError::transport("timed out connecting to server"))?
        .map_err(EstError::transport)?;

        let stream = timeout(self.read_timeout, self.connector.connect(server_name, tcp))
            .await
            .map_err(|_| EstError::transport("timed out during TLS handshake"))?
            .map_err(EstError::transport)?;

        let (_, conn) = stream.get_ref();
        log::debug!(
            "TLS session established ({:?}, {:?})",
            conn.protocol_version(),
            conn.negotiated_cipher_suite().map(|suite| suite.suite()),
        );
        let binding = tls::channel_binding(&**conn);

        let (sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(EstError::from)?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                log::debug!("Connection closed: {err}");
            }
        });

        Ok(TlsSession {
            sender,
            binding,
            authority: self.authority(),
            read_timeout: self.read_timeout,
        })
    }
}

/// An established TLS session to the EST server.
pub struct TlsSession {
    sender: SendRequest<Full<Bytes>>,
    binding: Option<Vec<u8>>,
    authority: String,
    read_timeout: Duration,
}

impl fmt::Debug for TlsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSession")
            .field("authority", &self.authority)
            .field("channel_binding", &self.binding.is_some())
            .finish_non_exhaustive()
    }
}

impl EstSession for TlsSession {
    fn channel_binding(&self) -> Option<&[u8]> {
        self.binding.as_deref()
    }

    async fn send(&mut self, request: EstRequest) -> Result<EstResponse> {
        let operation = request.operation;

        let mut builder = http::Request::builder()
            .method(operation.method())
            .uri(operation.path())
            .header(header::HOST, self.authority.as_str())
            .header(
                header::USER_AGENT,
                concat!("estclient/", env!("CARGO_PKG_VERSION")),
            );

        if request.body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, CONTENT_TYPE_PKCS10);
        }

        if let Some(authorization) = &request.authorization {
            builder = builder.header(header::AUTHORIZATION, authorization.as_str());
        }

        let body = Full::new(Bytes::from(request.body.unwrap_or_default()));
        let req = builder.body(body).map_err(EstError::transport)?;

        log::debug!("{} {}", req.method(), req.uri());

        self.sender.ready().await?;

        let res = timeout(self.read_timeout, self.sender.send_request(req))
            .await
            .map_err(|_| EstError::transport("timed out waiting for server response"))??;

        let (parts, body) = res.into_parts();

        let body = timeout(self.read_timeout, body.collect())
            .await
            .map_err(|_| EstError::transport("timed out reading server response"))??
            .to_bytes();

        log::debug!("{operation} response: {} ({} bytes)", parts.status, body.len());

        Ok(EstResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}
