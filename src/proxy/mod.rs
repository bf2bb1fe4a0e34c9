//! EST proxy: terminates client TLS, authenticates requesters and forwards to an upstream CA.
//!
//! Each accepted connection carries its verified client certificate and TLS channel binding
//! as connection data; the route handlers in [`session`] use them to authenticate the request
//! before relaying it through the [`Upstream`] client.

use std::{any::Any, fmt, net::SocketAddr, sync::Arc, time::Duration};

use actix_tls::accept::rustls_0_23::TlsStream;
use actix_web::{
    dev::{Extensions, Server, ServerHandle},
    middleware,
    rt::net::TcpStream,
    web, App, HttpServer,
};
use bytes::Bytes;
use rand::{rngs::StdRng, RngCore as _, SeedableRng as _};

use crate::{
    api::{pkcs7, Operation},
    auth::{
        AuthDispatcher, BasicVerifier, DigestVerifier, PeerCertificate, SrpVerifierDb, Verifier,
    },
    cert::Credential,
    error::{EstError, Result},
    tls,
};

mod locks;
mod session;
mod upstream;

pub use self::{
    locks::{thread_id, LockTable},
    upstream::{Upstream, UpstreamConfig, UpstreamResponse},
};

/// Default port the proxy listens on.
pub const DEFAULT_LISTEN_PORT: u16 = 8086;

/// How requests without a client certificate authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpAuth {
    /// HTTP authentication disabled; only client certificates are accepted.
    Disabled,
    Basic,
    Digest,
}

/// Proxy settings, validated by the caller before [`Proxy::bind`].
pub struct ProxyConfig {
    pub listen_port: u16,
    pub ipv6: bool,
    /// The proxy's TLS identity, also presented to the upstream CA.
    pub identity: Credential,
    /// PEM trust store for client certificates.
    pub trusted_pem: Vec<u8>,
    /// Local answer to `/cacerts`, as PEM certificates or a base64 PKCS7 bundle.
    pub cacerts_resp: Option<Vec<u8>>,
    pub http_auth: HttpAuth,
    pub realm: String,
    /// Require CSRs to carry the channel binding as `challengePassword`.
    pub pop_check: bool,
    pub srp_db: Option<SrpVerifierDb>,
    /// Stop accepting connections after this long.
    pub shutdown_after: Option<Duration>,
    pub workers: usize,
    pub upstream: UpstreamConfig,
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("listen_port", &self.listen_port)
            .field("ipv6", &self.ipv6)
            .field("http_auth", &self.http_auth)
            .field("realm", &self.realm)
            .field("pop_check", &self.pop_check)
            .field("shutdown_after", &self.shutdown_after)
            .field("workers", &self.workers)
            .field("upstream", &self.upstream)
            .finish_non_exhaustive()
    }
}

/// `tls-exporter` channel binding of a downstream connection.
#[derive(Debug, Clone)]
pub(crate) struct ChannelBinding(pub(crate) Vec<u8>);

/// State shared by all workers.
pub(crate) struct ProxyState {
    upstream: Upstream,
    dispatcher: Option<AuthDispatcher>,
    cacerts: Option<Bytes>,
    pop_check: bool,
    nonce_rngs: Arc<LockTable<StdRng>>,
}

impl ProxyState {
    /// Fresh digest nonce from the calling thread's generator.
    pub(crate) fn nonce(&self) -> String {
        let mut nonce = [0; 16];
        self.nonce_rngs.for_current_thread().fill_bytes(&mut nonce);
        hex::encode(nonce)
    }
}

fn dispatcher(http_auth: HttpAuth, realm: &str) -> Result<Option<AuthDispatcher>> {
    let verifier: Arc<dyn Verifier> = match http_auth {
        HttpAuth::Disabled => return Ok(None),
        HttpAuth::Basic => Arc::new(BasicVerifier::with_defaults()),
        HttpAuth::Digest => {
            let verifier = DigestVerifier::with_defaults();

            // the stored HA1 only verifies responses computed for its own realm
            if verifier.realm() != realm {
                return Err(EstError::Configuration(format!(
                    "digest credentials are bound to realm {:?}, can't serve realm {realm:?}",
                    verifier.realm()
                )));
            }

            Arc::new(verifier)
        }
    };

    Ok(Some(AuthDispatcher::new(verifier, realm)))
}

/// Records the verified client certificate and channel binding of a new connection.
pub(crate) fn on_connect(conn: &dyn Any, data: &mut Extensions) {
    let Some(stream) = conn.downcast_ref::<TlsStream<TcpStream>>() else {
        return;
    };

    let (_, session) = stream.get_ref();

    if let Some(cert) = session.peer_certificates().and_then(|certs| certs.first()) {
        data.insert(PeerCertificate(cert.to_vec()));
    }

    if let Some(binding) = tls::channel_binding(&**session) {
        data.insert(ChannelBinding(binding));
    }
}

/// A bound, not yet running, proxy server.
pub struct Proxy {
    server: Server,
    addrs: Vec<SocketAddr>,
    shutdown_after: Option<Duration>,
    nonce_rngs: Arc<LockTable<StdRng>>,
}

impl Proxy {
    /// Loads the TLS configuration and binds the listener.
    pub fn bind(config: ProxyConfig) -> Result<Self> {
        let trusted = tls::root_store_from_pem(&config.trusted_pem)?;
        let server_config = tls::server_config(&config.identity, trusted)?;
        let upstream = Upstream::new(&config.upstream, &config.identity)?;

        let cacerts = config
            .cacerts_resp
            .as_deref()
            .map(pkcs7::normalize_bundle)
            .transpose()?
            .map(Bytes::from);

        if let Some(db) = &config.srp_db {
            return Err(EstError::Configuration(format!(
                "TLS-SRP is not supported by the TLS backend of this proxy \
                 ({} verifiers loaded)",
                db.len()
            )));
        }

        let auth = dispatcher(config.http_auth, &config.realm)?;

        let workers = config.workers.max(1);
        let nonce_rngs = Arc::new(LockTable::new(workers, |_| StdRng::from_entropy()));
        log::debug!("Created lock table with {} entries", nonce_rngs.len());

        let state = web::Data::new(ProxyState {
            upstream,
            dispatcher: auth,
            cacerts,
            pop_check: config.pop_check,
            nonce_rngs: Arc::clone(&nonce_rngs),
        });

        let addr = if config.ipv6 {
            SocketAddr::from(([0_u16; 8], config.listen_port))
        } else {
            SocketAddr::from(([0_u8; 4], config.listen_port))
        };

        let server = HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .wrap(middleware::Logger::default())
                .route(&Operation::CaCerts.path(), web::get().to(session::cacerts))
                .route(&Operation::CsrAttrs.path(), web::get().to(session::csrattrs))
                .route(
                    &Operation::SimpleEnroll.path(),
                    web::post().to(session::simpleenroll),
                )
                .route(
                    &Operation::SimpleReenroll.path(),
                    web::post().to(session::simplereenroll),
                )
        })
        .on_connect(on_connect)
        .workers(workers)
        .bind_rustls_0_23(addr, server_config)
        .map_err(|err| EstError::Configuration(format!("unable to listen on {addr}: {err}")))?;

        let addrs = server.addrs();
        log::info!("EST proxy listening on {addrs:?}");

        Ok(Proxy {
            server: server.run(),
            addrs,
            shutdown_after: config.shutdown_after,
            nonce_rngs,
        })
    }

    /// The bound listener addresses.
    pub fn addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    pub fn handle(&self) -> ServerHandle {
        self.server.handle()
    }

    /// Serves until stopped, either through a [`ServerHandle`] or the auto-shutdown timer.
    pub async fn run(self) -> Result<()> {
        if let Some(after) = self.shutdown_after {
            let handle = self.server.handle();

            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                log::info!("Auto-shutdown after {after:?}, no longer accepting connections");
                handle.stop(true).await;
            });
        }

        self.server.await?;

        log::debug!("Tearing down lock table");
        drop(self.nonce_rngs);

        Ok(())
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("addrs", &self.addrs)
            .field("shutdown_after", &self.shutdown_after)
            .finish_non_exhaustive()
    }
}
