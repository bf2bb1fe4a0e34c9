//! HTTP authentication of EST requesters.
//!
//! The proxy classifies each request's `Authorization` header into an [`AuthHeader`] and hands it
//! to an [`AuthDispatcher`], which approves or rejects it using the configured [`Verifier`].
//! The client side of the same exchange is [`client_authorization`].

use std::{fmt, sync::Arc};

use base64::prelude::*;
use rand::RngCore as _;
use subtle::ConstantTimeEq as _;
use zeroize::Zeroizing;

use crate::error::{EstError, Result};

pub mod digest;
pub mod srp;

pub use self::srp::{SrpServerParams, SrpVerifierDb, SrpVerifierRecord};

/// Default Basic credentials of the proxy.
pub const DEFAULT_BASIC_USER: &str = "estuser";
pub const DEFAULT_BASIC_PASSWORD: &str = "estpwd";

/// Default Digest credentials of the proxy; the HA1 is `MD5(estuser:estrealm:estpwd)`.
pub const DEFAULT_DIGEST_USER: &str = "estuser";
pub const DEFAULT_DIGEST_REALM: &str = "estrealm";
pub const DEFAULT_DIGEST_HA1: &str = "36807fa200741bb0e8fb04fcf08e2de6";

/// How a request tried to authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// No `Authorization` header.
    None,
    Basic,
    Digest,
    /// A header was present but could not be understood.
    Fail,
}

/// Authentication data extracted from a request.
#[derive(Clone)]
pub struct AuthHeader {
    pub mode: AuthMode,
    pub user: String,
    /// The password (Basic) or the `response` parameter (Digest).
    pub secret: Zeroizing<String>,
    pub realm: String,
    pub nonce: String,
    /// The `uri` parameter the digest was computed over.
    pub uri: String,
    pub qop: Option<String>,
    pub nc: String,
    pub cnonce: String,
    /// Request method, part of the digest computation.
    pub method: String,
    /// Request target the header arrived with; a digest `uri` must match it.
    pub request_uri: String,
}

impl AuthHeader {
    fn with_mode(mode: AuthMode, method: &str, request_uri: &str) -> Self {
        AuthHeader {
            mode,
            user: String::new(),
            secret: Zeroizing::new(String::new()),
            realm: String::new(),
            nonce: String::new(),
            uri: String::new(),
            qop: None,
            nc: String::new(),
            cnonce: String::new(),
            method: method.to_owned(),
            request_uri: request_uri.to_owned(),
        }
    }

    /// Classifies the `Authorization` header of a `method` request for `request_uri`.
    pub fn parse(method: &str, request_uri: &str, authorization: Option<&str>) -> Self {
        let Some(value) = authorization else {
            return Self::with_mode(AuthMode::None, method, request_uri);
        };

        let (scheme, rest) = value.trim().split_once(' ').unwrap_or((value.trim(), ""));

        if scheme.eq_ignore_ascii_case("basic") {
            Self::parse_basic(method, request_uri, rest.trim())
        } else if scheme.eq_ignore_ascii_case("digest") {
            Self::parse_digest(method, request_uri, rest)
        } else {
            log::debug!("Unsupported authorization scheme {scheme:?}");
            Self::with_mode(AuthMode::Fail, method, request_uri)
        }
    }

    fn parse_basic(method: &str, request_uri: &str, token: &str) -> Self {
        let decoded = match BASE64_STANDARD.decode(token) {
            Ok(decoded) => Zeroizing::new(decoded),
            Err(_) => return Self::with_mode(AuthMode::Fail, method, request_uri),
        };

        let Ok(decoded) = std::str::from_utf8(&decoded) else {
            return Self::with_mode(AuthMode::Fail, method, request_uri);
        };

        let Some((user, password)) = decoded.split_once(':') else {
            return Self::with_mode(AuthMode::Fail, method, request_uri);
        };

        let mut header = Self::with_mode(AuthMode::Basic, method, request_uri);
        header.user = user.to_owned();
        header.secret = Zeroizing::new(password.to_owned());
        header
    }

    fn parse_digest(method: &str, request_uri: &str, params: &str) -> Self {
        let params = digest::parse_params(params);
        let get = |name| digest::param(&params, name);

        let (Some(user), Some(response), Some(nonce), Some(uri)) =
            (get("username"), get("response"), get("nonce"), get("uri"))
        else {
            return Self::with_mode(AuthMode::Fail, method, request_uri);
        };

        let mut header = Self::with_mode(AuthMode::Digest, method, request_uri);
        header.user = user.to_owned();
        header.secret = Zeroizing::new(response.to_owned());
        header.realm = get("realm").unwrap_or_default().to_owned();
        header.nonce = nonce.to_owned();
        header.uri = uri.to_owned();
        header.qop = get("qop").map(str::to_owned);
        header.nc = get("nc").unwrap_or_default().to_owned();
        header.cnonce = get("cnonce").unwrap_or_default().to_owned();
        header
    }

    fn digest_context(&self) -> digest::DigestContext<'_> {
        digest::DigestContext {
            method: &self.method,
            uri: &self.uri,
            nonce: &self.nonce,
            qop: self.qop.as_deref(),
            nc: &self.nc,
            cnonce: &self.cnonce,
        }
    }
}

impl fmt::Debug for AuthHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthHeader")
            .field("mode", &self.mode)
            .field("user", &self.user)
            .field("realm", &self.realm)
            .field("uri", &self.uri)
            .field("request_uri", &self.request_uri)
            .finish_non_exhaustive()
    }
}

/// DER encoding of a TLS client certificate that passed chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCertificate(pub Vec<u8>);

impl PeerCertificate {
    pub fn fingerprint(&self) -> String {
        crate::tls::fingerprint(&self.0)
    }
}

/// A strategy for approving authentication headers.
pub trait Verifier: Send + Sync {
    fn verify(&self, header: &AuthHeader, peer: Option<&PeerCertificate>) -> bool;

    /// `WWW-Authenticate` value sent with a rejection.
    fn challenge(&self, realm: &str, nonce: &str) -> String {
        let _ = nonce;
        format!("Basic realm=\"{realm}\"")
    }
}

fn ct_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

/// Basic credentials checked against a static table.
pub struct BasicVerifier {
    users: Vec<(String, Zeroizing<String>)>,
}

impl BasicVerifier {
    pub fn new(users: impl IntoIterator<Item = (String, Zeroizing<String>)>) -> Self {
        BasicVerifier {
            users: users.into_iter().collect(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new([(
            DEFAULT_BASIC_USER.to_owned(),
            Zeroizing::new(DEFAULT_BASIC_PASSWORD.to_owned()),
        )])
    }
}

impl Verifier for BasicVerifier {
    fn verify(&self, header: &AuthHeader, _peer: Option<&PeerCertificate>) -> bool {
        if header.mode != AuthMode::Basic {
            return false;
        }

        self.users
            .iter()
            .any(|(user, password)| user == &header.user && ct_eq(password, &header.secret))
    }
}

/// Digest credentials checked against a stored HA1.
pub struct DigestVerifier {
    user: String,
    realm: String,
    ha1: Zeroizing<String>,
}

impl DigestVerifier {
    pub fn new(user: impl Into<String>, realm: impl Into<String>, ha1: Zeroizing<String>) -> Self {
        DigestVerifier {
            user: user.into(),
            realm: realm.into(),
            ha1,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(
            DEFAULT_DIGEST_USER,
            DEFAULT_DIGEST_REALM,
            Zeroizing::new(DEFAULT_DIGEST_HA1.to_owned()),
        )
    }

    /// The realm the stored HA1 was computed for.
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Stored HA1 for `user`, if it is the configured user.
    pub fn lookup_ha1(&self, user: &str) -> Option<&str> {
        (user == self.user).then_some(self.ha1.as_str())
    }
}

impl Verifier for DigestVerifier {
    fn verify(&self, header: &AuthHeader, _peer: Option<&PeerCertificate>) -> bool {
        if header.mode != AuthMode::Digest {
            return false;
        }

        let Some(ha1) = self.lookup_ha1(&header.user) else {
            log::debug!("Digest auth for unknown user");
            return false;
        };

        if header.uri != header.request_uri {
            log::debug!(
                "Digest uri {:?} does not match request target {:?}",
                header.uri,
                header.request_uri
            );
            return false;
        }

        let expected = digest::response(ha1, &header.digest_context());
        ct_eq(&expected, &header.secret)
    }

    fn challenge(&self, _realm: &str, nonce: &str) -> String {
        format!(
            "Digest qop=\"auth\", realm=\"{}\", nonce=\"{nonce}\"",
            self.realm
        )
    }
}

/// Delegates the decision to an external identity check.
pub struct ExternalVerifier<F> {
    check: F,
}

impl<F> ExternalVerifier<F>
where
    F: Fn(&AuthHeader, Option<&PeerCertificate>) -> bool + Send + Sync,
{
    pub fn new(check: F) -> Self {
        ExternalVerifier { check }
    }
}

impl<F> Verifier for ExternalVerifier<F>
where
    F: Fn(&AuthHeader, Option<&PeerCertificate>) -> bool + Send + Sync,
{
    fn verify(&self, header: &AuthHeader, peer: Option<&PeerCertificate>) -> bool {
        (self.check)(header, peer)
    }
}

/// Approves or rejects requests using the configured verifier.
#[derive(Clone)]
pub struct AuthDispatcher {
    verifier: Arc<dyn Verifier>,
    realm: String,
}

impl AuthDispatcher {
    pub fn new(verifier: Arc<dyn Verifier>, realm: impl Into<String>) -> Self {
        AuthDispatcher {
            verifier,
            realm: realm.into(),
        }
    }

    /// Returns true if the request is approved.
    ///
    /// Requests without (or with unintelligible) authentication are always rejected.
    pub fn authenticate(&self, header: &AuthHeader, peer: Option<&PeerCertificate>) -> bool {
        match header.mode {
            AuthMode::None | AuthMode::Fail => false,
            AuthMode::Basic | AuthMode::Digest => self.verifier.verify(header, peer),
        }
    }

    /// `WWW-Authenticate` value for a rejection.
    pub fn challenge(&self, nonce: &str) -> String {
        self.verifier.challenge(&self.realm, nonce)
    }
}

impl fmt::Debug for AuthDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthDispatcher")
            .field("realm", &self.realm)
            .finish_non_exhaustive()
    }
}

/// Builds the `Authorization` value answering a `WWW-Authenticate` challenge.
pub fn client_authorization(
    challenge: &str,
    user: &str,
    password: &str,
    method: &str,
    uri: &str,
) -> Result<Zeroizing<String>> {
    let (scheme, rest) = challenge
        .trim()
        .split_once(' ')
        .unwrap_or((challenge.trim(), ""));

    if scheme.eq_ignore_ascii_case("basic") {
        let credentials = Zeroizing::new(format!("{user}:{password}"));
        return Ok(Zeroizing::new(format!(
            "Basic {}",
            BASE64_STANDARD.encode(credentials.as_bytes())
        )));
    }

    if !scheme.eq_ignore_ascii_case("digest") {
        return Err(EstError::Configuration(format!(
            "unsupported authentication scheme {scheme:?}"
        )));
    }

    let params = digest::parse_params(rest);
    let realm = digest::param(&params, "realm").unwrap_or_default();
    let nonce = digest::param(&params, "nonce").unwrap_or_default();
    let opaque = digest::param(&params, "opaque");

    if let Some(algorithm) = digest::param(&params, "algorithm") {
        if !algorithm.eq_ignore_ascii_case("MD5") {
            return Err(EstError::Configuration(format!(
                "unsupported digest algorithm {algorithm:?}"
            )));
        }
    }

    let qop = digest::param(&params, "qop").map(|qop| {
        if qop.split(',').any(|q| q.trim() == "auth") {
            "auth"
        } else {
            qop
        }
    });

    let mut cnonce = [0; 8];
    rand::thread_rng().fill_bytes(&mut cnonce);
    let cnonce = hex::encode(cnonce);
    let nc = "00000001";

    let ha1 = digest::ha1(user, realm, password);
    let response = digest::response(
        &ha1,
        &digest::DigestContext {
            method,
            uri,
            nonce,
            qop,
            nc,
            cnonce: &cnonce,
        },
    );

    let mut value = format!(
        "Digest username=\"{user}\", realm=\"{realm}\", nonce=\"{nonce}\", uri=\"{uri}\", response=\"{}\"",
        response.as_str()
    );

    if let Some(qop) = qop {
        value.push_str(&format!(", qop={qop}, nc={nc}, cnonce=\"{cnonce}\""));
    }

    if let Some(opaque) = opaque {
        value.push_str(&format!(", opaque=\"{opaque}\""));
    }

    Ok(Zeroizing::new(value))
}
