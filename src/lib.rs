//! Certificate enrollment over EST (Enrollment over Secure Transport), following
//! [RFC 7030](https://datatracker.ietf.org/doc/html/rfc7030).
//!
//! The crate provides both ends of an EST deployment:
//!
//! - a client, [`EnrollmentSession`], which fetches CA certificates, negotiates CSR attributes,
//!   enrolls and re-enrolls, honouring the CA's retry directives;
//! - a [`proxy`] which terminates client TLS, authenticates requesters and forwards the EST
//!   operations to an upstream CA.
//!
//! # Usage
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use est::{EnrollmentRequest, EnrollmentSession, ServerTrust, TlsTransport};
//!
//! # async fn run() -> est::Result<()> {
//! let anchors = std::fs::read("trust-anchor.pem")?;
//! let config = est::tls::client_config(
//!     ServerTrust::Anchors(est::tls::root_store_from_pem(&anchors)?),
//!     None,
//! )?;
//!
//! let transport = TlsTransport::new(config, "127.0.0.1", 8085, Duration::from_secs(10));
//! let session = EnrollmentSession::new(transport, "out");
//!
//! session.get_ca_certs().await?;
//! session
//!     .enroll(EnrollmentRequest::new("device-0001"), true)
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Proof-of-Possession
//!
//! When the CA asks for a `challengePassword` in its CSR attributes, or when forced with
//! [`EnrollmentRequest::force_pop`], the CSR carries the base64 encoded `tls-exporter` channel
//! binding ([RFC 9266](https://datatracker.ietf.org/doc/html/rfc9266)) of the TLS session it is
//! sent over. A retried enrollment opens a new session and thus builds a new CSR.

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]

pub mod api;
pub mod attrs;
pub mod auth;
pub mod cert;
mod enroll;
mod error;
pub mod proxy;
mod req;
pub mod retry;
pub mod tls;
mod trans;


pub use crate::{
    api::{AttributeDirective, Operation},
    auth::{
        AuthDispatcher, AuthHeader, AuthMode, SrpVerifierDb, Verifier, DEFAULT_BASIC_PASSWORD,
        DEFAULT_BASIC_USER, DEFAULT_DIGEST_REALM,
    },
    cert::Credential,
    enroll::{
        CertFormat, EnrollmentRequest, EnrollmentSession, HttpCredentials, CA_CERTS, CSR_ATTRS,
        NEW_CERT_PEM, NEW_CERT_PKCS7, NEW_KEY,
    },
    error::{EstError, Result},
    req::EnrollmentOutcome,
    retry::{RetryDecision, RetryDirective},
    tls::ServerTrust,
    trans::{EstRequest, EstResponse, EstSession, EstTransport, TlsSession, TlsTransport},
};
