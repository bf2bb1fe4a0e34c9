//! EST wire payloads.
//!
//! Operation paths and media types from [RFC 7030 §3.2.2], and codecs for the bodies the
//! orchestration logic has to look into.
//!
//! [RFC 7030 §3.2.2]: https://datatracker.ietf.org/doc/html/rfc7030#section-3.2.2

use std::fmt;

use base64::prelude::*;

use crate::error::{EstError, Result};

pub mod csrattrs;
pub mod pkcs7;
pub mod retry_after;

pub use self::csrattrs::{AttributeDirective, DirectiveEntry, StringType};

/// Path prefix of all EST operations.
pub const WELL_KNOWN_PREFIX: &str = "/.well-known/est";

/// Media type of a PKCS#10 CSR body.
pub const CONTENT_TYPE_PKCS10: &str = "application/pkcs10";

/// Media type of an enrollment response.
pub const CONTENT_TYPE_CERTS_ONLY: &str = "application/pkcs7-mime; smime-type=certs-only";

/// Media type of a `/cacerts` response.
pub const CONTENT_TYPE_PKCS7: &str = "application/pkcs7-mime";

/// Media type of a `/csrattrs` response.
pub const CONTENT_TYPE_CSRATTRS: &str = "application/csrattrs";

/// The EST operations this crate speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Distribution of CA certificates.
    CaCerts,

    /// CSR attributes query.
    CsrAttrs,

    /// Enrollment of a new certificate.
    SimpleEnroll,

    /// Renewal of an existing certificate.
    SimpleReenroll,
}

impl Operation {
    /// The path segment following [`WELL_KNOWN_PREFIX`].
    pub fn name(&self) -> &'static str {
        match self {
            Operation::CaCerts => "cacerts",
            Operation::CsrAttrs => "csrattrs",
            Operation::SimpleEnroll => "simpleenroll",
            Operation::SimpleReenroll => "simplereenroll",
        }
    }

    /// Full request path of the operation.
    pub fn path(&self) -> String {
        format!("{WELL_KNOWN_PREFIX}/{}", self.name())
    }

    /// Whether the operation carries a CSR body (and is sent as `POST`).
    pub fn is_enrollment(&self) -> bool {
        matches!(self, Operation::SimpleEnroll | Operation::SimpleReenroll)
    }

    pub fn method(&self) -> http::Method {
        if self.is_enrollment() {
            http::Method::POST
        } else {
            http::Method::GET
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decodes an EST body, which is base64 with optional line breaks.
pub fn decode_base64_body(body: &[u8]) -> Result<Vec<u8>> {
    let compact = body
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect::<Vec<_>>();

    BASE64_STANDARD
        .decode(compact)
        .map_err(|err| EstError::decode("base64 body", err))
}

/// Encodes DER as an EST body.
pub fn encode_base64_body(der: &[u8]) -> Vec<u8> {
    BASE64_STANDARD.encode(der).into_bytes()
}
