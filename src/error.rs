use std::{fmt, io};

/// Result type used throughout the crate.
pub type Result<T, E = EstError> = std::result::Result<T, E>;

/// Failures of an EST operation.
///
/// Every variant carries a stable numeric [`code`](EstError::code) and a short
/// [`description`](EstError::description) so that command line front ends can report
/// `<operation> failed with code <n> (<description>)`.
#[derive(Debug)]
pub enum EstError {
    /// Missing file or environment variable, or conflicting options.
    Configuration(String),

    /// Malformed CSR, key, certificate or PKCS7 data.
    Decode { what: &'static str, detail: String },

    /// The CSR attribute directive sent by the CA could not be decoded.
    AttributeDecode(String),

    /// A CSR could not be assembled or signed.
    CsrBuild(String),

    /// The CA asked for a retry again after the single permitted retry.
    RetryRequested,

    /// The CA's retry directive could not be honoured.
    RetryAborted(String),

    /// HTTP authentication was rejected.
    Authentication,

    /// TLS or HTTP level failure talking to the peer.
    Transport(String),

    /// The CA answered with an error status. The body is kept verbatim.
    Server { status: u16, body: String },

    /// Proof-of-possession was requested but the TLS session has no channel binding.
    PopUnavailable,

    /// Writing or reading a local artifact failed.
    Io(io::Error),
}

impl EstError {
    pub(crate) fn decode(what: &'static str, err: impl fmt::Display) -> Self {
        EstError::Decode {
            what,
            detail: err.to_string(),
        }
    }

    pub(crate) fn transport(err: impl fmt::Display) -> Self {
        EstError::Transport(err.to_string())
    }

    /// Numeric code of this error.
    pub fn code(&self) -> u32 {
        match self {
            EstError::Configuration(_) => 2,
            EstError::Decode { .. } => 3,
            EstError::AttributeDecode(_) => 4,
            EstError::CsrBuild(_) => 5,
            EstError::RetryRequested => 6,
            EstError::RetryAborted(_) => 7,
            EstError::Authentication => 8,
            EstError::Transport(_) => 9,
            EstError::Server { .. } => 10,
            EstError::PopUnavailable => 11,
            EstError::Io(_) => 12,
        }
    }

    /// Human readable description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            EstError::Configuration(_) => "EST_ERR_CONFIGURATION",
            EstError::Decode { .. } => "EST_ERR_DECODE",
            EstError::AttributeDecode(_) => "EST_ERR_ATTR_DECODE",
            EstError::CsrBuild(_) => "EST_ERR_CSR_BUILD",
            EstError::RetryRequested => "EST_ERR_CA_ENROLL_RETRY",
            EstError::RetryAborted(_) => "EST_ERR_RETRY_ABORTED",
            EstError::Authentication => "EST_ERR_AUTH_FAIL",
            EstError::Transport(_) => "EST_ERR_TRANSPORT",
            EstError::Server { .. } => "EST_ERR_HTTP_STATUS",
            EstError::PopUnavailable => "EST_ERR_NO_CHANNEL_BINDING",
            EstError::Io(_) => "EST_ERR_IO",
        }
    }

    /// Returns true if the error should stop the process before any network activity.
    pub fn is_configuration(&self) -> bool {
        matches!(self, EstError::Configuration(_))
    }
}

impl fmt::Display for EstError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstError::Configuration(msg) => write!(f, "configuration error: {msg}"),
            EstError::Decode { what, detail } => write!(f, "malformed {what}: {detail}"),
            EstError::AttributeDecode(detail) => {
                write!(f, "failed to decode CSR attributes: {detail}")
            }
            EstError::CsrBuild(detail) => write!(f, "failed to build CSR: {detail}"),
            EstError::RetryRequested => write!(f, "CA requested another retry"),
            EstError::RetryAborted(reason) => write!(f, "retry aborted: {reason}"),
            EstError::Authentication => write!(f, "authentication failed"),
            EstError::Transport(detail) => write!(f, "transport error: {detail}"),
            EstError::Server { status, body } if body.is_empty() => {
                write!(f, "server returned HTTP {status}")
            }
            EstError::Server { status, body } => {
                write!(f, "server returned HTTP {status}: {body}")
            }
            EstError::PopUnavailable => {
                write!(f, "TLS session does not provide a channel binding for PoP")
            }
            EstError::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for EstError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EstError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for EstError {
    fn from(err: io::Error) -> Self {
        EstError::Io(err)
    }
}

impl From<rustls::Error> for EstError {
    fn from(err: rustls::Error) -> Self {
        EstError::transport(err)
    }
}

impl From<hyper::Error> for EstError {
    fn from(err: hyper::Error) -> Self {
        EstError::transport(err)
    }
}

impl From<reqwest::Error> for EstError {
    fn from(err: reqwest::Error) -> Self {
        EstError::transport(err)
    }
}
