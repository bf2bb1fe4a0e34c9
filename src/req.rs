use bytes::Bytes;
use http::{header, StatusCode};

use crate::{
    api::retry_after,
    error::{EstError, Result},
    retry::RetryDirective,
    trans::EstResponse,
};

/// What an enrollment submission produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentOutcome {
    /// The CA issued a certificate, carried as a base64 certs-only PKCS7 bundle.
    Issued(Bytes),

    /// The CA accepted the request but wants it submitted again later.
    RetryRequested(RetryDirective),
}

pub(crate) fn req_handle_error(res: EstResponse) -> Result<EstResponse> {
    // ok responses pass through
    if res.status.is_success() {
        return Ok(res);
    }

    if res.status == StatusCode::UNAUTHORIZED {
        return Err(EstError::Authentication);
    }

    Err(EstError::Server {
        status: res.status.as_u16(),
        body: req_safe_read_body(&res.body),
    })
}

/// Classifies the response to `/simpleenroll` or `/simplereenroll`.
pub(crate) fn req_enrollment_outcome(res: EstResponse) -> Result<EnrollmentOutcome> {
    if res.status == StatusCode::ACCEPTED {
        let directive = retry_after::parse(res.headers.get(header::RETRY_AFTER));
        log::info!("CA requested a retry: {directive:?}");
        return Ok(EnrollmentOutcome::RetryRequested(directive));
    }

    let res = req_handle_error(res)?;

    if res.status != StatusCode::OK || res.body.is_empty() {
        return Err(EstError::Server {
            status: res.status.as_u16(),
            body: req_safe_read_body(&res.body),
        });
    }

    Ok(EnrollmentOutcome::Issued(res.body))
}

pub(crate) fn req_expect_header<'a>(res: &'a EstResponse, name: header::HeaderName) -> Option<&'a str> {
    res.headers.get(name).and_then(|value| value.to_str().ok())
}

pub(crate) fn req_safe_read_body(body: &[u8]) -> String {
    String::from_utf8_lossy(body).into_owned()
}
