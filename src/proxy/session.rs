//! Request handlers of the proxy's EST routes.

use actix_web::{
    http::{header, StatusCode},
    web, HttpRequest, HttpResponse,
};
use base64::prelude::*;
use bytes::Bytes;

use super::{ChannelBinding, ProxyState};
use crate::{
    api::{Operation, CONTENT_TYPE_PKCS7},
    auth::{AuthHeader, PeerCertificate},
    cert,
};

pub(crate) async fn cacerts(req: HttpRequest, state: web::Data<ProxyState>) -> HttpResponse {
    if let Some(bundle) = &state.cacerts {
        log::debug!("Answering /cacerts locally for {:?}", req.peer_addr());

        return HttpResponse::Ok()
            .insert_header((header::CONTENT_TYPE, CONTENT_TYPE_PKCS7))
            .body(bundle.clone());
    }

    forward(&state, Operation::CaCerts, None).await
}

pub(crate) async fn csrattrs(state: web::Data<ProxyState>) -> HttpResponse {
    forward(&state, Operation::CsrAttrs, None).await
}

pub(crate) async fn simpleenroll(
    req: HttpRequest,
    state: web::Data<ProxyState>,
    body: web::Bytes,
) -> HttpResponse {
    enroll(&req, &state, Operation::SimpleEnroll, body).await
}

pub(crate) async fn simplereenroll(
    req: HttpRequest,
    state: web::Data<ProxyState>,
    body: web::Bytes,
) -> HttpResponse {
    enroll(&req, &state, Operation::SimpleReenroll, body).await
}

async fn enroll(
    req: &HttpRequest,
    state: &ProxyState,
    operation: Operation,
    body: Bytes,
) -> HttpResponse {
    if !authorized(req, state) {
        return unauthorized(state);
    }

    if state.pop_check {
        if let Err(reason) = check_pop(req, &body) {
            log::warn!("{operation} rejected: {reason}");
            return HttpResponse::BadRequest().body("proof-of-possession check failed\n");
        }
    }

    forward(state, operation, Some(body)).await
}

/// A verified TLS client certificate is sufficient; otherwise HTTP authentication decides.
fn authorized(req: &HttpRequest, state: &ProxyState) -> bool {
    let peer = req.conn_data::<PeerCertificate>();

    if let Some(peer) = peer {
        log::info!("Client authenticated by certificate {}", peer.fingerprint());
        return true;
    }

    let Some(dispatcher) = &state.dispatcher else {
        log::info!("Rejecting request without client certificate, HTTP auth is disabled");
        return false;
    };

    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let target = req.uri().path_and_query().map_or(req.path(), |target| target.as_str());
    let header = AuthHeader::parse(req.method().as_str(), target, authorization);
    let approved = dispatcher.authenticate(&header, peer);

    log::info!(
        "HTTP {:?} authentication of {:?}: {}",
        header.mode,
        header.user,
        if approved { "approved" } else { "rejected" },
    );

    approved
}

fn unauthorized(state: &ProxyState) -> HttpResponse {
    let mut res = HttpResponse::Unauthorized();

    if let Some(dispatcher) = &state.dispatcher {
        res.insert_header((header::WWW_AUTHENTICATE, dispatcher.challenge(&state.nonce())));
    }

    res.force_close().finish()
}

fn check_pop(req: &HttpRequest, body: &[u8]) -> Result<(), &'static str> {
    let Some(ChannelBinding(binding)) = req.conn_data::<ChannelBinding>() else {
        return Err("TLS session has no channel binding");
    };

    let csr = cert::csr_from_body(body).map_err(|_| "malformed CSR")?;

    let Some(password) = cert::challenge_password(&csr) else {
        return Err("CSR has no challengePassword");
    };

    if password != BASE64_STANDARD.encode(binding) {
        return Err("challengePassword does not match the TLS channel binding");
    }

    Ok(())
}

async fn forward(state: &ProxyState, operation: Operation, body: Option<Bytes>) -> HttpResponse {
    let upstream = match state.upstream.forward(operation, body).await {
        Ok(upstream) => upstream,
        Err(err) => {
            log::warn!("{operation} failed upstream: {err}");
            return HttpResponse::BadGateway().finish();
        }
    };

    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut res = HttpResponse::build(status);

    if let Some(content_type) = upstream.content_type {
        res.insert_header((header::CONTENT_TYPE, content_type));
    }

    if let Some(retry_after) = upstream.retry_after {
        res.insert_header((header::RETRY_AFTER, retry_after));
    }

    res.body(upstream.body)
}
