//! Client side enrollment flows.
//!
//! An [`EnrollmentSession`] drives one of the EST client operations to completion:
//!
//! 1. `/cacerts`: [`EnrollmentSession::get_ca_certs`]
//! 2. `/csrattrs` only: [`EnrollmentSession::get_csr_attributes`]
//! 3. `/simpleenroll`, optionally guided by `/csrattrs`: [`EnrollmentSession::enroll`]
//! 4. `/simplereenroll` with the session's identity: [`EnrollmentSession::reenroll`]
//!
//! Enrollment submits a CSR, and if the CA answers with a retry directive, waits as instructed
//! and submits once more with a CSR rebuilt for the new TLS session. A second retry request
//! fails the enrollment. The certificate is written only once it has been issued.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use base64::prelude::*;
use p256::ecdsa::SigningKey;
use time::OffsetDateTime;
use x509_cert::{name::Name, request::CertReq};
use zeroize::Zeroizing;

use crate::{
    api::{pkcs7, AttributeDirective, Operation},
    attrs::{self, CsrAttributeValue, CHALLENGE_PASSWORD},
    auth::client_authorization,
    cert::{self, Credential},
    error::{EstError, Result},
    req::{req_enrollment_outcome, req_expect_header, req_handle_error, EnrollmentOutcome},
    retry::{self, RetryDecision},
    trans::{EstRequest, EstResponse, EstSession, EstTransport},
};

mod artifact;

use self::artifact::{save_ca_certs, save_cert, save_csr_attrs, save_new_key};
pub use self::artifact::{CertFormat, CA_CERTS, CSR_ATTRS, NEW_CERT_PEM, NEW_CERT_PKCS7, NEW_KEY};

/// What to enroll.
pub struct EnrollmentRequest {
    /// Subject common name of a generated CSR.
    pub common_name: String,

    /// A pre-built CSR, submitted as is.
    pub existing_csr: Option<CertReq>,

    /// Key to sign a generated CSR with. When absent a new key is generated and saved.
    pub signing_key: Option<SigningKey>,

    /// Put the TLS channel binding into the CSR even if the CA did not ask for it.
    pub force_pop: bool,
}

impl EnrollmentRequest {
    pub fn new(common_name: impl Into<String>) -> Self {
        EnrollmentRequest {
            common_name: common_name.into(),
            existing_csr: None,
            signing_key: None,
            force_pop: false,
        }
    }
}

impl fmt::Debug for EnrollmentRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrollmentRequest")
            .field("common_name", &self.common_name)
            .field("existing_csr", &self.existing_csr.is_some())
            .field("signing_key", &self.signing_key.is_some())
            .field("force_pop", &self.force_pop)
            .finish()
    }
}

/// HTTP credentials used to answer an authentication challenge.
#[derive(Clone)]
pub struct HttpCredentials {
    pub user: String,
    pub password: Zeroizing<String>,
}

impl fmt::Debug for HttpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCredentials")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// How the CSR of an enrollment attempt is produced.
enum CsrPlan<'a> {
    /// Submit a pre-built CSR unchanged.
    Supplied(&'a CertReq),

    /// Build and sign a new CSR for every TLS session.
    Generate {
        key: &'a SigningKey,
        subject: &'a Name,
        force_pop: bool,
        guided: bool,
    },
}

/// Everything one invocation of the client needs.
pub struct EnrollmentSession<T> {
    transport: T,
    identity: Option<Credential>,
    http_auth: Option<HttpCredentials>,
    out_dir: PathBuf,
    format: CertFormat,
}

impl<T: EstTransport> EnrollmentSession<T> {
    pub fn new(transport: T, out_dir: impl Into<PathBuf>) -> Self {
        EnrollmentSession {
            transport,
            identity: None,
            http_auth: None,
            out_dir: out_dir.into(),
            format: CertFormat::default(),
        }
    }

    /// Identity used for re-enrollment. The transport should present the same identity.
    pub fn with_identity(mut self, identity: Credential) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_http_auth(mut self, credentials: HttpCredentials) -> Self {
        self.http_auth = Some(credentials);
        self
    }

    pub fn with_format(mut self, format: CertFormat) -> Self {
        self.format = format;
        self
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Fetches the CA certificates and writes them to `cacert.pkcs7`.
    pub async fn get_ca_certs(&self) -> Result<PathBuf> {
        let res = self.fetch(Operation::CaCerts).await?;

        let certs = pkcs7::certificates(&res.body)?;
        log::info!("Received {} CA certificates", certs.len());

        save_ca_certs(&self.out_dir, &res.body)
    }

    /// Fetches the CSR attribute directive and writes the raw body to `csr.base64`.
    pub async fn get_csr_attributes(&self) -> Result<PathBuf> {
        let res = self.fetch(Operation::CsrAttrs).await?;
        save_csr_attrs(&self.out_dir, &res.body)
    }

    /// Enrolls for a new certificate, guided by the CA's CSR attributes if `guided` is set.
    pub async fn enroll(&self, request: EnrollmentRequest, guided: bool) -> Result<PathBuf> {
        if let Some(csr) = &request.existing_csr {
            if guided || request.force_pop {
                return Err(EstError::Configuration(
                    "a pre-built CSR can't be combined with CSR attributes or PoP".to_owned(),
                ));
            }

            return self
                .submit(Operation::SimpleEnroll, &CsrPlan::Supplied(csr))
                .await;
        }

        let key = match request.signing_key {
            Some(key) => key,
            None => {
                log::info!("Generating a new P-256 key");
                let key = cert::create_p256_key();
                save_new_key(&self.out_dir, &cert::signing_key_to_pem(&key)?)?;
                key
            }
        };

        let subject = cert::common_name(&request.common_name)?;

        let plan = CsrPlan::Generate {
            key: &key,
            subject: &subject,
            force_pop: request.force_pop,
            guided,
        };

        self.submit(Operation::SimpleEnroll, &plan).await
    }

    /// Re-enrolls the session's identity, keeping its subject and key.
    pub async fn reenroll(&self, force_pop: bool) -> Result<PathBuf> {
        let Some(identity) = &self.identity else {
            return Err(EstError::Configuration(
                "re-enrollment requires an identity certificate and key".to_owned(),
            ));
        };

        log::info!("Re-enrolling {}", identity.subject());

        let plan = CsrPlan::Generate {
            key: identity.signing_key(),
            subject: identity.subject(),
            force_pop,
            guided: false,
        };

        self.submit(Operation::SimpleReenroll, &plan).await
    }

    /// Runs an enrollment with at most one retry and saves the issued certificate.
    async fn submit(&self, operation: Operation, plan: &CsrPlan<'_>) -> Result<PathBuf> {
        let bundle = match self.attempt(operation, plan).await? {
            EnrollmentOutcome::Issued(bundle) => bundle,

            EnrollmentOutcome::RetryRequested(directive) => {
                match retry::decide(&directive, OffsetDateTime::now_utc()) {
                    RetryDecision::ProceedImmediately => {
                        log::info!("Retrying {operation} immediately");
                    }
                    RetryDecision::WaitThen(delay) => {
                        log::info!("Waiting {}s before retrying {operation}", delay.as_secs());
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::Abort(reason) => {
                        return Err(EstError::RetryAborted(reason.to_string()));
                    }
                }

                match self.attempt(operation, plan).await? {
                    EnrollmentOutcome::Issued(bundle) => bundle,
                    EnrollmentOutcome::RetryRequested(_) => return Err(EstError::RetryRequested),
                }
            }
        };

        log::info!("{operation} succeeded");

        save_cert(&self.out_dir, &bundle, self.format)
    }

    /// One submission, answering at most one authentication challenge on a new connection.
    async fn attempt(
        &self,
        operation: Operation,
        plan: &CsrPlan<'_>,
    ) -> Result<EnrollmentOutcome> {
        let mut authorization = None;

        loop {
            let mut session = self.transport.open().await?;

            let body = match plan {
                CsrPlan::Supplied(csr) => cert::csr_to_body(csr)?,

                CsrPlan::Generate {
                    key,
                    subject,
                    force_pop,
                    guided,
                } => {
                    let directive = if *guided {
                        let res = session
                            .send(
                                EstRequest::new(Operation::CsrAttrs)
                                    .with_authorization(authorization.clone()),
                            )
                            .await?;

                        if authorization.is_none() {
                            let answer = self.answer_challenge(Operation::CsrAttrs, &res)?;
                            if answer.is_some() {
                                authorization = answer;
                                continue;
                            }
                        }

                        AttributeDirective::from_body(&req_handle_error(res)?.body)?
                    } else {
                        AttributeDirective::default()
                    };

                    let attributes = attrs::values_for(&directive);
                    let pop = *force_pop || directive.contains(&CHALLENGE_PASSWORD);

                    build_csr_body(&session, key, subject, &attributes, pop)?
                }
            };

            let request = EstRequest::new(operation)
                .with_body(body)
                .with_authorization(authorization.clone());

            let res = session.send(request).await?;

            if authorization.is_none() {
                if let Some(answer) = self.answer_challenge(operation, &res)? {
                    authorization = Some(answer);
                    continue;
                }
            }

            return req_enrollment_outcome(res);
        }
    }

    /// A GET operation, answering at most one authentication challenge.
    async fn fetch(&self, operation: Operation) -> Result<EstResponse> {
        let mut authorization = None;

        loop {
            let mut session = self.transport.open().await?;

            let res = session
                .send(EstRequest::new(operation).with_authorization(authorization.clone()))
                .await?;

            if authorization.is_none() {
                if let Some(answer) = self.answer_challenge(operation, &res)? {
                    authorization = Some(answer);
                    continue;
                }
            }

            return req_handle_error(res);
        }
    }

    fn answer_challenge(
        &self,
        operation: Operation,
        res: &EstResponse,
    ) -> Result<Option<Zeroizing<String>>> {
        if res.status != http::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }

        let (Some(credentials), Some(challenge)) = (
            &self.http_auth,
            req_expect_header(res, http::header::WWW_AUTHENTICATE),
        ) else {
            return Ok(None);
        };

        log::info!("{operation} requires HTTP authentication, retrying with credentials");

        client_authorization(
            challenge,
            &credentials.user,
            &credentials.password,
            operation.method().as_str(),
            &operation.path(),
        )
        .map(Some)
    }
}

fn build_csr_body<S: EstSession>(
    session: &S,
    key: &SigningKey,
    subject: &Name,
    attributes: &[CsrAttributeValue],
    pop: bool,
) -> Result<Vec<u8>> {
    let challenge_password = if pop {
        let binding = session.channel_binding().ok_or(EstError::PopUnavailable)?;
        Some(Zeroizing::new(BASE64_STANDARD.encode(binding)))
    } else {
        None
    };

    let csr = cert::build_csr(
        key,
        subject.clone(),
        attributes,
        challenge_password.as_deref().map(String::as_str),
    )?;

    cert::csr_to_body(&csr)
}

impl<T: fmt::Debug> fmt::Debug for EnrollmentSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrollmentSession")
            .field("transport", &self.transport)
            .field("identity", &self.identity.as_ref().map(Credential::subject))
            .field("http_auth", &self.http_auth)
            .field("out_dir", &self.out_dir)
            .field("format", &self.format)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use http::{header, StatusCode};
    use time::Duration;

    use super::*;
    use crate::{
        api::retry_after::format_http_date,
        attrs::EMAIL_ADDRESS,
        test::{ScriptedTransport, TestEstServer, TestPki},
    };

    fn issued(pki: &TestPki) -> EstResponse {
        EstResponse::new(StatusCode::OK, pki.issued_bundle())
    }

    fn retry_at(offset: Duration) -> EstResponse {
        let at = OffsetDateTime::now_utc() + offset;
        EstResponse::new(StatusCode::ACCEPTED, "")
            .with_header(header::RETRY_AFTER, &format_http_date(at))
    }

    fn submitted_csr(req: &EstRequest) -> CertReq {
        cert::csr_from_body(req.body.as_deref().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_simple_enroll_generates_key() {
        let pki = TestPki::new();
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new([issued(&pki)]);

        let session = EnrollmentSession::new(transport.clone(), dir.path());
        let path = session
            .enroll(EnrollmentRequest::new("127.0.0.1"), false)
            .await
            .unwrap();

        assert_eq!(path, dir.path().join(NEW_CERT_PKCS7));
        assert_eq!(fs::read(path).unwrap(), pki.issued_bundle());

        let key = cert::read_signing_key_pem(
            &fs::read_to_string(dir.path().join(NEW_KEY)).unwrap(),
        )
        .unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].operation, Operation::SimpleEnroll);

        let csr = submitted_csr(&requests[0]);
        assert_eq!(csr.info.subject.to_string(), "CN=127.0.0.1");
        assert_eq!(cert::challenge_password(&csr), None);

        let expected = cert::build_csr(&key, cert::common_name("127.0.0.1").unwrap(), &[], None)
            .unwrap();
        assert_eq!(csr.info.public_key, expected.info.public_key);
    }

    #[tokio::test]
    async fn test_pem_output() {
        let pki = TestPki::new();
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new([issued(&pki)]);

        let mut request = EnrollmentRequest::new("device");
        request.signing_key = Some(cert::create_p256_key());

        let path = EnrollmentSession::new(transport, dir.path())
            .with_format(CertFormat::Pem)
            .enroll(request, false)
            .await
            .unwrap();

        assert_eq!(path, dir.path().join(NEW_CERT_PEM));
        assert_eq!(
            pkcs7::certificate_from_pem(&fs::read_to_string(path).unwrap()).unwrap(),
            pkcs7::certificate_from_pem(&pki.client_cert_pem).unwrap(),
        );

        // an explicit key is not saved
        assert!(!dir.path().join(NEW_KEY).exists());
    }

    #[tokio::test]
    async fn test_retry_then_issued_rebuilds_csr() {
        let pki = TestPki::new();
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new([retry_at(Duration::seconds(-10)), issued(&pki)]);

        let mut request = EnrollmentRequest::new("127.0.0.1");
        request.signing_key = Some(cert::create_p256_key());

        EnrollmentSession::new(transport.clone(), dir.path())
            .enroll(request, false)
            .await
            .unwrap();

        assert_eq!(transport.sessions(), 2);
        assert!(dir.path().join(NEW_CERT_PKCS7).exists());
    }

    #[tokio::test]
    async fn test_retry_waits_for_delay() {
        let pki = TestPki::new();
        let dir = tempfile::tempdir().unwrap();
        let retry = EstResponse::new(StatusCode::ACCEPTED, "").with_header(header::RETRY_AFTER, "1");
        let transport = ScriptedTransport::new([retry, issued(&pki)]);

        let mut request = EnrollmentRequest::new("127.0.0.1");
        request.signing_key = Some(cert::create_p256_key());

        let started = std::time::Instant::now();
        EnrollmentSession::new(transport, dir.path())
            .enroll(request, false)
            .await
            .unwrap();
        assert!(started.elapsed() >= std::time::Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_second_retry_fails_without_writing() {
        let pki = TestPki::new();
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new([
            retry_at(Duration::seconds(-10)),
            retry_at(Duration::seconds(-10)),
            issued(&pki),
        ]);

        let mut request = EnrollmentRequest::new("127.0.0.1");
        request.signing_key = Some(cert::create_p256_key());

        let err = EnrollmentSession::new(transport.clone(), dir.path())
            .enroll(request, false)
            .await
            .unwrap_err();

        assert!(matches!(err, EstError::RetryRequested));
        assert_eq!(transport.requests().len(), 2);
        assert!(!dir.path().join(NEW_CERT_PKCS7).exists());
    }

    #[tokio::test]
    async fn test_retry_too_far_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new([retry_at(Duration::hours(1))]);

        let mut request = EnrollmentRequest::new("127.0.0.1");
        request.signing_key = Some(cert::create_p256_key());

        let err = EnrollmentSession::new(transport.clone(), dir.path())
            .enroll(request, false)
            .await
            .unwrap_err();

        match err {
            EstError::RetryAborted(reason) => {
                assert!(reason.contains("retry window too far in the future"), "{reason}");
            }
            err => panic!("unexpected error: {err}"),
        }
        assert_eq!(transport.requests().len(), 1);

        let transport = ScriptedTransport::new([EstResponse::new(StatusCode::ACCEPTED, "")]);
        let mut request = EnrollmentRequest::new("127.0.0.1");
        request.signing_key = Some(cert::create_p256_key());

        let err = EnrollmentSession::new(transport, dir.path())
            .enroll(request, false)
            .await
            .unwrap_err();
        assert!(matches!(err, EstError::RetryAborted(ref reason) if reason == "invalid retry directive"));
    }

    #[tokio::test]
    async fn test_server_error_surfaces_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new([EstResponse::new(
            StatusCode::BAD_REQUEST,
            "CSR rejected: key too weak",
        )]);

        let mut request = EnrollmentRequest::new("127.0.0.1");
        request.signing_key = Some(cert::create_p256_key());

        let err = EnrollmentSession::new(transport, dir.path())
            .enroll(request, false)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EstError::Server { status: 400, ref body } if body == "CSR rejected: key too weak"
        ));
        assert!(!dir.path().join(NEW_CERT_PKCS7).exists());
    }

    #[tokio::test]
    async fn test_guided_enroll_with_pop() {
        let pki = TestPki::new();
        let dir = tempfile::tempdir().unwrap();

        let directive = [CHALLENGE_PASSWORD, EMAIL_ADDRESS]
            .into_iter()
            .collect::<AttributeDirective>();
        let transport = ScriptedTransport::new([
            EstResponse::new(StatusCode::OK, directive.to_body().unwrap()),
            issued(&pki),
        ]);

        let mut request = EnrollmentRequest::new("127.0.0.1");
        request.signing_key = Some(cert::create_p256_key());

        EnrollmentSession::new(transport.clone(), dir.path())
            .enroll(request, true)
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(transport.sessions(), 1);
        assert_eq!(requests[0].operation, Operation::CsrAttrs);

        let csr = submitted_csr(&requests[1]);
        assert_eq!(
            cert::challenge_password(&csr).unwrap(),
            BASE64_STANDARD.encode([7_u8; 32]),
        );

        let email = csr
            .info
            .attributes
            .iter()
            .find(|attr| attr.oid == EMAIL_ADDRESS)
            .unwrap();
        assert_eq!(
            email.values.iter().next().unwrap().value(),
            b"bubba@notmyemail.com"
        );
    }

    #[tokio::test]
    async fn test_pop_without_channel_binding() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new([]).without_channel_binding();

        let mut request = EnrollmentRequest::new("127.0.0.1");
        request.signing_key = Some(cert::create_p256_key());
        request.force_pop = true;

        let err = EnrollmentSession::new(transport.clone(), dir.path())
            .enroll(request, false)
            .await
            .unwrap_err();

        assert!(matches!(err, EstError::PopUnavailable));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_directive_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let transport =
            ScriptedTransport::new([EstResponse::new(StatusCode::OK, "MAkGA1UEAwwCaGk=")]);

        let mut request = EnrollmentRequest::new("127.0.0.1");
        request.signing_key = Some(cert::create_p256_key());

        let err = EnrollmentSession::new(transport.clone(), dir.path())
            .enroll(request, true)
            .await
            .unwrap_err();

        assert!(matches!(err, EstError::AttributeDecode(_)), "{err}");
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_csr_attributes_only_writes_raw_body() {
        let dir = tempfile::tempdir().unwrap();
        let raw = "MBQGBysGAQEBARYGCSqGSIb3DQEJBw==\r\n";
        let transport = ScriptedTransport::new([EstResponse::new(StatusCode::OK, raw)]);

        let path = EnrollmentSession::new(transport, dir.path())
            .get_csr_attributes()
            .await
            .unwrap();

        assert_eq!(path, dir.path().join(CSR_ATTRS));
        assert_eq!(fs::read(path).unwrap(), raw.as_bytes());
    }

    #[tokio::test]
    async fn test_challenge_answered_on_new_session() {
        let pki = TestPki::new();
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new([
            EstResponse::new(StatusCode::UNAUTHORIZED, "")
                .with_header(header::WWW_AUTHENTICATE, "Basic realm=\"estrealm\""),
            issued(&pki),
        ]);

        let mut request = EnrollmentRequest::new("127.0.0.1");
        request.signing_key = Some(cert::create_p256_key());

        EnrollmentSession::new(transport.clone(), dir.path())
            .with_http_auth(HttpCredentials {
                user: "estuser".to_owned(),
                password: Zeroizing::new("estpwd".to_owned()),
            })
            .enroll(request, false)
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(transport.sessions(), 2);
        assert!(requests[0].authorization.is_none());
        assert_eq!(
            requests[1].authorization.as_deref().map(String::as_str),
            Some("Basic ZXN0dXNlcjplc3Rwd2Q="),
        );
    }

    #[tokio::test]
    async fn test_guided_enroll_answers_csrattrs_challenge() {
        let pki = TestPki::new();
        let dir = tempfile::tempdir().unwrap();

        let directive = [EMAIL_ADDRESS].into_iter().collect::<AttributeDirective>();
        let transport = ScriptedTransport::new([
            EstResponse::new(StatusCode::UNAUTHORIZED, "")
                .with_header(header::WWW_AUTHENTICATE, "Basic realm=\"estrealm\""),
            EstResponse::new(StatusCode::OK, directive.to_body().unwrap()),
            issued(&pki),
        ]);

        let mut request = EnrollmentRequest::new("127.0.0.1");
        request.signing_key = Some(cert::create_p256_key());

        EnrollmentSession::new(transport.clone(), dir.path())
            .with_http_auth(HttpCredentials {
                user: "estuser".to_owned(),
                password: Zeroizing::new("estpwd".to_owned()),
            })
            .enroll(request, true)
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(transport.sessions(), 2);
        assert_eq!(requests[0].operation, Operation::CsrAttrs);
        assert!(requests[0].authorization.is_none());

        // the csrattrs and enroll requests of the reopened session both carry credentials
        for req in &requests[1..] {
            assert_eq!(
                req.authorization.as_deref().map(String::as_str),
                Some("Basic ZXN0dXNlcjplc3Rwd2Q="),
            );
        }
        assert_eq!(requests[2].operation, Operation::SimpleEnroll);
        assert!(dir.path().join(NEW_CERT_PKCS7).exists());
    }

    #[tokio::test]
    async fn test_rejected_twice_is_authentication_error() {
        let challenge = || {
            EstResponse::new(StatusCode::UNAUTHORIZED, "")
                .with_header(header::WWW_AUTHENTICATE, "Basic realm=\"estrealm\"")
        };
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new([challenge(), challenge()]);

        let err = EnrollmentSession::new(transport.clone(), dir.path())
            .with_http_auth(HttpCredentials {
                user: "estuser".to_owned(),
                password: Zeroizing::new("wrong".to_owned()),
            })
            .get_ca_certs()
            .await
            .unwrap_err();

        assert!(matches!(err, EstError::Authentication));
        assert_eq!(transport.sessions(), 2);
    }

    #[tokio::test]
    async fn test_reenroll() {
        let pki = TestPki::new();
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new([issued(&pki)]);

        let err = EnrollmentSession::new(transport.clone(), dir.path())
            .reenroll(false)
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(transport.sessions(), 0);

        let identity = pki.client_credential();
        EnrollmentSession::new(transport.clone(), dir.path())
            .with_identity(identity.clone())
            .reenroll(false)
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].operation, Operation::SimpleReenroll);

        let csr = submitted_csr(&requests[0]);
        assert_eq!(&csr.info.subject, identity.subject());
        assert!(dir.path().join(NEW_CERT_PKCS7).exists());
    }

    #[tokio::test]
    async fn test_supplied_csr_is_sent_unchanged() {
        let pki = TestPki::new();
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new([issued(&pki)]);

        let key = cert::create_p256_key();
        let csr = cert::build_csr(&key, cert::common_name("pre-built").unwrap(), &[], None).unwrap();
        let body = cert::csr_to_body(&csr).unwrap();

        let mut request = EnrollmentRequest::new("ignored");
        request.existing_csr = Some(csr.clone());

        let session = EnrollmentSession::new(transport.clone(), dir.path());
        session.enroll(request, false).await.unwrap();
        assert_eq!(transport.requests()[0].body.as_deref(), Some(body.as_slice()));
        assert!(!dir.path().join(NEW_KEY).exists());

        let mut request = EnrollmentRequest::new("ignored");
        request.existing_csr = Some(csr);
        let err = session.enroll(request, true).await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_enroll_over_tls_binds_csr_to_session() {
        let server = TestEstServer::start();
        let dir = tempfile::tempdir().unwrap();

        let session = EnrollmentSession::new(server.transport(None), dir.path());
        session.get_ca_certs().await.unwrap();
        assert_eq!(
            fs::read(dir.path().join(CA_CERTS)).unwrap(),
            server.pki.ca_bundle()
        );

        let mut request = EnrollmentRequest::new("127.0.0.1");
        request.force_pop = true;
        session.enroll(request, false).await.unwrap();

        let requests = server.requests();
        let enroll = requests
            .iter()
            .find(|req| req.path == Operation::SimpleEnroll.path())
            .unwrap();

        let binding = enroll.channel_binding.as_deref().unwrap();
        assert_eq!(
            cert::challenge_password(&enroll.csr()).unwrap(),
            BASE64_STANDARD.encode(binding),
        );
        assert_eq!(
            fs::read(dir.path().join(NEW_CERT_PKCS7)).unwrap(),
            server.pki.issued_bundle()
        );
    }
}
