//! rustls configuration for both ends of an EST connection.

use std::{
    io::{BufReader, Cursor},
    sync::Arc,
};

use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::CryptoProvider,
    pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime},
    server::WebPkiClientVerifier,
    ClientConfig, ConnectionCommon, DigitallySignedStruct, RootCertStore, ServerConfig,
    SignatureScheme,
};
use sha2::{Digest as _, Sha256};

use crate::{
    cert::Credential,
    error::{EstError, Result},
};

/// Exporter label of the `tls-exporter` channel binding, see [RFC 9266 §2].
///
/// [RFC 9266 §2]: https://datatracker.ietf.org/doc/html/rfc9266#section-2
const CHANNEL_BINDING_LABEL: &[u8] = b"EXPORTER-Channel-Binding";

/// Length of the exported channel binding.
pub const CHANNEL_BINDING_LEN: usize = 32;

/// The crypto provider used for every config built here.
pub fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// How the client decides to trust the EST server.
#[derive(Debug, Clone)]
pub enum ServerTrust {
    /// Verify the server against these roots.
    Anchors(RootCertStore),

    /// No trust anchor configured; the server certificate is printed for manual inspection and
    /// the handshake is refused.
    Manual,
}

/// Loads PEM certificates into a root store.
pub fn root_store_from_pem(pem: &[u8]) -> Result<RootCertStore> {
    let mut rdr = BufReader::new(Cursor::new(pem));
    let mut roots = RootCertStore::empty();

    for cert in rustls_pemfile::certs(&mut rdr) {
        let cert = cert.map_err(|err| EstError::decode("trust anchor", err))?;
        roots
            .add(cert)
            .map_err(|err| EstError::decode("trust anchor", err))?;
    }

    if roots.is_empty() {
        return Err(EstError::Configuration(
            "trust store contains no certificates".to_owned(),
        ));
    }

    Ok(roots)
}

fn identity_parts(
    identity: &Credential,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let chain = identity
        .certificate_chain()?
        .into_iter()
        .map(CertificateDer::from)
        .collect::<Vec<_>>();

    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        identity.private_key_der()?.to_vec(),
    ));

    Ok((chain, key))
}

/// Builds the client side TLS config, optionally presenting `identity` for mutual TLS.
pub fn client_config(trust: ServerTrust, identity: Option<&Credential>) -> Result<ClientConfig> {
    let builder = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?;

    let builder = match trust {
        ServerTrust::Anchors(roots) => builder.with_root_certificates(roots),
        ServerTrust::Manual => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(ManualVerifier {
                provider: provider(),
            })),
    };

    let config = match identity {
        Some(identity) => {
            let (chain, key) = identity_parts(identity)?;
            builder.with_client_auth_cert(chain, key)?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(config)
}

/// Builds the proxy's server side TLS config.
///
/// Client certificates are optional; when presented they must chain to `trusted`.
pub fn server_config(identity: &Credential, trusted: RootCertStore) -> Result<ServerConfig> {
    let client_verifier =
        WebPkiClientVerifier::builder_with_provider(Arc::new(trusted), provider())
            .allow_unauthenticated()
            .build()
            .map_err(|err| EstError::Configuration(err.to_string()))?;

    let (chain, key) = identity_parts(identity)?;

    let config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(chain, key)?;

    Ok(config)
}

/// Exports the `tls-exporter` channel binding of an established connection.
pub fn channel_binding<Data>(conn: &ConnectionCommon<Data>) -> Option<Vec<u8>> {
    match conn.export_keying_material(
        vec![0; CHANNEL_BINDING_LEN],
        CHANNEL_BINDING_LABEL,
        None,
    ) {
        Ok(binding) => Some(binding),
        Err(err) => {
            log::warn!("TLS session has no channel binding: {err}");
            None
        }
    }
}

/// Hex SHA-256 fingerprint of a DER certificate.
pub fn fingerprint(cert: &[u8]) -> String {
    hex::encode(Sha256::digest(cert))
}

/// Refuses every server certificate after printing its fingerprint.
#[derive(Debug)]
struct ManualVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for ManualVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        log::warn!(
            "No trust anchor configured; server certificate for {:?} not approved (SHA-256 {}, {} intermediates)",
            server_name,
            fingerprint(end_entity),
            intermediates.len(),
        );

        Err(rustls::Error::InvalidCertificate(
            rustls::CertificateError::UnknownIssuer,
        ))
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestPki;

    #[test]
    fn test_root_store() {
        let pki = TestPki::new();
        let roots = root_store_from_pem(pki.ca_cert_pem.as_bytes()).unwrap();
        assert_eq!(roots.len(), 1);

        let err = root_store_from_pem(b"").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_manual_verifier_refuses() {
        let pki = TestPki::new();
        let identity = pki.server_credential();
        let chain = identity.certificate_chain().unwrap();

        let verifier = ManualVerifier {
            provider: provider(),
        };
        let result = verifier.verify_server_cert(
            &CertificateDer::from(chain[0].clone()),
            &[],
            &ServerName::try_from("localhost").unwrap(),
            &[],
            UnixTime::now(),
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_configs_build() {
        let pki = TestPki::new();
        let roots = root_store_from_pem(pki.ca_cert_pem.as_bytes()).unwrap();

        server_config(&pki.server_credential(), roots.clone()).unwrap();
        client_config(ServerTrust::Anchors(roots), Some(&pki.client_credential())).unwrap();
        client_config(ServerTrust::Manual, None).unwrap();
    }
}
