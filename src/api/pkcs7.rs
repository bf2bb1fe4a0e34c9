//! Certs-only PKCS#7 (CMS `SignedData`) bundles as carried by `/cacerts` and enrollment
//! responses.

use cms::{
    cert::CertificateChoices,
    content_info::{CmsVersion, ContentInfo},
    signed_data::{CertificateSet, EncapsulatedContentInfo, SignedData, SignerInfos},
};
use const_oid::db::rfc5911::{ID_DATA, ID_SIGNED_DATA};
use der::{
    asn1::SetOfVec, pem::LineEnding, Any, Decode as _, DecodePem as _, Encode as _,
    EncodePem as _,
};
use x509_cert::Certificate;

use crate::{
    api::{decode_base64_body, encode_base64_body},
    error::{EstError, Result},
};

/// Extracts the certificates from a base64 encoded certs-only bundle.
pub fn certificates(body: &[u8]) -> Result<Vec<Certificate>> {
    let der = decode_base64_body(body)?;

    let content_info =
        ContentInfo::from_der(&der).map_err(|err| EstError::decode("PKCS7", err))?;

    if content_info.content_type != ID_SIGNED_DATA {
        return Err(EstError::decode(
            "PKCS7",
            format!("unexpected content type {}", content_info.content_type),
        ));
    }

    let signed_data = content_info
        .content
        .decode_as::<SignedData>()
        .map_err(|err| EstError::decode("PKCS7", err))?;

    let certs = signed_data
        .certificates
        .map(|set| {
            set.0
                .into_vec()
                .into_iter()
                .filter_map(|choice| match choice {
                    CertificateChoices::Certificate(cert) => Some(cert),
                    _ => None,
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if certs.is_empty() {
        return Err(EstError::decode("PKCS7", "bundle holds no certificates"));
    }

    Ok(certs)
}

/// Converts a base64 encoded certs-only bundle to concatenated PEM certificates.
pub fn to_pem(body: &[u8]) -> Result<String> {
    let mut pem = String::new();

    for cert in certificates(body)? {
        let block = cert
            .to_pem(LineEnding::LF)
            .map_err(|err| EstError::decode("certificate", err))?;
        pem.push_str(&block);
    }

    Ok(pem)
}

/// Builds a base64 encoded certs-only bundle.
pub fn certs_only(certs: Vec<Certificate>) -> Result<Vec<u8>> {
    let choices = certs
        .into_iter()
        .map(CertificateChoices::Certificate)
        .collect::<Vec<_>>();

    let certificates = SetOfVec::try_from(choices)
        .map(CertificateSet)
        .map_err(|err| EstError::decode("certificate set", err))?;

    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::new(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: ID_DATA,
            econtent: None,
        },
        certificates: Some(certificates),
        crls: None,
        signer_infos: SignerInfos(SetOfVec::new()),
    };

    let content_info = ContentInfo {
        content_type: ID_SIGNED_DATA,
        content: Any::encode_from(&signed_data).map_err(|err| EstError::decode("PKCS7", err))?,
    };

    let der = content_info
        .to_der()
        .map_err(|err| EstError::decode("PKCS7", err))?;

    Ok(encode_base64_body(&der))
}

/// Builds a certs-only bundle from PEM certificates, or passes an existing base64 bundle
/// through unchanged.
pub fn normalize_bundle(raw: &[u8]) -> Result<Vec<u8>> {
    if !raw.windows(11).any(|w| w == b"-----BEGIN ") {
        // already a base64 bundle, validate it
        certificates(raw)?;
        return Ok(raw.to_vec());
    }

    let certs = Certificate::load_pem_chain(raw).map_err(|err| EstError::decode("PEM", err))?;
    certs_only(certs)
}

/// Parses a single PEM certificate.
pub fn certificate_from_pem(pem: &str) -> Result<Certificate> {
    Certificate::from_pem(pem).map_err(|err| EstError::decode("certificate", err))
}
