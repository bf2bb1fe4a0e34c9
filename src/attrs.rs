//! Turns the CA's CSR attribute directive into values to embed in a CSR.

use const_oid::{db::DB, ObjectIdentifier};

use crate::{
    api::{AttributeDirective, StringType},
    error::Result,
};

/// PKCS#9 `challengePassword`.
pub const CHALLENGE_PASSWORD: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.7");

/// X.520 `commonName`.
pub const COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");

/// PKCS#9 `emailAddress`.
pub const EMAIL_ADDRESS: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.1");

const COMMON_NAME_PLACEHOLDER: &str = "test\n";
const EMAIL_ADDRESS_PLACEHOLDER: &str = "bubba@notmyemail.com";

/// A CSR attribute and the value the client fills in for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrAttributeValue {
    pub oid: ObjectIdentifier,
    pub string_type: StringType,
    pub value: String,
}

/// Decodes a raw `/csrattrs` body and produces the attribute values for a CSR.
pub fn negotiate(raw: &[u8]) -> Result<Vec<CsrAttributeValue>> {
    let directive = AttributeDirective::from_body(raw)?;
    Ok(values_for(&directive))
}

/// Produces the attribute values for a decoded directive, in directive order.
///
/// `challengePassword` is never produced here, it is filled in from the TLS channel binding
/// when the CSR is built.
pub fn values_for(directive: &AttributeDirective) -> Vec<CsrAttributeValue> {
    let mut values = Vec::with_capacity(directive.entries.len());

    for entry in &directive.entries {
        let value = if entry.oid == CHALLENGE_PASSWORD {
            log::debug!("challengePassword requested, left to proof-of-possession");
            continue;
        } else if entry.oid == COMMON_NAME {
            COMMON_NAME_PLACEHOLDER
        } else if entry.oid == EMAIL_ADDRESS {
            EMAIL_ADDRESS_PLACEHOLDER
        } else if DB.by_oid(&entry.oid).is_none() {
            log::info!("Attribute {} is undefined; skipping it", entry.oid);
            continue;
        } else {
            ""
        };

        values.push(CsrAttributeValue {
            oid: entry.oid,
            string_type: entry.string_type,
            value: value.to_owned(),
        });
    }

    values
}

#[cfg(test)]
mod tests {
    use const_oid::db::rfc4519::SERIAL_NUMBER;

    use super::*;

    /// An arc no registry knows about.
    const PRIVATE_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.99999.42.1");

    fn negotiate_oids(oids: &[ObjectIdentifier]) -> Vec<CsrAttributeValue> {
        values_for(&oids.iter().copied().collect())
    }

    #[test]
    fn test_placeholders() {
        let values = negotiate_oids(&[COMMON_NAME, EMAIL_ADDRESS]);

        assert_eq!(values.len(), 2);
        assert_eq!(values[0].oid, COMMON_NAME);
        assert_eq!(values[0].value, "test\n");
        assert_eq!(values[1].oid, EMAIL_ADDRESS);
        assert_eq!(values[1].value, "bubba@notmyemail.com");
    }

    #[test]
    fn test_known_oid_gets_empty_value() {
        let values = negotiate_oids(&[SERIAL_NUMBER]);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].oid, SERIAL_NUMBER);
        assert_eq!(values[0].value, "");
    }

    #[test]
    fn test_undefined_oid_is_skipped() {
        let values = negotiate_oids(&[PRIVATE_OID, COMMON_NAME]);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].oid, COMMON_NAME);
    }

    #[test]
    fn test_never_emits_challenge_password() {
        let directives: [&[ObjectIdentifier]; 4] = [
            &[CHALLENGE_PASSWORD],
            &[CHALLENGE_PASSWORD, CHALLENGE_PASSWORD],
            &[COMMON_NAME, CHALLENGE_PASSWORD, EMAIL_ADDRESS],
            &[PRIVATE_OID, CHALLENGE_PASSWORD, SERIAL_NUMBER],
        ];

        for oids in directives {
            let values = negotiate_oids(oids);
            assert!(values.iter().all(|value| value.oid != CHALLENGE_PASSWORD));
        }
    }

    #[test]
    fn test_negotiate_raw_body() {
        let directive = [COMMON_NAME, CHALLENGE_PASSWORD]
            .into_iter()
            .collect::<AttributeDirective>();
        let body = directive.to_body().unwrap();

        let values = negotiate(&body).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].oid, COMMON_NAME);

        assert!(negotiate(b"").unwrap().is_empty());
        assert!(negotiate(b"@@@").is_err());
    }
}
