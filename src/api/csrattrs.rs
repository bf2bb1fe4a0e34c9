//! CSR attribute directive, see [RFC 7030 §4.5.2].
//!
//! ```text
//! CsrAttrs ::= SEQUENCE SIZE (0..MAX) OF AttrOrOID
//!
//! AttrOrOID ::= CHOICE (oid OBJECT IDENTIFIER, attribute Attribute }
//! ```
//!
//! [RFC 7030 §4.5.2]: https://datatracker.ietf.org/doc/html/rfc7030#section-4.5.2

use der::{asn1::ObjectIdentifier, Any, Decode as _, Encode as _, Tag, Tagged as _};
use x509_cert::attr::Attribute;

use crate::{
    api::{decode_base64_body, encode_base64_body},
    error::{EstError, Result},
};

/// Character string type the CA expects for an attribute value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StringType {
    #[default]
    Utf8,
    Printable,
    Ia5,
}

impl StringType {
    fn from_tag(tag: Tag) -> Option<Self> {
        match tag {
            Tag::Utf8String => Some(StringType::Utf8),
            Tag::PrintableString => Some(StringType::Printable),
            Tag::Ia5String => Some(StringType::Ia5),
            _ => None,
        }
    }

    pub(crate) fn tag(&self) -> Tag {
        match self {
            StringType::Utf8 => Tag::Utf8String,
            StringType::Printable => Tag::PrintableString,
            StringType::Ia5 => Tag::Ia5String,
        }
    }
}

/// One requested attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveEntry {
    pub oid: ObjectIdentifier,
    pub string_type: StringType,
}

/// Ordered list of the attributes a CA wants to see in a CSR.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeDirective {
    pub entries: Vec<DirectiveEntry>,
}

impl AttributeDirective {
    /// Decodes the base64 body of a `/csrattrs` response.
    ///
    /// An empty body is an empty directive.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(AttributeDirective::default());
        }

        let der = decode_base64_body(body)
            .map_err(|err| EstError::AttributeDecode(err.to_string()))?;

        Self::from_der(&der)
    }

    /// Decodes DER encoded `CsrAttrs`.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let items = Vec::<Any>::from_der(der)
            .map_err(|err| EstError::AttributeDecode(err.to_string()))?;

        let mut entries = Vec::with_capacity(items.len());

        for item in items {
            let entry = match item.tag() {
                Tag::ObjectIdentifier => DirectiveEntry {
                    oid: item
                        .decode_as::<ObjectIdentifier>()
                        .map_err(|err| EstError::AttributeDecode(err.to_string()))?,
                    string_type: StringType::default(),
                },

                Tag::Sequence => {
                    let attr = item
                        .decode_as::<Attribute>()
                        .map_err(|err| EstError::AttributeDecode(err.to_string()))?;

                    let string_type = attr
                        .values
                        .iter()
                        .find_map(|value| StringType::from_tag(value.tag()))
                        .unwrap_or_default();

                    DirectiveEntry {
                        oid: attr.oid,
                        string_type,
                    }
                }

                tag => {
                    return Err(EstError::AttributeDecode(format!(
                        "unexpected {tag} in CSR attributes"
                    )))
                }
            };

            entries.push(entry);
        }

        Ok(AttributeDirective { entries })
    }

    /// Encodes the directive as a list of bare OIDs, base64 wrapped.
    pub fn to_body(&self) -> Result<Vec<u8>> {
        let oids = self
            .entries
            .iter()
            .map(|entry| entry.oid)
            .collect::<Vec<_>>();

        let der = oids
            .to_der()
            .map_err(|err| EstError::AttributeDecode(err.to_string()))?;

        Ok(encode_base64_body(&der))
    }

    pub fn contains(&self, oid: &ObjectIdentifier) -> bool {
        self.entries.iter().any(|entry| &entry.oid == oid)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<ObjectIdentifier> for AttributeDirective {
    fn from_iter<I: IntoIterator<Item = ObjectIdentifier>>(iter: I) -> Self {
        AttributeDirective {
            entries: iter
                .into_iter()
                .map(|oid| DirectiveEntry {
                    oid,
                    string_type: StringType::default(),
                })
                .collect(),
        }
    }
}
