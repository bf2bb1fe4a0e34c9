//! HTTP Digest access authentication, see [RFC 2617 §3].
//!
//! Only `algorithm=MD5` with `qop=auth` (or no qop) is supported.
//!
//! [RFC 2617 §3]: https://datatracker.ietf.org/doc/html/rfc2617#section-3

use md5::{Digest as _, Md5};
use zeroize::Zeroizing;

fn md5_hex(parts: &[&str]) -> Zeroizing<String> {
    let mut hasher = Md5::new();

    for (idx, part) in parts.iter().enumerate() {
        if idx > 0 {
            hasher.update(b":");
        }
        hasher.update(part.as_bytes());
    }

    let mut digest = Zeroizing::new([0; 16]);
    digest.copy_from_slice(&hasher.finalize());

    Zeroizing::new(hex::encode(*digest))
}

/// `HA1 = MD5(username:realm:password)`.
pub fn ha1(user: &str, realm: &str, password: &str) -> Zeroizing<String> {
    md5_hex(&[user, realm, password])
}

/// Inputs to the `response` computation besides HA1.
#[derive(Debug, Clone, Copy)]
pub struct DigestContext<'a> {
    pub method: &'a str,
    pub uri: &'a str,
    pub nonce: &'a str,
    pub qop: Option<&'a str>,
    pub nc: &'a str,
    pub cnonce: &'a str,
}

/// Computes the `response` parameter from a stored HA1.
pub fn response(ha1: &str, ctx: &DigestContext<'_>) -> Zeroizing<String> {
    let ha2 = md5_hex(&[ctx.method, ctx.uri]);

    match ctx.qop {
        Some(qop) => md5_hex(&[ha1, ctx.nonce, ctx.nc, ctx.cnonce, qop, &ha2]),
        None => md5_hex(&[ha1, ctx.nonce, &ha2]),
    }
}

/// Splits the `key=value, key="quoted, value"` parameter list of an auth header.
pub fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else {
            break;
        };

        let key = rest[..eq].trim().trim_start_matches(',').trim().to_ascii_lowercase();
        rest = rest[eq + 1..].trim_start();

        let value = if let Some(quoted) = rest.strip_prefix('"') {
            let mut value = String::new();
            let mut chars = quoted.char_indices();
            let mut end = quoted.len();

            while let Some((idx, ch)) = chars.next() {
                match ch {
                    '\\' => {
                        if let Some((_, escaped)) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => {
                        end = idx + 1;
                        break;
                    }
                    ch => value.push(ch),
                }
            }

            rest = &quoted[end.min(quoted.len())..];
            value
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            let value = rest[..end].trim().to_owned();
            rest = &rest[end..];
            value
        };

        params.push((key, value));
        rest = rest.trim_start().trim_start_matches(',').trim_start();
    }

    params
}

/// Looks up a parameter by (lowercase) name.
pub fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}
