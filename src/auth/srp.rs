//! SRP verifier database in the OpenSSL `srpvfile` text format.
//!
//! Each line holds tab separated fields:
//!
//! ```text
//! V <verifier> <salt> <user> <gN id> [info]   valid user
//! R <verifier> <salt> <user> <gN id> [info]   revoked user, ignored
//! I <N>        <g>    <id>                    group parameters referenced by "gN id"
//! ```

use std::{collections::HashMap, fs, path::Path};

use crate::error::{EstError, Result};

/// One user of the verifier database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrpVerifierRecord {
    pub username: String,
    /// Group modulus, if the group is defined in the file itself.
    pub n: Option<String>,
    /// Group generator, if the group is defined in the file itself.
    pub g: Option<String>,
    /// Group id as written in the file.
    pub group: String,
    pub salt: String,
    pub verifier: String,
    pub info: Option<String>,
}

/// Parameters handed to the TLS layer to complete an SRP handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrpServerParams<'a> {
    pub group: &'a str,
    pub n: Option<&'a str>,
    pub g: Option<&'a str>,
    pub salt: &'a str,
    pub verifier: &'a str,
    pub info: Option<&'a str>,
}

/// Immutable SRP verifier database, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct SrpVerifierDb {
    users: HashMap<String, SrpVerifierRecord>,
}

impl SrpVerifierDb {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| {
            EstError::Configuration(format!(
                "unable to read SRP verifier file {}: {err}",
                path.display()
            ))
        })?;

        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut groups = HashMap::<&str, (&str, &str)>::new();
        let mut rows = Vec::new();

        for (idx, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');

            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }

            let fields = line.split('\t').collect::<Vec<_>>();

            let malformed = || {
                EstError::Configuration(format!("malformed SRP verifier file, line {}", idx + 1))
            };

            match fields.first().copied() {
                Some("I") => {
                    let [_, n, g, id, ..] = fields[..] else {
                        return Err(malformed());
                    };
                    groups.insert(id, (n, g));
                }

                Some("V") => {
                    let [_, verifier, salt, user, group, ref rest @ ..] = fields[..] else {
                        return Err(malformed());
                    };
                    let info = rest.first().copied().filter(|info| !info.is_empty());
                    rows.push((user, verifier, salt, group, info));
                }

                Some("R") => {
                    log::debug!("Ignoring revoked SRP user on line {}", idx + 1);
                }

                _ => return Err(malformed()),
            }
        }

        let users = rows
            .into_iter()
            .map(|(user, verifier, salt, group, info)| {
                let (n, g) = groups
                    .get(group)
                    .map(|(n, g)| (Some(n.to_string()), Some(g.to_string())))
                    .unwrap_or((None, None));

                let record = SrpVerifierRecord {
                    username: user.to_owned(),
                    n,
                    g,
                    group: group.to_owned(),
                    salt: salt.to_owned(),
                    verifier: verifier.to_owned(),
                    info: info.map(str::to_owned),
                };

                (record.username.clone(), record)
            })
            .collect::<HashMap<_, _>>();

        log::info!("Loaded {} SRP verifiers", users.len());

        Ok(SrpVerifierDb { users })
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Looks up the parameters for `username`.
    ///
    /// An unknown user means the handshake must fail.
    pub fn lookup(&self, username: &str) -> Result<SrpServerParams<'_>> {
        let Some(record) = self.users.get(username) else {
            log::info!("User {username} doesn't exist in SRP database");
            return Err(EstError::Authentication);
        };

        Ok(SrpServerParams {
            group: &record.group,
            n: record.n.as_deref(),
            g: record.g.as_deref(),
            salt: &record.salt,
            verifier: &record.verifier,
            info: record.info.as_deref(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VFILE: &str = "\
I\tEeGhR7\t2\tgrp1
V\tvk3lVm1xT2\tbxB6k\testuser\tgrp1\tlab device
V\tq1w2e3\tz9y8\tsrpuser\t1024\t
R\tdeadbeef\tcafe\tformer\tgrp1\t
";

    #[test]
    fn test_lookup() {
        let db = SrpVerifierDb::parse(VFILE).unwrap();
        assert_eq!(db.len(), 2);

        let params = db.lookup("estuser").unwrap();
        assert_eq!(params.verifier, "vk3lVm1xT2");
        assert_eq!(params.salt, "bxB6k");
        assert_eq!(params.n, Some("EeGhR7"));
        assert_eq!(params.g, Some("2"));
        assert_eq!(params.info, Some("lab device"));

        // well-known group referenced by id only
        let params = db.lookup("srpuser").unwrap();
        assert_eq!(params.group, "1024");
        assert_eq!(params.n, None);
        assert_eq!(params.info, None);
    }

    #[test]
    fn test_unknown_and_revoked_users_fail() {
        let db = SrpVerifierDb::parse(VFILE).unwrap();
        assert!(matches!(db.lookup("nobody"), Err(EstError::Authentication)));
        assert!(matches!(db.lookup("former"), Err(EstError::Authentication)));
    }

    #[test]
    fn test_malformed_file() {
        let err = SrpVerifierDb::parse("V\tonly\ttwo\n").unwrap_err();
        assert!(err.is_configuration());

        let err = SrpVerifierDb::parse("X\ta\tb\tc\td\n").unwrap_err();
        assert!(err.is_configuration());
    }
}
