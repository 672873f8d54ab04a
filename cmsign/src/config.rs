// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Optional TOML configuration for the CLI. Every value can be overridden by
//! a command-line flag.
//!
//! ```toml
//! [signing]
//! digest = "sha256"
//! rsa_identifier = "with-digest"
//!
//! [tsa]
//! url = "https://tsa.example.com"
//! digest = "sha256"
//! policy = "1.2.3.4"
//! cert_req = true
//! timeout = 30
//!
//! [tsa.headers]
//! Authorization = "Bearer ..."
//! ```

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use const_oid::ObjectIdentifier;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::{
    format::{
        algorithm::{DigestAlgorithm, RsaIdentifier},
        cms::SignOptions,
    },
    timestamp::{HttpTransport, TimestampOptions},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read config: {0:?}")]
    Read(PathBuf, #[source] io::Error),
    #[error("Failed to parse config: {0:?}")]
    Parse(PathBuf, #[source] toml_edit::de::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SigningConfig {
    pub digest: Option<DigestAlgorithm>,
    pub rsa_identifier: Option<RsaIdentifier>,
}

impl SigningConfig {
    pub fn to_options(&self) -> SignOptions {
        SignOptions {
            digest_algorithm: self.digest.unwrap_or_default(),
            rsa_identifier: self.rsa_identifier.unwrap_or_default(),
            signing_time: None,
        }
    }
}

mod oid_string {
    use std::str::FromStr;

    use super::*;

    pub fn serialize<S: Serializer>(
        oid: &Option<ObjectIdentifier>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match oid {
            Some(o) => serializer.serialize_str(&o.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<ObjectIdentifier>, D::Error> {
        let Some(s) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };

        ObjectIdentifier::from_str(&s)
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("Invalid OID {s:?}: {e}")))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TsaConfig {
    pub url: Option<String>,
    pub digest: Option<DigestAlgorithm>,
    #[serde(with = "oid_string")]
    pub policy: Option<ObjectIdentifier>,
    pub cert_req: Option<bool>,
    /// HTTP timeout in seconds.
    pub timeout: Option<u64>,
    pub headers: BTreeMap<String, String>,
}

impl TsaConfig {
    pub fn to_options(&self) -> TimestampOptions {
        let default = TimestampOptions::default();

        TimestampOptions {
            digest_algorithm: self.digest.unwrap_or(default.digest_algorithm),
            policy: self.policy.or(default.policy),
            cert_req: self.cert_req.unwrap_or(default.cert_req),
        }
    }

    pub fn to_transport(&self) -> HttpTransport {
        let timeout = self.timeout.map(Duration::from_secs);

        self.headers
            .iter()
            .fold(HttpTransport::new(timeout), |t, (name, value)| {
                t.with_header(name, value)
            })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub signing: SigningConfig,
    pub tsa: TsaConfig,
}

impl Config {
    pub fn parse(path: &Path, contents: &str) -> Result<Self> {
        toml_edit::de::from_str(contents).map_err(|e| Error::Parse(path.to_owned(), e))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| Error::Read(path.to_owned(), e))?;

        Self::parse(path, &contents)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_full() {
        let config = Config::parse(
            Path::new("cmsign.toml"),
            r#"
                [signing]
                digest = "sha384"
                rsa_identifier = "rsa-encryption"

                [tsa]
                url = "https://tsa.invalid"
                policy = "1.2.3.4"
                cert_req = false
                timeout = 10

                [tsa.headers]
                Authorization = "Bearer token"
            "#,
        )
        .unwrap();

        let options = config.signing.to_options();
        assert_eq!(options.digest_algorithm, DigestAlgorithm::Sha384);
        assert_eq!(options.rsa_identifier, RsaIdentifier::RsaEncryption);

        assert_eq!(config.tsa.url.as_deref(), Some("https://tsa.invalid"));
        assert_eq!(config.tsa.timeout, Some(10));
        assert_eq!(config.tsa.headers["Authorization"], "Bearer token");

        let options = config.tsa.to_options();
        assert_eq!(options.digest_algorithm, DigestAlgorithm::Sha256);
        assert_eq!(options.policy, Some(ObjectIdentifier::new_unwrap("1.2.3.4")));
        assert!(!options.cert_req);
    }

    #[test]
    fn empty_uses_defaults() {
        let config = Config::parse(Path::new("cmsign.toml"), "").unwrap();
        assert_eq!(config, Config::default());

        let options = config.tsa.to_options();
        assert_eq!(options.digest_algorithm, DigestAlgorithm::Sha256);
        assert!(options.cert_req);
        assert_eq!(options.policy, None);
    }

    #[test]
    fn digest_spellings() {
        let config = Config::parse(
            Path::new("cmsign.toml"),
            r#"
                [signing]
                digest = "SHA-512"

                [tsa]
                digest = "2.16.840.1.101.3.4.2.2"
            "#,
        )
        .unwrap();

        assert_eq!(config.signing.digest, Some(DigestAlgorithm::Sha512));
        assert_eq!(config.tsa.digest, Some(DigestAlgorithm::Sha384));
    }

    #[test]
    fn reject_invalid() {
        for contents in [
            "[signing]\ndigest = \"md5\"\n",
            "[tsa]\npolicy = \"not an oid\"\n",
            "[tsa]\nunknown = 1\n",
        ] {
            assert_matches!(
                Config::parse(Path::new("cmsign.toml"), contents),
                Err(Error::Parse(_, _))
            );
        }
    }
}
