// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{fmt, str::FromStr};

use const_oid::{
    ObjectIdentifier,
    db::{rfc5912, rfc8410},
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512, digest::DynDigest};
use thiserror::Error;
use x509_cert::{der::Any, spki::AlgorithmIdentifierOwned};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Algorithm not supported: {0}")]
    UnsupportedAlgorithm(ObjectIdentifier),
    #[error("Algorithm is too weak for new signatures: {0}")]
    InsecureAlgorithm(ObjectIdentifier),
    #[error("Digest algorithm {digest} cannot be used with key algorithm {key}")]
    UnsupportedCombination {
        key: ObjectIdentifier,
        digest: ObjectIdentifier,
    },
    #[error("No supported digest algorithm produces {0}-byte digests")]
    UnknownDigestLength(usize),
    #[error("Unknown digest algorithm: {0:?}")]
    UnknownDigestName(String),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum DigestAlgorithm {
    Sha1,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub const ALL: [Self; 4] = [Self::Sha1, Self::Sha256, Self::Sha384, Self::Sha512];

    pub fn oid(self) -> ObjectIdentifier {
        match self {
            Self::Sha1 => rfc5912::ID_SHA_1,
            Self::Sha256 => rfc5912::ID_SHA_256,
            Self::Sha384 => rfc5912::ID_SHA_384,
            Self::Sha512 => rfc5912::ID_SHA_512,
        }
    }

    pub fn from_oid(oid: ObjectIdentifier) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.oid() == oid)
            .ok_or(Error::UnsupportedAlgorithm(oid))
    }

    /// Guess the algorithm from the size of a precomputed digest. Every
    /// supported algorithm has a distinct output size.
    pub fn from_digest_len(len: usize) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.output_size() == len)
            .ok_or(Error::UnknownDigestLength(len))
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Length of the digest produced by the algorithm.
    pub fn output_size(self) -> usize {
        match self {
            Self::Sha1 => <Sha1 as Digest>::output_size(),
            Self::Sha256 => <Sha256 as Digest>::output_size(),
            Self::Sha384 => <Sha384 as Digest>::output_size(),
            Self::Sha512 => <Sha512 as Digest>::output_size(),
        }
    }

    /// Whether the algorithm may be used for new signatures.
    pub fn is_secure(self) -> bool {
        self != Self::Sha1
    }

    /// Create a streaming hasher.
    pub fn hasher(self) -> Box<dyn DynDigest> {
        match self {
            Self::Sha1 => Box::new(Sha1::new()),
            Self::Sha256 => Box::new(Sha256::new()),
            Self::Sha384 => Box::new(Sha384::new()),
            Self::Sha512 => Box::new(Sha512::new()),
        }
    }

    /// Compute the digest of the specified data.
    pub fn hash(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// Identifier for `SignerInfo.digestAlgorithm` and
    /// `SignedData.digestAlgorithms`. RFC 5754 says the parameters should be
    /// absent for the SHA-2 family.
    pub fn identifier(self) -> AlgorithmIdentifierOwned {
        AlgorithmIdentifierOwned {
            oid: self.oid(),
            parameters: None,
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = Error;

    /// Accepts `sha256`, `SHA-256`, or a dotted OID.
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(oid) = ObjectIdentifier::new(s) {
            return Self::from_oid(oid);
        }

        let normalized = s.to_ascii_lowercase().replace(['-', '_'], "");

        Self::ALL
            .into_iter()
            .find(|a| a.name() == normalized)
            .ok_or_else(|| Error::UnknownDigestName(s.to_owned()))
    }
}

impl Serialize for DigestAlgorithm {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Accepts the same spellings as [`FromStr`].
impl<'de> Deserialize<'de> for DigestAlgorithm {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;

        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Public key algorithm of a signer, taken from its SubjectPublicKeyInfo.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyAlgorithm {
    Rsa,
    Ecdsa,
    Ed25519,
}

impl KeyAlgorithm {
    pub fn oid(self) -> ObjectIdentifier {
        match self {
            Self::Rsa => rfc5912::RSA_ENCRYPTION,
            Self::Ecdsa => rfc5912::ID_EC_PUBLIC_KEY,
            Self::Ed25519 => rfc8410::ID_ED_25519,
        }
    }

    pub fn from_oid(oid: ObjectIdentifier) -> Result<Self> {
        [Self::Rsa, Self::Ecdsa, Self::Ed25519]
            .into_iter()
            .find(|a| a.oid() == oid)
            .ok_or(Error::UnsupportedAlgorithm(oid))
    }
}

/// How RSA signatures are identified in `SignerInfo.signatureAlgorithm`.
/// RFC 5652 verifiers are expected to accept both, but some only accept one.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RsaIdentifier {
    /// `sha256WithRSAEncryption` and friends.
    #[default]
    WithDigest,
    /// Plain `rsaEncryption`, as OpenSSL emits by default.
    RsaEncryption,
}

/// Look up the identifier to record in `SignerInfo.signatureAlgorithm` for a
/// key and digest pairing. The pairing is never inferred from the signature
/// bytes.
pub fn signature_algorithm(
    key: KeyAlgorithm,
    digest: DigestAlgorithm,
    rsa: RsaIdentifier,
) -> Result<AlgorithmIdentifierOwned> {
    // We don't support signing with insecure algorithms.
    if !digest.is_secure() {
        return Err(Error::InsecureAlgorithm(digest.oid()));
    }

    let unsupported = || Error::UnsupportedCombination {
        key: key.oid(),
        digest: digest.oid(),
    };

    let (oid, parameters) = match (key, rsa) {
        // RFC 4055 section 5 requires NULL parameters for all of these.
        (KeyAlgorithm::Rsa, RsaIdentifier::RsaEncryption) => {
            (rfc5912::RSA_ENCRYPTION, Some(Any::null()))
        }
        (KeyAlgorithm::Rsa, RsaIdentifier::WithDigest) => {
            let oid = match digest {
                DigestAlgorithm::Sha256 => rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
                DigestAlgorithm::Sha384 => rfc5912::SHA_384_WITH_RSA_ENCRYPTION,
                DigestAlgorithm::Sha512 => rfc5912::SHA_512_WITH_RSA_ENCRYPTION,
                DigestAlgorithm::Sha1 => return Err(unsupported()),
            };

            (oid, Some(Any::null()))
        }
        (KeyAlgorithm::Ecdsa, _) => {
            let oid = match digest {
                DigestAlgorithm::Sha256 => rfc5912::ECDSA_WITH_SHA_256,
                DigestAlgorithm::Sha384 => rfc5912::ECDSA_WITH_SHA_384,
                DigestAlgorithm::Sha512 => rfc5912::ECDSA_WITH_SHA_512,
                DigestAlgorithm::Sha1 => return Err(unsupported()),
            };

            (oid, None)
        }
        // RFC 8419 section 3.1 mandates SHA-512 alongside Ed25519.
        (KeyAlgorithm::Ed25519, _) => {
            if digest != DigestAlgorithm::Sha512 {
                return Err(unsupported());
            }

            (rfc8410::ID_ED_25519, None)
        }
    };

    Ok(AlgorithmIdentifierOwned { oid, parameters })
}

/// Human-readable name for any algorithm OID this module knows about.
pub fn algorithm_name(oid: ObjectIdentifier) -> Option<&'static str> {
    if let Ok(digest) = DigestAlgorithm::from_oid(oid) {
        return Some(digest.name());
    }

    let name = match oid {
        rfc5912::RSA_ENCRYPTION => "rsaEncryption",
        rfc5912::SHA_1_WITH_RSA_ENCRYPTION => "sha1WithRSAEncryption",
        rfc5912::SHA_256_WITH_RSA_ENCRYPTION => "sha256WithRSAEncryption",
        rfc5912::SHA_384_WITH_RSA_ENCRYPTION => "sha384WithRSAEncryption",
        rfc5912::SHA_512_WITH_RSA_ENCRYPTION => "sha512WithRSAEncryption",
        rfc5912::ID_EC_PUBLIC_KEY => "id-ecPublicKey",
        rfc5912::ECDSA_WITH_SHA_256 => "ecdsa-with-SHA256",
        rfc5912::ECDSA_WITH_SHA_384 => "ecdsa-with-SHA384",
        rfc5912::ECDSA_WITH_SHA_512 => "ecdsa-with-SHA512",
        rfc8410::ID_ED_25519 => "Ed25519",
        _ => return None,
    };

    Some(name)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn digest_names_and_oids() {
        assert_eq!(
            "sha256".parse::<DigestAlgorithm>().unwrap(),
            DigestAlgorithm::Sha256
        );
        assert_eq!(
            "SHA-384".parse::<DigestAlgorithm>().unwrap(),
            DigestAlgorithm::Sha384
        );
        assert_eq!(
            "2.16.840.1.101.3.4.2.3".parse::<DigestAlgorithm>().unwrap(),
            DigestAlgorithm::Sha512
        );
        assert_matches!(
            "md5".parse::<DigestAlgorithm>(),
            Err(Error::UnknownDigestName(n)) if n == "md5"
        );
        assert_matches!(
            "1.2.840.113549.2.5".parse::<DigestAlgorithm>(),
            Err(Error::UnsupportedAlgorithm(_))
        );
    }

    #[test]
    fn digest_from_length() {
        assert_eq!(
            DigestAlgorithm::from_digest_len(32).unwrap(),
            DigestAlgorithm::Sha256
        );
        assert_eq!(
            DigestAlgorithm::from_digest_len(20).unwrap(),
            DigestAlgorithm::Sha1
        );
        assert_matches!(
            DigestAlgorithm::from_digest_len(31),
            Err(Error::UnknownDigestLength(31))
        );
    }

    #[test]
    fn digest_output_sizes() {
        let sizes = DigestAlgorithm::ALL.map(DigestAlgorithm::output_size);
        assert_eq!(sizes, [20, 32, 48, 64]);

        for algo in DigestAlgorithm::ALL {
            assert_eq!(algo.hash(b"").len(), algo.output_size());
        }
    }

    #[test]
    fn streaming_matches_one_shot() {
        for algo in DigestAlgorithm::ALL {
            let mut hasher = algo.hasher();
            hasher.update(b"split ");
            hasher.update(b"input");

            assert_eq!(hasher.output_size(), algo.output_size());
            assert_eq!(&*hasher.finalize(), algo.hash(b"split input").as_slice());
        }
    }

    #[test]
    fn rsa_signature_identifiers() {
        let with_digest = signature_algorithm(
            KeyAlgorithm::Rsa,
            DigestAlgorithm::Sha256,
            RsaIdentifier::WithDigest,
        )
        .unwrap();
        assert_eq!(with_digest.oid, rfc5912::SHA_256_WITH_RSA_ENCRYPTION);
        assert_eq!(with_digest.parameters, Some(Any::null()));

        let plain = signature_algorithm(
            KeyAlgorithm::Rsa,
            DigestAlgorithm::Sha512,
            RsaIdentifier::RsaEncryption,
        )
        .unwrap();
        assert_eq!(plain.oid, rfc5912::RSA_ENCRYPTION);
    }

    #[test]
    fn rejected_pairings() {
        assert_matches!(
            signature_algorithm(
                KeyAlgorithm::Rsa,
                DigestAlgorithm::Sha1,
                RsaIdentifier::WithDigest,
            ),
            Err(Error::InsecureAlgorithm(oid)) if oid == rfc5912::ID_SHA_1
        );
        assert_matches!(
            signature_algorithm(
                KeyAlgorithm::Ed25519,
                DigestAlgorithm::Sha256,
                RsaIdentifier::default(),
            ),
            Err(Error::UnsupportedCombination { .. })
        );

        let ecdsa = signature_algorithm(
            KeyAlgorithm::Ecdsa,
            DigestAlgorithm::Sha384,
            RsaIdentifier::default(),
        )
        .unwrap();
        assert_eq!(ecdsa.oid, rfc5912::ECDSA_WITH_SHA_384);
        assert_eq!(ecdsa.parameters, None);
    }
}
