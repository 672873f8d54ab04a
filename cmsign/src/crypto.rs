// SPDX-FileCopyrightText: 2023-2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    env::{self, VarError},
    ffi::{OsStr, OsString},
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
};

use pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey, traits::PublicKeyParts};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use thiserror::Error;
use tracing::debug;
use x509_cert::{Certificate, der::referenced::OwnedToRef, spki::SubjectPublicKeyInfoOwned};

use crate::{format::algorithm::DigestAlgorithm, util::DebugString};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Digest algorithm not supported for RSA signing: {0}")]
    UnsupportedAlgorithm(DigestAlgorithm),
    #[error("RSA key size ({}) not supported", .0 * 8)]
    UnsupportedKeySize(usize),
    #[error("Invalid digest length ({0} bytes) for {1}")]
    InvalidDigestLength(usize, DigestAlgorithm),
    #[error("Invalid signature length ({0} bytes) for {1}")]
    InvalidSignatureLength(usize, DigestAlgorithm),
    #[error("Failed to run command: {0:?}")]
    CommandSpawn(DebugString, #[source] io::Error),
    #[error("Command failed with status: {1}: {0:?}")]
    CommandExecution(DebugString, ExitStatus),
    #[error("Signature from signing helper does not match public key: {0:?}")]
    SigningHelperBadSignature(PathBuf),
    #[error("Private key is encrypted, but no passphrase source was given: {0:?}")]
    PassphraseRequired(PathBuf),
    #[error("Failed to read environment variable: {0:?}")]
    InvalidEnvVar(OsString, #[source] VarError),
    #[error("PEM has start tag, but no end tag")]
    PemNoEndTag,
    #[error("No certificates found: {0:?}")]
    NoCertificates(PathBuf),
    #[error("Failed to load encrypted RSA private key")]
    LoadKeyEncrypted(#[source] pkcs8::Error),
    #[error("Failed to load unencrypted RSA private key")]
    LoadKeyUnencrypted(#[source] pkcs8::Error),
    #[error("Failed to load RSA public key")]
    LoadPubKey(#[source] pkcs8::spki::Error),
    #[error("Failed to encode RSA public key")]
    EncodePubKey(#[source] pkcs8::spki::Error),
    #[error("Failed to load X509 certificate")]
    LoadCert(#[source] x509_cert::der::Error),
    #[error("Failed to RSA sign digest")]
    RsaSign(#[source] Box<rsa::Error>),
    #[error("Failed to RSA verify signature")]
    RsaVerify(#[source] Box<rsa::Error>),
    #[error("Failed to read file: {0:?}")]
    ReadFile(PathBuf, #[source] io::Error),
    #[error("Failed to write file: {0:?}")]
    WriteFile(PathBuf, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Error type returned by [`Signer`] implementations.
pub type SignerError = Box<dyn std::error::Error + Send + Sync>;

/// A private key capability. Implementations never expose the key material.
pub trait Signer {
    /// Public key of the signer. Used to check that the signer matches the
    /// signing certificate.
    fn public_key(&self) -> std::result::Result<SubjectPublicKeyInfoOwned, SignerError>;

    /// Produce a raw signature over `message`. For CMS, `message` is the DER
    /// encoding of the signed attribute set. The implementation hashes it with
    /// `digest` unless the key algorithm signs messages directly.
    fn sign(
        &self,
        digest: DigestAlgorithm,
        message: &[u8],
    ) -> std::result::Result<Vec<u8>, SignerError>;
}

impl<S: Signer + ?Sized> Signer for &S {
    fn public_key(&self) -> std::result::Result<SubjectPublicKeyInfoOwned, SignerError> {
        (**self).public_key()
    }

    fn sign(
        &self,
        digest: DigestAlgorithm,
        message: &[u8],
    ) -> std::result::Result<Vec<u8>, SignerError> {
        (**self).sign(digest, message)
    }
}

#[derive(Clone, Debug)]
pub enum PassphraseSource {
    EnvVar(OsString),
    File(PathBuf),
}

impl PassphraseSource {
    pub fn new(pass_file: Option<&Path>, env_var: Option<&OsStr>) -> Option<Self> {
        if let Some(v) = env_var {
            Some(Self::EnvVar(v.to_owned()))
        } else {
            pass_file.map(|p| Self::File(p.to_owned()))
        }
    }

    pub fn acquire(&self) -> Result<String> {
        let passphrase = match self {
            Self::EnvVar(v) => env::var(v).map_err(|e| Error::InvalidEnvVar(v.clone(), e))?,
            Self::File(p) => fs::read_to_string(p)
                .map_err(|e| Error::ReadFile(p.clone(), e))?
                .trim_end_matches(['\r', '\n'])
                .to_owned(),
        };

        Ok(passphrase)
    }
}

fn check_key_size(size: usize) -> Result<()> {
    // RustCrypto does not support 8192-bit keys.
    if size > 4096 / 8 {
        return Err(Error::UnsupportedKeySize(size));
    }

    Ok(())
}

fn pkcs1v15_scheme(algo: DigestAlgorithm) -> Pkcs1v15Sign {
    match algo {
        DigestAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
        DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
        DigestAlgorithm::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
        DigestAlgorithm::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
    }
}

/// Copied from rsa-0.9.6 since the function is not exported.
fn pkcs1v15_sign_pad(prefix: &[u8], hashed: &[u8], k: usize) -> rsa::Result<Vec<u8>> {
    let hash_len = hashed.len();
    let t_len = prefix.len() + hashed.len();
    if k < t_len + 11 {
        return Err(rsa::Error::MessageTooLong);
    }

    // EM = 0x00 || 0x01 || PS || 0x00 || T
    let mut em = vec![0xff; k];
    em[0] = 0;
    em[1] = 1;
    em[k - t_len - 1] = 0;
    em[k - t_len..k - hash_len].copy_from_slice(prefix);
    em[k - hash_len..k].copy_from_slice(hashed);

    Ok(em)
}

/// RSA PKCS#1 v1.5 signing backends.
#[derive(Clone)]
pub enum RsaSigningKey {
    Internal(RsaPrivateKey),
    /// A signing helper program, for keys that live in an HSM or a remote
    /// service. The helper is invoked as:
    ///
    /// ```text
    /// <program> <SHA256_RSA2048|...> <public key file> [env <var> | file <path>]
    /// ```
    ///
    /// It receives the PKCS#1 v1.5 padded digest on stdin and must write the
    /// raw signature to stdout.
    External {
        program: PathBuf,
        public_key_file: PathBuf,
        public_key: RsaPublicKey,
        passphrase_source: Option<PassphraseSource>,
    },
}

impl RsaSigningKey {
    /// Size of key in bytes.
    pub fn size(&self) -> usize {
        match self {
            Self::Internal(key) => key.size(),
            Self::External { public_key, .. } => public_key.size(),
        }
    }

    /// Get the public key portion of the signing key.
    pub fn to_public_key(&self) -> RsaPublicKey {
        match self {
            Self::Internal(key) => key.to_public_key(),
            Self::External { public_key, .. } => public_key.clone(),
        }
    }

    /// Sign a precomputed digest.
    pub fn sign_digest(&self, algo: DigestAlgorithm, digest: &[u8]) -> Result<Vec<u8>> {
        if digest.len() != algo.output_size() {
            return Err(Error::InvalidDigestLength(digest.len(), algo));
        }

        check_key_size(self.size())?;

        // We don't support signing with insecure algorithms.
        if !algo.is_secure() {
            return Err(Error::UnsupportedAlgorithm(algo));
        }

        let scheme = pkcs1v15_scheme(algo);

        match self {
            Self::Internal(key) => key
                .sign(scheme, digest)
                .map_err(|e| Error::RsaSign(Box::new(e))),
            Self::External {
                program,
                public_key,
                public_key_file,
                passphrase_source,
            } => {
                let key_bits = public_key.size() * 8;
                let algo_str = format!("{}_RSA{key_bits}", algo.name().to_ascii_uppercase());

                let mut command = Command::new(program);
                command.arg(algo_str);
                command.arg(public_key_file);

                match passphrase_source {
                    None => {}
                    Some(PassphraseSource::EnvVar(v)) => {
                        command.arg("env");
                        command.arg(v);
                    }
                    Some(PassphraseSource::File(p)) => {
                        command.arg("file");
                        command.arg(p);
                    }
                }

                command.stdin(Stdio::piped());
                command.stdout(Stdio::piped());
                command.stderr(Stdio::inherit());

                debug!("Running signing helper: {command:?}");

                let mut child = command
                    .spawn()
                    .map_err(|e| Error::CommandSpawn(DebugString::new(&command), e))?;

                // The pipe capacity on all major OSs is significantly larger
                // than the padded digest, so writing before waiting cannot
                // deadlock even if the process never reads stdin.
                let padded_digest = pkcs1v15_sign_pad(&scheme.prefix, digest, public_key.size())
                    .map_err(|e| Error::RsaSign(Box::new(e)))?;
                if let Some(mut stdin) = child.stdin.take() {
                    stdin
                        .write_all(&padded_digest)
                        .map_err(|e| Error::WriteFile("<signing helper stdin>".into(), e))?;
                }

                let child = child
                    .wait_with_output()
                    .map_err(|e| Error::CommandSpawn(DebugString::new(&command), e))?;

                if !child.status.success() {
                    return Err(Error::CommandExecution(
                        DebugString::new(&command),
                        child.status,
                    ));
                } else if child.stdout.len() != self.size() {
                    return Err(Error::InvalidSignatureLength(child.stdout.len(), algo));
                }

                // Check that the helper signed with the proper key.
                if let Err(e) = self.to_public_key().verify_sig(algo, digest, &child.stdout) {
                    return match e {
                        Error::RsaVerify(_) => {
                            Err(Error::SigningHelperBadSignature(public_key_file.clone()))
                        }
                        e => Err(e),
                    };
                }

                Ok(child.stdout)
            }
        }
    }
}

impl Signer for RsaSigningKey {
    fn public_key(&self) -> std::result::Result<SubjectPublicKeyInfoOwned, SignerError> {
        let spki = SubjectPublicKeyInfoOwned::from_key(self.to_public_key())
            .map_err(Error::EncodePubKey)?;

        Ok(spki)
    }

    fn sign(
        &self,
        digest: DigestAlgorithm,
        message: &[u8],
    ) -> std::result::Result<Vec<u8>, SignerError> {
        let hashed = digest.hash(message);

        Ok(self.sign_digest(digest, &hashed)?)
    }
}

pub trait RsaPublicKeyExt {
    fn verify_sig(&self, algo: DigestAlgorithm, digest: &[u8], signature: &[u8]) -> Result<()>;
}

impl RsaPublicKeyExt for RsaPublicKey {
    /// Verify the signature against the specified key.
    fn verify_sig(&self, algo: DigestAlgorithm, digest: &[u8], signature: &[u8]) -> Result<()> {
        // Check this explicitly so we can provide a better error message.
        if digest.len() != algo.output_size() {
            return Err(Error::InvalidDigestLength(digest.len(), algo));
        }

        check_key_size(self.size())?;

        self.verify(pkcs1v15_scheme(algo), digest, signature)
            .map_err(|e| Error::RsaVerify(Box::new(e)))
    }
}

/// x509_cert/pem follow rfc7468 strictly instead of implementing a lenient
/// parser. The PEM decoder rejects lines in the base64 section that are longer
/// than 64 characters, excluding whitespace. We'll reformat the data to deal
/// with this because plenty of certificates in the wild do not follow the
/// RFC. Anything outside of the certificate blocks is dropped.
fn reformat_pem(data: &[u8]) -> Result<Vec<u8>> {
    let mut result = vec![];
    let mut base64 = vec![];
    let mut inside_base64 = false;

    for mut line in data.split(|&c| c == b'\n') {
        while !line.is_empty() && line[line.len() - 1].is_ascii_whitespace() {
            line = &line[..line.len() - 1];
        }

        if line.is_empty() {
            continue;
        } else if line.starts_with(b"-----BEGIN CERTIFICATE-----") {
            inside_base64 = true;

            result.extend_from_slice(line);
            result.push(b'\n');
        } else if line.starts_with(b"-----END CERTIFICATE-----") {
            inside_base64 = false;

            for chunk in base64.chunks(64) {
                result.extend_from_slice(chunk);
                result.push(b'\n');
            }

            base64.clear();

            result.extend_from_slice(line);
            result.push(b'\n');
        } else if inside_base64 {
            base64.extend_from_slice(line);
        }
    }

    if inside_base64 {
        return Err(Error::PemNoEndTag);
    }

    Ok(result)
}

/// Read a PEM-encoded certificate chain from a reader. The signing
/// certificate must come first.
pub fn read_pem_cert_chain(path: &Path, mut reader: impl Read) -> Result<Vec<Certificate>> {
    let mut data = vec![];
    reader
        .read_to_end(&mut data)
        .map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    let data = reformat_pem(&data)?;
    // load_pem_chain() cannot handle empty input.
    if data.is_empty() {
        return Err(Error::NoCertificates(path.to_owned()));
    }

    Certificate::load_pem_chain(&data).map_err(Error::LoadCert)
}

/// Read a PEM-encoded certificate chain from a file.
pub fn read_pem_cert_chain_file(path: &Path) -> Result<Vec<Certificate>> {
    let reader = File::open(path).map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    read_pem_cert_chain(path, reader)
}

/// Read PEM-encoded PKCS8 public key from a reader.
pub fn read_pem_public_key(path: &Path, mut reader: impl Read) -> Result<RsaPublicKey> {
    let mut data = String::new();
    reader
        .read_to_string(&mut data)
        .map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    let key = RsaPublicKey::from_public_key_pem(&data).map_err(Error::LoadPubKey)?;

    Ok(key)
}

/// Read PEM-encoded PKCS8 public key from a file.
pub fn read_pem_public_key_file(path: &Path) -> Result<RsaPublicKey> {
    let reader = File::open(path).map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    read_pem_public_key(path, reader)
}

/// Read PEM-encoded PKCS8 private key from a reader.
pub fn read_pem_key(
    path: &Path,
    mut reader: impl Read,
    source: Option<&PassphraseSource>,
) -> Result<RsaPrivateKey> {
    let mut data = String::new();
    reader
        .read_to_string(&mut data)
        .map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    if data.contains("ENCRYPTED") {
        let source = source.ok_or_else(|| Error::PassphraseRequired(path.to_owned()))?;
        let passphrase = source.acquire()?;

        RsaPrivateKey::from_pkcs8_encrypted_pem(&data, passphrase).map_err(Error::LoadKeyEncrypted)
    } else {
        RsaPrivateKey::from_pkcs8_pem(&data).map_err(Error::LoadKeyUnencrypted)
    }
}

/// Read PEM-encoded PKCS8 private key from a file.
pub fn read_pem_key_file(path: &Path, source: Option<&PassphraseSource>) -> Result<RsaPrivateKey> {
    let reader = File::open(path).map_err(|e| Error::ReadFile(path.to_owned(), e))?;

    read_pem_key(path, reader, source)
}

/// Get the RSA public key from a certificate.
pub fn get_public_key(cert: &Certificate) -> Result<RsaPublicKey> {
    let public_key =
        RsaPublicKey::try_from(cert.tbs_certificate.subject_public_key_info.owned_to_ref())
            .map_err(Error::LoadPubKey)?;

    Ok(public_key)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const CERT_CHAIN: &str = concat!(
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/leaf.crt")),
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/ca.crt")),
    );
    const KEY: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/data/TEST_KEY_DO_NOT_USE_leaf.key"
    ));
    const KEY_ENCRYPTED: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/data/TEST_KEY_DO_NOT_USE_leaf_encrypted.key"
    ));

    fn passphrase_file() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data/TEST_KEY_DO_NOT_USE_leaf.passphrase")
    }

    #[test]
    fn load_chain_and_keys() {
        let certs = read_pem_cert_chain(Path::new("chain"), CERT_CHAIN.as_bytes()).unwrap();
        assert_eq!(certs.len(), 2);

        let plain = read_pem_key(Path::new("plain"), KEY.as_bytes(), None).unwrap();
        let source = PassphraseSource::File(passphrase_file());
        let encrypted =
            read_pem_key(Path::new("encrypted"), KEY_ENCRYPTED.as_bytes(), Some(&source)).unwrap();

        assert_eq!(plain, encrypted);
        assert_eq!(plain.to_public_key(), get_public_key(&certs[0]).unwrap());
    }

    #[test]
    fn encrypted_key_without_passphrase() {
        assert_matches!(
            read_pem_key(Path::new("encrypted"), KEY_ENCRYPTED.as_bytes(), None),
            Err(Error::PassphraseRequired(p)) if p == Path::new("encrypted")
        );
    }

    #[test]
    fn missing_env_var() {
        let source = PassphraseSource::EnvVar("CMSIGN_TEST_VAR_THAT_DOES_NOT_EXIST".into());

        assert_matches!(source.acquire(), Err(Error::InvalidEnvVar(_, _)));
    }

    #[test]
    fn long_pem_lines() {
        let certs = read_pem_cert_chain(Path::new("chain"), CERT_CHAIN.as_bytes()).unwrap();

        // Join the base64 body of the first certificate into one long line.
        let mut joined = String::new();
        let mut body = String::new();
        for line in CERT_CHAIN.lines() {
            if line.starts_with("-----BEGIN") {
                joined.push_str(line);
                joined.push('\n');
            } else if line.starts_with("-----END") {
                joined.push_str(&body);
                joined.push('\n');
                joined.push_str(line);
                joined.push('\n');
                body.clear();
            } else {
                body.push_str(line);
            }
        }

        let reparsed = read_pem_cert_chain(Path::new("joined"), joined.as_bytes()).unwrap();
        assert_eq!(reparsed, certs);

        assert_matches!(
            read_pem_cert_chain(Path::new("truncated"), &joined.as_bytes()[..100]),
            Err(Error::PemNoEndTag)
        );
        assert_matches!(
            read_pem_cert_chain(Path::new("empty"), &b""[..]),
            Err(Error::NoCertificates(_))
        );
    }

    #[test]
    fn sign_and_verify() {
        let key = RsaSigningKey::Internal(
            read_pem_key(Path::new("plain"), KEY.as_bytes(), None).unwrap(),
        );
        let certs = read_pem_cert_chain(Path::new("chain"), CERT_CHAIN.as_bytes()).unwrap();

        let spki = Signer::public_key(&key).unwrap();
        assert_eq!(spki, certs[0].tbs_certificate.subject_public_key_info);

        let signature = Signer::sign(&key, DigestAlgorithm::Sha384, b"message").unwrap();
        let digest = DigestAlgorithm::Sha384.hash(b"message");
        key.to_public_key()
            .verify_sig(DigestAlgorithm::Sha384, &digest, &signature)
            .unwrap();

        assert_matches!(
            key.sign_digest(DigestAlgorithm::Sha1, &[0u8; 20]),
            Err(Error::UnsupportedAlgorithm(DigestAlgorithm::Sha1))
        );
        assert_matches!(
            key.sign_digest(DigestAlgorithm::Sha256, &[0u8; 20]),
            Err(Error::InvalidDigestLength(20, DigestAlgorithm::Sha256))
        );
    }
}
