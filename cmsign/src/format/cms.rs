// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! CMS `SignedData` (RFC 5652) construction, serialization, and parsing.
//!
//! [`SignedData`] is an owned, in-memory model built from the `cms` crate's
//! types. Digest algorithms, certificates, and attributes are kept in DER SET
//! OF order as they are added, so the encoding never depends on the order of
//! the calls that produced it. Signers are the exception and keep the order
//! in which they were added.

use std::time::SystemTime;

use cms::{
    cert::{CertificateChoices, IssuerAndSerialNumber},
    content_info::{CmsVersion, ContentInfo},
    revocation::{RevocationInfoChoice, RevocationInfoChoices},
    signed_data::{CertificateSet, EncapsulatedContentInfo, SignerIdentifier, SignerInfo},
};
use const_oid::{ObjectIdentifier, db::rfc5911};
use der::{
    Any, Decode, DecodeValue, Encode, EncodeValue, FixedTag, Header, Length, Reader, Sequence,
    Tag, TagNumber, Writer,
    asn1::{OctetString, SetOfVec},
};
use thiserror::Error;
use tracing::{debug, trace, warn};
use x509_cert::{Certificate, spki::AlgorithmIdentifierOwned};

use crate::{
    crypto::{Signer, SignerError},
    format::{
        algorithm::{self, DigestAlgorithm, KeyAlgorithm, RsaIdentifier},
        attribute,
    },
    timestamp::TransportError,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unsupported algorithm")]
    UnsupportedAlgorithm(#[from] algorithm::Error),
    #[error("Signer failed to produce a signature")]
    SigningFailed(#[source] SignerError),
    #[error("Failed to get public key from signer")]
    SignerPublicKey(#[source] SignerError),
    #[error("Signer public key does not match certificate: {0}")]
    CertificateKeyMismatch(String),
    #[error("No signing certificate provided")]
    NoCertificates,
    #[error("Expected {expected}-byte {algorithm} digest, but have {actual} bytes")]
    InvalidDigestLength {
        algorithm: DigestAlgorithm,
        expected: usize,
        actual: usize,
    },
    #[error("SignedData has no encapsulated content")]
    MissingContent,
    #[error("Signer index {index} out of range (have {count} signers)")]
    SignerIndexOutOfRange { index: usize, count: usize },
    #[error(
        "Malformed encoding{}: {reason}",
        .offset.map(|o| format!(" at byte {o}")).unwrap_or_default(),
    )]
    MalformedEncoding {
        offset: Option<usize>,
        reason: String,
    },
    #[error("Failed to encode DER")]
    Encode(#[source] der::Error),
    #[error("Time-stamp token has content type {0}, not signedData")]
    InvalidTimestampToken(ObjectIdentifier),
    #[error("Signer #{index} already has an identical time-stamp token")]
    DuplicateTimestampToken { index: usize },
    #[error("TSA granted the request, but returned no time-stamp token")]
    MissingTimestampToken,
    #[error("TSA rejected the request with status {status}: {message}")]
    TimestampRejected { status: u8, message: String },
    #[error("Failed to communicate with TSA")]
    TransportFailure(#[source] TransportError),
}

impl Error {
    pub(crate) fn malformed(e: der::Error) -> Self {
        Self::MalformedEncoding {
            offset: e.position().and_then(|p| usize::try_from(p).ok()),
            reason: e.kind().to_string(),
        }
    }

    fn invalid(reason: impl Into<String>) -> Self {
        Self::MalformedEncoding {
            offset: None,
            reason: reason.into(),
        }
    }
}

type Result<T> = std::result::Result<T, Error>;

/// Options for adding a signer.
#[derive(Clone, Debug, Default)]
pub struct SignOptions {
    pub digest_algorithm: DigestAlgorithm,
    pub rsa_identifier: RsaIdentifier,
    /// Value for the `signingTime` attribute. Defaults to the current time.
    pub signing_time: Option<SystemTime>,
}

/// `SignerInfos` in the order the signers were added. RFC 5652 declares this
/// as a SET OF, but the position of a signer is how callers address it, so
/// it must survive a round trip. The order is neither changed on encode nor
/// validated on decode.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct SignerInfoList {
    infos: Vec<SignerInfo>,
    /// Original encoding of each signer. Only populated when decoding.
    encoded: Vec<Vec<u8>>,
}

impl SignerInfoList {
    fn new(infos: Vec<SignerInfo>) -> Self {
        Self {
            infos,
            encoded: vec![],
        }
    }

    /// Indices of decoded signers whose signed attributes were not in DER
    /// order. Decoding sorts them, so the re-encoded bytes differ from what
    /// was signed.
    fn reordered_signed_attrs(&self) -> der::Result<Vec<usize>> {
        let implicit_tag = u8::from(Tag::ContextSpecific {
            constructed: true,
            number: TagNumber::N0,
        });
        let mut result = vec![];

        for (i, (si, original)) in self.infos.iter().zip(&self.encoded).enumerate() {
            let Some(attrs) = &si.signed_attrs else {
                continue;
            };

            let mut canonical = attrs.to_der()?;
            canonical[0] = implicit_tag;

            if !original.windows(canonical.len()).any(|w| w == canonical) {
                result.push(i);
            }
        }

        Ok(result)
    }
}

impl FixedTag for SignerInfoList {
    const TAG: Tag = Tag::Set;
}

impl<'a> DecodeValue<'a> for SignerInfoList {
    fn decode_value<R: Reader<'a>>(reader: &mut R, header: Header) -> der::Result<Self> {
        reader.read_nested(header.length, |reader| {
            let mut result = Self::default();

            while !reader.is_finished() {
                let position = reader.position();
                let tlv = reader.tlv_bytes()?;
                let si = match SignerInfo::from_der(tlv) {
                    Ok(si) => si,
                    Err(e) => {
                        let offset = e.position().unwrap_or_default();
                        return Err(e.kind().at((position + offset)?));
                    }
                };

                result.infos.push(si);
                result.encoded.push(tlv.to_vec());
            }

            Ok(result)
        })
    }
}

impl EncodeValue for SignerInfoList {
    fn value_len(&self) -> der::Result<Length> {
        self.infos
            .iter()
            .try_fold(Length::ZERO, |len, si| len + si.encoded_len()?)
    }

    fn encode_value(&self, writer: &mut impl Writer) -> der::Result<()> {
        for si in &self.infos {
            si.encode(writer)?;
        }

        Ok(())
    }
}

/// Wire form of `SignedData`. Identical to [`cms::signed_data::SignedData`]
/// except for the signer ordering.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct RawSignedData {
    version: CmsVersion,
    digest_algorithms: SetOfVec<AlgorithmIdentifierOwned>,
    encap_content_info: EncapsulatedContentInfo,
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
    certificates: Option<CertificateSet>,
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
    crls: Option<RevocationInfoChoices>,
    signer_infos: SignerInfoList,
}

/// `ContentInfo` with the content decoded in place. Decoding through this
/// instead of [`Any`] makes error positions relative to the start of the
/// input.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct SignedContentInfo {
    content_type: ObjectIdentifier,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT")]
    content: RawSignedData,
}

/// Helpers for reading the attributes of a [`SignerInfo`].
pub trait SignerInfoExt {
    /// Raw signature bytes.
    fn signature_bytes(&self) -> &[u8];

    /// Value of the `messageDigest` signed attribute.
    fn message_digest(&self) -> Option<Vec<u8>>;

    /// Value of the `signingTime` signed attribute.
    fn signing_time(&self) -> Option<SystemTime>;

    /// All time-stamp tokens from the unsigned attributes.
    fn timestamp_tokens(&self) -> Vec<&Any>;
}

impl SignerInfoExt for SignerInfo {
    fn signature_bytes(&self) -> &[u8] {
        self.signature.as_bytes()
    }

    fn message_digest(&self) -> Option<Vec<u8>> {
        attribute::values(self.signed_attrs.as_ref(), rfc5911::ID_MESSAGE_DIGEST)
            .next()
            .and_then(|v| attribute::decode_message_digest(v).ok())
    }

    fn signing_time(&self) -> Option<SystemTime> {
        attribute::values(self.signed_attrs.as_ref(), rfc5911::ID_SIGNING_TIME)
            .next()
            .and_then(|v| attribute::decode_signing_time(v).ok())
    }

    fn timestamp_tokens(&self) -> Vec<&Any> {
        attribute::values(
            self.unsigned_attrs.as_ref(),
            attribute::ID_AA_TIME_STAMP_TOKEN,
        )
        .collect()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignedData {
    version: CmsVersion,
    digest_algorithms: SetOfVec<AlgorithmIdentifierOwned>,
    content_type: ObjectIdentifier,
    /// The `eContent` OCTET STRING.
    content: Option<Any>,
    certificates: Option<CertificateSet>,
    crls: Option<RevocationInfoChoices>,
    signer_infos: Vec<SignerInfo>,
    /// Parsed signers whose signed attributes were re-sorted on decode.
    reordered_signers: Vec<usize>,
}

impl SignedData {
    /// Create an unsigned structure that encapsulates `content` as `id-data`.
    pub fn new(content: &[u8]) -> Result<Self> {
        Self::with_content_type(rfc5911::ID_DATA, content)
    }

    /// Create an unsigned structure that encapsulates `content` with a custom
    /// content type.
    pub fn with_content_type(content_type: ObjectIdentifier, content: &[u8]) -> Result<Self> {
        let content = Any::new(Tag::OctetString, content).map_err(Error::Encode)?;

        let mut result = Self::without_content(content_type);
        result.content = Some(content);

        Ok(result)
    }

    fn without_content(content_type: ObjectIdentifier) -> Self {
        let mut result = Self {
            version: CmsVersion::V1,
            digest_algorithms: SetOfVec::new(),
            content_type,
            content: None,
            certificates: None,
            crls: None,
            signer_infos: vec![],
            reordered_signers: vec![],
        };
        result.version = result.compute_version();

        result
    }

    /// Create a detached structure signed over a digest that was computed
    /// elsewhere. The digest algorithm is inferred from the digest length.
    pub fn from_digest(digest: &[u8], certs: &[Certificate], signer: &dyn Signer) -> Result<Self> {
        let options = SignOptions {
            digest_algorithm: DigestAlgorithm::from_digest_len(digest.len())?,
            ..Default::default()
        };

        Self::from_digest_with_options(digest, certs, signer, &options)
    }

    /// Like [`Self::from_digest`], but with an explicit digest algorithm. The
    /// digest is trusted as-is and is never recomputed.
    pub fn from_digest_with_options(
        digest: &[u8],
        certs: &[Certificate],
        signer: &dyn Signer,
        options: &SignOptions,
    ) -> Result<Self> {
        let mut result = Self::without_content(rfc5911::ID_DATA);
        result.add_signer(digest, certs, signer, options)?;

        Ok(result)
    }

    /// Sign the encapsulated content with the default options.
    pub fn sign(&mut self, certs: &[Certificate], signer: &dyn Signer) -> Result<()> {
        self.sign_with_options(certs, signer, &SignOptions::default())
    }

    /// Hash the encapsulated content and append a new signer. `certs[0]` must
    /// be the signing certificate. The remaining certificates are included as
    /// the chain.
    pub fn sign_with_options(
        &mut self,
        certs: &[Certificate],
        signer: &dyn Signer,
        options: &SignOptions,
    ) -> Result<()> {
        let content = self.content().ok_or(Error::MissingContent)?;
        let digest = options.digest_algorithm.hash(content);

        self.add_signer(&digest, certs, signer, options)
    }

    fn add_signer(
        &mut self,
        digest: &[u8],
        certs: &[Certificate],
        signer: &dyn Signer,
        options: &SignOptions,
    ) -> Result<()> {
        let digest_algorithm = options.digest_algorithm;
        if digest.len() != digest_algorithm.output_size() {
            return Err(Error::InvalidDigestLength {
                algorithm: digest_algorithm,
                expected: digest_algorithm.output_size(),
                actual: digest.len(),
            });
        }

        let cert = certs.first().ok_or(Error::NoCertificates)?;
        let tbs = &cert.tbs_certificate;
        let cert_key = &tbs.subject_public_key_info;

        let key_algorithm = KeyAlgorithm::from_oid(cert_key.algorithm.oid)?;
        let signature_algorithm = algorithm::signature_algorithm(
            key_algorithm,
            digest_algorithm,
            options.rsa_identifier,
        )?;

        let signer_key = signer.public_key().map_err(Error::SignerPublicKey)?;
        if signer_key.algorithm.oid != cert_key.algorithm.oid
            || signer_key.subject_public_key != cert_key.subject_public_key
        {
            return Err(Error::CertificateKeyMismatch(tbs.subject.to_string()));
        }

        let signing_time = options.signing_time.unwrap_or_else(SystemTime::now);
        let signed_attrs = attribute::canonical_set(vec![
            attribute::content_type(self.content_type).map_err(Error::Encode)?,
            attribute::message_digest(digest).map_err(Error::Encode)?,
            attribute::signing_time(signing_time).map_err(Error::Encode)?,
        ])
        .map_err(Error::Encode)?;

        // The signature covers the attributes with a SET OF tag, not the
        // [0] IMPLICIT tag they have inside SignerInfo.
        let message = signed_attrs.to_der().map_err(Error::Encode)?;

        debug!(
            "Signing for {} with {digest_algorithm}/{}",
            tbs.subject,
            algorithm::algorithm_name(signature_algorithm.oid).unwrap_or("unknown"),
        );

        let signature = signer
            .sign(digest_algorithm, &message)
            .map_err(Error::SigningFailed)?;

        let mut digest_algorithms = self.digest_algorithms.clone();
        if !digest_algorithms
            .iter()
            .any(|a| a.oid == digest_algorithm.oid())
        {
            digest_algorithms
                .insert(digest_algorithm.identifier())
                .map_err(Error::Encode)?;
        }

        let mut certificates = self
            .certificates
            .clone()
            .unwrap_or_else(|| CertificateSet(SetOfVec::new()));
        for cert in certs {
            let choice = CertificateChoices::Certificate(cert.clone());
            if !certificates.0.iter().any(|c| *c == choice) {
                certificates.0.insert(choice).map_err(Error::Encode)?;
            }
        }

        let signer_info = SignerInfo {
            version: CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
                issuer: tbs.issuer.clone(),
                serial_number: tbs.serial_number.clone(),
            }),
            digest_alg: digest_algorithm.identifier(),
            signed_attrs: Some(signed_attrs),
            signature_algorithm,
            signature: OctetString::new(signature).map_err(Error::Encode)?,
            unsigned_attrs: None,
        };

        // Nothing can fail past this point.
        self.digest_algorithms = digest_algorithms;
        self.certificates = Some(certificates);
        self.signer_infos.push(signer_info);
        self.version = self.compute_version();

        Ok(())
    }

    /// RFC 5652 section 5.1. Attribute certificates are not representable, so
    /// the v4 case can never apply.
    fn compute_version(&self) -> CmsVersion {
        let other_certs = self
            .certificates
            .iter()
            .flat_map(|c| c.0.iter())
            .any(|c| matches!(c, CertificateChoices::Other(_)));
        let other_crls = self
            .crls
            .iter()
            .flat_map(|c| c.0.iter())
            .any(|c| matches!(c, RevocationInfoChoice::Other(_)));

        if other_certs || other_crls {
            CmsVersion::V5
        } else if self.content_type != rfc5911::ID_DATA
            || self.signer_infos.iter().any(|si| si.version == CmsVersion::V3)
        {
            CmsVersion::V3
        } else {
            CmsVersion::V1
        }
    }

    /// Remove the encapsulated content. The content type is retained. Calling
    /// this on an already detached structure does nothing.
    pub fn detach(&mut self) {
        if self.content.take().is_some() {
            debug!("Detached encapsulated content");
        }
    }

    pub fn is_detached(&self) -> bool {
        self.content.is_none()
    }

    pub fn version(&self) -> CmsVersion {
        self.version
    }

    pub fn content_type(&self) -> ObjectIdentifier {
        self.content_type
    }

    /// The encapsulated content octets, unless detached.
    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_ref().map(|c| c.value())
    }

    pub fn digest_algorithms(&self) -> &[AlgorithmIdentifierOwned] {
        self.digest_algorithms.as_slice()
    }

    /// All X509 certificates. Other certificate formats are skipped.
    pub fn certificates(&self) -> impl Iterator<Item = &Certificate> {
        self.certificates.iter().flat_map(|c| c.0.iter()).filter_map(|c| match c {
            CertificateChoices::Certificate(c) => Some(c),
            CertificateChoices::Other(_) => None,
        })
    }

    /// Signers in the order they were added.
    pub fn signer_infos(&self) -> &[SignerInfo] {
        &self.signer_infos
    }

    /// Indices of signers whose signed attributes were not DER-sorted in the
    /// parsed input. The model always encodes them sorted, so the signatures
    /// of these signers will not verify against the output of [`Self::to_der`].
    pub fn reordered_signers(&self) -> &[usize] {
        &self.reordered_signers
    }

    /// Attach time-stamp tokens to signers' unsigned attributes. Either all
    /// tokens are attached or, on error, nothing is modified.
    pub(crate) fn attach_timestamp_tokens(
        &mut self,
        tokens: impl IntoIterator<Item = (usize, Any)>,
    ) -> Result<()> {
        let mut signer_infos = self.signer_infos.clone();
        let count = signer_infos.len();

        for (index, token) in tokens {
            let si = signer_infos
                .get_mut(index)
                .ok_or(Error::SignerIndexOutOfRange { index, count })?;
            let mut attrs = si
                .unsigned_attrs
                .take()
                .map(SetOfVec::into_vec)
                .unwrap_or_default();

            match attrs
                .iter_mut()
                .find(|a| a.oid == attribute::ID_AA_TIME_STAMP_TOKEN)
            {
                Some(attr) => {
                    // A DER SET OF cannot hold the same value twice.
                    if attr.values.iter().any(|v| *v == token) {
                        return Err(Error::DuplicateTimestampToken { index });
                    }
                    attr.values.insert(token).map_err(Error::Encode)?;
                }
                None => attrs.push(attribute::timestamp_token(token).map_err(Error::Encode)?),
            }

            si.unsigned_attrs = Some(attribute::canonical_set(attrs).map_err(Error::Encode)?);

            trace!("Attached time-stamp token to signer #{index}");
        }

        self.signer_infos = signer_infos;

        Ok(())
    }

    fn to_raw(&self) -> RawSignedData {
        RawSignedData {
            version: self.version,
            digest_algorithms: self.digest_algorithms.clone(),
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: self.content_type,
                econtent: self.content.clone(),
            },
            certificates: self.certificates.clone(),
            crls: self.crls.clone(),
            signer_infos: SignerInfoList::new(self.signer_infos.clone()),
        }
    }

    /// Wrap the structure in a [`ContentInfo`].
    pub fn to_content_info(&self) -> Result<ContentInfo> {
        Ok(ContentInfo {
            content_type: rfc5911::ID_SIGNED_DATA,
            content: Any::encode_from(&self.to_raw()).map_err(Error::Encode)?,
        })
    }

    /// Serialize to a DER-encoded `ContentInfo`. The output only depends on
    /// the structure's contents.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        let info = SignedContentInfo {
            content_type: rfc5911::ID_SIGNED_DATA,
            content: self.to_raw(),
        };

        info.to_der().map_err(Error::Encode)
    }

    /// Parse a DER-encoded `ContentInfo` containing `SignedData`. The input
    /// must be consumed exactly.
    pub fn from_der(data: &[u8]) -> Result<Self> {
        let outer = ContentInfo::from_der(data).map_err(Error::malformed)?;
        if outer.content_type != rfc5911::ID_SIGNED_DATA {
            return Err(Error::invalid(format!(
                "Content type {} is not signedData",
                outer.content_type,
            )));
        }

        let raw = SignedContentInfo::from_der(data)
            .map_err(Error::malformed)?
            .content;
        let reordered_signers = raw
            .signer_infos
            .reordered_signed_attrs()
            .map_err(Error::Encode)?;

        for index in &reordered_signers {
            warn!("Signer #{index} signed attributes are not DER-sorted; re-encoding breaks its signature");
        }

        let result = Self {
            version: raw.version,
            digest_algorithms: raw.digest_algorithms,
            content_type: raw.encap_content_info.econtent_type,
            content: raw.encap_content_info.econtent,
            certificates: raw.certificates,
            crls: raw.crls,
            signer_infos: raw.signer_infos.infos,
            reordered_signers,
        };
        result.validate()?;

        trace!(
            "Parsed SignedData with {} signers",
            result.signer_infos.len(),
        );

        Ok(result)
    }

    fn validate(&self) -> Result<()> {
        for (i, si) in self.signer_infos.iter().enumerate() {
            let expected_version = match si.sid {
                SignerIdentifier::IssuerAndSerialNumber(_) => CmsVersion::V1,
                SignerIdentifier::SubjectKeyIdentifier(_) => CmsVersion::V3,
            };
            if si.version != expected_version {
                return Err(Error::invalid(format!(
                    "Signer #{i} has version {:?}, but its identifier requires {expected_version:?}",
                    si.version,
                )));
            }

            if !self
                .digest_algorithms
                .iter()
                .any(|a| a.oid == si.digest_alg.oid)
            {
                return Err(Error::invalid(format!(
                    "Signer #{i} digest algorithm {} missing from digestAlgorithms",
                    si.digest_alg.oid,
                )));
            }

            if let Some(attrs) = &si.signed_attrs {
                for oid in [rfc5911::ID_CONTENT_TYPE, rfc5911::ID_MESSAGE_DIGEST] {
                    if !attribute::contains(attrs, oid) {
                        return Err(Error::invalid(format!(
                            "Signer #{i} signed attributes lack {oid}",
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Create a detached structure from a precomputed digest. See
/// [`SignedData::from_digest`].
pub fn create_signed_data_hash(
    digest: &[u8],
    certs: &[Certificate],
    signer: &dyn Signer,
) -> Result<SignedData> {
    SignedData::from_digest(digest, certs, signer)
}

/// Parse a DER-encoded `ContentInfo` containing `SignedData`. See
/// [`SignedData::from_der`].
pub fn parse_signed_data(data: &[u8]) -> Result<SignedData> {
    SignedData::from_der(data)
}
