// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Helpers for the signed and unsigned attribute sets of a `SignerInfo`.

use std::time::SystemTime;

use const_oid::{ObjectIdentifier, db::rfc5911};
use x509_cert::{
    attr::{Attribute, AttributeValue, Attributes},
    der::{
        self, Any, Decode, DateTime, Encode,
        asn1::{GeneralizedTime, OctetString, SetOfVec, UtcTime},
    },
    time::Time,
};

/// `id-aa-timeStampToken` from RFC 3161 appendix A.
pub const ID_AA_TIME_STAMP_TOKEN: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.14");

/// Build a DER `SET OF Attribute`. The input order does not matter because
/// the set is sorted by encoding. Identical attributes are rejected.
pub fn canonical_set(attrs: Vec<Attribute>) -> der::Result<Attributes> {
    SetOfVec::try_from(attrs)
}

fn single_valued(oid: ObjectIdentifier, value: AttributeValue) -> der::Result<Attribute> {
    let mut values = SetOfVec::new();
    values.insert(value)?;

    Ok(Attribute { oid, values })
}

/// `contentType` attribute (RFC 5652 section 11.1).
pub fn content_type(oid: ObjectIdentifier) -> der::Result<Attribute> {
    single_valued(rfc5911::ID_CONTENT_TYPE, Any::encode_from(&oid)?)
}

/// `messageDigest` attribute (RFC 5652 section 11.2).
pub fn message_digest(digest: &[u8]) -> der::Result<Attribute> {
    let value = OctetString::new(digest)?;

    single_valued(rfc5911::ID_MESSAGE_DIGEST, Any::encode_from(&value)?)
}

/// `signingTime` attribute (RFC 5652 section 11.3). Dates from 1950 through
/// 2049 must use UTCTime. Everything else uses GeneralizedTime.
pub fn signing_time(time: SystemTime) -> der::Result<Attribute> {
    let dt = DateTime::from_system_time(time)?;

    let encoded = if (1950..=2049).contains(&dt.year()) {
        UtcTime::from_date_time(dt)?.to_der()?
    } else {
        GeneralizedTime::from_date_time(dt).to_der()?
    };

    single_valued(rfc5911::ID_SIGNING_TIME, Any::from_der(&encoded)?)
}

/// Unsigned `timeStampToken` attribute holding a single token.
pub fn timestamp_token(token: Any) -> der::Result<Attribute> {
    single_valued(ID_AA_TIME_STAMP_TOKEN, token)
}

/// Iterate over every value of every attribute with the specified type.
pub fn values<'a>(
    attrs: Option<&'a Attributes>,
    oid: ObjectIdentifier,
) -> impl Iterator<Item = &'a AttributeValue> {
    attrs
        .into_iter()
        .flat_map(|a| a.iter())
        .filter(move |a| a.oid == oid)
        .flat_map(|a| a.values.iter())
}

pub fn contains(attrs: &Attributes, oid: ObjectIdentifier) -> bool {
    attrs.iter().any(|a| a.oid == oid)
}

/// Decode the value of a `signingTime` attribute.
pub fn decode_signing_time(value: &AttributeValue) -> der::Result<SystemTime> {
    let time = Time::from_der(&value.to_der()?)?;

    Ok(time.to_system_time())
}

/// Decode the value of a `messageDigest` attribute.
pub fn decode_message_digest(value: &AttributeValue) -> der::Result<Vec<u8>> {
    let digest = value.decode_as::<OctetString>()?;

    Ok(digest.into_bytes())
}
