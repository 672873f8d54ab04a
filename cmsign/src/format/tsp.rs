// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Time-Stamp Protocol messages from RFC 3161.

use std::fmt;

use cms::content_info::ContentInfo;
use const_oid::ObjectIdentifier;
use der::{
    Sequence,
    asn1::{BitString, GeneralizedTime, Int, OctetString, Uint},
};
use x509_cert::{
    ext::{Extensions, pkix::name::GeneralName},
    spki::AlgorithmIdentifierOwned,
};

/// `id-ct-TSTInfo` content type of the encapsulated content in a token.
pub const ID_CT_TST_INFO: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.4");

pub const TSP_VERSION: u8 = 1;

/// ```asn1
/// MessageImprint ::= SEQUENCE {
///     hashAlgorithm AlgorithmIdentifier,
///     hashedMessage OCTET STRING }
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct MessageImprint {
    pub hash_algorithm: AlgorithmIdentifierOwned,
    pub hashed_message: OctetString,
}

/// ```asn1
/// TimeStampReq ::= SEQUENCE {
///     version        INTEGER { v1(1) },
///     messageImprint MessageImprint,
///     reqPolicy      TSAPolicyId OPTIONAL,
///     nonce          INTEGER OPTIONAL,
///     certReq        BOOLEAN DEFAULT FALSE,
///     extensions     [0] IMPLICIT Extensions OPTIONAL }
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TimeStampReq {
    pub version: u8,
    pub message_imprint: MessageImprint,
    #[asn1(optional = "true")]
    pub req_policy: Option<ObjectIdentifier>,
    #[asn1(optional = "true")]
    pub nonce: Option<Uint>,
    #[asn1(default = "Default::default")]
    pub cert_req: bool,
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
    pub extensions: Option<Extensions>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PkiStatus {
    Granted,
    GrantedWithMods,
    Rejection,
    Waiting,
    RevocationWarning,
    RevocationNotification,
}

impl PkiStatus {
    pub fn from_value(value: u8) -> Option<Self> {
        let status = match value {
            0 => Self::Granted,
            1 => Self::GrantedWithMods,
            2 => Self::Rejection,
            3 => Self::Waiting,
            4 => Self::RevocationWarning,
            5 => Self::RevocationNotification,
            _ => return None,
        };

        Some(status)
    }

    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted | Self::GrantedWithMods)
    }
}

impl fmt::Display for PkiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Granted => "granted",
            Self::GrantedWithMods => "grantedWithMods",
            Self::Rejection => "rejection",
            Self::Waiting => "waiting",
            Self::RevocationWarning => "revocationWarning",
            Self::RevocationNotification => "revocationNotification",
        };

        f.write_str(s)
    }
}

/// Names of the `PKIFailureInfo` bits that RFC 3161 section 2.4.2 defines.
const FAILURE_NAMES: &[(usize, &str)] = &[
    (0, "badAlg"),
    (2, "badRequest"),
    (5, "badDataFormat"),
    (14, "timeNotAvailable"),
    (15, "unacceptedPolicy"),
    (16, "unacceptedExtension"),
    (17, "addInfoNotAvailable"),
    (25, "systemFailure"),
];

/// ```asn1
/// PKIStatusInfo ::= SEQUENCE {
///     status       PKIStatus,
///     statusString PKIFreeText OPTIONAL,
///     failInfo     PKIFailureInfo OPTIONAL }
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct PkiStatusInfo {
    pub status: u8,
    #[asn1(optional = "true")]
    pub status_string: Option<Vec<String>>,
    #[asn1(optional = "true")]
    pub fail_info: Option<BitString>,
}

impl PkiStatusInfo {
    pub fn status(&self) -> Option<PkiStatus> {
        PkiStatus::from_value(self.status)
    }

    pub fn is_granted(&self) -> bool {
        self.status().is_some_and(PkiStatus::is_granted)
    }

    /// Names of the failure bits that are set. Unknown bits are reported by
    /// position.
    pub fn failures(&self) -> Vec<String> {
        let Some(bits) = &self.fail_info else {
            return vec![];
        };

        bits.bits()
            .enumerate()
            .filter(|(_, set)| *set)
            .map(|(i, _)| {
                FAILURE_NAMES
                    .iter()
                    .find(|(bit, _)| *bit == i)
                    .map_or_else(|| format!("bit{i}"), |(_, name)| (*name).to_owned())
            })
            .collect()
    }

    /// Single line description of the status suitable for error messages.
    pub fn describe(&self) -> String {
        let mut parts = vec![];

        match self.status() {
            Some(s) => parts.push(s.to_string()),
            None => parts.push(format!("unknown status {}", self.status)),
        }

        if let Some(strings) = &self.status_string {
            parts.extend(strings.iter().cloned());
        }

        let failures = self.failures();
        if !failures.is_empty() {
            parts.push(format!("failures: {}", failures.join(", ")));
        }

        parts.join("; ")
    }
}

/// ```asn1
/// TimeStampResp ::= SEQUENCE {
///     status         PKIStatusInfo,
///     timeStampToken TimeStampToken OPTIONAL }
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TimeStampResp {
    pub status: PkiStatusInfo,
    #[asn1(optional = "true")]
    pub time_stamp_token: Option<ContentInfo>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct Accuracy {
    #[asn1(optional = "true")]
    pub seconds: Option<u64>,
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
    pub millis: Option<u16>,
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
    pub micros: Option<u16>,
}

/// Content signed by the TSA inside a token.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TstInfo {
    pub version: u8,
    pub policy: ObjectIdentifier,
    pub message_imprint: MessageImprint,
    pub serial_number: Int,
    pub gen_time: GeneralizedTime,
    #[asn1(optional = "true")]
    pub accuracy: Option<Accuracy>,
    #[asn1(default = "Default::default")]
    pub ordering: bool,
    #[asn1(optional = "true")]
    pub nonce: Option<Int>,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub tsa: Option<GeneralName>,
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
    pub extensions: Option<Extensions>,
}

#[cfg(test)]
mod tests {
    use der::{Decode, Encode};

    use super::*;

    const GRANTED: &[u8] = include_bytes!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/data/granted.tsr"
    ));
    const REJECTED: &[u8] = include_bytes!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/data/rejected.tsr"
    ));
    const REQUEST: &[u8] = include_bytes!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/data/req.tsq"
    ));

    #[test]
    fn parse_granted() {
        let resp = TimeStampResp::from_der(GRANTED).unwrap();

        assert!(resp.status.is_granted());
        assert_eq!(resp.status.status(), Some(PkiStatus::Granted));
        assert_eq!(
            resp.time_stamp_token.unwrap().content_type,
            const_oid::db::rfc5911::ID_SIGNED_DATA
        );
    }

    #[test]
    fn parse_rejected() {
        let resp = TimeStampResp::from_der(REJECTED).unwrap();

        assert!(!resp.status.is_granted());
        assert!(resp.time_stamp_token.is_none());
        assert_eq!(resp.status.failures(), ["badAlg"]);
        assert_eq!(
            resp.status.describe(),
            "rejection; Message digest algorithm is not supported.; failures: badAlg"
        );
    }

    #[test]
    fn request_reencodes_identically() {
        let req = TimeStampReq::from_der(REQUEST).unwrap();

        assert_eq!(req.version, TSP_VERSION);
        assert!(req.cert_req);
        assert!(req.nonce.is_some());
        assert_eq!(req.message_imprint.hashed_message.as_bytes().len(), 32);
        assert_eq!(req.to_der().unwrap(), REQUEST);
    }

    #[test]
    fn unknown_status_is_described() {
        let info = PkiStatusInfo {
            status: 9,
            status_string: None,
            fail_info: Some(BitString::new(6, [0b0000_0100, 0b0100_0000]).unwrap()),
        };

        assert!(!info.is_granted());
        assert_eq!(
            info.describe(),
            "unknown status 9; failures: badDataFormat, bit9"
        );
    }
}
