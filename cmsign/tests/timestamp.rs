// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::cell::Cell;

use assert_matches::assert_matches;
use const_oid::{ObjectIdentifier, db::rfc5911};
use der::{Any, Decode, Encode};
use x509_cert::{Certificate, der::DecodePem, spki::SubjectPublicKeyInfoOwned};

use cmsign::{
    crypto::{Signer, SignerError},
    format::{
        algorithm::DigestAlgorithm,
        attribute,
        cms::{Error, SignedData, SignerInfoExt},
    },
    timestamp::{self, TimestampAuthority, TimestampTransport, TransportError},
};

const ENDPOINT: &str = "http://tsa.invalid/tsr";
const GRANTED: &[u8] = include_bytes!("data/granted.tsr");
const REJECTED: &[u8] = include_bytes!("data/rejected.tsr");
const TOKEN: &[u8] = include_bytes!("data/token.der");
const LEAF_CERT: &str = include_str!("data/leaf.crt");
const TSA_CERT: &str = include_str!("data/tsa.crt");

/// The imprint in the granted response is over this value.
const SIGNATURE: &[u8] = b"fixed signature value";

struct TestSigner(SubjectPublicKeyInfoOwned);

impl Signer for TestSigner {
    fn public_key(&self) -> Result<SubjectPublicKeyInfoOwned, SignerError> {
        Ok(self.0.clone())
    }

    fn sign(&self, _digest: DigestAlgorithm, _message: &[u8]) -> Result<Vec<u8>, SignerError> {
        Ok(SIGNATURE.to_vec())
    }
}

/// Replays a canned response and counts the requests.
struct ReplayTransport {
    response: Result<Vec<u8>, &'static str>,
    requests: Cell<usize>,
}

impl ReplayTransport {
    fn new(response: Result<&[u8], &'static str>) -> Self {
        Self {
            response: response.map(|r| r.to_vec()),
            requests: Cell::new(0),
        }
    }
}

impl TimestampTransport for ReplayTransport {
    fn post_timestamp_request(
        &self,
        endpoint: &str,
        _request: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        assert_eq!(endpoint, ENDPOINT);
        self.requests.set(self.requests.get() + 1);

        match &self.response {
            Ok(data) => Ok(data.clone()),
            Err(msg) => Err((*msg).into()),
        }
    }
}

/// Fails every request after the first.
struct FlakyTransport(Cell<bool>);

impl TimestampTransport for FlakyTransport {
    fn post_timestamp_request(
        &self,
        _endpoint: &str,
        _request: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        if self.0.replace(true) {
            Err("connection reset".into())
        } else {
            Ok(GRANTED.to_vec())
        }
    }
}

fn tsa(response: Result<&[u8], &'static str>) -> TimestampAuthority<ReplayTransport> {
    TimestampAuthority::new(ENDPOINT, ReplayTransport::new(response))
}

fn cert_and_signer() -> (Certificate, TestSigner) {
    let cert = Certificate::from_pem(LEAF_CERT).unwrap();
    let signer = TestSigner(cert.tbs_certificate.subject_public_key_info.clone());

    (cert, signer)
}

fn signed_data() -> SignedData {
    let (cert, signer) = cert_and_signer();
    let digest = DigestAlgorithm::Sha256.hash(b"content");

    SignedData::from_digest(&digest, &[cert], &signer).unwrap()
}

#[test]
fn attach_single_token() {
    let mut sd = signed_data();
    let before = sd.signer_infos()[0].clone();

    let tsa = tsa(Ok(GRANTED));
    sd.add_timestamps(&tsa).unwrap();
    assert_eq!(tsa.transport().requests.get(), 1);

    let after = &sd.signer_infos()[0];
    let tokens = after.timestamp_tokens();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].to_der().unwrap(), TOKEN);

    let attrs = after.unsigned_attrs.as_ref().unwrap();
    assert_eq!(attrs.len(), 1);
    assert!(attribute::contains(attrs, attribute::ID_AA_TIME_STAMP_TOKEN));

    // Nothing covered by the signature changed.
    assert_eq!(after.signature, before.signature);
    assert_eq!(
        after.signed_attrs.as_ref().unwrap().to_der().unwrap(),
        before.signed_attrs.as_ref().unwrap().to_der().unwrap()
    );
    assert_eq!(after.sid, before.sid);
}

#[test]
fn timestamped_round_trip() {
    let mut sd = signed_data();
    sd.add_timestamp(&tsa(Ok(GRANTED)), None).unwrap();

    let encoded = sd.to_der().unwrap();
    let parsed = SignedData::from_der(&encoded).unwrap();

    assert_eq!(parsed, sd);
    assert_eq!(parsed.to_der().unwrap(), encoded);

    let tokens = parsed.signer_infos()[0].timestamp_tokens();
    let tst_info = timestamp::decode_tst_info(tokens[0]).unwrap();
    assert_eq!(tst_info.policy, ObjectIdentifier::new_unwrap("1.2.3.4.1"));
    assert_eq!(
        tst_info.message_imprint.hashed_message.as_bytes(),
        DigestAlgorithm::Sha256.hash(SIGNATURE)
    );
    assert_eq!(
        tst_info.gen_time.to_date_time().to_string(),
        "2026-10-19T15:58:26Z"
    );
}

#[test]
fn retimestamp_appends_value() {
    // Changing the last byte of the TSA's signature gives a distinct token.
    let mut second = GRANTED.to_vec();
    *second.last_mut().unwrap() ^= 1;

    let mut sd = signed_data();
    sd.add_timestamps(&tsa(Ok(GRANTED))).unwrap();
    sd.add_timestamps(&tsa(Ok(second.as_slice()))).unwrap();

    let si = &sd.signer_infos()[0];
    assert_eq!(si.unsigned_attrs.as_ref().unwrap().len(), 1);

    let tokens = si.timestamp_tokens();
    assert_eq!(tokens.len(), 2);
    assert!(tokens.iter().any(|t| t.to_der().unwrap() == TOKEN));

    let encoded = sd.to_der().unwrap();
    assert_eq!(SignedData::from_der(&encoded).unwrap(), sd);
}

#[test]
fn identical_token_is_rejected() {
    let mut sd = signed_data();
    let tsa = tsa(Ok(GRANTED));

    sd.add_timestamps(&tsa).unwrap();
    let once = sd.to_der().unwrap();

    assert_matches!(
        sd.add_timestamps(&tsa),
        Err(Error::DuplicateTimestampToken { index: 0 })
    );
    assert_eq!(tsa.transport().requests.get(), 2);
    assert_eq!(sd.to_der().unwrap(), once);
}

#[test]
fn rejection_preserves_state() {
    let mut sd = signed_data();
    let before = sd.to_der().unwrap();

    assert_matches!(
        sd.add_timestamps(&tsa(Ok(REJECTED))),
        Err(Error::TimestampRejected { status: 2, message })
            if message.contains("badAlg")
    );
    assert_eq!(sd.to_der().unwrap(), before);
}

#[test]
fn transport_failure_propagates() {
    let mut sd = signed_data();
    let before = sd.to_der().unwrap();

    assert_matches!(
        sd.add_timestamps(&tsa(Err("network unreachable"))),
        Err(Error::TransportFailure(e)) if e.to_string() == "network unreachable"
    );
    assert_eq!(sd.to_der().unwrap(), before);
}

#[test]
fn malformed_response_preserves_state() {
    let mut sd = signed_data();
    let before = sd.to_der().unwrap();

    assert_matches!(
        sd.add_timestamps(&tsa(Ok(&GRANTED[..100]))),
        Err(Error::MalformedEncoding { .. })
    );
    assert_eq!(sd.to_der().unwrap(), before);
}

#[test]
fn signer_index_out_of_range() {
    let mut sd = signed_data();
    let tsa = tsa(Ok(GRANTED));

    assert_matches!(
        sd.add_timestamp(&tsa, Some(1)),
        Err(Error::SignerIndexOutOfRange { index: 1, count: 1 })
    );

    let mut empty = SignedData::new(b"content").unwrap();
    assert_matches!(
        empty.add_timestamp(&tsa, None),
        Err(Error::SignerIndexOutOfRange { index: 0, count: 0 })
    );

    // Nothing to request when there are no signers.
    empty.add_timestamps(&tsa).unwrap();
    assert_eq!(tsa.transport().requests.get(), 0);
}

#[test]
fn explicit_signer_index() {
    let (cert, signer) = cert_and_signer();
    let mut sd = SignedData::new(b"content").unwrap();
    sd.sign(&[cert.clone()], &signer).unwrap();
    sd.sign(&[cert], &signer).unwrap();

    sd.add_timestamp(&tsa(Ok(GRANTED)), Some(0)).unwrap();
    assert_eq!(sd.signer_infos()[0].timestamp_tokens().len(), 1);
    assert!(sd.signer_infos()[1].unsigned_attrs.is_none());

    // Default is the most recently added signer.
    sd.add_timestamp(&tsa(Ok(GRANTED)), None).unwrap();
    assert_eq!(sd.signer_infos()[1].timestamp_tokens().len(), 1);
}

#[test]
fn all_or_nothing_across_signers() {
    let (cert, signer) = cert_and_signer();
    let mut sd = SignedData::new(b"content").unwrap();
    sd.sign(&[cert.clone()], &signer).unwrap();
    sd.sign(&[cert], &signer).unwrap();
    let before = sd.to_der().unwrap();

    let flaky = TimestampAuthority::new(ENDPOINT, FlakyTransport(Cell::new(false)));

    assert_matches!(sd.add_timestamps(&flaky), Err(Error::TransportFailure(_)));
    assert_eq!(sd.to_der().unwrap(), before);
}

#[test]
fn non_signed_data_token_rejected() {
    // Both OIDs encode to the same length, so the response stays valid DER.
    let signed_data_oid = rfc5911::ID_SIGNED_DATA.to_der().unwrap();
    let data_oid = rfc5911::ID_DATA.to_der().unwrap();
    let mut response = GRANTED.to_vec();
    let pos = response
        .windows(signed_data_oid.len())
        .position(|w| w == signed_data_oid)
        .unwrap();
    response[pos..pos + data_oid.len()].copy_from_slice(&data_oid);

    let mut sd = signed_data();
    let before = sd.to_der().unwrap();

    assert_matches!(
        sd.add_timestamps(&tsa(Ok(response.as_slice()))),
        Err(Error::InvalidTimestampToken(oid)) if oid == rfc5911::ID_DATA
    );
    assert_eq!(sd.to_der().unwrap(), before);
}

#[test]
fn decode_token_directly() {
    let token = Any::from_der(TOKEN).unwrap();
    let tst_info = timestamp::decode_tst_info(&token).unwrap();

    assert_eq!(tst_info.version, 1);
    assert!(tst_info.ordering);
    assert!(tst_info.nonce.is_some());
    assert!(tst_info.tsa.is_some());

    // The TSA was asked to include its certificate.
    let tsa_cert = Certificate::from_pem(TSA_CERT).unwrap();
    let token = SignedData::from_der(TOKEN).unwrap();
    assert!(token.certificates().any(|c| *c == tsa_cert));
    assert_eq!(token.content_type(), cmsign::format::tsp::ID_CT_TST_INFO);
}
