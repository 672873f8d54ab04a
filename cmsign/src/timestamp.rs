// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! RFC 3161 time-stamping of CMS signatures.
//!
//! A token is requested for each signer over its signature value and stored
//! as an `id-aa-timeStampToken` unsigned attribute. Tokens are treated as
//! opaque blobs. Only the outer response status is interpreted.

use std::{
    error,
    io::{self, Read},
    time::Duration,
};

use const_oid::{ObjectIdentifier, db::rfc5911};
use der::{
    Any, Decode, Encode,
    asn1::{OctetString, Uint},
};
use tracing::debug;

use crate::{
    format::{
        algorithm::DigestAlgorithm,
        cms::{Error, SignedData, SignerInfoExt},
        tsp::{MessageImprint, TSP_VERSION, TimeStampReq, TimeStampResp, TstInfo},
    },
    util::HexPreview,
};

pub type TransportError = Box<dyn error::Error + Send + Sync>;

type Result<T> = std::result::Result<T, Error>;

pub const CONTENT_TYPE_QUERY: &str = "application/timestamp-query";
pub const CONTENT_TYPE_REPLY: &str = "application/timestamp-reply";

/// Delivers an encoded `TimeStampReq` to a TSA and returns the raw
/// `TimeStampResp` bytes.
pub trait TimestampTransport {
    fn post_timestamp_request(
        &self,
        endpoint: &str,
        request: &[u8],
    ) -> std::result::Result<Vec<u8>, TransportError>;
}

impl<T: TimestampTransport + ?Sized> TimestampTransport for &T {
    fn post_timestamp_request(
        &self,
        endpoint: &str,
        request: &[u8],
    ) -> std::result::Result<Vec<u8>, TransportError> {
        (**self).post_timestamp_request(endpoint, request)
    }
}

#[derive(Clone, Debug)]
pub struct TimestampOptions {
    /// Algorithm for the message imprint.
    pub digest_algorithm: DigestAlgorithm,
    /// Requested TSA policy.
    pub policy: Option<ObjectIdentifier>,
    /// Ask the TSA to include its certificate in the token.
    pub cert_req: bool,
}

impl Default for TimestampOptions {
    fn default() -> Self {
        Self {
            digest_algorithm: DigestAlgorithm::Sha256,
            policy: None,
            cert_req: true,
        }
    }
}

/// A time-stamping authority reachable at `endpoint` through `transport`.
pub struct TimestampAuthority<T> {
    endpoint: String,
    transport: T,
    options: TimestampOptions,
}

impl<T: TimestampTransport> TimestampAuthority<T> {
    pub fn new(endpoint: impl Into<String>, transport: T) -> Self {
        Self::with_options(endpoint, transport, TimestampOptions::default())
    }

    pub fn with_options(
        endpoint: impl Into<String>,
        transport: T,
        options: TimestampOptions,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            transport,
            options,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn options(&self) -> &TimestampOptions {
        &self.options
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Build a request over `message` with a fresh random nonce.
    pub fn build_request(&self, message: &[u8]) -> Result<TimeStampReq> {
        let algorithm = self.options.digest_algorithm;
        let hashed_message = OctetString::new(algorithm.hash(message)).map_err(Error::Encode)?;
        let nonce = Uint::new(&rand::random::<u64>().to_be_bytes()).map_err(Error::Encode)?;

        Ok(TimeStampReq {
            version: TSP_VERSION,
            message_imprint: MessageImprint {
                hash_algorithm: algorithm.identifier(),
                hashed_message,
            },
            req_policy: self.options.policy,
            nonce: Some(nonce),
            cert_req: self.options.cert_req,
            extensions: None,
        })
    }

    /// Request a token over `message` and return the token's `ContentInfo`.
    pub fn request_token(&self, message: &[u8]) -> Result<Any> {
        let request = self.build_request(message)?.to_der().map_err(Error::Encode)?;

        debug!(
            "Requesting time-stamp from {} for {}",
            self.endpoint,
            HexPreview(message),
        );

        let data = self
            .transport
            .post_timestamp_request(&self.endpoint, &request)
            .map_err(Error::TransportFailure)?;

        let response = TimeStampResp::from_der(&data).map_err(Error::malformed)?;

        if !response.status.is_granted() {
            return Err(Error::TimestampRejected {
                status: response.status.status,
                message: response.status.describe(),
            });
        }

        let token = response
            .time_stamp_token
            .ok_or(Error::MissingTimestampToken)?;
        if token.content_type != rfc5911::ID_SIGNED_DATA {
            return Err(Error::InvalidTimestampToken(token.content_type));
        }

        debug!("TSA granted request with status {}", response.status.status);

        Any::encode_from(&token).map_err(Error::Encode)
    }
}

impl SignedData {
    /// Time-stamp a single signer. With no index, the most recently added
    /// signer is used. On error, the structure is not modified.
    pub fn add_timestamp<T: TimestampTransport>(
        &mut self,
        tsa: &TimestampAuthority<T>,
        index: Option<usize>,
    ) -> Result<()> {
        let count = self.signer_infos().len();
        let index = match index {
            Some(i) => i,
            None => count.checked_sub(1).ok_or(Error::SignerIndexOutOfRange {
                index: 0,
                count,
            })?,
        };
        let si = self
            .signer_infos()
            .get(index)
            .ok_or(Error::SignerIndexOutOfRange { index, count })?;

        let token = tsa.request_token(si.signature_bytes())?;

        self.attach_timestamp_tokens([(index, token)])
    }

    /// Time-stamp every signer. All tokens are fetched before any is
    /// attached, so a failure for one signer leaves the structure unchanged.
    pub fn add_timestamps<T: TimestampTransport>(
        &mut self,
        tsa: &TimestampAuthority<T>,
    ) -> Result<()> {
        let tokens = self
            .signer_infos()
            .iter()
            .enumerate()
            .map(|(i, si)| Ok((i, tsa.request_token(si.signature_bytes())?)))
            .collect::<Result<Vec<_>>>()?;

        self.attach_timestamp_tokens(tokens)
    }
}

/// Decode the `TSTInfo` from a token. The token's signature is not verified.
pub fn decode_tst_info(token: &Any) -> Result<TstInfo> {
    let signed_data = SignedData::from_der(&token.to_der().map_err(Error::Encode)?)?;
    let content = signed_data.content().ok_or(Error::MissingContent)?;

    TstInfo::from_der(content).map_err(Error::malformed)
}

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("TSA returned HTTP status {0}: {1}")]
    Status(u16, String),
    #[error("TSA returned unexpected content type: {0:?}")]
    ContentType(String),
    #[error("Failed to connect to TSA: {0}")]
    Connection(String),
    #[error("Failed to read TSA response")]
    Read(#[source] io::Error),
    #[error("TSA response exceeds {0} bytes")]
    TooLarge(u64),
}

/// [`TimestampTransport`] that POSTs requests over HTTP(S).
pub struct HttpTransport {
    agent: ureq::Agent,
    headers: Vec<(String, String)>,
    max_response_size: u64,
}

impl HttpTransport {
    pub const DEFAULT_MAX_RESPONSE_SIZE: u64 = 1024 * 1024;

    pub fn new(timeout: Option<Duration>) -> Self {
        let mut builder = ureq::AgentBuilder::new().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION"),
        ));
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }

        Self {
            agent: builder.build(),
            headers: vec![],
            max_response_size: Self::DEFAULT_MAX_RESPONSE_SIZE,
        }
    }

    /// Add a header to every request, eg. for TSA authentication.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_max_response_size(mut self, size: u64) -> Self {
        self.max_response_size = size;
        self
    }

    fn post(&self, endpoint: &str, request: &[u8]) -> std::result::Result<Vec<u8>, HttpError> {
        let mut req = self.agent.post(endpoint);
        for (name, value) in &self.headers {
            req = req.set(name, value);
        }

        let response = match req
            .set("Content-Type", CONTENT_TYPE_QUERY)
            .send_bytes(request)
        {
            Ok(r) => r,
            Err(ureq::Error::Status(code, r)) => {
                return Err(HttpError::Status(code, r.status_text().to_owned()));
            }
            // ureq's error type is huge, so only keep the message.
            Err(e) => return Err(HttpError::Connection(e.to_string())),
        };

        if response.content_type() != CONTENT_TYPE_REPLY {
            return Err(HttpError::ContentType(response.content_type().to_owned()));
        }

        let mut data = vec![];
        response
            .into_reader()
            .take(self.max_response_size + 1)
            .read_to_end(&mut data)
            .map_err(HttpError::Read)?;

        if data.len() as u64 > self.max_response_size {
            return Err(HttpError::TooLarge(self.max_response_size));
        }

        Ok(data)
    }
}

impl TimestampTransport for HttpTransport {
    fn post_timestamp_request(
        &self,
        endpoint: &str,
        request: &[u8],
    ) -> std::result::Result<Vec<u8>, TransportError> {
        Ok(self.post(endpoint, request)?)
    }
}
