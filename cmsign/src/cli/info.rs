/*
 * SPDX-FileCopyrightText: 2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{fs, path::PathBuf, time::SystemTime};

use anyhow::{Context, Result};
use clap::Parser;
use cms::signed_data::SignerIdentifier;
use const_oid::ObjectIdentifier;
use der::DateTime;
use tracing::warn;

use crate::{
    format::{
        algorithm::{self, DigestAlgorithm},
        cms::{SignedData, SignerInfoExt},
    },
    timestamp,
    util::HexPreview,
};

fn oid_name(oid: ObjectIdentifier) -> String {
    match DigestAlgorithm::from_oid(oid) {
        Ok(d) => d.to_string(),
        Err(_) => algorithm::algorithm_name(oid)
            .map_or_else(|| oid.to_string(), |n| n.to_owned()),
    }
}

fn format_time(time: SystemTime) -> String {
    DateTime::from_system_time(time).map_or_else(|_| format!("{time:?}"), |t| t.to_string())
}

pub fn info_main(cli: &InfoCli) -> Result<()> {
    let data = fs::read(&cli.input)
        .with_context(|| format!("Failed to read input: {:?}", cli.input))?;
    let signed_data = SignedData::from_der(&data)
        .with_context(|| format!("Failed to parse SignedData: {:?}", cli.input))?;

    println!("Version: {:?}", signed_data.version());
    println!("Content type: {}", signed_data.content_type());
    match signed_data.content() {
        Some(c) => println!("Content: {}", HexPreview(c)),
        None => println!("Content: <detached>"),
    }

    let digests = signed_data
        .digest_algorithms()
        .iter()
        .map(|a| oid_name(a.oid))
        .collect::<Vec<_>>();
    println!("Digest algorithms: {}", digests.join(", "));

    println!("Certificates:");
    for cert in signed_data.certificates() {
        let tbs = &cert.tbs_certificate;
        println!("- Subject: {}", tbs.subject);
        println!("  Issuer: {}", tbs.issuer);
        println!("  Serial: {}", HexPreview(tbs.serial_number.as_bytes()));
    }

    println!("Signers:");
    for (i, si) in signed_data.signer_infos().iter().enumerate() {
        println!("- Index: {i}");

        match &si.sid {
            SignerIdentifier::IssuerAndSerialNumber(ias) => {
                println!("  Issuer: {}", ias.issuer);
                println!("  Serial: {}", HexPreview(ias.serial_number.as_bytes()));
            }
            SignerIdentifier::SubjectKeyIdentifier(ski) => {
                println!("  Subject key ID: {}", HexPreview(ski.0.as_bytes()));
            }
        }

        println!("  Digest algorithm: {}", oid_name(si.digest_alg.oid));
        println!(
            "  Signature algorithm: {}",
            oid_name(si.signature_algorithm.oid),
        );
        if let Some(time) = si.signing_time() {
            println!("  Signing time: {}", format_time(time));
        }
        if let Some(digest) = si.message_digest() {
            println!("  Message digest: {}", HexPreview(&digest));
        }
        println!("  Signature: {}", HexPreview(si.signature_bytes()));

        for token in si.timestamp_tokens() {
            match timestamp::decode_tst_info(token) {
                Ok(tst_info) => {
                    println!("  Time-stamp: {}", tst_info.gen_time.to_date_time());
                    println!("    Policy: {}", tst_info.policy);
                    println!(
                        "    Serial: {}",
                        HexPreview(tst_info.serial_number.as_bytes()),
                    );
                    println!(
                        "    Imprint: {} {}",
                        oid_name(tst_info.message_imprint.hash_algorithm.oid),
                        HexPreview(tst_info.message_imprint.hashed_message.as_bytes()),
                    );
                }
                Err(e) => {
                    warn!("Failed to decode time-stamp token for signer #{i}: {e}");
                    println!("  Time-stamp: <undecodable>");
                }
            }
        }
    }

    Ok(())
}

/// Show the structure of a DER-encoded SignedData.
///
/// Signatures and time-stamp tokens are not verified.
#[derive(Debug, Parser)]
pub struct InfoCli {
    /// Path to input DER-encoded SignedData.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub input: PathBuf,
}
