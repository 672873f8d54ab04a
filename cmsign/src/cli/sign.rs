/*
 * SPDX-FileCopyrightText: 2023-2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{ffi::OsString, fs, path::PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser};
use x509_cert::Certificate;

use crate::{
    cli::{self, status, warning},
    config::{Config, TsaConfig},
    crypto::{self, PassphraseSource, RsaSigningKey},
    format::{
        algorithm::{DigestAlgorithm, RsaIdentifier},
        cms::SignedData,
    },
    timestamp::TimestampAuthority,
};

pub fn load_key(group: &KeyGroup) -> Result<(RsaSigningKey, Vec<Certificate>)> {
    let source = PassphraseSource::new(group.pass_file.as_deref(), group.pass_env_var.as_deref());
    let signing_key = if let Some(helper) = &group.signing_helper {
        let public_key = crypto::read_pem_public_key_file(&group.key)
            .with_context(|| format!("Failed to load key: {:?}", group.key))?;

        RsaSigningKey::External {
            program: helper.clone(),
            public_key_file: group.key.clone(),
            public_key,
            passphrase_source: source,
        }
    } else {
        let private_key = crypto::read_pem_key_file(&group.key, source.as_ref())
            .with_context(|| format!("Failed to load key: {:?}", group.key))?;

        RsaSigningKey::Internal(private_key)
    };

    let certs = crypto::read_pem_cert_chain_file(&group.cert)
        .with_context(|| format!("Failed to load certificates: {:?}", group.cert))?;

    Ok((signing_key, certs))
}

/// Merge the TSA flags into the config file's `[tsa]` table. Returns [`None`]
/// if no TSA URL was given anywhere.
pub fn tsa_config(config: &Config, group: &TsaGroup) -> Option<TsaConfig> {
    let mut tsa = config.tsa.clone();

    if let Some(url) = &group.tsa {
        tsa.url = Some(url.clone());
    }
    if let Some(digest) = group.tsa_digest {
        tsa.digest = Some(digest);
    }
    if let Some(timeout) = group.tsa_timeout {
        tsa.timeout = Some(timeout);
    }

    tsa.url.is_some().then_some(tsa)
}

pub fn timestamp_all(signed_data: &mut SignedData, tsa: &TsaConfig) -> Result<()> {
    let url = tsa.url.as_deref().ok_or_else(|| anyhow!("No TSA URL"))?;
    let authority = TimestampAuthority::with_options(url, tsa.to_transport(), tsa.to_options());

    status!("Requesting time-stamps from {url}");

    signed_data
        .add_timestamps(&authority)
        .with_context(|| format!("Failed to time-stamp signatures with {url}"))
}

pub fn sign_main(cli: &SignCli, config: &Config) -> Result<()> {
    let mut options = config.signing.to_options();
    if cli.rsa_encryption_oid {
        options.rsa_identifier = RsaIdentifier::RsaEncryption;
    }

    let (signing_key, certs) = load_key(&cli.key)?;

    let mut signed_data = if let Some(path) = &cli.input.input {
        if let Some(d) = cli.digest_algorithm {
            options.digest_algorithm = d;
        }

        let data = fs::read(path).with_context(|| format!("Failed to read input: {path:?}"))?;

        let mut signed_data = SignedData::new(&data).context("Failed to create SignedData")?;
        signed_data
            .sign_with_options(&certs, &signing_key, &options)
            .with_context(|| format!("Failed to sign {path:?}"))?;

        if cli.detached {
            signed_data.detach();
        }

        signed_data
    } else if let Some(digest) = &cli.input.digest {
        let digest = hex::decode(digest).context("Digest is not valid hex")?;

        // Only infer from the length if nothing was specified.
        options.digest_algorithm = match cli.digest_algorithm.or(config.signing.digest) {
            Some(d) => d,
            None => DigestAlgorithm::from_digest_len(digest.len())?,
        };

        if !cli.detached {
            warning!("Signing a precomputed digest always produces detached output");
        }

        SignedData::from_digest_with_options(&digest, &certs, &signing_key, &options)
            .context("Failed to sign digest")?
    } else {
        unreachable!()
    };

    if let Some(tsa) = tsa_config(config, &cli.tsa) {
        timestamp_all(&mut signed_data, &tsa)?;
    }

    let encoded = signed_data.to_der().context("Failed to encode SignedData")?;

    cli::write_output(&cli.output, &encoded)?;

    status!(
        "Wrote {} signature to {:?}",
        if signed_data.is_detached() {
            "detached"
        } else {
            "attached"
        },
        cli.output,
    );

    Ok(())
}

#[derive(Debug, Args)]
pub struct KeyGroup {
    /// Path to signing key.
    ///
    /// This should normally be a private key. However, if --signing-helper is
    /// used, then it should be a public key instead.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub key: PathBuf,

    /// Certificate chain, starting with the signing certificate.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub cert: PathBuf,

    /// Environment variable containing private key passphrase.
    #[arg(long, value_name = "ENV_VAR", value_parser, group = "pass")]
    pub pass_env_var: Option<OsString>,

    /// File containing private key passphrase.
    #[arg(long, value_name = "FILE", value_parser, group = "pass")]
    pub pass_file: Option<PathBuf>,

    /// External program for signing.
    ///
    /// If this option is specified, then --key must refer to a public key. The
    /// program will be invoked as:
    ///
    /// <program> <algo> <public key> [file <pass file>|env <pass env>]
    #[arg(long, value_name = "PROGRAM", value_parser)]
    pub signing_helper: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct TsaGroup {
    /// URL of an RFC 3161 time-stamping authority.
    #[arg(long, value_name = "URL")]
    pub tsa: Option<String>,

    /// Digest algorithm for the time-stamp request's message imprint.
    #[arg(long, value_name = "ALGORITHM", value_parser = cli::parse_digest)]
    pub tsa_digest: Option<DigestAlgorithm>,

    /// HTTP timeout in seconds for time-stamp requests.
    #[arg(long, value_name = "SECONDS")]
    pub tsa_timeout: Option<u64>,
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct InputGroup {
    /// File to sign.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub input: Option<PathBuf>,

    /// Hex-encoded precomputed digest to sign.
    ///
    /// The digest algorithm is inferred from the length unless
    /// --digest-algorithm is specified.
    #[arg(long, value_name = "HEX")]
    pub digest: Option<String>,
}

/// Create a CMS SignedData signature.
#[derive(Debug, Parser)]
pub struct SignCli {
    #[command(flatten)]
    pub input: InputGroup,

    /// Path to output DER-encoded SignedData.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub output: PathBuf,

    #[command(flatten)]
    pub key: KeyGroup,

    /// Omit the signed content from the output.
    #[arg(long)]
    pub detached: bool,

    /// Digest algorithm (eg. sha256 or 2.16.840.1.101.3.4.2.1).
    #[arg(long, value_name = "ALGORITHM", value_parser = cli::parse_digest)]
    pub digest_algorithm: Option<DigestAlgorithm>,

    /// Identify RSA signatures with rsaEncryption instead of
    /// <digest>WithRSAEncryption.
    #[arg(long)]
    pub rsa_encryption_oid: bool,

    #[command(flatten)]
    pub tsa: TsaGroup,
}
