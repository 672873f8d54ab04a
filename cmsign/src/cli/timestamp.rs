/*
 * SPDX-FileCopyrightText: 2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{fs, path::PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use const_oid::ObjectIdentifier;

use crate::{
    cli::{self, sign, status, warning},
    config::Config,
    format::cms::SignedData,
    timestamp::TimestampAuthority,
};

pub fn timestamp_main(cli: &TimestampCli, config: &Config) -> Result<()> {
    let data = fs::read(&cli.input)
        .with_context(|| format!("Failed to read input: {:?}", cli.input))?;
    let mut signed_data = SignedData::from_der(&data)
        .with_context(|| format!("Failed to parse SignedData: {:?}", cli.input))?;

    for index in signed_data.reordered_signers() {
        warning!(
            "Signer #{index} has unsorted signed attributes; its signature will not verify after re-encoding"
        );
    }

    let Some(mut tsa) = sign::tsa_config(config, &cli.tsa) else {
        bail!("No TSA URL specified with --tsa or in the config file");
    };
    if let Some(policy) = cli.tsa_policy {
        tsa.policy = Some(policy);
    }

    match cli.signer_index {
        Some(index) => {
            let url = tsa.url.as_deref().unwrap_or_default();
            let authority =
                TimestampAuthority::with_options(url, tsa.to_transport(), tsa.to_options());

            status!("Requesting time-stamp for signer #{index} from {url}");

            signed_data
                .add_timestamp(&authority, Some(index))
                .with_context(|| format!("Failed to time-stamp signer #{index}"))?;
        }
        None => sign::timestamp_all(&mut signed_data, &tsa)?,
    }

    let output = cli.output.as_ref().unwrap_or(&cli.input);
    let encoded = signed_data.to_der().context("Failed to encode SignedData")?;

    cli::write_output(output, &encoded)?;

    Ok(())
}

/// Add RFC 3161 time-stamps to an existing SignedData.
///
/// Each time-stamp is requested over a signer's signature value and stored as
/// an unsigned attribute, so existing signatures remain valid.
#[derive(Debug, Parser)]
pub struct TimestampCli {
    /// Path to input DER-encoded SignedData.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub input: PathBuf,

    /// Path to output SignedData. Defaults to modifying the input in place.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub output: Option<PathBuf>,

    /// Only time-stamp the signer at this index.
    ///
    /// By default, every signer is time-stamped.
    #[arg(long, value_name = "INDEX")]
    pub signer_index: Option<usize>,

    /// TSA policy OID to request.
    #[arg(long, value_name = "OID", value_parser = cli::parse_oid)]
    pub tsa_policy: Option<ObjectIdentifier>,

    #[command(flatten)]
    pub tsa: sign::TsaGroup,
}
