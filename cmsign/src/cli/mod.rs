/*
 * SPDX-FileCopyrightText: 2023-2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

pub mod args;
pub mod completion;
pub mod info;
pub mod sign;
pub mod timestamp;

use std::{ffi::OsStr, io::Write, path::Path};

use anyhow::{Context, Result};
use const_oid::ObjectIdentifier;
use tempfile::NamedTempFile;

use crate::{
    format::algorithm::{self, DigestAlgorithm},
    util,
};

pub fn parse_digest(s: &str) -> Result<DigestAlgorithm, algorithm::Error> {
    s.parse()
}

pub fn parse_oid(s: &str) -> Result<ObjectIdentifier, String> {
    ObjectIdentifier::new(s).map_err(|e| format!("Invalid OID {s:?}: {e}"))
}

/// Write `data` to a temporary file next to `output` and then move it into
/// place. `output` is left untouched if anything fails.
pub fn write_output(output: &Path, data: &[u8]) -> Result<()> {
    let mut temp_writer = NamedTempFile::with_prefix_in(
        output
            .file_name()
            .unwrap_or_else(|| OsStr::new("cmsign.tmp")),
        util::parent_path(output),
    )
    .context("Failed to open temporary output file")?;
    let temp_path = temp_writer.path().to_owned();

    temp_writer
        .write_all(data)
        .and_then(|()| temp_writer.flush())
        .with_context(|| format!("Failed to write temporary file: {temp_path:?}"))?;

    // NamedTempFile forces 600 permissions on temp files because it's the safe
    // option for a shared /tmp. Since we're writing to the output file's
    // directory, just mimic umask.
    #[cfg(unix)]
    {
        use std::{fs::Permissions, os::unix::prelude::PermissionsExt};

        use rustix::{fs::Mode, process::umask};

        let mask = umask(Mode::empty());
        umask(mask);

        // Mac uses a 16-bit value.
        #[allow(clippy::useless_conversion)]
        let mode = u32::from(0o666 & !mask.bits());

        temp_writer
            .as_file()
            .set_permissions(Permissions::from_mode(mode))
            .with_context(|| format!("Failed to set permissions to {mode:o}: {temp_path:?}"))?;
    }

    temp_writer.persist(output).with_context(|| {
        format!("Failed to move temporary file to output path: {temp_path:?} -> {output:?}")
    })?;

    Ok(())
}

macro_rules! status {
    ($($arg:tt)*) => {
        println!("\x1b[1m[*] {}\x1b[0m", format!($($arg)*))
    }
}

macro_rules! warning {
    ($($arg:tt)*) => {
        println!("\x1b[1;31m[WARNING] {}\x1b[0m", format!($($arg)+))
    }
}

pub(crate) use status;
pub(crate) use warning;
