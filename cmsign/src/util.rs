/*
 * SPDX-FileCopyrightText: 2023-2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{fmt, path::Path};

/// Captures the [`fmt::Debug`] representation of a value that is not itself
/// `Send + Sync` (eg. [`std::process::Command`]) so that it can be stored in an
/// error type.
#[derive(Clone)]
pub struct DebugString(String);

impl DebugString {
    pub fn new<T: fmt::Debug + ?Sized>(value: &T) -> Self {
        Self(format!("{value:?}"))
    }
}

impl fmt::Debug for DebugString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Get the parent directory of a path, using `.` for bare filenames.
pub fn parent_path(path: &Path) -> &Path {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            return parent;
        }
    }

    Path::new(".")
}

/// Formats a byte slice as lowercase hex, eliding the middle of long values.
#[derive(Clone, Copy)]
pub struct HexPreview<'a>(pub &'a [u8]);

impl fmt::Display for HexPreview<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const EDGE: usize = 16;

        if self.0.len() <= EDGE * 2 {
            f.write_str(&hex::encode(self.0))
        } else {
            write!(
                f,
                "{}...{} ({} bytes)",
                hex::encode(&self.0[..EDGE]),
                hex::encode(&self.0[self.0.len() - EDGE..]),
                self.0.len(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use super::*;

    #[test]
    fn debug_string() {
        let mut command = Command::new("helper");
        command.arg("SHA256_RSA2048");

        assert_eq!(
            format!("{:?}", DebugString::new(&command)),
            r#""helper" "SHA256_RSA2048""#
        );
    }

    #[test]
    fn parent_path_of_bare_name() {
        assert_eq!(parent_path(Path::new("sig.p7s")), Path::new("."));
        assert_eq!(parent_path(Path::new("out/sig.p7s")), Path::new("out"));
    }

    #[test]
    fn hex_preview() {
        assert_eq!(HexPreview(&[0xde, 0xad]).to_string(), "dead");

        let long = (0..40).collect::<Vec<u8>>();
        assert_eq!(
            HexPreview(&long).to_string(),
            "000102030405060708090a0b0c0d0e0f...18191a1b1c1d1e1f2021222324252627 (40 bytes)"
        );
    }
}
