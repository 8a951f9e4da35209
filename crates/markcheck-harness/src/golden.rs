//! Golden file comparison and update.
//!
//! Comparison is byte-exact and block-wise. A missing golden stands for an
//! empty artifact, and update mode never leaves a zero-byte golden behind.

use std::fs::File;
use std::io::{self, ErrorKind, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::GoldenError;

/// Block size for streaming comparisons.
pub const COMPARE_BLOCK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoldenMode {
    Compare,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoldenOutcome {
    Matched,
    Mismatched,
    /// Update mode wrote the artifact over the golden.
    Written,
    /// Update mode removed the golden because the artifact was empty.
    Removed,
}

impl GoldenOutcome {
    #[must_use]
    pub fn is_failure(self) -> bool {
        self == Self::Mismatched
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::Mismatched => "mismatched",
            Self::Written => "written",
            Self::Removed => "removed",
        }
    }
}

/// Check an in-memory artifact against `golden`.
pub fn check_bytes(
    produced: &[u8],
    golden: &Path,
    mode: GoldenMode,
) -> Result<GoldenOutcome, GoldenError> {
    match mode {
        GoldenMode::Update => update(produced, golden),
        GoldenMode::Compare => compare(produced, produced.is_empty(), golden),
    }
}

/// Check an artifact on disk against `golden`.
pub fn check_file(
    produced: &Path,
    golden: &Path,
    mode: GoldenMode,
) -> Result<GoldenOutcome, GoldenError> {
    let read_err = |source| GoldenError::Read {
        path: produced.to_path_buf(),
        source,
    };
    match mode {
        GoldenMode::Update => {
            let data = std::fs::read(produced).map_err(read_err)?;
            update(&data, golden)
        }
        GoldenMode::Compare => {
            let file = File::open(produced).map_err(read_err)?;
            let empty = file.metadata().map_err(read_err)?.len() == 0;
            compare(file, empty, golden)
        }
    }
}

fn compare(
    produced: impl Read,
    produced_empty: bool,
    golden: &Path,
) -> Result<GoldenOutcome, GoldenError> {
    let golden_file = match File::open(golden) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Ok(if produced_empty {
                GoldenOutcome::Matched
            } else {
                GoldenOutcome::Mismatched
            });
        }
        Err(source) => {
            return Err(GoldenError::Read {
                path: golden.to_path_buf(),
                source,
            });
        }
    };
    let same = same_content(produced, golden_file).map_err(|source| GoldenError::Read {
        path: golden.to_path_buf(),
        source,
    })?;
    Ok(if same {
        GoldenOutcome::Matched
    } else {
        GoldenOutcome::Mismatched
    })
}

fn update(produced: &[u8], golden: &Path) -> Result<GoldenOutcome, GoldenError> {
    if produced.is_empty() {
        return match std::fs::remove_file(golden) {
            Ok(()) => Ok(GoldenOutcome::Removed),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(GoldenOutcome::Removed),
            Err(source) => Err(GoldenError::Remove {
                path: golden.to_path_buf(),
                source,
            }),
        };
    }
    if let Some(dir) = golden.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| GoldenError::Write {
            path: golden.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(golden, produced).map_err(|source| GoldenError::Write {
        path: golden.to_path_buf(),
        source,
    })?;
    Ok(GoldenOutcome::Written)
}

fn same_content(mut a: impl Read, mut b: impl Read) -> io::Result<bool> {
    let mut block_a = [0u8; COMPARE_BLOCK];
    let mut block_b = [0u8; COMPARE_BLOCK];
    loop {
        let n_a = read_block(&mut a, &mut block_a)?;
        let n_b = read_block(&mut b, &mut block_b)?;
        if n_a != n_b || block_a[..n_a] != block_b[..n_b] {
            return Ok(false);
        }
        if n_a == 0 {
            return Ok(true);
        }
    }
}

/// Fill `buf` unless end of input comes first.
fn read_block(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Lowercase hex SHA-256 of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex_lower(&Sha256::digest(data))
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}
