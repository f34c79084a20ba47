//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural
//! principles on the chat conductor core:
//! - No sleep() calls in production code (waiting is done on I/O and timeouts)
//! - No blocking primitives in async code
//!
//! The scanners live in `tests/`; this library only exposes the shared source
//! walker.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source root of the core crate
#[must_use]
pub fn core_src_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../conductor/core/src")
}

/// One production source file, with test modules stripped
pub struct SourceFile {
    /// Path on disk
    pub path: PathBuf,
    /// Lines up to the first `#[cfg(test)]`
    pub lines: Vec<String>,
}

/// Load every `.rs` file under `dir`, skipping the files named in `exempt`
#[must_use]
pub fn production_sources(dir: &Path, exempt: &[&str]) -> Vec<SourceFile> {
    let mut files = Vec::new();

    for entry in walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("rs") {
            continue;
        }
        let name = path.file_name().and_then(|s| s.to_str()).unwrap_or_default();
        if exempt.contains(&name) {
            continue;
        }
        let Ok(content) = fs::read_to_string(path) else {
            continue;
        };

        let lines = content
            .lines()
            .take_while(|line| line.trim() != "#[cfg(test)]")
            .map(str::to_string)
            .collect();
        files.push(SourceFile {
            path: path.to_path_buf(),
            lines,
        });
    }

    files
}

/// Code part of a line, without a trailing `//` comment
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}
