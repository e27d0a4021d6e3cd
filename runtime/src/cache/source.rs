//! Input digests for cache keys.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use strata_core::{Digest, Result, StrataError};

use crate::fs::copy_entry;
use crate::hash::canonical_digest;
use crate::image::Instruction;

/// Resolve a COPY source pattern against the build context.
///
/// Wildcards follow shell glob rules. Matches are sorted and must stay
/// inside the context; zero matches is a validation error.
pub fn resolve_sources(context_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let relative = pattern.trim_start_matches('/');
    let escaped_root = glob::Pattern::escape(&context_dir.display().to_string());
    let full_pattern = if relative.is_empty() || relative == "." {
        escaped_root
    } else {
        format!("{}/{}", escaped_root, relative)
    };

    let entries = glob::glob(&full_pattern).map_err(|e| {
        StrataError::ValidationError(format!("Invalid COPY source pattern '{}': {}", pattern, e))
    })?;

    let root = normalize(context_dir);
    let mut matches = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| {
            StrataError::ValidationError(format!("Failed to resolve '{}': {}", pattern, e))
        })?;
        if !normalize(&path).starts_with(&root) {
            return Err(StrataError::ValidationError(format!(
                "COPY source '{}' escapes the build context",
                pattern
            )));
        }
        matches.push(path);
    }

    if matches.is_empty() {
        return Err(StrataError::ValidationError(format!(
            "COPY source '{}' not found in {}",
            pattern,
            context_dir.display()
        )));
    }
    matches.sort();
    Ok(matches)
}

/// Canonical digest of whatever a COPY source pattern selects.
///
/// A single match is hashed in place. Several matches are staged by base
/// name into one temporary directory under `tmp_root` and hashed together,
/// so the digest does not depend on match order.
pub fn source_digest(context_dir: &Path, pattern: &str, tmp_root: &Path) -> Result<Digest> {
    let matches = resolve_sources(context_dir, pattern)?;
    if let [single] = matches.as_slice() {
        return Ok(canonical_digest(single)?.digest);
    }

    std::fs::create_dir_all(tmp_root)?;
    let staging = tempfile::Builder::new()
        .prefix("copy-src-")
        .tempdir_in(tmp_root)
        .map_err(|e| {
            StrataError::Other(format!("Failed to create staging directory: {}", e))
        })?;

    for src in &matches {
        let name = src.file_name().ok_or_else(|| {
            StrataError::ValidationError(format!("Cannot stage {}", src.display()))
        })?;
        let dst = staging.path().join(name);
        copy_entry(src, &dst)?;
    }

    let digest = canonical_digest(staging.path())?.digest;
    if let Err(e) = staging.close() {
        tracing::warn!(error = %e, "Failed to remove staging directory");
    }
    Ok(digest)
}

/// Environment a RUN or CMD directive executes in.
#[derive(Debug, Clone, Copy)]
pub struct ShellScope<'a> {
    pub env: &'a BTreeMap<String, String>,
    pub workdir: Option<&'a str>,
}

impl ShellScope<'_> {
    fn is_default(&self) -> bool {
        self.env.is_empty() && self.workdir.map_or(true, str::is_empty)
    }
}

/// Digest of a directive's build inputs.
///
/// COPY hashes its selected sources. RUN and CMD hash their command
/// together with the accumulated ENV and WORKDIR; with neither set the
/// digest is that of the bare command.
pub fn input_digest(
    instruction: &Instruction,
    value: &str,
    scope: ShellScope<'_>,
    context_dir: &Path,
    tmp_root: &Path,
) -> Result<Digest> {
    match instruction {
        Instruction::Copy { src, .. } => source_digest(context_dir, src, tmp_root),
        Instruction::Run { .. } | Instruction::Cmd { .. } if !scope.is_default() => {
            let bytes = serde_json::to_vec(&(value, scope.env, scope.workdir.unwrap_or("")))?;
            Ok(Digest::from_bytes(&bytes))
        }
        _ => Ok(Digest::from_bytes(value.as_bytes())),
    }
}

/// Lexically normalize a path, resolving `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}
