//! Object lists on disk: operator manifests and store snapshots.
//!
//! Both use JSON Lines with one declared object per line; blank lines and
//! `#` comments are skipped. A list names each `(kind, namespace/name)` at
//! most once. State files are only ever replaced whole, through
//! `write_atomically`.

use iamsync_kernel::{Kind, ObjectKey, Resource};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("{path}: {message}")]
    Io { path: String, message: String },

    #[error("{path}: not a text file ({reason})")]
    Binary { path: String, reason: &'static str },

    #[error("line {line}: not a JSON object: {message}")]
    Syntax { line: usize, message: String },

    /// The line is JSON but does not describe a valid object.
    #[error("line {line}: {subject}: {message}")]
    Shape {
        line: usize,
        subject: String,
        message: String,
    },

    #[error("line {line}: {kind} {key} is already declared on line {first}")]
    Duplicate {
        line: usize,
        first: usize,
        kind: Kind,
        key: ObjectKey,
    },

    #[error("cannot encode {kind} {key}: {message}")]
    Encode {
        kind: Kind,
        key: ObjectKey,
        message: String,
    },
}

/// Parse an object list, rejecting repeated identities.
pub fn read_resources(reader: impl BufRead) -> Result<Vec<Resource>, SnapshotError> {
    let mut seen: BTreeMap<(Kind, ObjectKey), usize> = BTreeMap::new();
    let mut resources = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.map_err(|e| SnapshotError::Io {
            path: format!("line {line_no}"),
            message: e.to_string(),
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let resource = parse_line(line_no, trimmed)?;
        let identity = (resource.kind(), resource.key());
        if let Some(&first) = seen.get(&identity) {
            let (kind, key) = identity;
            return Err(SnapshotError::Duplicate {
                line: line_no,
                first,
                kind,
                key,
            });
        }
        seen.insert(identity, line_no);
        resources.push(resource);
    }
    Ok(resources)
}

/// Two-step decode so shape errors can name the object they belong to.
fn parse_line(line: usize, raw: &str) -> Result<Resource, SnapshotError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| SnapshotError::Syntax {
        line,
        message: e.to_string(),
    })?;
    let subject = describe(&value);
    serde_json::from_value(value).map_err(|e| SnapshotError::Shape {
        line,
        subject,
        message: e.to_string(),
    })
}

/// Best-effort `Kind namespace/name` label for an undecoded object.
fn describe(value: &Value) -> String {
    let kind = value
        .pointer("/spec/kind")
        .and_then(Value::as_str)
        .unwrap_or("object");
    let name = value.pointer("/metadata/name").and_then(Value::as_str);
    let namespace = value
        .pointer("/metadata/namespace")
        .and_then(Value::as_str)
        .unwrap_or(iamsync_kernel::DEFAULT_NAMESPACE);
    match name {
        Some(name) => format!("{kind} {namespace}/{name}"),
        None => format!("{kind} without metadata.name"),
    }
}

pub fn read_resources_from_path(path: impl AsRef<Path>) -> Result<Vec<Resource>, SnapshotError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| io_error(path, e))?;
    let text = text_content(path, &bytes)?;
    read_resources(text.as_bytes())
}

fn text_content<'a>(path: &Path, bytes: &'a [u8]) -> Result<&'a str, SnapshotError> {
    let binary = |reason| SnapshotError::Binary {
        path: path.display().to_string(),
        reason,
    };
    if bytes.contains(&0) {
        return Err(binary("contains NUL bytes"));
    }
    std::str::from_utf8(bytes).map_err(|_| binary("invalid UTF-8"))
}

/// Encode objects one per line, in the order given.
pub fn encode_resources(resources: &[Resource]) -> Result<Vec<u8>, SnapshotError> {
    let mut out = Vec::new();
    for resource in resources {
        let line = serde_json::to_string(resource).map_err(|e| SnapshotError::Encode {
            kind: resource.kind(),
            key: resource.key(),
            message: e.to_string(),
        })?;
        out.extend_from_slice(line.as_bytes());
        out.push(b'\n');
    }
    Ok(out)
}

pub fn write_resources_to_path(
    path: impl AsRef<Path>,
    resources: &[Resource],
) -> Result<(), SnapshotError> {
    write_atomically(path.as_ref(), &encode_resources(resources)?)
}

/// Replace `path` with `contents`: readers see the old file or the new
/// one, never a partial write.
pub fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    let staging = staging_path(path);
    let staged = File::create(&staging)
        .and_then(|mut file| {
            file.write_all(contents)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&staging, path));
    staged.map_err(|e| {
        let _ = fs::remove_file(&staging);
        io_error(path, e)
    })
}

/// Sibling of `path`, so the final rename stays on one filesystem.
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.staging", std::process::id()))
}

fn io_error(path: &Path, err: std::io::Error) -> SnapshotError {
    SnapshotError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}
