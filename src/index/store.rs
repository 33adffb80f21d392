//! Reading and writing `index.json`.
//!
//! Loading is strict: the document must satisfy the embedded schema before it
//! is deserialized. Writing is atomic so a failed generation never leaves a
//! truncated index behind.

use crate::index::model::RepoIndex;
use crate::schema_loader::IndexSchema;
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// File name of the index at the repository root.
pub const INDEX_FILE_NAME: &str = "index.json";

/// Read, schema-check and parse an index file.
pub fn load_index(path: &Path) -> Result<RepoIndex> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    IndexSchema::load()?.check(path, &value)?;
    let index: RepoIndex =
        serde_json::from_value(value).with_context(|| format!("decoding {}", path.display()))?;
    Ok(index)
}

/// Render the index exactly as it is written to disk.
///
/// Two-space indentation and a trailing newline; field order comes from the
/// model structs, so equal indexes always render to identical bytes.
pub fn render_index(index: &RepoIndex) -> Result<String> {
    let mut text = serde_json::to_string_pretty(index).context("serializing repository index")?;
    text.push('\n');
    Ok(text)
}

/// Replace the index file with `index`.
pub fn write_index(path: &Path, index: &RepoIndex) -> Result<()> {
    let rendered = render_index(index)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(dir)
        .with_context(|| format!("staging index next to {}", path.display()))?;
    staged
        .write_all(rendered.as_bytes())
        .with_context(|| format!("writing staged index for {}", path.display()))?;
    staged
        .persist(path)
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}
