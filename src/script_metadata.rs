//! Metadata headers of repository scripts.
//!
//! Every library and extension starts with a single comment line carrying a
//! JSON object, e.g. `-- {"id":1,"ver":"1.0.0","libVer":"1.0.0","author":"A, B"}`.
//! The header is read without executing the script so generation never runs
//! site code. Libraries omit `id` and `libVer`.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const HEADER_PREFIX: &str = "--";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Parsed first-line header of a script.
pub struct ScriptMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i32>,
    #[serde(rename = "ver")]
    pub version: String,
    #[serde(rename = "libVer", default, skip_serializing_if = "Option::is_none")]
    pub lib_version: Option<String>,
    #[serde(default)]
    pub author: String,
    #[serde(rename = "dep", default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl ScriptMetadata {
    /// Read the header from a script on disk.
    pub fn from_script(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_source(&contents).with_context(|| format!("metadata header of {}", path.display()))
    }

    /// Parse the header from script text.
    pub fn from_source(source: &str) -> Result<Self> {
        let first = source.lines().next().unwrap_or("").trim_start_matches('\u{feff}');
        let Some(body) = first.trim().strip_prefix(HEADER_PREFIX) else {
            bail!("first line is not a `-- {{...}}` metadata comment");
        };
        let body = body.trim();
        if !body.starts_with('{') {
            bail!("first line is not a `-- {{...}}` metadata comment");
        }
        let metadata: ScriptMetadata =
            serde_json::from_str(body).context("parsing metadata JSON")?;
        Ok(metadata)
    }

    /// Individual author names from the raw `author` string.
    ///
    /// Names are separated by `", "` exactly; an empty string yields one empty
    /// name so unattributed works are still grouped together.
    pub fn authors(&self) -> impl Iterator<Item = &str> {
        self.author.split(", ")
    }
}

/// Collect every regular file under `root`, recursing into subdirectories.
///
/// A missing root yields an empty list. Results are sorted so callers see a
/// stable order regardless of directory iteration order.
pub fn collect_script_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_from_dir(root, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_from_dir(root: &Path, acc: &mut Vec<PathBuf>) -> Result<()> {
    if !root.is_dir() {
        return Ok(());
    }
    let entries = fs::read_dir(root).with_context(|| format!("listing {}", root.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_from_dir(&path, acc)?;
        } else {
            acc.push(path);
        }
    }
    Ok(())
}
