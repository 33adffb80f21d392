//! Builds a repository index from the scripts on disk.
//!
//! Libraries come from the files directly inside `lib/`, extensions from
//! `src/<lang>/<fileName>.lua`. Every script is loaded through an
//! [`ExtensionLoader`] to read its metadata; any failure aborts generation so
//! a partial index is never produced. Output order is fully determined by the
//! inputs, which makes regeneration byte-for-byte idempotent.

use crate::extension::ExtensionLoader;
use crate::hashing::hash_file;
use crate::index::{
    AuthorId, ExtensionId, ExtensionType, RepoAuthor, RepoExtension, RepoIndex, RepoLibrary,
};
use crate::script_metadata::{ScriptMetadata, collect_script_files};
use anyhow::{Context, Result, anyhow};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Generate an index from `library_dir` and `script_dir`.
pub fn generate_index(
    loader: &dyn ExtensionLoader,
    library_dir: &Path,
    script_dir: &Path,
) -> Result<RepoIndex> {
    info!("Generating index");
    let mut authors = AuthorBook::default();

    let mut libraries = Vec::new();
    for path in library_files(library_dir)? {
        let Some(name) = script_stem(&path) else {
            continue;
        };
        let metadata = loader
            .load_library(&path)
            .with_context(|| format!("loading library {}", path.display()))?;
        authors.add(&metadata, &name);
        libraries.push(RepoLibrary {
            name,
            version: metadata.version,
            url: None,
            content_hash: hash_file(&path)?,
        });
    }
    libraries.sort_by(|a, b| a.name.cmp(&b.name));

    let mut extensions = Vec::new();
    for path in collect_script_files(script_dir)? {
        if script_stem(&path).is_none() {
            continue;
        }
        let Some(lang) = lang_of(script_dir, &path) else {
            warn!(path = %path.display(), "Skipping file at unexpected location");
            continue;
        };
        let extension = loader
            .load_extension(&path)
            .with_context(|| format!("loading extension {}", path.display()))?;
        let metadata = extension.metadata();
        let lib_version = metadata
            .lib_version
            .clone()
            .ok_or_else(|| anyhow!("{} has no `libVer` in its metadata header", path.display()))?;
        authors.add(metadata, extension.name());
        extensions.push(RepoExtension {
            id: ExtensionId(metadata.id.unwrap_or(extension.id())),
            name: extension.name().to_string(),
            file_name: file_stem(&path),
            image_url: extension.image_url().to_string(),
            lang,
            version: metadata.version.clone(),
            lib_version,
            content_hash: hash_file(&path)?,
            kind: ExtensionType::LuaScript,
        });
    }
    extensions.sort_by_key(|ext| ext.id);

    Ok(RepoIndex {
        libraries,
        extensions,
        styles: Vec::new(),
        scripts: Vec::new(),
        authors: authors.into_authors(),
    })
}

/// Regular files directly inside `dir`, sorted. A missing directory is empty.
fn library_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        warn!(path = %dir.display(), "Library directory does not exist");
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    let entries = fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        } else {
            warn!(path = %path.display(), "Skipping non-lua file");
        }
    }
    files.sort();
    Ok(files)
}

/// Stem of a `.lua` file; anything else is skipped with a warning.
fn script_stem(path: &Path) -> Option<String> {
    let is_lua = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(ExtensionType::from_file_extension)
        == Some(ExtensionType::LuaScript);
    if !is_lua {
        warn!(path = %path.display(), "Skipping non-lua file");
        return None;
    }
    Some(file_stem(path))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Language directory of `path` when it sits exactly at `<root>/<lang>/<file>`.
fn lang_of(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative.components().collect();
    match parts.as_slice() {
        [lang, _file] => Some(lang.as_os_str().to_string_lossy().into_owned()),
        _ => None,
    }
}

/// Contributions per author name.
#[derive(Default)]
struct AuthorBook {
    works: BTreeMap<String, BTreeSet<String>>,
}

impl AuthorBook {
    fn add(&mut self, metadata: &ScriptMetadata, work: &str) {
        for name in metadata.authors() {
            self.works
                .entry(name.to_string())
                .or_default()
                .insert(work.to_string());
        }
    }

    /// Most prolific first, ties alphabetical.
    fn into_authors(self) -> Vec<RepoAuthor> {
        let mut entries: Vec<(String, BTreeSet<String>)> = self.works.into_iter().collect();
        entries.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
        entries
            .into_iter()
            .map(|(name, works)| RepoAuthor {
                id: AuthorId::from_name(&name),
                description: format!(
                    "Worked on {}",
                    works.into_iter().collect::<Vec<_>>().join(", ")
                ),
                name,
            })
            .collect()
    }
}
