//! Consistency checks between an index and the repository tree.
//!
//! Entities are checked one at a time and validation stops at the first
//! violation. Each extension is checked for a unique id and then for its file
//! before the next one is looked at; libraries, styles and scripts follow in
//! that order with the same pair of checks. Content hashes are only recomputed
//! when explicitly requested.

use crate::hashing::hash_file;
use crate::index::{ExtensionId, ItemId, RepoExtension, RepoIndex, RepoLibrary};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Extension `{name}` has the same id as `{other}`: {id}")]
    DuplicateExtensionId {
        name: String,
        other: String,
        id: ExtensionId,
    },
    #[error("Extension `{name}`({id}) is not in expected path: {}", path.display())]
    MissingExtensionFile {
        name: String,
        id: ExtensionId,
        path: PathBuf,
    },
    #[error("Extension `{name}`({id}) has unsupported type `{kind}`")]
    UnsupportedExtensionType {
        name: String,
        id: ExtensionId,
        kind: String,
    },
    #[error("Library `{name}` is listed more than once")]
    DuplicateLibraryName { name: String },
    #[error("Library `{name}` is not in expected path: {}", path.display())]
    MissingLibraryFile { name: String, path: PathBuf },
    #[error("Style `{name}` has the same id as `{other}`: {id}")]
    DuplicateStyleId {
        name: String,
        other: String,
        id: ItemId,
    },
    #[error("Style `{name}`({id}) is not in expected path: {}", path.display())]
    MissingStyleFile {
        name: String,
        id: ItemId,
        path: PathBuf,
    },
    #[error("Script `{name}` has the same id as `{other}`: {id}")]
    DuplicateScriptId {
        name: String,
        other: String,
        id: ItemId,
    },
    #[error("Script `{name}`({id}) is not in expected path: {}", path.display())]
    MissingScriptFile {
        name: String,
        id: ItemId,
        path: PathBuf,
    },
    #[error("{entity} `{name}` content hash {expected} does not match its file ({actual})")]
    HashMismatch {
        entity: &'static str,
        name: String,
        expected: String,
        actual: String,
    },
    #[error("unable to hash {}: {message}", path.display())]
    Unreadable { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateOptions {
    /// Recompute content hashes after the layout checks.
    pub verify_hashes: bool,
}

/// `<root>/src/<lang>/<fileName>.<ext>`; `None` for types without a known
/// file extension.
pub fn extension_path(root: &Path, ext: &RepoExtension) -> Option<PathBuf> {
    let suffix = ext.kind.file_extension()?;
    Some(
        root.join("src")
            .join(&ext.lang)
            .join(format!("{}.{suffix}", ext.file_name)),
    )
}

pub fn library_path(root: &Path, lib: &RepoLibrary) -> PathBuf {
    root.join("lib").join(format!("{}.lua", lib.name))
}

pub fn style_path(root: &Path, file_name: &str) -> PathBuf {
    root.join("styles").join(format!("{file_name}.css"))
}

pub fn script_path(root: &Path, file_name: &str) -> PathBuf {
    root.join("scripts").join(format!("{file_name}.js"))
}

/// Validate `index` against the tree rooted at `repo_root`.
pub fn validate_index(
    index: &RepoIndex,
    repo_root: &Path,
    options: ValidateOptions,
) -> Result<(), ValidationError> {
    for (i, ext) in index.extensions.iter().enumerate() {
        if let Some(other) = duplicate_of(&index.extensions, i, |e| e.id) {
            return Err(ValidationError::DuplicateExtensionId {
                name: ext.name.clone(),
                other: other.name.clone(),
                id: ext.id,
            });
        }
        let Some(path) = extension_path(repo_root, ext) else {
            return Err(ValidationError::UnsupportedExtensionType {
                name: ext.name.clone(),
                id: ext.id,
                kind: ext.kind.as_str().to_string(),
            });
        };
        if !path.is_file() {
            return Err(ValidationError::MissingExtensionFile {
                name: ext.name.clone(),
                id: ext.id,
                path,
            });
        }
    }

    for (i, lib) in index.libraries.iter().enumerate() {
        if duplicate_of(&index.libraries, i, |l| l.name.clone()).is_some() {
            return Err(ValidationError::DuplicateLibraryName {
                name: lib.name.clone(),
            });
        }
        let path = library_path(repo_root, lib);
        if !path.is_file() {
            return Err(ValidationError::MissingLibraryFile {
                name: lib.name.clone(),
                path,
            });
        }
    }

    for (i, style) in index.styles.iter().enumerate() {
        if let Some(other) = duplicate_of(&index.styles, i, |s| s.id) {
            return Err(ValidationError::DuplicateStyleId {
                name: style.name.clone(),
                other: other.name.clone(),
                id: style.id,
            });
        }
        let path = style_path(repo_root, &style.file_name);
        if !path.is_file() {
            return Err(ValidationError::MissingStyleFile {
                name: style.name.clone(),
                id: style.id,
                path,
            });
        }
    }

    for (i, script) in index.scripts.iter().enumerate() {
        if let Some(other) = duplicate_of(&index.scripts, i, |s| s.id) {
            return Err(ValidationError::DuplicateScriptId {
                name: script.name.clone(),
                other: other.name.clone(),
                id: script.id,
            });
        }
        let path = script_path(repo_root, &script.file_name);
        if !path.is_file() {
            return Err(ValidationError::MissingScriptFile {
                name: script.name.clone(),
                id: script.id,
                path,
            });
        }
    }

    if options.verify_hashes {
        verify_hashes(index, repo_root)?;
    }

    info!("Index is valid");
    Ok(())
}

fn verify_hashes(index: &RepoIndex, repo_root: &Path) -> Result<(), ValidationError> {
    for ext in &index.extensions {
        if let Some(path) = extension_path(repo_root, ext) {
            check_hash("Extension", &ext.name, &ext.content_hash, &path)?;
        }
    }
    for lib in &index.libraries {
        check_hash("Library", &lib.name, &lib.content_hash, &library_path(repo_root, lib))?;
    }
    Ok(())
}

fn check_hash(
    entity: &'static str,
    name: &str,
    expected: &str,
    path: &Path,
) -> Result<(), ValidationError> {
    let actual = hash_file(path).map_err(|err| ValidationError::Unreadable {
        path: path.to_path_buf(),
        message: format!("{err:#}"),
    })?;
    if actual != expected {
        return Err(ValidationError::HashMismatch {
            entity,
            name: name.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Another entry sharing its key with `items[index]`.
fn duplicate_of<T, K: PartialEq>(items: &[T], index: usize, key: impl Fn(&T) -> K) -> Option<&T> {
    let wanted = key(&items[index]);
    items
        .iter()
        .enumerate()
        .find(|(j, other)| *j != index && key(*other) == wanted)
        .map(|(_, other)| other)
}
