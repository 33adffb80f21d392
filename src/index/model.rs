//! Serializable representation of a repository's `index.json`.
//!
//! The types mirror the on-disk document field for field. Sequences keep the
//! order they were written in; the generator is responsible for making that
//! order deterministic, and the validator for the uniqueness of natural keys.

use crate::index::identity::{AuthorId, ExtensionId, ExtensionType, ItemId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Root aggregate of the repository index.
pub struct RepoIndex {
    pub libraries: Vec<RepoLibrary>,
    pub extensions: Vec<RepoExtension>,
    pub styles: Vec<RepoStyle>,
    pub scripts: Vec<RepoScript>,
    pub authors: Vec<RepoAuthor>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// One extension script under `src/<lang>/<fileName>.<ext>`.
pub struct RepoExtension {
    pub id: ExtensionId,
    pub name: String,
    pub file_name: String,
    #[serde(rename = "imageURL")]
    pub image_url: String,
    pub lang: String,
    pub version: String,
    pub lib_version: String,
    pub content_hash: String,
    #[serde(rename = "type", default)]
    pub kind: ExtensionType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Shared helper script under `lib/<name>.<ext>`.
pub struct RepoLibrary {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub url: Option<String>,
    pub content_hash: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Reader stylesheet under `styles/<fileName>.css`.
pub struct RepoStyle {
    pub id: ItemId,
    pub name: String,
    pub file_name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub change_log: Option<String>,
    #[serde(default)]
    pub authors: Vec<AuthorId>,
    #[serde(default)]
    pub has_javascript: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Reader script under `scripts/<fileName>.js`.
pub struct RepoScript {
    pub id: ItemId,
    pub name: String,
    pub file_name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub change_log: Option<String>,
    #[serde(default)]
    pub authors: Vec<AuthorId>,
    #[serde(default)]
    pub supported: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// Contributor summary aggregated during generation.
pub struct RepoAuthor {
    pub id: AuthorId,
    pub name: String,
    pub description: String,
}

impl RepoIndex {
    /// Find the indexed extension backed by a script's file stem.
    pub fn extension_by_file_name(&self, file_name: &str) -> Option<&RepoExtension> {
        self.extensions.iter().find(|ext| ext.file_name == file_name)
    }
}
