//! Repository index wiring.
//!
//! This module wraps the `index.json` document at a repository root: the
//! serde model, identity newtypes, strict load/atomic write, and a structural
//! diff used when comparing a regenerated index with a published one.

pub mod diff;
pub mod identity;
pub mod model;
pub mod store;

pub use diff::diff_indexes;
pub use identity::{AuthorId, ExtensionId, ExtensionType, ItemId};
pub use model::{RepoAuthor, RepoExtension, RepoIndex, RepoLibrary, RepoScript, RepoStyle};
pub use store::{INDEX_FILE_NAME, load_index, render_index, write_index};
