//! Shared library for the extension tester.
//!
//! The crate models a novel-source extension repository (`index.json`, the
//! `lib/` and `src/` script trees), generates and validates its index, and
//! drives extensions through the conformance protocol. The binaries are thin
//! wrappers: `extension-tester` parses the command line and hands a
//! [`Config`] to [`pipeline::run`]; `index-diff` compares two index files.

pub mod config;
pub mod extension;
pub mod filters;
pub mod generator;
pub mod hashing;
pub mod http;
pub mod index;
pub mod lua;
pub mod pipeline;
pub mod runner;
mod schema_loader;
pub mod script_metadata;
pub mod timing;
pub mod validator;
pub mod watcher;

pub use config::{Cli, Config, ConfigError};
pub use extension::{
    Chapter, Extension, ExtensionLoader, ExtensionSource, Listing, ListingItem, Novel, NovelInfo,
};
pub use filters::{Filter, FilterError, FilterKind, ParamMap, ParamValue};
pub use generator::generate_index;
pub use http::{HttpOptions, HttpSession, ResourceProbe};
pub use index::{RepoIndex, diff_indexes, load_index, write_index};
pub use lua::LuaLoader;
pub use pipeline::{RunReport, run_iteration};
pub use runner::{ConformanceError, ConformanceRunner, RunOptions, TestOutcome};
pub use script_metadata::ScriptMetadata;
pub use validator::{ValidateOptions, ValidationError, validate_index};
pub use watcher::ChangeWatcher;
