//! Contract between the conformance runner and a loaded extension.
//!
//! The runner and generator only see these traits; the Lua host in
//! [`crate::lua`] is one implementation, test fakes are another.

use crate::filters::{Filter, ParamMap};
use crate::index::ExtensionType;
use crate::script_metadata::ScriptMetadata;
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Parameter slot holding the search query.
pub const QUERY_INDEX: i32 = 0;
/// Parameter slot holding the page number.
pub const PAGE_INDEX: i32 = 1;
/// Parameter slot holding the listing link.
pub const LISTING_INDEX: i32 = 2;

#[derive(Clone, Debug, Default, PartialEq)]
/// Entry of a listing or search result page.
pub struct NovelInfo {
    pub title: String,
    pub link: String,
    pub image_url: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Chapter {
    pub title: String,
    pub link: String,
    pub release: String,
    pub order: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
/// Result of parsing a novel page.
pub struct Novel {
    pub title: String,
    pub image_url: String,
    pub description: String,
    pub authors: Vec<String>,
    pub genres: Vec<String>,
    pub chapters: Vec<Chapter>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// A named listing the extension can page through.
pub struct ListingItem {
    pub name: String,
    pub link: Option<String>,
    pub is_incrementing: bool,
    /// Extension-assigned slot used to route [`Extension::get_listing`].
    pub handle: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// Listings form a tree; only items are fetched.
pub enum Listing {
    Item(ListingItem),
    List(Vec<Listing>),
}

impl Listing {
    /// Items of the tree, depth-first in declaration order.
    pub fn items(&self) -> Vec<&ListingItem> {
        let mut out = Vec::new();
        self.collect_items(&mut out);
        out
    }

    fn collect_items<'a>(&'a self, out: &mut Vec<&'a ListingItem>) {
        match self {
            Listing::Item(item) => out.push(item),
            Listing::List(children) => {
                for child in children {
                    child.collect_items(out);
                }
            }
        }
    }
}

/// A loaded extension.
pub trait Extension {
    fn id(&self) -> i32;
    fn name(&self) -> &str;
    fn base_url(&self) -> &str;
    fn image_url(&self) -> &str;
    fn has_search(&self) -> bool;
    fn is_search_incrementing(&self) -> bool;
    fn has_cloudflare(&self) -> bool;
    fn start_index(&self) -> i32;
    fn settings_model(&self) -> Vec<Filter>;
    fn search_filters(&self) -> Vec<Filter>;
    fn listings(&self) -> Listing;
    fn get_listing(&self, item: &ListingItem, params: &ParamMap) -> Result<Vec<NovelInfo>>;
    /// `load_chapters` asks the extension to fill `chapters`.
    fn parse_novel(&self, url: &str, load_chapters: bool) -> Result<Novel>;
    fn get_passage(&self, chapter_url: &str) -> Result<Vec<u8>>;
    fn search(&self, params: &ParamMap) -> Result<Vec<NovelInfo>>;
    fn metadata(&self) -> &ScriptMetadata;
}

/// Turns script files into metadata or live extensions.
pub trait ExtensionLoader {
    /// Read a library's metadata and check that the script compiles.
    fn load_library(&self, path: &Path) -> Result<ScriptMetadata>;
    fn load_extension(&self, path: &Path) -> Result<Box<dyn Extension>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// An extension script selected for testing.
pub struct ExtensionSource {
    pub path: PathBuf,
    pub kind: ExtensionType,
}

impl ExtensionSource {
    /// Script file stem, matched against `fileName` in the index.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_stem().and_then(|stem| stem.to_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, handle: usize) -> Listing {
        Listing::Item(ListingItem {
            name: name.to_string(),
            link: None,
            is_incrementing: false,
            handle,
        })
    }

    #[test]
    fn nested_listings_flatten_depth_first() {
        let tree = Listing::List(vec![
            item("Latest", 0),
            Listing::List(vec![item("Popular", 1), item("Completed", 2)]),
            item("New", 3),
        ]);
        let names: Vec<&str> = tree.items().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Latest", "Popular", "Completed", "New"]);
    }

    #[test]
    fn source_file_name_is_the_stem() {
        let source = ExtensionSource {
            path: PathBuf::from("/repo/src/en/example.lua"),
            kind: ExtensionType::LuaScript,
        };
        assert_eq!(source.file_name(), Some("example"));
    }
}
