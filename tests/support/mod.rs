#![allow(dead_code)]

use anyhow::{Result, bail};
use extension_tester::script_metadata::ScriptMetadata;
use extension_tester::{
    Chapter, Extension, ExtensionLoader, Filter, Listing, ListingItem, Novel, NovelInfo, ParamMap,
    ResourceProbe,
};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

/// Scratch repository with `lib/` and `src/` trees.
pub struct RepoFixture {
    pub dir: TempDir,
}

impl RepoFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp repo");
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().canonicalize().unwrap()
    }

    pub fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.root().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    pub fn library(&self, name: &str, version: &str, author: &str) -> PathBuf {
        self.write(
            &format!("lib/{name}.lua"),
            &format!("-- {{\"ver\":\"{version}\",\"author\":\"{author}\"}}\nreturn {{}}\n"),
        )
    }

    pub fn extension(&self, relative: &str, id: i32, author: &str) -> PathBuf {
        self.write(
            relative,
            &format!(
                "-- {{\"id\":{id},\"ver\":\"1.0.0\",\"libVer\":\"1.0.0\",\"author\":\"{author}\"}}\nreturn {{}}\n"
            ),
        )
    }
}

pub fn novel_info(title: &str, link: &str) -> NovelInfo {
    NovelInfo {
        title: title.to_string(),
        link: link.to_string(),
        image_url: format!("https://img.test{link}.png"),
    }
}

pub fn chapter(link: &str) -> Chapter {
    Chapter {
        title: "Chapter".to_string(),
        link: link.to_string(),
        release: String::new(),
        order: 1.0,
    }
}

/// Scripted extension. Every call is appended to the shared `calls` log.
#[derive(Clone)]
pub struct FakeExtension {
    pub id: i32,
    pub name: String,
    pub image_url: String,
    pub has_search: bool,
    pub search_incrementing: bool,
    pub has_cloudflare: bool,
    pub listings: Listing,
    pub novels: Vec<NovelInfo>,
    pub chapters: BTreeMap<String, Vec<Chapter>>,
    pub search_filters: Vec<Filter>,
    pub metadata: ScriptMetadata,
    pub calls: Rc<RefCell<Vec<String>>>,
    pub params: Rc<RefCell<Vec<ParamMap>>>,
}

impl FakeExtension {
    pub fn new(id: i32, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            image_url: "https://img.test/icon.png".to_string(),
            has_search: false,
            search_incrementing: false,
            has_cloudflare: false,
            listings: Listing::List(Vec::new()),
            novels: Vec::new(),
            chapters: BTreeMap::new(),
            search_filters: Vec::new(),
            metadata: ScriptMetadata {
                id: Some(id),
                version: "1.0.0".to_string(),
                lib_version: Some("1.0.0".to_string()),
                author: String::new(),
                dependencies: Vec::new(),
            },
            calls: Rc::default(),
            params: Rc::default(),
        }
    }

    pub fn with_listing(mut self, name: &str, is_incrementing: bool) -> Self {
        self.listings = Listing::List(vec![Listing::Item(ListingItem {
            name: name.to_string(),
            link: None,
            is_incrementing,
            handle: 0,
        })]);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

impl Extension for FakeExtension {
    fn id(&self) -> i32 {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn base_url(&self) -> &str {
        "https://fake.test"
    }
    fn image_url(&self) -> &str {
        &self.image_url
    }
    fn has_search(&self) -> bool {
        self.has_search
    }
    fn is_search_incrementing(&self) -> bool {
        self.search_incrementing
    }
    fn has_cloudflare(&self) -> bool {
        self.has_cloudflare
    }
    fn start_index(&self) -> i32 {
        1
    }
    fn settings_model(&self) -> Vec<Filter> {
        Vec::new()
    }
    fn search_filters(&self) -> Vec<Filter> {
        self.search_filters.clone()
    }
    fn listings(&self) -> Listing {
        self.listings.clone()
    }
    fn get_listing(&self, item: &ListingItem, params: &ParamMap) -> Result<Vec<NovelInfo>> {
        let page = params
            .get(&extension_tester::extension::PAGE_INDEX)
            .map(ToString::to_string)
            .unwrap_or_default();
        self.record(format!("listing {} page={page}", item.name));
        self.params.borrow_mut().push(params.clone());
        Ok(self.novels.clone())
    }
    fn parse_novel(&self, url: &str, load_chapters: bool) -> Result<Novel> {
        self.record(format!("novel {url}"));
        Ok(Novel {
            title: url.to_string(),
            chapters: if load_chapters {
                self.chapters.get(url).cloned().unwrap_or_default()
            } else {
                Vec::new()
            },
            ..Novel::default()
        })
    }
    fn get_passage(&self, chapter_url: &str) -> Result<Vec<u8>> {
        self.record(format!("passage {chapter_url}"));
        Ok(format!("text of {chapter_url}").into_bytes())
    }
    fn search(&self, params: &ParamMap) -> Result<Vec<NovelInfo>> {
        self.record("search".to_string());
        self.params.borrow_mut().push(params.clone());
        Ok(self.novels.clone())
    }
    fn metadata(&self) -> &ScriptMetadata {
        &self.metadata
    }
}

/// Hands out clones of registered fakes keyed by file stem. Unregistered
/// scripts become a bare fake built from their header; stems starting with
/// `broken` fail to load.
#[derive(Default)]
pub struct FakeLoader {
    pub extensions: BTreeMap<String, FakeExtension>,
}

impl FakeLoader {
    pub fn with(mut self, stem: &str, extension: FakeExtension) -> Self {
        self.extensions.insert(stem.to_string(), extension);
        self
    }
}

impl ExtensionLoader for FakeLoader {
    fn load_library(&self, path: &Path) -> Result<ScriptMetadata> {
        ScriptMetadata::from_script(path)
    }

    fn load_extension(&self, path: &Path) -> Result<Box<dyn Extension>> {
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        if stem.starts_with("broken") {
            bail!("syntax error in {stem}");
        }
        if let Some(extension) = self.extensions.get(&stem) {
            return Ok(Box::new(extension.clone()));
        }
        let metadata = ScriptMetadata::from_script(path)?;
        let mut extension = FakeExtension::new(metadata.id.unwrap_or_default(), &stem);
        extension.metadata = metadata;
        Ok(Box::new(extension))
    }
}

/// Answers image probes from a table, 200 for anything unlisted.
#[derive(Default)]
pub struct FakeProbe {
    pub statuses: BTreeMap<String, u16>,
    pub requested: RefCell<Vec<String>>,
}

impl ResourceProbe for FakeProbe {
    fn status(&self, url: &str) -> Result<u16> {
        self.requested.borrow_mut().push(url.to_string());
        Ok(self.statuses.get(url).copied().unwrap_or(200))
    }
}
