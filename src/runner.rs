//! Conformance protocol for a single extension.
//!
//! The runner loads an extension, optionally cross-checks its metadata with
//! the index, then walks every listing, fetching a novel and one chapter per
//! listing, and finally exercises search with the configured filter
//! overrides. Unreachable images are warnings; everything else that goes
//! wrong is a [`ConformanceError`] for this extension only.

use crate::extension::{
    Extension, ExtensionLoader, ExtensionSource, LISTING_INDEX, ListingItem, Novel, NovelInfo,
    PAGE_INDEX, QUERY_INDEX,
};
use crate::filters::{FilterError, ParamMap, ParamValue, apply_overrides, log_filter_tree, mapify};
use crate::http::ResourceProbe;
use crate::index::{RepoExtension, RepoIndex};
use crate::timing::timed;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Default)]
pub struct PrintOptions {
    pub listings: bool,
    pub list_stats: bool,
    pub novels: bool,
    pub novel_stats: bool,
    pub passages: bool,
    pub metadata: bool,
}

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub ci: bool,
    pub validate_metadata: bool,
    pub repeat: bool,
    /// Test only this novel URL instead of the full protocol.
    pub target_novel: Option<String>,
    pub target_chapter: usize,
    pub target_query: String,
    pub filter_overrides: BTreeMap<i32, String>,
    pub print: PrintOptions,
    /// Pause after each listing and after search.
    pub pace: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            ci: false,
            validate_metadata: false,
            repeat: false,
            target_novel: None,
            target_chapter: 0,
            target_query: "world".to_string(),
            filter_overrides: BTreeMap::new(),
            print: PrintOptions::default(),
            pace: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataField {
    Id,
    Version,
    LibVersion,
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataField::Id => write!(f, "Extension id does not match metadata"),
            MetadataField::Version => write!(f, "Metadata version does not match index"),
            MetadataField::LibVersion => write!(f, "Metadata lib version does not match index"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConformanceError {
    #[error("failed to load {}: {message}", path.display())]
    Load { path: PathBuf, message: String },
    #[error("Extension file `{file_name}` is not present in the repository index")]
    NotIndexed { file_name: String },
    #[error("cannot run extensions of type `{kind}`")]
    UnsupportedType { kind: String },
    #[error("Chapters still empty after retry, likely an issue.")]
    EmptyChapters,
    #[error("{field} (expected `{expected}`, found `{actual}`)")]
    MetadataMismatch {
        field: MetadataField,
        expected: String,
        actual: String,
    },
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error("chapter {chapter} requested but the novel has {count} chapters")]
    ChapterOutOfRange { chapter: usize, count: usize },
    #[error("{call} failed: {message}")]
    Call { call: &'static str, message: String },
}

/// How a conformance pass ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    /// Only the targeted novel was checked.
    SingleNovel,
    /// Metadata matched in CI mode; nothing else was exercised.
    MetadataVerified,
    /// Anti-bot protection prevents an automated pass in CI.
    ManualTestRequired,
}

pub struct ConformanceRunner<'a> {
    loader: &'a dyn ExtensionLoader,
    probe: &'a dyn ResourceProbe,
    options: &'a RunOptions,
}

fn call_failed(call: &'static str) -> impl FnOnce(anyhow::Error) -> ConformanceError {
    move |err| ConformanceError::Call {
        call,
        message: format!("{err:#}"),
    }
}

impl<'a> ConformanceRunner<'a> {
    pub fn new(
        loader: &'a dyn ExtensionLoader,
        probe: &'a dyn ResourceProbe,
        options: &'a RunOptions,
    ) -> Self {
        Self {
            loader,
            probe,
            options,
        }
    }

    /// Run the protocol for one extension script.
    pub fn test(
        &self,
        index: &RepoIndex,
        source: &ExtensionSource,
    ) -> Result<TestOutcome, ConformanceError> {
        info!("Testing: {}", source.path.display());
        let file_name = source.file_name().unwrap_or_default();
        let entry = index
            .extension_by_file_name(file_name)
            .ok_or_else(|| ConformanceError::NotIndexed {
                file_name: file_name.to_string(),
            })?;

        if source.kind.file_extension().is_none() {
            return Err(ConformanceError::UnsupportedType {
                kind: source.kind.as_str().to_string(),
            });
        }

        let ext = timed("load extension", || self.loader.load_extension(&source.path)).map_err(
            |err| ConformanceError::Load {
                path: source.path.clone(),
                message: format!("{err:#}"),
            },
        )?;
        let ext = ext.as_ref();

        if let Some(url) = &self.options.target_novel {
            self.show_novel(ext, url)?;
            return Ok(TestOutcome::SingleNovel);
        }

        let settings = ext.settings_model();
        info!("Settings model:");
        log_filter_tree(&settings);
        let search_filters = ext.search_filters();
        info!("SearchFilters Model:");
        log_filter_tree(&search_filters);
        let base_params = mapify(&search_filters);

        info!("ID       : {}", ext.id());
        info!("Name     : {}", ext.name());
        info!("BaseURL  : {}", ext.base_url());
        info!("Image    : {}", ext.image_url());
        info!("Settings : {}", render_params(&mapify(&settings)));
        info!("Filters  : {}", render_params(&base_params));
        if self.options.print.metadata {
            match serde_json::to_string(ext.metadata()) {
                Ok(json) => info!("MetaData : {json}"),
                Err(err) => warn!("MetaData : unable to render: {err}"),
            }
        }

        if self.options.validate_metadata {
            verify_metadata(ext, entry)?;
            info!("Metadata is valid");
            if self.options.ci {
                return Ok(TestOutcome::MetadataVerified);
            }
        }

        if self.options.ci && ext.has_cloudflare() {
            warn!(extension = ext.name(), "Uses Cloudflare protection, test manually");
            return Ok(TestOutcome::ManualTestRequired);
        }

        self.verify_image(&entry.image_url, "Repository");
        self.verify_image(ext.image_url(), "Extension");

        let listings = ext.listings();
        for item in listings.items() {
            self.test_listing(ext, item, &base_params)?;
        }

        if ext.has_search() {
            self.test_search(ext, &base_params)?;
        }

        thread::sleep(self.options.pace);
        Ok(TestOutcome::Passed)
    }

    fn test_listing(
        &self,
        ext: &dyn Extension,
        item: &ListingItem,
        base: &ParamMap,
    ) -> Result<(), ConformanceError> {
        info!(
            "-------- Listing \"{}\" {}--------",
            item.name,
            if item.is_incrementing {
                "(incrementing) "
            } else {
                ""
            }
        );
        let mut novels = self.fetch_listing(ext, item, base)?;
        if self.options.repeat {
            novels = self.fetch_listing(ext, item, base)?;
        }
        self.show_listing(ext, &novels)?;
        thread::sleep(self.options.pace);
        Ok(())
    }

    /// First page, plus the second when the listing increments.
    fn fetch_listing(
        &self,
        ext: &dyn Extension,
        item: &ListingItem,
        base: &ParamMap,
    ) -> Result<Vec<NovelInfo>, ConformanceError> {
        let first_page = item.is_incrementing.then(|| ext.start_index());
        let params = listing_params(base, item, first_page);
        let mut novels = timed("ext.getListing", || ext.get_listing(item, &params))
            .map_err(call_failed("getListing"))?;
        if item.is_incrementing {
            let params = listing_params(base, item, Some(ext.start_index() + 1));
            let more = timed("ext.getListing", || ext.get_listing(item, &params))
                .map_err(call_failed("getListing"))?;
            novels.extend(more);
        }
        Ok(novels)
    }

    fn test_search(&self, ext: &dyn Extension, base: &ParamMap) -> Result<(), ConformanceError> {
        info!("-------- Search --------");
        let mut filters = ext.search_filters();
        apply_overrides(&mut filters, &self.options.filter_overrides)?;
        let changed = mapify(&filters);

        let mut pages = vec![ext.start_index()];
        if ext.is_search_incrementing() {
            pages.push(ext.start_index() + 1);
        }
        for page in pages {
            let mut params = base.clone();
            params.insert(
                QUERY_INDEX,
                ParamValue::Text(self.options.target_query.clone()),
            );
            params.insert(PAGE_INDEX, ParamValue::Int(page));
            params.insert(LISTING_INDEX, ParamValue::Null);
            params.extend(changed.clone());
            let results =
                timed("ext.search", || ext.search(&params)).map_err(call_failed("search"))?;
            self.show_listing(ext, &results)?;
        }
        Ok(())
    }

    /// Report on a page of novels, then parse one with chapters and read its
    /// first chapter. Novels with no chapters are skipped in order.
    fn show_listing(&self, ext: &dyn Extension, novels: &[NovelInfo]) -> Result<(), ConformanceError> {
        if self.options.print.listings {
            let rendered: Vec<String> = novels.iter().map(|novel| format!("{novel:?}")).collect();
            info!("{}", rendered.join(", "));
        }
        info!("{} novels.", novels.len());
        if self.options.print.list_stats {
            warn!("{} with no title, ", novels.iter().filter(|n| n.title.is_empty()).count());
            warn!("{} with no link, ", novels.iter().filter(|n| n.link.is_empty()).count());
            warn!(
                "{} with no image url.",
                novels.iter().filter(|n| n.image_url.is_empty()).count()
            );
        }
        let Some(first) = novels.first() else {
            return Ok(());
        };

        debug!("{}", first.link);
        self.verify_image(&first.image_url, "Initial novel");

        let mut selected = 0;
        let mut novel = self.parse_novel(ext, &first.link)?;
        while novel.chapters.is_empty() && selected + 1 < novels.len() {
            warn!("Chapters are empty, trying next novel");
            selected += 1;
            novel = self.parse_novel(ext, &novels[selected].link)?;
        }
        let Some(chapter) = novel.chapters.first() else {
            return Err(ConformanceError::EmptyChapters);
        };

        self.verify_image(&novel.image_url, "Parsed novel");
        self.report_novel(&novel);
        let passage = self.get_passage(ext, &chapter.link)?;
        self.report_passage(&passage);
        Ok(())
    }

    fn show_novel(&self, ext: &dyn Extension, url: &str) -> Result<(), ConformanceError> {
        let novel = self.parse_novel(ext, url)?;
        if novel.chapters.is_empty() {
            warn!("Chapters are empty");
            return Ok(());
        }
        self.report_novel(&novel);
        let chapter = novel.chapters.get(self.options.target_chapter).ok_or(
            ConformanceError::ChapterOutOfRange {
                chapter: self.options.target_chapter,
                count: novel.chapters.len(),
            },
        )?;
        let passage = self.get_passage(ext, &chapter.link)?;
        self.report_passage(&passage);
        Ok(())
    }

    fn parse_novel(&self, ext: &dyn Extension, url: &str) -> Result<Novel, ConformanceError> {
        timed("ext.parseNovel", || ext.parse_novel(url, true)).map_err(call_failed("parseNovel"))
    }

    fn get_passage(&self, ext: &dyn Extension, url: &str) -> Result<Vec<u8>, ConformanceError> {
        timed("ext.getPassage", || ext.get_passage(url)).map_err(call_failed("getPassage"))
    }

    fn report_novel(&self, novel: &Novel) {
        if self.options.print.novels {
            info!("{novel:?}");
        }
        if self.options.print.novel_stats {
            info!("{} - {} chapters.", novel.title, novel.chapters.len());
        }
    }

    fn report_passage(&self, passage: &[u8]) {
        let text = String::from_utf8_lossy(passage);
        if self.options.print.passages {
            info!("Passage:\t{text}");
        } else {
            info!("{}", passage_summary(&text));
        }
    }

    fn verify_image(&self, url: &str, subject: &str) {
        if url.trim().is_empty() {
            warn!("{subject} image is not provided");
            return;
        }
        match self.probe.status(url) {
            Ok(status) if (200..300).contains(&status) => info!("{subject} image loads"),
            Ok(status) => warn!(%url, status, "{subject} image does not load"),
            Err(err) => warn!(%url, "{subject} image does not load: {err:#}"),
        }
    }
}

/// Compare what the extension reports with its header and index entry.
pub fn verify_metadata(ext: &dyn Extension, entry: &RepoExtension) -> Result<(), ConformanceError> {
    let metadata = ext.metadata();
    let mismatch = |field, expected: String, actual: String| ConformanceError::MetadataMismatch {
        field,
        expected,
        actual,
    };
    if let Some(header_id) = metadata.id {
        if header_id != ext.id() {
            return Err(mismatch(MetadataField::Id, header_id.to_string(), ext.id().to_string()));
        }
    }
    if entry.id.0 != ext.id() {
        return Err(mismatch(MetadataField::Id, entry.id.to_string(), ext.id().to_string()));
    }
    if entry.version != metadata.version {
        return Err(mismatch(
            MetadataField::Version,
            entry.version.clone(),
            metadata.version.clone(),
        ));
    }
    let lib_version = metadata.lib_version.clone().unwrap_or_default();
    if entry.lib_version != lib_version {
        return Err(mismatch(
            MetadataField::LibVersion,
            entry.lib_version.clone(),
            lib_version,
        ));
    }
    Ok(())
}

fn listing_params(base: &ParamMap, item: &ListingItem, page: Option<i32>) -> ParamMap {
    let mut params = base.clone();
    params.insert(PAGE_INDEX, page.map_or(ParamValue::Null, ParamValue::Int));
    params.insert(
        LISTING_INDEX,
        item.link.clone().map_or(ParamValue::Null, ParamValue::Text),
    );
    params
}

fn render_params(params: &ParamMap) -> String {
    let entries: Vec<String> = params
        .iter()
        .map(|(id, value)| format!("{id}={value}"))
        .collect();
    format!("{{{}}}", entries.join(", "))
}

/// Short description of a passage: short texts in full, long ones by length
/// with their first and last ten characters.
pub fn passage_summary(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < 25 {
        return format!("Result: {text}");
    }
    let head: String = chars[..10].iter().collect();
    let tail: String = chars[chars.len() - 10..].iter().collect();
    format!("{} chars long result: {head} [...] {tail}", chars.len())
}
