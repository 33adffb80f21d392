// Integration suite: index generation and validation over real directory
// trees, the conformance protocol against scripted extensions, and the Lua
// host end to end.
mod support;

use anyhow::Result;
use extension_tester::extension::{LISTING_INDEX, PAGE_INDEX, QUERY_INDEX};
use extension_tester::hashing::hash_file;
use extension_tester::index::{ExtensionType, INDEX_FILE_NAME, render_index};
use extension_tester::{
    Cli, ConformanceError, ConformanceRunner, ExtensionSource, Filter, FilterKind, HttpOptions,
    HttpSession, LuaLoader, ParamMap, ParamValue, RepoIndex, RunOptions, TestOutcome,
    ValidateOptions, ValidationError, diff_indexes, generate_index, load_index, run_iteration,
    validate_index, write_index,
};
use clap::Parser;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use support::{FakeExtension, FakeLoader, FakeProbe, RepoFixture, chapter, novel_info};

fn generate(repo: &RepoFixture, loader: &FakeLoader) -> Result<RepoIndex> {
    generate_index(loader, &repo.root().join("lib"), &repo.root().join("src"))
}

fn options() -> RunOptions {
    RunOptions {
        pace: Duration::ZERO,
        ..RunOptions::default()
    }
}

fn source(path: &Path) -> ExtensionSource {
    ExtensionSource {
        path: path.to_path_buf(),
        kind: ExtensionType::LuaScript,
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

#[test]
fn generator_ranks_authors_by_contribution() -> Result<()> {
    let repo = RepoFixture::new();
    repo.library("util", "1.2.0", "Bob");
    repo.extension("src/en/alpha.lua", 2, "Alice, Bob");
    let index = generate(&repo, &FakeLoader::default())?;

    let names: Vec<&str> = index.authors.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["Bob", "Alice"]);
    assert_eq!(index.authors[0].description, "Worked on alpha, util");
    assert_eq!(index.authors[1].description, "Worked on alpha");

    assert_eq!(index.libraries.len(), 1);
    assert_eq!(index.libraries[0].version, "1.2.0");
    let ext = &index.extensions[0];
    assert_eq!(ext.id.0, 2);
    assert_eq!(ext.lang, "en");
    assert_eq!(ext.file_name, "alpha");
    assert_eq!(ext.lib_version, "1.0.0");
    assert_eq!(
        ext.content_hash,
        hash_file(&repo.root().join("src/en/alpha.lua"))?
    );
    Ok(())
}

#[test]
fn generator_skips_scripts_outside_language_dirs() -> Result<()> {
    let repo = RepoFixture::new();
    repo.extension("src/en/keep.lua", 1, "A");
    repo.extension("src/top.lua", 2, "A");
    repo.extension("src/en/old/deep.lua", 3, "A");
    repo.write("src/en/notes.txt", "not a script");
    let index = generate(&repo, &FakeLoader::default())?;
    let stems: Vec<&str> = index.extensions.iter().map(|e| e.file_name.as_str()).collect();
    assert_eq!(stems, vec!["keep"]);
    Ok(())
}

#[test]
fn generator_sorts_extensions_by_id() -> Result<()> {
    let repo = RepoFixture::new();
    repo.extension("src/en/zeta.lua", 1, "A");
    repo.extension("src/fr/alpha.lua", 9, "A");
    repo.extension("src/de/mid.lua", 4, "A");
    let index = generate(&repo, &FakeLoader::default())?;
    let ids: Vec<i32> = index.extensions.iter().map(|e| e.id.0).collect();
    assert_eq!(ids, vec![1, 4, 9]);
    Ok(())
}

#[test]
fn generation_is_idempotent() -> Result<()> {
    let repo = RepoFixture::new();
    repo.library("util", "1.0.0", "Bob");
    repo.extension("src/en/alpha.lua", 1, "Alice, Bob");
    repo.extension("src/en/beta.lua", 2, "Carol");
    let index_path = repo.root().join(INDEX_FILE_NAME);

    write_index(&index_path, &generate(&repo, &FakeLoader::default())?)?;
    let first = fs::read(&index_path)?;
    write_index(&index_path, &generate(&repo, &FakeLoader::default())?)?;
    assert_eq!(fs::read(&index_path)?, first);
    assert_eq!(load_index(&index_path)?, generate(&repo, &FakeLoader::default())?);
    Ok(())
}

#[test]
fn generation_requires_lib_version() {
    let repo = RepoFixture::new();
    repo.write(
        "src/en/legacy.lua",
        "-- {\"id\":1,\"ver\":\"1.0.0\",\"author\":\"A\"}\nreturn {}\n",
    );
    let err = generate(&repo, &FakeLoader::default()).unwrap_err();
    assert!(format!("{err:#}").contains("libVer"));
}

#[test]
fn generation_aborts_when_a_script_fails_to_load() {
    let repo = RepoFixture::new();
    repo.extension("src/en/fine.lua", 1, "A");
    repo.extension("src/en/broken.lua", 2, "A");
    let err = generate(&repo, &FakeLoader::default()).unwrap_err();
    assert!(format!("{err:#}").contains("broken"));
    assert!(!repo.root().join(INDEX_FILE_NAME).exists());
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

#[test]
fn generated_index_validates() -> Result<()> {
    let repo = RepoFixture::new();
    repo.library("util", "1.0.0", "Bob");
    repo.extension("src/en/alpha.lua", 1, "Alice");
    let index = generate(&repo, &FakeLoader::default())?;
    validate_index(
        &index,
        &repo.root(),
        ValidateOptions {
            verify_hashes: true,
        },
    )?;
    Ok(())
}

#[test]
fn validator_reports_missing_extension_file() -> Result<()> {
    let repo = RepoFixture::new();
    let path = repo.extension("src/en/alpha.lua", 1, "Alice");
    let index = generate(&repo, &FakeLoader::default())?;
    fs::remove_file(&path)?;
    let err = validate_index(&index, &repo.root(), ValidateOptions::default()).unwrap_err();
    assert!(matches!(err, ValidationError::MissingExtensionFile { ref name, .. } if name == "alpha"));
    Ok(())
}

#[test]
fn validator_rejects_duplicate_extension_ids() -> Result<()> {
    let repo = RepoFixture::new();
    repo.extension("src/en/alpha.lua", 3, "A");
    repo.extension("src/fr/beta.lua", 3, "A");
    let index = generate(&repo, &FakeLoader::default())?;
    let err = validate_index(&index, &repo.root(), ValidateOptions::default()).unwrap_err();
    assert!(matches!(err, ValidationError::DuplicateExtensionId { .. }));
    Ok(())
}

#[test]
fn validator_rejects_missing_library() -> Result<()> {
    let repo = RepoFixture::new();
    let lib = repo.library("util", "1.0.0", "Bob");
    let index = generate(&repo, &FakeLoader::default())?;
    fs::remove_file(lib)?;
    let err = validate_index(&index, &repo.root(), ValidateOptions::default()).unwrap_err();
    assert!(matches!(err, ValidationError::MissingLibraryFile { ref name, .. } if name == "util"));
    Ok(())
}

// Hash drift is only an error when explicitly requested.
#[test]
fn hash_mismatch_requires_opt_in() -> Result<()> {
    let repo = RepoFixture::new();
    let path = repo.extension("src/en/alpha.lua", 1, "Alice");
    let index = generate(&repo, &FakeLoader::default())?;
    fs::write(&path, "-- {\"id\":1,\"ver\":\"1.0.1\",\"libVer\":\"1.0.0\"}\n")?;

    validate_index(&index, &repo.root(), ValidateOptions::default())?;
    let err = validate_index(
        &index,
        &repo.root(),
        ValidateOptions {
            verify_hashes: true,
        },
    )
    .unwrap_err();
    assert!(matches!(err, ValidationError::HashMismatch { .. }));
    Ok(())
}

#[test]
fn diff_reports_changed_versions() -> Result<()> {
    let repo = RepoFixture::new();
    repo.extension("src/en/alpha.lua", 1, "Alice");
    let before = generate(&repo, &FakeLoader::default())?;
    let mut after = before.clone();
    after.extensions[0].version = "2.0.0".to_string();

    assert_eq!(diff_indexes(&before, &before), "");
    let report = diff_indexes(&before, &after);
    assert!(report.starts_with("Differences found:\n"));
    assert!(report.contains("Extensions differ:"));
    assert!(report.contains("1.0.0"));
    assert!(report.contains("2.0.0"));
    Ok(())
}

// ---------------------------------------------------------------------------
// Conformance runner
// ---------------------------------------------------------------------------

struct RunnerFixture {
    repo: RepoFixture,
    loader: FakeLoader,
    index: RepoIndex,
    source: ExtensionSource,
}

fn runner_fixture(extension: FakeExtension) -> RunnerFixture {
    let repo = RepoFixture::new();
    let path = repo.extension("src/en/fake.lua", extension.id, "Alice");
    let loader = FakeLoader::default().with("fake", extension);
    let index = generate(&repo, &loader).unwrap();
    RunnerFixture {
        repo,
        loader,
        index,
        source: source(&path),
    }
}

impl RunnerFixture {
    fn run(&self, options: &RunOptions) -> Result<TestOutcome, ConformanceError> {
        let probe = FakeProbe::default();
        ConformanceRunner::new(&self.loader, &probe, options).test(&self.index, &self.source)
    }
}

#[test]
fn runner_tries_the_next_novel_when_chapters_are_empty() {
    let mut extension = FakeExtension::new(7, "Fake").with_listing("Latest", false);
    extension.novels = vec![novel_info("Empty", "/empty"), novel_info("Full", "/full")];
    extension
        .chapters
        .insert("/full".to_string(), vec![chapter("/full/1")]);
    let calls = extension.calls.clone();
    let fixture = runner_fixture(extension);

    assert_eq!(fixture.run(&options()).unwrap(), TestOutcome::Passed);
    assert_eq!(
        *calls.borrow(),
        vec![
            "listing Latest page=null",
            "novel /empty",
            "novel /full",
            "passage /full/1",
        ]
    );
}

#[test]
fn runner_fails_when_no_novel_has_chapters() {
    let mut extension = FakeExtension::new(7, "Fake").with_listing("Latest", false);
    extension.novels = vec![novel_info("A", "/a"), novel_info("B", "/b")];
    let fixture = runner_fixture(extension);

    let err = fixture.run(&options()).unwrap_err();
    assert!(matches!(err, ConformanceError::EmptyChapters));
    assert_eq!(
        err.to_string(),
        "Chapters still empty after retry, likely an issue."
    );
}

#[test]
fn empty_listings_pass_without_parsing() {
    let extension = FakeExtension::new(7, "Fake").with_listing("Latest", false);
    let calls = extension.calls.clone();
    let fixture = runner_fixture(extension);
    assert_eq!(fixture.run(&options()).unwrap(), TestOutcome::Passed);
    assert_eq!(*calls.borrow(), vec!["listing Latest page=null"]);
}

// Incrementing listings fetch two pages; --repeat fetches both again.
#[test]
fn incrementing_listings_fetch_two_pages_and_repeat() {
    let mut extension = FakeExtension::new(7, "Fake").with_listing("Latest", true);
    extension.novels = vec![novel_info("A", "/a")];
    extension.chapters.insert("/a".to_string(), vec![chapter("/a/1")]);
    let calls = extension.calls.clone();
    let fixture = runner_fixture(extension);

    let options = RunOptions {
        repeat: true,
        ..options()
    };
    assert_eq!(fixture.run(&options).unwrap(), TestOutcome::Passed);
    assert_eq!(
        *calls.borrow(),
        vec![
            "listing Latest page=1",
            "listing Latest page=2",
            "listing Latest page=1",
            "listing Latest page=2",
            "novel /a",
            "passage /a/1",
        ]
    );
}

#[test]
fn search_params_carry_query_page_and_overrides() {
    let mut extension = FakeExtension::new(7, "Fake");
    extension.has_search = true;
    extension.search_filters = vec![
        Filter::new(5, "Completed", FilterKind::Checkbox(false)),
        Filter::new(
            -1,
            "Genres",
            FilterKind::Group(vec![Filter::new(6, "Author", FilterKind::Text(String::new()))]),
        ),
    ];
    let params = extension.params.clone();
    let fixture = runner_fixture(extension);

    let options = RunOptions {
        filter_overrides: BTreeMap::from([(5, "true".to_string()), (42, "ignored".to_string())]),
        ..options()
    };
    assert_eq!(fixture.run(&options).unwrap(), TestOutcome::Passed);

    let expected: ParamMap = BTreeMap::from([
        (QUERY_INDEX, ParamValue::Text("world".to_string())),
        (PAGE_INDEX, ParamValue::Int(1)),
        (LISTING_INDEX, ParamValue::Null),
        (5, ParamValue::Bool(true)),
        (6, ParamValue::Text(String::new())),
    ]);
    assert_eq!(*params.borrow(), vec![expected]);
}

#[test]
fn invalid_filter_override_fails_the_extension() {
    let mut extension = FakeExtension::new(7, "Fake");
    extension.has_search = true;
    extension.search_filters = vec![Filter::new(5, "Completed", FilterKind::Checkbox(false))];
    let fixture = runner_fixture(extension);

    let options = RunOptions {
        filter_overrides: BTreeMap::from([(5, "maybe".to_string())]),
        ..options()
    };
    assert!(matches!(
        fixture.run(&options),
        Err(ConformanceError::Filter(_))
    ));
}

#[test]
fn metadata_mismatch_is_reported() {
    let mut fixture = runner_fixture(FakeExtension::new(7, "Fake"));
    fixture.index.extensions[0].version = "0.9.0".to_string();
    let options = RunOptions {
        validate_metadata: true,
        ..options()
    };
    let err = fixture.run(&options).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Metadata version does not match index (expected `0.9.0`, found `1.0.0`)"
    );
}

#[test]
fn ci_metadata_check_ends_the_run_for_that_extension() {
    let mut extension = FakeExtension::new(7, "Fake").with_listing("Latest", false);
    extension.novels = vec![novel_info("A", "/a")];
    let calls = extension.calls.clone();
    let fixture = runner_fixture(extension);
    let options = RunOptions {
        ci: true,
        validate_metadata: true,
        ..options()
    };
    assert_eq!(fixture.run(&options).unwrap(), TestOutcome::MetadataVerified);
    assert!(calls.borrow().is_empty());
}

#[test]
fn cloudflare_extensions_need_manual_testing_in_ci() {
    let mut extension = FakeExtension::new(7, "Fake").with_listing("Latest", false);
    extension.has_cloudflare = true;
    let calls = extension.calls.clone();
    let fixture = runner_fixture(extension);
    let options = RunOptions {
        ci: true,
        ..options()
    };
    assert_eq!(fixture.run(&options).unwrap(), TestOutcome::ManualTestRequired);
    assert!(calls.borrow().is_empty());
}

#[test]
fn unreachable_images_only_warn() {
    let mut extension = FakeExtension::new(7, "Fake").with_listing("Latest", false);
    extension.novels = vec![novel_info("A", "/a")];
    extension.chapters.insert("/a".to_string(), vec![chapter("/a/1")]);
    let fixture = runner_fixture(extension);

    let probe = FakeProbe {
        statuses: BTreeMap::from([("https://img.test/a.png".to_string(), 404)]),
        ..FakeProbe::default()
    };
    let options = options();
    let outcome = ConformanceRunner::new(&fixture.loader, &probe, &options)
        .test(&fixture.index, &fixture.source)
        .unwrap();
    assert_eq!(outcome, TestOutcome::Passed);
    assert!(probe
        .requested
        .borrow()
        .contains(&"https://img.test/a.png".to_string()));
}

#[test]
fn single_novel_mode_checks_the_requested_chapter() {
    let mut extension = FakeExtension::new(7, "Fake").with_listing("Latest", false);
    extension.chapters.insert(
        "/novel".to_string(),
        vec![chapter("/novel/1"), chapter("/novel/2")],
    );
    let calls = extension.calls.clone();
    let fixture = runner_fixture(extension);

    let options = RunOptions {
        target_novel: Some("/novel".to_string()),
        target_chapter: 1,
        ..options()
    };
    assert_eq!(fixture.run(&options).unwrap(), TestOutcome::SingleNovel);
    assert_eq!(*calls.borrow(), vec!["novel /novel", "passage /novel/2"]);

    let options = RunOptions {
        target_chapter: 5,
        ..options
    };
    assert!(matches!(
        fixture.run(&options),
        Err(ConformanceError::ChapterOutOfRange { chapter: 5, count: 2 })
    ));
}

#[test]
fn scripts_missing_from_the_index_fail() {
    let fixture = runner_fixture(FakeExtension::new(7, "Fake"));
    let stray = fixture.repo.extension("src/en/stray.lua", 8, "A");
    let probe = FakeProbe::default();
    let options = options();
    let err = ConformanceRunner::new(&fixture.loader, &probe, &options)
        .test(&fixture.index, &source(&stray))
        .unwrap_err();
    assert!(matches!(err, ConformanceError::NotIndexed { ref file_name } if file_name == "stray"));
}

#[test]
fn unsupported_script_types_are_not_loaded() {
    let extension = FakeExtension::new(7, "Fake");
    let calls = extension.calls.clone();
    let fixture = runner_fixture(extension);
    let source = ExtensionSource {
        kind: ExtensionType::Other("KotlinScript".to_string()),
        ..fixture.source.clone()
    };
    let probe = FakeProbe::default();
    let options = options();
    let err = ConformanceRunner::new(&fixture.loader, &probe, &options)
        .test(&fixture.index, &source)
        .unwrap_err();
    assert!(matches!(err, ConformanceError::UnsupportedType { ref kind } if kind == "KotlinScript"));
    assert!(calls.borrow().is_empty());
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

fn config(args: &[&str]) -> extension_tester::Config {
    let mut argv = vec!["extension-tester"];
    argv.extend_from_slice(args);
    let mut config = Cli::try_parse_from(argv).unwrap().into_config().unwrap();
    config.run.pace = Duration::ZERO;
    config
}

#[test]
fn pipeline_generates_and_validates_in_ci() {
    let repo = RepoFixture::new();
    repo.library("util", "1.0.0", "Bob");
    repo.extension("src/en/alpha.lua", 1, "Alice");
    let root = repo.root().to_string_lossy().into_owned();
    let config = config(&["--repo", root.as_str(), "--ci", "--generate-index", "--validate-index"]);

    let report = run_iteration(&config, &FakeLoader::default(), &FakeProbe::default(), |_| true);
    assert!(report.is_success(), "{:?}", report.failures);
    let index = load_index(&repo.root().join(INDEX_FILE_NAME)).unwrap();
    assert_eq!(index.extensions.len(), 1);
}

#[test]
fn pipeline_collects_per_extension_failures() {
    let repo = RepoFixture::new();
    let good = repo.extension("src/en/alpha.lua", 1, "Alice");
    let index = generate(&repo, &FakeLoader::default()).unwrap();
    write_index(&repo.root().join(INDEX_FILE_NAME), &index).unwrap();
    let stray = repo.extension("extra/stray.lua", 2, "Alice");

    let root = repo.root().to_string_lossy().into_owned();
    let good = good.to_string_lossy().into_owned();
    let stray = stray.to_string_lossy().into_owned();
    let config = config(&["--repo", root.as_str(), good.as_str(), stray.as_str()]);

    let report = run_iteration(&config, &FakeLoader::default(), &FakeProbe::default(), |_| true);
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].contains("stray"));
}

#[test]
fn pipeline_fails_on_invalid_index() {
    let repo = RepoFixture::new();
    let path = repo.extension("src/en/alpha.lua", 1, "Alice");
    let index = generate(&repo, &FakeLoader::default()).unwrap();
    write_index(&repo.root().join(INDEX_FILE_NAME), &index).unwrap();
    fs::remove_file(path).unwrap();

    let root = repo.root().to_string_lossy().into_owned();
    let config = config(&["--repo", root.as_str(), "--ci", "--validate-index"]);
    let report = run_iteration(&config, &FakeLoader::default(), &FakeProbe::default(), |_| true);
    assert!(!report.is_success());
}

// A repository that fails validation is not exercised any further.
#[test]
fn invalid_index_stops_the_pass_before_testing() {
    let repo = RepoFixture::new();
    let alpha = repo.extension("src/en/alpha.lua", 1, "Alice");
    let mut index = generate(&repo, &FakeLoader::default()).unwrap();
    let mut ghost = index.extensions[0].clone();
    ghost.id.0 = 2;
    ghost.name = "ghost".to_string();
    ghost.file_name = "ghost".to_string();
    index.extensions.push(ghost);
    write_index(&repo.root().join(INDEX_FILE_NAME), &index).unwrap();

    let root = repo.root().to_string_lossy().into_owned();
    let alpha = alpha.to_string_lossy().into_owned();
    let config = config(&["--repo", root.as_str(), "--validate-index", alpha.as_str()]);
    let report = run_iteration(&config, &FakeLoader::default(), &FakeProbe::default(), |_| true);

    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].contains("ghost"));
    assert!(report.outcomes.is_empty());
}

// ---------------------------------------------------------------------------
// Lua host
// ---------------------------------------------------------------------------

const LUA_LIBRARY: &str = r#"-- {"ver":"1.0.0","author":"Bob"}
return { shout = function(s) return s:upper() end }
"#;

const LUA_EXTENSION: &str = r#"-- {"id":1,"ver":"1.0.0","libVer":"1.0.0","author":"Alice, Bob"}
local example = Require("example")

return {
	id = 1,
	name = "Example",
	baseURL = "https://example.com",
	imageURL = "https://example.com/icon.png",
	hasSearch = false,
	listings = {},
	parseNovel = function(url, loadChapters)
		return NovelInfo { title = example.shout(url) }
	end,
	getPassage = function(url)
		return "text"
	end,
}
"#;

fn lua_loader(repo: &Path) -> LuaLoader {
    let session = HttpSession::new(&HttpOptions {
        user_agent: "extension-tester-tests".to_string(),
        headers: Vec::new(),
        timeout: Some(Duration::from_secs(1)),
        connect_timeout: Duration::from_secs(1),
        flaresolverr: None,
    })
    .unwrap();
    LuaLoader::new(repo, Arc::new(session))
}

#[test]
fn lua_repository_generates_a_valid_index() -> Result<()> {
    let repo = RepoFixture::new();
    repo.write("lib/example.lua", LUA_LIBRARY);
    repo.write("src/en/example.lua", LUA_EXTENSION);
    let loader = lua_loader(&repo.root());

    let index = generate_index(&loader, &repo.root().join("lib"), &repo.root().join("src"))?;
    write_index(&repo.root().join(INDEX_FILE_NAME), &index)?;
    let loaded = load_index(&repo.root().join(INDEX_FILE_NAME))?;
    validate_index(
        &loaded,
        &repo.root(),
        ValidateOptions {
            verify_hashes: true,
        },
    )?;

    assert_eq!(loaded.extensions.len(), 1);
    assert_eq!(loaded.extensions[0].name, "Example");
    assert_eq!(loaded.extensions[0].image_url, "https://example.com/icon.png");
    assert_eq!(loaded.libraries[0].name, "example");
    let names: Vec<&str> = loaded.authors.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["Bob", "Alice"]);
    assert!(render_index(&loaded)?.ends_with('\n'));
    Ok(())
}
