//! Command-line surface and the run configuration derived from it.
//!
//! [`Cli`] is the raw clap model; [`Cli::into_config`] resolves paths, reads
//! the headers file and checks the cross-flag rules, producing a [`Config`]
//! the pipeline can use without further validation.

use crate::extension::ExtensionSource;
use crate::http::{FlareSolverrOptions, HttpOptions};
use crate::index::ExtensionType;
use crate::runner::{PrintOptions, RunOptions};
use clap::Parser;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No extension provided")]
    NoExtensions,
    #[error("Cannot run in CI mode and watch mode")]
    CiWithWatch,
    #[error("extension {} does not exist", path.display())]
    MissingExtension { path: PathBuf },
    #[error("unknown file type `{extension}` for {}", path.display())]
    UnknownFileType { path: PathBuf, extension: String },
    #[error("filter override `{raw}` must look like `<id>=<value>`")]
    MalformedFilter { raw: String },
    #[error("filter override `{raw}` has a non-integer id")]
    FilterId { raw: String },
    #[error("reading headers file {}: {source}", path.display())]
    HeadersFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("headers line {line} is not `Key: Value`: `{content}`")]
    MalformedHeader { line: usize, content: String },
}

#[derive(Parser, Debug)]
#[command(name = "extension-tester")]
#[command(about = "Test novel-source extensions and their repository index")]
#[command(version)]
pub struct Cli {
    /// Extension scripts to test.
    pub extensions: Vec<PathBuf>,

    /// Repository root containing `lib/`, `src/` and `index.json`.
    #[arg(short = 'r', long = "repo", visible_alias = "repository", default_value = ".")]
    pub repo: PathBuf,

    /// Scripts to leave out even if listed.
    #[arg(long, value_name = "PATH")]
    pub skip: Vec<PathBuf>,

    /// Check each extension's reported metadata against the index.
    #[arg(long)]
    pub validate_metadata: bool,

    #[arg(long)]
    pub validate_index: bool,

    /// Regenerate `index.json` before anything else.
    #[arg(long)]
    pub generate_index: bool,

    /// Verify content hashes while validating the index.
    #[arg(long)]
    pub verify_hashes: bool,

    /// Re-run whenever scripts under `lib/` or `src/` change.
    #[arg(long)]
    pub watch: bool,

    /// Non-interactive mode.
    #[arg(long)]
    pub ci: bool,

    #[arg(short, long)]
    pub verbose: bool,

    #[arg(long)]
    pub print_listings: bool,

    #[arg(long)]
    pub print_list_stats: bool,

    #[arg(long)]
    pub print_novels: bool,

    #[arg(long)]
    pub print_novel_stats: bool,

    #[arg(long)]
    pub print_passages: bool,

    #[arg(long)]
    pub print_index: bool,

    #[arg(long = "print-meta")]
    pub print_metadata: bool,

    /// Fetch every listing twice and use the second result.
    #[arg(long)]
    pub repeat: bool,

    #[arg(long, default_value = "world")]
    pub target_query: String,

    /// Only parse this novel URL.
    #[arg(long, value_name = "URL")]
    pub target_novel: Option<String>,

    /// Chapter to read with `--target-novel`.
    #[arg(long, default_value_t = 0)]
    pub target_chapter: usize,

    /// Search filter override, repeatable.
    #[arg(long = "modify-filter", value_name = "ID=VALUE")]
    pub modify_filter: Vec<String>,

    /// File of `Key: Value` lines sent with every request.
    #[arg(long, value_name = "FILE")]
    pub headers: Option<PathBuf>,

    #[arg(long, env = "EXTENSION_TESTER_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Request timeout in seconds; unset waits indefinitely.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub connect_timeout: u64,

    /// FlareSolverr endpoint used to solve Cloudflare challenges.
    #[arg(long, env = "FLARESOLVERR_URL")]
    pub flaresolverr_url: Option<String>,

    #[arg(long, value_name = "SECS", env = "FLARESOLVERR_TIMEOUT", default_value_t = 60)]
    pub flaresolverr_timeout: u64,
}

/// Everything one invocation needs.
#[derive(Debug, Clone)]
pub struct Config {
    pub repo_dir: PathBuf,
    pub sources: Vec<ExtensionSource>,
    pub generate_index: bool,
    pub validate_index: bool,
    pub verify_hashes: bool,
    pub print_index: bool,
    pub watch: bool,
    pub ci: bool,
    pub run: RunOptions,
    pub http: HttpOptions,
}

impl Config {
    pub fn library_dir(&self) -> PathBuf {
        self.repo_dir.join("lib")
    }

    pub fn script_dir(&self) -> PathBuf {
        self.repo_dir.join("src")
    }
}

pub fn default_user_agent() -> String {
    format!("ExtensionTester/{}", env!("CARGO_PKG_VERSION"))
}

impl Cli {
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let skipped: Vec<PathBuf> = self
            .skip
            .iter()
            .map(|path| path.canonicalize().unwrap_or_else(|_| path.clone()))
            .collect();

        let mut sources = Vec::new();
        for path in &self.extensions {
            let path = path
                .canonicalize()
                .map_err(|_| ConfigError::MissingExtension { path: path.clone() })?;
            if skipped.contains(&path) {
                continue;
            }
            let extension = path
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            let kind = ExtensionType::from_file_extension(&extension).ok_or_else(|| {
                ConfigError::UnknownFileType {
                    path: path.clone(),
                    extension: extension.clone(),
                }
            })?;
            sources.push(ExtensionSource { path, kind });
        }

        let needs_extension =
            !((self.ci && self.validate_index) || self.print_index || self.generate_index);
        if needs_extension && sources.is_empty() {
            return Err(ConfigError::NoExtensions);
        }
        if self.ci && self.watch {
            return Err(ConfigError::CiWithWatch);
        }

        let mut filter_overrides = BTreeMap::new();
        for raw in &self.modify_filter {
            let (id, value) = parse_filter_override(raw)?;
            filter_overrides.insert(id, value);
        }

        let headers = match &self.headers {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|source| ConfigError::HeadersFile {
                    path: path.clone(),
                    source,
                })?;
                parse_headers(&text)?
            }
            None => Vec::new(),
        };

        let repo_dir = self.repo.canonicalize().unwrap_or(self.repo);
        let run = RunOptions {
            ci: self.ci,
            validate_metadata: self.validate_metadata,
            repeat: self.repeat,
            target_novel: self.target_novel.filter(|url| !url.is_empty()),
            target_chapter: self.target_chapter,
            target_query: self.target_query,
            filter_overrides,
            print: PrintOptions {
                listings: self.print_listings,
                list_stats: self.print_list_stats,
                novels: self.print_novels,
                novel_stats: self.print_novel_stats,
                passages: self.print_passages,
                metadata: self.print_metadata,
            },
            ..RunOptions::default()
        };
        let http = HttpOptions {
            user_agent: self.user_agent.unwrap_or_else(default_user_agent),
            headers,
            timeout: self.timeout.map(Duration::from_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            flaresolverr: self.flaresolverr_url.map(|url| FlareSolverrOptions {
                url,
                timeout: Duration::from_secs(self.flaresolverr_timeout),
            }),
        };

        Ok(Config {
            repo_dir,
            sources,
            generate_index: self.generate_index,
            validate_index: self.validate_index,
            verify_hashes: self.verify_hashes,
            print_index: self.print_index,
            watch: self.watch,
            ci: self.ci,
            run,
            http,
        })
    }
}

/// Split `<id>=<value>`; the value may itself contain `=`.
pub fn parse_filter_override(raw: &str) -> Result<(i32, String), ConfigError> {
    let Some((id, value)) = raw.split_once('=') else {
        return Err(ConfigError::MalformedFilter {
            raw: raw.to_string(),
        });
    };
    let id = id.trim().parse::<i32>().map_err(|_| ConfigError::FilterId {
        raw: raw.to_string(),
    })?;
    Ok((id, value.to_string()))
}

/// Parse `Key: Value` lines. Blank lines are ignored.
pub fn parse_headers(text: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let mut headers = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let malformed = || ConfigError::MalformedHeader {
            line: index + 1,
            content: trimmed.to_string(),
        };
        let (key, value) = trimmed.split_once(':').ok_or_else(malformed)?;
        let key = key.trim();
        if key.is_empty() {
            return Err(malformed());
        }
        headers.push((key.to_string(), value.trim().to_string()));
    }
    Ok(headers)
}
