//! One invocation end to end: index generation and validation, conformance
//! runs for the selected sources, then optionally watching for changes.

use crate::config::Config;
use crate::extension::{ExtensionLoader, ExtensionSource};
use crate::generator::generate_index;
use crate::http::{HttpSession, ResourceProbe};
use crate::index::{INDEX_FILE_NAME, RepoIndex, load_index, render_index, write_index};
use crate::lua::LuaLoader;
use crate::runner::{ConformanceRunner, TestOutcome};
use crate::timing::timed;
use crate::validator::{ValidateOptions, validate_index};
use crate::watcher::{ChangeWatcher, WatcherOptions};
use anyhow::{Context, Result};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// What a single pass over the repository produced.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<(PathBuf, TestOutcome)>,
    pub failures: Vec<String>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, message: String) {
        error!("{message}");
        self.failures.push(message);
    }
}

/// Run every stage once, testing the sources accepted by `selected`.
pub fn run_iteration(
    config: &Config,
    loader: &dyn ExtensionLoader,
    probe: &dyn ResourceProbe,
    selected: impl Fn(&ExtensionSource) -> bool,
) -> RunReport {
    let mut report = RunReport::default();
    let index_path = config.repo_dir.join(INDEX_FILE_NAME);

    if config.generate_index {
        let generated = timed("generate index", || {
            generate_index(loader, &config.library_dir(), &config.script_dir())
        })
        .and_then(|index| write_index(&index_path, &index));
        if let Err(err) = generated {
            report.fail(format!("Index generation failed: {err:#}"));
            return report;
        }
    }

    let index = match load_index(&index_path) {
        Ok(index) => index,
        Err(err) => {
            report.fail(format!("{err:#}"));
            return report;
        }
    };

    if config.print_index {
        match render_index(&index) {
            Ok(rendered) => info!("Index:\n{rendered}"),
            Err(err) => warn!("Unable to render index: {err:#}"),
        }
    }

    if config.validate_index {
        let options = ValidateOptions {
            verify_hashes: config.verify_hashes,
        };
        if let Err(err) = validate_index(&index, &config.repo_dir, options) {
            report.fail(format!("Index is invalid: {err}"));
            return report;
        }
    }

    if config.print_index && config.ci {
        return report;
    }

    test_sources(config, &index, loader, probe, selected, &mut report);

    if report.is_success() {
        info!("RUN COMPLETED");
    }
    report
}

fn test_sources(
    config: &Config,
    index: &RepoIndex,
    loader: &dyn ExtensionLoader,
    probe: &dyn ResourceProbe,
    selected: impl Fn(&ExtensionSource) -> bool,
    report: &mut RunReport,
) {
    let runner = ConformanceRunner::new(loader, probe, &config.run);
    for source in config.sources.iter().filter(|source| selected(*source)) {
        match timed("test extension", || runner.test(index, source)) {
            Ok(outcome) => report.outcomes.push((source.path.clone(), outcome)),
            Err(err) => report.fail(format!("{err} ({})", source.path.display())),
        }
    }
}

/// Whether a batch of changed paths should re-test `source`. Any change under
/// `lib_dir` re-tests everything.
pub fn affected_by(source: &ExtensionSource, changed: &[PathBuf], lib_dir: &Path) -> bool {
    changed
        .iter()
        .any(|path| path.starts_with(lib_dir) || *path == source.path)
}

/// Full invocation against live HTTP and the Lua host. Returns whether the
/// first pass succeeded; with `--watch` this only returns on watcher failure.
pub fn run(config: &Config) -> Result<bool> {
    let session = Arc::new(HttpSession::new(&config.http)?);
    let loader = LuaLoader::new(&config.repo_dir, Arc::clone(&session));

    let report = run_iteration(config, &loader, session.as_ref(), |_| true);
    if !config.watch || !report.is_success() {
        return Ok(report.is_success());
    }

    let lib_dir = config
        .library_dir()
        .canonicalize()
        .unwrap_or_else(|_| config.library_dir());
    let watcher = ChangeWatcher::new(
        vec![config.library_dir(), config.script_dir()],
        WatcherOptions::default(),
    );
    watcher
        .run(|changed| {
            info!("{} file(s) changed, re-running", changed.len());
            run_iteration(config, &loader, session.as_ref(), |source| {
                affected_by(source, changed, &lib_dir)
            });
            ControlFlow::Continue(())
        })
        .context("watching repository")?;
    Ok(true)
}
