//! Compares two repository index files.
//!
//! Usage: `index-diff <old.json> <new.json>`. Prints the differences and exits
//! 1 when there are any, 0 when the indexes are equal.

use anyhow::Result;
use clap::Parser;
use extension_tester::{diff_indexes, load_index};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "index-diff")]
#[command(about = "Show differences between two repository indexes")]
#[command(version)]
struct Cli {
    old: PathBuf,
    new: PathBuf,
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<bool> {
    let cli = Cli::parse();
    let old = load_index(&cli.old)?;
    let new = load_index(&cli.new)?;
    let report = diff_indexes(&old, &new);
    if report.is_empty() {
        println!("Indexes are identical");
        return Ok(true);
    }
    print!("{report}");
    Ok(false)
}
