// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! TileBake command line tool.
//!
//! Exit codes: 0 when the run succeeded, 1 when it could not start, 2 when it
//! finished but some files, features or tiles failed.

use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;
use std::process::ExitCode;
use tilebake_processing::{ConfigFile, ConfigOverrides, Pipeline, RunSummary};

mod args;

use args::{parse_args, HELP};

/// Characters printed by `--peek`.
const PEEK_LENGTH: usize = 20_000;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = match parse_args(&args) {
        Ok(invocation) => invocation,
        Err(e) => {
            tracing::error!("{e:#}");
            return ExitCode::from(1);
        }
    };

    if invocation.help {
        print!("{HELP}");
        return ExitCode::SUCCESS;
    }

    for path in &invocation.peek {
        if let Err(e) = peek(path, PEEK_LENGTH) {
            tracing::warn!(path = %path.display(), error = %e, "Cannot peek into file");
        }
    }

    let Some(config_path) = invocation.config else {
        return ExitCode::SUCCESS;
    };

    match bake(&config_path, &invocation.overrides) {
        Ok(summary) if summary.has_errors() => ExitCode::from(2),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

fn bake(config_path: &Path, overrides: &ConfigOverrides) -> Result<RunSummary> {
    let mut config = ConfigFile::load(config_path)
        .with_context(|| format!("Could not open config file {}", config_path.display()))?;
    config.apply_overrides(overrides);

    let threads = std::env::var("TILEBAKE_THREADS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(num_cpus::get);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .context("Failed to initialize rayon thread pool")?;

    tracing::info!(
        config = %config_path.display(),
        source = %config.source_folder,
        output = %config.output_folder,
        lod = config.lod,
        threads,
        "Starting TileBake"
    );

    Pipeline::new(config).run().context("Bake did not start")
}

/// Print the first `limit` characters of a file.
fn peek(path: &Path, limit: usize) -> Result<()> {
    let mut bytes = Vec::new();
    std::fs::File::open(path)?
        .take((limit * 4) as u64)
        .read_to_end(&mut bytes)?;

    let text: String = String::from_utf8_lossy(&bytes).chars().take(limit).collect();
    println!();
    print!("{text}");
    println!(".....");
    Ok(())
}
