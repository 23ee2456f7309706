// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command line parsing.
//!
//! Flags take the following argument as their value. Unknown flags and stray
//! values are ignored.

use anyhow::{bail, Result};
use std::path::PathBuf;
use tilebake_processing::ConfigOverrides;

pub const HELP: &str = r#"
           // TileBake //

Bakes CityJSON files into single-mesh binary tile files.

Required parameter:

--config <path to a .json config file>

Optional options:

--source <override the config's source folder or pattern>
--output <override the config's output prefix>
--lod <override the config's lod filter>
--peek <print the first 20000 characters of a file>

Environment:

RUST_LOG          log filter, defaults to info
TILEBAKE_THREADS  worker threads, defaults to the number of CPUs

Pipeline example 1
tilebake --config buildings.json
tilebake --config terrain.json
tilebake --config trees.json

Pipeline example 2
Exporting two LOD datasets with the same config template:

tilebake --config buildings.json --lod 1.2 --output "/data/buildings/buildings_1.2_"
tilebake --config buildings.json --lod 2.2 --output "/data/buildings/buildings_2.2_"
"#;

/// What the user asked for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Invocation {
    pub help: bool,
    pub config: Option<PathBuf>,
    pub overrides: ConfigOverrides,
    pub peek: Vec<PathBuf>,
}

pub fn parse_args(args: &[String]) -> Result<Invocation> {
    let mut invocation = Invocation::default();

    match args {
        [] => invocation.help = true,
        [single] if single.to_lowercase().contains("help") => invocation.help = true,
        // A lone path, e.g. a config file dropped onto the executable.
        [single] => invocation.config = Some(PathBuf::from(single)),
        _ => {
            for (i, flag) in args.iter().enumerate() {
                if !flag.starts_with("--") {
                    continue;
                }
                let value = args.get(i + 1).map(String::as_str).unwrap_or("");
                match flag.as_str() {
                    "--config" => invocation.config = Some(PathBuf::from(value)),
                    "--source" => invocation.overrides.source = Some(value.to_string()),
                    "--output" => invocation.overrides.output = Some(value.to_string()),
                    "--lod" => match value.parse::<f64>() {
                        Ok(lod) if lod.is_finite() => invocation.overrides.lod = Some(lod),
                        _ => bail!("--lod expects a number, got {value:?}"),
                    },
                    "--peek" => invocation.peek.push(PathBuf::from(value)),
                    "--help" => invocation.help = true,
                    _ => tracing::debug!(flag = %flag, "Ignoring unknown option"),
                }
            }
        }
    }

    Ok(invocation)
}
