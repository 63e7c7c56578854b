// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use anyhow::{Context, Result};

use wrun::config::{self, Config};
use wrun::executor::Executor;
use wrun::logs;
use wrun::watcher::Watcher;

/// Watches the working directory and reruns the configured commands on
/// every change until a shutdown signal arrives.
pub async fn start(file: Option<PathBuf>, quiet: bool, no_events: bool) -> Result<()> {
    logs::init(quiet);

    let config = Config::load(file.as_deref()).context("config file")?;

    let (watcher, events, errors) =
        Watcher::start(".", config.ignore_reg_exps).context("watcher")?;

    let result = Executor::new(config.cmds, quiet, no_events)
        .run(events, errors)
        .await;
    watcher.close();
    result
}

/// Creates a default config file in the current directory.
pub fn init() -> Result<()> {
    config::create_config_file().context("config file")?;
    println!("created {}", config::DEFAULT_CONFIG_FILE);
    Ok(())
}

/// Prints the version.
pub fn version() {
    println!("wrun {}", env!("CARGO_PKG_VERSION"));
}
