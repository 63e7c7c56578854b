// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! File-watching command runner.
//!
//! Watches the working directory recursively through inotify and reruns
//! the configured commands whenever something changes, terminating the
//! in-flight run first.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::missing_errors_doc)]

mod cmds;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

#[derive(Parser)]
#[command(name = "wrun")]
#[command(about = "Run commands whenever the contents in the current directory change")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser)]
enum Commands {
    /// Starts watching files in the current directory
    Start {
        /// Path for the config file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Whether to log anything at all
        #[arg(short, long)]
        quiet: bool,
        /// Whether to log events
        #[arg(long = "no-events", visible_alias = "ne")]
        no_events: bool,
    },
    /// Creates a config file in the current directory
    Init,
    /// Prints the version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            file,
            quiet,
            no_events,
        } => cmds::start(file, quiet, no_events).await,
        Commands::Init => cmds::init(),
        Commands::Version => {
            cmds::version();
            Ok(())
        }
    }
}
