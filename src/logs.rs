// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Logger installation and child-output sinks.
//!
//! Event and error lines go through the `log` facade with colored prefixes
//! (`EVT:` cyan, `ERR:` red); child stdout/stderr bypass it and are
//! forwarded chunk-wise under a green or red `CMD:` prefix. A chunk that
//! does not end in a newline gets a synthetic one so output from unrelated
//! commands never runs together.

use std::io::Write;

use log::Level;

const BOLD_GREEN: &str = "\x1b[1;32m";
const BOLD_RED: &str = "\x1b[1;31m";
const BOLD_CYAN: &str = "\x1b[1;36m";
const BOLD_YELLOW: &str = "\x1b[1;33m";
const RESET: &str = "\x1b[0m";

/// Installs the global logger. With `quiet` everything is silenced.
pub fn init(quiet: bool) {
    let level = if quiet {
        log::LevelFilter::Off
    } else {
        log::LevelFilter::Info
    };

    let _ = env_logger::Builder::new()
        .filter_level(level)
        .target(env_logger::Target::Stdout)
        .format(|buf, record| {
            let (color, label) = match record.level() {
                Level::Error => (BOLD_RED, "ERR:"),
                Level::Warn => (BOLD_YELLOW, "WRN:"),
                _ => (BOLD_CYAN, "EVT:"),
            };
            writeln!(buf, "{color}{label}{RESET} {}", record.args())
        })
        .try_init();
}

/// Sink for one child output stream.
pub struct CmdSink {
    prefix: String,
}

impl CmdSink {
    /// Sink for child stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self {
            prefix: format!("{BOLD_GREEN}CMD:{RESET} "),
        }
    }

    /// Sink for child stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self {
            prefix: format!("{BOLD_RED}CMD:{RESET} "),
        }
    }

    /// Forwards one chunk to the terminal.
    pub fn chunk(&self, bytes: &[u8]) {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let _ = self.write_chunk(&mut out, bytes);
        let _ = out.flush();
    }

    fn write_chunk<W: Write>(&self, out: &mut W, bytes: &[u8]) -> std::io::Result<()> {
        out.write_all(self.prefix.as_bytes())?;
        out.write_all(bytes)?;
        if bytes.last() != Some(&b'\n') {
            out.write_all(b"\n")?;
        }
        Ok(())
    }
}
