// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

// Atari Portfolio file transfer over a serial bridge
use std::io::Write as _;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pofosync::bridge::{Bridge, PingOutcome, TransferOutcome};
use pofosync::sink::{FileProgress, MessageSink};

#[derive(Parser)]
#[command(name = "pofosync")]
#[command(about = "File transfer with an Atari Portfolio over a serial bridge", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port the bridge is attached to (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
    baud: u32,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the bridge is responding
    Ping,
    /// List files stored on the Portfolio
    List {
        /// DOS wildcard pattern
        #[arg(default_value = "*.*")]
        pattern: String,
    },
    /// Send a local file to the Portfolio
    Send {
        /// File to send
        file: PathBuf,
        /// Destination path on the Portfolio (e.g., C:\DATA\FILE.TXT)
        dest: String,
        /// Replace the destination if it already exists
        #[arg(long)]
        overwrite: bool,
    },
    /// Retrieve a file from the Portfolio
    Retrieve {
        /// Path on the Portfolio
        remote: String,
        /// Local file to write
        file: PathBuf,
    },
}

/// Writes operational messages straight to stdout
struct ConsoleSink;

impl MessageSink for ConsoleSink {
    fn write(&mut self, text: &str) {
        print!("{}", text);
        let _ = std::io::stdout().flush();
    }

    fn write_line(&mut self, text: &str) {
        println!("{}", text);
    }
}

/// Redraws a single percentage line as a transfer advances
#[derive(Default)]
struct ConsoleProgress {
    total: u64,
    transferred: u64,
    last_percent: u64,
}

impl FileProgress for ConsoleProgress {
    fn start(&mut self, total_bytes: u64) {
        self.total = total_bytes;
        self.transferred = 0;
        self.last_percent = u64::MAX;
    }

    fn increment(&mut self, bytes: u64) {
        self.transferred += bytes;
        if self.total == 0 {
            return;
        }
        let percent = (self.transferred * 100 / self.total).min(100);
        if percent != self.last_percent {
            self.last_percent = percent;
            print!("\r{:3}%", percent);
            let _ = std::io::stdout().flush();
            if percent == 100 {
                println!();
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let bridge = Bridge::connect(&cli.port, cli.baud, Box::new(ConsoleSink))
        .with_context(|| format!("failed to connect to the bridge on {}", cli.port))?;

    let result = run(&bridge, cli.command);
    bridge.disconnect();

    match result {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => Err(e),
    }
}

/// Runs one subcommand, returning whether it fully succeeded
fn run(bridge: &Bridge, command: Commands) -> anyhow::Result<bool> {
    match command {
        Commands::Ping => Ok(bridge.ping()? == PingOutcome::Success),
        Commands::List { pattern } => {
            let files = bridge
                .list_files(&pattern)
                .with_context(|| format!("failed to list files matching '{}'", pattern))?;
            for file in &files {
                println!("{}", file);
            }
            println!("{} file(s)", files.len());
            Ok(true)
        }
        Commands::Send {
            file,
            dest,
            overwrite,
        } => {
            let mut progress = ConsoleProgress::default();
            let outcome = bridge
                .send_file(&file, &dest, overwrite, &mut progress)
                .with_context(|| format!("failed to send '{}'", file.display()))?;
            Ok(outcome == TransferOutcome::Completed)
        }
        Commands::Retrieve { remote, file } => {
            let mut progress = ConsoleProgress::default();
            let outcome = bridge
                .retrieve_file(&remote, &file, &mut progress)
                .with_context(|| format!("failed to retrieve '{}'", remote))?;
            Ok(outcome == TransferOutcome::Completed)
        }
    }
}
