//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// framepace - real-time audio pacing for RTC engines
///
/// Bridges irregular microphone/speaker callbacks to fixed-cadence PCM16 frames
#[derive(Parser, Debug)]
#[command(name = "framepace")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Verbose output (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log output to file
    #[arg(long, global = true)]
    pub log: Option<String>,

    /// Configuration file (default: framepace.toml, then the user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run both directions against an in-process loopback engine with synthetic audio
    Simulate {
        /// Run time in seconds (stops earlier on Ctrl+C)
        #[arg(short, long, default_value = "5")]
        seconds: u64,

        /// Average microphone batch size in samples per channel
        #[arg(long, default_value = "441")]
        batch: usize,

        /// Test tone frequency in Hz
        #[arg(long, default_value = "440")]
        tone: f32,
    },

    /// Route the microphone through the loopback engine to the speakers
    #[cfg(feature = "device")]
    Loopback {
        /// Input device name (overrides the config file)
        #[arg(short, long)]
        input: Option<String>,

        /// Output device name (overrides the config file)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// List available audio devices
    #[cfg(feature = "device")]
    Devices,

    /// Print the sample configuration, or write it to a file
    Config {
        /// Write to this path instead of stdout
        #[arg(short, long)]
        write: Option<PathBuf>,
    },
}

impl Args {
    /// Get the log level based on verbose/quiet flags
    ///
    /// `fallback` is used when neither flag is given.
    pub fn log_level(&self, fallback: tracing::Level) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else {
            match self.verbose {
                0 => fallback,
                1 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            }
        }
    }
}

impl Default for Command {
    fn default() -> Self {
        Command::Simulate {
            seconds: 5,
            batch: 441,
            tone: 440.0,
        }
    }
}
