//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Keep watched folders tidy: canonical renames, image conversion, undo.
#[derive(Parser)]
#[command(
    name = "namefix",
    version,
    about = "Watches folders and keeps new files tidy",
    styles = clap_cargo_style()
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Watch the configured directories in the foreground
    Run {
        /// Compute and announce changes without touching the disk
        #[arg(long)]
        dry_run: bool,

        /// Watch these directories instead of the configured ones
        #[arg(long = "dir", value_name = "DIR")]
        dirs: Vec<String>,
    },

    /// Serve the line-oriented JSON bridge on stdin/stdout
    Serve,

    /// Undo the most recent rename or conversion
    Undo,

    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Manage watched directories
    Dirs {
        #[command(subcommand)]
        command: DirCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the active configuration as JSON
    Show,
    /// Print the path of the configuration file
    Path,
}

#[derive(Subcommand)]
pub enum DirCommands {
    /// List watched directories (primary first)
    List,
    /// Add a directory to the watch list
    Add { directory: String },
    /// Remove a directory from the watch list
    Remove { directory: String },
}
