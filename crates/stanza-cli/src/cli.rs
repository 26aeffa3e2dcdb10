//! CLI argument definitions for the stanza site compiler.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;

#[derive(Parser)]
#[command(
    name = "stanza",
    version,
    about = "Incremental site compiler",
    long_about = "Compile a site directory incrementally.\n\n\
                  Only representations whose content, attributes, rules, or\n\
                  recorded dependencies changed since the last run are rebuilt;\n\
                  stale files are pruned from the output directory."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Adjust log verbosity (-v for debug, -vv for trace, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format (pretty for human, json for machine parsing).
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Compile the site, rebuilding only what is outdated.
    Compile(CompileArgs),

    /// Remove files from the output directory that no rep produced.
    Prune(PruneArgs),

    /// Show which reps are outdated and why, without compiling.
    Status(SiteArgs),
}

#[derive(Parser)]
pub struct SiteArgs {
    /// Path to the site directory (contains content/ and rules.json).
    #[arg(value_name = "SITE_DIR", default_value = ".")]
    pub site_dir: PathBuf,

    /// Output directory for compiled files (default: <SITE_DIR>/output).
    #[arg(long = "output-dir", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

#[derive(Parser)]
pub struct CompileArgs {
    #[command(flatten)]
    pub site: SiteArgs,

    /// Recompile everything, ignoring recorded state.
    #[arg(long = "force")]
    pub force: bool,

    /// Keep stale files in the output directory after compiling.
    #[arg(long = "no-prune")]
    pub no_prune: bool,

    /// Directory or file names the pruner must never touch (repeatable).
    #[arg(long = "keep", value_name = "NAME")]
    pub keep: Vec<String>,

    /// Hide the progress bar.
    #[arg(long = "no-progress")]
    pub no_progress: bool,
}

#[derive(Parser)]
pub struct PruneArgs {
    #[command(flatten)]
    pub site: SiteArgs,

    /// Report what would be removed without deleting anything.
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Directory or file names the pruner must never touch (repeatable).
    #[arg(long = "keep", value_name = "NAME")]
    pub keep: Vec<String>,
}

/// CLI log level choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// CLI log format choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}
