//! Command line argument definitions.

use crate::logging::LogFormat;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "storyhub",
    version,
    about = "Build, watch and query story indexes",
    long_about = "Discover story files, build the story index and keep it up to date.\n\n\
                  Configuration is read from storyhub.json (or $STORYHUB_CONFIG)."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the config file.
    #[arg(long, short = 'c', value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// More logging (-v for debug, -vv for trace).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log output format.
    #[arg(long = "log-format", value_enum, default_value = "pretty", global = true)]
    pub log_format: LogFormatArg,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build the story index once and write it.
    Index(IndexArgs),

    /// Build the story index, then rebuild it whenever a story file changes.
    Watch(IndexArgs),

    /// Resolve a story selection against a written index.
    Resolve(ResolveArgs),
}

#[derive(Args)]
pub struct IndexArgs {
    /// Where to write the index (overrides $STORYHUB_OUTPUT and the config).
    #[arg(long, short = 'o', value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Print the index to stdout instead of writing it.
    #[arg(long)]
    pub stdout: bool,
}

#[derive(Args)]
pub struct ResolveArgs {
    /// Story id or id prefix; `*` selects the first story.
    #[arg(value_name = "ID", conflicts_with_all = ["url", "title"])]
    pub id: Option<String>,

    /// A preview URL or query string, e.g. `?path=/story/button--primary`.
    #[arg(long, conflicts_with = "title")]
    pub url: Option<String>,

    /// Story title, used together with --name.
    #[arg(long, requires = "name")]
    pub title: Option<String>,

    /// Story name, used together with --title.
    #[arg(long, requires = "title")]
    pub name: Option<String>,

    /// Index file to read (defaults to the configured output).
    #[arg(long, value_name = "PATH")]
    pub index: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_resolve_by_title() {
        let cli = Cli::try_parse_from([
            "storyhub", "-vv", "resolve", "--title", "Example/Button", "--name", "Primary",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Resolve(args) => {
                assert_eq!(args.title.as_deref(), Some("Example/Button"));
                assert_eq!(args.name.as_deref(), Some("Primary"));
                assert!(args.id.is_none());
            }
            _ => panic!("expected resolve"),
        }
    }

    #[test]
    fn test_title_requires_name() {
        assert!(Cli::try_parse_from(["storyhub", "resolve", "--title", "A"]).is_err());
    }
}
