use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// Generate a static snapshot of a dynamic site and publish it.
#[derive(Debug, Parser)]
#[command(name = "freeze", version, about)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON). Defaults to the platform
    /// configuration directory.
    #[arg(short, long, global = true, env = "FREEZE_CONFIG")]
    pub config: Option<PathBuf>,
    /// More log output; repeat for more detail. `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
    /// Emit logs and command output as JSON.
    #[arg(long, global = true)]
    pub json: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch, transform and publish every URL in a list.
    Run(RunArgs),
    /// Inspect or clear the page cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Print the effective configuration.
    Config,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// File with one URL per line; blank lines and `#` comments are ignored.
    #[arg(long)]
    pub urls: PathBuf,
    /// JSON snapshot of the content graph. Without one the cache is not used.
    #[arg(long)]
    pub graph: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Number of cached pages and bytes used.
    Stats,
    /// Delete cached pages.
    Clear {
        /// Only pages that represent or depend on this entity.
        #[arg(long)]
        entity: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from(["freeze", "-vv", "run", "--urls", "urls.txt", "--graph", "graph.json"]).unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.urls, PathBuf::from("urls.txt"));
        assert_eq!(args.graph, Some(PathBuf::from("graph.json")));
    }

    #[test]
    fn test_parse_cache_clear() {
        let cli = Cli::try_parse_from(["freeze", "cache", "clear", "--entity", "42", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Command::Cache { action: CacheAction::Clear { entity: Some(42) } }));
    }
}
