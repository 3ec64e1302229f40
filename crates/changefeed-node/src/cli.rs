//! Command-line interface definition

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "changefeed", about = "Bounded, newest-first changelog of store mutations")]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the node with scheduled pruning until Ctrl-C
    Serve,

    /// Record one change set, creating the feed if needed
    Record {
        /// Feed name
        #[arg(long, default_value = "changefeed")]
        feed: String,

        /// Change descriptions, in order
        #[arg(required = true)]
        changes: Vec<String>,
    },

    /// Print change sets as JSON lines, newest first
    List {
        /// Feed name
        #[arg(long, default_value = "changefeed")]
        feed: String,

        /// Only change sets newer than this id
        #[arg(long)]
        since: Option<u64>,

        /// Maximum number of change sets
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Run one prune pass now
    Prune {
        /// Feed name
        #[arg(long, default_value = "changefeed")]
        feed: String,
    },

    /// Check the feed's chain for structural problems
    Verify {
        /// Feed name
        #[arg(long, default_value = "changefeed")]
        feed: String,
    },

    /// Print the feed's pointers and counters as JSON
    Stats {
        /// Feed name
        #[arg(long, default_value = "changefeed")]
        feed: String,
    },

    /// Delete a feed and every change set stored under it
    Drop {
        /// Feed name
        #[arg(long)]
        feed: String,
    },
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
    fn test_parse_list() {
        let cli = Cli::try_parse_from([
            "changefeed", "--data-dir", "/tmp/x", "list", "--feed", "orders", "--since", "4",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/x")));
        match cli.command {
            Command::List { feed, since, limit } => {
                assert_eq!(feed, "orders");
                assert_eq!(since, Some(4));
                assert_eq!(limit, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_drop_requires_feed() {
        assert!(Cli::try_parse_from(["changefeed", "drop"]).is_err());
        let cli = Cli::try_parse_from(["changefeed", "drop", "--feed", "orders"]).unwrap();
        assert!(matches!(cli.command, Command::Drop { feed } if feed == "orders"));
    }

    #[test]
    fn test_record_requires_changes() {
        assert!(Cli::try_parse_from(["changefeed", "record"]).is_err());
    }
}
